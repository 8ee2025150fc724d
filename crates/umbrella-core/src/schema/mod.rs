//! Resource descriptors
//!
//! A descriptor declares, per resource kind, the shape of the attribute tree
//! and how every attribute travels to and from the remote API:
//!
//! - **Presence**: required, optional, computed, or optional+computed
//! - **Access**: read-write, read-only (server-computed), write-only (never
//!   echoed), or local (maintained by the reconciler, never on the wire)
//! - **Unknown policy**: `UseEmpty` or `UseLastKnown`
//! - **Wire name**: the key used in the remote payload
//!
//! Descriptors are built once per process and never mutated afterwards.
//!
//! ## Usage
//!
//! ```rust
//! use umbrella_core::schema::ResourceKind;
//!
//! let schema = ResourceKind::Tunnel.schema();
//! let secret = schema.root.field_at(&["client", "authentication", "parameters", "secret"]);
//! assert!(secret.unwrap().sensitive);
//! ```

mod resources;

use crate::error::{Error, ResourceRef, Result};
use crate::value::{AttrValue, Known, Object};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Remote payload: a JSON object keyed by wire names
pub type Payload = serde_json::Map<String, serde_json::Value>;

/// Resource kinds managed by the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Site,
    #[serde(rename = "va")]
    VirtualAppliance,
    Tunnel,
    /// Read-only datacenter list; a data source without instances
    #[serde(rename = "dclist")]
    Datacenters,
}

impl ResourceKind {
    /// All kinds, in registration order
    pub const ALL: [ResourceKind; 4] = [
        ResourceKind::Site,
        ResourceKind::VirtualAppliance,
        ResourceKind::Tunnel,
        ResourceKind::Datacenters,
    ];

    /// Short name used in state keys and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Site => "site",
            ResourceKind::VirtualAppliance => "va",
            ResourceKind::Tunnel => "tunnel",
            ResourceKind::Datacenters => "dclist",
        }
    }

    /// Host-facing type name (`umbrella_<kind>`)
    pub fn type_name(&self) -> String {
        format!("umbrella_{}", self.as_str())
    }

    /// The static descriptor for this kind
    pub fn schema(&self) -> &'static ResourceSchema {
        match self {
            ResourceKind::Site => &resources::SITE,
            ResourceKind::VirtualAppliance => &resources::VIRTUAL_APPLIANCE,
            ResourceKind::Tunnel => &resources::TUNNEL,
            ResourceKind::Datacenters => &resources::DATACENTERS,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let name = s.strip_prefix("umbrella_").unwrap_or(s);
        match name {
            "site" => Ok(ResourceKind::Site),
            "va" | "virtual_appliance" => Ok(ResourceKind::VirtualAppliance),
            "tunnel" => Ok(ResourceKind::Tunnel),
            "dclist" | "datacenters" => Ok(ResourceKind::Datacenters),
            _ => Err(Error::config(format!("Unknown resource kind: {}", s))),
        }
    }
}

/// Scalar, list or nested object type of an attribute
#[derive(Debug, Clone, PartialEq)]
pub enum AttrType {
    String,
    Int,
    Bool,
    List(Box<AttrType>),
    Object(ObjectSchema),
}

impl AttrType {
    pub fn name(&self) -> String {
        match self {
            AttrType::String => "string".to_string(),
            AttrType::Int => "integer".to_string(),
            AttrType::Bool => "boolean".to_string(),
            AttrType::List(elem) => format!("list<{}>", elem.name()),
            AttrType::Object(_) => "object".to_string(),
        }
    }

    /// Whether a known value matches this type (recursively for lists)
    ///
    /// Objects are checked separately by [`ObjectSchema::check_shape`].
    fn accepts(&self, value: &Known) -> bool {
        match (self, value) {
            (AttrType::String, Known::String(_))
            | (AttrType::Int, Known::Int(_))
            | (AttrType::Bool, Known::Bool(_))
            | (AttrType::Object(_), Known::Object(_)) => true,
            (AttrType::List(elem), Known::List(items)) => items.iter().all(|item| match item {
                AttrValue::Known(k) => elem.accepts(k),
                _ => true,
            }),
            _ => false,
        }
    }
}

/// Whether the user must, may, or cannot set an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Required,
    Optional,
    /// Server-computed; ignored on input
    Computed,
    /// May be set; the server fills it in otherwise
    OptionalComputed,
}

/// Direction an attribute travels over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadWrite,
    /// Never sent to the remote
    ReadOnly,
    /// Sent but never echoed back
    WriteOnly,
    /// Maintained by the reconciler itself
    Local,
}

/// What to do when the remote omits an attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnknownPolicy {
    /// Resolve to Null
    UseEmpty,
    /// Carry the last known value forward
    UseLastKnown,
}

/// Descriptor of a single attribute
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: &'static str,
    pub wire: &'static str,
    pub ty: AttrType,
    pub presence: Presence,
    pub access: Access,
    pub unknown: UnknownPolicy,
    pub sensitive: bool,
    pub description: &'static str,
}

impl Field {
    fn new(name: &'static str, ty: AttrType) -> Self {
        Self {
            name,
            wire: name,
            ty,
            presence: Presence::Optional,
            access: Access::ReadWrite,
            unknown: UnknownPolicy::UseEmpty,
            sensitive: false,
            description: "",
        }
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, AttrType::String)
    }

    pub fn int(name: &'static str) -> Self {
        Self::new(name, AttrType::Int)
    }

    pub fn bool(name: &'static str) -> Self {
        Self::new(name, AttrType::Bool)
    }

    pub fn string_list(name: &'static str) -> Self {
        Self::new(name, AttrType::List(Box::new(AttrType::String)))
    }

    pub fn object(name: &'static str, fields: Vec<Field>) -> Self {
        Self::new(name, AttrType::Object(ObjectSchema::new(fields)))
    }

    /// A list whose elements are objects of the given fields
    pub fn object_list(name: &'static str, fields: Vec<Field>) -> Self {
        let element = AttrType::Object(ObjectSchema::new(fields));
        Self::new(name, AttrType::List(Box::new(element)))
    }

    /// Use a different key on the wire
    pub fn wire(mut self, wire: &'static str) -> Self {
        self.wire = wire;
        self
    }

    pub fn required(mut self) -> Self {
        self.presence = Presence::Required;
        self
    }

    /// Server-computed, never sent
    pub fn computed(mut self) -> Self {
        self.presence = Presence::Computed;
        self.access = Access::ReadOnly;
        self
    }

    pub fn optional_computed(mut self) -> Self {
        self.presence = Presence::OptionalComputed;
        self
    }

    /// Sent but never echoed; always resolved from the last known value
    pub fn write_only(mut self) -> Self {
        self.access = Access::WriteOnly;
        self.unknown = UnknownPolicy::UseLastKnown;
        self
    }

    /// Maintained by the reconciler, never on the wire
    pub fn local(mut self) -> Self {
        self.presence = Presence::Computed;
        self.access = Access::Local;
        self
    }

    pub fn use_last_known(mut self) -> Self {
        self.unknown = UnknownPolicy::UseLastKnown;
        self
    }

    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    /// Whether the value is sent to the remote API
    pub fn is_sent(&self) -> bool {
        matches!(self.access, Access::ReadWrite | Access::WriteOnly)
    }

    /// Whether the value is read back from remote payloads
    pub fn is_received(&self) -> bool {
        matches!(self.access, Access::ReadWrite | Access::ReadOnly)
    }

    /// Whether the user controls this value (round-trips through the remote)
    pub fn is_user_controlled(&self) -> bool {
        self.presence != Presence::Computed
    }

    /// Nested descriptor, for object attributes
    pub fn nested(&self) -> Option<&ObjectSchema> {
        match &self.ty {
            AttrType::Object(schema) => Some(schema),
            _ => None,
        }
    }

    /// Element descriptor, for lists of objects
    pub fn element_schema(&self) -> Option<&ObjectSchema> {
        match &self.ty {
            AttrType::List(elem) => match elem.as_ref() {
                AttrType::Object(schema) => Some(schema),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Descriptor of an object: its declared fields
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectSchema {
    pub fields: Vec<Field>,
}

impl ObjectSchema {
    pub fn new(fields: Vec<Field>) -> Self {
        Self { fields }
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Look up a nested field by attribute path
    pub fn field_at(&self, path: &[&str]) -> Option<&Field> {
        let (first, rest) = path.split_first()?;
        let field = self.field(first)?;
        if rest.is_empty() {
            Some(field)
        } else {
            field.nested()?.field_at(rest)
        }
    }

    /// Whether a wire key is declared by any field
    pub fn knows_wire(&self, wire: &str) -> bool {
        self.fields.iter().any(|f| f.wire == wire)
    }

    /// A tree with every field Null
    pub fn null_tree(&self) -> Object {
        self.fields
            .iter()
            .map(|f| (f.name.to_string(), AttrValue::Null))
            .collect()
    }

    /// A tree whose nested objects are known and whose leaves are `leaf`
    pub fn skeleton(&self, leaf: &AttrValue) -> Object {
        self.fields
            .iter()
            .map(|f| {
                let value = match f.nested() {
                    Some(nested) => AttrValue::object(nested.skeleton(leaf)),
                    None => leaf.clone(),
                };
                (f.name.to_string(), value)
            })
            .collect()
    }

    /// Verify that a known object has exactly the declared keys and that
    /// every known value has the declared type
    pub fn check_shape(&self, object: &Object) -> std::result::Result<(), String> {
        self.check_shape_at(object, "")
    }

    fn check_shape_at(&self, object: &Object, prefix: &str) -> std::result::Result<(), String> {
        for key in object.keys() {
            if self.field(key).is_none() {
                return Err(format!("unexpected attribute '{}{}'", prefix, key));
            }
        }

        for field in &self.fields {
            let path = format!("{}{}", prefix, field.name);
            let value = object
                .get(field.name)
                .ok_or_else(|| format!("missing attribute '{}'", path))?;

            let AttrValue::Known(known) = value else {
                continue;
            };

            if !field.ty.accepts(known) {
                return Err(format!(
                    "attribute '{}' must be {}, got {}",
                    path,
                    field.ty.name(),
                    known.kind_name()
                ));
            }

            if let (Some(nested), Known::Object(inner)) = (field.nested(), known) {
                nested.check_shape_at(inner, &format!("{}.", path))?;
            }

            if let (Some(element), Known::List(items)) = (field.element_schema(), known) {
                for (i, item) in items.iter().enumerate() {
                    if let AttrValue::Known(Known::Object(inner)) = item {
                        element.check_shape_at(inner, &format!("{}[{}].", path, i))?;
                    }
                }
            }
        }

        Ok(())
    }

    /// Report the first required attribute that is not usable
    ///
    /// Null is always rejected; Unknown is rejected unless `allow_unknown`.
    /// Required attributes inside a Null/Unknown object are not checked.
    pub fn missing_required(&self, object: &Object, allow_unknown: bool) -> Option<String> {
        self.missing_required_at(object, allow_unknown, "")
    }

    fn missing_required_at(
        &self,
        object: &Object,
        allow_unknown: bool,
        prefix: &str,
    ) -> Option<String> {
        for field in &self.fields {
            let path = format!("{}{}", prefix, field.name);
            let value = object.value(field.name);

            if field.presence == Presence::Required {
                match value {
                    AttrValue::Null => return Some(format!("'{}' is required", path)),
                    AttrValue::Unknown if !allow_unknown => {
                        return Some(format!("'{}' is required but not yet known", path));
                    }
                    _ => {}
                }
            }

            if let (Some(nested), AttrValue::Known(Known::Object(inner))) = (field.nested(), value)
                && let Some(problem) =
                    nested.missing_required_at(inner, allow_unknown, &format!("{}.", path))
            {
                return Some(problem);
            }
        }
        None
    }
}

/// Create-response normalizer: receives the payload and the assigned identifier
pub type CreateFixup = fn(&mut Payload, i64);

/// Data-source filter applied to listed payloads
pub type ListFilter = fn(&Payload) -> bool;

/// Complete descriptor of a resource kind
#[derive(Debug)]
pub struct ResourceSchema {
    pub kind: ResourceKind,
    pub description: &'static str,
    pub root: ObjectSchema,
    /// Attribute holding the remote identifier in state
    pub id_attribute: &'static str,
    /// Payload key holding the remote identifier
    pub id_wire: &'static str,
    /// Local attribute refreshed with the reconciliation time
    pub timestamp_attribute: Option<&'static str>,
    pub supports_create: bool,
    /// Whether instances are addressed by identifier; false for pure data sources
    pub addressable: bool,
    /// Hint shown when an operation is not supported
    pub unsupported_hint: &'static str,
    pub create_fixup: Option<CreateFixup>,
    pub list_filter: Option<ListFilter>,
}

impl ResourceSchema {
    /// Validate a desired tree before anything is sent
    ///
    /// `allow_unknown_required` is false for Create, where an Unknown required
    /// attribute cannot be resolved from prior state.
    pub fn validate_desired(
        &self,
        resource: ResourceRef,
        desired: &Object,
        allow_unknown_required: bool,
    ) -> Result<()> {
        self.root
            .check_shape(desired)
            .map_err(|msg| Error::configuration(resource, msg))?;

        if let Some(problem) = self.root.missing_required(desired, allow_unknown_required) {
            return Err(Error::configuration(resource, problem));
        }

        Ok(())
    }
}
