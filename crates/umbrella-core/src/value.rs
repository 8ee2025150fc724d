// # Attribute Tree
//
// Three-valued attribute model used for both desired configuration and
// observed state.
//
// - `Null`: explicitly absent
// - `Unknown`: not determined yet (depends on a change elsewhere)
// - `Known`: concretely present
//
// Unknown is never collapsed into Null: the update merge relies on telling
// them apart.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// A single attribute value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum AttrValue {
    /// Explicitly absent
    #[default]
    Null,
    /// Not yet determined
    Unknown,
    /// Concretely present
    Known(Known),
}

/// Payload of a known attribute value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Known {
    String(String),
    Int(i64),
    Bool(bool),
    /// Ordered; equality is order-sensitive
    List(Vec<AttrValue>),
    Object(Object),
}

impl Known {
    /// Human-readable kind name used in error messages
    pub fn kind_name(&self) -> &'static str {
        match self {
            Known::String(_) => "string",
            Known::Int(_) => "integer",
            Known::Bool(_) => "boolean",
            Known::List(_) => "list",
            Known::Object(_) => "object",
        }
    }
}

impl AttrValue {
    pub fn string(value: impl Into<String>) -> Self {
        Self::Known(Known::String(value.into()))
    }

    pub fn int(value: i64) -> Self {
        Self::Known(Known::Int(value))
    }

    pub fn bool(value: bool) -> Self {
        Self::Known(Known::Bool(value))
    }

    pub fn list(items: Vec<AttrValue>) -> Self {
        Self::Known(Known::List(items))
    }

    /// Known list of strings
    pub fn string_list<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::list(items.into_iter().map(AttrValue::string).collect())
    }

    pub fn object(object: Object) -> Self {
        Self::Known(Known::Object(object))
    }

    pub fn is_known(&self) -> bool {
        matches!(self, Self::Known(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown)
    }

    /// The known payload, if any
    pub fn known(&self) -> Option<&Known> {
        match self {
            Self::Known(k) => Some(k),
            _ => None,
        }
    }

    fn state_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Unknown => "unknown",
            Self::Known(k) => k.kind_name(),
        }
    }

    fn mismatch(&self, expected: &str) -> Error {
        Error::attribute(format!(
            "expected a known {}, got {}",
            expected,
            self.state_name()
        ))
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Self::Known(Known::String(s)) => Ok(s.as_str()),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_i64(&self) -> Result<i64> {
        match self {
            Self::Known(Known::Int(i)) => Ok(*i),
            other => Err(other.mismatch("integer")),
        }
    }

    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Self::Known(Known::Bool(b)) => Ok(*b),
            other => Err(other.mismatch("boolean")),
        }
    }

    pub fn as_list(&self) -> Result<&[AttrValue]> {
        match self {
            Self::Known(Known::List(items)) => Ok(items.as_slice()),
            other => Err(other.mismatch("list")),
        }
    }

    pub fn as_object(&self) -> Result<&Object> {
        match self {
            Self::Known(Known::Object(o)) => Ok(o),
            other => Err(other.mismatch("object")),
        }
    }

    /// Whether this value, or anything nested inside it, is Unknown
    pub fn contains_unknown(&self) -> bool {
        match self {
            Self::Unknown => true,
            Self::Null => false,
            Self::Known(Known::List(items)) => items.iter().any(AttrValue::contains_unknown),
            Self::Known(Known::Object(o)) => o.values().any(AttrValue::contains_unknown),
            Self::Known(_) => false,
        }
    }

    /// Convert to plain JSON
    ///
    /// Unknown values have no JSON representation and are rejected.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        Ok(match self {
            Self::Null => serde_json::Value::Null,
            Self::Unknown => {
                return Err(Error::attribute("unknown values cannot be serialized"));
            }
            Self::Known(Known::String(s)) => serde_json::Value::String(s.clone()),
            Self::Known(Known::Int(i)) => serde_json::Value::from(*i),
            Self::Known(Known::Bool(b)) => serde_json::Value::Bool(*b),
            Self::Known(Known::List(items)) => serde_json::Value::Array(
                items
                    .iter()
                    .map(AttrValue::to_json)
                    .collect::<Result<Vec<_>>>()?,
            ),
            Self::Known(Known::Object(o)) => o.to_json()?,
        })
    }
}

impl From<&str> for AttrValue {
    fn from(value: &str) -> Self {
        Self::string(value)
    }
}

impl From<String> for AttrValue {
    fn from(value: String) -> Self {
        Self::string(value)
    }
}

impl From<i64> for AttrValue {
    fn from(value: i64) -> Self {
        Self::int(value)
    }
}

impl From<bool> for AttrValue {
    fn from(value: bool) -> Self {
        Self::bool(value)
    }
}

impl From<Object> for AttrValue {
    fn from(value: Object) -> Self {
        Self::object(value)
    }
}

/// Mapping from field name to attribute value
///
/// Backed by a `BTreeMap`, so equality ignores insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Object {
    fields: BTreeMap<String, AttrValue>,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<AttrValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&AttrValue> {
        self.fields.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut AttrValue> {
        self.fields.get_mut(name)
    }

    /// Value of a field, treating a missing key as Null
    pub fn value(&self, name: &str) -> &AttrValue {
        static NULL: AttrValue = AttrValue::Null;
        self.fields.get(name).unwrap_or(&NULL)
    }

    pub fn contains_key(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    pub fn values(&self) -> impl Iterator<Item = &AttrValue> {
        self.fields.values()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &AttrValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Look up a nested value, e.g. `["client", "authentication", "type"]`
    pub fn get_path(&self, path: &[&str]) -> Option<&AttrValue> {
        let (first, rest) = path.split_first()?;
        let value = self.get(first)?;
        if rest.is_empty() {
            return Some(value);
        }
        match value {
            AttrValue::Known(Known::Object(inner)) => inner.get_path(rest),
            _ => None,
        }
    }

    /// Replace a nested value
    ///
    /// Every intermediate step must already be a known object.
    pub fn set_path(&mut self, path: &[&str], value: impl Into<AttrValue>) -> Result<()> {
        let Some((first, rest)) = path.split_first() else {
            return Err(Error::attribute("empty attribute path"));
        };
        if rest.is_empty() {
            self.insert(*first, value);
            return Ok(());
        }
        match self.fields.get_mut(*first) {
            Some(AttrValue::Known(Known::Object(inner))) => inner.set_path(rest, value),
            Some(other) => Err(Error::attribute(format!(
                "cannot descend into '{}': value is {}",
                first,
                other.state_name()
            ))),
            None => Err(Error::attribute(format!("no attribute named '{}'", first))),
        }
    }

    /// Names of fields (dotted paths) whose values differ between two objects
    pub fn diff_fields(&self, other: &Object) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_diff(other, "", &mut out);
        out
    }

    fn collect_diff(&self, other: &Object, prefix: &str, out: &mut Vec<String>) {
        let mut names: Vec<&str> = self.keys().chain(other.keys()).collect();
        names.sort_unstable();
        names.dedup();

        for name in names {
            let path = if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{}.{}", prefix, name)
            };
            match (self.value(name), other.value(name)) {
                (AttrValue::Known(Known::Object(a)), AttrValue::Known(Known::Object(b))) => {
                    a.collect_diff(b, &path, out)
                }
                (a, b) if a != b => out.push(path),
                _ => {}
            }
        }
    }

    /// Convert to a JSON object (fails on Unknown)
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut map = serde_json::Map::with_capacity(self.len());
        for (name, value) in self.iter() {
            let encoded = value
                .to_json()
                .map_err(|e| Error::attribute(format!("{}: {}", name, e)))?;
            map.insert(name.to_string(), encoded);
        }
        Ok(serde_json::Value::Object(map))
    }
}

impl FromIterator<(String, AttrValue)> for Object {
    fn from_iter<T: IntoIterator<Item = (String, AttrValue)>>(iter: T) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}
