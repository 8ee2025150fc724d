//! Payload mapping
//!
//! Converts between attribute trees and the flat JSON payloads exchanged with
//! the remote API, and between attribute trees and their persisted form.
//!
//! Outbound (`to_payload`) only Known values of sendable fields are emitted;
//! Null and Unknown mean "leave unspecified". Inbound (`from_payload`) every
//! declared field is populated, falling back to the prior tree for
//! `UseLastKnown` fields the remote did not echo.

use crate::error::{Error, Result};
use crate::schema::{Access, AttrType, Field, ObjectSchema, Payload, UnknownPolicy};
use crate::value::{AttrValue, Known, Object};
use serde_json::Value;
use thiserror::Error;

/// Placeholder written in place of sensitive values
pub const REDACTED: &str = "(sensitive)";

/// A payload value did not match the declared attribute type
#[derive(Error, Debug, Clone, PartialEq)]
#[error("malformed payload: '{path}' must be {expected}, got {found}")]
pub struct PayloadError {
    pub path: String,
    pub expected: String,
    pub found: String,
}

impl PayloadError {
    fn new(path: &str, ty: &AttrType, value: &Value) -> Self {
        Self {
            path: path.to_string(),
            expected: ty.name(),
            found: json_kind(value).to_string(),
        }
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", prefix, name)
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Flatten the known, sendable values of a desired tree into a payload
pub fn to_payload(desired: &Object, schema: &ObjectSchema) -> Payload {
    let mut payload = Payload::new();

    for field in schema.fields.iter().filter(|f| f.is_sent()) {
        if let Some(value) = outbound_value(desired.value(field.name), field) {
            payload.insert(field.wire.to_string(), value);
        }
    }

    payload
}

fn outbound_value(value: &AttrValue, field: &Field) -> Option<Value> {
    let AttrValue::Known(known) = value else {
        return None;
    };

    match (known, field.nested(), field.element_schema()) {
        (Known::Object(inner), Some(nested), _) => Some(Value::Object(to_payload(inner, nested))),
        (Known::List(items), _, _) if items.iter().any(|item| !item.is_known()) => None,
        (Known::List(items), _, Some(element)) => Some(Value::Array(
            items
                .iter()
                .filter_map(|item| item.as_object().ok())
                .map(|inner| Value::Object(to_payload(inner, element)))
                .collect(),
        )),
        _ => value.to_json().ok(),
    }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Build a complete tree from a remote payload
///
/// `prior` supplies the values of `UseLastKnown` fields the payload omits,
/// and of write-only and local fields, which never come from the remote.
pub fn from_payload(
    payload: &Payload,
    schema: &ObjectSchema,
    prior: Option<&Object>,
) -> std::result::Result<Object, PayloadError> {
    from_payload_at(payload, schema, prior, "")
}

fn from_payload_at(
    payload: &Payload,
    schema: &ObjectSchema,
    prior: Option<&Object>,
    prefix: &str,
) -> std::result::Result<Object, PayloadError> {
    let mut tree = Object::new();

    for field in &schema.fields {
        let path = join(prefix, field.name);
        let last_known = prior.map(|p| settled(p.value(field.name)));

        let value = if !field.is_received() {
            last_known.unwrap_or_default()
        } else {
            match (payload.get(field.wire), field.nested()) {
                (Some(Value::Null) | None, _) => match field.unknown {
                    UnknownPolicy::UseLastKnown => last_known.unwrap_or_default(),
                    UnknownPolicy::UseEmpty => AttrValue::Null,
                },
                (Some(Value::Object(inner)), Some(nested)) => {
                    let prior_inner = prior.and_then(|p| p.value(field.name).as_object().ok());
                    AttrValue::object(from_payload_at(inner, nested, prior_inner, &path)?)
                }
                (Some(raw), _) => scalar_or_list(raw, &field.ty, &path, Keys::Wire)?,
            }
        };

        tree.insert(field.name, value);
    }

    Ok(tree)
}

/// Prior values are persisted state and never Unknown; treat a stray one as Null
fn settled(value: &AttrValue) -> AttrValue {
    match value {
        AttrValue::Unknown => AttrValue::Null,
        other => other.clone(),
    }
}

/// Which names key the objects being converted
#[derive(Debug, Clone, Copy)]
enum Keys {
    /// Remote payloads, keyed by wire name
    Wire,
    /// Persisted state, keyed by attribute name
    Attribute,
}

fn scalar_or_list(
    value: &Value,
    ty: &AttrType,
    path: &str,
    keys: Keys,
) -> std::result::Result<AttrValue, PayloadError> {
    let converted = match (ty, value) {
        (_, Value::Null) => AttrValue::Null,
        (AttrType::String, Value::String(s)) => AttrValue::string(s.as_str()),
        (AttrType::Bool, Value::Bool(b)) => AttrValue::bool(*b),
        (AttrType::Int, Value::Number(n)) => match n.as_i64() {
            Some(i) => AttrValue::int(i),
            None => return Err(PayloadError::new(path, ty, value)),
        },
        (AttrType::List(elem), Value::Array(items)) => AttrValue::list(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| scalar_or_list(item, elem, &format!("{}[{}]", path, i), keys))
                .collect::<std::result::Result<Vec<_>, _>>()?,
        ),
        (AttrType::Object(nested), Value::Object(inner)) => AttrValue::object(match keys {
            Keys::Wire => from_payload_at(inner, nested, None, path)?,
            Keys::Attribute => decode_object(inner, nested, path)?,
        }),
        _ => return Err(PayloadError::new(path, ty, value)),
    };
    Ok(converted)
}

/// Wire keys present in the payload that the descriptor does not declare
pub fn unrecognized_keys(payload: &Payload, schema: &ObjectSchema) -> Vec<String> {
    let mut keys = Vec::new();
    collect_unrecognized(payload, schema, "", &mut keys);
    keys
}

fn collect_unrecognized(payload: &Payload, schema: &ObjectSchema, prefix: &str, out: &mut Vec<String>) {
    for (key, value) in payload {
        if !schema.knows_wire(key) {
            out.push(join(prefix, key));
            continue;
        }
        for field in schema.fields.iter().filter(|f| f.wire == key.as_str()) {
            match (value, field.nested(), field.element_schema()) {
                (Value::Object(inner), Some(nested), _) => {
                    collect_unrecognized(inner, nested, &join(prefix, key), out);
                }
                (Value::Array(items), _, Some(element)) => {
                    for (i, item) in items.iter().enumerate() {
                        if let Value::Object(inner) = item {
                            let path = format!("{}[{}]", join(prefix, key), i);
                            collect_unrecognized(inner, element, &path, out);
                        }
                    }
                }
                _ => {}
            }
        }
    }
}

/// Copy write-only values from `desired` into a tree built from a response
///
/// The remote never echoes write-only fields, so right after Create the
/// submitted value is the only source for them. Unknown desired values are
/// left as they are in `tree`.
pub fn retain_write_only(tree: &mut Object, desired: &Object, schema: &ObjectSchema) {
    for field in &schema.fields {
        let wanted = desired.value(field.name);
        if field.access == Access::WriteOnly {
            if wanted.is_known() {
                tree.insert(field.name, wanted.clone());
            }
            continue;
        }

        if let (Some(nested), Ok(wanted_inner)) = (field.nested(), wanted.as_object())
            && let Some(AttrValue::Known(Known::Object(inner))) = tree.get_mut(field.name)
        {
            retain_write_only(inner, wanted_inner, nested);
        }
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Replace every Unknown in `desired` with the corresponding prior value
///
/// Known objects are merged field by field; lists are replaced wholesale,
/// so a list holding any Unknown element takes the prior list.
pub fn resolve_unknowns(desired: &Object, prior: &Object, schema: &ObjectSchema) -> Object {
    let mut merged = Object::new();

    for field in &schema.fields {
        let wanted = desired.value(field.name);
        let last = prior.value(field.name);

        let value = match (wanted, field.nested()) {
            (AttrValue::Unknown, _) => settled(last),
            (AttrValue::Known(Known::Object(inner)), Some(nested)) => {
                let empty = Object::new();
                let prior_inner = last.as_object().unwrap_or(&empty);
                AttrValue::object(resolve_unknowns(inner, prior_inner, nested))
            }
            (AttrValue::Known(Known::List(_)), _) if wanted.contains_unknown() => settled(last),
            _ => wanted.clone(),
        };

        merged.insert(field.name, value);
    }

    merged
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

/// Encode a tree for the state store, keyed by attribute name
pub fn encode_state(tree: &Object) -> Result<Value> {
    tree.to_json()
}

/// Decode a persisted tree, filling undeclared keys with Null
pub fn decode_state(value: &Value, schema: &ObjectSchema) -> Result<Object> {
    let Value::Object(map) = value else {
        return Err(Error::state_store(format!(
            "persisted attributes must be an object, got {}",
            json_kind(value)
        )));
    };
    decode_object(map, schema, "").map_err(|e| Error::state_store(e.to_string()))
}

fn decode_object(
    map: &Payload,
    schema: &ObjectSchema,
    prefix: &str,
) -> std::result::Result<Object, PayloadError> {
    let mut tree = Object::new();
    for field in &schema.fields {
        let path = join(prefix, field.name);
        let value = match (map.get(field.name), field.nested()) {
            (None, _) => AttrValue::Null,
            (Some(Value::Object(inner)), Some(nested)) => {
                AttrValue::object(decode_object(inner, nested, &path)?)
            }
            (Some(raw), _) => scalar_or_list(raw, &field.ty, &path, Keys::Attribute)?,
        };
        tree.insert(field.name, value);
    }
    Ok(tree)
}

/// Copy of a tree with every known sensitive value masked
pub fn redact(tree: &Object, schema: &ObjectSchema) -> Object {
    let mut masked = Object::new();
    for field in &schema.fields {
        let value = tree.value(field.name);
        let shown = match (value, field.nested()) {
            (AttrValue::Known(_), _) if field.sensitive => AttrValue::string(REDACTED),
            (AttrValue::Known(Known::Object(inner)), Some(nested)) => {
                AttrValue::object(redact(inner, nested))
            }
            _ => value.clone(),
        };
        masked.insert(field.name, shown);
    }
    masked
}
