//! The metadata value type and the codec between flat keyspaces and nested
//! JSON documents.
//!
//! In memory, metadata is a flat map from `/`-separated canonical virtual
//! paths to scalar values. On disk it is a recursive JSON object with string
//! keys and scalar leaves. The two representations are isomorphic through
//! [`fold`] and [`unfold`]; the g-code header parser reuses the same unfold
//! over a `.`-separated namespace.

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// A flat metadata mapping from canonical virtual path to scalar value.
pub type MetadataMap = BTreeMap<String, Variant>;

/// The result of a data query: resource bytes and/or metadata scalars keyed
/// by virtual path.
pub type DataMap = BTreeMap<String, Variant>;

/// A metadata or data leaf. The set of leaves is closed so that decoding is
/// total: JSON arrays are rejected, and nested objects exist only as tree
/// structure, never as a leaf.
#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Variant {
    /// Parses a header value as a literal: integer, float or boolean,
    /// falling back to the unparsed string.
    pub fn parse_literal(raw: &str) -> Variant {
        if let Ok(value) = raw.parse::<i64>() {
            return Variant::Int(value);
        }
        if let Ok(value) = raw.parse::<f64>() {
            return Variant::Float(value);
        }
        match raw {
            "true" | "True" => Variant::Bool(true),
            "false" | "False" => Variant::Bool(false),
            _ => Variant::String(raw.to_string()),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Variant::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Converts a scalar to its JSON representation. Byte arrays have no JSON
    /// form and cannot be stored in metadata sidecars.
    pub fn to_json(&self) -> Result<Value> {
        match self {
            Variant::Null => Ok(Value::Null),
            Variant::Bool(value) => Ok(Value::Bool(*value)),
            Variant::Int(value) => Ok(Value::from(*value)),
            Variant::Float(value) => serde_json::Number::from_f64(*value)
                .map(Value::Number)
                .ok_or_else(|| {
                    Error::InvalidMetadata(format!("non-finite number {} in metadata", value))
                }),
            Variant::String(value) => Ok(Value::String(value.clone())),
            Variant::Bytes(_) => Err(Error::InvalidMetadata(
                "byte arrays cannot be stored in metadata sidecars".to_string(),
            )),
        }
    }

    /// Converts a JSON leaf to a scalar. Arrays are not part of the metadata
    /// contract and are rejected; objects are handled by [`fold`], not here.
    pub fn from_json(value: &Value) -> Result<Variant> {
        match value {
            Value::Null => Ok(Variant::Null),
            Value::Bool(b) => Ok(Variant::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Variant::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(Variant::Float(f))
                } else {
                    Err(Error::InvalidMetadata(format!(
                        "unrepresentable number {} in metadata",
                        n
                    )))
                }
            }
            Value::String(s) => Ok(Variant::String(s.clone())),
            Value::Array(_) => Err(Error::InvalidMetadata(
                "arrays are not allowed as metadata values".to_string(),
            )),
            Value::Object(_) => Err(Error::InvalidMetadata(
                "expected a scalar metadata leaf, found an object".to_string(),
            )),
        }
    }
}

impl From<&str> for Variant {
    fn from(value: &str) -> Self {
        Variant::String(value.to_string())
    }
}

impl From<String> for Variant {
    fn from(value: String) -> Self {
        Variant::String(value)
    }
}

impl From<i64> for Variant {
    fn from(value: i64) -> Self {
        Variant::Int(value)
    }
}

impl From<f64> for Variant {
    fn from(value: f64) -> Self {
        Variant::Float(value)
    }
}

impl From<bool> for Variant {
    fn from(value: bool) -> Self {
        Variant::Bool(value)
    }
}

impl From<Vec<u8>> for Variant {
    fn from(value: Vec<u8>) -> Self {
        Variant::Bytes(value)
    }
}

/// Splits a flat map into a nested JSON document.
///
/// Each key is split on `separator` (a single leading separator is
/// stripped), intermediate maps are created as needed, and the leaf is
/// stored under the sentinel key `""` within the deepest map. A post-pass
/// replaces every map whose only key is the sentinel with its value, so a
/// plain leaf renders as a plain JSON scalar.
pub fn unfold(flat: &BTreeMap<String, Variant>, separator: char) -> Result<Value> {
    let mut root = Map::new();

    for (key, value) in flat {
        let stripped = key.strip_prefix(separator).unwrap_or(key);
        let mut node = &mut root;
        for segment in stripped.split(separator) {
            let child = node
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            node = match child {
                Value::Object(map) => map,
                // A scalar was stored where this key needs a subtree.
                other => {
                    return Err(Error::InvalidMetadata(format!(
                        "metadata key {:?} collides with a non-object value {}",
                        key, other
                    )));
                }
            };
        }
        node.insert(String::new(), value.to_json()?);
    }

    let mut document = Value::Object(root);
    collapse_singletons(&mut document);
    Ok(document)
}

fn collapse_singletons(value: &mut Value) {
    if let Value::Object(map) = value {
        for child in map.values_mut() {
            collapse_singletons(child);
        }
        if map.len() == 1 {
            if let Some(inner) = map.remove("") {
                *value = inner;
            }
        }
    }
}

/// Flattens a nested JSON document into `flat`, prefixing every key with
/// `prefix`. Scalar leaves contribute `prefix + "/" + joined-path`; the
/// sentinel key `""` contributes a value at the parent path itself, which
/// makes `fold(unfold(m)) == m` hold even when a node carries both a value
/// and children.
pub fn fold(document: &Value, prefix: &str, flat: &mut MetadataMap) -> Result<()> {
    match document {
        Value::Object(map) => {
            for (key, child) in map {
                if key.is_empty() {
                    flat.insert(prefix.to_string(), Variant::from_json(child)?);
                } else {
                    let path = format!("{}/{}", prefix, key);
                    fold(child, &path, flat)?;
                }
            }
            Ok(())
        }
        leaf => {
            flat.insert(prefix.to_string(), Variant::from_json(leaf)?);
            Ok(())
        }
    }
}

/// Renders a metadata document the way sidecars are written: sorted keys and
/// four-space indentation.
pub fn to_sidecar_json(document: &Value) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut out, formatter);
    serde::Serialize::serialize(document, &mut serializer)?;
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::json;

    fn flat(entries: &[(&str, Variant)]) -> MetadataMap {
        entries
            .iter()
            .map(|(key, value)| (key.to_string(), value.clone()))
            .collect()
    }

    #[test]
    fn unfold_builds_a_nested_document() {
        let metadata = flat(&[
            ("/print/time", Variant::Int(42)),
            ("/print/size/x", Variant::Int(1)),
        ]);
        let document = unfold(&metadata, '/').unwrap();
        assert_eq!(json!({"print": {"time": 42, "size": {"x": 1}}}), document);
    }

    #[test]
    fn unfold_keeps_a_value_next_to_a_subtree() {
        let metadata = flat(&[
            ("/print", Variant::String("griffin".into())),
            ("/print/time", Variant::Int(42)),
        ]);
        let document = unfold(&metadata, '/').unwrap();
        assert_eq!(json!({"print": {"": "griffin", "time": 42}}), document);
    }

    #[test]
    fn fold_unfold_is_the_identity() {
        let metadata = flat(&[
            ("/machine_type", Variant::String("ultimaker3".into())),
            ("/print", Variant::String("griffin".into())),
            ("/print/time", Variant::Int(42)),
            ("/print/size/x", Variant::Float(12.5)),
            ("/supported", Variant::Bool(true)),
            ("/comment", Variant::Null),
        ]);
        let document = unfold(&metadata, '/').unwrap();
        let mut roundtrip = MetadataMap::new();
        fold(&document, "", &mut roundtrip).unwrap();
        assert_eq!(metadata, roundtrip);
    }

    #[test]
    fn repeated_cycles_are_stable() {
        let metadata = flat(&[("/a/b", Variant::Int(1)), ("/a/c", Variant::Int(2))]);
        let first = to_sidecar_json(&unfold(&metadata, '/').unwrap()).unwrap();
        let mut refolded = MetadataMap::new();
        fold(&unfold(&metadata, '/').unwrap(), "", &mut refolded).unwrap();
        let second = to_sidecar_json(&unfold(&refolded, '/').unwrap()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn fold_rejects_arrays() {
        let mut out = MetadataMap::new();
        let err = fold(&json!({"a": [1, 2]}), "", &mut out).unwrap_err();
        assert!(matches!(err, Error::InvalidMetadata(_)));
    }

    #[test]
    fn bytes_do_not_serialize_into_sidecars() {
        let metadata = flat(&[("/blob", Variant::Bytes(vec![1, 2, 3]))]);
        assert!(unfold(&metadata, '/').is_err());
    }

    #[test]
    fn literal_parsing() {
        assert_eq!(Variant::Int(42), Variant::parse_literal("42"));
        assert_eq!(Variant::Float(0.25), Variant::parse_literal("0.25"));
        assert_eq!(Variant::Bool(true), Variant::parse_literal("True"));
        assert_eq!(
            Variant::String("Griffin".into()),
            Variant::parse_literal("Griffin")
        );
    }

    #[test]
    fn dotted_namespaces_unfold_too() {
        let metadata = flat(&[
            ("target_machine.name", Variant::String("ultimaker3".into())),
            ("print.size.min.x", Variant::Int(0)),
        ]);
        let document = unfold(&metadata, '.').unwrap();
        assert_eq!(
            json!({
                "target_machine": {"name": "ultimaker3"},
                "print": {"size": {"min": {"x": 0}}},
            }),
            document
        );
    }
}
