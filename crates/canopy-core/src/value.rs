//! Feature values and their wire representation.

use crate::error::{GraphError, Result};
use crate::id::NodeId;
use crate::language::{DatatypeKind, PrimitiveKind};
use crate::meta::MetaPointer;
use crate::registry::LanguageRegistry;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Serialization format version. The two versions differ only in which
/// datatypes exist: JSON values are limited to 2023.1 and structured values
/// to 2024.1.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SerializationFormat {
    #[serde(rename = "2023.1")]
    V2023_1,
    #[default]
    #[serde(rename = "2024.1")]
    V2024_1,
}

impl SerializationFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            SerializationFormat::V2023_1 => "2023.1",
            SerializationFormat::V2024_1 => "2024.1",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "2023.1" => Some(SerializationFormat::V2023_1),
            "2024.1" => Some(SerializationFormat::V2024_1),
            _ => None,
        }
    }
}

impl std::fmt::Display for SerializationFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed property value.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Boolean(bool),
    Integer(i64),
    String(String),
    Json(serde_json::Value),
    /// Key of an enumeration literal.
    Enumeration(String),
    /// Field key → value.
    Structured(BTreeMap<String, PropertyValue>),
}

impl From<&str> for PropertyValue {
    fn from(value: &str) -> Self {
        PropertyValue::String(value.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(value: String) -> Self {
        PropertyValue::String(value)
    }
}

impl From<i64> for PropertyValue {
    fn from(value: i64) -> Self {
        PropertyValue::Integer(value)
    }
}

impl From<bool> for PropertyValue {
    fn from(value: bool) -> Self {
        PropertyValue::Boolean(value)
    }
}

/// One entry of a reference list. At least one half is always present
/// in a stored entry.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceEntry {
    #[serde(rename = "reference")]
    pub target: Option<NodeId>,
    #[serde(rename = "resolveInfo")]
    pub resolve_info: Option<String>,
}

impl ReferenceEntry {
    pub fn to(target: impl Into<NodeId>) -> Self {
        Self {
            target: Some(target.into()),
            resolve_info: None,
        }
    }

    pub fn unresolved(resolve_info: impl Into<String>) -> Self {
        Self {
            target: None,
            resolve_info: Some(resolve_info.into()),
        }
    }

    pub fn with_resolve_info(mut self, resolve_info: impl Into<String>) -> Self {
        self.resolve_info = Some(resolve_info.into());
        self
    }

    pub fn is_null(&self) -> bool {
        self.target.is_none() && self.resolve_info.is_none()
    }
}

/// A single item passed to the reflective accessors.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Property(PropertyValue),
    Node(NodeId),
    Reference(ReferenceEntry),
}

impl From<PropertyValue> for Value {
    fn from(value: PropertyValue) -> Self {
        Value::Property(value)
    }
}

impl From<ReferenceEntry> for Value {
    fn from(entry: ReferenceEntry) -> Self {
        Value::Reference(entry)
    }
}

/// The stored content of one feature slot.
#[derive(Clone, Debug, PartialEq)]
pub enum FeatureValue {
    Property(PropertyValue),
    Children(Vec<NodeId>),
    References(Vec<ReferenceEntry>),
}

impl FeatureValue {
    /// Empty lists are never stored; slots treat them as unset.
    pub fn is_empty(&self) -> bool {
        match self {
            FeatureValue::Property(_) => false,
            FeatureValue::Children(children) => children.is_empty(),
            FeatureValue::References(entries) => entries.is_empty(),
        }
    }

    pub fn to_values(&self) -> Vec<Value> {
        match self {
            FeatureValue::Property(value) => vec![Value::Property(value.clone())],
            FeatureValue::Children(children) => {
                children.iter().cloned().map(Value::Node).collect()
            }
            FeatureValue::References(entries) => {
                entries.iter().cloned().map(Value::Reference).collect()
            }
        }
    }
}

impl LanguageRegistry {
    /// Parse a raw property string according to `datatype` and `format`.
    pub fn parse_value(
        &self,
        datatype: &MetaPointer,
        raw: &str,
        format: SerializationFormat,
    ) -> Result<PropertyValue> {
        let invalid = |reason: &str| GraphError::InvalidPropertyValue {
            datatype: datatype.clone(),
            raw: raw.to_string(),
            reason: reason.to_string(),
        };

        match &self.datatype(datatype)?.kind {
            DatatypeKind::Primitive(PrimitiveKind::Boolean) => match raw {
                "true" => Ok(PropertyValue::Boolean(true)),
                "false" => Ok(PropertyValue::Boolean(false)),
                _ => Err(invalid("expected true or false")),
            },
            DatatypeKind::Primitive(PrimitiveKind::Integer) => raw
                .parse::<i64>()
                .map(PropertyValue::Integer)
                .map_err(|e| invalid(&e.to_string())),
            DatatypeKind::Primitive(PrimitiveKind::String) => {
                Ok(PropertyValue::String(raw.to_string()))
            }
            DatatypeKind::Primitive(PrimitiveKind::Json) => {
                if format != SerializationFormat::V2023_1 {
                    return Err(invalid("JSON values require format 2023.1"));
                }
                serde_json::from_str(raw)
                    .map(PropertyValue::Json)
                    .map_err(|e| invalid(&e.to_string()))
            }
            DatatypeKind::Enumeration(literals) => {
                if literals.iter().any(|l| l.key == raw) {
                    Ok(PropertyValue::Enumeration(raw.to_string()))
                } else {
                    Err(invalid("no such enumeration literal"))
                }
            }
            DatatypeKind::Structured(_) => {
                if format != SerializationFormat::V2024_1 {
                    return Err(invalid("structured values require format 2024.1"));
                }
                let json: serde_json::Value =
                    serde_json::from_str(raw).map_err(|e| invalid(&e.to_string()))?;
                self.structured_from_json(datatype, &json, format)
                    .map_err(|reason| invalid(&reason))
            }
        }
    }

    fn structured_from_json(
        &self,
        datatype: &MetaPointer,
        json: &serde_json::Value,
        format: SerializationFormat,
    ) -> std::result::Result<PropertyValue, String> {
        let fields = match self.datatype(datatype).map(|d| &d.kind) {
            Ok(DatatypeKind::Structured(fields)) => fields,
            _ => return Err(format!("{} is not a structured datatype", datatype)),
        };
        let object = json
            .as_object()
            .ok_or_else(|| "expected a JSON object".to_string())?;
        if let Some(extra) = object.keys().find(|k| !fields.iter().any(|f| &f.key == *k)) {
            return Err(format!("unknown field {}", extra));
        }

        let mut values = BTreeMap::new();
        for field in fields {
            let raw = object
                .get(&field.key)
                .ok_or_else(|| format!("missing field {}", field.key))?;
            let value = match raw {
                serde_json::Value::String(s) => self
                    .parse_value(&field.datatype, s, format)
                    .map_err(|e| e.to_string())?,
                serde_json::Value::Object(_) => {
                    self.structured_from_json(&field.datatype, raw, format)?
                }
                _ => return Err(format!("field {} must be a string or object", field.key)),
            };
            values.insert(field.key.clone(), value);
        }
        Ok(PropertyValue::Structured(values))
    }

    /// Render a value as its wire string.
    pub fn format_value(&self, value: &PropertyValue, format: SerializationFormat) -> Result<String> {
        match value {
            PropertyValue::Boolean(b) => Ok(b.to_string()),
            PropertyValue::Integer(i) => Ok(i.to_string()),
            PropertyValue::String(s) => Ok(s.clone()),
            PropertyValue::Enumeration(key) => Ok(key.clone()),
            PropertyValue::Json(json) => {
                if format != SerializationFormat::V2023_1 {
                    return Err(GraphError::invalid(
                        "property",
                        "JSON values require format 2023.1",
                    ));
                }
                Ok(json.to_string())
            }
            PropertyValue::Structured(_) => {
                if format != SerializationFormat::V2024_1 {
                    return Err(GraphError::invalid(
                        "property",
                        "structured values require format 2024.1",
                    ));
                }
                Ok(structured_to_json(value).to_string())
            }
        }
    }

    /// Check that `value` is an instance of `datatype`.
    pub fn check_value(&self, datatype: &MetaPointer, value: &PropertyValue) -> Result<()> {
        let mismatch = || GraphError::invalid(datatype, format!("{:?} does not fit", value));
        match (&self.datatype(datatype)?.kind, value) {
            (DatatypeKind::Primitive(PrimitiveKind::Boolean), PropertyValue::Boolean(_))
            | (DatatypeKind::Primitive(PrimitiveKind::Integer), PropertyValue::Integer(_))
            | (DatatypeKind::Primitive(PrimitiveKind::String), PropertyValue::String(_))
            | (DatatypeKind::Primitive(PrimitiveKind::Json), PropertyValue::Json(_)) => Ok(()),
            (DatatypeKind::Enumeration(literals), PropertyValue::Enumeration(key)) => {
                if literals.iter().any(|l| &l.key == key) {
                    Ok(())
                } else {
                    Err(mismatch())
                }
            }
            (DatatypeKind::Structured(fields), PropertyValue::Structured(values)) => {
                if values.len() != fields.len() {
                    return Err(mismatch());
                }
                for field in fields {
                    let inner = values.get(&field.key).ok_or_else(mismatch)?;
                    self.check_value(&field.datatype, inner)?;
                }
                Ok(())
            }
            _ => Err(mismatch()),
        }
    }
}

fn structured_to_json(value: &PropertyValue) -> serde_json::Value {
    match value {
        PropertyValue::Structured(fields) => serde_json::Value::Object(
            fields
                .iter()
                .map(|(key, inner)| (key.clone(), structured_to_json(inner)))
                .collect(),
        ),
        PropertyValue::Boolean(b) => serde_json::Value::String(b.to_string()),
        PropertyValue::Integer(i) => serde_json::Value::String(i.to_string()),
        PropertyValue::String(s) | PropertyValue::Enumeration(s) => {
            serde_json::Value::String(s.clone())
        }
        PropertyValue::Json(json) => serde_json::Value::String(json.to_string()),
    }
}
