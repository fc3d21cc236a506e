//! Property model for captured values
//!
//! Every argument and field ends up as a [`PropertyValue`]: a tree of
//! scalars, sequences, mappings and named structures. Trees are bounded by
//! the destructuring policy, so they never contain cycles; containers that
//! hit a bound keep a count of the children they omitted.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Leaf value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Scalar {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Char(char),
    Str(String),
    Timestamp(DateTime<Utc>),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::I64(v) => Some(*v as f64),
            Scalar::U64(v) => Some(*v as f64),
            Scalar::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Scalar::I64(_) | Scalar::U64(_) | Scalar::F64(_))
    }

    fn write_plain(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        match self {
            Scalar::Null => f.write_str("null"),
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::I64(v) => write!(f, "{}", v),
            Scalar::U64(v) => write!(f, "{}", v),
            Scalar::F64(v) => write!(f, "{}", v),
            Scalar::Char(c) => f.write_char(*c),
            Scalar::Str(s) => f.write_str(s),
            Scalar::Timestamp(t) => f.write_str(&t.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
        }
    }

    fn write_nested(&self, f: &mut dyn fmt::Write) -> fmt::Result {
        match self {
            Scalar::Str(s) => write!(f, "{:?}", s),
            Scalar::Char(c) => write!(f, "{:?}", c),
            other => other.write_plain(f),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value;
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::I64(v) => Value::Number((*v).into()),
            Scalar::U64(v) => Value::Number((*v).into()),
            Scalar::F64(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Scalar::Char(c) => Value::String(c.to_string()),
            Scalar::Str(s) => Value::String(s.clone()),
            Scalar::Timestamp(t) => {
                Value::String(t.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

/// Error details attached to an event or captured as a value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorValue {
    pub message: String,
    /// Messages of the `source()` chain, outermost first
    pub chain: Vec<String>,
}

impl ErrorValue {
    pub fn from_error(err: &dyn std::error::Error) -> Self {
        let mut chain = Vec::new();
        let mut source = err.source();
        while let Some(cause) = source {
            chain.push(cause.to_string());
            source = cause.source();
        }
        Self {
            message: err.to_string(),
            chain,
        }
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)?;
        for cause in &self.chain {
            write!(f, ": {}", cause)?;
        }
        Ok(())
    }
}

/// Captured value tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PropertyValue {
    Scalar(Scalar),
    Sequence {
        items: Vec<PropertyValue>,
        /// Elements omitted by the fan-out or depth bound
        truncated: u64,
    },
    Mapping {
        entries: Vec<(String, PropertyValue)>,
        truncated: u64,
    },
    Structure {
        type_tag: Option<String>,
        fields: Vec<Property>,
        truncated: u64,
    },
    Error(ErrorValue),
}

impl PropertyValue {
    pub const fn null() -> Self {
        PropertyValue::Scalar(Scalar::Null)
    }

    pub fn str(value: impl Into<String>) -> Self {
        PropertyValue::Scalar(Scalar::Str(value.into()))
    }

    pub fn as_scalar(&self) -> Option<&Scalar> {
        match self {
            PropertyValue::Scalar(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        self.as_scalar().and_then(Scalar::as_str)
    }

    /// Look up a field of a structure by name
    pub fn field(&self, name: &str) -> Option<&PropertyValue> {
        match self {
            PropertyValue::Structure { fields, .. } => fields
                .iter()
                .find(|p| &*p.name == name)
                .map(|p| &p.value),
            PropertyValue::Mapping { entries, .. } => entries
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v),
            _ => None,
        }
    }

    /// Whether this value or any descendant lost children to a bound
    pub fn is_truncated(&self) -> bool {
        match self {
            PropertyValue::Scalar(_) | PropertyValue::Error(_) => false,
            PropertyValue::Sequence { items, truncated } => {
                *truncated > 0 || items.iter().any(PropertyValue::is_truncated)
            }
            PropertyValue::Mapping { entries, truncated } => {
                *truncated > 0 || entries.iter().any(|(_, v)| v.is_truncated())
            }
            PropertyValue::Structure {
                fields, truncated, ..
            } => *truncated > 0 || fields.iter().any(|p| p.value.is_truncated()),
        }
    }

    /// Natural JSON shape (structures carry their tag as `$type`)
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::{Map, Value};
        match self {
            PropertyValue::Scalar(s) => s.to_json(),
            PropertyValue::Sequence { items, truncated } => {
                let mut out: Vec<Value> = items.iter().map(PropertyValue::to_json).collect();
                if *truncated > 0 {
                    out.push(Value::String(format!("... ({} more)", truncated)));
                }
                Value::Array(out)
            }
            PropertyValue::Mapping { entries, truncated } => {
                let mut out = Map::new();
                for (k, v) in entries {
                    out.insert(k.clone(), v.to_json());
                }
                if *truncated > 0 {
                    out.insert("$truncated".to_string(), Value::Number((*truncated).into()));
                }
                Value::Object(out)
            }
            PropertyValue::Structure {
                type_tag,
                fields,
                truncated,
            } => {
                let mut out = Map::new();
                if let Some(tag) = type_tag {
                    out.insert("$type".to_string(), Value::String(tag.clone()));
                }
                for field in fields {
                    out.insert(field.name.to_string(), field.value.to_json());
                }
                if *truncated > 0 {
                    out.insert("$truncated".to_string(), Value::Number((*truncated).into()));
                }
                Value::Object(out)
            }
            PropertyValue::Error(e) => {
                let mut out = Map::new();
                out.insert("message".to_string(), Value::String(e.message.clone()));
                if !e.chain.is_empty() {
                    out.insert(
                        "chain".to_string(),
                        Value::Array(e.chain.iter().cloned().map(Value::String).collect()),
                    );
                }
                Value::Object(out)
            }
        }
    }

    fn write_value(&self, f: &mut dyn fmt::Write, nested: bool) -> fmt::Result {
        match self {
            PropertyValue::Scalar(s) if nested => s.write_nested(f),
            PropertyValue::Scalar(s) => s.write_plain(f),
            PropertyValue::Sequence { items, truncated } => {
                f.write_char('[')?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    item.write_value(f, true)?;
                }
                write_truncation(f, *truncated, !items.is_empty())?;
                f.write_char(']')
            }
            PropertyValue::Mapping { entries, truncated } => {
                f.write_char('{')?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{:?}: ", k)?;
                    v.write_value(f, true)?;
                }
                write_truncation(f, *truncated, !entries.is_empty())?;
                f.write_char('}')
            }
            PropertyValue::Structure {
                type_tag,
                fields,
                truncated,
            } => {
                if let Some(tag) = type_tag {
                    write!(f, "{} ", tag)?;
                }
                f.write_str("{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: ", field.name)?;
                    field.value.write_value(f, true)?;
                }
                write_truncation(f, *truncated, !fields.is_empty())?;
                f.write_str(" }")
            }
            PropertyValue::Error(e) => write!(f, "{}", e),
        }
    }
}

fn write_truncation(f: &mut dyn fmt::Write, truncated: u64, has_items: bool) -> fmt::Result {
    if truncated == 0 {
        return Ok(());
    }
    if has_items {
        f.write_str(", ")?;
    }
    write!(f, "... ({} more)", truncated)
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_value(f, false)
    }
}

impl From<Scalar> for PropertyValue {
    fn from(s: Scalar) -> Self {
        PropertyValue::Scalar(s)
    }
}

impl From<&str> for PropertyValue {
    fn from(s: &str) -> Self {
        PropertyValue::str(s)
    }
}

impl From<String> for PropertyValue {
    fn from(s: String) -> Self {
        PropertyValue::str(s)
    }
}

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Scalar(Scalar::I64(v))
    }
}

impl From<u64> for PropertyValue {
    fn from(v: u64) -> Self {
        PropertyValue::Scalar(Scalar::U64(v))
    }
}

impl From<f64> for PropertyValue {
    fn from(v: f64) -> Self {
        PropertyValue::Scalar(Scalar::F64(v))
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Scalar(Scalar::Bool(v))
    }
}

impl From<DateTime<Utc>> for PropertyValue {
    fn from(t: DateTime<Utc>) -> Self {
        PropertyValue::Scalar(Scalar::Timestamp(t))
    }
}

/// Named value attached to an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: Arc<str>,
    pub value: PropertyValue,
}

impl Property {
    pub fn new(name: impl Into<Arc<str>>, value: impl Into<PropertyValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}
