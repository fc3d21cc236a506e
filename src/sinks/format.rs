//! Line formats for text-oriented sinks
//!
//! - Text: `[2025-01-08T10:30:45.123Z] [INFO ] Request processed Path=/orders`
//! - Json: one object per line, properties inlined next to the reserved keys
//! - Logfmt: `timestamp=... level=INFO message="Request processed" Path=/orders`

use crate::core::log_event::LogEvent;
use crate::core::property::{PropertyValue, Scalar};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt::Write;

/// Timestamp rendering
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimestampFormat {
    /// `2025-01-08T10:30:45.123Z`
    #[default]
    Iso8601,
    /// `2025-01-08T10:30:45.123456Z`
    Iso8601Micros,
    /// `2025-01-08T10:30:45.123456+00:00`
    Rfc3339,
    /// Seconds since the epoch
    Unix,
    UnixMillis,
    UnixMicros,
    /// Any strftime pattern
    Custom(String),
}

impl TimestampFormat {
    #[must_use]
    pub fn format(&self, datetime: &DateTime<Utc>) -> String {
        match self {
            TimestampFormat::Iso8601 => datetime.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            TimestampFormat::Iso8601Micros => datetime.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            TimestampFormat::Rfc3339 => datetime.to_rfc3339(),
            TimestampFormat::Unix => datetime.timestamp().to_string(),
            TimestampFormat::UnixMillis => datetime.timestamp_millis().to_string(),
            TimestampFormat::UnixMicros => datetime.timestamp_micros().to_string(),
            TimestampFormat::Custom(pattern) => datetime.format(pattern).to_string(),
        }
    }

    /// Whether the output is a bare integer
    #[must_use]
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            TimestampFormat::Unix | TimestampFormat::UnixMillis | TimestampFormat::UnixMicros
        )
    }

    fn to_json(&self, datetime: &DateTime<Utc>) -> Value {
        match self {
            TimestampFormat::Unix => Value::from(datetime.timestamp()),
            TimestampFormat::UnixMillis => Value::from(datetime.timestamp_millis()),
            TimestampFormat::UnixMicros => Value::from(datetime.timestamp_micros()),
            _ => Value::String(self.format(datetime)),
        }
    }
}

/// Line format for an event
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
    Logfmt,
}

impl OutputFormat {
    pub fn format(&self, event: &LogEvent, timestamp_format: &TimestampFormat) -> String {
        match self {
            OutputFormat::Text => format_text(event, timestamp_format, event.level().to_str()),
            OutputFormat::Json => format_json(event, timestamp_format),
            OutputFormat::Logfmt => format_logfmt(event, timestamp_format),
        }
    }
}

/// Text line with a caller-supplied (possibly colored) level label
///
/// Properties already rendered into the message are not repeated.
pub(crate) fn format_text(
    event: &LogEvent,
    timestamp_format: &TimestampFormat,
    level: &str,
) -> String {
    let mut line = format!(
        "[{}] [{:5}] {}",
        timestamp_format.format(&event.timestamp()),
        level,
        event.render_message()
    );

    let template = event.template();
    for property in event.properties() {
        if template.property_names().iter().any(|n| *n == property.name) {
            continue;
        }
        let _ = write!(line, " {}={}", property.name, property.value);
    }
    if let Some(error) = event.error() {
        let _ = write!(line, "\n  {}", error.message);
        for cause in &error.chain {
            let _ = write!(line, "\n  caused by: {}", cause);
        }
    }
    line
}

fn format_json(event: &LogEvent, timestamp_format: &TimestampFormat) -> String {
    let mut object = Map::new();
    object.insert(
        "timestamp".to_string(),
        timestamp_format.to_json(&event.timestamp()),
    );
    object.insert("level".to_string(), Value::from(event.level().to_str()));
    object.insert("message".to_string(), Value::String(event.render_message()));
    object.insert(
        "message_template".to_string(),
        Value::from(event.message_template()),
    );
    for property in event.properties() {
        object
            .entry(property.name.to_string())
            .or_insert_with(|| property.value.to_json());
    }
    if let Some(error) = event.error() {
        object.insert(
            "error".to_string(),
            PropertyValue::Error(error.clone()).to_json(),
        );
    }
    if event.is_truncated() {
        object.insert("truncated".to_string(), Value::Bool(true));
    }
    Value::Object(object).to_string()
}

fn format_logfmt(event: &LogEvent, timestamp_format: &TimestampFormat) -> String {
    let mut parts = vec![
        format!(
            "timestamp={}",
            escape_value(&timestamp_format.format(&event.timestamp()))
        ),
        format!("level={}", event.level().to_str()),
        format!("message={}", quote_value(&event.render_message())),
    ];

    for property in event.properties() {
        let value = match &property.value {
            PropertyValue::Scalar(Scalar::Str(s)) => quote_value(s),
            PropertyValue::Scalar(scalar) if scalar.is_numeric() => property.value.to_string(),
            other => escape_value(&other.to_string()),
        };
        parts.push(format!("{}={}", escape_key(&property.name), value));
    }
    if let Some(error) = event.error() {
        parts.push(format!("error={}", quote_value(&error.message)));
    }
    parts.join(" ")
}

fn escape_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-' || *c == '.')
        .collect()
}

/// Quote when the value has spaces, quotes or `=`
fn escape_value(value: &str) -> String {
    if value.is_empty() || value.contains([' ', '"', '=']) {
        quote_value(value)
    } else {
        value.to_string()
    }
}

fn quote_value(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}
