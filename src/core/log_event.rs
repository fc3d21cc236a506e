//! Immutable events produced by the pipeline

use super::fields::FieldSet;
use super::log_level::LogLevel;
use super::property::{ErrorValue, Property, PropertyValue};
use crate::template::{ParsedTemplate, TemplateCache};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::Arc;

/// A fully captured log event
///
/// Holds the emitting logger's field set by reference plus the event's own
/// properties (enricher output and bound arguments). Own properties shadow
/// fields of the same name, so every name appears once in
/// [`properties`](LogEvent::properties).
#[derive(Debug, Clone)]
pub struct LogEvent {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    template: Arc<ParsedTemplate>,
    fields: FieldSet,
    properties: Vec<Property>,
    error: Option<ErrorValue>,
    truncated: bool,
}

impl LogEvent {
    /// Build an event from already captured properties
    ///
    /// Later properties replace earlier ones with the same name.
    pub fn new(
        timestamp: DateTime<Utc>,
        level: LogLevel,
        template: Arc<ParsedTemplate>,
        properties: Vec<Property>,
    ) -> Self {
        let mut unique: Vec<Property> = Vec::with_capacity(properties.len());
        for property in properties {
            match unique.iter_mut().find(|p| p.name == property.name) {
                Some(existing) => existing.value = property.value,
                None => unique.push(property),
            }
        }
        let truncated = unique.iter().any(|p| p.value.is_truncated());
        Self {
            timestamp,
            level,
            template,
            fields: FieldSet::new(),
            properties: unique,
            error: None,
            truncated,
        }
    }

    pub(crate) fn from_parts(
        timestamp: DateTime<Utc>,
        level: LogLevel,
        template: Arc<ParsedTemplate>,
        fields: FieldSet,
        properties: Vec<Property>,
        error: Option<ErrorValue>,
        truncated: bool,
    ) -> Self {
        Self {
            timestamp,
            level,
            template,
            fields,
            properties,
            error,
            truncated,
        }
    }

    #[must_use]
    pub fn with_error(mut self, error: ErrorValue) -> Self {
        self.error = Some(error);
        self
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn template(&self) -> &Arc<ParsedTemplate> {
        &self.template
    }

    /// The raw template text
    pub fn message_template(&self) -> &str {
        self.template.text()
    }

    pub fn error(&self) -> Option<&ErrorValue> {
        self.error.as_ref()
    }

    /// Whether any property lost data to a destructuring bound
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Merged properties: unshadowed logger fields first, then the event's own
    pub fn properties(&self) -> impl Iterator<Item = &Property> + '_ {
        self.fields
            .iter()
            .filter(move |field| !self.properties.iter().any(|p| p.name == field.name))
            .chain(self.properties.iter())
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        self.properties
            .iter()
            .find(|p| &*p.name == name)
            .map(|p| &p.value)
            .or_else(|| self.fields.get(name))
    }

    pub fn property_count(&self) -> usize {
        self.properties().count()
    }

    /// Render the template against this event's properties
    pub fn render_message(&self) -> String {
        self.template.render(|name| self.property(name))
    }
}

#[derive(Serialize)]
struct EventRecordRef<'a> {
    timestamp: &'a DateTime<Utc>,
    level: LogLevel,
    message_template: &'a str,
    properties: Vec<&'a Property>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<&'a ErrorValue>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    truncated: bool,
}

#[derive(Deserialize)]
struct EventRecord {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    message_template: String,
    properties: Vec<Property>,
    #[serde(default)]
    error: Option<ErrorValue>,
    #[serde(default)]
    truncated: bool,
}

impl Serialize for LogEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        EventRecordRef {
            timestamp: &self.timestamp,
            level: self.level,
            message_template: self.template.text(),
            properties: self.properties().collect(),
            error: self.error.as_ref(),
            truncated: self.truncated,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for LogEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let record = EventRecord::deserialize(deserializer)?;
        Ok(LogEvent {
            timestamp: record.timestamp,
            level: record.level,
            template: TemplateCache::global().parse(&record.message_template),
            fields: FieldSet::new(),
            properties: record.properties,
            error: record.error,
            truncated: record.truncated,
        })
    }
}
