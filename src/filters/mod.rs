//! Filters decide whether an event is dispatched
//!
//! Filters run after enrichment, in registration order; the first filter
//! returning `false` drops the event. Stateful filters (rate limiting,
//! sampling) keep their counters per key, where the key is taken from the
//! event according to a [`FilterKey`]. [`AllFilter`], [`AnyFilter`] and
//! [`NotFilter`] combine filters.

pub mod adaptive;
pub mod composite;
pub mod rate_limit;
pub mod sampling;

pub use adaptive::{AdaptiveConfig, AdaptiveSamplingFilter, AdaptiveStats, DampeningPreset};
pub use composite::{AllFilter, AnyFilter, NotFilter};
pub use rate_limit::{RateLimitFilter, RateLimitKey, DEFAULT_MAX_KEYS};
pub use sampling::{SamplerMetrics, SamplingFilter, SamplingMode};

use crate::core::log_level::LogLevel;
use crate::core::pipeline::EventView;
use crate::core::property::PropertyValue;
use std::borrow::Cow;
use std::sync::Arc;

/// Accepts or rejects events
pub trait Filter: Send + Sync {
    fn is_enabled(&self, event: &EventView<'_>) -> bool;
}

impl<T: Filter + ?Sized> Filter for Arc<T> {
    fn is_enabled(&self, event: &EventView<'_>) -> bool {
        (**self).is_enabled(event)
    }
}

/// How stateful filters group events
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum FilterKey {
    /// The raw template text
    #[default]
    Template,
    /// Template text plus level
    TemplateAndLevel,
    /// The display text of a property; events without it share one key
    Property(String),
}

impl FilterKey {
    pub(crate) fn extract<'e>(&self, event: &'e EventView<'_>) -> Cow<'e, str> {
        match self {
            FilterKey::Template => Cow::Borrowed(event.message_template()),
            FilterKey::TemplateAndLevel => {
                Cow::Owned(format!("{}|{}", event.level(), event.message_template()))
            }
            FilterKey::Property(name) => {
                Cow::Owned(event.property_text(name).unwrap_or_default())
            }
        }
    }
}

/// Rejects events below a minimum level
#[derive(Debug, Clone, Copy)]
pub struct LevelFilter {
    min_level: LogLevel,
}

impl LevelFilter {
    pub fn new(min_level: LogLevel) -> Self {
        Self { min_level }
    }
}

impl Filter for LevelFilter {
    fn is_enabled(&self, event: &EventView<'_>) -> bool {
        event.level() >= self.min_level
    }
}

/// Filter backed by a closure
///
/// # Example
///
/// ```
/// use rust_structured_logger::prelude::*;
/// use std::sync::Arc;
///
/// let memory = Arc::new(MemorySink::new());
/// let logger = Logger::builder()
///     .filter(PredicateFilter::by_excluding(|e: &EventView<'_>| {
///         e.property_text("Path").as_deref() == Some("/health")
///     }))
///     .shared_sink(memory.clone())
///     .build();
///
/// logger.info("GET {Path}", &[&"/health"]);
/// logger.info("GET {Path}", &[&"/orders"]);
/// assert_eq!(memory.len(), 1);
/// ```
pub struct PredicateFilter<F> {
    predicate: F,
    include: bool,
}

impl<F> PredicateFilter<F>
where
    F: Fn(&EventView<'_>) -> bool + Send + Sync,
{
    /// Keep only events matching `predicate`
    pub fn by_including(predicate: F) -> Self {
        Self {
            predicate,
            include: true,
        }
    }

    /// Drop events matching `predicate`
    pub fn by_excluding(predicate: F) -> Self {
        Self {
            predicate,
            include: false,
        }
    }
}

impl<F> Filter for PredicateFilter<F>
where
    F: Fn(&EventView<'_>) -> bool + Send + Sync,
{
    fn is_enabled(&self, event: &EventView<'_>) -> bool {
        (self.predicate)(event) == self.include
    }
}

/// Keeps events by a property's presence or value
#[derive(Debug, Clone)]
pub struct PropertyFilter {
    name: String,
    expected: Option<PropertyValue>,
}

impl PropertyFilter {
    /// Keep events carrying `name`
    pub fn exists(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            expected: None,
        }
    }

    /// Keep events whose `name` equals `value`
    pub fn equals(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            name: name.into(),
            expected: Some(value.into()),
        }
    }
}

impl Filter for PropertyFilter {
    fn is_enabled(&self, event: &EventView<'_>) -> bool {
        match &self.expected {
            None => event.has_property(&self.name),
            Some(expected) => event
                .property(&self.name)
                .is_some_and(|actual| actual.as_ref() == expected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logger::Logger;
    use crate::sinks::MemorySink;

    fn run<F: Filter + 'static>(filter: F, emit: impl Fn(&Logger)) -> usize {
        let memory = Arc::new(MemorySink::new());
        let logger = Logger::builder()
            .min_level(LogLevel::Trace)
            .filter(filter)
            .shared_sink(memory.clone())
            .build();
        emit(&logger);
        memory.len()
    }

    #[test]
    fn test_level_filter() {
        let count = run(LevelFilter::new(LogLevel::Warn), |logger| {
            logger.debug("d", &[]);
            logger.warn("w", &[]);
            logger.error("e", &[]);
        });
        assert_eq!(count, 2);
    }

    #[test]
    fn test_predicate_including() {
        let filter = PredicateFilter::by_including(|e: &EventView<'_>| {
            e.message_template().starts_with("keep")
        });
        let count = run(filter, |logger| {
            logger.info("keep me", &[]);
            logger.info("drop me", &[]);
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_property_filter_sees_arguments_and_fields() {
        let count = run(PropertyFilter::equals("Tenant", "acme"), |logger| {
            logger.info("{Tenant}", &[&"acme"]);
            logger.info("{Tenant}", &[&"globex"]);
            logger.with("Tenant", &"acme").info("from field", &[]);
        });
        assert_eq!(count, 2);

        let count = run(PropertyFilter::exists("UserId"), |logger| {
            logger.info("{UserId}", &[&1]);
            logger.info("anonymous", &[]);
        });
        assert_eq!(count, 1);
    }

    #[test]
    fn test_panicking_filter_fails_open() {
        let filter = PredicateFilter::by_including(|_: &EventView<'_>| -> bool {
            panic!("filter bug")
        });
        let count = run(filter, |logger| logger.info("still delivered", &[]));
        assert_eq!(count, 1);
    }
}
