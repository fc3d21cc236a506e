//! Built-in enrichers

use super::Enricher;
use crate::core::pipeline::EventBuilder;
use crate::core::property::{Property, PropertyValue};
use std::sync::{Arc, OnceLock};

thread_local! {
    static THREAD_ID: u64 = current_thread_id();
    static THREAD_NAME: Option<Arc<str>> = std::thread::current().name().map(Arc::from);
}

/// `ThreadId(7)` -> 7
fn current_thread_id() -> u64 {
    let debug = format!("{:?}", std::thread::current().id());
    debug
        .trim_start_matches("ThreadId(")
        .trim_end_matches(')')
        .parse()
        .unwrap_or(0)
}

/// Adds a fixed property to every event, replacing earlier values
#[derive(Debug, Clone)]
pub struct PropertyEnricher {
    property: Property,
}

impl PropertyEnricher {
    pub fn new(name: impl Into<Arc<str>>, value: impl Into<PropertyValue>) -> Self {
        Self {
            property: Property::new(name, value),
        }
    }
}

impl Enricher for PropertyEnricher {
    fn enrich(&self, event: &mut EventBuilder<'_>) {
        event.add_or_update(self.property.clone());
    }
}

/// Adds `ThreadId` and, for named threads, `ThreadName`
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadEnricher;

impl ThreadEnricher {
    pub fn new() -> Self {
        Self
    }
}

impl Enricher for ThreadEnricher {
    fn enrich(&self, event: &mut EventBuilder<'_>) {
        let id = THREAD_ID.with(|id| *id);
        event.add_if_absent(Property::new("ThreadId", id));
        if let Some(name) = THREAD_NAME.with(|name| name.clone()) {
            event.add_if_absent(Property::new("ThreadName", &*name));
        }
    }
}

/// Adds `ProcessId` and `ProcessName`
#[derive(Debug, Clone)]
pub struct ProcessEnricher {
    id: u64,
    name: Option<String>,
}

impl ProcessEnricher {
    pub fn new() -> Self {
        let name = std::env::current_exe()
            .ok()
            .and_then(|path| path.file_stem().map(|s| s.to_string_lossy().into_owned()));
        Self {
            id: u64::from(std::process::id()),
            name,
        }
    }
}

impl Default for ProcessEnricher {
    fn default() -> Self {
        Self::new()
    }
}

impl Enricher for ProcessEnricher {
    fn enrich(&self, event: &mut EventBuilder<'_>) {
        event.add_if_absent(Property::new("ProcessId", self.id));
        if let Some(name) = &self.name {
            event.add_if_absent(Property::new("ProcessName", name.as_str()));
        }
    }
}

static MACHINE_NAME: OnceLock<String> = OnceLock::new();

fn machine_name() -> &'static str {
    MACHINE_NAME.get_or_init(|| {
        ["HOSTNAME", "COMPUTERNAME"]
            .iter()
            .filter_map(|var| std::env::var(var).ok())
            .chain(std::fs::read_to_string("/etc/hostname").ok())
            .map(|name| name.trim().to_string())
            .find(|name| !name.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    })
}

/// Adds `MachineName`, resolved once per process
#[derive(Debug, Clone, Copy, Default)]
pub struct MachineNameEnricher;

impl MachineNameEnricher {
    pub fn new() -> Self {
        Self
    }
}

impl Enricher for MachineNameEnricher {
    fn enrich(&self, event: &mut EventBuilder<'_>) {
        event.add_if_absent(Property::new("MachineName", machine_name()));
    }
}

/// Copies an environment variable into a property
///
/// The variable is read on first use and cached. Unset variables add
/// nothing.
#[derive(Debug)]
pub struct EnvironmentEnricher {
    variable: String,
    property: Arc<str>,
    value: OnceLock<Option<String>>,
}

impl EnvironmentEnricher {
    pub fn new(variable: impl Into<String>, property: impl Into<Arc<str>>) -> Self {
        Self {
            variable: variable.into(),
            property: property.into(),
            value: OnceLock::new(),
        }
    }
}

impl Enricher for EnvironmentEnricher {
    fn enrich(&self, event: &mut EventBuilder<'_>) {
        let value = self
            .value
            .get_or_init(|| std::env::var(&self.variable).ok());
        if let Some(value) = value {
            event.add_if_absent(Property::new(Arc::clone(&self.property), value.as_str()));
        }
    }
}

/// Wraps a closure as an enricher
///
/// # Example
///
/// ```
/// use rust_structured_logger::prelude::*;
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::sync::Arc;
///
/// let counter = AtomicU64::new(0);
/// let memory = Arc::new(MemorySink::new());
/// let logger = Logger::builder()
///     .enrich(CallbackEnricher::new(move |event: &mut EventBuilder<'_>| {
///         let n = counter.fetch_add(1, Ordering::Relaxed);
///         event.add_or_update(Property::new("Sequence", n));
///     }))
///     .shared_sink(memory.clone())
///     .build();
///
/// logger.info("first", &[]);
/// logger.info("second", &[]);
/// assert_eq!(memory.events()[1].property("Sequence"), Some(&PropertyValue::from(1u64)));
/// ```
pub struct CallbackEnricher<F> {
    callback: F,
}

impl<F> CallbackEnricher<F>
where
    F: Fn(&mut EventBuilder<'_>) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> Enricher for CallbackEnricher<F>
where
    F: Fn(&mut EventBuilder<'_>) + Send + Sync,
{
    fn enrich(&self, event: &mut EventBuilder<'_>) {
        (self.callback)(event);
    }
}
