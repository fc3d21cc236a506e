//! Per-event processing: binding, enrichment, filtering, capture, dispatch
//!
//! The level gate runs in [`Logger`](super::logger::Logger) before anything
//! here is touched. Every extension point (enricher, filter, sink) is
//! isolated with `catch_unwind`, so a faulty component can only lose its own
//! contribution.

use super::error::Result;
use super::fields::FieldSet;
use super::level_switch::LevelSwitch;
use super::log_event::LogEvent;
use super::log_level::LogLevel;
use super::metrics::PipelineMetrics;
use super::property::{ErrorValue, Property, PropertyValue};
use super::selflog;
use crate::destructure::{Destructurer, LogArg};
use crate::enrichers::Enricher;
use crate::filters::Filter;
use crate::sinks::Sink;
use crate::template::{CaptureHint, ParsedTemplate, TemplateCache};
use chrono::{DateTime, Utc};
use std::borrow::Cow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A sink plus its optional level override
#[derive(Clone)]
pub struct SinkRegistration {
    sink: Arc<dyn Sink>,
    level: Option<Arc<LevelSwitch>>,
}

impl SinkRegistration {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink, level: None }
    }

    /// Only deliver events at or above the switch's level
    #[must_use = "builder methods return a new value"]
    pub fn with_level(mut self, level: Arc<LevelSwitch>) -> Self {
        self.level = Some(level);
        self
    }

    pub fn sink(&self) -> &Arc<dyn Sink> {
        &self.sink
    }

    fn accepts(&self, level: LogLevel) -> bool {
        self.level.as_ref().map_or(true, |switch| switch.is_enabled(level))
    }
}

/// An argument bound to a placeholder, captured only after filtering
struct PendingArg<'a> {
    name: Arc<str>,
    hint: CaptureHint,
    arg: &'a dyn LogArg,
}

struct Staged {
    property: Property,
    overwrite: bool,
}

/// Mutable event under construction, as seen by enrichers
pub struct EventBuilder<'a> {
    timestamp: DateTime<Utc>,
    level: LogLevel,
    template: &'a Arc<ParsedTemplate>,
    fields: &'a FieldSet,
    pending: Vec<PendingArg<'a>>,
    properties: Vec<Property>,
    staged: Vec<Staged>,
    destructurer: &'a Destructurer,
}

impl<'a> EventBuilder<'a> {
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn level(&self) -> LogLevel {
        self.level
    }

    pub fn template(&self) -> &ParsedTemplate {
        self.template
    }

    /// Whether a property of that name is already present
    pub fn contains(&self, name: &str) -> bool {
        self.staged.iter().any(|s| &*s.property.name == name)
            || self.properties.iter().any(|p| &*p.name == name)
            || self.pending.iter().any(|p| &*p.name == name)
            || self.fields.contains(name)
    }

    /// Add a property, replacing enricher output and shadowing fields
    ///
    /// Bound template arguments still take precedence.
    pub fn add_or_update(&mut self, property: Property) {
        self.staged.push(Staged {
            property,
            overwrite: true,
        });
    }

    /// Add a property unless one with the same name is already present
    pub fn add_if_absent(&mut self, property: Property) {
        if !self.contains(&property.name) {
            self.staged.push(Staged {
                property,
                overwrite: false,
            });
        }
    }

    /// Capture an arbitrary value with the logger's destructuring policy
    pub fn capture(&self, value: &dyn LogArg, hint: CaptureHint) -> PropertyValue {
        self.destructurer.destructure(value, hint).value
    }

    fn commit(&mut self) {
        for staged in std::mem::take(&mut self.staged) {
            upsert(&mut self.properties, staged.property, staged.overwrite);
        }
    }

    fn discard(&mut self) {
        self.staged.clear();
    }

    fn property(&self, name: &str) -> Option<Cow<'_, PropertyValue>> {
        if let Some(pending) = self.pending.iter().find(|p| &*p.name == name) {
            let captured = self.destructurer.destructure(pending.arg, pending.hint);
            return Some(Cow::Owned(captured.value));
        }
        self.properties
            .iter()
            .find(|p| &*p.name == name)
            .map(|p| Cow::Borrowed(&p.value))
            .or_else(|| self.fields.get(name).map(Cow::Borrowed))
    }
}

fn upsert(properties: &mut Vec<Property>, property: Property, overwrite: bool) {
    match properties.iter_mut().find(|p| p.name == property.name) {
        Some(existing) if overwrite => existing.value = property.value,
        Some(_) => {}
        None => properties.push(property),
    }
}

/// Read-only view of an event offered to filters
pub struct EventView<'v> {
    builder: &'v EventBuilder<'v>,
    error: Option<&'v ErrorValue>,
}

impl<'v> EventView<'v> {
    pub fn level(&self) -> LogLevel {
        self.builder.level
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.builder.timestamp
    }

    pub fn template(&self) -> &ParsedTemplate {
        self.builder.template
    }

    pub fn message_template(&self) -> &str {
        self.builder.template.text()
    }

    pub fn error(&self) -> Option<&ErrorValue> {
        self.error
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.builder.contains(name)
    }

    /// Value of a property; bound arguments are captured on demand
    pub fn property(&self, name: &str) -> Option<Cow<'_, PropertyValue>> {
        self.builder.property(name)
    }

    /// Display text of a property
    pub fn property_text(&self, name: &str) -> Option<String> {
        self.property(name).map(|value| value.to_string())
    }
}

/// Shared processing state behind every logger derived from one builder
pub struct Pipeline {
    enrichers: Vec<Arc<dyn Enricher>>,
    filters: Vec<Arc<dyn Filter>>,
    sinks: Vec<SinkRegistration>,
    destructurer: Destructurer,
    templates: Arc<TemplateCache>,
    metrics: PipelineMetrics,
    closed: AtomicBool,
}

impl Pipeline {
    pub(crate) fn new(
        enrichers: Vec<Arc<dyn Enricher>>,
        filters: Vec<Arc<dyn Filter>>,
        sinks: Vec<SinkRegistration>,
        destructurer: Destructurer,
        templates: Arc<TemplateCache>,
    ) -> Self {
        Self {
            enrichers,
            filters,
            sinks,
            destructurer,
            templates,
            metrics: PipelineMetrics::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    pub fn destructurer(&self) -> &Destructurer {
        &self.destructurer
    }

    pub fn template_cache(&self) -> &Arc<TemplateCache> {
        &self.templates
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Run one already level-checked call through the pipeline
    pub(crate) fn process(
        &self,
        level: LogLevel,
        fields: &FieldSet,
        template: &str,
        args: &[&dyn LogArg],
        error: Option<&(dyn std::error::Error + 'static)>,
    ) {
        if self.is_closed() {
            return;
        }

        let parsed = self.templates.parse(template);
        let mut builder = EventBuilder {
            timestamp: Utc::now(),
            level,
            template: &parsed,
            fields,
            pending: bind(&parsed, args),
            properties: Vec::new(),
            staged: Vec::new(),
            destructurer: &self.destructurer,
        };

        self.enrich(&mut builder);

        let error = error.map(ErrorValue::from_error);
        if !self.accept(&builder, error.as_ref()) {
            self.metrics.record_filtered();
            return;
        }

        let mut truncated = false;
        for pending in std::mem::take(&mut builder.pending) {
            let captured = self.destructurer.destructure(pending.arg, pending.hint);
            truncated |= captured.truncated;
            upsert(
                &mut builder.properties,
                Property {
                    name: pending.name,
                    value: captured.value,
                },
                true,
            );
        }
        if truncated {
            self.metrics.record_truncated();
        }

        let event = Arc::new(LogEvent::from_parts(
            builder.timestamp,
            level,
            Arc::clone(&parsed),
            fields.clone(),
            builder.properties,
            error,
            truncated,
        ));
        self.dispatch(&event);
    }

    fn enrich(&self, builder: &mut EventBuilder<'_>) {
        for enricher in &self.enrichers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| enricher.enrich(builder)));
            match result {
                Ok(()) => builder.commit(),
                Err(payload) => {
                    builder.discard();
                    self.metrics.record_enricher_panic();
                    selflog::report(
                        "pipeline",
                        format_args!(
                            "enricher panicked: {}",
                            selflog::panic_message(payload.as_ref())
                        ),
                    );
                }
            }
        }
    }

    fn accept(&self, builder: &EventBuilder<'_>, error: Option<&ErrorValue>) -> bool {
        if self.filters.is_empty() {
            return true;
        }
        let view = EventView { builder, error };
        for filter in &self.filters {
            match panic::catch_unwind(AssertUnwindSafe(|| filter.is_enabled(&view))) {
                Ok(true) => {}
                Ok(false) => return false,
                Err(payload) => {
                    self.metrics.record_filter_panic();
                    selflog::report(
                        "pipeline",
                        format_args!(
                            "filter panicked, event accepted: {}",
                            selflog::panic_message(payload.as_ref())
                        ),
                    );
                }
            }
        }
        true
    }

    /// Deliver `event` to every sink whose level accepts it
    pub fn dispatch(&self, event: &Arc<LogEvent>) {
        self.metrics.record_emitted();
        for (idx, registration) in self.sinks.iter().enumerate() {
            if !registration.accepts(event.level()) {
                continue;
            }

            let sink = &registration.sink;
            match panic::catch_unwind(AssertUnwindSafe(|| sink.emit(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.metrics.record_sink_failure();
                    selflog::report(
                        "pipeline",
                        format_args!("sink #{} ({}) failed: {}", idx, sink.name(), e),
                    );
                }
                Err(payload) => {
                    self.metrics.record_sink_panic();
                    selflog::report(
                        "pipeline",
                        format_args!(
                            "sink #{} ({}) panicked: {}. Other sinks continue to function.",
                            idx,
                            sink.name(),
                            selflog::panic_message(payload.as_ref())
                        ),
                    );
                }
            }
        }
    }

    /// Flush every sink, returning the first error
    pub fn flush(&self) -> Result<()> {
        let mut first_error = None;
        for registration in &self.sinks {
            if let Err(e) = registration.sink.flush() {
                selflog::report(
                    "pipeline",
                    format_args!("flush of {} failed: {}", registration.sink.name(), e),
                );
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Close every sink once, sharing `deadline` between them
    ///
    /// Later calls return `Ok(())` without touching the sinks.
    pub fn close(&self, deadline: Duration) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let until = Instant::now() + deadline;
        let mut first_error = None;
        for registration in &self.sinks {
            let remaining = until.saturating_duration_since(Instant::now());
            let sink = &registration.sink;
            let result = panic::catch_unwind(AssertUnwindSafe(|| sink.close(remaining)));
            let error = match result {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(payload) => super::error::LoggerError::sink(
                    sink.name(),
                    format!("panicked during close: {}", selflog::panic_message(payload.as_ref())),
                ),
            };
            selflog::report(
                "pipeline",
                format_args!("close of {} failed: {}", sink.name(), error),
            );
            first_error.get_or_insert(error);
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        let _ = self.close(super::logger::DEFAULT_SHUTDOWN_TIMEOUT);
    }
}

/// Bind call arguments to the template's placeholders
///
/// All-positional templates bind `{n}` to `args[n]`. Otherwise distinct
/// names take arguments left to right in first-occurrence order.
fn bind<'a>(template: &ParsedTemplate, args: &[&'a dyn LogArg]) -> Vec<PendingArg<'a>> {
    let names = template.property_names();
    let mut pending: Vec<PendingArg<'a>> = Vec::with_capacity(names.len().min(args.len()));

    if template.is_all_positional() {
        for token in template.properties() {
            if pending.iter().any(|p| p.name == token.name) {
                continue;
            }
            if let Some(arg) = token.index.and_then(|i| args.get(i)) {
                pending.push(PendingArg {
                    name: Arc::clone(&token.name),
                    hint: token.hint,
                    arg: *arg,
                });
            }
        }
    } else {
        let mut next = 0;
        for token in template.properties() {
            if next >= args.len() {
                break;
            }
            if pending.iter().any(|p| p.name == token.name) {
                continue;
            }
            pending.push(PendingArg {
                name: Arc::clone(&token.name),
                hint: token.hint,
                arg: args[next],
            });
            next += 1;
        }
    }

    if args.len() > names.len() && selflog::is_enabled() {
        selflog::report(
            "pipeline",
            format_args!(
                "{} arguments supplied for {} placeholders in \"{}\"; extras ignored",
                args.len(),
                names.len(),
                template.text()
            ),
        );
    }
    pending
}
