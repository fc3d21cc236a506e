//! Logger handles and their builder

use super::{
    error::Result,
    fields::{self, FieldSet},
    level_switch::LevelSwitch,
    log_level::LogLevel,
    metrics::PipelineMetrics,
    pipeline::{Pipeline, SinkRegistration},
    property::Property,
    selflog,
};
use crate::destructure::{CapabilityCache, Destructurer, DestructuringPolicy, LogArg};
use crate::enrichers::Enricher;
use crate::filters::Filter;
use crate::sinks::Sink;
use crate::template::{CaptureHint, TemplateCache};
use std::error::Error;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default shutdown timeout for closing sinks (5 seconds)
///
/// Used when the last logger of a pipeline is dropped without an explicit
/// [`Logger::close`].
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Property set by [`Logger::for_source_context`]
pub const SOURCE_CONTEXT: &str = "SourceContext";

/// Immutable, cheaply cloneable logging handle
///
/// Derived loggers ([`with`](Logger::with), [`for_context`](Logger::for_context))
/// share the pipeline and level switch of their parent and carry their own
/// field set. Deriving never changes the receiver.
///
/// # Example
///
/// ```
/// use rust_structured_logger::prelude::*;
/// use std::sync::Arc;
///
/// let memory = Arc::new(MemorySink::new());
/// let logger = Logger::builder()
///     .min_level(LogLevel::Debug)
///     .shared_sink(memory.clone())
///     .build();
///
/// let request_logger = logger.with("RequestId", &"r-17");
/// request_logger.info("Handled {Path} in {Elapsed} ms", &[&"/health", &3]);
///
/// let event = &memory.events()[0];
/// assert_eq!(event.render_message(), "Handled /health in 3 ms");
/// assert_eq!(event.property("RequestId").and_then(|v| v.as_str()), Some("r-17"));
/// ```
#[derive(Clone)]
pub struct Logger {
    pipeline: Arc<Pipeline>,
    level: Arc<LevelSwitch>,
    fields: FieldSet,
}

impl Logger {
    #[must_use]
    pub fn builder() -> LoggerBuilder {
        LoggerBuilder::new()
    }

    /// Whether an event at `level` would pass the minimum level
    #[inline]
    pub fn is_enabled(&self, level: LogLevel) -> bool {
        self.level.is_enabled(level)
    }

    pub fn level_switch(&self) -> &Arc<LevelSwitch> {
        &self.level
    }

    /// Change the minimum level of every logger sharing this switch
    pub fn set_min_level(&self, level: LogLevel) {
        self.level.set_level(level);
    }

    pub fn min_level(&self) -> LogLevel {
        self.level.level()
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        self.pipeline.metrics()
    }

    /// Log `template` with `args` bound to its placeholders
    pub fn write(&self, level: LogLevel, template: &str, args: &[&dyn LogArg]) {
        if !self.level.is_enabled(level) {
            return;
        }
        self.pipeline
            .process(level, &self.fields, template, args, None);
    }

    /// Log with an attached error and its source chain
    pub fn write_error(
        &self,
        level: LogLevel,
        error: &(dyn Error + 'static),
        template: &str,
        args: &[&dyn LogArg],
    ) {
        if !self.level.is_enabled(level) {
            return;
        }
        self.pipeline
            .process(level, &self.fields, template, args, Some(error));
    }

    pub fn trace(&self, template: &str, args: &[&dyn LogArg]) {
        self.write(LogLevel::Trace, template, args);
    }

    pub fn debug(&self, template: &str, args: &[&dyn LogArg]) {
        self.write(LogLevel::Debug, template, args);
    }

    pub fn info(&self, template: &str, args: &[&dyn LogArg]) {
        self.write(LogLevel::Info, template, args);
    }

    pub fn warn(&self, template: &str, args: &[&dyn LogArg]) {
        self.write(LogLevel::Warn, template, args);
    }

    pub fn error(&self, template: &str, args: &[&dyn LogArg]) {
        self.write(LogLevel::Error, template, args);
    }

    pub fn fatal(&self, template: &str, args: &[&dyn LogArg]) {
        self.write(LogLevel::Fatal, template, args);
    }

    /// Derive a logger with one more field
    #[must_use]
    pub fn with<V: LogArg>(&self, key: &str, value: &V) -> Logger {
        self.derive(&[(key, value as &dyn LogArg)], CaptureHint::Default)
    }

    /// Derive a logger with several fields, merged in order
    #[must_use]
    pub fn with_fields(&self, pairs: &[(&str, &dyn LogArg)]) -> Logger {
        self.derive(pairs, CaptureHint::Default)
    }

    /// Derive a logger with one field captured structurally
    #[must_use]
    pub fn with_structure<V: LogArg>(&self, key: &str, value: &V) -> Logger {
        self.derive(&[(key, value as &dyn LogArg)], CaptureHint::Structure)
    }

    /// Same as [`with`](Logger::with)
    #[must_use]
    pub fn for_context<V: LogArg>(&self, key: &str, value: &V) -> Logger {
        self.with(key, value)
    }

    /// Derive a logger tagged with the emitting component's name
    #[must_use]
    pub fn for_source_context(&self, name: &str) -> Logger {
        self.with(SOURCE_CONTEXT, &name)
    }

    /// Derive a logger whose source context is `T`'s name without module paths
    ///
    /// `for_type::<orders::Repository<orders::Order>>()` tags events with
    /// `"Repository<Order>"`.
    #[must_use]
    pub fn for_type<T: ?Sized>(&self) -> Logger {
        self.for_source_context(&short_type_name(std::any::type_name::<T>()))
    }

    fn derive(&self, pairs: &[(&str, &dyn LogArg)], hint: CaptureHint) -> Logger {
        let mut keys = [""; 8];
        let spilled: Vec<&str>;
        let names: &[&str] = if pairs.len() <= keys.len() {
            for (slot, (key, _)) in keys.iter_mut().zip(pairs) {
                *slot = *key;
            }
            &keys[..pairs.len()]
        } else {
            spilled = pairs.iter().map(|(key, _)| *key).collect();
            &spilled
        };

        for key in names {
            if key.is_empty() {
                selflog::report("logger", format_args!("field with an empty name ignored"));
            } else if fields::is_reserved(key) {
                selflog::report(
                    "logger",
                    format_args!("field \"{}\" uses a reserved name", key),
                );
            }
        }

        let destructurer = self.pipeline.destructurer();
        let merged = self.fields.merge(names, |i| {
            let (key, value) = pairs[i];
            Property {
                name: fields::intern_name(key),
                value: destructurer.destructure(value, hint).value,
            }
        });

        Logger {
            pipeline: Arc::clone(&self.pipeline),
            level: Arc::clone(&self.level),
            fields: merged,
        }
    }

    /// Flush every sink
    pub fn flush(&self) -> Result<()> {
        self.pipeline.flush()
    }

    /// Close every sink of the shared pipeline
    ///
    /// Idempotent across all loggers of the pipeline; events written after
    /// the first close are discarded.
    ///
    /// # Example
    ///
    /// ```
    /// use rust_structured_logger::prelude::*;
    /// use std::time::Duration;
    ///
    /// let logger = Logger::builder().sink(MemorySink::new()).build();
    /// logger.info("Shutting down", &[]);
    /// assert!(logger.close(Duration::from_secs(1)).is_ok());
    /// assert!(logger.close(Duration::from_secs(1)).is_ok());
    /// ```
    pub fn close(&self, deadline: Duration) -> Result<()> {
        self.pipeline.close(deadline)
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("min_level", &self.level.level())
            .field("fields", &self.fields)
            .finish()
    }
}

impl Default for Logger {
    fn default() -> Self {
        LoggerBuilder::new().build()
    }
}

/// Builder for constructing a [`Logger`] with a fluent API
///
/// # Example
/// ```
/// use rust_structured_logger::prelude::*;
/// use std::sync::Arc;
///
/// let level = Arc::new(LevelSwitch::new(LogLevel::Info));
/// let logger = Logger::builder()
///     .level_switch(Arc::clone(&level))
///     .enrich(ThreadEnricher::new())
///     .filter(LevelFilter::new(LogLevel::Debug))
///     .sink(MemorySink::new())
///     .build();
///
/// level.set_level(LogLevel::Warn);
/// assert!(!logger.is_enabled(LogLevel::Info));
/// ```
pub struct LoggerBuilder {
    level: Arc<LevelSwitch>,
    enrichers: Vec<Arc<dyn Enricher>>,
    filters: Vec<Arc<dyn Filter>>,
    sinks: Vec<SinkRegistration>,
    policy: DestructuringPolicy,
    capabilities: Option<Arc<CapabilityCache>>,
    templates: Option<Arc<TemplateCache>>,
}

impl LoggerBuilder {
    pub fn new() -> Self {
        Self {
            level: Arc::new(LevelSwitch::new(LogLevel::Info)),
            enrichers: Vec::new(),
            filters: Vec::new(),
            sinks: Vec::new(),
            policy: DestructuringPolicy::default(),
            capabilities: None,
            templates: None,
        }
    }

    /// Set minimum log level (default `Info`)
    #[must_use = "builder methods return a new value"]
    pub fn min_level(self, level: LogLevel) -> Self {
        self.level.set_level(level);
        self
    }

    /// Share a level switch that can be changed at runtime
    #[must_use = "builder methods return a new value"]
    pub fn level_switch(mut self, level: Arc<LevelSwitch>) -> Self {
        self.level = level;
        self
    }

    /// Add an enricher; enrichers run in registration order
    #[must_use = "builder methods return a new value"]
    pub fn enrich<E: Enricher + 'static>(mut self, enricher: E) -> Self {
        self.enrichers.push(Arc::new(enricher));
        self
    }

    /// Add a filter; filters run in registration order
    #[must_use = "builder methods return a new value"]
    pub fn filter<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    /// Add a filter the caller keeps a handle to (for its metrics)
    #[must_use = "builder methods return a new value"]
    pub fn shared_filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn sink<S: Sink + 'static>(mut self, sink: S) -> Self {
        self.sinks.push(SinkRegistration::new(Arc::new(sink)));
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn shared_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(SinkRegistration::new(sink));
        self
    }

    /// Add a sink that only receives events at or above `level`
    #[must_use = "builder methods return a new value"]
    pub fn sink_with_level(mut self, sink: Arc<dyn Sink>, level: Arc<LevelSwitch>) -> Self {
        self.sinks.push(SinkRegistration::new(sink).with_level(level));
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn destructuring(mut self, policy: DestructuringPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Use a private capability cache instead of the process-wide one
    #[must_use = "builder methods return a new value"]
    pub fn capabilities(mut self, capabilities: Arc<CapabilityCache>) -> Self {
        self.capabilities = Some(capabilities);
        self
    }

    /// Use a private template cache instead of the process-wide one
    #[must_use = "builder methods return a new value"]
    pub fn template_cache(mut self, templates: Arc<TemplateCache>) -> Self {
        self.templates = Some(templates);
        self
    }

    pub fn build(self) -> Logger {
        let capabilities = self.capabilities.unwrap_or_else(CapabilityCache::global);
        let templates = self.templates.unwrap_or_else(TemplateCache::global);
        let pipeline = Pipeline::new(
            self.enrichers,
            self.filters,
            self.sinks,
            Destructurer::with_capabilities(self.policy, capabilities),
            templates,
        );

        Logger {
            pipeline: Arc::new(pipeline),
            level: self.level,
            fields: FieldSet::new(),
        }
    }
}

impl Default for LoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Strip module paths from every path in a type name
fn short_type_name(full: &str) -> String {
    let mut short = String::with_capacity(full.len());
    let mut path_start = 0;
    for (i, c) in full.char_indices() {
        if !(c.is_alphanumeric() || c == '_' || c == ':') {
            let path = &full[path_start..i];
            short.push_str(path.rsplit("::").next().unwrap_or(path));
            short.push(c);
            path_start = i + c.len_utf8();
        }
    }
    let path = &full[path_start..];
    short.push_str(path.rsplit("::").next().unwrap_or(path));
    short
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::property::PropertyValue;
    use crate::sinks::MemorySink;
    use serde::Serialize;

    fn logger_with_memory() -> (Logger, Arc<MemorySink>) {
        let memory = Arc::new(MemorySink::new());
        let logger = Logger::builder()
            .min_level(LogLevel::Trace)
            .template_cache(Arc::new(TemplateCache::new()))
            .shared_sink(memory.clone())
            .build();
        (logger, memory)
    }

    #[derive(Serialize)]
    struct Request {
        path: &'static str,
        method: &'static str,
    }

    #[test]
    fn test_builder_default() {
        let logger = LoggerBuilder::default().build();
        assert_eq!(logger.min_level(), LogLevel::Info);
        assert!(logger.fields().is_empty());
    }

    #[test]
    fn test_scalar_and_structure_arguments() {
        let (logger, memory) = logger_with_memory();
        let request = Request {
            path: "/login",
            method: "POST",
        };
        logger.info("User {UserId} logged in from {@Request}", &[&42, &request]);

        let events = memory.events();
        assert_eq!(events.len(), 1);
        let event = &events[0];
        assert_eq!(event.property("UserId"), Some(&PropertyValue::from(42i64)));
        let captured = event.property("Request").unwrap();
        assert_eq!(captured.field("path").and_then(|v| v.as_str()), Some("/login"));
        assert_eq!(captured.field("method").and_then(|v| v.as_str()), Some("POST"));
    }

    #[test]
    fn test_level_gating_round_trip() {
        let (logger, memory) = logger_with_memory();
        logger.set_min_level(LogLevel::Warn);
        logger.info("suppressed", &[]);
        assert_eq!(memory.len(), 0);

        logger.set_min_level(LogLevel::Info);
        logger.info("delivered", &[]);
        assert_eq!(memory.len(), 1);
    }

    #[test]
    fn test_with_does_not_mutate_parent() {
        let (logger, memory) = logger_with_memory();
        let parent = logger.with("Base", &1);
        let a = parent.with("a", &1);
        let b = parent.with("b", &2);

        parent.info("parent", &[]);
        a.info("a", &[]);
        b.info("b", &[]);

        let events = memory.events();
        let names = |i: usize| -> Vec<String> {
            events[i].properties().map(|p| p.name.to_string()).collect()
        };
        assert_eq!(names(0), ["Base"]);
        assert_eq!(names(1), ["Base", "a"]);
        assert_eq!(names(2), ["Base", "b"]);
    }

    #[test]
    fn test_override_keeps_single_property() {
        let (logger, memory) = logger_with_memory();
        logger.with("k", &1).with("k", &2).info("override", &[]);

        let event = &memory.events()[0];
        let values: Vec<&PropertyValue> = event
            .properties()
            .filter(|p| &*p.name == "k")
            .map(|p| &p.value)
            .collect();
        assert_eq!(values, [&PropertyValue::from(2i64)]);
    }

    #[test]
    fn test_arguments_override_fields() {
        let (logger, memory) = logger_with_memory();
        logger.with("UserId", &1).info("User {UserId}", &[&7]);
        assert_eq!(memory.events()[0].render_message(), "User 7");
    }

    #[test]
    fn test_empty_key_and_empty_pairs() {
        let (logger, _memory) = logger_with_memory();
        let base = logger.with("a", &1);
        let same = base.with_fields(&[]);
        assert!(base.fields().ptr_eq(same.fields()));

        let skipped = base.with("", &5);
        assert_eq!(skipped.fields().len(), 1);
    }

    #[test]
    fn test_source_context() {
        let (logger, memory) = logger_with_memory();
        logger.for_source_context("billing::invoices").info("hi", &[]);
        assert_eq!(
            memory.events()[0].property(SOURCE_CONTEXT).and_then(|v| v.as_str()),
            Some("billing::invoices")
        );
    }

    #[test]
    fn test_for_type_uses_short_name() {
        #[allow(dead_code)]
        struct Repository<T>(T);
        let (logger, memory) = logger_with_memory();
        logger.for_type::<Request>().info("a", &[]);
        logger.for_type::<Repository<Vec<Request>>>().info("b", &[]);

        let events = memory.events();
        let context = |i: usize| {
            events[i]
                .property(SOURCE_CONTEXT)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        assert_eq!(context(0).as_deref(), Some("Request"));
        assert_eq!(context(1).as_deref(), Some("Repository<Vec<Request>>"));
    }

    #[test]
    fn test_short_type_name() {
        assert_eq!(short_type_name("i32"), "i32");
        assert_eq!(short_type_name("&str"), "&str");
        assert_eq!(
            short_type_name("std::collections::HashMap<alloc::string::String, (u8, app::Id)>"),
            "HashMap<String, (u8, Id)>"
        );
        assert_eq!(short_type_name("dyn core::fmt::Debug"), "dyn Debug");
    }

    #[test]
    fn test_write_error_attaches_chain() {
        let (logger, memory) = logger_with_memory();
        let err = std::io::Error::new(std::io::ErrorKind::Other, "disk unplugged");
        logger.write_error(LogLevel::Error, &err, "Save failed for {File}", &[&"a.txt"]);

        let event = &memory.events()[0];
        assert_eq!(event.error().map(|e| e.message.as_str()), Some("disk unplugged"));
        assert_eq!(event.render_message(), "Save failed for a.txt");
    }

    #[test]
    fn test_close_is_idempotent_and_stops_dispatch() {
        let (logger, memory) = logger_with_memory();
        logger.info("before", &[]);
        logger.close(Duration::from_millis(100)).unwrap();
        logger.close(Duration::from_millis(100)).unwrap();
        logger.info("after", &[]);
        assert_eq!(memory.len(), 1);
    }
}
