//! # Rust Structured Logger
//!
//! A message-template structured logging engine. Log calls carry a template
//! such as `"User {UserId} signed in"` plus positional arguments; the
//! pipeline binds them to named properties, enriches, filters and hands an
//! immutable [`LogEvent`] to every sink.
//!
//! ## Features
//!
//! - **Message templates**: parsed once and cached, with `@` (structure) and
//!   `$` (stringify) capture hints, alignment and format specifiers
//! - **Bounded destructuring**: depth, fan-out and string-length limits, and
//!   per-type safe-value providers
//! - **Scoped loggers**: `with` / `for_context` derive immutable loggers that
//!   carry extra properties
//! - **Enrichers and filters**: ambient context, thread/process/machine
//!   properties, sampling (including target-rate adaptive sampling), rate
//!   limiting and boolean composition
//! - **Async and durable sinks**: a bounded queue with overflow policies and
//!   an on-disk spool that replays after outages and restarts
//! - **Resilience and routing**: a circuit breaker around failing sinks and
//!   predicate routing to several sinks
//! - **Runtime level control** through a shared [`LevelSwitch`]
//!
//! ## Example
//!
//! ```
//! use rust_structured_logger::prelude::*;
//! use std::sync::Arc;
//!
//! let memory = Arc::new(MemorySink::new());
//! let logger = Logger::builder()
//!     .min_level(LogLevel::Debug)
//!     .enrich(ThreadEnricher::new())
//!     .shared_sink(memory.clone())
//!     .build();
//!
//! let orders = logger.for_context("Component", &"orders");
//! orders.info("Order {OrderId} placed by {Customer}", &[&1042, &"alice"]);
//!
//! let event = &memory.events()[0];
//! assert_eq!(event.render_message(), "Order 1042 placed by alice");
//! assert!(event.property("Component").is_some());
//! ```

pub mod core;
pub mod destructure;
pub mod enrichers;
pub mod filters;
pub mod macros;
pub mod sinks;
pub mod template;

pub mod prelude {
    pub use crate::core::{
        EventBuilder, EventView, LevelSwitch, LogEvent, LogLevel, Logger, LoggerBuilder,
        LoggerError, OverflowPolicy, Property, PropertyValue, Result, DEFAULT_SHUTDOWN_TIMEOUT,
    };
    pub use crate::destructure::{DestructuringPolicy, LogArg, LogValueProvider};
    pub use crate::enrichers::{
        CallbackEnricher, ContextGuard, Enricher, EnvironmentEnricher, LogContext,
        LogContextEnricher, MachineNameEnricher, ProcessEnricher, PropertyEnricher,
        ThreadEnricher,
    };
    pub use crate::filters::{
        AdaptiveConfig, AdaptiveSamplingFilter, AllFilter, AnyFilter, DampeningPreset, Filter,
        FilterKey, LevelFilter, NotFilter, PredicateFilter, PropertyFilter, RateLimitFilter,
        SamplingFilter, SamplingMode,
    };
    pub use crate::sinks::{
        AsyncSink, CircuitBreakerSink, CircuitState, ConditionalSink, ConsoleSink, MemorySink,
        OutputFormat, Route, RouterSink, RoutingMode, Sink, TimestampFormat,
    };
    #[cfg(feature = "durable")]
    pub use crate::sinks::DurableSink;
}

pub use crate::core::{
    AsyncSinkMetrics, DurableSinkMetrics, ErrorValue, EventBuilder, EventView, FieldSet,
    LevelSwitch, LogEvent, LogLevel, Logger, LoggerBuilder, LoggerError, OverflowCallback,
    OverflowPolicy, PipelineMetrics, Property, PropertyValue, Result, Scalar,
    DEFAULT_SHUTDOWN_TIMEOUT,
};
pub use crate::destructure::{DestructuringPolicy, LogArg};
pub use crate::filters::SamplerMetrics;
pub use crate::template::{ParsedTemplate, TemplateCache};
