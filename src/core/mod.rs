//! Core logger types: levels, properties, events, the pipeline and the logger

pub mod error;
pub mod fields;
pub mod level_switch;
pub mod log_event;
pub mod log_level;
pub mod logger;
pub mod metrics;
pub mod overflow_policy;
pub mod pipeline;
pub mod property;
pub mod selflog;

pub use error::{LoggerError, Result};
pub use fields::FieldSet;
pub use level_switch::LevelSwitch;
pub use log_event::LogEvent;
pub use log_level::LogLevel;
pub use logger::{Logger, LoggerBuilder, DEFAULT_SHUTDOWN_TIMEOUT, SOURCE_CONTEXT};
pub use metrics::{AsyncSinkMetrics, DurableSinkMetrics, PipelineMetrics};
pub use overflow_policy::{OverflowCallback, OverflowPolicy};
pub use pipeline::{EventBuilder, EventView, Pipeline, SinkRegistration};
pub use property::{ErrorValue, Property, PropertyValue, Scalar};
