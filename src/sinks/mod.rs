//! Output destinations
//!
//! A [`Sink`] receives finished, immutable events. The pipeline calls
//! [`Sink::emit`] from the logging thread, so slow backends should be
//! wrapped in an [`AsyncSink`]; backends that must survive outages can be
//! wrapped in a [`DurableSink`], and backends that fail repeatedly can be
//! isolated behind a [`CircuitBreakerSink`]. [`RouterSink`] and
//! [`ConditionalSink`] send events to sinks by predicate.

pub mod async_sink;
pub mod circuit_breaker;
pub mod conditional;
pub mod console;
#[cfg(feature = "durable")]
pub mod durable;
pub mod format;
pub mod memory;
pub mod router;

pub use async_sink::{AsyncSink, AsyncSinkBuilder, AsyncSinkConfig};
pub use circuit_breaker::{
    CircuitBreakerBuilder, CircuitBreakerSink, CircuitBreakerStats, CircuitState,
    StateChangeCallback,
};
pub use conditional::ConditionalSink;
pub use console::ConsoleSink;
#[cfg(feature = "durable")]
pub use durable::{DurableSink, DurableSinkBuilder, DurableSinkConfig, RecoveryReport};
pub use format::{OutputFormat, TimestampFormat};
pub use memory::MemorySink;
pub use router::{Route, RouterSink, RouterStats, RoutingMode};

use crate::core::error::Result;
use crate::core::log_event::LogEvent;
use std::sync::Arc;
use std::time::Duration;

/// Contract implemented by every output backend
///
/// Implementations must tolerate concurrent `emit` calls. Errors are
/// reported through selflog by the caller and never reach application code.
pub trait Sink: Send + Sync {
    fn emit(&self, event: &Arc<LogEvent>) -> Result<()>;

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    /// Release resources, spending at most `deadline`
    fn close(&self, _deadline: Duration) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str;
}

impl<T: Sink + ?Sized> Sink for Arc<T> {
    fn emit(&self, event: &Arc<LogEvent>) -> Result<()> {
        (**self).emit(event)
    }

    fn flush(&self) -> Result<()> {
        (**self).flush()
    }

    fn close(&self, deadline: Duration) -> Result<()> {
        (**self).close(deadline)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
