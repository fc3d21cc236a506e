//! Sink that forwards only matching events

use super::Sink;
use crate::core::error::Result;
use crate::core::log_event::LogEvent;
use crate::core::selflog;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

/// Forwards events for which `predicate` returns true
///
/// A panicking predicate counts as a rejection.
///
/// # Example
///
/// ```
/// use rust_structured_logger::prelude::*;
/// use std::sync::Arc;
///
/// let audit = Arc::new(MemorySink::new());
/// let sink = ConditionalSink::new(audit.clone(), |e: &LogEvent| {
///     e.property("Audit").is_some()
/// });
/// let logger = Logger::builder().sink(sink).build();
///
/// logger.with("Audit", &true).info("Granted role", &[]);
/// logger.info("Routine", &[]);
/// assert_eq!(audit.len(), 1);
/// ```
pub struct ConditionalSink<F> {
    inner: Arc<dyn Sink>,
    predicate: F,
    name: String,
}

impl<F> ConditionalSink<F>
where
    F: Fn(&LogEvent) -> bool + Send + Sync,
{
    pub fn new(inner: Arc<dyn Sink>, predicate: F) -> Self {
        let name = format!("conditional({})", inner.name());
        Self {
            inner,
            predicate,
            name,
        }
    }
}

impl<F> Sink for ConditionalSink<F>
where
    F: Fn(&LogEvent) -> bool + Send + Sync,
{
    fn emit(&self, event: &Arc<LogEvent>) -> Result<()> {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.predicate)(event))) {
            Ok(true) => self.inner.emit(event),
            Ok(false) => Ok(()),
            Err(payload) => {
                selflog::report(
                    &self.name,
                    format_args!(
                        "predicate panicked, event rejected: {}",
                        selflog::panic_message(payload.as_ref())
                    ),
                );
                Ok(())
            }
        }
    }

    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }

    fn close(&self, deadline: Duration) -> Result<()> {
        self.inner.close(deadline)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_level::LogLevel;
    use crate::sinks::MemorySink;
    use crate::template::ParsedTemplate;
    use chrono::Utc;

    fn event(level: LogLevel) -> Arc<LogEvent> {
        Arc::new(LogEvent::new(
            Utc::now(),
            level,
            Arc::new(ParsedTemplate::parse("Order shipped")),
            Vec::new(),
        ))
    }

    #[test]
    fn test_forwards_matching_only() {
        let memory = Arc::new(MemorySink::new());
        let sink = ConditionalSink::new(memory.clone(), |e: &LogEvent| {
            e.level() >= LogLevel::Warn
        });
        sink.emit(&event(LogLevel::Info)).unwrap();
        sink.emit(&event(LogLevel::Error)).unwrap();
        assert_eq!(memory.len(), 1);
        assert_eq!(sink.name(), "conditional(memory)");
    }

    #[test]
    fn test_panicking_predicate_rejects() {
        let memory = Arc::new(MemorySink::new());
        let sink = ConditionalSink::new(memory.clone(), |_: &LogEvent| -> bool {
            panic!("predicate bug")
        });
        assert!(sink.emit(&event(LogLevel::Info)).is_ok());
        assert!(memory.is_empty());
    }
}
