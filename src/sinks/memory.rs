//! In-memory sink for tests and inspection

use super::Sink;
use crate::core::error::Result;
use crate::core::log_event::LogEvent;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Keeps every emitted event in memory
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<Arc<LogEvent>>>,
    arrived: Condvar,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events received so far, in arrival order
    pub fn events(&self) -> Vec<Arc<LogEvent>> {
        self.events.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Rendered messages, in arrival order
    pub fn messages(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|event| event.render_message())
            .collect()
    }

    /// Block until at least `count` events arrived or `timeout` elapsed
    ///
    /// Returns whether the count was reached.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        while events.len() < count {
            if self.arrived.wait_until(&mut events, deadline).timed_out() {
                return events.len() >= count;
            }
        }
        true
    }
}

impl Sink for MemorySink {
    fn emit(&self, event: &Arc<LogEvent>) -> Result<()> {
        self.events.lock().push(Arc::clone(event));
        self.arrived.notify_all();
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_level::LogLevel;
    use crate::template::ParsedTemplate;
    use chrono::Utc;

    fn event(text: &str) -> Arc<LogEvent> {
        Arc::new(LogEvent::new(
            Utc::now(),
            LogLevel::Info,
            Arc::new(ParsedTemplate::parse(text)),
            Vec::new(),
        ))
    }

    #[test]
    fn test_collects_in_order() {
        let sink = MemorySink::new();
        sink.emit(&event("one")).unwrap();
        sink.emit(&event("two")).unwrap();
        assert_eq!(sink.messages(), ["one", "two"]);

        sink.clear();
        assert!(sink.is_empty());
    }

    #[test]
    fn test_wait_for_across_threads() {
        let sink = Arc::new(MemorySink::new());
        let producer = Arc::clone(&sink);
        let handle = std::thread::spawn(move || {
            for _ in 0..3 {
                std::thread::sleep(Duration::from_millis(5));
                producer.emit(&event("tick")).unwrap();
            }
        });

        assert!(sink.wait_for(3, Duration::from_secs(5)));
        handle.join().unwrap();
        assert!(!sink.wait_for(4, Duration::from_millis(20)));
    }
}
