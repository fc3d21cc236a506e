//! Asynchronous sink wrapper
//!
//! [`AsyncSink`] moves the inner sink's I/O off the logging thread. Events
//! go through a bounded crossbeam queue to one worker thread, which delivers
//! them strictly in enqueue order.
//!
//! When the queue is full the configured [`OverflowPolicy`] applies:
//! - `DropNewest`: the incoming event is rejected with `QueueFull`;
//! - `DropOldest`: the oldest queued event is evicted to make room;
//! - `BlockWithTimeout(d)`: the caller waits up to `d`, then the incoming
//!   event is rejected.
//!
//! Every drop is counted in [`AsyncSinkMetrics`] and announced through
//! selflog on the first occurrence and every 1000th after that.

use super::Sink;
use crate::core::error::{LoggerError, Result};
use crate::core::log_event::LogEvent;
use crate::core::logger::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::core::metrics::AsyncSinkMetrics;
use crate::core::overflow_policy::{OverflowCallback, OverflowPolicy};
use crate::core::selflog;
use crossbeam_channel::{bounded, select, Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_CAPACITY: usize = 1000;

/// How many head evictions a drop-oldest enqueue attempts
const EVICTION_ATTEMPTS: usize = 4;
const DROP_ALERT_INTERVAL: u64 = 1000;
const SHUTDOWN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Settings for [`AsyncSink`]
#[derive(Clone)]
pub struct AsyncSinkConfig {
    pub capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Drain budget used by `flush` and by `Drop`
    pub shutdown_timeout: Duration,
    /// Called with the running drop count whenever a drop is announced
    pub on_overflow: Option<OverflowCallback>,
}

impl Default for AsyncSinkConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            overflow_policy: OverflowPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            on_overflow: None,
        }
    }
}

impl fmt::Debug for AsyncSinkConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncSinkConfig")
            .field("capacity", &self.capacity)
            .field("overflow_policy", &self.overflow_policy)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("on_overflow", &self.on_overflow.is_some())
            .finish()
    }
}

/// Builder for [`AsyncSink`]
///
/// # Example
///
/// ```
/// use rust_structured_logger::prelude::*;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let memory = Arc::new(MemorySink::new());
/// let sink = AsyncSink::builder(memory.clone())
///     .capacity(256)
///     .overflow_policy(OverflowPolicy::DropOldest)
///     .build()
///     .unwrap();
///
/// let logger = Logger::builder().sink(sink).build();
/// logger.info("queued {Count}", &[&1]);
/// logger.close(Duration::from_secs(1)).unwrap();
/// assert_eq!(memory.len(), 1);
/// ```
pub struct AsyncSinkBuilder {
    inner: Arc<dyn Sink>,
    config: AsyncSinkConfig,
}

impl AsyncSinkBuilder {
    #[must_use]
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    #[must_use]
    pub fn overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.config.overflow_policy = policy;
        self
    }

    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.config.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn on_overflow(mut self, callback: OverflowCallback) -> Self {
        self.config.on_overflow = Some(callback);
        self
    }

    #[must_use]
    pub fn config(mut self, config: AsyncSinkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<AsyncSink> {
        AsyncSink::with_config(self.inner, self.config)
    }
}

/// State shared with the worker thread
struct Shared {
    inner: Arc<dyn Sink>,
    metrics: AsyncSinkMetrics,
    /// Events enqueued but not yet delivered, evicted or discarded
    in_flight: AtomicUsize,
}

impl Shared {
    fn deliver(&self, event: Arc<LogEvent>) {
        let inner = &self.inner;
        let result = panic::catch_unwind(AssertUnwindSafe(|| inner.emit(&event)));
        self.metrics.record_processed();
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.metrics.record_inner_failure();
                selflog::report(
                    "async-sink",
                    format_args!("inner sink {} failed: {}", inner.name(), e),
                );
            }
            Err(payload) => {
                self.metrics.record_inner_failure();
                selflog::report(
                    "async-sink",
                    format_args!(
                        "inner sink {} panicked: {}",
                        inner.name(),
                        selflog::panic_message(payload.as_ref())
                    ),
                );
            }
        }
    }

    fn run(&self, events: Receiver<Arc<LogEvent>>, stop: Receiver<Instant>) {
        loop {
            select! {
                recv(events) -> msg => match msg {
                    Ok(event) => self.deliver(event),
                    Err(_) => return,
                },
                recv(stop) -> msg => {
                    let deadline = msg.unwrap_or_else(|_| Instant::now());
                    self.drain(&events, deadline);
                    return;
                }
            }
        }
    }

    /// Deliver what is queued until empty or past `deadline`
    fn drain(&self, events: &Receiver<Arc<LogEvent>>, deadline: Instant) {
        while Instant::now() < deadline {
            match events.try_recv() {
                Ok(event) => self.deliver(event),
                Err(_) => return,
            }
        }
    }
}

/// Sink wrapper delivering through a bounded queue and a worker thread
pub struct AsyncSink {
    name: String,
    config: AsyncSinkConfig,
    sender: Sender<Arc<LogEvent>>,
    /// Producer-side receiver used for drop-oldest eviction and shutdown accounting
    receiver: Receiver<Arc<LogEvent>>,
    stop: Sender<Instant>,
    worker: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    shared: Arc<Shared>,
}

impl AsyncSink {
    /// Wrap `inner` with the default configuration
    pub fn new(inner: Arc<dyn Sink>) -> Result<Self> {
        Self::with_config(inner, AsyncSinkConfig::default())
    }

    pub fn builder(inner: Arc<dyn Sink>) -> AsyncSinkBuilder {
        AsyncSinkBuilder {
            inner,
            config: AsyncSinkConfig::default(),
        }
    }

    pub fn with_config(inner: Arc<dyn Sink>, config: AsyncSinkConfig) -> Result<Self> {
        if config.capacity == 0 {
            return Err(LoggerError::config("AsyncSink", "capacity must be positive"));
        }

        let name = format!("async({})", inner.name());
        let (sender, receiver) = bounded(config.capacity);
        let (stop, stop_rx) = bounded(1);
        let shared = Arc::new(Shared {
            inner,
            metrics: AsyncSinkMetrics::new(),
            in_flight: AtomicUsize::new(0),
        });

        let worker_shared = Arc::clone(&shared);
        let worker_events = receiver.clone();
        let worker = thread::Builder::new()
            .name("async-sink".to_string())
            .spawn(move || worker_shared.run(worker_events, stop_rx))
            .map_err(|e| LoggerError::io_operation("spawning async sink worker", name.clone(), e))?;

        Ok(Self {
            name,
            config,
            sender,
            receiver,
            stop,
            worker: Mutex::new(Some(worker)),
            closed: AtomicBool::new(false),
            shared,
        })
    }

    pub fn metrics(&self) -> &AsyncSinkMetrics {
        &self.shared.metrics
    }

    pub fn config(&self) -> &AsyncSinkConfig {
        &self.config
    }

    /// Number of events queued or being delivered
    pub fn pending(&self) -> usize {
        self.shared.in_flight.load(Ordering::Acquire)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until every accepted event was handed to the inner sink
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_for_empty(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.pending() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn enqueued(&self) -> Result<()> {
        self.shared.in_flight.fetch_add(1, Ordering::AcqRel);
        self.shared.metrics.record_enqueued();
        Ok(())
    }

    fn record_drop(&self) {
        let previous = self.shared.metrics.record_dropped();
        let total = previous + 1;
        if previous == 0 || total % DROP_ALERT_INTERVAL == 0 {
            selflog::report(
                &self.name,
                format_args!(
                    "queue full ({} slots, policy {}), {} events dropped",
                    self.config.capacity, self.config.overflow_policy, total
                ),
            );
            if let Some(callback) = &self.config.on_overflow {
                callback(total);
            }
        }
    }

    fn queue_full(&self) -> LoggerError {
        LoggerError::queue_full(self.sender.len(), self.config.capacity)
    }

    fn handle_overflow(&self, event: Arc<LogEvent>) -> Result<()> {
        self.shared.metrics.record_queue_full();

        match self.config.overflow_policy {
            OverflowPolicy::DropNewest => {
                self.record_drop();
                Err(self.queue_full())
            }

            OverflowPolicy::DropOldest => {
                let mut event = event;
                for _ in 0..EVICTION_ATTEMPTS {
                    if self.receiver.try_recv().is_ok() {
                        self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
                        self.record_drop();
                    }
                    match self.sender.try_send(event) {
                        Ok(()) => return self.enqueued(),
                        Err(TrySendError::Full(rejected)) => event = rejected,
                        Err(TrySendError::Disconnected(_)) => {
                            return Err(LoggerError::sink_closed(&self.name))
                        }
                    }
                }
                self.record_drop();
                Err(self.queue_full())
            }

            OverflowPolicy::BlockWithTimeout(timeout) => {
                self.shared.metrics.record_block();
                match self.sender.send_timeout(event, timeout) {
                    Ok(()) => self.enqueued(),
                    Err(SendTimeoutError::Timeout(_)) => {
                        self.record_drop();
                        Err(self.queue_full())
                    }
                    Err(SendTimeoutError::Disconnected(_)) => {
                        Err(LoggerError::sink_closed(&self.name))
                    }
                }
            }
        }
    }

    /// Wait for the worker until `until`, polling so a stuck inner sink
    /// cannot hold shutdown hostage
    fn join_worker(&self, until: Instant) {
        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        loop {
            if handle.is_finished() {
                if let Err(payload) = handle.join() {
                    selflog::report(
                        &self.name,
                        format_args!(
                            "worker panicked during shutdown: {}",
                            selflog::panic_message(payload.as_ref())
                        ),
                    );
                }
                return;
            }
            if Instant::now() >= until {
                selflog::report(
                    &self.name,
                    format_args!("worker did not finish before the shutdown deadline"),
                );
                return;
            }
            thread::sleep(SHUTDOWN_POLL_INTERVAL);
        }
    }
}

impl Sink for AsyncSink {
    fn emit(&self, event: &Arc<LogEvent>) -> Result<()> {
        if self.is_closed() {
            return Err(LoggerError::sink_closed(&self.name));
        }
        match self.sender.try_send(Arc::clone(event)) {
            Ok(()) => self.enqueued(),
            Err(TrySendError::Full(event)) => self.handle_overflow(event),
            Err(TrySendError::Disconnected(_)) => Err(LoggerError::sink_closed(&self.name)),
        }
    }

    /// Wait for the queue to drain, then flush the inner sink
    fn flush(&self) -> Result<()> {
        if !self.wait_for_empty(self.config.shutdown_timeout) {
            selflog::report(
                &self.name,
                format_args!("flush timed out with {} events pending", self.pending()),
            );
        }
        self.shared.inner.flush()
    }

    fn close(&self, deadline: Duration) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let until = Instant::now() + deadline;
        let _ = self.stop.try_send(until);
        self.join_worker(until);

        let mut lost = 0u64;
        while self.receiver.try_recv().is_ok() {
            self.shared.in_flight.fetch_sub(1, Ordering::AcqRel);
            lost += 1;
        }
        if lost > 0 {
            self.shared.metrics.record_lost_on_shutdown(lost);
            selflog::report(
                &self.name,
                format_args!("{} queued events lost at shutdown", lost),
            );
        }

        let remaining = until.saturating_duration_since(Instant::now());
        self.shared.inner.close(remaining)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for AsyncSink {
    fn drop(&mut self) {
        let _ = self.close(self.config.shutdown_timeout);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::log_level::LogLevel;
    use crate::sinks::MemorySink;
    use crate::template::ParsedTemplate;
    use chrono::Utc;
    use parking_lot::Condvar;

    fn event(text: &str) -> Arc<LogEvent> {
        Arc::new(LogEvent::new(
            Utc::now(),
            LogLevel::Info,
            Arc::new(ParsedTemplate::parse(text)),
            Vec::new(),
        ))
    }

    /// Holds every delivery until opened
    struct GatedSink {
        open: Mutex<bool>,
        opened: Condvar,
        entered: AtomicUsize,
        memory: MemorySink,
    }

    impl GatedSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                open: Mutex::new(false),
                opened: Condvar::new(),
                entered: AtomicUsize::new(0),
                memory: MemorySink::new(),
            })
        }

        fn open(&self) {
            *self.open.lock() = true;
            self.opened.notify_all();
        }

        fn wait_entered(&self, count: usize) {
            let deadline = Instant::now() + Duration::from_secs(5);
            while self.entered.load(Ordering::Acquire) < count && Instant::now() < deadline {
                thread::sleep(Duration::from_millis(1));
            }
        }
    }

    impl Sink for GatedSink {
        fn emit(&self, event: &Arc<LogEvent>) -> Result<()> {
            self.entered.fetch_add(1, Ordering::AcqRel);
            let mut open = self.open.lock();
            while !*open {
                self.opened.wait(&mut open);
            }
            self.memory.emit(event)
        }

        fn name(&self) -> &str {
            "gated"
        }
    }

    fn gated(capacity: usize, policy: OverflowPolicy) -> (Arc<GatedSink>, AsyncSink) {
        let gate = GatedSink::new();
        let sink = AsyncSink::builder(gate.clone())
            .capacity(capacity)
            .overflow_policy(policy)
            .build()
            .unwrap();
        (gate, sink)
    }

    #[test]
    fn test_delivers_in_order() {
        let memory = Arc::new(MemorySink::new());
        let sink = AsyncSink::new(memory.clone()).unwrap();
        for i in 0..100 {
            sink.emit(&event(&format!("e{}", i))).unwrap();
        }
        assert!(sink.wait_for_empty(Duration::from_secs(5)));

        let expected: Vec<String> = (0..100).map(|i| format!("e{}", i)).collect();
        assert_eq!(memory.messages(), expected);
        assert_eq!(sink.metrics().enqueued(), 100);
        assert_eq!(sink.metrics().processed(), 100);
    }

    #[test]
    fn test_drop_newest_rejects_incoming() {
        let (gate, sink) = gated(2, OverflowPolicy::DropNewest);
        sink.emit(&event("e0")).unwrap();
        gate.wait_entered(1);
        sink.emit(&event("e1")).unwrap();
        sink.emit(&event("e2")).unwrap();

        let err = sink.emit(&event("e3")).unwrap_err();
        assert!(matches!(err, LoggerError::QueueFull { .. }));

        gate.open();
        assert!(sink.wait_for_empty(Duration::from_secs(5)));
        assert_eq!(gate.memory.messages(), ["e0", "e1", "e2"]);
        assert_eq!(sink.metrics().dropped_overflow(), 1);
        assert_eq!(sink.metrics().queue_full_events(), 1);
    }

    #[test]
    fn test_drop_oldest_evicts_head() {
        let (gate, sink) = gated(2, OverflowPolicy::DropOldest);
        sink.emit(&event("e0")).unwrap();
        gate.wait_entered(1);
        sink.emit(&event("e1")).unwrap();
        sink.emit(&event("e2")).unwrap();
        sink.emit(&event("e3")).unwrap();

        gate.open();
        assert!(sink.wait_for_empty(Duration::from_secs(5)));
        assert_eq!(gate.memory.messages(), ["e0", "e2", "e3"]);
        assert_eq!(sink.metrics().dropped_overflow(), 1);
    }

    #[test]
    fn test_block_with_timeout_gives_up() {
        let (gate, sink) = gated(1, OverflowPolicy::BlockWithTimeout(Duration::from_millis(20)));
        sink.emit(&event("e0")).unwrap();
        gate.wait_entered(1);
        sink.emit(&event("e1")).unwrap();

        let started = Instant::now();
        assert!(sink.emit(&event("e2")).is_err());
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(sink.metrics().block_events(), 1);

        gate.open();
        assert!(sink.wait_for_empty(Duration::from_secs(5)));
        assert_eq!(gate.memory.len(), 2);
    }

    #[test]
    fn test_overflow_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&count);
        let gate = GatedSink::new();
        let sink = AsyncSink::builder(gate.clone())
            .capacity(1)
            .on_overflow(Arc::new(move |total| {
                observed.store(total as usize, Ordering::SeqCst);
            }))
            .build()
            .unwrap();

        sink.emit(&event("e0")).unwrap();
        gate.wait_entered(1);
        sink.emit(&event("e1")).unwrap();
        let _ = sink.emit(&event("e2"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
        gate.open();
    }

    #[test]
    fn test_close_is_bounded_and_counts_lost() {
        let (gate, sink) = gated(10, OverflowPolicy::DropNewest);
        for i in 0..5 {
            sink.emit(&event(&format!("e{}", i))).unwrap();
        }
        gate.wait_entered(1);

        let started = Instant::now();
        sink.close(Duration::from_millis(50)).unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(sink.metrics().lost_on_shutdown(), 4);

        let err = sink.emit(&event("late")).unwrap_err();
        assert!(matches!(err, LoggerError::SinkClosed { .. }));
        assert!(sink.close(Duration::from_millis(50)).is_ok());
        gate.open();
    }

    #[test]
    fn test_close_drains_healthy_sink() {
        let memory = Arc::new(MemorySink::new());
        let sink = AsyncSink::new(memory.clone()).unwrap();
        for i in 0..50 {
            sink.emit(&event(&format!("e{}", i))).unwrap();
        }
        sink.close(Duration::from_secs(5)).unwrap();
        assert_eq!(memory.len(), 50);
        assert_eq!(sink.metrics().lost_on_shutdown(), 0);
    }

    #[test]
    fn test_zero_capacity_is_rejected() {
        let memory = Arc::new(MemorySink::new());
        let result = AsyncSink::builder(memory).capacity(0).build();
        assert!(matches!(result, Err(LoggerError::InvalidConfiguration { .. })));
    }
}
