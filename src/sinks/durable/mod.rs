//! Durable sink with an on-disk spool
//!
//! [`DurableSink`] wraps another sink. While the inner sink accepts events
//! and nothing is spooled, events go straight through. Once a delivery
//! fails, events are appended to the spool instead, and a background
//! flusher replays them in write order with exponential backoff. New events
//! keep going to the spool until the backlog is empty, so ordering holds
//! across failures and restarts.

mod segment;
mod spool;

pub use spool::RecoveryReport;

use self::spool::Spool;
use super::Sink;
use crate::core::error::{LoggerError, Result};
use crate::core::log_event::LogEvent;
use crate::core::logger::DEFAULT_SHUTDOWN_TIMEOUT;
use crate::core::metrics::DurableSinkMetrics;
use crate::core::overflow_policy::OverflowPolicy;
use crate::core::selflog;
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

pub const DEFAULT_SEGMENT_SIZE: u64 = 8 * 1024 * 1024;
pub const DEFAULT_MAX_SPOOL_BYTES: u64 = 100 * 1024 * 1024;
pub const DEFAULT_BATCH_SIZE: usize = 100;

const DROP_ALERT_INTERVAL: u64 = 1000;
/// Flusher wake-up interval when nothing signals it
const IDLE_POLL: Duration = Duration::from_millis(250);
const POLL_INTERVAL: Duration = Duration::from_millis(5);
const IO_RETRY_DELAY: Duration = Duration::from_millis(10);

/// Settings for [`DurableSink`]
#[derive(Debug, Clone)]
pub struct DurableSinkConfig {
    pub spool_dir: PathBuf,
    /// The active segment rotates once it reaches this size
    pub segment_size: u64,
    pub max_spool_bytes: u64,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Records replayed per flusher pass
    pub batch_size: usize,
    /// Extra attempts for a failed spool write
    pub io_retries: u32,
    /// Applied when the spool is at `max_spool_bytes`
    pub overflow_policy: OverflowPolicy,
    pub shutdown_timeout: Duration,
}

impl DurableSinkConfig {
    pub fn new(spool_dir: impl Into<PathBuf>) -> Self {
        Self {
            spool_dir: spool_dir.into(),
            segment_size: DEFAULT_SEGMENT_SIZE,
            max_spool_bytes: DEFAULT_MAX_SPOOL_BYTES,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            batch_size: DEFAULT_BATCH_SIZE,
            io_retries: 3,
            overflow_policy: OverflowPolicy::default(),
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
        }
    }

    fn validate(&self) -> Result<()> {
        if self.segment_size == 0 {
            return Err(LoggerError::config("DurableSink", "segment size must be positive"));
        }
        if self.max_spool_bytes < self.segment_size {
            return Err(LoggerError::config(
                "DurableSink",
                "maximum spool size must be at least one segment",
            ));
        }
        if self.batch_size == 0 {
            return Err(LoggerError::config("DurableSink", "batch size must be positive"));
        }
        if self.initial_backoff.is_zero() || self.max_backoff < self.initial_backoff {
            return Err(LoggerError::config(
                "DurableSink",
                "backoff must be positive and not exceed its maximum",
            ));
        }
        Ok(())
    }
}

/// Builder for [`DurableSink`]
///
/// # Example
///
/// ```
/// use rust_structured_logger::prelude::*;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let dir = tempfile::tempdir().unwrap();
/// let memory = Arc::new(MemorySink::new());
/// let sink = DurableSink::builder(memory.clone(), dir.path())
///     .max_spool_bytes(16 * 1024 * 1024)
///     .segment_size(1024 * 1024)
///     .build()
///     .unwrap();
///
/// let logger = Logger::builder().sink(sink).build();
/// logger.info("Order {OrderId} shipped", &[&42]);
/// logger.close(Duration::from_secs(1)).unwrap();
/// assert_eq!(memory.len(), 1);
/// ```
pub struct DurableSinkBuilder {
    inner: Arc<dyn Sink>,
    config: DurableSinkConfig,
}

impl DurableSinkBuilder {
    #[must_use]
    pub fn segment_size(mut self, bytes: u64) -> Self {
        self.config.segment_size = bytes;
        self
    }

    #[must_use]
    pub fn max_spool_bytes(mut self, bytes: u64) -> Self {
        self.config.max_spool_bytes = bytes;
        self
    }

    #[must_use]
    pub fn initial_backoff(mut self, backoff: Duration) -> Self {
        self.config.initial_backoff = backoff;
        self
    }

    #[must_use]
    pub fn max_backoff(mut self, backoff: Duration) -> Self {
        self.config.max_backoff = backoff;
        self
    }

    #[must_use]
    pub fn batch_size(mut self, records: usize) -> Self {
        self.config.batch_size = records;
        self
    }

    #[must_use]
    pub fn io_retries(mut self, retries: u32) -> Self {
        self.config.io_retries = retries;
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

    /// Replace every setting, including the spool directory
    #[must_use]
    pub fn config(mut self, config: DurableSinkConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<DurableSink> {
        DurableSink::with_config(self.inner, self.config)
    }
}

struct Signal {
    pending: bool,
    stop: bool,
}

/// State shared with the flusher thread
struct Shared {
    name: String,
    inner: Arc<dyn Sink>,
    spool: Spool,
    config: DurableSinkConfig,
    metrics: DurableSinkMetrics,
    healthy: AtomicBool,
    signal: Mutex<Signal>,
    wake: Condvar,
}

impl Shared {
    fn deliver(&self, event: &Arc<LogEvent>) -> Result<()> {
        match panic::catch_unwind(AssertUnwindSafe(|| self.inner.emit(event))) {
            Ok(result) => result,
            Err(payload) => Err(LoggerError::sink(
                self.inner.name(),
                format!("panicked: {}", selflog::panic_message(payload.as_ref())),
            )),
        }
    }

    fn mark_unhealthy(&self, error: &LoggerError) {
        if self.healthy.swap(false, Ordering::AcqRel) {
            selflog::report(
                &self.name,
                format_args!("inner sink unavailable, spooling: {}", error),
            );
        }
    }

    fn mark_healthy(&self) {
        if !self.healthy.swap(true, Ordering::AcqRel) {
            selflog::report(&self.name, format_args!("inner sink recovered"));
        }
    }

    fn notify(&self) {
        self.signal.lock().pending = true;
        self.wake.notify_one();
    }

    fn record_dropped(&self, count: u64, reason: &str) {
        if count == 0 {
            return;
        }
        let previous = self.metrics.record_dropped(count);
        let total = previous + count;
        if previous == 0 || previous / DROP_ALERT_INTERVAL != total / DROP_ALERT_INTERVAL {
            selflog::report(
                &self.name,
                format_args!("{}, {} events dropped so far", reason, total),
            );
        }
    }

    /// Append with `io_retries` extra attempts; capacity errors are not retried
    fn append(&self, payload: &[u8]) -> Result<()> {
        let mut delay = IO_RETRY_DELAY;
        let mut attempt = 0;
        loop {
            match self.spool.append(payload) {
                Ok(()) => return Ok(()),
                Err(e @ LoggerError::SpoolFull { .. }) => return Err(e),
                Err(e) => {
                    self.metrics.record_spool_error();
                    if attempt >= self.config.io_retries {
                        return Err(e);
                    }
                    self.metrics.record_retry();
                    attempt += 1;
                    thread::sleep(delay);
                    delay *= 2;
                }
            }
        }
    }

    fn spool_event(&self, event: &Arc<LogEvent>) -> Result<()> {
        let payload = match serde_json::to_vec(event.as_ref()) {
            Ok(payload) => payload,
            Err(e) => {
                self.record_dropped(1, "event could not be serialized");
                return Err(e.into());
            }
        };

        let result = match self.append(&payload) {
            Err(LoggerError::SpoolFull { .. }) => self.handle_full(&payload),
            other => other,
        };
        match result {
            Ok(()) => {
                self.metrics.record_spooled();
                self.metrics.set_backlog(self.spool.backlog());
                self.notify();
                Ok(())
            }
            Err(e @ LoggerError::SpoolFull { .. }) => Err(e),
            Err(e) => {
                self.record_dropped(1, "spool write failed");
                selflog::report(&self.name, format_args!("spool write failed: {}", e));
                Err(e)
            }
        }
    }

    fn handle_full(&self, payload: &[u8]) -> Result<()> {
        match self.config.overflow_policy {
            OverflowPolicy::DropNewest => {}

            OverflowPolicy::DropOldest => {
                while let Some(dropped) = self.spool.drop_oldest() {
                    self.record_dropped(dropped, "spool full, oldest segment discarded");
                    match self.append(payload) {
                        Err(LoggerError::SpoolFull { .. }) => continue,
                        other => return other,
                    }
                }
            }

            OverflowPolicy::BlockWithTimeout(timeout) => {
                let deadline = Instant::now() + timeout;
                self.notify();
                while Instant::now() < deadline {
                    thread::sleep(POLL_INTERVAL);
                    match self.append(payload) {
                        Err(LoggerError::SpoolFull { .. }) => {}
                        other => return other,
                    }
                }
            }
        }

        self.record_dropped(1, "spool full, incoming event discarded");
        Err(LoggerError::spool_full(
            self.spool.total_bytes(),
            self.config.max_spool_bytes,
        ))
    }

    /// Replay one batch
    ///
    /// Returns `Ok(false)` when there was nothing to do.
    fn replay_batch(&self) -> Result<bool> {
        let batch = match self.spool.next_batch(self.config.batch_size) {
            Ok(Some(batch)) => batch,
            Ok(None) => {
                self.metrics.set_backlog(0);
                return Ok(false);
            }
            Err(e @ LoggerError::SpoolCorrupt { .. }) => {
                self.metrics.record_spool_error();
                selflog::report(&self.name, format_args!("{}, segment discarded", e));
                if let Some(lost) = self.spool.drop_oldest() {
                    self.record_dropped(lost, "corrupt spool segment discarded");
                }
                self.metrics.set_backlog(self.spool.backlog());
                return Ok(true);
            }
            Err(e) => {
                self.metrics.record_spool_error();
                return Err(e);
            }
        };

        let mut handled = 0;
        let mut delivered = 0u64;
        let mut failure = None;
        for record in &batch.records {
            if let Some(event) = &record.event {
                if let Err(e) = self.deliver(event) {
                    failure = Some(e);
                    break;
                }
                delivered += 1;
            }
            handled += 1;
        }

        let released = self.spool.commit(&batch, handled);
        self.metrics.record_replayed(delivered);
        self.record_dropped(handled as u64 - delivered, "undecodable spool records skipped");
        self.record_dropped(
            released.saturating_sub(handled as u64),
            "unreadable spool segment tail discarded",
        );
        self.metrics.set_backlog(self.spool.backlog());

        match failure {
            Some(e) => {
                self.mark_unhealthy(&e);
                Err(e)
            }
            None => {
                if delivered > 0 {
                    self.mark_healthy();
                }
                Ok(!batch.records.is_empty() || batch.exhausted)
            }
        }
    }

    /// Block until there is work, a retry is due, or a stop was requested
    ///
    /// Returns `false` on stop.
    fn wait_for_work(&self, retry_at: Option<Instant>) -> bool {
        let mut signal = self.signal.lock();
        loop {
            if signal.stop {
                return false;
            }
            match retry_at {
                Some(at) => {
                    if Instant::now() >= at {
                        break;
                    }
                    self.wake.wait_until(&mut signal, at);
                }
                None => {
                    if signal.pending || self.wake.wait_for(&mut signal, IDLE_POLL).timed_out() {
                        break;
                    }
                }
            }
        }
        signal.pending = false;
        true
    }

    fn stopping(&self) -> bool {
        self.signal.lock().stop
    }

    fn run(&self) {
        let mut backoff = self.config.initial_backoff;
        let mut retry_at = None;
        while self.wait_for_work(retry_at) {
            retry_at = None;
            loop {
                match self.replay_batch() {
                    Ok(true) => backoff = self.config.initial_backoff,
                    Ok(false) => break,
                    Err(e) => {
                        self.metrics.record_retry();
                        selflog::report(
                            &self.name,
                            format_args!("replay failed, retrying in {:?}: {}", backoff, e),
                        );
                        retry_at = Some(Instant::now() + backoff);
                        backoff = (backoff * 2).min(self.config.max_backoff);
                        break;
                    }
                }
                if self.stopping() {
                    return;
                }
            }
        }
    }
}

/// Sink wrapper that spools to disk while the inner sink is failing
pub struct DurableSink {
    shared: Arc<Shared>,
    recovery: RecoveryReport,
    flusher: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl DurableSink {
    /// Wrap `inner` with default settings and a spool in `spool_dir`
    pub fn new(inner: Arc<dyn Sink>, spool_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(inner, DurableSinkConfig::new(spool_dir.as_ref()))
    }

    pub fn builder(inner: Arc<dyn Sink>, spool_dir: impl AsRef<Path>) -> DurableSinkBuilder {
        DurableSinkBuilder {
            inner,
            config: DurableSinkConfig::new(spool_dir.as_ref()),
        }
    }

    /// Open the spool, recover what is on disk and start the flusher
    ///
    /// Fails if the configuration is invalid, the directory cannot be
    /// created, or another process holds the spool lock.
    pub fn with_config(inner: Arc<dyn Sink>, config: DurableSinkConfig) -> Result<Self> {
        config.validate()?;
        let name = format!("durable({})", inner.name());
        let (spool, recovery) =
            Spool::open(&config.spool_dir, config.segment_size, config.max_spool_bytes)?;

        for problem in &recovery.problems {
            selflog::report(&name, format_args!("spool recovery: {}", problem));
        }

        let metrics = DurableSinkMetrics::new();
        metrics.set_backlog(recovery.records);
        let shared = Arc::new(Shared {
            name,
            inner,
            spool,
            config,
            metrics,
            healthy: AtomicBool::new(true),
            signal: Mutex::new(Signal {
                pending: recovery.records > 0,
                stop: false,
            }),
            wake: Condvar::new(),
        });

        let worker = Arc::clone(&shared);
        let flusher = thread::Builder::new()
            .name("durable-flusher".to_string())
            .spawn(move || worker.run())
            .map_err(|e| LoggerError::io_operation("spawning spool flusher", shared.name.clone(), e))?;

        Ok(Self {
            shared,
            recovery,
            flusher: Mutex::new(Some(flusher)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn metrics(&self) -> &DurableSinkMetrics {
        &self.shared.metrics
    }

    pub fn config(&self) -> &DurableSinkConfig {
        &self.shared.config
    }

    /// What was found in the spool directory at startup
    pub fn recovery(&self) -> &RecoveryReport {
        &self.recovery
    }

    /// `false` from the first failed delivery until a replay succeeds
    pub fn is_healthy(&self) -> bool {
        self.shared.healthy.load(Ordering::Acquire)
    }

    /// Events waiting in the spool
    pub fn backlog(&self) -> u64 {
        self.shared.spool.backlog()
    }

    pub fn spool_dir(&self) -> &Path {
        self.shared.spool.dir()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Wait until the spool is empty; returns `false` on timeout
    pub fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.backlog() == 0 {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            self.shared.notify();
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn join_flusher(&self, until: Instant) -> bool {
        let Some(handle) = self.flusher.lock().take() else {
            return true;
        };
        loop {
            if handle.is_finished() {
                if let Err(payload) = handle.join() {
                    selflog::report(
                        &self.shared.name,
                        format_args!(
                            "flusher panicked: {}",
                            selflog::panic_message(payload.as_ref())
                        ),
                    );
                }
                return true;
            }
            if Instant::now() >= until {
                selflog::report(
                    &self.shared.name,
                    format_args!("flusher did not stop before the shutdown deadline"),
                );
                return false;
            }
            thread::sleep(POLL_INTERVAL);
        }
    }
}

impl Sink for DurableSink {
    fn emit(&self, event: &Arc<LogEvent>) -> Result<()> {
        if self.is_closed() {
            return Err(LoggerError::sink_closed(&self.shared.name));
        }
        let shared = &self.shared;
        if shared.spool.backlog() == 0 {
            match shared.deliver(event) {
                Ok(()) => {
                    shared.metrics.record_delivered_direct();
                    return Ok(());
                }
                Err(e) => shared.mark_unhealthy(&e),
            }
        }
        shared.spool_event(event)
    }

    fn flush(&self) -> Result<()> {
        self.shared.spool.sync()?;
        self.shared.notify();
        self.shared.inner.flush()
    }

    /// Stop the flusher, attempt a last replay within `deadline`, and
    /// close the inner sink; anything undelivered stays on disk
    fn close(&self, deadline: Duration) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let until = Instant::now() + deadline;
        let shared = &self.shared;

        shared.signal.lock().stop = true;
        shared.wake.notify_all();

        if self.join_flusher(until) {
            while Instant::now() < until {
                match shared.replay_batch() {
                    Ok(true) => {}
                    Ok(false) | Err(_) => break,
                }
            }
        }

        if let Err(e) = shared.spool.sync() {
            selflog::report(&shared.name, format_args!("final spool sync failed: {}", e));
        }
        let backlog = shared.spool.backlog();
        if backlog > 0 {
            selflog::report(
                &shared.name,
                format_args!(
                    "{} events remain spooled in {}",
                    backlog,
                    shared.spool.dir().display()
                ),
            );
        }

        shared.inner.close(until.saturating_duration_since(Instant::now()))
    }

    fn name(&self) -> &str {
        &self.shared.name
    }
}

impl Drop for DurableSink {
    fn drop(&mut self) {
        let _ = self.close(self.shared.config.shutdown_timeout);
    }
}
