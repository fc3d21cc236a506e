//! Circuit breaker around a failing sink
//!
//! [`CircuitBreakerSink`] stops calling an inner sink that keeps failing.
//! The circuit starts `Closed`. After `failure_threshold` consecutive
//! failures it opens, and events go to the fallback sink (or are refused
//! with `CircuitOpen`) without touching the inner sink. Once
//! `reset_timeout` has passed since the last failure the next event is let
//! through in `HalfOpen`; `success_threshold` successes close the circuit
//! again and any failure reopens it. A panic in the inner sink counts as a
//! failure.

use super::Sink;
use crate::core::error::{LoggerError, Result};
use crate::core::log_event::LogEvent;
use crate::core::selflog;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_SUCCESS_THRESHOLD: u32 = 2;
pub const DEFAULT_RESET_TIMEOUT: Duration = Duration::from_secs(30);

/// Called with `(from, to)` on every transition
pub type StateChangeCallback = Arc<dyn Fn(CircuitState, CircuitState) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        })
    }
}

/// Point-in-time view of a [`CircuitBreakerSink`]
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerStats {
    pub state: CircuitState,
    /// Consecutive failures in the current state
    pub failures: u32,
    /// Consecutive successes in the current state
    pub successes: u32,
    pub last_failure: Option<DateTime<Utc>>,
    /// Events not offered to the inner sink because the circuit was open
    pub short_circuited: u64,
}

struct Breaker {
    state: CircuitState,
    failures: u32,
    successes: u32,
    last_failure: Option<Instant>,
    last_failure_at: Option<DateTime<Utc>>,
}

/// Builder for [`CircuitBreakerSink`]
///
/// # Example
///
/// ```
/// use rust_structured_logger::prelude::*;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let primary = Arc::new(MemorySink::new());
/// let fallback = Arc::new(MemorySink::new());
/// let sink = CircuitBreakerSink::builder(primary.clone())
///     .failure_threshold(3)
///     .reset_timeout(Duration::from_secs(10))
///     .fallback(fallback.clone())
///     .build();
///
/// let logger = Logger::builder().sink(sink).build();
/// logger.info("Shipped {OrderId}", &[&7]);
/// assert_eq!(primary.len(), 1);
/// ```
pub struct CircuitBreakerBuilder {
    inner: Arc<dyn Sink>,
    fallback: Option<Arc<dyn Sink>>,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
    on_state_change: Option<StateChangeCallback>,
    name: Option<String>,
}

impl CircuitBreakerBuilder {
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn success_threshold(mut self, threshold: u32) -> Self {
        self.success_threshold = threshold.max(1);
        self
    }

    #[must_use]
    pub fn reset_timeout(mut self, timeout: Duration) -> Self {
        self.reset_timeout = timeout;
        self
    }

    /// Sink receiving events while the circuit is open
    #[must_use]
    pub fn fallback(mut self, sink: Arc<dyn Sink>) -> Self {
        self.fallback = Some(sink);
        self
    }

    #[must_use]
    pub fn on_state_change(mut self, callback: StateChangeCallback) -> Self {
        self.on_state_change = Some(callback);
        self
    }

    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn build(self) -> CircuitBreakerSink {
        let name = self
            .name
            .unwrap_or_else(|| format!("circuit-breaker({})", self.inner.name()));
        CircuitBreakerSink {
            inner: self.inner,
            fallback: self.fallback,
            failure_threshold: self.failure_threshold,
            success_threshold: self.success_threshold,
            reset_timeout: self.reset_timeout,
            on_state_change: self.on_state_change,
            name,
            breaker: Mutex::new(Breaker {
                state: CircuitState::Closed,
                failures: 0,
                successes: 0,
                last_failure: None,
                last_failure_at: None,
            }),
            short_circuited: AtomicU64::new(0),
        }
    }
}

/// Sink wrapper that isolates a failing backend
pub struct CircuitBreakerSink {
    inner: Arc<dyn Sink>,
    fallback: Option<Arc<dyn Sink>>,
    failure_threshold: u32,
    success_threshold: u32,
    reset_timeout: Duration,
    on_state_change: Option<StateChangeCallback>,
    name: String,
    breaker: Mutex<Breaker>,
    short_circuited: AtomicU64,
}

impl CircuitBreakerSink {
    pub fn new(inner: Arc<dyn Sink>) -> Self {
        Self::builder(inner).build()
    }

    pub fn builder(inner: Arc<dyn Sink>) -> CircuitBreakerBuilder {
        CircuitBreakerBuilder {
            inner,
            fallback: None,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            success_threshold: DEFAULT_SUCCESS_THRESHOLD,
            reset_timeout: DEFAULT_RESET_TIMEOUT,
            on_state_change: None,
            name: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.breaker.lock().state
    }

    pub fn stats(&self) -> CircuitBreakerStats {
        let breaker = self.breaker.lock();
        CircuitBreakerStats {
            state: breaker.state,
            failures: breaker.failures,
            successes: breaker.successes,
            last_failure: breaker.last_failure_at,
            short_circuited: self.short_circuited.load(Ordering::Relaxed),
        }
    }

    /// Force the circuit closed
    pub fn reset(&self) {
        let changed = {
            let mut breaker = self.breaker.lock();
            Self::transition(&mut breaker, CircuitState::Closed)
        };
        self.announce(changed);
    }

    /// Whether the inner sink may be called now
    fn admit(&self) -> bool {
        let (admitted, changed) = {
            let mut breaker = self.breaker.lock();
            match breaker.state {
                CircuitState::Closed | CircuitState::HalfOpen => (true, None),
                CircuitState::Open => {
                    let cooled = breaker
                        .last_failure
                        .map_or(true, |at| at.elapsed() >= self.reset_timeout);
                    if cooled {
                        (true, Self::transition(&mut breaker, CircuitState::HalfOpen))
                    } else {
                        (false, None)
                    }
                }
            }
        };
        self.announce(changed);
        admitted
    }

    fn record_success(&self) {
        let changed = {
            let mut breaker = self.breaker.lock();
            match breaker.state {
                CircuitState::Closed => {
                    breaker.failures = 0;
                    None
                }
                CircuitState::HalfOpen => {
                    breaker.successes += 1;
                    if breaker.successes >= self.success_threshold {
                        Self::transition(&mut breaker, CircuitState::Closed)
                    } else {
                        None
                    }
                }
                CircuitState::Open => None,
            }
        };
        self.announce(changed);
    }

    fn record_failure(&self) {
        let changed = {
            let mut breaker = self.breaker.lock();
            breaker.last_failure = Some(Instant::now());
            breaker.last_failure_at = Some(Utc::now());
            match breaker.state {
                CircuitState::Closed => {
                    breaker.failures += 1;
                    if breaker.failures >= self.failure_threshold {
                        Self::transition(&mut breaker, CircuitState::Open)
                    } else {
                        None
                    }
                }
                CircuitState::HalfOpen => Self::transition(&mut breaker, CircuitState::Open),
                CircuitState::Open => None,
            }
        };
        self.announce(changed);
    }

    /// Move to `to`, resetting counters; returns the change if there was one
    fn transition(breaker: &mut Breaker, to: CircuitState) -> Option<(CircuitState, CircuitState)> {
        let from = breaker.state;
        if from == to {
            return None;
        }
        breaker.state = to;
        breaker.failures = 0;
        breaker.successes = 0;
        Some((from, to))
    }

    /// Report a transition outside the lock
    fn announce(&self, changed: Option<(CircuitState, CircuitState)>) {
        let Some((from, to)) = changed else {
            return;
        };
        selflog::report(&self.name, format_args!("circuit {} -> {}", from, to));
        if let Some(callback) = &self.on_state_change {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(from, to))) {
                selflog::report(
                    &self.name,
                    format_args!(
                        "state change callback panicked: {}",
                        selflog::panic_message(payload.as_ref())
                    ),
                );
            }
        }
    }

    fn short_circuit(&self, event: &Arc<LogEvent>) -> Result<()> {
        self.short_circuited.fetch_add(1, Ordering::Relaxed);
        match &self.fallback {
            Some(fallback) => fallback.emit(event),
            None => Err(LoggerError::circuit_open(&self.name)),
        }
    }
}

impl Sink for CircuitBreakerSink {
    fn emit(&self, event: &Arc<LogEvent>) -> Result<()> {
        if !self.admit() {
            return self.short_circuit(event);
        }

        let inner = &self.inner;
        match panic::catch_unwind(AssertUnwindSafe(|| inner.emit(event))) {
            Ok(Ok(())) => {
                self.record_success();
                Ok(())
            }
            Ok(Err(e)) => {
                self.record_failure();
                Err(e)
            }
            Err(payload) => {
                self.record_failure();
                Err(LoggerError::sink(
                    inner.name(),
                    format!("panicked: {}", selflog::panic_message(payload.as_ref())),
                ))
            }
        }
    }

    fn flush(&self) -> Result<()> {
        if let Some(fallback) = &self.fallback {
            fallback.flush()?;
        }
        self.inner.flush()
    }

    fn close(&self, deadline: Duration) -> Result<()> {
        let started = Instant::now();
        let inner = self.inner.close(deadline);
        if let Some(fallback) = &self.fallback {
            fallback.close(deadline.saturating_sub(started.elapsed()))?;
        }
        inner
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CircuitBreakerSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerSink")
            .field("name", &self.name)
            .field("failure_threshold", &self.failure_threshold)
            .field("success_threshold", &self.success_threshold)
            .field("reset_timeout", &self.reset_timeout)
            .field("stats", &self.stats())
            .finish()
    }
}
