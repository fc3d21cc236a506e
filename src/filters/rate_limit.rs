//! Fixed-window rate limiting
//!
//! Each key gets `max_events` accepted events per window. Windows are
//! aligned to the filter's creation instant; when an event falls into a
//! later window the key's count starts over.
//!
//! Key state is bounded: the first event of every new window sweeps out
//! keys whose window has passed, and once `max_keys` keys are tracked any
//! further key shares a single overflow window.

use super::{Filter, FilterKey};
use crate::core::pipeline::EventView;
use crate::core::selflog;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Default bound on distinct keys tracked by [`RateLimitFilter`]
pub const DEFAULT_MAX_KEYS: usize = 10_000;

/// Grouping used by [`RateLimitFilter`]
pub type RateLimitKey = FilterKey;

struct Window {
    index: AtomicU64,
    count: AtomicU64,
}

/// Accepts at most `max_events` per key per window
///
/// # Example
///
/// ```
/// use rust_structured_logger::prelude::*;
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let memory = Arc::new(MemorySink::new());
/// let logger = Logger::builder()
///     .filter(RateLimitFilter::new(2, Duration::from_secs(60)))
///     .shared_sink(memory.clone())
///     .build();
///
/// for attempt in 0..10 {
///     logger.warn("Retrying {Attempt}", &[&attempt]);
/// }
/// assert_eq!(memory.len(), 2);
/// ```
pub struct RateLimitFilter {
    max_events: u64,
    window: Duration,
    key: RateLimitKey,
    origin: Instant,
    windows: DashMap<String, Window>,
    max_keys: usize,
    overflow: Window,
    overflow_reported: AtomicBool,
    last_sweep: AtomicU64,
    passed: AtomicU64,
    rejected: AtomicU64,
}

impl Window {
    fn new(index: u64) -> Self {
        Self {
            index: AtomicU64::new(index),
            count: AtomicU64::new(0),
        }
    }
}

impl RateLimitFilter {
    pub fn new(max_events: u64, window: Duration) -> Self {
        Self {
            max_events,
            window: window.max(Duration::from_millis(1)),
            key: RateLimitKey::default(),
            origin: Instant::now(),
            windows: DashMap::new(),
            max_keys: DEFAULT_MAX_KEYS,
            overflow: Window::new(0),
            overflow_reported: AtomicBool::new(false),
            last_sweep: AtomicU64::new(0),
            passed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    #[must_use = "builder methods return a new value"]
    pub fn with_key(mut self, key: RateLimitKey) -> Self {
        self.key = key;
        self
    }

    /// Bound on distinct keys; later keys share one overflow window
    #[must_use = "builder methods return a new value"]
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(1);
        self
    }

    pub fn passed(&self) -> u64 {
        self.passed.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Number of distinct keys currently tracked
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Drop keys whose window has passed, returning how many were removed
    pub fn sweep(&self) -> usize {
        self.sweep_before(self.current_window())
    }

    fn sweep_before(&self, now: u64) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| window.index.load(Ordering::Acquire) >= now);
        before.saturating_sub(self.windows.len())
    }

    /// Sweep once per window transition; must run before any map guard is held
    fn maybe_sweep(&self, now: u64) {
        let last = self.last_sweep.load(Ordering::Acquire);
        if last < now
            && self
                .last_sweep
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            self.sweep_before(now);
        }
    }

    fn current_window(&self) -> u64 {
        let elapsed = self.origin.elapsed().as_nanos();
        u64::try_from(elapsed / self.window.as_nanos()).unwrap_or(u64::MAX)
    }

    fn admit(&self, key: &str) -> bool {
        let now = self.current_window();
        self.maybe_sweep(now);
        let count = match self.windows.get(key) {
            Some(window) => Self::advance(&window, now),
            None if self.windows.len() >= self.max_keys => {
                if !self.overflow_reported.swap(true, Ordering::Relaxed) {
                    selflog::report(
                        "rate-limit",
                        format_args!(
                            "tracking {} keys, further keys share one window",
                            self.max_keys
                        ),
                    );
                }
                Self::advance(&self.overflow, now)
            }
            None => {
                let window = self
                    .windows
                    .entry(key.to_string())
                    .or_insert_with(|| Window::new(now));
                Self::advance(&window, now)
            }
        };
        count < self.max_events
    }

    /// Count one event against `window`, returning the prior count
    fn advance(window: &Window, now: u64) -> u64 {
        let seen = window.index.load(Ordering::Acquire);
        if seen < now
            && window
                .index
                .compare_exchange(seen, now, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            window.count.store(0, Ordering::Release);
        }
        window.count.fetch_add(1, Ordering::AcqRel)
    }
}

impl Filter for RateLimitFilter {
    fn is_enabled(&self, event: &EventView<'_>) -> bool {
        let key = self.key.extract(event);
        if self.admit(&key) {
            self.passed.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            false
        }
    }
}
