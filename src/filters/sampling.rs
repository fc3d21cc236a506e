//! Event sampling for high-volume paths
//!
//! Every mode except [`SamplingMode::Probabilistic`] is a pure function of the
//! per-key arrival sequence, so the same sequence of events always yields the
//! same decisions. Levels listed in `always_sample` (by default `Error` and
//! `Fatal`) bypass sampling entirely.
//!
//! Per-key counters are capped at `max_keys`; events for keys beyond the cap
//! share one overflow counter.
//!
//! # Example
//!
//! ```
//! use rust_structured_logger::prelude::*;
//! use std::sync::Arc;
//!
//! let memory = Arc::new(MemorySink::new());
//! let logger = Logger::builder()
//!     .filter(SamplingFilter::every_nth(10))
//!     .shared_sink(memory.clone())
//!     .build();
//!
//! for i in 0..100 {
//!     logger.info("Polled {Iteration}", &[&i]);
//! }
//! assert_eq!(memory.len(), 10);
//! ```

use super::rate_limit::DEFAULT_MAX_KEYS;
use super::{Filter, FilterKey};
use crate::core::log_level::LogLevel;
use crate::core::pipeline::EventView;
use crate::core::selflog;
use dashmap::DashMap;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;
const HASH_BUCKETS: u64 = 10_000;

/// FNV-1a over the key bytes
pub(crate) fn fnv1a(key: &str) -> u64 {
    key.bytes()
        .fold(FNV_OFFSET, |hash, byte| (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME))
}

/// Sampling strategy
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SamplingMode {
    /// Accept the 1st, (n+1)th, (2n+1)th, ... event per key
    EveryNth(u64),
    /// Accept the first `n` events per key
    FirstN(u64),
    /// Accept a stable `rate` fraction of keys
    Hash { rate: f64 },
    /// Accept each event with probability `rate`
    Probabilistic { rate: f64, seed: u64 },
    /// Accept the 1st, factor-th, factor²-th, ... event per key
    Backoff { factor: u64 },
}

/// Metrics for sampling observability
///
/// # Example
///
/// ```
/// use rust_structured_logger::SamplerMetrics;
///
/// let metrics = SamplerMetrics::new();
/// assert_eq!(metrics.sampled_count(), 0);
/// assert_eq!(metrics.effective_sample_rate(), 1.0);
/// ```
#[derive(Debug)]
pub struct SamplerMetrics {
    sampled_count: AtomicU64,
    dropped_count: AtomicU64,
    total_count: AtomicU64,
}

impl SamplerMetrics {
    pub const fn new() -> Self {
        Self {
            sampled_count: AtomicU64::new(0),
            dropped_count: AtomicU64::new(0),
            total_count: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn sampled_count(&self) -> u64 {
        self.sampled_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dropped_count(&self) -> u64 {
        self.dropped_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn total_count(&self) -> u64 {
        self.total_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn record_sampled(&self) {
        self.sampled_count.fetch_add(1, Ordering::Relaxed);
        self.total_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_dropped(&self) {
        self.dropped_count.fetch_add(1, Ordering::Relaxed);
        self.total_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Fraction of events accepted so far
    ///
    /// Returns 1.0 if nothing has been seen yet.
    pub fn effective_sample_rate(&self) -> f64 {
        let total = self.total_count();
        if total == 0 {
            1.0
        } else {
            self.sampled_count() as f64 / total as f64
        }
    }

    pub fn reset(&self) {
        self.sampled_count.store(0, Ordering::Relaxed);
        self.dropped_count.store(0, Ordering::Relaxed);
        self.total_count.store(0, Ordering::Relaxed);
    }
}

impl Default for SamplerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for SamplerMetrics {
    fn clone(&self) -> Self {
        Self {
            sampled_count: AtomicU64::new(self.sampled_count()),
            dropped_count: AtomicU64::new(self.dropped_count()),
            total_count: AtomicU64::new(self.total_count()),
        }
    }
}

/// Filter that keeps a sample of events
pub struct SamplingFilter {
    mode: SamplingMode,
    key: FilterKey,
    always_sample: Vec<LogLevel>,
    counters: DashMap<String, AtomicU64>,
    max_keys: usize,
    overflow: AtomicU64,
    overflow_reported: AtomicBool,
    rng: Mutex<StdRng>,
    metrics: SamplerMetrics,
}

impl SamplingFilter {
    pub fn new(mode: SamplingMode) -> Self {
        let seed = match mode {
            SamplingMode::Probabilistic { seed, .. } => seed,
            _ => 0,
        };
        Self {
            mode,
            key: FilterKey::default(),
            always_sample: vec![LogLevel::Error, LogLevel::Fatal],
            counters: DashMap::new(),
            max_keys: DEFAULT_MAX_KEYS,
            overflow: AtomicU64::new(0),
            overflow_reported: AtomicBool::new(false),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            metrics: SamplerMetrics::new(),
        }
    }

    /// Keep one event in `n` per key; `n == 0` behaves like 1
    pub fn every_nth(n: u64) -> Self {
        Self::new(SamplingMode::EveryNth(n.max(1)))
    }

    pub fn first_n(n: u64) -> Self {
        Self::new(SamplingMode::FirstN(n))
    }

    /// Keep events whose `property` hashes into the lowest `rate` fraction
    pub fn hash(property: impl Into<String>, rate: f64) -> Self {
        Self::new(SamplingMode::Hash {
            rate: rate.clamp(0.0, 1.0),
        })
        .with_key(FilterKey::Property(property.into()))
    }

    pub fn probabilistic(rate: f64, seed: u64) -> Self {
        Self::new(SamplingMode::Probabilistic {
            rate: rate.clamp(0.0, 1.0),
            seed,
        })
    }

    /// Keep exponentially sparser occurrences; `factor < 2` behaves like 2
    pub fn backoff(factor: u64) -> Self {
        Self::new(SamplingMode::Backoff {
            factor: factor.max(2),
        })
    }

    #[must_use = "builder methods return a new value"]
    pub fn with_key(mut self, key: FilterKey) -> Self {
        self.key = key;
        self
    }

    /// Levels that are never sampled out
    #[must_use = "builder methods return a new value"]
    pub fn with_always_sample(mut self, levels: Vec<LogLevel>) -> Self {
        self.always_sample = levels;
        self
    }

    /// Bound on distinct per-key counters; later keys share one counter
    #[must_use = "builder methods return a new value"]
    pub fn with_max_keys(mut self, max_keys: usize) -> Self {
        self.max_keys = max_keys.max(1);
        self
    }

    /// Number of keys with their own counter
    pub fn tracked_keys(&self) -> usize {
        self.counters.len()
    }

    pub fn mode(&self) -> SamplingMode {
        self.mode
    }

    pub fn metrics(&self) -> &SamplerMetrics {
        &self.metrics
    }

    /// Zero-based arrival index of this event within its key
    fn next_occurrence(&self, key: &str) -> u64 {
        if let Some(counter) = self.counters.get(key) {
            return counter.fetch_add(1, Ordering::Relaxed);
        }
        if self.counters.len() >= self.max_keys {
            if !self.overflow_reported.swap(true, Ordering::Relaxed) {
                selflog::report(
                    "sampling",
                    format_args!(
                        "tracking {} keys, further keys share one counter",
                        self.max_keys
                    ),
                );
            }
            return self.overflow.fetch_add(1, Ordering::Relaxed);
        }
        self.counters
            .entry(key.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
    }

    fn decide(&self, key: &str) -> bool {
        match self.mode {
            SamplingMode::EveryNth(n) => self.next_occurrence(key) % n == 0,
            SamplingMode::FirstN(n) => self.next_occurrence(key) < n,
            SamplingMode::Hash { rate } => {
                (fnv1a(key) % HASH_BUCKETS) < (rate * HASH_BUCKETS as f64) as u64
            }
            SamplingMode::Probabilistic { rate, .. } if rate >= 1.0 => true,
            SamplingMode::Probabilistic { rate, .. } => self.rng.lock().gen::<f64>() < rate,
            SamplingMode::Backoff { factor } => is_power_of(self.next_occurrence(key) + 1, factor),
        }
    }
}

/// Whether `n` is `factor^k` for some k >= 0
fn is_power_of(mut n: u64, factor: u64) -> bool {
    while n > 1 && n % factor == 0 {
        n /= factor;
    }
    n == 1
}

impl Filter for SamplingFilter {
    fn is_enabled(&self, event: &EventView<'_>) -> bool {
        if self.always_sample.contains(&event.level()) {
            self.metrics.record_sampled();
            return true;
        }

        let key = self.key.extract(event);
        let sample = self.decide(&key);
        if sample {
            self.metrics.record_sampled();
        } else {
            self.metrics.record_dropped();
        }
        sample
    }
}

impl std::fmt::Debug for SamplingFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SamplingFilter")
            .field("mode", &self.mode)
            .field("key", &self.key)
            .field("always_sample", &self.always_sample)
            .field("metrics", &self.metrics)
            .finish()
    }
}
