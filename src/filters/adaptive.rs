//! Target-rate sampling
//!
//! [`AdaptiveSamplingFilter`] keeps the number of events that pass close to a
//! target per second. Every `adjustment_interval` the observed output rate is
//! smoothed exponentially and compared with the target; outside the
//! hysteresis band the sampling rate moves toward the target, scaled by
//! `aggressiveness`, damped by `dampening` (halved again when the last three
//! adjustments alternate in direction), capped at ±50% per step and clamped
//! to `[min_rate, max_rate]`.
//!
//! # Example
//!
//! ```
//! use rust_structured_logger::prelude::*;
//! use std::sync::Arc;
//!
//! let filter = Arc::new(AdaptiveSamplingFilter::with_preset(100, DampeningPreset::Responsive));
//! let memory = Arc::new(MemorySink::new());
//! let logger = Logger::builder()
//!     .shared_filter(filter.clone())
//!     .shared_sink(memory.clone())
//!     .build();
//!
//! for i in 0..1000 {
//!     logger.info("Tick {Index}", &[&i]);
//! }
//! assert!(memory.len() < 1000);
//! assert!(filter.current_rate() <= 1.0);
//! ```

use super::sampling::{fnv1a, SamplerMetrics};
use super::Filter;
use crate::core::log_level::LogLevel;
use crate::core::pipeline::EventView;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const RATE_SCALE: f64 = 1_000_000.0;
const SMOOTHING: f64 = 0.7;
const MAX_STEP: f64 = 0.5;

/// Tuning bundles for how quickly the rate reacts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DampeningPreset {
    Conservative,
    Moderate,
    Aggressive,
    UltraStable,
    Responsive,
}

impl DampeningPreset {
    pub const ALL: [DampeningPreset; 5] = [
        DampeningPreset::Conservative,
        DampeningPreset::Moderate,
        DampeningPreset::Aggressive,
        DampeningPreset::UltraStable,
        DampeningPreset::Responsive,
    ];

    /// `(hysteresis, aggressiveness, dampening, adjustment_interval)`
    fn parameters(self) -> (f64, f64, f64, Duration) {
        match self {
            DampeningPreset::Conservative => (0.25, 0.15, 0.5, Duration::from_secs(3)),
            DampeningPreset::Moderate => (0.15, 0.3, 0.7, Duration::from_secs(1)),
            DampeningPreset::Aggressive => (0.08, 0.6, 0.85, Duration::from_millis(500)),
            DampeningPreset::UltraStable => (0.4, 0.05, 0.3, Duration::from_secs(5)),
            DampeningPreset::Responsive => (0.05, 0.8, 0.95, Duration::from_millis(200)),
        }
    }
}

/// Parameters of an [`AdaptiveSamplingFilter`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveConfig {
    pub target_events_per_second: u64,
    pub min_rate: f64,
    pub max_rate: f64,
    pub adjustment_interval: Duration,
    /// Relative deviation from the target tolerated without adjusting
    pub hysteresis: f64,
    pub aggressiveness: f64,
    pub dampening: f64,
}

impl AdaptiveConfig {
    pub fn new(target_events_per_second: u64) -> Self {
        Self::with_preset(target_events_per_second, DampeningPreset::Moderate)
    }

    pub fn with_preset(target_events_per_second: u64, preset: DampeningPreset) -> Self {
        let (hysteresis, aggressiveness, dampening, adjustment_interval) = preset.parameters();
        Self {
            target_events_per_second: target_events_per_second.max(1),
            min_rate: 0.001,
            max_rate: 1.0,
            adjustment_interval,
            hysteresis,
            aggressiveness,
            dampening,
        }
    }

    #[must_use = "builder methods return a new value"]
    pub fn rate_bounds(mut self, min_rate: f64, max_rate: f64) -> Self {
        let min_rate = min_rate.clamp(0.0, 1.0);
        self.min_rate = min_rate;
        self.max_rate = max_rate.clamp(min_rate, 1.0);
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn adjustment_interval(mut self, interval: Duration) -> Self {
        self.adjustment_interval = interval.max(Duration::from_millis(1));
        self
    }
}

/// Point-in-time view of an adaptive sampler
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdaptiveStats {
    pub current_rate: f64,
    pub target_events_per_second: u64,
    pub smoothed_events_per_second: f64,
    pub adjustments: u64,
}

#[derive(Debug, Default)]
struct Tuning {
    smoothed: f64,
    history: [f64; 3],
    next: usize,
}

/// Sampler that steers toward a target number of events per second
pub struct AdaptiveSamplingFilter {
    config: AdaptiveConfig,
    always_sample: Vec<LogLevel>,
    origin: Instant,
    /// Sampling rate scaled by 10^6
    rate: AtomicU64,
    last_adjustment: AtomicU64,
    passed_in_interval: AtomicU64,
    arrivals: AtomicU64,
    adjustments: AtomicU64,
    tuning: Mutex<Tuning>,
    metrics: SamplerMetrics,
}

impl AdaptiveSamplingFilter {
    pub fn new(target_events_per_second: u64) -> Self {
        Self::with_config(AdaptiveConfig::new(target_events_per_second))
    }

    pub fn with_preset(target_events_per_second: u64, preset: DampeningPreset) -> Self {
        Self::with_config(AdaptiveConfig::with_preset(target_events_per_second, preset))
    }

    pub fn with_config(config: AdaptiveConfig) -> Self {
        let initial = (config.min_rate + config.max_rate) / 2.0;
        Self {
            config,
            always_sample: vec![LogLevel::Error, LogLevel::Fatal],
            origin: Instant::now(),
            rate: AtomicU64::new((initial * RATE_SCALE) as u64),
            last_adjustment: AtomicU64::new(0),
            passed_in_interval: AtomicU64::new(0),
            arrivals: AtomicU64::new(0),
            adjustments: AtomicU64::new(0),
            tuning: Mutex::new(Tuning::default()),
            metrics: SamplerMetrics::new(),
        }
    }

    /// Levels that are never sampled out
    #[must_use = "builder methods return a new value"]
    pub fn with_always_sample(mut self, levels: Vec<LogLevel>) -> Self {
        self.always_sample = levels;
        self
    }

    pub fn config(&self) -> &AdaptiveConfig {
        &self.config
    }

    pub fn current_rate(&self) -> f64 {
        self.rate.load(Ordering::Relaxed) as f64 / RATE_SCALE
    }

    pub fn metrics(&self) -> &SamplerMetrics {
        &self.metrics
    }

    pub fn stats(&self) -> AdaptiveStats {
        AdaptiveStats {
            current_rate: self.current_rate(),
            target_events_per_second: self.config.target_events_per_second,
            smoothed_events_per_second: self.tuning.lock().smoothed,
            adjustments: self.adjustments.load(Ordering::Relaxed),
        }
    }

    /// Return to the initial rate and forget the observed history
    pub fn reset(&self) {
        let initial = (self.config.min_rate + self.config.max_rate) / 2.0;
        self.store_rate(initial);
        *self.tuning.lock() = Tuning::default();
        self.passed_in_interval.store(0, Ordering::Relaxed);
        self.adjustments.store(0, Ordering::Relaxed);
        self.metrics.reset();
    }

    fn store_rate(&self, rate: f64) {
        self.rate.store((rate * RATE_SCALE) as u64, Ordering::Relaxed);
    }

    fn elapsed_nanos(&self) -> u64 {
        u64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }

    /// Adjust at most once per interval; the CAS winner does the work
    fn maybe_adjust(&self) {
        let now = self.elapsed_nanos();
        let last = self.last_adjustment.load(Ordering::Acquire);
        let interval = u64::try_from(self.config.adjustment_interval.as_nanos()).unwrap_or(u64::MAX);
        if now.saturating_sub(last) < interval
            || self
                .last_adjustment
                .compare_exchange(last, now, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
        {
            return;
        }
        let passed = self.passed_in_interval.swap(0, Ordering::AcqRel);
        let elapsed = Duration::from_nanos(now - last).as_secs_f64();
        self.adjust(passed, elapsed);
    }

    /// Feed one interval's observation into the controller
    fn adjust(&self, passed: u64, elapsed_secs: f64) {
        if elapsed_secs <= 0.0 {
            return;
        }
        let config = &self.config;
        let mut tuning = self.tuning.lock();

        let observed = passed as f64 / elapsed_secs;
        let smoothed = tuning.smoothed * SMOOTHING + observed * (1.0 - SMOOTHING);
        tuning.smoothed = smoothed;

        let target = config.target_events_per_second as f64;
        if ((smoothed - target) / target).abs() < config.hysteresis {
            return;
        }

        let rate = self.current_rate();
        let factor = if smoothed > 0.0 { target / smoothed } else { 2.0 };
        let change = rate * config.aggressiveness * (factor - 1.0);

        let slot = tuning.next;
        tuning.history[slot] = change;
        tuning.next = (slot + 1) % tuning.history.len();
        let [a, b, c] = tuning.history;
        let oscillating =
            a != 0.0 && b != 0.0 && c != 0.0 && (a > 0.0) != (b > 0.0) && (b > 0.0) != (c > 0.0);
        let dampening = if oscillating {
            config.dampening * 0.5
        } else {
            config.dampening
        };

        let step = (change * dampening).clamp(-rate * MAX_STEP, rate * MAX_STEP);
        let next = (rate + step).clamp(config.min_rate, config.max_rate);
        self.store_rate(next);
        self.adjustments.fetch_add(1, Ordering::Relaxed);
    }

    /// Spread decisions evenly by hashing the template with the arrival index
    fn decide(&self, template: &str) -> bool {
        let arrival = self.arrivals.fetch_add(1, Ordering::Relaxed);
        let mut x = fnv1a(template) ^ arrival.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        x = (x ^ (x >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
        x = (x ^ (x >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
        x ^= x >> 31;
        let threshold = (f64::from(u32::MAX) * self.current_rate()) as u64;
        (x >> 32) <= threshold
    }
}

impl Filter for AdaptiveSamplingFilter {
    fn is_enabled(&self, event: &EventView<'_>) -> bool {
        self.maybe_adjust();

        let sample = self.always_sample.contains(&event.level())
            || self.decide(event.message_template());
        if sample {
            self.passed_in_interval.fetch_add(1, Ordering::Relaxed);
            self.metrics.record_sampled();
        } else {
            self.metrics.record_dropped();
        }
        sample
    }
}

impl std::fmt::Debug for AdaptiveSamplingFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveSamplingFilter")
            .field("config", &self.config)
            .field("current_rate", &self.current_rate())
            .field("metrics", &self.metrics)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::logger::Logger;
    use crate::sinks::MemorySink;
    use std::sync::Arc;

    fn stable(target: u64) -> AdaptiveSamplingFilter {
        AdaptiveSamplingFilter::with_config(
            AdaptiveConfig::new(target).adjustment_interval(Duration::from_secs(3600)),
        )
    }

    #[test]
    fn test_initial_rate_is_midpoint() {
        let filter = stable(100);
        assert!((filter.current_rate() - 0.5005).abs() < 1e-6);

        let bounded = AdaptiveSamplingFilter::with_config(
            AdaptiveConfig::new(100).rate_bounds(0.2, 0.6),
        );
        assert!((bounded.current_rate() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_over_target_lowers_rate() {
        let filter = stable(100);
        let before = filter.current_rate();
        filter.adjust(10_000, 1.0);
        let after = filter.current_rate();
        assert!(after < before);
        // one step moves at most half the current rate
        assert!(after >= before * 0.5 - 1e-6);
    }

    #[test]
    fn test_under_target_raises_rate_to_max() {
        let filter = stable(1_000);
        for _ in 0..50 {
            filter.adjust(0, 1.0);
        }
        assert!((filter.current_rate() - 1.0).abs() < 1e-6);
        assert_eq!(filter.stats().smoothed_events_per_second, 0.0);
    }

    #[test]
    fn test_rate_never_drops_below_min() {
        let filter = stable(10);
        for _ in 0..200 {
            filter.adjust(1_000_000, 1.0);
        }
        assert!((filter.current_rate() - 0.001).abs() < 1e-6);
    }

    #[test]
    fn test_hysteresis_band_holds_rate() {
        let filter = stable(100);
        // smoothing starts at zero, so seed a converged estimate
        filter.tuning.lock().smoothed = 100.0;
        let before = filter.current_rate();
        let adjustments = filter.stats().adjustments;
        filter.adjust(105, 1.0);
        assert_eq!(filter.current_rate(), before);
        assert_eq!(filter.stats().adjustments, adjustments);
    }

    #[test]
    fn test_oscillation_halves_dampening() {
        let filter = stable(100);
        {
            let mut tuning = filter.tuning.lock();
            tuning.history = [-0.1, 0.1, 0.0];
            tuning.next = 2;
            tuning.smoothed = 400.0;
        }
        let before = filter.current_rate();
        filter.adjust(400, 1.0);

        // change = rate * 0.3 * (100/400 - 1); dampening 0.7 halved
        let expected = before + before * 0.3 * (0.25 - 1.0) * 0.35;
        assert!((filter.current_rate() - expected).abs() < 1e-5);
    }

    #[test]
    fn test_presets_are_distinct() {
        let configs: Vec<AdaptiveConfig> = DampeningPreset::ALL
            .iter()
            .map(|preset| AdaptiveConfig::with_preset(50, *preset))
            .collect();
        for (i, a) in configs.iter().enumerate() {
            for b in &configs[i + 1..] {
                assert_ne!(a, b);
            }
        }
        let responsive = AdaptiveConfig::with_preset(50, DampeningPreset::Responsive);
        assert_eq!(responsive.adjustment_interval, Duration::from_millis(200));
        assert_eq!(responsive.aggressiveness, 0.8);
    }

    #[test]
    fn test_decisions_follow_rate() {
        let filter = stable(100);
        let total = 20_000;
        let accepted = (0..total).filter(|_| filter.decide("Tick {Index}")).count();
        let rate = accepted as f64 / total as f64;
        assert!(
            (0.45..=0.55).contains(&rate),
            "Expected ~50% sample rate, got {}%",
            rate * 100.0
        );
    }

    #[test]
    fn test_flood_is_throttled_over_time() {
        let filter = Arc::new(AdaptiveSamplingFilter::with_config(
            AdaptiveConfig::with_preset(50, DampeningPreset::Responsive)
                .adjustment_interval(Duration::from_millis(20)),
        ));
        let memory = Arc::new(MemorySink::new());
        let logger = Logger::builder()
            .shared_filter(filter.clone())
            .shared_sink(memory.clone())
            .build();

        let initial = filter.current_rate();
        let started = Instant::now();
        while started.elapsed() < Duration::from_millis(300) {
            for i in 0..200 {
                logger.info("Flood {Index}", &[&i]);
            }
            std::thread::sleep(Duration::from_millis(1));
        }

        assert!(filter.current_rate() < initial);
        assert!(filter.stats().adjustments > 0);
        assert!(filter.metrics().dropped_count() > 0);
    }

    #[test]
    fn test_errors_bypass_adaptive_sampling() {
        let filter = Arc::new(AdaptiveSamplingFilter::with_config(
            AdaptiveConfig::new(1).rate_bounds(0.0, 0.0),
        ));
        let memory = Arc::new(MemorySink::new());
        let logger = Logger::builder()
            .shared_filter(filter)
            .shared_sink(memory.clone())
            .build();

        for _ in 0..20 {
            logger.info("dropped", &[]);
            logger.error("kept", &[]);
        }
        assert_eq!(memory.len(), 20);
    }
}
