//! Counters for pipeline and sink observability
//!
//! Every counter block follows the same shape: `record_*` increments and
//! returns the previous value, accessors load with relaxed ordering,
//! `Clone` produces a point-in-time snapshot and `reset` zeroes everything.
//! None of these counters route through the logging pipeline, so they stay
//! readable when a sink is broken.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters kept by a logger's pipeline
///
/// # Example
///
/// ```
/// use rust_structured_logger::PipelineMetrics;
///
/// let metrics = PipelineMetrics::new();
/// metrics.record_emitted();
/// metrics.record_filtered();
///
/// assert_eq!(metrics.emitted(), 1);
/// assert_eq!(metrics.filtered(), 1);
/// ```
#[derive(Debug)]
pub struct PipelineMetrics {
    /// Events dispatched to sinks
    emitted: AtomicU64,
    /// Events rejected by a filter
    filtered: AtomicU64,
    /// Sink emits that returned an error
    sink_failures: AtomicU64,
    /// Sink emits that panicked
    sink_panics: AtomicU64,
    enricher_panics: AtomicU64,
    filter_panics: AtomicU64,
    /// Events carrying at least one truncated property
    truncated_events: AtomicU64,
}

impl PipelineMetrics {
    pub const fn new() -> Self {
        Self {
            emitted: AtomicU64::new(0),
            filtered: AtomicU64::new(0),
            sink_failures: AtomicU64::new(0),
            sink_panics: AtomicU64::new(0),
            enricher_panics: AtomicU64::new(0),
            filter_panics: AtomicU64::new(0),
            truncated_events: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn filtered(&self) -> u64 {
        self.filtered.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sink_failures(&self) -> u64 {
        self.sink_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn sink_panics(&self) -> u64 {
        self.sink_panics.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn enricher_panics(&self) -> u64 {
        self.enricher_panics.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn filter_panics(&self) -> u64 {
        self.filter_panics.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn truncated_events(&self) -> u64 {
        self.truncated_events.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_emitted(&self) -> u64 {
        self.emitted.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_filtered(&self) -> u64 {
        self.filtered.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_sink_failure(&self) -> u64 {
        self.sink_failures.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_sink_panic(&self) -> u64 {
        self.sink_panics.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_enricher_panic(&self) -> u64 {
        self.enricher_panics.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_filter_panic(&self) -> u64 {
        self.filter_panics.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_truncated(&self) -> u64 {
        self.truncated_events.fetch_add(1, Ordering::Relaxed)
    }

    /// Failed plus panicked sink emits
    pub fn sink_errors(&self) -> u64 {
        self.sink_failures() + self.sink_panics()
    }

    pub fn reset(&self) {
        self.emitted.store(0, Ordering::Relaxed);
        self.filtered.store(0, Ordering::Relaxed);
        self.sink_failures.store(0, Ordering::Relaxed);
        self.sink_panics.store(0, Ordering::Relaxed);
        self.enricher_panics.store(0, Ordering::Relaxed);
        self.filter_panics.store(0, Ordering::Relaxed);
        self.truncated_events.store(0, Ordering::Relaxed);
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for PipelineMetrics {
    /// Snapshot of the current values
    fn clone(&self) -> Self {
        Self {
            emitted: AtomicU64::new(self.emitted()),
            filtered: AtomicU64::new(self.filtered()),
            sink_failures: AtomicU64::new(self.sink_failures()),
            sink_panics: AtomicU64::new(self.sink_panics()),
            enricher_panics: AtomicU64::new(self.enricher_panics()),
            filter_panics: AtomicU64::new(self.filter_panics()),
            truncated_events: AtomicU64::new(self.truncated_events()),
        }
    }
}

/// Counters kept by an [`AsyncSink`](crate::sinks::AsyncSink)
#[derive(Debug)]
pub struct AsyncSinkMetrics {
    enqueued: AtomicU64,
    /// Events handed to the inner sink by the worker
    processed: AtomicU64,
    /// Events discarded by the overflow policy
    dropped_overflow: AtomicU64,
    /// Times the queue was found full
    queue_full_events: AtomicU64,
    /// Times a producer waited for space
    block_events: AtomicU64,
    /// Inner sink emits that failed or panicked
    inner_failures: AtomicU64,
    /// Events still queued when the close deadline expired
    lost_on_shutdown: AtomicU64,
}

impl AsyncSinkMetrics {
    pub const fn new() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            processed: AtomicU64::new(0),
            dropped_overflow: AtomicU64::new(0),
            queue_full_events: AtomicU64::new(0),
            block_events: AtomicU64::new(0),
            inner_failures: AtomicU64::new(0),
            lost_on_shutdown: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn enqueued(&self) -> u64 {
        self.enqueued.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dropped_overflow(&self) -> u64 {
        self.dropped_overflow.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn queue_full_events(&self) -> u64 {
        self.queue_full_events.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn block_events(&self) -> u64 {
        self.block_events.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn inner_failures(&self) -> u64 {
        self.inner_failures.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn lost_on_shutdown(&self) -> u64 {
        self.lost_on_shutdown.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn record_enqueued(&self) -> u64 {
        self.enqueued.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_processed(&self) -> u64 {
        self.processed.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_dropped(&self) -> u64 {
        self.dropped_overflow.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_queue_full(&self) -> u64 {
        self.queue_full_events.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_block(&self) -> u64 {
        self.block_events.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_inner_failure(&self) -> u64 {
        self.inner_failures.fetch_add(1, Ordering::Relaxed)
    }

    pub fn record_lost_on_shutdown(&self, count: u64) -> u64 {
        self.lost_on_shutdown.fetch_add(count, Ordering::Relaxed)
    }

    /// Drop rate as a percentage (0.0 - 100.0)
    ///
    /// Returns 0.0 if nothing was offered yet.
    pub fn drop_rate(&self) -> f64 {
        let dropped = self.dropped_overflow() as f64;
        let total = self.enqueued() as f64 + dropped;
        if total == 0.0 {
            0.0
        } else {
            (dropped / total) * 100.0
        }
    }

    pub fn reset(&self) {
        self.enqueued.store(0, Ordering::Relaxed);
        self.processed.store(0, Ordering::Relaxed);
        self.dropped_overflow.store(0, Ordering::Relaxed);
        self.queue_full_events.store(0, Ordering::Relaxed);
        self.block_events.store(0, Ordering::Relaxed);
        self.inner_failures.store(0, Ordering::Relaxed);
        self.lost_on_shutdown.store(0, Ordering::Relaxed);
    }
}

impl Default for AsyncSinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for AsyncSinkMetrics {
    fn clone(&self) -> Self {
        Self {
            enqueued: AtomicU64::new(self.enqueued()),
            processed: AtomicU64::new(self.processed()),
            dropped_overflow: AtomicU64::new(self.dropped_overflow()),
            queue_full_events: AtomicU64::new(self.queue_full_events()),
            block_events: AtomicU64::new(self.block_events()),
            inner_failures: AtomicU64::new(self.inner_failures()),
            lost_on_shutdown: AtomicU64::new(self.lost_on_shutdown()),
        }
    }
}

/// Counters kept by a [`DurableSink`](crate::sinks::durable::DurableSink)
#[derive(Debug)]
pub struct DurableSinkMetrics {
    /// Events accepted by the inner sink without touching the spool
    delivered_direct: AtomicU64,
    spooled: AtomicU64,
    /// Spooled events later delivered by the flusher
    replayed: AtomicU64,
    /// Events lost to capacity or exhausted I/O retries
    dropped: AtomicU64,
    spool_errors: AtomicU64,
    retries: AtomicU64,
    /// Records currently waiting in the spool
    backlog: AtomicU64,
}

impl DurableSinkMetrics {
    pub const fn new() -> Self {
        Self {
            delivered_direct: AtomicU64::new(0),
            spooled: AtomicU64::new(0),
            replayed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            spool_errors: AtomicU64::new(0),
            retries: AtomicU64::new(0),
            backlog: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn delivered_direct(&self) -> u64 {
        self.delivered_direct.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn spooled(&self) -> u64 {
        self.spooled.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn replayed(&self) -> u64 {
        self.replayed.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn spool_errors(&self) -> u64 {
        self.spool_errors.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn backlog(&self) -> u64 {
        self.backlog.load(Ordering::Acquire)
    }

    #[inline]
    pub fn record_delivered_direct(&self) -> u64 {
        self.delivered_direct.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_spooled(&self) -> u64 {
        self.spooled.fetch_add(1, Ordering::Relaxed)
    }

    pub fn record_replayed(&self, count: u64) -> u64 {
        self.replayed.fetch_add(count, Ordering::Relaxed)
    }

    pub fn record_dropped(&self, count: u64) -> u64 {
        self.dropped.fetch_add(count, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_spool_error(&self) -> u64 {
        self.spool_errors.fetch_add(1, Ordering::Relaxed)
    }

    #[inline]
    pub fn record_retry(&self) -> u64 {
        self.retries.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn set_backlog(&self, records: u64) {
        self.backlog.store(records, Ordering::Release);
    }

    pub fn reset(&self) {
        self.delivered_direct.store(0, Ordering::Relaxed);
        self.spooled.store(0, Ordering::Relaxed);
        self.replayed.store(0, Ordering::Relaxed);
        self.dropped.store(0, Ordering::Relaxed);
        self.spool_errors.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
    }
}

impl Default for DurableSinkMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for DurableSinkMetrics {
    fn clone(&self) -> Self {
        Self {
            delivered_direct: AtomicU64::new(self.delivered_direct()),
            spooled: AtomicU64::new(self.spooled()),
            replayed: AtomicU64::new(self.replayed()),
            dropped: AtomicU64::new(self.dropped()),
            spool_errors: AtomicU64::new(self.spool_errors()),
            retries: AtomicU64::new(self.retries()),
            backlog: AtomicU64::new(self.backlog()),
        }
    }
}
