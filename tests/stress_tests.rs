//! Stress tests for concurrent logging
//!
//! These tests verify:
//! - Async sink accounting stays exact under contention
//! - Per-producer ordering survives a shared queue
//! - Level changes and template caching are safe while logging
//! - Shutdown stays bounded with a stuck backend

use rust_structured_logger::prelude::*;
use rust_structured_logger::TemplateCache;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

const THREADS: usize = 8;
const PER_THREAD: usize = 500;

/// Sink that sleeps on every event
struct SlowSink {
    delay: Duration,
    memory: MemorySink,
}

impl Sink for SlowSink {
    fn emit(&self, event: &Arc<LogEvent>) -> Result<()> {
        thread::sleep(self.delay);
        self.memory.emit(event)
    }

    fn name(&self) -> &str {
        "slow"
    }
}

/// Sink that never returns until released
struct StuckSink {
    released: AtomicBool,
}

impl Sink for StuckSink {
    fn emit(&self, _event: &Arc<LogEvent>) -> Result<()> {
        while !self.released.load(Ordering::Acquire) {
            thread::sleep(Duration::from_millis(1));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "stuck"
    }
}

/// Test that every event is either delivered or counted as dropped
#[test]
fn test_async_drop_accounting_is_exact() {
    let slow = Arc::new(SlowSink {
        delay: Duration::from_micros(50),
        memory: MemorySink::new(),
    });
    let sink = Arc::new(
        AsyncSink::builder(slow.clone())
            .capacity(16)
            .overflow_policy(OverflowPolicy::DropNewest)
            .build()
            .expect("Failed to create async sink"),
    );
    let logger = Logger::builder().shared_sink(sink.clone()).build();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let logger = logger.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    logger.info("Thread {Thread} event {Index}", &[&t, &i]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    logger.close(Duration::from_secs(30)).unwrap();

    let metrics = sink.metrics();
    let attempted = (THREADS * PER_THREAD) as u64;
    assert_eq!(metrics.enqueued() + metrics.dropped_overflow(), attempted);
    assert_eq!(
        slow.memory.len() as u64 + metrics.lost_on_shutdown(),
        metrics.enqueued()
    );
}

/// Test that events from one producer arrive in the order they were logged
#[test]
fn test_per_producer_order_is_preserved() {
    let memory = Arc::new(MemorySink::new());
    let sink = AsyncSink::builder(memory.clone())
        .capacity(64)
        .overflow_policy(OverflowPolicy::BlockWithTimeout(Duration::from_secs(10)))
        .build()
        .unwrap();
    let logger = Logger::builder().sink(sink).build();

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let logger = logger.with("Producer", &t);
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    logger.info("Sequence {Seq}", &[&i]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    logger.close(Duration::from_secs(30)).unwrap();

    let events = memory.events();
    assert_eq!(events.len(), THREADS * PER_THREAD);

    let mut last_seen = vec![None::<i64>; THREADS];
    for event in &events {
        let producer = match event.property("Producer") {
            Some(PropertyValue::Scalar(s)) => s.as_f64().unwrap() as usize,
            other => panic!("missing producer: {:?}", other),
        };
        let seq = match event.property("Seq") {
            Some(PropertyValue::Scalar(s)) => s.as_f64().unwrap() as i64,
            other => panic!("missing sequence: {:?}", other),
        };
        if let Some(previous) = last_seen[producer] {
            assert!(seq > previous, "producer {} went backwards", producer);
        }
        last_seen[producer] = Some(seq);
    }
}

/// Test that flipping the level while logging never corrupts the gate
#[test]
fn test_level_changes_during_logging() {
    let memory = Arc::new(MemorySink::new());
    let switch = Arc::new(LevelSwitch::new(LogLevel::Info));
    let logger = Logger::builder()
        .level_switch(switch.clone())
        .shared_sink(memory.clone())
        .build();

    let running = Arc::new(AtomicBool::new(true));
    let toggler = {
        let switch = switch.clone();
        let running = running.clone();
        thread::spawn(move || {
            let mut flip = false;
            while running.load(Ordering::Acquire) {
                switch.set_level(if flip { LogLevel::Error } else { LogLevel::Debug });
                flip = !flip;
            }
        })
    };

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let logger = logger.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    logger.trace("never {N}", &[&i]);
                    logger.debug("sometimes {N}", &[&i]);
                    logger.fatal("always {N}", &[&i]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    running.store(false, Ordering::Release);
    toggler.join().unwrap();

    let events = memory.events();
    assert!(events.iter().all(|e| e.level() != LogLevel::Trace));
    let fatal = events.iter().filter(|e| e.level() == LogLevel::Fatal).count();
    assert_eq!(fatal, 4 * PER_THREAD);
}

/// Test that concurrent first use of the same templates parses each once
#[test]
fn test_template_cache_under_contention() {
    let cache = Arc::new(TemplateCache::new());
    let logger = Logger::builder()
        .template_cache(cache.clone())
        .sink(MemorySink::new())
        .build();

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let logger = logger.clone();
            thread::spawn(move || {
                for i in 0..PER_THREAD {
                    logger.info(
                        ["Template A {N}", "Template B {N}", "Template C {N}"][i % 3],
                        &[&i],
                    );
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(cache.len(), 3);
    assert_eq!(cache.hits() + cache.misses(), (THREADS * PER_THREAD) as u64);
}

/// Test that the rate limiter never admits more than its budget per window
#[test]
fn test_rate_limiter_bound_under_contention() {
    let memory = Arc::new(MemorySink::new());
    let limiter = Arc::new(RateLimitFilter::new(100, Duration::from_secs(60)));
    let logger = Logger::builder()
        .shared_filter(limiter.clone())
        .shared_sink(memory.clone())
        .build();

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let logger = logger.clone();
            thread::spawn(move || {
                for _ in 0..PER_THREAD {
                    logger.info("hot path", &[]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(memory.len(), 100);
    assert_eq!(limiter.passed(), 100);
    assert_eq!(limiter.rejected(), (THREADS * PER_THREAD - 100) as u64);
}

/// Test that close returns within its deadline even if the backend hangs
#[test]
fn test_shutdown_is_bounded_with_stuck_sink() {
    let stuck = Arc::new(StuckSink {
        released: AtomicBool::new(false),
    });
    let sink = Arc::new(
        AsyncSink::builder(stuck.clone())
            .capacity(100)
            .build()
            .unwrap(),
    );
    let logger = Logger::builder().shared_sink(sink.clone()).build();

    for i in 0..50 {
        logger.info("queued {N}", &[&i]);
    }

    let started = Instant::now();
    logger.close(Duration::from_millis(200)).unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(sink.metrics().lost_on_shutdown() > 0);

    stuck.released.store(true, Ordering::Release);
}

/// Test that a panicking sink under load never takes down logging threads
#[test]
fn test_panicking_sink_under_load() {
    struct Flaky {
        calls: AtomicUsize,
    }

    impl Sink for Flaky {
        fn emit(&self, _event: &Arc<LogEvent>) -> Result<()> {
            if self.calls.fetch_add(1, Ordering::Relaxed) % 7 == 0 {
                panic!("intermittent failure");
            }
            Ok(())
        }

        fn name(&self) -> &str {
            "flaky"
        }
    }

    let memory = Arc::new(MemorySink::new());
    let logger = Logger::builder()
        .sink(Flaky {
            calls: AtomicUsize::new(0),
        })
        .shared_sink(memory.clone())
        .build();

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let logger = logger.clone();
            thread::spawn(move || {
                for i in 0..100 {
                    logger.warn("load {N}", &[&i]);
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("logging thread panicked");
    }

    assert_eq!(memory.len(), 400);
    assert!(logger.metrics().sink_panics() > 0);
}
