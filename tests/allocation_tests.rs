//! Allocation budget of the hot logging paths
//!
//! A counting global allocator records allocations made by the current
//! thread, so tests running in parallel do not disturb each other.

use rust_structured_logger::prelude::*;
use rust_structured_logger::TemplateCache;
use std::alloc::{GlobalAlloc, Layout, System};
use std::cell::Cell;
use std::sync::Arc;

struct CountingAllocator;

thread_local! {
    static ALLOCATIONS: Cell<usize> = const { Cell::new(0) };
}

fn bump() {
    let _ = ALLOCATIONS.try_with(|count| count.set(count.get() + 1));
}

unsafe impl GlobalAlloc for CountingAllocator {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        bump();
        System.alloc(layout)
    }

    unsafe fn alloc_zeroed(&self, layout: Layout) -> *mut u8 {
        bump();
        System.alloc_zeroed(layout)
    }

    unsafe fn realloc(&self, ptr: *mut u8, layout: Layout, new_size: usize) -> *mut u8 {
        bump();
        System.realloc(ptr, layout, new_size)
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        System.dealloc(ptr, layout)
    }
}

#[global_allocator]
static GLOBAL: CountingAllocator = CountingAllocator;

/// Allocations made by this thread while running `f`
fn allocations<R>(f: impl FnOnce() -> R) -> (usize, R) {
    let before = ALLOCATIONS.with(Cell::get);
    let result = f();
    let after = ALLOCATIONS.with(Cell::get);
    (after - before, result)
}

fn logger(level: LogLevel) -> Logger {
    Logger::builder()
        .min_level(level)
        .shared_sink(Arc::new(MemorySink::new()))
        .build()
}

#[test]
fn test_disabled_level_allocates_nothing() {
    let logger = logger(LogLevel::Warn);
    logger.warn("warm up {Value}", &[&1]);

    let (count, _) = allocations(|| {
        logger.debug("Cache {Key} missed after {Elapsed} ms", &[&"orders:42", &17]);
        logger.trace("never {A}", &[&1]);
    });
    assert_eq!(count, 0);
}

#[test]
fn test_disabled_macro_skips_argument_evaluation() {
    let logger = logger(LogLevel::Error);

    let (count, _) = allocations(|| {
        rust_structured_logger::info!(logger, "Built {Text}", format!("{}-{}", "a", 1));
    });
    assert_eq!(count, 0);
}

#[test]
fn test_template_cache_hit_allocates_nothing() {
    let cache = TemplateCache::with_capacity(16);
    let template = "User {UserId} logged in from {Ip}";
    let first = cache.parse(template);

    let (count, second) = allocations(|| cache.parse(template));
    assert_eq!(count, 0);
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_with_from_fresh_logger_costs_at_most_two() {
    let logger = logger(LogLevel::Info);
    // first use of a key name is interned
    let _ = logger.with_fields(&[("A", &0), ("B", &0), ("C", &0)]);

    let (single, derived) = allocations(|| logger.with("A", &1));
    assert!(single <= 2, "with of one field made {} allocations", single);
    assert_eq!(derived.fields().len(), 1);

    let (three, derived) = allocations(|| logger.with_fields(&[("A", &1), ("B", &2u8), ("C", &3.5)]));
    assert!(three <= 2, "with of three fields made {} allocations", three);
    assert_eq!(derived.fields().len(), 3);
}

#[test]
fn test_with_cost_is_independent_of_ancestry() {
    let root = logger(LogLevel::Info);
    let _ = root.with("Depth", &0).with("Leaf", &0);

    let shallow = root.with("Depth", &1);
    let mut deep = root.clone();
    for depth in 0..20 {
        deep = deep.with("Depth", &depth);
    }

    let (shallow_cost, _) = allocations(|| shallow.with("Leaf", &1));
    let (deep_cost, child) = allocations(|| deep.with("Leaf", &1));
    assert_eq!(shallow_cost, deep_cost);
    assert!(deep_cost <= 2);
    assert_eq!(child.fields().len(), 2);
}
