//! Process-wide cache of parsed templates
//!
//! Retention is bounded without eviction: once `capacity` distinct templates
//! are cached, additional templates are parsed on every call and never
//! inserted. Templates are normally string literals, so the bound only
//! matters when callers build templates dynamically.

use super::parser::ParsedTemplate;
use crate::core::selflog;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};

pub const DEFAULT_TEMPLATE_CACHE_CAPACITY: usize = 10_000;

static GLOBAL: OnceLock<Arc<TemplateCache>> = OnceLock::new();

/// Concurrent template cache keyed by the exact template text
///
/// # Example
///
/// ```
/// use rust_structured_logger::template::TemplateCache;
///
/// let cache = TemplateCache::with_capacity(16);
/// let first = cache.parse("Disk {Volume} is {Percent}% full");
/// let second = cache.parse("Disk {Volume} is {Percent}% full");
/// assert!(std::sync::Arc::ptr_eq(&first, &second));
/// assert_eq!(cache.len(), 1);
/// ```
#[derive(Debug)]
pub struct TemplateCache {
    entries: DashMap<String, Arc<ParsedTemplate>>,
    capacity: usize,
    len: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    full_reported: AtomicBool,
}

impl TemplateCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TEMPLATE_CACHE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity,
            len: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            full_reported: AtomicBool::new(false),
        }
    }

    /// The cache shared by every logger that was not given its own
    pub fn global() -> Arc<TemplateCache> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(TemplateCache::new())))
    }

    /// Return the parsed form of `template`, parsing it on first use
    ///
    /// The hit path performs a shard read-lock and an `Arc` clone only.
    pub fn parse(&self, template: &str) -> Arc<ParsedTemplate> {
        if let Some(entry) = self.entries.get(template) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Arc::clone(entry.value());
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let parsed = Arc::new(ParsedTemplate::parse(template));

        if self.len.load(Ordering::Relaxed) >= self.capacity {
            if !self.full_reported.swap(true, Ordering::Relaxed) {
                selflog::report(
                    "template-cache",
                    format_args!(
                        "capacity of {} templates reached; further templates are parsed per call",
                        self.capacity
                    ),
                );
            }
            return parsed;
        }

        match self.entries.entry(template.to_string()) {
            Entry::Occupied(existing) => Arc::clone(existing.get()),
            Entry::Vacant(slot) => {
                self.len.fetch_add(1, Ordering::Relaxed);
                slot.insert(Arc::clone(&parsed));
                parsed
            }
        }
    }

    /// Number of cached templates
    pub fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of lookups served from the cache
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Number of lookups that had to parse
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }
}

impl Default for TemplateCache {
    fn default() -> Self {
        Self::new()
    }
}
