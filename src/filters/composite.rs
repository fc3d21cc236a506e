//! Boolean combinations of filters

use super::Filter;
use crate::core::pipeline::EventView;
use std::sync::Arc;

/// Passes only when every inner filter passes; empty passes everything
#[derive(Default, Clone)]
pub struct AllFilter {
    filters: Vec<Arc<dyn Filter>>,
}

impl AllFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "builder methods return a new value"]
    pub fn with<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn with_shared(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }
}

impl Filter for AllFilter {
    fn is_enabled(&self, event: &EventView<'_>) -> bool {
        self.filters.iter().all(|filter| filter.is_enabled(event))
    }
}

/// Passes when at least one inner filter passes; empty passes nothing
#[derive(Default, Clone)]
pub struct AnyFilter {
    filters: Vec<Arc<dyn Filter>>,
}

impl AnyFilter {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use = "builder methods return a new value"]
    pub fn with<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Arc::new(filter));
        self
    }

    #[must_use = "builder methods return a new value"]
    pub fn with_shared(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }
}

impl Filter for AnyFilter {
    fn is_enabled(&self, event: &EventView<'_>) -> bool {
        self.filters.iter().any(|filter| filter.is_enabled(event))
    }
}

/// Inverts an inner filter
pub struct NotFilter<F> {
    inner: F,
}

impl<F: Filter> NotFilter<F> {
    pub fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F: Filter> Filter for NotFilter<F> {
    fn is_enabled(&self, event: &EventView<'_>) -> bool {
        !self.inner.is_enabled(event)
    }
}
