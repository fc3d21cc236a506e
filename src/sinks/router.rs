//! Predicate-based routing to several sinks
//!
//! Routes are kept sorted by priority (lower first, ties in insertion
//! order). In [`RoutingMode::FirstMatch`] an event goes to the first route
//! whose predicate matches; in [`RoutingMode::AllMatch`] it goes to every
//! matching route. Events matching nothing go to the default sink, if any,
//! or are counted as unrouted.

use super::Sink;
use crate::core::error::Result;
use crate::core::log_event::LogEvent;
use crate::core::log_level::LogLevel;
use crate::core::selflog;
use parking_lot::RwLock;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_ROUTE_PRIORITY: i32 = 100;

type RoutePredicate = Arc<dyn Fn(&LogEvent) -> bool + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RoutingMode {
    /// Stop at the first matching route
    #[default]
    FirstMatch,
    /// Deliver to every matching route
    AllMatch,
}

/// A named predicate and its destination
#[derive(Clone)]
pub struct Route {
    name: String,
    priority: i32,
    predicate: RoutePredicate,
    sink: Arc<dyn Sink>,
    hits: Arc<AtomicU64>,
}

impl Route {
    pub fn new<F>(name: impl Into<String>, predicate: F, sink: Arc<dyn Sink>) -> Self
    where
        F: Fn(&LogEvent) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority: DEFAULT_ROUTE_PRIORITY,
            predicate: Arc::new(predicate),
            sink,
            hits: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Route for events at `Error` and above
    pub fn errors(name: impl Into<String>, sink: Arc<dyn Sink>) -> Self {
        Self::new(name, |e: &LogEvent| e.level() >= LogLevel::Error, sink)
    }

    /// Route for events carrying `property`
    pub fn with_property(
        name: impl Into<String>,
        property: impl Into<String>,
        sink: Arc<dyn Sink>,
    ) -> Self {
        let property = property.into();
        Self::new(name, move |e: &LogEvent| e.property(&property).is_some(), sink)
    }

    /// Lower values are tried first
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn matches(&self, event: &LogEvent) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.predicate)(event))) {
            Ok(matched) => matched,
            Err(payload) => {
                selflog::report(
                    "router",
                    format_args!(
                        "route '{}' predicate panicked: {}",
                        self.name,
                        selflog::panic_message(payload.as_ref())
                    ),
                );
                false
            }
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("sink", &self.sink.name())
            .finish()
    }
}

/// Counters of a [`RouterSink`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouterStats {
    /// Hits per route, in routing order
    pub route_hits: Vec<(String, u64)>,
    pub default_hits: u64,
    pub total_events: u64,
    /// Events that matched no route and had no default sink
    pub unrouted: u64,
}

/// Sink that dispatches events to routes by predicate
///
/// # Example
///
/// ```
/// use rust_structured_logger::prelude::*;
/// use std::sync::Arc;
///
/// let errors = Arc::new(MemorySink::new());
/// let audit = Arc::new(MemorySink::new());
/// let rest = Arc::new(MemorySink::new());
/// let router = RouterSink::new(RoutingMode::FirstMatch)
///     .route(Route::errors("errors", errors.clone()).priority(0))
///     .route(Route::with_property("audit", "Audit", audit.clone()))
///     .default_sink(rest.clone());
/// let logger = Logger::builder().sink(router).build();
///
/// logger.error("Payment {Id} failed", &[&9]);
/// logger.with("Audit", &true).info("Role granted", &[]);
/// logger.info("Heartbeat", &[]);
/// assert_eq!((errors.len(), audit.len(), rest.len()), (1, 1, 1));
/// ```
pub struct RouterSink {
    mode: RoutingMode,
    routes: RwLock<Vec<Route>>,
    default_sink: Option<Arc<dyn Sink>>,
    default_hits: AtomicU64,
    total_events: AtomicU64,
    unrouted: AtomicU64,
}

impl RouterSink {
    pub fn new(mode: RoutingMode) -> Self {
        Self {
            mode,
            routes: RwLock::new(Vec::new()),
            default_sink: None,
            default_hits: AtomicU64::new(0),
            total_events: AtomicU64::new(0),
            unrouted: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn route(self, route: Route) -> Self {
        self.add_route(route);
        self
    }

    /// Sink for events no route matched
    #[must_use]
    pub fn default_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.default_sink = Some(sink);
        self
    }

    pub fn mode(&self) -> RoutingMode {
        self.mode
    }

    /// Insert a route at runtime, keeping priority order
    pub fn add_route(&self, route: Route) {
        let mut routes = self.routes.write();
        let at = routes.partition_point(|r| r.priority <= route.priority);
        routes.insert(at, route);
    }

    /// Detach a route by name, returning its sink
    pub fn remove_route(&self, name: &str) -> Option<Arc<dyn Sink>> {
        let mut routes = self.routes.write();
        let index = routes.iter().position(|r| r.name == name)?;
        Some(routes.remove(index).sink)
    }

    pub fn route_names(&self) -> Vec<String> {
        self.routes.read().iter().map(|r| r.name.clone()).collect()
    }

    /// Names of the routes `event` would be delivered to, without delivering
    pub fn matching_routes(&self, event: &LogEvent) -> Vec<String> {
        let routes = self.routes.read();
        let mut matched = Vec::new();
        for route in routes.iter() {
            if route.matches(event) {
                matched.push(route.name.clone());
                if self.mode == RoutingMode::FirstMatch {
                    break;
                }
            }
        }
        matched
    }

    pub fn stats(&self) -> RouterStats {
        RouterStats {
            route_hits: self
                .routes
                .read()
                .iter()
                .map(|r| (r.name.clone(), r.hits.load(Ordering::Relaxed)))
                .collect(),
            default_hits: self.default_hits.load(Ordering::Relaxed),
            total_events: self.total_events.load(Ordering::Relaxed),
            unrouted: self.unrouted.load(Ordering::Relaxed),
        }
    }

    fn sinks(&self) -> Vec<Arc<dyn Sink>> {
        let mut sinks: Vec<Arc<dyn Sink>> =
            self.routes.read().iter().map(|r| Arc::clone(&r.sink)).collect();
        sinks.extend(self.default_sink.iter().cloned());
        sinks
    }
}

impl Sink for RouterSink {
    fn emit(&self, event: &Arc<LogEvent>) -> Result<()> {
        self.total_events.fetch_add(1, Ordering::Relaxed);
        // snapshot so route sinks run without the lock held
        let routes: Vec<Route> = self.routes.read().clone();

        let mut matched = false;
        let mut first_error = None;
        for route in &routes {
            if !route.matches(event) {
                continue;
            }
            matched = true;
            route.hits.fetch_add(1, Ordering::Relaxed);
            if let Err(e) = route.sink.emit(event) {
                first_error.get_or_insert(e);
            }
            if self.mode == RoutingMode::FirstMatch {
                break;
            }
        }

        if !matched {
            match &self.default_sink {
                Some(sink) => {
                    self.default_hits.fetch_add(1, Ordering::Relaxed);
                    sink.emit(event)?;
                }
                None => {
                    self.unrouted.fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn flush(&self) -> Result<()> {
        let mut first_error = None;
        for sink in self.sinks() {
            if let Err(e) = sink.flush() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn close(&self, deadline: Duration) -> Result<()> {
        let started = Instant::now();
        let mut first_error = None;
        for sink in self.sinks() {
            if let Err(e) = sink.close(deadline.saturating_sub(started.elapsed())) {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn name(&self) -> &str {
        "router"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::LoggerError;
    use crate::core::logger::Logger;
    use crate::sinks::MemorySink;

    struct BrokenSink;

    impl Sink for BrokenSink {
        fn emit(&self, _event: &Arc<LogEvent>) -> Result<()> {
            Err(LoggerError::sink("broken", "disk full"))
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn emit_all(router: RouterSink) -> Arc<RouterSink> {
        let router = Arc::new(router);
        let logger = Logger::builder()
            .min_level(LogLevel::Trace)
            .shared_sink(router.clone())
            .build();
        logger.debug("Cache {Key} missed", &[&"a"]);
        logger.error("Request {Path} failed", &[&"/orders"]);
        logger.with("Audit", &true).error("Role revoked", &[]);
        router
    }

    #[test]
    fn test_first_match_respects_priority() {
        let errors = Arc::new(MemorySink::new());
        let audit = Arc::new(MemorySink::new());
        let router = emit_all(
            RouterSink::new(RoutingMode::FirstMatch)
                .route(Route::errors("errors", errors.clone()))
                .route(Route::with_property("audit", "Audit", audit.clone()).priority(1)),
        );

        assert_eq!(router.route_names(), ["audit", "errors"]);
        assert_eq!(errors.len(), 1);
        assert_eq!(audit.len(), 1);

        let stats = router.stats();
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.unrouted, 1);
        assert_eq!(
            stats.route_hits,
            [("audit".to_string(), 1), ("errors".to_string(), 1)]
        );
    }

    #[test]
    fn test_all_match_broadcasts() {
        let errors = Arc::new(MemorySink::new());
        let audit = Arc::new(MemorySink::new());
        let rest = Arc::new(MemorySink::new());
        let router = emit_all(
            RouterSink::new(RoutingMode::AllMatch)
                .route(Route::errors("errors", errors.clone()))
                .route(Route::with_property("audit", "Audit", audit.clone()))
                .default_sink(rest.clone()),
        );

        assert_eq!(errors.len(), 2);
        assert_eq!(audit.len(), 1);
        assert_eq!(rest.len(), 1);
        assert_eq!(router.stats().default_hits, 1);
    }

    #[test]
    fn test_routes_change_at_runtime() {
        let errors = Arc::new(MemorySink::new());
        let router = RouterSink::new(RoutingMode::FirstMatch);
        router.add_route(Route::errors("errors", errors.clone()));
        router.add_route(Route::new("everything", |_: &LogEvent| true, Arc::new(MemorySink::new())));
        assert_eq!(router.route_names(), ["errors", "everything"]);

        let removed = router.remove_route("errors").map(|sink| sink.name().to_string());
        assert_eq!(removed.as_deref(), Some("memory"));
        assert!(router.remove_route("errors").is_none());
        assert_eq!(router.route_names(), ["everything"]);
    }

    #[test]
    fn test_matching_routes_does_not_deliver() {
        let errors = Arc::new(MemorySink::new());
        let router = RouterSink::new(RoutingMode::AllMatch)
            .route(Route::errors("errors", errors.clone()))
            .route(Route::new("panicky", |_: &LogEvent| -> bool { panic!("route bug") }, errors.clone()));

        let memory = Arc::new(MemorySink::new());
        let logger = Logger::builder().shared_sink(memory.clone()).build();
        logger.error("Boom", &[]);
        let event = memory.events().remove(0);

        assert_eq!(router.matching_routes(&event), ["errors"]);
        assert!(errors.is_empty());
    }

    #[test]
    fn test_failing_route_does_not_block_others() {
        let audit = Arc::new(MemorySink::new());
        let router = RouterSink::new(RoutingMode::AllMatch)
            .route(Route::errors("broken", Arc::new(BrokenSink)).priority(0))
            .route(Route::with_property("audit", "Audit", audit.clone()));

        let memory = Arc::new(MemorySink::new());
        let logger = Logger::builder().shared_sink(memory.clone()).build();
        logger.with("Audit", &true).error("Role revoked", &[]);
        let event = memory.events().remove(0);

        let err = router.emit(&event).unwrap_err();
        assert!(err.to_string().contains("disk full"));
        assert_eq!(audit.len(), 1);
    }
}
