//! Ambient, thread-scoped properties
//!
//! [`LogContext::push_property`] pushes a property onto a thread-local stack
//! and returns a [`ContextGuard`] that pops it when dropped. Events logged
//! through a logger with a [`LogContextEnricher`] pick up every property on
//! the stack, the innermost push winning on name collisions.

use super::Enricher;
use crate::core::pipeline::EventBuilder;
use crate::core::property::Property;
use crate::destructure::{Destructurer, LogArg};
use crate::template::CaptureHint;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::OnceLock;

thread_local! {
    static STACK: RefCell<Vec<Property>> = const { RefCell::new(Vec::new()) };
}

static DESTRUCTURER: OnceLock<Destructurer> = OnceLock::new();

fn destructurer() -> &'static Destructurer {
    DESTRUCTURER.get_or_init(Destructurer::default)
}

/// Entry point for ambient properties
pub struct LogContext;

impl LogContext {
    /// Push a property for the current thread until the guard drops
    ///
    /// # Example
    ///
    /// ```
    /// use rust_structured_logger::prelude::*;
    /// use std::sync::Arc;
    ///
    /// let memory = Arc::new(MemorySink::new());
    /// let logger = Logger::builder()
    ///     .enrich(LogContextEnricher::new())
    ///     .shared_sink(memory.clone())
    ///     .build();
    ///
    /// {
    ///     let _guard = LogContext::push_property("TraceId", &"t-1");
    ///     logger.info("inside", &[]);
    /// }
    /// logger.info("outside", &[]);
    ///
    /// let events = memory.events();
    /// assert!(events[0].property("TraceId").is_some());
    /// assert!(events[1].property("TraceId").is_none());
    /// ```
    #[must_use = "the property is removed when the guard is dropped"]
    pub fn push_property<V: LogArg>(name: &str, value: &V) -> ContextGuard {
        Self::push_with_hint(name, value, CaptureHint::Default)
    }

    /// Push a property captured structurally
    #[must_use = "the property is removed when the guard is dropped"]
    pub fn push_structure<V: LogArg>(name: &str, value: &V) -> ContextGuard {
        Self::push_with_hint(name, value, CaptureHint::Structure)
    }

    fn push_with_hint(name: &str, value: &dyn LogArg, hint: CaptureHint) -> ContextGuard {
        let property = Property {
            name: name.into(),
            value: destructurer().destructure(value, hint).value,
        };
        let depth = STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(property);
            stack.len() - 1
        });
        ContextGuard {
            depth,
            _not_send: PhantomData,
        }
    }

    /// Number of properties pushed on this thread
    pub fn depth() -> usize {
        STACK.with(|stack| stack.borrow().len())
    }

    /// Copy of this thread's properties, outermost first
    pub fn snapshot() -> Vec<Property> {
        STACK.with(|stack| stack.borrow().clone())
    }
}

/// Pops the pushed property (and anything pushed after it) on drop
pub struct ContextGuard {
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        STACK.with(|stack| stack.borrow_mut().truncate(self.depth));
    }
}

/// Adds the current thread's ambient properties
#[derive(Debug, Clone, Copy, Default)]
pub struct LogContextEnricher;

impl LogContextEnricher {
    pub fn new() -> Self {
        Self
    }
}

impl Enricher for LogContextEnricher {
    fn enrich(&self, event: &mut EventBuilder<'_>) {
        STACK.with(|stack| {
            for property in stack.borrow().iter().rev() {
                event.add_if_absent(property.clone());
            }
        });
    }
}
