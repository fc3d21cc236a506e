//! Enrichers add properties to events before filtering
//!
//! Enrichers run in registration order. [`EventBuilder::add_or_update`]
//! lets a later enricher overwrite an earlier one, while
//! [`EventBuilder::add_if_absent`] leaves existing names alone. Arguments
//! bound to the template always win over enricher output.

pub mod builtin;
pub mod log_context;

pub use builtin::{
    CallbackEnricher, EnvironmentEnricher, MachineNameEnricher, ProcessEnricher,
    PropertyEnricher, ThreadEnricher,
};
pub use log_context::{ContextGuard, LogContext, LogContextEnricher};

use crate::core::pipeline::EventBuilder;

/// Adds computed or fixed properties to events
pub trait Enricher: Send + Sync {
    fn enrich(&self, event: &mut EventBuilder<'_>);
}
