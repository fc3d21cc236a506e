//! Per-type capability cache for safe log-value providers
//!
//! A provider substitutes a sanitized stand-in for a value of a given type
//! before it reaches any event (for example to redact a password field).
//! Types are identified by the name they report to serde (struct, newtype,
//! tuple struct and enum names). The decision for each name is resolved on
//! first encounter and then stays fixed for the life of the cache.
//!
//! Serde names carry no module path, so `billing::Token` and `auth::Token`
//! share one entry. [`CapabilityCache::register_type`] remembers the full
//! Rust type behind each name and refuses a second, different type with the
//! same name; rename one of them with `#[serde(rename = "...")]` and use
//! [`CapabilityCache::register`] to give each its own provider.

use crate::core::error::{LoggerError, Result};
use crate::core::property::PropertyValue;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Produces the loggable representation of a captured value
pub trait LogValueProvider: Send + Sync {
    fn log_value(&self, captured: PropertyValue) -> PropertyValue;
}

impl<F> LogValueProvider for F
where
    F: Fn(PropertyValue) -> PropertyValue + Send + Sync,
{
    fn log_value(&self, captured: PropertyValue) -> PropertyValue {
        self(captured)
    }
}

type ProviderRef = Arc<dyn LogValueProvider>;

static GLOBAL: OnceLock<Arc<CapabilityCache>> = OnceLock::new();

/// Lazily resolved `type name -> provider` table
///
/// # Example
///
/// ```
/// use rust_structured_logger::destructure::CapabilityCache;
/// use rust_structured_logger::{Property, PropertyValue};
///
/// let cache = CapabilityCache::new();
/// cache
///     .register("Credentials", |captured: PropertyValue| match captured {
///         PropertyValue::Structure { type_tag, fields, truncated } => PropertyValue::Structure {
///             type_tag,
///             fields: fields
///                 .into_iter()
///                 .map(|p| if &*p.name == "password" { Property::new("password", "***") } else { p })
///                 .collect(),
///             truncated,
///         },
///         other => other,
///     })
///     .unwrap();
/// assert!(cache.has_provider("Credentials"));
/// ```
pub struct CapabilityCache {
    resolved: DashMap<&'static str, Option<ProviderRef>>,
    registry: RwLock<HashMap<String, ProviderRef>>,
    /// Full Rust type registered under each name by `register_type`
    owners: RwLock<HashMap<String, &'static str>>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self {
            resolved: DashMap::new(),
            registry: RwLock::new(HashMap::new()),
            owners: RwLock::new(HashMap::new()),
        }
    }

    /// Cache shared by destructurers that were not given their own
    pub fn global() -> Arc<CapabilityCache> {
        Arc::clone(GLOBAL.get_or_init(|| Arc::new(CapabilityCache::new())))
    }

    /// Register a provider for values whose serde type name is `type_name`
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::CapabilityResolved`] if a value of that type
    /// was already destructured, because the earlier decision is final.
    pub fn register<P>(&self, type_name: impl Into<String>, provider: P) -> Result<()>
    where
        P: LogValueProvider + 'static,
    {
        let type_name = type_name.into();
        let mut registry = self.registry.write();
        if self.resolved.contains_key(type_name.as_str()) {
            return Err(LoggerError::capability_resolved(type_name));
        }
        registry.insert(type_name, Arc::new(provider));
        Ok(())
    }

    /// Register a provider for `T`, keyed by its unqualified Rust name
    ///
    /// Matches serde's default naming. Types renamed with
    /// `#[serde(rename = "...")]` must use [`register`](Self::register).
    ///
    /// # Errors
    ///
    /// Returns [`LoggerError::CapabilityCollision`] if a different type with
    /// the same unqualified name was registered before, and
    /// [`LoggerError::CapabilityResolved`] as for `register`.
    pub fn register_type<T, P>(&self, provider: P) -> Result<()>
    where
        T: ?Sized,
        P: LogValueProvider + 'static,
    {
        let full = std::any::type_name::<T>();
        let name = short_type_name::<T>();
        let mut owners = self.owners.write();
        if let Some(existing) = owners.get(name) {
            if *existing != full {
                return Err(LoggerError::capability_collision(name, *existing, full));
            }
        }
        self.register(name, provider)?;
        owners.insert(name.to_string(), full);
        Ok(())
    }

    /// Resolve (and cache) the provider for `type_name`
    pub fn provider_for(&self, type_name: &'static str) -> Option<ProviderRef> {
        if let Some(entry) = self.resolved.get(type_name) {
            return entry.value().clone();
        }
        let registry = self.registry.read();
        let found = registry.get(type_name).cloned();
        self.resolved
            .entry(type_name)
            .or_insert(found)
            .value()
            .clone()
    }

    pub fn has_provider(&self, type_name: &str) -> bool {
        self.registry.read().contains_key(type_name)
    }

    pub fn is_resolved(&self, type_name: &str) -> bool {
        self.resolved.contains_key(type_name)
    }

    /// Number of distinct type names resolved so far
    pub fn resolved_count(&self) -> usize {
        self.resolved.len()
    }
}

impl Default for CapabilityCache {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CapabilityCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilityCache")
            .field("resolved", &self.resolved.len())
            .field("providers", &self.registry.read().len())
            .finish()
    }
}

/// `my_crate::model::Request<T>` -> `Request`
fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Secret;

    mod billing {
        pub struct Token;
    }

    mod auth {
        pub struct Token;
    }

    #[test]
    fn test_resolution_is_stable() {
        let cache = CapabilityCache::new();
        assert!(cache.provider_for("Plain").is_none());
        assert!(cache.is_resolved("Plain"));

        let err = cache
            .register("Plain", |_: PropertyValue| PropertyValue::str("***"))
            .unwrap_err();
        assert!(matches!(err, LoggerError::CapabilityResolved { .. }));
        assert!(cache.provider_for("Plain").is_none());
    }

    #[test]
    fn test_registered_provider_applies() {
        let cache = CapabilityCache::new();
        cache
            .register("Token", |_: PropertyValue| PropertyValue::str("***"))
            .unwrap();
        let provider = cache.provider_for("Token").unwrap();
        assert_eq!(
            provider.log_value(PropertyValue::str("abc123")),
            PropertyValue::str("***")
        );
        assert_eq!(cache.resolved_count(), 1);
    }

    #[test]
    fn test_register_type_uses_short_name() {
        let cache = CapabilityCache::new();
        cache
            .register_type::<Secret, _>(|_: PropertyValue| PropertyValue::null())
            .unwrap();
        assert!(cache.has_provider("Secret"));
        assert_eq!(short_type_name::<Vec<u8>>(), "Vec");
    }

    #[test]
    fn test_same_short_name_from_other_type_is_refused() {
        let cache = CapabilityCache::new();
        cache
            .register_type::<billing::Token, _>(|_: PropertyValue| PropertyValue::str("***"))
            .unwrap();
        // the same type again just replaces its provider
        cache
            .register_type::<billing::Token, _>(|_: PropertyValue| PropertyValue::null())
            .unwrap();

        let err = cache
            .register_type::<auth::Token, _>(|_: PropertyValue| PropertyValue::null())
            .unwrap_err();
        assert!(matches!(err, LoggerError::CapabilityCollision { .. }));
        assert!(err.to_string().contains("billing::Token"));
        assert!(err.to_string().contains("auth::Token"));
    }
}
