//! Copy-on-extend field sets carried by loggers

use super::property::{Property, PropertyValue};
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

/// Distinct field names kept by [`intern_name`]; later names are allocated per use
pub const MAX_INTERNED_NAMES: usize = 4096;

static NAMES: OnceLock<DashMap<Arc<str>, ()>> = OnceLock::new();

/// Property names the event model uses for its own parts
pub const RESERVED_NAMES: [&str; 5] = [
    "Timestamp",
    "Level",
    "Message",
    "MessageTemplate",
    "Exception",
];

pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Shared name for a field key
///
/// Keys passed to `with` are usually literals, so repeated derivations
/// reuse one allocation per distinct name.
pub(crate) fn intern_name(name: &str) -> Arc<str> {
    let names = NAMES.get_or_init(DashMap::new);
    if let Some(found) = names.get(name) {
        return Arc::clone(found.key());
    }
    let shared: Arc<str> = Arc::from(name);
    if names.len() < MAX_INTERNED_NAMES {
        names.insert(Arc::clone(&shared), ());
    }
    shared
}

/// Immutable ordered set of uniquely named properties
///
/// Cloning shares the storage. [`extend`](FieldSet::extend) builds a new
/// array and never touches the receiver, so sibling loggers derived from
/// the same parent stay independent.
#[derive(Clone, Default)]
pub struct FieldSet {
    entries: Option<Arc<Vec<Property>>>,
}

impl FieldSet {
    pub const fn new() -> Self {
        Self { entries: None }
    }

    pub fn as_slice(&self) -> &[Property] {
        self.entries.as_deref().map_or(&[], Vec::as_slice)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Property> {
        self.as_slice().iter()
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_slice().is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&PropertyValue> {
        self.iter().find(|p| &*p.name == name).map(|p| &p.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Whether both sets point at the same storage
    pub fn ptr_eq(&self, other: &FieldSet) -> bool {
        match (&self.entries, &other.entries) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    /// Merge `pairs` over this set
    ///
    /// A pair whose name already exists replaces the old entry and moves to
    /// the end; new names are appended in order. Within `pairs` the last
    /// occurrence of a name wins.
    ///
    /// # Example
    ///
    /// ```
    /// use rust_structured_logger::{FieldSet, Property};
    ///
    /// let base = FieldSet::new().extend(vec![Property::new("a", 1i64), Property::new("b", 2i64)]);
    /// let child = base.extend(vec![Property::new("a", 3i64)]);
    ///
    /// let names: Vec<&str> = child.iter().map(|p| &*p.name).collect();
    /// assert_eq!(names, ["b", "a"]);
    /// assert_eq!(base.get("a"), Some(&1i64.into()));
    /// ```
    #[must_use = "extend returns a new field set"]
    pub fn extend(&self, pairs: Vec<Property>) -> FieldSet {
        let names: Vec<&str> = pairs.iter().map(|p| &*p.name).collect();
        self.merge(&names, |i| pairs[i].clone())
    }

    /// Merge the properties named by `names`, building each one on demand
    ///
    /// `build(i)` is called once for every name that survives: names that
    /// are empty or repeated later in `names` are skipped. The result is
    /// written straight into the new storage.
    pub(crate) fn merge<F>(&self, names: &[&str], mut build: F) -> FieldSet
    where
        F: FnMut(usize) -> Property,
    {
        let survives =
            |i: usize| !names[i].is_empty() && !names[i + 1..].contains(&names[i]);
        let incoming = (0..names.len()).filter(|&i| survives(i)).count();
        if incoming == 0 {
            return self.clone();
        }

        let current = self.as_slice();
        let kept = current
            .iter()
            .filter(|existing| !names.contains(&&*existing.name));
        let mut merged = Vec::with_capacity(current.len() + incoming);
        merged.extend(kept.cloned());
        for i in 0..names.len() {
            if survives(i) {
                merged.push(build(i));
            }
        }

        FieldSet {
            entries: Some(Arc::new(merged)),
        }
    }
}

impl fmt::Debug for FieldSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<'a> IntoIterator for &'a FieldSet {
    type Item = &'a Property;
    type IntoIter = std::slice::Iter<'a, Property>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
