//! # Result Sinks
//!
//! `Appender` implementations that gather objects from store calls.
//!
//! - `ListResult`: ordered, keeps every append (duplicates included)
//! - `DedupResult`: keyed by a class's de-duplication key, first occurrence
//!   wins

use crate::types::{Appender, Class, ClassRef, Key, Object};
use std::collections::BTreeSet;

// =============================================================================
// LIST RESULT
// =============================================================================

/// Ordered result sink. Appends are kept verbatim, duplicates included.
#[derive(Debug, Default)]
pub struct ListResult {
    objects: Vec<Object>,
}

impl ListResult {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The gathered objects, in append order.
    #[must_use]
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    /// Consume the sink, yielding the gathered objects.
    #[must_use]
    pub fn into_objects(self) -> Vec<Object> {
        self.objects
    }

    /// Number of gathered objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if nothing has been appended.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Appender for ListResult {
    fn append(&mut self, objects: Vec<Object>) {
        self.objects.extend(objects);
    }
}

// =============================================================================
// DEDUP RESULT
// =============================================================================

/// De-duplicating result sink for one class.
///
/// Objects are keyed via the class's `key`; the first occurrence of a key
/// is kept and later duplicates are dropped. Objects outside the class
/// (no key) are dropped as well.
#[derive(Debug)]
pub struct DedupResult {
    class: ClassRef,
    seen: BTreeSet<Key>,
    objects: Vec<Object>,
}

impl DedupResult {
    /// Create a sink de-duplicating by `class`'s key.
    #[must_use]
    pub fn new(class: ClassRef) -> Self {
        Self {
            class,
            seen: BTreeSet::new(),
            objects: Vec::new(),
        }
    }

    /// The gathered objects, in first-occurrence order.
    #[must_use]
    pub fn objects(&self) -> &[Object] {
        &self.objects
    }

    /// Consume the sink, yielding the gathered objects.
    #[must_use]
    pub fn into_objects(self) -> Vec<Object> {
        self.objects
    }

    /// Number of distinct objects gathered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// True if nothing has been kept.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl Appender for DedupResult {
    fn append(&mut self, objects: Vec<Object>) {
        for object in objects {
            if let Some(key) = self.class.key(&object) {
                if self.seen.insert(key) {
                    self.objects.push(object);
                }
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
