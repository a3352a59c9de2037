//! Reference-counted sets.

use std::fmt;
use std::hash::Hash;

use indexmap::IndexMap;

/// A multiset: each present value carries a positive count.
///
/// `incref` increments-or-inserts and `decref` decrements-and-deletes-at-zero.
/// Decrementing an absent value is a maintenance bug and panics.
///
/// Iteration follows insertion order, except that removing a value moves the
/// last value into its slot.
#[derive(Clone, PartialEq, Eq)]
pub struct Multiset<T: Hash + Eq> {
    counts: IndexMap<T, u64>,
}

impl<T: Hash + Eq> Default for Multiset<T> {
    fn default() -> Self {
        Self {
            counts: IndexMap::new(),
        }
    }
}

impl<T: Hash + Eq + fmt::Debug> Multiset<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct values.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn contains(&self, value: &T) -> bool {
        self.counts.contains_key(value)
    }

    /// Current count of `value`; zero when absent.
    pub fn getref(&self, value: &T) -> u64 {
        self.counts.get(value).copied().unwrap_or(0)
    }

    /// Increment the count of `value`. Returns true if it was absent.
    pub fn incref(&mut self, value: T) -> bool {
        let count = self.counts.entry(value).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Decrement the count of `value`. Returns true if it dropped to zero
    /// and was removed.
    ///
    /// # Panics
    ///
    /// Panics if `value` is absent (reference count underflow).
    pub fn decref(&mut self, value: &T) -> bool {
        match self.counts.get_mut(value) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.counts.swap_remove(value);
                true
            }
            None => panic!("reference count underflow: {:?} is not present", value),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.counts.keys()
    }

    pub fn iter_counts(&self) -> impl Iterator<Item = (&T, u64)> {
        self.counts.iter().map(|(v, c)| (v, *c))
    }
}

impl<T: Hash + Eq + fmt::Debug> fmt::Debug for Multiset<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.counts.iter()).finish()
    }
}
