//! In-memory relation storage.
//!
//! A [`Store`] owns every relation of a session, base and derived alike.
//! Generated maintenance code only ever reads it; changes are applied by the
//! session one at a time through [`Store::incref`] and [`Store::decref`].

pub mod multiset;
pub mod relation;

use indexmap::IndexMap;

pub use multiset::Multiset;
pub use relation::{Mask, Origin, Relation, RelationInfo, RelationKind};

use crate::value::{Tuple, Value};

/// All relations of a session, keyed by name in declaration order.
#[derive(Clone, Debug, Default)]
pub struct Store {
    relations: IndexMap<String, Relation>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty relation. Redeclaring a name replaces the relation.
    pub fn declare(&mut self, info: RelationInfo) {
        let name = info.name.clone();
        self.relations.insert(name, Relation::new(info));
    }

    /// Request an index on `name` for lookups with `mask`.
    pub fn add_index(&mut self, name: &str, mask: Mask) {
        if let Some(rel) = self.relations.get_mut(name) {
            rel.add_index(mask);
        }
    }

    pub fn get(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }

    pub fn contains(&self, name: &str, row: &[Value]) -> bool {
        self.relations.get(name).is_some_and(|r| r.contains(row))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.relations.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    /// Increment `row` in `name`. Returns true on a 0 -> 1 transition.
    ///
    /// # Panics
    ///
    /// Panics if the relation does not exist.
    pub fn incref(&mut self, name: &str, row: Tuple) -> bool {
        self.relation_mut(name).incref(row)
    }

    /// Decrement `row` in `name`. Returns true on a 1 -> 0 transition.
    ///
    /// # Panics
    ///
    /// Panics if the relation does not exist or on reference count underflow.
    pub fn decref(&mut self, name: &str, row: &Tuple) -> bool {
        self.relation_mut(name).decref(row)
    }

    fn relation_mut(&mut self, name: &str) -> &mut Relation {
        match self.relations.get_mut(name) {
            Some(rel) => rel,
            None => panic!("no relation named {} in the store", name),
        }
    }

    /// Total number of rows across derived relations.
    pub fn derived_size(&self) -> usize {
        self.relations
            .values()
            .filter(|r| !r.info().origin.is_base())
            .map(Relation::len)
            .sum()
    }
}
