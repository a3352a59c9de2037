//! Relations with secondary indices.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use indexmap::IndexSet;

use crate::expr::Var;
use crate::store::multiset::Multiset;
use crate::value::{RowDisplay, Tuple, Value};

/// Which positions of a row are bound when it is looked up.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Mask(Vec<bool>);

impl Mask {
    pub fn new(bits: Vec<bool>) -> Self {
        Mask(bits)
    }

    /// Mask of a pattern: position `i` is bound iff its variable is in `bound`.
    ///
    /// A variable repeated within the pattern counts as unbound at every
    /// occurrence unless it was bound beforehand; the equality between
    /// occurrences is checked when rows are matched.
    pub fn from_pattern(pattern: &[Var], bound: &BTreeSet<Var>) -> Self {
        Mask(pattern.iter().map(|v| bound.contains(v)).collect())
    }

    /// Mask binding the first `n` of `arity` positions.
    pub fn prefix(n: usize, arity: usize) -> Self {
        Mask((0..arity).map(|i| i < n).collect())
    }

    pub fn arity(&self) -> usize {
        self.0.len()
    }

    pub fn is_all_bound(&self) -> bool {
        self.0.iter().all(|b| *b)
    }

    pub fn is_all_unbound(&self) -> bool {
        self.0.iter().all(|b| !*b)
    }

    /// The bound positions of `row`.
    pub fn project(&self, row: &[Value]) -> Tuple {
        self.0
            .iter()
            .zip(row)
            .filter(|(b, _)| **b)
            .map(|(_, v)| v.clone())
            .collect()
    }

    /// The variables at bound positions of `pattern`.
    pub fn bound_vars<'a>(&'a self, pattern: &'a [Var]) -> impl Iterator<Item = &'a Var> + 'a {
        self.0.iter().zip(pattern).filter(|(b, _)| **b).map(|(_, v)| v)
    }
}

impl fmt::Display for Mask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{}", if *b { 'b' } else { 'u' })?;
        }
        Ok(())
    }
}

/// Representation of a relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RelationKind {
    /// A set of rows.
    Set,
    /// Rows `(key..., value)` with at most one value per key.
    Map { key_arity: usize },
}

/// What a relation is for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Origin {
    /// Owned and mutated by user code.
    Base,
    /// The materialized result of a query.
    Result { query: String },
    /// The parameter tuples a query is demanded for.
    DemandSet { query: String },
    /// Demanded values of one variable of a query.
    Tag { query: String, var: Var },
    /// One clause's relation restricted to the demanded frontier.
    Filter { query: String, clause: usize },
}

impl Origin {
    pub fn is_base(&self) -> bool {
        matches!(self, Origin::Base)
    }

    /// The query that owns a derived relation.
    pub fn owner(&self) -> Option<&str> {
        match self {
            Origin::Base => None,
            Origin::Result { query }
            | Origin::DemandSet { query }
            | Origin::Tag { query, .. }
            | Origin::Filter { query, .. } => Some(query),
        }
    }
}

/// Static description of a relation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelationInfo {
    pub name: String,
    pub arity: usize,
    pub kind: RelationKind,
    pub origin: Origin,
    /// Whether rows carry reference counts.
    pub counted: bool,
}

impl RelationInfo {
    pub fn base(name: impl Into<String>, arity: usize, kind: RelationKind) -> Self {
        Self {
            name: name.into(),
            arity,
            kind,
            origin: Origin::Base,
            counted: false,
        }
    }

    pub fn derived(name: impl Into<String>, arity: usize, origin: Origin, counted: bool) -> Self {
        Self {
            name: name.into(),
            arity,
            kind: RelationKind::Set,
            origin,
            counted,
        }
    }

    /// Mask selecting a map's key positions.
    pub fn key_mask(&self) -> Option<Mask> {
        match self.kind {
            RelationKind::Map { key_arity } => Some(Mask::prefix(key_arity, self.arity)),
            RelationKind::Set => None,
        }
    }
}

type Index = HashMap<Tuple, IndexSet<Tuple>>;

/// A relation: counted rows plus one index per requested mask.
#[derive(Clone, Debug)]
pub struct Relation {
    info: RelationInfo,
    rows: Multiset<Tuple>,
    indices: HashMap<Mask, Index>,
}

impl Relation {
    pub fn new(info: RelationInfo) -> Self {
        let mut relation = Self {
            info,
            rows: Multiset::new(),
            indices: HashMap::new(),
        };
        if let Some(mask) = relation.info.key_mask() {
            relation.add_index(mask);
        }
        relation
    }

    pub fn info(&self) -> &RelationInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Build (or keep) an index for `mask`.
    pub fn add_index(&mut self, mask: Mask) {
        if mask.is_all_bound() || mask.is_all_unbound() || self.indices.contains_key(&mask) {
            return;
        }
        let mut index = Index::new();
        for row in self.rows.iter() {
            index.entry(mask.project(row)).or_default().insert(row.clone());
        }
        self.indices.insert(mask, index);
    }

    pub fn has_index(&self, mask: &Mask) -> bool {
        self.indices.contains_key(mask)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn contains(&self, row: &[Value]) -> bool {
        self.rows.contains(&row.to_vec())
    }

    /// Reference count of `row`; 1 for present rows of uncounted relations.
    pub fn count(&self, row: &[Value]) -> u64 {
        self.rows.getref(&row.to_vec())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tuple> {
        self.rows.iter()
    }

    pub fn iter_counts(&self) -> impl Iterator<Item = (&Tuple, u64)> {
        self.rows.iter_counts()
    }

    /// Rows whose `mask` positions equal `key`.
    ///
    /// Falls back to a filtered scan when no index exists for `mask`.
    pub fn lookup<'a>(&'a self, mask: &Mask, key: &[Value]) -> Box<dyn Iterator<Item = &'a Tuple> + 'a> {
        match self.indices.get(mask) {
            Some(index) => match index.get(key) {
                Some(rows) => Box::new(rows.iter()),
                None => Box::new(std::iter::empty()),
            },
            None => {
                let mask = mask.clone();
                let key = key.to_vec();
                Box::new(self.rows.iter().filter(move |row| mask.project(row) == key))
            }
        }
    }

    /// The value stored under `key` in a map.
    pub fn map_get(&self, key: &[Value]) -> Option<&Value> {
        let mask = self.info.key_mask()?;
        self.lookup(&mask, key).next().and_then(|row| row.last())
    }

    /// Increment `row`, indexing it if it is new. Returns true if it was absent.
    pub fn incref(&mut self, row: Tuple) -> bool {
        if self.rows.contains(&row) {
            self.rows.incref(row);
            return false;
        }
        for (mask, index) in self.indices.iter_mut() {
            index.entry(mask.project(&row)).or_default().insert(row.clone());
        }
        self.rows.incref(row)
    }

    /// Decrement `row`, unindexing it at zero. Returns true if it was removed.
    ///
    /// # Panics
    ///
    /// Panics on reference count underflow.
    pub fn decref(&mut self, row: &Tuple) -> bool {
        if !self.rows.contains(row) {
            panic!(
                "reference count underflow: {} is not in relation {}",
                RowDisplay(row),
                self.info.name
            );
        }
        let removed = self.rows.decref(row);
        if removed {
            for (mask, index) in self.indices.iter_mut() {
                let key = mask.project(row);
                if let Some(rows) = index.get_mut(&key) {
                    rows.swap_remove(row);
                    if rows.is_empty() {
                        index.remove(&key);
                    }
                }
            }
        }
        removed
    }

    /// Rows as a sorted vector, for comparisons and display.
    pub fn sorted_rows(&self) -> Vec<Tuple> {
        let mut rows: Vec<Tuple> = self.rows.iter().cloned().collect();
        rows.sort();
        rows
    }

    /// Rows with counts, sorted.
    pub fn sorted_counts(&self) -> Vec<(Tuple, u64)> {
        let mut rows: Vec<(Tuple, u64)> = self.rows.iter_counts().map(|(r, c)| (r.clone(), c)).collect();
        rows.sort();
        rows
    }
}
