//! Proptest generators for ivmc sessions
//!
//! Provides `Strategy` implementations for sequences of base changes and
//! demands over small value domains, plus a brute-force model that tracks
//! what the session should contain.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};

use ivmc::runtime::{RuntimeError, Session};
use ivmc::value::{Tuple, Value};
use ivmc::SelfJoin;
use proptest::collection::vec;
use proptest::prelude::*;

// ============================================================================
// Operations
// ============================================================================

/// One user-level change to a session.
#[derive(Clone, Debug)]
pub enum Op {
    Add(&'static str, Tuple),
    Remove(&'static str, Tuple),
    Assign(&'static str, Tuple, Value),
    Unassign(&'static str, Tuple),
    Demand(&'static str, Tuple),
    Undemand(&'static str, Tuple),
}

/// Parameters for edge generation
#[derive(Clone, Copy, Debug)]
pub struct EdgeParams {
    /// Vertices are `0..domain`
    pub domain: i64,
    /// Whether `(a, a)` may be generated
    pub loops: bool,
}

impl Default for EdgeParams {
    fn default() -> Self {
        Self { domain: 5, loops: true }
    }
}

pub fn arb_value(domain: i64) -> impl Strategy<Value = Value> {
    (0..domain).prop_map(Value::Int)
}

pub fn arb_row(arity: usize, domain: i64) -> impl Strategy<Value = Tuple> {
    vec(arb_value(domain), arity..=arity)
}

/// Generate a binary row, optionally excluding self-loops
pub fn arb_edge(params: EdgeParams) -> impl Strategy<Value = Tuple> {
    (0..params.domain, 0..params.domain)
        .prop_filter("no self-loops", move |(a, b)| params.loops || a != b)
        .prop_map(|(a, b)| vec![Value::Int(a), Value::Int(b)])
}

/// Adds outnumber removes so relations grow over a sequence.
pub fn arb_edge_op(rel: &'static str, params: EdgeParams) -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => arb_edge(params).prop_map(move |row| Op::Add(rel, row)),
        2 => arb_edge(params).prop_map(move |row| Op::Remove(rel, row)),
    ]
}

pub fn arb_map_op(map: &'static str, key_arity: usize, domain: i64) -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (arb_row(key_arity, domain), arb_value(domain))
            .prop_map(move |(key, value)| Op::Assign(map, key, value)),
        1 => arb_row(key_arity, domain).prop_map(move |key| Op::Unassign(map, key)),
    ]
}

pub fn arb_demand_op(query: &'static str, arity: usize, domain: i64) -> impl Strategy<Value = Op> {
    prop_oneof![
        arb_row(arity, domain).prop_map(move |params| Op::Demand(query, params)),
        arb_row(arity, domain).prop_map(move |params| Op::Undemand(query, params)),
    ]
}

/// Generate a sequence of edge operations on one relation
pub fn arb_edge_ops(
    rel: &'static str,
    params: EdgeParams,
    max_len: usize,
) -> impl Strategy<Value = Vec<Op>> {
    vec(arb_edge_op(rel, params), 0..=max_len)
}

pub fn arb_selfjoin() -> impl Strategy<Value = SelfJoin> {
    prop::sample::select(SelfJoin::ALL.to_vec())
}

/// Strategies that stay exact when the same row can match two occurrences.
pub fn arb_exact_selfjoin() -> impl Strategy<Value = SelfJoin> {
    prop::sample::select(vec![SelfJoin::Sub, SelfJoin::Aug, SelfJoin::Das])
}

// ============================================================================
// Reference model
// ============================================================================

/// What the base relations and user demands of a session should be.
#[derive(Clone, Debug, Default)]
pub struct Model {
    pub rows: BTreeMap<&'static str, BTreeSet<Tuple>>,
    pub maps: BTreeMap<&'static str, BTreeMap<Tuple, Value>>,
    pub demands: BTreeMap<(&'static str, Tuple), u64>,
}

impl Model {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, rel: &str) -> BTreeSet<Tuple> {
        self.rows.get(rel).cloned().unwrap_or_default()
    }

    pub fn map(&self, map: &str) -> BTreeMap<Tuple, Value> {
        self.maps.get(map).cloned().unwrap_or_default()
    }

    pub fn user_demanded(&self, query: &str, params: &[Value]) -> bool {
        self.demands
            .iter()
            .any(|((q, p), n)| *q == query && p.as_slice() == params && *n > 0)
    }

    /// Apply `op` to both the model and `session`. Undemands without a
    /// matching demand are skipped.
    pub fn apply(&mut self, session: &mut Session, op: &Op) -> Result<(), RuntimeError> {
        match op {
            Op::Add(rel, row) => {
                session.add(rel, row.clone())?;
                self.rows.entry(*rel).or_default().insert(row.clone());
            }
            Op::Remove(rel, row) => {
                session.remove(rel, row.clone())?;
                self.rows.entry(*rel).or_default().remove(row);
            }
            Op::Assign(map, key, value) => {
                session.assign(map, key.clone(), value.clone())?;
                self.maps.entry(*map).or_default().insert(key.clone(), value.clone());
            }
            Op::Unassign(map, key) => {
                session.unassign(map, key.clone())?;
                self.maps.entry(*map).or_default().remove(key);
            }
            Op::Demand(query, params) => {
                session.demand(query, params.clone())?;
                *self.demands.entry((*query, params.clone())).or_insert(0) += 1;
            }
            Op::Undemand(query, params) => {
                let Some(n) = self.demands.get_mut(&(*query, params.clone())) else {
                    return Ok(());
                };
                session.undemand(query, params.clone())?;
                *n -= 1;
                if *n == 0 {
                    self.demands.remove(&(*query, params.clone()));
                }
            }
        }
        Ok(())
    }

    /// Release every demand and delete every base row.
    pub fn clear(&mut self, session: &mut Session) -> Result<(), RuntimeError> {
        for ((query, params), n) in std::mem::take(&mut self.demands) {
            for _ in 0..n {
                session.undemand(query, params.clone())?;
            }
        }
        for (rel, rows) in std::mem::take(&mut self.rows) {
            for row in rows {
                session.remove(rel, row)?;
            }
        }
        for (map, entries) in std::mem::take(&mut self.maps) {
            for key in entries.into_keys() {
                session.unassign(map, key)?;
            }
        }
        Ok(())
    }
}

/// Names of derived relations that still hold rows.
pub fn nonempty_derived(session: &Session) -> Vec<String> {
    session
        .store()
        .iter()
        .filter(|r| !r.info().origin.is_base() && !r.is_empty())
        .map(|r| r.name().to_string())
        .collect()
}

// ============================================================================
// Brute-force evaluation
// ============================================================================

fn int(v: &Value) -> i64 {
    v.as_int().unwrap_or_else(|| panic!("expected an int, got {}", v))
}

fn pair(a: i64, b: i64) -> Tuple {
    vec![Value::Int(a), Value::Int(b)]
}

/// `{(x, z) : (x, y) in E, (y, z) in E}` with one count per witness `y`.
pub fn two_hop(edges: &BTreeSet<Tuple>) -> BTreeMap<Tuple, u64> {
    let mut out = BTreeMap::new();
    for e1 in edges {
        for e2 in edges {
            if e1[1] == e2[0] {
                *out.entry(pair(int(&e1[0]), int(&e2[1]))).or_insert(0) += 1;
            }
        }
    }
    out
}

/// `{(x, y, z) : (x, y) in E, (y, z) in E, (z, x) in E}`
pub fn triangles(edges: &BTreeSet<Tuple>) -> BTreeSet<Tuple> {
    let mut out = BTreeSet::new();
    for e1 in edges {
        for e2 in edges {
            if e1[1] != e2[0] {
                continue;
            }
            if edges.contains(&vec![e2[1].clone(), e1[0].clone()]) {
                out.insert(vec![e1[0].clone(), e1[1].clone(), e2[1].clone()]);
            }
        }
    }
    out
}

/// Successors of `x`.
pub fn out_of(edges: &BTreeSet<Tuple>, x: &Value) -> BTreeSet<Value> {
    edges
        .iter()
        .filter(|e| &e[0] == x)
        .map(|e| e[1].clone())
        .collect()
}
