//! Batch evaluation.
//!
//! Evaluates a query's comprehension from scratch against the current store,
//! ignoring any maintained state. Subqueries are evaluated fresh as well.
//! This is how `impl = batch` queries are answered, and the reference the
//! instrumentation and the tests compare maintained results against.

use std::collections::{BTreeSet, HashMap};

use crate::compile::{CompiledQuery, Program};
use crate::expr::{Bindings, EvalError, Expr, Var};
use crate::ivm::exec::{eval_row, match_pattern, Env};
use crate::ivm::order::{order, PlannedClause};
use crate::ivm::{Clause, ExecError};
use crate::store::{Mask, Store};
use crate::value::{Tuple, Value};

/// Rows of `query` for `params`, without the parameter prefix, sorted.
pub fn evaluate(program: &Program, store: &Store, query: &str, params: &[Value]) -> Result<Vec<Tuple>, ExecError> {
    Evaluator::new(program, store).evaluate(query, params)
}

/// Every row of `query`, parameters included, sorted.
pub fn evaluate_all(program: &Program, store: &Store, query: &str) -> Result<Vec<Tuple>, ExecError> {
    Evaluator::new(program, store).evaluate_all(query)
}

/// Batch evaluator with a cache of subquery results.
pub struct Evaluator<'a> {
    program: &'a Program,
    store: &'a Store,
    cache: HashMap<(String, Option<Tuple>), Vec<Tuple>>,
}

impl<'a> Evaluator<'a> {
    pub fn new(program: &'a Program, store: &'a Store) -> Self {
        Self {
            program,
            store,
            cache: HashMap::new(),
        }
    }

    fn query(&self, name: &str) -> Result<&'a CompiledQuery, ExecError> {
        let program = self.program;
        program
            .query(name)
            .ok_or_else(|| ExecError::Internal(format!("unknown query {}", name)))
    }

    pub fn evaluate(&mut self, query: &str, params: &[Value]) -> Result<Vec<Tuple>, ExecError> {
        let key = (query.to_string(), Some(params.to_vec()));
        if let Some(rows) = self.cache.get(&key) {
            return Ok(rows.clone());
        }
        let q = self.query(query)?;
        if params.len() != q.params.len() {
            return Err(ExecError::Internal(format!(
                "{} takes {} parameters, got {}",
                query,
                q.params.len(),
                params.len()
            )));
        }
        let mut env = Env::new();
        for (p, v) in q.params.iter().zip(params) {
            env.bind(p.clone(), v.clone());
        }
        let output = Expr::Tuple(q.spec.resexp.components());
        let rows = self.run(q, env, &output)?;
        self.cache.insert(key, rows.clone());
        Ok(rows)
    }

    pub fn evaluate_all(&mut self, query: &str) -> Result<Vec<Tuple>, ExecError> {
        let key = (query.to_string(), None);
        if let Some(rows) = self.cache.get(&key) {
            return Ok(rows.clone());
        }
        let q = self.query(query)?;
        let rows = self.run(q, Env::new(), &q.spec.output_expr())?;
        self.cache.insert(key, rows.clone());
        Ok(rows)
    }

    fn run(&mut self, q: &CompiledQuery, env: Env, output: &Expr) -> Result<Vec<Tuple>, ExecError> {
        let bound: BTreeSet<Var> = q
            .params
            .iter()
            .filter(|p| env.get(*p).is_some())
            .cloned()
            .collect();
        let plan = order(&q.spec.join, bound, None).map_err(|e| ExecError::Internal(e.to_string()))?;
        let mut search = Search {
            evaluator: self,
            env,
            output,
            rows: BTreeSet::new(),
        };
        search.step(&plan)?;
        Ok(search.rows.into_iter().collect())
    }
}

struct Search<'e, 'a> {
    evaluator: &'e mut Evaluator<'a>,
    env: Env,
    output: &'e Expr,
    rows: BTreeSet<Tuple>,
}

impl Search<'_, '_> {
    fn matches(&mut self, rest: &[PlannedClause], pattern: &[Var], rows: Vec<Tuple>) -> Result<(), ExecError> {
        for row in rows {
            let mark = self.env.mark();
            if match_pattern(&mut self.env, pattern, &row) {
                self.step(rest)?;
            }
            self.env.reset(mark);
        }
        Ok(())
    }

    fn bound_values(&self, vars: &[Var]) -> Result<Tuple, ExecError> {
        vars.iter()
            .map(|v| {
                self.env
                    .get(v)
                    .cloned()
                    .ok_or_else(|| ExecError::Eval(EvalError::Unbound(v.clone())))
            })
            .collect()
    }

    fn step(&mut self, plan: &[PlannedClause]) -> Result<(), ExecError> {
        let Some((first, rest)) = plan.split_first() else {
            let row = eval_row(self.output, &self.env)?;
            self.rows.insert(row);
            return Ok(());
        };
        match &first.clause {
            Clause::Member { lhs, rel } | Clause::MapMember { lhs, rel, .. } => {
                let rows = if self.evaluator.program.query(rel).is_some() {
                    self.evaluator.evaluate_all(rel)?
                } else {
                    let relation = self
                        .evaluator
                        .store
                        .get(rel)
                        .ok_or_else(|| ExecError::Internal(format!("unknown relation {}", rel)))?;
                    let mask = Mask::from_pattern(lhs, &first.bound_before);
                    if mask.is_all_unbound() {
                        relation.iter().cloned().collect()
                    } else if mask.is_all_bound() {
                        let row = self.bound_values(lhs)?;
                        if relation.contains(&row) {
                            vec![row]
                        } else {
                            Vec::new()
                        }
                    } else {
                        let bound: Vec<Var> = mask.bound_vars(lhs).cloned().collect();
                        let key = self.bound_values(&bound)?;
                        relation.lookup(&mask, &key).cloned().collect()
                    }
                };
                self.matches(rest, lhs, rows)
            }
            Clause::Demand { inner, query, params } => {
                let args = self.bound_values(params)?;
                let suffixes = self.evaluator.evaluate(query, &args)?;
                let rows = suffixes
                    .into_iter()
                    .map(|suffix| {
                        let mut row = args.clone();
                        row.extend(suffix);
                        row
                    })
                    .collect();
                self.matches(rest, inner.lhs_vars(), rows)
            }
            Clause::Singleton { lhs, expr } => match expr.eval(&self.env)? {
                Value::Tuple(items) if items.len() == lhs.len() => self.matches(rest, lhs, vec![items]),
                value => Err(ExecError::Eval(EvalError::ArityMismatch {
                    expected: lhs.len(),
                    value,
                })),
            },
            Clause::Cond(expr) => {
                if expr.eval_condition(&self.env)? {
                    self.step(rest)?;
                }
                Ok(())
            }
            Clause::Delta { .. } | Clause::Without { .. } | Clause::With { .. } => Err(ExecError::Internal(
                format!("maintenance clause {} in a batch plan", first.clause),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compile::Compiler;
    use crate::config::CompileOptions;
    use crate::row;
    use crate::store::RelationInfo;

    fn setup(src: &str) -> (Program, Store) {
        let program = Compiler::new(CompileOptions::default())
            .compile(&crate::parse(src).unwrap())
            .unwrap();
        let mut store = Store::new();
        for info in program.catalog() {
            store.declare(RelationInfo::clone(info));
        }
        (program, store)
    }

    #[test]
    fn test_paths() {
        let (program, mut store) = setup("relation E(2); query P = {(x, z) : (x, y) in E, (y, z) in E};");
        for (a, b) in [(1, 2), (2, 3), (3, 4)] {
            store.incref("E", row![a, b]);
        }
        assert_eq!(
            evaluate(&program, &store, "P", &[]).unwrap(),
            vec![row![1, 3], row![2, 4]]
        );
    }

    #[test]
    fn test_parameterized_suffixes() {
        let (program, mut store) = setup("relation E(2); query Out(x) = {y : (x, y) in E};");
        for (a, b) in [(1, 2), (1, 3), (2, 3)] {
            store.incref("E", row![a, b]);
        }
        assert_eq!(
            evaluate(&program, &store, "Out", &row![1]).unwrap(),
            vec![row![2], row![3]]
        );
        assert_eq!(evaluate_all(&program, &store, "Out").unwrap().len(), 3);
    }

    #[test]
    fn test_subquery_and_singleton() {
        let (program, mut store) = setup(
            "relation E(2);
             query Out(x) = {y : (x, y) in E};
             query Twice(x) = {z : (x, _) in E, y in Out(x), z in {y * 2}};",
        );
        for (a, b) in [(1, 2), (1, 5)] {
            store.incref("E", row![a, b]);
        }
        assert_eq!(
            evaluate(&program, &store, "Twice", &row![1]).unwrap(),
            vec![row![4], row![10]]
        );
    }

    #[test]
    fn test_type_error_surfaces() {
        let (program, mut store) = setup("relation R(1); query Q = {x : x in R, x < 3};");
        store.incref("R", row!["a"]);
        assert!(matches!(
            evaluate(&program, &store, "Q", &[]),
            Err(ExecError::Eval(EvalError::TypeMismatch { .. }))
        ));
    }
}
