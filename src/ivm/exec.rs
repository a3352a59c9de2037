//! Interpreter for maintenance code.
//!
//! [`run`] executes a maintenance function against a read-only [`Store`] and
//! returns the updates it produced, in production order. Applying them is
//! the session's job.

use std::fmt;

use indexmap::IndexMap;

use crate::expr::{Bindings, EvalError, Expr, Var};
use crate::ivm::code::{Code, UpdateOp};
use crate::store::{Relation, Store};
use crate::value::{RowDisplay, Tuple, Value};

/// A change to one row of one relation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Update {
    pub rel: String,
    pub op: UpdateOp,
    pub row: Tuple,
}

impl Update {
    pub fn new(rel: impl Into<String>, op: UpdateOp, row: Tuple) -> Self {
        Self {
            rel: rel.into(),
            op,
            row,
        }
    }
}

impl fmt::Display for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.rel, self.op, RowDisplay(&self.row))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExecError {
    Eval(EvalError),
    /// Two branches of a verified union reached the same binding.
    Disjoint { binding: String },
    /// Generated code referenced something that does not exist.
    Internal(String),
}

impl fmt::Display for ExecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecError::Eval(e) => write!(f, "{}", e),
            ExecError::Disjoint { binding } => write!(
                f,
                "self-join contributions are not disjoint: {} derived by more than one occurrence",
                binding
            ),
            ExecError::Internal(msg) => write!(f, "internal error in generated code: {}", msg),
        }
    }
}

impl std::error::Error for ExecError {}

impl From<EvalError> for ExecError {
    fn from(e: EvalError) -> Self {
        ExecError::Eval(e)
    }
}

/// Variable bindings as a stack that can be rolled back to a mark.
#[derive(Clone, Debug, Default)]
pub struct Env {
    slots: Vec<(Var, Value)>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&mut self, var: Var, value: Value) {
        self.slots.push((var, value));
    }

    pub fn mark(&self) -> usize {
        self.slots.len()
    }

    pub fn reset(&mut self, mark: usize) {
        self.slots.truncate(mark);
    }

    fn values_of(&self, vars: &[Var]) -> Result<Tuple, ExecError> {
        vars.iter()
            .map(|v| {
                self.get(v)
                    .cloned()
                    .ok_or_else(|| ExecError::Internal(format!("variable {} used before binding", v.name())))
            })
            .collect()
    }
}

impl Bindings for Env {
    fn get(&self, var: &Var) -> Option<&Value> {
        self.slots.iter().rev().find(|(v, _)| v == var).map(|(_, value)| value)
    }
}

/// Match `row` against `pattern`, binding fresh variables.
///
/// Already bound variables (including ones bound earlier in the same
/// pattern) must equal the value at their position. On failure the
/// environment may hold partial bindings; callers reset to a mark.
pub fn match_pattern(env: &mut Env, pattern: &[Var], row: &[Value]) -> bool {
    if pattern.len() != row.len() {
        return false;
    }
    for (var, value) in pattern.iter().zip(row) {
        match env.get(var) {
            Some(bound) if bound != value => return false,
            Some(_) => {}
            None => env.bind(var.clone(), value.clone()),
        }
    }
    true
}

struct Sink {
    vars: Vec<Var>,
    verify: bool,
    branch: usize,
    seen: IndexMap<Tuple, usize>,
}

struct Machine<'a> {
    store: &'a Store,
    env: Env,
    out: Vec<Update>,
    sinks: Vec<Sink>,
}

/// Run `code` with the delta variable bound to `delta`.
pub fn run(code: &Code, store: &Store, delta: &[Value]) -> Result<Vec<Update>, ExecError> {
    let mut machine = Machine {
        store,
        env: Env::new(),
        out: Vec::new(),
        sinks: Vec::new(),
    };
    machine.env.bind(Var::delta(), Value::Tuple(delta.to_vec()));
    machine.exec(code)?;
    Ok(machine.out)
}

impl<'a> Machine<'a> {
    fn relation(&self, name: &str) -> Result<&'a Relation, ExecError> {
        let store = self.store;
        store
            .get(name)
            .ok_or_else(|| ExecError::Internal(format!("unknown relation {}", name)))
    }

    fn exec_matches<'r>(
        &mut self,
        rows: impl Iterator<Item = &'r Tuple>,
        pattern: &[Var],
        body: &Code,
    ) -> Result<(), ExecError> {
        for row in rows {
            let mark = self.env.mark();
            if match_pattern(&mut self.env, pattern, row) {
                self.exec(body)?;
            }
            self.env.reset(mark);
        }
        Ok(())
    }

    fn exec(&mut self, code: &Code) -> Result<(), ExecError> {
        match code {
            Code::Block(items) => {
                for item in items {
                    self.exec(item)?;
                }
                Ok(())
            }
            Code::Scan { rel, pattern, body } => {
                let relation = self.relation(rel)?;
                self.exec_matches(relation.iter(), pattern, body)
            }
            Code::Lookup {
                rel,
                mask,
                pattern,
                body,
            } => {
                let relation = self.relation(rel)?;
                let bound: Vec<Var> = mask.bound_vars(pattern).cloned().collect();
                let key = self.env.values_of(&bound)?;
                self.exec_matches(relation.lookup(mask, &key), pattern, body)
            }
            Code::Member { rel, pattern, body } => {
                let relation = self.relation(rel)?;
                let row = self.env.values_of(pattern)?;
                if relation.contains(&row) {
                    self.exec(body)?;
                }
                Ok(())
            }
            Code::Bind { pattern, expr, body } => {
                let value = expr.eval(&self.env)?;
                let items = match value {
                    Value::Tuple(items) if items.len() == pattern.len() => items,
                    value => {
                        return Err(ExecError::Eval(EvalError::ArityMismatch {
                            expected: pattern.len(),
                            value,
                        }))
                    }
                };
                let mark = self.env.mark();
                if match_pattern(&mut self.env, pattern, &items) {
                    self.exec(body)?;
                }
                self.env.reset(mark);
                Ok(())
            }
            Code::If { cond, body } => {
                if cond.eval_condition(&self.env)? {
                    self.exec(body)?;
                }
                Ok(())
            }
            Code::Update { rel, op, expr } => {
                let row = eval_row(expr, &self.env)?;
                self.out.push(Update::new(rel.clone(), *op, row));
                Ok(())
            }
            Code::Union {
                vars,
                verify,
                branches,
                body,
            } => {
                self.sinks.push(Sink {
                    vars: vars.clone(),
                    verify: *verify,
                    branch: 0,
                    seen: IndexMap::new(),
                });
                for (i, branch) in branches.iter().enumerate() {
                    if let Some(sink) = self.sinks.last_mut() {
                        sink.branch = i;
                    }
                    let result = self.exec(branch);
                    if result.is_err() {
                        self.sinks.pop();
                        return result;
                    }
                }
                let sink = self
                    .sinks
                    .pop()
                    .ok_or_else(|| ExecError::Internal("union sink missing".to_string()))?;
                for binding in sink.seen.keys() {
                    let mark = self.env.mark();
                    for (var, value) in vars.iter().zip(binding) {
                        self.env.bind(var.clone(), value.clone());
                    }
                    let result = self.exec(body);
                    self.env.reset(mark);
                    result?;
                }
                Ok(())
            }
            Code::Collect => {
                let sink = self
                    .sinks
                    .last()
                    .ok_or_else(|| ExecError::Internal("collect outside of a union".to_string()))?;
                let binding = self.env.values_of(&sink.vars)?;
                let branch = sink.branch;
                let verify = sink.verify;
                let display = RowDisplay(&binding).to_string();
                if let Some(sink) = self.sinks.last_mut() {
                    match sink.seen.get(&binding) {
                        Some(first) if *first != branch && verify => {
                            return Err(ExecError::Disjoint { binding: display });
                        }
                        Some(_) => {}
                        None => {
                            sink.seen.insert(binding, branch);
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

/// Evaluate an output expression to a row.
pub fn eval_row<B: Bindings + ?Sized>(expr: &Expr, env: &B) -> Result<Tuple, EvalError> {
    Ok(expr.eval(env)?.into_row())
}
