//! REPL (Read-Eval-Print Loop) for ivmc
//!
//! Declarations accumulate into a program that is recompiled whenever a new
//! relation, map or query is declared; base rows and outstanding demands
//! carry over to the new session. Commands run against the current session.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::ast::{self, File, Spanned, Statement};
use crate::compile::Compiler;
use crate::config::CompileOptions;
use crate::error::format_statement_error;
use crate::expr::{Expr, NoBindings};
use crate::runtime::Session;
use crate::store::{Origin, RelationKind};
use crate::value::{RowDisplay, Tuple, Value};

/// REPL state: the declarations so far and the session running them.
pub struct ReplState {
    pub options: CompileOptions,
    declarations: Vec<Spanned<Statement>>,
    session: Session,

    /// Multi-line input buffer
    pub input_buffer: String,

    /// Bracket depth for multi-line detection
    pub bracket_depth: i32,
}

impl Default for ReplState {
    fn default() -> Self {
        Self::new(CompileOptions::default())
    }
}

impl ReplState {
    pub fn new(options: CompileOptions) -> Self {
        Self {
            options,
            declarations: Vec::new(),
            session: Session::new(Default::default()),
            input_buffer: String::new(),
            bracket_depth: 0,
        }
    }

    /// Forget every declaration, row and demand.
    pub fn reset(&mut self) {
        self.declarations.clear();
        self.session = Session::new(Default::default());
        self.input_buffer.clear();
        self.bracket_depth = 0;
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Process a line of input, handling multi-line bracket matching
    pub fn process_line(&mut self, line: &str) -> InputResult {
        let trimmed = line.trim();

        if trimmed.is_empty() {
            if self.input_buffer.is_empty() {
                return InputResult::Empty;
            }
            return InputResult::Incomplete;
        }

        // Meta-command (only at start, not in continuation)
        if trimmed.starts_with(':') && self.input_buffer.is_empty() {
            return InputResult::MetaCommand(MetaCommand::parse(trimmed));
        }

        if !self.input_buffer.is_empty() {
            self.input_buffer.push('\n');
        }
        self.input_buffer.push_str(line);

        let code = trimmed.split("//").next().unwrap_or("").trim_end();
        for ch in code.chars() {
            match ch {
                '{' | '(' => self.bracket_depth += 1,
                '}' | ')' => self.bracket_depth -= 1,
                _ => {}
            }
        }

        // Complete when brackets balanced and the statement is terminated
        if self.bracket_depth <= 0 && code.ends_with(';') {
            let input = std::mem::take(&mut self.input_buffer);
            self.bracket_depth = 0;
            InputResult::Input(input)
        } else {
            InputResult::Incomplete
        }
    }

    /// Force submit current buffer (for Ctrl-D or double-empty-line)
    pub fn force_submit(&mut self) -> Option<String> {
        if self.input_buffer.is_empty() {
            None
        } else {
            self.bracket_depth = 0;
            Some(std::mem::take(&mut self.input_buffer))
        }
    }

    /// Execute source text. Stops at the first failing statement; the
    /// statements before it keep their effect.
    pub fn execute(&mut self, source: &str) -> Result<Vec<ExecuteResult>, String> {
        let file = crate::parse(source)?;
        let mut results = Vec::new();
        for stmt in file.statements {
            let span = stmt.span.start..stmt.span.end;
            match self.execute_statement(stmt) {
                Ok(result) => results.push(result),
                Err(msg) => return Err(format_statement_error(source, span, &msg)),
            }
        }
        Ok(results)
    }

    /// Execute the contents of a file.
    pub fn source(&mut self, path: &Path) -> Result<Vec<ExecuteResult>, String> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
        self.execute(&text)
    }

    fn execute_statement(&mut self, stmt: Spanned<Statement>) -> Result<ExecuteResult, String> {
        match &stmt.node {
            Statement::Relation { .. } | Statement::Map { .. } | Statement::Query(_) => self.declare(stmt),
            Statement::Add { rel, args } => {
                let row = constants(args)?;
                let changed = self.session.add(rel, row.clone()).map_err(|e| e.to_string())?;
                Ok(ExecuteResult::Changed {
                    what: format!("add {}{}", rel, RowDisplay(&row)),
                    changed,
                })
            }
            Statement::Remove { rel, args } => {
                let row = constants(args)?;
                let changed = self.session.remove(rel, row.clone()).map_err(|e| e.to_string())?;
                Ok(ExecuteResult::Changed {
                    what: format!("remove {}{}", rel, RowDisplay(&row)),
                    changed,
                })
            }
            Statement::Set { map, keys, value } => {
                let key = constants(keys)?;
                let value = constant(value)?;
                let what = format!("set {}{} = {}", map, RowDisplay(&key), value);
                let changed = self.session.assign(map, key, value).map_err(|e| e.to_string())?;
                Ok(ExecuteResult::Changed { what, changed })
            }
            Statement::Unset { map, keys } => {
                let key = constants(keys)?;
                let what = format!("unset {}{}", map, RowDisplay(&key));
                let changed = self.session.unassign(map, key).map_err(|e| e.to_string())?;
                Ok(ExecuteResult::Changed { what, changed })
            }
            Statement::Demand { query, args } => {
                let params = constants(args)?;
                self.session
                    .demand(query, params.clone())
                    .map_err(|e| e.to_string())?;
                Ok(ExecuteResult::Changed {
                    what: format!("demand {}{}", query, RowDisplay(&params)),
                    changed: true,
                })
            }
            Statement::Undemand { query, args } => {
                let params = constants(args)?;
                self.session
                    .undemand(query, params.clone())
                    .map_err(|e| e.to_string())?;
                Ok(ExecuteResult::Changed {
                    what: format!("undemand {}{}", query, RowDisplay(&params)),
                    changed: true,
                })
            }
            Statement::Show { name, args } => self.show(name, args.as_deref()),
        }
    }

    fn show(&mut self, name: &str, args: Option<&[ast::Expr]>) -> Result<ExecuteResult, String> {
        let is_query = self.session.program().query(name).is_some();
        let rows = match args {
            Some(args) => {
                let params = constants(args)?;
                self.session.query(name, params).map_err(|e| e.to_string())?
            }
            None if is_query => self.session.results(name).map_err(|e| e.to_string())?,
            None => self
                .session
                .relation(name)
                .map(|r| r.sorted_rows())
                .ok_or_else(|| format!("unknown relation or query {}", name))?,
        };
        Ok(ExecuteResult::Rows {
            name: name.to_string(),
            rows,
        })
    }

    /// Add a declaration and move the current rows and demands to a freshly
    /// compiled session.
    fn declare(&mut self, stmt: Spanned<Statement>) -> Result<ExecuteResult, String> {
        let (kind, name) = match &stmt.node {
            Statement::Relation { name, .. } => ("relation", name.clone()),
            Statement::Map { name, .. } => ("map", name.clone()),
            Statement::Query(q) => ("query", q.name.clone()),
            _ => return Err("not a declaration".to_string()),
        };

        let mut statements = self.declarations.clone();
        statements.push(stmt.clone());
        let file = File { statements };
        let program = Compiler::new(self.options)
            .compile(&file)
            .map_err(|e| e.to_string())?;

        let mut session = Session::new(program);
        for rel in self.session.store().iter() {
            if !rel.info().origin.is_base() {
                continue;
            }
            for row in rel.sorted_rows() {
                session.add(rel.name(), row).map_err(|e| e.to_string())?;
            }
        }
        for (query, params, count) in self.session.user_demands() {
            for _ in 0..count {
                session.demand(&query, params.clone()).map_err(|e| e.to_string())?;
            }
        }
        debug!(kind, name = %name, "declared");

        self.declarations.push(stmt);
        self.session = session;
        Ok(ExecuteResult::Declared { kind, name })
    }

    /// Every relation in the current program.
    pub fn list_relations(&self) -> Vec<RelationSummary> {
        self.session
            .store()
            .iter()
            .map(|rel| {
                let info = rel.info();
                RelationSummary {
                    name: info.name.clone(),
                    arity: info.arity,
                    kind: match (&info.origin, info.kind) {
                        (Origin::Base, RelationKind::Set) => "relation",
                        (Origin::Base, RelationKind::Map { .. }) => "map",
                        (Origin::Result { .. }, _) => "result",
                        (Origin::DemandSet { .. }, _) => "demand set",
                        (Origin::Tag { .. }, _) => "tag",
                        (Origin::Filter { .. }, _) => "filter",
                    },
                    counted: info.counted,
                    rows: rel.len(),
                }
            })
            .collect()
    }

    /// Every query in the current program.
    pub fn list_queries(&self) -> Vec<QuerySummary> {
        self.session
            .program()
            .queries()
            .map(|q| QuerySummary {
                name: q.name.clone(),
                params: q.params.iter().map(|p| p.name().to_string()).collect(),
                impl_mode: q.impl_mode().to_string(),
                structures: q.structures.len(),
                handlers: q.handlers.len(),
            })
            .collect()
    }

    pub fn explain(&self, query: &str) -> Option<String> {
        self.session.program().explain(query)
    }

    /// Rows of any relation with their reference counts.
    pub fn relation_rows(&self, name: &str) -> Option<Vec<(Tuple, u64)>> {
        self.session.relation(name).map(|r| r.sorted_counts())
    }
}

fn to_core(e: &ast::Expr) -> Result<Expr, String> {
    Ok(match e {
        ast::Expr::Var(v) => return Err(format!("'{}' is not a constant", v)),
        ast::Expr::Wildcard => return Err("'_' is not a constant".to_string()),
        ast::Expr::Int(n) => Expr::Const(Value::Int(*n)),
        ast::Expr::Str(s) => Expr::Const(Value::Str(s.clone())),
        ast::Expr::Bool(b) => Expr::Const(Value::Bool(*b)),
        ast::Expr::Tuple(items) => Expr::Tuple(items.iter().map(to_core).collect::<Result<_, _>>()?),
        ast::Expr::Unary(ast::UnaryOp::Not, inner) => Expr::Not(Box::new(to_core(inner)?)),
        ast::Expr::Unary(ast::UnaryOp::Neg, inner) => Expr::Neg(Box::new(to_core(inner)?)),
        ast::Expr::Binary(op, l, r) => Expr::binary(*op, to_core(l)?, to_core(r)?),
    })
}

/// Evaluate a command argument.
fn constant(e: &ast::Expr) -> Result<Value, String> {
    to_core(e)?.eval(&NoBindings).map_err(|e| e.to_string())
}

fn constants(args: &[ast::Expr]) -> Result<Tuple, String> {
    args.iter().map(constant).collect()
}

/// Result of processing a line of input
#[derive(Debug)]
pub enum InputResult {
    MetaCommand(MetaCommand),
    Input(String),
    Incomplete,
    Empty,
}

/// Meta-commands supported by the REPL
#[derive(Debug, PartialEq, Eq)]
pub enum MetaCommand {
    Help(Option<String>),
    Quit,
    List,
    Explain(String),
    Relation(String),
    Source(PathBuf),
    Reset,
    Unknown(String),
}

impl MetaCommand {
    pub fn parse(input: &str) -> Self {
        let input = input.trim_start_matches(':').trim();
        let mut parts = input.split_whitespace();
        let cmd = parts.next().unwrap_or("");
        let arg = parts.next();

        match cmd {
            "help" | "h" | "?" => MetaCommand::Help(arg.map(String::from)),
            "quit" | "q" | "exit" => MetaCommand::Quit,
            "list" | "ls" | "l" => MetaCommand::List,
            "explain" | "e" => match arg {
                Some(query) => MetaCommand::Explain(query.to_string()),
                None => MetaCommand::Unknown(":explain requires a query name".to_string()),
            },
            "relation" | "rel" | "r" => match arg {
                Some(name) => MetaCommand::Relation(name.to_string()),
                None => MetaCommand::Unknown(":relation requires a relation name".to_string()),
            },
            "source" | "load" => match arg {
                Some(path) => MetaCommand::Source(PathBuf::from(path)),
                None => MetaCommand::Unknown(":source requires a file path".to_string()),
            },
            "reset" => MetaCommand::Reset,
            other => MetaCommand::Unknown(format!("Unknown command: :{}", other)),
        }
    }
}

/// Outcome of one executed statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecuteResult {
    Declared { kind: &'static str, name: String },
    Changed { what: String, changed: bool },
    Rows { name: String, rows: Vec<Tuple> },
}

impl fmt::Display for ExecuteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecuteResult::Declared { kind, name } => write!(f, "Defined {} {}", kind, name),
            ExecuteResult::Changed { what, changed: true } => write!(f, "{}", what),
            ExecuteResult::Changed { what, changed: false } => write!(f, "{} (no change)", what),
            ExecuteResult::Rows { name, rows } => {
                writeln!(f, "{}: {} row{}", name, rows.len(), if rows.len() == 1 { "" } else { "s" })?;
                for row in rows {
                    writeln!(f, "  {}", RowDisplay(row))?;
                }
                Ok(())
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelationSummary {
    pub name: String,
    pub arity: usize,
    pub kind: &'static str,
    pub counted: bool,
    pub rows: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuerySummary {
    pub name: String,
    pub params: Vec<String>,
    pub impl_mode: String,
    pub structures: usize,
    pub handlers: usize,
}
