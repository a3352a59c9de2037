//! Tests for clause rates and the greedy evaluation-order planner

use std::collections::BTreeSet;

use ivmc::compile::CompileError;
use ivmc::config::CompileOptions;
use ivmc::expr::{BinOp, Expr, Var};
use ivmc::ivm::order::{order, Planner, Rate, RelationSizes};
use ivmc::ivm::{Clause, Join};
use ivmc::{compile, Compiler, Error};

fn vars(names: &[&str]) -> Vec<Var> {
    names.iter().map(|n| Var::new(*n)).collect()
}

fn bound(names: &[&str]) -> BTreeSet<Var> {
    vars(names).into_iter().collect()
}

fn cond(op: BinOp, l: &str, r: &str) -> Clause {
    Clause::Cond(Expr::binary(op, Expr::var(l), Expr::var(r)))
}

fn plan_indices(join: &Join, initially: &[&str]) -> Vec<usize> {
    order(join, bound(initially), None)
        .unwrap()
        .iter()
        .map(|p| p.index)
        .collect()
}

// ============================================================================
// Rates
// ============================================================================

#[test]
fn test_rate_total_order() {
    let rates = [
        Rate::First,
        Rate::ConstantMembership,
        Rate::Constant,
        Rate::Normal,
        Rate::NotPreferred,
        Rate::Unrunnable,
    ];
    for pair in rates.windows(2) {
        assert!(pair[0] < pair[1], "{:?} < {:?}", pair[0], pair[1]);
    }
}

#[test]
fn test_member_rate_depends_on_bound_positions() {
    let c = Clause::member(vars(&["x", "y"]), "E");
    assert_eq!(c.rate(&bound(&[])), Rate::NotPreferred);
    assert_eq!(c.rate(&bound(&["x"])), Rate::Normal);
    assert_eq!(c.rate(&bound(&["x", "y"])), Rate::ConstantMembership);
}

#[test]
fn test_singleton_and_delta_rates() {
    let single = Clause::Singleton {
        lhs: vars(&["y"]),
        expr: Expr::Tuple(vec![Expr::var("x")]),
    };
    assert!(single.rate(&bound(&["x"])) <= Rate::Constant);

    let delta = Clause::member(vars(&["x", "y"]), "E").singletonize(Expr::Var(Var::delta()));
    assert_eq!(delta.rate(&bound(&[])), Rate::First);
}

#[test]
fn test_condition_waits_for_its_variables() {
    let c = cond(BinOp::Lt, "x", "y");
    assert_eq!(c.rate(&bound(&["x"])), Rate::Unrunnable);
    assert_eq!(c.rate(&bound(&["x", "y"])), Rate::Constant);
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn test_bound_variables_pull_clauses_forward() {
    // With z bound, the second clause becomes an indexed lookup.
    let join = Join::new(vec![
        Clause::member(vars(&["x", "y"]), "E"),
        Clause::member(vars(&["y", "z"]), "E"),
    ]);
    assert_eq!(plan_indices(&join, &[]), vec![0, 1]);
    assert_eq!(plan_indices(&join, &["z"]), vec![1, 0]);
}

#[test]
fn test_conditions_run_as_soon_as_possible() {
    let join = Join::new(vec![
        Clause::member(vars(&["x"]), "A"),
        Clause::member(vars(&["y"]), "B"),
        cond(BinOp::Ne, "x", "y"),
        Clause::member(vars(&["y", "z"]), "C"),
    ]);
    assert_eq!(plan_indices(&join, &[]), vec![0, 1, 2, 3]);

    let join = Join::new(vec![
        cond(BinOp::Lt, "x", "y"),
        Clause::member(vars(&["x", "y"]), "E"),
        Clause::member(vars(&["y", "z"]), "E"),
    ]);
    assert_eq!(plan_indices(&join, &[]), vec![1, 0, 2]);
}

#[test]
fn test_ties_break_left_to_right() {
    let join = Join::new(vec![
        Clause::member(vars(&["a"]), "R"),
        Clause::member(vars(&["b"]), "S"),
        Clause::member(vars(&["c"]), "T"),
    ]);
    assert_eq!(plan_indices(&join, &[]), vec![0, 1, 2]);
}

#[test]
fn test_estimator_only_reorders_equal_rates() {
    let join = Join::new(vec![
        Clause::member(vars(&["x"]), "Big"),
        Clause::member(vars(&["x", "y"]), "Huge"),
        Clause::member(vars(&["z"]), "Small"),
    ]);
    let mut sizes = RelationSizes::new();
    sizes.set("Big", 1 << 20);
    sizes.set("Huge", 1 << 30);
    sizes.set("Small", 4);
    let plan: Vec<usize> = order(&join, bound(&[]), Some(&sizes))
        .unwrap()
        .iter()
        .map(|p| p.index)
        .collect();
    // Small is cheapest among unbound scans; Huge is a lookup once x is bound.
    assert_eq!(plan, vec![2, 0, 1]);
}

#[test]
fn test_planner_reports_bound_before_each_step() {
    let join = Join::new(vec![
        Clause::member(vars(&["x", "y"]), "E"),
        Clause::member(vars(&["y", "z"]), "E"),
    ]);
    let plan = order(&join, bound(&[]), None).unwrap();
    assert!(plan[0].bound_before.is_empty());
    assert_eq!(plan[1].bound_before, bound(&["x", "y"]));
}

#[test]
fn test_planner_yields_failure_once() {
    let join = Join::new(vec![
        Clause::member(vars(&["x"]), "A"),
        cond(BinOp::Eq, "x", "w"),
    ]);
    let steps: Vec<_> = Planner::new(&join, bound(&[])).collect();
    assert_eq!(steps.len(), 2);
    assert!(steps[0].is_ok());
    let err = steps[1].as_ref().unwrap_err();
    assert_eq!(err.stuck.len(), 1);
    assert!(err.to_string().contains("w"));
}

#[test]
fn test_planner_is_deterministic_on_larger_joins() {
    let join = Join::new(vec![
        Clause::member(vars(&["a", "b"]), "R"),
        Clause::member(vars(&["b", "c"]), "S"),
        cond(BinOp::Lt, "a", "c"),
        Clause::member(vars(&["c", "d"]), "R"),
        Clause::member(vars(&["d", "a"]), "S"),
        cond(BinOp::Ne, "b", "d"),
    ]);
    let first = order(&join, bound(&[]), None).unwrap();
    for _ in 0..10 {
        assert_eq!(order(&join, bound(&[]), None).unwrap(), first);
    }
}

// ============================================================================
// Through the compiler
// ============================================================================

#[test]
fn test_unorderable_query_names_stuck_clauses() {
    let err = compile(
        "relation R(1); query Q = {x : x in R, x > y};",
        CompileOptions::default(),
    )
    .unwrap_err();
    match err {
        Error::Compile(CompileError::UnorderableJoin { query, stuck }) => {
            assert_eq!(query, "Q");
            assert_eq!(stuck.len(), 1);
            assert!(stuck[0].contains('y'));
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_estimator_reaches_generated_code() {
    let src = "relation Big(1); relation Small(1);
               query Q = {(x, y) : x in Big, y in Small};";
    let file = ivmc::parse(src).unwrap();
    let mut sizes = RelationSizes::new();
    sizes.set("Big", 1 << 20);
    sizes.set("Small", 2);

    let plain = Compiler::new(CompileOptions::default()).compile(&file).unwrap();
    let tuned = Compiler::new(CompileOptions::default())
        .with_estimator(&sizes)
        .compile(&file)
        .unwrap();
    let q = tuned.query("Q").unwrap();
    let plan = order(&q.spec.join, bound(&[]), Some(&sizes)).unwrap();
    assert_eq!(plan[0].index, 1);
    assert_eq!(plain.handler_count(), tuned.handler_count());
}
