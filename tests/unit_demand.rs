//! Tests for demand-driven maintenance: demand sets, tags and filters

use ivmc::compile::CompileError;
use ivmc::config::CompileOptions;
use ivmc::runtime::{RuntimeError, Session};
use ivmc::store::Origin;
use ivmc::value::{Tuple, Value};
use ivmc::{compile, row, Error, ImplMode};

const CELEB: &str = r#"
relation Followers(2);   // (celeb, follower)
relation Members(2);     // (group, member)
map Loc(1);
map Email(1);

query Match(c, g) = {e : (c, f) in Followers, (g, f) in Members,
                         (f, l) in Loc, l == "NYC", (f, e) in Email};
"#;

fn session(src: &str) -> Session {
    Session::new(compile(src, CompileOptions::default()).unwrap())
}

/// Every derived relation owned by `query`, with its counted contents.
fn owned_state(s: &Session, query: &str) -> Vec<(String, Vec<(Tuple, u64)>)> {
    s.store()
        .iter()
        .filter(|r| r.info().origin.owner() == Some(query))
        .map(|r| (r.name().to_string(), r.sorted_counts()))
        .collect()
}

fn derived_state(s: &Session) -> Vec<(String, Vec<(Tuple, u64)>)> {
    s.store()
        .iter()
        .filter(|r| !r.info().origin.is_base())
        .map(|r| (r.name().to_string(), r.sorted_counts()))
        .collect()
}

fn all_empty(state: &[(String, Vec<(Tuple, u64)>)]) -> bool {
    state.iter().all(|(_, rows)| rows.is_empty())
}

fn celeb_key() -> Tuple {
    row!["C", "G"]
}

/// The four facts that together put U's email in Match(C, G).
fn add_follower_facts(s: &mut Session) {
    s.add("Followers", row!["C", "U"]).unwrap();
    s.add("Members", row!["G", "U"]).unwrap();
    s.assign("Loc", row!["U"], Value::str("NYC")).unwrap();
    s.assign("Email", row!["U"], Value::str("u@x.com")).unwrap();
}

fn remove_follower_facts(s: &mut Session) {
    s.remove("Followers", row!["C", "U"]).unwrap();
    s.remove("Members", row!["G", "U"]).unwrap();
    s.unassign("Loc", row!["U"]).unwrap();
    s.unassign("Email", row!["U"]).unwrap();
}

// ============================================================================
// Celeb scenario
// ============================================================================

#[test]
fn test_celeb_tuple_appears_when_all_conditions_hold() {
    let mut s = session(CELEB);
    assert_eq!(s.program().query("Match").unwrap().impl_mode(), ImplMode::Dem);

    s.demand("Match", celeb_key()).unwrap();
    assert!(s.results("Match").unwrap().is_empty());

    s.add("Followers", row!["C", "U"]).unwrap();
    assert!(s.results("Match").unwrap().is_empty());
    s.add("Members", row!["G", "U"]).unwrap();
    assert!(s.results("Match").unwrap().is_empty());
    s.assign("Loc", row!["U"], Value::str("NYC")).unwrap();
    assert!(s.results("Match").unwrap().is_empty());
    s.assign("Email", row!["U"], Value::str("u@x.com")).unwrap();

    assert_eq!(s.results("Match").unwrap(), vec![row!["C", "G", "u@x.com"]]);
    assert_eq!(s.query("Match", celeb_key()).unwrap(), vec![row!["u@x.com"]]);
}

#[test]
fn test_celeb_removal_and_location_change() {
    let mut s = session(CELEB);
    s.demand("Match", celeb_key()).unwrap();
    add_follower_facts(&mut s);

    s.remove("Members", row!["G", "U"]).unwrap();
    assert!(s.results("Match").unwrap().is_empty());
    s.add("Members", row!["G", "U"]).unwrap();
    assert_eq!(s.results("Match").unwrap().len(), 1);

    s.assign("Loc", row!["U"], Value::str("SF")).unwrap();
    assert!(s.results("Match").unwrap().is_empty());
    s.assign("Loc", row!["U"], Value::str("NYC")).unwrap();
    s.assign("Email", row!["U"], Value::str("u@y.org")).unwrap();
    assert_eq!(s.results("Match").unwrap(), vec![row!["C", "G", "u@y.org"]]);
}

#[test]
fn test_celeb_undemanded_builds_nothing() {
    let mut s = session(CELEB);
    s.demand("Match", celeb_key()).unwrap();
    add_follower_facts(&mut s);
    assert!(!all_empty(&owned_state(&s, "Match")));

    s.undemand("Match", celeb_key()).unwrap();
    assert!(all_empty(&owned_state(&s, "Match")), "{:?}", owned_state(&s, "Match"));

    remove_follower_facts(&mut s);
    add_follower_facts(&mut s);
    assert!(s.results("Match").unwrap().is_empty());
    assert!(all_empty(&owned_state(&s, "Match")));

    // Demanding again rebuilds from current state.
    s.demand("Match", celeb_key()).unwrap();
    assert_eq!(s.results("Match").unwrap(), vec![row!["C", "G", "u@x.com"]]);
}

#[test]
fn test_other_parameters_stay_unmaterialized() {
    let mut s = session(CELEB);
    s.demand("Match", celeb_key()).unwrap();
    add_follower_facts(&mut s);
    s.add("Followers", row!["D", "V"]).unwrap();
    s.add("Members", row!["H", "V"]).unwrap();
    s.assign("Loc", row!["V"], Value::str("NYC")).unwrap();
    s.assign("Email", row!["V"], Value::str("v@x.com")).unwrap();

    assert_eq!(s.results("Match").unwrap(), vec![row!["C", "G", "u@x.com"]]);
    assert_eq!(s.evaluate("Match", &row!["D", "H"]).unwrap(), vec![row!["v@x.com"]]);

    assert_eq!(s.query("Match", row!["D", "H"]).unwrap(), vec![row!["v@x.com"]]);
    assert_eq!(s.results("Match").unwrap().len(), 2);
}

// ============================================================================
// Demand reference counting
// ============================================================================

#[test]
fn test_demand_is_reference_counted() {
    let mut s = session(CELEB);
    add_follower_facts(&mut s);

    s.demand("Match", celeb_key()).unwrap();
    s.demand("Match", celeb_key()).unwrap();
    s.undemand("Match", celeb_key()).unwrap();
    assert!(s.is_demanded("Match", &celeb_key()).unwrap());
    assert_eq!(s.results("Match").unwrap().len(), 1);

    s.undemand("Match", celeb_key()).unwrap();
    assert!(!s.is_demanded("Match", &celeb_key()).unwrap());
    assert!(s.results("Match").unwrap().is_empty());

    assert_eq!(
        s.undemand("Match", celeb_key()),
        Err(RuntimeError::NotDemanded {
            query: "Match".to_string(),
            params: celeb_key()
        })
    );
    assert!(!s.is_poisoned());
}

#[test]
fn test_demand_then_undemand_restores_every_structure() {
    let mut s = session(CELEB);
    add_follower_facts(&mut s);
    s.add("Followers", row!["C", "W"]).unwrap();
    s.add("Members", row!["G", "W"]).unwrap();
    s.demand("Match", row!["C", "H"]).unwrap();
    let before = derived_state(&s);

    s.demand("Match", celeb_key()).unwrap();
    assert_ne!(derived_state(&s), before);
    s.undemand("Match", celeb_key()).unwrap();
    assert_eq!(derived_state(&s), before);
}

#[test]
fn test_query_demands_implicitly() {
    let mut s = session(CELEB);
    add_follower_facts(&mut s);
    assert_eq!(s.query("Match", celeb_key()).unwrap(), vec![row!["u@x.com"]]);
    assert!(s.is_demanded("Match", &celeb_key()).unwrap());
    assert_eq!(
        s.user_demands(),
        vec![("Match".to_string(), celeb_key(), 1)]
    );

    // A second read does not demand again.
    s.query("Match", celeb_key()).unwrap();
    s.undemand("Match", celeb_key()).unwrap();
    assert!(!s.is_demanded("Match", &celeb_key()).unwrap());
}

#[test]
fn test_demand_requires_demand_set() {
    let mut s = session("relation E(2); query Out(x) = {y : (x, y) in E} with impl = inc;");
    assert_eq!(
        s.demand("Out", row![1]),
        Err(RuntimeError::NotDemandDriven("Out".to_string()))
    );
    assert!(matches!(
        s.demand("Nope", row![1]),
        Err(RuntimeError::UnknownQuery(_))
    ));
}

#[test]
fn test_demand_arity_checked() {
    let mut s = session(CELEB);
    assert!(matches!(
        s.demand("Match", row!["C"]),
        Err(RuntimeError::ArityMismatch { expected: 2, found: 1, .. })
    ));
}

// ============================================================================
// Structures
// ============================================================================

#[test]
fn test_celeb_structures() {
    let program = compile(CELEB, CompileOptions::default()).unwrap();
    let q = program.query("Match").unwrap();
    let names: Vec<&str> = q.structures.iter().map(|s| s.target.as_str()).collect();
    assert!(names.contains(&"Match.T_c"), "{:?}", names);
    assert!(names.iter().any(|n| n.starts_with("Match.F")), "{:?}", names);
    for name in &names {
        let info = program.relation(name).unwrap();
        assert!(!info.origin.is_base());
    }
    assert!(matches!(
        program.relation("Match.U").unwrap().origin,
        Origin::DemandSet { .. }
    ));
}

#[test]
fn test_filters_off_keeps_base_relations() {
    let src = format!("{} query NoFilters(c, g) = {{e : (c, f) in Followers, (g, f) in Members, (f, e) in Email}} with filters = off;", CELEB);
    let program = compile(&src, CompileOptions::default()).unwrap();
    let q = program.query("NoFilters").unwrap();
    assert!(q.structures.is_empty(), "{:?}", q.structures);

    let mut s = Session::new(program);
    add_follower_facts(&mut s);
    assert_eq!(s.query("NoFilters", celeb_key()).unwrap(), vec![row!["u@x.com"]]);
    s.remove("Followers", row!["C", "U"]).unwrap();
    assert!(s.query("NoFilters", celeb_key()).unwrap().is_empty());
}

#[test]
fn test_parameterless_dem_query_is_fully_maintained() {
    let program = compile(
        "relation E(2); query All = {(x, y) : (x, y) in E} with impl = dem;",
        CompileOptions::default(),
    )
    .unwrap();
    let q = program.query("All").unwrap();
    assert_eq!(q.impl_mode(), ImplMode::Inc);
    assert!(q.demand_set.is_none());
}

// ============================================================================
// Nested demand
// ============================================================================

const NESTED: &str = "
relation Edge(2);
query Out(x) = {y : (x, y) in Edge};
query Near(a) = {b : (a, m) in Edge, b in Out(m)};
";

#[test]
fn test_outer_demand_feeds_subquery_demand() {
    let mut s = session(NESTED);
    for (a, b) in [(1, 2), (1, 3), (2, 4), (3, 5), (4, 6)] {
        s.add("Edge", row![a, b]).unwrap();
    }
    s.demand("Near", row![1]).unwrap();
    assert_eq!(s.results("Near").unwrap(), vec![row![1, 4], row![1, 5]]);
    assert!(s.is_demanded("Out", &row![2]).unwrap());
    assert!(s.is_demanded("Out", &row![3]).unwrap());
    assert!(!s.is_demanded("Out", &row![4]).unwrap());

    // A new neighbour of 1 pulls in its own demand.
    s.add("Edge", row![1, 4]).unwrap();
    assert!(s.is_demanded("Out", &row![4]).unwrap());
    assert_eq!(s.query("Near", row![1]).unwrap(), vec![row![4], row![5], row![6]]);

    s.remove("Edge", row![1, 2]).unwrap();
    assert!(!s.is_demanded("Out", &row![2]).unwrap());
    assert_eq!(s.query("Near", row![1]).unwrap(), vec![row![5], row![6]]);

    s.undemand("Near", row![1]).unwrap();
    assert!(s.store().get("Out.U").unwrap().is_empty());
    assert!(s.results("Out").unwrap().is_empty());
    assert!(s.results("Near").unwrap().is_empty());
}

#[test]
fn test_user_and_derived_demand_share_a_count() {
    let mut s = session(NESTED);
    s.add("Edge", row![1, 2]).unwrap();
    s.add("Edge", row![2, 3]).unwrap();
    s.demand("Out", row![2]).unwrap();
    s.demand("Near", row![1]).unwrap();
    assert_eq!(s.store().get("Out.U").unwrap().count(&row![2]), 2);

    s.undemand("Near", row![1]).unwrap();
    assert!(s.is_demanded("Out", &row![2]).unwrap());
    assert_eq!(s.query("Out", row![2]).unwrap(), vec![row![3]]);
}

const CHAINED: &str = "
relation E(2);
query S(x) = {y : (x, y) in E};
query Q(a) = {c : b in S(a), c in S(b)};
";

#[test]
fn test_chained_subquery_demand_tears_down() {
    let mut s = session(CHAINED);
    s.add("E", row![1, 2]).unwrap();
    s.add("E", row![2, 1]).unwrap();
    let before = derived_state(&s);

    s.demand("Q", row![1]).unwrap();
    assert_eq!(s.results("Q").unwrap(), vec![row![1, 1]]);
    assert_eq!(s.store().get("S.U").unwrap().sorted_rows(), vec![row![1], row![2]]);

    s.undemand("Q", row![1]).unwrap();
    assert!(all_empty(&derived_state(&s)), "{:?}", derived_state(&s));
    assert_eq!(derived_state(&s), before);
}

#[test]
fn test_chained_subquery_demands_only_reachable_arguments() {
    let mut s = session(CHAINED);
    for (a, b) in [(1, 2), (2, 3), (5, 6), (6, 7)] {
        s.add("E", row![a, b]).unwrap();
    }
    s.demand("S", row![5]).unwrap();
    s.demand("Q", row![1]).unwrap();
    assert_eq!(s.query("Q", row![1]).unwrap(), vec![row![3]]);
    assert!(s.is_demanded("S", &row![2]).unwrap());
    // Outputs of S(5) are not arguments of anything Q demanded.
    assert!(!s.is_demanded("S", &row![6]).unwrap());

    s.undemand("Q", row![1]).unwrap();
    assert_eq!(s.store().get("S.U").unwrap().sorted_rows(), vec![row![5]]);
    assert_eq!(s.results("S").unwrap(), vec![row![5, 6]]);
}

#[test]
fn test_ungrounded_subquery_argument() {
    let err = compile(
        "relation Edge(2);
         query Out(x) = {y : (x, y) in Edge};
         query Bad(a) = {b : b in Out(m), (a, m) in Edge};",
        CompileOptions::default(),
    )
    .unwrap_err();
    match err {
        Error::Compile(CompileError::UngroundedDemandParameter { query, subquery, param }) => {
            assert_eq!(query, "Bad");
            assert_eq!(subquery, "Out");
            assert_eq!(param, "m");
        }
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_fully_maintained_query_cannot_read_demand_driven_one_whole() {
    let err = compile(
        "relation Edge(2);
         query Out(x) = {y : (x, y) in Edge};
         query All = {(x, y) : (x, y) in Out};",
        CompileOptions::default(),
    )
    .unwrap_err();
    assert!(
        matches!(err, Error::Compile(CompileError::MalformedQuery { .. })),
        "{:?}",
        err
    );
}
