//! Unit tests for REPL input handling, execution and redeclaration

use std::fs;
use std::path::PathBuf;

use ivmc::config::CompileOptions;
use ivmc::repl::{ExecuteResult, InputResult, MetaCommand, ReplState};
use ivmc::{row, SelfJoin};
use tempfile::tempdir;

fn repl() -> ReplState {
    ReplState::new(CompileOptions::default())
}

fn rows_of(results: &[ExecuteResult]) -> Vec<ivmc::Tuple> {
    match results.last() {
        Some(ExecuteResult::Rows { rows, .. }) => rows.clone(),
        other => panic!("expected rows, got {:?}", other),
    }
}

// ============================================================================
// Line handling
// ============================================================================

#[test]
fn test_single_line_statement_is_complete() {
    let mut state = repl();
    match state.process_line("relation R(1);") {
        InputResult::Input(s) => assert_eq!(s, "relation R(1);"),
        other => panic!("expected input, got {:?}", other),
    }
    assert!(matches!(state.process_line("   "), InputResult::Empty));
}

#[test]
fn test_open_braces_continue_input() {
    let mut state = repl();
    assert!(matches!(state.process_line("query Q = {x :"), InputResult::Incomplete));
    assert_eq!(state.bracket_depth, 1);
    assert!(matches!(state.process_line(""), InputResult::Incomplete));
    match state.process_line("  x in R};") {
        InputResult::Input(s) => assert_eq!(s, "query Q = {x :\n  x in R};"),
        other => panic!("expected input, got {:?}", other),
    }
    assert_eq!(state.bracket_depth, 0);
    assert!(state.input_buffer.is_empty());
}

#[test]
fn test_comment_does_not_count_brackets() {
    let mut state = repl();
    assert!(matches!(
        state.process_line("add R(1); // (unbalanced"),
        InputResult::Input(_)
    ));
}

#[test]
fn test_missing_semicolon_waits() {
    let mut state = repl();
    assert!(matches!(state.process_line("add R(1)"), InputResult::Incomplete));
    assert_eq!(state.force_submit(), Some("add R(1)".to_string()));
    assert_eq!(state.force_submit(), None);
}

#[test]
fn test_meta_command_only_at_statement_start() {
    let mut state = repl();
    assert!(matches!(
        state.process_line(":list"),
        InputResult::MetaCommand(MetaCommand::List)
    ));
    assert!(matches!(state.process_line("query Q = {x :"), InputResult::Incomplete));
    assert!(matches!(state.process_line(":list"), InputResult::Incomplete));
}

#[test]
fn test_meta_command_aliases() {
    assert_eq!(MetaCommand::parse(":q"), MetaCommand::Quit);
    assert_eq!(MetaCommand::parse(":exit"), MetaCommand::Quit);
    assert_eq!(MetaCommand::parse(":?"), MetaCommand::Help(None));
    assert_eq!(
        MetaCommand::parse(":help syntax"),
        MetaCommand::Help(Some("syntax".to_string()))
    );
    assert_eq!(MetaCommand::parse(":ls"), MetaCommand::List);
    assert_eq!(MetaCommand::parse(":e Match"), MetaCommand::Explain("Match".to_string()));
    assert_eq!(MetaCommand::parse(":r Loc"), MetaCommand::Relation("Loc".to_string()));
    assert_eq!(
        MetaCommand::parse(":load prog.ivm"),
        MetaCommand::Source(PathBuf::from("prog.ivm"))
    );
    assert_eq!(MetaCommand::parse(":reset"), MetaCommand::Reset);
}

#[test]
fn test_meta_command_errors() {
    assert!(matches!(MetaCommand::parse(":explain"), MetaCommand::Unknown(_)));
    assert!(matches!(MetaCommand::parse(":source"), MetaCommand::Unknown(_)));
    match MetaCommand::parse(":frobnicate") {
        MetaCommand::Unknown(msg) => assert!(msg.contains("frobnicate")),
        other => panic!("unexpected {:?}", other),
    }
}

// ============================================================================
// Execution
// ============================================================================

#[test]
fn test_declarations_and_commands() {
    let mut state = repl();
    let results = state
        .execute(
            "relation Edge(2);
             query Paths = {(x, z) : (x, y) in Edge, (y, z) in Edge};
             add Edge(1, 2);
             add Edge(2, 3);
             add Edge(2, 3);
             show Paths;",
        )
        .unwrap();
    assert_eq!(
        results[0],
        ExecuteResult::Declared {
            kind: "relation",
            name: "Edge".to_string()
        }
    );
    assert_eq!(results[0].to_string(), "Defined relation Edge");
    assert_eq!(results[2].to_string(), "add Edge(1, 2)");
    assert_eq!(results[4].to_string(), "add Edge(2, 3) (no change)");
    assert_eq!(rows_of(&results), vec![row![1, 3]]);
    assert_eq!(results[5].to_string(), "Paths: 1 row\n  (1, 3)\n");
}

#[test]
fn test_show_with_arguments_demands() {
    let mut state = repl();
    state
        .execute(
            "relation Edge(2);
             query Out(x) = {y : (x, y) in Edge};
             add Edge(1, 2); add Edge(1, 3);",
        )
        .unwrap();
    let rows = rows_of(&state.execute("show Out(1);").unwrap());
    assert_eq!(rows, vec![row![2], row![3]]);
    assert!(state.session().is_demanded("Out", &row![1]).unwrap());
    assert_eq!(
        rows_of(&state.execute("show Out;").unwrap()),
        vec![row![1, 2], row![1, 3]]
    );
    assert_eq!(rows_of(&state.execute("show Edge;").unwrap()).len(), 2);
}

#[test]
fn test_command_arguments_are_evaluated() {
    let mut state = repl();
    let results = state
        .execute(
            "map Score(1);
             set Score(\"ann\") = 40 + 2;
             set Score(\"bob\") = -(3 * 2);
             show Score;",
        )
        .unwrap();
    assert_eq!(results[1].to_string(), "set Score(\"ann\",) = 42");
    assert_eq!(rows_of(&results), vec![row!["ann", 42], row!["bob", -6]]);
    assert!(state.execute("add Score(x, 1);").unwrap_err().contains("not a constant"));
}

#[test]
fn test_redeclaration_keeps_rows_and_demands() {
    let mut state = repl();
    state
        .execute(
            "relation Edge(2);
             query Out(x) = {y : (x, y) in Edge};
             add Edge(1, 2);
             demand Out(1);
             demand Out(1);",
        )
        .unwrap();
    state
        .execute("query Rev = {(y, x) : (x, y) in Edge};")
        .unwrap();

    let session = state.session();
    assert_eq!(session.results("Rev").unwrap(), vec![row![2, 1]]);
    assert_eq!(session.results("Out").unwrap(), vec![row![1, 2]]);
    assert_eq!(session.user_demands(), vec![("Out".to_string(), row![1], 2)]);

    state.execute("undemand Out(1); undemand Out(1);").unwrap();
    assert!(state.session().results("Out").unwrap().is_empty());
}

#[test]
fn test_failed_declaration_changes_nothing() {
    let mut state = repl();
    state.execute("relation R(1); add R(1);").unwrap();
    let err = state.execute("query Q = {x : x in Missing};").unwrap_err();
    assert!(err.contains("Missing"), "{}", err);
    assert!(state.list_queries().is_empty());
    assert_eq!(state.relation_rows("R"), Some(vec![(row![1], 1)]));

    let err = state.execute("relation R(2);").unwrap_err();
    assert!(err.contains("more than once"), "{}", err);
}

#[test]
fn test_execution_stops_at_first_error() {
    let mut state = repl();
    state.execute("relation R(1);").unwrap();
    let err = state
        .execute("add R(1); add Nope(2); add R(2);")
        .unwrap_err();
    assert!(err.contains("unknown relation Nope"), "{}", err);
    assert_eq!(state.relation_rows("R"), Some(vec![(row![1], 1)]));
}

#[test]
fn test_parse_errors_change_nothing() {
    let mut state = repl();
    state.execute("relation R(1);").unwrap();
    assert!(state.execute("add R(1); add R(2)").is_err());
    assert_eq!(state.relation_rows("R"), Some(vec![]));
}

#[test]
fn test_reset_forgets_everything() {
    let mut state = repl();
    state.execute("relation R(1); add R(1);").unwrap();
    state.reset();
    assert!(state.list_relations().is_empty());
    assert!(state.execute("add R(1);").is_err());
}

// ============================================================================
// Inspection
// ============================================================================

#[test]
fn test_list_relations_and_queries() {
    let mut state = repl();
    state
        .execute(
            "relation Followers(2);
             map Loc(1);
             query Nearby(c) = {f : (c, f) in Followers, (f, l) in Loc, l == \"NYC\"};
             query Everyone = {f : (_, f) in Followers};
             add Followers(1, 2);",
        )
        .unwrap();

    let relations = state.list_relations();
    let kind = |name: &str| {
        relations
            .iter()
            .find(|r| r.name == name)
            .map(|r| r.kind)
            .unwrap_or_else(|| panic!("missing {}", name))
    };
    assert_eq!(kind("Followers"), "relation");
    assert_eq!(kind("Loc"), "map");
    assert_eq!(kind("Nearby"), "result");
    assert_eq!(kind("Nearby.U"), "demand set");
    assert_eq!(kind("Everyone"), "result");
    let everyone = relations.iter().find(|r| r.name == "Everyone").unwrap();
    assert!(everyone.counted);
    assert_eq!(everyone.rows, 1);

    let queries = state.list_queries();
    assert_eq!(queries.len(), 2);
    let nearby = queries.iter().find(|q| q.name == "Nearby").unwrap();
    assert_eq!(nearby.params, vec!["c".to_string()]);
    assert_eq!(nearby.impl_mode, "dem");
    assert!(nearby.handlers > 0);
    let everyone = queries.iter().find(|q| q.name == "Everyone").unwrap();
    assert_eq!(everyone.impl_mode, "inc");
}

#[test]
fn test_explain_describes_query() {
    let mut state = ReplState::new(CompileOptions {
        selfjoin: SelfJoin::Aug,
        ..CompileOptions::default()
    });
    state
        .execute("relation E(2); query P = {(x, z) : (x, y) in E, (y, z) in E};")
        .unwrap();
    let text = state.explain("P").unwrap();
    assert!(text.starts_with("query P"), "{}", text);
    assert!(text.contains("selfjoin = aug"), "{}", text);
    assert!(text.contains("result: P"), "{}", text);
    assert!(state.explain("Missing").is_none());
}

#[test]
fn test_relation_rows_show_counts() {
    let mut state = repl();
    state
        .execute(
            "relation E(2); query Src = {x : (x, _) in E};
             add E(1, 2); add E(1, 3);",
        )
        .unwrap();
    assert_eq!(state.relation_rows("Src"), Some(vec![(row![1], 2)]));
    assert_eq!(state.relation_rows("Nope"), None);
}

// ============================================================================
// Source files
// ============================================================================

#[test]
fn test_source_file() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("celeb.ivm");
    fs::write(
        &path,
        "// followers of a celebrity living in NYC
relation Followers(2);
map Loc(1);
query Local(c) = {f : (c, f) in Followers, (f, l) in Loc, l == \"NYC\"};
add Followers(\"star\", \"ann\");
set Loc(\"ann\") = \"NYC\";
show Local(\"star\");
",
    )
    .unwrap();

    let mut state = repl();
    let results = state.source(&path).unwrap();
    assert_eq!(results.len(), 6);
    assert_eq!(rows_of(&results), vec![row!["ann"]]);
}

#[test]
fn test_source_missing_file() {
    let dir = tempdir().unwrap();
    let mut state = repl();
    let err = state.source(&dir.path().join("absent.ivm")).unwrap_err();
    assert!(err.contains("cannot read"), "{}", err);
}
