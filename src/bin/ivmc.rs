//! ivmc REPL - Interactive environment for incrementally maintained queries
//!
//! Usage: ivmc [--explain] [source_files...]
//!
//! Commands:
//!   :help         - Show help
//!   :quit         - Exit REPL
//!   :list         - List relations and queries
//!   :explain Q    - Show the maintenance code of query Q
//!   :relation R   - Show the rows of R with their counts
//!   :source FILE  - Load and execute a file
//!   :reset        - Reset all state

use std::fs;
use std::path::{Path, PathBuf};

use rustyline::error::ReadlineError;
use rustyline::history::DefaultHistory;
use rustyline::{Config, Editor};
use tracing_subscriber::EnvFilter;

use ivmc::config::CompileOptions;
use ivmc::repl::{ExecuteResult, InputResult, MetaCommand, ReplState};
use ivmc::value::RowDisplay;

const VERSION: &str = env!("CARGO_PKG_VERSION");
const PROMPT: &str = "ivmc> ";
const CONTINUATION: &str = "....  ";

struct Args {
    explain: bool,
    source_files: Vec<PathBuf>,
}

/// Parse command line arguments.
///
/// Usage: ivmc [--explain] [source_files...]
///
/// Options:
///   --explain       Print the maintenance code of every query after loading
///   -h, --help      Show help and exit
///   -v, --version   Show version and exit
fn parse_args(args: &[String]) -> Args {
    let mut parsed = Args {
        explain: false,
        source_files: Vec::new(),
    };

    for arg in args {
        match arg.as_str() {
            "--explain" => parsed.explain = true,
            "-h" | "--help" => {
                println!("ivmc v{} - Incremental view maintenance REPL", VERSION);
                println!();
                println!("Usage: ivmc [OPTIONS] [source_files...]");
                println!();
                println!("Options:");
                println!("  --explain        Print maintenance code for each query after loading");
                println!("  -h, --help       Show this help message");
                println!("  -v, --version    Show version");
                println!();
                println!("Environment:");
                println!("  {}     Default self-join strategy", CompileOptions::ENV_SELFJOIN);
                println!("  {}           Default reference counting (yes, no, safe)", CompileOptions::ENV_RC);
                println!("  {}         Default implementation (batch, inc, dem)", CompileOptions::ENV_IMPL);
                println!("  {}      Default for demand filters (on, off)", CompileOptions::ENV_FILTERS);
                println!("  {}   Check maintained results after every change", CompileOptions::ENV_INSTRUMENT);
                println!("  RUST_LOG          Log filter (default: ivmc=info)");
                std::process::exit(0);
            }
            "-v" | "--version" => {
                println!("ivmc v{}", VERSION);
                std::process::exit(0);
            }
            _ if arg.starts_with('-') => {
                eprintln!("Error: Unknown option '{}'", arg);
                eprintln!("Try 'ivmc --help' for usage information");
                std::process::exit(1);
            }
            _ => parsed.source_files.push(PathBuf::from(arg)),
        }
    }

    parsed
}

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let args = parse_args(&args);

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ivmc=info")))
        .with_writer(std::io::stderr)
        .init();

    let options = match CompileOptions::from_env() {
        Ok(options) => options,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    println!("ivmc v{} - Incremental view maintenance REPL", VERSION);
    println!("Type :help for help, :quit to exit\n");

    let mut state = ReplState::new(options);

    for source_file in &args.source_files {
        handle_source(&mut state, source_file);
    }
    if args.explain {
        let names: Vec<String> = state.list_queries().into_iter().map(|q| q.name).collect();
        for name in names {
            handle_explain(&state, &name);
        }
    }

    let config = Config::builder().auto_add_history(true).build();
    let mut rl: Editor<(), DefaultHistory> = match Editor::with_config(config) {
        Ok(rl) => rl,
        Err(e) => {
            eprintln!("Error: failed to create editor: {}", e);
            std::process::exit(1);
        }
    };

    let history_path = dirs_history_path();
    if let Some(ref path) = history_path {
        let _ = rl.load_history(path);
    }

    loop {
        let prompt = if state.input_buffer.is_empty() {
            PROMPT
        } else {
            CONTINUATION
        };

        match rl.readline(prompt) {
            Ok(line) => match state.process_line(&line) {
                InputResult::MetaCommand(cmd) => {
                    if !handle_command(&mut state, cmd) {
                        break;
                    }
                }
                InputResult::Input(source) => handle_input(&mut state, &source),
                InputResult::Incomplete | InputResult::Empty => {}
            },
            Err(ReadlineError::Interrupted) => {
                // Ctrl-C clears the current buffer
                if !state.input_buffer.is_empty() {
                    state.input_buffer.clear();
                    state.bracket_depth = 0;
                    println!("^C");
                } else {
                    println!("Use :quit or Ctrl-D to exit");
                }
            }
            Err(ReadlineError::Eof) => {
                if let Some(source) = state.force_submit() {
                    handle_input(&mut state, &source);
                } else {
                    println!("\nGoodbye!");
                    break;
                }
            }
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        }
    }

    if let Some(ref path) = history_path {
        if let Some(parent) = path.parent() {
            let _ = fs::create_dir_all(parent);
        }
        let _ = rl.save_history(path);
    }
}

/// Handle a meta-command. Returns false if we should exit.
fn handle_command(state: &mut ReplState, cmd: MetaCommand) -> bool {
    match cmd {
        MetaCommand::Help(topic) => print_help(topic.as_deref()),
        MetaCommand::Quit => {
            println!("Goodbye!");
            return false;
        }
        MetaCommand::List => handle_list(state),
        MetaCommand::Explain(query) => handle_explain(state, &query),
        MetaCommand::Relation(name) => match state.relation_rows(&name) {
            Some(rows) => {
                println!("{}: {} row{}", name, rows.len(), if rows.len() == 1 { "" } else { "s" });
                for (row, count) in rows {
                    if count == 1 {
                        println!("  {}", RowDisplay(&row));
                    } else {
                        println!("  {}  x{}", RowDisplay(&row), count);
                    }
                }
            }
            None => eprintln!("Unknown relation: {}", name),
        },
        MetaCommand::Source(path) => handle_source(state, &path),
        MetaCommand::Reset => {
            state.reset();
            println!("State reset.");
        }
        MetaCommand::Unknown(msg) => {
            eprintln!("{}", msg);
            eprintln!("Type :help for available commands");
        }
    }
    true
}

fn handle_input(state: &mut ReplState, source: &str) {
    match state.execute(source) {
        Ok(results) => print_results(&results),
        Err(e) => eprintln!("{}", e),
    }
    if state.session().is_poisoned() {
        eprintln!("Session is inconsistent; use :reset to start over");
    }
}

fn print_results(results: &[ExecuteResult]) {
    for result in results {
        match result {
            ExecuteResult::Rows { .. } => print!("{}", result),
            _ => println!("{}", result),
        }
    }
}

fn handle_source(state: &mut ReplState, path: &Path) {
    println!("Loading {}...", path.display());
    match state.source(path) {
        Ok(results) => print_results(&results),
        Err(e) => eprintln!("{}", e),
    }
}

fn handle_list(state: &ReplState) {
    let relations = state.list_relations();
    let queries = state.list_queries();
    if relations.is_empty() && queries.is_empty() {
        println!("Nothing declared yet.");
        return;
    }
    if !relations.is_empty() {
        println!("Relations:");
        for r in &relations {
            let counted = if r.counted { ", counted" } else { "" };
            println!("  {}/{} ({}{}) - {} rows", r.name, r.arity, r.kind, counted, r.rows);
        }
    }
    if !queries.is_empty() {
        println!("Queries:");
        for q in &queries {
            println!(
                "  {}({}) impl={} - {} structures, {} handlers",
                q.name,
                q.params.join(", "),
                q.impl_mode,
                q.structures,
                q.handlers
            );
        }
    }
}

fn handle_explain(state: &ReplState, query: &str) {
    match state.explain(query) {
        Some(text) => println!("{}", text),
        None => eprintln!("Unknown query: {}", query),
    }
}

fn print_help(topic: Option<&str>) {
    match topic {
        None => {
            println!("ivmc REPL Commands:");
            println!();
            println!("  :help [topic]     Show help (topics: syntax, options)");
            println!("  :quit             Exit the REPL");
            println!("  :list             List relations and queries");
            println!("  :explain <query>  Show the maintenance code of a query");
            println!("  :relation <name>  Show the rows of a relation with their counts");
            println!("  :source <file>    Load and execute a file");
            println!("  :reset            Reset all state");
            println!();
            println!("Enter declarations and commands directly, each ending with ';'.");
            println!("Multi-line input is supported - brackets are matched automatically.");
        }
        Some("syntax") => {
            println!("Syntax:");
            println!();
            println!("  relation Edge(2);");
            println!("  map Weight(1);");
            println!("  query Path = {{(x, z) : (x, y) in Edge, (y, z) in Edge}};");
            println!("  query Out(x) = {{y : (x, y) in Edge}} with impl = dem;");
            println!();
            println!("  add Edge(1, 2);        remove Edge(1, 2);");
            println!("  set Weight(1) = 10;    unset Weight(1);");
            println!("  demand Out(1);         undemand Out(1);");
            println!("  show Path;             show Out(1);");
        }
        Some("options") => {
            println!("Query options (with name = value, ...):");
            println!();
            println!("  impl       batch | inc | dem");
            println!("  selfjoin   sub | aug | das | assume_disjoint | assume_disjoint_verify");
            println!("  rc         yes | no | safe");
            println!("  filters    on | off");
            println!("  instrument on | off");
        }
        Some(other) => {
            println!("Unknown help topic: {}", other);
            println!("Available topics: syntax, options");
        }
    }
}

fn dirs_history_path() -> Option<PathBuf> {
    dirs_config_dir().map(|mut path| {
        path.push("ivmc");
        path.push("history");
        path
    })
}

/// Get the config directory (cross-platform)
fn dirs_config_dir() -> Option<PathBuf> {
    #[cfg(unix)]
    {
        std::env::var("HOME").ok().map(|h| {
            let mut p = PathBuf::from(h);
            p.push(".config");
            p
        })
    }
    #[cfg(windows)]
    {
        std::env::var("APPDATA").ok().map(PathBuf::from)
    }
    #[cfg(not(any(unix, windows)))]
    {
        None
    }
}
