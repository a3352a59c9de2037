//! Fuzz ivmc REPL execution
//!
//! Runs parsing, compilation and maintenance on arbitrary programs. Every
//! query is instrumented, so a maintained result that drifts from batch
//! evaluation is reported as a crash.

#![no_main]

use libfuzzer_sys::fuzz_target;
use ivmc::config::CompileOptions;
use ivmc::repl::ReplState;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // assume_disjoint trusts the program; overlapping rows are undefined
        if input.contains("assume_disjoint") {
            return;
        }
        let options = CompileOptions::from_lookup(|name| {
            (name == CompileOptions::ENV_INSTRUMENT).then(|| "on".to_string())
        });
        let Ok(options) = options else { return };
        let mut state = ReplState::new(options);
        if let Err(msg) = state.execute(input) {
            assert!(!msg.contains("maintained result of"), "{}", msg);
        }
    }
});
