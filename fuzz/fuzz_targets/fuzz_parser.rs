//! Fuzz the ivmc lexer and parser
//!
//! Malformed input must come back as an error, never a panic.

#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = ivmc::parse(input);
    }
});
