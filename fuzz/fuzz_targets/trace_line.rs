#![no_main]

use libfuzzer_sys::fuzz_target;
use startrace::strace::{parse_execve_timings, parse_line};

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        let _ = parse_line(input);
    }
    // whole-stream parse must not panic either, whatever the bytes
    let _ = parse_execve_timings(data, None);
});
