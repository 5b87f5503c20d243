//! startrace - application startup latency measurement
//!
//! Launches a program, optionally under strace, waits for its first window,
//! tears it down through an escalating cascade, and reports per-trial timing
//! with an execve-level breakdown.

pub mod cascade;
pub mod cli;
pub mod collaborators;
pub mod config;
pub mod duration_serde;
pub mod error;
pub mod files;
pub mod launcher;
pub mod results;
pub mod strace;
pub mod system;
pub mod trace_channel;
pub mod trial;
pub mod window_spec;
pub mod xdotool;
