//! Differential test harness comparing native and emulated program runs.
//!
//! The harness executes a test binary twice, once natively (optionally inside
//! a Linux oracle container) and once under an external emulator/analyzer,
//! then normalizes and compares the observable outputs:
//! - `exec`: timeout-bounded child execution with output salvage
//! - `command`: native, containerized, and emulated command construction
//! - `normalize`: deterministic output normalization before comparison
//! - `compare`: per-field comparison verdicts with unified diffs
//! - `record` / `artifact`: persisted run documents and mismatch capture
//! - `pipeline`: the single-test runner tying the above together
//! - `suite` / `mustpass`: batch orchestrators over case-list documents

pub mod artifact;
pub mod command;
pub mod compare;
pub mod exec;
pub mod log;
pub mod mustpass;
pub mod normalize;
pub mod pipeline;
pub mod record;
pub mod suite;
