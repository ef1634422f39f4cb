//! Runs untrusted Python submissions against literal test cases.
//!
//! The host side (this crate) parses cases, discovers the entry point,
//! binds arguments and judges results; a small trusted driver executes
//! the plan inside a sandbox. See `executor::run`.

pub mod binder;
pub mod codec;
pub mod comparator;
pub mod config;
pub mod discovery;
pub mod docker;
pub mod engine;
pub mod evaluator;
pub mod executor;
pub mod parser;
pub mod protocol;
pub mod strategy;
pub mod value;


pub use config::HarnessConfig;
pub use engine::{ProcessSandbox, Sandbox, SandboxBackend};
pub use executor::run;
pub use verity_common::types::{CaseResult, RunOutcome, RunRequest, TestCase};
