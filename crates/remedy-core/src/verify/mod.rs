//! Verification runner: independent external checkers, run in parallel
//! against one workspace state, normalized into [`VerificationResult`]s.
//!
//! [`VerificationResult`]: crate::domain::VerificationResult

pub mod checker;
pub mod runner;

pub use checker::{BuiltinChecker, CheckOutput, Checker, CheckerConfig, CommandChecker};
pub use runner::VerificationRunner;
