//! Domain models for remedy.
//!
//! Canonical definitions for the core entities:
//! - `Finding`: an externally supplied issue description
//! - `WorkItem`: the stateful record of one finding being remediated
//! - `VerificationResult`: one checker's immutable verdict

pub mod error;
pub mod finding;
pub mod verification;
pub mod work_item;

// Re-export main types and errors
pub use error::{FindingError, RemedyError, Result};
pub use finding::{
    confine_findings, validate_findings, workspace_relative, Finding, Location, Severity,
    DEFAULT_CATEGORY,
};
pub use verification::{CheckVerdict, VerificationResult, VerificationSnapshot, TIMEOUT_OUTPUT};
pub use work_item::{
    ItemOrigin, StrategyKind, WorkItem, WorkItemId, WorkItemStatus, MAX_ATTEMPTS,
    MAX_CASCADE_GENERATIONS,
};
