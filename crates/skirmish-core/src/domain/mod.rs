//! Domain models for skirmish.
//!
//! Canonical definitions for the core entities:
//! - `RunState`: One battle run and its round history
//! - `CapsuleRecord`: A versioned agent configuration
//! - `SkirmishError`: The domain error taxonomy

pub mod capsule;
pub mod error;
pub mod run;

// Re-export main types and errors
pub use capsule::{CapsuleRecord, Role};
pub use error::{Result, SkirmishError};
pub use run::{EvolutionAudit, RoundEntry, RoundError, RunMetrics, RunState, RunStatus};
