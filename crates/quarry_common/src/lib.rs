//! Shared types for the quarry workspace.
//!
//! Everything that crosses a crate boundary lives here: the execution plan
//! and result shapes, learning and audit records, the engine error taxonomy,
//! and the TOML configuration.

pub mod config;
pub mod error;
pub mod types;

pub use config::Config;
pub use error::EngineError;
pub use types::{
    fingerprint, AuditRecord, ExecutionContext, ExecutionPlan, ExecutionResult, LearningRecord,
    PlanLanguage, ResultShape,
};
