//! Engine error taxonomy.
//!
//! Classification never fails, approval decline is a normal result, and
//! memory/audit write failures stay local to those components. What remains
//! for callers: planning failures (completion transport or validation) and
//! execution failures carrying the full attempt chain.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The completion service failed (network, malformed JSON). Propagated
    /// unchanged from the planner; the heuristic strategy never raises this.
    #[error("planning failed: {source}")]
    Planning {
        #[source]
        source: anyhow::Error,
    },

    /// The completion service answered but the payload did not validate as
    /// an execution plan. Malformed shapes are rejected, not coerced.
    #[error("plan rejected: {reason}")]
    InvalidPlan { reason: String },

    /// Every execution attempt failed. The message concatenates each
    /// attempt's error so the user sees the full causal chain.
    #[error("{message}")]
    Execution { message: String },
}

impl EngineError {
    pub fn planning(source: anyhow::Error) -> Self {
        Self::Planning { source }
    }

    pub fn invalid_plan(reason: impl Into<String>) -> Self {
        Self::InvalidPlan {
            reason: reason.into(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
        }
    }
}
