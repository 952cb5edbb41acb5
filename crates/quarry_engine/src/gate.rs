//! Approval gate trait abstraction.
//!
//! Production code wires an interactive prompt (quarryctl); test code uses
//! `FakeGate` with a pre-configured answer. Implementations must never
//! auto-approve: a gate that cannot reach its user should answer `false`
//! or error, both of which the orchestrator treats as a decline.

use async_trait::async_trait;
use quarry_common::PlanLanguage;
use std::sync::Mutex;

#[async_trait]
pub trait ApprovalGate: Send + Sync {
    /// Ask the human to sign off on a mutating command. `Ok(false)` is a
    /// decline; errors are treated as declines by the caller.
    async fn approve(&self, command: &str, language: PlanLanguage) -> anyhow::Result<bool>;
}

/// Test double that records every invocation.
pub struct FakeGate {
    answer: bool,
    calls: Mutex<Vec<(String, PlanLanguage)>>,
}

impl FakeGate {
    pub fn approving() -> Self {
        Self {
            answer: true,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn declining() -> Self {
        Self {
            answer: false,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Commands the gate was asked about, in order.
    pub fn calls(&self) -> Vec<(String, PlanLanguage)> {
        self.calls.lock().expect("gate call log poisoned").clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().expect("gate call log poisoned").len()
    }
}

#[async_trait]
impl ApprovalGate for FakeGate {
    async fn approve(&self, command: &str, language: PlanLanguage) -> anyhow::Result<bool> {
        self.calls
            .lock()
            .expect("gate call log poisoned")
            .push((command.to_string(), language));
        Ok(self.answer)
    }
}
