//! quarry_engine - the plan/approve/execute/learn pipeline.
//!
//! Entry points: `Planner::create_plan` turns a question into an
//! `ExecutionPlan`; `Orchestrator::execute` drives a plan through
//! classification, the approval gate, primary execution, the fallback and
//! repair paths, learning capture and the audit trail.
//!
//! Collaborators (query runner, approval gate, dataset catalog, completion
//! service) are trait seams with production and fake implementations, so
//! the whole pipeline runs deterministically in tests.

pub mod audit;
pub mod catalog;
pub mod classifier;
pub mod gate;
pub mod llm;
pub mod memory;
pub mod orchestrator;
pub mod planner;
pub mod runner;

pub use audit::AuditTrail;
pub use catalog::{Catalog, FakeCatalog, SqliteCatalog};
pub use classifier::is_mutating;
pub use gate::{ApprovalGate, FakeGate};
pub use llm::{CompletionService, FakeCompletion, HttpCompletionClient};
pub use memory::{LearningMemory, MemorySnippet};
pub use orchestrator::{Orchestrator, CANCELLATION_MESSAGE};
pub use planner::Planner;
pub use runner::{FakeRunner, QueryRunner, SqliteRunner};
