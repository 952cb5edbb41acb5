//! Core data model for the plan/approve/execute/learn pipeline.
//!
//! Plans are produced once per question and never mutated afterwards; the
//! orchestrator works from its own effective view of the approval flag so a
//! planner can opt in to approval but can never opt out of it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Execution language of a planned command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanLanguage {
    /// Primary path: SQL against the dataset's embedded database.
    Sql,
    /// Fallback path: a Python script run against the same database.
    Python,
}

impl PlanLanguage {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanLanguage::Sql => "sql",
            PlanLanguage::Python => "python",
        }
    }
}

/// How the caller should interpret the textual output of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultShape {
    Table,
    Scalar,
    Text,
}

/// A planned command, produced once per user question.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlan {
    /// Unique plan id.
    pub id: String,

    /// What the planner understood the user to be asking.
    pub intent: String,

    /// Language the command is written in.
    pub language: PlanLanguage,

    /// The command text to execute.
    pub command: String,

    /// The planner's own declaration that this command needs sign-off.
    /// The orchestrator re-checks with the mutation classifier and ORs the
    /// two together, so this can only widen the gate, never narrow it.
    pub requires_approval: bool,

    /// Expected shape of the result.
    pub result_shape: ResultShape,

    /// Seed explanation shown to the user alongside the result.
    pub explanation: String,
}

impl ExecutionPlan {
    pub fn new(
        intent: impl Into<String>,
        language: PlanLanguage,
        command: impl Into<String>,
        result_shape: ResultShape,
        explanation: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            intent: intent.into(),
            language,
            command: command.into(),
            requires_approval: false,
            result_shape,
            explanation: explanation.into(),
        }
    }
}

/// Per-invocation context. Read-only during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionContext {
    /// Which ingested dataset the question targets.
    pub dataset_id: String,

    /// Skip the interactive approval gate for this invocation only.
    /// Never persisted and never remembered across calls.
    pub bypass_approval: bool,

    /// Candidate source tables, primary table first.
    pub source_tables: Vec<String>,

    /// Learning-memory snippets already fed to the planner for this question.
    pub memory_hints: Vec<String>,
}

impl ExecutionContext {
    pub fn new(dataset_id: impl Into<String>, source_tables: Vec<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            bypass_approval: false,
            source_tables,
            memory_hints: Vec::new(),
        }
    }

    pub fn with_bypass(mut self, bypass: bool) -> Self {
        self.bypass_approval = bypass;
        self
    }

    pub fn with_hints(mut self, hints: Vec<String>) -> Self {
        self.memory_hints = hints;
        self
    }

    /// The table a generic query should target.
    pub fn primary_table(&self) -> Option<&str> {
        self.source_tables.first().map(|s| s.as_str())
    }
}

/// The single externally visible output of an `execute()` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub plan: ExecutionPlan,

    /// The command that actually ran last (differs from `plan.command` when
    /// a fallback or repair retry produced the final output).
    pub final_command: String,

    /// Raw textual output of the successful execution, or the cancellation
    /// message when approval was declined.
    pub output: String,

    pub explanation: String,

    pub source_tables: Vec<String>,

    pub memory_hints: Vec<String>,

    /// True iff the primary attempt failed and a later attempt succeeded.
    pub fallback_used: bool,
}

/// One remembered repair: a failure symptom and the fix that worked.
///
/// Records are append-only and deduplicated by `fingerprint`; saving the
/// same (dataset, symptom, fix) twice stores exactly one block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningRecord {
    pub dataset_id: String,
    pub symptom: String,
    pub root_cause: String,
    pub fix: String,
    pub fix_command: String,
    pub fix_language: PlanLanguage,
    pub fingerprint: String,
    pub confidence: f64,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl LearningRecord {
    pub fn new(
        dataset_id: impl Into<String>,
        symptom: impl Into<String>,
        root_cause: impl Into<String>,
        fix: impl Into<String>,
        fix_command: impl Into<String>,
        fix_language: PlanLanguage,
    ) -> Self {
        let dataset_id = dataset_id.into();
        let symptom = symptom.into();
        let fix_command = fix_command.into();
        let fingerprint = fingerprint(&dataset_id, &symptom, &fix_command);
        Self {
            dataset_id,
            symptom,
            root_cause: root_cause.into(),
            fix: fix.into(),
            fix_command,
            fix_language,
            fingerprint,
            confidence: 0.6,
            tags: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }
}

/// Deterministic learning fingerprint: first 16 hex chars of
/// SHA-256 over dataset id, symptom and fix command.
pub fn fingerprint(dataset_id: &str, symptom: &str, fix_command: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(dataset_id.as_bytes());
    hasher.update(b"\n");
    hasher.update(symptom.as_bytes());
    hasher.update(b"\n");
    hasher.update(fix_command.as_bytes());
    let digest = hasher.finalize();
    hex::encode(digest)[..16].to_string()
}

/// Immutable audit entry: exactly one per top-level `execute()` call,
/// recording the final outcome rather than any intermediate attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub dataset_id: String,
    pub command: String,
    pub language: PlanLanguage,
    pub mutating: bool,
    pub approved: bool,
    pub override_used: bool,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
