//! Planner: question → structured execution plan.
//!
//! Two interchangeable strategies:
//! - LLM-backed, selected when the completion service is configured. The
//!   completion is instructed to answer with a single JSON object and the
//!   answer is parsed strictly; malformed shapes are rejected, never
//!   coerced. The planner trusts the plan's content but the orchestrator
//!   re-runs the mutation classifier independently, so a plan can never
//!   under-report its own risk.
//! - A keyword heuristic used offline/unconfigured. It only exists to keep
//!   the tool usable without an endpoint; it does not try to be smart.
//!
//! No retries, no caching: a failed completion surfaces to the caller.

use crate::llm::CompletionService;
use quarry_common::{EngineError, ExecutionContext, ExecutionPlan, PlanLanguage, ResultShape};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

const PLANNER_SYSTEM_PROMPT: &str = "\
You translate questions about a tabular dataset into a single execution plan.\n\
Respond with ONE JSON object and nothing else. Fields:\n\
  intent: short restatement of what the user wants\n\
  language: \"sql\" or \"python\"\n\
  command: the SQL statement, or a python script using the pre-bound sqlite3 connection `con`\n\
  requires_approval: true when the command changes data or files\n\
  result_shape: \"table\", \"scalar\" or \"text\"\n\
  explanation: one sentence for the user\n\
Prefer SQL. Use python only when SQL cannot express the request.";

/// Question tokens that route to the python fallback language.
const PYTHON_INTENT_KEYWORDS: &[&str] = &[
    "plot",
    "chart",
    "graph",
    "visualize",
    "visualise",
    "histogram",
    "clean",
    "normalize",
    "normalise",
];

/// Row cap for the heuristic's generic query.
const HEURISTIC_ROW_LIMIT: usize = 100;

pub struct Planner {
    completion: Arc<dyn CompletionService>,
}

impl Planner {
    pub fn new(completion: Arc<dyn CompletionService>) -> Self {
        Self { completion }
    }

    /// Produce the plan for one question. Strategy is chosen per call so a
    /// service that comes online between invocations is picked up.
    pub async fn create_plan(
        &self,
        question: &str,
        schema: &str,
        context: &ExecutionContext,
    ) -> Result<ExecutionPlan, EngineError> {
        if self.completion.is_configured() {
            self.plan_with_llm(question, schema, context).await
        } else {
            info!("Completion service unconfigured; using heuristic planner");
            Ok(heuristic_plan(question, context))
        }
    }

    async fn plan_with_llm(
        &self,
        question: &str,
        schema: &str,
        context: &ExecutionContext,
    ) -> Result<ExecutionPlan, EngineError> {
        let payload = json!({
            "question": question,
            "dataset_id": context.dataset_id,
            "schema": schema,
            "source_tables": context.source_tables,
            "memory_hints": context.memory_hints,
        })
        .to_string();

        let value = self
            .completion
            .plan_json(PLANNER_SYSTEM_PROMPT, &payload)
            .await
            .map_err(EngineError::planning)?;

        debug!("Planner completion: {value}");
        validate_plan(value)
    }
}

/// Raw completion shape, before validation.
#[derive(Debug, Deserialize)]
struct PlanDraft {
    intent: String,
    language: String,
    command: String,
    #[serde(default)]
    requires_approval: bool,
    result_shape: String,
    #[serde(default)]
    explanation: String,
}

/// Strict parse-and-validate from loose JSON into the plan sum type.
fn validate_plan(value: Value) -> Result<ExecutionPlan, EngineError> {
    let draft: PlanDraft = serde_json::from_value(value)
        .map_err(|e| EngineError::invalid_plan(format!("bad plan shape: {e}")))?;

    let language = match draft.language.as_str() {
        "sql" => PlanLanguage::Sql,
        "python" => PlanLanguage::Python,
        other => {
            return Err(EngineError::invalid_plan(format!(
                "unknown language {other:?}"
            )))
        }
    };

    let result_shape = match draft.result_shape.as_str() {
        "table" => ResultShape::Table,
        "scalar" => ResultShape::Scalar,
        "text" => ResultShape::Text,
        other => {
            return Err(EngineError::invalid_plan(format!(
                "unknown result shape {other:?}"
            )))
        }
    };

    if draft.command.trim().is_empty() {
        return Err(EngineError::invalid_plan("empty command"));
    }

    let mut plan = ExecutionPlan::new(
        draft.intent,
        language,
        draft.command,
        result_shape,
        draft.explanation,
    );
    plan.requires_approval = draft.requires_approval;
    Ok(plan)
}

/// Offline strategy: keyword sniffing routes chart/cleanup questions to
/// python, everything else becomes a bounded `SELECT *` on the primary
/// table. Never errors.
fn heuristic_plan(question: &str, context: &ExecutionContext) -> ExecutionPlan {
    let table = context.primary_table().unwrap_or("main_table").to_string();
    let wants_python = question
        .to_lowercase()
        .split(|c: char| !c.is_ascii_alphanumeric())
        .any(|token| PYTHON_INTENT_KEYWORDS.contains(&token));

    if wants_python {
        let command = format!(
            "rows = con.execute('SELECT * FROM \"{table}\" LIMIT {HEURISTIC_ROW_LIMIT}').fetchall()\n\
             for row in rows:\n    print(row)"
        );
        ExecutionPlan::new(
            question,
            PlanLanguage::Python,
            command,
            ResultShape::Text,
            format!("Sampled rows from {table} with the python fallback (no planner configured)."),
        )
    } else {
        ExecutionPlan::new(
            question,
            PlanLanguage::Sql,
            format!("SELECT * FROM \"{table}\" LIMIT {HEURISTIC_ROW_LIMIT}"),
            ResultShape::Table,
            format!("Showing up to {HEURISTIC_ROW_LIMIT} rows from {table} (no planner configured)."),
        )
    }
}
