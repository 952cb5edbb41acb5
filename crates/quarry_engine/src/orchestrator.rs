//! Execution orchestrator.
//!
//! The state machine at the heart of the pipeline:
//! Classify → Gate → PrimaryExec → {Success | FallbackExec} → Record.
//!
//! Invariants it owns:
//! - the mutation classifier is re-run here; a plan can widen its own
//!   approval requirement but never narrow it;
//! - a declined approval is a normal outcome (cancellation result), never
//!   an error, and no execution is attempted after it;
//! - exactly one audit record is appended per `execute()` call, recording
//!   the final user-visible outcome rather than intermediate attempts;
//! - learning is captured only for repaired failures (never on first-try
//!   success, never on total failure), and a learning-store failure never
//!   fails the call;
//! - the missing-table-context repair for python plans runs at most once.

use crate::audit::AuditTrail;
use crate::classifier;
use crate::gate::ApprovalGate;
use crate::memory::LearningMemory;
use crate::runner::QueryRunner;
use chrono::Utc;
use quarry_common::{
    AuditRecord, EngineError, ExecutionContext, ExecutionPlan, ExecutionResult, LearningRecord,
    PlanLanguage,
};
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// Result text of a declined approval.
pub const CANCELLATION_MESSAGE: &str = "Execution canceled: approval was declined.";

/// The context variable fallback scripts may reference; the repair retry
/// binds it from the invocation's source tables.
const CONTEXT_VARIABLE: &str = "tables";

pub struct Orchestrator {
    runner: Arc<dyn QueryRunner>,
    gate: Arc<dyn ApprovalGate>,
    memory: Arc<LearningMemory>,
    audit: Arc<AuditTrail>,
}

impl Orchestrator {
    pub fn new(
        runner: Arc<dyn QueryRunner>,
        gate: Arc<dyn ApprovalGate>,
        memory: Arc<LearningMemory>,
        audit: Arc<AuditTrail>,
    ) -> Self {
        Self {
            runner,
            gate,
            memory,
            audit,
        }
    }

    /// Drive one plan to a single normalized outcome.
    pub async fn execute(
        &self,
        plan: &ExecutionPlan,
        context: &ExecutionContext,
    ) -> Result<ExecutionResult, EngineError> {
        // Classify. The planner's own declaration can only add to this.
        let mutating = classifier::is_mutating(&plan.command, plan.language);
        let needs_approval = mutating || plan.requires_approval;

        // Gate.
        let approved = if !needs_approval || context.bypass_approval {
            true
        } else {
            match self.gate.approve(&plan.command, plan.language).await {
                Ok(answer) => answer,
                Err(e) => {
                    warn!("Approval gate failed ({e:#}); treating as declined");
                    false
                }
            }
        };

        if !approved {
            info!("Approval declined for plan {}", plan.id);
            self.finish(
                self.record(context, &plan.command, plan.language, mutating, false, false)
                    .with_error("approval declined"),
            )
            .await;
            return Ok(self.result(
                plan,
                context,
                plan.command.clone(),
                CANCELLATION_MESSAGE.to_string(),
                CANCELLATION_MESSAGE.to_string(),
                false,
            ));
        }

        match plan.language {
            PlanLanguage::Sql => self.execute_sql(plan, context, mutating).await,
            PlanLanguage::Python => self.execute_python(plan, context, mutating).await,
        }
    }

    /// Primary SQL path with automatic python fallback.
    async fn execute_sql(
        &self,
        plan: &ExecutionPlan,
        context: &ExecutionContext,
        mutating: bool,
    ) -> Result<ExecutionResult, EngineError> {
        let primary_err = match self.runner.run_primary(&plan.command).await {
            Ok(output) => {
                self.finish(self.record(
                    context,
                    &plan.command,
                    PlanLanguage::Sql,
                    mutating,
                    true,
                    true,
                ))
                .await;
                return Ok(self.result(
                    plan,
                    context,
                    plan.command.clone(),
                    output,
                    plan.explanation.clone(),
                    false,
                ));
            }
            Err(e) => chain(&e),
        };

        info!("Primary SQL failed ({primary_err}); trying python fallback");
        let script = synthesize_fallback_script(&plan.command);

        match self.runner.run_fallback(&script).await {
            Ok(output) => {
                let symptom = format!("primary failed: {primary_err}");
                let learning = LearningRecord::new(
                    &context.dataset_id,
                    &symptom,
                    "primary SQL execution failed",
                    "re-issued the query through the python fallback",
                    &script,
                    PlanLanguage::Python,
                )
                .with_tags(vec!["fallback".to_string(), "sql".to_string()]);
                self.capture_learning(learning).await;

                // Audited outcome reflects the call, not the first attempt.
                self.finish(self.record(
                    context,
                    &script,
                    PlanLanguage::Python,
                    mutating,
                    true,
                    true,
                ))
                .await;

                let explanation = format!(
                    "{} (primary SQL failed: {primary_err}; answered via python fallback)",
                    plan.explanation
                );
                Ok(self.result(plan, context, script, output, explanation, true))
            }
            Err(fallback_err) => {
                let combined = format!(
                    "primary failed: {primary_err}; fallback failed: {}",
                    chain(&fallback_err)
                );
                self.finish(
                    self.record(context, &plan.command, PlanLanguage::Sql, mutating, true, false)
                        .with_error(&combined),
                )
                .await;
                Err(EngineError::execution(combined))
            }
        }
    }

    /// Python-language path: no secondary language, but one bounded repair
    /// retry when the script referenced table context that was not injected.
    async fn execute_python(
        &self,
        plan: &ExecutionPlan,
        context: &ExecutionContext,
        mutating: bool,
    ) -> Result<ExecutionResult, EngineError> {
        let original_err = match self.runner.run_fallback(&plan.command).await {
            Ok(output) => {
                self.finish(self.record(
                    context,
                    &plan.command,
                    PlanLanguage::Python,
                    mutating,
                    true,
                    true,
                ))
                .await;
                return Ok(self.result(
                    plan,
                    context,
                    plan.command.clone(),
                    output,
                    plan.explanation.clone(),
                    false,
                ));
            }
            Err(e) => chain(&e),
        };

        if !is_missing_table_context(&original_err) {
            let combined = format!("fallback failed: {original_err}");
            self.finish(
                self.record(context, &plan.command, PlanLanguage::Python, mutating, true, false)
                    .with_error(&combined),
            )
            .await;
            return Err(EngineError::execution(combined));
        }

        info!("Fallback script missing table context; retrying once with injected binding");
        let repaired = inject_table_context(&plan.command, &context.source_tables);

        match self.runner.run_fallback(&repaired).await {
            Ok(output) => {
                let symptom = format!("fallback failed: {original_err}");
                let learning = LearningRecord::new(
                    &context.dataset_id,
                    &symptom,
                    "script referenced table context that was not injected",
                    "prepended a binding of the context variable from the source tables",
                    &repaired,
                    PlanLanguage::Python,
                )
                .with_tags(vec!["repair".to_string(), "context".to_string()]);
                self.capture_learning(learning).await;

                self.finish(self.record(
                    context,
                    &repaired,
                    PlanLanguage::Python,
                    mutating,
                    true,
                    true,
                ))
                .await;

                let explanation = format!(
                    "{} (first attempt failed on missing table context; repaired and retried)",
                    plan.explanation
                );
                Ok(self.result(plan, context, repaired, output, explanation, true))
            }
            Err(retry_err) => {
                let combined = format!(
                    "fallback failed: {original_err}. Table-context retry also failed: {}",
                    chain(&retry_err)
                );
                self.finish(
                    self.record(context, &plan.command, PlanLanguage::Python, mutating, true, false)
                        .with_error(&combined),
                )
                .await;
                Err(EngineError::execution(combined))
            }
        }
    }

    /// Learning capture is fire-and-forget relative to the result.
    async fn capture_learning(&self, record: LearningRecord) {
        best_effort("learning save", self.memory.save_learning(&record)).await;
    }

    /// Append the call's single audit record, best effort: an audit write
    /// failure must not change an otherwise-successful outcome.
    async fn finish(&self, record: AuditRecord) {
        best_effort("audit append", self.audit.append(&record)).await;
    }

    /// `command` and `language` describe what the final outcome actually
    /// ran, which differs from the plan when a fallback produced it.
    fn record(
        &self,
        context: &ExecutionContext,
        command: &str,
        language: PlanLanguage,
        mutating: bool,
        approved: bool,
        success: bool,
    ) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            dataset_id: context.dataset_id.clone(),
            command: command.to_string(),
            language,
            mutating,
            approved,
            override_used: context.bypass_approval,
            success,
            error: None,
        }
    }

    fn result(
        &self,
        plan: &ExecutionPlan,
        context: &ExecutionContext,
        final_command: String,
        output: String,
        explanation: String,
        fallback_used: bool,
    ) -> ExecutionResult {
        ExecutionResult {
            plan: plan.clone(),
            final_command,
            output,
            explanation,
            source_tables: context.source_tables.clone(),
            memory_hints: context.memory_hints.clone(),
            fallback_used,
        }
    }
}

trait WithError {
    fn with_error(self, error: &str) -> Self;
}

impl WithError for AuditRecord {
    fn with_error(mut self, error: &str) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// Run a side effect whose failure must not affect the call's outcome.
async fn best_effort<T, F>(what: &str, fut: F)
where
    F: Future<Output = anyhow::Result<T>>,
{
    if let Err(e) = fut.await {
        warn!("{what} failed ({e:#}); proceeding anyway");
    }
}

/// Full anyhow context chain as one line.
fn chain(err: &anyhow::Error) -> String {
    format!("{err:#}")
}

/// Wrap a failed SQL command into a python script that re-issues it against
/// the embedded database, turning any engine error into a descriptive
/// raised error.
fn synthesize_fallback_script(sql: &str) -> String {
    format!(
        "sql = {literal}\n\
         try:\n\
         \x20   cur = con.execute(sql)\n\
         \x20   rows = cur.fetchall()\n\
         \x20   if cur.description:\n\
         \x20       print(\"\\t\".join(col[0] for col in cur.description))\n\
         \x20   for row in rows:\n\
         \x20       print(\"\\t\".join(str(v) for v in row))\n\
         except Exception as exc:\n\
         \x20   raise RuntimeError(f\"fallback query failed: {{exc}}\")\n",
        literal = python_string_literal(sql)
    )
}

fn python_string_literal(text: &str) -> String {
    let escaped = text
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n");
    format!("\"{escaped}\"")
}

/// Matches the python NameError wording for the known context variable.
/// Deliberately narrow: tied to the runtime's message, one variable only.
fn is_missing_table_context(error: &str) -> bool {
    error.contains(&format!("name '{CONTEXT_VARIABLE}' is not defined"))
}

/// Prepend a binding of the context variable from the invocation's source
/// tables.
fn inject_table_context(script: &str, source_tables: &[String]) -> String {
    let items: Vec<String> = source_tables
        .iter()
        .map(|t| python_string_literal(t))
        .collect();
    format!("{CONTEXT_VARIABLE} = [{}]\n{script}", items.join(", "))
}
