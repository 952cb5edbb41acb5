//! End-to-end orchestrator tests with fake collaborators.
//!
//! Everything here runs without a database, a python interpreter or a
//! terminal: the runner and gate are scripted fakes, memory and audit live
//! in a TempDir.

use quarry_common::{ExecutionContext, ExecutionPlan, PlanLanguage, ResultShape};
use quarry_engine::{
    AuditTrail, FakeGate, FakeRunner, LearningMemory, Orchestrator, CANCELLATION_MESSAGE,
};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    runner: Arc<FakeRunner>,
    gate: Arc<FakeGate>,
    memory: Arc<LearningMemory>,
    audit: Arc<AuditTrail>,
    orchestrator: Orchestrator,
    _dir: TempDir,
}

fn harness(runner: FakeRunner, gate: FakeGate) -> Harness {
    let dir = TempDir::new().unwrap();
    let runner = Arc::new(runner);
    let gate = Arc::new(gate);
    let memory = Arc::new(LearningMemory::new(dir.path().join("memory")));
    let audit = Arc::new(AuditTrail::new(dir.path().join("audit.jsonl")));
    let orchestrator = Orchestrator::new(
        runner.clone(),
        gate.clone(),
        memory.clone(),
        audit.clone(),
    );
    Harness {
        runner,
        gate,
        memory,
        audit,
        orchestrator,
        _dir: dir,
    }
}

fn sql_plan(command: &str) -> ExecutionPlan {
    ExecutionPlan::new(
        "test intent",
        PlanLanguage::Sql,
        command,
        ResultShape::Table,
        "Runs a query.",
    )
}

fn python_plan(command: &str) -> ExecutionPlan {
    ExecutionPlan::new(
        "test intent",
        PlanLanguage::Python,
        command,
        ResultShape::Text,
        "Runs a script.",
    )
}

fn context() -> ExecutionContext {
    ExecutionContext::new("sales", vec!["main_table".to_string()])
}

async fn learning_blocks(h: &Harness) -> usize {
    let dir = h._dir.path().join("memory").join("sales");
    if !dir.exists() {
        return 0;
    }
    let mut count = 0;
    for entry in std::fs::read_dir(dir).unwrap() {
        let text = std::fs::read_to_string(entry.unwrap().path()).unwrap();
        count += text.matches("## Learning ").count();
    }
    count
}

#[tokio::test]
async fn success_path_produces_one_audit_record_and_no_learning() {
    let h = harness(
        FakeRunner::new().push_primary_ok("id\tcount\n1\t42"),
        FakeGate::approving(),
    );

    let result = h
        .orchestrator
        .execute(&sql_plan("SELECT count(*) FROM main_table"), &context())
        .await
        .unwrap();

    assert!(!result.fallback_used);
    assert_eq!(result.output, "id\tcount\n1\t42");
    assert_eq!(result.final_command, "SELECT count(*) FROM main_table");

    let records = h.audit.read_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);
    assert!(!records[0].mutating);
    assert_eq!(learning_blocks(&h).await, 0);

    // Non-mutating command never touched the gate.
    assert_eq!(h.gate.call_count(), 0);
}

#[tokio::test]
async fn count_rows_scenario_recovers_through_fallback() {
    let h = harness(
        FakeRunner::new()
            .push_primary_err("connection error")
            .push_fallback_ok("main_table\t128"),
        FakeGate::approving(),
    );

    let result = h
        .orchestrator
        .execute(&sql_plan("SELECT count(*) FROM main_table"), &context())
        .await
        .unwrap();

    assert!(result.fallback_used);
    assert_eq!(result.output, "main_table\t128");
    assert!(result.explanation.contains("fallback"));
    assert!(result.final_command.contains("con.execute"));

    let records = h.audit.read_all().await.unwrap();
    assert_eq!(records.len(), 1, "one audit record despite two attempts");
    assert!(records[0].success, "audited outcome reflects the call");
    assert_eq!(records[0].language, PlanLanguage::Python);

    assert_eq!(learning_blocks(&h).await, 1);
    let hints = h.memory.search("connection error", Some("sales")).await.unwrap();
    assert!(!hints.is_empty(), "repair is findable for future prompts");
    let memory_dir = h._dir.path().join("memory").join("sales");
    let entry = std::fs::read_dir(&memory_dir).unwrap().next().unwrap().unwrap();
    let text = std::fs::read_to_string(entry.path()).unwrap();
    assert!(text.contains("- symptom: primary failed: connection error"));
}

#[tokio::test]
async fn repeated_repair_stores_one_learning_block() {
    let h = harness(
        FakeRunner::new()
            .push_primary_err("connection error")
            .push_fallback_ok("ok")
            .push_primary_err("connection error")
            .push_fallback_ok("ok"),
        FakeGate::approving(),
    );

    let plan = sql_plan("SELECT count(*) FROM main_table");
    h.orchestrator.execute(&plan, &context()).await.unwrap();
    h.orchestrator.execute(&plan, &context()).await.unwrap();

    assert_eq!(learning_blocks(&h).await, 1, "identical repair deduplicated");
    assert_eq!(h.audit.read_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn total_failure_combines_both_errors_and_records_nothing() {
    let h = harness(
        FakeRunner::new()
            .push_primary_err("no such table: orders")
            .push_fallback_err("fallback query failed: no such table: orders"),
        FakeGate::approving(),
    );

    let err = h
        .orchestrator
        .execute(&sql_plan("SELECT * FROM orders"), &context())
        .await
        .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("primary failed: no such table: orders"));
    assert!(message.contains("fallback failed:"));

    let records = h.audit.read_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(records[0].error.as_deref(), Some(message.as_str()));
    assert_eq!(learning_blocks(&h).await, 0, "nothing useful to remember");
}

#[tokio::test]
async fn mutating_command_invokes_gate_before_any_execution() {
    let h = harness(FakeRunner::new(), FakeGate::declining());

    let plan = sql_plan("Create table tmp as select * from main_table limit 10");
    let result = h.orchestrator.execute(&plan, &context()).await.unwrap();

    assert_eq!(h.gate.call_count(), 1);
    assert!(h.runner.primary_calls().is_empty(), "zero execution attempts");
    assert!(h.runner.fallback_calls().is_empty());
    assert_eq!(result.output, CANCELLATION_MESSAGE);
    assert!(!result.fallback_used);

    let records = h.audit.read_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert!(records[0].mutating);
    assert!(!records[0].approved);
    assert_eq!(learning_blocks(&h).await, 0);
}

#[tokio::test]
async fn override_flag_bypasses_gate_for_this_call_only() {
    let h = harness(
        FakeRunner::new().push_primary_ok("1 rows affected"),
        FakeGate::declining(),
    );

    let plan = sql_plan("DELETE FROM main_table WHERE id = 1");
    let result = h
        .orchestrator
        .execute(&plan, &context().with_bypass(true))
        .await
        .unwrap();

    assert_eq!(h.gate.call_count(), 0);
    assert_eq!(result.output, "1 rows affected");

    let records = h.audit.read_all().await.unwrap();
    assert!(records[0].override_used);
    assert!(records[0].mutating);
    assert!(records[0].approved);
}

#[tokio::test]
async fn planner_declared_approval_is_honored_for_non_mutating_command() {
    let h = harness(FakeRunner::new().push_primary_ok("ok"), FakeGate::approving());

    let mut plan = sql_plan("SELECT * FROM main_table");
    plan.requires_approval = true;
    h.orchestrator.execute(&plan, &context()).await.unwrap();

    // Planner widened the gate; classifier alone would not have prompted.
    assert_eq!(h.gate.call_count(), 1);
}

#[tokio::test]
async fn classifier_overrides_planner_under_report() {
    let h = harness(FakeRunner::new(), FakeGate::declining());

    // Planner claims no approval needed; the classifier disagrees.
    let plan = sql_plan("DROP TABLE main_table");
    assert!(!plan.requires_approval);
    let result = h.orchestrator.execute(&plan, &context()).await.unwrap();

    assert_eq!(h.gate.call_count(), 1);
    assert_eq!(result.output, CANCELLATION_MESSAGE);
}

#[tokio::test]
async fn missing_context_scenario_retries_exactly_once_and_succeeds() {
    let h = harness(
        FakeRunner::new()
            .push_fallback_err("NameError: name 'tables' is not defined")
            .push_fallback_ok("['main_table']"),
        FakeGate::approving(),
    );

    let plan = python_plan("print(tables)");
    let result = h.orchestrator.execute(&plan, &context()).await.unwrap();

    let calls = h.runner.fallback_calls();
    assert_eq!(calls.len(), 2, "exactly two fallback-language executions");
    assert_eq!(calls[0], "print(tables)");
    assert!(calls[1].starts_with("tables = [\"main_table\"]\n"));

    assert!(result.fallback_used);
    assert!(result.explanation.contains("missing table context"));

    let records = h.audit.read_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(records[0].success);

    assert_eq!(learning_blocks(&h).await, 1);
    let memory_dir = h._dir.path().join("memory").join("sales");
    let entry = std::fs::read_dir(&memory_dir).unwrap().next().unwrap().unwrap();
    let text = std::fs::read_to_string(entry.path()).unwrap();
    assert!(text.contains("- symptom: fallback failed: NameError"));
}

#[tokio::test]
async fn missing_context_retry_is_bounded_to_one_attempt() {
    let h = harness(
        FakeRunner::new()
            .push_fallback_err("NameError: name 'tables' is not defined")
            .push_fallback_err("NameError: name 'tables' is not defined"),
        FakeGate::approving(),
    );

    let err = h
        .orchestrator
        .execute(&python_plan("print(tables)"), &context())
        .await
        .unwrap_err();

    assert_eq!(h.runner.fallback_calls().len(), 2, "no third attempt");
    let message = err.to_string();
    assert!(message.starts_with("fallback failed: NameError"));
    assert!(message.contains("Table-context retry also failed:"));

    let records = h.audit.read_all().await.unwrap();
    assert_eq!(records.len(), 1);
    assert!(!records[0].success);
    assert_eq!(learning_blocks(&h).await, 0);
}

#[tokio::test]
async fn unrelated_python_failure_is_not_retried() {
    let h = harness(
        FakeRunner::new().push_fallback_err("ZeroDivisionError: division by zero"),
        FakeGate::approving(),
    );

    let err = h
        .orchestrator
        .execute(&python_plan("print(1 / 0)"), &context())
        .await
        .unwrap_err();

    assert_eq!(h.runner.fallback_calls().len(), 1);
    assert!(err.to_string().contains("division by zero"));
    assert_eq!(h.audit.read_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn python_success_does_not_set_fallback_flag() {
    let h = harness(
        FakeRunner::new().push_fallback_ok("(1, 9.5)"),
        FakeGate::approving(),
    );

    let result = h
        .orchestrator
        .execute(
            &python_plan("print(con.execute('SELECT 1').fetchone())"),
            &context(),
        )
        .await
        .unwrap();

    assert!(!result.fallback_used);
    assert_eq!(h.runner.fallback_calls().len(), 1);
}
