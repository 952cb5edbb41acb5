//! Query execution collaborators.
//!
//! `QueryRunner` is the seam between the orchestrator and the dataset's
//! backing store: SQL runs in-process through the embedded database, python
//! fallback scripts run in a `python3` subprocess with a pre-bound `con`
//! connection to the same database file. Both paths surface the underlying
//! engine message inside the error so the orchestrator can chain it into
//! symptoms and combined failures.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Mutex;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait QueryRunner: Send + Sync {
    /// Run a SQL command against the dataset's backing store.
    async fn run_primary(&self, sql: &str) -> Result<String>;

    /// Run a python script against the same store. The runner binds `con`
    /// (an open connection) before the script body.
    async fn run_fallback(&self, script: &str) -> Result<String>;
}

/// Production runner: rusqlite for SQL, `python3 -c` for fallback scripts.
pub struct SqliteRunner {
    db_path: PathBuf,
    python_bin: String,
}

impl SqliteRunner {
    pub fn new(db_path: PathBuf) -> Self {
        Self {
            db_path,
            python_bin: "python3".to_string(),
        }
    }

    pub fn with_python_bin(mut self, bin: impl Into<String>) -> Self {
        self.python_bin = bin.into();
        self
    }

    /// Preamble prepended to every fallback script: the `con` handle the
    /// script body is written against. Autocommit is required: python's
    /// sqlite3 default wraps DML in an implicit transaction and rolls it
    /// back on close, which would silently drop an approved mutation.
    fn fallback_preamble(&self) -> String {
        format!(
            "import sqlite3\ncon = sqlite3.connect(r\"{}\", isolation_level=None)\n",
            self.db_path.display()
        )
    }
}

#[async_trait]
impl QueryRunner for SqliteRunner {
    async fn run_primary(&self, sql: &str) -> Result<String> {
        let path = self.db_path.clone();
        let sql = sql.to_string();
        debug!("Running primary SQL against {}", path.display());
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)
                .with_context(|| format!("Failed to open database {}", path.display()))?;
            let mut stmt = conn
                .prepare(&sql)
                .with_context(|| format!("SQL prepare failed: {sql}"))?;

            if stmt.column_count() == 0 {
                let affected = stmt.execute([]).context("SQL execution failed")?;
                return Ok(format!("{affected} rows affected"));
            }

            let columns: Vec<String> =
                stmt.column_names().iter().map(|c| c.to_string()).collect();
            let mut lines = vec![columns.join("\t")];
            let mut rows = stmt.query([]).context("SQL query failed")?;
            while let Some(row) = rows.next().context("SQL row fetch failed")? {
                let mut cells = Vec::with_capacity(columns.len());
                for i in 0..columns.len() {
                    cells.push(format_value(row.get_ref(i)?));
                }
                lines.push(cells.join("\t"));
            }
            Ok(lines.join("\n"))
        })
        .await
        .context("SQL execution task panicked")?
    }

    async fn run_fallback(&self, script: &str) -> Result<String> {
        let full_script = format!("{}{}", self.fallback_preamble(), script);
        debug!("Running fallback script ({} bytes)", full_script.len());

        let output = Command::new(&self.python_bin)
            .arg("-c")
            .arg(&full_script)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to launch {}", self.python_bin))?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(anyhow::anyhow!("{}", stderr.trim()))
        }
    }
}

fn format_value(value: ValueRef<'_>) -> String {
    match value {
        ValueRef::Null => String::new(),
        ValueRef::Integer(i) => i.to_string(),
        ValueRef::Real(f) => f.to_string(),
        ValueRef::Text(t) => String::from_utf8_lossy(t).to_string(),
        ValueRef::Blob(_) => "<blob>".to_string(),
    }
}

type QueuedOutcome = std::result::Result<String, String>;

/// Test double with scripted outcomes and call recording. Outcomes are
/// consumed in order; an exhausted queue answers with an empty success.
#[derive(Default)]
pub struct FakeRunner {
    primary_outcomes: Mutex<VecDeque<QueuedOutcome>>,
    fallback_outcomes: Mutex<VecDeque<QueuedOutcome>>,
    primary_calls: Mutex<Vec<String>>,
    fallback_calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_primary_ok(self, output: &str) -> Self {
        self.primary_outcomes
            .lock()
            .expect("runner queue poisoned")
            .push_back(Ok(output.to_string()));
        self
    }

    pub fn push_primary_err(self, error: &str) -> Self {
        self.primary_outcomes
            .lock()
            .expect("runner queue poisoned")
            .push_back(Err(error.to_string()));
        self
    }

    pub fn push_fallback_ok(self, output: &str) -> Self {
        self.fallback_outcomes
            .lock()
            .expect("runner queue poisoned")
            .push_back(Ok(output.to_string()));
        self
    }

    pub fn push_fallback_err(self, error: &str) -> Self {
        self.fallback_outcomes
            .lock()
            .expect("runner queue poisoned")
            .push_back(Err(error.to_string()));
        self
    }

    pub fn primary_calls(&self) -> Vec<String> {
        self.primary_calls.lock().expect("runner log poisoned").clone()
    }

    pub fn fallback_calls(&self) -> Vec<String> {
        self.fallback_calls.lock().expect("runner log poisoned").clone()
    }
}

#[async_trait]
impl QueryRunner for FakeRunner {
    async fn run_primary(&self, sql: &str) -> Result<String> {
        self.primary_calls
            .lock()
            .expect("runner log poisoned")
            .push(sql.to_string());
        match self
            .primary_outcomes
            .lock()
            .expect("runner queue poisoned")
            .pop_front()
        {
            Some(Ok(output)) => Ok(output),
            Some(Err(error)) => Err(anyhow::anyhow!("{error}")),
            None => Ok(String::new()),
        }
    }

    async fn run_fallback(&self, script: &str) -> Result<String> {
        self.fallback_calls
            .lock()
            .expect("runner log poisoned")
            .push(script.to_string());
        match self
            .fallback_outcomes
            .lock()
            .expect("runner queue poisoned")
            .pop_front()
        {
            Some(Ok(output)) => Ok(output),
            Some(Err(error)) => Err(anyhow::anyhow!("{error}")),
            None => Ok(String::new()),
        }
    }
}
