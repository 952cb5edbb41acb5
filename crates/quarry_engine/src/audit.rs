//! Audit trail - append-only JSONL log of execution outcomes.
//!
//! Exactly one record per top-level `execute()` call, serialized to one
//! line. The core only ever writes; `read_all` exists for tests and
//! offline inspection.

use anyhow::{Context, Result};
use quarry_common::AuditRecord;
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, OpenOptions};
use tokio::io::AsyncWriteExt;

pub struct AuditTrail {
    log_path: PathBuf,
}

impl AuditTrail {
    pub fn new(log_path: PathBuf) -> Self {
        Self { log_path }
    }

    /// Append one record as a single JSONL line.
    pub async fn append(&self, record: &AuditRecord) -> Result<()> {
        if let Some(parent) = self.log_path.parent() {
            create_dir_all(parent)
                .await
                .context("Failed to create audit log directory")?;
        }

        let json = serde_json::to_string(record)? + "\n";

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .await
            .context("Failed to open audit log")?;

        file.write_all(json.as_bytes())
            .await
            .context("Failed to write audit record")?;

        file.sync_all().await.context("Failed to sync audit log")?;

        Ok(())
    }

    /// Read back every record (tests and offline inspection).
    pub async fn read_all(&self) -> Result<Vec<AuditRecord>> {
        if !self.log_path.exists() {
            return Ok(vec![]);
        }

        let content = tokio::fs::read_to_string(&self.log_path)
            .await
            .context("Failed to read audit log")?;

        let records: Vec<AuditRecord> = content
            .lines()
            .filter(|line| !line.is_empty())
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(records)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use quarry_common::PlanLanguage;
    use tempfile::TempDir;

    fn sample(success: bool) -> AuditRecord {
        AuditRecord {
            timestamp: Utc::now(),
            dataset_id: "sales".to_string(),
            command: "SELECT count(*) FROM orders".to_string(),
            language: PlanLanguage::Sql,
            mutating: false,
            approved: true,
            override_used: false,
            success,
            error: if success {
                None
            } else {
                Some("primary failed: no such table".to_string())
            },
        }
    }

    #[tokio::test]
    async fn test_append_and_read_back() {
        let dir = TempDir::new().unwrap();
        let trail = AuditTrail::new(dir.path().join("audit.jsonl"));

        trail.append(&sample(true)).await.unwrap();
        trail.append(&sample(false)).await.unwrap();

        let records = trail.read_all().await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records[0].success);
        assert_eq!(
            records[1].error.as_deref(),
            Some("primary failed: no such table")
        );
    }

    #[tokio::test]
    async fn test_one_line_per_record() {
        let dir = TempDir::new().unwrap();
        let trail = AuditTrail::new(dir.path().join("audit.jsonl"));
        trail.append(&sample(true)).await.unwrap();

        let raw = std::fs::read_to_string(trail.path()).unwrap();
        assert_eq!(raw.lines().count(), 1);
        serde_json::from_str::<serde_json::Value>(raw.lines().next().unwrap()).unwrap();
    }

    #[tokio::test]
    async fn test_missing_log_reads_empty() {
        let dir = TempDir::new().unwrap();
        let trail = AuditTrail::new(dir.path().join("audit.jsonl"));
        assert!(trail.read_all().await.unwrap().is_empty());
    }
}
