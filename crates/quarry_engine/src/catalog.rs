//! Dataset metadata lookups.
//!
//! Read-only: the engine never writes through the catalog. The real
//! implementation reads `sqlite_master` from the dataset's embedded
//! database; `FakeCatalog` serves canned metadata for tests.

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::Connection;
use std::collections::HashMap;
use std::path::PathBuf;

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Human/LLM-readable schema description of the dataset.
    async fn schema(&self, dataset_id: &str) -> Result<String>;

    /// Candidate source tables, primary table first.
    async fn source_tables(&self, dataset_id: &str) -> Result<Vec<String>>;
}

/// Catalog backed by the ingested datasets directory
/// (`<data_dir>/datasets/<id>.db`).
pub struct SqliteCatalog {
    datasets_dir: PathBuf,
}

impl SqliteCatalog {
    pub fn new(datasets_dir: PathBuf) -> Self {
        Self { datasets_dir }
    }

    fn dataset_path(&self, dataset_id: &str) -> PathBuf {
        self.datasets_dir.join(format!("{dataset_id}.db"))
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn schema(&self, dataset_id: &str) -> Result<String> {
        let path = self.dataset_path(dataset_id);
        let dataset_id = dataset_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)
                .with_context(|| format!("Failed to open dataset {dataset_id}"))?;
            let mut stmt = conn.prepare(
                "SELECT sql FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let ddl: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<_, _>>()?;
            Ok(ddl.join(";\n"))
        })
        .await
        .context("Schema lookup task panicked")?
    }

    async fn source_tables(&self, dataset_id: &str) -> Result<Vec<String>> {
        let path = self.dataset_path(dataset_id);
        let dataset_id = dataset_id.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = Connection::open(&path)
                .with_context(|| format!("Failed to open dataset {dataset_id}"))?;
            let mut stmt = conn.prepare(
                "SELECT name FROM sqlite_master WHERE type = 'table' \
                 AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )?;
            let tables: Vec<String> = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<std::result::Result<_, _>>()?;
            Ok(tables)
        })
        .await
        .context("Source-table lookup task panicked")?
    }
}

/// Test double serving fixed metadata per dataset id.
#[derive(Default)]
pub struct FakeCatalog {
    schemas: HashMap<String, String>,
    tables: HashMap<String, Vec<String>>,
}

impl FakeCatalog {
    pub fn with_dataset(
        mut self,
        dataset_id: &str,
        schema: &str,
        tables: Vec<String>,
    ) -> Self {
        self.schemas.insert(dataset_id.to_string(), schema.to_string());
        self.tables.insert(dataset_id.to_string(), tables);
        self
    }
}

#[async_trait]
impl Catalog for FakeCatalog {
    async fn schema(&self, dataset_id: &str) -> Result<String> {
        self.schemas
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown dataset {dataset_id}"))
    }

    async fn source_tables(&self, dataset_id: &str) -> Result<Vec<String>> {
        self.tables
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("Unknown dataset {dataset_id}"))
    }
}
