//! Learning memory.
//!
//! Append-only markdown store of symptom→fix pairs, partitioned by dataset
//! and by day, with a global mirror for cross-dataset search. Writes are
//! deduplicated by fingerprint: saving the same (dataset, symptom, fix)
//! twice stores exactly one block. Curation promotes recurring fingerprints
//! into a single rewritten `curated.md` per scope; it is idempotent and
//! re-runnable, so racing a concurrent save at worst misses the newest
//! entry until the next pass.

use anyhow::{Context, Result};
use quarry_common::config::MemorySettings;
use quarry_common::LearningRecord;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use tokio::fs::{create_dir_all, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Literal block header every learning entry starts with. Format-significant:
/// curation splits files on it.
const BLOCK_HEADER: &str = "## Learning ";

/// Fixed first line of a curated file.
const CURATED_HEADER: &str = "# Curated learnings";

const CURATED_FILE: &str = "curated.md";

/// Scope directory that mirrors every dataset's entries.
const GLOBAL_SCOPE: &str = "global";

/// One search hit: a memory file, its overlap score and a head snippet.
#[derive(Debug, Clone)]
pub struct MemorySnippet {
    pub path: PathBuf,
    pub score: usize,
    pub snippet: String,
}

pub struct LearningMemory {
    root: PathBuf,
    search_limit: usize,
    snippet_lines: usize,
    curate_keep: usize,
}

impl LearningMemory {
    pub fn new(root: PathBuf) -> Self {
        Self::with_settings(root, &MemorySettings::default())
    }

    pub fn with_settings(root: PathBuf, settings: &MemorySettings) -> Self {
        Self {
            root,
            search_limit: settings.search_limit,
            snippet_lines: settings.snippet_lines,
            curate_keep: settings.curate_keep,
        }
    }

    /// Persist one learning record. Returns false when an identical
    /// fingerprint already exists in the dataset scope (silent no-op).
    pub async fn save_learning(&self, record: &LearningRecord) -> Result<bool> {
        let scope_dir = self.root.join(&record.dataset_id);

        if self
            .scope_contains_fingerprint(&scope_dir, &record.fingerprint)
            .await?
        {
            debug!(
                "Learning {} already present for dataset {}; skipping",
                record.fingerprint, record.dataset_id
            );
            return Ok(false);
        }

        let block = format_block(record);
        let daily_name = format!("learning-{}.md", record.created_at.format("%Y-%m-%d"));

        append_to(&scope_dir.join(&daily_name), &block).await?;
        append_to(&self.root.join(GLOBAL_SCOPE).join(&daily_name), &block).await?;

        info!(
            "Recorded learning {} for dataset {}",
            record.fingerprint, record.dataset_id
        );
        Ok(true)
    }

    /// Rank memory files by query-token overlap. Scope is one dataset
    /// directory, or everything under the root when no dataset is given.
    /// The global mirror holds copies of dataset entries, so a dataset
    /// scope must not include it or every hit shows up twice.
    pub async fn search(&self, query: &str, dataset: Option<&str>) -> Result<Vec<MemorySnippet>> {
        let tokens: HashSet<String> = query
            .to_lowercase()
            .split(|c: char| !c.is_ascii_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_string())
            .collect();
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        match dataset {
            Some(dataset_id) => {
                files.extend(list_markdown_files(&self.root.join(dataset_id)).await?);
            }
            None => {
                for dir in list_subdirectories(&self.root).await? {
                    files.extend(list_markdown_files(&dir).await?);
                }
            }
        }

        let mut hits = Vec::new();
        for path in files {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read memory file {}", path.display()))?;
            let lower = text.to_lowercase();
            let score = tokens.iter().filter(|t| lower.contains(t.as_str())).count();
            if score == 0 {
                continue;
            }
            let snippet = text
                .lines()
                .take(self.snippet_lines)
                .collect::<Vec<_>>()
                .join("\n");
            hits.push(MemorySnippet {
                path,
                score,
                snippet,
            });
        }

        hits.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.path.cmp(&b.path)));
        hits.truncate(self.search_limit);
        Ok(hits)
    }

    /// Promote the most recurrent fingerprints of a scope into its curated
    /// file. Overwrite semantics: each pass rewrites `curated.md` from
    /// scratch. Returns the promoted fingerprints, most frequent first.
    pub async fn curate(&self, dataset: Option<&str>) -> Result<Vec<String>> {
        let scope_dir = self.root.join(dataset.unwrap_or(GLOBAL_SCOPE));
        if !scope_dir.exists() {
            return Ok(Vec::new());
        }

        let mut occurrences: HashMap<String, usize> = HashMap::new();
        let mut first_block: HashMap<String, String> = HashMap::new();

        for path in list_markdown_files(&scope_dir).await? {
            if path.file_name().and_then(|n| n.to_str()) == Some(CURATED_FILE) {
                continue;
            }
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read memory file {}", path.display()))?;
            for block in split_blocks(&text) {
                let Some(fp) = block_fingerprint(&block) else {
                    continue;
                };
                *occurrences.entry(fp.clone()).or_insert(0) += 1;
                first_block.entry(fp).or_insert(block);
            }
        }

        let mut ranked: Vec<(String, usize)> = occurrences.into_iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked.truncate(self.curate_keep);

        let promoted: Vec<String> = ranked.iter().map(|(fp, _)| fp.clone()).collect();

        let mut content = format!("{CURATED_HEADER}\n\n");
        for fp in &promoted {
            content.push_str(&first_block[fp]);
        }
        tokio::fs::write(scope_dir.join(CURATED_FILE), content)
            .await
            .context("Failed to write curated file")?;

        info!(
            "Curated {} learnings into {}",
            promoted.len(),
            scope_dir.join(CURATED_FILE).display()
        );
        Ok(promoted)
    }

    async fn scope_contains_fingerprint(&self, scope_dir: &Path, fingerprint: &str) -> Result<bool> {
        for path in list_markdown_files(scope_dir).await? {
            let text = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read memory file {}", path.display()))?;
            if text.contains(fingerprint) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

fn format_block(record: &LearningRecord) -> String {
    format!(
        "{header}{created}\n\n\
         - dataset_id: {dataset}\n\
         - symptom: {symptom}\n\
         - root_cause: {root_cause}\n\
         - fix: {fix}\n\
         - language: {language}\n\
         - command: {command}\n\
         - confidence: {confidence:.2}\n\
         - tags: {tags}\n\
         - created_at: {created}\n\
         - fingerprint: {fingerprint}\n\n",
        header = BLOCK_HEADER,
        created = record.created_at.to_rfc3339(),
        dataset = record.dataset_id,
        symptom = single_line(&record.symptom),
        root_cause = single_line(&record.root_cause),
        fix = single_line(&record.fix),
        language = record.fix_language.as_str(),
        command = single_line(&record.fix_command),
        confidence = record.confidence,
        tags = record.tags.join(", "),
        fingerprint = record.fingerprint,
    )
}

/// Labeled lines must stay one line each; embedded newlines are escaped.
fn single_line(text: &str) -> String {
    text.replace('\n', "\\n")
}

fn split_blocks(text: &str) -> Vec<String> {
    text.split(BLOCK_HEADER)
        .skip(1)
        .map(|segment| format!("{BLOCK_HEADER}{segment}"))
        .collect()
}

fn block_fingerprint(block: &str) -> Option<String> {
    block
        .lines()
        .find_map(|line| line.strip_prefix("- fingerprint: "))
        .map(|fp| fp.trim().to_string())
}

async fn append_to(path: &Path, block: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        create_dir_all(parent)
            .await
            .context("Failed to create memory directory")?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .with_context(|| format!("Failed to open memory file {}", path.display()))?;
    file.write_all(block.as_bytes())
        .await
        .context("Failed to append learning block")?;
    Ok(())
}

async fn list_markdown_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if !dir.exists() {
        return Ok(files);
    }
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list memory directory {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("md") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

async fn list_subdirectories(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    if !dir.exists() {
        return Ok(dirs);
    }
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .with_context(|| format!("Failed to list memory root {}", dir.display()))?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}
