//! Quarry configuration.
//!
//! Configuration lives in `~/.config/quarry/config.toml`. A missing file
//! yields the defaults; malformed TOML is an error. Every field carries a
//! serde default so partial files stay valid across upgrades.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const CONFIG_DIR: &str = "quarry";
const CONFIG_FILE: &str = "config.toml";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// Override for the data directory. Defaults to the platform data dir
    /// (`~/.local/share/quarry` on Linux) when unset.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,

    #[serde(default)]
    pub llm: LlmSettings,

    #[serde(default)]
    pub memory: MemorySettings,
}

/// Completion-service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmSettings {
    /// Whether the LLM planner is enabled at all. When false the heuristic
    /// planner is used regardless of endpoint availability.
    #[serde(default = "default_llm_enabled")]
    pub enabled: bool,

    /// Ollama-compatible chat endpoint.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    #[serde(default = "default_llm_model")]
    pub model: String,
}

fn default_llm_enabled() -> bool {
    true
}

fn default_llm_base_url() -> String {
    "http://127.0.0.1:11434".to_string()
}

fn default_llm_model() -> String {
    "qwen3:8b".to_string()
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: default_llm_enabled(),
            base_url: default_llm_base_url(),
            model: default_llm_model(),
        }
    }
}

/// Learning-memory tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySettings {
    /// Maximum files returned by a memory search.
    #[serde(default = "default_search_limit")]
    pub search_limit: usize,

    /// Lines taken from the top of each matching file as its snippet.
    #[serde(default = "default_snippet_lines")]
    pub snippet_lines: usize,

    /// How many fingerprints a curation pass promotes.
    #[serde(default = "default_curate_keep")]
    pub curate_keep: usize,
}

fn default_search_limit() -> usize {
    5
}

fn default_snippet_lines() -> usize {
    12
}

fn default_curate_keep() -> usize {
    10
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            search_limit: default_search_limit(),
            snippet_lines: default_snippet_lines(),
            curate_keep: default_curate_keep(),
        }
    }
}

impl Config {
    /// Load from the default location, falling back to defaults when the
    /// file does not exist.
    pub fn load() -> Result<Self> {
        match Self::config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Config = toml::from_str(&raw)
            .with_context(|| format!("Malformed config file {}", path.display()))?;
        Ok(config)
    }

    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    /// Resolved data directory.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(dir) = &self.data_dir {
            return dir.clone();
        }
        dirs::data_dir()
            .map(|dir| dir.join(CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".quarry"))
    }

    /// Path of an ingested dataset's embedded database.
    pub fn dataset_path(&self, dataset_id: &str) -> PathBuf {
        self.data_dir()
            .join("datasets")
            .join(format!("{dataset_id}.db"))
    }

    /// Root of the learning-memory tree.
    pub fn memory_dir(&self) -> PathBuf {
        self.data_dir().join("memory")
    }

    /// Path of the append-only audit log.
    pub fn audit_path(&self) -> PathBuf {
        self.data_dir().join("audit.jsonl")
    }
}
