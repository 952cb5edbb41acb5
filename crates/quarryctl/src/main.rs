//! quarryctl - natural-language questions against local tabular datasets.
//!
//! Thin wiring layer: resolves config, builds the real collaborators
//! (sqlite catalog/runner, HTTP completion client, terminal approval gate)
//! and hands off to the engine. No rendering beyond plain text.

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use owo_colors::OwoColorize;
use quarry_common::{Config, ExecutionContext, PlanLanguage};
use quarry_engine::{
    ApprovalGate, AuditTrail, Catalog, HttpCompletionClient, LearningMemory, Orchestrator,
    Planner, SqliteCatalog, SqliteRunner,
};
use std::sync::Arc;
use tracing::debug;

#[derive(Parser)]
#[command(
    name = "quarryctl",
    about = "Ask questions against locally ingested tabular datasets",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ask a natural-language question against a dataset
    Ask {
        /// Dataset id (an ingested database under the data directory)
        dataset: String,
        /// The question, as free text
        question: Vec<String>,
        /// Skip the approval prompt for this invocation
        #[arg(long)]
        yes: bool,
        /// Print the full result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search the learning memory
    Search {
        query: Vec<String>,
        #[arg(long)]
        dataset: Option<String>,
    },
    /// Promote recurring learnings into the curated store
    Curate {
        #[arg(long)]
        dataset: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Ask {
            dataset,
            question,
            yes,
            json,
        } => ask(&config, &dataset, &question.join(" "), yes, json).await,
        Commands::Search { query, dataset } => {
            search(&config, &query.join(" "), dataset.as_deref()).await
        }
        Commands::Curate { dataset } => curate(&config, dataset.as_deref()).await,
    }
}

async fn ask(config: &Config, dataset: &str, question: &str, yes: bool, json: bool) -> Result<()> {
    let db_path = config.dataset_path(dataset);
    if !db_path.exists() {
        anyhow::bail!(
            "Dataset {dataset} not found at {} (ingest it first)",
            db_path.display()
        );
    }

    let catalog = SqliteCatalog::new(config.data_dir().join("datasets"));
    let schema = catalog.schema(dataset).await?;
    let tables = catalog.source_tables(dataset).await?;

    let memory = Arc::new(LearningMemory::with_settings(
        config.memory_dir(),
        &config.memory,
    ));
    let hints: Vec<String> = memory
        .search(question, Some(dataset))
        .await?
        .into_iter()
        .map(|hit| hit.snippet)
        .collect();
    debug!("Consumed {} memory hints", hints.len());

    let context = ExecutionContext::new(dataset, tables)
        .with_bypass(yes)
        .with_hints(hints);

    let planner = Planner::new(Arc::new(HttpCompletionClient::new(&config.llm)));
    let plan = planner
        .create_plan(question, &schema, &context)
        .await
        .context("Planning failed")?;

    let orchestrator = Orchestrator::new(
        Arc::new(SqliteRunner::new(db_path)),
        Arc::new(TerminalGate),
        memory,
        Arc::new(AuditTrail::new(config.audit_path())),
    );

    let result = orchestrator.execute(&plan, &context).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        eprintln!("{}", result.explanation.dimmed());
        println!("{}", result.output);
    }
    Ok(())
}

async fn search(config: &Config, query: &str, dataset: Option<&str>) -> Result<()> {
    let memory = LearningMemory::with_settings(config.memory_dir(), &config.memory);
    let hits = memory.search(query, dataset).await?;
    if hits.is_empty() {
        println!("No matching learnings.");
        return Ok(());
    }
    for hit in hits {
        println!(
            "{} {}",
            format!("[{}]", hit.score).green(),
            hit.path.display().to_string().bold()
        );
        println!("{}\n", hit.snippet);
    }
    Ok(())
}

async fn curate(config: &Config, dataset: Option<&str>) -> Result<()> {
    let memory = LearningMemory::with_settings(config.memory_dir(), &config.memory);
    let promoted = memory.curate(dataset).await?;
    if promoted.is_empty() {
        println!("Nothing to curate.");
    } else {
        println!("Promoted {} learnings:", promoted.len());
        for fingerprint in promoted {
            println!("  {fingerprint}");
        }
    }
    Ok(())
}

/// Interactive y/N approval prompt. Anything but an explicit yes declines.
struct TerminalGate;

#[async_trait]
impl ApprovalGate for TerminalGate {
    async fn approve(&self, command: &str, language: PlanLanguage) -> Result<bool> {
        let term = console::Term::stderr();
        term.write_line(&format!(
            "{} ({}):",
            "This command would modify data".yellow().bold(),
            language.as_str()
        ))?;
        for line in command.lines() {
            term.write_line(&format!("    {line}"))?;
        }
        term.write_str("Proceed? [y/N] ")?;
        let answer = term.read_line().context("Failed to read approval answer")?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }
}
