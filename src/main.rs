use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::task::JoinSet;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod assessment;
mod config;
mod error;
mod export;
mod fleet;
mod health;
mod models;
mod pipeline;
mod report;
mod risk;
mod store;

use config::ScoringPolicy;
use models::{DiagnosticReport, RiskTier};
use pipeline::{CommitOutcome, CommitStatus};
use store::{FlatFileStore, MasterTable, ReportRepository};

#[derive(Parser)]
#[command(name = "transformer-health")]
#[command(about = "Transformer diagnostic scoring and fleet health reporting", long_about = None)]
struct Cli {
    /// Directory holding reports, history, exports and the master table
    #[arg(long, global = true, env = "TRANSFORMER_HEALTH_STORE", default_value = "data")]
    store: PathBuf,
    /// Scoring policy file (TOML); built-in defaults when omitted
    #[arg(long, global = true, env = "TRANSFORMER_HEALTH_POLICY")]
    policy: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write the default scoring policy
    InitConfig {
        #[arg(long, default_value = "policy.toml")]
        out: PathBuf,
    },
    /// Score extracted measurement records and persist the reports
    Analyze {
        #[arg(required = true)]
        inputs: Vec<PathBuf>,
    },
    /// Regenerate exports and the master table from stored reports
    Export,
    /// Print the fleet summary
    Summary {
        #[arg(long)]
        json: bool,
    },
    /// Render a stored report as markdown
    Report {
        #[arg(long)]
        equipment: String,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
    /// List every stored analysis of one equipment
    History {
        #[arg(long)]
        equipment: String,
    },
    /// Take equipment out of the fleet; history is kept
    Delete {
        #[arg(long, required_unless_present = "all", conflicts_with = "all")]
        equipment: Option<String>,
        #[arg(long)]
        all: bool,
    },
}

enum DocumentOutcome {
    Committed {
        source: PathBuf,
        equipment_id: String,
        health_index: u8,
        risk_tier: RiskTier,
        outcome: CommitOutcome,
    },
    Failed {
        source: PathBuf,
        reason: String,
    },
}

impl DocumentOutcome {
    fn source(&self) -> &Path {
        match self {
            Self::Committed { source, .. } | Self::Failed { source, .. } => source,
        }
    }

    fn failed(source: PathBuf, err: anyhow::Error) -> Self {
        let reason = format!("{err:#}");
        tracing::warn!(source = %source.display(), %reason, "document failed");
        Self::Failed { source, reason }
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_policy(path: Option<&Path>) -> anyhow::Result<ScoringPolicy> {
    match path {
        Some(path) => Ok(ScoringPolicy::load(path)?),
        None => Ok(ScoringPolicy::default()),
    }
}

fn analyze_document(source: &Path, policy: &ScoringPolicy) -> anyhow::Result<DiagnosticReport> {
    let json = std::fs::read_to_string(source)
        .with_context(|| format!("failed to read {}", source.display()))?;
    let raw = pipeline::parse_extracted(&json)?;
    Ok(pipeline::analyze(raw, policy)?)
}

/// Commits one equipment's reports in input order.
fn commit_batch(
    batch: Vec<(PathBuf, DiagnosticReport)>,
    store: &FlatFileStore,
) -> Vec<DocumentOutcome> {
    batch
        .into_iter()
        .map(|(source, report)| match pipeline::commit(store, &report) {
            Ok(outcome) => DocumentOutcome::Committed {
                source,
                health_index: report.asset_health.health_index,
                risk_tier: report.risk_assessment.risk_tier,
                equipment_id: report.equipment_id,
                outcome,
            },
            Err(err) => DocumentOutcome::failed(source, err.into()),
        })
        .collect()
}

fn print_outcome(outcome: &DocumentOutcome) {
    match outcome {
        DocumentOutcome::Committed {
            source,
            equipment_id,
            health_index,
            risk_tier,
            outcome: commit,
        } => {
            let summary = format!(
                "{} -> {} health {}/100, {} risk",
                source.display(),
                equipment_id,
                health_index,
                risk_tier
            );
            match &commit.status {
                CommitStatus::Current { rows, export_path } => println!(
                    "OK     {summary} (revision {}, {} rows in {})",
                    commit.revision,
                    rows,
                    export_path.display()
                ),
                CommitStatus::Archived {
                    current_analysis_date,
                } => println!(
                    "OLDER  {summary} (revision {} kept in history; current report is from {})",
                    commit.revision, current_analysis_date
                ),
            }
        }
        DocumentOutcome::Failed { source, reason } => {
            println!("FAILED {}: {}", source.display(), reason);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::InitConfig { out } => {
            let policy = load_policy(cli.policy.as_deref())?;
            std::fs::write(&out, policy.to_toml()?)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Scoring policy written to {}.", out.display());
        }
        Commands::Analyze { inputs } => {
            let policy = Arc::new(load_policy(cli.policy.as_deref())?);
            let store = Arc::new(FlatFileStore::open(&cli.store)?);

            let mut analyses = JoinSet::new();
            for (position, source) in inputs.into_iter().enumerate() {
                let policy = Arc::clone(&policy);
                analyses.spawn_blocking(move || {
                    let result = analyze_document(&source, &policy);
                    (position, source, result)
                });
            }
            let mut analyzed = Vec::new();
            while let Some(joined) = analyses.join_next().await {
                analyzed.push(joined.context("analysis task panicked")?);
            }
            analyzed.sort_by_key(|(position, ..)| *position);

            let mut outcomes = Vec::new();
            let mut batches: BTreeMap<String, Vec<(PathBuf, DiagnosticReport)>> = BTreeMap::new();
            for (_, source, result) in analyzed {
                match result {
                    Ok(report) => batches
                        .entry(report.equipment_id.clone())
                        .or_default()
                        .push((source, report)),
                    Err(err) => outcomes.push(DocumentOutcome::failed(source, err)),
                }
            }

            let mut commits = JoinSet::new();
            for batch in batches.into_values() {
                let store = Arc::clone(&store);
                commits.spawn_blocking(move || commit_batch(batch, &store));
            }
            while let Some(joined) = commits.join_next().await {
                outcomes.extend(joined.context("commit task panicked")?);
            }
            outcomes.sort_by(|a, b| a.source().cmp(b.source()));

            let mut failed = 0usize;
            for outcome in &outcomes {
                if matches!(outcome, DocumentOutcome::Failed { .. }) {
                    failed += 1;
                }
                print_outcome(outcome);
            }

            println!(
                "Analyzed {} of {} documents.",
                outcomes.len() - failed,
                outcomes.len()
            );
            if failed > 0 {
                anyhow::bail!("{failed} document(s) failed analysis");
            }
        }
        Commands::Export => {
            let store = FlatFileStore::open(&cli.store)?;
            let exported = pipeline::rebuild_exports(&store)?;
            let rows = store.rows()?.len();
            println!(
                "Exported {exported} reports ({rows} rows); master table at {}.",
                store.master_path().display()
            );
        }
        Commands::Summary { json } => {
            let store = FlatFileStore::open(&cli.store)?;
            let summary = fleet::summarize(&store.current()?);

            if json {
                println!("{}", serde_json::to_string_pretty(&summary)?);
                return Ok(());
            }

            if summary.total_equipment == 0 {
                println!("No diagnostic reports stored.");
                return Ok(());
            }

            println!(
                "{} units, average health index {:.1}",
                summary.total_equipment, summary.average_health_index
            );
            for (tier, count) in &summary.tier_counts {
                println!("- {tier}: {count}");
            }
            println!("Units by health (worst first):");
            for status in &summary.equipment {
                println!(
                    "- {} health {}/100 ({}, {}) analyzed {}",
                    status.equipment_id,
                    status.health_index,
                    status.condition,
                    status.risk_tier,
                    status.analysis_date
                );
            }
        }
        Commands::Report { equipment, out } => {
            let store = FlatFileStore::open(&cli.store)?;
            let equipment_id = report::normalize_equipment_id(Some(equipment.as_str()))?;
            let stored = store
                .load(&equipment_id)?
                .with_context(|| format!("no report stored for {equipment_id}"))?;
            std::fs::write(&out, report::render_markdown(&stored))
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
        Commands::History { equipment } => {
            let store = FlatFileStore::open(&cli.store)?;
            let equipment_id = report::normalize_equipment_id(Some(equipment.as_str()))?;
            let history = store.history(&equipment_id)?;

            if history.is_empty() {
                println!("No analyses recorded for {equipment_id}.");
                return Ok(());
            }

            for entry in &history {
                println!(
                    "- revision {} recorded {} (analysis {}): health {}/100, {} risk",
                    entry.revision,
                    entry.recorded_at.format("%Y-%m-%d %H:%M:%S"),
                    entry.report.analysis_date,
                    entry.report.asset_health.health_index,
                    entry.report.risk_assessment.risk_tier
                );
            }
        }
        Commands::Delete { equipment, all } => {
            let store = FlatFileStore::open(&cli.store)?;
            match equipment {
                Some(equipment) if !all => {
                    let equipment_id = report::normalize_equipment_id(Some(equipment.as_str()))?;
                    if pipeline::remove(&store, &equipment_id)? {
                        println!("Removed {equipment_id} from the fleet.");
                    } else {
                        anyhow::bail!("no report stored for {equipment_id}");
                    }
                }
                _ => {
                    let removed = pipeline::clear(&store)?;
                    println!("Removed {removed} equipment from the fleet.");
                }
            }
        }
    }

    Ok(())
}
