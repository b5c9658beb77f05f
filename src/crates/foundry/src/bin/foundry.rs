//! Foundry CLI
//!
//! Main entry point for the foundry command-line tool.

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::Colorize;
use foundry::{
    load_config, logging, version_info, FoundryConfig, Orchestrator, PipelineRun,
    ProjectStateStore, ProviderRegistry, RunId, RunStatus, SqliteBackend, Stage,
};
use futures::TryStreamExt;
use std::sync::Arc;
use tracing::warn;

#[derive(Parser)]
#[command(name = "foundry")]
#[command(about = "Foundry - budgeted multi-agent build pipeline", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new project from a brief
    Init {
        /// Project id
        project: String,
        /// What to build
        #[arg(short, long)]
        brief: String,
    },

    /// Run the pipeline for a project
    Run {
        project: String,
        /// Task hint used for model routing
        #[arg(long)]
        hint: Option<String>,
    },

    /// Show a run
    Status {
        run_id: RunId,
        /// Print the full record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show project state
    State {
        project: String,
        /// Specific version instead of the latest
        #[arg(long)]
        version: Option<u64>,
    },

    /// List every committed version of a project
    History { project: String },

    /// Print the effective configuration
    Config,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = load_config().await.context("Failed to load configuration")?;
    logging::init(&config.logging)?;

    match cli.command {
        Commands::Init { project, brief } => {
            let store = open_store(&config).await?;
            let state = store.create(&project, &brief).await?;
            println!("{} {}", "✓ Created project".green().bold(), state.project_id.bold());
            println!("  Version: {}", state.version);
        }
        Commands::Run { project, hint } => {
            let engine = build_engine(config).await?;
            let run_id = engine.spawn_with_hint(&project, hint).await?;
            println!("Started run {}", run_id.to_string().cyan());

            let canceller = engine.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Received Ctrl+C, cancelling run");
                    if let Err(e) = canceller.cancel(run_id).await {
                        warn!(error = %e, "Failed to cancel run");
                    }
                }
            });

            let run = engine.wait(run_id).await?;
            print_run(&run);
            if run.status != RunStatus::Succeeded {
                std::process::exit(1);
            }
        }
        Commands::Status { run_id, json } => {
            let engine = build_engine(config).await?;
            let run = engine.status(run_id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&run)?);
            } else {
                print_run(&run);
            }
        }
        Commands::State { project, version } => {
            let store = open_store(&config).await?;
            let state = match version {
                Some(v) => store.get_version(&project, v).await?,
                None => store.get(&project).await?,
            };
            println!("{} {} (version {})", "Project".bold(), state.project_id, state.version);
            println!("Brief: {}", state.brief);
            for stage in Stage::ALL {
                match state.latest(stage) {
                    Some(artifact) => {
                        println!("\n{} (revision {})", stage.to_string().green().bold(), artifact.revision);
                        println!("{}", serde_json::to_string_pretty(&artifact.document)?);
                    }
                    None => println!("\n{} {}", stage.to_string().dimmed(), "(not committed)".dimmed()),
                }
            }
        }
        Commands::History { project } => {
            let store = open_store(&config).await?;
            let history = store.history(&project).await?;
            let mut versions = history.stream();
            while let Some(state) = versions.try_next().await? {
                let stages: Vec<String> = state
                    .committed_stages()
                    .iter()
                    .map(|s| format!("{}×{}", s, state.revisions(*s).len()))
                    .collect();
                println!(
                    "v{:<4} {}  {}",
                    state.version,
                    state.committed_at.format("%Y-%m-%d %H:%M:%S"),
                    if stages.is_empty() { "-".to_string() } else { stages.join(", ") }
                );
            }
        }
        Commands::Config => {
            println!("{}", toml::to_string_pretty(&config.redacted())?);
        }
        Commands::Version => {
            println!("{}", version_info());
        }
    }

    Ok(())
}

async fn open_store(config: &FoundryConfig) -> anyhow::Result<Arc<ProjectStateStore>> {
    let path = config.database_path()?;
    let backend = SqliteBackend::open(&path)
        .await
        .with_context(|| format!("Failed to open database at {}", path.display()))?;
    Ok(Arc::new(ProjectStateStore::new(Arc::new(backend))))
}

async fn build_engine(config: FoundryConfig) -> anyhow::Result<Orchestrator> {
    let store = open_store(&config).await?;
    let providers = ProviderRegistry::from_config(&config.providers)?;
    Ok(Orchestrator::new(Arc::new(config), store, providers)?)
}

fn print_run(run: &PipelineRun) {
    let status = match run.status {
        RunStatus::Succeeded => run.status.to_string().green().bold(),
        RunStatus::Failed => run.status.to_string().red().bold(),
        RunStatus::HaltedBudget => run.status.to_string().yellow().bold(),
        _ => run.status.to_string().cyan(),
    };
    println!("Run {} [{}]", run.id, status);
    println!("  Project:  {}", run.project_id);
    println!("  Versions: {} → {}", run.base_version, run.head_version);
    println!("  Cost:     ${:.4}", run.total_cost_usd);
    if let Some(stage) = run.current_stage {
        println!("  Stage:    {}", stage);
    }
    for transition in &run.transitions {
        println!(
            "  - {:<8} attempts={} cost=${:.4} {:?}",
            transition.stage.to_string(),
            transition.attempts,
            transition.cost_usd,
            transition.outcome
        );
    }
    if let Some(error) = &run.last_error {
        println!("  {} {}: {}", "Error".red(), error.kind, error.message);
    }
}
