//! quill CLI.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use quill::config;
use quill::context::RunContext;
use quill::llm::{anthropic::AnthropicClient, LlmClient, OfflineClient};
use quill::pipeline::{GenerationPipeline, PipelineOptions};
use quill::trigger::TriggerOrchestrator;

#[derive(Parser)]
#[command(name = "quill", version, about = "Budget-governed documentation sync engine")]
struct Cli {
    /// Project root.
    #[arg(long, global = true, default_value = ".")]
    root: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate documentation for the project (or a subtree).
    Generate {
        /// Subtree to process; defaults to the project root.
        path: Option<PathBuf>,
        /// Regenerate even when content is unchanged.
        #[arg(long)]
        force: bool,
        /// Stop launching new jobs once spend reaches this, in USD.
        #[arg(long)]
        budget: Option<f64>,
        /// Concurrently processed targets.
        #[arg(long)]
        workers: Option<usize>,
        /// Do not walk subdirectories.
        #[arg(long)]
        no_recursive: bool,
    },
    /// Process a save event for the given paths.
    Save {
        paths: Vec<PathBuf>,
    },
    /// Process files changed in git (a commit-class event).
    Commit {
        /// Only staged files.
        #[arg(long)]
        staged: bool,
    },
    /// Show spend, accuracy, and cap status.
    Status,
    /// Print ledger events from the trailing window.
    Ledger {
        /// Trailing window in hours.
        #[arg(long, default_value_t = 24.0)]
        hours: f64,
        /// Only events of this type.
        #[arg(long)]
        event_type: Option<String>,
    },
    /// Read or write configuration values.
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a resolved value by dotted key, e.g. `limits.hourly_budget`.
    Get { key: String },
    /// Write a value into the project configuration file.
    Set { key: String, value: String },
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("quill=info")),
        )
        .init();

    if let Err(err) = run(Cli::parse()).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn make_client(cfg: &config::QuillConfig) -> Arc<dyn LlmClient> {
    match AnthropicClient::from_env(&cfg.models) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            tracing::warn!(error = %err, "no usable LLM credentials, running offline");
            Arc::new(OfflineClient)
        }
    }
}

async fn run(cli: Cli) -> quill::Result<()> {
    let root = cli.root.canonicalize().unwrap_or(cli.root.clone());
    let cfg = config::load(&root);

    match cli.command {
        Command::Generate {
            path,
            force,
            budget,
            workers,
            no_recursive,
        } => {
            let client = make_client(&cfg);
            let ctx = Arc::new(RunContext::new(cfg)?);
            let pipeline = GenerationPipeline::new(Arc::clone(&ctx), client);
            let options = PipelineOptions {
                recursive: !no_recursive,
                force,
                run_budget: budget,
                workers,
            };
            let target = path.unwrap_or_else(|| root.clone());
            let outcome = pipeline.run(&target, &options).await?;
            let totals = &outcome.totals;
            println!(
                "{} candidates: {} generated, {} skipped, {} blocked, {} failed (${:.4})",
                totals.candidates,
                totals.generated,
                totals.skipped,
                totals.blocked,
                totals.failed,
                totals.total_cost_usd
            );
            if totals.budget_exhausted {
                println!(
                    "run budget reached; {} candidate(s) were not launched",
                    totals.unlaunched
                );
            }
            for result in outcome.results.iter().filter(|r| !r.success) {
                println!(
                    "  {}: {}",
                    result.target.display(),
                    result.error.as_deref().unwrap_or("failed")
                );
            }
            ctx.ledger.flush()?;
        }
        Command::Save { paths } => {
            let client = make_client(&cfg);
            let ctx = Arc::new(RunContext::new(cfg)?);
            let pipeline = GenerationPipeline::new(Arc::clone(&ctx), client);
            let mut orchestrator = TriggerOrchestrator::new(Arc::clone(&ctx), pipeline, &root);
            let report = orchestrator.on_file_save(&paths).await?;
            print_report(&report);
            ctx.ledger.flush()?;
        }
        Command::Commit { staged } => {
            let client = make_client(&cfg);
            let ctx = Arc::new(RunContext::new(cfg)?);
            let pipeline = GenerationPipeline::new(Arc::clone(&ctx), client);
            let mut orchestrator = TriggerOrchestrator::new(Arc::clone(&ctx), pipeline, &root);
            let report = orchestrator.on_git_commit(staged).await?;
            print_report(&report);
            ctx.ledger.flush()?;
        }
        Command::Status => {
            let ctx = Arc::new(RunContext::new(cfg)?);
            let hourly = ctx.ledger.hourly_spend(1.0)?;
            let daily = ctx.ledger.hourly_spend(24.0)?;
            let metrics = ctx.ledger.accuracy_metrics()?;
            let state = ctx.config.budget_state();
            println!("spend: ${hourly:.4} past hour, ${daily:.4} past 24h");
            println!(
                "caps: ${:.2}/event (hard ${:.2}), ${:.2}/hour",
                state.max_cost_per_event, state.hard_safety_cap, state.hourly_budget
            );
            println!(
                "reference accuracy: {:.1}% ({} of {} validated)",
                metrics.accuracy_pct, metrics.validated_ok, metrics.total
            );
        }
        Command::Ledger { hours, event_type } => {
            let ctx = Arc::new(RunContext::new(cfg)?);
            let since = chrono::Utc::now()
                - chrono::Duration::milliseconds((hours * 3_600_000.0) as i64);
            for event in ctx.ledger.query(since, event_type.as_deref())? {
                println!("{}", serde_json::to_string(&event).unwrap_or_default());
            }
        }
        Command::Config { action } => match action {
            ConfigAction::Get { key } => match config::get_value(&cfg, &key) {
                Some(value) => println!("{value}"),
                None => {
                    eprintln!("unknown key: {key}");
                    std::process::exit(1);
                }
            },
            ConfigAction::Set { key, value } => {
                let project_file = config::project_config_path(&root);
                config::set_value(&project_file, &key, &value)?;
                println!("set {key} in {}", project_file.display());
            }
        },
    }
    Ok(())
}

fn print_report(report: &quill::trigger::DispatchReport) {
    if let Some(reason) = &report.refusal {
        println!("refused before dispatch: {reason}");
        return;
    }
    if !report.was_dispatched() {
        println!("nothing to process for this event");
        return;
    }
    for (index, outcome) in report.dispatched.iter().enumerate() {
        let totals = &outcome.totals;
        println!(
            "dispatch {}: {} generated, {} skipped, {} blocked, {} failed (${:.4})",
            index + 1,
            totals.generated,
            totals.skipped,
            totals.blocked,
            totals.failed,
            totals.total_cost_usd
        );
    }
    if report.escalation_refused {
        println!(
            "cascade stopped at the escalation ceiling after {} dispatches",
            report.escalations_used
        );
    }
    println!("total cost: ${:.4}", report.total_cost_usd());
}
