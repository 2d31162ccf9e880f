use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, warn};

use dialogforge::catalog::{default_catalog, Catalog};
use dialogforge::client::{ChatClient, RetryPolicy, ToolInvoker, ToolServiceClient};
use dialogforge::config::Config;
use dialogforge::dataset::{load_completed_dataset, load_question_dataset};
use dialogforge::pipeline::completion::CompletionController;
use dialogforge::pipeline::generation::GenerationController;
use dialogforge::pipeline::{shutdown_channel, RunPhase, Shutdown};
use dialogforge::state::RunState;

/// Function-calling dataset pipeline.
#[derive(Parser)]
#[command(name = "dialogforge", version, about = "Function-calling dataset pipeline")]
struct Cli {
    /// Config file path
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,

    /// API key override (beats config file and environment)
    #[arg(long, global = true)]
    api_key: Option<String>,

    /// Log filter (e.g. "debug", "dialogforge=debug")
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Phase 1: generate the deduplicated question dataset
    Generate {
        /// Total questions to generate across the catalog
        #[arg(long)]
        total: Option<u64>,
        /// Questions requested per batch
        #[arg(long)]
        batch_size: Option<u64>,
        /// Question dataset output path
        #[arg(long)]
        output: Option<PathBuf>,
        /// Run state file path
        #[arg(long)]
        state: Option<PathBuf>,
        /// Discard any persisted state and start over
        #[arg(long)]
        reset: bool,
        /// Build the catalog from the live tool service instead of the
        /// built-in one
        #[arg(long)]
        fetch_catalog: bool,
    },

    /// Phase 2: complete questions into full conversations
    Complete {
        /// Question dataset to complete
        #[arg(long)]
        questions: Option<PathBuf>,
        /// Completed dataset output path
        #[arg(long)]
        output: Option<PathBuf>,
        /// Run state file path
        #[arg(long)]
        state: Option<PathBuf>,
        /// Items per batch
        #[arg(long)]
        batch_size: Option<usize>,
        /// Discard any persisted state and start over
        #[arg(long)]
        reset: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    dialogforge::setup_logging(cli.log.clone());

    match run(cli).await {
        Ok(phase) => {
            info!("run finished: {:?}", phase);
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("fatal: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Wires ctrl-c to the controllers' shutdown channel.
fn spawn_signal_listener() -> Shutdown {
    let (trigger, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt signal received, finishing current batch flush");
            trigger.trigger();
        }
    });
    shutdown
}

fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(&cli.config)?;
    if let Some(key) = &cli.api_key {
        config.set_api_key(key.clone());
    }
    config.validate()?;
    Ok(config)
}

fn reset_state(path: &std::path::Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => {
            info!("reset: removed state file {}", path.display());
            Ok(())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("failed to reset {}", path.display())),
    }
}

async fn run(cli: Cli) -> anyhow::Result<RunPhase> {
    let config = load_config(&cli)?;
    let api_key = config.api_key().context("API key vanished after validation")?;

    match &cli.command {
        Commands::Generate {
            total,
            batch_size,
            output,
            state,
            reset,
            fetch_catalog,
        } => {
            let total = total.unwrap_or(config.generation.total_questions);
            let batch_size = batch_size.unwrap_or(config.generation.batch_size);
            let state_path = state
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.generation.state_file));
            let output_path = output
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.generation.output_file));
            if *reset {
                reset_state(&state_path)?;
            }

            let catalog = if *fetch_catalog {
                fetch_catalog_from_service(&config).await?
            } else {
                default_catalog()
            };
            info!(
                "generating {} questions over {} tools (batch size {})",
                total,
                catalog.len(),
                batch_size
            );

            let api = ChatClient::new(&config.api, api_key)?;
            let run_state = RunState::load_or_create(&state_path)?;
            let mut shutdown = spawn_signal_listener();
            let mut controller = GenerationController::new(
                &api,
                &catalog,
                run_state,
                state_path,
                output_path,
                total,
                batch_size,
                Duration::from_secs(config.generation.batch_delay_secs),
                RetryPolicy::from_config(&config.retry),
            );

            let phase = controller.run(&mut shutdown).await?;
            if phase == RunPhase::Completed {
                info!("final tool distribution:");
                for (tool, produced, target) in controller.summary() {
                    info!("  {}: {}/{}", tool, produced, target);
                }
            }
            Ok(phase)
        }

        Commands::Complete {
            questions,
            output,
            state,
            batch_size,
            reset,
        } => {
            let question_path = questions
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.completion.question_file));
            let output_path = output
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.completion.output_file));
            let state_path = state
                .clone()
                .unwrap_or_else(|| PathBuf::from(&config.completion.state_file));
            let batch_size = batch_size.unwrap_or(config.completion.batch_size);
            if *reset {
                reset_state(&state_path)?;
            }

            let dataset = load_question_dataset(&question_path)
                .with_context(|| format!("failed to read {}", question_path.display()))?;
            info!(
                "completing {} questions from {}",
                dataset.questions.len(),
                question_path.display()
            );

            let api = ChatClient::new(&config.api, api_key)?;
            let tool_service = ToolServiceClient::new(&config.tool_service)?;
            if let Err(e) = tool_service.connect().await {
                warn!("tool service connect failed, will retry per item: {}", e);
            }
            let catalog = match tool_service.list_tools().await {
                Ok(tools) if !tools.is_empty() => Catalog::new(tools),
                Ok(_) | Err(_) => {
                    warn!("tool listing unavailable, using built-in catalog");
                    default_catalog()
                }
            };

            let run_state = RunState::load_or_create(&state_path)?;
            let completed = if run_state.cursor() > 0 {
                load_completed_dataset(&output_path)?
            } else {
                Vec::new()
            };
            let mut shutdown = spawn_signal_listener();
            let mut controller = CompletionController::new(
                &api,
                &tool_service,
                &catalog,
                run_state,
                state_path,
                output_path,
                completed,
                batch_size,
                Duration::from_secs(config.completion.batch_delay_secs),
                RetryPolicy::from_config(&config.retry),
                config.completion.fallback_tool.clone(),
            );

            let result = controller.run(&dataset, &mut shutdown).await;
            // Session cleanup runs on every exit path
            tool_service.disconnect().await;
            let phase = result?;
            info!(
                "completed {} conversations, skipped {}",
                controller.completed().len(),
                controller.state().skipped().len()
            );
            Ok(phase)
        }
    }
}

async fn fetch_catalog_from_service(config: &Config) -> anyhow::Result<Catalog> {
    let service = ToolServiceClient::new(&config.tool_service)?;
    service.connect().await.context("tool service connect failed")?;
    let tools = service.list_tools().await.context("tools/list failed")?;
    service.disconnect().await;
    anyhow::ensure!(!tools.is_empty(), "tool service returned an empty catalog");
    Ok(Catalog::new(tools))
}
