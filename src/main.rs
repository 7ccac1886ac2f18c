use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use shellpilot::agent::AgentLoop;
use shellpilot::domain::RunOutcome;
use shellpilot::history::{HistoryStore, JsonlHistoryStore, NoHistory};
use shellpilot::llm::AnthropicClient;
use shellpilot::registry::ConnectionRegistry;
use shellpilot::retrieval::{KeywordRetrieval, NoRetrieval, RetrievalProvider};
use shellpilot::stream::{DEFAULT_CHANNEL_CAPACITY, EventSink, write_ndjson};
use shellpilot::verification::Verifier;

mod cli;
mod config;

use cli::Cli;
use cli::commands::Commands;
use config::Config;

fn setup_logging() -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shellpilot")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("shellpilot.log");

    // stdout carries the event stream, so logs go to a file
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Runs the selected command and returns the process exit code.
async fn run_application(cli: &Cli, config: &Config) -> Result<i32> {
    info!("Starting application");

    if cli.is_verbose() {
        eprintln!("{}", "Verbose mode enabled".yellow());
    }

    match &cli.command {
        Commands::Run {
            goal,
            connection,
            max_iterations,
        } => handle_run_command(goal, connection, *max_iterations, cli.is_verbose(), config).await,
        Commands::Exec { command, connection } => handle_exec_command(command, connection, config).await,
        Commands::Verify { goal, connection } => handle_verify_command(goal, connection, config).await,
        Commands::Connections => handle_connections_command(config),
    }
}

async fn handle_run_command(
    goal: &str,
    connection: &str,
    max_iterations: Option<u32>,
    verbose: bool,
    config: &Config,
) -> Result<i32> {
    let descriptor = config.connection(connection)?;
    info!("Running goal {:?} on {}", goal, descriptor.id);

    let llm = AnthropicClient::new(config.anthropic_config()).context("Failed to create reasoning client")?;
    let registry = Arc::new(ConnectionRegistry::with_options(config.executor_options()));

    let mut agent_config = config.agent_config();
    if let Some(max) = max_iterations {
        if max == 0 {
            eyre::bail!("--max-iterations must be > 0");
        }
        agent_config.max_iterations = max;
    }

    let history: Arc<dyn HistoryStore> = if config.history.enabled {
        let dir = config.history.resolved_dir();
        Arc::new(
            JsonlHistoryStore::new(&dir)
                .with_context(|| format!("Failed to open history store at {}", dir.display()))?,
        )
    } else {
        Arc::new(NoHistory)
    };

    let retrieval: Arc<dyn RetrievalProvider> = match &config.knowledge.path {
        Some(path) => Arc::new(
            KeywordRetrieval::from_yaml_file(path)
                .with_context(|| format!("Failed to load knowledge from {}", path.display()))?,
        ),
        None => Arc::new(NoRetrieval),
    };

    let agent = AgentLoop::new(Arc::new(llm), registry.clone())
        .with_config(agent_config)
        .with_history_store(history)
        .with_retrieval(retrieval);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, cancelling run");
            interrupt.cancel();
        }
    });

    let (sink, rx) = EventSink::channel(DEFAULT_CHANNEL_CAPACITY);
    let writer = tokio::spawn(write_ndjson(rx, tokio::io::stdout()));

    let outcome = agent.run(goal, &descriptor, &sink, &cancel).await;
    drop(sink);

    writer
        .await
        .context("Event writer panicked")?
        .context("Failed to write event stream")?;
    registry.disconnect_all().await;

    if verbose {
        let summary = match &outcome {
            RunOutcome::Completed { iterations } => format!("completed in {} iteration(s)", iterations).green(),
            RunOutcome::Exhausted { iterations } => format!("gave up after {} iteration(s)", iterations).yellow(),
            RunOutcome::Aborted { iterations } => format!("aborted after {} iteration(s)", iterations).yellow(),
            RunOutcome::Failed(message) => format!("failed: {}", message).red(),
        };
        eprintln!("{} {}", "Run".bold(), summary);
    }

    Ok(if outcome.is_success() { 0 } else { 1 })
}

async fn handle_exec_command(command: &str, connection: &str, config: &Config) -> Result<i32> {
    let descriptor = config.connection(connection)?;
    let registry = ConnectionRegistry::with_options(config.executor_options());

    let executor = registry
        .get_executor(&descriptor)
        .await
        .with_context(|| format!("Failed to connect to {}", descriptor.id))?;
    let log = executor.execute(command).await.context("Command execution failed")?;
    registry.disconnect_all().await;

    println!("{}", serde_json::to_string_pretty(&log)?);
    Ok(if log.is_success() { 0 } else { 1 })
}

async fn handle_verify_command(goal: &str, connection: &str, config: &Config) -> Result<i32> {
    let descriptor = config.connection(connection)?;
    let registry = ConnectionRegistry::with_options(config.executor_options());

    let executor = registry
        .get_executor(&descriptor)
        .await
        .with_context(|| format!("Failed to connect to {}", descriptor.id))?;
    let outcome = Verifier::new()
        .verify(goal, executor.as_ref())
        .await
        .context("Verification failed to run")?;
    registry.disconnect_all().await;

    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(if outcome.success { 0 } else { 1 })
}

fn handle_connections_command(config: &Config) -> Result<i32> {
    let descriptors = config.descriptors();
    if descriptors.is_empty() {
        println!("{}", "No connections configured (the 'local' connection is always available)".yellow());
        return Ok(0);
    }

    for descriptor in descriptors {
        println!("{:<24} {}", descriptor.id.cyan(), descriptor.kind());
    }
    Ok(0)
}

#[tokio::main]
async fn main() -> Result<()> {
    // Setup logging first
    setup_logging().context("Failed to setup logging")?;

    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    config.validate()?;

    info!("Starting with config from: {:?}", cli.config);

    let code = run_application(&cli, &config).await.context("Application failed")?;
    std::process::exit(code)
}
