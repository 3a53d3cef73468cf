use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::adapter::InMemoryOperations;
use crate::clock::{Clock, ManualClock};
use crate::config::Config;
use crate::store::{ExecutionStore, MemoryStore, PgStore};
use crate::types::{RunInput, Signal, SignalKind, WorkflowDefinition};
use crate::worker::{RunStatus, Runner, RunnerError};

#[derive(Parser)]
#[command(name = "tempo")]
#[command(about = "Tempo - durable step interpreter for tenant workflows", long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default search)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Database URL (overrides config file and env vars)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate a workflow definition file (.json or .toml)
    Validate {
        /// Definition file
        definition: PathBuf,
    },

    /// Run a definition against in-memory storage with simulated time
    Simulate {
        /// Definition file
        definition: PathBuf,

        /// JSON file with an array of events to replay
        #[arg(short = 'e', long = "events")]
        events: Option<PathBuf>,

        /// Execution ID to simulate under
        #[arg(long, default_value = "sim-1")]
        execution_id: String,

        #[arg(long, default_value = "")]
        first_name: String,

        #[arg(long, default_value = "")]
        last_name: String,

        #[arg(long, default_value = "")]
        email: String,

        #[arg(long, default_value = "")]
        phone: String,
    },

    /// Run database migrations
    Migrate,

    /// Queue a signal for a running execution
    ///
    /// Only writes to the inbox. The execution is activated by a `Worker`
    /// that the host service embeds against the same database, since the
    /// outbound operations live in the host.
    Signal {
        /// Execution ID
        execution_id: String,

        /// Signal kind: task_completed or approval_submitted
        kind: String,

        /// Signal payload (JSON string)
        #[arg(default_value = "{}")]
        payload: String,
    },
}

/// Simulation input event
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SimEvent {
    Signal { signal: Signal },
    Advance { hours: i64 },
}

/// Run the CLI by parsing process arguments
pub async fn run_cli() -> Result<()> {
    let cli = Cli::parse();
    run_cli_with_args(cli).await
}

/// Run the CLI with provided arguments
pub async fn run_cli_from_args(args: Vec<String>) -> Result<()> {
    let cli = Cli::parse_from(args);
    run_cli_with_args(cli).await
}

async fn run_cli_with_args(cli: Cli) -> Result<()> {
    // Eagerly load configuration so config errors surface before any output
    let config = Config::builder()
        .database_url(cli.database_url)
        .config_path(cli.config)
        .build()?;

    match cli.command {
        Commands::Validate { definition } => {
            let definition = load_definition(&definition)?;
            println!("Definition is valid");
            println!("Steps: {}", definition.steps.len());
            println!("Statuses: {}", definition.statuses.entries().len());
            println!("Fingerprint: {}", definition.fingerprint());
        }

        Commands::Simulate {
            definition,
            events,
            execution_id,
            first_name,
            last_name,
            email,
            phone,
        } => {
            let definition_id = definition
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("definition")
                .to_string();
            let workflow = load_definition(&definition)?;
            let events = match events {
                Some(path) => load_events(&path)?,
                None => Vec::new(),
            };

            let input = RunInput {
                execution_id,
                org_id: "simulated-org".to_string(),
                contact_id: "simulated-contact".to_string(),
                contact_email: email,
                contact_first_name: first_name,
                contact_last_name: last_name,
                contact_phone: phone,
                definition_id: definition_id.clone(),
            };

            let report = simulate(&config, definition_id, workflow, input, events).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Migrate => {
            println!("Running migrations...");
            let pool = crate::db::create_pool(&config).await?;
            crate::db::migrate(&pool).await?;
            println!("Migrations complete!");
        }

        Commands::Signal {
            execution_id,
            kind,
            payload,
        } => {
            let pool = crate::db::create_pool(&config).await?;
            let store = PgStore::new(pool);
            let message = queue_signal(&store, &execution_id, &kind, &payload).await?;
            println!("{}", message);
        }
    }

    Ok(())
}

/// Parse a signal and queue it in the execution's inbox
///
/// Returns a line describing when the signal will be picked up.
pub async fn queue_signal(
    store: &dyn ExecutionStore,
    execution_id: &str,
    kind: &str,
    payload: &str,
) -> Result<String> {
    let Some(signal_kind) = SignalKind::parse(kind) else {
        bail!(
            "Unknown signal kind '{}' (expected task_completed or approval_submitted)",
            kind
        );
    };
    let payload: JsonValue =
        serde_json::from_str(payload).context("Signal payload must be valid JSON")?;
    let signal = Signal::from_payload(signal_kind, payload)
        .with_context(|| format!("Invalid {} payload", signal_kind))?;

    let Some(vm) = store.load_context(execution_id).await? else {
        bail!("Execution {} is not running", execution_id);
    };
    store.push_signal(execution_id, &signal).await?;

    if vm.waiting_on() == Some(signal_kind) {
        Ok(format!(
            "Signal {} queued for {}; the next worker poll will resume it",
            signal_kind, execution_id
        ))
    } else {
        Ok(format!(
            "Signal {} queued for {}; it is held until the execution waits for it",
            signal_kind, execution_id
        ))
    }
}

/// Load and validate a definition, picking the format from the file extension
pub fn load_definition(path: &Path) -> Result<WorkflowDefinition> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    let definition = match path.extension().and_then(|e| e.to_str()) {
        Some("toml") => WorkflowDefinition::from_toml(&source),
        _ => WorkflowDefinition::from_json(&source),
    }
    .with_context(|| format!("Failed to load {}", path.display()))?;

    definition
        .validate()
        .with_context(|| format!("Invalid definition {}", path.display()))?;
    Ok(definition)
}

fn load_events(path: &Path) -> Result<Vec<SimEvent>> {
    let source = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&source).with_context(|| format!("Failed to parse events in {}", path.display()))
}

/// Run a definition end to end in memory
///
/// Events are applied in order; afterwards any pending timer or deadline is
/// fast-forwarded until the run terminates or waits on a signal with no
/// deadline.
pub async fn simulate(
    config: &Config,
    definition_id: String,
    definition: WorkflowDefinition,
    input: RunInput,
    events: Vec<SimEvent>,
) -> Result<JsonValue> {
    let store = Arc::new(MemoryStore::new());
    let ops = Arc::new(InMemoryOperations::new().with_definition(definition_id, definition));
    let clock = Arc::new(ManualClock::default());
    let runner = Runner::new(store.clone(), ops.clone(), clock.clone()).with_config(config);
    let execution_id = input.execution_id.clone();

    let mut outcome = runner.start(input).await;

    for event in events {
        if !matches!(outcome, Ok(RunStatus::Suspended(_))) {
            break;
        }
        match event {
            SimEvent::Signal { signal } => {
                if let Some(status) = runner.signal(&execution_id, signal).await.transpose() {
                    outcome = status;
                }
            }
            SimEvent::Advance { hours } => {
                clock.advance(chrono::Duration::hours(hours));
                if let Some((_, status)) = runner.resume_due(1).await?.into_iter().next() {
                    outcome = status;
                }
            }
        }
    }

    while let Ok(RunStatus::Suspended(awaitable)) = &outcome {
        let Some(wake_at) = awaitable.wake_at() else {
            break;
        };
        if wake_at > clock.now() {
            clock.set(wake_at);
        }
        outcome = runner.activate(&execution_id).await;
    }

    let result = match outcome {
        Ok(RunStatus::Completed(output)) => json!({ "status": "completed", "output": output }),
        Ok(RunStatus::TimedOut(output)) => json!({ "status": "timed_out", "output": output }),
        Ok(RunStatus::Suspended(awaitable)) => {
            json!({ "status": "suspended", "awaiting": awaitable })
        }
        Err(e) => match e.downcast_ref::<RunnerError>() {
            Some(RunnerError::Failed { message, .. }) => {
                json!({ "status": "failed", "error": message })
            }
            _ => return Err(e),
        },
    };

    Ok(json!({
        "calls": ops.calls(),
        "record": ops.record(&execution_id),
        "result": result,
    }))
}
