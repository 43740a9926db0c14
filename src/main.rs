//! hourglass - a time-sliced workflow scheduler.
//!
//! Usage:
//!   hourglass serve <workflows-dir>                 Run the API server and the step loop
//!   hourglass step <workflows-dir> [--time T]       Run a single step and exit
//!   hourglass validate <workflows-dir>              Validate workflow configurations
//!   hourglass list <workflows-dir>                  List all workflows in the directory
//!   hourglass rerun <workflows-dir> <workflow> <T>  Mark a slot for rerun

use clap::{Parser, Subcommand};
use hourglass::api::{create_api_state, start_server};
use hourglass::config::StorageConfig;
use hourglass::{
    Event, EventBus, EventHandler, GlobalConfig, InMemoryStateDatabase, ScheduledTime,
    Scheduler, SlotId, StateDatabase, WorkflowConfiguration, WorkflowId, YamlLoader,
    load_workflows_from_directory,
};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// hourglass - a time-sliced workflow scheduler
#[derive(Parser)]
#[command(name = "hourglass")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the global configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the API server and step periodically
    Serve {
        /// Path to the directory containing workflow YAML files
        #[arg(value_name = "WORKFLOWS_DIR")]
        workflows_dir: PathBuf,

        /// Seconds between automatic steps (overrides the config file)
        #[arg(long)]
        step_interval: Option<u64>,
    },

    /// Run one step and print the report
    Step {
        /// Path to the directory containing workflow YAML files
        #[arg(value_name = "WORKFLOWS_DIR")]
        workflows_dir: PathBuf,

        /// Step time (default: now), e.g. 2013-11-27T15:01Z
        #[arg(long)]
        time: Option<String>,

        /// Only step these workflows (repeatable)
        #[arg(short, long = "workflow", value_name = "WORKFLOW_ID")]
        workflows: Vec<String>,
    },

    /// Validate workflow configurations without running
    Validate {
        /// Path to the directory containing workflow YAML files
        #[arg(value_name = "WORKFLOWS_DIR")]
        workflows_dir: PathBuf,
    },

    /// List all workflows in the directory
    List {
        /// Path to the directory containing workflow YAML files
        #[arg(value_name = "WORKFLOWS_DIR")]
        workflows_dir: PathBuf,
    },

    /// Mark a slot for rerun
    Rerun {
        /// Path to the directory containing workflow YAML files
        #[arg(value_name = "WORKFLOWS_DIR")]
        workflows_dir: PathBuf,

        /// Workflow ID
        #[arg(value_name = "WORKFLOW_ID")]
        workflow: String,

        /// Scheduled time of the slot, e.g. 2013-11-27T15:00Z
        #[arg(value_name = "TIME")]
        time: String,
    },
}

/// Logs slot transitions and workflow failures.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::SlotTransitioned {
                slot_id,
                from,
                to,
                retry_count,
                ..
            } => {
                info!("Slot {} {} -> {} (retries: {})", slot_id, from, to, retry_count);
            }
            Event::WorkflowFailed {
                workflow_id, error, ..
            } => {
                error!("Workflow '{}' failed: {}", workflow_id, error);
            }
            Event::StepCompleted {
                now,
                processed,
                failed,
                duration,
                ..
            } => {
                debug!(
                    "Step at {} processed {} workflow(s), {} failed, in {:?}",
                    now, processed, failed, duration
                );
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let global = load_global_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Serve {
            workflows_dir,
            step_interval,
        } => {
            let mut global = global;
            if step_interval.is_some() {
                global.step_interval_secs = step_interval;
            }
            let configuration = load_workflows(&workflows_dir, &global)?;
            with_storage(&global, |storage| serve(storage, configuration, &global)).await?;
        }
        Commands::Step {
            workflows_dir,
            time,
            workflows,
        } => {
            let configuration = load_workflows(&workflows_dir, &global)?;
            let now = match time {
                Some(raw) => raw.parse()?,
                None => ScheduledTime::now(),
            };
            let filter = (!workflows.is_empty())
                .then(|| workflows.into_iter().map(WorkflowId::from).collect());
            with_storage(&global, |storage| step_once(storage, configuration, &global, now, filter))
                .await?;
        }
        Commands::Validate { workflows_dir } => {
            validate_workflows(&workflows_dir, &global)?;
        }
        Commands::List { workflows_dir } => {
            list_workflows(&workflows_dir, &global)?;
        }
        Commands::Rerun {
            workflows_dir,
            workflow,
            time,
        } => {
            let configuration = load_workflows(&workflows_dir, &global)?;
            let slot_id = SlotId::new(workflow, time.parse()?);
            if global.storage == StorageConfig::Memory {
                warn!("Storage is in-memory; the rerun mark will be lost when this process exits");
            }
            with_storage(&global, |storage| rerun(storage, configuration, &global, slot_id))
                .await?;
        }
    }

    Ok(())
}

fn load_global_config(path: Option<&Path>) -> Result<GlobalConfig, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            Ok(YamlLoader::load_global_config(path)?)
        }
        None => Ok(GlobalConfig::default()),
    }
}

fn load_workflows(
    dir: &Path,
    global: &GlobalConfig,
) -> Result<WorkflowConfiguration, Box<dyn std::error::Error>> {
    info!("Loading workflows from: {}", dir.display());
    let configuration = load_workflows_from_directory(dir, &global.defaults)?;
    if configuration.is_empty() {
        warn!("No workflow files found in {}", dir.display());
    }
    Ok(configuration)
}

/// Open the configured state database and run `f` with it.
async fn with_storage<F, Fut>(global: &GlobalConfig, f: F) -> Result<(), Box<dyn std::error::Error>>
where
    F: FnOnce(StorageBackend) -> Fut,
    Fut: std::future::Future<Output = Result<(), Box<dyn std::error::Error>>>,
{
    let backend = match &global.storage {
        StorageConfig::Memory => StorageBackend::Memory(Arc::new(InMemoryStateDatabase::new())),
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            info!("Opening state database: {}", path);
            StorageBackend::Sqlite(Arc::new(hourglass::SqliteStateDatabase::new(path).await?))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => {
            return Err("sqlite storage requires the 'sqlite' feature".into());
        }
    };
    f(backend).await
}

/// A state database chosen at runtime.
enum StorageBackend {
    Memory(Arc<InMemoryStateDatabase>),
    #[cfg(feature = "sqlite")]
    Sqlite(Arc<hourglass::SqliteStateDatabase>),
}

async fn build_scheduler<S: StateDatabase + 'static>(
    storage: Arc<S>,
    configuration: Arc<WorkflowConfiguration>,
    global: &GlobalConfig,
) -> Result<Scheduler<S>, Box<dyn std::error::Error>> {
    let event_bus = EventBus::new();
    event_bus.register(Arc::new(LoggingHandler)).await;

    let mut scheduler = Scheduler::new(configuration, storage, global.scheduler_config())?
        .with_event_bus(event_bus);
    if let Some(secs) = global.step_interval_secs {
        scheduler = scheduler.with_step_interval(Duration::from_secs(secs));
    }
    Ok(scheduler)
}

async fn serve(
    backend: StorageBackend,
    configuration: WorkflowConfiguration,
    global: &GlobalConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    match backend {
        StorageBackend::Memory(storage) => serve_with(storage, configuration, global).await,
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite(storage) => serve_with(storage, configuration, global).await,
    }
}

/// Run the scheduler loop and the API server until Ctrl+C.
async fn serve_with<S: StateDatabase + 'static>(
    storage: Arc<S>,
    configuration: WorkflowConfiguration,
    global: &GlobalConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let configuration = Arc::new(configuration);
    info!("Loaded {} workflow(s)", configuration.len());

    let scheduler = build_scheduler(Arc::clone(&storage), Arc::clone(&configuration), global).await?;
    match global.step_interval_secs {
        Some(secs) => info!("Stepping every {}s", secs),
        None => info!("No step interval configured; steps run only on request"),
    }

    let (handle, scheduler_task) = scheduler.start();
    let api_state = create_api_state(handle.clone(), storage, configuration);
    let server = start_server(&global.api, api_state).await?;

    info!("Press Ctrl+C to stop");

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            handle.shutdown().await?;
        }
        _ = scheduler_task => {
            info!("Scheduler stopped");
        }
    }

    server.abort();
    info!("Goodbye!");
    Ok(())
}

async fn step_once(
    backend: StorageBackend,
    configuration: WorkflowConfiguration,
    global: &GlobalConfig,
    now: ScheduledTime,
    filter: Option<BTreeSet<WorkflowId>>,
) -> Result<(), Box<dyn std::error::Error>> {
    match backend {
        StorageBackend::Memory(storage) => {
            step_once_with(storage, configuration, global, now, filter).await
        }
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite(storage) => {
            step_once_with(storage, configuration, global, now, filter).await
        }
    }
}

/// Run a single step and print the outcome.
async fn step_once_with<S: StateDatabase + 'static>(
    storage: Arc<S>,
    configuration: WorkflowConfiguration,
    global: &GlobalConfig,
    now: ScheduledTime,
    filter: Option<BTreeSet<WorkflowId>>,
) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = build_scheduler(storage, Arc::new(configuration), global).await?;
    let report = scheduler.step(now, filter.as_ref()).await;

    println!("Step at {}:", now);
    for id in &report.processed {
        println!("  - {}: OK", id);
    }
    for failure in &report.failures {
        println!("  - {}: FAILED ({})", failure.workflow_id, failure.error);
    }

    if report.is_success() {
        Ok(())
    } else {
        Err(format!("{} workflow(s) failed", report.failures.len()).into())
    }
}

async fn rerun(
    backend: StorageBackend,
    configuration: WorkflowConfiguration,
    global: &GlobalConfig,
    slot_id: SlotId,
) -> Result<(), Box<dyn std::error::Error>> {
    match backend {
        StorageBackend::Memory(storage) => {
            rerun_with(storage, configuration, global, slot_id).await
        }
        #[cfg(feature = "sqlite")]
        StorageBackend::Sqlite(storage) => {
            rerun_with(storage, configuration, global, slot_id).await
        }
    }
}

/// Mark one slot for rerun.
async fn rerun_with<S: StateDatabase + 'static>(
    storage: Arc<S>,
    configuration: WorkflowConfiguration,
    global: &GlobalConfig,
    slot_id: SlotId,
) -> Result<(), Box<dyn std::error::Error>> {
    let scheduler = build_scheduler(storage, Arc::new(configuration), global).await?;
    scheduler.mark_for_rerun(&slot_id, ScheduledTime::now()).await?;
    println!("Marked {} for rerun", slot_id);
    Ok(())
}

/// Validate workflow configurations without running.
fn validate_workflows(dir: &Path, global: &GlobalConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating workflows in: {}", dir.display());

    match load_workflows_from_directory(dir, &global.defaults) {
        Ok(configuration) => {
            info!("All {} workflow(s) are valid:", configuration.len());
            for id in configuration.workflow_ids() {
                info!("  - {}: OK", id);
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// List all workflows in the directory.
fn list_workflows(dir: &Path, global: &GlobalConfig) -> Result<(), Box<dyn std::error::Error>> {
    let configuration = load_workflows_from_directory(dir, &global.defaults)?;

    if configuration.is_empty() {
        println!("No workflows found in {}", dir.display());
        return Ok(());
    }

    println!("Workflows in {}:", dir.display());
    println!();

    for workflow in configuration.workflows() {
        println!("ID: {}", workflow.id());
        println!(
            "  Schedule: {} ({})",
            workflow.schedule().expression(),
            workflow.schedule().timezone()
        );
        println!("  Strategy: {:?}", workflow.strategy());
        println!("  Start time: {}", workflow.start_time());
        println!("  Max retries: {}", workflow.max_retry_count());
        println!("  Wait timeout: {}s", workflow.wait_timeout_secs());
        if let Some(url) = &workflow.info().url {
            println!("  URL: {}", url);
        }
        for contact in &workflow.info().contacts {
            match &contact.email {
                Some(email) => println!("  Contact: {} <{}>", contact.name, email),
                None => println!("  Contact: {}", contact.name),
            }
        }
        println!();
    }

    Ok(())
}
