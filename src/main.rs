//! commissioner - run and inspect platform tasks.
//!
//! Usage:
//!   commissioner submit <task-type> --params <file>   Submit a task and wait for it
//!   commissioner status <task-uuid>                   Show the state of a task
//!   commissioner list                                 List recent tasks
//!   commissioner audit <task-uuid>                    Show the audit record of a task
//!   commissioner recover                              Finalize tasks interrupted by a restart
//!   commissioner validate-config <file>               Validate a configuration file

use clap::{Parser, Subcommand};
use commissioner::{
    AuditLog, AuditRecorder, Collaborators, Commissioner, CommissionerConfig, EventBus,
    InMemoryAuditLog, InMemoryStorage, LoggingHandler, PermissiveUniverses, StorageConfig,
    TaskParams, TaskState, TaskStateStore, TaskType, TaskUuid, YamlLoader,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

/// commissioner - asynchronous task orchestration for database platform operations
#[derive(Parser)]
#[command(name = "commissioner")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a task and wait for it to finish
    Submit {
        /// Task type, e.g. manipulate-dns-record
        #[arg(value_name = "TASK_TYPE")]
        task_type: TaskType,

        /// JSON file with the task-specific params
        #[arg(short, long, value_name = "FILE")]
        params: PathBuf,

        /// Entity the task acts on
        #[arg(long)]
        target: Option<Uuid>,

        /// Acting user recorded on the audit record
        #[arg(long)]
        creator: Option<String>,

        /// Customer-visible description
        #[arg(long)]
        description: Option<String>,

        /// Seconds to wait for the task (default: 3600)
        #[arg(long, default_value = "3600")]
        wait_secs: u64,
    },

    /// Show the state of a task
    Status {
        #[arg(value_name = "TASK_UUID")]
        task_uuid: TaskUuid,
    },

    /// List recent tasks
    List {
        /// Maximum number of tasks to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
    },

    /// Show the audit record of a task
    Audit {
        #[arg(value_name = "TASK_UUID")]
        task_uuid: TaskUuid,
    },

    /// Finalize tasks left in flight by a previous process
    Recover,

    /// Validate a configuration file without running anything
    ValidateConfig {
        #[arg(value_name = "FILE")]
        path: PathBuf,
    },
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

    if let Commands::ValidateConfig { path } = &cli.command {
        return validate_config(path);
    }

    let config = match &cli.config {
        Some(path) => YamlLoader::load_config(path)?,
        None => CommissionerConfig::default(),
    };
    let (store, audit) = open_backend(&config.storage).await?;

    match cli.command {
        Commands::Submit {
            task_type,
            params,
            target,
            creator,
            description,
            wait_secs,
        } => {
            let mut task_params = TaskParams::new(read_params(&params)?);
            task_params.target_uuid = target;
            task_params.creator = creator;
            task_params.description = description;
            submit(
                &config,
                store,
                audit,
                task_type,
                task_params,
                Duration::from_secs(wait_secs),
            )
            .await?;
        }
        Commands::Status { task_uuid } => {
            let state = store.get_task(&task_uuid).await?;
            print_state(&state)?;
        }
        Commands::List { limit } => {
            list_tasks(store.as_ref(), limit).await?;
        }
        Commands::Audit { task_uuid } => {
            let record = audit.get_record(&task_uuid).await?;
            println!("Task:        {}", record.task_uuid);
            println!("Type:        {}", record.task_type);
            println!("Status:      {}", record.status);
            if let Some(target) = record.target_uuid {
                println!("Target:      {}", target);
            }
            if let Some(creator) = &record.creator {
                println!("Creator:     {}", creator);
            }
            if let Some(description) = &record.description {
                println!("Description: {}", description);
            }
            println!("Created:     {}", record.created_at.to_rfc3339());
            if let Some(completed) = record.completed_at {
                println!("Completed:   {}", completed.to_rfc3339());
            }
            if let Some(err) = &record.error {
                println!("Error:       {}", err);
            }
        }
        Commands::Recover => {
            let commissioner = build_commissioner(&config, store, audit, None).await;
            let recovered = commissioner.recover().await?;
            info!("Recovered {} interrupted task(s)", recovered.len());
            for task_uuid in recovered {
                println!("{}", task_uuid);
            }
        }
        Commands::ValidateConfig { .. } => {}
    }

    Ok(())
}

/// Validate a configuration file.
fn validate_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    info!("Validating configuration: {}", path.display());

    match YamlLoader::load_config(path) {
        Ok(config) => {
            info!("Configuration is valid:");
            info!("  max_concurrent_subtasks: {}", config.max_concurrent_subtasks);
            info!("  retry: {:?}", config.retry.to_policy());
            info!("  storage: {:?}", config.storage);
            match &config.infrastructure {
                Some(infra) => info!("  infrastructure: {}", infra.program),
                None => warn!("  infrastructure: not configured, tasks cannot be submitted"),
            }
            Ok(())
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            Err(e.into())
        }
    }
}

type Backend = (Arc<dyn TaskStateStore>, Arc<dyn AuditLog>);

/// Open the task store and audit log described by the configuration.
async fn open_backend(storage: &StorageConfig) -> Result<Backend, Box<dyn std::error::Error>> {
    match storage {
        StorageConfig::Memory => {
            warn!("Using in-memory storage; task state is lost on exit");
            let store: Arc<dyn TaskStateStore> = Arc::new(InMemoryStorage::new());
            let audit: Arc<dyn AuditLog> = Arc::new(InMemoryAuditLog::new());
            Ok((store, audit))
        }
        #[cfg(feature = "sqlite")]
        StorageConfig::Sqlite { path } => {
            let sqlite = Arc::new(commissioner::SqliteStorage::new(path).await?);
            let store: Arc<dyn TaskStateStore> = sqlite.clone();
            let audit: Arc<dyn AuditLog> = sqlite;
            Ok((store, audit))
        }
        #[cfg(not(feature = "sqlite"))]
        StorageConfig::Sqlite { .. } => {
            Err("sqlite storage requires the `sqlite` feature".into())
        }
    }
}

/// Wire a commissioner with logging and audit handlers.
async fn build_commissioner(
    config: &CommissionerConfig,
    store: Arc<dyn TaskStateStore>,
    audit: Arc<dyn AuditLog>,
    infrastructure: Option<Arc<dyn commissioner::Infrastructure>>,
) -> Commissioner {
    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;
    event_bus.register(Arc::new(AuditRecorder::new(audit))).await;

    let infrastructure = infrastructure
        .unwrap_or_else(|| Arc::new(Unconfigured) as Arc<dyn commissioner::Infrastructure>);
    let collaborators = Collaborators::new(infrastructure, Arc::new(PermissiveUniverses));
    Commissioner::from_config(config, store, collaborators).with_event_bus(event_bus)
}

/// Infrastructure used when no program is configured; refuses every operation.
struct Unconfigured;

#[async_trait::async_trait]
impl commissioner::Infrastructure for Unconfigured {
    async fn invoke(
        &self,
        request: &commissioner::OpRequest,
    ) -> Result<commissioner::OpResponse, commissioner::InfraError> {
        Err(commissioner::InfraError::Rejected(format!(
            "no infrastructure program configured for {}",
            request.op
        )))
    }
}

/// Submit a task, wait for it and print its final state.
async fn submit(
    config: &CommissionerConfig,
    store: Arc<dyn TaskStateStore>,
    audit: Arc<dyn AuditLog>,
    task_type: TaskType,
    params: TaskParams,
    wait: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let infrastructure = config
        .infrastructure
        .as_ref()
        .ok_or("no infrastructure configured; set `infrastructure.program`")?
        .build();
    let commissioner =
        build_commissioner(config, store, audit, Some(Arc::new(infrastructure))).await;

    let recovered = commissioner.recover().await?;
    if !recovered.is_empty() {
        warn!("Finalized {} task(s) interrupted by a previous run", recovered.len());
    }

    let task_uuid = commissioner.submit(task_type, params).await?;
    info!("Submitted {} task {}", task_type, task_uuid);
    info!("Press Ctrl+C to cancel");

    let state = tokio::select! {
        result = commissioner.wait_for_task(&task_uuid, wait) => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Cancelling task {}...", task_uuid);
            commissioner.cancel(&task_uuid).await?;
            commissioner.wait_for_task(&task_uuid, config.shutdown_timeout()).await?
        }
    };
    commissioner.shutdown().await;

    print_state(&state)?;
    if state.error.is_some() {
        return Err(format!("task {} finished with status {}", task_uuid, state.status).into());
    }
    Ok(())
}

async fn list_tasks(
    store: &dyn TaskStateStore,
    limit: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let tasks = store.list_tasks(limit).await?;

    if tasks.is_empty() {
        println!("No tasks found");
        return Ok(());
    }

    for state in &tasks {
        println!(
            "{}  {:<22} {:<8} {:>5.1}%  {}",
            state.task_uuid,
            state.task_type.to_string(),
            state.status.to_string(),
            state.percent_complete,
            state.created_at.to_rfc3339()
        );
    }
    Ok(())
}

fn read_params(path: &Path) -> Result<serde_json::Value, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read params '{}': {}", path.display(), e))?;
    Ok(serde_json::from_str(&content)?)
}

fn print_state(state: &TaskState) -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", serde_json::to_string_pretty(state)?);
    Ok(())
}
