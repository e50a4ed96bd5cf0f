pub mod db;
pub mod errors;
pub mod governance;
pub mod identity;
pub mod lifecycle;
pub mod models;
pub mod settings;
pub mod store;
pub mod validation;

pub use crate::db::Database;
pub use crate::errors::{AppError, AppResult, ValidationIssue};
pub use crate::governance::GovernanceCore;
pub use crate::lifecycle::LifecycleEngine;
pub use crate::models::{
    Actor, ActorRole, ContractChanges, ContractDefinition, ContractEvent, ContractEventKind, ContractFilter,
    ContractStatus, ContractVersion, LifecycleEvent, MetricCategory, MetricContract, MetricDraft, MetricType,
    StatusSummary,
};
pub use crate::settings::{GovernanceSettings, StorageKind};
pub use crate::store::{ContractBackend, ContractStore, MemoryBackend};

use tracing_appender::non_blocking::WorkerGuard;

static LOG_GUARD: std::sync::OnceLock<WorkerGuard> = std::sync::OnceLock::new();

/// Installs the global JSON subscriber. `RUST_LOG` wins over the configured
/// level. Calling it twice reports an error from the second call.
pub fn init_tracing(settings: &GovernanceSettings) -> AppResult<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(settings.log_level.as_str()));

    if !settings.log_to_file {
        return tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
            .map_err(|error| AppError::Internal(error.to_string()));
    }

    let log_dir = settings.log_dir();
    std::fs::create_dir_all(&log_dir).map_err(|error| AppError::Io(error.to_string()))?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "governance.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
    let _ = LOG_GUARD.set(guard);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .json()
        .with_writer(non_blocking)
        .try_init()
        .map_err(|error| AppError::Internal(error.to_string()))
}

/// Loads settings, installs logging and opens the configured store.
pub fn bootstrap(settings_path: Option<&std::path::Path>) -> AppResult<GovernanceCore> {
    let settings = match settings_path {
        Some(path) => GovernanceSettings::load(path)?,
        None => GovernanceSettings::default(),
    };
    std::fs::create_dir_all(&settings.data_dir).map_err(|error| AppError::Io(error.to_string()))?;
    init_tracing(&settings)?;
    GovernanceCore::from_settings(&settings)
}
