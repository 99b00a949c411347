//! Application state wiring the orchestrator together.
//!
//! AppState holds the concrete machine used by both the CLI and the REST API.
//! The machine is generic over its store, queue and timer; AppState pins them
//! to the SQLite implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use serde::Serialize;
use stepwise_core::event::EventBus;
use stepwise_core::workflow::{WorkflowMachine, WorkflowRegistry};
use stepwise_infra::config::{load_config, resolve_data_dir};
use stepwise_infra::dispatch::{Dispatcher, DurableMachine};
use stepwise_infra::sqlite::pool::database_url;
use stepwise_infra::sqlite::{DatabasePool, SqliteCallbackStore, SqliteWorkflowRepository};
use stepwise_types::config::OrchestratorConfig;

use crate::builtin;

pub type AppMachine = DurableMachine<SqliteWorkflowRepository>;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub machine: Arc<AppMachine>,
    pub callbacks: SqliteCallbackStore,
    pub config: Arc<OrchestratorConfig>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Resolve the data directory, load `stepwise.toml` and open the database.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir()?;
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("cannot create data directory {}", data_dir.display()))?;

        let config = load_config(&data_dir).await?;
        let db_pool = DatabasePool::new(&database_url(&data_dir))
            .await
            .context("failed to open the workflow database")?;

        Self::build(db_pool, config, &data_dir)
    }

    /// Wire the registries and machine on top of an open pool.
    pub fn build(db_pool: DatabasePool, config: OrchestratorConfig, data_dir: &Path) -> anyhow::Result<Self> {
        let actions = Arc::new(builtin::registry());
        let definitions = builtin::definitions()
            .into_iter()
            .chain(config.workflows.iter().cloned());
        let workflows =
            WorkflowRegistry::build(definitions, &actions).context("invalid workflow definition")?;

        let callbacks = SqliteCallbackStore::new(db_pool.clone());
        let machine = WorkflowMachine::new(
            SqliteWorkflowRepository::new(db_pool),
            callbacks.clone(),
            callbacks.clone(),
            workflows,
            actions,
            &config,
            EventBus::new(config.events.capacity),
        );

        Ok(Self {
            machine: Arc::new(machine),
            callbacks,
            config: Arc::new(config),
            data_dir: data_dir.to_path_buf(),
        })
    }

    pub fn dispatcher(&self) -> Dispatcher<SqliteWorkflowRepository> {
        Dispatcher::new(
            Arc::clone(&self.machine),
            self.callbacks.clone(),
            self.config.dispatch.clone(),
        )
    }

    pub fn workflow_types(&self) -> Vec<WorkflowTypeSummary> {
        self.machine
            .registry()
            .definitions()
            .into_iter()
            .map(|def| WorkflowTypeSummary {
                workflow_type: def.workflow_type.clone(),
                name: def.name.clone(),
                actions: def.action_specs().into_iter().map(|spec| spec.key).collect(),
            })
            .collect()
    }
}

/// A registered workflow type as shown to operators.
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowTypeSummary {
    #[serde(rename = "type")]
    pub workflow_type: String,
    pub name: String,
    pub actions: Vec<String>,
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    /// State over a fresh database in a leaked temp directory.
    pub async fn state_with(config: OrchestratorConfig) -> AppState {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().to_path_buf();
        std::mem::forget(dir);
        let pool = DatabasePool::new(&database_url(&path)).await.unwrap();
        AppState::build(pool, config, &path).unwrap()
    }

    pub async fn state() -> AppState {
        state_with(OrchestratorConfig::default()).await
    }
}
