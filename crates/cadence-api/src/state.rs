//! Application state wiring the engine to its SQLite storage and gateways.
//!
//! AppState holds the concrete instances used by both CLI and REST API. The
//! engine is generic over its repository; AppState pins it to SQLite.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;

use cadence_core::workflow::engine::WorkflowEngine;
use cadence_infra::config::{database_url, load_engine_config, resolve_data_dir};
use cadence_infra::gateway::collaborators_from_config;
use cadence_infra::sqlite::contact::SqliteContactDirectory;
use cadence_infra::sqlite::pool::DatabasePool;
use cadence_infra::sqlite::workflow::SqliteWorkflowRepository;
use cadence_types::config::EngineConfig;

/// The engine pinned to SQLite storage.
pub type ConcreteEngine = WorkflowEngine<SqliteWorkflowRepository>;

/// Bearer token the REST API requires when set.
pub const API_TOKEN_ENV: &str = "CADENCE_API_TOKEN";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ConcreteEngine>,
    pub contacts: SqliteContactDirectory,
    pub data_dir: PathBuf,
    pub db_pool: DatabasePool,
    /// `None` leaves the API open (local use).
    pub api_token: Option<SecretString>,
}

impl AppState {
    /// Resolve the data directory, load `config.toml` and open the database.
    pub async fn init() -> anyhow::Result<Self> {
        let data_dir = resolve_data_dir();
        tokio::fs::create_dir_all(&data_dir)
            .await
            .with_context(|| format!("Failed to create data directory {}", data_dir.display()))?;

        let config = load_engine_config(&data_dir).await;
        let api_token = std::env::var(API_TOKEN_ENV)
            .ok()
            .filter(|t| !t.is_empty())
            .map(SecretString::from);
        Self::open(data_dir.clone(), &database_url(&data_dir), config, api_token).await
    }

    /// Wire the engine over the database at `db_url`.
    pub async fn open(
        data_dir: PathBuf,
        db_url: &str,
        config: EngineConfig,
        api_token: Option<SecretString>,
    ) -> anyhow::Result<Self> {
        let db_pool = DatabasePool::new(db_url)
            .await
            .context("Failed to open database")?;

        let contacts = SqliteContactDirectory::new(db_pool.clone());
        let collaborators = collaborators_from_config(&config, contacts.clone())
            .context("Failed to build collaborator gateways")?;
        let engine = WorkflowEngine::with_system_clock(
            SqliteWorkflowRepository::new(db_pool.clone()),
            collaborators,
            config,
        );

        Ok(Self {
            engine: Arc::new(engine),
            contacts,
            data_dir,
            db_pool,
            api_token,
        })
    }
}
