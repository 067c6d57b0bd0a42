//! Process-wide wiring
//!
//! One `Application` per process: it owns the configuration, the store
//! client and the Session Store, and builds Conductors over them for the
//! invoker and task executor the embedder provides.

use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use crate::conductor::{ActionInvoker, Conductor, TaskExecutor};
use crate::config::{Backend, Config};
use crate::db;
use crate::session::SessionStore;
use crate::store::{KvStore, MemoryStore, PgStore};

pub struct Application {
    pub config: Config,
    pub pool: Option<PgPool>,
    pub store: Arc<dyn KvStore>,
    pub sessions: SessionStore,
}

impl Application {
    /// Connect the configured store backend
    pub async fn new(config: Config) -> Result<Self> {
        let (pool, store): (Option<PgPool>, Arc<dyn KvStore>) = match config.store.backend {
            Backend::Memory => (None, Arc::new(MemoryStore::new())),
            Backend::Postgres => {
                let pool = db::create_pool(&config.database).await?;
                (Some(pool.clone()), Arc::new(PgStore::new(pool)))
            }
        };
        info!(backend = ?config.store.backend, "Store connected");

        Ok(Self::with_store(config, pool, store))
    }

    /// Wire over an existing store (no I/O)
    pub fn with_store(config: Config, pool: Option<PgPool>, store: Arc<dyn KvStore>) -> Self {
        let sessions = SessionStore::new(store.clone(), config.session_settings());
        Self {
            config,
            pool,
            store,
            sessions,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub async fn migrate(&self) -> Result<()> {
        let pool = self
            .pool
            .as_ref()
            .context("Migrations require the postgres store")?;
        db::migrate(pool).await
    }

    pub fn conductor(
        &self,
        invoker: Arc<dyn ActionInvoker>,
        executor: Arc<dyn TaskExecutor>,
    ) -> Conductor {
        Conductor::new(
            self.sessions.clone(),
            invoker,
            executor,
            self.config.conductor_settings(),
        )
    }
}
