//! Configuration
//!
//! Sources, lowest precedence first:
//!
//! 1. Built-in defaults
//! 2. TOML file: explicit path, `CONDUCTOR_CONFIG_PATH`, or `conductor.toml`
//! 3. Environment: `CONDUCTOR__SECTION__KEY` (a `.env` file is loaded first)
//! 4. Builder overrides
//!
//! ```toml
//! [store]
//! backend = "postgres"
//!
//! [database]
//! url = "postgresql://conductor@localhost/conductor"
//!
//! [conductor]
//! action = "/ns/conductor"
//! ```

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::conductor::ConductorSettings;
use crate::names;
use crate::session::SessionSettings;

pub const ENV_PREFIX: &str = "CONDUCTOR";
pub const CONFIG_PATH_VAR: &str = "CONDUCTOR_CONFIG_PATH";
pub const DEFAULT_CONFIG_FILE: &str = "conductor.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub database: DatabaseConfig,
    pub session: SessionConfig,
    pub conductor: ConductorConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: Backend,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_lifetime_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 20,
            min_connections: 2,
            acquire_timeout_secs: 10,
            idle_timeout_secs: 600,
            max_lifetime_secs: 1800,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub expiration_secs: u64,
    pub blocking_timeout_secs: u64,
    pub poll_retries: u32,
    pub poll_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        let settings = SessionSettings::default();
        Self {
            expiration_secs: settings.expiration.as_secs(),
            blocking_timeout_secs: 60,
            poll_retries: settings.poll_retries,
            poll_interval_ms: settings.poll_interval.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    /// Name the conductor action is deployed under
    pub action: String,
}

impl Default for ConductorConfig {
    fn default() -> Self {
        Self {
            action: ConductorSettings::default().action,
        }
    }
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load from the default sources
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            expiration: Duration::from_secs(self.session.expiration_secs),
            poll_retries: self.session.poll_retries,
            poll_interval: Duration::from_millis(self.session.poll_interval_ms),
        }
    }

    pub fn conductor_settings(&self) -> ConductorSettings {
        ConductorSettings {
            action: self.conductor.action.clone(),
            blocking_timeout: Duration::from_secs(self.session.blocking_timeout_secs),
        }
    }

    /// Render the effective configuration
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }

    fn validate(&mut self) -> Result<()> {
        self.conductor.action = names::fqn(&self.conductor.action)
            .with_context(|| format!("Invalid conductor action '{}'", self.conductor.action))?;

        if self.store.backend == Backend::Postgres && self.database.url.is_none() {
            return Err(anyhow!(
                "database.url is required for the postgres store (set {}__DATABASE__URL)",
                ENV_PREFIX
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(anyhow!(
                "database.min_connections ({}) exceeds database.max_connections ({})",
                self.database.min_connections,
                self.database.max_connections
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigBuilder {
    database_url: Option<String>,
    config_path: Option<PathBuf>,
    backend: Option<Backend>,
}

impl ConfigBuilder {
    /// Database URL; also selects the postgres store
    pub fn database_url(mut self, url: Option<String>) -> Self {
        self.database_url = url;
        self
    }

    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn build(self) -> Result<Config> {
        let _ = dotenvy::dotenv();

        let mut builder = config::Config::builder().add_source(
            config::Config::try_from(&Config::default())
                .context("Failed to build default configuration")?,
        );

        if let Some((path, required)) = self.file() {
            builder = builder.add_source(
                config::File::from(path.as_path())
                    .format(config::FileFormat::Toml)
                    .required(required),
            );
        }

        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: Config = builder
            .build()
            .context("Failed to load configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        if let Some(url) = self.database_url {
            config.database.url = Some(url);
            config.store.backend = Backend::Postgres;
        }
        if let Some(backend) = self.backend {
            config.store.backend = backend;
        }

        config.validate()?;
        Ok(config)
    }

    /// Config file to read and whether it must exist
    fn file(&self) -> Option<(PathBuf, bool)> {
        if let Some(path) = &self.config_path {
            return Some((path.clone(), true));
        }
        if let Ok(path) = std::env::var(CONFIG_PATH_VAR) {
            return Some((PathBuf::from(path), true));
        }
        let default = Path::new(DEFAULT_CONFIG_FILE);
        default.exists().then(|| (default.to_path_buf(), false))
    }
}
