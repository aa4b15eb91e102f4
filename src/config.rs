//! Configuration
//!
//! Settings are layered, later layers winning:
//!
//! 1. compiled defaults
//! 2. a TOML file: the explicit path, else `CONDUCTOR_CONFIG_PATH`, else
//!    `./conductor.toml` if present
//! 3. `CONDUCTOR__*` environment variables, `__` separating sections
//!    (`CONDUCTOR__LOGGING__LEVEL=debug`)
//! 4. overrides set on the [`ConfigBuilder`]
//!
//! A `.env` file in the working directory is loaded before the environment
//! is read.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::types::ErrorPolicy;

const CONFIG_PATH_ENV: &str = "CONDUCTOR_CONFIG_PATH";
const DEFAULT_CONFIG_FILE: &str = "conductor";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub conductor: ConductorSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConductorSettings {
    #[serde(default)]
    pub error_policy: ErrorPolicy,
    /// Commands a conductor handle can queue before senders wait
    #[serde(default = "default_command_buffer")]
    pub command_buffer: usize,
}

impl Default for ConductorSettings {
    fn default() -> Self {
        Self {
            error_policy: ErrorPolicy::default(),
            command_buffer: default_command_buffer(),
        }
    }
}

fn default_command_buffer() -> usize {
    64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive; `RUST_LOG` takes precedence when set
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Load with no overrides
    pub fn load() -> Result<Self> {
        Self::builder().build()
    }

    /// The effective configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration as TOML")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    config_path: Option<PathBuf>,
    error_policy: Option<ErrorPolicy>,
    log_level: Option<String>,
    skip_env: bool,
}

impl ConfigBuilder {
    /// Read this file instead of searching for one; it must exist
    pub fn config_path(mut self, path: Option<PathBuf>) -> Self {
        self.config_path = path;
        self
    }

    pub fn error_policy(mut self, policy: Option<ErrorPolicy>) -> Self {
        self.error_policy = policy;
        self
    }

    pub fn log_level(mut self, level: Option<String>) -> Self {
        self.log_level = level;
        self
    }

    /// Ignore `.env`, `CONDUCTOR_CONFIG_PATH` and `CONDUCTOR__*` variables
    pub fn skip_env(mut self, skip: bool) -> Self {
        self.skip_env = skip;
        self
    }

    pub fn build(self) -> Result<Config> {
        if !self.skip_env {
            dotenvy::dotenv().ok();
        }

        let defaults = Config::default();
        let mut builder = ::config::Config::builder()
            .set_default("conductor.error_policy", "abort")?
            .set_default("conductor.command_buffer", defaults.conductor.command_buffer as u64)?
            .set_default("logging.level", defaults.logging.level)?
            .set_default("logging.json", defaults.logging.json)?;

        let explicit_path = match self.config_path {
            Some(path) => Some(path),
            None if !self.skip_env => env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from),
            None => None,
        };

        builder = match &explicit_path {
            Some(path) => builder.add_source(::config::File::from(path.as_path()).required(true)),
            None => builder.add_source(::config::File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };

        if !self.skip_env {
            builder = builder.add_source(
                ::config::Environment::with_prefix("CONDUCTOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            );
        }

        let mut config: Config = builder
            .build()
            .and_then(|settings| settings.try_deserialize())
            .with_context(|| match &explicit_path {
                Some(path) => format!("Failed to load configuration from {}", path.display()),
                None => "Failed to load configuration".to_string(),
            })?;

        if let Some(policy) = self.error_policy {
            config.conductor.error_policy = policy;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }

        Ok(config)
    }
}
