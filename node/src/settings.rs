//! # Node Settings
//!
//! Layered configuration: built-in defaults, then an optional TOML file,
//! then `AUTOPOOL__`-prefixed environment variables with `__` as the
//! section separator:
//!
//! ```text
//! AUTOPOOL__LOG__FORMAT=json
//! AUTOPOOL__STRATEGY__MAX_SLIPPAGE_BPS=50
//! ```

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use autopool_contracts::StrategyConfig;

use crate::logging::LogFormat;

/// Environment prefix for overrides.
pub const ENV_PREFIX: &str = "AUTOPOOL";

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSettings {
    /// Default filter directives when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: "autopool_node=info,autopool_protocol=info,autopool_contracts=info".into(),
            format: LogFormat::Pretty,
        }
    }
}

/// Metrics section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsSettings {
    /// Prefix applied to every metric name.
    pub namespace: String,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            namespace: "autopool".into(),
        }
    }
}

/// Everything the operator binary can be configured with.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSettings {
    pub log: LogSettings,
    pub metrics: MetricsSettings,
    /// Strategy tunables used when creating a new vault.
    pub strategy: StrategyConfig,
}

impl NodeSettings {
    /// Loads defaults, the file at `path` (if given and present) and the
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        Self::build(builder)
    }

    /// Same as [`load`](Self::load) with TOML text in place of a file.
    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let builder = config::Config::builder()
            .add_source(config::File::from_str(toml, config::FileFormat::Toml));
        Self::build(builder)
    }

    fn build(builder: config::ConfigBuilder<config::builder::DefaultState>) -> Result<Self> {
        let settings: NodeSettings = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("failed to build configuration")?
            .try_deserialize()
            .context("failed to deserialize configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    /// Rejects settings the binary cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.metrics.namespace.is_empty()
            || !self
                .metrics
                .namespace
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            bail!(
                "metrics.namespace must be non-empty [A-Za-z0-9_], got {:?}",
                self.metrics.namespace
            );
        }
        self.strategy
            .validate()
            .context("invalid strategy settings")?;
        Ok(())
    }
}
