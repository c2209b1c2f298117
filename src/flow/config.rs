//! Tunables for buffering, merging and execution contexts

use std::path::Path;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ContextError};
use crate::runtime::channel::ChannelSpec;
use crate::runtime::context::ExecutionContext;

/// Default capacity of `buffer` and of the merge result channel
pub const DEFAULT_BUFFER_CAPACITY: usize = 64;

/// Default number of inner flows `flat_map_merge` collects at once
pub const DEFAULT_MERGE_CONCURRENCY: usize = 16;

/// Environment variable naming a TOML config file
pub const CONFIG_PATH_ENV: &str = "KODEGEN_FLOW_CONFIG";

const ENV_PREFIX: &str = "KODEGEN_FLOW_";

/// Configuration for flow pipelines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowConfig {
    pub buffer_capacity: usize,
    pub merge_concurrency: usize,
    pub merge_buffer: usize,
    pub pool_workers: usize,
    pub pool_name: String,
    pub dedicated_name: String,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            merge_concurrency: DEFAULT_MERGE_CONCURRENCY,
            merge_buffer: DEFAULT_BUFFER_CAPACITY,
            pool_workers: std::thread::available_parallelism().map_or(4, usize::from),
            pool_name: "flow-pool".to_string(),
            dedicated_name: "flow-dedicated".to_string(),
        }
    }
}

impl FlowConfig {
    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: FlowConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        debug!("loading flow config from {}", path.display());
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Defaults, then the file named by `KODEGEN_FLOW_CONFIG`, then
    /// `KODEGEN_FLOW_<FIELD>` overrides.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var_os(CONFIG_PATH_ENV) {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        for (key, slot) in [
            ("BUFFER_CAPACITY", &mut self.buffer_capacity),
            ("MERGE_CONCURRENCY", &mut self.merge_concurrency),
            ("MERGE_BUFFER", &mut self.merge_buffer),
            ("POOL_WORKERS", &mut self.pool_workers),
        ] {
            if let Some(value) = lookup(key) {
                *slot = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: format!("{ENV_PREFIX}{key}"),
                    value,
                })?;
            }
        }
        if let Some(name) = lookup("POOL_NAME") {
            self.pool_name = name;
        }
        if let Some(name) = lookup("DEDICATED_NAME") {
            self.dedicated_name = name;
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.merge_concurrency == 0 {
            return Err(ConfigError::InvalidValue {
                key: "merge_concurrency".to_string(),
                value: "0".to_string(),
            });
        }
        if self.pool_workers == 0 {
            return Err(ConfigError::InvalidValue {
                key: "pool_workers".to_string(),
                value: "0".to_string(),
            });
        }
        Ok(())
    }

    /// Spec for `buffer`: bounded with suspension, or rendezvous for zero.
    #[must_use]
    pub fn buffer_spec(&self) -> ChannelSpec {
        ChannelSpec::bounded(self.buffer_capacity)
    }

    /// Spec for the shared result channel of `flat_map_merge_with`.
    #[must_use]
    pub fn merge_spec(&self) -> ChannelSpec {
        ChannelSpec::bounded(self.merge_buffer)
    }

    pub fn pool_context(&self) -> Result<ExecutionContext, ContextError> {
        ExecutionContext::pool(self.pool_name.as_str(), self.pool_workers)
    }

    pub fn dedicated_context(&self) -> Result<ExecutionContext, ContextError> {
        ExecutionContext::dedicated(self.dedicated_name.as_str())
    }
}
