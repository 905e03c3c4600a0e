//! Agent configuration
//!
//! Everything the pipeline needs to classify frames and size its queues.
//! Defaults describe a JVM host, which is what the interception adapters
//! currently ship for; a TOML file can override any field.
//!
//! # Example
//! ```
//! use vigil::config::AgentConfig;
//!
//! let config = AgentConfig::from_toml_str("queue_capacity = 512").unwrap();
//! assert_eq!(config.queue_capacity, 512);
//! assert!(config.rci_detection_enabled);
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Declaring-type prefixes that belong to the agent and its adapters
    pub agent_namespaces: Vec<String>,

    /// Declaring-type prefixes of reflection and proxy machinery
    pub reflection_namespaces: Vec<String>,

    /// File suffixes that mark a frame as user-locatable source
    pub source_file_suffixes: Vec<String>,

    /// Flag sinks reached through reflective dispatch
    pub rci_detection_enabled: bool,

    /// Capacity of the security event queue
    pub queue_capacity: usize,

    /// Capacity of the exit event queue
    pub exit_queue_capacity: usize,

    /// Maximum events handed to the transport per sidecar iteration
    pub batch_size: usize,

    /// Sidecar sleep when both queues are empty (milliseconds)
    pub idle_poll_ms: u64,

    /// Upper bound on draining during shutdown (milliseconds)
    pub shutdown_timeout_ms: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_namespaces: vec!["com.newrelic.".to_string(), "com.nr.".to_string()],
            reflection_namespaces: vec!["sun.reflect.".to_string(), "com.sun.".to_string()],
            source_file_suffixes: vec![".java".to_string()],
            rci_detection_enabled: true,
            queue_capacity: 8192,
            exit_queue_capacity: 1024,
            batch_size: 100,
            idle_poll_ms: 10,
            shutdown_timeout_ms: 2000,
        }
    }
}

impl AgentConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "queue_capacity",
                reason: "must be > 0".to_string(),
            });
        }
        if self.exit_queue_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "exit_queue_capacity",
                reason: "must be > 0".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                field: "batch_size",
                reason: "must be > 0".to_string(),
            });
        }
        if self.agent_namespaces.iter().any(|ns| ns.is_empty()) {
            return Err(ConfigError::Invalid {
                field: "agent_namespaces",
                reason: "empty prefix would match every frame".to_string(),
            });
        }
        Ok(())
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
