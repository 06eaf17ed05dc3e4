//! Runtime configuration
//!
//! Describes the worker contexts a [`Runtime`](crate::runtime::Runtime)
//! starts. Loaded from JSON, or built in code.
//!
//! ```json
//! {
//!   "contexts": [
//!     { "name": "io" },
//!     { "name": "compute", "stack_size": 8388608 }
//!   ]
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the worker started by the default configuration.
pub const DEFAULT_WORKER: &str = "worker";

/// Settings for one worker context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Context name, also used as the thread name.
    pub name: String,

    /// Thread stack size in bytes. The platform default when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_size: Option<usize>,
}

impl ContextConfig {
    /// A context with the given name and the default stack size.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: None,
        }
    }
}

/// The set of worker contexts to start, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Workers, started in this order and stopped in reverse.
    #[serde(default = "default_contexts")]
    pub contexts: Vec<ContextConfig>,
}

fn default_contexts() -> Vec<ContextConfig> {
    vec![ContextConfig::named(DEFAULT_WORKER)]
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            contexts: default_contexts(),
        }
    }
}

impl RuntimeConfig {
    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    /// Reject empty names, duplicate names and zero stack sizes.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for context in &self.contexts {
            if context.name.trim().is_empty() {
                return Err(ConfigError::Invalid("context name is empty".to_string()));
            }
            if context.stack_size == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "context `{}` has a zero stack size",
                    context.name
                )));
            }
            if !seen.insert(context.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "context `{}` is declared twice",
                    context.name
                )));
            }
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
