//! Engine configuration.
//!
//! Loaded from YAML. Every field has a default, so an empty document is a
//! valid configuration:
//!
//! ```yaml
//! prefix_stack:
//!   elements: [highest_priority_own, highest_priority_inherited]
//!   middle_spacer: " "
//! suffix_stack:
//!   elements: [first]
//! temporary_merge_behaviour: replace_existing_if_duration_longer
//! invalidation: targeted
//! default_flags: [resolve_inheritance, resolve_wildcards, include_global_nodes]
//! event_capacity: 256
//! logging:
//!   level: debug
//!   directory: /var/log/perm-engine
//!   file_prefix: perm-engine
//! ```

use authz::{Flag, QueryMode, QueryOptions};
use contexts::ImmutableContextSet;
use meta_stack::MetaStackDefinition;
use nodes::TemporaryMergeBehaviour;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use crate::error::{EngineError, Result};

/// How far a group mutation reaches into the caches of other holders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationPolicy {
    /// Any group change clears every holder's cache.
    #[default]
    Conservative,
    /// A group change clears only the views that resolved through that group.
    Targeted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive used when `RUST_LOG` is not set.
    pub level: String,
    /// Where daily log files go. Console only when absent.
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            directory: None,
            file_prefix: "perm-engine".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub prefix_stack: MetaStackDefinition,
    pub suffix_stack: MetaStackDefinition,
    pub temporary_merge_behaviour: TemporaryMergeBehaviour,
    pub invalidation: InvalidationPolicy,
    pub default_flags: BTreeSet<Flag>,
    pub event_capacity: usize,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            prefix_stack: MetaStackDefinition::default(),
            suffix_stack: MetaStackDefinition::default(),
            temporary_merge_behaviour: TemporaryMergeBehaviour::default(),
            invalidation: InvalidationPolicy::default(),
            default_flags: Flag::ALL.into_iter().collect(),
            event_capacity: 256,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Environment variable holding the path of a YAML configuration file.
    pub const ENV_VAR: &'static str = "PERM_ENGINE_CONFIG";

    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Reads the file named by [`Self::ENV_VAR`], or returns the defaults
    /// when the variable is unset.
    pub fn from_env() -> Result<Self> {
        match std::env::var_os(Self::ENV_VAR) {
            Some(path) => {
                tracing::info!("Loading engine configuration from {:?}", path);
                Self::from_file(Path::new(&path))
            }
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.event_capacity == 0 {
            return Err(EngineError::Configuration(
                "event_capacity must be greater than zero".to_string(),
            ));
        }
        if self.logging.file_prefix.trim().is_empty() {
            return Err(EngineError::Configuration(
                "logging.file_prefix cannot be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Contextual query options carrying the configured default flags.
    pub fn default_query_options(&self, context: ImmutableContextSet) -> QueryOptions {
        QueryOptions::builder(QueryMode::Contextual)
            .context(context)
            .flags(self.default_flags.iter().copied())
            .build()
    }
}
