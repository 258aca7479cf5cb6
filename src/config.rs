//! Allocation configuration.
//!
//! The configuration is loaded once (TOML file or string), validated, and
//! then split into immutable per-component configs that are handed to the
//! gate and the allocators at construction. Nothing in the engine looks up
//! settings at allocation time.
//!
//! Keys are kebab-case and match the host module settings:
//!
//! ```toml
//! random-result-event = 41
//! random-result-field = "rand_group"
//! study-name-field = "study_id"
//! study-name-event = 41
//! pharma-alias-field = "pharma_alias"
//! pharma-alias-event = 41
//! pharma-alias-pid = 77
//! ```

use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use snafu::ResultExt;
use snafu::Snafu;
use studyalloc_store::EventId;
use studyalloc_store::ProjectId;

use crate::constants::CAS_RETRY_INITIAL_BACKOFF_MS;
use crate::constants::CAS_RETRY_MAX_BACKOFF_MS;
use crate::constants::DEFAULT_POOL_COMPLETE_VALUE;
use crate::constants::DEFAULT_STUDY_ID_PADDING;
use crate::constants::DEFAULT_STUDY_ID_PREFIX;
use crate::constants::DEFAULT_STUDY_ID_SEPARATOR;
use crate::constants::MAX_CAS_RETRIES;
use crate::constants::MAX_PADDING_WIDTH;
use crate::gate::GateConfig;
use crate::pool::PoolConfig;
use crate::sequence::SequenceConfig;

/// Complete configuration of one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct AllocatorConfig {
    /// Event whose saves can trigger allocation.
    pub random_result_event: EventId,
    /// Field that is non-empty once a record is randomized.
    pub random_result_field: String,

    /// Field receiving the formatted study identifier.
    pub study_name_field: String,
    /// Event holding the study identifier field.
    pub study_name_event: EventId,
    /// Identifier prefix placed before the site code.
    #[serde(default = "default_study_id_prefix")]
    pub study_id_prefix: String,
    /// Text between the site code and the number.
    #[serde(default = "default_study_id_separator")]
    pub study_id_separator: String,
    /// Minimum digits of the number; `0` disables padding.
    #[serde(default = "default_study_id_padding")]
    pub study_id_padding: u32,

    /// Field receiving the pool alias code.
    pub pharma_alias_field: String,
    /// Event holding the alias field.
    pub pharma_alias_event: EventId,
    /// Project that stores the alias pool.
    pub pharma_alias_pid: ProjectId,
    #[serde(default = "default_pool_code_field")]
    pub pool_code_field: String,
    #[serde(default = "default_pool_group_field")]
    pub pool_group_field: String,
    #[serde(default = "default_pool_claimed_by_field")]
    pub pool_claimed_by_field: String,
    #[serde(default = "default_pool_status_field")]
    pub pool_status_field: String,
    #[serde(default = "default_pool_complete_value")]
    pub pool_complete_value: String,

    /// Conflict retries per allocation.
    #[serde(default = "default_max_cas_retries")]
    pub max_cas_retries: u32,
    #[serde(default = "default_cas_initial_backoff_ms")]
    pub cas_initial_backoff_ms: u64,
    #[serde(default = "default_cas_max_backoff_ms")]
    pub cas_max_backoff_ms: u64,
}

/// Bounded retry-on-conflict policy shared by both allocators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_CAS_RETRIES,
            initial_backoff_ms: CAS_RETRY_INITIAL_BACKOFF_MS,
            max_backoff_ms: CAS_RETRY_MAX_BACKOFF_MS,
        }
    }
}

impl AllocatorConfig {
    /// Load configuration from a TOML file.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).context(ReadFileSnafu { path })?;
        toml::from_str(&content).context(ParseTomlSnafu { path })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).context(ParseTomlSnafu {
            path: PathBuf::from("<inline>"),
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("random-result-field", &self.random_result_field),
            ("study-name-field", &self.study_name_field),
            ("pharma-alias-field", &self.pharma_alias_field),
            ("pool-code-field", &self.pool_code_field),
            ("pool-group-field", &self.pool_group_field),
            ("pool-claimed-by-field", &self.pool_claimed_by_field),
            ("pool-status-field", &self.pool_status_field),
        ];
        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Validation {
                    message: format!("{key} must not be empty"),
                });
            }
        }

        if self.study_id_padding > MAX_PADDING_WIDTH {
            return Err(ConfigError::Validation {
                message: format!("study-id-padding must be at most {MAX_PADDING_WIDTH}"),
            });
        }

        if self.pool_claimed_by_field == self.pool_code_field || self.pool_claimed_by_field == self.pool_group_field {
            return Err(ConfigError::Validation {
                message: "pool-claimed-by-field must differ from the code and group fields".into(),
            });
        }

        if self.max_cas_retries == 0 {
            return Err(ConfigError::Validation {
                message: "max-cas-retries must be non-zero".into(),
            });
        }

        if self.cas_initial_backoff_ms > self.cas_max_backoff_ms {
            return Err(ConfigError::Validation {
                message: "cas-initial-backoff-ms must not exceed cas-max-backoff-ms".into(),
            });
        }

        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_cas_retries,
            initial_backoff_ms: self.cas_initial_backoff_ms,
            max_backoff_ms: self.cas_max_backoff_ms,
        }
    }

    pub fn gate_config(&self) -> GateConfig {
        GateConfig {
            trigger_event: self.random_result_event,
            trigger_field: self.random_result_field.clone(),
        }
    }

    pub fn sequence_config(&self) -> SequenceConfig {
        SequenceConfig {
            field: self.study_name_field.clone(),
            event: self.study_name_event,
            base_prefix: self.study_id_prefix.clone(),
            separator: self.study_id_separator.clone(),
            padding: self.study_id_padding,
            retry: self.retry_policy(),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            pool_project: self.pharma_alias_pid,
            alias_field: self.pharma_alias_field.clone(),
            alias_event: self.pharma_alias_event,
            code_field: self.pool_code_field.clone(),
            group_field: self.pool_group_field.clone(),
            claimed_by_field: self.pool_claimed_by_field.clone(),
            status_field: self.pool_status_field.clone(),
            complete_value: self.pool_complete_value.clone(),
            retry: self.retry_policy(),
        }
    }
}

fn default_study_id_prefix() -> String {
    DEFAULT_STUDY_ID_PREFIX.into()
}

fn default_study_id_separator() -> String {
    DEFAULT_STUDY_ID_SEPARATOR.into()
}

fn default_study_id_padding() -> u32 {
    DEFAULT_STUDY_ID_PADDING
}

fn default_pool_code_field() -> String {
    "code".into()
}

fn default_pool_group_field() -> String {
    "group".into()
}

fn default_pool_claimed_by_field() -> String {
    "used_by".into()
}

fn default_pool_status_field() -> String {
    "codebook_complete".into()
}

fn default_pool_complete_value() -> String {
    DEFAULT_POOL_COMPLETE_VALUE.into()
}

fn default_max_cas_retries() -> u32 {
    MAX_CAS_RETRIES
}

fn default_cas_initial_backoff_ms() -> u64 {
    CAS_RETRY_INITIAL_BACKOFF_MS
}

fn default_cas_max_backoff_ms() -> u64 {
    CAS_RETRY_MAX_BACKOFF_MS
}

/// Configuration loading and parsing errors.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ConfigError {
    #[snafu(display("failed to read config file {}: {source}", path.display()))]
    ReadFile { path: PathBuf, source: std::io::Error },

    #[snafu(display("failed to parse TOML config {}: {source}", path.display()))]
    ParseToml { path: PathBuf, source: toml::de::Error },

    #[snafu(display("configuration validation failed: {message}"))]
    Validation { message: String },
}
