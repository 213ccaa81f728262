//! Repository configuration: caller options and the resolved snapshot.
//!
//! # Responsibility
//! - Parse optional tuning options supplied by the host process.
//! - Apply defaults and reject values that cannot be justified.
//!
//! # Invariants
//! - A `RepoConfig` is only constructed through validation.
//! - `precision` and `tier_count` are fixed once a repository exists.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_MAX_TABLES: u32 = 1000;
pub const DEFAULT_CACHE_BYTES: u64 = 16 * 1024 * 1024;
pub const DEFAULT_TIER_COUNT: u8 = 3;
pub const DEFAULT_DAYS_PER_FILE: u32 = 10;
pub const DEFAULT_KEEP_DAYS: u32 = 3650;

const MAX_TABLES_LIMIT: u32 = 1_000_000;
const MIN_CACHE_BYTES: u64 = 4 * 1024;
const MAX_CACHE_BYTES: u64 = 4 * 1024 * 1024 * 1024;
const MAX_TIER_COUNT: u8 = 8;
const MAX_DAYS_PER_FILE: u32 = 60;

/// Timestamp resolution of ingested rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    #[default]
    Milli,
    Micro,
    Nano,
}

/// Caller-supplied options; unset fields take defaults (or the current value
/// when reconfiguring).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RepoOptions {
    pub precision: Option<Precision>,
    pub max_tables: Option<u32>,
    pub cache_bytes: Option<u64>,
    pub tier_count: Option<u8>,
    pub default_tier: Option<u8>,
    pub days_per_file: Option<u32>,
    pub keep_days: Option<u32>,
}

impl RepoOptions {
    /// Parses options from a JSON document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(|err| ConfigError::Malformed(err.to_string()))
    }

    /// Resolves options against built-in defaults.
    pub fn resolve(&self) -> Result<RepoConfig, ConfigError> {
        let config = RepoConfig {
            precision: self.precision.unwrap_or_default(),
            max_tables: self.max_tables.unwrap_or(DEFAULT_MAX_TABLES),
            cache_bytes: self.cache_bytes.unwrap_or(DEFAULT_CACHE_BYTES),
            tier_count: self.tier_count.unwrap_or(DEFAULT_TIER_COUNT),
            default_tier: self.default_tier.unwrap_or(0),
            days_per_file: self.days_per_file.unwrap_or(DEFAULT_DAYS_PER_FILE),
            keep_days: self.keep_days.unwrap_or(DEFAULT_KEEP_DAYS),
        };
        config.validate()?;
        Ok(config)
    }

    /// Resolves options against an existing configuration.
    ///
    /// Fixed fields may be restated with their current value but not changed.
    pub fn resolve_against(&self, current: &RepoConfig) -> Result<RepoConfig, ConfigError> {
        if let Some(precision) = self.precision {
            if precision != current.precision {
                return Err(ConfigError::Immutable("precision"));
            }
        }
        if let Some(tier_count) = self.tier_count {
            if tier_count != current.tier_count {
                return Err(ConfigError::Immutable("tier_count"));
            }
        }

        let config = RepoConfig {
            precision: current.precision,
            max_tables: self.max_tables.unwrap_or(current.max_tables),
            cache_bytes: self.cache_bytes.unwrap_or(current.cache_bytes),
            tier_count: current.tier_count,
            default_tier: self.default_tier.unwrap_or(current.default_tier),
            days_per_file: self.days_per_file.unwrap_or(current.days_per_file),
            keep_days: self.keep_days.unwrap_or(current.keep_days),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Validated, immutable repository configuration.
///
/// `precision`, `days_per_file` and `keep_days` are held and persisted for
/// the query and retention components layered on a repository; the
/// repository core itself only validates them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoConfig {
    /// Resolution of ingested timestamps. Rows are stored as given.
    pub precision: Precision,
    pub max_tables: u32,
    pub cache_bytes: u64,
    pub tier_count: u8,
    pub default_tier: u8,
    /// Time span covered by one data file once files are partitioned by time.
    pub days_per_file: u32,
    /// Retention window; never shorter than `days_per_file`.
    pub keep_days: u32,
}

impl RepoConfig {
    /// Checks every field against its accepted range.
    ///
    /// Also used on configurations reloaded from disk, so a tampered metadata
    /// file is rejected instead of trusted.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_tables == 0 || self.max_tables > MAX_TABLES_LIMIT {
            return Err(ConfigError::OutOfRange {
                field: "max_tables",
                value: u64::from(self.max_tables),
                min: 1,
                max: u64::from(MAX_TABLES_LIMIT),
            });
        }
        if !(MIN_CACHE_BYTES..=MAX_CACHE_BYTES).contains(&self.cache_bytes) {
            return Err(ConfigError::OutOfRange {
                field: "cache_bytes",
                value: self.cache_bytes,
                min: MIN_CACHE_BYTES,
                max: MAX_CACHE_BYTES,
            });
        }
        if self.tier_count == 0 || self.tier_count > MAX_TIER_COUNT {
            return Err(ConfigError::OutOfRange {
                field: "tier_count",
                value: u64::from(self.tier_count),
                min: 1,
                max: u64::from(MAX_TIER_COUNT),
            });
        }
        if self.default_tier >= self.tier_count {
            return Err(ConfigError::OutOfRange {
                field: "default_tier",
                value: u64::from(self.default_tier),
                min: 0,
                max: u64::from(self.tier_count - 1),
            });
        }
        if self.days_per_file == 0 || self.days_per_file > MAX_DAYS_PER_FILE {
            return Err(ConfigError::OutOfRange {
                field: "days_per_file",
                value: u64::from(self.days_per_file),
                min: 1,
                max: u64::from(MAX_DAYS_PER_FILE),
            });
        }
        if self.keep_days < self.days_per_file {
            return Err(ConfigError::OutOfRange {
                field: "keep_days",
                value: u64::from(self.keep_days),
                min: u64::from(self.days_per_file),
                max: u64::from(u32::MAX),
            });
        }
        Ok(())
    }
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            precision: Precision::Milli,
            max_tables: DEFAULT_MAX_TABLES,
            cache_bytes: DEFAULT_CACHE_BYTES,
            tier_count: DEFAULT_TIER_COUNT,
            default_tier: 0,
            days_per_file: DEFAULT_DAYS_PER_FILE,
            keep_days: DEFAULT_KEEP_DAYS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    Malformed(String),
    OutOfRange {
        field: &'static str,
        value: u64,
        min: u64,
        max: u64,
    },
    Immutable(&'static str),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed(message) => write!(f, "malformed repository options: {message}"),
            Self::OutOfRange {
                field,
                value,
                min,
                max,
            } => write!(f, "{field}={value} is outside [{min}, {max}]"),
            Self::Immutable(field) => {
                write!(f, "{field} is fixed at creation and cannot be changed")
            }
        }
    }
}

impl Error for ConfigError {}
