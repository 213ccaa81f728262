//! Repository core of a tiered time-series database.
//! A repository owns its metadata catalog, write cache and tiered data files.

pub mod cache;
pub mod catalog;
pub mod db;
pub mod limiter;
pub mod logging;
pub mod model;
pub mod repo;
pub mod store;

pub use limiter::{LimiterRejection, LimiterUsage, MemoryLimiter, ResourceLimiter};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::config::{ConfigError, Precision, RepoConfig, RepoOptions};
pub use model::table::{
    ColumnDef, ColumnType, DataBatch, DataRow, SchemaError, TableConfig, TableId, TableRecord,
    TableSchema, Value,
};
pub use repo::{
    CapacityLimit, ErrorKind, InsertOutcome, LifecycleState, RepoError, RepoResult, RepoStatus,
    Repository, StorageFailure,
};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
