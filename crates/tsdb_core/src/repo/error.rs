//! Repository-level error taxonomy.
//!
//! # Invariants
//! - Every public repository operation fails with exactly one `ErrorKind`.
//! - Callers branch on `RepoError::kind()`, never on message text.

use super::state::LifecycleState;
use crate::cache::FlushError;
use crate::catalog::CatalogError;
use crate::db::DbError;
use crate::limiter::LimiterRejection;
use crate::model::config::ConfigError;
use crate::model::table::{SchemaError, TableId};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io;

pub type RepoResult<T> = Result<T, RepoError>;

/// Stable error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    State,
    CapacityExceeded,
    NotFound,
    SchemaIncompatible,
    Io,
    AlreadyExists,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid_argument",
            Self::State => "state",
            Self::CapacityExceeded => "capacity_exceeded",
            Self::NotFound => "not_found",
            Self::SchemaIncompatible => "schema_incompatible",
            Self::Io => "io",
            Self::AlreadyExists => "already_exists",
        }
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which bound refused the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapacityLimit {
    Tables { limit: u32 },
    Resources(LimiterRejection),
}

/// Underlying storage failure carried by `RepoError::Io`.
#[derive(Debug)]
pub enum StorageFailure {
    Fs(io::Error),
    Meta(DbError),
    Encoding(serde_json::Error),
    Flush(FlushError),
    Corrupt(String),
}

impl Display for StorageFailure {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fs(err) => write!(f, "file store: {err}"),
            Self::Meta(err) => write!(f, "metadata: {err}"),
            Self::Encoding(err) => write!(f, "encoding: {err}"),
            Self::Flush(err) => write!(f, "{err}"),
            Self::Corrupt(message) => write!(f, "corrupt persisted state: {message}"),
        }
    }
}

#[derive(Debug)]
pub enum RepoError {
    InvalidArgument(String),
    State {
        operation: &'static str,
        state: LifecycleState,
    },
    CapacityExceeded(CapacityLimit),
    NotFound(TableId),
    SchemaIncompatible(SchemaError),
    Io(StorageFailure),
    AlreadyExists(String),
}

impl RepoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::State { .. } => ErrorKind::State,
            Self::CapacityExceeded(_) => ErrorKind::CapacityExceeded,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::SchemaIncompatible(_) => ErrorKind::SchemaIncompatible,
            Self::Io(_) => ErrorKind::Io,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
        }
    }

    pub(crate) fn state(operation: &'static str, state: LifecycleState) -> Self {
        Self::State { operation, state }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument(message) => write!(f, "invalid argument: {message}"),
            Self::State { operation, state } => write!(
                f,
                "`{operation}` requires an active repository; repository is {state}"
            ),
            Self::CapacityExceeded(CapacityLimit::Tables { limit }) => {
                write!(f, "table limit reached: at most {limit} tables")
            }
            Self::CapacityExceeded(CapacityLimit::Resources(rejection)) => write!(f, "{rejection}"),
            Self::NotFound(id) => write!(f, "table not found: {id}"),
            Self::SchemaIncompatible(err) => write!(f, "schema incompatible: {err}"),
            Self::Io(failure) => write!(f, "I/O failure: {failure}"),
            Self::AlreadyExists(message) => write!(f, "already exists: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::CapacityExceeded(CapacityLimit::Resources(rejection)) => Some(rejection),
            Self::SchemaIncompatible(err) => Some(err),
            Self::Io(StorageFailure::Fs(err)) => Some(err),
            Self::Io(StorageFailure::Meta(err)) => Some(err),
            Self::Io(StorageFailure::Encoding(err)) => Some(err),
            Self::Io(StorageFailure::Flush(err)) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for RepoError {
    fn from(value: io::Error) -> Self {
        Self::Io(StorageFailure::Fs(value))
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Io(StorageFailure::Meta(value))
    }
}

impl From<serde_json::Error> for RepoError {
    fn from(value: serde_json::Error) -> Self {
        Self::Io(StorageFailure::Encoding(value))
    }
}

impl From<FlushError> for RepoError {
    fn from(value: FlushError) -> Self {
        Self::Io(StorageFailure::Flush(value))
    }
}

impl From<ConfigError> for RepoError {
    fn from(value: ConfigError) -> Self {
        Self::InvalidArgument(value.to_string())
    }
}

impl From<SchemaError> for RepoError {
    fn from(value: SchemaError) -> Self {
        Self::SchemaIncompatible(value)
    }
}

impl From<LimiterRejection> for RepoError {
    fn from(value: LimiterRejection) -> Self {
        Self::CapacityExceeded(CapacityLimit::Resources(value))
    }
}

impl From<CatalogError> for RepoError {
    fn from(value: CatalogError) -> Self {
        match value {
            CatalogError::Db(err) => Self::Io(StorageFailure::Meta(err)),
            CatalogError::DuplicateId(id) => {
                Self::AlreadyExists(format!("table id already registered: {id}"))
            }
            CatalogError::DuplicateName(name) => {
                Self::AlreadyExists(format!("table name already registered: {name}"))
            }
            CatalogError::CapacityExceeded { limit } => {
                Self::CapacityExceeded(CapacityLimit::Tables { limit })
            }
            CatalogError::NotFound(id) => Self::NotFound(id),
            CatalogError::Incompatible(err) => Self::SchemaIncompatible(err),
            CatalogError::InvalidData(message) => Self::Io(StorageFailure::Corrupt(message)),
        }
    }
}
