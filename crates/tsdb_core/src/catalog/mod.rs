//! Metadata catalog contract and SQLite-backed implementation.
//!
//! # Responsibility
//! - Own the authoritative registry of tables within one repository.
//! - Persist the repository configuration alongside the table registry.
//!
//! # Invariants
//! - A table id and a table name are each registered at most once.
//! - The registered count never exceeds the catalog capacity.
//! - Alterations are append-only schema changes.

use crate::db::DbError;
use crate::model::config::RepoConfig;
use crate::model::table::{SchemaError, TableConfig, TableId, TableRecord};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod sqlite_catalog;

pub use sqlite_catalog::SqliteCatalog;

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug)]
pub enum CatalogError {
    Db(DbError),
    DuplicateId(TableId),
    DuplicateName(String),
    CapacityExceeded { limit: u32 },
    NotFound(TableId),
    Incompatible(SchemaError),
    InvalidData(String),
}

impl Display for CatalogError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::DuplicateId(id) => write!(f, "table id already registered: {id}"),
            Self::DuplicateName(name) => write!(f, "table name already registered: {name}"),
            Self::CapacityExceeded { limit } => {
                write!(f, "table limit reached: at most {limit} tables")
            }
            Self::NotFound(id) => write!(f, "table not found: {id}"),
            Self::Incompatible(err) => write!(f, "incompatible table change: {err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted catalog data: {message}"),
        }
    }
}

impl Error for CatalogError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Incompatible(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for CatalogError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for CatalogError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Catalog interface consumed by the repository manager.
///
/// Implementations handle their own internal locking; every method may be
/// called concurrently from data-path threads.
pub trait TableCatalog: Send + Sync {
    /// Registers a new table on `tier`.
    fn register(&self, config: &TableConfig, tier: u8) -> CatalogResult<TableRecord>;
    /// Replaces the schema (and tier) of an existing table.
    fn alter(&self, config: &TableConfig, tier: u8) -> CatalogResult<TableRecord>;
    fn lookup(&self, id: TableId) -> Option<TableRecord>;
    /// Returns all records ordered by id.
    fn list(&self) -> Vec<TableRecord>;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn capacity(&self) -> u32;
    /// Updates capacity; fails when already-registered tables exceed it.
    fn set_capacity(&self, capacity: u32) -> CatalogResult<()>;
    /// Persists a new repository configuration.
    fn store_config(&self, config: &RepoConfig) -> CatalogResult<()>;
    /// Releases the underlying metadata handle.
    fn release(self: Box<Self>) -> CatalogResult<()>;
}
