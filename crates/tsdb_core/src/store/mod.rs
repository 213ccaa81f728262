//! Tiered on-disk storage for persisted table data.
//!
//! # Responsibility
//! - Provision and reopen the per-tier data directories of a repository.
//! - Append encoded row blocks to per-table data files.
//!
//! # Invariants
//! - A write returns only after the block reached stable storage.
//! - Missing tier directories are reported, never silently recreated.
//!
//! # See also
//! - `crate::cache::WriteCache`, which drains into this store

use crate::model::table::TableId;
use std::io;

pub mod codec;
mod tier_store;

pub use tier_store::{DirTierStore, DATA_DIR_NAME};

/// File-store contract consumed by the repository manager and cache.
pub trait FileStore: Send + Sync {
    fn tier_count(&self) -> u8;
    /// Appends one block to the data file of `table` on `tier`.
    ///
    /// A failed write leaves the data file as it was, so the caller may
    /// retry the same block.
    fn write(&self, tier: u8, table: TableId, bytes: &[u8]) -> io::Result<()>;
    /// Reads the full data file; a missing file reads as empty.
    fn read(&self, tier: u8, table: TableId) -> io::Result<Vec<u8>>;
    fn has_data(&self, tier: u8, table: TableId) -> io::Result<bool>;
    /// Removes every persisted file of the repository.
    fn remove_all(&self) -> io::Result<()>;
}
