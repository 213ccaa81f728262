//! Repository manager: one shard of the time-series database.
//!
//! # Responsibility
//! - Own the lifecycle (create/open/close/drop/configure) of a repository.
//! - Route table management and ingestion to the catalog, cache and store.
//! - Report failures through a single, kind-classified error type.
//!
//! # Invariants
//! - Lifecycle only moves `Configuring -> Active -> Closed`, plus
//!   `Active -> Configuring -> Active` during reconfiguration.
//! - `Closed` is terminal for a handle.
//!
//! # See also
//! - `crate::repo::repository::Repository`

pub mod error;
mod provision;
pub mod repository;
pub mod state;

pub use error::{CapacityLimit, ErrorKind, RepoError, RepoResult, StorageFailure};
pub use repository::{InsertOutcome, RepoStatus, Repository};
pub use state::LifecycleState;
