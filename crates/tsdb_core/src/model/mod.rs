//! Domain model for repositories, tables and ingestion payloads.
//!
//! # Responsibility
//! - Define the configuration, table and payload shapes shared by every layer.
//! - Keep validation rules next to the data they guard.
//!
//! # Invariants
//! - Every table is identified by a caller-assigned `TableId`.
//! - Configuration values are validated before any component sees them.

pub mod config;
pub mod table;
