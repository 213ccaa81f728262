//! Table registration and ingestion payload model.
//!
//! # Responsibility
//! - Define table identity, schema and per-table configuration.
//! - Validate schemas, schema evolution and payload conformance.
//!
//! # Invariants
//! - The first column of every schema is a `timestamp` column.
//! - Column names are unique within one schema.
//! - Schema evolution is append-only; existing columns never change.
//!
//! # See also
//! - `crate::catalog::TableCatalog` for the registry these types feed

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

static TABLE_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,63}$").expect("valid table name regex"));

const MAX_COLUMNS: usize = 1024;

/// Caller-assigned table identifier, unique within one repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(pub u32);

impl Display for TableId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage kind of one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    Timestamp,
    Bool,
    Int,
    Float,
    Text,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub kind: ColumnType,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, kind: ColumnType) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// Ordered column list describing the rows of one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub columns: Vec<ColumnDef>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Validates structural schema invariants.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let Some(first) = self.columns.first() else {
            return Err(SchemaError::Empty);
        };
        if first.kind != ColumnType::Timestamp {
            return Err(SchemaError::MissingTimestamp);
        }
        if self.columns.len() > MAX_COLUMNS {
            return Err(SchemaError::TooManyColumns(self.columns.len()));
        }

        let mut seen = BTreeSet::new();
        for column in &self.columns {
            if !TABLE_NAME_RE.is_match(&column.name) {
                return Err(SchemaError::InvalidColumnName(column.name.clone()));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(SchemaError::DuplicateColumn(column.name.clone()));
            }
        }
        Ok(())
    }

    /// Checks that `next` only appends columns after the ones in `self`.
    pub fn check_evolution(&self, next: &TableSchema) -> Result<(), SchemaError> {
        if next.columns.len() < self.columns.len() {
            return Err(SchemaError::ColumnsDropped {
                before: self.columns.len(),
                after: next.columns.len(),
            });
        }
        for (position, (current, proposed)) in self.columns.iter().zip(&next.columns).enumerate() {
            if current != proposed {
                return Err(SchemaError::ColumnChanged {
                    position,
                    name: current.name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Checks one payload against this schema.
    pub fn check_batch(&self, batch: &DataBatch) -> Result<(), SchemaError> {
        if batch.rows.is_empty() {
            return Err(SchemaError::EmptyBatch);
        }
        for (row_index, row) in batch.rows.iter().enumerate() {
            if row.values.len() != self.columns.len() {
                return Err(SchemaError::ArityMismatch {
                    row: row_index,
                    expected: self.columns.len(),
                    actual: row.values.len(),
                });
            }
            for (column, value) in self.columns.iter().zip(&row.values) {
                if !value.fits(column.kind) {
                    return Err(SchemaError::TypeMismatch {
                        row: row_index,
                        column: column.name.clone(),
                        expected: column.kind,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Table creation/alteration request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub id: TableId,
    pub name: String,
    pub schema: TableSchema,
    /// Storage tier override; the repository default applies when unset.
    #[serde(default)]
    pub tier: Option<u8>,
}

impl TableConfig {
    pub fn new(id: TableId, name: impl Into<String>, schema: TableSchema) -> Self {
        Self {
            id,
            name: name.into(),
            schema,
            tier: None,
        }
    }

    pub fn with_tier(mut self, tier: u8) -> Self {
        self.tier = Some(tier);
        self
    }

    /// Validates name and schema; tier bounds are checked by the repository.
    pub fn validate(&self) -> Result<(), SchemaError> {
        if !TABLE_NAME_RE.is_match(&self.name) {
            return Err(SchemaError::InvalidTableName(self.name.clone()));
        }
        self.schema.validate()
    }
}

/// Catalog record for one registered table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRecord {
    pub id: TableId,
    pub name: String,
    pub tier: u8,
    /// Starts at 1 and increments on every accepted alteration.
    pub schema_version: u32,
    pub schema: TableSchema,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// One typed cell of an ingested row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", content = "v", rename_all = "snake_case")]
pub enum Value {
    Timestamp(i64),
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    fn fits(&self, kind: ColumnType) -> bool {
        match (self, kind) {
            (Self::Timestamp(ts), ColumnType::Timestamp) => *ts >= 0,
            (Self::Bool(_), ColumnType::Bool) => true,
            (Self::Int(_), ColumnType::Int) => true,
            (Self::Int(_), ColumnType::Float) => true,
            (Self::Float(value), ColumnType::Float) => value.is_finite(),
            (Self::Text(_), ColumnType::Text) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataRow {
    pub values: Vec<Value>,
}

impl DataRow {
    pub fn new(values: Vec<Value>) -> Self {
        Self { values }
    }
}

/// Ingestion payload for one table.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DataBatch {
    pub rows: Vec<DataRow>,
}

impl DataBatch {
    pub fn new(rows: Vec<DataRow>) -> Self {
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Schema and payload validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    Empty,
    MissingTimestamp,
    TooManyColumns(usize),
    InvalidTableName(String),
    InvalidColumnName(String),
    DuplicateColumn(String),
    ColumnsDropped {
        before: usize,
        after: usize,
    },
    ColumnChanged {
        position: usize,
        name: String,
    },
    Renamed {
        from: String,
        to: String,
    },
    TierLocked {
        from: u8,
        to: u8,
    },
    EmptyBatch,
    ArityMismatch {
        row: usize,
        expected: usize,
        actual: usize,
    },
    TypeMismatch {
        row: usize,
        column: String,
        expected: ColumnType,
    },
}

impl Display for SchemaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "schema has no columns"),
            Self::MissingTimestamp => write!(f, "first column must be a timestamp"),
            Self::TooManyColumns(count) => {
                write!(f, "schema has {count} columns; at most {MAX_COLUMNS} allowed")
            }
            Self::InvalidTableName(name) => write!(f, "invalid table name `{name}`"),
            Self::InvalidColumnName(name) => write!(f, "invalid column name `{name}`"),
            Self::DuplicateColumn(name) => write!(f, "duplicate column `{name}`"),
            Self::ColumnsDropped { before, after } => write!(
                f,
                "alteration drops columns ({before} -> {after}); only appending is supported"
            ),
            Self::ColumnChanged { position, name } => {
                write!(f, "alteration changes existing column `{name}` at position {position}")
            }
            Self::Renamed { from, to } => {
                write!(f, "renaming table `{from}` to `{to}` is not supported")
            }
            Self::TierLocked { from, to } => write!(
                f,
                "cannot move table from tier {from} to tier {to} while it holds data"
            ),
            Self::EmptyBatch => write!(f, "payload contains no rows"),
            Self::ArityMismatch {
                row,
                expected,
                actual,
            } => write!(f, "row {row} has {actual} values; schema expects {expected}"),
            Self::TypeMismatch {
                row,
                column,
                expected,
            } => write!(f, "row {row} column `{column}` is not a valid {expected:?} value"),
        }
    }
}

impl Error for SchemaError {}
