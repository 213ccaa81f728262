#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;
use tsdb_core::{
    ColumnDef, ColumnType, DataBatch, DataRow, MemoryLimiter, RepoOptions, Repository,
    TableConfig, TableId, TableSchema, Value,
};

/// Smallest cache the configuration accepts.
pub const SMALL_CACHE: u64 = 4096;

pub fn unlimited() -> Arc<MemoryLimiter> {
    Arc::new(MemoryLimiter::unlimited())
}

pub fn options_with_cache(cache_bytes: u64) -> RepoOptions {
    RepoOptions {
        cache_bytes: Some(cache_bytes),
        ..RepoOptions::default()
    }
}

pub fn create_repo(root: &Path) -> Repository {
    Repository::create(root, &RepoOptions::default(), unlimited()).unwrap()
}

pub fn cpu_schema() -> TableSchema {
    TableSchema::new(vec![
        ColumnDef::new("ts", ColumnType::Timestamp),
        ColumnDef::new("usage", ColumnType::Float),
    ])
}

pub fn cpu_table(id: u32) -> TableConfig {
    TableConfig::new(TableId(id), format!("cpu_{id}"), cpu_schema())
}

/// `count` rows with consecutive timestamps starting at `start`.
pub fn cpu_batch(start: i64, count: usize) -> DataBatch {
    DataBatch::new(
        (0..count as i64)
            .map(|offset| {
                DataRow::new(vec![
                    Value::Timestamp(start + offset),
                    Value::Float(offset as f64 * 0.5),
                ])
            })
            .collect(),
    )
}

pub fn timestamps(rows: &[DataRow]) -> Vec<i64> {
    rows.iter()
        .map(|row| match row.values.first() {
            Some(Value::Timestamp(ts)) => *ts,
            other => panic!("row does not start with a timestamp: {other:?}"),
        })
        .collect()
}
