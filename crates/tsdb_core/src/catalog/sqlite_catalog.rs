//! SQLite-backed table catalog.
//!
//! # Responsibility
//! - Keep an in-memory index of table records for lock-light lookups.
//! - Mirror every accepted registration/alteration into the metadata file.
//!
//! # Invariants
//! - The index is updated only after the SQL write succeeded.
//! - Lock order is `index` then `conn`.
//! - Read paths reject invalid persisted rows instead of masking them.

use super::{CatalogError, CatalogResult, TableCatalog};
use crate::model::config::RepoConfig;
use crate::model::table::{SchemaError, TableConfig, TableId, TableRecord, TableSchema};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

const TABLE_SELECT_SQL: &str = "SELECT
    table_id,
    name,
    tier,
    schema_version,
    schema_json,
    created_at,
    updated_at
FROM tables";

/// Repository identity and configuration loaded from the metadata file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoMeta {
    pub repo_id: Uuid,
    pub config: RepoConfig,
    pub created_at_ms: i64,
}

pub struct SqliteCatalog {
    conn: Mutex<Connection>,
    index: RwLock<BTreeMap<TableId, TableRecord>>,
    capacity: AtomicU32,
}

impl SqliteCatalog {
    /// Initializes an empty catalog on a freshly migrated connection.
    pub fn create(conn: Connection, repo_id: Uuid, config: &RepoConfig) -> CatalogResult<Self> {
        let now = epoch_ms();
        conn.execute(
            "INSERT INTO repo_meta (id, repo_id, config_json, created_at, updated_at)
             VALUES (1, ?1, ?2, ?3, ?3);",
            params![repo_id.to_string(), encode_config(config)?, now],
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            index: RwLock::new(BTreeMap::new()),
            capacity: AtomicU32::new(config.max_tables),
        })
    }

    /// Reloads repository metadata and every table record.
    pub fn open(conn: Connection) -> CatalogResult<(Self, RepoMeta)> {
        let meta = load_meta(&conn)?;

        let mut index = BTreeMap::new();
        {
            let mut stmt = conn.prepare(&format!("{TABLE_SELECT_SQL} ORDER BY table_id ASC;"))?;
            let mut rows = stmt.query([])?;
            while let Some(row) = rows.next()? {
                let record = parse_table_row(row)?;
                if record.tier >= meta.config.tier_count {
                    return Err(CatalogError::InvalidData(format!(
                        "table {} is assigned to tier {} but only {} tiers exist",
                        record.id, record.tier, meta.config.tier_count
                    )));
                }
                index.insert(record.id, record);
            }
        }

        if index.len() > meta.config.max_tables as usize {
            return Err(CatalogError::InvalidData(format!(
                "{} tables registered but max_tables is {}",
                index.len(),
                meta.config.max_tables
            )));
        }

        let catalog = Self {
            conn: Mutex::new(conn),
            index: RwLock::new(index),
            capacity: AtomicU32::new(meta.config.max_tables),
        };
        Ok((catalog, meta))
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_index(&self) -> RwLockReadGuard<'_, BTreeMap<TableId, TableRecord>> {
        self.index.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_index(&self) -> RwLockWriteGuard<'_, BTreeMap<TableId, TableRecord>> {
        self.index.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl TableCatalog for SqliteCatalog {
    fn register(&self, config: &TableConfig, tier: u8) -> CatalogResult<TableRecord> {
        let mut index = self.write_index();

        if index.contains_key(&config.id) {
            return Err(CatalogError::DuplicateId(config.id));
        }
        if index.values().any(|record| record.name == config.name) {
            return Err(CatalogError::DuplicateName(config.name.clone()));
        }
        let limit = self.capacity.load(Ordering::Acquire);
        if index.len() >= limit as usize {
            return Err(CatalogError::CapacityExceeded { limit });
        }

        let now = epoch_ms();
        let record = TableRecord {
            id: config.id,
            name: config.name.clone(),
            tier,
            schema_version: 1,
            schema: config.schema.clone(),
            created_at_ms: now,
            updated_at_ms: now,
        };

        self.conn().execute(
            "INSERT INTO tables (
                table_id,
                name,
                tier,
                schema_version,
                schema_json,
                created_at,
                updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7);",
            params![
                record.id.0,
                record.name.as_str(),
                record.tier,
                record.schema_version,
                encode_schema(&record.schema)?,
                record.created_at_ms,
                record.updated_at_ms,
            ],
        )?;

        index.insert(record.id, record.clone());
        Ok(record)
    }

    fn alter(&self, config: &TableConfig, tier: u8) -> CatalogResult<TableRecord> {
        let mut index = self.write_index();

        let current = index
            .get(&config.id)
            .ok_or(CatalogError::NotFound(config.id))?;
        if current.name != config.name {
            return Err(CatalogError::Incompatible(SchemaError::Renamed {
                from: current.name.clone(),
                to: config.name.clone(),
            }));
        }
        current
            .schema
            .check_evolution(&config.schema)
            .map_err(CatalogError::Incompatible)?;

        let record = TableRecord {
            tier,
            schema_version: current.schema_version + 1,
            schema: config.schema.clone(),
            updated_at_ms: epoch_ms(),
            ..current.clone()
        };

        let changed = self.conn().execute(
            "UPDATE tables
             SET
                tier = ?1,
                schema_version = ?2,
                schema_json = ?3,
                updated_at = ?4
             WHERE table_id = ?5;",
            params![
                record.tier,
                record.schema_version,
                encode_schema(&record.schema)?,
                record.updated_at_ms,
                record.id.0,
            ],
        )?;
        if changed == 0 {
            return Err(CatalogError::InvalidData(format!(
                "table {} is indexed but missing from the metadata file",
                record.id
            )));
        }

        index.insert(record.id, record.clone());
        Ok(record)
    }

    fn lookup(&self, id: TableId) -> Option<TableRecord> {
        self.read_index().get(&id).cloned()
    }

    fn list(&self) -> Vec<TableRecord> {
        self.read_index().values().cloned().collect()
    }

    fn len(&self) -> usize {
        self.read_index().len()
    }

    fn capacity(&self) -> u32 {
        self.capacity.load(Ordering::Acquire)
    }

    fn set_capacity(&self, capacity: u32) -> CatalogResult<()> {
        let index = self.write_index();
        if index.len() > capacity as usize {
            return Err(CatalogError::CapacityExceeded { limit: capacity });
        }
        self.capacity.store(capacity, Ordering::Release);
        Ok(())
    }

    fn store_config(&self, config: &RepoConfig) -> CatalogResult<()> {
        let changed = self.conn().execute(
            "UPDATE repo_meta SET config_json = ?1, updated_at = ?2 WHERE id = 1;",
            params![encode_config(config)?, epoch_ms()],
        )?;
        if changed == 0 {
            return Err(CatalogError::InvalidData(
                "repo_meta row is missing".to_string(),
            ));
        }
        Ok(())
    }

    fn release(self: Box<Self>) -> CatalogResult<()> {
        let catalog = *self;
        let conn = catalog
            .conn
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        conn.close().map_err(|(_, err)| CatalogError::from(err))
    }
}

fn load_meta(conn: &Connection) -> CatalogResult<RepoMeta> {
    let row = conn
        .query_row(
            "SELECT repo_id, config_json, created_at FROM repo_meta WHERE id = 1;",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((repo_id_text, config_json, created_at_ms)) = row else {
        return Err(CatalogError::InvalidData(
            "repo_meta row is missing".to_string(),
        ));
    };

    let repo_id = Uuid::parse_str(&repo_id_text).map_err(|_| {
        CatalogError::InvalidData(format!("invalid repo id `{repo_id_text}` in repo_meta"))
    })?;
    let config: RepoConfig = serde_json::from_str(&config_json).map_err(|err| {
        CatalogError::InvalidData(format!("invalid config_json in repo_meta: {err}"))
    })?;
    config.validate().map_err(|err| {
        CatalogError::InvalidData(format!("persisted configuration rejected: {err}"))
    })?;

    Ok(RepoMeta {
        repo_id,
        config,
        created_at_ms,
    })
}

fn parse_table_row(row: &Row<'_>) -> CatalogResult<TableRecord> {
    let id = TableId(row.get("table_id")?);
    let schema_json: String = row.get("schema_json")?;
    let schema: TableSchema = serde_json::from_str(&schema_json).map_err(|err| {
        CatalogError::InvalidData(format!("invalid schema_json for table {id}: {err}"))
    })?;
    schema.validate().map_err(|err| {
        CatalogError::InvalidData(format!("persisted schema for table {id} rejected: {err}"))
    })?;

    Ok(TableRecord {
        id,
        name: row.get("name")?,
        tier: row.get("tier")?,
        schema_version: row.get("schema_version")?,
        schema,
        created_at_ms: row.get("created_at")?,
        updated_at_ms: row.get("updated_at")?,
    })
}

fn encode_schema(schema: &TableSchema) -> CatalogResult<String> {
    serde_json::to_string(schema)
        .map_err(|err| CatalogError::InvalidData(format!("schema encoding failed: {err}")))
}

fn encode_config(config: &RepoConfig) -> CatalogResult<String> {
    serde_json::to_string(config)
        .map_err(|err| CatalogError::InvalidData(format!("config encoding failed: {err}")))
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as i64)
}

#[cfg(test)]
mod tests {
    use super::SqliteCatalog;
    use crate::catalog::{CatalogError, TableCatalog};
    use crate::db::open_meta_db_in_memory;
    use crate::model::config::{RepoConfig, RepoOptions};
    use crate::model::table::{ColumnDef, ColumnType, TableConfig, TableId, TableSchema};
    use uuid::Uuid;

    fn catalog(max_tables: u32) -> SqliteCatalog {
        let conn = open_meta_db_in_memory().unwrap();
        let config = RepoOptions {
            max_tables: Some(max_tables),
            ..RepoOptions::default()
        }
        .resolve()
        .unwrap();
        SqliteCatalog::create(conn, Uuid::new_v4(), &config).unwrap()
    }

    fn table(id: u32, name: &str) -> TableConfig {
        TableConfig::new(
            TableId(id),
            name,
            TableSchema::new(vec![
                ColumnDef::new("ts", ColumnType::Timestamp),
                ColumnDef::new("value", ColumnType::Float),
            ]),
        )
    }

    #[test]
    fn register_rejects_duplicates_and_keeps_one_record() {
        let catalog = catalog(10);
        catalog.register(&table(1, "cpu"), 0).unwrap();

        let err = catalog.register(&table(1, "mem"), 0).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateId(TableId(1))));
        let err = catalog.register(&table(2, "cpu"), 0).unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateName(_)));

        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.lookup(TableId(1)).unwrap().name, "cpu");
    }

    #[test]
    fn register_respects_capacity() {
        let catalog = catalog(1);
        catalog.register(&table(1, "cpu"), 0).unwrap();
        let err = catalog.register(&table(2, "mem"), 0).unwrap_err();
        assert!(matches!(err, CatalogError::CapacityExceeded { limit: 1 }));
    }

    #[test]
    fn alter_bumps_version_and_rejects_incompatible_change() {
        let catalog = catalog(10);
        catalog.register(&table(1, "cpu"), 0).unwrap();

        let mut widened = table(1, "cpu");
        widened
            .schema
            .columns
            .push(ColumnDef::new("host", ColumnType::Text));
        let record = catalog.alter(&widened, 0).unwrap();
        assert_eq!(record.schema_version, 2);
        assert_eq!(record.schema.len(), 3);

        let mut retyped = table(1, "cpu");
        retyped.schema.columns[1].kind = ColumnType::Bool;
        let err = catalog.alter(&retyped, 0).unwrap_err();
        assert!(matches!(err, CatalogError::Incompatible(_)));
        assert_eq!(catalog.lookup(TableId(1)).unwrap().schema_version, 2);

        let err = catalog.alter(&table(9, "disk"), 0).unwrap_err();
        assert!(matches!(err, CatalogError::NotFound(TableId(9))));
    }

    #[test]
    fn set_capacity_refuses_to_shrink_below_registered_count() {
        let catalog = catalog(10);
        catalog.register(&table(1, "cpu"), 0).unwrap();
        catalog.register(&table(2, "mem"), 0).unwrap();

        assert!(catalog.set_capacity(1).is_err());
        assert_eq!(catalog.capacity(), 10);
        catalog.set_capacity(2).unwrap();
        assert_eq!(catalog.capacity(), 2);
    }

    #[test]
    fn store_config_round_trips_through_open() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(crate::db::META_FILE_NAME);
        let repo_id = Uuid::new_v4();

        let conn = crate::db::create_meta_db(&path).unwrap();
        let catalog = SqliteCatalog::create(conn, repo_id, &RepoConfig::default()).unwrap();
        catalog.register(&table(7, "cpu"), 2).unwrap();
        let next = RepoConfig {
            max_tables: 42,
            ..RepoConfig::default()
        };
        catalog.store_config(&next).unwrap();
        Box::new(catalog).release().unwrap();

        let conn = crate::db::open_meta_db(&path).unwrap();
        let (reopened, meta) = SqliteCatalog::open(conn).unwrap();
        assert_eq!(meta.repo_id, repo_id);
        assert_eq!(meta.config, next);
        assert_eq!(reopened.capacity(), 42);
        let record = reopened.lookup(TableId(7)).unwrap();
        assert_eq!(record.tier, 2);
        assert_eq!(record.name, "cpu");
    }
}
