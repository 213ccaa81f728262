use rusqlite::Connection;
use tsdb_core::db::migrations::latest_version;
use tsdb_core::db::{create_meta_db, open_meta_db, open_meta_db_in_memory, DbError};

#[test]
fn in_memory_metadata_has_every_migration_applied() {
    let conn = open_meta_db_in_memory().unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "repo_meta");
    assert_table_exists(&conn, "tables");
}

#[test]
fn reopening_metadata_file_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta.db");

    let first = create_meta_db(&path).unwrap();
    assert_eq!(schema_version(&first), latest_version());
    drop(first);

    let second = open_meta_db(&path).unwrap();
    assert_eq!(schema_version(&second), latest_version());
    assert_table_exists(&second, "tables");
}

#[test]
fn open_never_creates_a_missing_metadata_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta.db");

    assert!(matches!(open_meta_db(&path), Err(DbError::Sqlite(_))));
    assert!(!path.exists());
}

#[test]
fn newer_schema_version_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("meta.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    match open_meta_db(&path).unwrap_err() {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn repo_meta_holds_a_single_row() {
    let conn = open_meta_db_in_memory().unwrap();
    conn.execute(
        "INSERT INTO repo_meta (id, repo_id, config_json, created_at, updated_at)
         VALUES (1, 'a', '{}', 0, 0);",
        [],
    )
    .unwrap();

    let second = conn.execute(
        "INSERT INTO repo_meta (id, repo_id, config_json, created_at, updated_at)
         VALUES (2, 'b', '{}', 0, 0);",
        [],
    );
    assert!(second.is_err());
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
