//! Connection bootstrap for the repository metadata file.
//!
//! # Invariants
//! - Returned connections have migrations fully applied.
//! - `open_meta_db` fails on a missing file instead of creating an empty one.

use super::migrations::apply_migrations;
use super::DbResult;
use log::{error, info};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::{Duration, Instant};

/// File name of the metadata database inside a repository root.
pub const META_FILE_NAME: &str = "meta.db";

/// Creates a new metadata file (or opens an existing one) and migrates it.
pub fn create_meta_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_CREATE
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    open_with(path.as_ref(), flags, "create")
}

/// Opens an existing metadata file and applies pending migrations.
pub fn open_meta_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    let flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    open_with(path.as_ref(), flags, "existing")
}

/// Opens an in-memory metadata database; used by catalog tests.
pub fn open_meta_db_in_memory() -> DbResult<Connection> {
    let started_at = Instant::now();
    let mut conn = Connection::open_in_memory()?;
    bootstrap_connection(&mut conn)?;
    info!(
        "event=meta_open module=db status=ok mode=memory duration_ms={}",
        started_at.elapsed().as_millis()
    );
    Ok(conn)
}

fn open_with(path: &Path, flags: OpenFlags, mode: &str) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=meta_open module=db status=start mode={mode}");

    let mut conn = match Connection::open_with_flags(path, flags) {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=meta_open module=db status=error mode={mode} duration_ms={} error_code=meta_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn) {
        Ok(()) => {
            info!(
                "event=meta_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=meta_open module=db status=error mode={mode} duration_ms={} error_code=meta_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection) -> DbResult<()> {
    conn.execute_batch("PRAGMA synchronous = FULL;")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    apply_migrations(conn)?;
    Ok(())
}
