//! Directory-per-tier file store.

use super::FileStore;
use crate::db::META_FILE_NAME;
use crate::model::table::TableId;
use log::{error, info};
use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

pub const DATA_DIR_NAME: &str = "data";

#[derive(Debug)]
pub struct DirTierStore {
    root: PathBuf,
    tier_count: u8,
}

impl DirTierStore {
    /// Creates `data/` and one directory per tier under `root`.
    ///
    /// Fails if `data/` already exists; removes what it created on failure.
    pub fn provision(root: &Path, tier_count: u8) -> io::Result<Self> {
        let data_dir = root.join(DATA_DIR_NAME);
        fs::create_dir(&data_dir)?;

        let store = Self {
            root: root.to_path_buf(),
            tier_count,
        };
        let result = (0..tier_count).try_for_each(|tier| fs::create_dir(store.tier_dir(tier)));
        if let Err(err) = result {
            if let Err(cleanup_err) = fs::remove_dir_all(&data_dir) {
                error!(
                    "event=store_provision module=store status=error error_code=cleanup_failed error={}",
                    cleanup_err
                );
            }
            return Err(err);
        }
        Ok(store)
    }

    /// Reopens an existing layout, checking that every tier directory exists.
    pub fn open(root: &Path, tier_count: u8) -> io::Result<Self> {
        let store = Self {
            root: root.to_path_buf(),
            tier_count,
        };
        for tier in 0..tier_count {
            let dir = store.tier_dir(tier);
            if !dir.is_dir() {
                return Err(io::Error::new(
                    ErrorKind::NotFound,
                    format!("tier directory `{}` is missing", dir.display()),
                ));
            }
        }
        Ok(store)
    }

    pub fn tier_dir(&self, tier: u8) -> PathBuf {
        self.root.join(DATA_DIR_NAME).join(format!("t{tier}"))
    }

    fn table_file(&self, tier: u8, table: TableId) -> io::Result<PathBuf> {
        if tier >= self.tier_count {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("tier {tier} out of range; {} tiers provisioned", self.tier_count),
            ));
        }
        Ok(self.tier_dir(tier).join(format!("table_{}.dat", table.0)))
    }
}

impl FileStore for DirTierStore {
    fn tier_count(&self) -> u8 {
        self.tier_count
    }

    fn write(&self, tier: u8, table: TableId, bytes: &[u8]) -> io::Result<()> {
        let path = self.table_file(tier, table)?;
        let mut file = OpenOptions::new().create(true).append(true).open(path)?;
        append_synced(&mut file, bytes, File::sync_data)
    }

    fn read(&self, tier: u8, table: TableId) -> io::Result<Vec<u8>> {
        match fs::read(self.table_file(tier, table)?) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    fn has_data(&self, tier: u8, table: TableId) -> io::Result<bool> {
        match fs::metadata(self.table_file(tier, table)?) {
            Ok(metadata) => Ok(metadata.len() > 0),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err),
        }
    }

    fn remove_all(&self) -> io::Result<()> {
        remove_if_present(&self.root.join(DATA_DIR_NAME), true)?;
        remove_if_present(&self.root.join(META_FILE_NAME), false)?;
        remove_if_present(&self.root.join(format!("{META_FILE_NAME}-journal")), false)?;
        info!(
            "event=store_remove module=store status=ok root={}",
            self.root.display()
        );
        Ok(())
    }
}

/// Appends `bytes` and syncs; on failure the file is cut back to its prior
/// length so a retried block is never stored twice or torn.
fn append_synced(
    file: &mut File,
    bytes: &[u8],
    sync: impl FnOnce(&File) -> io::Result<()>,
) -> io::Result<()> {
    let start = file.metadata()?.len();
    let result = file.write_all(bytes).and_then(|()| sync(file));
    if let Err(err) = result {
        if let Err(rollback_err) = file.set_len(start).and_then(|()| file.sync_data()) {
            error!(
                "event=store_write module=store status=error error_code=rollback_failed error={}",
                rollback_err
            );
        }
        return Err(err);
    }
    Ok(())
}

fn remove_if_present(path: &Path, is_dir: bool) -> io::Result<()> {
    let result = if is_dir {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        other => other,
    }
}
