//! Bounded in-memory write cache.
//!
//! # Responsibility
//! - Buffer encoded rows per table until they are flushed to the file store.
//! - Enforce a byte bound over everything buffered.
//!
//! # Invariants
//! - Rows of one table are flushed in the order they were appended.
//! - Flushes are serialized; a failed flush puts unwritten rows back ahead of
//!   rows appended meanwhile.
//! - Appends never push buffered plus in-flight bytes past the bound; only
//!   shrinking the bound can leave the cache above it.

use crate::model::table::TableId;
use crate::store::FileStore;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::io::{self, ErrorKind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
struct CacheEntry {
    buf: Vec<u8>,
    rows: u64,
}

impl CacheEntry {
    fn bytes(&self) -> u64 {
        self.buf.len() as u64
    }

    /// Appends `newer` after `self`.
    fn merged(mut self, newer: CacheEntry) -> Self {
        self.buf.extend_from_slice(&newer.buf);
        self.rows += newer.rows;
        self
    }
}

/// Cache occupancy snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheUsage {
    pub bytes: u64,
    pub rows: u64,
    pub tables: usize,
    pub bound_bytes: u64,
}

/// Totals persisted by one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlushStats {
    pub tables: usize,
    pub rows: u64,
    pub bytes: u64,
}

/// Append refused because it would exceed the cache bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheOverBound {
    pub needed: u64,
    pub available: u64,
}

impl Display for CacheOverBound {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cache bound exceeded: need {} bytes, {} available",
            self.needed, self.available
        )
    }
}

impl Error for CacheOverBound {}

/// Flush stopped at a file-store failure; `persisted` was written before it.
#[derive(Debug)]
pub struct FlushError {
    pub persisted: FlushStats,
    pub source: io::Error,
}

impl Display for FlushError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "cache flush failed after {} tables: {}",
            self.persisted.tables, self.source
        )
    }
}

impl Error for FlushError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

pub struct WriteCache {
    entries: Mutex<BTreeMap<TableId, CacheEntry>>,
    /// Bytes taken out of `entries` by a running flush and not yet written.
    in_flight: AtomicU64,
    bound: AtomicU64,
    flush_lock: Mutex<()>,
}

impl WriteCache {
    pub fn new(bound_bytes: u64) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            in_flight: AtomicU64::new(0),
            bound: AtomicU64::new(bound_bytes),
            flush_lock: Mutex::new(()),
        }
    }

    pub fn bound(&self) -> u64 {
        self.bound.load(Ordering::Acquire)
    }

    /// Changes the bound; already-buffered rows are kept even above it.
    pub fn set_bound(&self, bound_bytes: u64) {
        self.bound.store(bound_bytes, Ordering::Release);
    }

    /// Buffers one encoded block of `rows` rows for `table`.
    pub fn append(&self, table: TableId, encoded: &[u8], rows: u64) -> Result<(), CacheOverBound> {
        let mut entries = self.entries();
        let used = total_bytes(&entries) + self.in_flight.load(Ordering::Acquire);
        let needed = encoded.len() as u64;
        let available = self.bound().saturating_sub(used);
        if needed > available {
            return Err(CacheOverBound { needed, available });
        }

        let entry = entries.entry(table).or_default();
        entry.buf.extend_from_slice(encoded);
        entry.rows += rows;
        Ok(())
    }

    /// Rows buffered for `table` that are not currently being flushed.
    pub fn pending_rows(&self, table: TableId) -> u64 {
        self.entries().get(&table).map_or(0, |entry| entry.rows)
    }

    pub fn usage(&self) -> CacheUsage {
        let entries = self.entries();
        CacheUsage {
            bytes: total_bytes(&entries) + self.in_flight.load(Ordering::Acquire),
            rows: entries.values().map(|entry| entry.rows).sum(),
            tables: entries.len(),
            bound_bytes: self.bound(),
        }
    }

    /// Blocks flushes until the returned guard is dropped.
    pub fn pause_flush(&self) -> MutexGuard<'_, ()> {
        self.flush_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Writes every buffered entry to `store` on the tier `tier_of` reports.
    pub fn flush(
        &self,
        store: &dyn FileStore,
        tier_of: &dyn Fn(TableId) -> Option<u8>,
    ) -> Result<FlushStats, FlushError> {
        let _flushing = self.pause_flush();
        self.flush_locked(store, tier_of)
    }

    /// Flushes everything buffered, then writes `encoded` for `table` directly.
    ///
    /// Used for blocks that can never fit the bound; rows appended earlier
    /// still reach the data file first. The returned stats include the block.
    pub fn write_through(
        &self,
        store: &dyn FileStore,
        tier_of: &dyn Fn(TableId) -> Option<u8>,
        table: TableId,
        encoded: &[u8],
        rows: u64,
    ) -> Result<FlushStats, FlushError> {
        let _flushing = self.pause_flush();
        let mut stats = self.flush_locked(store, tier_of)?;
        if let Err(source) = write_block(store, tier_of, table, encoded) {
            return Err(FlushError {
                persisted: stats,
                source,
            });
        }
        stats.tables += 1;
        stats.rows += rows;
        stats.bytes += encoded.len() as u64;
        Ok(stats)
    }

    fn flush_locked(
        &self,
        store: &dyn FileStore,
        tier_of: &dyn Fn(TableId) -> Option<u8>,
    ) -> Result<FlushStats, FlushError> {
        let drained = {
            let mut entries = self.entries();
            let drained = std::mem::take(&mut *entries);
            self.in_flight
                .store(total_bytes(&drained), Ordering::Release);
            drained
        };

        let mut stats = FlushStats::default();
        let mut pending = drained.into_iter();
        while let Some((table, entry)) = pending.next() {
            if let Err(source) = write_block(store, tier_of, table, &entry.buf) {
                self.restore(std::iter::once((table, entry)).chain(pending));
                return Err(FlushError {
                    persisted: stats,
                    source,
                });
            }
            self.in_flight.fetch_sub(entry.bytes(), Ordering::AcqRel);
            stats.tables += 1;
            stats.rows += entry.rows;
            stats.bytes += entry.bytes();
        }
        Ok(stats)
    }

    /// Discards everything buffered and returns the discarded byte count.
    pub fn clear(&self) -> u64 {
        let _flushing = self.pause_flush();
        let drained = std::mem::take(&mut *self.entries());
        drained.values().map(CacheEntry::bytes).sum()
    }

    fn restore(&self, unwritten: impl Iterator<Item = (TableId, CacheEntry)>) {
        let mut entries = self.entries();
        for (table, entry) in unwritten {
            let entry = match entries.remove(&table) {
                Some(newer) => entry.merged(newer),
                None => entry,
            };
            entries.insert(table, entry);
        }
        self.in_flight.store(0, Ordering::Release);
    }

    fn entries(&self) -> MutexGuard<'_, BTreeMap<TableId, CacheEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn write_block(
    store: &dyn FileStore,
    tier_of: &dyn Fn(TableId) -> Option<u8>,
    table: TableId,
    bytes: &[u8],
) -> io::Result<()> {
    let tier = tier_of(table).ok_or_else(|| {
        io::Error::new(
            ErrorKind::NotFound,
            format!("no tier known for cached table {table}"),
        )
    })?;
    store.write(tier, table, bytes)
}

fn total_bytes(entries: &BTreeMap<TableId, CacheEntry>) -> u64 {
    entries.values().map(CacheEntry::bytes).sum()
}

#[cfg(test)]
mod tests {
    use super::{CacheOverBound, WriteCache};
    use crate::model::table::TableId;
    use crate::store::{DirTierStore, FileStore};
    use std::fs;
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    #[test]
    fn append_respects_bound() {
        let cache = WriteCache::new(10);
        cache.append(TableId(1), b"12345", 1).unwrap();
        cache.append(TableId(2), b"1234", 1).unwrap();
        let err = cache.append(TableId(1), b"12", 1).unwrap_err();
        assert_eq!(err.available, 1);

        let usage = cache.usage();
        assert_eq!(usage.bytes, 9);
        assert_eq!(usage.rows, 2);
        assert_eq!(usage.tables, 2);
    }

    #[test]
    fn flush_writes_entries_and_empties_cache() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirTierStore::provision(dir.path(), 2).unwrap();
        let cache = WriteCache::new(1024);
        cache.append(TableId(1), b"a\n", 1).unwrap();
        cache.append(TableId(1), b"b\n", 1).unwrap();
        cache.append(TableId(2), b"c\n", 1).unwrap();

        let stats = cache.flush(&store, &|table: TableId| Some((table.0 % 2) as u8)).unwrap();
        assert_eq!(stats.tables, 2);
        assert_eq!(stats.rows, 3);
        assert_eq!(stats.bytes, 6);
        assert_eq!(cache.usage().bytes, 0);
        assert_eq!(store.read(1, TableId(1)).unwrap(), b"a\nb\n");
        assert_eq!(store.read(0, TableId(2)).unwrap(), b"c\n");
    }

    #[test]
    fn failed_flush_keeps_unwritten_rows_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirTierStore::provision(dir.path(), 2).unwrap();
        let cache = WriteCache::new(1024);
        cache.append(TableId(1), b"a\n", 1).unwrap();
        cache.append(TableId(2), b"b\n", 1).unwrap();
        fs::remove_dir_all(store.tier_dir(1)).unwrap();

        let tier_of = |table: TableId| Some(if table.0 == 1 { 0u8 } else { 1 });
        let err = cache.flush(&store, &tier_of).unwrap_err();
        assert_eq!(err.persisted.tables, 1);
        assert_eq!(cache.pending_rows(TableId(1)), 0);
        assert_eq!(cache.pending_rows(TableId(2)), 1);

        cache.append(TableId(2), b"c\n", 1).unwrap();
        fs::create_dir(store.tier_dir(1)).unwrap();
        cache.flush(&store, &tier_of).unwrap();
        assert_eq!(store.read(1, TableId(2)).unwrap(), b"b\nc\n");
    }

    #[test]
    fn write_through_lands_after_buffered_rows() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirTierStore::provision(dir.path(), 1).unwrap();
        let cache = WriteCache::new(16);
        cache.append(TableId(1), b"a\n", 1).unwrap();

        let tier_of = |_: TableId| Some(0u8);
        let stats = cache
            .write_through(&store, &tier_of, TableId(1), b"bbbbbbbbbbbbbbbbbbbb\n", 1)
            .unwrap();
        assert_eq!(stats.rows, 2);
        assert_eq!(stats.bytes, 23);
        assert_eq!(
            store.read(0, TableId(1)).unwrap(),
            b"a\nbbbbbbbbbbbbbbbbbbbb\n"
        );
    }

    #[test]
    fn clear_reports_discarded_bytes() {
        let cache = WriteCache::new(1024);
        cache.append(TableId(1), b"abc", 1).unwrap();
        assert_eq!(cache.clear(), 3);
        assert_eq!(cache.usage().rows, 0);
    }

    /// In-memory store that can fail its next write and can append to a
    /// cache while a block is being written.
    #[derive(Default)]
    struct RecordingStore<'a> {
        cache: Option<&'a WriteCache>,
        fail_next: AtomicBool,
        blocks: Mutex<Vec<(TableId, Vec<u8>)>>,
        append_during_write: Mutex<Option<Result<(), CacheOverBound>>>,
    }

    impl FileStore for RecordingStore<'_> {
        fn tier_count(&self) -> u8 {
            1
        }

        fn write(&self, _tier: u8, table: TableId, bytes: &[u8]) -> io::Result<()> {
            if let Some(cache) = self.cache {
                *self.append_during_write.lock().unwrap() =
                    Some(cache.append(TableId(99), b"xxxxxxxx", 1));
            }
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(io::Error::new(io::ErrorKind::Other, "sync failed"));
            }
            self.blocks.lock().unwrap().push((table, bytes.to_vec()));
            Ok(())
        }

        fn read(&self, _tier: u8, table: TableId) -> io::Result<Vec<u8>> {
            Ok(self
                .blocks
                .lock()
                .unwrap()
                .iter()
                .filter(|(owner, _)| *owner == table)
                .flat_map(|(_, bytes)| bytes.clone())
                .collect())
        }

        fn has_data(&self, tier: u8, table: TableId) -> io::Result<bool> {
            Ok(!self.read(tier, table)?.is_empty())
        }

        fn remove_all(&self) -> io::Result<()> {
            self.blocks.lock().unwrap().clear();
            Ok(())
        }
    }

    #[test]
    fn retried_block_is_stored_once() {
        let store = RecordingStore::default();
        store.fail_next.store(true, Ordering::SeqCst);
        let cache = WriteCache::new(64);
        cache.append(TableId(1), b"a\n", 1).unwrap();
        cache.append(TableId(1), b"b\n", 1).unwrap();
        let tier_of = |_: TableId| Some(0u8);

        let err = cache.flush(&store, &tier_of).unwrap_err();
        assert_eq!(err.persisted.bytes, 0);
        assert_eq!(cache.usage().bytes, 4);

        cache.flush(&store, &tier_of).unwrap();
        assert_eq!(store.read(0, TableId(1)).unwrap(), b"a\nb\n");
        assert_eq!(cache.usage().bytes, 0);
    }

    #[test]
    fn bytes_being_flushed_still_count_against_the_bound() {
        let cache = WriteCache::new(10);
        cache.append(TableId(1), b"12345678", 1).unwrap();
        let store = RecordingStore {
            cache: Some(&cache),
            ..RecordingStore::default()
        };

        cache.flush(&store, &|_: TableId| Some(0u8)).unwrap();

        assert_eq!(
            *store.append_during_write.lock().unwrap(),
            Some(Err(CacheOverBound {
                needed: 8,
                available: 2
            }))
        );
        assert_eq!(cache.usage().bytes, 0);
        cache.append(TableId(99), b"xxxxxxxx", 1).unwrap();
    }
}
