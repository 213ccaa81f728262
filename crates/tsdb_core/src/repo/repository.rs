//! Repository manager: lifecycle and data-path coordination.
//!
//! # Responsibility
//! - Compose catalog, cache, file store and limiter into one repository.
//! - Serialize create/open/close/drop/configure against table and ingestion
//!   calls.
//!
//! # Invariants
//! - A handle is only returned fully constructed; failed construction leaves
//!   no files behind.
//! - Data-path calls hold the shared state lock for their whole duration, so
//!   close/drop/configure wait for every call that already passed the
//!   `Active` check.
//! - Once close or drop starts, new data-path calls fail with `State`.
//! - Every byte reserved from the limiter is released exactly once: when
//!   flushed, when discarded by drop, or when the insert fails.
//!
//! # See also
//! - `crate::repo::state::LifecycleState`

use super::error::{RepoError, RepoResult};
use super::provision::ProvisionGuard;
use super::state::{LifecycleCell, LifecycleState};
use crate::cache::{CacheUsage, FlushStats, WriteCache};
use crate::catalog::{SqliteCatalog, TableCatalog};
use crate::db::{create_meta_db, open_meta_db, META_FILE_NAME};
use crate::limiter::{LimiterUsage, ResourceLimiter};
use crate::model::config::{RepoConfig, RepoOptions};
use crate::model::table::{DataBatch, DataRow, SchemaError, TableConfig, TableId, TableRecord};
use crate::store::codec::{decode_rows, encode_batch};
use crate::store::{DirTierStore, FileStore, DATA_DIR_NAME};
use log::{debug, error, info, warn};
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};
use std::time::Instant;
use uuid::Uuid;

/// Resources that only exist while the repository is active.
struct ActiveParts {
    catalog: Box<dyn TableCatalog>,
    cache: WriteCache,
}

enum RepoState {
    Active(ActiveParts),
    Closed,
}

/// Result of one accepted ingestion call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InsertOutcome {
    pub rows: u64,
    pub bytes: u64,
    /// `true` when the rows already reached the file store.
    pub durable: bool,
}

/// Monitoring snapshot of one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoStatus {
    pub repo_id: Uuid,
    pub root: PathBuf,
    pub lifecycle: LifecycleState,
    pub config: RepoConfig,
    /// `None` once closed or while a lifecycle transition holds the lock.
    pub table_count: Option<usize>,
    pub cache: Option<CacheUsage>,
    pub limiter: LimiterUsage,
}

pub struct Repository {
    root: PathBuf,
    repo_id: Uuid,
    lifecycle: LifecycleCell,
    closing: AtomicBool,
    state: RwLock<RepoState>,
    config: RwLock<Arc<RepoConfig>>,
    store: Box<dyn FileStore>,
    limiter: Arc<dyn ResourceLimiter>,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.root)
            .field("repo_id", &self.repo_id)
            .finish_non_exhaustive()
    }
}

impl Repository {
    /// Provisions a new repository under an existing, writable `root`.
    ///
    /// # Errors
    /// - `InvalidArgument` for an inaccessible root or invalid options.
    /// - `AlreadyExists` when `root` already holds a repository layout.
    /// - `Io` when the metadata file or data directories cannot be created;
    ///   anything created before the failure is removed again.
    pub fn create(
        root: impl AsRef<Path>,
        options: &RepoOptions,
        limiter: Arc<dyn ResourceLimiter>,
    ) -> RepoResult<Self> {
        let root = root.as_ref();
        let started_at = Instant::now();
        info!(
            "event=repo_create module=repo status=start root={}",
            root.display()
        );

        let result = Self::provision(root, options, limiter);
        match &result {
            Ok(repo) => info!(
                "event=repo_create module=repo status=ok repo_id={} duration_ms={}",
                repo.repo_id,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=repo_create module=repo status=error root={} duration_ms={} error_code={} error={}",
                root.display(),
                started_at.elapsed().as_millis(),
                err.kind(),
                err
            ),
        }
        result
    }

    /// Reopens the repository persisted under `root`.
    ///
    /// Configuration comes from the metadata file; the cache starts empty.
    pub fn open(root: impl AsRef<Path>, limiter: Arc<dyn ResourceLimiter>) -> RepoResult<Self> {
        let root = root.as_ref();
        let started_at = Instant::now();
        info!(
            "event=repo_open module=repo status=start root={}",
            root.display()
        );

        let result = Self::reload(root, limiter);
        match &result {
            Ok(repo) => info!(
                "event=repo_open module=repo status=ok repo_id={} tables={} duration_ms={}",
                repo.repo_id,
                repo.table_count(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=repo_open module=repo status=error root={} duration_ms={} error_code={} error={}",
                root.display(),
                started_at.elapsed().as_millis(),
                err.kind(),
                err
            ),
        }
        result
    }

    fn provision(
        root: &Path,
        options: &RepoOptions,
        limiter: Arc<dyn ResourceLimiter>,
    ) -> RepoResult<Self> {
        check_root(root)?;
        let config = options.resolve()?;

        let meta_path = root.join(META_FILE_NAME);
        let data_path = root.join(DATA_DIR_NAME);
        for existing in [&meta_path, &data_path] {
            if existing.exists() {
                return Err(RepoError::AlreadyExists(format!(
                    "`{}` already exists",
                    existing.display()
                )));
            }
        }

        let mut guard = ProvisionGuard::new();
        guard.track(meta_path.clone());
        guard.track(root.join(format!("{META_FILE_NAME}-journal")));
        let conn = create_meta_db(&meta_path)?;
        let repo_id = Uuid::new_v4();
        let catalog = SqliteCatalog::create(conn, repo_id, &config)?;

        guard.track(data_path);
        let store = DirTierStore::provision(root, config.tier_count)?;
        let cache = WriteCache::new(config.cache_bytes);

        let repo = Self::assemble(root, repo_id, config, Box::new(catalog), cache, store, limiter);
        guard.commit();
        Ok(repo)
    }

    fn reload(root: &Path, limiter: Arc<dyn ResourceLimiter>) -> RepoResult<Self> {
        check_root(root)?;
        let meta_path = root.join(META_FILE_NAME);
        if !meta_path.is_file() {
            return Err(RepoError::InvalidArgument(format!(
                "no repository metadata at `{}`",
                meta_path.display()
            )));
        }

        let conn = open_meta_db(&meta_path)?;
        let (catalog, meta) = SqliteCatalog::open(conn)?;
        let store = DirTierStore::open(root, meta.config.tier_count)?;
        let cache = WriteCache::new(meta.config.cache_bytes);

        Ok(Self::assemble(
            root,
            meta.repo_id,
            meta.config,
            Box::new(catalog),
            cache,
            store,
            limiter,
        ))
    }

    fn assemble(
        root: &Path,
        repo_id: Uuid,
        config: RepoConfig,
        catalog: Box<dyn TableCatalog>,
        cache: WriteCache,
        store: DirTierStore,
        limiter: Arc<dyn ResourceLimiter>,
    ) -> Self {
        let repo = Self {
            root: root.to_path_buf(),
            repo_id,
            lifecycle: LifecycleCell::new(LifecycleState::Configuring),
            closing: AtomicBool::new(false),
            state: RwLock::new(RepoState::Active(ActiveParts { catalog, cache })),
            config: RwLock::new(Arc::new(config)),
            store: Box::new(store),
            limiter,
        };
        repo.lifecycle.set(LifecycleState::Active);
        repo
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn repo_id(&self) -> Uuid {
        self.repo_id
    }

    /// Lock-free lifecycle read.
    pub fn lifecycle(&self) -> LifecycleState {
        self.lifecycle.get()
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<RepoConfig> {
        Arc::clone(
            &self
                .config
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }

    /// Flushes the cache and releases the catalog; the handle ends `Closed`.
    ///
    /// A flush failure is returned and the repository stays `Active` with
    /// every unflushed row still cached.
    pub fn close(&self) -> RepoResult<()> {
        let started_at = Instant::now();
        self.closing.store(true, Ordering::Release);
        let mut state = self.write_state();

        let parts = match std::mem::replace(&mut *state, RepoState::Closed) {
            RepoState::Active(parts) => parts,
            RepoState::Closed => return Err(RepoError::state("close", LifecycleState::Closed)),
        };

        if let Err(err) = self.flush_parts(&parts) {
            *state = RepoState::Active(parts);
            self.closing.store(false, Ordering::Release);
            error!(
                "event=repo_close module=repo status=error repo_id={} duration_ms={} error_code=flush_failed error={}",
                self.repo_id,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err);
        }

        self.lifecycle.set(LifecycleState::Closed);
        let ActiveParts { catalog, cache } = parts;
        drop(cache);
        if let Err(err) = catalog.release() {
            error!(
                "event=repo_close module=repo status=error repo_id={} duration_ms={} error_code=catalog_release_failed error={}",
                self.repo_id,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }

        info!(
            "event=repo_close module=repo status=ok repo_id={} duration_ms={}",
            self.repo_id,
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Destroys the repository: cached rows are discarded and every persisted
    /// file is removed. Valid on an active or closed handle.
    pub fn drop_repository(&self) -> RepoResult<()> {
        let started_at = Instant::now();
        self.lifecycle.set(LifecycleState::Closed);
        self.closing.store(true, Ordering::Release);
        let mut state = self.write_state();
        // A configure that held the lock may have restored the cell meanwhile.
        self.lifecycle.set(LifecycleState::Closed);

        if let RepoState::Active(parts) = std::mem::replace(&mut *state, RepoState::Closed) {
            let ActiveParts { catalog, cache } = parts;
            let discarded = cache.clear();
            self.limiter.release(discarded);
            if let Err(err) = catalog.release() {
                warn!(
                    "event=repo_drop module=repo status=error repo_id={} error_code=catalog_release_failed error={}",
                    self.repo_id, err
                );
            }
            debug!(
                "event=repo_drop module=repo status=progress repo_id={} discarded_bytes={}",
                self.repo_id, discarded
            );
        }

        if let Err(err) = self.store.remove_all() {
            error!(
                "event=repo_drop module=repo status=error repo_id={} duration_ms={} error_code=remove_failed error={}",
                self.repo_id,
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }

        info!(
            "event=repo_drop module=repo status=ok repo_id={} duration_ms={}",
            self.repo_id,
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Validates `options` against the current configuration and applies it.
    ///
    /// Unset fields keep their current value. The new configuration is
    /// persisted before in-flight readers can observe it.
    pub fn configure(&self, options: &RepoOptions) -> RepoResult<Arc<RepoConfig>> {
        let started_at = Instant::now();
        let state = self.write_state();
        let RepoState::Active(parts) = &*state else {
            return Err(RepoError::state("configure", LifecycleState::Closed));
        };

        if !self
            .lifecycle
            .transition(LifecycleState::Active, LifecycleState::Configuring)
        {
            return Err(RepoError::state("configure", self.lifecycle.get()));
        }
        let result = self.apply_config(parts, options);
        self.lifecycle
            .transition(LifecycleState::Configuring, LifecycleState::Active);

        match &result {
            Ok(config) => info!(
                "event=repo_configure module=repo status=ok repo_id={} max_tables={} cache_bytes={} default_tier={} duration_ms={}",
                self.repo_id,
                config.max_tables,
                config.cache_bytes,
                config.default_tier,
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=repo_configure module=repo status=error repo_id={} error_code={} error={}",
                self.repo_id,
                err.kind(),
                err
            ),
        }
        result
    }

    fn apply_config(
        &self,
        parts: &ActiveParts,
        options: &RepoOptions,
    ) -> RepoResult<Arc<RepoConfig>> {
        let current = self.config();
        let next = options.resolve_against(&current)?;
        if next == *current {
            return Ok(current);
        }

        parts.catalog.set_capacity(next.max_tables)?;
        if let Err(err) = parts.catalog.store_config(&next) {
            parts.catalog.set_capacity(current.max_tables)?;
            return Err(err.into());
        }
        parts.cache.set_bound(next.cache_bytes);

        let next = Arc::new(next);
        *self
            .config
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::clone(&next);
        Ok(next)
    }

    /// Registers a new table.
    ///
    /// # Errors
    /// - `AlreadyExists` for a registered id or name.
    /// - `CapacityExceeded` once `max_tables` tables exist.
    /// - `InvalidArgument` for a malformed table config or tier.
    pub fn create_table(&self, table: &TableConfig) -> RepoResult<TableRecord> {
        self.with_active("create_table", |parts, config| {
            table
                .validate()
                .map_err(|err| RepoError::InvalidArgument(err.to_string()))?;
            let tier = table.tier.unwrap_or(config.default_tier);
            check_tier(tier, config)?;

            let record = parts.catalog.register(table, tier)?;
            info!(
                "event=table_create module=repo status=ok repo_id={} table_id={} tier={} columns={}",
                self.repo_id,
                record.id,
                record.tier,
                record.schema.len()
            );
            Ok(record)
        })
    }

    /// Applies an append-only schema change (and optional tier move) to a
    /// registered table.
    pub fn alter_table(&self, table: &TableConfig) -> RepoResult<TableRecord> {
        self.with_active("alter_table", |parts, config| {
            table
                .validate()
                .map_err(|err| RepoError::InvalidArgument(err.to_string()))?;
            let current = parts
                .catalog
                .lookup(table.id)
                .ok_or(RepoError::NotFound(table.id))?;
            let tier = table.tier.unwrap_or(current.tier);
            check_tier(tier, config)?;

            let _paused = parts.cache.pause_flush();
            if tier != current.tier
                && (parts.cache.pending_rows(table.id) > 0
                    || self.store.has_data(current.tier, table.id)?)
            {
                return Err(RepoError::SchemaIncompatible(SchemaError::TierLocked {
                    from: current.tier,
                    to: tier,
                }));
            }

            let record = parts.catalog.alter(table, tier)?;
            info!(
                "event=table_alter module=repo status=ok repo_id={} table_id={} schema_version={} tier={}",
                self.repo_id, record.id, record.schema_version, record.tier
            );
            Ok(record)
        })
    }

    pub fn table_info(&self, id: TableId) -> RepoResult<TableRecord> {
        self.with_active("table_info", |parts, _| {
            parts.catalog.lookup(id).ok_or(RepoError::NotFound(id))
        })
    }

    pub fn list_tables(&self) -> RepoResult<Vec<TableRecord>> {
        self.with_active("list_tables", |parts, _| Ok(parts.catalog.list()))
    }

    /// Buffers `batch` for table `id`.
    ///
    /// Success means the rows are at least cache-resident; `durable` reports
    /// whether they already reached the file store. A batch that does not fit
    /// the remaining cache space triggers a flush first.
    ///
    /// # Errors
    /// - `NotFound` for an unregistered table; nothing is reserved or cached.
    /// - `SchemaIncompatible` when a row does not match the table schema.
    /// - `CapacityExceeded` when the limiter refuses the reservation.
    /// - `Io` when a triggered flush fails; the batch is not accepted.
    pub fn insert_data(&self, id: TableId, batch: &DataBatch) -> RepoResult<InsertOutcome> {
        self.with_active("insert_data", |parts, _| {
            let record = parts.catalog.lookup(id).ok_or(RepoError::NotFound(id))?;
            record.schema.check_batch(batch)?;
            let encoded = encode_batch(batch)?;
            let bytes = encoded.len() as u64;
            let rows = batch.len() as u64;

            if let Err(rejection) = self.limiter.reserve(bytes) {
                warn!(
                    "event=limiter_reject module=repo status=error repo_id={} table_id={} requested={} available={}",
                    self.repo_id, id, rejection.requested, rejection.available
                );
                return Err(rejection.into());
            }

            let result = self.buffer(parts, id, &encoded, rows);
            if result.is_err() {
                self.limiter.release(bytes);
            }
            let durable = result?;
            Ok(InsertOutcome {
                rows,
                bytes,
                durable,
            })
        })
    }

    /// Returns `Ok(true)` when the block was written through to disk.
    fn buffer(
        &self,
        parts: &ActiveParts,
        id: TableId,
        encoded: &[u8],
        rows: u64,
    ) -> RepoResult<bool> {
        if parts.cache.append(id, encoded, rows).is_ok() {
            return Ok(false);
        }

        if (encoded.len() as u64) <= parts.cache.bound() {
            self.flush_parts(parts)?;
            if parts.cache.append(id, encoded, rows).is_ok() {
                return Ok(false);
            }
        }

        let tier_of = |table: TableId| parts.catalog.lookup(table).map(|record| record.tier);
        match parts
            .cache
            .write_through(&*self.store, &tier_of, id, encoded, rows)
        {
            Ok(stats) => {
                // `stats` includes this block's own reservation.
                self.limiter.release(stats.bytes);
                debug!(
                    "event=cache_flush module=repo status=ok repo_id={} mode=write_through tables={} rows={} bytes={}",
                    self.repo_id, stats.tables, stats.rows, stats.bytes
                );
                Ok(true)
            }
            Err(err) => {
                self.limiter.release(err.persisted.bytes);
                error!(
                    "event=cache_flush module=repo status=error repo_id={} mode=write_through error={}",
                    self.repo_id, err
                );
                Err(err.into())
            }
        }
    }

    /// Explicit durability boundary: persists everything currently cached.
    pub fn flush(&self) -> RepoResult<FlushStats> {
        self.with_active("flush", |parts, _| self.flush_parts(parts))
    }

    /// Reads every persisted row of table `id` in append order.
    ///
    /// Rows still in the cache are not included.
    pub fn read_table(&self, id: TableId) -> RepoResult<Vec<DataRow>> {
        self.with_active("read_table", |parts, _| {
            let record = parts.catalog.lookup(id).ok_or(RepoError::NotFound(id))?;
            let bytes = self.store.read(record.tier, id)?;
            Ok(decode_rows(&bytes)?)
        })
    }

    /// Monitoring snapshot; never waits on a lifecycle transition.
    pub fn status(&self) -> RepoStatus {
        let (table_count, cache) = match self.state.try_read() {
            Ok(state) => Self::active_readings(&state),
            Err(TryLockError::Poisoned(poisoned)) => Self::active_readings(&poisoned.into_inner()),
            Err(TryLockError::WouldBlock) => (None, None),
        };

        RepoStatus {
            repo_id: self.repo_id,
            root: self.root.clone(),
            lifecycle: self.lifecycle(),
            config: (*self.config()).clone(),
            table_count,
            cache,
            limiter: self.limiter.snapshot(),
        }
    }

    fn active_readings(state: &RepoState) -> (Option<usize>, Option<CacheUsage>) {
        match state {
            RepoState::Active(parts) => (Some(parts.catalog.len()), Some(parts.cache.usage())),
            RepoState::Closed => (None, None),
        }
    }

    fn table_count(&self) -> usize {
        match &*self.read_state() {
            RepoState::Active(parts) => parts.catalog.len(),
            RepoState::Closed => 0,
        }
    }

    fn flush_parts(&self, parts: &ActiveParts) -> RepoResult<FlushStats> {
        let started_at = Instant::now();
        let tier_of = |table: TableId| parts.catalog.lookup(table).map(|record| record.tier);
        match parts.cache.flush(&*self.store, &tier_of) {
            Ok(stats) => {
                self.limiter.release(stats.bytes);
                debug!(
                    "event=cache_flush module=repo status=ok repo_id={} tables={} rows={} bytes={} duration_ms={}",
                    self.repo_id,
                    stats.tables,
                    stats.rows,
                    stats.bytes,
                    started_at.elapsed().as_millis()
                );
                Ok(stats)
            }
            Err(err) => {
                self.limiter.release(err.persisted.bytes);
                error!(
                    "event=cache_flush module=repo status=error repo_id={} persisted_tables={} duration_ms={} error={}",
                    self.repo_id,
                    err.persisted.tables,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err.into())
            }
        }
    }

    /// Runs `op` under the shared state lock if the repository is active.
    fn with_active<T>(
        &self,
        operation: &'static str,
        op: impl FnOnce(&ActiveParts, &RepoConfig) -> RepoResult<T>,
    ) -> RepoResult<T> {
        let state = self.read_state();
        if self.closing.load(Ordering::Acquire) {
            return Err(RepoError::state(operation, LifecycleState::Closed));
        }
        match &*state {
            RepoState::Active(parts) => {
                let config = self.config();
                op(parts, &config)
            }
            RepoState::Closed => Err(RepoError::state(operation, LifecycleState::Closed)),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RepoState> {
        self.state
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RepoState> {
        self.state
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Drop for Repository {
    fn drop(&mut self) {
        let state = self
            .state
            .get_mut()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let RepoState::Active(parts) = state {
            let discarded = parts.cache.clear();
            self.limiter.release(discarded);
            if discarded > 0 {
                warn!(
                    "event=repo_release module=repo status=error repo_id={} error_code=dropped_while_active discarded_bytes={}",
                    self.repo_id, discarded
                );
            }
        }
    }
}

fn check_root(root: &Path) -> RepoResult<()> {
    if root.as_os_str().is_empty() {
        return Err(RepoError::InvalidArgument(
            "repository root path is empty".to_string(),
        ));
    }
    let metadata = fs::metadata(root).map_err(|err| {
        RepoError::InvalidArgument(format!(
            "repository root `{}` is not accessible: {err}",
            root.display()
        ))
    })?;
    if !metadata.is_dir() {
        return Err(RepoError::InvalidArgument(format!(
            "repository root `{}` is not a directory",
            root.display()
        )));
    }
    fs::read_dir(root).map_err(|err| {
        RepoError::InvalidArgument(format!(
            "repository root `{}` is not readable: {err}",
            root.display()
        ))
    })?;

    // Writability is checked with a throwaway file.
    let marker = root.join(format!(".tsdb-access-{}", Uuid::new_v4()));
    OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&marker)
        .and_then(|file| {
            drop(file);
            fs::remove_file(&marker)
        })
        .map_err(|err| {
            RepoError::InvalidArgument(format!(
                "repository root `{}` is not writable: {err}",
                root.display()
            ))
        })
}

fn check_tier(tier: u8, config: &RepoConfig) -> RepoResult<()> {
    if tier >= config.tier_count {
        return Err(RepoError::InvalidArgument(format!(
            "tier {tier} out of range; repository has {} tiers",
            config.tier_count
        )));
    }
    Ok(())
}
