mod support;

use std::fs;
use support::{cpu_batch, cpu_table, create_repo, options_with_cache, unlimited};
use tsdb_core::{
    ErrorKind, LifecycleState, MemoryLimiter, Precision, RepoOptions, Repository, ResourceLimiter,
};

#[test]
fn create_close_open_restores_config_and_catalog() {
    let dir = tempfile::tempdir().unwrap();
    let options = RepoOptions {
        max_tables: Some(10),
        cache_bytes: Some(8192),
        ..RepoOptions::default()
    };

    let repo = Repository::create(dir.path(), &options, unlimited()).unwrap();
    assert_eq!(repo.lifecycle(), LifecycleState::Active);
    let repo_id = repo.repo_id();
    let created = repo.create_table(&cpu_table(7)).unwrap();
    let config = repo.config();
    repo.close().unwrap();
    assert_eq!(repo.lifecycle(), LifecycleState::Closed);

    let reopened = Repository::open(dir.path(), unlimited()).unwrap();
    assert_eq!(reopened.lifecycle(), LifecycleState::Active);
    assert_eq!(reopened.repo_id(), repo_id);
    assert_eq!(*reopened.config(), *config);
    assert_eq!(reopened.config().max_tables, 10);
    assert_eq!(reopened.table_info(created.id).unwrap(), created);
    assert_eq!(reopened.status().cache.unwrap().bytes, 0);
    reopened.close().unwrap();
}

#[test]
fn held_settings_survive_reopen_and_reconfigure() {
    let dir = tempfile::tempdir().unwrap();
    let options = RepoOptions {
        precision: Some(Precision::Micro),
        days_per_file: Some(5),
        keep_days: Some(30),
        ..RepoOptions::default()
    };
    let repo = Repository::create(dir.path(), &options, unlimited()).unwrap();
    repo.close().unwrap();

    let reopened = Repository::open(dir.path(), unlimited()).unwrap();
    let config = reopened.config();
    assert_eq!(config.precision, Precision::Micro);
    assert_eq!(config.days_per_file, 5);
    assert_eq!(config.keep_days, 30);

    let changed = reopened
        .configure(&RepoOptions {
            keep_days: Some(90),
            ..RepoOptions::default()
        })
        .unwrap();
    assert_eq!(changed.keep_days, 90);
    assert_eq!(changed.days_per_file, 5);
    reopened.close().unwrap();

    let again = Repository::open(dir.path(), unlimited()).unwrap();
    assert_eq!(again.config().keep_days, 90);
    again.close().unwrap();
}

#[test]
fn create_on_missing_root_fails_without_side_effects() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("missing");

    let err = Repository::create(&root, &RepoOptions::default(), unlimited()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(!root.exists());
}

#[test]
fn create_with_invalid_options_leaves_root_empty() {
    let dir = tempfile::tempdir().unwrap();
    let options = RepoOptions {
        tier_count: Some(0),
        ..RepoOptions::default()
    };

    let err = Repository::create(dir.path(), &options, unlimited()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn create_over_existing_repository_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let repo = create_repo(dir.path());
    repo.close().unwrap();

    let err = Repository::create(dir.path(), &RepoOptions::default(), unlimited()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    // The existing repository is untouched.
    Repository::open(dir.path(), unlimited())
        .unwrap()
        .close()
        .unwrap();
}

#[test]
fn create_next_to_leftover_data_directory_creates_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    fs::create_dir(root.join("data")).unwrap();

    let err = Repository::create(root, &RepoOptions::default(), unlimited()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    assert!(!root.join("meta.db").exists());
    assert_eq!(fs::read_dir(root.join("data")).unwrap().count(), 0);
}

#[test]
fn create_on_regular_file_is_invalid_argument() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("not_a_dir");
    fs::write(&file, b"x").unwrap();

    let err = Repository::create(&file, &RepoOptions::default(), unlimited()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[cfg(unix)]
#[test]
fn create_on_unwritable_root_is_invalid_argument() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("locked");
    fs::create_dir(&root).unwrap();
    fs::set_permissions(&root, fs::Permissions::from_mode(0o500)).unwrap();

    // Privileged users bypass permission bits; nothing to check then.
    let bypassed = fs::write(root.join("x"), b"x").is_ok();
    let result = Repository::create(&root, &RepoOptions::default(), unlimited());
    fs::set_permissions(&root, fs::Permissions::from_mode(0o700)).unwrap();
    if bypassed {
        result.unwrap().drop_repository().unwrap();
        return;
    }

    assert_eq!(result.unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(fs::read_dir(&root).unwrap().count(), 0);
}

#[test]
fn open_without_metadata_is_invalid_argument() {
    let dir = tempfile::tempdir().unwrap();

    let err = Repository::open(dir.path(), unlimited()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert!(!dir.path().join("meta.db").exists());
}

#[test]
fn open_with_missing_tier_directory_fails() {
    let dir = tempfile::tempdir().unwrap();
    create_repo(dir.path()).close().unwrap();
    fs::remove_dir(dir.path().join("data").join("t2")).unwrap();

    let err = Repository::open(dir.path(), unlimited()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn closed_handle_rejects_every_data_path_call() {
    let dir = tempfile::tempdir().unwrap();
    let repo = create_repo(dir.path());
    repo.create_table(&cpu_table(1)).unwrap();
    repo.close().unwrap();

    let errors = [
        repo.create_table(&cpu_table(2)).unwrap_err(),
        repo.alter_table(&cpu_table(1)).unwrap_err(),
        repo.table_info(cpu_table(1).id).unwrap_err(),
        repo.insert_data(cpu_table(1).id, &cpu_batch(0, 1)).unwrap_err(),
        repo.flush().unwrap_err(),
        repo.configure(&RepoOptions::default()).unwrap_err(),
        repo.close().unwrap_err(),
    ];
    for err in errors {
        assert_eq!(err.kind(), ErrorKind::State, "{err}");
    }

    let status = repo.status();
    assert_eq!(status.lifecycle, LifecycleState::Closed);
    assert_eq!(status.table_count, None);
    assert_eq!(status.cache, None);
}

#[test]
fn drop_discards_cache_and_removes_persisted_state() {
    let dir = tempfile::tempdir().unwrap();
    let limiter = std::sync::Arc::new(MemoryLimiter::unlimited());
    let repo = Repository::create(dir.path(), &RepoOptions::default(), limiter.clone()).unwrap();
    let table = repo.create_table(&cpu_table(1)).unwrap();
    repo.insert_data(table.id, &cpu_batch(0, 10)).unwrap();
    repo.flush().unwrap();
    repo.insert_data(table.id, &cpu_batch(10, 10)).unwrap();
    assert!(limiter.snapshot().used_bytes > 0);

    repo.drop_repository().unwrap();

    assert_eq!(repo.lifecycle(), LifecycleState::Closed);
    assert_eq!(limiter.snapshot().used_bytes, 0);
    assert!(!dir.path().join("meta.db").exists());
    assert!(!dir.path().join("data").exists());
    assert!(dir.path().is_dir());

    let err = Repository::open(dir.path(), unlimited()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[test]
fn drop_is_allowed_after_close() {
    let dir = tempfile::tempdir().unwrap();
    let repo = Repository::create(dir.path(), &options_with_cache(8192), unlimited()).unwrap();
    repo.close().unwrap();

    repo.drop_repository().unwrap();
    assert!(!dir.path().join("data").exists());
}

#[test]
fn status_reports_active_repository() {
    let dir = tempfile::tempdir().unwrap();
    let repo = create_repo(dir.path());
    let table = repo.create_table(&cpu_table(3)).unwrap();
    let accepted = repo.insert_data(table.id, &cpu_batch(0, 4)).unwrap();

    let status = repo.status();
    assert_eq!(status.lifecycle, LifecycleState::Active);
    assert_eq!(status.root, dir.path());
    assert_eq!(status.table_count, Some(1));
    let cache = status.cache.unwrap();
    assert_eq!(cache.rows, 4);
    assert_eq!(cache.bytes, accepted.bytes);
    assert_eq!(status.limiter.used_bytes, accepted.bytes);
    repo.close().unwrap();
}
