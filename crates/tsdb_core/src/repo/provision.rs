//! Scoped cleanup for repository provisioning.

use log::error;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

/// Removes every tracked path on drop unless `commit` was called.
///
/// Paths are removed in reverse tracking order.
#[derive(Debug, Default)]
pub(crate) struct ProvisionGuard {
    created: Vec<PathBuf>,
    committed: bool,
}

impl ProvisionGuard {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Tracks a path this provisioning run is about to create.
    pub(crate) fn track(&mut self, path: PathBuf) {
        self.created.push(path);
    }

    pub(crate) fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for ProvisionGuard {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for path in self.created.iter().rev() {
            let result = if path.is_dir() {
                fs::remove_dir_all(path)
            } else {
                fs::remove_file(path)
            };
            match result {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => error!(
                    "event=repo_provision module=repo status=error error_code=rollback_failed path={} error={}",
                    path.display(),
                    err
                ),
            }
        }
    }
}
