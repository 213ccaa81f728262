//! CLI smoke entry point.
//!
//! # Responsibility
//! - Verify `tsdb_core` linkage by printing the core version.
//! - Report the status of an existing repository as `key=value` lines.

use std::process::ExitCode;
use std::sync::Arc;
use tsdb_core::{MemoryLimiter, RepoError, RepoStatus, Repository};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [] => {
            println!("tsdb_core version={}", tsdb_core::core_version());
            ExitCode::SUCCESS
        }
        [command, root] if command == "status" => match status(root) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("error kind={} message={}", err.kind(), err);
                ExitCode::FAILURE
            }
        },
        _ => {
            eprintln!("usage: tsdb_cli [status <root>]");
            ExitCode::from(2)
        }
    }
}

fn status(root: &str) -> Result<(), RepoError> {
    let repo = Repository::open(root, Arc::new(MemoryLimiter::unlimited()))?;
    print_status(&repo.status());
    repo.close()
}

fn print_status(status: &RepoStatus) {
    let config = &status.config;
    println!("repo_id={}", status.repo_id);
    println!("root={}", status.root.display());
    println!("lifecycle={}", status.lifecycle);
    println!("precision={:?}", config.precision);
    println!("max_tables={}", config.max_tables);
    println!("cache_bytes={}", config.cache_bytes);
    println!("tier_count={}", config.tier_count);
    println!("default_tier={}", config.default_tier);
    println!("days_per_file={}", config.days_per_file);
    println!("keep_days={}", config.keep_days);
    if let Some(tables) = status.table_count {
        println!("tables={tables}");
    }
    if let Some(cache) = status.cache {
        println!("cache_used_bytes={}", cache.bytes);
        println!("cache_rows={}", cache.rows);
    }
    println!("limiter_used_bytes={}", status.limiter.used_bytes);
}
