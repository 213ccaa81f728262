//! Shared resource accounting for repositories.
//!
//! # Responsibility
//! - Bound the bytes buffered by one or more repositories.
//! - Expose a snapshot of current usage for status reporting.
//!
//! # Invariants
//! - `used` never exceeds `limit` through `reserve`.
//! - Accounting is lock-free and safe to call without any repository lock held.

use log::warn;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time limiter reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterUsage {
    pub used_bytes: u64,
    /// `None` when the limiter does not bound usage.
    pub limit_bytes: Option<u64>,
    pub rejected_total: u64,
}

/// Reservation refused because the budget is exhausted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimiterRejection {
    pub requested: u64,
    pub available: u64,
}

impl Display for LimiterRejection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "resource budget exhausted: requested {} bytes, {} available",
            self.requested, self.available
        )
    }
}

impl Error for LimiterRejection {}

/// Limiter contract shared across repositories.
pub trait ResourceLimiter: Send + Sync {
    fn reserve(&self, bytes: u64) -> Result<(), LimiterRejection>;
    fn release(&self, bytes: u64);
    fn snapshot(&self) -> LimiterUsage;
}

/// Atomic byte-budget limiter.
#[derive(Debug)]
pub struct MemoryLimiter {
    limit: Option<u64>,
    used: AtomicU64,
    rejected: AtomicU64,
}

impl MemoryLimiter {
    pub fn new(limit_bytes: u64) -> Self {
        Self {
            limit: Some(limit_bytes),
            used: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    /// Limiter that only accounts and never rejects.
    pub fn unlimited() -> Self {
        Self {
            limit: None,
            used: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }
}

impl ResourceLimiter for MemoryLimiter {
    fn reserve(&self, bytes: u64) -> Result<(), LimiterRejection> {
        let Some(limit) = self.limit else {
            self.used.fetch_add(bytes, Ordering::AcqRel);
            return Ok(());
        };

        let result = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                used.checked_add(bytes).filter(|next| *next <= limit)
            });
        match result {
            Ok(_) => Ok(()),
            Err(used) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(LimiterRejection {
                    requested: bytes,
                    available: limit.saturating_sub(used),
                })
            }
        }
    }

    fn release(&self, bytes: u64) {
        let result = self
            .used
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                Some(used.saturating_sub(bytes))
            });
        if let Ok(previous) = result {
            if previous < bytes {
                warn!(
                    "event=limiter_release module=limiter status=error error_code=release_underflow used={} released={}",
                    previous, bytes
                );
            }
        }
    }

    fn snapshot(&self) -> LimiterUsage {
        LimiterUsage {
            used_bytes: self.used.load(Ordering::Acquire),
            limit_bytes: self.limit,
            rejected_total: self.rejected.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{MemoryLimiter, ResourceLimiter};
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn reserve_rejects_beyond_limit_without_side_effects() {
        let limiter = MemoryLimiter::new(100);
        limiter.reserve(60).unwrap();
        let rejection = limiter.reserve(50).unwrap_err();
        assert_eq!(rejection.available, 40);

        let usage = limiter.snapshot();
        assert_eq!(usage.used_bytes, 60);
        assert_eq!(usage.rejected_total, 1);
        assert_eq!(usage.limit_bytes, Some(100));
    }

    #[test]
    fn release_saturates_at_zero() {
        let limiter = MemoryLimiter::new(100);
        limiter.reserve(10).unwrap();
        limiter.release(25);
        assert_eq!(limiter.snapshot().used_bytes, 0);
    }

    #[test]
    fn unlimited_limiter_never_rejects() {
        let limiter = MemoryLimiter::unlimited();
        limiter.reserve(u64::MAX / 2).unwrap();
        assert_eq!(limiter.snapshot().limit_bytes, None);
    }

    #[test]
    fn concurrent_reservations_never_overshoot() {
        let limiter = Arc::new(MemoryLimiter::new(1_000));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                thread::spawn(move || (0..100).filter(|_| limiter.reserve(7).is_ok()).count())
            })
            .collect();
        let accepted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();

        assert_eq!(accepted as u64 * 7, limiter.snapshot().used_bytes);
        assert!(limiter.snapshot().used_bytes <= 1_000);
    }
}
