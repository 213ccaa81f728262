//! Repository lifecycle states.

use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicU8, Ordering};

/// Externally reported lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Under construction, or a reconfiguration is being applied.
    Configuring,
    Active,
    /// Terminal; reached through close or drop.
    Closed,
}

impl LifecycleState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuring => "configuring",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    fn to_raw(self) -> u8 {
        match self {
            Self::Configuring => 0,
            Self::Active => 1,
            Self::Closed => 2,
        }
    }

    fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Configuring,
            1 => Self::Active,
            _ => Self::Closed,
        }
    }
}

impl Display for LifecycleState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lock-free mirror of the lifecycle, readable while a transition holds
/// the repository lock.
#[derive(Debug)]
pub(crate) struct LifecycleCell(AtomicU8);

impl LifecycleCell {
    pub(crate) fn new(state: LifecycleState) -> Self {
        Self(AtomicU8::new(state.to_raw()))
    }

    pub(crate) fn get(&self) -> LifecycleState {
        LifecycleState::from_raw(self.0.load(Ordering::Acquire))
    }

    pub(crate) fn set(&self, state: LifecycleState) {
        self.0.store(state.to_raw(), Ordering::Release);
    }

    /// Moves `from -> to` only if no one else changed the state meanwhile.
    pub(crate) fn transition(&self, from: LifecycleState, to: LifecycleState) -> bool {
        self.0
            .compare_exchange(from.to_raw(), to.to_raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
