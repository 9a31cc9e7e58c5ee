//! Process-wide circuit breaker.
//!
//! The breaker starts `Enabled` and moves to `Disabled` exactly once. There is
//! no automatic reset; a disabled breaker stays disabled until the process
//! restarts.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Enabled,
    Disabled,
}

#[derive(Debug, Default)]
pub struct CircuitBreaker {
    disabled: AtomicBool,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> CircuitState {
        if self.is_open() {
            CircuitState::Disabled
        } else {
            CircuitState::Enabled
        }
    }

    pub fn is_open(&self) -> bool {
        self.disabled.load(Ordering::Acquire)
    }

    /// Open the breaker. Returns `true` only for the call that flipped it.
    pub fn trip(&self) -> bool {
        !self.disabled.swap(true, Ordering::AcqRel)
    }
}
