//! Interrupt worker lifecycle.
//!
//! GPIO edge interrupts and IIO buffer/event delivery both run on a
//! dedicated worker thread per context. [`IsrState`] is the observable state
//! of that worker.

use core::sync::atomic::{AtomicU8, Ordering};

/// State of an interrupt worker.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum IsrState {
    /// No worker.
    Idle = 0,
    /// Worker is blocked waiting for the next event.
    Armed = 1,
    /// Worker is running the user callback.
    Triggering = 2,
    /// Disarm requested; the worker is shutting down.
    Terminating = 3,
}

impl IsrState {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            1 => IsrState::Armed,
            2 => IsrState::Triggering,
            3 => IsrState::Terminating,
            _ => IsrState::Idle,
        }
    }
}

/// [`IsrState`] shared between a context and its worker thread.
#[derive(Debug)]
pub struct AtomicIsrState(AtomicU8);

impl AtomicIsrState {
    pub const fn new(state: IsrState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    pub fn load(&self) -> IsrState {
        IsrState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn store(&self, state: IsrState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Move from `current` to `new`; fails if another transition won.
    pub fn transition(&self, current: IsrState, new: IsrState) -> bool {
        self.0
            .compare_exchange(current as u8, new as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition() {
        let state = AtomicIsrState::new(IsrState::Armed);
        assert!(state.transition(IsrState::Armed, IsrState::Triggering));
        assert!(!state.transition(IsrState::Armed, IsrState::Triggering));
        assert_eq!(state.load(), IsrState::Triggering);
    }
}
