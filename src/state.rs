//! Supervisor lifecycle state.

use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProcessState {
    Initializing = 0,
    Running = 1,
    Stopping = 2,
    Terminated = 3,
}

/// Shared lifecycle cell. The only contended edge is `Running → Stopping`,
/// taken by compare-exchange so a second termination signal can never
/// restart the shutdown sequence.
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(ProcessState::Initializing as u8))
    }

    pub fn get(&self) -> ProcessState {
        match self.0.load(Ordering::SeqCst) {
            0 => ProcessState::Initializing,
            1 => ProcessState::Running,
            2 => ProcessState::Stopping,
            _ => ProcessState::Terminated,
        }
    }

    /// Entered once the pid file exists and traps are installed.
    pub fn set_running(&self) {
        self.0.store(ProcessState::Running as u8, Ordering::SeqCst);
    }

    /// `Running → Stopping`. Returns false when the shutdown is already
    /// under way; re-entrant dispatch attempts are ignored, not restarted.
    pub fn begin_stopping(&self) -> bool {
        self.0
            .compare_exchange(
                ProcessState::Running as u8,
                ProcessState::Stopping as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
    }

    pub fn set_terminated(&self) {
        self.0
            .store(ProcessState::Terminated as u8, Ordering::SeqCst);
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn follows_the_lifecycle() {
        let state = StateCell::new();
        assert_eq!(state.get(), ProcessState::Initializing);
        state.set_running();
        assert_eq!(state.get(), ProcessState::Running);
        assert!(state.begin_stopping());
        assert_eq!(state.get(), ProcessState::Stopping);
        state.set_terminated();
        assert_eq!(state.get(), ProcessState::Terminated);
    }

    #[test]
    fn stopping_transition_is_idempotent() {
        let state = StateCell::new();
        state.set_running();
        assert!(state.begin_stopping());
        assert!(!state.begin_stopping());
        assert!(!state.begin_stopping());
        assert_eq!(state.get(), ProcessState::Stopping);
    }

    #[test]
    fn cannot_begin_stopping_before_running() {
        let state = StateCell::new();
        assert!(!state.begin_stopping());
        assert_eq!(state.get(), ProcessState::Initializing);
    }
}
