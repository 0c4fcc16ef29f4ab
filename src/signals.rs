//! Termination signal traps. The handler only records the signal number;
//! a supervisor-owned dispatcher thread consumes it outside handler
//! context, where blocking calls are allowed.

use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{Context, Result};
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// Signals that request daemon termination: interrupt, kill, abort and
/// terminal hang-up.
pub const TERMINATION_SIGNALS: [Signal; 4] = [
    Signal::SIGINT,
    Signal::SIGTERM,
    Signal::SIGABRT,
    Signal::SIGHUP,
];

// A plain store is the only async-signal-safe thing the handler does.
static PENDING: AtomicUsize = AtomicUsize::new(0);

extern "C" fn note_signal(sig: i32) {
    PENDING.store(sig as usize, Ordering::SeqCst);
}

/// Consume the most recently recorded termination signal, if any.
pub fn take_pending() -> Option<Signal> {
    let val = PENDING.swap(0, Ordering::AcqRel);
    if val == 0 {
        None
    } else {
        Signal::try_from(val as i32).ok()
    }
}

/// Installed traps; default handlers are restored when this is dropped, on
/// every exit path.
pub struct SignalTraps {
    _private: (),
}

impl SignalTraps {
    pub fn install() -> Result<Self> {
        let action = SigAction::new(
            SigHandler::Handler(note_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        for sig in TERMINATION_SIGNALS {
            // SAFETY: note_signal only stores to an atomic.
            unsafe { signal::sigaction(sig, &action) }
                .with_context(|| format!("failed to trap {sig:?}"))?;
        }
        Ok(Self { _private: () })
    }
}

impl Drop for SignalTraps {
    fn drop(&mut self) {
        let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
        for sig in TERMINATION_SIGNALS {
            // SAFETY: restores the default disposition.
            let _ = unsafe { signal::sigaction(sig, &default) };
        }
    }
}
