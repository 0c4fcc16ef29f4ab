//! Cancellation and park/resume primitives shared by the helper threads.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded, select};
use thiserror::Error;

/// The canonical "must stop now" signal. A thread body that observes its
/// token cancelled unwinds with this; the spawner swallows it silently.
#[derive(Debug, Error)]
#[error("thread received a must-terminate cancellation")]
pub struct Cancelled;

struct TokenShared {
    fired: AtomicBool,
    // Dropping the sender disconnects every receiver clone, waking any
    // thread blocked on the token.
    keep_open: Mutex<Option<Sender<()>>>,
}

/// Cancellation token observed cooperatively at safe points. Cloning yields
/// another handle to the same token.
#[derive(Clone)]
pub struct CancelToken {
    shared: Arc<TokenShared>,
    closed: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded::<()>(0);
        Self {
            shared: Arc::new(TokenShared {
                fired: AtomicBool::new(false),
                keep_open: Mutex::new(Some(tx)),
            }),
            closed: rx,
        }
    }

    /// Fire the token. Idempotent; wakes every blocked observer.
    pub fn cancel(&self) {
        self.shared.fired.store(true, Ordering::SeqCst);
        let mut guard = self
            .shared
            .keep_open
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        guard.take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.fired.load(Ordering::SeqCst)
    }

    /// Channel that disconnects once the token fires; usable in `select!`.
    pub fn channel(&self) -> &Receiver<()> {
        &self.closed
    }

    /// Block up to `timeout`. Returns true once the token has fired.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        match self.closed.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            _ => self.is_cancelled(),
        }
    }

    pub fn bail_if_cancelled(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() { Err(Cancelled) } else { Ok(()) }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Resume side of a park gate. Opening an already-open gate, or a gate
/// whose thread is gone, is a no-op.
#[derive(Clone)]
pub struct GateOpener {
    tx: Sender<()>,
}

impl GateOpener {
    pub fn open(&self) {
        let _ = self.tx.try_send(());
    }
}

/// Park side of the gate: a helper thread blocks here immediately after
/// spawning, doing no work until resumed.
pub struct Gate {
    rx: Receiver<()>,
}

impl Gate {
    /// Park until resumed. Cancellation of `token` (or loss of every
    /// opener) unparks with `Cancelled` instead.
    pub fn wait(&self, token: &CancelToken) -> Result<(), Cancelled> {
        select! {
            recv(self.rx) -> msg => match msg {
                Ok(()) => Ok(()),
                Err(_) => Err(Cancelled),
            },
            recv(token.channel()) -> _ => Err(Cancelled),
        }
    }
}

pub fn gate() -> (GateOpener, Gate) {
    let (tx, rx) = bounded(1);
    (GateOpener { tx }, Gate { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn token_fires_once_and_wakes_waiters() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert!(!token.wait_timeout(Duration::from_millis(10)));

        token.cancel();
        token.cancel(); // idempotent
        assert!(token.is_cancelled());
        assert!(token.wait_timeout(Duration::from_millis(10)));
        assert!(token.bail_if_cancelled().is_err());
    }

    #[test]
    fn token_clone_observes_cancel() {
        let token = CancelToken::new();
        let observer = token.clone();
        let waiter = thread::spawn(move || observer.wait_timeout(Duration::from_secs(5)));
        token.cancel();
        assert!(waiter.join().expect("waiter panicked"));
    }

    #[test]
    fn gate_resumes_parked_thread() {
        let (opener, gate) = gate();
        let token = CancelToken::new();
        let parked = thread::spawn(move || gate.wait(&token));
        opener.open();
        assert!(parked.join().expect("parked thread panicked").is_ok());
    }

    #[test]
    fn gate_open_is_idempotent() {
        let (opener, gate) = gate();
        opener.open();
        opener.open();
        opener.open();
        let token = CancelToken::new();
        assert!(gate.wait(&token).is_ok());
    }

    #[test]
    fn gate_unparks_on_cancellation() {
        let (_opener, gate) = gate();
        let token = CancelToken::new();
        let observer = token.clone();
        let start = Instant::now();
        let parked = thread::spawn(move || gate.wait(&observer));
        thread::sleep(Duration::from_millis(20));
        token.cancel();
        assert!(parked.join().expect("parked thread panicked").is_err());
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn gate_unparks_when_opener_is_gone() {
        let (opener, gate) = gate();
        drop(opener);
        let token = CancelToken::new();
        assert!(gate.wait(&token).is_err());
    }
}
