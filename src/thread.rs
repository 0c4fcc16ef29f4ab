//! Guarded thread spawning: the only sanctioned way this subsystem creates
//! helper threads. No failure is silently dropped, none propagates as an
//! unhandled fault.

use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::AtomicBool;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::anyhow;
use log::error;

use crate::join::{JoinOutcome, JoinTimeout, WaitHandle, completion};
use crate::reaper::Reapable;
use crate::sync::{CancelToken, Cancelled};

/// Invoked with the failure after it has been logged. Runs guarded; a
/// panicking handler cannot take the spawner down.
pub type FatalHandler = Box<dyn FnOnce(&anyhow::Error) + Send + 'static>;

pub struct GuardedThread {
    name: String,
    handle: Option<JoinHandle<()>>,
    wait: WaitHandle,
    reaped: AtomicBool,
}

impl GuardedThread {
    /// Spawn `body` with its own cancellation token. A `Cancelled` error is
    /// the expected outcome of deliberate cancellation and is swallowed;
    /// any other error or panic is logged with its full cause chain and
    /// then handed to `on_fatal` if one was supplied.
    pub fn spawn<F>(name: &str, on_fatal: Option<FatalHandler>, body: F) -> std::io::Result<Self>
    where
        F: FnOnce(&CancelToken) -> anyhow::Result<()> + Send + 'static,
    {
        let token = CancelToken::new();
        let (guard, wait) = completion(token.clone());
        let label = name.to_string();

        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _guard = guard;
                let failure = match catch_unwind(AssertUnwindSafe(|| body(&token))) {
                    Ok(Ok(())) => return,
                    Ok(Err(err)) if err.is::<Cancelled>() => return,
                    Ok(Err(err)) => err,
                    Err(panic) => anyhow!("{label}: panicked: {}", panic_message(&panic)),
                };

                error!("{label}: {failure:#}");
                if let Some(handler) = on_fatal
                    && catch_unwind(AssertUnwindSafe(|| handler(&failure))).is_err()
                {
                    error!("{label}: fatal handler panicked while handling the failure above");
                }
            })?;

        Ok(Self {
            name: name.to_string(),
            handle: Some(handle),
            wait,
            reaped: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn wait_handle(&self) -> &WaitHandle {
        &self.wait
    }

    /// Deliver the must-terminate signal to the thread's token.
    pub fn request_stop(&self) {
        self.wait.token().cancel();
    }

    /// Block until the thread has exited. Body failures were already
    /// funneled through the guard, so there is nothing to collect here.
    pub fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Reapable for GuardedThread {
    fn label(&self) -> &str {
        &self.name
    }

    fn reaped_marker(&self) -> Option<&AtomicBool> {
        Some(&self.reaped)
    }

    fn request_stop(&self) {
        GuardedThread::request_stop(self);
    }

    fn join_within(&self, timeout: Duration) -> Result<JoinOutcome, JoinTimeout> {
        self.wait.join_within(timeout, None)
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
