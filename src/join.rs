//! Escalating join: wait for a unit of work within a soft deadline,
//! escalate to cancellation, then give up for good. The primitive never
//! blocks beyond `timeout + escalation`.

use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError, bounded};
use thiserror::Error;

use crate::sync::CancelToken;

/// Above this, the cancellation grace shrinks to 10% of the primary
/// timeout; below it, 20%.
const LONG_TIMEOUT: Duration = Duration::from_secs(30);

pub fn default_escalation(timeout: Duration) -> Duration {
    if timeout > LONG_TIMEOUT {
        timeout.mul_f64(0.1)
    } else {
        timeout.mul_f64(0.2)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    /// Finished within the primary timeout; no cancellation was sent.
    Completed,
    /// Finished only after the cancellation signal, within the grace
    /// period.
    CancelledThenCompleted,
}

/// The unit of work outlived both the primary timeout and the grace
/// period. Callers must treat it as permanently stuck.
#[derive(Debug, Error)]
#[error(
    "work did not terminate after {timeout:?} join timeout and {escalation:?} cancellation grace"
)]
pub struct JoinTimeout {
    pub timeout: Duration,
    pub escalation: Duration,
}

/// Completion half held by the running work. Dropping it, normally or by
/// unwinding, marks the work finished.
pub struct CompletionGuard {
    _keep_open: Sender<()>,
}

/// Observer half of the latch, paired with the work's cancellation token.
#[derive(Clone)]
pub struct WaitHandle {
    done: Receiver<()>,
    token: CancelToken,
}

/// Build a completion latch for work cancellable via `token`.
pub fn completion(token: CancelToken) -> (CompletionGuard, WaitHandle) {
    let (tx, rx) = bounded::<()>(0);
    (CompletionGuard { _keep_open: tx }, WaitHandle { done: rx, token })
}

impl WaitHandle {
    pub fn token(&self) -> &CancelToken {
        &self.token
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Wait up to `timeout` for natural completion. On expiry, cancel the
    /// token and wait up to the escalation grace (defaulted from the
    /// timeout when not given). Work already finished before the call
    /// returns `Completed` immediately without any cancellation.
    pub fn join_within(
        &self,
        timeout: Duration,
        escalation: Option<Duration>,
    ) -> Result<JoinOutcome, JoinTimeout> {
        match self.done.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return Ok(JoinOutcome::Completed),
            Err(RecvTimeoutError::Timeout) => {}
        }

        let escalation = escalation.unwrap_or_else(|| default_escalation(timeout));
        self.token.cancel();
        match self.done.recv_timeout(escalation) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                Ok(JoinOutcome::CancelledThenCompleted)
            }
            Err(RecvTimeoutError::Timeout) => Err(JoinTimeout {
                timeout,
                escalation,
            }),
        }
    }
}
