//! Serialized background termination of concurrent work. One worker drains
//! one queue, so termination attempts never run concurrently with each
//! other and the shutdown critical path never waits on a victim itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::debug;

use crate::join::{JoinOutcome, JoinTimeout};
use crate::thread::{FatalHandler, GuardedThread};

/// A unit of concurrent work the reaper knows how to terminate.
pub trait Reapable: Send + Sync {
    fn label(&self) -> &str;

    /// Dedup marker. Victims exposing one are terminated at most once no
    /// matter how often they are enqueued; victims without one are
    /// processed every time.
    fn reaped_marker(&self) -> Option<&AtomicBool> {
        None
    }

    /// Deliver the must-terminate signal.
    fn request_stop(&self);

    /// Bounded wait for the victim to finish, escalating per the join
    /// contract.
    fn join_within(&self, timeout: Duration) -> Result<JoinOutcome, JoinTimeout>;
}

// None is the stop sentinel: drain what is queued, then exit.
type Duty = Option<(Arc<dyn Reapable>, String)>;

pub struct ThreadReaper {
    queue: Sender<Duty>,
    worker: GuardedThread,
}

impl ThreadReaper {
    /// `join_timeout` bounds each victim. A victim that outlives it is
    /// fatal to the whole process: the reaper is the last line of defense,
    /// not a tolerant background cleaner. `on_fatal` receives the deadline
    /// miss and is expected to force the exit.
    pub fn new(join_timeout: Duration, on_fatal: FatalHandler) -> std::io::Result<Self> {
        let (queue, duties) = unbounded::<Duty>();
        let worker = GuardedThread::spawn("thread-reaper", Some(on_fatal), move |_| {
            drain(&duties, join_timeout)
        })?;
        Ok(Self { queue, worker })
    }

    /// Enqueue a termination request. Non-blocking.
    pub fn push(&self, victim: Arc<dyn Reapable>, reason: impl Into<String>) {
        let _ = self.queue.send(Some((victim, reason.into())));
    }

    /// Ask the reaper to stop once everything enqueued so far is drained.
    pub fn terminate(&self) {
        let _ = self.queue.send(None);
    }

    /// Block until the reaper's own thread has exited.
    pub fn join(self) {
        self.worker.join();
    }
}

fn drain(duties: &Receiver<Duty>, join_timeout: Duration) -> anyhow::Result<()> {
    while let Ok(Some((victim, reason))) = duties.recv() {
        if let Some(marker) = victim.reaped_marker()
            && marker.swap(true, Ordering::SeqCst)
        {
            continue;
        }

        victim.request_stop();
        let outcome = victim
            .join_within(join_timeout)
            .with_context(|| format!("reaping {} for {reason}", victim.label()))?;
        debug!("{} reaped for {reason} ({outcome:?})", victim.label());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct FakeVictim {
        name: String,
        marker: Option<AtomicBool>,
        stops: AtomicUsize,
        order: Arc<Mutex<Vec<String>>>,
    }

    impl FakeVictim {
        fn new(name: &str, with_marker: bool, order: Arc<Mutex<Vec<String>>>) -> Arc<Self> {
            Arc::new(Self {
                name: name.to_string(),
                marker: with_marker.then(|| AtomicBool::new(false)),
                stops: AtomicUsize::new(0),
                order,
            })
        }
    }

    impl Reapable for FakeVictim {
        fn label(&self) -> &str {
            &self.name
        }

        fn reaped_marker(&self) -> Option<&AtomicBool> {
            self.marker.as_ref()
        }

        fn request_stop(&self) {
            self.stops.fetch_add(1, Ordering::SeqCst);
            self.order
                .lock()
                .expect("order lock poisoned")
                .push(self.name.clone());
        }

        fn join_within(&self, _timeout: Duration) -> Result<JoinOutcome, JoinTimeout> {
            Ok(JoinOutcome::Completed)
        }
    }

    fn reaper() -> ThreadReaper {
        ThreadReaper::new(Duration::from_secs(1), Box::new(|_| {})).expect("reaper spawn failed")
    }

    #[test]
    fn marked_victim_is_terminated_exactly_once() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let victim = FakeVictim::new("worker", true, Arc::clone(&order));

        let reaper = reaper();
        reaper.push(Arc::clone(&victim) as Arc<dyn Reapable>, "first push");
        reaper.push(Arc::clone(&victim) as Arc<dyn Reapable>, "second push");
        reaper.terminate();
        reaper.join();

        assert_eq!(victim.stops.load(Ordering::SeqCst), 1);
        assert!(victim.marker.as_ref().is_some_and(|m| m.load(Ordering::SeqCst)));
    }

    #[test]
    fn markerless_victim_is_always_processed() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let victim = FakeVictim::new("plain", false, Arc::clone(&order));

        let reaper = reaper();
        reaper.push(Arc::clone(&victim) as Arc<dyn Reapable>, "first push");
        reaper.push(Arc::clone(&victim) as Arc<dyn Reapable>, "second push");
        reaper.terminate();
        reaper.join();

        assert_eq!(victim.stops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn victims_are_reaped_in_arrival_order() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let first = FakeVictim::new("first", true, Arc::clone(&order));
        let second = FakeVictim::new("second", true, Arc::clone(&order));

        let reaper = reaper();
        reaper.push(first as Arc<dyn Reapable>, "shutdown");
        reaper.push(second as Arc<dyn Reapable>, "shutdown");
        reaper.terminate();
        reaper.join();

        let recorded = order.lock().expect("order lock poisoned");
        assert_eq!(recorded.as_slice(), ["first", "second"]);
    }

    #[test]
    fn reaps_a_real_guarded_thread() {
        let helper = Arc::new(
            GuardedThread::spawn("parked-helper", None, |token| {
                token.wait_timeout(Duration::from_secs(10));
                token.bail_if_cancelled()?;
                Ok(())
            })
            .expect("spawn failed"),
        );

        let reaper = reaper();
        reaper.push(Arc::clone(&helper) as Arc<dyn Reapable>, "test teardown");
        reaper.terminate();
        reaper.join();

        assert!(helper.wait_handle().is_finished());
    }
}
