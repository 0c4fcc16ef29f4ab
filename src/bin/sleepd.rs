//! Minimal example daemon: sleeps until asked to stop, exercising every
//! optional hook. Useful for poking the supervisor by hand:
//!
//!   sleepd start --pid-dir /tmp --log-dir /tmp
//!   sleepd stop  --pid-dir /tmp

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Result;
use log::info;
use vigild::{Capabilities, CancelToken, Workload};

#[derive(Default)]
struct Sleepd {
    stop_requested: AtomicBool,
}

impl Workload for Sleepd {
    fn start(&self, shutdown: &CancelToken) -> Result<()> {
        info!("sleepd started");
        while !self.stop_requested.load(Ordering::SeqCst)
            && !shutdown.wait_timeout(Duration::from_millis(200))
        {}
        info!("sleepd winding down");
        Ok(())
    }

    fn name(&self) -> Option<&str> {
        Some("sleepd")
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            stop: true,
            stopper_thread: true,
            cleanup: true,
            ..Capabilities::default()
        }
    }

    fn stop(&self) -> Result<()> {
        self.stop_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stopper_thread(&self) -> Result<()> {
        info!("sleepd stopper thread resumed");
        self.stop_requested.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn cleanup_before_exit(&self) -> Result<()> {
        info!("sleepd cleanup");
        Ok(())
    }
}

fn main() {
    vigild::process(Sleepd::default())
}
