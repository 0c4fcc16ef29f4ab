//! Watchdog forced exit, observed from outside. The test re-executes its
//! own binary as the daemon so the `process::exit(20)` backstop can be
//! asserted on without taking the test harness down.

use std::env;
use std::path::PathBuf;
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Result;
use log::LevelFilter;
use nix::sys::signal::{Signal, raise};
use vigild::exit;
use vigild::{Capabilities, CancelToken, Cmd, DaemonConfig, Supervisor, Workload};

const CHILD_PID_FILE: &str = "VIGILD_TEST_STUBBORN_PID_FILE";

/// Worst case: ignores its token, and its stop hook changes nothing.
struct Stubborn;

impl Workload for Stubborn {
    fn start(&self, _shutdown: &CancelToken) -> Result<()> {
        loop {
            thread::sleep(Duration::from_secs(60));
        }
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            stop: true,
            ..Capabilities::default()
        }
    }

    fn stop(&self) -> Result<()> {
        Ok(())
    }
}

fn run_stubborn_daemon(pid_file: PathBuf) -> ! {
    let cfg = DaemonConfig {
        name: "stubborn".to_string(),
        command: Cmd::Run,
        pid_file,
        log_file: env::temp_dir().join("stubborn.log"),
        log_level: LevelFilter::Info,
        term_timeout: Some(Duration::from_secs(1)),
        user: None,
        group: None,
    };
    let supervisor = Supervisor::new(Stubborn, cfg);

    thread::spawn(|| {
        thread::sleep(Duration::from_millis(200));
        let _ = raise(Signal::SIGTERM);
    });

    // The workload never returns; the watchdog must force the exit.
    let _ = supervisor.run();
    std::process::exit(99)
}

#[test]
fn stuck_workload_is_force_exited_within_the_bounded_window() {
    if let Ok(pid_file) = env::var(CHILD_PID_FILE) {
        run_stubborn_daemon(PathBuf::from(pid_file));
    }

    let dir = tempfile::tempdir().expect("tempdir failed");
    let pid_file = dir.path().join("stubborn.pid");

    let started = Instant::now();
    let status = Command::new(env::current_exe().expect("current_exe failed"))
        .arg("stuck_workload_is_force_exited_within_the_bounded_window")
        .arg("--exact")
        .arg("--nocapture")
        .env(CHILD_PID_FILE, &pid_file)
        .status()
        .expect("spawning the daemon child failed");
    let elapsed = started.elapsed();

    assert_eq!(status.code(), Some(exit::WATCHDOG));
    // Signal at ~200ms, then the 1s join plus the 200ms default
    // escalation; well under the bound even on a loaded machine.
    assert!(elapsed >= Duration::from_secs(1));
    assert!(elapsed < Duration::from_secs(10), "took {elapsed:?}");
    assert!(!pid_file.exists(), "pid file survived the forced exit");
}
