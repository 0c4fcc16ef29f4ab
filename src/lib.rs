//! vigild — a deterministic daemon process supervisor.
//!
//! Turns a user-supplied long-running workload into a correctly-behaved
//! background process: daemonizes, writes and validates a PID file, drops
//! privileges, traps termination signals, and guarantees the process exits
//! within a bounded time even when the workload ignores cooperative
//! shutdown.
//!
//! ```no_run
//! use std::time::Duration;
//! use vigild::{Capabilities, CancelToken, Workload};
//!
//! struct MyDaemon;
//!
//! impl Workload for MyDaemon {
//!     fn start(&self, shutdown: &CancelToken) -> anyhow::Result<()> {
//!         while !shutdown.wait_timeout(Duration::from_secs(1)) {
//!             // do one unit of work
//!         }
//!         Ok(())
//!     }
//!
//!     fn capabilities(&self) -> Capabilities {
//!         Capabilities { stop: true, ..Capabilities::default() }
//!     }
//!
//!     fn stop(&self) -> anyhow::Result<()> {
//!         // request the loop above to wind down; must be idempotent
//!         Ok(())
//!     }
//! }
//!
//! fn main() {
//!     vigild::process(MyDaemon)
//! }
//! ```

pub mod cli;
pub mod config;
mod daemonize;
pub mod exit;
pub mod join;
pub mod pidfile;
mod privileges;
pub mod reaper;
pub mod signals;
pub mod state;
pub mod supervisor;
pub mod sync;
pub mod thread;
pub mod workload;

pub use config::{Cmd, DaemonConfig};
pub use supervisor::{Supervisor, process, run_from_args};
pub use sync::{CancelToken, Cancelled};
pub use workload::{Capabilities, Workload};
