//! The workload contract. The supervisor branches on an explicit
//! capability descriptor; hooks whose capability is not declared are never
//! called.

use anyhow::Result;
use clap::{ArgMatches, Command};

use crate::sync::CancelToken;

/// Which optional hooks the workload provides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// `define_options` / `apply_options` participate in option
    /// resolution.
    pub options: bool,
    /// `stop` is called on the termination-dispatch path.
    pub stop: bool,
    /// `stopper_thread` runs on a dedicated parked helper thread.
    pub stopper_thread: bool,
    /// `cleanup_before_exit` runs once after `start` returns.
    pub cleanup: bool,
}

/// A long-running unit of work managed by the supervisor.
///
/// Hooks take `&self` because they are called from several threads; keep
/// mutable state behind interior mutability.
pub trait Workload: Send + Sync + 'static {
    /// Blocking entry point, run on the supervisor's calling thread for
    /// the life of the daemon. `shutdown` fires when a bounded join
    /// escalates; long-running loops should check it at safe points.
    fn start(&self, shutdown: &CancelToken) -> Result<()>;

    /// Label used for pid and log file naming when `--name` is not given.
    fn name(&self) -> Option<&str> {
        None
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Extend the builtin option surface before final parsing.
    fn define_options(&self, cmd: Command) -> Command {
        cmd
    }

    /// Consume the fully parsed options.
    fn apply_options(&self, _matches: &ArgMatches) -> Result<()> {
        Ok(())
    }

    /// Cooperative stop, invoked by the termination dispatch. Must be safe
    /// to call more than once over the life of the process.
    fn stop(&self) -> Result<()> {
        Ok(())
    }

    /// Cooperative stop that may block; runs on its own helper thread so a
    /// slow stop never stalls the dispatch path.
    fn stopper_thread(&self) -> Result<()> {
        Ok(())
    }

    /// Runs once after `start` returns, whatever the outcome.
    fn cleanup_before_exit(&self) -> Result<()> {
        Ok(())
    }
}
