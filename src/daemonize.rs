//! Background detachment for the start command: double-fork, new session,
//! sensible umask, stdio pointed at the daemon's output file.

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::path::Path;

use anyhow::{Context, Result};
use nix::sys::stat::{Mode, umask};
use nix::unistd::{ForkResult, fork, setsid};

/// Detach from the controlling terminal. The parent halves exit
/// immediately; only the fully detached grandchild returns. Must run
/// before the supervisor spawns any thread: fork in a threaded process is
/// not safe.
pub fn detach(output_file: &Path) -> Result<()> {
    fork_and_exit_parent().context("first fork failed")?;
    setsid().context("setsid failed")?;
    // Second fork zaps session leadership so the daemon can never
    // reacquire a controlling terminal.
    fork_and_exit_parent().context("second fork failed")?;

    umask(Mode::from_bits_truncate(0o022));

    let stdin = File::open("/dev/null").context("opening /dev/null")?;
    let output = OpenOptions::new()
        .create(true)
        .append(true)
        .open(output_file)
        .with_context(|| format!("opening daemon output {}", output_file.display()))?;

    redirect(stdin.as_raw_fd(), libc::STDIN_FILENO)?;
    redirect(output.as_raw_fd(), libc::STDOUT_FILENO)?;
    redirect(output.as_raw_fd(), libc::STDERR_FILENO)?;
    Ok(())
}

fn fork_and_exit_parent() -> Result<()> {
    // SAFETY: the supervisor has not spawned any helper thread yet.
    match unsafe { fork() }.context("fork failed")? {
        ForkResult::Parent { .. } => std::process::exit(0),
        ForkResult::Child => Ok(()),
    }
}

fn redirect(from: i32, to: i32) -> Result<()> {
    // SAFETY: both descriptors are open and owned by this process.
    if unsafe { libc::dup2(from, to) } == -1 {
        return Err(std::io::Error::last_os_error()).context("dup2 failed");
    }
    Ok(())
}
