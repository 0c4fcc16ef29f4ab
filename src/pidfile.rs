//! PID file handling. Exclusion is advisory: a liveness probe on the
//! recorded pid decides whether an existing file is a conflict or stale
//! leftover from an unclean shutdown.

use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use nix::unistd::{Pid, getpgid};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PidFileError {
    #[error("daemon already running with pid {pid} (pid file {path})")]
    Conflict { pid: i32, path: PathBuf },

    #[error("malformed pid file {path}: {contents:?}")]
    Malformed { path: PathBuf, contents: String },

    #[error("pid file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Scoped pid file: created with the current process id, removed on drop
/// no matter how the owning scope exits.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create the file. An existing file naming a live process is a
    /// conflict; a stale one is overwritten with a warning.
    pub fn create(path: &Path) -> Result<Self, PidFileError> {
        if path.exists() {
            let pid = read(path)?;
            if is_alive(pid) {
                return Err(PidFileError::Conflict {
                    pid,
                    path: path.to_owned(),
                });
            }
            warn!(
                "found stale pid file {} (pid {pid}), possibly an unclean shutdown; overwriting",
                path.display()
            );
        }

        fs::write(path, std::process::id().to_string()).map_err(|source| PidFileError::Io {
            path: path.to_owned(),
            source,
        })?;
        Ok(Self {
            path: path.to_owned(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        remove(&self.path);
    }
}

/// Best-effort removal, shared by the scoped drop and the forced-exit
/// paths, which terminate the process without unwinding.
pub fn remove(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!("could not remove pid file {}: {err}", path.display());
    }
}

/// Read the recorded pid, for the stop command.
pub fn read(path: &Path) -> Result<i32, PidFileError> {
    let contents = fs::read_to_string(path).map_err(|source| PidFileError::Io {
        path: path.to_owned(),
        source,
    })?;
    contents
        .trim()
        .parse::<i32>()
        .map_err(|_| PidFileError::Malformed {
            path: path.to_owned(),
            contents,
        })
}

/// Can the pid's process group be signalled? ESRCH means it is gone.
pub fn is_alive(pid: i32) -> bool {
    getpgid(Some(Pid::from_raw(pid))).is_ok()
}
