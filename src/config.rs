//! Resolved daemon configuration, built once from the parsed options and
//! immutable after startup.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::ArgMatches;
use log::LevelFilter;

/// Supervisor command requested on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cmd {
    /// Foreground operation, logging to stdout.
    Run,
    /// Daemonized background operation.
    Start,
    /// Terminate a previously started daemon via its pid file.
    Stop,
    /// Stop, then start.
    Restart,
}

impl Cmd {
    fn from_str(value: &str) -> Option<Self> {
        match value {
            "run" => Some(Self::Run),
            "start" => Some(Self::Start),
            "stop" => Some(Self::Stop),
            "restart" => Some(Self::Restart),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub name: String,
    pub command: Cmd,
    pub pid_file: PathBuf,
    pub log_file: PathBuf,
    pub log_level: LevelFilter,
    /// None disables the watchdog.
    pub term_timeout: Option<Duration>,
    pub user: Option<String>,
    pub group: Option<String>,
}

impl DaemonConfig {
    /// Build the final record from the second-pass matches. The name falls
    /// back from `--name` to the workload's label to the binary name, and
    /// pid/log paths are resolved relative to the preferred artifact
    /// directory.
    pub fn resolve(
        matches: &ArgMatches,
        workload_name: Option<&str>,
        fallback_name: &str,
    ) -> Result<Self> {
        let name = matches
            .get_one::<String>("name")
            .map(String::as_str)
            .or(workload_name)
            .unwrap_or(fallback_name)
            .to_string();

        let command = matches
            .get_one::<String>("COMMAND")
            .and_then(|raw| Cmd::from_str(raw))
            .context("missing or unknown COMMAND")?;

        let pid_file = resolve_artifact(
            matches.get_one::<PathBuf>("pid-file").map(PathBuf::as_path),
            matches.get_one::<PathBuf>("pid-dir").map(PathBuf::as_path),
            format!("{name}.pid"),
        );
        let log_file = resolve_artifact(
            matches.get_one::<PathBuf>("log-file").map(PathBuf::as_path),
            matches.get_one::<PathBuf>("log-dir").map(PathBuf::as_path),
            format!("{name}.log"),
        );

        let log_level = matches
            .get_one::<String>("log-level")
            .map(String::as_str)
            .unwrap_or("info")
            .parse::<LevelFilter>()
            .context("bad log level")?;

        let term_timeout = match matches.get_one::<u64>("term-timeout").copied().unwrap_or(30) {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };

        Ok(Self {
            name,
            command,
            pid_file,
            log_file,
            log_level,
            term_timeout,
            user: matches.get_one::<String>("user").cloned(),
            group: matches.get_one::<String>("group").cloned(),
        })
    }
}

/// An absolute file path wins outright. A relative one lands in the
/// preferred artifact directory, which falls back to the working directory
/// when it does not exist.
fn resolve_artifact(
    explicit: Option<&Path>,
    dir: Option<&Path>,
    default_file: String,
) -> PathBuf {
    let dir = preferred_dir(dir);
    match explicit {
        Some(path) if path.is_absolute() => path.to_owned(),
        Some(path) => dir.join(path),
        None => dir.join(default_file),
    }
}

fn preferred_dir(requested: Option<&Path>) -> PathBuf {
    let dir = requested.unwrap_or(Path::new("log"));
    if dir.is_dir() {
        dir.to_owned()
    } else {
        PathBuf::from(".")
    }
}
