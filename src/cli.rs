//! Builtin option surface, extensible by the workload before the single
//! strict validation pass.

use std::ffi::OsString;
use std::path::PathBuf;

use clap::{Arg, ArgMatches, Command, value_parser};

use crate::workload::Workload;

pub const COMMANDS: [&str; 4] = ["run", "start", "stop", "restart"];
pub const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];

pub fn base_command(name: &str) -> Command {
    Command::new(name.to_owned())
        .about("daemon process supervisor")
        .arg(
            Arg::new("COMMAND")
                .value_parser(COMMANDS)
                .default_value("run")
                .help("Supervisor command"),
        )
        .arg(
            Arg::new("name")
                .long("name")
                .help("Daemon name, used for pid and log file naming"),
        )
        .arg(
            Arg::new("working-dir")
                .long("working-dir")
                .value_parser(value_parser!(PathBuf))
                .help("Working directory, defaults to ."),
        )
        .arg(
            Arg::new("pid-dir")
                .long("pid-dir")
                .value_parser(value_parser!(PathBuf))
                .help("PID directory, relative to working-dir; defaults to 'log', falls back to '.'"),
        )
        .arg(
            Arg::new("pid-file")
                .long("pid-file")
                .value_parser(value_parser!(PathBuf))
                .help("PID file, defaults to <name>.pid; may be an absolute path"),
        )
        .arg(Arg::new("user").long("user").help("Run as user"))
        .arg(Arg::new("group").long("group").help("Run as group"))
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .value_parser(LOG_LEVELS)
                .default_value("info")
                .help("Log level"),
        )
        .arg(
            Arg::new("log-dir")
                .long("log-dir")
                .value_parser(value_parser!(PathBuf))
                .help("Log directory, relative to working-dir; defaults to 'log', falls back to '.'"),
        )
        .arg(
            Arg::new("log-file")
                .long("log-file")
                .value_parser(value_parser!(PathBuf))
                .help("Log file, defaults to <name>.log; may be an absolute path"),
        )
        .arg(
            Arg::new("term-timeout")
                .long("term-timeout")
                .value_parser(value_parser!(u64))
                .default_value("30")
                .help("Termination timeout in seconds; 0 disables the watchdog"),
        )
}

/// Builtin options, extended by the workload when it declares the
/// capability, then validated strictly in one pass. Flag position does
/// not matter: builtin and workload options may be interleaved freely.
pub fn parse<W: Workload>(
    name: &str,
    workload: &W,
    argv: &[OsString],
) -> Result<ArgMatches, clap::Error> {
    let mut cmd = base_command(name);
    if workload.capabilities().options {
        cmd = workload.define_options(cmd);
    }
    cmd.try_get_matches_from(argv)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::CancelToken;
    use crate::workload::Capabilities;

    struct Extending;

    impl Workload for Extending {
        fn start(&self, _shutdown: &CancelToken) -> anyhow::Result<()> {
            Ok(())
        }

        fn capabilities(&self) -> Capabilities {
            Capabilities {
                options: true,
                ..Capabilities::default()
            }
        }

        fn define_options(&self, cmd: Command) -> Command {
            cmd.arg(Arg::new("foo").long("foo").help("Foo option"))
        }
    }

    fn argv(args: &[&str]) -> Vec<OsString> {
        std::iter::once("testd")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn sees_workload_options() {
        let matches = parse("testd", &Extending, &argv(&["start", "--foo", "bar"]))
            .expect("parse failed");
        assert_eq!(
            matches.get_one::<String>("foo").map(String::as_str),
            Some("bar")
        );
        assert_eq!(
            matches.get_one::<String>("COMMAND").map(String::as_str),
            Some("start")
        );
    }

    #[test]
    fn rejects_unknown_flags() {
        assert!(parse("testd", &Extending, &argv(&["--no-such-flag"])).is_err());
    }

    #[test]
    fn builtin_flags_are_recorded_regardless_of_position() {
        // Privilege and chdir flags must survive even when a
        // workload-defined flag precedes them on the command line.
        let matches = parse(
            "testd",
            &Extending,
            &argv(&["run", "--foo", "x", "--user", "nobody", "--working-dir", "/tmp"]),
        )
        .expect("parse failed");
        assert_eq!(
            matches.get_one::<String>("user").map(String::as_str),
            Some("nobody")
        );
        assert_eq!(
            matches.get_one::<PathBuf>("working-dir"),
            Some(&PathBuf::from("/tmp"))
        );
    }

    #[test]
    fn command_defaults_to_run_and_timeout_to_thirty() {
        let matches = parse("testd", &Extending, &argv(&[])).expect("parse failed");
        assert_eq!(
            matches.get_one::<String>("COMMAND").map(String::as_str),
            Some("run")
        );
        assert_eq!(matches.get_one::<u64>("term-timeout"), Some(&30));
    }
}
