//! The daemon supervisor: option resolution, daemonization, pid file and
//! signal trap lifecycle, helper threads, and the bounded termination
//! protocol that guarantees the process exits no matter how the workload
//! behaves.

use std::ffi::OsString;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use clap::ArgMatches;
use log::{debug, error, info, warn};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::cli;
use crate::config::{Cmd, DaemonConfig};
use crate::daemonize;
use crate::exit;
use crate::join::completion;
use crate::pidfile::{self, PidFile, PidFileError};
use crate::privileges;
use crate::reaper::{Reapable, ThreadReaper};
use crate::signals::{self, SignalTraps};
use crate::state::StateCell;
use crate::sync::{CancelToken, Cancelled, GateOpener, gate};
use crate::thread::{FatalHandler, GuardedThread};
use crate::workload::Workload;

/// How often the dispatcher thread looks for a pending signal.
const SIGNAL_POLL: Duration = Duration::from_millis(100);
/// Bound on reaping each helper at shutdown when no termination timeout is
/// configured.
const DEFAULT_REAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Process a workload end to end: parse options, execute the requested
/// command, exit with the supervisor's status code. Never returns.
pub fn process<W: Workload>(workload: W) -> ! {
    let argv: Vec<OsString> = std::env::args_os().collect();
    exit::exit_now(run_from_args(workload, &argv))
}

/// The argv entry point, factored out of [`process`] so embedders can
/// supply their own argument vector.
pub fn run_from_args<W: Workload>(workload: W, argv: &[OsString]) -> i32 {
    let fallback_name = binary_stem(argv);

    let matches = match cli::parse(&fallback_name, &workload, argv) {
        Ok(matches) => matches,
        Err(err) => {
            let _ = err.print();
            return exit::OPTIONS_AFTER_EXTENSION;
        }
    };

    // Privileges and the working directory must settle before anything
    // touches the filesystem, and before relative paths are resolved.
    if let Err(err) = apply_initial_options(&matches) {
        return bootstrap_failure(&err);
    }

    let cfg = match DaemonConfig::resolve(&matches, workload.name(), &fallback_name) {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("{err:#}");
            return exit::OPTIONS_AFTER_EXTENSION;
        }
    };

    if workload.capabilities().options
        && let Err(err) = workload.apply_options(&matches)
    {
        eprintln!("{err:#}");
        return exit::RUN_FAILURE;
    }

    match execute(workload, cfg) {
        Ok(()) => exit::CLEAN,
        Err(err) => {
            error!("{err:#}");
            eprintln!("{err:#}");
            exit::RUN_FAILURE
        }
    }
}

fn execute<W: Workload>(workload: W, cfg: DaemonConfig) -> Result<()> {
    match cfg.command {
        Cmd::Run => {
            init_logger(&cfg, false)?;
            Supervisor::new(workload, cfg).run()
        }
        Cmd::Start => {
            daemonize::detach(&daemon_output_path(&cfg.log_file))?;
            init_logger(&cfg, true)?;
            Supervisor::new(workload, cfg).run()
        }
        Cmd::Stop => {
            init_logger(&cfg, false)?;
            stop_command(&cfg)
        }
        Cmd::Restart => {
            init_logger(&cfg, false)?;
            match stop_command(&cfg) {
                Ok(()) => wait_for_death(&cfg)?,
                Err(err) => warn!("{}: nothing to stop: {err:#}", cfg.name),
            }
            daemonize::detach(&daemon_output_path(&cfg.log_file))?;
            Supervisor::new(workload, cfg).run()
        }
    }
}

/// Deliver SIGTERM to the process recorded in the pid file.
fn stop_command(cfg: &DaemonConfig) -> Result<()> {
    match pidfile::read(&cfg.pid_file) {
        Ok(pid) if pidfile::is_alive(pid) => {
            signal::kill(Pid::from_raw(pid), Signal::SIGTERM)
                .with_context(|| format!("delivering SIGTERM to pid {pid}"))?;
            info!("{}: sent SIGTERM to pid {pid}", cfg.name);
            Ok(())
        }
        Ok(pid) => bail!("{} daemon with pid {pid} is not running", cfg.name),
        Err(PidFileError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            bail!(
                "{} daemon pid file ({}) not found; no daemon is running",
                cfg.name,
                cfg.pid_file.display()
            )
        }
        Err(err) => Err(err.into()),
    }
}

/// Restart support: give the old daemon its full termination window before
/// bringing up the new one.
fn wait_for_death(cfg: &DaemonConfig) -> Result<()> {
    let bound = cfg
        .term_timeout
        .map(|t| t + crate::join::default_escalation(t))
        .unwrap_or(DEFAULT_REAP_TIMEOUT);
    let deadline = Instant::now() + bound;

    loop {
        match pidfile::read(&cfg.pid_file) {
            Ok(pid) if pidfile::is_alive(pid) => {}
            _ => return Ok(()),
        }
        if Instant::now() >= deadline {
            bail!(
                "{}: previous daemon still alive after {bound:?}; refusing to restart",
                cfg.name
            );
        }
        thread::sleep(Duration::from_millis(50));
    }
}

pub struct Supervisor<W: Workload> {
    cfg: DaemonConfig,
    workload: Arc<W>,
    state: Arc<StateCell>,
}

impl<W: Workload> Supervisor<W> {
    pub fn new(workload: W, cfg: DaemonConfig) -> Self {
        Self {
            cfg,
            workload: Arc::new(workload),
            state: Arc::new(StateCell::new()),
        }
    }

    pub fn state(&self) -> &StateCell {
        &self.state
    }

    /// The daemon lifecycle. The pid file and signal traps are scoped
    /// resources: both are released on every exit path, success or
    /// failure.
    pub fn run(&self) -> Result<()> {
        let caps = self.workload.capabilities();
        let name = self.cfg.name.clone();
        info!("{name}: starting daemon");
        debug!("{name}: resolved configuration {:?}", self.cfg);

        let _pid_file = PidFile::create(&self.cfg.pid_file)
            .with_context(|| format!("{name}: could not claim pid file"))?;

        let wants_traps = caps.stop || caps.stopper_thread;
        let _traps = if wants_traps {
            let traps = SignalTraps::install()?;
            // Discard anything recorded before this daemon owned the traps.
            let _ = signals::take_pending();
            Some(traps)
        } else {
            None
        };

        // Completion latch for the main task; the watchdog joins this and
        // the token is the workload's cooperative shutdown signal.
        let shutdown = CancelToken::new();
        let (main_guard, main_wait) = completion(shutdown.clone());

        let mut helpers: Vec<Arc<GuardedThread>> = Vec::new();

        let stopper_gate = if caps.stopper_thread {
            let (opener, parked) = gate();
            let workload = Arc::clone(&self.workload);
            let label = format!("{name}#stopper_thread");
            let on_fatal = self.forced_exit_handler(exit::STOPPER);
            let helper = GuardedThread::spawn("stopper", Some(on_fatal), move |token| {
                parked.wait(token)?;
                workload.stopper_thread().context(label)
            })?;
            helpers.push(Arc::new(helper));
            Some(opener)
        } else {
            None
        };

        let watchdog_gate = if let Some(timeout) = self.cfg.term_timeout {
            let (opener, parked) = gate();
            let wait = main_wait.clone();
            let label = format!("{name}: watchdog");
            let on_fatal = self.forced_exit_handler(exit::WATCHDOG);
            let helper = GuardedThread::spawn("termination-watchdog", Some(on_fatal), move |token| {
                parked.wait(token)?;
                wait.join_within(timeout, None).context(label)?;
                Ok(())
            })?;
            helpers.push(Arc::new(helper));
            Some(opener)
        } else {
            None
        };

        self.state.set_running();
        info!("{name}: running (pid {})", std::process::id());

        if wants_traps {
            let targets = DispatchTargets {
                stopper: stopper_gate,
                watchdog: watchdog_gate,
                workload: Arc::clone(&self.workload),
                call_stop_hook: caps.stop,
            };
            let state = Arc::clone(&self.state);
            let label = name.clone();
            let on_fatal = self.forced_exit_handler(exit::DISPATCH);
            let helper = GuardedThread::spawn("signal-dispatcher", Some(on_fatal), move |token| {
                loop {
                    if token.wait_timeout(SIGNAL_POLL) {
                        return Err(Cancelled.into());
                    }
                    if let Some(sig) = signals::take_pending() {
                        info!("{label}: received {sig:?}; dispatching termination");
                        dispatch_termination(&state, &targets)
                            .with_context(|| format!("{label}: error while stopping"))?;
                    }
                }
            })?;
            helpers.push(Arc::new(helper));
        }

        // The workload owns the calling thread for the daemon's life.
        let outcome = self.workload.start(&shutdown);
        if let Err(err) = &outcome
            && !err.is::<Cancelled>()
        {
            error!("{name}#start: {err:#}");
        }

        if caps.cleanup {
            guarded(&format!("{name}#cleanup_before_exit"), || {
                self.workload.cleanup_before_exit()
            });
        }

        // The main task is complete; a resumed watchdog may now finish.
        drop(main_guard);

        self.reap_helpers(helpers)?;

        self.state.set_terminated();
        info!("{name}: daemon exited");

        match outcome {
            Err(err) if !err.is::<Cancelled>() => Err(err),
            _ => Ok(()),
        }
    }

    /// Forced exits bypass every `Drop`, so the handler deletes the pid
    /// file itself before reporting and exiting.
    fn forced_exit_handler(&self, code: i32) -> FatalHandler {
        let pid_file = self.cfg.pid_file.clone();
        Box::new(move |err| {
            pidfile::remove(&pid_file);
            exit::die(err, code, || log::logger().flush())
        })
    }

    /// Bounded teardown of every helper, in spawn order, off the calling
    /// thread's critical path.
    fn reap_helpers(&self, helpers: Vec<Arc<GuardedThread>>) -> Result<()> {
        if helpers.is_empty() {
            return Ok(());
        }
        let timeout = self.cfg.term_timeout.unwrap_or(DEFAULT_REAP_TIMEOUT);
        let reaper = ThreadReaper::new(timeout, self.forced_exit_handler(exit::RUN_FAILURE))?;
        for helper in helpers {
            reaper.push(helper as Arc<dyn Reapable>, "daemon exit");
        }
        reaper.terminate();
        reaper.join();
        Ok(())
    }
}

/// The three dispatch actions, behind a seam so tests can record their
/// order with instrumented fakes.
pub(crate) trait TerminationSink {
    fn resume_stopper(&self);
    fn resume_watchdog(&self);
    fn call_stop(&self) -> Result<()>;
}

struct DispatchTargets<W: Workload> {
    stopper: Option<GateOpener>,
    watchdog: Option<GateOpener>,
    workload: Arc<W>,
    call_stop_hook: bool,
}

impl<W: Workload> TerminationSink for DispatchTargets<W> {
    fn resume_stopper(&self) {
        if let Some(gate) = &self.stopper {
            gate.open();
        }
    }

    fn resume_watchdog(&self) {
        if let Some(gate) = &self.watchdog {
            gate.open();
        }
    }

    fn call_stop(&self) -> Result<()> {
        if self.call_stop_hook {
            self.workload.stop()
        } else {
            Ok(())
        }
    }
}

/// One termination dispatch: resume the stopper, resume the watchdog, call
/// the cooperative stop hook, in that fixed order. Re-entrant invocations
/// while a shutdown is in progress are ignored.
pub(crate) fn dispatch_termination(state: &StateCell, sink: &dyn TerminationSink) -> Result<()> {
    if !state.begin_stopping() {
        debug!("termination dispatch ignored; shutdown already in progress");
        return Ok(());
    }
    sink.resume_stopper();
    sink.resume_watchdog();
    sink.call_stop()
}

fn apply_initial_options(matches: &ArgMatches) -> Result<()> {
    let user = matches.get_one::<String>("user").map(String::as_str);
    let group = matches.get_one::<String>("group").map(String::as_str);
    if user.is_some() || group.is_some() {
        privileges::drop_privileges(user, group)?;
    }

    if let Some(dir) = matches.get_one::<PathBuf>("working-dir") {
        std::env::set_current_dir(dir)
            .with_context(|| format!("changing into working directory {}", dir.display()))?;
    }
    Ok(())
}

/// Configuration failures before the logger exists go to the options
/// surface on stderr only.
fn bootstrap_failure(err: &anyhow::Error) -> i32 {
    eprintln!("{err:#}");
    exit::BOOTSTRAP_OPTIONS
}

fn init_logger(cfg: &DaemonConfig, to_file: bool) -> Result<()> {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {} {}] {}",
                buf.timestamp_millis(),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .filter_level(cfg.log_level);

    if to_file {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&cfg.log_file)
            .with_context(|| format!("opening log file {}", cfg.log_file.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    // A second supervisor in the same process keeps the first logger.
    let _ = builder.try_init();
    Ok(())
}

/// Where a detached daemon's raw stdout/stderr go; the structured log
/// stays in the log file proper.
fn daemon_output_path(log_file: &Path) -> PathBuf {
    log_file.with_extension("out")
}

fn binary_stem(argv: &[OsString]) -> String {
    argv.first()
        .map(Path::new)
        .and_then(Path::file_stem)
        .and_then(|stem| stem.to_str())
        .unwrap_or(env!("CARGO_PKG_NAME"))
        .to_string()
}

fn guarded(label: &str, f: impl FnOnce() -> Result<()>) {
    if let Err(err) = f() {
        error!("{label}: {err:#}");
    }
}
