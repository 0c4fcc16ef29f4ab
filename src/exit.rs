//! Process exit codes. Each failure mode has its own literal so operators
//! can tell them apart from the exit status alone.

use std::panic::{AssertUnwindSafe, catch_unwind};

pub const CLEAN: i32 = 0;
/// Applying the bootstrap options (privilege drop, working directory)
/// failed, before any logger exists.
pub const BOOTSTRAP_OPTIONS: i32 = 10;
/// Option parsing against the workload-extended surface failed, or help
/// was requested.
pub const OPTIONS_AFTER_EXTENSION: i32 = 11;
/// The run phase failed: startup error or workload failure.
pub const RUN_FAILURE: i32 = 12;
/// The watchdog gave up waiting for the main task.
pub const WATCHDOG: i32 = 20;
/// The stopper hook failed on its helper thread.
pub const STOPPER: i32 = 21;
/// The termination-dispatch routine failed.
pub const DISPATCH: i32 = 22;

pub fn exit_now(code: i32) -> ! {
    std::process::exit(code)
}

/// Report `primary` on stderr, run the extra reporter guarded so a faulty
/// reporter cannot swallow the original error, then force the exit. When
/// handling one fatal error raises another, both end up reported, the
/// original first.
pub fn die(primary: &anyhow::Error, code: i32, also_report: impl FnOnce()) -> ! {
    eprintln!("{primary:#}");
    if catch_unwind(AssertUnwindSafe(also_report)).is_err() {
        eprintln!("while handling the previous error another failure occurred");
    }
    exit_now(code)
}
