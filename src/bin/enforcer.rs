//! The Enforcer process: the kill-decision engine. Reads the shared task
//! table, applies the timeout and (optionally) cgroup-pressure kill
//! policies, and delivers SIGKILL. Sole writer of the cgroup filesystem.

use clap::Parser;
use std::path::Path;
use tbulmkd::cgroup::{self, CgroupLimits, MemThreshold};
use tbulmkd::classifier::{Class, ExemptionList};
use tbulmkd::cli::EnforcerArgs;
use tbulmkd::error::{Abort, DaemonError, Result};
use tbulmkd::kill_loop::{self, KillPolicy};
use tbulmkd::shm::TaskTable;

const CONFIG_PATH: &str = "tbulmkd.cfg";

extern "C" fn on_terminate(_sig: libc::c_int) {
    cgroup::teardown();
    unsafe {
        libc::_exit(0);
    }
}

/// Installs a best-effort SIGTERM/SIGINT handler that tears down the
/// cgroup filesystem before exiting. Purely an operational nicety for
/// manual test runs; the documented terminal state remains "undefined".
fn install_teardown_handler() {
    unsafe {
        libc::signal(libc::SIGTERM, on_terminate as libc::sighandler_t);
        libc::signal(libc::SIGINT, on_terminate as libc::sighandler_t);
    }
}

fn run(args: EnforcerArgs) -> Result<()> {
    let exemptions = ExemptionList::load(Path::new(CONFIG_PATH));
    tracing::debug!(?exemptions, "loaded exemption list");

    if unsafe { libc::mlockall(libc::MCL_FUTURE) } != 0 {
        return Err(DaemonError::sys("mlockall"));
    }

    let policy = KillPolicy {
        timeout_secs: args.timeout_secs,
        cgroup_mode: args.cgroups,
        exemptions,
    };

    let thresholds: Option<[MemThreshold; 2]> = if args.cgroups {
        install_teardown_handler();
        cgroup::init(CgroupLimits {
            apps_percent: args.apps_percent,
            daemons_percent: args.daemons_percent,
        })?;
        let daemons = cgroup::setup_events(Class::Daemons)?;
        let apps = cgroup::setup_events(Class::Apps)?;
        Some([daemons, apps])
    } else {
        None
    };

    let table = TaskTable::open()?;
    tracing::info!("tbulmkd started.");

    loop {
        kill_loop::run_scan(&table, &policy)?;

        match &thresholds {
            Some(thresholds) => kill_loop::run_pressure_loop(&table, thresholds)?,
            None => std::thread::sleep(std::time::Duration::from_secs(1)),
        }
    }
}

fn main() {
    tbulmkd::logging::init();

    let argv = tbulmkd::cli::filter_known_args(std::env::args());
    let args = match EnforcerArgs::try_parse_from(argv) {
        Ok(args) => args,
        Err(e) if e.kind() == clap::error::ErrorKind::DisplayHelp => {
            print!("{e}");
            std::process::exit(1);
        }
        Err(e) => e.exit(),
    };

    if let Err(err) = run(args) {
        eprintln!("{}", Abort(&err));
        std::process::exit(1);
    }
}
