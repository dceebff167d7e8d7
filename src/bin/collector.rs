//! The Collector process: once per second, enumerates `/proc`, probes
//! every participating task, and overwrites the shared task table. Sole
//! writer of `/tbulmkd_tasklist`. Takes no CLI arguments.

use std::thread;
use std::time::Duration;
use tbulmkd::error::{Abort, DaemonError, Result};
use tbulmkd::proc_probe::{self, Probe};
use tbulmkd::shm::{self, write_scan, TaskSlot, TaskTable};

fn is_pid_dir(name: &str) -> bool {
    name != "1" && name != "self" && name.chars().all(|c| c.is_ascii_digit()) && !name.is_empty()
}

extern "C" fn on_terminate(_sig: libc::c_int) {
    shm::unlink();
    unsafe {
        libc::_exit(0);
    }
}

/// Installs a best-effort SIGTERM/SIGINT handler that unlinks the shared
/// task table before exiting. Purely an operational nicety for manual test
/// runs; the documented terminal state remains "undefined".
fn install_teardown_handler() {
    unsafe {
        libc::signal(libc::SIGTERM, on_terminate as libc::sighandler_t);
        libc::signal(libc::SIGINT, on_terminate as libc::sighandler_t);
    }
}

fn scan_once() -> Result<Vec<TaskSlot>> {
    let entries = std::fs::read_dir("/proc").map_err(|e| DaemonError::io("opendir /proc", e))?;

    let mut slots = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_pid_dir(name) {
            continue;
        }

        match proc_probe::probe_full(name)? {
            Probe::Found(info) => {
                slots.push(TaskSlot {
                    pid: info.pid,
                    time: info.activity_time,
                    activity: info.activity as libc::c_int,
                    tty_nr: info.tty_nr,
                });
                if slots.len() >= tbulmkd::MAX_NR_TASKS {
                    break;
                }
            }
            Probe::NotFound => continue,
        }
    }
    Ok(slots)
}

fn run() -> Result<()> {
    install_teardown_handler();

    let table = TaskTable::create()?;
    tracing::info!("tbulmkd-collector started.");

    loop {
        let scanned = scan_once()?;
        {
            let mut guard = table.lock();
            write_scan(&mut guard, &scanned);
        }
        tracing::debug!(count = scanned.len(), "scan written");
        thread::sleep(Duration::from_secs(1));
    }
}

fn main() {
    tbulmkd::logging::init();

    if let Err(err) = run() {
        eprintln!("{}", Abort(&err));
        std::process::exit(1);
    }
}
