//! Reads `/proc/<pid>/{stat,activity,activity_time}` into a [`TaskInfo`].
//! Stateless: every call opens, reads, and closes its own files.

use crate::error::{DaemonError, Result};
use std::fs;
use std::path::PathBuf;

/// A scan-local snapshot of one task. Plain owned data — there is no
/// separate release step the way the C source's `put_task_info` required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskInfo {
    pub pid: i32,
    pub name: String,
    pub tty_nr: i32,
    pub rss_bytes: u64,
    pub activity: bool,
    pub activity_time: i64,
}

/// Result of a probe that may legitimately find nothing (the task exited,
/// or never exposed the Samsung `activity*` extension).
pub enum Probe {
    Found(TaskInfo),
    NotFound,
}

fn page_size() -> u64 {
    // SAFETY: sysconf with a well-known name never fails in a way that
    // matters here; a negative return only happens for unsupported names.
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 {
        sz as u64
    } else {
        4096
    }
}

/// Parses the kernel's `/proc/<pid>/stat` record. Finds the *last* `)` in
/// the line rather than naively stripping the first/last byte of field 2,
/// so task names containing spaces or parentheses (e.g. `(bash (test))`)
/// don't desynchronize the field count.
fn parse_stat(pid: i32, raw: &str) -> Result<(String, i32, u64)> {
    let open = raw.find('(').ok_or(DaemonError::ProcParse {
        pid,
        reason: "missing '(' around comm",
    })?;
    let close = raw.rfind(')').ok_or(DaemonError::ProcParse {
        pid,
        reason: "missing ')' around comm",
    })?;
    if close <= open {
        return Err(DaemonError::ProcParse {
            pid,
            reason: "comm parentheses out of order",
        });
    }
    let name = raw[open + 1..close].to_string();

    let rest = &raw[close + 1..];
    let fields: Vec<&str> = rest.split_whitespace().collect();
    // fields[0] is field 3 (state); tty_nr is field 7 -> index 4;
    // rss is field 24 -> index 21.
    let tty_nr: i32 = fields
        .get(4)
        .ok_or(DaemonError::ProcParse {
            pid,
            reason: "stat record too short for tty_nr",
        })?
        .parse()
        .map_err(|_| DaemonError::ProcParse {
            pid,
            reason: "tty_nr not an integer",
        })?;
    let rss_pages: u64 = fields
        .get(21)
        .ok_or(DaemonError::ProcParse {
            pid,
            reason: "stat record too short for rss",
        })?
        .parse()
        .map_err(|_| DaemonError::ProcParse {
            pid,
            reason: "rss not an integer",
        })?;

    Ok((name, tty_nr, rss_pages * page_size()))
}

fn read_proc_file(pid_dir: &str, leaf: &str) -> std::io::Result<String> {
    let mut path = PathBuf::from(pid_dir);
    path.push(leaf);
    fs::read_to_string(path)
}

/// Reads `stat`, `activity`, and `activity_time` for `dname` (a decimal pid
/// directory name, as produced by `readdir("/proc")`). Returns
/// [`Probe::NotFound`] only when `activity_time` can't be opened — a task
/// that exposes it is assumed, per the source's invariant, to expose the
/// other two, so any later failure there is a fatal parse/infra error
/// rather than a skip.
pub fn probe_full(dname: &str) -> Result<Probe> {
    let pid_dir = format!("/proc/{dname}");
    let pid: i32 = dname.parse().unwrap_or(0);

    let activity_time = match read_proc_file(&pid_dir, "activity_time") {
        Ok(s) => s,
        Err(_) => return Ok(Probe::NotFound),
    };
    let activity_time: i64 = activity_time
        .trim()
        .parse()
        .map_err(|_| DaemonError::ProcParse {
            pid,
            reason: "activity_time not an integer",
        })?;

    let activity = read_proc_file(&pid_dir, "activity")
        .map_err(|e| DaemonError::io("read activity", e))?;
    let activity: i32 = activity
        .trim()
        .parse()
        .map_err(|_| DaemonError::ProcParse {
            pid,
            reason: "activity not 0 or 1",
        })?;

    let stat = read_proc_file(&pid_dir, "stat").map_err(|e| DaemonError::io("read stat", e))?;
    let (name, tty_nr, rss_bytes) = parse_stat(pid, &stat)?;

    Ok(Probe::Found(TaskInfo {
        pid,
        name,
        tty_nr,
        rss_bytes,
        activity: activity != 0,
        activity_time,
    }))
}

/// Reads only `stat`; used on the pressure path where activity is
/// irrelevant. Unlike [`probe_full`], a missing `stat` here is expected —
/// the pid may have died between table enumeration and this probe — so it
/// is `NotFound`, not fatal.
pub fn probe_stat(pid: i32) -> Result<Probe> {
    let pid_dir = format!("/proc/{pid}");
    let stat = match read_proc_file(&pid_dir, "stat") {
        Ok(s) => s,
        Err(_) => return Ok(Probe::NotFound),
    };
    let (name, tty_nr, rss_bytes) = parse_stat(pid, &stat)?;
    Ok(Probe::Found(TaskInfo {
        pid,
        name,
        tty_nr,
        rss_bytes,
        activity: false,
        activity_time: 0,
    }))
}
