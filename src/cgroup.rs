//! Mounts the cgroup-v1 memory hierarchy, assigns tasks to the `daemons`/
//! `apps` cgroups, and registers/polls memory-threshold events over
//! `eventfd`. Enforcer-only; the Enforcer is the sole writer of this
//! filesystem.

use crate::classifier::Class;
use crate::error::{DaemonError, Result};
use std::ffi::CString;
use std::fs;
use std::os::unix::io::RawFd;

const CGROUP_ROOT: &str = "/sys/fs/cgroup";
const MEMORY_ROOT: &str = "/sys/fs/cgroup/memory";
const THRESHOLD_MARGIN_BYTES: i64 = 6 * 1024 * 1024;

impl Class {
    fn dirname(self) -> &'static str {
        match self {
            Class::Daemons => "daemons",
            Class::Apps => "apps",
        }
    }

    fn path(self, leaf: &str) -> String {
        format!("{MEMORY_ROOT}/{}/{leaf}", self.dirname())
    }
}

/// Percent-of-`MemTotal` limits for each class, overridable via CLI flags.
#[derive(Debug, Clone, Copy)]
pub struct CgroupLimits {
    pub apps_percent: u32,
    pub daemons_percent: u32,
}

impl Default for CgroupLimits {
    fn default() -> Self {
        CgroupLimits {
            apps_percent: 90,
            daemons_percent: 10,
        }
    }
}

fn read_mem_total_bytes() -> Result<u64> {
    let contents = fs::read_to_string("/proc/meminfo")
        .map_err(|e| DaemonError::cgroup("read /proc/meminfo", e))?;
    for line in contents.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .map_err(|_| {
                    DaemonError::cgroup(
                        "parse MemTotal",
                        std::io::Error::new(std::io::ErrorKind::InvalidData, "bad MemTotal line"),
                    )
                })?;
            return Ok(kb * 1024);
        }
    }
    Err(DaemonError::cgroup(
        "parse MemTotal",
        std::io::Error::new(std::io::ErrorKind::NotFound, "MemTotal not present"),
    ))
}

fn mkdir_best_effort(path: &str) {
    let c = CString::new(path).unwrap();
    unsafe {
        libc::mkdir(c.as_ptr(), 0o755);
    }
}

fn mount_or_abort(source: Option<&str>, target: &str, fstype: &str, data: Option<&str>, step: &'static str) -> Result<()> {
    let source_c = source.map(|s| CString::new(s).unwrap());
    let target_c = CString::new(target).unwrap();
    let fstype_c = CString::new(fstype).unwrap();
    let data_c = data.map(|s| CString::new(s).unwrap());

    let ret = unsafe {
        libc::mount(
            source_c.as_ref().map_or(std::ptr::null(), |s| s.as_ptr()),
            target_c.as_ptr(),
            fstype_c.as_ptr(),
            0,
            data_c
                .as_ref()
                .map_or(std::ptr::null(), |s| s.as_ptr() as *const libc::c_void),
        )
    };
    if ret != 0 {
        return Err(DaemonError::cgroup(step, std::io::Error::last_os_error()));
    }
    Ok(())
}

fn write_file(path: &str, contents: &str, step: &'static str) -> Result<()> {
    fs::write(path, contents).map_err(|e| DaemonError::cgroup(step, e))
}

/// Tears down a possibly stale hierarchy from a previous run. Best-effort:
/// failures here are expected (nothing may exist yet) and are ignored,
/// matching the source's unchecked `rmdir`/`umount` calls.
pub fn teardown() {
    let _ = fs::remove_dir(Class::Apps.path(""));
    let _ = fs::remove_dir(Class::Daemons.path(""));
    unsafe {
        let memory = CString::new(MEMORY_ROOT).unwrap();
        libc::umount(memory.as_ptr());
        let root = CString::new(CGROUP_ROOT).unwrap();
        libc::umount(root.as_ptr());
    }
    let _ = fs::remove_dir(MEMORY_ROOT);
}

/// Runs the full initialization protocol: teardown, mount tmpfs, mount the
/// memory controller, create the two child cgroups, set their limits from
/// `MemTotal`, and disable the in-kernel OOM killer for each. Any failure
/// from steps 2/3/6/7 is fatal; `mkdir` failures for the child cgroups
/// (step 4) are ignored since they may already exist from a stale run.
pub fn init(limits: CgroupLimits) -> Result<()> {
    let mem_total = read_mem_total_bytes()?;
    tracing::debug!(mem_total, "read MemTotal");

    teardown();

    mount_or_abort(None, CGROUP_ROOT, "tmpfs", None, "mount /sys/fs/cgroup")?;

    if unsafe { libc::mkdir(CString::new(MEMORY_ROOT).unwrap().as_ptr(), 0o755) } != 0 {
        return Err(DaemonError::cgroup(
            "mkdir /sys/fs/cgroup/memory",
            std::io::Error::last_os_error(),
        ));
    }
    mount_or_abort(None, MEMORY_ROOT, "cgroup", Some("memory"), "mount memory controller")?;

    mkdir_best_effort(&Class::Daemons.path(""));
    mkdir_best_effort(&Class::Apps.path(""));

    for (class, percent) in [
        (Class::Daemons, limits.daemons_percent),
        (Class::Apps, limits.apps_percent),
    ] {
        let limit = (percent as u64 * mem_total) / 100;
        tracing::debug!(?class, limit, "writing memory.limit_in_bytes");
        write_file(
            &class.path("memory.limit_in_bytes"),
            &limit.to_string(),
            "write memory.limit_in_bytes",
        )?;
        write_file(&class.path("memory.oom_control"), "1", "write memory.oom_control")?;
    }

    Ok(())
}

/// Writes `pid` to the class's `tasks` file. Idempotent. Per the resolved
/// open question, a failure here (e.g. the pid already died) is returned
/// to the caller to log-and-continue rather than aborting the daemon.
pub fn add_pid(class: Class, pid: libc::pid_t) -> Result<()> {
    write_file(&class.path("tasks"), &pid.to_string(), "write tasks")
}

fn read_i64_file(path: &str, step: &'static str) -> Result<i64> {
    let contents = fs::read_to_string(path).map_err(|e| DaemonError::cgroup(step, e))?;
    contents
        .trim()
        .parse()
        .map_err(|_| DaemonError::cgroup(step, std::io::Error::new(std::io::ErrorKind::InvalidData, "not an integer")))
}

pub fn mem_usage(class: Class) -> Result<i64> {
    read_i64_file(&class.path("memory.usage_in_bytes"), "read memory.usage_in_bytes")
}

fn mem_limit(class: Class) -> Result<i64> {
    read_i64_file(&class.path("memory.limit_in_bytes"), "read memory.limit_in_bytes")
}

/// A registered memory-threshold event for one class, plus the fds it
/// owns. Closed on drop.
pub struct MemThreshold {
    pub class: Class,
    pub mem_limit: i64,
    usage_fd: RawFd,
    ctrl_fd: RawFd,
    pub evt_fd: RawFd,
}

impl Drop for MemThreshold {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.evt_fd);
            libc::close(self.ctrl_fd);
            libc::close(self.usage_fd);
        }
    }
}

/// Registers a `cgroup.event_control` threshold for `class`, set to
/// `memory.limit_in_bytes - 6MiB`. The kernel signals the returned
/// eventfd's counter on every crossing of that threshold by
/// `memory.usage_in_bytes`.
pub fn setup_events(class: Class) -> Result<MemThreshold> {
    let limit = mem_limit(class)?;
    let threshold = limit - THRESHOLD_MARGIN_BYTES;

    let usage_path = CString::new(class.path("memory.usage_in_bytes")).unwrap();
    let usage_fd = unsafe { libc::open(usage_path.as_ptr(), libc::O_RDONLY) };
    if usage_fd < 0 {
        return Err(DaemonError::sys("open usage_in_bytes"));
    }

    let ctrl_path = CString::new(class.path("cgroup.event_control")).unwrap();
    let ctrl_fd = unsafe { libc::open(ctrl_path.as_ptr(), libc::O_WRONLY) };
    if ctrl_fd < 0 {
        unsafe { libc::close(usage_fd) };
        return Err(DaemonError::sys("open cgroup.event_control"));
    }

    let evt_fd = unsafe { libc::eventfd(0, 0) };
    if evt_fd < 0 {
        unsafe {
            libc::close(usage_fd);
            libc::close(ctrl_fd);
        }
        return Err(DaemonError::sys("eventfd"));
    }
    if unsafe { libc::fcntl(evt_fd, libc::F_SETFL, libc::O_NONBLOCK) } != 0 {
        unsafe {
            libc::close(usage_fd);
            libc::close(ctrl_fd);
            libc::close(evt_fd);
        }
        return Err(DaemonError::sys("fcntl evt_fd"));
    }

    // Bit-exact wire format: "<eventfd> <usage_fd> <threshold>\0",
    // including the terminating NUL.
    let mut payload = format!("{evt_fd} {usage_fd} {threshold}").into_bytes();
    payload.push(0);
    let written = unsafe {
        libc::write(
            ctrl_fd,
            payload.as_ptr() as *const libc::c_void,
            payload.len(),
        )
    };
    if written != payload.len() as isize {
        unsafe {
            libc::close(usage_fd);
            libc::close(ctrl_fd);
            libc::close(evt_fd);
        }
        return Err(DaemonError::sys("write cgroup.event_control"));
    }

    tracing::debug!(?class, threshold, "registered memory threshold event");

    Ok(MemThreshold {
        class,
        mem_limit: threshold,
        usage_fd,
        ctrl_fd,
        evt_fd,
    })
}

/// Consumes exactly 8 bytes from the eventfd to clear it. The counter
/// value itself carries no information beyond "pressure crossed".
pub fn drain_event(evt_fd: RawFd) -> Result<()> {
    let mut buf = [0u8; 8];
    let n = unsafe { libc::read(evt_fd, buf.as_mut_ptr() as *mut libc::c_void, 8) };
    if n != 8 {
        return Err(DaemonError::sys("read eventfd"));
    }
    Ok(())
}

/// `(percent/100) * total_bytes`, floored. Exposed for the cgroup-limit
/// unit tests below.
pub fn percent_of(total_bytes: u64, percent: u32) -> u64 {
    (percent as u64 * total_bytes) / 100
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_arithmetic_matches_percent_of_memtotal() {
        let mem_total = 1_000_000_000u64;
        assert_eq!(percent_of(mem_total, 90), 900_000_000);
        assert_eq!(percent_of(mem_total, 10), 100_000_000);
    }

    #[test]
    fn threshold_is_limit_minus_six_mebibytes() {
        let limit: i64 = 100 * 1024 * 1024;
        let threshold = limit - THRESHOLD_MARGIN_BYTES;
        assert_eq!(threshold, 94 * 1024 * 1024);
    }

    #[test]
    fn class_paths_use_expected_directories() {
        assert_eq!(Class::Apps.path("tasks"), "/sys/fs/cgroup/memory/apps/tasks");
        assert_eq!(
            Class::Daemons.path("memory.limit_in_bytes"),
            "/sys/fs/cgroup/memory/daemons/memory.limit_in_bytes"
        );
    }

    #[test]
    fn event_control_payload_is_nul_terminated() {
        let mut payload = format!("{} {} {}", 5, 6, 1234).into_bytes();
        payload.push(0);
        assert_eq!(payload.last(), Some(&0));
        assert_eq!(&payload[..payload.len() - 1], b"5 6 1234");
    }
}
