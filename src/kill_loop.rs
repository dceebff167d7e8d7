//! The Enforcer's top-level state machine: one iteration locks the table,
//! rebuilds the safe-list, walks every slot applying the timeout-kill
//! policy, then (in cgroup mode) runs the pressure poller before sleeping.

use crate::classifier::{BgWindow, Class, ExemptionList};
use crate::error::Result;
use crate::proc_probe::{self, Probe, TaskInfo};
use crate::shm::{read_scan, TaskSlot, TaskTable};
use crate::{cgroup, error::DaemonError};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone)]
pub struct KillPolicy {
    pub timeout_secs: i64,
    pub cgroup_mode: bool,
    pub exemptions: ExemptionList,
}

fn now_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

/// The cheap, table-only gate for a background task: not foreground, not
/// in the live safe-list, and idle past the timeout. Pulled out as a pure
/// function so P3/P4/P8 are directly testable without a real `/proc`.
pub fn passes_timeout_gate(slot: &TaskSlot, now: i64, timeout: i64, window: &BgWindow) -> bool {
    if slot.activity != 0 {
        return false;
    }
    if window.is_live(slot.pid) {
        return false;
    }
    now - slot.time > timeout
}

/// The probe-dependent half of the timeout decision: kernel threads (rss
/// == 0) and exempted names are never killed. Returns `Some(reason)` when
/// the candidate should actually be killed.
pub fn should_kill_timeout_candidate(info: &TaskInfo, exemptions: &ExemptionList) -> bool {
    if info.rss_bytes == 0 {
        return false;
    }
    if exemptions.contains(&info.name) {
        return false;
    }
    true
}

fn mib(bytes: u64) -> u64 {
    bytes / 1024 / 1024
}

/// Runs one pass over the table: cgroup assignment (if enabled), then the
/// timeout-kill decision for every background slot. Acquires and releases
/// the table semaphore exactly once.
pub fn run_scan(table: &TaskTable, policy: &KillPolicy) -> Result<()> {
    let now = now_secs();
    let guard = table.lock();
    let slots = read_scan(&guard).to_vec();
    drop(guard);

    let window = BgWindow::rebuild(&slots);

    for slot in &slots {
        if slot.pid == 0 {
            continue;
        }

        if policy.cgroup_mode {
            let class = Class::of(slot.tty_nr);
            if let Err(e) = cgroup::add_pid(class, slot.pid) {
                // Resolved open question: a dead pid racing the write is
                // expected, not fatal. Log and keep scanning.
                tracing::debug!(pid = slot.pid, error = %e, "cgroup assignment failed");
            }
        }

        if !passes_timeout_gate(slot, now, policy.timeout_secs, &window) {
            continue;
        }

        let info = match proc_probe::probe_stat(slot.pid)? {
            Probe::Found(info) => info,
            Probe::NotFound => continue,
        };

        if !should_kill_timeout_candidate(&info, &policy.exemptions) {
            continue;
        }

        tracing::info!(
            "[timeout] killing {} timeout {} secs rss {}MiB ({})",
            slot.pid,
            now - slot.time,
            mib(info.rss_bytes),
            info.name
        );
        unsafe {
            libc::kill(slot.pid, libc::SIGKILL);
        }
    }

    Ok(())
}

/// RSS-maximising selection for the pressure path: among slots of `class`,
/// return the pid with the largest live RSS (0 if none). Ties keep the
/// first-seen pid, stable with respect to table order.
pub fn select_rss_max(table: &TaskTable, class: Class) -> Result<libc::pid_t> {
    let guard = table.lock();
    let slots = read_scan(&guard).to_vec();
    drop(guard);

    let mut best_pid = 0;
    let mut best_rss = 0u64;
    for slot in &slots {
        if slot.pid == 0 || !class.matches(slot.tty_nr) {
            continue;
        }
        let info = match proc_probe::probe_stat(slot.pid)? {
            Probe::Found(info) => info,
            Probe::NotFound => continue,
        };
        if info.rss_bytes > best_rss {
            best_rss = info.rss_bytes;
            best_pid = slot.pid;
        }
    }
    Ok(best_pid)
}

/// Runs the pressure poller: waits on both class eventfds (1s timeout);
/// on each readiness, drains the event and kills the heaviest task of
/// that class repeatedly until usage drops back under the threshold,
/// sleeping 1s between kills to give the kernel time to reclaim. Returns
/// to the caller once `poll` reports a quiet second.
pub fn run_pressure_loop(
    table: &TaskTable,
    thresholds: &[cgroup::MemThreshold; 2],
) -> Result<()> {
    loop {
        let mut pollfds = [
            libc::pollfd { fd: thresholds[0].evt_fd, events: libc::POLLIN, revents: 0 },
            libc::pollfd { fd: thresholds[1].evt_fd, events: libc::POLLIN, revents: 0 },
        ];

        let ready = unsafe { libc::poll(pollfds.as_mut_ptr(), pollfds.len() as libc::nfds_t, 1000) };
        if ready < 0 {
            return Err(DaemonError::sys("poll"));
        }
        if ready == 0 {
            return Ok(());
        }

        for (i, pfd) in pollfds.iter().enumerate() {
            if pfd.revents & libc::POLLIN == 0 {
                continue;
            }
            let thres = &thresholds[i];
            tracing::debug!(class = ?thres.class, "got lowmem event");
            cgroup::drain_event(thres.evt_fd)?;

            while cgroup::mem_usage(thres.class)? >= thres.mem_limit {
                let pid = select_rss_max(table, thres.class)?;
                if pid == 0 {
                    continue;
                }
                let info = match proc_probe::probe_stat(pid)? {
                    Probe::Found(info) => info,
                    Probe::NotFound => continue,
                };
                tracing::info!("[cgroups] killing {} rss {}MiB ({})", pid, mib(info.rss_bytes), info.name);
                unsafe {
                    libc::kill(pid, libc::SIGKILL);
                }
                std::thread::sleep(Duration::from_secs(1));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::ExemptionList;
    use crate::proc_probe::TaskInfo;

    fn slot(pid: i32, time: i64, activity: i32, tty_nr: i32) -> TaskSlot {
        TaskSlot { pid, time, activity, tty_nr }
    }

    #[test]
    fn active_task_never_passes_gate() {
        let s = slot(1, 0, 1, 0);
        let window = BgWindow::default();
        assert!(!passes_timeout_gate(&s, 1_000_000, 5, &window));
    }

    #[test]
    fn within_timeout_never_passes_gate() {
        let now = 1_000_000;
        let s = slot(1, now - 3, 0, 0);
        let window = BgWindow::default();
        assert!(!passes_timeout_gate(&s, now, 5, &window));
    }

    #[test]
    fn past_timeout_and_not_live_passes_gate() {
        let now = 1_000_000;
        let s = slot(1, now - 10, 0, 0);
        let window = BgWindow::default();
        assert!(passes_timeout_gate(&s, now, 5, &window));
    }

    #[test]
    fn live_window_blocks_timeout_kill() {
        let now = 1_000_000;
        let slots = vec![slot(1, now - 10, 0, 0)];
        let window = BgWindow::rebuild(&slots);
        assert!(!passes_timeout_gate(&slots[0], now, 5, &window));
    }

    #[test]
    fn kernel_thread_is_never_killed() {
        let info = TaskInfo {
            pid: 17,
            name: "kthread".into(),
            tty_nr: 0,
            rss_bytes: 0,
            activity: false,
            activity_time: 0,
        };
        assert!(!should_kill_timeout_candidate(&info, &ExemptionList::default()));
    }

    #[test]
    fn exempted_name_is_never_killed() {
        let info = TaskInfo {
            pid: 42,
            name: "app_x".into(),
            tty_nr: 3,
            rss_bytes: 4096,
            activity: false,
            activity_time: 0,
        };
        let mut contents = tempfile::NamedTempFile::new().unwrap();
        use std::io::Write;
        writeln!(contents, "exemption app_x").unwrap();
        let exemptions = ExemptionList::load(contents.path());
        assert!(!should_kill_timeout_candidate(&info, &exemptions));
    }

    #[test]
    fn ordinary_candidate_is_killed() {
        let info = TaskInfo {
            pid: 42,
            name: "app_x".into(),
            tty_nr: 3,
            rss_bytes: 4096,
            activity: false,
            activity_time: 0,
        };
        assert!(should_kill_timeout_candidate(&info, &ExemptionList::default()));
    }
}
