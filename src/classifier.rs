//! TTY-based daemon/app classification, the exemption name list, and the
//! rolling "top-K most recently active background tasks" safe-list.

use crate::shm::TaskSlot;
use std::collections::HashSet;
use std::path::Path;

pub const MAX_LIVE_BG_TASKS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Class {
    Daemons,
    Apps,
}

impl Class {
    /// `tty_nr == 0` is the sole classification input; no command-name
    /// heuristics.
    pub fn of(tty_nr: libc::c_int) -> Class {
        if tty_nr == 0 {
            Class::Daemons
        } else {
            Class::Apps
        }
    }

    pub fn matches(self, tty_nr: libc::c_int) -> bool {
        Class::of(tty_nr) == self
    }
}

/// The set of task names exempt from timeout kills, loaded once from the
/// config file at startup.
#[derive(Debug, Default, Clone)]
pub struct ExemptionList(HashSet<String>);

const MAX_EXEMPTION_NAME_LEN: usize = 99;

impl ExemptionList {
    /// Parses the config file line by line. `#`-prefixed lines are
    /// comments. Lines of the form `exemption <name>` add `<name>` to the
    /// set; anything else (including a name over the length cap) is
    /// silently skipped, matching the source's `sscanf` early-continue. A
    /// missing file is not an error: the exemption set is simply empty.
    pub fn load(path: &Path) -> ExemptionList {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => return ExemptionList::default(),
        };

        let mut set = HashSet::new();
        for line in contents.lines() {
            if line.starts_with('#') {
                continue;
            }
            let mut words = line.split_whitespace();
            let Some(keyword) = words.next() else { continue };
            if keyword != "exemption" {
                continue;
            }
            let Some(name) = words.next() else { continue };
            if name.len() > MAX_EXEMPTION_NAME_LEN {
                continue;
            }
            set.insert(name.to_string());
        }

        ExemptionList(set)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }
}

/// One entry of the safe-list: a background task's pid and the wall-clock
/// time of its last activity transition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BgEntry {
    pub pid: libc::pid_t,
    pub time: libc::time_t,
}

/// The bounded "most recently active background tasks" window, sorted
/// descending by `activity_time`. Rebuilt from scratch every scan.
#[derive(Debug, Clone)]
pub struct BgWindow {
    entries: [BgEntry; MAX_LIVE_BG_TASKS],
}

impl Default for BgWindow {
    fn default() -> Self {
        BgWindow {
            entries: [BgEntry::default(); MAX_LIVE_BG_TASKS],
        }
    }
}

impl BgWindow {
    /// Rebuilds the window from a table scan: for every background slot,
    /// insert it at the first position whose stored time it strictly
    /// exceeds, shifting the tail right and dropping the last entry. O(N·K).
    pub fn rebuild(slots: &[TaskSlot]) -> BgWindow {
        let mut window = BgWindow::default();
        for slot in slots {
            if slot.activity != 0 {
                continue;
            }
            window.try_insert(BgEntry {
                pid: slot.pid,
                time: slot.time,
            });
        }
        window
    }

    fn try_insert(&mut self, entry: BgEntry) {
        for j in 0..MAX_LIVE_BG_TASKS {
            if entry.time > self.entries[j].time {
                for k in (j + 1..MAX_LIVE_BG_TASKS).rev() {
                    self.entries[k] = self.entries[k - 1];
                }
                self.entries[j] = entry;
                break;
            }
        }
    }

    pub fn is_live(&self, pid: libc::pid_t) -> bool {
        self.entries.iter().any(|e| e.pid == pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn slot(pid: i32, time: i64, activity: i32, tty_nr: i32) -> TaskSlot {
        TaskSlot { pid, time, activity, tty_nr }
    }

    #[test]
    fn classification_is_total_and_tty_driven() {
        assert_eq!(Class::of(0), Class::Daemons);
        assert_eq!(Class::of(7), Class::Apps);
        assert!(Class::Daemons.matches(0));
        assert!(!Class::Daemons.matches(1));
    }

    #[test]
    fn bg_window_keeps_top_k_descending() {
        let mut slots = vec![];
        for i in 0..10 {
            slots.push(slot(1000 + i, 100 + i as i64, 0, 3));
        }
        // One foreground task should never enter the window.
        slots.push(slot(9999, 9999, 1, 3));

        let window = BgWindow::rebuild(&slots);
        // Highest 6 times are 109..104 -> pids 1009..1004.
        for pid in 1004..=1009 {
            assert!(window.is_live(pid), "expected {pid} to be live");
        }
        for pid in 1000..1004 {
            assert!(!window.is_live(pid), "expected {pid} to be evicted");
        }
        assert!(!window.is_live(9999));
    }

    #[test]
    fn bg_window_scenario_six_plus_one() {
        // Six tasks at t=1000-ish, one older one at t=2000-ish-older.
        let mut slots: Vec<TaskSlot> = (0..6).map(|i| slot(100 + i, 1000, 0, 5)).collect();
        slots.push(slot(999, 0, 0, 5)); // now - 2000 relative ordering via smaller time
        let window = BgWindow::rebuild(&slots);
        for i in 0..6 {
            assert!(window.is_live(100 + i));
        }
        assert!(!window.is_live(999));
    }

    #[test]
    fn exemption_list_parses_and_skips_garbage() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "# a comment").unwrap();
        writeln!(f, "exemption app_x").unwrap();
        writeln!(f, "garbage line").unwrap();
        writeln!(f, "exemption").unwrap(); // no name
        writeln!(f, "exemption app_y").unwrap();
        f.flush().unwrap();

        let list = ExemptionList::load(f.path());
        assert!(list.contains("app_x"));
        assert!(list.contains("app_y"));
        assert!(!list.contains("garbage"));
    }

    #[test]
    fn missing_config_file_is_empty_not_error() {
        let list = ExemptionList::load(Path::new("/nonexistent/tbulmkd.cfg"));
        assert!(!list.contains("anything"));
    }
}
