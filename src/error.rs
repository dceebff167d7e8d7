//! Typed error taxonomy for the daemon. Variants line up with the error
//! table in the design doc: anything that should abort the process bubbles
//! up through `?`; anything that should only skip a task is caught locally
//! and never constructs one of these at all.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("{op}: {source}")]
    Io {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed /proc/{pid}/stat: {reason}")]
    ProcParse { pid: i32, reason: &'static str },

    #[error("{call} failed, errno {errno}")]
    Sys { call: &'static str, errno: i32 },

    #[error("cgroup setup failed at {step}: {source}")]
    Cgroup {
        step: &'static str,
        #[source]
        source: std::io::Error,
    },
}

impl DaemonError {
    pub fn io(op: &'static str, source: std::io::Error) -> Self {
        DaemonError::Io { op, source }
    }

    pub fn sys(call: &'static str) -> Self {
        DaemonError::Sys {
            call,
            errno: std::io::Error::last_os_error()
                .raw_os_error()
                .unwrap_or(-1),
        }
    }

    pub fn cgroup(step: &'static str, source: std::io::Error) -> Self {
        DaemonError::Cgroup { step, source }
    }
}

/// Renders the `"tbulmkd: " [sec.nsec] <message>` diagnostic the source
/// prints before aborting. Kept separate from `Display` so call sites that
/// just want the bare error (e.g. `tracing` fields) aren't forced into this
/// shape.
pub struct Abort<'a>(pub &'a DaemonError);

impl fmt::Display for Abort<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        write!(
            f,
            "tbulmkd: [{}.{:09}] {}",
            now.as_secs(),
            now.subsec_nanos(),
            self.0
        )
    }
}

pub type Result<T> = std::result::Result<T, DaemonError>;
