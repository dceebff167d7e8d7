//! Plain stdout logging, matching the source's "logged on stdout, not
//! syslog" requirement. Kill decisions are logged at `info`; everything
//! else the source only prints under `if (DEBUG)` is logged at `debug`.

use tracing_subscriber::EnvFilter;

pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(false)
        .without_time()
        .init();
}
