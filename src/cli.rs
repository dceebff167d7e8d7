//! Enforcer CLI surface. The Collector takes no arguments at all, so it
//! has no analogue here.

use clap::Parser;

/// nonosctl-style derive CLI: `-a/-d/-c/-t/-h`, long and short forms,
/// matching the defaults in the design doc (apps 90%, daemons 10%,
/// cgroups off, timeout 60s).
#[derive(Parser, Debug, Clone)]
#[command(name = "tbulmkd", about = "Userspace low-memory killer daemon")]
pub struct EnforcerArgs {
    /// Memory percent of MemTotal for the apps cgroup
    #[arg(short = 'a', long = "apps", default_value_t = 90)]
    pub apps_percent: u32,

    /// Memory percent of MemTotal for the daemons cgroup
    #[arg(short = 'd', long = "daemons", default_value_t = 10)]
    pub daemons_percent: u32,

    /// Enable cgroup pressure mode
    #[arg(short = 'c', long = "cgroups")]
    pub cgroups: bool,

    /// Background-task idle timeout, in seconds
    #[arg(short = 't', long = "timeout", default_value_t = 60)]
    pub timeout_secs: i64,
}

/// Flags this binary recognizes, paired `(short, long)`, with whether they
/// take a value. `-h`/`--help` is handled by clap itself but listed here so
/// it survives the filter below.
const VALUE_FLAGS: &[(&str, &str)] = &[("-a", "--apps"), ("-d", "--daemons"), ("-t", "--timeout")];
const BOOL_FLAGS: &[(&str, &str)] = &[("-c", "--cgroups"), ("-h", "--help")];

/// Drops any argv token that isn't one of the flags above (and, for a
/// value-taking flag, the token immediately following it) before argv ever
/// reaches clap. This is how "unknown options are silently skipped" (§6) is
/// implemented: clap itself always rejects unrecognized flags outright, so
/// unrecognized tokens have to be removed upstream of it. Recognized flags
/// keep clap's normal strict value parsing — only the flag *name* is
/// tolerant, not the value attached to a flag we do recognize.
pub fn filter_known_args<I: IntoIterator<Item = String>>(args: I) -> Vec<String> {
    let mut iter = args.into_iter();
    let mut out = Vec::new();
    if let Some(prog) = iter.next() {
        out.push(prog);
    }

    let mut iter = iter.peekable();
    while let Some(arg) = iter.next() {
        if BOOL_FLAGS.iter().any(|(s, l)| arg == *s || arg == *l) {
            out.push(arg);
            continue;
        }
        if VALUE_FLAGS.iter().any(|(s, l)| arg == *s || arg == *l) {
            out.push(arg);
            if let Some(value) = iter.next() {
                out.push(value);
            }
            continue;
        }
        if VALUE_FLAGS.iter().any(|(_, l)| arg.starts_with(&format!("{l}="))) {
            out.push(arg);
            continue;
        }
        // Unrecognized token: silently skipped, matching §6.
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn defaults_match_design_doc() {
        let args = EnforcerArgs::try_parse_from(["tbulmkd"]).unwrap();
        assert_eq!(args.apps_percent, 90);
        assert_eq!(args.daemons_percent, 10);
        assert!(!args.cgroups);
        assert_eq!(args.timeout_secs, 60);
    }

    #[test]
    fn long_and_short_forms_agree() {
        let long = EnforcerArgs::try_parse_from(["tbulmkd", "--timeout", "5", "--cgroups"]).unwrap();
        let short = EnforcerArgs::try_parse_from(["tbulmkd", "-t", "5", "-c"]).unwrap();
        assert_eq!(long.timeout_secs, short.timeout_secs);
        assert_eq!(long.cgroups, short.cgroups);
    }

    #[test]
    fn percent_flags_override_defaults() {
        let args = EnforcerArgs::try_parse_from(["tbulmkd", "-a", "80", "-d", "20"]).unwrap();
        assert_eq!(args.apps_percent, 80);
        assert_eq!(args.daemons_percent, 20);
    }

    #[test]
    fn filter_drops_unknown_flags_but_keeps_known_ones() {
        let filtered = filter_known_args(owned(&["tbulmkd", "--bogus", "-t", "5", "--also-bogus=1"]));
        assert_eq!(filtered, owned(&["tbulmkd", "-t", "5"]));
    }

    #[test]
    fn filter_keeps_the_value_following_a_known_flag_untouched() {
        let filtered = filter_known_args(owned(&["tbulmkd", "-t", "not-a-number"]));
        assert_eq!(filtered, owned(&["tbulmkd", "-t", "not-a-number"]));
    }

    #[test]
    fn unknown_flag_survives_filter_and_then_parses_with_defaults() {
        let filtered = filter_known_args(owned(&["tbulmkd", "--not-a-real-flag"]));
        let args = EnforcerArgs::try_parse_from(filtered).unwrap();
        assert_eq!(args.apps_percent, 90);
        assert_eq!(args.timeout_secs, 60);
    }
}
