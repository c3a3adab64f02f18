//! Text logging for use in the cohort crates.
//!
//! * `trace`: spammy things
//! * `debug`: things that might be useful when debugging
//! * `info`: things we want to show to operators
//! * `warn`: problems we can recover from (a dropped row, a slow reader)
//! * `error`: problems that lead to loss of functionality or data

// The tracing macros support more syntax features than the log ones, that's why we use them:
pub use tracing::{debug, error, info, trace, warn};

pub use log::{Level, LevelFilter};

/// Directs log output to stderr.
///
/// Reads `RUST_LOG` for filtering; defaults to `info` for the `co_*` crates.
/// Idempotent, so tests can all call it.
pub fn setup_logging() {
    use std::sync::Once;
    static START: Once = Once::new();
    START.call_once(|| {
        let mut builder = env_logger::Builder::new();
        builder.parse_filters(&default_log_filter());
        if builder.try_init().is_err() {
            // Another logger got there first; that's fine.
        }
    });
}

/// `RUST_LOG` if set, otherwise `info`.
pub fn default_log_filter() -> String {
    std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_owned())
}
