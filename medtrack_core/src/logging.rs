//! Logging setup for the medtrack binaries and tests.
//!
//! Output goes to stderr so JSON written to stdout stays machine-readable.
//! `MEDTRACK_LOG` takes precedence over `RUST_LOG`; both accept the usual
//! `EnvFilter` directive syntax.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable consulted before `RUST_LOG`
pub const LOG_ENV: &str = "MEDTRACK_LOG";

/// Initialize logging at WARN for medtrack crates
pub fn init() {
    init_with_level("warn")
}

/// Initialize logging with `default_level` applied to medtrack crates
///
/// Dependencies stay at WARN. An explicit filter in `MEDTRACK_LOG` or
/// `RUST_LOG` replaces these defaults entirely.
pub fn init_with_level(default_level: &str) {
    let _ = tracing_subscriber::registry()
        .with(filter(default_level))
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .try_init();
}

fn filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directives(default_level)))
}

/// Filter directives raising only medtrack's own targets to `level`
pub fn default_directives(level: &str) -> String {
    format!("warn,medtrack_core={0},medtrack={0}", level)
}

/// Initialize logging for testing (captures logs for test output)
#[cfg(test)]
pub fn init_test() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new(default_directives("debug")))
        .try_init();
}
