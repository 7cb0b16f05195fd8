//! Sockbridge Logging
//!
//! `tracing` subscriber setup shared by the binaries and integration tests.
//! `RUST_LOG` always wins over the built-in default filter.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter
pub const DEFAULT_FILTER: &str = "info,sockbridge=info";

/// Default filter with `--verbose`
pub const VERBOSE_FILTER: &str = "info,sockbridge=debug";

/// Filter directives for the given verbosity
pub fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        VERBOSE_FILTER
    } else {
        DEFAULT_FILTER
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter(verbose)))
}

/// Install the global subscriber. Panics if one is already set.
pub fn init_logging(verbose: bool) {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(env_filter(verbose))
        .init();
}

/// Install the global subscriber unless one exists already.
///
/// Returns false when another subscriber was installed first.
pub fn try_init_logging(verbose: bool) -> bool {
    tracing_subscriber::registry()
        .with(fmt::layer().with_test_writer())
        .with(env_filter(verbose))
        .try_init()
        .is_ok()
}
