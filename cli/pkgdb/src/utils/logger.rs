use tracing_subscriber::EnvFilter;
use tracing_subscriber::util::SubscriberInitExt;

use crate::commands::Verbosity;

/// The default filter for `verbosity`, `RUST_LOG` takes precedence
pub(crate) fn log_filter(verbosity: Verbosity) -> &'static str {
    match verbosity {
        // Show only errors
        Verbosity::Quiet => "off,pkgdb=error,pkgdb_sdk=error",
        // Only show warnings
        Verbosity::Verbose(0) => "off,pkgdb=warn,pkgdb_sdk=warn",
        // Show our own info logs
        Verbosity::Verbose(1) => "off,pkgdb=info,pkgdb_sdk=info",
        // Also show debug from our libraries
        Verbosity::Verbose(2) => {
            "off,pkgdb=debug,pkgdb_sdk=debug,pkgdb_catalog=debug,pkgdb_manifest=debug,pkgdb_core=debug"
        },
        // Also show trace from our libraries
        Verbosity::Verbose(3) => {
            "off,pkgdb=trace,pkgdb_sdk=trace,pkgdb_catalog=trace,pkgdb_manifest=trace,pkgdb_core=trace"
        },
        Verbosity::Verbose(_) => "trace",
    }
}

/// Install the global subscriber writing to stderr
pub(crate) fn init_logger(verbosity: Verbosity) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_filter(verbosity)))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let subscriber = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(matches!(verbosity, Verbosity::Verbose(n) if n >= 2))
        .without_time()
        .finish();

    // a subscriber may already be installed, e.g. by a test harness
    let _ = subscriber.try_init();
}
