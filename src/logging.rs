//! Logging setup for the command-line front end.

use tracing::level_filters::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    /// Suppress all tracing output by default (overrideable by `RUST_LOG`).
    #[default]
    Default,
    /// Show debug messages by default (overrideable by `RUST_LOG`).
    Verbose,
}

/// Configure `tracing` for the given [`Level`], taking into account the
/// `RUST_LOG` environment variable.
///
/// Logs always go to stderr, so `extract -p` output on stdout stays clean.
pub fn setup_logging(level: Level) {
    let filter = match level {
        Level::Default => EnvFilter::builder()
            .with_default_directive(LevelFilter::OFF.into())
            .from_env_lossy(),
        Level::Verbose => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("stowzip=debug")),
    };

    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(level == Level::Verbose);

    tracing_subscriber::registry().with(filter).with(fmt).init();
}
