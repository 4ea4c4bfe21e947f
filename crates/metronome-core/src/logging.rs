//! Structured logging setup.
//!
//! All metronome crates log through `tracing`. Libraries never install a
//! subscriber on their own; binaries and test harnesses may call
//! [`init_from_env`] (feature `tracing-json`) to get JSON lines on stderr.

/// Environment variable holding the log filter directive.
pub const LOG_ENV: &str = "METRONOME_LOG";

/// Filter used when [`LOG_ENV`] is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Install a JSON `tracing` subscriber filtered by [`LOG_ENV`].
///
/// Returns `false` if a global subscriber was already installed.
#[cfg(feature = "tracing-json")]
pub fn init_from_env() -> bool {
    use tracing_subscriber::EnvFilter;

    let filter =
        EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
