//! Tracing setup. Logs go to stderr; `TOWNSHIP_LOG` controls the filter.

use tracing_subscriber::EnvFilter;

/// Guard type returned by init. Currently nothing to flush on drop, but
/// callers hold it for the process lifetime.
pub struct Telemetry;

/// Initialize the global tracing subscriber.
///
/// Default level is `warn` so normal command output stays clean; set
/// `TOWNSHIP_LOG=debug` (or any EnvFilter directive) to see more.
pub fn init() -> Telemetry {
    let filter = EnvFilter::try_from_env("TOWNSHIP_LOG")
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();

    Telemetry
}
