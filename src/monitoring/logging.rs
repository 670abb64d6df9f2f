// DANS : src/monitoring/logging.rs
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

/// Logs JSON sur stdout. Le niveau vient de `RUST_LOG` ("info" par défaut).
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // `try_init` : un second appel (tests, binaire relancé dans le même process) ne panique pas.
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .try_init();
}
