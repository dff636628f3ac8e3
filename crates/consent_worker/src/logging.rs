use tracing_subscriber::EnvFilter;

/// Installs the JSON log subscriber used by every binary. `RUST_LOG` overrides
/// the default `info` filter. Repeated calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .json()
        .with_env_filter(filter)
        .with_target(false)
        .with_current_span(false)
        .try_init();
}
