use tracing_subscriber::EnvFilter;

/// Install the fmt subscriber used by the system binaries. The filter is
/// taken from `RUST_LOG` when set, otherwise `default_level` applies.
///
/// Calling this twice is harmless, the second subscriber is discarded.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
