use tracing_subscriber::EnvFilter;

/// Installs the global fmt subscriber
///
/// Filters come from `RUST_LOG` and default to `info`. Safe to call more
/// than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
