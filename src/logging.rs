use tracing_subscriber::EnvFilter;

/// Initialize the global `tracing` subscriber the same way shipit's
/// `main.rs` does: `-v` count picks a default filter, `RUST_LOG` overrides
/// it when set.
pub fn init(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .init();
}
