use tracing_subscriber::EnvFilter;

/// Logs go to stderr so `--json` output on stdout stays machine readable.
/// `CURATOR_LOG` wins over `RUST_LOG`; the default level is `warn`.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(std::io::stderr)
        .init();
}

pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_env("CURATOR_LOG")
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"))
}
