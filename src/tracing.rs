use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

/// Global fmt subscriber shared by every binary.
///
/// `RUST_LOG` wins when set, otherwise `default_filter` applies. Logs go to
/// stderr so stdout carries only summary lines and JSON rows.
pub fn init_tracing(default_filter: &str) -> Result<(), anyhow::Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    SubscriberBuilder::default()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .with_file(true)
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {}", e))
}
