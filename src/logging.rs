use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Installs the global subscriber for a binary.
///
/// `RUST_LOG` overrides `default_level`. Output goes to stderr so it does not
/// interleave with chat text on stdout.
pub fn init_tracing(binary_name: &str, default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "{}={},{}={}",
            env!("CARGO_PKG_NAME").replace('-', "_"),
            default_level,
            binary_name.replace('-', "_"),
            default_level
        )
        .into()
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
