//! Tracing setup shared by the binary and by hosts embedding the engine

use tracing_subscriber::EnvFilter;

/// Install a formatting subscriber.
///
/// Output goes to stderr so stdout stays free for data. `RUST_LOG` wins
/// over `default_level`. Calling this more than once is
/// harmless; later calls leave the first subscriber in place.
pub fn init(default_level: tracing::Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.as_str().to_lowercase()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
