//! Tracing subscriber setup for the binary and embedding applications.
//!
//! `RUST_LOG` wins when set; otherwise the level follows the `debug` flag
//! from [`crate::config::Settings`].

use tracing_subscriber::EnvFilter;

fn default_directive(debug: bool) -> &'static str {
    if debug { "ragdb=debug" } else { "ragdb=info" }
}

/// Installs a stderr fmt subscriber.
///
/// Returns `false` if a global subscriber was already installed, which is
/// normal when the library is embedded or under `cargo test`.
pub fn init(debug: bool) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(debug)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(debug)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok()
}
