//! Tracing subscriber setup.
//!
//! Logs go to stderr; stdout carries protocol output. `RUST_LOG` overrides
//! both the configured level and `-v`.

use tracing_subscriber::EnvFilter;

/// Level used when `RUST_LOG` is unset.
pub fn effective_level(configured: &str, verbose: u8) -> String {
    match verbose {
        0 => configured.to_string(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    }
}

pub fn init(configured: &str, verbose: u8) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(effective_level(configured, verbose)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}
