//! Purpose: Install the tracing subscriber shared by the CLI and the C ABI load hook.
//! Exports: `init_tracing`, `LOG_ENV`.
//! Invariants: Output goes to stderr so stdout payloads stay machine-readable.
//! Invariants: Repeated initialization is harmless (first subscriber wins).
use tracing_subscriber::EnvFilter;

pub const LOG_ENV: &str = "CRYPTOSHARE_LOG";

/// `CRYPTOSHARE_LOG` wins over `RUST_LOG`; `default_directive` applies when neither parses.
pub fn init_tracing(default_directive: &str) {
    let env_filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
