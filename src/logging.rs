//! Tracing subscriber setup for the server binary

use std::sync::OnceLock;

use tracing_subscriber::{fmt, EnvFilter};

static INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize the global tracing subscriber once.
///
/// Filter comes from `RUST_LOG` when set, defaulting to `info` with the
/// noisier websocket internals capped at `warn`.
pub fn init() {
    INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,tungstenite=warn,tokio_tungstenite=warn"));

        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    });
}
