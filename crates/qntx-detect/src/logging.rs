//! Logging setup with QNTX segment prefixes.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize tracing with the `info` default filter.
///
/// `RUST_LOG` takes precedence when set.
pub fn init() {
    init_with_filter("info");
}

/// Initialize tracing with a custom default filter.
///
/// Does nothing if a global subscriber is already installed, so hosts that
/// create several filters (or already log through tracing) can call it freely.
pub fn init_with_filter(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(false))
        .try_init();
}

/// Segment prefixes for log lines.
pub mod prefix {
    /// Worker startup
    pub const OPEN: &str = "✿";
    /// Worker shutdown
    pub const CLOSE: &str = "❀";
    /// Detection publishing
    pub const DETECT: &str = "⌖";
}
