//! Optional tracing-subscriber bootstrap for binaries embedding this crate.
//!
//! The library itself never initializes a global subscriber — only events
//! via `tracing`. Call `init_tracing()` once from an embedding `main`.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "ytbatch=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}
