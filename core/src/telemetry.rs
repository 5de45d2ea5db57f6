use anyhow::Result;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

static SUBSCRIBER_GUARD: OnceLock<()> = OnceLock::new();

/// Filter from `CINEFLUENT_LOG` (falling back to `RUST_LOG`), defaulting
/// to warnings plus our own info-level events.
pub fn default_filter() -> EnvFilter {
    if let Ok(spec) = std::env::var("CINEFLUENT_LOG") {
        if let Ok(filter) = EnvFilter::try_new(&spec) {
            return filter;
        }
    }
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,cinefluent=info,cinefluent_core=info"))
}

/// Initialize the global tracing subscriber for the CineFluent workspace.
///
/// The initialization is idempotent so that unit tests and binaries can call it
/// multiple times without panicking.
pub fn init_tracing(filter: EnvFilter) -> Result<()> {
    if SUBSCRIBER_GUARD.get().is_some() {
        return Ok(());
    }

    let subscriber = Registry::default().with(filter).with(fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;
    SUBSCRIBER_GUARD.set(()).ok();

    Ok(())
}
