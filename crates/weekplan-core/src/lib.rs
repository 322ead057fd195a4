pub mod config;

pub use config::{CalendarConfig, Config, SyncFrequency, ValidationResult};

use anyhow::Result;

/// Initialize the core: installs the tracing subscriber.
///
/// Call once, from the host application's entry point.
pub fn init() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("WeekPlan core initialized");
    Ok(())
}
