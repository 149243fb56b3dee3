//! tracing configuration

use anyhow::Result;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt,
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

/// initialize the global tracing subscriber from `log_level`/`log_format`.
pub fn init(log_level: &str, log_format: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level).or_else(|_| EnvFilter::try_new("info"))?;

    match log_format {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
    Ok(())
}
