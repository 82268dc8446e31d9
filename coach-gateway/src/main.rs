//! Coach Gateway binary entry point.

use anyhow::Result;
use coach_common::config::Config;
use coach_common::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(
        &config.observability.log_level,
        &config.observability.log_format,
    );

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Coach gateway starting");

    coach_gateway::start_server(&config).await
}
