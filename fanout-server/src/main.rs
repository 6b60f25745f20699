use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs in production (FANOUT_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("FANOUT_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("fanout_server=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = fanout_server::config::RelayConfig::parse();
    tracing::info!("Starting relay on {}", config.bind_addr());
    tracing::info!(
        "tgpt binary: {} (timeout {}s)",
        config.tgpt_bin,
        config.tgpt_timeout_secs
    );
    tracing::info!("Datasets under {}", config.dataset_dir.display());

    let server = fanout_server::server::Server::new(config)?;
    server.run().await
}
