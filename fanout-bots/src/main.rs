//! fanout-bridge: relays IRC messages to the fanout relay.
//!
//! Joins the configured channels, forwards every channel or private message
//! to the relay's `/ask` endpoint and posts the answer back.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use fanout_sdk::client::{self, ConnectConfig, ReconnectConfig};
use fanout_sdk::event::Event;

use fanout_bots::bridge::Bridge;
use fanout_bots::memory::Memory;
use fanout_bots::relay::RelayClient;

#[derive(Parser)]
#[command(name = "fanout-bridge", about = "IRC bridge for the fanout relay")]
struct Args {
    /// IRC server address (host:port)
    #[arg(long, env = "IRC_SERVER", default_value = "irc.dal.net:6667")]
    server: String,

    /// Bot nick
    #[arg(long, env = "IRC_NICK", default_value = "SkyBot")]
    nick: String,

    #[arg(long, default_value = "Beagles")]
    realname: String,

    /// Channels to join (comma separated)
    #[arg(long, env = "IRC_CHANNELS", value_delimiter = ',', default_value = "#Amalek,#FreeEgypt")]
    channels: Vec<String>,

    /// Use TLS (implied by port 6697)
    #[arg(long)]
    tls: bool,

    /// Relay /ask endpoint
    #[arg(long, env = "FANOUT_API_URL", default_value = "http://127.0.0.1:8080/ask")]
    api_url: String,

    /// Provider requested from the relay
    #[arg(long, default_value = "sky")]
    provider: String,

    /// Memory database path. Memory is disabled if unset.
    #[arg(long, env = "FANOUT_MEMORY_DB")]
    memory_db: Option<PathBuf>,

    /// Facts recalled per nick
    #[arg(long, default_value_t = 50)]
    recall_limit: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let json_logs = std::env::var("FANOUT_LOG_JSON").unwrap_or_default() == "1";
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "fanout_bots=info,fanout_sdk=info".into());
    if json_logs {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let args = Args::parse();

    let memory = match &args.memory_db {
        Some(path) => {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            match Memory::open(path) {
                Ok(mem) => Some(mem),
                Err(e) => {
                    tracing::warn!("Memory disabled: {e:#}");
                    None
                }
            }
        }
        None => None,
    };

    let relay = RelayClient::new(&args.api_url, &args.provider)?;
    let bridge = Arc::new(Bridge::new(&args.nick, memory, relay, args.recall_limit));

    tracing::info!(
        server = %args.server,
        nick = %args.nick,
        channels = ?args.channels,
        api = %args.api_url,
        "Starting fanout-bridge"
    );

    let config = ConnectConfig {
        server_addr: args.server.clone(),
        nick: args.nick.clone(),
        user: args.nick.clone(),
        realname: args.realname.clone(),
        tls: args.tls,
        ..Default::default()
    };
    let reconnect = ReconnectConfig {
        channels: args.channels.clone(),
        ..Default::default()
    };

    client::run_with_reconnect(config, reconnect, move |handle, event| {
        let bridge = Arc::clone(&bridge);
        Box::pin(async move {
            if matches!(event, Event::Message { .. }) {
                // Relay calls can take a minute; keep the event loop moving.
                tokio::spawn(async move {
                    if let Err(e) = bridge.handle_event(&handle, event).await {
                        tracing::error!("Failed to post reply: {e}");
                    }
                });
                Ok(())
            } else {
                bridge.handle_event(&handle, event).await
            }
        })
    })
    .await
}
