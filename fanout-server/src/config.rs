//! Relay configuration from command-line flags and environment.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

/// Providers tgpt is asked for when nothing else is configured.
pub const DEFAULT_PROVIDERS: [&str; 5] = ["pollinations", "sky", "phind", "koboldai", "kimi"];

#[derive(Parser, Debug, Clone)]
#[command(name = "fanout-server", about = "Fan a chat query out to tgpt providers")]
pub struct RelayConfig {
    /// Address to bind the HTTP API on.
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// Port for the HTTP API.
    #[arg(long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Path to the tgpt binary.
    #[arg(long, env = "TGPT_BIN", default_value = "tgpt")]
    pub tgpt_bin: String,

    /// Per-invocation timeout in seconds, applied to every provider call.
    #[arg(long = "tgpt-timeout", env = "TGPT_TIMEOUT", default_value_t = 75)]
    pub tgpt_timeout_secs: u64,

    /// SQLite database for conversation history. History is disabled if unset.
    #[arg(long, env = "FANOUT_DB_PATH")]
    pub db_path: Option<String>,

    /// Directory dataset files are appended in.
    #[arg(long, env = "DATASET_DIR", default_value = "/var/www/htdocs/datasets")]
    pub dataset_dir: PathBuf,

    /// Closed set of provider names accepted by the relay.
    #[arg(
        long,
        env = "FANOUT_PROVIDERS",
        value_delimiter = ',',
        default_values = DEFAULT_PROVIDERS
    )]
    pub providers: Vec<String>,

    /// Provider used by /ask when the request names none.
    #[arg(long, env = "FANOUT_DEFAULT_PROVIDER", default_value = "phind")]
    pub default_provider: String,

    /// Maximum number of tgpt processes running at once.
    #[arg(long, env = "FANOUT_WORKERS", default_value_t = 5)]
    pub workers: usize,

    /// Maximum rows returned by a history fetch.
    #[arg(long, default_value_t = 500)]
    pub history_limit: usize,
}

impl RelayConfig {
    pub fn tgpt_timeout(&self) -> Duration {
        Duration::from_secs(self.tgpt_timeout_secs)
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            tgpt_bin: "tgpt".to_string(),
            tgpt_timeout_secs: 75,
            db_path: None,
            dataset_dir: PathBuf::from("/var/www/htdocs/datasets"),
            providers: DEFAULT_PROVIDERS.iter().map(|p| p.to_string()).collect(),
            default_provider: "phind".to_string(),
            workers: 5,
            history_limit: 500,
        }
    }
}
