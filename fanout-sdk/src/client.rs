//! Async IRC client.
//!
//! Manages the TCP (or TLS) connection, registration with nick fallback,
//! keepalive, and emits [`Event`]s. Commands sent through a
//! [`ClientHandle`] before registration completes are queued and flushed
//! on `001`.
//!
//! ## Reconnection
//!
//! [`run_with_reconnect`] wraps the client in a loop with exponential
//! backoff and rejoins the configured channels after every registration.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_rustls::TlsConnector;
use tokio_rustls::rustls;

use crate::event::Event;
use crate::irc::Message;

/// Nick variants tried after `433` before giving up.
const MAX_NICK_TRIES: u32 = 5;

/// Configuration for connecting to an IRC server.
#[derive(Debug, Clone)]
pub struct ConnectConfig {
    /// Server address (host:port).
    pub server_addr: String,
    pub nick: String,
    /// Username (ident).
    pub user: String,
    pub realname: String,
    /// Use TLS. Port 6697 implies TLS.
    pub tls: bool,
    /// Idle time before the client sends its own PING.
    pub keepalive: Duration,
    /// Idle time after which the connection is considered dead.
    pub ping_timeout: Duration,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            server_addr: "127.0.0.1:6667".to_string(),
            nick: "user".to_string(),
            user: "user".to_string(),
            realname: "fanout".to_string(),
            tls: false,
            keepalive: Duration::from_secs(60),
            ping_timeout: Duration::from_secs(120),
        }
    }
}

/// Commands the consumer can send to the client.
#[derive(Debug)]
pub enum Command {
    Join(String),
    Privmsg { target: String, text: String },
    Quit(Option<String>),
}

/// A handle to a running IRC client connection.
#[derive(Clone)]
pub struct ClientHandle {
    cmd_tx: mpsc::Sender<Command>,
}

impl ClientHandle {
    pub async fn join(&self, channel: &str) -> Result<()> {
        self.cmd_tx.send(Command::Join(channel.to_string())).await?;
        Ok(())
    }

    pub async fn privmsg(&self, target: &str, text: &str) -> Result<()> {
        self.cmd_tx
            .send(Command::Privmsg {
                target: target.to_string(),
                text: text.to_string(),
            })
            .await?;
        Ok(())
    }

    pub async fn quit(&self, message: Option<&str>) -> Result<()> {
        self.cmd_tx
            .send(Command::Quit(message.map(|s| s.to_string())))
            .await?;
        Ok(())
    }
}

/// A connection that has completed TCP (and optionally TLS) but hasn't
/// started IRC registration yet.
pub enum EstablishedConnection {
    Plain(TcpStream),
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

/// Establish TCP (and optionally TLS) connection to the server.
pub async fn establish_connection(config: &ConnectConfig) -> Result<EstablishedConnection> {
    let use_tls = config.tls || config.server_addr.ends_with(":6697");
    let mode = if use_tls { "TLS" } else { "plain" };

    let tcp = TcpStream::connect(&config.server_addr)
        .await
        .with_context(|| format!("TCP connect to {} failed", config.server_addr))?;
    tracing::debug!("TCP connected to {} ({mode})", config.server_addr);

    if !use_tls {
        return Ok(EstablishedConnection::Plain(tcp));
    }

    let connector = TlsConnector::from(Arc::new(rustls_default_config()));
    let host = config
        .server_addr
        .rsplit_once(':')
        .map(|(h, _)| h)
        .unwrap_or(&config.server_addr);
    let dns_name = rustls::pki_types::ServerName::try_from(host.to_string())
        .with_context(|| format!("Invalid TLS server name {host}"))?;
    let tls_stream = connector
        .connect(dns_name, tcp)
        .await
        .with_context(|| format!("TLS handshake with {} failed", config.server_addr))?;
    tracing::debug!("TLS handshake complete");
    Ok(EstablishedConnection::Tls(Box::new(tls_stream)))
}

fn rustls_default_config() -> rustls::ClientConfig {
    let _ = rustls::crypto::ring::default_provider().install_default();
    let root_store =
        rustls::RootCertStore::from_iter(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    rustls::ClientConfig::builder()
        .with_root_certificates(root_store)
        .with_no_client_auth()
}

/// Run the IRC protocol over an already-established connection.
///
/// Returns a handle for sending commands and a receiver for events.
/// The connection runs in a spawned task.
pub fn connect_with_stream(
    conn: EstablishedConnection,
    config: ConnectConfig,
) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let handle = ClientHandle { cmd_tx };

    tokio::spawn(async move {
        let _ = event_tx.send(Event::Connected).await;
        let result = match conn {
            EstablishedConnection::Plain(tcp) => {
                let (reader, writer) = tokio::io::split(tcp);
                run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx).await
            }
            EstablishedConnection::Tls(tls) => {
                let (reader, writer) = tokio::io::split(*tls);
                run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx).await
            }
        };
        if let Err(e) = result {
            let _ = event_tx
                .send(Event::Disconnected {
                    reason: e.to_string(),
                })
                .await;
        }
    });

    (handle, event_rx)
}

/// Connect and run the client in one step. Connection errors arrive as
/// an [`Event::Disconnected`].
pub fn connect(config: ConnectConfig) -> (ClientHandle, mpsc::Receiver<Event>) {
    let (event_tx, event_rx) = mpsc::channel(4096);
    let (cmd_tx, cmd_rx) = mpsc::channel(256);
    let handle = ClientHandle { cmd_tx };

    tokio::spawn(async move {
        let result = async {
            let conn = establish_connection(&config).await?;
            let _ = event_tx.send(Event::Connected).await;
            match conn {
                EstablishedConnection::Plain(tcp) => {
                    let (reader, writer) = tokio::io::split(tcp);
                    run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx)
                        .await
                }
                EstablishedConnection::Tls(tls) => {
                    let (reader, writer) = tokio::io::split(*tls);
                    run_irc(BufReader::new(reader), writer, &config, event_tx.clone(), cmd_rx)
                        .await
                }
            }
        }
        .await;
        if let Err(e) = result {
            let _ = event_tx
                .send(Event::Disconnected {
                    reason: e.to_string(),
                })
                .await;
        }
    });

    (handle, event_rx)
}

async fn run_irc<R, W>(
    mut reader: R,
    mut writer: W,
    config: &ConnectConfig,
    event_tx: mpsc::Sender<Event>,
    mut cmd_rx: mpsc::Receiver<Command>,
) -> Result<()>
where
    R: tokio::io::AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(format!("NICK {}\r\n", config.nick).as_bytes())
        .await?;
    writer
        .write_all(format!("USER {} 0 * :{}\r\n", config.user, config.realname).as_bytes())
        .await?;

    let mut registered = false;
    let mut nick_tries: u32 = 0;
    let mut pending_commands: Vec<Command> = Vec::new();
    // Partial lines survive a cancelled read in `select!`.
    let mut line_buf: Vec<u8> = Vec::new();
    let mut last_activity = Instant::now();
    let mut ping_pending = false;

    loop {
        let deadline = if ping_pending {
            last_activity + config.ping_timeout
        } else {
            last_activity + config.keepalive
        };

        tokio::select! {
            result = reader.read_until(b'\n', &mut line_buf) => {
                let n = result?;
                if n == 0 {
                    let _ = event_tx.send(Event::Disconnected { reason: "EOF".to_string() }).await;
                    break;
                }

                last_activity = Instant::now();
                ping_pending = false;
                // Latin-1 and other legacy encodings still show up on IRC.
                let line = String::from_utf8_lossy(&line_buf).into_owned();
                line_buf.clear();
                let _ = event_tx.send(Event::RawLine(line.trim_end().to_string())).await;

                if let Some(msg) = Message::parse(&line) {
                    match msg.command.as_str() {
                        // ERR_NICKNAMEINUSE
                        "433" if !registered => {
                            nick_tries = nick_tries.saturating_add(1);
                            if nick_tries <= MAX_NICK_TRIES {
                                let alt = format!("{}{}", config.nick, nick_tries);
                                tracing::debug!(nick = %alt, "Nick in use, retrying");
                                writer.write_all(format!("NICK {alt}\r\n").as_bytes()).await?;
                            } else {
                                let _ = event_tx.send(Event::Disconnected { reason: "Nick in use".to_string() }).await;
                                break;
                            }
                        }
                        "001" => {
                            let nick = msg.params.first().cloned().unwrap_or_default();
                            tracing::info!(nick = %nick, "Registered");
                            let _ = event_tx.send(Event::Registered { nick }).await;
                            registered = true;
                            // Flush any commands that were queued before registration
                            for cmd in pending_commands.drain(..) {
                                execute_command(&mut writer, cmd).await?;
                            }
                        }
                        "PING" => {
                            let token = msg.params.first().map(|s| s.as_str()).unwrap_or("");
                            writer.write_all(format!("PONG :{token}\r\n").as_bytes()).await?;
                        }
                        "PONG" => {}
                        "JOIN" => {
                            let channel = msg.params.first().cloned().unwrap_or_default();
                            let nick = msg.source_nick().unwrap_or("").to_string();
                            let _ = event_tx.send(Event::Joined { channel, nick }).await;
                        }
                        "PART" => {
                            let channel = msg.params.first().cloned().unwrap_or_default();
                            let nick = msg.source_nick().unwrap_or("").to_string();
                            let _ = event_tx.send(Event::Parted { channel, nick }).await;
                        }
                        "NICK" => {
                            let old_nick = msg.source_nick().unwrap_or("").to_string();
                            let new_nick = msg.params.first().cloned().unwrap_or_default();
                            if !old_nick.is_empty() && !new_nick.is_empty() {
                                let _ = event_tx.send(Event::NickChanged { old_nick, new_nick }).await;
                            }
                        }
                        "KICK" => {
                            if msg.params.len() >= 2 {
                                let channel = msg.params[0].clone();
                                let nick = msg.params[1].clone();
                                let reason = msg.params.get(2).cloned().unwrap_or_default();
                                let by = msg.source_nick().unwrap_or("server").to_string();
                                let _ = event_tx.send(Event::Kicked { channel, nick, by, reason }).await;
                            }
                        }
                        "QUIT" => {
                            let nick = msg.source_nick().unwrap_or("").to_string();
                            let reason = msg.params.first().cloned().unwrap_or_default();
                            let _ = event_tx.send(Event::UserQuit { nick, reason }).await;
                        }
                        "PRIVMSG" if msg.params.len() >= 2 => {
                            let from = msg.source_nick().unwrap_or("").to_string();
                            let target = msg.params[0].clone();
                            let text = msg.params[1].clone();
                            let tags = msg.tags.clone();
                            let _ = event_tx.send(Event::Message { from, target, text, tags }).await;
                        }
                        "NOTICE" if msg.params.len() >= 2 => {
                            let prefix = msg.prefix.as_deref().unwrap_or("");
                            let text = msg.params[1].clone();
                            if prefix.contains('!') {
                                let from = msg.source_nick().unwrap_or("").to_string();
                                let target = msg.params[0].clone();
                                let _ = event_tx.send(Event::Notice { from, target, text }).await;
                            } else {
                                // No hostmask: the server itself.
                                let _ = event_tx.send(Event::ServerNotice { text }).await;
                            }
                        }
                        "ERROR" => {
                            let text = msg.params.join(" ");
                            tracing::warn!("Server error: {text}");
                            let _ = event_tx.send(Event::ServerNotice { text }).await;
                        }
                        _ => {
                            // Error numerics are surfaced; everything else is only in RawLine.
                            if let Ok(num) = msg.command.parse::<u16>()
                                && (400..600).contains(&num)
                            {
                                let text = if msg.params.len() > 1 {
                                    msg.params[1..].join(" ")
                                } else {
                                    msg.params.join(" ")
                                };
                                let _ = event_tx.send(Event::ServerNotice { text }).await;
                            }
                        }
                    }
                }
            }
            Some(cmd) = cmd_rx.recv() => {
                if registered || matches!(cmd, Command::Quit(_)) {
                    let quitting = matches!(cmd, Command::Quit(_));
                    execute_command(&mut writer, cmd).await?;
                    if quitting && !registered {
                        break;
                    }
                } else {
                    pending_commands.push(cmd);
                }
            }
            _ = tokio::time::sleep_until(deadline) => {
                if ping_pending {
                    let _ = event_tx.send(Event::Disconnected { reason: "Ping timeout".to_string() }).await;
                    break;
                }
                writer.write_all(b"PING :keepalive\r\n").await?;
                ping_pending = true;
            }
        }
    }

    Ok(())
}

/// Execute a single IRC command on the wire.
async fn execute_command<W: AsyncWrite + Unpin>(writer: &mut W, cmd: Command) -> Result<()> {
    let line = match cmd {
        Command::Join(channel) => Message::new("JOIN", &[&channel]).to_string(),
        Command::Privmsg { target, text } => format!("PRIVMSG {target} :{text}"),
        Command::Quit(Some(m)) => format!("QUIT :{m}"),
        Command::Quit(None) => "QUIT".to_string(),
    };
    writer.write_all(format!("{line}\r\n").as_bytes()).await?;
    Ok(())
}

// ── Reconnect helper ──

/// Configuration for automatic reconnection.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt.
    pub initial_delay: Duration,
    /// Maximum delay between reconnect attempts.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_factor: f64,
    /// Channels to join after every registration.
    pub channels: Vec<String>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            channels: Vec::new(),
        }
    }
}

/// Run an event loop with automatic reconnection.
///
/// The `handler` is called for each event. When disconnected, the loop
/// reconnects with exponential backoff and rejoins configured channels.
/// Handler errors are logged and do not stop the loop.
pub async fn run_with_reconnect<F>(
    config: ConnectConfig,
    reconnect_config: ReconnectConfig,
    handler: F,
) -> Result<()>
where
    F: Fn(
            ClientHandle,
            Event,
        ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<()>> + Send>>
        + Send
        + Sync,
{
    let mut delay = reconnect_config.initial_delay;
    let mut consecutive_failures = 0u32;

    loop {
        let conn = match establish_connection(&config).await {
            Ok(c) => {
                consecutive_failures = 0;
                delay = reconnect_config.initial_delay;
                c
            }
            Err(e) => {
                consecutive_failures += 1;
                tracing::warn!(
                    error = %e,
                    attempt = consecutive_failures,
                    delay_secs = delay.as_secs(),
                    "Connection failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, &reconnect_config);
                continue;
            }
        };

        let (handle, mut events) = connect_with_stream(conn, config.clone());

        while let Some(event) = events.recv().await {
            // JOINs sent before registration are dropped by IRC servers.
            if matches!(&event, Event::Registered { .. }) {
                for ch in &reconnect_config.channels {
                    let _ = handle.join(ch).await;
                }
            }
            let disconnected = matches!(&event, Event::Disconnected { .. });
            if let Err(e) = handler(handle.clone(), event).await {
                tracing::error!(error = %e, "Handler error");
            }
            if disconnected {
                break;
            }
        }

        tracing::info!(delay_secs = delay.as_secs(), "Disconnected, will reconnect");
        tokio::time::sleep(delay).await;
        delay = next_delay(delay, &reconnect_config);
    }
}

/// Exponential backoff with up to 25% jitter, capped at `max_delay`.
pub fn next_delay(delay: Duration, config: &ReconnectConfig) -> Duration {
    let millis = delay.as_millis() as u64;
    let jitter = rand_jitter(millis / 4);
    Duration::from_millis(
        ((millis as f64 * config.backoff_factor) as u64 + jitter)
            .min(config.max_delay.as_millis() as u64),
    )
}

/// Cheap jitter from the clock's sub-second nanos.
fn rand_jitter(max: u64) -> u64 {
    if max == 0 {
        return 0;
    }
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .subsec_nanos() as u64;
    nanos % max
}
