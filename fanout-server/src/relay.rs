//! The relay context: provider set, worker pool, history and datasets.
//!
//! One `Relay` is built at start-up and shared by every request handler.
//! It owns everything the request flow touches, so there is no global
//! state; `shutdown` closes the worker pool before the process exits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::config::RelayConfig;
use crate::dataset::{DatasetEntry, DatasetFormat, DatasetShape, Exporter};
use crate::db::{Db, EntryKind, HistoryEntry};
use crate::error::{InvokeError, RelayError};
use crate::fanout::{Fanout, ProviderReply, now_str};
use crate::invoker::{Backend, TgptInvoker, render_reply};
use crate::prompt::{self, BrainstormMessage};
use crate::provider::{GROUP, ProviderSet};
use crate::recorder::Recorder;

/// Form fields accepted by `/ask`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AskRequest {
    pub session_id: Option<String>,
    pub provider: Option<String>,
    pub query: Option<String>,
    pub save_dataset: Option<String>,
    pub save_format: Option<String>,
    pub save_shape: Option<String>,
    pub filename: Option<String>,
}

/// JSON body accepted by `/brainstorm`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrainstormRequest {
    pub session_id: Option<String>,
    pub providers: Option<Vec<String>>,
    #[serde(default)]
    pub messages: Vec<BrainstormMessage>,
    pub save_dataset: Option<serde_json::Value>,
    pub save_format: Option<String>,
    pub save_shape: Option<String>,
    pub filename: Option<String>,
}

/// What a caller gets back: one reply for a single provider, a list
/// otherwise. `saved_to` is present only when a dataset was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AskReply {
    Single {
        #[serde(flatten)]
        reply: ProviderReply,
        #[serde(skip_serializing_if = "Option::is_none")]
        saved_to: Option<String>,
    },
    Multi {
        multi: Vec<ProviderReply>,
        #[serde(skip_serializing_if = "Option::is_none")]
        saved_to: Option<String>,
    },
}

impl AskReply {
    pub fn replies(&self) -> Vec<&ProviderReply> {
        match self {
            Self::Single { reply, .. } => vec![reply],
            Self::Multi { multi, .. } => multi.iter().collect(),
        }
    }

    pub fn saved_to(&self) -> Option<&str> {
        match self {
            Self::Single { saved_to, .. } | Self::Multi { saved_to, .. } => saved_to.as_deref(),
        }
    }
}

/// Dataset options shared by both request kinds.
#[derive(Debug, Clone)]
struct DatasetOptions {
    format: DatasetFormat,
    shape: DatasetShape,
    filename: Option<String>,
}

impl DatasetOptions {
    fn from_fields(format: Option<&str>, shape: Option<&str>, filename: Option<&str>) -> Self {
        Self {
            format: DatasetFormat::parse(format.unwrap_or("csv")),
            shape: DatasetShape::parse(shape.unwrap_or("lines")),
            filename: filename
                .map(str::trim)
                .filter(|f| !f.is_empty())
                .map(str::to_string),
        }
    }
}

/// Form-style truthiness for `save_dataset`.
pub fn is_truthy(value: &str) -> bool {
    matches!(value.trim(), "1" | "true" | "True" | "yes" | "on")
}

/// JSON truthiness for `save_dataset` in brainstorm bodies.
fn json_truthy(value: &serde_json::Value) -> bool {
    use serde_json::Value;
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn non_empty(value: Option<&str>, fallback: &str) -> String {
    match value.map(str::trim) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => fallback.to_string(),
    }
}

/// Where gathered replies end up: history and dataset files.
struct Sink {
    recorder: Recorder,
    exporter: Exporter,
    history_limit: usize,
}

pub struct Relay {
    providers: ProviderSet,
    default_provider: String,
    fanout: Arc<Fanout>,
    sink: Arc<Sink>,
    timeout: Duration,
    started: Instant,
}

impl Relay {
    /// Build a relay around an arbitrary backend and recorder.
    pub fn new(config: &RelayConfig, backend: Arc<dyn Backend>, recorder: Recorder) -> Result<Self> {
        let exporter = Exporter::new(&config.dataset_dir)?;
        Ok(Self {
            providers: ProviderSet::new(config.providers.iter().cloned()),
            default_provider: config.default_provider.clone(),
            fanout: Arc::new(Fanout::new(backend, config.workers)),
            sink: Arc::new(Sink {
                recorder,
                exporter,
                history_limit: config.history_limit,
            }),
            timeout: config.tgpt_timeout(),
            started: Instant::now(),
        })
    }

    /// Build the production relay: tgpt backend plus SQLite history when a
    /// database path is configured. A database that fails to open leaves
    /// history disabled rather than stopping the relay.
    pub fn from_config(config: &RelayConfig) -> Result<Self> {
        let backend = Arc::new(TgptInvoker::new(&config.tgpt_bin, config.tgpt_timeout()));
        let db = match &config.db_path {
            Some(path) => match Db::open(path) {
                Ok(db) => {
                    tracing::info!("Opened history database: {path}");
                    Some(db)
                }
                Err(e) => {
                    tracing::warn!("History disabled, failed to open {path}: {e}");
                    None
                }
            },
            None => {
                tracing::info!("No database configured, history disabled");
                None
            }
        };
        Self::new(config, backend, Recorder::new(db))
    }

    pub fn providers(&self) -> &ProviderSet {
        &self.providers
    }

    pub fn workers(&self) -> usize {
        self.fanout.workers()
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn history_enabled(&self) -> bool {
        self.sink.recorder.is_enabled()
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn is_shut_down(&self) -> bool {
        self.fanout.is_closed()
    }

    /// Ask one provider, or every provider for `group`.
    pub async fn ask(&self, req: AskRequest) -> Result<AskReply, RelayError> {
        let session_id = non_empty(req.session_id.as_deref(), "default");
        let requested = non_empty(req.provider.as_deref(), &self.default_provider);
        let query = req.query.as_deref().map(str::trim).unwrap_or("");

        if query.is_empty() {
            return Err(RelayError::EmptyQuery);
        }
        let providers = self.providers.resolve(&requested)?;

        self.sink
            .recorder
            .append(&session_id, "user", query, EntryKind::User);

        let dataset = req.save_dataset.as_deref().is_some_and(is_truthy).then(|| {
            DatasetOptions::from_fields(
                req.save_format.as_deref(),
                req.save_shape.as_deref(),
                req.filename.as_deref(),
            )
        });
        tracing::info!(session_id = %session_id, providers = ?providers, "Fanning out query");
        let (replies, saved_to) = self
            .run_round(session_id, providers, prompt::ask_prompt(query), EntryKind::Bot, dataset)
            .await;

        match <[ProviderReply; 1]>::try_from(replies) {
            Ok([reply]) => Ok(AskReply::Single { reply, saved_to }),
            Err(multi) => Ok(AskReply::Multi { multi, saved_to }),
        }
    }

    /// Replay recent brainstorm turns to several providers at once.
    pub async fn brainstorm(&self, req: BrainstormRequest) -> AskReply {
        let session_id = non_empty(req.session_id.as_deref(), "default");
        let requested = req.providers.unwrap_or_else(|| vec![GROUP.to_string()]);
        let providers = self.providers.filter(&requested);

        tracing::info!(session_id = %session_id, providers = ?providers, "Starting brainstorm round");
        let dataset = req.save_dataset.as_ref().is_some_and(json_truthy).then(|| {
            DatasetOptions::from_fields(
                req.save_format.as_deref(),
                req.save_shape.as_deref(),
                req.filename.as_deref(),
            )
        });
        let prompt = prompt::brainstorm_prompt(&req.messages);
        let (replies, saved_to) = self
            .run_round(session_id, providers, prompt, EntryKind::Brainstorm, dataset)
            .await;

        AskReply::Multi {
            multi: replies,
            saved_to,
        }
    }

    pub fn history(&self, session_id: &str) -> Result<Vec<HistoryEntry>, RelayError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(RelayError::MissingSession);
        }
        Ok(self.sink.recorder.fetch(session_id, self.sink.history_limit))
    }

    pub fn clear_history(&self, session_id: &str) -> Result<usize, RelayError> {
        let session_id = session_id.trim();
        if session_id.is_empty() {
            return Err(RelayError::MissingSession);
        }
        self.sink.recorder.clear(session_id)
    }

    /// Stop accepting provider work. In-flight subprocesses finish;
    /// anything still waiting for a slot gets a shutdown reply.
    pub fn shutdown(&self) {
        if !self.fanout.is_closed() {
            tracing::info!("Closing worker pool");
            self.fanout.close();
        }
    }

    /// Fan out, record the replies and export them. The round runs in its
    /// own task, so it completes and is persisted even when the caller
    /// stops waiting.
    async fn run_round(
        &self,
        session_id: String,
        providers: Vec<String>,
        prompt: String,
        kind: EntryKind,
        dataset: Option<DatasetOptions>,
    ) -> (Vec<ProviderReply>, Option<String>) {
        let fanout = Arc::clone(&self.fanout);
        let sink = Arc::clone(&self.sink);
        let requested = providers.clone();
        let round = tokio::spawn(async move {
            let replies = fanout.ask_all(&providers, &prompt).await;
            let entries = sink.record_replies(&session_id, &replies, kind);
            let saved_to = dataset.and_then(|opts| sink.save_dataset(&session_id, &opts, &entries));
            (replies, saved_to)
        });
        match round.await {
            Ok(done) => done,
            Err(e) => {
                tracing::error!(error = %e, "Fan-out round failed");
                let err = Err(InvokeError::Join(e.to_string()));
                let replies = requested
                    .into_iter()
                    .map(|provider| ProviderReply {
                        reply: render_reply(&provider, &err),
                        provider,
                        timestamp: now_str(),
                    })
                    .collect();
                (replies, None)
            }
        }
    }
}

impl Sink {
    fn record_replies(
        &self,
        session_id: &str,
        replies: &[ProviderReply],
        kind: EntryKind,
    ) -> Vec<DatasetEntry> {
        replies
            .iter()
            .map(|r| {
                self.recorder
                    .append_at(session_id, &r.provider, &r.reply, kind, &r.timestamp);
                DatasetEntry {
                    provider: r.provider.clone(),
                    message: r.reply.clone(),
                    timestamp: r.timestamp.clone(),
                    kind,
                }
            })
            .collect()
    }

    fn save_dataset(
        &self,
        session_id: &str,
        opts: &DatasetOptions,
        entries: &[DatasetEntry],
    ) -> Option<String> {
        let path = self.exporter.path_for(opts.filename.as_deref(), opts.format);
        let result = match opts.shape {
            DatasetShape::Dialog => {
                let dialog = if self.recorder.is_enabled() {
                    self.recorder.fetch(session_id, self.history_limit)
                } else {
                    entries
                        .iter()
                        .map(|e| HistoryEntry {
                            provider: e.provider.clone(),
                            message: e.message.clone(),
                            timestamp: e.timestamp.clone(),
                        })
                        .collect()
                };
                self.exporter
                    .export_dialog(&path, session_id, opts.format, &dialog)
            }
            DatasetShape::Lines => self
                .exporter
                .export_lines(&path, session_id, opts.format, entries),
        };
        match result {
            Ok(()) => Some(path.display().to_string()),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Dataset export failed");
                None
            }
        }
    }
}

/// Shared handle used by the HTTP layer.
pub type SharedRelay = Arc<Relay>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truthy_values() {
        for v in ["1", "true", "True", "yes", "on", " on "] {
            assert!(is_truthy(v), "{v}");
        }
        for v in ["0", "false", "", "TRUE", "no"] {
            assert!(!is_truthy(v), "{v}");
        }
    }

    #[test]
    fn json_truthiness_follows_value_emptiness() {
        use serde_json::json;
        assert!(json_truthy(&json!(true)));
        assert!(json_truthy(&json!(1)));
        assert!(json_truthy(&json!("no")));
        assert!(!json_truthy(&json!(false)));
        assert!(!json_truthy(&json!(0)));
        assert!(!json_truthy(&json!("")));
        assert!(!json_truthy(&json!(null)));
    }

    #[test]
    fn single_reply_serializes_flat() {
        let reply = AskReply::Single {
            reply: ProviderReply {
                provider: "sky".into(),
                reply: "hi".into(),
                timestamp: "2024-01-01 00:00:00".into(),
            },
            saved_to: None,
        };
        let v = serde_json::to_value(&reply).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"provider": "sky", "reply": "hi", "timestamp": "2024-01-01 00:00:00"})
        );
    }
}
