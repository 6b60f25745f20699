//! Relay request flow: validation, recording, dataset export and shutdown.

use std::sync::Arc;

use futures::future::BoxFuture;

use fanout_server::config::RelayConfig;
use fanout_server::db::Db;
use fanout_server::error::{InvokeError, RelayError};
use fanout_server::invoker::Backend;
use fanout_server::prompt::BrainstormMessage;
use fanout_server::recorder::Recorder;
use fanout_server::relay::{AskReply, AskRequest, BrainstormRequest, Relay};

/// Answers with the provider name and the first line of the prompt.
struct Echo;

impl Backend for Echo {
    fn invoke<'a>(
        &'a self,
        provider: &'a str,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, InvokeError>> {
        Box::pin(async move {
            if provider == "kimi" {
                return Err(InvokeError::Stderr("quota exceeded".into()));
            }
            let first = prompt.lines().next().unwrap_or_default();
            Ok(format!("{provider} heard {first}"))
        })
    }
}

fn relay(dir: &tempfile::TempDir, db: bool) -> Relay {
    let config = RelayConfig {
        dataset_dir: dir.path().join("datasets"),
        ..RelayConfig::default()
    };
    let recorder = if db {
        Recorder::new(Some(Db::open_memory().unwrap()))
    } else {
        Recorder::disabled()
    };
    Relay::new(&config, Arc::new(Echo), recorder).unwrap()
}

fn ask(session: &str, provider: &str, query: &str) -> AskRequest {
    AskRequest {
        session_id: Some(session.into()),
        provider: Some(provider.into()),
        query: Some(query.into()),
        ..Default::default()
    }
}

#[tokio::test]
async fn single_provider_gives_single_reply() {
    let dir = tempfile::tempdir().unwrap();
    let relay = relay(&dir, true);
    let reply = relay.ask(ask("s1", "sky", "  hello  ")).await.unwrap();
    match reply {
        AskReply::Single { reply, saved_to } => {
            assert_eq!(reply.provider, "sky");
            assert_eq!(reply.reply, "sky heard hello");
            assert!(saved_to.is_none());
        }
        other => panic!("expected single reply, got {other:?}"),
    }
}

#[tokio::test]
async fn default_provider_is_phind() {
    let dir = tempfile::tempdir().unwrap();
    let relay = relay(&dir, false);
    let req = AskRequest {
        query: Some("hi".into()),
        ..Default::default()
    };
    let reply = relay.ask(req).await.unwrap();
    assert_eq!(reply.replies()[0].provider, "phind");
}

#[tokio::test]
async fn group_fans_out_to_every_provider_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let relay = relay(&dir, true);
    let reply = relay.ask(ask("s1", "group", "q")).await.unwrap();
    let providers: Vec<_> = reply.replies().iter().map(|r| r.provider.clone()).collect();
    assert_eq!(providers, ["pollinations", "sky", "phind", "koboldai", "kimi"]);
    assert_eq!(reply.replies()[4].reply, "[kimi error] quota exceeded");
    assert!(matches!(reply, AskReply::Multi { .. }));
}

#[tokio::test]
async fn history_records_user_and_replies() {
    let dir = tempfile::tempdir().unwrap();
    let relay = relay(&dir, true);
    relay.ask(ask("s1", "sky", "first")).await.unwrap();
    relay.ask(ask("s2", "phind", "other")).await.unwrap();

    let hist = relay.history("s1").unwrap();
    assert_eq!(hist.len(), 2);
    assert_eq!(hist[0].provider, "user");
    assert_eq!(hist[0].message, "first");
    assert_eq!(hist[1].provider, "sky");
    assert_eq!(hist[1].message, "sky heard first");
}

#[tokio::test]
async fn invalid_requests_record_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let relay = relay(&dir, true);

    let err = relay.ask(ask("s1", "gpt9", "hello")).await.unwrap_err();
    assert!(matches!(err, RelayError::InvalidProvider(ref p) if p == "gpt9"));
    let err = relay.ask(ask("s1", "sky", "   ")).await.unwrap_err();
    assert!(matches!(err, RelayError::EmptyQuery));

    assert!(relay.history("s1").unwrap().is_empty());
}

#[tokio::test]
async fn storage_disabled_leaves_replies_unchanged() {
    let dir = tempfile::tempdir().unwrap();
    let with_db = relay(&dir, true).ask(ask("s", "sky", "q")).await.unwrap();
    let without = relay(&dir, false);
    let reply = without.ask(ask("s", "sky", "q")).await.unwrap();

    assert_eq!(reply.replies()[0].reply, with_db.replies()[0].reply);
    assert!(without.history("s").unwrap().is_empty());
    assert!(matches!(without.clear_history("s"), Err(RelayError::Storage(_))));
}

#[tokio::test]
async fn clear_history_removes_session() {
    let dir = tempfile::tempdir().unwrap();
    let relay = relay(&dir, true);
    relay.ask(ask("s1", "sky", "q")).await.unwrap();
    assert_eq!(relay.clear_history("s1").unwrap(), 2);
    assert!(relay.history("s1").unwrap().is_empty());
    assert!(matches!(relay.clear_history(" "), Err(RelayError::MissingSession)));
}

#[tokio::test]
async fn csv_lines_dataset_appends() {
    let dir = tempfile::tempdir().unwrap();
    let relay = relay(&dir, true);
    let req = || AskRequest {
        save_dataset: Some("yes".into()),
        save_format: Some("csv".into()),
        filename: Some("runs/one".into()),
        ..ask("s1", "group", "q")
    };

    let first = relay.ask(req()).await.unwrap();
    let path = first.saved_to().unwrap().to_string();
    assert!(path.ends_with("runs_one.csv"), "{path}");
    let after_one = std::fs::read_to_string(&path).unwrap();

    relay.ask(req()).await.unwrap();
    let after_two = std::fs::read_to_string(&path).unwrap();

    assert!(after_two.starts_with(&after_one));
    let lines: Vec<_> = after_two.split("\r\n").filter(|l| !l.is_empty()).collect();
    // one header, then five providers per request
    assert_eq!(lines.len(), 1 + 5 * 2);
    assert_eq!(lines[0], "timestamp,session_id,provider,message,type");
    assert!(lines[1].ends_with(",s1,pollinations,pollinations heard q,bot"));
}

#[tokio::test]
async fn json_dialog_snapshots_history() {
    let dir = tempfile::tempdir().unwrap();
    let relay = relay(&dir, true);
    let req = AskRequest {
        save_dataset: Some("1".into()),
        save_format: Some("json".into()),
        save_shape: Some("dialog".into()),
        filename: Some("dialogs".into()),
        ..ask("s1", "sky", "q")
    };
    let reply = relay.ask(req).await.unwrap();
    let path = reply.saved_to().unwrap();
    let content = std::fs::read_to_string(path).unwrap();
    let record: serde_json::Value = serde_json::from_str(content.trim_end()).unwrap();
    assert_eq!(record["session_id"], "s1");
    let dialog = record["dialog"].as_array().unwrap();
    assert_eq!(dialog.len(), 2);
    assert_eq!(dialog[0]["provider"], "user");
    assert!(record["saved_at"].is_string());
}

#[tokio::test]
async fn save_dataset_needs_truthy_flag() {
    let dir = tempfile::tempdir().unwrap();
    let relay = relay(&dir, false);
    let req = AskRequest {
        save_dataset: Some("0".into()),
        ..ask("s1", "sky", "q")
    };
    let reply = relay.ask(req).await.unwrap();
    assert!(reply.saved_to().is_none());
}

#[tokio::test]
async fn brainstorm_filters_providers_and_records() {
    let dir = tempfile::tempdir().unwrap();
    let relay = relay(&dir, true);
    let req = BrainstormRequest {
        session_id: Some("b1".into()),
        providers: Some(vec!["sky".into(), "nope".into(), "phind".into()]),
        messages: vec![BrainstormMessage {
            provider: "kimi".into(),
            reply: "use a queue".into(),
        }],
        ..Default::default()
    };
    let reply = relay.brainstorm(req).await;
    let providers: Vec<_> = reply.replies().iter().map(|r| r.provider.clone()).collect();
    assert_eq!(providers, ["sky", "phind"]);
    // prompts start with the brainstorm guidance
    assert!(reply.replies()[0].reply.starts_with("sky heard You are in a multi-bot"));
    assert_eq!(relay.history("b1").unwrap().len(), 2);
}

#[tokio::test]
async fn brainstorm_with_only_unknown_providers_uses_all() {
    let dir = tempfile::tempdir().unwrap();
    let relay = relay(&dir, false);
    let req = BrainstormRequest {
        providers: Some(vec!["nope".into()]),
        ..Default::default()
    };
    assert_eq!(relay.brainstorm(req).await.replies().len(), 5);
}

#[tokio::test]
async fn shutdown_rejects_new_work_inline() {
    let dir = tempfile::tempdir().unwrap();
    let relay = relay(&dir, false);
    relay.shutdown();
    assert!(relay.is_shut_down());
    let reply = relay.ask(ask("s", "sky", "q")).await.unwrap();
    assert_eq!(reply.replies()[0].reply, "[sky error] relay is shutting down");
}

/// Answers after a delay long enough for a caller to give up.
struct Sluggish;

impl Backend for Sluggish {
    fn invoke<'a>(
        &'a self,
        provider: &'a str,
        _prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, InvokeError>> {
        Box::pin(async move {
            tokio::time::sleep(std::time::Duration::from_millis(300)).await;
            Ok(format!("{provider} took its time"))
        })
    }
}

#[tokio::test]
async fn reply_is_recorded_after_caller_gives_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = RelayConfig {
        dataset_dir: dir.path().join("datasets"),
        ..RelayConfig::default()
    };
    let recorder = Recorder::new(Some(Db::open_memory().unwrap()));
    let relay = Relay::new(&config, Arc::new(Sluggish), recorder).unwrap();

    let req = AskRequest {
        save_dataset: Some("1".into()),
        filename: Some("late".into()),
        ..ask("s", "sky", "q")
    };
    let gave_up = tokio::time::timeout(std::time::Duration::from_millis(100), relay.ask(req)).await;
    assert!(gave_up.is_err());

    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
    let history = relay.history("s").unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].provider, "user");
    assert_eq!(history[1].provider, "sky");
    assert_eq!(history[1].message, "sky took its time");

    let csv = std::fs::read_to_string(dir.path().join("datasets").join("late.csv")).unwrap();
    assert!(csv.contains("sky took its time"));
}
