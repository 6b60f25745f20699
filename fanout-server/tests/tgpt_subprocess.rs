//! Subprocess behaviour against a fake `tgpt` script.
//!
//! One script dispatches on the provider name so every scenario shares a
//! single binary written before any test spawns it.
#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};

use fanout_server::fanout::Fanout;
use fanout_server::invoker::{STDERR_LIMIT, TgptInvoker, render_reply};

const FAKE_TGPT: &str = r#"#!/bin/sh
# args: -w --provider <name> <prompt>
case "$3" in
  sky) echo "  hello from sky  " ;;
  echo) printf '%s' "$4" ;;
  slow) sleep 5; echo late ;;
  partial) echo "partial answer"; echo "warning" >&2; exit 3 ;;
  broken) echo "  boom: provider unavailable  " >&2; exit 1 ;;
  noisy) awk 'BEGIN { for (i = 0; i < 2000; i++) printf "e" }' >&2; exit 1 ;;
  silent) exit 0 ;;
  *) echo "unknown provider $3" >&2; exit 2 ;;
esac
"#;

fn fake_tgpt() -> PathBuf {
    static DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
    let dir = DIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tgpt");
        std::fs::write(&path, FAKE_TGPT).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        dir
    });
    dir.path().join("tgpt")
}

fn invoker(timeout_secs: u64) -> TgptInvoker {
    TgptInvoker::new(fake_tgpt().to_string_lossy(), Duration::from_secs(timeout_secs))
}

async fn reply(provider: &str, timeout_secs: u64) -> String {
    let r = invoker(timeout_secs).run(provider, "prompt").await;
    render_reply(provider, &r)
}

#[tokio::test]
async fn stdout_is_trimmed() {
    assert_eq!(reply("sky", 10).await, "hello from sky");
}

#[tokio::test]
async fn prompt_is_passed_as_single_argument() {
    let r = invoker(10).run("echo", "two words; $HOME \"quoted\"").await;
    assert_eq!(r.unwrap(), "two words; $HOME \"quoted\"");
}

#[tokio::test]
async fn output_wins_over_nonzero_exit() {
    assert_eq!(reply("partial", 10).await, "partial answer");
}

#[tokio::test]
async fn stderr_only_becomes_error_reply() {
    assert_eq!(
        reply("broken", 10).await,
        "[broken error] boom: provider unavailable"
    );
}

#[tokio::test]
async fn long_stderr_is_truncated() {
    let r = reply("noisy", 10).await;
    let body = r.strip_prefix("[noisy error] ").unwrap();
    assert_eq!(body.len(), STDERR_LIMIT);
}

#[tokio::test]
async fn silent_exit_is_no_output() {
    assert_eq!(reply("silent", 10).await, "[silent] (no output)");
}

#[tokio::test]
async fn timeout_kills_and_reports() {
    let started = Instant::now();
    let r = reply("slow", 1).await;
    assert_eq!(r, "[slow error] timed out after 1s");
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[tokio::test]
async fn slow_provider_does_not_delay_siblings_order() {
    let fanout = Fanout::new(Arc::new(invoker(1)), 5);
    let providers = vec!["slow".to_string(), "sky".to_string(), "broken".to_string()];
    let started = Instant::now();
    let replies = fanout.ask_all(&providers, "hi").await;
    assert!(started.elapsed() < Duration::from_secs(4));

    let got: Vec<_> = replies.iter().map(|r| r.provider.as_str()).collect();
    assert_eq!(got, ["slow", "sky", "broken"]);
    assert!(replies[0].reply.contains("[slow error]"));
    assert_eq!(replies[1].reply, "hello from sky");
    assert_eq!(replies[2].reply, "[broken error] boom: provider unavailable");
}
