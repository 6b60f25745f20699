//! tgpt subprocess invocation.
//!
//! One call runs `tgpt -w --provider <name> <prompt>` to completion under a
//! fixed timeout. Whatever happens, the outcome is reduced to either the
//! trimmed stdout or an [`InvokeError`]; [`render_reply`] turns that into
//! the reply text callers see.

use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::process::Command;

use crate::error::InvokeError;

/// Stderr is cut to this many characters before it is shown to users.
pub const STDERR_LIMIT: usize = 800;

/// Something that can answer a prompt on behalf of a named provider.
pub trait Backend: Send + Sync + 'static {
    fn invoke<'a>(
        &'a self,
        provider: &'a str,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, InvokeError>>;
}

/// Runs the tgpt binary.
#[derive(Debug, Clone)]
pub struct TgptInvoker {
    bin: String,
    timeout: Duration,
}

impl TgptInvoker {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    /// Build the command line for one provider. The prompt is always the
    /// final positional argument; nothing is written to stdin.
    pub fn command(&self, provider: &str, prompt: &str) -> Command {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("-w")
            .arg("--provider")
            .arg(provider)
            .arg(prompt)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub async fn run(&self, provider: &str, prompt: &str) -> Result<String, InvokeError> {
        let child = self.command(provider, prompt).spawn()?;
        // Dropping the wait future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                tracing::warn!(provider, timeout_secs = self.timeout.as_secs(), "tgpt timed out");
                return Err(InvokeError::Timeout(self.timeout));
            }
        };
        if !output.status.success() {
            tracing::debug!(provider, status = %output.status, "tgpt exited unsuccessfully");
        }
        classify_output(&output.stdout, &output.stderr)
    }
}

impl Backend for TgptInvoker {
    fn invoke<'a>(
        &'a self,
        provider: &'a str,
        prompt: &'a str,
    ) -> BoxFuture<'a, Result<String, InvokeError>> {
        Box::pin(self.run(provider, prompt))
    }
}

/// Reduce captured streams to a reply. Non-empty stdout always wins,
/// whatever stderr says and whatever the exit status was.
pub fn classify_output(stdout: &[u8], stderr: &[u8]) -> Result<String, InvokeError> {
    let out = String::from_utf8_lossy(stdout);
    let out = out.trim();
    if !out.is_empty() {
        return Ok(out.to_string());
    }
    let err = String::from_utf8_lossy(stderr);
    let err = err.trim();
    if err.is_empty() {
        Err(InvokeError::NoOutput)
    } else {
        Err(InvokeError::Stderr(err.chars().take(STDERR_LIMIT).collect()))
    }
}

/// Render an invocation outcome the way users see it.
pub fn render_reply(provider: &str, result: &Result<String, InvokeError>) -> String {
    match result {
        Ok(text) => text.clone(),
        Err(InvokeError::NoOutput) => format!("[{provider}] (no output)"),
        Err(e) => format!("[{provider} error] {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stdout_wins_over_stderr() {
        let r = classify_output(b"  hello there \n", b"warning: something");
        assert_eq!(r.unwrap(), "hello there");
    }

    #[test]
    fn stderr_used_when_stdout_blank() {
        let r = classify_output(b" \n\t", b"\n boom \n");
        assert_eq!(render_reply("sky", &r), "[sky error] boom");
    }

    #[test]
    fn stderr_truncated_to_limit_in_chars() {
        let long = "é".repeat(STDERR_LIMIT + 50);
        let r = classify_output(b"", long.as_bytes());
        let rendered = render_reply("phind", &r);
        let body = rendered.strip_prefix("[phind error] ").unwrap();
        assert_eq!(body.chars().count(), STDERR_LIMIT);
    }

    #[test]
    fn both_empty_is_no_output() {
        let r = classify_output(b"", b"   ");
        assert_eq!(render_reply("kimi", &r), "[kimi] (no output)");
    }

    #[test]
    fn timeout_and_pool_errors_render_with_provider() {
        let r = Err(InvokeError::Timeout(Duration::from_secs(75)));
        assert_eq!(render_reply("sky", &r), "[sky error] timed out after 75s");
        let r = Err(InvokeError::PoolClosed);
        assert_eq!(render_reply("sky", &r), "[sky error] relay is shutting down");
    }

    #[test]
    fn command_line_shape() {
        let inv = TgptInvoker::new("tgpt", Duration::from_secs(1));
        let cmd = inv.command("sky", "hello world");
        let std_cmd = cmd.as_std();
        assert_eq!(std_cmd.get_program(), "tgpt");
        let args: Vec<_> = std_cmd.get_args().collect();
        assert_eq!(args, ["-w", "--provider", "sky", "hello world"]);
    }

    #[tokio::test]
    async fn missing_binary_is_launch_error() {
        let inv = TgptInvoker::new("/nonexistent/tgpt-binary", Duration::from_secs(1));
        let r = inv.run("sky", "hi").await;
        assert!(matches!(r, Err(InvokeError::Launch(_))));
        assert!(render_reply("sky", &r).starts_with("[sky error] "));
    }
}
