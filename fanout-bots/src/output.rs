//! Reply formatting for IRC.

use std::time::Duration;

use fanout_sdk::client::ClientHandle;

/// Longest chunk sent in one PRIVMSG.
pub const IRC_MAX_LINE: usize = 400;

/// Split a reply into IRC lines: carriage returns dropped, one entry per
/// line, long lines cut into `max_len`-character chunks. Empty lines are
/// skipped since IRC cannot carry them.
pub fn split_reply(text: &str, max_len: usize) -> Vec<String> {
    let max_len = max_len.max(1);
    let cleaned = text.replace('\r', "");
    let mut result = Vec::new();
    for line in cleaned.split('\n') {
        let chars: Vec<char> = line.chars().collect();
        for chunk in chars.chunks(max_len) {
            result.push(chunk.iter().collect());
        }
    }
    result
}

/// Post lines to a target with a small delay between them to avoid flood.
pub async fn say_lines(handle: &ClientHandle, target: &str, lines: &[String]) -> anyhow::Result<()> {
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        handle.privmsg(target, line).await?;
    }
    Ok(())
}
