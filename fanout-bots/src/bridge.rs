//! Message handling for the IRC bridge.

use parking_lot::Mutex;

use fanout_sdk::client::ClientHandle;
use fanout_sdk::event::Event;

use crate::memory::{Memory, memory_context};
use crate::output::{IRC_MAX_LINE, say_lines, split_reply};
use crate::relay::{RelayClient, RelayOutcome};

/// How many recalled facts are replayed as context.
pub const CONTEXT_WINDOW: usize = 12;

pub struct Bridge {
    nick: Mutex<String>,
    memory: Option<Memory>,
    relay: RelayClient,
    recall_limit: usize,
}

impl Bridge {
    pub fn new(nick: &str, memory: Option<Memory>, relay: RelayClient, recall_limit: usize) -> Self {
        Self {
            nick: Mutex::new(nick.to_string()),
            memory,
            relay,
            recall_limit,
        }
    }

    pub fn nick(&self) -> String {
        self.nick.lock().clone()
    }

    /// The query sent to the relay: the user's text plus recent memory.
    pub fn build_query(&self, nick: &str, text: &str) -> String {
        let facts = match &self.memory {
            Some(mem) => mem.recall_facts(nick, self.recall_limit).unwrap_or_else(|e| {
                tracing::error!(nick, "Memory recall failed: {e}");
                Vec::new()
            }),
            None => Vec::new(),
        };
        let context = memory_context(&facts, CONTEXT_WINDOW);
        if context.is_empty() {
            text.to_string()
        } else {
            format!("{text}\n\nMemory context:\n{context}")
        }
    }

    /// Ask the relay on behalf of `nick` and return the IRC lines to post.
    pub async fn respond(&self, nick: &str, text: &str) -> Vec<String> {
        let query = self.build_query(nick, text);
        match self.relay.ask(nick, &query).await {
            Ok(RelayOutcome::Reply(reply)) => {
                if let Some(mem) = &self.memory
                    && let Err(e) = mem.save_fact(nick, self.relay.provider(), &reply)
                {
                    tracing::error!(nick, "Memory save failed: {e}");
                }
                split_reply(&reply, IRC_MAX_LINE)
            }
            Ok(RelayOutcome::Empty) => vec!["No reply from API.".to_string()],
            Ok(RelayOutcome::Status(code)) => vec![format!("API error {code}")],
            Err(e) => {
                tracing::warn!(nick, "Relay request failed: {e}");
                vec![format!("Error: {e}")]
            }
        }
    }

    /// CTCP requests (`\x01VERSION\x01`, `\x01ACTION ...\x01`) are not
    /// questions for the relay.
    pub fn is_ctcp(text: &str) -> bool {
        text.starts_with('\x01')
    }

    /// Where a reply to a message goes: the channel, or the sender for
    /// private messages. `None` for our own messages.
    pub fn reply_target(&self, from: &str, target: &str) -> Option<String> {
        if from.is_empty() || from.eq_ignore_ascii_case(&self.nick.lock()) {
            return None;
        }
        if target.starts_with('#') || target.starts_with('&') {
            Some(target.to_string())
        } else {
            Some(from.to_string())
        }
    }

    pub async fn handle_event(&self, handle: &ClientHandle, event: Event) -> anyhow::Result<()> {
        match event {
            Event::Registered { nick } => {
                tracing::info!(nick = %nick, "Bridge registered");
                *self.nick.lock() = nick;
            }
            Event::NickChanged { old_nick, new_nick } => {
                let mut current = self.nick.lock();
                if old_nick.eq_ignore_ascii_case(&current) {
                    *current = new_nick;
                }
            }
            Event::Joined { channel, nick } if nick.eq_ignore_ascii_case(&self.nick()) => {
                tracing::info!(channel = %channel, "Joined channel");
            }
            Event::Message { from, target, text, .. } => {
                if Self::is_ctcp(&text) {
                    tracing::debug!(from = %from, "Ignoring CTCP request");
                    return Ok(());
                }
                let text = text.trim();
                if text.is_empty() {
                    return Ok(());
                }
                let Some(reply_to) = self.reply_target(&from, &target) else {
                    return Ok(());
                };
                tracing::info!(from = %from, target = %target, "Relaying message");
                let lines = self.respond(&from, text).await;
                say_lines(handle, &reply_to, &lines).await?;
            }
            Event::Notice { from, .. } => {
                tracing::debug!(from = %from, "Ignoring notice");
            }
            Event::Disconnected { reason } => {
                tracing::warn!(reason = %reason, "Disconnected");
            }
            _ => {}
        }
        Ok(())
    }
}
