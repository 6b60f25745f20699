//! Prompt shaping for direct questions and multi-bot brainstorms.

use serde::{Deserialize, Serialize};

/// Appended to every /ask query to keep replies short and on topic.
pub const ASK_GUIDANCE: &str = "Please answer clearly. If code is needed include it. \
Avoid repeating earlier content verbatim. If you refer to another bot, name it. \
Keep replies focused.";

pub const BRAINSTORM_GUIDANCE: &str = "You are in a multi-bot brainstorming. \
Improve and refine ideas; don't repeat verbatim. Be concise but thorough. \
If code is needed, include it. Cite which bot you're responding to when relevant.\n\
Coding guidelines:\n\
- Never resend the entire file unless explicitly asked.\n\
- Always suggest localized changes (\"Insert below line 120\", \"Replace line 85 with\", \
\"Add this block before function main()\").\n\
- If line numbers may differ, use keyword anchors (\"Insert after the line containing `fn clear_history`\").\n\
- If multiple edits are required, list them step by step.\n\
- Keep diffs small, precise, and easy to apply.\n\
Goal:\n\
- Collaborate constructively.\n\
- Avoid duplication; build on each other's points.\n\
- Keep memory efficient: no unnecessary repetition.";

/// Only this many trailing brainstorm messages are replayed as context.
pub const BRAINSTORM_WINDOW: usize = 12;

/// A prior brainstorm turn supplied by the caller.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrainstormMessage {
    #[serde(default = "unknown_provider")]
    pub provider: String,
    #[serde(default)]
    pub reply: String,
}

fn unknown_provider() -> String {
    "unknown".to_string()
}

pub fn ask_prompt(query: &str) -> String {
    format!("{query}\n\n{ASK_GUIDANCE}")
}

pub fn brainstorm_prompt(messages: &[BrainstormMessage]) -> String {
    let start = messages.len().saturating_sub(BRAINSTORM_WINDOW);
    let lines: Vec<String> = messages[start..]
        .iter()
        .filter_map(|m| {
            let text = m.reply.trim();
            (!text.is_empty()).then(|| format!("{}: {text}", m.provider))
        })
        .collect();
    format!(
        "{BRAINSTORM_GUIDANCE}\n\nContext so far:\n{}\n\nYour improved contribution:",
        lines.join("\n")
    )
}
