//! IRC line parsing and serialization.
//!
//! Handles the IRCv3 tag section, an optional prefix, the command and its
//! parameters. The trailing parameter (after ` :`) is stored as the last
//! entry of `params`.

use std::collections::HashMap;
use std::fmt;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Message {
    pub tags: HashMap<String, String>,
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    pub fn new(command: &str, params: &[&str]) -> Self {
        Self {
            tags: HashMap::new(),
            prefix: None,
            command: command.to_string(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    /// Parse a single line. Trailing CR/LF is ignored. Returns `None` for
    /// blank lines or lines without a command.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);

        let mut tags = HashMap::new();
        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw_tags, after) = stripped.split_once(' ')?;
            for tag in raw_tags.split(';').filter(|t| !t.is_empty()) {
                let (key, value) = tag.split_once('=').unwrap_or((tag, ""));
                tags.insert(key.to_string(), unescape_tag_value(value));
            }
            rest = after.trim_start_matches(' ');
        }

        let mut prefix = None;
        if let Some(stripped) = rest.strip_prefix(':') {
            let (p, after) = stripped.split_once(' ')?;
            prefix = Some(p.to_string());
            rest = after.trim_start_matches(' ');
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((c, r)) => (c, r),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }

        let mut params = Vec::new();
        loop {
            rest = rest.trim_start_matches(' ');
            if rest.is_empty() {
                break;
            }
            if let Some(trailing) = rest.strip_prefix(':') {
                params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((p, r)) => {
                    params.push(p.to_string());
                    rest = r;
                }
                None => {
                    params.push(rest.to_string());
                    break;
                }
            }
        }

        Some(Self {
            tags,
            prefix,
            command: command.to_ascii_uppercase(),
            params,
        })
    }

    /// Nick part of the prefix (`nick!user@host` → `nick`).
    pub fn source_nick(&self) -> Option<&str> {
        self.prefix
            .as_deref()
            .and_then(|p| p.split('!').next())
            .filter(|n| !n.is_empty())
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.tags.is_empty() {
            let mut keys: Vec<_> = self.tags.keys().collect();
            keys.sort();
            f.write_str("@")?;
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    f.write_str(";")?;
                }
                let value = &self.tags[key];
                if value.is_empty() {
                    f.write_str(key)?;
                } else {
                    write!(f, "{key}={}", escape_tag_value(value))?;
                }
            }
            f.write_str(" ")?;
        }
        if let Some(prefix) = &self.prefix {
            write!(f, ":{prefix} ")?;
        }
        f.write_str(&self.command)?;
        let last = self.params.len().saturating_sub(1);
        for (i, param) in self.params.iter().enumerate() {
            let needs_colon =
                i == last && (param.is_empty() || param.contains(' ') || param.starts_with(':'));
            if needs_colon {
                write!(f, " :{param}")?;
            } else {
                write!(f, " {param}")?;
            }
        }
        Ok(())
    }
}

fn unescape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {}
        }
    }
    out
}

fn escape_tag_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            ';' => out.push_str("\\:"),
            ' ' => out.push_str("\\s"),
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_privmsg_with_prefix() {
        let msg = Message::parse(":alice!a@host PRIVMSG #chan :hello there\r\n").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("alice!a@host"));
        assert_eq!(msg.source_nick(), Some("alice"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, ["#chan", "hello there"]);
    }

    #[test]
    fn parse_numeric_and_ping() {
        let msg = Message::parse(":irc.example 001 SkyBot :Welcome").unwrap();
        assert_eq!(msg.command, "001");
        assert_eq!(msg.params, ["SkyBot", "Welcome"]);

        let ping = Message::parse("PING :abc123").unwrap();
        assert!(ping.prefix.is_none());
        assert_eq!(ping.params, ["abc123"]);
    }

    #[test]
    fn parse_tags() {
        let msg = Message::parse("@time=2024-01-01T00:00:00Z;note=a\\sb\\:c;flag :n!u@h NOTICE me :x")
            .unwrap();
        assert_eq!(msg.tags["time"], "2024-01-01T00:00:00Z");
        assert_eq!(msg.tags["note"], "a b;c");
        assert_eq!(msg.tags["flag"], "");
        assert_eq!(msg.command, "NOTICE");
    }

    #[test]
    fn parse_rejects_blank() {
        assert!(Message::parse("\r\n").is_none());
        assert!(Message::parse(":onlyprefix").is_none());
    }

    #[test]
    fn display_uses_trailing_only_when_needed() {
        assert_eq!(Message::new("JOIN", &["#chan"]).to_string(), "JOIN #chan");
        assert_eq!(
            Message::new("PRIVMSG", &["#chan", "two words"]).to_string(),
            "PRIVMSG #chan :two words"
        );
        assert_eq!(Message::new("QUIT", &[""]).to_string(), "QUIT :");
    }

    #[test]
    fn display_escapes_tags() {
        let mut msg = Message::new("PRIVMSG", &["#c", "hi"]);
        msg.tags.insert("k".into(), "a b".into());
        assert_eq!(msg.to_string(), "@k=a\\sb PRIVMSG #c hi");
        let reparsed = Message::parse(&msg.to_string()).unwrap();
        assert_eq!(reparsed, msg);
    }
}
