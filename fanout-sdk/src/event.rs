//! Events emitted by the IRC client for bots to consume.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// TCP (and TLS, if enabled) is up; registration is starting.
    Connected,

    /// IRC registration complete. `nick` is our confirmed nick.
    Registered {
        nick: String,
    },

    Joined {
        channel: String,
        nick: String,
    },

    Parted {
        channel: String,
        nick: String,
    },

    /// A channel or private PRIVMSG. CTCP requests arrive here too, with
    /// their `\x01` framing intact.
    Message {
        from: String,
        target: String,
        text: String,
        /// IRCv3 message tags (empty if none).
        tags: HashMap<String, String>,
    },

    /// A NOTICE from a user or service. Never to be answered automatically.
    Notice {
        from: String,
        target: String,
        text: String,
    },

    Kicked {
        channel: String,
        nick: String,
        by: String,
        reason: String,
    },

    NickChanged {
        old_nick: String,
        new_nick: String,
    },

    /// Server notice, ERROR line or error numeric.
    ServerNotice {
        text: String,
    },

    UserQuit {
        nick: String,
        reason: String,
    },

    /// Connection was closed.
    Disconnected {
        reason: String,
    },

    /// Raw server line (for debugging).
    RawLine(String),
}
