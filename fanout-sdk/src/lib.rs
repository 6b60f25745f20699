//! fanout-sdk: a small async IRC client.
//!
//! Handles connection setup (plain or TLS), registration, keepalive and
//! reconnection, and turns server traffic into [`event::Event`]s.

pub mod client;
pub mod event;
pub mod irc;
