//! fanout-bots: an IRC bridge in front of the fanout relay.
//!
//! Channel and private messages are forwarded to the relay's `/ask`
//! endpoint with a short per-nick memory attached, and the reply is posted
//! back in IRC-sized lines.

pub mod bridge;
pub mod memory;
pub mod output;
pub mod relay;
