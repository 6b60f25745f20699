//! fanout-server: chat relay over the `tgpt` command-line tool.
//!
//! A query is fanned out to one or more tgpt providers in parallel, the
//! replies are gathered within a fixed time budget, recorded per session,
//! and optionally appended to a dataset file.

pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod fanout;
pub mod invoker;
pub mod prompt;
pub mod provider;
pub mod recorder;
pub mod relay;
pub mod server;
pub mod web;
