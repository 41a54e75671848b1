#![forbid(unsafe_code)]

//! Supervised stdio JSON-RPC client for long-running coding agents.
//!
//! - [`acp`]: newline-delimited wire layer and the [`acp::Transport`] value.
//! - [`client`]: request correlation, sessions, and typed notifications.
//! - [`supervisor`]: process lifecycle, crash recovery, and health probes.
//! - [`connection`]: keeps a client bound to whatever process is alive.

pub mod acp;
pub mod client;
pub mod config;
pub mod connection;
pub mod errors;
pub mod supervisor;

pub use config::GlobalConfig;
pub use errors::{AppError, CancelReason, Result};
