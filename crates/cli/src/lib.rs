//! Local agent that runs allow-listed reconnaissance tools on behalf of
//! WebSocket clients and streams their output back.
//!
//! The binary is a thin wrapper: [`cli`] parses arguments, [`commands`]
//! dispatches them, and [`server`] owns the connection lifecycle. Admission
//! decisions live in [`policy`]; everything that touches a subprocess lives
//! in the `scout-runtime` crate.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod policy;
pub mod server;

pub use config::AgentConfig;
pub use error::{AgentError, Result};
