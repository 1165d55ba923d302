//! Wire types for the scout agent protocol.
//!
//! This crate contains the serde-serializable messages exchanged between a
//! requester and the agent over a WebSocket connection. Every frame is a
//! single UTF-8 JSON object carrying a `type` discriminator.
//!
//! # Design Philosophy
//!
//! Types in this crate are:
//! * Pure data: No behavior beyond serialization/deserialization
//! * 1:1 with the wire: field names match the JSON exactly
//! * Stable: Changes only when the wire protocol changes
//!
//! Admission, validation and execution live in `scout-runtime` and
//! `scout-agent`.

pub mod client;
pub mod server;

pub use client::*;
pub use server::*;
