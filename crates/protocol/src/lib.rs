//! Gridfall Protocol - wire-format types for the client/server connection.
//!
//! This crate contains the types that cross the websocket boundary:
//! - The [`Envelope`] message shape (`{type, payload}`)
//! - Close-condition records ([`CloseInfo`]) and well-known close codes
//!
//! # Design Principles
//!
//! 1. **Minimal dependencies** - only serde and serde_json
//! 2. **No business logic** - pure data types and serialization
//! 3. **Opaque payloads** - the transport never interprets `payload` beyond
//!    JSON decoding; payload schemas belong to the UI modules

pub mod close;
pub mod envelope;

pub use close::{
    CloseInfo, ABNORMAL_CLOSE_REASON, CLOSE_ABNORMAL, CLOSE_GOING_AWAY, CLOSE_NORMAL,
};
pub use envelope::Envelope;
