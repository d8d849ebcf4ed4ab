//! Gridfall Client - realtime transport client for the game server connection.
//!
//! Owns at most one websocket connection to the game server and demultiplexes
//! the inbound `{type, payload}` stream to typed subscribers. UI modules
//! (chat panel, map panel, action bar) consume this crate through
//! [`GameClient`]; they never touch the socket directly.
//!
//! ```rust,ignore
//! let client = GameClient::new(ClientConfig::from_env());
//!
//! client.on_message_type("chat_message", |payload| {
//!     // render the chat line
//! });
//! client.on_disconnect(|info| {
//!     tracing::warn!("lost connection: {} ({})", info.code, info.reason);
//! });
//!
//! let path = client.test_connectivity(None).await;
//! if client.connect(None, path.as_deref()).await {
//!     client.send("player_action", serde_json::json!({"action": "move"}));
//! }
//! ```

mod backoff;
mod client;
mod config;
mod error;
mod registry;
mod state;

pub use client::GameClient;
pub use config::{
    BackoffPolicy, ClientConfig, ReconnectPolicy, DEFAULT_CANDIDATE_PATHS, DEFAULT_SERVER_PORT,
    DEFAULT_SERVER_URL,
};
pub use error::ClientError;
pub use registry::HandlerId;
pub use state::ConnectionState;

// Wire types, re-exported so consumers need only this crate.
pub use gridfall_protocol::{CloseInfo, Envelope};
