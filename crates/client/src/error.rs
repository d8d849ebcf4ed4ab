//! Error taxonomy for the transport client.
//!
//! None of these are returned from the public operations; they surface
//! through the `error` handler category (and as `false`/`None` results).

use std::time::Duration;

use thiserror::Error;

/// Failure conditions reported to `error` subscribers.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The underlying socket failed (refused connection, protocol error,
    /// reset mid-stream). Always implies the connection is gone.
    #[error("websocket transport error: {0}")]
    Transport(String),

    /// An inbound frame was not a valid `{type, payload}` envelope.
    /// Does not close the connection.
    #[error("malformed inbound frame: {0}")]
    MalformedFrame(#[from] serde_json::Error),

    /// The connection handshake did not complete in time.
    #[error("connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    /// The effective endpoint URL could not be parsed.
    #[error("invalid endpoint url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}
