//! Close-condition records for the transport connection.

use serde::{Deserialize, Serialize};

/// Normal closure, the close handshake completed.
pub const CLOSE_NORMAL: u16 = 1000;
/// Endpoint going away (server shutdown, browser navigation).
pub const CLOSE_GOING_AWAY: u16 = 1001;
/// Abnormal closure: the connection dropped without a close frame.
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Reason substituted when an abnormal closure carries no reason of its own.
pub const ABNORMAL_CLOSE_REASON: &str = "Abnormal closure (no close frame received)";

/// The last observed close condition for a connection.
///
/// Any close code the server sends is stored verbatim; only a bare 1006
/// (no close frame at all) gets [`ABNORMAL_CLOSE_REASON`] substituted so
/// consumers always see a descriptive record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseInfo {
    /// Build a close record, substituting the descriptive default reason for
    /// a bare abnormal closure.
    pub fn new(code: u16, reason: impl Into<String>, was_clean: bool) -> Self {
        let mut reason = reason.into();
        if code == CLOSE_ABNORMAL && reason.is_empty() {
            reason = ABNORMAL_CLOSE_REASON.to_string();
        }
        Self {
            code,
            reason,
            was_clean,
        }
    }

    /// Close record for a connection lost without a close frame.
    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self::new(CLOSE_ABNORMAL, reason, false)
    }

    /// Close record for an intentional, clean shutdown.
    pub fn normal() -> Self {
        Self::new(CLOSE_NORMAL, "Normal closure", true)
    }
}
