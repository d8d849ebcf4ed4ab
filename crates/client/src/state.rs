//! Connection lifecycle states.

/// Connection state for the game server link.
///
/// Stored as an `AtomicU8` inside the client so state checks never take a
/// lock; `to_u8`/`from_u8` convert for atomic storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Freshly constructed, never connected
    Idle,
    /// Attempting to establish a connection
    Connecting,
    /// Connection established and usable
    Open,
    /// `disconnect()` called, close handshake in flight
    Closing,
    /// Closed by either side, by error, or by explicit disconnect
    Closed,
}

impl ConnectionState {
    /// Convert to u8 for atomic storage.
    pub fn to_u8(self) -> u8 {
        match self {
            ConnectionState::Idle => 0,
            ConnectionState::Connecting => 1,
            ConnectionState::Open => 2,
            ConnectionState::Closing => 3,
            ConnectionState::Closed => 4,
        }
    }

    /// Convert from u8 (atomic storage).
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ConnectionState::Connecting,
            2 => ConnectionState::Open,
            3 => ConnectionState::Closing,
            4 => ConnectionState::Closed,
            _ => ConnectionState::Idle,
        }
    }
}
