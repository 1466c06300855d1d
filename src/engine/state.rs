//! Connection state and the per-connection session record

use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;

/// Connection state of one engine instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Initial state, and the state a fresh connection attempt starts from
    Disconnected,
    /// Transport connection is being opened
    Connecting,
    /// Login sent, waiting for the broker's verdict
    Authenticating,
    /// Logged in; frames are processed and pushes are sent
    Authenticated,
    /// Torn down after an error or an explicit close
    Closed,
}

impl ConnectionState {
    /// `Disconnected` and `Closed` both mean there is no live transport.
    pub fn is_connected(self) -> bool {
        !matches!(self, ConnectionState::Disconnected | ConnectionState::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticating => "authenticating",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Closed => "closed",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counters and timestamps belonging to one connection.
///
/// Replaced wholesale when a connection attempt begins, so nothing leaks
/// from a previous connection into the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRecord {
    /// Last message id issued. 0 until the first frame is sent.
    pub last_message_id: u16,
    /// Id of the outstanding heartbeat, 0 when none is outstanding.
    pub pending_heartbeat: u16,
    pub last_heartbeat_at: Option<Instant>,
    pub login_sent_at: Option<Instant>,
    /// Start of the current one-second accounting window.
    pub second_started_at: Option<Instant>,
    /// Rate-limited frames sent in the current window.
    pub sent_this_second: u32,
}

impl SessionRecord {
    /// Issue the next message id.
    pub fn next_message_id(&mut self) -> u16 {
        self.last_message_id = next_message_id(self.last_message_id);
        self.last_message_id
    }

    /// Start a new one-second window if the current one has elapsed.
    /// Returns true when the window rolled over.
    pub fn roll_second(&mut self, now: Instant) -> bool {
        let rolled = match self.second_started_at {
            None => true,
            Some(started) => now.saturating_duration_since(started) >= Duration::from_secs(1),
        };
        if rolled {
            self.second_started_at = Some(now);
            self.sent_this_second = 0;
        }
        rolled
    }
}

/// Successor of `last` in the id sequence: 1, 2, ..., 65535, 1, ...
/// 0 is reserved and never returned.
pub fn next_message_id(last: u16) -> u16 {
    if last == u16::MAX {
        1
    } else {
        last + 1
    }
}
