//! Pure liveness decisions
//!
//! Decides what a liveness tick should do given the current state and
//! session record. The engine applies the decision; this module only reads.

use super::state::{ConnectionState, SessionRecord};
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of one liveness check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    /// No live transport: the caller should open a new connection.
    Reconnect,
    /// Connection looks healthy and nothing needs sending.
    Idle,
    /// A heartbeat should go out now.
    HeartbeatDue,
    /// A heartbeat went out with this id.
    HeartbeatSent(u16),
    /// The broker stopped answering. The caller tears the connection down.
    Dead(DeadReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadReason {
    HeartbeatTimeout { message_id: u16, waited: Duration },
    HandshakeTimeout { waited: Duration },
}

/// Heartbeat period and the shorter ack timeout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessPolicy {
    pub heartbeat: Duration,
    pub response_timeout: Duration,
}

impl LivenessPolicy {
    pub fn new(heartbeat: Duration, response_timeout: Duration) -> Self {
        Self {
            heartbeat,
            response_timeout,
        }
    }

    /// Decide the next liveness action (pure function).
    pub fn evaluate(
        &self,
        state: ConnectionState,
        record: &SessionRecord,
        now: Instant,
    ) -> Liveness {
        match state {
            ConnectionState::Disconnected | ConnectionState::Closed => Liveness::Reconnect,
            ConnectionState::Connecting => Liveness::Idle,
            ConnectionState::Authenticating => match record.login_sent_at {
                Some(sent) if now.saturating_duration_since(sent) >= self.response_timeout => {
                    Liveness::Dead(DeadReason::HandshakeTimeout {
                        waited: now.saturating_duration_since(sent),
                    })
                }
                _ => Liveness::Idle,
            },
            ConnectionState::Authenticated => self.evaluate_authenticated(record, now),
        }
    }

    fn evaluate_authenticated(&self, record: &SessionRecord, now: Instant) -> Liveness {
        let since_heartbeat = record
            .last_heartbeat_at
            .map(|sent| now.saturating_duration_since(sent));

        if record.pending_heartbeat != 0 {
            if let Some(waited) = since_heartbeat {
                if waited >= self.response_timeout {
                    return Liveness::Dead(DeadReason::HeartbeatTimeout {
                        message_id: record.pending_heartbeat,
                        waited,
                    });
                }
            }
            // Still inside the ack window; never stack a second heartbeat.
            return Liveness::Idle;
        }

        match since_heartbeat {
            None => Liveness::HeartbeatDue,
            Some(elapsed) if elapsed >= self.heartbeat => Liveness::HeartbeatDue,
            Some(_) => Liveness::Idle,
        }
    }

    /// Worst-case time from the broker going silent to the connection being
    /// declared dead.
    pub fn detection_bound(&self) -> Duration {
        self.heartbeat + self.response_timeout
    }

    /// When an outstanding login or heartbeat times out, if one is
    /// outstanding. The driver checks liveness again at that instant instead
    /// of waiting for the next heartbeat tick.
    pub fn deadline(&self, state: ConnectionState, record: &SessionRecord) -> Option<Instant> {
        match state {
            ConnectionState::Authenticating => {
                record.login_sent_at.map(|sent| sent + self.response_timeout)
            }
            ConnectionState::Authenticated if record.pending_heartbeat != 0 => record
                .last_heartbeat_at
                .map(|sent| sent + self.response_timeout),
            _ => None,
        }
    }
}
