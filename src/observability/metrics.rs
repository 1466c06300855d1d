//! Thread-safe link metrics
//!
//! Atomic counters for the broker connection, heartbeat traffic and pin
//! values, plus a serializable snapshot.

use crate::engine::ConnectionState;
use chrono::{DateTime, TimeZone, Utc};
use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics
pub struct MetricsCollector {
    // Connection
    connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    auth_failures: AtomicU64,
    protocol_errors: AtomicU64,
    connected_since: AtomicU64,

    // Heartbeat
    heartbeats_sent: AtomicU64,
    heartbeat_timeouts: AtomicU64,
    last_heartbeat: AtomicU64,

    // Pins
    pin_writes_received: AtomicU64,
    pin_reads_received: AtomicU64,
    values_pushed: AtomicU64,
    values_dropped: AtomicU64,

    // Raw traffic
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,

    link_state: Mutex<ConnectionState>,
    state_transitions: AtomicU64,
    started_at: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            auth_failures: AtomicU64::new(0),
            protocol_errors: AtomicU64::new(0),
            connected_since: AtomicU64::new(0),
            heartbeats_sent: AtomicU64::new(0),
            heartbeat_timeouts: AtomicU64::new(0),
            last_heartbeat: AtomicU64::new(0),
            pin_writes_received: AtomicU64::new(0),
            pin_reads_received: AtomicU64::new(0),
            values_pushed: AtomicU64::new(0),
            values_dropped: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            link_state: Mutex::new(ConnectionState::Disconnected),
            state_transitions: AtomicU64::new(0),
            started_at: AtomicU64::new(current_timestamp()),
        }
    }

    // Connection metrics
    pub fn connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    /// Login accepted by the broker
    pub fn connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.connected.store(true, Ordering::Relaxed);
        self.connected_since
            .store(current_timestamp(), Ordering::Relaxed);
    }

    /// Transport could not be opened
    pub fn connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// An established connection went away
    pub fn connection_lost(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            self.connections_lost.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn auth_failed(&self) {
        self.auth_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn protocol_error(&self) {
        self.protocol_errors.fetch_add(1, Ordering::Relaxed);
    }

    // Heartbeat metrics
    pub fn heartbeat_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        self.last_heartbeat
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn heartbeat_timeout(&self) {
        self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    // Pin metrics
    pub fn pin_write_received(&self) {
        self.pin_writes_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn pin_read_received(&self) {
        self.pin_reads_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn value_pushed(&self) {
        self.values_pushed.fetch_add(1, Ordering::Relaxed);
    }

    /// Push refused: not authenticated, rate limited or queue full
    pub fn value_dropped(&self) {
        self.values_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_in(&self, count: usize) {
        self.bytes_received
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_out(&self, count: usize) {
        self.bytes_sent.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn set_link_state(&self, state: ConnectionState) {
        if let Ok(mut current) = self.link_state.lock() {
            if *current != state {
                self.state_transitions.fetch_add(1, Ordering::Relaxed);
                *current = state;
            }
        }
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        let counters = [
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connections_lost,
            &self.auth_failures,
            &self.protocol_errors,
            &self.connected_since,
            &self.heartbeats_sent,
            &self.heartbeat_timeouts,
            &self.last_heartbeat,
            &self.pin_writes_received,
            &self.pin_reads_received,
            &self.values_pushed,
            &self.values_dropped,
            &self.bytes_received,
            &self.bytes_sent,
            &self.state_transitions,
        ];
        for counter in counters {
            counter.store(0, Ordering::Relaxed);
        }
        self.connected.store(false, Ordering::Relaxed);
        self.started_at
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut state) = self.link_state.lock() {
            *state = ConnectionState::Disconnected;
        }
    }

    /// Get a point-in-time copy of every metric
    pub fn get_metrics(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let connected = self.connected.load(Ordering::Relaxed);
        let connected_since = self.connected_since.load(Ordering::Relaxed);
        let link_state = self
            .link_state
            .lock()
            .map(|state| *state)
            .unwrap_or(ConnectionState::Disconnected);

        MetricsSnapshot {
            collected_at: Utc::now(),
            uptime_seconds: now.saturating_sub(self.started_at.load(Ordering::Relaxed)),
            connection: ConnectionMetrics {
                state: link_state,
                connected,
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                auth_failures: self.auth_failures.load(Ordering::Relaxed),
                protocol_errors: self.protocol_errors.load(Ordering::Relaxed),
                state_transitions: self.state_transitions.load(Ordering::Relaxed),
                connected_seconds: if connected && connected_since > 0 {
                    now.saturating_sub(connected_since)
                } else {
                    0
                },
            },
            heartbeat: HeartbeatMetrics {
                sent: self.heartbeats_sent.load(Ordering::Relaxed),
                timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
                last_sent: to_datetime(self.last_heartbeat.load(Ordering::Relaxed)),
            },
            pins: PinMetrics {
                writes_received: self.pin_writes_received.load(Ordering::Relaxed),
                reads_received: self.pin_reads_received.load(Ordering::Relaxed),
                values_pushed: self.values_pushed.load(Ordering::Relaxed),
                values_dropped: self.values_dropped.load(Ordering::Relaxed),
            },
            traffic: TrafficMetrics {
                bytes_received: self.bytes_received.load(Ordering::Relaxed),
                bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            },
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub collected_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub connection: ConnectionMetrics,
    pub heartbeat: HeartbeatMetrics,
    pub pins: PinMetrics,
    pub traffic: TrafficMetrics,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionMetrics {
    pub state: ConnectionState,
    pub connected: bool,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub auth_failures: u64,
    pub protocol_errors: u64,
    pub state_transitions: u64,
    pub connected_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HeartbeatMetrics {
    pub sent: u64,
    pub timeouts: u64,
    pub last_sent: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PinMetrics {
    pub writes_received: u64,
    pub reads_received: u64,
    pub values_pushed: u64,
    pub values_dropped: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrafficMetrics {
    pub bytes_received: u64,
    pub bytes_sent: u64,
}

fn current_timestamp() -> u64 {
    Utc::now().timestamp().max(0) as u64
}

fn to_datetime(seconds: u64) -> Option<DateTime<Utc>> {
    if seconds == 0 {
        return None;
    }
    Utc.timestamp_opt(seconds as i64, 0).single()
}
