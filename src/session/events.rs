//! Pin events flowing from the broker into the application

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

/// A value written to a virtual pin by the broker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PinEvent {
    /// Device name from configuration
    pub source: String,
    /// `v<pin>`
    pub endpoint: String,
    pub value: f64,
}

/// Receives pin events. Called from the session driver task, so
/// implementations must not block.
pub trait EventSink: Send + Sync + 'static {
    fn emit(&self, event: PinEvent);
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<PinEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PinEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: PinEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("Pin event receiver dropped");
        }
    }
}

/// Logs every event at info level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: PinEvent) {
        info!(
            source = %event.source,
            endpoint = %event.endpoint,
            value = event.value,
            "Pin value received"
        );
    }
}

/// Endpoint identifier for a virtual pin.
pub fn endpoint_for(pin: u32) -> String {
    format!("v{pin}")
}

/// Pin number of a `v<pin>` endpoint identifier.
pub fn parse_endpoint(endpoint: &str) -> Option<u32> {
    endpoint.strip_prefix('v')?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_identifiers() {
        assert_eq!(endpoint_for(9), "v9");
        assert_eq!(parse_endpoint("v9"), Some(9));
        assert_eq!(parse_endpoint("v127"), Some(127));

        assert_eq!(parse_endpoint("9"), None);
        assert_eq!(parse_endpoint("v"), None);
        assert_eq!(parse_endpoint("vx"), None);
        assert_eq!(parse_endpoint("d3"), None);
        assert_eq!(parse_endpoint("v-1"), None);
    }

    #[tokio::test]
    async fn test_channel_sink_forwards_events() {
        let (sink, mut rx) = ChannelSink::new();
        let event = PinEvent {
            source: "fermenter".to_string(),
            endpoint: "v1".to_string(),
            value: 18.5,
        };
        sink.emit(event.clone());
        assert_eq!(rx.recv().await, Some(event));
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, rx) = ChannelSink::new();
        drop(rx);
        sink.emit(PinEvent {
            source: "fermenter".to_string(),
            endpoint: "v1".to_string(),
            value: 0.0,
        });
    }
}
