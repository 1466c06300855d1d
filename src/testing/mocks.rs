//! Mock implementations for testing
//!
//! [`MockConnector`] hands the session an in-memory pipe and gives the test
//! the other end as a [`MockBroker`]. [`RecordingSink`] keeps every pin event
//! it receives.

use crate::protocol::{Frame, FrameDecoder, MessageType, STATUS_SUCCESS};
use crate::session::{EventSink, PinEvent};
use crate::transport::{broker_address, Connector, TransportError};
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt, DuplexStream};
use tokio::sync::{mpsc, Notify};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Connector backed by `tokio::io::duplex`. Every successful connect sends
/// the broker end of the pipe to the receiver returned by [`MockConnector::new`].
#[derive(Debug, Clone)]
pub struct MockConnector {
    brokers: mpsc::UnboundedSender<MockBroker>,
    should_fail: Arc<AtomicBool>,
    attempts: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MockBroker>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                brokers: tx,
                should_fail: Arc::new(AtomicBool::new(false)),
                attempts: Arc::new(AtomicUsize::new(0)),
            },
            rx,
        )
    }

    /// Refuse connections until set back to false.
    pub fn set_failing(&self, failing: bool) {
        self.should_fail.store(failing, Ordering::SeqCst);
    }

    /// Connection attempts so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MockConnector {
    type Stream = DuplexStream;

    async fn connect(&self, host: &str, port: u16) -> Result<Self::Stream, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let refused = |reason: &str| TransportError::ConnectFailed {
            address: broker_address(host, port),
            source: io::Error::new(io::ErrorKind::ConnectionRefused, reason.to_string()),
        };

        if self.should_fail.load(Ordering::SeqCst) {
            return Err(refused("mock broker refused"));
        }

        let (client, server) = duplex(PIPE_CAPACITY);
        self.brokers
            .send(MockBroker::new(server))
            .map_err(|_| refused("mock broker receiver dropped"))?;
        Ok(client)
    }
}

/// Broker side of a mock connection.
#[derive(Debug)]
pub struct MockBroker {
    stream: DuplexStream,
    decoder: FrameDecoder,
}

impl MockBroker {
    fn new(stream: DuplexStream) -> Self {
        Self {
            stream,
            decoder: FrameDecoder::new(),
        }
    }

    /// Next frame from the client, or `None` once the client hangs up.
    pub async fn read_frame(&mut self) -> Option<Frame> {
        let mut buf = [0u8; 512];
        loop {
            if let Some(frame) = self.decoder.next_frame() {
                return Some(frame);
            }
            match self.stream.read(&mut buf).await {
                Ok(0) | Err(_) => return None,
                Ok(n) => self.decoder.extend(&buf[..n]),
            }
        }
    }

    /// Skip frames until one of `message_type` arrives.
    pub async fn expect_frame(&mut self, message_type: MessageType) -> Option<Frame> {
        loop {
            let frame = self.read_frame().await?;
            if frame.message_type == message_type {
                return Some(frame);
            }
        }
    }

    pub async fn send(&mut self, frame: &Frame) -> io::Result<()> {
        self.stream.write_all(&frame.to_bytes()).await
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.stream.write_all(bytes).await
    }

    /// Read the login frame and answer it with `status`.
    pub async fn answer_login(&mut self, status: u16) -> Option<Frame> {
        let login = self.expect_frame(MessageType::Login).await?;
        self.send(&Frame::response(login.message_id, status))
            .await
            .ok()?;
        Some(login)
    }

    /// Read the login frame and accept it.
    pub async fn accept_login(&mut self) -> Option<Frame> {
        self.answer_login(STATUS_SUCCESS).await
    }
}

/// Event sink that records everything it receives.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<PinEvent>>,
    notify: Notify,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<PinEvent> {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Wait until at least `count` events were recorded and return them all.
    pub async fn wait_for_events(&self, count: usize) -> Vec<PinEvent> {
        loop {
            let events = self.events();
            if events.len() >= count {
                return events;
            }
            self.notify.notified().await;
        }
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: PinEvent) {
        self.events
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(event);
        self.notify.notify_one();
    }
}
