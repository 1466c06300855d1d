//! Session driver task
//!
//! One tokio task owns the transport and the protocol engine. It multiplexes
//! the liveness interval, the response deadline of an outstanding login or
//! heartbeat, handle commands and socket reads. Nothing else touches the
//! engine, so the connection state has a single writer.

use super::events::{endpoint_for, EventSink, PinEvent};
use crate::engine::{CommandSink, ConnectionState, DeadReason, Liveness, ProtocolEngine};
use crate::error::LinkError;
use crate::observability::metrics;
use crate::protocol::{PinCommand, PinOperation};
use crate::transport::{broker_address, Connector, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep_until, Instant, MissedTickBehavior};
use tracing::{debug, info, warn, Instrument};

const READ_BUFFER_SIZE: usize = 1024;

/// Requests from a `SessionHandle`, processed in order.
#[derive(Debug)]
pub(crate) enum Command {
    Push { pin: u32, value: f64 },
    SyncAll,
    Notify(String),
    Tweet(String),
    Email {
        to: String,
        subject: String,
        body: String,
    },
    Shutdown,
}

/// Turns decoded pin commands into events for the application.
struct PinBridge<'a> {
    source: &'a str,
    sink: &'a dyn EventSink,
}

impl PinBridge<'_> {
    fn on_write(&self, pin: u32, params: &[String]) {
        metrics().pin_write_received();
        let Some(raw) = params.first() else {
            warn!("Write to v{} without a value", pin);
            return;
        };
        match raw.trim().parse::<f64>() {
            Ok(value) => self.sink.emit(PinEvent {
                source: self.source.to_string(),
                endpoint: endpoint_for(pin),
                value,
            }),
            Err(_) => warn!("Write to v{} with non-numeric value '{}'", pin, raw),
        }
    }

    fn on_read(&self, pin: u32, params: &[String]) {
        metrics().pin_read_received();
        info!("Read request for v{} {:?}", pin, params);
    }
}

impl CommandSink for PinBridge<'_> {
    fn dispatch(&mut self, command: PinCommand) {
        match command.operation {
            PinOperation::Write => self.on_write(command.pin, &command.params),
            PinOperation::Read => self.on_read(command.pin, &command.params),
        }
    }
}

pub(crate) struct Driver<C: Connector> {
    connector: C,
    host: String,
    port: u16,
    source: String,
    heartbeat: Duration,
    engine: ProtocolEngine,
    sink: Arc<dyn EventSink>,
    commands: mpsc::Receiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    link: Option<C::Stream>,
    read_buf: Vec<u8>,
    attempts: u64,
}

impl<C: Connector> Driver<C> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        connector: C,
        host: String,
        port: u16,
        source: String,
        engine: ProtocolEngine,
        sink: Arc<dyn EventSink>,
        commands: mpsc::Receiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        let heartbeat = engine.settings().heartbeat;
        Self {
            connector,
            host,
            port,
            source,
            heartbeat,
            engine,
            sink,
            commands,
            state_tx,
            link: None,
            read_buf: vec![0; READ_BUFFER_SIZE],
            attempts: 0,
        }
    }

    /// Run until shutdown is requested or every handle is dropped.
    pub(crate) async fn run(mut self) {
        // First tick completes immediately, which makes the first connect.
        let mut ticker = interval(self.heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Session driver started for {}", self.address());

        loop {
            let deadline = self.engine.liveness_deadline();
            tokio::select! {
                _ = ticker.tick() => {
                    self.on_tick().await;
                }
                _ = wait_for_deadline(deadline) => {
                    self.on_tick().await;
                }
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.on_command(command).await,
                },
                read = read_link(&mut self.link, &mut self.read_buf) => {
                    self.on_read(read).await;
                }
            }
            self.publish_state();
        }

        self.teardown().await;
        self.publish_state();
        info!("Session driver stopped");
    }

    fn address(&self) -> String {
        broker_address(&self.host, self.port)
    }

    async fn on_tick(&mut self) {
        match self.engine.check_liveness(Instant::now()) {
            Liveness::Reconnect => self.connect().await,
            Liveness::HeartbeatSent(id) => {
                metrics().heartbeat_sent();
                debug!("Heartbeat {} queued", id);
            }
            Liveness::Dead(reason) => {
                match reason {
                    DeadReason::HeartbeatTimeout { message_id, waited } => {
                        metrics().heartbeat_timeout();
                        warn!(
                            "Heartbeat {} unanswered after {:?}, dropping connection",
                            message_id, waited
                        );
                    }
                    DeadReason::HandshakeTimeout { waited } => {
                        warn!("No login response after {:?}, dropping connection", waited);
                    }
                }
                self.teardown().await;
                return;
            }
            Liveness::Idle | Liveness::HeartbeatDue => {}
        }
        self.flush().await;
    }

    async fn connect(&mut self) {
        self.attempts += 1;
        metrics().connection_attempt();
        self.engine.reset();
        self.publish_state();
        self.engine.begin_connect();
        self.publish_state();

        let address = self.address();
        let span = crate::connection_span!(address = %address, attempt = self.attempts);
        let result = self
            .connector
            .connect(&self.host, self.port)
            .instrument(span)
            .await;

        match result {
            Ok(stream) => {
                debug!("Connected to {}", address);
                self.link = Some(stream);
                self.engine.connection_made(Instant::now());
                self.flush().await;
            }
            Err(e) => {
                metrics().connection_failed();
                warn!("Failed to connect to {}: {}, retrying in {:?}", address, e, self.heartbeat);
                self.engine.close();
            }
        }
    }

    async fn on_command(&mut self, command: Command) {
        let now = Instant::now();
        match command {
            Command::Push { pin, value } => {
                if self.engine.virtual_write(pin, value, now) {
                    metrics().value_pushed();
                } else {
                    metrics().value_dropped();
                    debug!("Dropped v{} = {} while {}", pin, value, self.engine.state());
                }
            }
            Command::SyncAll => {
                if !self.engine.sync_all() {
                    debug!("Sync request dropped while {}", self.engine.state());
                }
            }
            Command::Notify(message) => {
                self.engine.notify(&message, now);
            }
            Command::Tweet(message) => {
                self.engine.tweet(&message, now);
            }
            Command::Email { to, subject, body } => {
                self.engine.email(&to, &subject, &body, now);
            }
            Command::Shutdown => {}
        }
        self.flush().await;
    }

    async fn on_read(&mut self, read: Result<usize, TransportError>) {
        let count = match read {
            Ok(count) => count,
            Err(e) => {
                warn!("Lost connection to {}: {}", self.address(), e);
                self.teardown().await;
                return;
            }
        };
        metrics().bytes_in(count);

        let before = self.engine.state();
        let mut bridge = PinBridge {
            source: &self.source,
            sink: self.sink.as_ref(),
        };
        let result = self.engine.receive(&self.read_buf[..count], &mut bridge);

        if let Err(e) = result {
            match &e {
                LinkError::AuthenticationFailed { .. } => metrics().auth_failed(),
                LinkError::Protocol(_) => metrics().protocol_error(),
                _ => {}
            }
            warn!("Connection error: {}", e);
        }

        if before != ConnectionState::Authenticated
            && self.engine.state() == ConnectionState::Authenticated
        {
            metrics().connection_established();
            info!("Authenticated with {}", self.address());
        }

        // Replies to frames ahead of a protocol violation still go out.
        self.flush().await;
        if self.engine.state() == ConnectionState::Closed {
            self.teardown().await;
        }
    }

    /// Write everything the engine queued. Output produced while there is no
    /// live transport is dropped.
    async fn flush(&mut self) {
        let Some(bytes) = self.engine.take_outbound() else {
            return;
        };
        let Some(stream) = self.link.as_mut() else {
            debug!("Dropping {} outbound bytes with no connection", bytes.len());
            return;
        };

        match stream.write_all(&bytes).await {
            Ok(()) => metrics().bytes_out(bytes.len()),
            Err(e) => {
                warn!("{}", TransportError::WriteFailed(e));
                self.teardown().await;
            }
        }
    }

    /// Close the engine and release the transport. Reconnection happens on
    /// the next liveness tick.
    async fn teardown(&mut self) {
        self.engine.close();
        if let Some(mut stream) = self.link.take() {
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown of broker stream failed: {}", e);
            }
            metrics().connection_lost();
        }
    }

    fn publish_state(&self) {
        let state = self.engine.state();
        metrics().set_link_state(state);
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

/// Read from the link, or wait forever when there is none. End of stream
/// is reported as `TransportError::Closed`.
async fn read_link<S: AsyncRead + Unpin>(
    link: &mut Option<S>,
    buf: &mut [u8],
) -> Result<usize, TransportError> {
    let Some(stream) = link else {
        return std::future::pending().await;
    };
    match stream.read(buf).await {
        Ok(0) => Err(TransportError::Closed),
        Ok(count) => Ok(count),
        Err(e) => Err(TransportError::ReadFailed(e)),
    }
}

/// Sleep until the response deadline, or forever when nothing is outstanding.
async fn wait_for_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSink;

    fn bridge_dispatch(sink: &RecordingSink, command: PinCommand) {
        let mut bridge = PinBridge {
            source: "fermenter",
            sink,
        };
        bridge.dispatch(command);
    }

    #[test]
    fn test_write_becomes_pin_event() {
        let sink = RecordingSink::new();
        bridge_dispatch(
            &sink,
            PinCommand {
                pin: 9,
                operation: PinOperation::Write,
                params: vec!["42.5".to_string(), "ignored".to_string()],
            },
        );

        assert_eq!(
            sink.events(),
            vec![PinEvent {
                source: "fermenter".to_string(),
                endpoint: "v9".to_string(),
                value: 42.5,
            }]
        );
    }

    #[test]
    fn test_bad_writes_and_reads_emit_nothing() {
        let sink = RecordingSink::new();
        for params in [vec![], vec!["warm".to_string()]] {
            bridge_dispatch(
                &sink,
                PinCommand {
                    pin: 4,
                    operation: PinOperation::Write,
                    params,
                },
            );
        }
        bridge_dispatch(
            &sink,
            PinCommand {
                pin: 3,
                operation: PinOperation::Read,
                params: vec![],
            },
        );

        assert!(sink.events().is_empty());
    }

    struct BrokenStream;

    impl AsyncRead for BrokenStream {
        fn poll_read(
            self: std::pin::Pin<&mut Self>,
            _cx: &mut std::task::Context<'_>,
            _buf: &mut tokio::io::ReadBuf<'_>,
        ) -> std::task::Poll<std::io::Result<()>> {
            std::task::Poll::Ready(Err(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "reset by peer",
            )))
        }
    }

    #[tokio::test]
    async fn test_read_link_reports_transport_errors() {
        let (client, peer) = tokio::io::duplex(64);
        drop(peer);
        let mut link = Some(client);
        let mut buf = [0u8; 8];
        assert!(matches!(
            read_link(&mut link, &mut buf).await,
            Err(TransportError::Closed)
        ));

        let mut broken = Some(BrokenStream);
        assert!(matches!(
            read_link(&mut broken, &mut buf).await,
            Err(TransportError::ReadFailed(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_wait() {
        let start = Instant::now();
        wait_for_deadline(Some(start + Duration::from_secs(3))).await;
        assert_eq!(start.elapsed(), Duration::from_secs(3));

        let never = tokio::time::timeout(Duration::from_secs(60), wait_for_deadline(None)).await;
        assert!(never.is_err());
    }

    #[tokio::test]
    async fn test_read_link_without_stream_never_completes() {
        let mut link: Option<tokio::io::DuplexStream> = None;
        let mut buf = [0u8; 8];
        let result = tokio::time::timeout(
            Duration::from_millis(10),
            read_link(&mut link, &mut buf),
        )
        .await;
        assert!(result.is_err());
    }
}
