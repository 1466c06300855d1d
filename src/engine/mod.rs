//! Protocol engine
//!
//! A sans-I/O state machine for one broker connection. The session driver
//! feeds it bytes read from the socket and writes out whatever it queues in
//! its outbound buffer; the engine itself never awaits.
//!
//! ```rust
//! use brewlink::engine::{ConnectionState, EngineSettings, ProtocolEngine};
//! use brewlink::protocol::{Frame, PinCommand, STATUS_SUCCESS};
//! use tokio::time::Instant;
//!
//! let mut engine = ProtocolEngine::new("secret-token", EngineSettings::default());
//! engine.begin_connect();
//! engine.connection_made(Instant::now());
//! assert_eq!(engine.state(), ConnectionState::Authenticating);
//!
//! let login = engine.take_outbound().unwrap();
//! assert_eq!(login[0], 2);
//!
//! let mut commands: Vec<PinCommand> = Vec::new();
//! let ack = Frame::response(1, STATUS_SUCCESS).to_bytes();
//! engine.receive(&ack, &mut commands).unwrap();
//! assert_eq!(engine.state(), ConnectionState::Authenticated);
//! ```

pub mod liveness;
pub mod state;

pub use liveness::{DeadReason, Liveness, LivenessPolicy};
pub use state::{ConnectionState, SessionRecord};

use crate::error::{LinkError, LinkResult, ProtocolError};
use crate::protocol::hardware::{join_fields, virtual_write_payload};
use crate::protocol::{
    Frame, FrameDecoder, HardwareCommand, MessageType, PinCommand, STATUS_SUCCESS,
};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Receives virtual pin commands decoded by the engine, in arrival order.
pub trait CommandSink {
    fn dispatch(&mut self, command: PinCommand);
}

impl CommandSink for Vec<PinCommand> {
    fn dispatch(&mut self, command: PinCommand) {
        self.push(command);
    }
}

/// Engine tuning shared by every connection of a session
#[derive(Debug, Clone, PartialEq)]
pub struct EngineSettings {
    pub heartbeat: Duration,
    /// Must be shorter than `heartbeat`.
    pub response_timeout: Duration,
    pub max_messages_per_sec: u32,
    /// Request a full pin sync right after login succeeds.
    pub sync_on_connect: bool,
    /// Version string announced in the hardware-info frame.
    pub firmware_version: String,
    /// Platform identifier announced in the hardware-info frame.
    pub platform: String,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            heartbeat: Duration::from_secs(10),
            response_timeout: Duration::from_secs(5),
            max_messages_per_sec: 20,
            sync_on_connect: false,
            firmware_version: format!("{}+rs", env!("CARGO_PKG_VERSION")),
            platform: std::env::consts::OS.to_string(),
        }
    }
}

/// One broker connection's protocol state machine
pub struct ProtocolEngine {
    token: String,
    settings: EngineSettings,
    policy: LivenessPolicy,
    state: ConnectionState,
    record: SessionRecord,
    decoder: FrameDecoder,
    outbound: BytesMut,
}

impl fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("state", &self.state)
            .field("record", &self.record)
            .field("outbound_len", &self.outbound.len())
            .finish_non_exhaustive()
    }
}

impl ProtocolEngine {
    pub fn new(token: impl Into<String>, settings: EngineSettings) -> Self {
        let policy = LivenessPolicy::new(settings.heartbeat, settings.response_timeout);
        Self {
            token: token.into(),
            settings,
            policy,
            state: ConnectionState::Disconnected,
            record: SessionRecord::default(),
            decoder: FrameDecoder::new(),
            outbound: BytesMut::new(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn record(&self) -> &SessionRecord {
        &self.record
    }

    /// Id of the outstanding heartbeat, 0 when none.
    pub fn pending_heartbeat(&self) -> u16 {
        self.record.pending_heartbeat
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Discard all per-connection state from the previous attempt and go
    /// back to `Disconnected`. Counters survive `close` until this runs.
    pub fn reset(&mut self) {
        self.record = SessionRecord::default();
        self.decoder.clear();
        self.outbound.clear();
        self.state = ConnectionState::Disconnected;
    }

    /// Start a new connection attempt from a freshly reset engine.
    pub fn begin_connect(&mut self) {
        self.reset();
        self.state = ConnectionState::Connecting;
    }

    /// Transport is up: send the login frame.
    pub fn connection_made(&mut self, now: Instant) {
        let token = Bytes::from(self.token.clone().into_bytes());
        if !self.queue_frame(MessageType::Login, token) {
            // Token longer than a frame can carry; the broker would reject it anyway.
            self.close();
            return;
        }
        self.record.login_sent_at = Some(now);
        self.state = ConnectionState::Authenticating;
        debug!("Login sent, waiting for broker response");
    }

    /// Feed bytes read from the transport. Complete frames are handled in
    /// arrival order; a trailing partial frame stays buffered.
    ///
    /// Errors that require teardown move the engine to `Closed` before
    /// returning, and any frames after the offending one are discarded.
    /// Replies queued for earlier frames stay in the outbound buffer so the
    /// driver can write them before hanging up.
    pub fn receive(&mut self, data: &[u8], sink: &mut impl CommandSink) -> LinkResult<()> {
        self.decoder.extend(data);
        while let Some(frame) = self.decoder.next_frame() {
            if let Err(e) = self.handle_frame(frame, sink) {
                if e.requires_teardown() {
                    self.mark_closed();
                }
                return Err(e);
            }
        }
        Ok(())
    }

    fn handle_frame(&mut self, frame: Frame, sink: &mut impl CommandSink) -> LinkResult<()> {
        match self.state {
            ConnectionState::Authenticating => self.handle_login_response(frame),
            ConnectionState::Authenticated => self.handle_authenticated(frame, sink),
            state => {
                debug!(
                    "Dropping frame type {} received while {}",
                    frame.message_type.as_u8(),
                    state
                );
                Ok(())
            }
        }
    }

    fn handle_login_response(&mut self, frame: Frame) -> LinkResult<()> {
        let accepted = frame.status() == Some(STATUS_SUCCESS) && frame.message_id != 0;
        if !accepted {
            warn!(
                "Broker authentication failed (type {}, id {}, status {})",
                frame.message_type.as_u8(),
                frame.message_id,
                frame.length_or_status
            );
            return Err(LinkError::authentication_failed(
                frame.length_or_status,
                frame.message_id,
            ));
        }

        self.state = ConnectionState::Authenticated;
        let info = join_fields([
            "ver".to_string(),
            self.settings.firmware_version.clone(),
            "h-beat".to_string(),
            self.settings.heartbeat.as_secs().to_string(),
            "dev".to_string(),
            self.settings.platform.clone(),
        ]);
        self.queue_frame(MessageType::HardwareInfo, info);
        info!("Broker access granted");

        if self.settings.sync_on_connect {
            self.sync_all();
        }
        Ok(())
    }

    fn handle_authenticated(&mut self, frame: Frame, sink: &mut impl CommandSink) -> LinkResult<()> {
        if frame.message_id == 0 {
            warn!(
                "Invalid message id 0 on frame type {}, closing connection",
                frame.message_type.as_u8()
            );
            return Err(ProtocolError::ZeroMessageId {
                message_type: frame.message_type.as_u8(),
            }
            .into());
        }

        match frame.message_type {
            MessageType::Response => {
                if frame.message_id == self.record.pending_heartbeat {
                    debug!("Heartbeat {} acknowledged", frame.message_id);
                    self.record.pending_heartbeat = 0;
                } else {
                    debug!(
                        "Response {} for message {}",
                        frame.length_or_status, frame.message_id
                    );
                }
            }
            MessageType::Ping => {
                self.queue(Frame::response(frame.message_id, STATUS_SUCCESS));
            }
            MessageType::Hardware | MessageType::Bridge => {
                self.handle_hardware(&frame.payload, sink);
            }
            other => {
                warn!("Unknown message type {}", other.as_u8());
            }
        }
        Ok(())
    }

    fn handle_hardware(&mut self, payload: &[u8], sink: &mut impl CommandSink) {
        match HardwareCommand::parse(payload) {
            Ok(HardwareCommand::Pin(command)) => sink.dispatch(command),
            Ok(HardwareCommand::Info) | Ok(HardwareCommand::PinMode) => {}
            Ok(HardwareCommand::Unknown(name)) => {
                warn!("Unknown hardware command '{}'", name);
            }
            Err(e) => {
                warn!("Ignoring hardware frame: {}", e);
            }
        }
    }

    /// Push a value to a virtual pin. No-op unless authenticated.
    /// Returns whether a frame was queued.
    pub fn virtual_write(&mut self, pin: u32, value: impl fmt::Display, now: Instant) -> bool {
        if !self.may_send(now) {
            return false;
        }
        self.queue_frame(MessageType::Hardware, virtual_write_payload(pin, value))
    }

    /// Ask the broker to replay every pin value. No-op unless authenticated.
    pub fn sync_all(&mut self) -> bool {
        if self.state != ConnectionState::Authenticated {
            return false;
        }
        self.queue_frame(MessageType::HardwareSync, Bytes::new())
    }

    /// Push notification to the app.
    pub fn notify(&mut self, message: &str, now: Instant) -> bool {
        self.send_text(MessageType::Notify, join_fields([message]), now)
    }

    pub fn tweet(&mut self, message: &str, now: Instant) -> bool {
        self.send_text(MessageType::Tweet, join_fields([message]), now)
    }

    pub fn email(&mut self, to: &str, subject: &str, body: &str, now: Instant) -> bool {
        self.send_text(MessageType::Email, join_fields([to, subject, body]), now)
    }

    fn send_text(&mut self, message_type: MessageType, payload: Bytes, now: Instant) -> bool {
        if !self.may_send(now) {
            return false;
        }
        self.queue_frame(message_type, payload)
    }

    /// Authenticated and under the per-second budget.
    fn may_send(&mut self, now: Instant) -> bool {
        if self.state != ConnectionState::Authenticated {
            return false;
        }
        self.record.roll_second(now);
        if self.record.sent_this_second >= self.settings.max_messages_per_sec {
            warn!(
                "Outbound rate limit of {} messages per second reached, dropping message",
                self.settings.max_messages_per_sec
            );
            return false;
        }
        self.record.sent_this_second += 1;
        true
    }

    /// Run one liveness check. Sends a heartbeat when one is due.
    pub fn check_liveness(&mut self, now: Instant) -> Liveness {
        if self.state.is_connected() {
            self.record.roll_second(now);
        }
        match self.policy.evaluate(self.state, &self.record, now) {
            Liveness::HeartbeatDue => {
                let message_id = self.record.next_message_id();
                self.queue(Frame::ping(message_id));
                self.record.pending_heartbeat = message_id;
                self.record.last_heartbeat_at = Some(now);
                debug!("Heartbeat {} sent", message_id);
                Liveness::HeartbeatSent(message_id)
            }
            other => other,
        }
    }

    /// Tear the connection down. Counters are left alone until the next
    /// `begin_connect`; anything not yet written is dropped.
    pub fn close(&mut self) {
        self.mark_closed();
        self.outbound.clear();
    }

    fn mark_closed(&mut self) {
        if self.state != ConnectionState::Closed {
            debug!("Engine closed while {}", self.state);
        }
        self.state = ConnectionState::Closed;
    }

    /// Instant at which the outstanding login or heartbeat times out.
    pub fn liveness_deadline(&self) -> Option<Instant> {
        self.policy.deadline(self.state, &self.record)
    }

    /// Bytes waiting to be written to the transport.
    pub fn take_outbound(&mut self) -> Option<Bytes> {
        if self.outbound.is_empty() {
            None
        } else {
            Some(self.outbound.split().freeze())
        }
    }

    fn queue_frame(&mut self, message_type: MessageType, payload: Bytes) -> bool {
        let message_id = self.record.next_message_id();
        match Frame::new(message_type, message_id, payload) {
            Ok(frame) => {
                self.queue(frame);
                true
            }
            Err(e) => {
                warn!("Dropping outbound frame: {}", e);
                false
            }
        }
    }

    fn queue(&mut self, frame: Frame) {
        frame.encode(&mut self.outbound);
    }
}
