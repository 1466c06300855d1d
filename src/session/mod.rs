//! Session adapter
//!
//! Owns the broker address and credentials, runs the driver task that keeps
//! the connection alive, and bridges virtual pins to the application: pin
//! writes from the broker become [`PinEvent`]s on the injected
//! [`EventSink`], and local value changes go out through a
//! [`SessionHandle`].

mod driver;
pub mod events;

pub use events::{endpoint_for, parse_endpoint, ChannelSink, EventSink, PinEvent, TracingSink};

use crate::config::{ConfigError, LinkConfig};
use crate::engine::{ConnectionState, EngineSettings, ProtocolEngine};
use crate::error::{LinkError, LinkResult};
use crate::observability::metrics;
use crate::transport::Connector;
use driver::{Command, Driver};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{warn, Instrument};

/// Default depth of the handle command queue.
pub const DEFAULT_COMMAND_QUEUE: usize = 64;

/// Everything a session needs to reach and log into the broker.
#[derive(Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub token: String,
    /// Source name stamped on emitted pin events
    pub source: String,
    pub engine: EngineSettings,
    pub command_queue: usize,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("token", &"***")
            .field("source", &self.source)
            .field("engine", &self.engine)
            .field("command_queue", &self.command_queue)
            .finish()
    }
}

impl SessionConfig {
    pub fn new(host: impl Into<String>, port: u16, token: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            token: token.into(),
            source: "blynk".to_string(),
            engine: EngineSettings::default(),
            command_queue: DEFAULT_COMMAND_QUEUE,
        }
    }

    /// Build from a loaded config file, resolving the token.
    pub fn from_link_config(config: &LinkConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let token = config.resolve_token()?;
        Ok(Self {
            host: config.broker.host.clone(),
            port: config.broker.port,
            token,
            source: config.device.name.clone(),
            engine: config.engine_settings(),
            command_queue: DEFAULT_COMMAND_QUEUE,
        })
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_engine_settings(mut self, engine: EngineSettings) -> Self {
        self.engine = engine;
        self
    }
}

/// A running session: the driver task plus a handle to it.
pub struct Session {
    handle: SessionHandle,
    task: JoinHandle<()>,
}

impl Session {
    /// Spawn the driver task. Must be called inside a tokio runtime. The
    /// first connection attempt starts immediately; failures are retried on
    /// every liveness tick.
    pub fn start<C: Connector>(
        config: SessionConfig,
        connector: C,
        sink: Arc<dyn EventSink>,
    ) -> LinkResult<Self> {
        if config.token.trim().is_empty() {
            return Err(LinkError::Config(ConfigError::MissingToken));
        }
        if config.host.trim().is_empty() {
            return Err(LinkError::Config(ConfigError::InvalidConfig(
                "broker host must not be empty".to_string(),
            )));
        }

        let (command_tx, command_rx) = mpsc::channel(config.command_queue.max(1));
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        let span = crate::session_span!(host = %config.host, port = config.port, source = %config.source);
        let engine = ProtocolEngine::new(config.token, config.engine);
        let driver = Driver::new(
            connector,
            config.host,
            config.port,
            config.source,
            engine,
            sink,
            command_rx,
            state_tx,
        );
        let task = tokio::spawn(driver.run().instrument(span));

        Ok(Self {
            handle: SessionHandle {
                commands: command_tx,
                state: state_rx,
            },
            task,
        })
    }

    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.handle.state()
    }

    /// Orderly shutdown. Commands queued before this call are still
    /// processed, then the connection is closed and the driver joined.
    pub async fn stop(self) -> LinkResult<()> {
        let Session { handle, task } = self;
        if handle.commands.send(Command::Shutdown).await.is_err() {
            warn!("Session driver already gone");
        }
        drop(handle);

        task.await.map_err(|e| {
            warn!("Session driver ended abnormally: {}", e);
            LinkError::SessionClosed
        })
    }
}

/// Cheap, cloneable access to a running session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    /// Push a value to virtual pin `pin`. Dropped silently by the engine
    /// unless the link is authenticated.
    pub fn push_value(&self, pin: u32, value: f64) -> LinkResult<()> {
        self.enqueue(Command::Push { pin, value })
    }

    /// Push a value to a `v<pin>` endpoint.
    pub fn callback(&self, identifier: &str, value: f64) -> LinkResult<()> {
        let pin = parse_endpoint(identifier)
            .ok_or_else(|| LinkError::InvalidEndpoint(identifier.to_string()))?;
        self.push_value(pin, value)
    }

    /// Ask the broker to replay every pin value.
    pub fn sync_all(&self) -> LinkResult<()> {
        self.enqueue(Command::SyncAll)
    }

    pub fn notify(&self, message: impl Into<String>) -> LinkResult<()> {
        self.enqueue(Command::Notify(message.into()))
    }

    pub fn tweet(&self, message: impl Into<String>) -> LinkResult<()> {
        self.enqueue(Command::Tweet(message.into()))
    }

    pub fn email(
        &self,
        to: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> LinkResult<()> {
        self.enqueue(Command::Email {
            to: to.into(),
            subject: subject.into(),
            body: body.into(),
        })
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Wait until the link reaches `target`. Fails if the session stops
    /// first.
    pub async fn wait_for_state(&self, target: ConnectionState) -> LinkResult<()> {
        let mut state = self.state.clone();
        state
            .wait_for(|current| *current == target)
            .await
            .map(|_| ())
            .map_err(|_| LinkError::SessionClosed)
    }

    /// A watch receiver for callers that want every state change.
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn is_running(&self) -> bool {
        !self.commands.is_closed()
    }

    fn enqueue(&self, command: Command) -> LinkResult<()> {
        match self.commands.try_send(command) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(command)) => {
                metrics().value_dropped();
                warn!("Session command queue full, dropping {:?}", command);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(LinkError::SessionClosed),
        }
    }
}
