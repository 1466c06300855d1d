//! brewlink: IoT cloud broker client
//!
//! Keeps one authenticated TCP session open to a Blynk-style broker, speaks
//! its compact binary frame protocol, and bridges virtual pins to the rest of
//! a controller application.
//!
//! # Overview
//!
//! - [`protocol`]: wire frames and hardware payloads (pure)
//! - [`engine`]: sans-I/O connection state machine with heartbeat liveness
//! - [`session`]: driver task, reconnection, pin events and the push handle
//! - [`transport`]: the `Connector` seam and its TCP implementation
//! - [`config`], [`observability`], [`error`]: ambient plumbing
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use brewlink::config::LinkConfig;
//! use brewlink::session::{Session, SessionConfig, TracingSink};
//! use brewlink::transport::TcpConnector;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LinkConfig::load_from_file(Path::new("brewlink.toml"))?;
//! let session = Session::start(
//!     SessionConfig::from_link_config(&config)?,
//!     TcpConnector::new(config.connect_timeout()),
//!     Arc::new(TracingSink),
//! )?;
//!
//! // Report the wort temperature on virtual pin 1
//! session.handle().push_value(1, 19.5)?;
//!
//! session.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod session;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, LinkConfig};
pub use engine::{ConnectionState, ProtocolEngine};
pub use error::{LinkError, LinkResult};
pub use session::{EventSink, PinEvent, Session, SessionConfig, SessionHandle};
pub use transport::{Connector, TcpConnector};
