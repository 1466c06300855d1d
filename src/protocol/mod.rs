//! Broker wire protocol
//!
//! Pure encode/decode of frames and hardware payloads. Nothing in here
//! touches a socket.

pub mod frame;
pub mod hardware;

pub use frame::{Frame, FrameDecoder, Header, MessageType, HEADER_SIZE, STATUS_SUCCESS};
pub use hardware::{HardwareCommand, PinCommand, PinOperation};
