//! Wire format encoding and decoding.
//!
//! Every frame starts with a fixed 5-byte header:
//! ```text
//! ┌──────────┬────────────┬──────────────────┐
//! │ Type     │ Message ID │ Length / Status  │
//! │ 1 byte   │ uint16 BE  │ uint16 BE        │
//! └──────────┴────────────┴──────────────────┘
//! ```
//!
//! Response frames reuse the last field as a status code and carry no
//! payload. Every other type is followed by exactly `length` payload bytes.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::ProtocolError;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 5;

/// Status code carried by a successful response.
pub const STATUS_SUCCESS: u16 = 200;

/// Message identifiers used on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    Response,
    Login,
    Ping,
    Tweet,
    Email,
    Notify,
    Bridge,
    HardwareSync,
    HardwareInfo,
    Hardware,
    /// Anything this client does not know about. Kept so unknown types can
    /// be skipped without losing frame alignment.
    Other(u8),
}

impl MessageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => MessageType::Response,
            2 => MessageType::Login,
            6 => MessageType::Ping,
            12 => MessageType::Tweet,
            13 => MessageType::Email,
            14 => MessageType::Notify,
            15 => MessageType::Bridge,
            16 => MessageType::HardwareSync,
            17 => MessageType::HardwareInfo,
            20 => MessageType::Hardware,
            other => MessageType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            MessageType::Response => 0,
            MessageType::Login => 2,
            MessageType::Ping => 6,
            MessageType::Tweet => 12,
            MessageType::Email => 13,
            MessageType::Notify => 14,
            MessageType::Bridge => 15,
            MessageType::HardwareSync => 16,
            MessageType::HardwareInfo => 17,
            MessageType::Hardware => 20,
            MessageType::Other(value) => value,
        }
    }

    /// Response frames carry a status code in place of a payload length.
    pub fn carries_status(self) -> bool {
        matches!(self, MessageType::Response)
    }
}

/// Decoded 5-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub message_type: MessageType,
    pub message_id: u16,
    pub length_or_status: u16,
}

impl Header {
    /// Decode a header from the first [`HEADER_SIZE`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                needed: HEADER_SIZE,
                available: buf.len(),
            });
        }
        let mut cursor = &buf[..HEADER_SIZE];
        Ok(Header {
            message_type: MessageType::from_u8(cursor.get_u8()),
            message_id: cursor.get_u16(),
            length_or_status: cursor.get_u16(),
        })
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        dst.put_u8(self.message_type.as_u8());
        dst.put_u16(self.message_id);
        dst.put_u16(self.length_or_status);
    }

    /// Number of payload bytes that follow this header.
    pub fn payload_len(&self) -> usize {
        if self.message_type.carries_status() {
            0
        } else {
            self.length_or_status as usize
        }
    }
}

/// One unit of wire exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub message_id: u16,
    pub length_or_status: u16,
    pub payload: Bytes,
}

impl Frame {
    /// Build a payload-carrying frame. The length field is derived from the
    /// payload.
    pub fn new(
        message_type: MessageType,
        message_id: u16,
        payload: impl Into<Bytes>,
    ) -> Result<Self, ProtocolError> {
        let payload = payload.into();
        let length = u16::try_from(payload.len())
            .map_err(|_| ProtocolError::PayloadTooLarge(payload.len()))?;
        Ok(Frame {
            message_type,
            message_id,
            length_or_status: length,
            payload,
        })
    }

    /// Build a response frame carrying `status` and no payload.
    pub fn response(message_id: u16, status: u16) -> Self {
        Frame {
            message_type: MessageType::Response,
            message_id,
            length_or_status: status,
            payload: Bytes::new(),
        }
    }

    /// Build a heartbeat ping. Pings carry no payload.
    pub fn ping(message_id: u16) -> Self {
        Frame {
            message_type: MessageType::Ping,
            message_id,
            length_or_status: 0,
            payload: Bytes::new(),
        }
    }

    pub fn header(&self) -> Header {
        Header {
            message_type: self.message_type,
            message_id: self.message_id,
            length_or_status: self.length_or_status,
        }
    }

    /// Status code of a response frame.
    pub fn status(&self) -> Option<u16> {
        self.message_type
            .carries_status()
            .then_some(self.length_or_status)
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        self.header().encode(dst);
        if !self.message_type.carries_status() {
            dst.extend_from_slice(&self.payload);
        }
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.payload.len());
        self.encode(&mut buf);
        buf.freeze()
    }

    /// Decode exactly one frame from the start of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let header = Header::decode(buf)?;
        let needed = HEADER_SIZE + header.payload_len();
        if buf.len() < needed {
            return Err(ProtocolError::Truncated {
                needed,
                available: buf.len(),
            });
        }
        Ok(Frame {
            message_type: header.message_type,
            message_id: header.message_id,
            length_or_status: header.length_or_status,
            payload: Bytes::copy_from_slice(&buf[HEADER_SIZE..needed]),
        })
    }
}

/// Accumulates bytes read from the socket and yields complete frames in
/// arrival order. Partial frames stay buffered until the rest arrives.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(1024),
        }
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Pop the next complete frame, if the buffer holds one.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let header = Header::decode(&self.buffer).ok()?;
        let total = HEADER_SIZE + header.payload_len();
        if self.buffer.len() < total {
            return None;
        }
        let mut raw = self.buffer.split_to(total);
        raw.advance(HEADER_SIZE);
        Some(Frame {
            message_type: header.message_type,
            message_id: header.message_id,
            length_or_status: header.length_or_status,
            payload: raw.freeze(),
        })
    }

    /// Bytes waiting for the rest of their frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}
