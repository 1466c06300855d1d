//! Hardware payload fields
//!
//! Hardware and bridge frames carry NUL-delimited ASCII fields. The first
//! field names the command; virtual pin commands follow it with the pin
//! number and then their parameters.

use bytes::Bytes;
use std::fmt;

use crate::error::ProtocolError;

const FIELD_SEPARATOR: char = '\0';

/// Operation requested on a virtual pin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PinOperation {
    Read,
    Write,
}

/// A decoded virtual pin request from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinCommand {
    pub pin: u32,
    pub operation: PinOperation,
    pub params: Vec<String>,
}

/// Every command a hardware payload can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HardwareCommand {
    /// `info`: accepted and ignored.
    Info,
    /// `pm`: pin mode announcement, accepted and ignored.
    PinMode,
    /// `vw` / `vr`
    Pin(PinCommand),
    Unknown(String),
}

impl HardwareCommand {
    /// Parse a hardware payload (pure function).
    pub fn parse(payload: &[u8]) -> Result<Self, ProtocolError> {
        let text = String::from_utf8_lossy(payload);
        let mut fields = text.split(FIELD_SEPARATOR).map(str::to_string);
        let name = fields.next().unwrap_or_default();

        let operation = match name.as_str() {
            "info" => return Ok(HardwareCommand::Info),
            "pm" => return Ok(HardwareCommand::PinMode),
            "vw" => PinOperation::Write,
            "vr" => PinOperation::Read,
            _ => return Ok(HardwareCommand::Unknown(name)),
        };

        let pin_field = fields
            .next()
            .ok_or_else(|| ProtocolError::InvalidPayload(format!("'{name}' without pin")))?;
        let pin = pin_field.trim().parse::<u32>().map_err(|_| {
            ProtocolError::InvalidPayload(format!("'{name}' with invalid pin '{pin_field}'"))
        })?;

        Ok(HardwareCommand::Pin(PinCommand {
            pin,
            operation,
            params: fields.collect(),
        }))
    }
}

/// Join fields with the NUL separator used by hardware payloads.
pub fn join_fields<I, T>(fields: I) -> Bytes
where
    I: IntoIterator<Item = T>,
    T: fmt::Display,
{
    let joined = fields
        .into_iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("\0");
    Bytes::from(joined)
}

/// Payload of an outbound virtual write: `vw\0<pin>\0<value>`.
pub fn virtual_write_payload(pin: u32, value: impl fmt::Display) -> Bytes {
    join_fields(["vw".to_string(), pin.to_string(), value.to_string()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_virtual_write() {
        let cmd = HardwareCommand::parse(b"vw\x009\x0042.5").unwrap();
        assert_eq!(
            cmd,
            HardwareCommand::Pin(PinCommand {
                pin: 9,
                operation: PinOperation::Write,
                params: vec!["42.5".to_string()],
            })
        );
    }

    #[test]
    fn test_parse_virtual_read_without_params() {
        let cmd = HardwareCommand::parse(b"vr\x003").unwrap();
        assert_eq!(
            cmd,
            HardwareCommand::Pin(PinCommand {
                pin: 3,
                operation: PinOperation::Read,
                params: vec![],
            })
        );
    }

    #[test]
    fn test_parse_keeps_parameter_order() {
        let cmd = HardwareCommand::parse(b"vw\x001\x00a\x00b\x00c").unwrap();
        match cmd {
            HardwareCommand::Pin(pin) => assert_eq!(pin.params, vec!["a", "b", "c"]),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_parse_ignored_commands() {
        assert_eq!(
            HardwareCommand::parse(b"info\x00whatever").unwrap(),
            HardwareCommand::Info
        );
        assert_eq!(
            HardwareCommand::parse(b"pm\x001\x00out").unwrap(),
            HardwareCommand::PinMode
        );
    }

    #[test]
    fn test_parse_unknown_command() {
        assert_eq!(
            HardwareCommand::parse(b"dw\x005\x001").unwrap(),
            HardwareCommand::Unknown("dw".to_string())
        );
    }

    #[test]
    fn test_parse_invalid_pin() {
        assert!(HardwareCommand::parse(b"vw\x00x\x001").is_err());
        assert!(HardwareCommand::parse(b"vr").is_err());
    }

    #[test]
    fn test_virtual_write_payload() {
        assert_eq!(&virtual_write_payload(9, 42.5)[..], b"vw\x009\x0042.5");
        assert_eq!(&virtual_write_payload(0, "on")[..], b"vw\x000\x00on");
    }
}
