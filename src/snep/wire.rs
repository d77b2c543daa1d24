//! SNEP message format.
//!
//! ```text
//! +---------+---------+-------------------------------+
//! | version |  code   |       length (u32, BE)        |
//! +---------+---------+-------------------------------+
//! |              information (length bytes)            |
//! +---------------------------------------------------+
//! ```
//!
//! A GET request's information field starts with a `u32` acceptable length
//! followed by the NDEF message.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Protocol version 1.0 (major << 4 | minor).
pub const VERSION: u8 = 0x10;

/// Supported major version.
pub const VERSION_MAJOR: u8 = 1;

/// Largest information field accepted by default.
pub const MAX_INFORMATION: usize = 10 * 1024;

/// Request codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestCode {
    Continue = 0x00,
    Get = 0x01,
    Put = 0x02,
    Reject = 0x7F,
}

impl RequestCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Continue),
            0x01 => Some(Self::Get),
            0x02 => Some(Self::Put),
            0x7F => Some(Self::Reject),
            _ => None,
        }
    }
}

/// Response codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResponseCode {
    Continue = 0x80,
    Success = 0x81,
    NotFound = 0xC0,
    ExcessData = 0xC1,
    BadRequest = 0xC2,
    NotImplemented = 0xE0,
    UnsupportedVersion = 0xE1,
    Reject = 0xFF,
}

impl ResponseCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x80 => Some(Self::Continue),
            0x81 => Some(Self::Success),
            0xC0 => Some(Self::NotFound),
            0xC1 => Some(Self::ExcessData),
            0xC2 => Some(Self::BadRequest),
            0xE0 => Some(Self::NotImplemented),
            0xE1 => Some(Self::UnsupportedVersion),
            0xFF => Some(Self::Reject),
            _ => None,
        }
    }

    /// Error carried by a failure response, `None` for CONTINUE and SUCCESS.
    pub fn error(self) -> Option<ProtocolError> {
        match self {
            Self::Continue | Self::Success => None,
            Self::NotFound => Some(ProtocolError::NotFound),
            Self::ExcessData => Some(ProtocolError::ExcessData),
            Self::BadRequest => Some(ProtocolError::BadRequest),
            Self::NotImplemented => Some(ProtocolError::NotImplemented),
            Self::UnsupportedVersion => Some(ProtocolError::UnsupportedVersion),
            Self::Reject => Some(ProtocolError::Rejected),
        }
    }

    /// Response a server sends for a request that failed with `error`.
    pub fn for_error(error: ProtocolError) -> Self {
        match error {
            ProtocolError::NotFound => Self::NotFound,
            ProtocolError::ExcessData => Self::ExcessData,
            ProtocolError::NotImplemented => Self::NotImplemented,
            ProtocolError::UnsupportedVersion => Self::UnsupportedVersion,
            ProtocolError::Rejected => Self::Reject,
            ProtocolError::InvalidFormat
            | ProtocolError::NotAllowed
            | ProtocolError::BadRequest
            | ProtocolError::UnexpectedResponse(_) => Self::BadRequest,
        }
    }
}

/// SNEP header (6 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub version: u8,
    /// Request or response code
    pub code: u8,
    /// Length of the information field
    pub length: u32,
}

impl Header {
    pub const SIZE: usize = 6;

    pub fn new(code: u8, length: u32) -> Self {
        Self {
            version: VERSION,
            code,
            length,
        }
    }

    pub fn major(&self) -> u8 {
        self.version >> 4
    }

    pub fn parse(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < Self::SIZE {
            return None;
        }
        Some(Self {
            version: buf.get_u8(),
            code: buf.get_u8(),
            length: buf.get_u32(),
        })
    }

    pub fn serialize(&self, buf: &mut impl BufMut) {
        buf.put_u8(self.version);
        buf.put_u8(self.code);
        buf.put_u32(self.length);
    }

    /// Check the version and the declared length against `max_information`.
    pub fn validate(&self, max_information: usize) -> Result<()> {
        if self.major() != VERSION_MAJOR {
            return Err(ProtocolError::UnsupportedVersion.into());
        }
        if self.length as usize > max_information {
            return Err(ProtocolError::ExcessData.into());
        }
        Ok(())
    }
}

/// Encode a complete message.
pub fn encode(code: u8, information: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(Header::SIZE + information.len());
    Header::new(code, information.len() as u32).serialize(&mut buf);
    buf.put_slice(information);
    buf.freeze()
}

/// Decode a complete message, enforcing version, length and `max_information`.
pub fn decode(data: &[u8], max_information: usize) -> Result<(Header, Bytes)> {
    let mut buf = data;
    let header = Header::parse(&mut buf).ok_or(ProtocolError::InvalidFormat)?;
    header.validate(max_information)?;
    if buf.remaining() != header.length as usize {
        return Err(ProtocolError::InvalidFormat.into());
    }
    Ok((header, Bytes::copy_from_slice(buf)))
}

/// Information field of a GET request.
pub fn get_information(acceptable_length: u32, ndef: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(4 + ndef.len());
    buf.put_u32(acceptable_length);
    buf.put_slice(ndef);
    buf.freeze()
}

/// Split a GET information field into acceptable length and NDEF message.
pub fn parse_get_information(mut information: Bytes) -> Option<(u32, Bytes)> {
    if information.remaining() < 4 {
        return None;
    }
    let acceptable = information.get_u32();
    Some((acceptable, information))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_header_layout() {
        let message = encode(RequestCode::Put as u8, b"abc");
        assert_eq!(&message[..], &[0x10, 0x02, 0x00, 0x00, 0x00, 0x03, b'a', b'b', b'c']);
    }

    #[test]
    fn test_decode_rejects_major_version() {
        let message = [0x20, 0x02, 0, 0, 0, 0];
        assert_eq!(
            decode(&message, MAX_INFORMATION),
            Err(Error::Protocol(ProtocolError::UnsupportedVersion))
        );
        // Minor versions are accepted
        let message = [0x1F, 0x02, 0, 0, 0, 0];
        assert!(decode(&message, MAX_INFORMATION).is_ok());
    }

    #[test]
    fn test_decode_rejects_oversized_and_truncated() {
        let message = encode(RequestCode::Put as u8, &[0u8; 32]);
        assert_eq!(
            decode(&message, 31),
            Err(Error::Protocol(ProtocolError::ExcessData))
        );
        assert_eq!(
            decode(&message[..20], 64),
            Err(Error::Protocol(ProtocolError::InvalidFormat))
        );
        assert!(decode(&message[..4], 64).is_err());
    }

    #[test]
    fn test_get_information() {
        let info = get_information(1024, b"\xD1\x01\x00T");
        assert_eq!(&info[..4], &[0, 0, 4, 0]);
        let (acceptable, ndef) = parse_get_information(info).unwrap();
        assert_eq!(acceptable, 1024);
        assert_eq!(&ndef[..], b"\xD1\x01\x00T");
        assert!(parse_get_information(Bytes::from_static(b"\x00\x01")).is_none());
    }

    #[test]
    fn test_response_code_errors() {
        assert_eq!(ResponseCode::Success.error(), None);
        assert_eq!(ResponseCode::from_u8(0xC0).and_then(ResponseCode::error), Some(ProtocolError::NotFound));
        assert_eq!(ResponseCode::for_error(ProtocolError::InvalidFormat), ResponseCode::BadRequest);
        assert_eq!(ResponseCode::from_u8(0x42), None);
        assert_eq!(RequestCode::from_u8(0x7F), Some(RequestCode::Reject));
    }
}
