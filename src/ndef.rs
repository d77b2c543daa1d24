//! NDEF record and message codec.
//!
//! ```text
//!  7   6   5   4   3   2   1   0
//! +---+---+---+---+---+-----------+
//! |MB |ME |CF |SR |IL |    TNF    |
//! +---+---+---+---+---+-----------+
//! |          TYPE LENGTH          |
//! +-------------------------------+
//! |  PAYLOAD LENGTH (1 or 4 bytes)|
//! +-------------------------------+
//! |    ID LENGTH (if IL is set)   |
//! +-------------------------------+
//! |  TYPE  |  ID  |    PAYLOAD    |
//! +-------------------------------+
//! ```
//!
//! Flags are derived on encode: MB/ME from the record's position, SR when the
//! payload fits in one byte, IL when an id is present. Chunked records are
//! not supported and fail to parse.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

const FLAG_MB: u8 = 0x80;
const FLAG_ME: u8 = 0x40;
const FLAG_CF: u8 = 0x20;
const FLAG_SR: u8 = 0x10;
const FLAG_IL: u8 = 0x08;
const TNF_MASK: u8 = 0x07;

/// Type Name Format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Tnf {
    Empty = 0x00,
    WellKnown = 0x01,
    MimeMedia = 0x02,
    AbsoluteUri = 0x03,
    External = 0x04,
    Unknown = 0x05,
    Unchanged = 0x06,
}

impl Tnf {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(Self::Empty),
            0x01 => Some(Self::WellKnown),
            0x02 => Some(Self::MimeMedia),
            0x03 => Some(Self::AbsoluteUri),
            0x04 => Some(Self::External),
            0x05 => Some(Self::Unknown),
            0x06 => Some(Self::Unchanged),
            _ => None,
        }
    }
}

/// Well-known type of a URI record.
pub const RTD_URI: &[u8] = b"U";

/// Well-known type of a text record.
pub const RTD_TEXT: &[u8] = b"T";

/// URI identifier codes (NFC Forum URI RTD, table 3).
const URI_PREFIXES: [&str; 36] = [
    "",
    "http://www.",
    "https://www.",
    "http://",
    "https://",
    "tel:",
    "mailto:",
    "ftp://anonymous:anonymous@",
    "ftp://ftp.",
    "ftps://",
    "sftp://",
    "smb://",
    "nfs://",
    "ftp://",
    "dav://",
    "news:",
    "telnet://",
    "imap:",
    "rtsp://",
    "urn:",
    "pop:",
    "sip:",
    "sips:",
    "tftp:",
    "btspp://",
    "btl2cap://",
    "btgoep://",
    "tcpobex://",
    "irdaobex://",
    "file://",
    "urn:epc:id:",
    "urn:epc:tag:",
    "urn:epc:pat:",
    "urn:epc:raw:",
    "urn:epc:",
    "urn:nfc:",
];

/// One NDEF record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub tnf: Tnf,
    pub record_type: Bytes,
    pub id: Bytes,
    pub payload: Bytes,
}

impl Record {
    pub fn new(tnf: Tnf, record_type: impl Into<Bytes>, id: impl Into<Bytes>, payload: impl Into<Bytes>) -> Self {
        Self {
            tnf,
            record_type: record_type.into(),
            id: id.into(),
            payload: payload.into(),
        }
    }

    /// NFC Forum well-known type record.
    pub fn well_known(record_type: &'static [u8], payload: impl Into<Bytes>) -> Self {
        Self::new(Tnf::WellKnown, record_type, Bytes::new(), payload)
    }

    /// RFC 2046 media-type record.
    pub fn mime(media_type: &str, payload: impl Into<Bytes>) -> Self {
        Self::new(
            Tnf::MimeMedia,
            Bytes::copy_from_slice(media_type.as_bytes()),
            Bytes::new(),
            payload,
        )
    }

    /// URI record, abbreviated with the longest matching identifier code.
    pub fn uri(uri: &str) -> Self {
        let (code, prefix) = URI_PREFIXES
            .iter()
            .enumerate()
            .skip(1)
            .filter(|(_, p)| uri.starts_with(*p))
            .max_by_key(|(_, p)| p.len())
            .unwrap_or((0, &""));
        let mut payload = BytesMut::with_capacity(1 + uri.len() - prefix.len());
        // Index is below 36 by construction
        payload.put_u8(code as u8);
        payload.put_slice(&uri.as_bytes()[prefix.len()..]);
        Self::well_known(RTD_URI, payload.freeze())
    }

    /// Same record with a different id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<Bytes>) -> Self {
        self.id = id.into();
        self
    }

    pub fn is_well_known(&self, record_type: &[u8]) -> bool {
        self.tnf == Tnf::WellKnown && self.record_type.as_ref() == record_type
    }

    /// Media type of a MIME record.
    pub fn media_type(&self) -> Option<&str> {
        if self.tnf != Tnf::MimeMedia {
            return None;
        }
        std::str::from_utf8(&self.record_type).ok()
    }

    /// Expand a URI record back into the full URI.
    pub fn uri_value(&self) -> Option<String> {
        if !self.is_well_known(RTD_URI) || self.payload.is_empty() {
            return None;
        }
        let prefix = URI_PREFIXES.get(usize::from(self.payload[0]))?;
        let rest = std::str::from_utf8(&self.payload[1..]).ok()?;
        Some(format!("{prefix}{rest}"))
    }

    /// Encoded size of this record.
    pub fn encoded_len(&self) -> usize {
        let short = self.payload.len() <= usize::from(u8::MAX);
        2 + if short { 1 } else { 4 }
            + usize::from(!self.id.is_empty())
            + self.record_type.len()
            + self.id.len()
            + self.payload.len()
    }

    /// Parse one record, returning it with its MB and ME flags.
    fn parse(buf: &mut impl Buf) -> Option<(Self, bool, bool)> {
        if buf.remaining() < 2 {
            return None;
        }
        let header = buf.get_u8();
        if header & FLAG_CF != 0 {
            return None;
        }
        let tnf = Tnf::from_u8(header & TNF_MASK)?;
        if tnf == Tnf::Unchanged {
            return None;
        }
        let type_len = usize::from(buf.get_u8());
        let payload_len = if header & FLAG_SR != 0 {
            if buf.remaining() < 1 {
                return None;
            }
            usize::from(buf.get_u8())
        } else {
            if buf.remaining() < 4 {
                return None;
            }
            usize::try_from(buf.get_u32()).ok()?
        };
        let id_len = if header & FLAG_IL != 0 {
            if buf.remaining() < 1 {
                return None;
            }
            usize::from(buf.get_u8())
        } else {
            0
        };
        if tnf == Tnf::Empty && (type_len != 0 || id_len != 0 || payload_len != 0) {
            return None;
        }
        if buf.remaining() < payload_len.checked_add(type_len + id_len)? {
            return None;
        }
        let record = Self {
            tnf,
            record_type: buf.copy_to_bytes(type_len),
            id: buf.copy_to_bytes(id_len),
            payload: buf.copy_to_bytes(payload_len),
        };
        Some((record, header & FLAG_MB != 0, header & FLAG_ME != 0))
    }

    fn serialize(&self, buf: &mut impl BufMut, first: bool, last: bool) {
        let short = self.payload.len() <= usize::from(u8::MAX);
        let mut header = self.tnf as u8;
        if first {
            header |= FLAG_MB;
        }
        if last {
            header |= FLAG_ME;
        }
        if short {
            header |= FLAG_SR;
        }
        if !self.id.is_empty() {
            header |= FLAG_IL;
        }
        buf.put_u8(header);
        buf.put_u8(self.record_type.len() as u8);
        if short {
            buf.put_u8(self.payload.len() as u8);
        } else {
            buf.put_u32(self.payload.len() as u32);
        }
        if !self.id.is_empty() {
            buf.put_u8(self.id.len() as u8);
        }
        buf.put_slice(&self.record_type);
        buf.put_slice(&self.id);
        buf.put_slice(&self.payload);
    }
}

/// An NDEF message: one or more records.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Message {
    records: Vec<Record>,
}

impl Message {
    pub fn new(records: Vec<Record>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Record> {
        self.records
    }

    pub fn push(&mut self, record: Record) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Parse a complete message.
    ///
    /// The first record must carry MB, exactly the last one ME, and nothing
    /// may follow it.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let mut buf = data;
        let mut records = Vec::new();
        loop {
            let (record, mb, me) = Record::parse(&mut buf).ok_or(ProtocolError::InvalidFormat)?;
            if mb != records.is_empty() {
                return Err(ProtocolError::InvalidFormat.into());
            }
            records.push(record);
            if me {
                break;
            }
        }
        if buf.has_remaining() {
            return Err(ProtocolError::InvalidFormat.into());
        }
        Ok(Self { records })
    }

    pub fn serialize(&self, buf: &mut impl BufMut) {
        let last = self.records.len().saturating_sub(1);
        for (i, record) in self.records.iter().enumerate() {
            record.serialize(buf, i == 0, i == last);
        }
    }

    pub fn encoded_len(&self) -> usize {
        self.records.iter().map(Record::encoded_len).sum()
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.serialize(&mut buf);
        buf.freeze()
    }
}

impl From<Record> for Message {
    fn from(record: Record) -> Self {
        Self::new(vec![record])
    }
}

impl From<Vec<Record>> for Message {
    fn from(records: Vec<Record>) -> Self {
        Self::new(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_uri_record_encoding() {
        let message = Message::from(Record::uri("http://www.example.co"));
        let bytes = message.to_bytes();
        assert_eq!(bytes.len(), 15);
        assert_eq!(bytes[0], FLAG_MB | FLAG_ME | FLAG_SR | Tnf::WellKnown as u8);
        assert_eq!(bytes[1], 1); // type length
        assert_eq!(bytes[2], 11); // payload length
        assert_eq!(bytes[3], b'U');
        assert_eq!(bytes[4], 0x01); // "http://www."
        assert_eq!(&bytes[5..], b"example.co");
    }

    #[test]
    fn test_uri_prefix_prefers_longest_match() {
        let record = Record::uri("https://www.nfc-forum.org");
        assert_eq!(record.payload[0], 0x02);
        assert_eq!(record.uri_value().as_deref(), Some("https://www.nfc-forum.org"));

        let record = Record::uri("urn:nfc:sn:snep");
        assert_eq!(record.payload[0], 0x23);

        let record = Record::uri("custom-scheme:x");
        assert_eq!(record.payload[0], 0x00);
        assert_eq!(record.uri_value().as_deref(), Some("custom-scheme:x"));
    }

    #[test]
    fn test_multi_record_message_flags() {
        let message = Message::new(vec![
            Record::mime("text/plain", &b"hello"[..]).with_id(&b"0"[..]),
            Record::well_known(RTD_TEXT, Bytes::from(vec![0u8; 300])),
        ]);
        let bytes = message.to_bytes();
        assert_eq!(bytes.len(), message.encoded_len());
        // First record: MB, SR, IL, no ME
        assert_eq!(bytes[0] & (FLAG_MB | FLAG_ME | FLAG_SR | FLAG_IL), FLAG_MB | FLAG_SR | FLAG_IL);
        let parsed = Message::parse(&bytes).unwrap();
        assert_eq!(parsed, message);
        assert_eq!(parsed.records()[0].media_type(), Some("text/plain"));
    }

    #[test]
    fn test_chunked_record_rejected() {
        let data = [FLAG_MB | FLAG_CF | FLAG_SR | 0x01, 1, 1, b'T', 0x00];
        assert_eq!(
            Message::parse(&data),
            Err(Error::Protocol(ProtocolError::InvalidFormat))
        );
    }

    #[test]
    fn test_malformed_messages_rejected() {
        // Empty input
        assert!(Message::parse(&[]).is_err());
        // Missing MB
        assert!(Message::parse(&[FLAG_ME | FLAG_SR | 0x01, 1, 0, b'U']).is_err());
        // Truncated payload
        assert!(Message::parse(&[FLAG_MB | FLAG_ME | FLAG_SR | 0x01, 1, 5, b'U', 0]).is_err());
        // Trailing bytes after ME
        assert!(Message::parse(&[FLAG_MB | FLAG_ME | FLAG_SR | 0x01, 1, 0, b'U', 0xFF]).is_err());
        // Empty TNF with a type
        assert!(Message::parse(&[FLAG_MB | FLAG_ME | FLAG_SR, 1, 0, b'U']).is_err());
    }
}
