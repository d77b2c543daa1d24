//! Handover Request and Handover Select messages.
//!
//! The first record is `Hr` or `Hs`. Its payload is the version byte followed
//! by a nested NDEF message holding an optional collision resolution record
//! (`cr`, requests only) and one alternative carrier record (`ac`) per offered
//! carrier. Each `ac` points at a carrier configuration record further down
//! the outer message through the record id.
//!
//! ```text
//! [Hr: 0x12 | {cr: random} {ac: cps, "0"} {ac: cps, "1"}]
//! [application/vnd.bluetooth.ep.oob id="0"]
//! [application/vnd.wfa.wsc id="1"]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::carrier::CarrierType;
use crate::error::{ProtocolError, Result};
use crate::ndef::{Message, Record};

/// Connection Handover 1.2.
pub const VERSION: u8 = 0x12;

/// Supported major version.
pub const VERSION_MAJOR: u8 = 1;

pub const TYPE_REQUEST: &[u8] = b"Hr";
pub const TYPE_SELECT: &[u8] = b"Hs";
pub const TYPE_COLLISION: &[u8] = b"cr";
pub const TYPE_ALTERNATIVE: &[u8] = b"ac";

/// Carrier power state as carried in an `ac` record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum PowerState {
    Inactive = 0x00,
    #[default]
    Active = 0x01,
    Activating = 0x02,
    Unknown = 0x03,
}

impl PowerState {
    pub fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0x00 => Self::Inactive,
            0x01 => Self::Active,
            0x02 => Self::Activating,
            _ => Self::Unknown,
        }
    }
}

/// Which of the two handover messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Request,
    Select,
}

impl Kind {
    fn record_type(self) -> &'static [u8] {
        match self {
            Self::Request => TYPE_REQUEST,
            Self::Select => TYPE_SELECT,
        }
    }
}

/// An alternative carrier (`ac`) record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlternativeCarrier {
    pub power_state: PowerState,
    /// Id of the carrier configuration record
    pub data_reference: Bytes,
    /// Ids of auxiliary data records
    pub auxiliary: Vec<Bytes>,
}

impl AlternativeCarrier {
    pub fn parse(buf: &mut impl Buf) -> Option<Self> {
        if buf.remaining() < 2 {
            return None;
        }
        let power_state = PowerState::from_u8(buf.get_u8());
        let data_reference = take_reference(buf)?;
        if buf.remaining() < 1 {
            return None;
        }
        let count = buf.get_u8();
        let auxiliary = (0..count)
            .map(|_| take_reference(buf))
            .collect::<Option<Vec<_>>>()?;
        Some(Self {
            power_state,
            data_reference,
            auxiliary,
        })
    }

    /// At most 255 auxiliary references are written; record ids are capped
    /// at 255 bytes by the NDEF encoding.
    pub fn serialize(&self, buf: &mut impl BufMut) {
        debug_assert!(self.auxiliary.len() <= MAX_REFERENCES);
        buf.put_u8(self.power_state as u8);
        put_reference(buf, &self.data_reference);
        let auxiliary = &self.auxiliary[..self.auxiliary.len().min(MAX_REFERENCES)];
        buf.put_u8(auxiliary.len() as u8);
        for aux in auxiliary {
            put_reference(buf, aux);
        }
    }

    fn to_record(&self) -> Record {
        let mut payload = BytesMut::new();
        self.serialize(&mut payload);
        Record::well_known(TYPE_ALTERNATIVE, payload.freeze())
    }
}

/// Auxiliary reference count and reference length limit.
const MAX_REFERENCES: usize = u8::MAX as usize;

fn put_reference(buf: &mut impl BufMut, reference: &[u8]) {
    let reference = &reference[..reference.len().min(MAX_REFERENCES)];
    buf.put_u8(reference.len() as u8);
    buf.put_slice(reference);
}

fn take_reference(buf: &mut impl Buf) -> Option<Bytes> {
    if buf.remaining() < 1 {
        return None;
    }
    let len = usize::from(buf.get_u8());
    if buf.remaining() < len {
        return None;
    }
    Some(buf.copy_to_bytes(len))
}

/// A parsed or to-be-sent Handover Request / Select.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoverMessage {
    pub kind: Kind,
    pub version: u8,
    /// Collision resolution number of a request
    pub collision: Option<u16>,
    pub alternatives: Vec<AlternativeCarrier>,
    /// Carrier configuration and auxiliary records
    pub records: Vec<Record>,
}

impl HandoverMessage {
    pub fn request(collision: u16) -> Self {
        Self {
            kind: Kind::Request,
            version: VERSION,
            collision: Some(collision),
            alternatives: Vec::new(),
            records: Vec::new(),
        }
    }

    pub fn select() -> Self {
        Self {
            kind: Kind::Select,
            version: VERSION,
            collision: None,
            alternatives: Vec::new(),
            records: Vec::new(),
        }
    }

    /// Offer a carrier. Its configuration record gets a fresh id unless it
    /// already has one.
    pub fn add_carrier(&mut self, power_state: PowerState, record: Record) {
        let record = if record.id.is_empty() {
            let id = (self.records.len()..)
                .map(|n| Bytes::from(n.to_string().into_bytes()))
                .find(|id| self.records.iter().all(|r| r.id != *id))
                .unwrap_or_default();
            record.with_id(id)
        } else {
            record
        };
        self.alternatives.push(AlternativeCarrier {
            power_state,
            data_reference: record.id.clone(),
            auxiliary: Vec::new(),
        });
        self.records.push(record);
    }

    /// Configuration record an `ac` refers to.
    pub fn carrier_record(&self, alternative: &AlternativeCarrier) -> Option<&Record> {
        self.records
            .iter()
            .find(|r| r.id == alternative.data_reference)
    }

    /// Offered carriers in message order, skipping dangling references.
    pub fn offers(&self) -> impl Iterator<Item = (CarrierType, &AlternativeCarrier, &Record)> {
        self.alternatives.iter().filter_map(|ac| {
            let record = self.carrier_record(ac)?;
            Some((CarrierType::from_record(record), ac, record))
        })
    }

    pub fn to_message(&self) -> Message {
        let mut nested = Message::default();
        if let Some(collision) = self.collision {
            nested.push(Record::well_known(
                TYPE_COLLISION,
                Bytes::copy_from_slice(&collision.to_be_bytes()),
            ));
        }
        for ac in &self.alternatives {
            nested.push(ac.to_record());
        }
        let mut payload = BytesMut::with_capacity(1 + nested.encoded_len());
        payload.put_u8(self.version);
        nested.serialize(&mut payload);

        let mut message = Message::from(Record::well_known(self.kind.record_type(), payload.freeze()));
        for record in &self.records {
            message.push(record.clone());
        }
        message
    }

    pub fn to_bytes(&self) -> Bytes {
        self.to_message().to_bytes()
    }

    /// Parse and validate a message of the given kind.
    ///
    /// Fails with `InvalidFormat` when the first record is not `Hr`/`Hs`,
    /// the major version differs, or no alternative carrier is present.
    pub fn parse(data: &[u8], kind: Kind) -> Result<Self> {
        let message = Message::parse(data)?;
        let mut records = message.into_records().into_iter();
        let head = records.next().ok_or(ProtocolError::InvalidFormat)?;
        if !head.is_well_known(kind.record_type()) {
            return Err(ProtocolError::InvalidFormat.into());
        }
        let (&version, nested) = head
            .payload
            .split_first()
            .ok_or(ProtocolError::InvalidFormat)?;
        if version >> 4 != VERSION_MAJOR {
            return Err(ProtocolError::InvalidFormat.into());
        }

        let mut collision = None;
        let mut alternatives = Vec::new();
        if !nested.is_empty() {
            for record in Message::parse(nested)?.records() {
                if record.is_well_known(TYPE_ALTERNATIVE) {
                    let ac = AlternativeCarrier::parse(&mut &record.payload[..])
                        .ok_or(ProtocolError::InvalidFormat)?;
                    alternatives.push(ac);
                } else if record.is_well_known(TYPE_COLLISION) {
                    let mut payload = &record.payload[..];
                    if payload.remaining() < 2 {
                        return Err(ProtocolError::InvalidFormat.into());
                    }
                    collision = Some(payload.get_u16());
                }
            }
        }
        if alternatives.is_empty() {
            return Err(ProtocolError::InvalidFormat.into());
        }

        Ok(Self {
            kind,
            version,
            collision,
            alternatives,
            records: records.collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn wifi_record() -> Record {
        Record::mime("application/vnd.wfa.wsc", &b"\x10\x4a\x00\x01\x10"[..])
    }

    #[test]
    fn test_request_layout() {
        let mut hr = HandoverMessage::request(0xBEEF);
        hr.add_carrier(PowerState::Active, wifi_record());
        let message = hr.to_message();
        let records = message.records();
        assert_eq!(records.len(), 2);
        assert!(records[0].is_well_known(TYPE_REQUEST));
        assert_eq!(records[0].payload[0], VERSION);
        assert_eq!(records[1].id.as_ref(), b"0");

        let parsed = HandoverMessage::parse(&message.to_bytes(), Kind::Request).unwrap();
        assert_eq!(parsed.collision, Some(0xBEEF));
        assert_eq!(parsed.alternatives[0].power_state, PowerState::Active);
        let (carrier, _, record) = parsed.offers().next().unwrap();
        assert_eq!(carrier, CarrierType::WifiBss);
        assert_eq!(record, &records[1]);
    }

    #[test]
    fn test_kind_must_match() {
        let mut hs = HandoverMessage::select();
        hs.add_carrier(PowerState::Active, wifi_record());
        assert_eq!(
            HandoverMessage::parse(&hs.to_bytes(), Kind::Request),
            Err(Error::Protocol(ProtocolError::InvalidFormat))
        );
        assert!(HandoverMessage::parse(&hs.to_bytes(), Kind::Select).is_ok());
    }

    #[test]
    fn test_major_version_must_match() {
        let mut hr = HandoverMessage::request(0x0102);
        hr.add_carrier(PowerState::Active, wifi_record());
        hr.version = 0x22;
        assert_eq!(hr.to_message().records()[0].payload[0], 0x22);
        assert_eq!(
            HandoverMessage::parse(&hr.to_bytes(), Kind::Request),
            Err(Error::Protocol(ProtocolError::InvalidFormat))
        );

        // Minor versions are accepted
        hr.version = 0x15;
        assert_eq!(
            HandoverMessage::parse(&hr.to_bytes(), Kind::Request).unwrap().version,
            0x15
        );
    }

    #[test]
    fn test_alternative_carrier_required() {
        // Collision record only
        let hr = HandoverMessage::request(0x0102);
        assert_eq!(
            HandoverMessage::parse(&hr.to_bytes(), Kind::Request),
            Err(Error::Protocol(ProtocolError::InvalidFormat))
        );

        // A carrier record with no `ac` pointing at it
        let mut hs = HandoverMessage::select();
        hs.records.push(wifi_record().with_id(&b"0"[..]));
        assert_eq!(
            HandoverMessage::parse(&hs.to_bytes(), Kind::Select),
            Err(Error::Protocol(ProtocolError::InvalidFormat))
        );
    }

    #[test]
    fn test_generated_ids_skip_supplied_ones() {
        let mut hr = HandoverMessage::request(1);
        hr.add_carrier(PowerState::Active, wifi_record().with_id(&b"1"[..]));
        hr.add_carrier(PowerState::Active, Record::mime("application/vnd.wfa.p2p", &b"p2p"[..]));
        hr.add_carrier(PowerState::Active, Record::mime("application/vnd.wfa.p2p", &b"p2p"[..]));

        let ids: Vec<&[u8]> = hr.records.iter().map(|r| r.id.as_ref()).collect();
        assert_eq!(ids, vec![&b"1"[..], &b"2"[..], &b"3"[..]]);
        for (ac, record) in hr.alternatives.iter().zip(&hr.records) {
            assert_eq!(hr.carrier_record(ac), Some(record));
        }
    }

    #[test]
    fn test_alternative_carrier_auxiliary_refs() {
        let ac = AlternativeCarrier {
            power_state: PowerState::Activating,
            data_reference: Bytes::from_static(b"bt"),
            auxiliary: vec![Bytes::from_static(b"a1"), Bytes::from_static(b"a2")],
        };
        let mut buf = BytesMut::new();
        ac.serialize(&mut buf);
        assert_eq!(&buf[..], b"\x02\x02bt\x02\x02a1\x02a2");
        assert_eq!(AlternativeCarrier::parse(&mut buf.freeze()), Some(ac));
        assert!(AlternativeCarrier::parse(&mut &b"\x01\x05ab"[..]).is_none());
    }
}
