//! Alternative carriers and their transport-specific negotiators.

use std::fmt;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::message::PowerState;
use crate::error::{ProtocolError, Result};
use crate::ndef::{Record, Tnf};

/// Bluetooth Secure Simple Pairing OOB record type.
pub const MIME_BLUETOOTH: &str = "application/vnd.bluetooth.ep.oob";

/// Wi-Fi Simple Configuration record type.
pub const MIME_WIFI_BSS: &str = "application/vnd.wfa.wsc";

/// Wi-Fi Peer-to-Peer record type.
pub const MIME_WIFI_P2P: &str = "application/vnd.wfa.p2p";

/// Alternative carrier technology.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CarrierType {
    Bluetooth,
    WifiBss,
    WifiP2p,
    /// Anything else. As a handover request argument it means "any".
    Unknown,
}

impl CarrierType {
    /// Selector preference when none is configured.
    pub const DEFAULT_PRIORITY: [Self; 3] = [Self::Bluetooth, Self::WifiBss, Self::WifiP2p];

    pub fn media_type(self) -> Option<&'static str> {
        match self {
            Self::Bluetooth => Some(MIME_BLUETOOTH),
            Self::WifiBss => Some(MIME_WIFI_BSS),
            Self::WifiP2p => Some(MIME_WIFI_P2P),
            Self::Unknown => None,
        }
    }

    pub fn from_media_type(media_type: &str) -> Self {
        match media_type {
            MIME_BLUETOOTH => Self::Bluetooth,
            MIME_WIFI_BSS => Self::WifiBss,
            MIME_WIFI_P2P => Self::WifiP2p,
            _ => Self::Unknown,
        }
    }

    /// Carrier described by a configuration record.
    pub fn from_record(record: &Record) -> Self {
        record
            .media_type()
            .map_or(Self::Unknown, Self::from_media_type)
    }
}

impl fmt::Display for CarrierType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bluetooth => write!(f, "Bluetooth"),
            Self::WifiBss => write!(f, "Wi-Fi"),
            Self::WifiP2p => write!(f, "Wi-Fi P2P"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Transport-specific side of a handover.
///
/// One negotiator per local carrier. The requester offers
/// [`config_record`](Self::config_record) and turns the selector's answer
/// into connection data with [`process_select`](Self::process_select); the
/// selector hands the requester's record to
/// [`process_request`](Self::process_request).
pub trait CarrierNegotiator: Send + Sync + 'static {
    fn carrier(&self) -> CarrierType;

    fn power_state(&self) -> PowerState {
        PowerState::Active
    }

    /// Local configuration record, `None` when it cannot be produced now.
    fn config_record(&self) -> Option<Record>;

    /// Selector side: accept the requester's configuration record.
    fn process_request(&self, _record: &Record) -> Result<()> {
        Ok(())
    }

    /// Requester side: turn the selector's record into connection data.
    fn process_select(&self, record: &Record) -> Result<Bytes>;
}

/// A carrier with a fixed configuration record.
#[derive(Debug, Clone)]
pub struct StaticCarrier {
    carrier: CarrierType,
    power_state: PowerState,
    record: Record,
}

impl StaticCarrier {
    /// Carrier type is taken from the record's media type.
    pub fn new(record: Record, power_state: PowerState) -> Self {
        Self {
            carrier: CarrierType::from_record(&record),
            power_state,
            record,
        }
    }

    pub fn bluetooth(oob: &BluetoothOob) -> Self {
        Self::new(oob.to_record(), PowerState::Active)
    }

    /// Wi-Fi Simple Configuration credential blob.
    pub fn wifi(wsc: impl Into<Bytes>) -> Self {
        Self::new(Record::mime(MIME_WIFI_BSS, wsc), PowerState::Active)
    }
}

impl CarrierNegotiator for StaticCarrier {
    fn carrier(&self) -> CarrierType {
        self.carrier
    }

    fn power_state(&self) -> PowerState {
        self.power_state
    }

    fn config_record(&self) -> Option<Record> {
        Some(self.record.clone())
    }

    fn process_request(&self, record: &Record) -> Result<()> {
        if record.tnf != Tnf::MimeMedia || record.payload.is_empty() {
            return Err(ProtocolError::InvalidFormat.into());
        }
        Ok(())
    }

    fn process_select(&self, record: &Record) -> Result<Bytes> {
        if self.carrier == CarrierType::Bluetooth {
            // Only hand out Bluetooth data that actually parses
            BluetoothOob::parse(&record.payload).ok_or(ProtocolError::InvalidFormat)?;
        }
        Ok(record.payload.clone())
    }
}

/// EIR data type: complete local name.
const EIR_COMPLETE_NAME: u8 = 0x09;
/// EIR data type: shortened local name.
const EIR_SHORT_NAME: u8 = 0x08;

/// Bluetooth OOB data (`application/vnd.bluetooth.ep.oob`).
///
/// ```text
/// +-----------------+---------------------+----------------------+
/// | len (u16, LE)   | BD_ADDR (6, LE)     | EIR: [len|type|data]*|
/// +-----------------+---------------------+----------------------+
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BluetoothOob {
    /// Device address, most significant byte first
    pub address: [u8; 6],
    pub name: Option<String>,
}

impl BluetoothOob {
    pub fn new(address: [u8; 6], name: Option<&str>) -> Self {
        Self {
            address,
            name: name.map(str::to_owned),
        }
    }

    pub fn to_payload(&self) -> Bytes {
        let name_len = self.name.as_ref().map_or(0, |n| 2 + n.len());
        let total = 2 + 6 + name_len;
        let mut buf = BytesMut::with_capacity(total);
        buf.put_u16_le(total as u16);
        for byte in self.address.iter().rev() {
            buf.put_u8(*byte);
        }
        if let Some(name) = &self.name {
            buf.put_u8((1 + name.len()) as u8);
            buf.put_u8(EIR_COMPLETE_NAME);
            buf.put_slice(name.as_bytes());
        }
        buf.freeze()
    }

    pub fn to_record(&self) -> Record {
        Record::mime(MIME_BLUETOOTH, self.to_payload())
    }

    pub fn parse(payload: &[u8]) -> Option<Self> {
        let mut buf = payload;
        if buf.remaining() < 8 {
            return None;
        }
        let total = usize::from(buf.get_u16_le());
        if total < 8 || total > payload.len() {
            return None;
        }
        let mut address = [0u8; 6];
        for slot in address.iter_mut().rev() {
            *slot = buf.get_u8();
        }

        let mut eir = &payload[8..total];
        let mut name = None;
        while eir.remaining() >= 1 {
            let len = usize::from(eir.get_u8());
            if len == 0 {
                break;
            }
            if eir.remaining() < len {
                return None;
            }
            let kind = eir.get_u8();
            let data = &eir[..len - 1];
            if kind == EIR_COMPLETE_NAME || (kind == EIR_SHORT_NAME && name.is_none()) {
                name = Some(String::from_utf8_lossy(data).into_owned());
            }
            eir.advance(len - 1);
        }
        Some(Self { address, name })
    }
}

impl fmt::Display for BluetoothOob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.address;
        write!(f, "{a:02X}:{b:02X}:{c:02X}:{d:02X}:{e:02X}:{g:02X}")?;
        if let Some(name) = &self.name {
            write!(f, " ({name})")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bluetooth_oob_layout() {
        let oob = BluetoothOob::new([0x00, 0x1B, 0xDC, 0x0F, 0x10, 0x2A], Some("kit"));
        let payload = oob.to_payload();
        assert_eq!(payload.len(), 13);
        assert_eq!(&payload[..2], &[13, 0]);
        // Address goes out least significant byte first
        assert_eq!(&payload[2..8], &[0x2A, 0x10, 0x0F, 0xDC, 0x1B, 0x00]);
        assert_eq!(&payload[8..], &[4, EIR_COMPLETE_NAME, b'k', b'i', b't']);
        assert_eq!(BluetoothOob::parse(&payload), Some(oob.clone()));
        assert_eq!(oob.to_string(), "00:1B:DC:0F:10:2A (kit)");
    }

    #[test]
    fn test_bluetooth_oob_rejects_truncated() {
        assert!(BluetoothOob::parse(&[8, 0, 1, 2, 3]).is_none());
        // Declared length beyond the payload
        assert!(BluetoothOob::parse(&[20, 0, 1, 2, 3, 4, 5, 6]).is_none());
        // EIR entry running past the end
        assert!(BluetoothOob::parse(&[11, 0, 1, 2, 3, 4, 5, 6, 5, 9, b'x']).is_none());
    }

    #[test]
    fn test_carrier_type_from_record() {
        let bt = BluetoothOob::new([1, 2, 3, 4, 5, 6], None).to_record();
        assert_eq!(CarrierType::from_record(&bt), CarrierType::Bluetooth);
        assert_eq!(
            CarrierType::from_record(&Record::mime(MIME_WIFI_P2P, &b"x"[..])),
            CarrierType::WifiP2p
        );
        assert_eq!(CarrierType::from_record(&Record::uri("tel:1")), CarrierType::Unknown);
    }

    #[test]
    fn test_static_carrier_select_checks_bluetooth_data() {
        let bt = BluetoothOob::new([1, 2, 3, 4, 5, 6], Some("a"));
        let carrier = StaticCarrier::bluetooth(&bt);
        assert_eq!(carrier.carrier(), CarrierType::Bluetooth);
        assert!(carrier.process_select(&bt.to_record()).is_ok());
        assert!(carrier
            .process_select(&Record::mime(MIME_BLUETOOTH, &b"\x01"[..]))
            .is_err());
    }
}
