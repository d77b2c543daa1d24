//! # Connection Handover
//!
//! Negotiates an alternative carrier (Bluetooth, Wi-Fi) over SNEP.
//!
//! - **Requester** ([`Engine::handover`](crate::Engine::handover)): offers
//!   the configured carriers in a Handover Request sent as a SNEP PUT, then
//!   hands the carrier record of the peer's Handover Select to the matching
//!   [`CarrierNegotiator`].
//! - **Selector** ([`HandoverServer`]): picks the highest-priority carrier
//!   the requester offers and answers with a Handover Select.
//!
//! Requests and selects are validated before any carrier is looked at: the
//! first record must be `Hr`/`Hs`, the major version must be 1, and at least
//! one alternative carrier must be present. Any failure ends the negotiation;
//! there is no retry.

mod carrier;
pub mod message;
mod requester;
mod selector;

use bytes::Bytes;

use crate::ndef::Record;

pub use carrier::{
    BluetoothOob, CarrierNegotiator, CarrierType, StaticCarrier, MIME_BLUETOOTH, MIME_WIFI_BSS,
    MIME_WIFI_P2P,
};
pub use message::{HandoverMessage, PowerState};
pub(crate) use requester::request;
pub use selector::HandoverServer;

/// Result of a successful handover request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoverOutcome {
    /// Negotiated carrier
    pub carrier: CarrierType,
    /// The selector's configuration record for it
    pub record: Record,
    /// Connection data produced by the local negotiator
    pub data: Bytes,
}
