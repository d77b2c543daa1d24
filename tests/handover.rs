//! Connection Handover between a requester engine and a selector engine.

mod helpers;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use helpers::{next_event, Pair};
use nfc_p2p::handover::{
    BluetoothOob, CarrierNegotiator, HandoverMessage, PowerState, StaticCarrier, MIME_WIFI_P2P,
};
use nfc_p2p::ndef::{Message, Record};
use nfc_p2p::prelude::*;
use nfc_p2p::EngineBuilder;

const WSC: &[u8] = b"\x10\x4a\x00\x01\x10";

fn bluetooth(address: [u8; 6], name: &str) -> Arc<dyn CarrierNegotiator> {
    Arc::new(StaticCarrier::bluetooth(&BluetoothOob::new(address, Some(name))))
}

fn wifi() -> Arc<dyn CarrierNegotiator> {
    Arc::new(StaticCarrier::wifi(WSC))
}

/// Both sides can do Wi-Fi and Bluetooth.
fn dual(address: [u8; 6], name: &str) -> EngineBuilder {
    nfc_p2p::configure().carrier(wifi()).carrier(bluetooth(address, name))
}

#[tokio::test]
async fn selector_priority_wins_over_request_order() {
    let pair = Pair::start(
        dual([0x00, 0x11, 0x22, 0x33, 0x44, 0x55], "requester"),
        dual([0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB], "selector"),
    )
    .await;
    let mut events = pair.b.events();
    pair.activate().await;

    // The request lists Wi-Fi first; the selector prefers Bluetooth
    let outcome = pair.a.handover(CarrierType::Unknown).await.unwrap();
    assert_eq!(outcome.carrier, CarrierType::Bluetooth);
    let oob = BluetoothOob::parse(&outcome.data).unwrap();
    assert_eq!(oob.address, [0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB]);
    assert_eq!(oob.name.as_deref(), Some("selector"));
    assert_eq!(CarrierType::from_record(&outcome.record), CarrierType::Bluetooth);

    let (carrier, record) = next_event(&mut events, |e| match e {
        EngineEvent::HandoverCompleted { carrier, record } => Some((carrier, record)),
        _ => None,
    })
    .await;
    assert_eq!(carrier, CarrierType::Bluetooth);
    let requester = BluetoothOob::parse(&record.payload).unwrap();
    assert_eq!(requester.name.as_deref(), Some("requester"));
}

#[tokio::test]
async fn requested_carrier_restricts_the_offer() {
    let pair = Pair::start(
        dual([0x00, 0x11, 0x22, 0x33, 0x44, 0x55], "requester"),
        dual([0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB], "selector"),
    )
    .await;
    pair.activate().await;

    let outcome = pair.a.handover(CarrierType::WifiBss).await.unwrap();
    assert_eq!(outcome.carrier, CarrierType::WifiBss);
    assert_eq!(outcome.data.as_ref(), WSC);
}

#[tokio::test]
async fn no_common_carrier() {
    let p2p: Arc<dyn CarrierNegotiator> = Arc::new(StaticCarrier::new(
        Record::mime(MIME_WIFI_P2P, &b"p2p"[..]),
        PowerState::Activating,
    ));
    let pair = Pair::start(
        nfc_p2p::configure().carrier(p2p),
        nfc_p2p::configure().carrier(bluetooth([1, 2, 3, 4, 5, 6], "selector")),
    )
    .await;
    let mut events = pair.b.events();
    pair.activate().await;

    assert_eq!(
        pair.a.handover(CarrierType::Unknown).await.unwrap_err(),
        Error::Protocol(ProtocolError::NotFound)
    );
    let error = next_event(&mut events, |e| match e {
        EngineEvent::HandoverFailed { error } => Some(error),
        _ => None,
    })
    .await;
    assert_eq!(error, Error::Protocol(ProtocolError::NotFound));
}

#[tokio::test]
async fn nothing_to_offer() {
    let pair = Pair::start(
        nfc_p2p::configure().carrier(wifi()),
        dual([1, 2, 3, 4, 5, 6], "selector"),
    )
    .await;
    pair.activate().await;

    assert!(matches!(
        pair.a.handover(CarrierType::Bluetooth).await,
        Err(Error::InvalidParam(_))
    ));
}

#[tokio::test]
async fn selector_rejects_malformed_requests() {
    let pair = Pair::start(nfc_p2p::configure(), dual([1, 2, 3, 4, 5, 6], "selector")).await;
    let mut events = pair.b.events();
    pair.activate().await;

    // A valid NDEF message whose first record is not a Handover Request
    let client = pair.a.snep_client_to(nfc_p2p::san::HANDOVER).await.unwrap();
    let not_hr = Message::from(Record::uri("http://example.com")).to_bytes();
    assert_eq!(
        client.put(not_hr).await,
        Err(Error::Protocol(ProtocolError::BadRequest))
    );

    let error = next_event(&mut events, |e| match e {
        EngineEvent::HandoverFailed { error } => Some(error),
        _ => None,
    })
    .await;
    assert_eq!(error, Error::Protocol(ProtocolError::InvalidFormat));
}

/// Bluetooth carrier that counts the requests it is handed.
struct Counting {
    inner: StaticCarrier,
    requests: AtomicUsize,
}

impl CarrierNegotiator for Counting {
    fn carrier(&self) -> CarrierType {
        self.inner.carrier()
    }

    fn config_record(&self) -> Option<Record> {
        self.inner.config_record()
    }

    fn process_request(&self, _record: &Record) -> nfc_p2p::Result<()> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn process_select(&self, record: &Record) -> nfc_p2p::Result<Bytes> {
        self.inner.process_select(record)
    }
}

#[tokio::test]
async fn invalid_requests_never_reach_the_carrier() {
    let counting = Arc::new(Counting {
        inner: StaticCarrier::bluetooth(&BluetoothOob::new([1, 2, 3, 4, 5, 6], Some("selector"))),
        requests: AtomicUsize::new(0),
    });
    let pair = Pair::start(
        nfc_p2p::configure().carrier(bluetooth([6, 5, 4, 3, 2, 1], "requester")),
        nfc_p2p::configure().carrier(counting.clone()),
    )
    .await;
    pair.activate().await;
    let offer = BluetoothOob::new([6, 5, 4, 3, 2, 1], None).to_record();

    let mut future_major = HandoverMessage::request(0x1234);
    future_major.add_carrier(PowerState::Active, offer);
    future_major.version = 0x22;
    // Collision record only
    let no_carrier = HandoverMessage::request(0x1234);

    for request in [future_major.to_bytes(), no_carrier.to_bytes()] {
        // The selector hangs up after a failed negotiation
        let client = pair.a.snep_client_to(nfc_p2p::san::HANDOVER).await.unwrap();
        assert_eq!(
            client.put(request).await,
            Err(Error::Protocol(ProtocolError::BadRequest))
        );
        assert_eq!(counting.requests.load(Ordering::SeqCst), 0);
    }

    let outcome = pair.a.handover(CarrierType::Bluetooth).await.unwrap();
    assert_eq!(outcome.carrier, CarrierType::Bluetooth);
    assert_eq!(counting.requests.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handover_needs_a_selector() {
    let pair = Pair::start(
        nfc_p2p::configure().carrier(wifi()),
        nfc_p2p::configure().auto_start_handover(false),
    )
    .await;
    pair.activate().await;

    assert_eq!(
        pair.a.handover(CarrierType::Unknown).await.unwrap_err(),
        Error::Socket(SocketError::ConnectRejected)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_handover() {
    let pair = Pair::start(
        dual([0x00, 0x11, 0x22, 0x33, 0x44, 0x55], "requester"),
        dual([0x66, 0x77, 0x88, 0x99, 0xAA, 0xBB], "selector"),
    )
    .await;
    pair.activate().await;

    let (pair, outcome) = tokio::task::spawn_blocking(move || {
        let outcome = pair.a.handover_blocking(CarrierType::Unknown);
        (pair, outcome)
    })
    .await
    .unwrap();
    assert_eq!(outcome.unwrap().carrier, CarrierType::Bluetooth);
    drop(pair);
}
