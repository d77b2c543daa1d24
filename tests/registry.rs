//! Service registration, client cleanup and the PHDC manager.

mod helpers;

use std::sync::Arc;

use bytes::Bytes;
use helpers::{next_event, Pair};
use nfc_p2p::phdc::{encode_apdu, ApduReader};
use nfc_p2p::prelude::*;
use nfc_p2p::{san, Activation, Service};
use tokio::sync::mpsc;

const ECHO: &str = "urn:nfc:sn:x-echo";

/// Echoes every frame back and reports each connection it takes.
struct Echo {
    accepted: mpsc::UnboundedSender<(ClientId, Sap)>,
}

impl Echo {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<(ClientId, Sap)>) {
        let (accepted, rx) = mpsc::unbounded_channel();
        (Arc::new(Self { accepted }), rx)
    }
}

impl Service for Echo {
    fn name(&self) -> &str {
        "echo"
    }

    fn activate(&self, activation: Activation) {
        let _ = self.accepted.send((activation.client, activation.sap));
        let (socket, _events, runtime) = activation.into_parts();
        runtime.spawn(async move {
            while let Ok(frame) = socket.receive().await {
                if socket.send(frame).await.is_err() {
                    break;
                }
            }
        });
    }
}

#[tokio::test]
async fn registered_service_takes_connections() {
    let pair = Pair::start(nfc_p2p::configure(), nfc_p2p::configure()).await;
    let (echo, mut accepted) = Echo::new();
    let sap = Sap::new(0x12).unwrap();

    // Registered before the link: the listener starts on activation
    pair.b
        .register_service(ClientId::new(3), sap, Some(ECHO), echo)
        .await
        .unwrap();
    pair.activate().await;

    let socket = pair.a.create_socket(SocketOption::default()).unwrap();
    socket.connect(ECHO).await.unwrap();
    socket.send(&b"hello"[..]).await.unwrap();
    assert_eq!(socket.receive().await.unwrap(), Bytes::from_static(b"hello"));
    assert_eq!(accepted.recv().await, Some((ClientId::new(3), sap)));

    // Reachable by SAP too
    let by_sap = pair.a.create_socket(SocketOption::default()).unwrap();
    by_sap.connect(sap).await.unwrap();
    by_sap.send(&b"again"[..]).await.unwrap();
    assert_eq!(by_sap.receive().await.unwrap(), Bytes::from_static(b"again"));
}

#[tokio::test]
async fn conflicting_registrations_are_refused() {
    let pair = Pair::linked().await;
    let (echo, _accepted) = Echo::new();
    let client = ClientId::new(1);

    // SAP and name of the default SNEP server
    assert_eq!(
        pair.b
            .register_service(client, Sap::SNEP, None, echo.clone())
            .await,
        Err(Error::AlreadyRegistered)
    );
    assert_eq!(
        pair.b
            .register_service(client, Sap::new(0x13).unwrap(), Some(san::SNEP), echo.clone())
            .await,
        Err(Error::AlreadyRegistered)
    );

    pair.b
        .register_service(client, Sap::new(0x13).unwrap(), Some(ECHO), echo.clone())
        .await
        .unwrap();
    assert_eq!(
        pair.b
            .unregister_service(client, Sap::new(0x13).unwrap(), None)
            .await,
        Err(Error::NotRegistered)
    );
    assert_eq!(
        pair.b
            .unregister_service(ClientId::new(2), Sap::new(0x13).unwrap(), Some(ECHO))
            .await,
        Err(Error::NotRegistered)
    );
    pair.b
        .unregister_service(client, Sap::new(0x13).unwrap(), Some(ECHO))
        .await
        .unwrap();

    // The listener went with the registration
    let socket = pair.a.create_socket(SocketOption::default()).unwrap();
    assert_eq!(
        socket.connect(ECHO).await,
        Err(Error::Socket(SocketError::ConnectRejected))
    );
}

#[tokio::test]
async fn removing_a_client_drops_all_its_services() {
    let pair = Pair::linked().await;
    let (echo, _accepted) = Echo::new();
    let owner = ClientId::new(9);

    for (sap, name) in [(0x12, "urn:nfc:sn:x-one"), (0x13, "urn:nfc:sn:x-two")] {
        pair.b
            .register_service(owner, Sap::new(sap).unwrap(), Some(name), echo.clone())
            .await
            .unwrap();
    }
    pair.b
        .register_service(ClientId::new(10), Sap::new(0x14).unwrap(), Some(ECHO), echo.clone())
        .await
        .unwrap();

    assert_eq!(pair.b.remove_client(owner).await, Ok(2));
    assert_eq!(pair.b.remove_client(owner).await, Ok(0));

    let gone = pair.a.create_socket(SocketOption::default()).unwrap();
    assert_eq!(
        gone.connect("urn:nfc:sn:x-one").await,
        Err(Error::Socket(SocketError::ConnectRejected))
    );
    let kept = pair.a.create_socket(SocketOption::default()).unwrap();
    kept.connect(ECHO).await.unwrap();
}

#[tokio::test]
async fn phdc_manager_delivers_apdus() {
    let pair = Pair::start(
        nfc_p2p::configure(),
        nfc_p2p::configure().auto_start_phdc(true),
    )
    .await;
    let mut events = pair.b.events();
    pair.activate().await;

    let agent = pair.a.create_socket(SocketOption::default()).unwrap();
    agent.connect(san::PHDC).await.unwrap();

    // An association request split over two frames
    let association = vec![0xE2u8; 200];
    let framed = encode_apdu(&association).unwrap();
    agent.send(framed.slice(..100)).await.unwrap();
    agent.send(framed.slice(100..)).await.unwrap();

    let (apdu, channel) = next_event(&mut events, |e| match e {
        EngineEvent::PhdcReceived { apdu, channel } => Some((apdu, channel)),
        _ => None,
    })
    .await;
    assert_eq!(apdu.as_ref(), association.as_slice());

    channel.send(b"\xE3\x00\x00\x2C").await.unwrap();
    let mut reader = ApduReader::new();
    let reply = loop {
        reader.push(&agent.receive().await.unwrap());
        if let Some(apdu) = reader.next_apdu() {
            break apdu;
        }
    };
    assert_eq!(reply.as_ref(), b"\xE3\x00\x00\x2C");
}
