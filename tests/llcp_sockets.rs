//! LLCP socket layer over the loopback controller.

mod helpers;

use std::time::Duration;

use bytes::Bytes;
use helpers::{next_event, Pair};
use nfc_p2p::prelude::*;

const ECHO: &str = "urn:nfc:sn:echo";

/// Connect A to a listener on B, returning (client on A, accepted on B).
async fn connected(pair: &Pair) -> (Socket, Socket, Socket) {
    let listener = pair.b.create_socket(SocketOption::default()).unwrap();
    let sap = listener.listen(None, Some(ECHO)).await.unwrap();
    assert!(sap.value() >= Sap::FIRST_DYNAMIC.value());

    let client = pair.a.create_socket(SocketOption::default()).unwrap();
    client.connect(ECHO).await.unwrap();
    let accepted = listener.accept().await.unwrap();
    (listener, client, accepted)
}

#[tokio::test]
async fn connect_accept_and_exchange_frames() {
    let pair = Pair::linked().await;
    let (_listener, client, server) = connected(&pair).await;

    client.send(&b"ping"[..]).await.unwrap();
    client.send(&b"ping 2"[..]).await.unwrap();
    assert_eq!(server.receive().await.unwrap(), Bytes::from_static(b"ping"));
    assert_eq!(server.receive().await.unwrap(), Bytes::from_static(b"ping 2"));

    server.send(&b"pong"[..]).await.unwrap();
    assert_eq!(client.receive().await.unwrap(), Bytes::from_static(b"pong"));
}

#[tokio::test]
async fn link_parameters_are_negotiated() {
    let pair = Pair::start(
        nfc_p2p::configure().link(LinkConfig {
            miu: 248,
            ..LinkConfig::default()
        }),
        nfc_p2p::configure().link(LinkConfig {
            miu: 1024,
            lto: 20,
            ..LinkConfig::default()
        }),
    )
    .await;
    assert_eq!(pair.a.link_info().await.unwrap(), None);

    pair.activate().await;
    let info = pair.a.link_info().await.unwrap().unwrap();
    assert_eq!(info.local.miu, 248);
    assert_eq!(info.remote.miu, 1024);
    assert_eq!(info.remote.lto, 20);
    assert_eq!(info.miu, 248);

    let socket = pair
        .a
        .create_socket(SocketOption {
            miu: 2048,
            ..SocketOption::default()
        })
        .unwrap();
    assert_eq!(socket.miu(), 248);
}

#[tokio::test]
async fn connect_without_listener_is_rejected() {
    let pair = Pair::linked().await;
    let socket = pair.a.create_socket(SocketOption::default()).unwrap();
    assert_eq!(
        socket.connect("urn:nfc:sn:nobody").await,
        Err(Error::Socket(SocketError::ConnectRejected))
    );
    // The failure is terminal for the socket
    assert_eq!(
        socket.receive().await,
        Err(Error::Socket(SocketError::ConnectRejected))
    );
}

#[tokio::test]
async fn connect_needs_a_link() {
    let pair = Pair::start(nfc_p2p::configure(), nfc_p2p::configure()).await;
    let socket = pair.a.create_socket(SocketOption::default()).unwrap();
    assert_eq!(
        socket.connect(Sap::SNEP).await,
        Err(Error::Socket(SocketError::NoLink))
    );
}

#[tokio::test]
async fn parameter_errors_are_synchronous() {
    let pair = Pair::linked().await;
    assert!(matches!(
        pair.a.create_socket(SocketOption {
            miu: 64,
            ..SocketOption::default()
        }),
        Err(Error::InvalidParam(_))
    ));
    assert!(matches!(
        pair.a.create_socket(SocketOption {
            rw: 16,
            ..SocketOption::default()
        }),
        Err(Error::InvalidParam(_))
    ));

    let (_listener, client, _server) = connected(&pair).await;
    assert!(matches!(client.send(Bytes::new()).await, Err(Error::InvalidParam(_))));
    let oversized = Bytes::from(vec![0u8; usize::from(client.miu()) + 1]);
    assert!(matches!(client.send(oversized).await, Err(Error::InvalidParam(_))));
}

#[tokio::test]
async fn connectionless_frames_carry_source_sap() {
    let pair = Pair::linked().await;
    let receiver = pair.b.create_socket(SocketOption::connectionless()).unwrap();
    let bound = receiver.listen(Sap::new(0x30), None).await.unwrap();
    assert_eq!(bound.value(), 0x30);

    let sender = pair.a.create_socket(SocketOption::connectionless()).unwrap();
    sender.send_to(bound, &b"ui frame"[..]).await.unwrap();

    let (from, data) = receiver.receive_from().await.unwrap();
    assert!(from.value() >= Sap::FIRST_DYNAMIC.value());
    assert_eq!(data, Bytes::from_static(b"ui frame"));
}

#[tokio::test]
async fn peer_disconnect_fails_pending_receive() {
    let pair = Pair::linked().await;
    let (_listener, client, server) = connected(&pair).await;

    let pending = tokio::spawn(async move { client.receive().await });
    // Give the receive time to reach the worker
    tokio::time::sleep(Duration::from_millis(20)).await;
    server.disconnect().await.unwrap();

    assert_eq!(
        pending.await.unwrap(),
        Err(Error::Socket(SocketError::Disconnected))
    );
}

#[tokio::test]
async fn link_loss_fails_every_socket() {
    let pair = Pair::linked().await;
    let mut events = pair.a.events();
    let (listener, client, _server) = connected(&pair).await;

    let receive = tokio::spawn(async move {
        let result = client.receive().await;
        (client, result)
    });
    tokio::time::sleep(Duration::from_millis(20)).await;
    pair.medium.deactivate();

    let (client, result) = receive.await.unwrap();
    assert_eq!(result, Err(Error::Socket(SocketError::Disconnected)));
    assert_eq!(
        client.send(&b"late"[..]).await,
        Err(Error::Socket(SocketError::Disconnected))
    );
    next_event(&mut events, |e| matches!(e, EngineEvent::LinkDeactivated).then_some(())).await;
    assert_eq!(pair.a.link_info().await.unwrap(), None);
    drop(listener);
}

#[tokio::test]
async fn failed_presence_check_tears_the_link_down() {
    let pair = Pair::start(
        nfc_p2p::configure().presence_check_interval(10),
        nfc_p2p::configure().presence_check_interval(10),
    )
    .await;
    let mut events = pair.a.events();
    pair.activate().await;
    next_event(&mut events, |e| match e {
        EngineEvent::LinkActivated { remote } => Some(remote),
        _ => None,
    })
    .await;

    pair.medium.set_present(false);
    next_event(&mut events, |e| matches!(e, EngineEvent::LinkDeactivated).then_some(())).await;
    assert_eq!(pair.a.link_info().await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn blocking_wrappers_from_plain_threads() {
    let pair = Pair::linked().await;
    let (_listener, client, server) = connected(&pair).await;

    let sender = tokio::task::spawn_blocking(move || {
        client.send_blocking(&b"from a thread"[..]).unwrap();
        client
    });
    let receiver = tokio::task::spawn_blocking(move || server.receive_blocking());

    let _client = sender.await.unwrap();
    assert_eq!(
        receiver.await.unwrap().unwrap(),
        Bytes::from_static(b"from a thread")
    );
}
