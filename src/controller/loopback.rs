//! In-memory controller pair.
//!
//! Two [`LoopbackController`]s share one medium. Frames sent by one side
//! land in the peer's socket buffers, and both engines see completions the
//! same way a radio would deliver them. [`LoopbackMedium`] plays the part
//! of the user holding two phones together: it brings the link up and down
//! and can inject failures.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tracing::trace;

use super::{ConnectTarget, Controller, ControllerEvent, EventSink, IncomingToken};
use crate::config::{LinkConfig, SocketOption, SocketType};
use crate::error::{Error, Result, SocketError};
use crate::{Sap, SocketId};

/// One of the two devices on the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    A,
    B,
}

impl Side {
    fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
        }
    }

    fn other(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

#[derive(Debug)]
struct Endpoint {
    option: SocketOption,
    sap: Option<Sap>,
    san: Option<String>,
    listening: bool,
    peer: Option<SocketId>,
    inbox: VecDeque<Bytes>,
    inbox_from: VecDeque<(Sap, Bytes)>,
    waiting: usize,
    waiting_from: usize,
}

impl Endpoint {
    fn new(option: SocketOption) -> Self {
        Self {
            option,
            sap: None,
            san: None,
            listening: false,
            peer: None,
            inbox: VecDeque::new(),
            inbox_from: VecDeque::new(),
            waiting: 0,
            waiting_from: 0,
        }
    }
}

#[derive(Debug)]
struct End {
    sink: Option<EventSink>,
    local: LinkConfig,
    sockets: HashMap<SocketId, Endpoint>,
    next_sap: u8,
}

impl Default for End {
    fn default() -> Self {
        Self {
            sink: None,
            local: LinkConfig::default(),
            sockets: HashMap::new(),
            next_sap: Sap::FIRST_DYNAMIC.value(),
        }
    }
}

impl End {
    fn emit(&self, event: ControllerEvent) {
        if let Some(sink) = &self.sink {
            sink.emit(event);
        }
    }

    fn sap_in_use(&self, sap: Sap) -> bool {
        self.sockets.values().any(|ep| ep.sap == Some(sap))
    }

    fn allocate_sap(&mut self) -> Result<Sap> {
        for _ in Sap::FIRST_DYNAMIC.value()..=Sap::MAX {
            let candidate = Sap::new(self.next_sap).ok_or(Error::InvalidParam("SAP"))?;
            self.next_sap = if self.next_sap == Sap::MAX {
                Sap::FIRST_DYNAMIC.value()
            } else {
                self.next_sap + 1
            };
            if !self.sap_in_use(candidate) {
                return Ok(candidate);
            }
        }
        Err(Error::InvalidParam("no free dynamic SAP"))
    }

    /// Queue a connection-oriented frame and satisfy a waiting receive.
    fn deliver(&mut self, socket: SocketId, data: Bytes) {
        let Some(ep) = self.sockets.get_mut(&socket) else {
            return;
        };
        ep.inbox.push_back(data);
        if ep.waiting > 0 {
            if let Some(frame) = ep.inbox.pop_front() {
                ep.waiting -= 1;
                self.emit(ControllerEvent::Received {
                    socket,
                    result: Ok(frame),
                });
            }
        }
    }

    fn deliver_from(&mut self, socket: SocketId, from: Sap, data: Bytes) {
        let Some(ep) = self.sockets.get_mut(&socket) else {
            return;
        };
        ep.inbox_from.push_back((from, data));
        if ep.waiting_from > 0 {
            if let Some(frame) = ep.inbox_from.pop_front() {
                ep.waiting_from -= 1;
                self.emit(ControllerEvent::ReceivedFrom {
                    socket,
                    result: Ok(frame),
                });
            }
        }
    }
}

#[derive(Debug)]
struct PendingConnect {
    side: Side,
    socket: SocketId,
    listener_sap: Option<Sap>,
}

#[derive(Debug, Default)]
struct Medium {
    active: bool,
    present: bool,
    ends: [End; 2],
    pending: HashMap<IncomingToken, PendingConnect>,
    next_token: u32,
}

impl Medium {
    fn end(&self, side: Side) -> &End {
        &self.ends[side.index()]
    }

    fn end_mut(&mut self, side: Side) -> &mut End {
        &mut self.ends[side.index()]
    }

    fn require_link(&self) -> Result<()> {
        if self.active {
            Ok(())
        } else {
            Err(Error::Socket(SocketError::NoLink))
        }
    }

    fn find_listener(&self, side: Side, target: &ConnectTarget) -> Option<(SocketId, Option<Sap>)> {
        self.end(side).sockets.iter().find_map(|(id, ep)| {
            let matches = ep.listening
                && ep.option.kind == SocketType::ConnectionOriented
                && match target {
                    ConnectTarget::Sap(sap) => ep.sap == Some(*sap),
                    ConnectTarget::Name(name) => ep.san.as_deref() == Some(name.as_str()),
                };
            matches.then_some((*id, ep.sap))
        })
    }

    /// Drop a connection from `side`, telling the peer about it.
    fn unlink(&mut self, side: Side, socket: SocketId) {
        let peer = self
            .end_mut(side)
            .sockets
            .get_mut(&socket)
            .and_then(|ep| ep.peer.take());
        if let Some(peer) = peer {
            let other = self.end_mut(side.other());
            if let Some(ep) = other.sockets.get_mut(&peer) {
                ep.peer = None;
            }
            other.emit(ControllerEvent::Disconnected { socket: peer });
        }
    }
}

/// Controller for one side of an in-memory link.
#[derive(Debug)]
pub struct LoopbackController {
    side: Side,
    medium: Arc<Mutex<Medium>>,
}

/// Control handle for the shared medium.
#[derive(Debug, Clone)]
pub struct LoopbackMedium {
    medium: Arc<Mutex<Medium>>,
}

fn lock(medium: &Mutex<Medium>) -> MutexGuard<'_, Medium> {
    medium.lock().unwrap_or_else(PoisonError::into_inner)
}

impl LoopbackController {
    /// Create two controllers facing each other, plus the medium control.
    pub fn pair() -> (Self, Self, LoopbackMedium) {
        let medium = Arc::new(Mutex::new(Medium::default()));
        (
            Self {
                side: Side::A,
                medium: Arc::clone(&medium),
            },
            Self {
                side: Side::B,
                medium: Arc::clone(&medium),
            },
            LoopbackMedium { medium },
        )
    }

    /// Which side of the medium this controller drives.
    pub fn side(&self) -> Side {
        self.side
    }

    fn lock(&self) -> MutexGuard<'_, Medium> {
        lock(&self.medium)
    }
}

impl Controller for LoopbackController {
    fn attach(&mut self, sink: EventSink) {
        self.lock().end_mut(self.side).sink = Some(sink);
    }

    fn configure_link(&mut self, local: LinkConfig) -> Result<()> {
        self.lock().end_mut(self.side).local = local;
        Ok(())
    }

    fn remote_config(&self) -> Option<LinkConfig> {
        let medium = self.lock();
        medium
            .active
            .then(|| medium.end(self.side.other()).local)
    }

    fn create_socket(&mut self, socket: SocketId, option: SocketOption) -> Result<()> {
        let mut medium = self.lock();
        let end = medium.end_mut(self.side);
        if end.sockets.contains_key(&socket) {
            return Err(Error::InvalidParam("socket already exists"));
        }
        end.sockets.insert(socket, Endpoint::new(option));
        Ok(())
    }

    fn listen(&mut self, socket: SocketId, sap: Option<Sap>, san: Option<&str>) -> Result<Sap> {
        let mut medium = self.lock();
        let end = medium.end_mut(self.side);
        if !end.sockets.contains_key(&socket) {
            return Err(Error::InvalidParam("unknown socket"));
        }
        let bound = match sap {
            Some(sap) if end.sap_in_use(sap) => {
                return Err(Error::InvalidParam("SAP already bound"));
            }
            Some(sap) => sap,
            None => end.allocate_sap()?,
        };
        if let Some(ep) = end.sockets.get_mut(&socket) {
            ep.sap = Some(bound);
            ep.san = san.map(str::to_owned);
            ep.listening = true;
        }
        Ok(bound)
    }

    fn connect(&mut self, socket: SocketId, target: &ConnectTarget) -> Result<()> {
        let mut medium = self.lock();
        medium.require_link()?;
        if !medium.end(self.side).sockets.contains_key(&socket) {
            return Err(Error::InvalidParam("unknown socket"));
        }

        let Some((listener, listener_sap)) = medium.find_listener(self.side.other(), target) else {
            trace!("loopback: no listener for {}, sending DM", target);
            medium.end(self.side).emit(ControllerEvent::Connected {
                socket,
                result: Err(SocketError::ConnectRejected),
            });
            return Ok(());
        };

        let local_sap = medium.end_mut(self.side).allocate_sap()?;
        if let Some(ep) = medium.end_mut(self.side).sockets.get_mut(&socket) {
            ep.sap = Some(local_sap);
        }
        let token = IncomingToken(medium.next_token);
        medium.next_token = medium.next_token.wrapping_add(1);
        medium.pending.insert(
            token,
            PendingConnect {
                side: self.side,
                socket,
                listener_sap,
            },
        );
        medium.end(self.side.other()).emit(ControllerEvent::Incoming {
            listener,
            token,
            remote_sap: local_sap,
        });
        Ok(())
    }

    fn accept(&mut self, token: IncomingToken, socket: SocketId) -> Result<()> {
        let mut medium = self.lock();
        let pending = medium
            .pending
            .remove(&token)
            .ok_or(Error::InvalidParam("unknown incoming connection"))?;
        let connector_alive = medium
            .end(pending.side)
            .sockets
            .contains_key(&pending.socket);

        let end = medium.end_mut(self.side);
        let Some(ep) = end.sockets.get_mut(&socket) else {
            return Err(Error::InvalidParam("unknown socket"));
        };
        if !connector_alive {
            end.emit(ControllerEvent::Connected {
                socket,
                result: Err(SocketError::Disconnected),
            });
            return Ok(());
        }
        ep.sap = pending.listener_sap;
        ep.peer = Some(pending.socket);
        end.emit(ControllerEvent::Connected {
            socket,
            result: Ok(()),
        });

        let remote = medium.end_mut(pending.side);
        if let Some(ep) = remote.sockets.get_mut(&pending.socket) {
            ep.peer = Some(socket);
        }
        remote.emit(ControllerEvent::Connected {
            socket: pending.socket,
            result: Ok(()),
        });
        Ok(())
    }

    fn send(&mut self, socket: SocketId, data: Bytes) -> Result<()> {
        let mut medium = self.lock();
        medium.require_link()?;
        let peer = medium
            .end(self.side)
            .sockets
            .get(&socket)
            .ok_or(Error::InvalidParam("unknown socket"))?
            .peer
            .ok_or(Error::Socket(SocketError::Disconnected))?;

        let remote_miu = medium.end(self.side.other()).local.miu;
        if data.len() > usize::from(remote_miu) {
            trace!("loopback: {} byte frame exceeds peer MIU {}", data.len(), remote_miu);
            medium.end(self.side).emit(ControllerEvent::SendComplete {
                socket,
                result: Err(SocketError::FrameRejected),
            });
            return Ok(());
        }

        trace!("loopback: {:?} {} -> {} ({} bytes)", self.side, socket, peer, data.len());
        medium.end_mut(self.side.other()).deliver(peer, data);
        medium.end(self.side).emit(ControllerEvent::SendComplete {
            socket,
            result: Ok(()),
        });
        Ok(())
    }

    fn send_to(&mut self, socket: SocketId, sap: Sap, data: Bytes) -> Result<()> {
        let mut medium = self.lock();
        medium.require_link()?;
        let end = medium.end_mut(self.side);
        let bound = match end.sockets.get(&socket) {
            None => return Err(Error::InvalidParam("unknown socket")),
            Some(ep) => ep.sap,
        };
        let source = match bound {
            Some(sap) => sap,
            None => {
                let sap = end.allocate_sap()?;
                if let Some(ep) = end.sockets.get_mut(&socket) {
                    ep.sap = Some(sap);
                }
                sap
            }
        };

        if data.len() > usize::from(medium.end(self.side.other()).local.miu) {
            medium.end(self.side).emit(ControllerEvent::SendComplete {
                socket,
                result: Err(SocketError::FrameRejected),
            });
            return Ok(());
        }
        let remote = medium.end_mut(self.side.other());
        let target = remote.sockets.iter().find_map(|(id, ep)| {
            (ep.sap == Some(sap) && ep.option.kind == SocketType::Connectionless).then_some(*id)
        });
        match target {
            Some(target) => remote.deliver_from(target, source, data),
            // UI frames are unacknowledged, nobody listening means the frame is lost
            None => trace!("loopback: no connectionless socket on SAP {}", sap),
        }
        medium.end(self.side).emit(ControllerEvent::SendComplete {
            socket,
            result: Ok(()),
        });
        Ok(())
    }

    fn receive(&mut self, socket: SocketId) -> Result<()> {
        let mut medium = self.lock();
        let end = medium.end_mut(self.side);
        let ep = end
            .sockets
            .get_mut(&socket)
            .ok_or(Error::InvalidParam("unknown socket"))?;
        match ep.inbox.pop_front() {
            Some(frame) => end.emit(ControllerEvent::Received {
                socket,
                result: Ok(frame),
            }),
            None => ep.waiting += 1,
        }
        Ok(())
    }

    fn receive_from(&mut self, socket: SocketId) -> Result<()> {
        let mut medium = self.lock();
        let end = medium.end_mut(self.side);
        let ep = end
            .sockets
            .get_mut(&socket)
            .ok_or(Error::InvalidParam("unknown socket"))?;
        match ep.inbox_from.pop_front() {
            Some(frame) => end.emit(ControllerEvent::ReceivedFrom {
                socket,
                result: Ok(frame),
            }),
            None => ep.waiting_from += 1,
        }
        Ok(())
    }

    fn disconnect(&mut self, socket: SocketId) -> Result<()> {
        let mut medium = self.lock();
        if !medium.end(self.side).sockets.contains_key(&socket) {
            return Err(Error::InvalidParam("unknown socket"));
        }
        medium.unlink(self.side, socket);
        medium
            .end(self.side)
            .emit(ControllerEvent::Disconnected { socket });
        Ok(())
    }

    fn close(&mut self, socket: SocketId) {
        let mut medium = self.lock();
        medium.unlink(self.side, socket);
        medium.end_mut(self.side).sockets.remove(&socket);
        let side = self.side;
        medium
            .pending
            .retain(|_, p| !(p.side == side && p.socket == socket));
    }

    fn check_presence(&mut self) -> Result<()> {
        let medium = self.lock();
        if medium.active && medium.present {
            Ok(())
        } else {
            Err(Error::Socket(SocketError::Disconnected))
        }
    }
}

impl LoopbackMedium {
    /// Bring both devices into range. Each side learns the other's link
    /// parameters.
    pub fn activate(&self) {
        let mut medium = lock(&self.medium);
        medium.active = true;
        medium.present = true;
        for side in [Side::A, Side::B] {
            medium.end(side).emit(ControllerEvent::LinkActivated);
        }
    }

    /// Pull the devices apart. Every socket on both sides is dropped.
    pub fn deactivate(&self) {
        let mut medium = lock(&self.medium);
        medium.active = false;
        medium.pending.clear();
        for side in [Side::A, Side::B] {
            let end = medium.end_mut(side);
            end.sockets.clear();
            end.next_sap = Sap::FIRST_DYNAMIC.value();
            end.emit(ControllerEvent::LinkDeactivated);
        }
    }

    /// Make presence checks succeed or fail without raising a deactivation.
    pub fn set_present(&self, present: bool) {
        lock(&self.medium).present = present;
    }

    /// Raise a socket error on one side.
    pub fn fail_socket(&self, side: Side, socket: SocketId, error: SocketError) {
        lock(&self.medium)
            .end(side)
            .emit(ControllerEvent::SocketError { socket, error });
    }

    /// Whether the link is currently up.
    pub fn is_active(&self) -> bool {
        lock(&self.medium).active
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn attached(ctrl: &mut LoopbackController) -> mpsc::Receiver<ControllerEvent> {
        let (tx, rx) = mpsc::channel();
        ctrl.attach(EventSink::new(move |ev| tx.send(ev).is_ok()));
        rx
    }

    #[test]
    fn test_connect_without_listener_is_rejected() {
        let (mut a, mut b, medium) = LoopbackController::pair();
        let rx_a = attached(&mut a);
        let _rx_b = attached(&mut b);
        medium.activate();
        assert!(matches!(rx_a.try_recv(), Ok(ControllerEvent::LinkActivated)));

        let id = SocketId::new(1);
        a.create_socket(id, SocketOption::default()).unwrap();
        a.connect(id, &ConnectTarget::Sap(Sap::SNEP)).unwrap();
        match rx_a.try_recv() {
            Ok(ControllerEvent::Connected { socket, result }) => {
                assert_eq!(socket, id);
                assert_eq!(result, Err(SocketError::ConnectRejected));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_oversized_frame_is_rejected_by_peer_miu() {
        let (mut a, mut b, medium) = LoopbackController::pair();
        let rx_a = attached(&mut a);
        let rx_b = attached(&mut b);
        medium.activate();
        let _ = rx_a.try_recv();
        let _ = rx_b.try_recv();

        let listener = SocketId::new(10);
        b.create_socket(listener, SocketOption::default()).unwrap();
        b.listen(listener, Some(Sap::SNEP), None).unwrap();

        let client = SocketId::new(1);
        a.create_socket(client, SocketOption::default()).unwrap();
        a.connect(client, &ConnectTarget::Sap(Sap::SNEP)).unwrap();
        let token = match rx_b.try_recv() {
            Ok(ControllerEvent::Incoming { token, .. }) => token,
            other => panic!("unexpected event {other:?}"),
        };
        let accepted = SocketId::new(11);
        b.create_socket(accepted, SocketOption::default()).unwrap();
        b.accept(token, accepted).unwrap();
        assert!(matches!(rx_a.try_recv(), Ok(ControllerEvent::Connected { result: Ok(()), .. })));

        a.send(client, Bytes::from(vec![0u8; 129])).unwrap();
        match rx_a.try_recv() {
            Ok(ControllerEvent::SendComplete { result, .. }) => {
                assert_eq!(result, Err(SocketError::FrameRejected));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_presence_follows_medium() {
        let (mut a, _b, medium) = LoopbackController::pair();
        assert!(a.check_presence().is_err());
        medium.activate();
        assert!(a.check_presence().is_ok());
        medium.set_present(false);
        assert_eq!(
            a.check_presence(),
            Err(Error::Socket(SocketError::Disconnected))
        );
    }
}
