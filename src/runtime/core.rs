//! State owned by the controller worker and the handlers that mutate it.
//!
//! Two kinds of task run against [`Core`]:
//!
//! - **Requests** from handles (`listen`, `send`, `register_service`, ...).
//!   They are validated against the socket state, issued to the controller,
//!   and their reply channel is parked on the socket until a completion
//!   arrives. Validation failures are answered straight away.
//! - **Controller events**, pushed by the [`EventSink`] installed at startup.
//!   They complete parked replies, hand accepted connections to listeners
//!   or services, and bring the link up or down.
//!
//! Link loss is fatal for every socket: all pending operations fail with
//! `Disconnected` and the registry forgets its listeners until the next
//! activation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::llcp::{LlcpLink, LlcpSocket, SocketState};
use super::registry::{Registration, ServiceRegistry};
use super::{Activation, EngineEvent, EngineRef, Reply, Service};
use crate::config::{LinkConfig, SocketOption, SocketType};
use crate::controller::{ConnectTarget, Controller, ControllerEvent, EventSink, IncomingToken};
use crate::error::{Error, Result, SocketError};
use crate::handles::{LinkInfo, Socket};
use crate::{ClientId, Sap, SocketId};

pub struct Core {
    controller: Box<dyn Controller>,
    engine: EngineRef,
    link: Option<LlcpLink>,
    sockets: HashMap<SocketId, LlcpSocket>,
    registry: ServiceRegistry,
    subscribers: Vec<mpsc::UnboundedSender<EngineEvent>>,
    presence: Option<JoinHandle<()>>,
}

impl Core {
    /// Build the worker state and route controller events into the queue.
    pub(crate) fn new(mut controller: Box<dyn Controller>, engine: EngineRef) -> Self {
        let queue = engine.queue.clone();
        controller.attach(EventSink::new(move |event| {
            queue.submit(move |core: &mut Core| core.on_controller_event(event))
        }));
        Self {
            controller,
            engine,
            link: None,
            sockets: HashMap::new(),
            registry: ServiceRegistry::new(),
            subscribers: Vec::new(),
            presence: None,
        }
    }

    /// Push the local link parameters to the controller.
    pub(crate) fn configure_link(&mut self) -> Result<()> {
        let local = self.engine.shared.config.link;
        debug!(
            "configuring LLCP link: MIU {}, WKS 0x{:04X}, LTO {}, option {}",
            local.miu, local.wks, local.lto, local.option
        );
        self.controller.configure_link(local)
    }

    // ========================================================================
    // CONTROLLER EVENTS
    // ========================================================================

    pub(crate) fn on_controller_event(&mut self, event: ControllerEvent) {
        trace!("controller event: {:?}", event);
        match event {
            ControllerEvent::LinkActivated => self.link_activated(),
            ControllerEvent::LinkDeactivated => self.teardown_link("target detached"),
            ControllerEvent::Incoming {
                listener,
                token,
                remote_sap,
            } => self.incoming(listener, token, remote_sap),
            ControllerEvent::Connected { socket, result } => self.connected(socket, result),
            ControllerEvent::SendComplete { socket, result } => {
                if let Some(s) = self.sockets.get_mut(&socket) {
                    s.complete_send(result);
                }
            }
            ControllerEvent::Received { socket, result } => {
                if let Some(s) = self.sockets.get_mut(&socket) {
                    s.complete_receive(result);
                }
            }
            ControllerEvent::ReceivedFrom { socket, result } => {
                if let Some(s) = self.sockets.get_mut(&socket) {
                    s.complete_receive_from(result);
                }
            }
            ControllerEvent::Disconnected { socket } => {
                if let Some(s) = self.sockets.get_mut(&socket) {
                    debug!("socket {} disconnected", socket);
                    s.disconnected();
                }
            }
            ControllerEvent::SocketError { socket, error } => {
                if let Some(s) = self.sockets.get_mut(&socket) {
                    if s.fail(Error::Socket(error)) {
                        warn!("socket {} error: {}", socket, error);
                    }
                }
            }
        }
    }

    fn link_activated(&mut self) {
        if self.link.is_some() {
            warn!("link activated while a link is up, dropping the old one");
            self.teardown_link("replaced");
        }
        let local = self.engine.shared.config.link;
        let remote = self.controller.remote_config().unwrap_or_else(|| {
            warn!("controller reported no remote link parameters, assuming defaults");
            LinkConfig::default()
        });
        let link = LlcpLink { local, remote };
        info!(
            "LLCP link up: MIU {} (local {}, remote {}), remote LTO {}",
            link.miu(),
            local.miu,
            remote.miu,
            remote.lto
        );
        self.engine.shared.set_link_miu(Some(link.miu()));
        self.link = Some(link);

        for index in 0..self.registry.len() {
            self.start_listener(index);
        }
        self.start_presence_check();
        self.publish(EngineEvent::LinkActivated { remote });
    }

    fn teardown_link(&mut self, reason: &str) {
        if self.link.take().is_none() {
            return;
        }
        info!("LLCP link down: {}", reason);
        self.engine.shared.set_link_miu(None);
        if let Some(task) = self.presence.take() {
            task.abort();
        }

        for listener in self.registry.clear_listeners() {
            self.sockets.remove(&listener);
            self.controller.close(listener);
        }
        // Connections nobody has accepted yet die with the link
        let orphans: Vec<SocketId> = self
            .sockets
            .values()
            .filter(|s| s.parent.is_some())
            .map(|s| s.id)
            .collect();
        for id in orphans {
            self.sockets.remove(&id);
            self.controller.close(id);
        }

        let error = Error::Socket(SocketError::Disconnected);
        for socket in self.sockets.values_mut() {
            socket.fail(error.clone());
        }
        self.publish(EngineEvent::LinkDeactivated);
    }

    fn start_presence_check(&mut self) {
        let interval_ms = self.engine.shared.config.presence_check_interval;
        if interval_ms == 0 {
            return;
        }
        let queue = self.engine.queue.clone();
        let period = Duration::from_millis(interval_ms);
        self.presence = Some(self.engine.shared.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // First tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !queue.submit(|core: &mut Core| core.check_presence()) {
                    break;
                }
            }
        }));
    }

    pub(crate) fn check_presence(&mut self) {
        if self.link.is_none() {
            return;
        }
        if let Err(e) = self.controller.check_presence() {
            warn!("presence check failed: {}", e);
            self.teardown_link("target lost");
        }
    }

    fn incoming(&mut self, listener: SocketId, token: IncomingToken, remote_sap: Sap) {
        let (option, sap) = match self.sockets.get(&listener) {
            Some(l) if l.state == SocketState::Listening => (l.option, l.sap),
            _ => {
                warn!("connection from SAP {} for unknown listener {}", remote_sap, listener);
                return;
            }
        };
        let id = self.engine.shared.allocate_socket_id();
        let accepted = self
            .controller
            .create_socket(id, option)
            .and_then(|()| self.controller.accept(token, id));
        if let Err(e) = accepted {
            warn!("failed to accept connection from SAP {} on {}: {}", remote_sap, listener, e);
            self.controller.close(id);
            return;
        }
        debug!("incoming connection {} from SAP {} on listener {}", id, remote_sap, listener);
        let mut socket = LlcpSocket::new(id, option);
        socket.state = SocketState::Connecting;
        socket.sap = sap;
        socket.remote_sap = Some(remote_sap);
        socket.parent = Some(listener);
        self.sockets.insert(id, socket);
    }

    fn connected(&mut self, id: SocketId, result: std::result::Result<(), SocketError>) {
        let Some(socket) = self.sockets.get_mut(&id) else {
            return;
        };
        socket.complete_connect(result);
        match (socket.parent, result) {
            (Some(listener), Ok(())) => self.hand_out(listener, id),
            (Some(_), Err(e)) => {
                debug!("incoming connection {} failed: {}", id, e);
                self.sockets.remove(&id);
                self.controller.close(id);
            }
            (None, Ok(())) => debug!("socket {} connected", id),
            (None, Err(e)) => debug!("socket {} connect failed: {}", id, e),
        }
    }

    /// Deliver a freshly connected socket to whoever listens for it.
    fn hand_out(&mut self, listener: SocketId, id: SocketId) {
        if let Some(registration) = self.registry.by_listener(listener) {
            let service = Arc::clone(&registration.service);
            let sap = registration.sap;
            let client = registration.client;
            let Some(socket) = self.claim(id) else {
                return;
            };
            debug!("activating {} for {} on SAP {}", service.name(), id, sap);
            service.activate(Activation::new(
                socket,
                sap,
                client,
                self.engine.emitter(),
                self.engine.shared.runtime.clone(),
            ));
            return;
        }

        let waiter = match self.sockets.get_mut(&listener) {
            Some(l) => l.pop_accept(),
            None => {
                self.sockets.remove(&id);
                self.controller.close(id);
                return;
            }
        };
        match waiter {
            Some(reply) => {
                if let Some(socket) = self.claim(id) {
                    // A caller that vanished drops the handle, which closes it
                    let _ = reply.send(Ok(socket));
                }
            }
            None => {
                if let Some(l) = self.sockets.get_mut(&listener) {
                    l.backlog.push_back(id);
                }
            }
        }
    }

    /// Detach a connection from its listener and wrap it in a handle.
    fn claim(&mut self, id: SocketId) -> Option<Socket> {
        let socket = self.sockets.get_mut(&id)?;
        socket.parent = None;
        if let Some(remote) = socket.remote_sap {
            trace!("socket {} handed out, peer SAP {}", id, remote);
        }
        Some(Socket::new(id, socket.option, self.engine.clone()))
    }

    // ========================================================================
    // SOCKET REQUESTS
    // ========================================================================

    pub(crate) fn create_socket(&mut self, id: SocketId, option: SocketOption) {
        match self.controller.create_socket(id, option) {
            Ok(()) => {
                trace!("socket {} created ({:?}, MIU {})", id, option.kind, option.miu);
                self.sockets
                    .insert(id, LlcpSocket::new(id, option));
            }
            Err(e) => {
                error!("controller failed to create socket {}: {}", id, e);
                self.sockets.insert(id, LlcpSocket::failed(id, option, e));
            }
        }
    }

    fn gate(&self, id: SocketId, allowed: &[SocketState], kind: SocketType) -> Result<()> {
        let socket = self
            .sockets
            .get(&id)
            .ok_or(Error::InvalidParam("unknown socket"))?;
        socket.check(allowed)?;
        if socket.option.kind != kind {
            return Err(Error::InvalidParam("operation not valid for socket type"));
        }
        Ok(())
    }

    fn require_link(&self) -> Result<()> {
        if self.link.is_some() {
            Ok(())
        } else {
            Err(Error::Socket(SocketError::NoLink))
        }
    }

    /// Run `op`; on success park `reply` on the socket until its completion.
    fn issue<T>(
        &mut self,
        id: SocketId,
        reply: Reply<T>,
        op: impl FnOnce(&mut Self) -> Result<()>,
        park: impl FnOnce(&mut LlcpSocket, Reply<T>),
    ) {
        if let Err(e) = op(self) {
            let _ = reply.send(Err(e));
            return;
        }
        match self.sockets.get_mut(&id) {
            Some(socket) => park(socket, reply),
            None => {
                let _ = reply.send(Err(Error::InvalidParam("unknown socket")));
            }
        }
    }

    pub(crate) fn listen(
        &mut self,
        id: SocketId,
        sap: Option<Sap>,
        san: Option<String>,
        reply: Reply<Sap>,
    ) {
        let _ = reply.send(self.try_listen(id, sap, san));
    }

    fn try_listen(&mut self, id: SocketId, sap: Option<Sap>, san: Option<String>) -> Result<Sap> {
        let socket = self
            .sockets
            .get(&id)
            .ok_or(Error::InvalidParam("unknown socket"))?;
        socket.check(&[SocketState::Idle])?;
        let bound = self.controller.listen(id, sap, san.as_deref())?;
        if let Some(socket) = self.sockets.get_mut(&id) {
            socket.state = SocketState::Listening;
            socket.sap = Some(bound);
            socket.san = san;
        }
        debug!("socket {} listening on SAP {}", id, bound);
        Ok(bound)
    }

    pub(crate) fn connect(&mut self, id: SocketId, target: ConnectTarget, reply: Reply<()>) {
        self.issue(
            id,
            reply,
            |core| {
                core.require_link()?;
                core.gate(id, &[SocketState::Idle], SocketType::ConnectionOriented)?;
                debug!("socket {} connecting to {}", id, target);
                core.controller.connect(id, &target)?;
                if let Some(socket) = core.sockets.get_mut(&id) {
                    socket.state = SocketState::Connecting;
                }
                Ok(())
            },
            LlcpSocket::push_connect,
        );
    }

    pub(crate) fn accept(&mut self, id: SocketId, reply: Reply<Socket>) {
        let ready = self
            .gate(id, &[SocketState::Listening], SocketType::ConnectionOriented)
            .map(|()| {
                self.sockets
                    .get_mut(&id)
                    .and_then(|listener| listener.backlog.pop_front())
            });
        match ready {
            Err(e) => {
                let _ = reply.send(Err(e));
            }
            Ok(Some(conn)) => match self.claim(conn) {
                Some(socket) => {
                    let _ = reply.send(Ok(socket));
                }
                None => self.accept(id, reply),
            },
            Ok(None) => {
                if let Some(listener) = self.sockets.get_mut(&id) {
                    listener.push_accept(reply);
                }
            }
        }
    }

    pub(crate) fn send(&mut self, id: SocketId, data: Bytes, reply: Reply<()>) {
        self.issue(
            id,
            reply,
            |core| {
                core.gate(id, &[SocketState::Connected], SocketType::ConnectionOriented)?;
                trace!("socket {} send {} bytes", id, data.len());
                core.controller.send(id, data)
            },
            LlcpSocket::push_send,
        );
    }

    pub(crate) fn send_to(&mut self, id: SocketId, sap: Sap, data: Bytes, reply: Reply<()>) {
        self.issue(
            id,
            reply,
            |core| {
                core.require_link()?;
                core.gate(
                    id,
                    &[SocketState::Idle, SocketState::Listening],
                    SocketType::Connectionless,
                )?;
                trace!("socket {} send {} bytes to SAP {}", id, data.len(), sap);
                core.controller.send_to(id, sap, data)
            },
            LlcpSocket::push_send,
        );
    }

    pub(crate) fn receive(&mut self, id: SocketId, reply: Reply<Bytes>) {
        self.issue(
            id,
            reply,
            |core| {
                core.gate(id, &[SocketState::Connected], SocketType::ConnectionOriented)?;
                core.controller.receive(id)
            },
            LlcpSocket::push_receive,
        );
    }

    pub(crate) fn receive_from(&mut self, id: SocketId, reply: Reply<(Sap, Bytes)>) {
        self.issue(
            id,
            reply,
            |core| {
                core.gate(id, &[SocketState::Listening], SocketType::Connectionless)?;
                core.controller.receive_from(id)
            },
            LlcpSocket::push_receive_from,
        );
    }

    pub(crate) fn disconnect(&mut self, id: SocketId, reply: Reply<()>) {
        if self.sockets.get(&id).map(|s| s.state) == Some(SocketState::Closed) {
            let _ = reply.send(Ok(()));
            return;
        }
        self.issue(
            id,
            reply,
            |core| {
                core.gate(id, &[SocketState::Connected], SocketType::ConnectionOriented)?;
                core.controller.disconnect(id)
            },
            LlcpSocket::push_disconnect,
        );
    }

    /// Release a socket. Anything still pending on it fails.
    pub(crate) fn close_socket(&mut self, id: SocketId) -> bool {
        let Some(mut socket) = self.sockets.remove(&id) else {
            return false;
        };
        socket.fail(Error::Socket(SocketError::Disconnected));
        for conn in socket.backlog.drain(..) {
            self.sockets.remove(&conn);
            self.controller.close(conn);
        }
        self.controller.close(id);
        debug!("socket {} closed", id);
        true
    }

    // ========================================================================
    // SERVICE REGISTRY
    // ========================================================================

    pub(crate) fn register_service(
        &mut self,
        client: ClientId,
        sap: Sap,
        san: Option<String>,
        service: Arc<dyn Service>,
    ) -> Result<()> {
        let name = service.name().to_owned();
        let index = self.registry.register(Registration {
            client,
            sap,
            san,
            service,
            listener: None,
        })?;
        info!("registered service {} on SAP {}", name, sap);
        if self.link.is_some() {
            self.start_listener(index);
        }
        Ok(())
    }

    pub(crate) fn unregister_service(
        &mut self,
        client: ClientId,
        sap: Sap,
        san: Option<&str>,
    ) -> Result<()> {
        let registration = self.registry.unregister(client, sap, san)?;
        info!("unregistered service {} on SAP {}", registration.service.name(), sap);
        if let Some(listener) = registration.listener {
            self.close_socket(listener);
        }
        Ok(())
    }

    pub(crate) fn remove_client(&mut self, client: ClientId) -> usize {
        let removed = self.registry.remove_client(client);
        for registration in &removed {
            if let Some(listener) = registration.listener {
                self.close_socket(listener);
            }
        }
        if !removed.is_empty() {
            info!("removed {} service(s) of client {:?}", removed.len(), client);
        }
        removed.len()
    }

    /// Open the listening socket of a registration.
    fn start_listener(&mut self, index: usize) {
        let Some(registration) = self.registry.get_mut(index) else {
            return;
        };
        let sap = registration.sap;
        let san = registration.san.clone();
        let name = registration.service.name().to_owned();
        let option = SocketOption {
            kind: SocketType::ConnectionOriented,
            ..self.engine.shared.config.socket_option
        };
        let id = self.engine.shared.allocate_socket_id();

        let listening = self
            .controller
            .create_socket(id, option)
            .and_then(|()| self.controller.listen(id, Some(sap), san.as_deref()));
        match listening {
            Ok(bound) => {
                let mut socket = LlcpSocket::new(id, option);
                socket.state = SocketState::Listening;
                socket.sap = Some(bound);
                socket.san = san;
                self.sockets.insert(id, socket);
                if let Some(registration) = self.registry.get_mut(index) {
                    registration.listener = Some(id);
                }
                debug!("service {} listening on SAP {} ({})", name, bound, id);
            }
            Err(e) => {
                error!("failed to start service {} on SAP {}: {}", name, sap, e);
                self.controller.close(id);
            }
        }
    }

    // ========================================================================
    // ENGINE
    // ========================================================================

    pub(crate) fn subscribe(&mut self, tx: mpsc::UnboundedSender<EngineEvent>) {
        self.subscribers.push(tx);
    }

    pub(crate) fn publish(&mut self, event: EngineEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub(crate) fn link_info(&self) -> Option<LinkInfo> {
        self.link.map(|link| LinkInfo {
            local: link.local,
            remote: link.remote,
            miu: link.miu(),
        })
    }

    /// Fail everything and release the controller's sockets.
    pub(crate) fn shutdown(&mut self) {
        if let Some(task) = self.presence.take() {
            task.abort();
        }
        self.link = None;
        self.engine.shared.set_link_miu(None);
        self.registry.clear_listeners();
        for (id, mut socket) in self.sockets.drain() {
            socket.fail(Error::Shutdown);
            self.controller.close(id);
        }
        self.subscribers.clear();
        info!("engine stopped");
    }
}
