//! NFC controller abstraction.
//!
//! The engine never talks to a radio directly. Everything radio-facing goes
//! through a [`Controller`], which is owned by the controller task queue and
//! only ever called from its worker thread.
//!
//! Issue calls return as soon as the operation is handed to the hardware.
//! Their completions come back later as [`ControllerEvent`]s pushed into the
//! [`EventSink`] given to [`Controller::attach`]; the sink re-enters the task
//! queue, so a completion is processed in order with every other task.
//!
//! [`LoopbackController`] wires two engines together in memory and is what
//! the integration tests run on.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::config::{LinkConfig, SocketOption};
use crate::error::{Result, SocketError};
use crate::{Sap, SocketId};

mod loopback;

pub use loopback::{LoopbackController, LoopbackMedium, Side};

/// Where an outgoing connection goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectTarget {
    /// A fixed service access point
    Sap(Sap),
    /// A service name, resolved by the peer's service environment
    Name(String),
}

impl fmt::Display for ConnectTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sap(sap) => write!(f, "SAP {sap}"),
            Self::Name(name) => write!(f, "{name}"),
        }
    }
}

impl From<Sap> for ConnectTarget {
    fn from(sap: Sap) -> Self {
        Self::Sap(sap)
    }
}

impl From<&str> for ConnectTarget {
    fn from(name: &str) -> Self {
        Self::Name(name.to_owned())
    }
}

/// Identifies a pending incoming connection until it is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IncomingToken(pub u32);

/// Completion or notification raised by the controller.
#[derive(Debug, Clone)]
pub enum ControllerEvent {
    /// A P2P target was detected and the LLCP link is up. The peer's
    /// parameters are available from [`Controller::remote_config`].
    LinkActivated,
    /// The target left the field.
    LinkDeactivated,
    /// A peer connects to one of our listening sockets.
    Incoming {
        listener: SocketId,
        token: IncomingToken,
        remote_sap: Sap,
    },
    /// Outcome of `connect` or `accept`.
    Connected {
        socket: SocketId,
        result: std::result::Result<(), SocketError>,
    },
    /// Outcome of `send` or `send_to`, one per call in issue order.
    SendComplete {
        socket: SocketId,
        result: std::result::Result<(), SocketError>,
    },
    /// Outcome of `receive`, one per call in issue order.
    Received {
        socket: SocketId,
        result: std::result::Result<Bytes, SocketError>,
    },
    /// Outcome of `receive_from`, carrying the sender's SAP.
    ReceivedFrom {
        socket: SocketId,
        result: std::result::Result<(Sap, Bytes), SocketError>,
    },
    /// The logical connection is gone, either side initiated.
    Disconnected { socket: SocketId },
    /// Terminal socket failure.
    SocketError { socket: SocketId, error: SocketError },
}

/// Delivers controller events into the engine.
#[derive(Clone)]
pub struct EventSink {
    deliver: Arc<dyn Fn(ControllerEvent) -> bool + Send + Sync>,
}

impl EventSink {
    pub fn new(deliver: impl Fn(ControllerEvent) -> bool + Send + Sync + 'static) -> Self {
        Self {
            deliver: Arc::new(deliver),
        }
    }

    /// Hand an event to the engine. Returns false once the engine is gone.
    pub fn emit(&self, event: ControllerEvent) -> bool {
        (self.deliver)(event)
    }
}

impl fmt::Debug for EventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSink").finish_non_exhaustive()
    }
}

/// Radio-facing LLCP operations.
///
/// Methods returning `Err` failed before anything reached the hardware and
/// produce no event. Everything else completes through the [`EventSink`].
pub trait Controller: Send + 'static {
    /// Register the sink for completions and notifications.
    fn attach(&mut self, sink: EventSink);

    /// Push local link parameters, used at the next activation.
    fn configure_link(&mut self, local: LinkConfig) -> Result<()>;

    /// Link parameters announced by the peer while a link is up.
    fn remote_config(&self) -> Option<LinkConfig>;

    /// Allocate a driver-level socket.
    fn create_socket(&mut self, socket: SocketId, option: SocketOption) -> Result<()>;

    /// Bind a socket and, for connection-oriented sockets, start accepting.
    /// `None` asks for a dynamically assigned SAP. Returns the bound SAP.
    fn listen(&mut self, socket: SocketId, sap: Option<Sap>, san: Option<&str>) -> Result<Sap>;

    /// Open a data link connection. Completes with `Connected`.
    fn connect(&mut self, socket: SocketId, target: &ConnectTarget) -> Result<()>;

    /// Accept a pending incoming connection onto a fresh socket. Completes
    /// with `Connected` for that socket.
    fn accept(&mut self, token: IncomingToken, socket: SocketId) -> Result<()>;

    /// Send one I-PDU. Completes with `SendComplete`.
    fn send(&mut self, socket: SocketId, data: Bytes) -> Result<()>;

    /// Send one UI-PDU to a remote SAP. Completes with `SendComplete`.
    fn send_to(&mut self, socket: SocketId, sap: Sap, data: Bytes) -> Result<()>;

    /// Receive one I-PDU. Completes with `Received`.
    fn receive(&mut self, socket: SocketId) -> Result<()>;

    /// Receive one UI-PDU. Completes with `ReceivedFrom`.
    fn receive_from(&mut self, socket: SocketId) -> Result<()>;

    /// Tear down the data link connection. Completes with `Disconnected`.
    fn disconnect(&mut self, socket: SocketId) -> Result<()>;

    /// Release the socket. No completion.
    fn close(&mut self, socket: SocketId);

    /// Check that the target is still in the field.
    fn check_presence(&mut self) -> Result<()>;
}
