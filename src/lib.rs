//! # nfc-p2p
//!
//! The **peer-to-peer protocol engine** of an NFC daemon: LLCP socket
//! multiplexing, SNEP object exchange and Connection Handover negotiation,
//! all serialized against a single-threaded NFC controller.
//!
//! ## Features
//!
//! - **Controller Task Queue**: one worker thread, strict FIFO, one controller
//!   operation in flight at a time
//! - **LLCP sockets**: connection-oriented and connectionless sockets with
//!   async completions delivered back through the queue
//! - **SNEP**: fragmented GET/PUT with flow control, FIFO job queue per client
//! - **Connection Handover**: Handover Request/Select, priority-based carrier
//!   selection, pluggable transport negotiators
//! - **Service Registry**: `(SAP, service name)` to service dispatch, default
//!   SNEP / Handover / PHDC servers started on every link
//!
//! ## Quick Start
//!
//! ```no_run
//! use nfc_p2p::prelude::*;
//! use nfc_p2p::controller::LoopbackController;
//! use nfc_p2p::ndef::{Message, Record};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let (controller, peer, medium) = LoopbackController::pair();
//!     let engine = nfc_p2p::configure().start(controller).await?;
//!     let _peer = nfc_p2p::configure().start(peer).await?;
//!
//!     medium.activate();
//!     engine.link_info().await?;
//!
//!     let client = engine.snep_client().await?;
//!     let uri = Message::from(Record::uri("https://example.com"));
//!     client.put(uri.to_bytes()).await?;
//!     Ok(())
//! }
//! ```
//!
//! ---
//!
//! # Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                          Daemon / IPC layer                          │
//! │   ┌──────────┐   ┌────────────┐   ┌──────────────┐   ┌───────────┐   │
//! │   │  Engine  │   │   Socket   │   │  SnepClient  │   │  Service  │   │
//! │   └────┬─────┘   └─────┬──────┘   └──────┬───────┘   └─────┬─────┘   │
//! └────────┼───────────────┼─────────────────┼─────────────────┼─────────┘
//!          │ tasks         │ tasks           │ socket ops      │ activate
//!          ▼               ▼                 ▼                 │
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │              Controller Task Queue (thread "nfc-controller")         │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │ Core                                                           │  │
//! │  │  • link: Option<LlcpLink>                                      │  │
//! │  │  • sockets: HashMap<SocketId, LlcpSocket>                      │  │
//! │  │  • registry: ServiceRegistry                                   │  │
//! │  │  • subscribers of EngineEvent                                  │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! └───────────────┬──────────────────────────────────▲───────────────────┘
//!                 │ issue                            │ ControllerEvent
//!                 ▼                                  │ (re-enters queue)
//!          ┌──────────────────────────────────────────────┐
//!          │        Controller (radio / loopback)         │
//!          └──────────────────────────────────────────────┘
//! ```
//!
//! Every piece of mutable engine state lives in `Core`, which only the
//! worker thread touches. Handles submit closures to the queue and await a
//! `oneshot` completion; controller completions are themselves queued, so
//! callbacks never race with each other or with new requests.
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`handles`] | [`Engine`], [`Socket`] |
//! | [`controller`] | [`Controller`](controller::Controller) trait, loopback pair |
//! | [`snep`] | SNEP wire format, fragmentation, client and server |
//! | [`handover`] | Handover messages, carriers, requester and selector |
//! | [`phdc`] | PHDC manager service |
//! | [`ndef`] | NDEF record and message codec |
//! | [`config`] | [`EngineConfig`], link and socket options |
//! | [`error`] | [`Error`], [`Result`] |
//! | `runtime` | Task queue, core state, LLCP socket table, registry |

pub mod builder;
pub mod config;
pub mod controller;
pub mod error;
pub mod handles;
pub mod handover;
pub mod ndef;
pub mod phdc;
pub(crate) mod runtime;
pub mod snep;

pub use builder::EngineBuilder;
pub use config::{EngineConfig, EngineConfigBuilder, LinkConfig, SocketOption, SocketType};
pub use error::*;
pub use handles::{Engine, LinkInfo, Socket};
pub use runtime::{Activation, EngineEvent, EventEmitter, Service, TaskQueue, Worker};

/// Start configuring an engine.
///
/// ```no_run
/// # use nfc_p2p::controller::LoopbackController;
/// # async fn example() -> nfc_p2p::Result<()> {
/// let (controller, _peer, _medium) = LoopbackController::pair();
/// let engine = nfc_p2p::configure()
///     .presence_check_interval(250)
///     .auto_start_phdc(true)
///     .start(controller)
///     .await?;
/// # Ok(())
/// # }
/// ```
pub fn configure() -> EngineBuilder {
    EngineBuilder::new()
}

// ============================================================================
// PROTOCOL IDENTIFIERS
// ============================================================================

/// LLCP service access point (0x00-0x3F).
///
/// 0x00-0x0F are well-known services, 0x10-0x1F are assigned by the local
/// service environment, 0x20-0x3F are handed out dynamically to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sap(u8);

impl Sap {
    pub const SDP: Self = Self(0x01);
    pub const IP: Self = Self(0x02);
    pub const OBEX: Self = Self(0x03);
    pub const SNEP: Self = Self(0x04);
    pub const HANDOVER: Self = Self(0x11);
    pub const PHDC: Self = Self(0x16);
    pub const PHDS: Self = Self(0x17);

    /// First SAP handed out to outgoing connections.
    pub const FIRST_DYNAMIC: Self = Self(0x20);

    /// Highest valid SAP.
    pub const MAX: u8 = 0x3F;

    /// Create a new `Sap`. Returns None above 0x3F.
    pub fn new(sap: u8) -> Option<Self> {
        if sap > Self::MAX {
            None
        } else {
            Some(Self(sap))
        }
    }

    /// Get the raw value
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Well-known SAPs are the only ones a peer may address without SDP.
    pub fn is_well_known(&self) -> bool {
        self.0 < 0x10
    }
}

impl std::fmt::Display for Sap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Well-known LLCP service names.
pub mod san {
    pub const SDP: &str = "urn:nfc:sn:sdp";
    pub const IP: &str = "urn:nfc:sn:ip";
    pub const OBEX: &str = "urn:nfc:sn:obex";
    pub const SNEP: &str = "urn:nfc:sn:snep";
    pub const HANDOVER: &str = "urn:nfc:sn:handover";
    pub const PHDC: &str = "urn:nfc:sn:phdc";
    pub const PHDS: &str = "urn:nfc:sn:phds";
}

/// Engine-local socket handle number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(u32);

impl SocketId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// IPC client owning service registrations.
///
/// [`ClientId::DAEMON`] owns the default servers started from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(u32);

impl ClientId {
    pub const DAEMON: Self = Self(0);

    pub fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub mod prelude {
    pub use crate::handover::{CarrierType, HandoverOutcome};
    pub use crate::snep::SnepClient;
    pub use crate::{
        ClientId, Engine, EngineConfig, EngineEvent, Error, LinkConfig, ProtocolError, Result,
        Sap, Socket, SocketError, SocketId, SocketOption, SocketType,
    };
}
