//! # Engine Implementation (Internal)
//!
//! ## Module Structure
//!
//! - [`task_queue`]: the controller task queue and its worker thread
//! - [`core`]: `Core`, the state owned by the worker, and its event handlers
//! - [`llcp`]: per-socket records and the link
//! - [`registry`]: `(SAP, service name)` registrations
//!
//! Everything here runs on the worker thread except [`EngineRef`], which is
//! how handles reach it.

pub mod core;
pub mod llcp;
pub mod registry;
pub mod task_queue;

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU16, AtomicU32, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

use crate::config::{EngineConfig, LinkConfig};
use crate::error::{Error, Result};
use crate::handles::Socket;
use crate::handover::CarrierType;
use crate::ndef::Record;
use crate::phdc::PhdcChannel;
use crate::{ClientId, Sap, SocketId};

pub use self::core::Core;
pub use task_queue::{TaskQueue, Worker};

/// Completion channel for an operation queued on the worker.
pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

// ============================================================================
// SHARED STATE
// ============================================================================

/// State readable from any thread without going through the queue.
#[derive(Debug)]
pub(crate) struct EngineShared {
    pub(crate) config: EngineConfig,
    pub(crate) runtime: Handle,
    /// Effective link MIU, 0 while no link is up
    link_miu: AtomicU16,
    next_socket: AtomicU32,
}

impl EngineShared {
    pub(crate) fn new(config: EngineConfig, runtime: Handle) -> Self {
        Self {
            config,
            runtime,
            link_miu: AtomicU16::new(0),
            next_socket: AtomicU32::new(1),
        }
    }

    pub(crate) fn allocate_socket_id(&self) -> SocketId {
        SocketId::new(self.next_socket.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn link_miu(&self) -> Option<u16> {
        match self.link_miu.load(Ordering::Acquire) {
            0 => None,
            miu => Some(miu),
        }
    }

    pub(crate) fn set_link_miu(&self, miu: Option<u16>) {
        self.link_miu.store(miu.unwrap_or(0), Ordering::Release);
    }
}

/// What a handle needs to reach the worker.
#[derive(Clone, Debug)]
pub(crate) struct EngineRef {
    pub(crate) queue: TaskQueue<Core>,
    pub(crate) shared: Arc<EngineShared>,
}

impl EngineRef {
    /// Queue `f` and wait for it to answer through the reply channel.
    ///
    /// Submission happens when the future is first polled.
    pub(crate) async fn call<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Core, Reply<T>) + Send + 'static,
    {
        let rx = self.submit_call(f)?;
        rx.await.map_err(|_| Error::Shutdown)?
    }

    /// Blocking counterpart of [`call`](Self::call) for non-async threads.
    pub(crate) fn call_blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Core, Reply<T>) + Send + 'static,
    {
        let rx = self.submit_call(f)?;
        rx.blocking_recv().map_err(|_| Error::Shutdown)?
    }

    fn submit_call<T, F>(&self, f: F) -> Result<oneshot::Receiver<Result<T>>>
    where
        T: Send + 'static,
        F: FnOnce(&mut Core, Reply<T>) + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.queue.try_submit(move |core| f(core, tx))?;
        Ok(rx)
    }

    /// Emitter bound to this engine.
    pub(crate) fn emitter(&self) -> EventEmitter {
        EventEmitter {
            queue: self.queue.clone(),
        }
    }
}

// ============================================================================
// ENGINE EVENTS
// ============================================================================

/// Notification published to [`Engine::events`](crate::Engine::events)
/// subscribers.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// A peer came into range and the LLCP link is up.
    LinkActivated { remote: LinkConfig },
    /// The link went down. Every socket on it has failed.
    LinkDeactivated,
    /// A SNEP server received an NDEF message through PUT.
    NdefReceived { sap: Sap, message: Bytes },
    /// The handover selector agreed on a carrier with a requester.
    HandoverCompleted { carrier: CarrierType, record: Record },
    /// A handover negotiation ended in error.
    HandoverFailed { error: Error },
    /// A PHDC agent delivered an APDU. Replies go through `channel`.
    PhdcReceived { apdu: Bytes, channel: PhdcChannel },
}

/// Publishes [`EngineEvent`]s from outside the worker thread.
#[derive(Clone)]
pub struct EventEmitter {
    queue: TaskQueue<Core>,
}

impl EventEmitter {
    /// Returns false once the engine has shut down.
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.queue.submit(move |core| core.publish(event))
    }
}

impl fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventEmitter").finish_non_exhaustive()
    }
}

// ============================================================================
// SERVICES
// ============================================================================

/// A server started for every incoming connection on a registered
/// `(SAP, service name)`.
///
/// `activate` runs on the controller worker thread and must not block:
/// anything long-running goes into [`Activation::spawn`].
pub trait Service: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Take ownership of a freshly accepted connection.
    fn activate(&self, activation: Activation);
}

/// Everything a [`Service`] gets for one accepted connection.
pub struct Activation {
    /// The connected socket, owned by the service from now on
    pub socket: Socket,
    /// SAP the service is registered on
    pub sap: Sap,
    /// Registration owner
    pub client: ClientId,
    events: EventEmitter,
    runtime: Handle,
}

impl Activation {
    pub(crate) fn new(
        socket: Socket,
        sap: Sap,
        client: ClientId,
        events: EventEmitter,
        runtime: Handle,
    ) -> Self {
        Self {
            socket,
            sap,
            client,
            events,
            runtime,
        }
    }

    /// Run the connection's protocol loop on the engine's runtime.
    pub fn spawn<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(fut);
    }

    /// Emitter for publishing engine events from the protocol loop.
    pub fn events(&self) -> EventEmitter {
        self.events.clone()
    }

    /// Split into the socket and the pieces needed inside a spawned task.
    pub fn into_parts(self) -> (Socket, EventEmitter, Handle) {
        (self.socket, self.events, self.runtime)
    }
}

impl fmt::Debug for Activation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Activation")
            .field("socket", &self.socket.id())
            .field("sap", &self.sap)
            .field("client", &self.client)
            .finish()
    }
}
