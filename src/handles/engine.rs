//! # The `Engine`
//!
//! The engine is the **entry point** for the daemon: it owns the controller
//! task queue and hands out sockets, SNEP clients and handover requests.
//!
//! ## Role in the Architecture
//!
//! 1. All state lives in `Core`, owned by the `nfc-controller` thread
//! 2. Handles submit closures to the queue
//! 3. The worker runs them in order against `Core` and the controller
//! 4. Results flow back through `oneshot` channels
//!
//! ## Lifetime and Shutdown
//!
//! The worker runs until [`Engine::shutdown`] is called or the `Engine` is
//! dropped. Operations still pending at that point fail with
//! [`Error::Shutdown`].

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::info;

use crate::config::{EngineConfig, LinkConfig, SocketOption};
use crate::controller::{ConnectTarget, Controller};
use crate::error::{ConfigError, Error, Result};
use crate::handles::Socket;
use crate::handover::{self, CarrierType, HandoverOutcome, HandoverServer};
use crate::phdc::PhdcServer;
use crate::runtime::{Core, EngineEvent, EngineRef, EngineShared, Service, TaskQueue, Worker};
use crate::snep::{GetResponder, SnepClient, SnepServer};
use crate::{san, ClientId, Sap};

/// Parameters of the active LLCP link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkInfo {
    pub local: LinkConfig,
    pub remote: LinkConfig,
    /// Effective MIU, the smaller of both sides
    pub miu: u16,
}

/// The peer-to-peer engine.
///
/// Create one per controller. The engine is started via
/// [`configure()`](crate::configure):
///
/// ```no_run
/// use nfc_p2p::prelude::*;
/// use nfc_p2p::controller::LoopbackController;
///
/// # async fn example() -> Result<()> {
/// let (controller, _peer, _medium) = LoopbackController::pair();
/// let engine = nfc_p2p::configure().start(controller).await?;
///
/// let mut events = engine.events();
/// while let Some(event) = events.recv().await {
///     if let EngineEvent::NdefReceived { message, .. } = event {
///         println!("received {} bytes of NDEF", message.len());
///     }
/// }
/// engine.shutdown().await;
/// # Ok(())
/// # }
/// ```
pub struct Engine {
    engine: EngineRef,
    worker: Option<Worker<Core>>,
    snep_server: Arc<SnepServer>,
}

impl Engine {
    pub(crate) async fn start(config: EngineConfig, controller: Box<dyn Controller>) -> Result<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| {
            Error::Config(ConfigError::new("engine must be started inside a tokio runtime"))
        })?;

        let shared = Arc::new(EngineShared::new(config, runtime));
        let worker_shared = Arc::clone(&shared);
        let (queue, worker) = TaskQueue::spawn("nfc-controller", move |queue| {
            Core::new(
                controller,
                EngineRef {
                    queue,
                    shared: worker_shared,
                },
            )
        })?;

        let snep_server = Arc::new(SnepServer::new(shared.config.snep_max_message));
        let engine = Self {
            engine: EngineRef { queue, shared },
            worker: Some(worker),
            snep_server,
        };

        engine
            .engine
            .call(|core, reply| {
                let _ = reply.send(core.configure_link());
            })
            .await?;
        engine.start_default_services().await?;
        info!("NFC P2P engine started");
        Ok(engine)
    }

    async fn start_default_services(&self) -> Result<()> {
        let config = &self.engine.shared.config;
        if config.auto_start_snep {
            let server: Arc<dyn Service> = self.snep_server.clone();
            self.register_service(ClientId::DAEMON, Sap::SNEP, Some(san::SNEP), server)
                .await?;
        }
        if config.auto_start_handover {
            let server = Arc::new(HandoverServer::new(
                config.carriers.clone(),
                config.carrier_priority.clone(),
                config.snep_max_message,
            ));
            self.register_service(ClientId::DAEMON, Sap::HANDOVER, Some(san::HANDOVER), server)
                .await?;
        }
        if config.auto_start_phdc {
            let server = Arc::new(PhdcServer::new());
            self.register_service(ClientId::DAEMON, Sap::PHDC, Some(san::PHDC), server)
                .await?;
        }
        Ok(())
    }

    /// Engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.engine.shared.config
    }

    /// Create a socket. The socket is usable once a link is up.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidParam`] for an MIU below 128 or a receive window above
    /// 15, [`Error::Busy`] if the engine has stopped.
    pub fn create_socket(&self, option: SocketOption) -> Result<Socket> {
        Socket::create(&self.engine, option)
    }

    /// Current link parameters, `None` while no peer is in range.
    ///
    /// The answer is produced by the worker, so every controller event
    /// queued before this call has been processed when it returns.
    pub async fn link_info(&self) -> Result<Option<LinkInfo>> {
        self.engine
            .call(|core, reply| {
                let _ = reply.send(Ok(core.link_info()));
            })
            .await
    }

    /// Subscribe to engine events.
    ///
    /// Events published after this call are delivered; the channel closes
    /// when the engine stops.
    pub fn events(&self) -> mpsc::UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.engine.queue.submit(move |core| core.subscribe(tx));
        rx
    }

    /// Register a service on `(sap, san)` for `client`.
    ///
    /// The service is started on the current link, if any, and on every
    /// link after that.
    pub async fn register_service(
        &self,
        client: ClientId,
        sap: Sap,
        san: Option<&str>,
        service: Arc<dyn Service>,
    ) -> Result<()> {
        let san = san.map(str::to_owned);
        self.engine
            .call(move |core, reply| {
                let _ = reply.send(core.register_service(client, sap, san, service));
            })
            .await
    }

    /// Remove a registration made by `client`.
    pub async fn unregister_service(&self, client: ClientId, sap: Sap, san: Option<&str>) -> Result<()> {
        let san = san.map(str::to_owned);
        self.engine
            .call(move |core, reply| {
                let _ = reply.send(core.unregister_service(client, sap, san.as_deref()));
            })
            .await
    }

    /// Drop every registration of a disconnected client. Returns how many
    /// were removed.
    pub async fn remove_client(&self, client: ClientId) -> Result<usize> {
        self.engine
            .call(move |core, reply| {
                let _ = reply.send(Ok(core.remove_client(client)));
            })
            .await
    }

    /// Add a GET responder to the default SNEP server. Responders are asked
    /// in the order they were added.
    pub fn add_get_responder(&self, responder: Arc<dyn GetResponder>) {
        self.snep_server.add_responder(responder);
    }

    /// Connect a SNEP client to the peer's default SNEP server.
    pub async fn snep_client(&self) -> Result<SnepClient> {
        self.snep_client_to(san::SNEP).await
    }

    /// Connect a SNEP client to an arbitrary SAP or service name.
    pub async fn snep_client_to(&self, target: impl Into<ConnectTarget>) -> Result<SnepClient> {
        SnepClient::connect(&self.engine, target.into()).await
    }

    /// Negotiate an alternative carrier with the peer's handover selector.
    ///
    /// `CarrierType::Unknown` offers every configured carrier.
    pub async fn handover(&self, carrier: CarrierType) -> Result<HandoverOutcome> {
        handover::request(self.engine.clone(), carrier).await
    }

    /// Blocking [`handover`](Self::handover) for threads outside the async
    /// runtime.
    pub fn handover_blocking(&self, carrier: CarrierType) -> Result<HandoverOutcome> {
        let (tx, rx) = oneshot::channel();
        let engine = self.engine.clone();
        self.engine.shared.runtime.spawn(async move {
            let _ = tx.send(handover::request(engine, carrier).await);
        });
        rx.blocking_recv().map_err(|_| Error::Shutdown)?
    }

    /// Stop the worker after every queued task has run.
    pub async fn shutdown(mut self) {
        self.stop();
        if let Some(mut worker) = self.worker.take() {
            worker.stopped().await;
        }
    }

    fn stop(&self) {
        self.engine.queue.submit(|core| core.shutdown());
        self.engine.queue.shutdown();
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("queue", &self.engine.queue)
            .finish_non_exhaustive()
    }
}
