//! Builder for configuring and starting an engine.
//!
//! ## Quick Start
//!
//! ```no_run
//! # use nfc_p2p::controller::LoopbackController;
//! # async fn example() -> nfc_p2p::Result<()> {
//! let (controller, _peer, _medium) = LoopbackController::pair();
//! let engine = nfc_p2p::configure().start(controller).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Builder Pattern
//!
//! ```no_run
//! use std::sync::Arc;
//! use nfc_p2p::prelude::*;
//! use nfc_p2p::controller::LoopbackController;
//! use nfc_p2p::handover::{BluetoothOob, StaticCarrier};
//!
//! # async fn example() -> nfc_p2p::Result<()> {
//! let (controller, _peer, _medium) = LoopbackController::pair();
//! let bt = BluetoothOob::new([0x00, 0x1B, 0xDC, 0x0F, 0x10, 0x2A], Some("headset"));
//! let engine = nfc_p2p::configure()
//!     .link(LinkConfig { miu: 248, ..LinkConfig::default() })
//!     .snep_max_message(4096)
//!     .carrier(Arc::new(StaticCarrier::bluetooth(&bt)))
//!     .carrier_priority(vec![CarrierType::Bluetooth, CarrierType::WifiBss])
//!     .start(controller)
//!     .await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Controller
//!
//! `start` takes any [`Controller`]. The controller moves onto the
//! `nfc-controller` worker thread and is never called from anywhere else.
//! For tests and demos, [`LoopbackController`](crate::controller::LoopbackController)
//! connects two engines in memory.

use std::sync::Arc;

use crate::config::{clamp_miu, clamp_snep_max, EngineConfig, LinkConfig, SocketOption};
use crate::controller::Controller;
use crate::error::Result;
use crate::handles::Engine;
use crate::handover::{CarrierNegotiator, CarrierType};

/// Builder for configuring and starting an [`Engine`].
///
/// Created via [`configure()`](crate::configure).
#[derive(Debug, Clone, Default)]
#[must_use]
pub struct EngineBuilder {
    config: EngineConfig,
}

impl EngineBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing configuration.
    pub fn from_config(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Local LLCP link parameters pushed to the controller at startup.
    ///
    /// An MIU below 128 is raised to 128.
    ///
    /// Default: MIU 128, WKS 0x0001, LTO 10, option 0
    pub fn link(mut self, link: LinkConfig) -> Self {
        self.config.link = LinkConfig {
            miu: clamp_miu(link.miu, "link.miu"),
            ..link
        };
        self
    }

    /// Socket options used by the built-in servers.
    ///
    /// Default: MIU 128, RW 1
    pub fn socket_option(mut self, option: SocketOption) -> Self {
        self.config.socket_option = SocketOption {
            miu: clamp_miu(option.miu, "socket_option.miu"),
            ..option
        };
        self
    }

    /// Largest SNEP information field, capped at 10 KiB.
    ///
    /// Default: 10240
    pub fn snep_max_message(mut self, len: usize) -> Self {
        self.config.snep_max_message = clamp_snep_max(len);
        self
    }

    /// Presence check interval in milliseconds, 0 disables.
    ///
    /// Default: 500 ms
    pub fn presence_check_interval(mut self, interval_ms: u64) -> Self {
        self.config.presence_check_interval = interval_ms;
        self
    }

    /// Start the default SNEP server on every link.
    ///
    /// Default: true
    pub fn auto_start_snep(mut self, enabled: bool) -> Self {
        self.config.auto_start_snep = enabled;
        self
    }

    /// Start the Connection Handover selector on every link.
    ///
    /// Default: true
    pub fn auto_start_handover(mut self, enabled: bool) -> Self {
        self.config.auto_start_handover = enabled;
        self
    }

    /// Start the PHDC manager on every link.
    ///
    /// Default: false
    pub fn auto_start_phdc(mut self, enabled: bool) -> Self {
        self.config.auto_start_phdc = enabled;
        self
    }

    /// Selector carrier preference, most preferred first.
    ///
    /// Default: Bluetooth, Wi-Fi BSS, Wi-Fi P2P
    pub fn carrier_priority(mut self, priority: Vec<CarrierType>) -> Self {
        self.config.carrier_priority = priority;
        self
    }

    /// Offer a local carrier during handover.
    pub fn carrier(mut self, carrier: Arc<dyn CarrierNegotiator>) -> Self {
        self.config.carriers.push(carrier);
        self
    }

    /// Start the engine on `controller`.
    ///
    /// Must be called from within a tokio runtime; service protocol loops
    /// are spawned on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid, the worker thread
    /// cannot be spawned, or the controller rejects the link parameters.
    pub async fn start(self, controller: impl Controller) -> Result<Engine> {
        Engine::start(self.config, Box::new(controller)).await
    }
}
