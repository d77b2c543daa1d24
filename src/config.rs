//! # Engine Configuration
//!
//! This module provides configuration types for the peer-to-peer engine.
//!
//! ## Quick Start
//!
//! For most daemons, the defaults work out of the box:
//!
//! ```no_run
//! use nfc_p2p::controller::LoopbackController;
//!
//! # async fn example() -> nfc_p2p::Result<()> {
//! let (controller, _peer, _medium) = LoopbackController::pair();
//! let engine = nfc_p2p::configure().start(controller).await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Builder Pattern
//!
//! ```
//! use nfc_p2p::config::{EngineConfig, LinkConfig};
//! use nfc_p2p::handover::CarrierType;
//!
//! let config = EngineConfig::builder()
//!     .link(LinkConfig { miu: 248, ..LinkConfig::default() })
//!     .snep_max_message(4096)
//!     .presence_check_interval(0) // disable polling
//!     .carrier_priority(vec![CarrierType::WifiBss, CarrierType::Bluetooth])
//!     .build();
//! assert_eq!(config.link.miu, 248);
//! ```
//!
//! ## Configuration Options Reference
//!
//! | Option | Default | Description |
//! |--------|---------|-------------|
//! | `link` | MIU 128, WKS 0x0001, LTO 10, option 0 | Local LLCP link parameters |
//! | `socket_option` | MIU 128, RW 1 | Default per-socket options |
//! | `snep_max_message` | 10240 | Largest SNEP information field accepted or sent |
//! | `presence_check_interval` | 500 ms | Link presence polling, 0 disables |
//! | `auto_start_snep` | true | Start the default SNEP server on every link |
//! | `auto_start_handover` | true | Start the Connection Handover selector on every link |
//! | `auto_start_phdc` | false | Start the PHDC manager on every link |
//! | `carrier_priority` | Bluetooth, Wi-Fi BSS, Wi-Fi P2P | Selector carrier preference |
//! | `carriers` | none | Local carriers offered during handover |

use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::handover::{CarrierNegotiator, CarrierType};

/// Smallest MIU an LLCP link may announce (LLCP 1.1, section 5.2.2).
pub const LLCP_MIN_MIU: u16 = 128;

/// Default local link MIU.
pub const DEFAULT_MIU: u16 = 128;

/// Default well-known service bitmask (only the SDP bit set).
pub const DEFAULT_WKS: u16 = 0x0001;

/// Default link timeout, in 10 ms units.
pub const DEFAULT_LTO: u8 = 10;

/// Default link option byte.
pub const DEFAULT_OPTION: u8 = 0;

/// Default receive window of a connection-oriented socket.
pub const DEFAULT_RW: u8 = 1;

/// Default SNEP information-field limit (10 KiB).
pub const DEFAULT_SNEP_MAX_MESSAGE: usize = 10 * 1024;

/// Default presence-check period in milliseconds.
pub const DEFAULT_PRESENCE_CHECK_INTERVAL: u64 = 500;

/// LLCP link parameters exchanged in the PAX/ATR general bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkConfig {
    /// Maximum information unit in bytes
    pub miu: u16,
    /// Well-known service list bitmask
    pub wks: u16,
    /// Link timeout in 10 ms units
    pub lto: u8,
    /// Link service class / option byte
    pub option: u8,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            miu: DEFAULT_MIU,
            wks: DEFAULT_WKS,
            lto: DEFAULT_LTO,
            option: DEFAULT_OPTION,
        }
    }
}

impl LinkConfig {
    /// MIU actually usable on the link: the smaller of both sides.
    pub fn effective_miu(&self, remote: &LinkConfig) -> u16 {
        self.miu.min(remote.miu)
    }
}

/// LLCP socket flavour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SocketType {
    /// Data link connection with sequencing and flow control.
    #[default]
    ConnectionOriented,
    /// Unnumbered information PDUs addressed per frame.
    Connectionless,
}

/// Per-socket options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SocketOption {
    /// Largest frame this socket accepts
    pub miu: u16,
    /// Receive window
    pub rw: u8,
    /// Socket flavour
    pub kind: SocketType,
}

impl Default for SocketOption {
    fn default() -> Self {
        Self {
            miu: DEFAULT_MIU,
            rw: DEFAULT_RW,
            kind: SocketType::ConnectionOriented,
        }
    }
}

impl SocketOption {
    /// Connectionless socket with default MIU.
    pub fn connectionless() -> Self {
        Self {
            kind: SocketType::Connectionless,
            ..Self::default()
        }
    }
}

/// Engine configuration
#[derive(Clone)]
pub struct EngineConfig {
    /// Local LLCP link parameters pushed to the controller before activation
    pub link: LinkConfig,
    /// Default options for sockets created by the built-in services
    pub socket_option: SocketOption,
    /// Largest SNEP information field sent or accepted (default: 10 KiB)
    pub snep_max_message: usize,
    /// Presence check interval in ms (default: 500, 0 disables)
    pub presence_check_interval: u64,
    /// Start the default SNEP server on every link (default: true)
    pub auto_start_snep: bool,
    /// Start the Connection Handover selector on every link (default: true)
    pub auto_start_handover: bool,
    /// Start the PHDC manager on every link (default: false)
    pub auto_start_phdc: bool,
    /// Selector carrier preference, most preferred first
    pub carrier_priority: Vec<CarrierType>,
    /// Carriers this device can offer during handover
    pub carriers: Vec<Arc<dyn CarrierNegotiator>>,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("link", &self.link)
            .field("socket_option", &self.socket_option)
            .field("snep_max_message", &self.snep_max_message)
            .field("presence_check_interval", &self.presence_check_interval)
            .field("auto_start_snep", &self.auto_start_snep)
            .field("auto_start_handover", &self.auto_start_handover)
            .field("auto_start_phdc", &self.auto_start_phdc)
            .field("carrier_priority", &self.carrier_priority)
            .field(
                "carriers",
                &self.carriers.iter().map(|c| c.carrier()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            socket_option: SocketOption::default(),
            snep_max_message: DEFAULT_SNEP_MAX_MESSAGE,
            presence_check_interval: DEFAULT_PRESENCE_CHECK_INTERVAL,
            auto_start_snep: true,
            auto_start_handover: true,
            auto_start_phdc: false,
            carrier_priority: CarrierType::DEFAULT_PRIORITY.to_vec(),
            carriers: Vec::new(),
        }
    }
}

impl EngineConfig {
    /// Create a builder for `EngineConfig`.
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }

    /// Check invariants the builder cannot enforce on its own.
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.snep_max_message == 0 {
            return Err(crate::Error::Config(crate::ConfigError::new(
                "snep_max_message must be non-zero",
            )));
        }
        if self.carrier_priority.is_empty() && !self.carriers.is_empty() {
            return Err(crate::Error::Config(crate::ConfigError::new(
                "carrier_priority is empty but carriers are configured",
            )));
        }
        Ok(())
    }
}

/// Raise an MIU to the LLCP minimum, logging a warning if it was too small.
pub(crate) fn clamp_miu(miu: u16, field_name: &str) -> u16 {
    if miu < LLCP_MIN_MIU {
        warn!(
            "{} value {} is below the LLCP minimum ({}), clamping",
            field_name, miu, LLCP_MIN_MIU
        );
        LLCP_MIN_MIU
    } else {
        miu
    }
}

/// Cap the SNEP message limit at the default, logging a warning if it was larger.
pub(crate) fn clamp_snep_max(len: usize) -> usize {
    if len > DEFAULT_SNEP_MAX_MESSAGE {
        warn!(
            "snep_max_message value {} exceeds the supported maximum ({}), clamping",
            len, DEFAULT_SNEP_MAX_MESSAGE
        );
        DEFAULT_SNEP_MAX_MESSAGE
    } else {
        len
    }
}

/// Builder for `EngineConfig`
#[derive(Default)]
#[must_use]
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    /// Local LLCP link parameters.
    ///
    /// The MIU is raised to 128 if smaller; LLCP does not allow less.
    pub fn link(mut self, link: LinkConfig) -> Self {
        self.config.link = LinkConfig {
            miu: clamp_miu(link.miu, "link.miu"),
            ..link
        };
        self
    }

    /// Default socket options for the built-in services.
    pub fn socket_option(mut self, option: SocketOption) -> Self {
        self.config.socket_option = SocketOption {
            miu: clamp_miu(option.miu, "socket_option.miu"),
            ..option
        };
        self
    }

    /// Largest SNEP information field, capped at 10 KiB.
    pub fn snep_max_message(mut self, len: usize) -> Self {
        self.config.snep_max_message = clamp_snep_max(len);
        self
    }

    /// Presence check interval in milliseconds. Zero disables polling; link
    /// loss is then only noticed through controller events.
    pub fn presence_check_interval(mut self, interval_ms: u64) -> Self {
        self.config.presence_check_interval = interval_ms;
        self
    }

    /// Start the default SNEP server on every link.
    pub fn auto_start_snep(mut self, enabled: bool) -> Self {
        self.config.auto_start_snep = enabled;
        self
    }

    /// Start the Connection Handover selector on every link.
    pub fn auto_start_handover(mut self, enabled: bool) -> Self {
        self.config.auto_start_handover = enabled;
        self
    }

    /// Start the PHDC manager on every link.
    pub fn auto_start_phdc(mut self, enabled: bool) -> Self {
        self.config.auto_start_phdc = enabled;
        self
    }

    /// Carrier preference used by the selector, most preferred first.
    pub fn carrier_priority(mut self, priority: Vec<CarrierType>) -> Self {
        self.config.carrier_priority = priority;
        self
    }

    /// Add a local carrier offered during handover.
    pub fn carrier(mut self, carrier: Arc<dyn CarrierNegotiator>) -> Self {
        self.config.carriers.push(carrier);
        self
    }

    pub fn build(self) -> EngineConfig {
        self.config
    }
}
