//! # Handle Types
//!
//! The **user-facing API** of the engine. Handles never touch engine state
//! themselves; they queue work on the controller worker and await its
//! completion.
//!
//! | Handle | Role |
//! |--------|------|
//! | [`Engine`] | Lifecycle, events, service registry, SNEP and handover entry points |
//! | [`Socket`] | One LLCP socket: listen/connect/accept/send/receive/close |
//!
//! ## Socket Pattern
//!
//! ```no_run
//! use nfc_p2p::prelude::*;
//!
//! # async fn example(engine: &Engine) -> Result<()> {
//! // Server side
//! let listener = engine.create_socket(SocketOption::default())?;
//! listener.listen(None, Some("urn:nfc:sn:echo")).await?;
//! let conn = listener.accept().await?;
//! let frame = conn.receive().await?;
//! conn.send(frame).await?;
//! # Ok(())
//! # }
//! ```

mod engine;
mod socket;

pub use engine::{Engine, LinkInfo};
pub use socket::Socket;
