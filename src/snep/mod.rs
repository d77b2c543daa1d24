//! # SNEP Engine
//!
//! Simple NDEF Exchange Protocol over connection-oriented LLCP sockets.
//!
//! | Piece | Role |
//! |-------|------|
//! | [`wire`] | Header codec, request and response codes |
//! | [`fragment`] | MIU splitting and reassembly |
//! | [`SnepClient`] | FIFO request queue on one connection |
//! | [`SnepServer`] | Default server: PUT delivery, GET through [`GetResponder`]s |
//!
//! Messages larger than one frame are flow controlled: after the first
//! fragment the sender waits for CONTINUE from the receiver. A message over
//! the configured maximum is refused locally with `ExcessData` when sending
//! and answered with REJECT when receiving.

mod client;
pub(crate) mod context;
pub mod fragment;
mod server;
pub mod wire;

pub use client::SnepClient;
pub use server::{GetResponder, SnepServer};
pub use wire::{RequestCode, ResponseCode};
