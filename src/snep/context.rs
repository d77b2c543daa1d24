//! One end of a SNEP connection.
//!
//! A context moves whole messages over a connected [`Socket`]: outgoing
//! messages are cut into MIU-sized frames and only continue past the first
//! frame once the peer answers CONTINUE, incoming messages are reassembled
//! until the declared length is reached. Only one message is in flight per
//! context; callers await each step before issuing the next.

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::fragment::{split, Assembly, Reassembler};
use super::wire::{encode, Header, RequestCode, ResponseCode, VERSION_MAJOR};
use crate::error::{Error, ProtocolError, Result};
use crate::handles::Socket;

/// Which side of the exchange this context is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Role {
    /// Sends requests, receives responses
    Client,
    /// Receives requests, sends responses
    Server,
}

impl Role {
    /// CONTINUE this side sends to let the peer go on.
    fn continue_code(self) -> u8 {
        match self {
            Self::Client => RequestCode::Continue as u8,
            Self::Server => ResponseCode::Continue as u8,
        }
    }

    /// CONTINUE this side expects from the peer.
    fn peer_continue_code(self) -> u8 {
        match self {
            Self::Client => ResponseCode::Continue as u8,
            Self::Server => RequestCode::Continue as u8,
        }
    }
}

pub(crate) struct SnepContext {
    socket: Socket,
    role: Role,
    max_information: usize,
}

impl SnepContext {
    pub(crate) fn new(socket: Socket, role: Role, max_information: usize) -> Self {
        Self {
            socket,
            role,
            max_information,
        }
    }

    pub(crate) fn socket(&self) -> &Socket {
        &self.socket
    }

    /// Send one message with flow-controlled fragmentation.
    ///
    /// Fails with `ExcessData` without sending anything when `information`
    /// is larger than the configured maximum.
    pub(crate) async fn send(&self, code: u8, information: &[u8]) -> Result<()> {
        if information.len() > self.max_information {
            return Err(ProtocolError::ExcessData.into());
        }
        let message = encode(code, information);
        let miu = usize::from(self.socket.miu());
        let mut frames = split(&message, miu).into_iter();
        let Some(first) = frames.next() else {
            return Ok(());
        };
        trace!(
            "SNEP {:?} sending 0x{:02X}, {} bytes in {} frame(s)",
            self.role,
            code,
            message.len(),
            frames.len() + 1
        );
        self.socket.send(first).await?;
        if frames.as_slice().is_empty() {
            return Ok(());
        }

        self.await_continue().await?;
        for frame in frames {
            self.socket.send(frame).await?;
        }
        Ok(())
    }

    async fn await_continue(&self) -> Result<()> {
        let frame = self.socket.receive().await?;
        let header = Header::parse(&mut &frame[..]).ok_or(ProtocolError::InvalidFormat)?;
        if header.major() != VERSION_MAJOR {
            return Err(ProtocolError::UnsupportedVersion.into());
        }
        if header.code == self.role.peer_continue_code() {
            return Ok(());
        }
        debug!("SNEP {:?} peer refused continuation: 0x{:02X}", self.role, header.code);
        let error = match self.role {
            Role::Client => ResponseCode::from_u8(header.code).and_then(ResponseCode::error),
            Role::Server if header.code == RequestCode::Reject as u8 => Some(ProtocolError::Rejected),
            Role::Server => None,
        };
        Err(error
            .unwrap_or(ProtocolError::UnexpectedResponse(header.code))
            .into())
    }

    /// Receive one message, answering CONTINUE once the first fragment shows
    /// more data is coming.
    ///
    /// A message with an unsupported version or an oversized length is
    /// refused towards the peer and fails locally with the matching error.
    pub(crate) async fn receive(&self) -> Result<(Header, Bytes)> {
        let mut reassembler = Reassembler::new(self.max_information);
        let mut continued = false;
        loop {
            let frame = self.socket.receive().await?;
            match reassembler.push(&frame) {
                Ok(Assembly::Complete {
                    header,
                    information,
                }) => {
                    trace!(
                        "SNEP {:?} received 0x{:02X}, {} bytes",
                        self.role,
                        header.code,
                        information.len()
                    );
                    return Ok((header, information));
                }
                Ok(Assembly::Pending) => {
                    if !continued && reassembler.missing().is_some_and(|n| n > 0) {
                        continued = true;
                        self.socket
                            .send(encode(self.role.continue_code(), &[]))
                            .await?;
                    }
                }
                Err(Error::Protocol(e)) => {
                    warn!("SNEP {:?} refusing message: {}", self.role, e);
                    self.refuse(e).await?;
                    return Err(e.into());
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn refuse(&self, error: ProtocolError) -> Result<()> {
        let code = match (self.role, error) {
            (Role::Client, _) => RequestCode::Reject as u8,
            (Role::Server, ProtocolError::ExcessData) => ResponseCode::Reject as u8,
            (Role::Server, e) => ResponseCode::for_error(e) as u8,
        };
        self.socket.send(encode(code, &[])).await
    }
}
