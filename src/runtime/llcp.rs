//! LLCP link and socket records.
//!
//! A socket's pending operations are FIFOs of reply channels. The controller
//! completes operations of one kind in issue order, so the front of each FIFO
//! is always the operation a completion belongs to.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::debug;

use super::Reply;
use crate::config::{LinkConfig, SocketOption};
use crate::error::{Error, Result, SocketError};
use crate::handles::Socket;
use crate::{Sap, SocketId};

/// The active peer connection.
#[derive(Debug, Clone, Copy)]
pub struct LlcpLink {
    pub local: LinkConfig,
    pub remote: LinkConfig,
}

impl LlcpLink {
    /// MIU both sides can handle.
    pub fn miu(&self) -> u16 {
        self.local.effective_miu(&self.remote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Idle,
    Listening,
    Connecting,
    Connected,
    Closed,
    Error,
}

#[derive(Debug)]
pub struct LlcpSocket {
    pub id: SocketId,
    pub option: SocketOption,
    pub state: SocketState,
    pub sap: Option<Sap>,
    pub san: Option<String>,
    pub remote_sap: Option<Sap>,
    /// Listener an incoming connection arrived on, until it is handed out.
    pub parent: Option<SocketId>,
    error: Option<Error>,
    connect: Option<Reply<()>>,
    sends: VecDeque<Reply<()>>,
    receives: VecDeque<Reply<Bytes>>,
    receives_from: VecDeque<Reply<(Sap, Bytes)>>,
    disconnects: Vec<Reply<()>>,
    accepts: VecDeque<Reply<Socket>>,
    /// Connected sockets waiting for `accept`
    pub backlog: VecDeque<SocketId>,
}

impl LlcpSocket {
    pub fn new(id: SocketId, option: SocketOption) -> Self {
        Self {
            id,
            option,
            state: SocketState::Idle,
            sap: None,
            san: None,
            remote_sap: None,
            parent: None,
            error: None,
            connect: None,
            sends: VecDeque::new(),
            receives: VecDeque::new(),
            receives_from: VecDeque::new(),
            disconnects: Vec::new(),
            accepts: VecDeque::new(),
            backlog: VecDeque::new(),
        }
    }

    /// A socket that failed before reaching the controller.
    pub fn failed(id: SocketId, option: SocketOption, error: Error) -> Self {
        let mut socket = Self::new(id, option);
        socket.state = SocketState::Error;
        socket.error = Some(error);
        socket
    }

    /// Gate an operation on the current state.
    pub fn check(&self, allowed: &[SocketState]) -> Result<()> {
        if let Some(error) = &self.error {
            return Err(error.clone());
        }
        if self.state == SocketState::Closed {
            return Err(Error::Socket(SocketError::Disconnected));
        }
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(Error::InvalidParam("operation not valid in socket state"))
        }
    }

    pub fn push_connect(&mut self, reply: Reply<()>) {
        self.connect = Some(reply);
    }

    pub fn push_send(&mut self, reply: Reply<()>) {
        self.sends.push_back(reply);
    }

    pub fn push_receive(&mut self, reply: Reply<Bytes>) {
        self.receives.push_back(reply);
    }

    pub fn push_receive_from(&mut self, reply: Reply<(Sap, Bytes)>) {
        self.receives_from.push_back(reply);
    }

    pub fn push_disconnect(&mut self, reply: Reply<()>) {
        self.disconnects.push(reply);
    }

    pub fn push_accept(&mut self, reply: Reply<Socket>) {
        self.accepts.push_back(reply);
    }

    pub fn pop_accept(&mut self) -> Option<Reply<Socket>> {
        // Skip callers that gave up waiting
        while let Some(reply) = self.accepts.pop_front() {
            if !reply.is_closed() {
                return Some(reply);
            }
        }
        None
    }

    pub fn complete_connect(&mut self, result: std::result::Result<(), SocketError>) {
        match result {
            Ok(()) => self.state = SocketState::Connected,
            Err(e) => {
                self.state = SocketState::Error;
                self.error = Some(Error::Socket(e));
            }
        }
        if let Some(reply) = self.connect.take() {
            let _ = reply.send(result.map_err(Error::Socket));
        }
    }

    pub fn complete_send(&mut self, result: std::result::Result<(), SocketError>) {
        if let Some(reply) = self.sends.pop_front() {
            let _ = reply.send(result.map_err(Error::Socket));
        }
    }

    pub fn complete_receive(&mut self, result: std::result::Result<Bytes, SocketError>) {
        if let Some(reply) = self.receives.pop_front() {
            let _ = reply.send(result.map_err(Error::Socket));
        }
    }

    pub fn complete_receive_from(&mut self, result: std::result::Result<(Sap, Bytes), SocketError>) {
        if let Some(reply) = self.receives_from.pop_front() {
            let _ = reply.send(result.map_err(Error::Socket));
        }
    }

    /// The data link connection is gone.
    ///
    /// Outstanding I/O fails with `Disconnected`; disconnect requests succeed.
    pub fn disconnected(&mut self) {
        if self.state == SocketState::Error {
            return;
        }
        self.state = SocketState::Closed;
        self.fail_pending(&Error::Socket(SocketError::Disconnected));
        for reply in self.disconnects.drain(..) {
            let _ = reply.send(Ok(()));
        }
    }

    /// Record a terminal error and fail everything pending with it.
    ///
    /// Returns false if the socket had already failed; an error is only
    /// delivered once.
    pub fn fail(&mut self, error: Error) -> bool {
        if self.error.is_some() {
            return false;
        }
        debug!("socket {} failed: {}", self.id, error);
        self.state = SocketState::Error;
        self.fail_pending(&error);
        for reply in self.disconnects.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        self.error = Some(error);
        true
    }

    fn fail_pending(&mut self, error: &Error) {
        if let Some(reply) = self.connect.take() {
            let _ = reply.send(Err(error.clone()));
        }
        for reply in self.sends.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        for reply in self.receives.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        for reply in self.receives_from.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
        for reply in self.accepts.drain(..) {
            let _ = reply.send(Err(error.clone()));
        }
    }

    /// Number of operations still waiting for a completion.
    #[cfg(test)]
    pub fn pending(&self) -> usize {
        usize::from(self.connect.is_some())
            + self.sends.len()
            + self.receives.len()
            + self.receives_from.len()
            + self.disconnects.len()
            + self.accepts.len()
    }
}
