//! LLCP socket handle.

use std::fmt;

use bytes::Bytes;

use crate::config::{SocketOption, LLCP_MIN_MIU};
use crate::controller::ConnectTarget;
use crate::error::{Error, Result};
use crate::runtime::EngineRef;
use crate::{Sap, SocketId};

/// A logical LLCP socket.
///
/// Every operation is queued on the controller worker and completes
/// asynchronously; completions on one socket arrive in submission order.
/// Parameter mistakes (an empty frame, a frame larger than [`miu`](Self::miu))
/// are rejected before anything is queued.
///
/// Dropping the handle closes the socket.
///
/// # Example
///
/// ```no_run
/// use nfc_p2p::prelude::*;
///
/// # async fn example(engine: &Engine) -> Result<()> {
/// let socket = engine.create_socket(SocketOption::default())?;
/// socket.connect(nfc_p2p::san::SNEP).await?;
/// socket.send(&b"\x10\x02\x00\x00\x00\x00"[..]).await?;
/// let reply = socket.receive().await?;
/// socket.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct Socket {
    id: SocketId,
    option: SocketOption,
    engine: EngineRef,
    released: bool,
}

impl Socket {
    pub(crate) fn new(id: SocketId, option: SocketOption, engine: EngineRef) -> Self {
        Self {
            id,
            option,
            engine,
            released: false,
        }
    }

    /// Validate `option` and queue creation of a new socket.
    pub(crate) fn create(engine: &EngineRef, option: SocketOption) -> Result<Self> {
        if option.miu < LLCP_MIN_MIU {
            return Err(Error::InvalidParam("socket MIU below LLCP minimum"));
        }
        if option.rw > 15 {
            return Err(Error::InvalidParam("receive window above 15"));
        }
        let id = engine.shared.allocate_socket_id();
        engine
            .queue
            .try_submit(move |core| core.create_socket(id, option))?;
        Ok(Self::new(id, option, engine.clone()))
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn option(&self) -> SocketOption {
        self.option
    }

    /// Largest frame that can be sent: the socket MIU capped by the link MIU.
    pub fn miu(&self) -> u16 {
        match self.engine.shared.link_miu() {
            Some(link) => link.min(self.option.miu),
            None => self.option.miu,
        }
    }

    fn check_frame(&self, data: &Bytes) -> Result<()> {
        if data.is_empty() {
            return Err(Error::InvalidParam("empty frame"));
        }
        if data.len() > usize::from(self.miu()) {
            return Err(Error::InvalidParam("frame exceeds MIU"));
        }
        Ok(())
    }

    /// Bind to `sap` (or a dynamic SAP) and, for connection-oriented
    /// sockets, start accepting connections. Returns the bound SAP.
    pub async fn listen(&self, sap: Option<Sap>, san: Option<&str>) -> Result<Sap> {
        let id = self.id;
        let san = san.map(str::to_owned);
        self.engine
            .call(move |core, reply| core.listen(id, sap, san, reply))
            .await
    }

    /// Connect to a remote SAP or service name.
    pub async fn connect(&self, target: impl Into<ConnectTarget>) -> Result<()> {
        let id = self.id;
        let target = target.into();
        self.engine
            .call(move |core, reply| core.connect(id, target, reply))
            .await
    }

    /// Wait for the next incoming connection on a listening socket.
    pub async fn accept(&self) -> Result<Socket> {
        let id = self.id;
        self.engine
            .call(move |core, reply| core.accept(id, reply))
            .await
    }

    /// Send one frame on a connected socket.
    pub async fn send(&self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        self.check_frame(&data)?;
        let id = self.id;
        self.engine
            .call(move |core, reply| core.send(id, data, reply))
            .await
    }

    /// Send one frame to `sap` on a connectionless socket.
    pub async fn send_to(&self, sap: Sap, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        self.check_frame(&data)?;
        let id = self.id;
        self.engine
            .call(move |core, reply| core.send_to(id, sap, data, reply))
            .await
    }

    /// Receive one frame on a connected socket.
    pub async fn receive(&self) -> Result<Bytes> {
        let id = self.id;
        self.engine
            .call(move |core, reply| core.receive(id, reply))
            .await
    }

    /// Receive one frame and its source SAP on a bound connectionless socket.
    pub async fn receive_from(&self) -> Result<(Sap, Bytes)> {
        let id = self.id;
        self.engine
            .call(move |core, reply| core.receive_from(id, reply))
            .await
    }

    /// Tear down the data link connection, keeping the socket.
    pub async fn disconnect(&self) -> Result<()> {
        let id = self.id;
        self.engine
            .call(move |core, reply| core.disconnect(id, reply))
            .await
    }

    /// Close the socket, failing anything still pending on it.
    pub async fn close(mut self) -> Result<()> {
        self.released = true;
        let id = self.id;
        self.engine
            .call(move |core, reply| {
                core.close_socket(id);
                let _ = reply.send(Ok(()));
            })
            .await
    }

    /// Blocking [`send`](Self::send) for threads outside the async runtime.
    pub fn send_blocking(&self, data: impl Into<Bytes>) -> Result<()> {
        let data = data.into();
        self.check_frame(&data)?;
        let id = self.id;
        self.engine
            .call_blocking(move |core, reply| core.send(id, data, reply))
    }

    /// Blocking [`receive`](Self::receive) for threads outside the async
    /// runtime.
    pub fn receive_blocking(&self) -> Result<Bytes> {
        let id = self.id;
        self.engine
            .call_blocking(move |core, reply| core.receive(id, reply))
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        if !self.released {
            let id = self.id;
            self.engine.queue.submit(move |core| {
                core.close_socket(id);
            });
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("kind", &self.option.kind)
            .field("miu", &self.option.miu)
            .finish()
    }
}
