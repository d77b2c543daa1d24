//! SNEP client with a FIFO job queue.

use std::fmt;
use std::future::Future;

use bytes::Bytes;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::context::{Role, SnepContext};
use super::wire::{get_information, RequestCode, ResponseCode};
use crate::controller::ConnectTarget;
use crate::error::{Error, ProtocolError, Result};
use crate::handles::Socket;
use crate::runtime::EngineRef;
use crate::SocketId;

struct Job {
    code: RequestCode,
    information: Bytes,
    reply: oneshot::Sender<Result<Bytes>>,
}

/// A SNEP client bound to one connection.
///
/// Requests are queued and run one at a time in the order they were issued,
/// so concurrent callers on a cloned client never interleave on the wire.
/// Every request completes exactly once.
///
/// If the connection fails (socket error, link loss), the request in
/// flight, every queued request and every later request fail with that
/// same error.
///
/// ```no_run
/// use nfc_p2p::prelude::*;
/// use nfc_p2p::ndef::{Message, Record};
///
/// # async fn example(engine: &Engine) -> Result<()> {
/// let client = engine.snep_client().await?;
/// let ndef = Message::from(Record::uri("https://nfc-forum.org")).to_bytes();
/// client.put(ndef).await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct SnepClient {
    jobs: mpsc::UnboundedSender<Job>,
    socket: SocketId,
    max_information: usize,
}

impl SnepClient {
    /// Connect to `target` and start the job loop.
    pub(crate) async fn connect(engine: &EngineRef, target: ConnectTarget) -> Result<Self> {
        let socket = Socket::create(engine, engine.shared.config.socket_option)?;
        socket.connect(target.clone()).await?;
        debug!("SNEP client {} connected to {}", socket.id(), target);
        Ok(Self::start(
            socket,
            engine.shared.config.snep_max_message,
            &engine.shared.runtime,
        ))
    }

    pub(crate) fn start(socket: Socket, max_information: usize, runtime: &Handle) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = socket.id();
        let context = SnepContext::new(socket, Role::Client, max_information);
        runtime.spawn(run(context, rx));
        Self {
            jobs: tx,
            socket: id,
            max_information,
        }
    }

    /// Socket carrying this client's connection.
    pub fn socket_id(&self) -> SocketId {
        self.socket
    }

    /// Largest request or response information field.
    pub fn max_information(&self) -> usize {
        self.max_information
    }

    /// Queue a request and return its response information field.
    ///
    /// The request joins the queue when this method is called, not when the
    /// returned future is first polled.
    pub fn request(
        &self,
        code: RequestCode,
        information: impl Into<Bytes>,
    ) -> impl Future<Output = Result<Bytes>> + Send + 'static {
        let rx = self.enqueue(code, information.into());
        async move { rx.await.map_err(|_| Error::Shutdown)? }
    }

    /// Blocking [`request`](Self::request) for threads outside the async
    /// runtime.
    pub fn request_blocking(&self, code: RequestCode, information: impl Into<Bytes>) -> Result<Bytes> {
        self.enqueue(code, information.into())
            .blocking_recv()
            .map_err(|_| Error::Shutdown)?
    }

    /// PUT an NDEF message.
    pub fn put(&self, ndef: impl Into<Bytes>) -> impl Future<Output = Result<Bytes>> + Send + 'static {
        self.request(RequestCode::Put, ndef)
    }

    /// GET with `ndef` as the request message. The peer may answer with up
    /// to `acceptable_length` bytes, capped at [`max_information`](Self::max_information).
    pub fn get(
        &self,
        ndef: &[u8],
        acceptable_length: u32,
    ) -> impl Future<Output = Result<Bytes>> + Send + 'static {
        let limit = u32::try_from(self.max_information).unwrap_or(u32::MAX);
        self.request(RequestCode::Get, get_information(acceptable_length.min(limit), ndef))
    }

    fn enqueue(&self, code: RequestCode, information: Bytes) -> oneshot::Receiver<Result<Bytes>> {
        let (reply, rx) = oneshot::channel();
        if !matches!(code, RequestCode::Get | RequestCode::Put) {
            let _ = reply.send(Err(Error::InvalidParam("only GET and PUT can be requested")));
            return rx;
        }
        let job = Job {
            code,
            information,
            reply,
        };
        if let Err(mpsc::error::SendError(job)) = self.jobs.send(job) {
            let _ = job.reply.send(Err(Error::Shutdown));
        }
        rx
    }
}

impl fmt::Debug for SnepClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SnepClient")
            .field("socket", &self.socket)
            .field("max_information", &self.max_information)
            .finish()
    }
}

/// Job loop. Owns the connection until every client handle is gone.
async fn run(context: SnepContext, mut jobs: mpsc::UnboundedReceiver<Job>) {
    let id = context.socket().id();
    let mut failure: Option<Error> = None;
    while let Some(job) = jobs.recv().await {
        if let Some(error) = &failure {
            let _ = job.reply.send(Err(error.clone()));
            continue;
        }
        let result = transact(&context, job.code, &job.information).await;
        if let Err(e) = &result {
            if !matches!(e, Error::Protocol(_)) {
                warn!("SNEP client {} failed: {}", id, e);
                failure = Some(e.clone());
            }
        }
        let _ = job.reply.send(result);
    }
    debug!("SNEP client {} released", id);
}

async fn transact(context: &SnepContext, code: RequestCode, information: &[u8]) -> Result<Bytes> {
    context.send(code as u8, information).await?;
    let (header, response) = context.receive().await?;
    match ResponseCode::from_u8(header.code) {
        Some(ResponseCode::Success) => Ok(response),
        Some(code) => Err(code
            .error()
            .unwrap_or(ProtocolError::UnexpectedResponse(header.code))
            .into()),
        None => Err(ProtocolError::UnexpectedResponse(header.code).into()),
    }
}
