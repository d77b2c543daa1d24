//! Default SNEP server.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::context::{Role, SnepContext};
use super::wire::{parse_get_information, RequestCode, ResponseCode};
use crate::error::{Error, ProtocolError};
use crate::ndef::Message;
use crate::runtime::{Activation, EngineEvent, EventEmitter, Service};
use crate::Sap;

/// Answers SNEP GET requests.
///
/// Responders are asked in registration order and the first one returning
/// `Some` answers the request.
pub trait GetResponder: Send + Sync + 'static {
    /// Produce a response to `request`. `acceptable_length` is the largest
    /// response the client will take.
    fn respond(&self, request: &Message, acceptable_length: usize) -> Option<Bytes>;
}

impl<F> GetResponder for F
where
    F: Fn(&Message, usize) -> Option<Bytes> + Send + Sync + 'static,
{
    fn respond(&self, request: &Message, acceptable_length: usize) -> Option<Bytes> {
        self(request, acceptable_length)
    }
}

/// Server loop steps, logged at debug level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    ReceiveRequest,
    AnswerGet,
    AnswerPut,
    SendResponse(ResponseCode),
}

/// The SNEP default server.
///
/// PUT messages are validated as NDEF and published as
/// [`EngineEvent::NdefReceived`]. GET requests go to the registered
/// [`GetResponder`]s; without a match the answer is NOT_FOUND.
#[derive(Clone)]
pub struct SnepServer {
    max_information: usize,
    responders: Arc<Mutex<Vec<Arc<dyn GetResponder>>>>,
}

impl SnepServer {
    pub fn new(max_information: usize) -> Self {
        Self {
            max_information,
            responders: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn add_responder(&self, responder: Arc<dyn GetResponder>) {
        self.responders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(responder);
    }

    fn responders(&self) -> Vec<Arc<dyn GetResponder>> {
        self.responders
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn answer_get(&self, information: Bytes) -> Result<Bytes, ProtocolError> {
        let (acceptable, ndef) = parse_get_information(information).ok_or(ProtocolError::BadRequest)?;
        let request = Message::parse(&ndef).map_err(|_| ProtocolError::BadRequest)?;
        let acceptable = (acceptable as usize).min(self.max_information);
        let response = self
            .responders()
            .iter()
            .find_map(|r| r.respond(&request, acceptable))
            .ok_or(ProtocolError::NotFound)?;
        if response.len() > acceptable {
            return Err(ProtocolError::ExcessData);
        }
        Ok(response)
    }

    fn answer_put(information: Bytes, sap: Sap, events: &EventEmitter) -> Result<Bytes, ProtocolError> {
        if Message::parse(&information).is_err() {
            return Err(ProtocolError::BadRequest);
        }
        info!("SNEP PUT of {} bytes on SAP {}", information.len(), sap);
        events.emit(EngineEvent::NdefReceived {
            sap,
            message: information,
        });
        Ok(Bytes::new())
    }

    async fn serve(self, context: SnepContext, sap: Sap, events: EventEmitter) {
        let id = context.socket().id();
        loop {
            debug!("SNEP server {}: {:?}", id, Step::ReceiveRequest);
            let (header, information) = match context.receive().await {
                Ok(request) => request,
                // Already refused towards the client
                Err(Error::Protocol(_)) => continue,
                Err(e) => {
                    debug!("SNEP server {} done: {}", id, e);
                    break;
                }
            };

            let answer = match RequestCode::from_u8(header.code) {
                Some(RequestCode::Get) => {
                    debug!("SNEP server {}: {:?}", id, Step::AnswerGet);
                    self.answer_get(information)
                }
                Some(RequestCode::Put) => {
                    debug!("SNEP server {}: {:?}", id, Step::AnswerPut);
                    Self::answer_put(information, sap, &events)
                }
                Some(RequestCode::Continue | RequestCode::Reject) => Err(ProtocolError::BadRequest),
                None => Err(ProtocolError::NotImplemented),
            };
            let (code, payload) = match answer {
                Ok(payload) => (ResponseCode::Success, payload),
                Err(e) => {
                    warn!("SNEP server {} request 0x{:02X} failed: {}", id, header.code, e);
                    (ResponseCode::for_error(e), Bytes::new())
                }
            };

            debug!("SNEP server {}: {:?}", id, Step::SendResponse(code));
            match context.send(code as u8, &payload).await {
                Ok(()) => {}
                // The client refused the response; the connection stays up
                Err(Error::Protocol(e)) => debug!("SNEP server {} response refused: {}", id, e),
                Err(e) => {
                    debug!("SNEP server {} done: {}", id, e);
                    break;
                }
            }
        }
    }
}

impl std::fmt::Debug for SnepServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnepServer")
            .field("max_information", &self.max_information)
            .finish_non_exhaustive()
    }
}

impl Service for SnepServer {
    fn name(&self) -> &str {
        "snep"
    }

    fn activate(&self, activation: Activation) {
        let sap = activation.sap;
        let (socket, events, runtime) = activation.into_parts();
        let context = SnepContext::new(socket, Role::Server, self.max_information);
        runtime.spawn(self.clone().serve(context, sap, events));
    }
}
