//! Selector role: the Connection Handover server.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, info, warn};

use super::carrier::{CarrierNegotiator, CarrierType};
use super::message::{HandoverMessage, Kind};
use crate::error::{Error, ProtocolError, Result};
use crate::ndef::Record;
use crate::runtime::{Activation, EngineEvent, EventEmitter, Service};
use crate::snep::context::{Role, SnepContext};
use crate::snep::{RequestCode, ResponseCode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    ReceiveRequest,
    SelectCarrier,
    ProcessRequest,
    SendSelect,
}

/// A negotiated carrier, ready to go back to the requester.
struct Selection {
    carrier: CarrierType,
    requester_record: Record,
    select: Bytes,
}

/// Handover selector.
///
/// Answers each Handover Request (a SNEP PUT) with a Handover Select in the
/// SUCCESS response. The carrier is the first entry of `priority` that the
/// requester offers and a local negotiator supports, whatever the order of
/// the requester's list.
#[derive(Clone)]
pub struct HandoverServer {
    carriers: Arc<[Arc<dyn CarrierNegotiator>]>,
    priority: Arc<[CarrierType]>,
    max_information: usize,
}

impl HandoverServer {
    pub fn new(
        carriers: Vec<Arc<dyn CarrierNegotiator>>,
        priority: Vec<CarrierType>,
        max_information: usize,
    ) -> Self {
        Self {
            carriers: carriers.into(),
            priority: priority.into(),
            max_information,
        }
    }

    /// Pick the carrier for a request: priority order first, request order
    /// second.
    pub fn select<'a>(&self, request: &'a HandoverMessage) -> Option<(CarrierType, &'a Record)> {
        self.priority.iter().find_map(|wanted| {
            if !self.carriers.iter().any(|c| c.carrier() == *wanted) {
                return None;
            }
            request
                .offers()
                .find(|(offered, _, _)| offered == wanted)
                .map(|(carrier, _, record)| (carrier, record))
        })
    }

    fn negotiate(&self, request: &[u8]) -> Result<Selection> {
        let hr = HandoverMessage::parse(request, Kind::Request)?;

        debug!("handover selector: {:?}", Step::SelectCarrier);
        let (carrier, record) = self.select(&hr).ok_or(ProtocolError::NotFound)?;
        let mut hs = HandoverMessage::select();
        let local: Vec<_> = self
            .carriers
            .iter()
            .filter(|c| c.carrier() == carrier)
            .collect();
        for negotiator in &local {
            if let Some(config) = negotiator.config_record() {
                hs.add_carrier(negotiator.power_state(), config);
            }
        }
        if hs.alternatives.is_empty() {
            return Err(ProtocolError::NotFound.into());
        }

        debug!("handover selector: {:?}", Step::ProcessRequest);
        for negotiator in &local {
            negotiator.process_request(record)?;
        }

        Ok(Selection {
            carrier,
            requester_record: record.clone(),
            select: hs.to_bytes(),
        })
    }

    async fn serve(self, context: SnepContext, events: EventEmitter) {
        let id = context.socket().id();
        loop {
            debug!("handover selector {}: {:?}", id, Step::ReceiveRequest);
            let (header, information) = match context.receive().await {
                Ok(request) => request,
                Err(Error::Protocol(_)) => continue,
                Err(e) => {
                    debug!("handover selector {} done: {}", id, e);
                    break;
                }
            };

            let outcome = if header.code == RequestCode::Put as u8 {
                self.negotiate(&information)
            } else {
                Err(ProtocolError::NotImplemented.into())
            };

            match outcome {
                Ok(selection) => {
                    debug!("handover selector {}: {:?}", id, Step::SendSelect);
                    match context
                        .send(ResponseCode::Success as u8, &selection.select)
                        .await
                    {
                        Ok(()) => {}
                        Err(error @ Error::Protocol(_)) => {
                            warn!("handover selector {} select refused: {}", id, error);
                            events.emit(EngineEvent::HandoverFailed { error });
                            continue;
                        }
                        Err(error) => {
                            warn!("handover selector {} failed to answer: {}", id, error);
                            events.emit(EngineEvent::HandoverFailed { error });
                            break;
                        }
                    }
                    info!("handover selected {}", selection.carrier);
                    events.emit(EngineEvent::HandoverCompleted {
                        carrier: selection.carrier,
                        record: selection.requester_record,
                    });
                }
                Err(error) => {
                    warn!("handover selector {} failed: {}", id, error);
                    let code = match &error {
                        Error::Protocol(e) => ResponseCode::for_error(*e),
                        _ => ResponseCode::BadRequest,
                    };
                    let _ = context.send(code as u8, &[]).await;
                    events.emit(EngineEvent::HandoverFailed { error });
                    break;
                }
            }
        }
    }
}

impl fmt::Debug for HandoverServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandoverServer")
            .field(
                "carriers",
                &self.carriers.iter().map(|c| c.carrier()).collect::<Vec<_>>(),
            )
            .field("priority", &self.priority)
            .finish()
    }
}

impl Service for HandoverServer {
    fn name(&self) -> &str {
        "handover"
    }

    fn activate(&self, activation: Activation) {
        let (socket, events, runtime) = activation.into_parts();
        let context = SnepContext::new(socket, Role::Server, self.max_information);
        runtime.spawn(self.clone().serve(context, events));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handover::carrier::{BluetoothOob, StaticCarrier, MIME_WIFI_P2P};
    use crate::handover::message::PowerState;

    fn server(priority: Vec<CarrierType>) -> HandoverServer {
        let bt = BluetoothOob::new([1, 2, 3, 4, 5, 6], Some("selector"));
        let carriers: Vec<Arc<dyn CarrierNegotiator>> = vec![
            Arc::new(StaticCarrier::wifi(&b"\x10\x4a\x00\x01\x10"[..])),
            Arc::new(StaticCarrier::bluetooth(&bt)),
        ];
        HandoverServer::new(carriers, priority, 1024)
    }

    fn request_offering(carriers: &[Record]) -> HandoverMessage {
        let mut hr = HandoverMessage::request(7);
        for record in carriers {
            hr.add_carrier(PowerState::Active, record.clone());
        }
        hr
    }

    #[test]
    fn test_priority_beats_request_order() {
        let wifi = StaticCarrier::wifi(&b"\x10\x4a"[..]).config_record().unwrap();
        let bt = BluetoothOob::new([9, 9, 9, 9, 9, 9], None).to_record();
        let hr = request_offering(&[wifi, bt]);

        let (carrier, _) = server(CarrierType::DEFAULT_PRIORITY.to_vec()).select(&hr).unwrap();
        assert_eq!(carrier, CarrierType::Bluetooth);

        let (carrier, _) = server(vec![CarrierType::WifiBss, CarrierType::Bluetooth])
            .select(&hr)
            .unwrap();
        assert_eq!(carrier, CarrierType::WifiBss);
    }

    #[test]
    fn test_no_common_carrier() {
        let p2p = Record::mime(MIME_WIFI_P2P, &b"x"[..]);
        let hr = request_offering(&[p2p]);
        assert!(server(CarrierType::DEFAULT_PRIORITY.to_vec()).select(&hr).is_none());

        let selector = server(CarrierType::DEFAULT_PRIORITY.to_vec());
        assert!(matches!(
            selector.negotiate(&hr.to_bytes()),
            Err(Error::Protocol(ProtocolError::NotFound))
        ));
    }

    #[test]
    fn test_select_carries_local_record() {
        let bt = BluetoothOob::new([9, 9, 9, 9, 9, 9], None).to_record();
        let hr = request_offering(&[bt.clone()]);
        let selection = server(CarrierType::DEFAULT_PRIORITY.to_vec())
            .negotiate(&hr.to_bytes())
            .unwrap();
        assert_eq!(selection.carrier, CarrierType::Bluetooth);
        assert_eq!(selection.requester_record.payload, bt.payload);

        let hs = HandoverMessage::parse(&selection.select, Kind::Select).unwrap();
        let (carrier, _, record) = hs.offers().next().unwrap();
        assert_eq!(carrier, CarrierType::Bluetooth);
        let oob = BluetoothOob::parse(&record.payload).unwrap();
        assert_eq!(oob.name.as_deref(), Some("selector"));
    }
}
