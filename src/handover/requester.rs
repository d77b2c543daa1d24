//! Requester role: offer local carriers, take the selector's pick.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::carrier::{CarrierNegotiator, CarrierType};
use super::message::{HandoverMessage, Kind};
use super::HandoverOutcome;
use crate::controller::ConnectTarget;
use crate::error::{Error, ProtocolError, Result};
use crate::runtime::EngineRef;
use crate::snep::SnepClient;
use crate::san;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    BuildRequest,
    SendRequest,
    ReceiveSelect,
    ProcessSelect,
}

/// Run one handover as requester. `carrier` restricts the offer to one
/// carrier type; `CarrierType::Unknown` offers every configured carrier.
pub(crate) async fn request(engine: EngineRef, carrier: CarrierType) -> Result<HandoverOutcome> {
    let result = negotiate(&engine, carrier).await;
    match &result {
        Ok(outcome) => info!("handover selected {}", outcome.carrier),
        Err(e) => warn!("handover request failed: {}", e),
    }
    result
}

async fn negotiate(engine: &EngineRef, carrier: CarrierType) -> Result<HandoverOutcome> {
    let negotiators: Vec<Arc<dyn CarrierNegotiator>> = engine
        .shared
        .config
        .carriers
        .iter()
        .filter(|n| carrier == CarrierType::Unknown || n.carrier() == carrier)
        .cloned()
        .collect();

    debug!("handover requester: {:?}", Step::BuildRequest);
    let mut hr = HandoverMessage::request(rand::random());
    for negotiator in &negotiators {
        match negotiator.config_record() {
            Some(record) => hr.add_carrier(negotiator.power_state(), record),
            None => debug!("{} has no configuration record, not offered", negotiator.carrier()),
        }
    }
    if hr.alternatives.is_empty() {
        return Err(Error::InvalidParam("no local carrier to offer"));
    }

    debug!("handover requester: {:?}", Step::SendRequest);
    let client = SnepClient::connect(engine, ConnectTarget::Name(san::HANDOVER.to_owned())).await?;
    let response = client.put(hr.to_bytes()).await?;

    debug!("handover requester: {:?}", Step::ReceiveSelect);
    let hs = HandoverMessage::parse(&response, Kind::Select)?;

    debug!("handover requester: {:?}", Step::ProcessSelect);
    let (negotiator, record) = hs
        .offers()
        .find_map(|(selected, _, record)| {
            negotiators
                .iter()
                .find(|n| n.carrier() == selected)
                .map(|n| (n, record))
        })
        .ok_or(ProtocolError::NotFound)?;
    let data = negotiator.process_select(record)?;

    Ok(HandoverOutcome {
        carrier: negotiator.carrier(),
        record: record.clone(),
        data,
    })
}
