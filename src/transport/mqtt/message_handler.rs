//! Pure routing of rumqttc events and publish acknowledgement tracking
//!
//! rumqttc reports publish progress as packet ids (`Outgoing::Publish(pkid)`,
//! then `PubAck`/`PubComp`). [`PublishTracker`] maps those back onto the
//! sequence ids the supervisor handed to `Connection::publish`. A broker refusal
//! surfaces from rumqttc as a poll error rather than an event, see
//! [`MessageHandler::publish_refusal`].

use super::connection::from_rumqttc_qos;
use crate::transport::{IncomingMessage, QoS, SequenceId};
use rumqttc::v5::mqttbytes::v5::{Packet, PubAckReason, PubRecReason};
use rumqttc::v5::{ConnectionError, Event, StateError};
use rumqttc::Outgoing;
use std::collections::{HashMap, VecDeque};
use tracing::debug;

/// Pure routing decisions for rumqttc events
pub struct MessageHandler;

impl MessageHandler {
    /// Route a rumqttc event to the action the connection should take
    pub fn route_mqtt_event(event: &Event) -> EventRoute {
        match event {
            Event::Incoming(incoming) => match incoming {
                Packet::ConnAck(_) => EventRoute::ConnectionAcknowledged,
                Packet::Publish(publish) => EventRoute::MessageReceived(IncomingMessage::new(
                    String::from_utf8_lossy(&publish.topic).to_string(),
                    publish.payload.clone(),
                    from_rumqttc_qos(publish.qos),
                    publish.retain,
                )),
                Packet::PubAck(ack) if puback_accepted(&ack.reason) => {
                    EventRoute::PublishAcknowledged(ack.pkid)
                }
                Packet::PubAck(ack) => EventRoute::PublishRefused {
                    pkid: ack.pkid,
                    reason: format!("{:?}", ack.reason),
                },
                Packet::PubRec(rec) if !pubrec_accepted(&rec.reason) => {
                    EventRoute::PublishRefused {
                        pkid: rec.pkid,
                        reason: format!("{:?}", rec.reason),
                    }
                }
                Packet::PubComp(comp) => EventRoute::PublishAcknowledged(comp.pkid),
                Packet::Disconnect(_) => EventRoute::Disconnected,
                other => EventRoute::InfrastructureEvent(format!("{other:?}")),
            },
            Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishSent(*pkid),
            Event::Outgoing(_) => EventRoute::OutgoingEvent,
        }
    }

    /// Reason code when a poll error is the broker refusing a publish
    pub fn publish_refusal(error: &ConnectionError) -> Option<String> {
        match error {
            ConnectionError::MqttState(StateError::PubAckFail { reason }) => {
                Some(format!("{reason:?}"))
            }
            ConnectionError::MqttState(StateError::PubRecFail { reason }) => {
                Some(format!("{reason:?}"))
            }
            _ => None,
        }
    }
}

fn puback_accepted(reason: &PubAckReason) -> bool {
    matches!(
        reason,
        PubAckReason::Success | PubAckReason::NoMatchingSubscribers
    )
}

fn pubrec_accepted(reason: &PubRecReason) -> bool {
    matches!(
        reason,
        PubRecReason::Success | PubRecReason::NoMatchingSubscribers
    )
}

/// Routing decisions for rumqttc events
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// ConnAck received
    ConnectionAcknowledged,
    /// Message received on a subscribed topic
    MessageReceived(IncomingMessage),
    /// Publish written to the socket with this packet id
    PublishSent(u16),
    /// PubAck (QoS 1) or PubComp (QoS 2) for this packet id
    PublishAcknowledged(u16),
    /// PubAck or PubRec carrying a failure reason code
    PublishRefused { pkid: u16, reason: String },
    /// Broker sent DISCONNECT
    Disconnected,
    /// PingResp, SubAck and friends
    InfrastructureEvent(String),
    /// Other outgoing packets
    OutgoingEvent,
}

/// Correlates submitted publishes with rumqttc packet ids
#[derive(Debug, Default)]
pub struct PublishTracker {
    awaiting_send: VecDeque<(SequenceId, QoS)>,
    awaiting_ack: HashMap<u16, SequenceId>,
}

impl PublishTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a publish before handing it to rumqttc
    pub fn submitted(&mut self, sequence_id: SequenceId, qos: QoS) {
        self.awaiting_send.push_back((sequence_id, qos));
    }

    /// Undo the latest registration when rumqttc refused the request
    pub fn rejected(&mut self, sequence_id: SequenceId) {
        if let Some(position) = self
            .awaiting_send
            .iter()
            .rposition(|(pending, _)| *pending == sequence_id)
        {
            self.awaiting_send.remove(position);
        }
    }

    /// Outgoing publish observed; QoS 0 completes right here
    pub fn on_publish_sent(&mut self, pkid: u16) -> Option<SequenceId> {
        let (sequence_id, qos) = self.awaiting_send.pop_front()?;
        if qos == QoS::AtMostOnce {
            return Some(sequence_id);
        }
        self.awaiting_ack.insert(pkid, sequence_id);
        None
    }

    /// Final acknowledgement observed
    pub fn on_publish_acknowledged(&mut self, pkid: u16) -> Option<SequenceId> {
        let sequence_id = self.awaiting_ack.remove(&pkid);
        if sequence_id.is_none() {
            debug!(pkid, "Acknowledgement for untracked packet id");
        }
        sequence_id
    }

    /// Take the publish a refusal applies to when rumqttc reports no packet id.
    /// Only unambiguous while a single publish awaits its acknowledgement.
    pub fn take_unacknowledged(&mut self) -> Option<SequenceId> {
        if self.awaiting_ack.len() != 1 {
            debug!(
                awaiting = self.awaiting_ack.len(),
                "Cannot attribute refusal to a single publish"
            );
            return None;
        }
        self.awaiting_ack.drain().next().map(|(_, sequence_id)| sequence_id)
    }
}
