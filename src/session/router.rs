//! Pure routing of transport events
//!
//! Translates raw rumqttc events into the small set of routes the manager's
//! event loop acts on. Keeping this a pure function makes the ack protocol
//! testable without a broker.

use bytes::Bytes;
use rumqttc::v5::mqttbytes::v5::{ConnectReturnCode, Packet, SubscribeReasonCode};
use rumqttc::v5::Event;
use rumqttc::Outgoing;

/// Routing decision for one transport event
#[derive(Debug, Clone, PartialEq)]
pub enum EventRoute {
    /// Broker accepted the connect attempt
    ConnectionAccepted,
    /// Broker refused the connect attempt
    ConnectionRefused { reason: String },
    /// Inbound message on a subscribed topic
    MessageReceived {
        topic: String,
        payload: Bytes,
        retain: bool,
    },
    /// Subscription acknowledgement; `failure` holds the rejection reason
    SubscribeResult { pkid: u16, failure: Option<String> },
    /// Unsubscribe acknowledgement
    UnsubscribeAcked { pkid: u16 },
    /// Transport assigned a packet id to an outgoing subscribe
    SubscribeBound { pkid: u16 },
    /// Transport assigned a packet id to an outgoing publish
    PublishBound { pkid: u16 },
    /// Final acknowledgement for a published message
    PublishCompleted { pkid: u16 },
    /// Broker closed the connection on its side
    BrokerDisconnected { reason: String },
    /// Keep-alive traffic and other events with no session-level meaning
    Ignored,
}

/// Map a transport event to its session-level meaning.
pub fn route_event(event: &Event) -> EventRoute {
    match event {
        Event::Incoming(packet) => match packet {
            Packet::ConnAck(ack) if ack.code == ConnectReturnCode::Success => {
                EventRoute::ConnectionAccepted
            }
            Packet::ConnAck(ack) => EventRoute::ConnectionRefused {
                reason: format!("broker refused connection: {:?}", ack.code),
            },
            Packet::Publish(publish) => EventRoute::MessageReceived {
                topic: String::from_utf8_lossy(&publish.topic).into_owned(),
                payload: publish.payload.clone(),
                retain: publish.retain,
            },
            Packet::SubAck(ack) => EventRoute::SubscribeResult {
                pkid: ack.pkid,
                failure: suback_failure(&ack.return_codes),
            },
            Packet::UnsubAck(ack) => EventRoute::UnsubscribeAcked { pkid: ack.pkid },
            // QoS 1 completes on PubAck, QoS 2 on PubComp; PubRec/PubRel are
            // intermediate and carry no completion.
            Packet::PubAck(ack) => EventRoute::PublishCompleted { pkid: ack.pkid },
            Packet::PubComp(comp) => EventRoute::PublishCompleted { pkid: comp.pkid },
            Packet::Disconnect(disconnect) => EventRoute::BrokerDisconnected {
                reason: format!("broker disconnected: {:?}", disconnect.reason_code),
            },
            _ => EventRoute::Ignored,
        },
        Event::Outgoing(Outgoing::Subscribe(pkid)) => EventRoute::SubscribeBound { pkid: *pkid },
        Event::Outgoing(Outgoing::Publish(pkid)) => EventRoute::PublishBound { pkid: *pkid },
        Event::Outgoing(_) => EventRoute::Ignored,
    }
}

/// First rejection in a subscribe acknowledgement, if any.
fn suback_failure(codes: &[SubscribeReasonCode]) -> Option<String> {
    codes.iter().find_map(|code| match code {
        SubscribeReasonCode::Success(_) => None,
        other => Some(format!("broker rejected subscription: {other:?}")),
    })
}
