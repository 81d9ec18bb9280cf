//! Pending operation tokens
//!
//! Correlates in-flight requests with the acknowledgements that complete
//! them. Each token is consumed exactly once; the manager never reissues a
//! request on the token's behalf.
//!
//! Subscribe and publish correlation works in two steps because the
//! transport assigns packet ids internally: the token is queued at issue
//! time, bound to its packet id when the transport reports the outgoing
//! packet, and consumed when the matching acknowledgement arrives. QoS 0
//! publishes have no acknowledgement, so they complete at the binding step.
//!
//! A subscribe issued while an earlier one is still in flight marks the
//! older tokens superseded. Their acknowledgements are still consumed by
//! packet id, but a superseded grant is undone (unsubscribed) instead of
//! registered, so overlapping subscribes can never misattribute an ack.

use super::registry::QosLevel;
use std::collections::{HashMap, VecDeque};

/// An in-flight subscribe request
#[derive(Debug, Clone, PartialEq)]
pub struct SubscribeToken {
    pub topic: String,
    pub qos: QosLevel,
    /// A newer subscribe has replaced this one; its grant must be undone
    pub superseded: bool,
}

#[derive(Debug)]
struct PublishToken {
    topic: String,
    qos: QosLevel,
}

/// In-flight request bookkeeping for one connection handle
#[derive(Debug, Default)]
pub struct PendingOps {
    unbound_subscribes: VecDeque<SubscribeToken>,
    inflight_subscribes: HashMap<u16, SubscribeToken>,
    unsubscribes: VecDeque<String>,
    unbound_publishes: VecDeque<PublishToken>,
    inflight_publishes: HashMap<u16, String>,
}

impl PendingOps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget every token. Used when the handle is released; completions for
    /// a dead handle must find nothing to consume.
    pub fn clear(&mut self) {
        self.unbound_subscribes.clear();
        self.inflight_subscribes.clear();
        self.unsubscribes.clear();
        self.unbound_publishes.clear();
        self.inflight_publishes.clear();
    }

    /// Queue a subscribe issued to the transport but not yet assigned a
    /// packet id. Any subscribe still pending is marked superseded: the
    /// replace-wholesale policy means only the newest request may register.
    pub fn push_subscribe(&mut self, topic: &str, qos: QosLevel) {
        for token in self.unbound_subscribes.iter_mut() {
            token.superseded = true;
        }
        for token in self.inflight_subscribes.values_mut() {
            token.superseded = true;
        }
        self.unbound_subscribes.push_back(SubscribeToken {
            topic: topic.to_string(),
            qos,
            superseded: false,
        });
    }

    /// Bind the oldest unbound subscribe to the packet id the transport just
    /// reported (the transport assigns ids in issue order).
    pub fn bind_subscribe(&mut self, pkid: u16) {
        if let Some(token) = self.unbound_subscribes.pop_front() {
            self.inflight_subscribes.insert(pkid, token);
        }
    }

    /// Consume the subscribe bound to `pkid` when its acknowledgement arrives.
    pub fn take_subscribe(&mut self, pkid: u16) -> Option<SubscribeToken> {
        self.inflight_subscribes.remove(&pkid)
    }

    pub fn push_unsubscribe(&mut self, topic: String) {
        self.unsubscribes.push_back(topic);
    }

    /// Consume the oldest pending unsubscribe (acks arrive in issue order).
    pub fn pop_unsubscribe(&mut self) -> Option<String> {
        self.unsubscribes.pop_front()
    }

    /// Queue a publish issued to the transport but not yet assigned a packet id.
    pub fn push_publish(&mut self, topic: &str, qos: QosLevel) {
        self.unbound_publishes.push_back(PublishToken {
            topic: topic.to_string(),
            qos,
        });
    }

    /// Bind the oldest unbound publish to the packet id the transport just
    /// reported. Returns the topic when the publish is already complete at
    /// this point (QoS 0 has no acknowledgement to wait for).
    pub fn bind_publish(&mut self, pkid: u16) -> Option<String> {
        let token = self.unbound_publishes.pop_front()?;
        if token.qos == QosLevel::AtMostOnce {
            return Some(token.topic);
        }
        self.inflight_publishes.insert(pkid, token.topic);
        None
    }

    /// Consume a bound publish when its acknowledgement arrives.
    pub fn complete_publish(&mut self, pkid: u16) -> Option<String> {
        self.inflight_publishes.remove(&pkid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_token_consumed_once() {
        let mut pending = PendingOps::new();
        pending.push_subscribe("sensors/temp", QosLevel::AtLeastOnce);
        pending.bind_subscribe(5);

        let token = pending.take_subscribe(5).unwrap();
        assert_eq!(token.topic, "sensors/temp");
        assert_eq!(token.qos, QosLevel::AtLeastOnce);
        assert!(!token.superseded);
        assert!(pending.take_subscribe(5).is_none());
    }

    #[test]
    fn test_overlapping_subscribes_keep_distinct_tokens() {
        let mut pending = PendingOps::new();
        pending.push_subscribe("a", QosLevel::AtMostOnce);
        pending.bind_subscribe(1);
        pending.push_subscribe("b", QosLevel::ExactlyOnce);
        pending.bind_subscribe(2);

        // Each ack finds its own token, regardless of arrival order.
        let b = pending.take_subscribe(2).unwrap();
        assert_eq!(b.topic, "b");
        assert!(!b.superseded);

        let a = pending.take_subscribe(1).unwrap();
        assert_eq!(a.topic, "a");
        assert!(a.superseded);
    }

    #[test]
    fn test_newer_subscribe_supersedes_unbound_token() {
        let mut pending = PendingOps::new();
        pending.push_subscribe("a", QosLevel::AtMostOnce);
        pending.push_subscribe("b", QosLevel::AtLeastOnce);
        pending.bind_subscribe(1);
        pending.bind_subscribe(2);

        assert!(pending.take_subscribe(1).unwrap().superseded);
        assert!(!pending.take_subscribe(2).unwrap().superseded);
    }

    #[test]
    fn test_unsubscribes_complete_in_issue_order() {
        let mut pending = PendingOps::new();
        pending.push_unsubscribe("a".to_string());
        pending.push_unsubscribe("b".to_string());

        assert_eq!(pending.pop_unsubscribe().as_deref(), Some("a"));
        assert_eq!(pending.pop_unsubscribe().as_deref(), Some("b"));
        assert_eq!(pending.pop_unsubscribe(), None);
    }

    #[test]
    fn test_qos0_publish_completes_at_binding() {
        let mut pending = PendingOps::new();
        pending.push_publish("metrics", QosLevel::AtMostOnce);

        assert_eq!(pending.bind_publish(0).as_deref(), Some("metrics"));
        assert_eq!(pending.complete_publish(0), None);
    }

    #[test]
    fn test_acknowledged_publish_completes_on_ack() {
        let mut pending = PendingOps::new();
        pending.push_publish("sensors/temp", QosLevel::AtLeastOnce);

        assert_eq!(pending.bind_publish(7), None);
        assert_eq!(pending.complete_publish(7).as_deref(), Some("sensors/temp"));
        assert_eq!(pending.complete_publish(7), None);
    }

    #[test]
    fn test_interleaved_publishes_keep_their_topics() {
        let mut pending = PendingOps::new();
        pending.push_publish("one", QosLevel::AtLeastOnce);
        pending.push_publish("zero", QosLevel::AtMostOnce);
        pending.push_publish("two", QosLevel::ExactlyOnce);

        assert_eq!(pending.bind_publish(1), None);
        assert_eq!(pending.bind_publish(0).as_deref(), Some("zero"));
        assert_eq!(pending.bind_publish(2), None);

        // Acks may complete out of issue order across QoS levels.
        assert_eq!(pending.complete_publish(2).as_deref(), Some("two"));
        assert_eq!(pending.complete_publish(1).as_deref(), Some("one"));
    }

    #[test]
    fn test_clear_drops_everything() {
        let mut pending = PendingOps::new();
        pending.push_subscribe("a", QosLevel::AtMostOnce);
        pending.bind_subscribe(1);
        pending.push_subscribe("b", QosLevel::AtMostOnce);
        pending.push_unsubscribe("c".to_string());
        pending.push_publish("d", QosLevel::AtLeastOnce);
        pending.bind_publish(3);

        pending.clear();
        assert!(pending.take_subscribe(1).is_none());
        assert!(pending.pop_unsubscribe().is_none());
        assert!(pending.bind_publish(4).is_none());
        assert!(pending.complete_publish(3).is_none());

        pending.bind_subscribe(2);
        assert!(pending.take_subscribe(2).is_none());
    }
}
