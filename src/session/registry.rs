//! Subscription registry and delivery guarantee levels
//!
//! The registry holds only subscriptions the broker has acknowledged. The
//! manager enforces a single active subscription set: every new subscribe
//! call replaces the whole set, so the registry never grows past what the
//! last confirmed subscribe established.

use crate::error::SessionError;
use rumqttc::v5::mqttbytes::QoS;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Delivery guarantee requested for a subscription or publish
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QosLevel {
    /// At most once (fire and forget)
    AtMostOnce,
    /// At least once (acknowledged)
    AtLeastOnce,
    /// Exactly once (two-phase acknowledged)
    ExactlyOnce,
}

impl QosLevel {
    pub fn as_u8(self) -> u8 {
        match self {
            QosLevel::AtMostOnce => 0,
            QosLevel::AtLeastOnce => 1,
            QosLevel::ExactlyOnce => 2,
        }
    }
}

impl TryFrom<u8> for QosLevel {
    type Error = SessionError;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(QosLevel::AtMostOnce),
            1 => Ok(QosLevel::AtLeastOnce),
            2 => Ok(QosLevel::ExactlyOnce),
            other => Err(SessionError::InvalidQos(other)),
        }
    }
}

impl From<QosLevel> for QoS {
    fn from(level: QosLevel) -> Self {
        match level {
            QosLevel::AtMostOnce => QoS::AtMostOnce,
            QosLevel::AtLeastOnce => QoS::AtLeastOnce,
            QosLevel::ExactlyOnce => QoS::ExactlyOnce,
        }
    }
}

/// Set of broker-acknowledged topic subscriptions
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: HashMap<String, QosLevel>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a subscription the broker has confirmed.
    pub fn confirm(&mut self, topic: String, qos: QosLevel) {
        self.entries.insert(topic, qos);
    }

    /// Drop one topic from the registry.
    pub fn remove(&mut self, topic: &str) -> bool {
        self.entries.remove(topic).is_some()
    }

    /// Take every registered topic, leaving the registry empty.
    pub fn drain(&mut self) -> Vec<String> {
        self.entries.drain().map(|(topic, _)| topic).collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.entries.contains_key(topic)
    }

    pub fn qos(&self, topic: &str) -> Option<QosLevel> {
        self.entries.get(topic).copied()
    }

    /// Registered topics and their delivery levels, sorted by topic.
    pub fn snapshot(&self) -> Vec<(String, QosLevel)> {
        let mut entries: Vec<_> = self
            .entries
            .iter()
            .map(|(topic, qos)| (topic.clone(), *qos))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_qos_level_round_trip() {
        for level in 0..=2u8 {
            let qos = QosLevel::try_from(level).unwrap();
            assert_eq!(qos.as_u8(), level);
        }
    }

    #[test]
    fn test_qos_level_rejects_out_of_range() {
        assert!(matches!(
            QosLevel::try_from(3),
            Err(SessionError::InvalidQos(3))
        ));
    }

    #[test]
    fn test_qos_level_maps_to_wire_qos() {
        assert_eq!(QoS::from(QosLevel::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(QoS::from(QosLevel::AtLeastOnce), QoS::AtLeastOnce);
        assert_eq!(QoS::from(QosLevel::ExactlyOnce), QoS::ExactlyOnce);
    }

    #[test]
    fn test_confirm_and_query() {
        let mut registry = SubscriptionRegistry::new();
        assert!(registry.is_empty());

        registry.confirm("sensors/temp".to_string(), QosLevel::AtLeastOnce);
        assert!(registry.contains("sensors/temp"));
        assert_eq!(registry.qos("sensors/temp"), Some(QosLevel::AtLeastOnce));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_drain_empties_the_registry() {
        let mut registry = SubscriptionRegistry::new();
        registry.confirm("a".to_string(), QosLevel::AtMostOnce);
        registry.confirm("b".to_string(), QosLevel::ExactlyOnce);

        let mut drained = registry.drain();
        drained.sort();
        assert_eq!(drained, vec!["a".to_string(), "b".to_string()]);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_snapshot_is_sorted_by_topic() {
        let mut registry = SubscriptionRegistry::new();
        registry.confirm("b".to_string(), QosLevel::ExactlyOnce);
        registry.confirm("a".to_string(), QosLevel::AtMostOnce);

        assert_eq!(
            registry.snapshot(),
            vec![
                ("a".to_string(), QosLevel::AtMostOnce),
                ("b".to_string(), QosLevel::ExactlyOnce),
            ]
        );
    }

    #[test]
    fn test_remove_reports_presence() {
        let mut registry = SubscriptionRegistry::new();
        registry.confirm("a".to_string(), QosLevel::AtMostOnce);
        assert!(registry.remove("a"));
        assert!(!registry.remove("a"));
    }
}
