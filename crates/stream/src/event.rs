//! Audit event record
//!
//! Events arrive already validated and sequenced by the audit log. The
//! engine only reads the fields it filters on and forwards the record.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Metadata key consulted when an event carries no explicit severity
pub const SEVERITY_METADATA_KEY: &str = "severity";

/// An immutable audit event produced upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier
    pub id: String,
    /// Type tag (e.g. "consent.granted")
    pub event_type: String,
    /// Who performed the action
    pub actor_id: String,
    /// Kind of entity acted on
    pub entity_type: String,
    /// Identifier of the entity acted on
    pub entity_id: String,
    /// When the action happened
    pub timestamp: DateTime<Utc>,
    /// Monotonically non-decreasing per source, assigned upstream
    pub sequence: u64,
    /// Free-form key/value attributes
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    /// Optional severity label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    /// Hash-chain link computed by the audit log
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl AuditEvent {
    /// Create an event with the required fields, stamped now
    pub fn new(
        id: impl Into<String>,
        event_type: impl Into<String>,
        actor_id: impl Into<String>,
        sequence: u64,
    ) -> Self {
        Self {
            id: id.into(),
            event_type: event_type.into(),
            actor_id: actor_id.into(),
            entity_type: String::new(),
            entity_id: String::new(),
            timestamp: Utc::now(),
            sequence,
            metadata: HashMap::new(),
            severity: None,
            checksum: None,
        }
    }

    /// Set the entity this event refers to
    pub fn with_entity(mut self, entity_type: impl Into<String>, entity_id: impl Into<String>) -> Self {
        self.entity_type = entity_type.into();
        self.entity_id = entity_id.into();
        self
    }

    /// Set the timestamp
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Add a metadata entry
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Set the severity
    pub fn with_severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    /// Set the upstream checksum
    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }

    /// Severity from the dedicated field, else from metadata
    #[inline]
    pub fn severity(&self) -> Option<&str> {
        self.severity
            .as_deref()
            .or_else(|| self.metadata.get(SEVERITY_METADATA_KEY).map(String::as_str))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let event = AuditEvent::new("evt-1", "consent.granted", "agent-7", 42)
            .with_entity("lead", "L-100")
            .with_metadata("campaign", "spring")
            .with_checksum("abc123");

        assert_eq!(event.entity_type, "lead");
        assert_eq!(event.entity_id, "L-100");
        assert_eq!(event.metadata.get("campaign").unwrap(), "spring");
        assert_eq!(event.checksum.as_deref(), Some("abc123"));
        assert_eq!(event.sequence, 42);
    }

    #[test]
    fn test_severity_prefers_field() {
        let event = AuditEvent::new("e", "t", "a", 1)
            .with_metadata(SEVERITY_METADATA_KEY, "low")
            .with_severity("high");
        assert_eq!(event.severity(), Some("high"));
    }

    #[test]
    fn test_severity_falls_back_to_metadata() {
        let event = AuditEvent::new("e", "t", "a", 1).with_metadata(SEVERITY_METADATA_KEY, "low");
        assert_eq!(event.severity(), Some("low"));

        let event = AuditEvent::new("e", "t", "a", 1);
        assert_eq!(event.severity(), None);
    }

    #[test]
    fn test_deserialize_minimal() {
        let json = r#"{
            "id": "evt-9",
            "event_type": "call.placed",
            "actor_id": "u1",
            "entity_type": "call",
            "entity_id": "c1",
            "timestamp": "2024-01-01T00:00:00Z",
            "sequence": 9
        }"#;
        let event: AuditEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.sequence, 9);
        assert!(event.metadata.is_empty());
        assert!(event.checksum.is_none());
    }
}
