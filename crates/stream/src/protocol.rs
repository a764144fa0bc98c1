//! Wire protocol between the streamer and subscribers
//!
//! Every frame is one JSON document.
//!
//! # Server → Client
//!
//! ```text
//! { "type": "welcome" | "audit_event" | "pong" | "ping" | "filter_added" | "filter_removed" | "error",
//!   "timestamp": <RFC 3339>,
//!   "data": <payload>,
//!   "sequence": <u64, audit_event only>,
//!   "checksum": <string, when the event carries one> }
//! ```
//!
//! # Client → Server
//!
//! ```text
//! { "type": "add_filter", "filter": { "name": ..., "event_types": [...], ... } }
//! { "type": "remove_filter", "filter_name": "..." }
//! { "type": "ping" }
//! { "type": "pong" }
//! ```
//!
//! Any other `type` parses as [`ControlMessage::Unknown`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::Result;
use crate::event::AuditEvent;
use crate::filter::AuditFilter;

/// Outbound envelope type tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// First message on every connection
    Welcome,
    /// A forwarded audit event
    AuditEvent,
    /// Reply to a client `ping`
    Pong,
    /// Server keepalive probe
    Ping,
    /// Acknowledges `add_filter`
    FilterAdded,
    /// Acknowledges `remove_filter`
    FilterRemoved,
    /// A control message was rejected
    Error,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Welcome => "welcome",
            Self::AuditEvent => "audit_event",
            Self::Pong => "pong",
            Self::Ping => "ping",
            Self::FilterAdded => "filter_added",
            Self::FilterRemoved => "filter_removed",
            Self::Error => "error",
        }
    }
}

/// Server → client envelope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

/// Payload of the `welcome` message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WelcomeInfo {
    pub connection_id: String,
    pub filtering_enabled: bool,
    pub max_filters: usize,
    pub rate_limit_per_sec: u32,
    pub keepalive_interval_secs: u64,
}

impl OutboundMessage {
    fn new(message_type: MessageType, data: Value) -> Self {
        Self {
            message_type,
            timestamp: Utc::now(),
            data,
            sequence: None,
            checksum: None,
        }
    }

    pub fn welcome(info: &WelcomeInfo) -> Result<Self> {
        Ok(Self::new(MessageType::Welcome, serde_json::to_value(info)?))
    }

    /// Wrap an event, carrying its sequence number and checksum
    pub fn audit_event(event: &AuditEvent) -> Result<Self> {
        let mut message = Self::new(MessageType::AuditEvent, serde_json::to_value(event)?);
        message.sequence = Some(event.sequence);
        message.checksum = event.checksum.clone();
        Ok(message)
    }

    pub fn pong() -> Self {
        Self::new(MessageType::Pong, Value::Null)
    }

    pub fn ping() -> Self {
        Self::new(MessageType::Ping, Value::Null)
    }

    pub fn filter_added(name: &str, replaced: bool) -> Self {
        Self::new(
            MessageType::FilterAdded,
            json!({ "filter_name": name, "replaced": replaced }),
        )
    }

    pub fn filter_removed(name: &str) -> Self {
        Self::new(MessageType::FilterRemoved, json!({ "filter_name": name }))
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(
            MessageType::Error,
            json!({ "code": code, "message": message.into() }),
        )
    }

    /// Serialize to a single JSON text frame
    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }
}

/// Client → server control message
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    AddFilter { filter: AuditFilter },
    RemoveFilter { filter_name: String },
    Ping,
    /// Reply to the server keepalive; only refreshes activity
    Pong,
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    /// Parse a text frame
    ///
    /// Malformed JSON or a missing `type` is an error; an unrecognized
    /// `type` is `Unknown`.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }

    /// Name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::AddFilter { .. } => "add_filter",
            Self::RemoveFilter { .. } => "remove_filter",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Unknown => "unknown",
        }
    }
}

#[cfg(test)]
#[path = "protocol_test.rs"]
mod tests;
