//! Tests for the subscriber wire protocol

use super::*;

// ============================================================================
// Outbound envelopes
// ============================================================================

#[test]
fn test_audit_event_envelope_shape() {
    let event = AuditEvent::new("evt-1", "consent.granted", "agent-7", 42).with_checksum("h42");
    let message = OutboundMessage::audit_event(&event).unwrap();

    let value: Value = serde_json::from_str(&message.encode().unwrap()).unwrap();
    assert_eq!(value["type"], "audit_event");
    assert_eq!(value["sequence"], 42);
    assert_eq!(value["checksum"], "h42");
    assert_eq!(value["data"]["event_type"], "consent.granted");
    assert!(value["timestamp"].is_string());
}

#[test]
fn test_optional_fields_omitted() {
    let value: Value = serde_json::from_str(&OutboundMessage::pong().encode().unwrap()).unwrap();

    assert_eq!(value["type"], "pong");
    assert!(value.get("sequence").is_none());
    assert!(value.get("checksum").is_none());
}

#[test]
fn test_event_without_checksum() {
    let event = AuditEvent::new("evt-2", "call.placed", "u", 7);
    let message = OutboundMessage::audit_event(&event).unwrap();

    assert_eq!(message.sequence, Some(7));
    assert_eq!(message.checksum, None);
}

#[test]
fn test_welcome_payload() {
    let info = WelcomeInfo {
        connection_id: "c-1".into(),
        filtering_enabled: true,
        max_filters: 10,
        rate_limit_per_sec: 100,
        keepalive_interval_secs: 30,
    };
    let message = OutboundMessage::welcome(&info).unwrap();

    assert_eq!(message.message_type, MessageType::Welcome);
    assert_eq!(message.data["connection_id"], "c-1");
    assert_eq!(message.data["max_filters"], 10);
}

#[test]
fn test_error_payload() {
    let message = OutboundMessage::error("validation", "empty name");
    assert_eq!(message.data["code"], "validation");
    assert_eq!(message.data["message"], "empty name");
}

#[test]
fn test_message_type_names_match_serde() {
    for message_type in [
        MessageType::Welcome,
        MessageType::AuditEvent,
        MessageType::Pong,
        MessageType::Ping,
        MessageType::FilterAdded,
        MessageType::FilterRemoved,
        MessageType::Error,
    ] {
        let json = serde_json::to_string(&message_type).unwrap();
        assert_eq!(json, format!("\"{}\"", message_type.as_str()));
    }
}

// ============================================================================
// Control messages
// ============================================================================

#[test]
fn test_parse_add_filter() {
    let text = r#"{"type":"add_filter","filter":{"name":"a-only","event_types":["A"],"is_enabled":true}}"#;
    let message = ControlMessage::parse(text).unwrap();

    match message {
        ControlMessage::AddFilter { filter } => {
            assert_eq!(filter.name, "a-only");
            assert!(filter.event_types.contains("A"));
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[test]
fn test_parse_remove_filter() {
    let message = ControlMessage::parse(r#"{"type":"remove_filter","filter_name":"a-only"}"#).unwrap();
    assert_eq!(
        message,
        ControlMessage::RemoveFilter {
            filter_name: "a-only".into()
        }
    );
}

#[test]
fn test_parse_ping_and_pong() {
    assert_eq!(ControlMessage::parse(r#"{"type":"ping"}"#).unwrap(), ControlMessage::Ping);
    assert_eq!(ControlMessage::parse(r#"{"type":"pong"}"#).unwrap(), ControlMessage::Pong);
}

#[test]
fn test_parse_unknown_type() {
    let message = ControlMessage::parse(r#"{"type":"subscribe_all"}"#).unwrap();
    assert_eq!(message, ControlMessage::Unknown);
    assert_eq!(message.name(), "unknown");
}

#[test]
fn test_parse_malformed() {
    assert!(ControlMessage::parse("not json").is_err());
    assert!(ControlMessage::parse(r#"{"filter_name":"x"}"#).is_err());
    assert!(ControlMessage::parse(r#"{"type":"remove_filter"}"#).is_err());
}
