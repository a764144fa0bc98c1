//! Tests for AuditFilter and FilterSet

use super::*;
use chrono::TimeZone;

/// Helper to create a test event with specific metadata
fn make_event(event_type: &str, actor: &str, entity_type: &str) -> AuditEvent {
    AuditEvent::new("evt", event_type, actor, 1).with_entity(entity_type, "id-1")
}

fn at(hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, hour, 0, 0).unwrap()
}

// ============================================================================
// Single filter criteria
// ============================================================================

#[test]
fn test_empty_filter_matches_everything() {
    let filter = AuditFilter::new("all");

    assert!(filter.matches(&make_event("a", "u1", "lead")));
    assert!(filter.matches(&make_event("b", "u2", "call")));
}

#[test]
fn test_event_type_filter() {
    let filter = AuditFilter::new("only-a").with_event_types(["A"]);

    assert!(filter.matches(&make_event("A", "u1", "lead")));
    assert!(!filter.matches(&make_event("B", "u1", "lead")));
}

#[test]
fn test_event_type_filter_multiple() {
    let filter = AuditFilter::new("ab").with_event_types(["A", "B"]);

    assert!(filter.matches(&make_event("A", "u", "x")));
    assert!(filter.matches(&make_event("B", "u", "x")));
    assert!(!filter.matches(&make_event("C", "u", "x")));
}

#[test]
fn test_actor_and_entity_filters() {
    let filter = AuditFilter::new("f")
        .with_actors(["u1"])
        .with_entities(["lead"]);

    assert!(filter.matches(&make_event("A", "u1", "lead")));
    assert!(!filter.matches(&make_event("A", "u2", "lead")));
    assert!(!filter.matches(&make_event("A", "u1", "call")));
}

#[test]
fn test_time_range_is_inclusive() {
    let filter = AuditFilter::new("window").with_time_range(at(8), at(10));

    let event = |hour| make_event("A", "u", "x").with_timestamp(at(hour));
    assert!(filter.matches(&event(8)));
    assert!(filter.matches(&event(9)));
    assert!(filter.matches(&event(10)));
    assert!(!filter.matches(&event(7)));
    assert!(!filter.matches(&event(11)));
}

#[test]
fn test_severity_filter_case_insensitive() {
    let filter = AuditFilter::new("sev").with_severities(["HIGH", "critical"]);

    assert!(filter.matches(&make_event("A", "u", "x").with_severity("high")));
    assert!(filter.matches(&make_event("A", "u", "x").with_metadata("severity", "Critical")));
    assert!(!filter.matches(&make_event("A", "u", "x").with_severity("low")));
    // no severity at all cannot satisfy a severity constraint
    assert!(!filter.matches(&make_event("A", "u", "x")));
}

#[test]
fn test_custom_constraints() {
    let filter = AuditFilter::new("custom")
        .with_custom("region", "eu")
        .with_custom("campaign", "spring");

    let event = make_event("A", "u", "x")
        .with_metadata("region", "eu")
        .with_metadata("campaign", "spring")
        .with_metadata("extra", "ignored");
    assert!(filter.matches(&event));

    let missing = make_event("A", "u", "x").with_metadata("region", "eu");
    assert!(!filter.matches(&missing));

    let different = make_event("A", "u", "x")
        .with_metadata("region", "us")
        .with_metadata("campaign", "spring");
    assert!(!filter.matches(&different));
}

#[test]
fn test_all_criteria_are_anded() {
    let filter = AuditFilter::new("combined")
        .with_event_types(["A"])
        .with_actors(["u1"])
        .with_custom("region", "eu");

    let good = make_event("A", "u1", "x").with_metadata("region", "eu");
    assert!(filter.matches(&good));

    let wrong_type = make_event("B", "u1", "x").with_metadata("region", "eu");
    assert!(!filter.matches(&wrong_type));
}

// ============================================================================
// Validation
// ============================================================================

#[test]
fn test_validate_empty_name() {
    let err = AuditFilter::new("  ").validate().unwrap_err();
    assert!(matches!(err, StreamError::Validation(_)));
}

#[test]
fn test_validate_inverted_window() {
    let err = AuditFilter::new("bad")
        .with_time_range(at(10), at(8))
        .validate()
        .unwrap_err();
    assert!(err.to_string().contains("after end"));
}

#[test]
fn test_validate_single_instant_window() {
    assert!(
        AuditFilter::new("instant")
            .with_time_range(at(9), at(9))
            .validate()
            .is_ok()
    );
}

// ============================================================================
// FilterSet
// ============================================================================

#[test]
fn test_empty_set_passes_everything() {
    let set = FilterSet::new();
    assert!(set.matches(&make_event("A", "u", "x")));
    assert!(set.matches(&make_event("Z", "v", "y")));
}

#[test]
fn test_set_with_only_disabled_filters_passes_everything() {
    let mut set = FilterSet::new();
    set.add(AuditFilter::new("off").with_event_types(["A"]).enabled(false), 5)
        .unwrap();

    assert!(set.matches(&make_event("B", "u", "x")));
}

#[test]
fn test_set_ors_enabled_filters() {
    let mut set = FilterSet::new();
    set.add(AuditFilter::new("a").with_event_types(["A"]), 5).unwrap();
    set.add(AuditFilter::new("b").with_event_types(["B"]), 5).unwrap();

    assert!(set.matches(&make_event("A", "u", "x")));
    assert!(set.matches(&make_event("B", "u", "x")));
    assert!(!set.matches(&make_event("C", "u", "x")));
}

#[test]
fn test_disabled_filter_does_not_widen_set() {
    let mut set = FilterSet::new();
    set.add(AuditFilter::new("a").with_event_types(["A"]), 5).unwrap();
    set.add(AuditFilter::new("b").with_event_types(["B"]).enabled(false), 5)
        .unwrap();

    assert!(!set.matches(&make_event("B", "u", "x")));
}

#[test]
fn test_add_respects_cap() {
    let mut set = FilterSet::new();
    let max = 3;

    for i in 0..max {
        set.add(AuditFilter::new(format!("f{i}")), max).unwrap();
    }
    let err = set.add(AuditFilter::new("one-too-many"), max).unwrap_err();

    assert!(matches!(
        err,
        StreamError::CapacityExceeded {
            resource: Resource::Filters,
            max: 3
        }
    ));
    assert_eq!(set.len(), max);
}

#[test]
fn test_add_same_name_replaces() {
    let mut set = FilterSet::new();
    set.add(AuditFilter::new("f").with_event_types(["A"]), 1).unwrap();

    // full, but replacing is still allowed
    let change = set.add(AuditFilter::new("f").with_event_types(["B"]), 1).unwrap();
    assert_eq!(change, FilterChange::Replaced);
    assert_eq!(set.len(), 1);
    assert!(set.matches(&make_event("B", "u", "x")));
    assert!(!set.matches(&make_event("A", "u", "x")));
}

#[test]
fn test_add_invalid_filter_rejected() {
    let mut set = FilterSet::new();
    assert!(set.add(AuditFilter::new(""), 5).is_err());
    assert!(set.is_empty());
}

#[test]
fn test_remove() {
    let mut set = FilterSet::new();
    set.add(AuditFilter::new("a"), 5).unwrap();
    set.add(AuditFilter::new("b"), 5).unwrap();

    let removed = set.remove("a").unwrap();
    assert_eq!(removed.name, "a");
    assert_eq!(set.names(), vec!["b"]);
}

#[test]
fn test_remove_not_found() {
    let mut set = FilterSet::new();
    let err = set.remove("ghost").unwrap_err();
    assert!(matches!(err, StreamError::FilterNotFound { ref name } if name == "ghost"));
}

// ============================================================================
// Wire format
// ============================================================================

#[test]
fn test_deserialize_wire_filter() {
    let json = r#"{
        "name": "eu-consent",
        "event_types": ["consent.granted"],
        "actors": [],
        "entities": ["lead"],
        "time_range": {"start": "2024-06-01T08:00:00Z", "end": "2024-06-01T10:00:00Z"},
        "severity": ["high"],
        "custom": {"region": "eu"},
        "is_enabled": true
    }"#;
    let filter: AuditFilter = serde_json::from_str(json).unwrap();

    assert_eq!(filter.name, "eu-consent");
    assert!(filter.actors.is_empty());
    assert_eq!(filter.time_range, Some(TimeRange::new(at(8), at(10))));
    assert_eq!(filter.custom.get("region").unwrap(), "eu");
}

#[test]
fn test_deserialize_defaults_enabled() {
    let filter: AuditFilter = serde_json::from_str(r#"{"name": "minimal"}"#).unwrap();
    assert!(filter.is_enabled);
    assert!(filter.event_types.is_empty());
}
