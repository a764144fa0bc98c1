//! Subscriber-defined event filters
//!
//! Each connection holds an ordered [`FilterSet`]. A filter is a named
//! interest profile; the set decides whether an event is forwarded.
//!
//! # Filter Logic
//!
//! - Empty criteria are wildcards
//! - Multiple values in one criterion are OR'd (match any)
//! - Different criteria in one filter are AND'd (must match all)
//! - Enabled filters in a set are OR'd; a set with no enabled filter passes everything
//!
//! # Example
//!
//! ```
//! use audit_stream::AuditFilter;
//!
//! // Consent changes made by two specific agents
//! let filter = AuditFilter::new("consent-watch")
//!     .with_event_types(["consent.granted", "consent.revoked"])
//!     .with_actors(["agent-1", "agent-2"]);
//! assert!(filter.validate().is_ok());
//! ```

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Resource, Result, StreamError};
use crate::event::AuditEvent;

/// Inclusive time window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    /// Create a window; validity is checked by [`AuditFilter::validate`]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    #[inline]
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at <= self.end
    }
}

/// A named conjunction of event criteria
///
/// Field names follow the `add_filter` wire format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    /// Unique within one connection
    pub name: String,
    /// Event types to match (empty = all)
    #[serde(default)]
    pub event_types: HashSet<String>,
    /// Actor IDs to match (empty = all)
    #[serde(default)]
    pub actors: HashSet<String>,
    /// Entity types to match (empty = all)
    #[serde(default)]
    pub entities: HashSet<String>,
    /// Inclusive timestamp window (None = any time)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_range: Option<TimeRange>,
    /// Severities to match, case-insensitive (empty = all)
    #[serde(default)]
    pub severity: HashSet<String>,
    /// Metadata entries that must be present and equal
    #[serde(default)]
    pub custom: HashMap<String, String>,
    /// Disabled filters are kept but never evaluated
    #[serde(default = "enabled_by_default")]
    pub is_enabled: bool,
}

fn enabled_by_default() -> bool {
    true
}

fn to_set<I, S>(values: I) -> HashSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.into_iter().map(Into::into).collect()
}

impl AuditFilter {
    /// Create an enabled filter with no criteria (matches everything)
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            event_types: HashSet::new(),
            actors: HashSet::new(),
            entities: HashSet::new(),
            time_range: None,
            severity: HashSet::new(),
            custom: HashMap::new(),
            is_enabled: true,
        }
    }

    pub fn with_event_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.event_types = to_set(types);
        self
    }

    pub fn with_actors<I, S>(mut self, actors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.actors = to_set(actors);
        self
    }

    pub fn with_entities<I, S>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.entities = to_set(entities);
        self
    }

    pub fn with_severities<I, S>(mut self, severities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.severity = to_set(severities);
        self
    }

    pub fn with_time_range(mut self, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        self.time_range = Some(TimeRange::new(start, end));
        self
    }

    pub fn with_custom(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom.insert(key.into(), value.into());
        self
    }

    pub fn enabled(mut self, enabled: bool) -> Self {
        self.is_enabled = enabled;
        self
    }

    /// Reject structurally invalid filters
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(StreamError::validation("filter name must not be empty"));
        }

        if let Some(range) = self.time_range
            && range.start > range.end
        {
            return Err(StreamError::validation(format!(
                "filter '{}': time_range start {} is after end {}",
                self.name, range.start, range.end
            )));
        }

        if self.custom.keys().any(|k| k.is_empty()) {
            return Err(StreamError::validation(format!(
                "filter '{}': custom keys must not be empty",
                self.name
            )));
        }

        Ok(())
    }

    /// Check whether every present criterion matches the event
    ///
    /// Ignores `is_enabled`; the set decides which filters take part.
    pub fn matches(&self, event: &AuditEvent) -> bool {
        if !self.event_types.is_empty() && !self.event_types.contains(&event.event_type) {
            return false;
        }

        if !self.actors.is_empty() && !self.actors.contains(&event.actor_id) {
            return false;
        }

        if !self.entities.is_empty() && !self.entities.contains(&event.entity_type) {
            return false;
        }

        if let Some(range) = self.time_range
            && !range.contains(event.timestamp)
        {
            return false;
        }

        if !self.severity.is_empty() {
            let Some(severity) = event.severity() else {
                return false;
            };
            if !self.severity.iter().any(|s| s.eq_ignore_ascii_case(severity)) {
                return false;
            }
        }

        self.custom
            .iter()
            .all(|(key, value)| event.metadata.get(key) == Some(value))
    }
}

/// Result of [`FilterSet::add`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterChange {
    /// A new name was appended
    Added,
    /// A filter with the same name was replaced in place
    Replaced,
}

/// Ordered filters of one connection
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    filters: Vec<AuditFilter>,
}

impl FilterSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a filter by name
    ///
    /// New names are rejected once `max` filters are held; replacing an
    /// existing name never counts against the cap.
    pub fn add(&mut self, filter: AuditFilter, max: usize) -> Result<FilterChange> {
        filter.validate()?;

        if let Some(existing) = self.filters.iter_mut().find(|f| f.name == filter.name) {
            *existing = filter;
            return Ok(FilterChange::Replaced);
        }

        if self.filters.len() >= max {
            return Err(StreamError::CapacityExceeded {
                resource: Resource::Filters,
                max,
            });
        }

        self.filters.push(filter);
        Ok(FilterChange::Added)
    }

    /// Remove a filter by name
    pub fn remove(&mut self, name: &str) -> Result<AuditFilter> {
        let index = self
            .filters
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| StreamError::FilterNotFound { name: name.into() })?;
        Ok(self.filters.remove(index))
    }

    /// Pass-through when no filter is enabled, otherwise any enabled filter must match
    pub fn matches(&self, event: &AuditEvent) -> bool {
        let mut enabled = self.filters.iter().filter(|f| f.is_enabled).peekable();
        if enabled.peek().is_none() {
            return true;
        }
        enabled.any(|f| f.matches(event))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.filters.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.filters.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuditFilter> {
        self.filters.iter()
    }

    /// Filter names in insertion order
    pub fn names(&self) -> Vec<&str> {
        self.filters.iter().map(|f| f.name.as_str()).collect()
    }

    /// Owned copy of the filters
    pub fn to_vec(&self) -> Vec<AuditFilter> {
        self.filters.clone()
    }
}

#[cfg(test)]
#[path = "filter_test.rs"]
mod tests;
