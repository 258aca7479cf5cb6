//! Request and response types for record store operations.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::filter::Filter;

/// Identifier of a project (a record namespace in the host store).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub u64);

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of an event (a point in a record's timeline).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a data access group (site).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Key of a record within a project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordKey(String);

impl RecordKey {
    /// Create a record key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for RecordKey {
    fn from(key: &str) -> Self {
        Self(key.to_string())
    }
}

impl From<String> for RecordKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Hosts store "unset" as an empty string; surrounding whitespace does not
/// make a value present.
#[inline]
pub fn is_empty_value(value: &str) -> bool {
    value.trim().is_empty()
}

/// Request to read some fields of one record across events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadFieldsRequest {
    pub project: ProjectId,
    pub record: RecordKey,
    pub fields: Vec<String>,
    pub events: Vec<EventId>,
}

impl ReadFieldsRequest {
    /// Read a single field at a single event.
    pub fn single(project: ProjectId, record: RecordKey, field: impl Into<String>, event: EventId) -> Self {
        Self {
            project,
            record,
            fields: vec![field.into()],
            events: vec![event],
        }
    }
}

/// Field values of one record, keyed by event then field name.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct RecordData {
    pub events: BTreeMap<EventId, BTreeMap<String, String>>,
}

impl RecordData {
    /// The stored value, or `""` when the field or event is absent.
    pub fn value(&self, event: EventId, field: &str) -> &str {
        self.events
            .get(&event)
            .and_then(|fields| fields.get(field))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// A single unconditional field write.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldWrite {
    pub record: RecordKey,
    pub event: EventId,
    pub field: String,
    pub value: String,
}

/// Request to apply unconditional field writes to a project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteFieldsRequest {
    pub project: ProjectId,
    pub writes: Vec<FieldWrite>,
}

/// Outcome of a write: how many fields landed and the per-write errors the
/// host reported for the rest.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct WriteFieldsResult {
    pub written: u32,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl WriteFieldsResult {
    /// True if the host reported no per-write errors.
    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Filtered query over a project's rows.
///
/// The filter is evaluated by the adapter, not by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryRequest {
    pub project: ProjectId,
    /// Restrict to one event. `None` returns matching rows from every event.
    pub event: Option<EventId>,
    /// Fields to include in each returned row.
    pub fields: Vec<String>,
    pub filter: Filter,
    /// Upper bound on returned rows.
    pub limit: Option<u32>,
}

/// One (record, event) row returned by a query.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Row {
    pub record: RecordKey,
    pub event: EventId,
    pub fields: BTreeMap<String, String>,
}

impl Row {
    /// The field value, or `""` when the row does not carry it.
    pub fn value(&self, field: &str) -> &str {
        self.fields.get(field).map(String::as_str).unwrap_or("")
    }
}

/// A precondition checked atomically with a [`ConditionalWriteRequest`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum WriteCondition {
    /// The target record's field currently equals `expected`.
    /// An empty `expected` matches an unset field.
    FieldEquals { field: String, expected: String },
    /// No other record in the project holds the value being written to
    /// `field` at the same event.
    UniqueValue { field: String },
}

/// Compare-and-set style write against one (record, event) row.
///
/// All conditions are evaluated and all writes applied as one atomic step;
/// when any condition fails nothing is written.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConditionalWriteRequest {
    pub project: ProjectId,
    pub record: RecordKey,
    pub event: EventId,
    pub conditions: Vec<WriteCondition>,
    pub writes: Vec<(String, String)>,
}

/// Operator-facing audit entry written to the host's project log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuditEvent {
    pub project: ProjectId,
    pub record: Option<RecordKey>,
    pub description: String,
    #[serde(default)]
    pub detail: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_data_missing_is_empty() {
        let mut data = RecordData::default();
        data.events
            .entry(EventId(1))
            .or_default()
            .insert("study_id".to_string(), "R-001".to_string());

        assert_eq!(data.value(EventId(1), "study_id"), "R-001");
        assert_eq!(data.value(EventId(1), "alias"), "");
        assert_eq!(data.value(EventId(2), "study_id"), "");
    }

    #[test]
    fn whitespace_is_empty() {
        assert!(is_empty_value(""));
        assert!(is_empty_value("  "));
        assert!(!is_empty_value(" 1 "));
    }

    #[test]
    fn record_key_serializes_transparently() {
        let json = serde_json::to_string(&RecordKey::from("101")).unwrap();
        assert_eq!(json, "\"101\"");
    }
}
