//! In-memory deterministic record store.

use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use studyalloc_store::AuditEvent;
use studyalloc_store::ConditionalWriteRequest;
use studyalloc_store::EventId;
use studyalloc_store::ProjectId;
use studyalloc_store::QueryRequest;
use studyalloc_store::ReadFieldsRequest;
use studyalloc_store::RecordData;
use studyalloc_store::RecordKey;
use studyalloc_store::RecordStore;
use studyalloc_store::Row;
use studyalloc_store::StoreError;
use studyalloc_store::WriteCondition;
use studyalloc_store::WriteFieldsRequest;
use studyalloc_store::WriteFieldsResult;
use tokio::sync::Barrier;
use tokio::sync::Mutex;
use tracing::trace;

type Fields = BTreeMap<String, String>;
type ProjectData = BTreeMap<RecordKey, BTreeMap<EventId, Fields>>;

/// Serializable contents of a [`DeterministicRecordStore`].
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreSnapshot {
    #[serde(default)]
    pub projects: BTreeMap<ProjectId, ProjectData>,
    #[serde(default)]
    pub audit_log: Vec<AuditEvent>,
}

/// Barrier shared by the next `remaining` queries.
struct QueryGate {
    barrier: Arc<Barrier>,
    remaining: usize,
}

/// A deterministic in-memory record store for testing.
///
/// Conditional writes evaluate their conditions and apply their writes under
/// one lock, so they are atomic with respect to every other operation.
/// Plain writes and queries are individually atomic but a query followed by a
/// write is not, which is what lets tests reproduce lost-update races.
pub struct DeterministicRecordStore {
    projects: Mutex<BTreeMap<ProjectId, ProjectData>>,
    audit_log: Mutex<Vec<AuditEvent>>,
    rejected_fields: Mutex<BTreeSet<String>>,
    query_gate: Mutex<Option<QueryGate>>,
    unavailable: AtomicBool,
    field_writes: AtomicU64,
    queries: AtomicU64,
}

impl Default for DeterministicRecordStore {
    fn default() -> Self {
        Self::new_inner(StoreSnapshot::default())
    }
}

impl DeterministicRecordStore {
    /// Create an empty store wrapped in `Arc`.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create a store pre-populated from a snapshot.
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Arc<Self> {
        Arc::new(Self::new_inner(snapshot))
    }

    fn new_inner(snapshot: StoreSnapshot) -> Self {
        Self {
            projects: Mutex::new(snapshot.projects),
            audit_log: Mutex::new(snapshot.audit_log),
            rejected_fields: Mutex::new(BTreeSet::new()),
            query_gate: Mutex::new(None),
            unavailable: AtomicBool::new(false),
            field_writes: AtomicU64::new(0),
            queries: AtomicU64::new(0),
        }
    }

    /// Current contents, including the audit log.
    pub async fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot {
            projects: self.projects.lock().await.clone(),
            audit_log: self.audit_log.lock().await.clone(),
        }
    }

    /// Register an empty project so queries against it succeed.
    pub async fn create_project(&self, project: ProjectId) {
        self.projects.lock().await.entry(project).or_default();
    }

    /// Set one field directly, bypassing counters and failure injection.
    pub async fn set_value(
        &self,
        project: ProjectId,
        record: impl Into<RecordKey>,
        event: EventId,
        field: &str,
        value: &str,
    ) {
        let mut projects = self.projects.lock().await;
        projects
            .entry(project)
            .or_default()
            .entry(record.into())
            .or_default()
            .entry(event)
            .or_default()
            .insert(field.to_string(), value.to_string());
    }

    /// Insert or extend a (record, event) row with several fields.
    pub async fn insert_row(&self, project: ProjectId, record: impl Into<RecordKey>, event: EventId, pairs: &[(&str, &str)]) {
        let mut projects = self.projects.lock().await;
        let fields = projects
            .entry(project)
            .or_default()
            .entry(record.into())
            .or_default()
            .entry(event)
            .or_default();
        for (field, value) in pairs {
            fields.insert(field.to_string(), value.to_string());
        }
    }

    /// Stored value of a field, `""` when absent.
    pub async fn value(&self, project: ProjectId, record: impl Into<RecordKey>, event: EventId, field: &str) -> String {
        let projects = self.projects.lock().await;
        projects
            .get(&project)
            .and_then(|records| records.get(&record.into()))
            .and_then(|events| events.get(&event))
            .and_then(|fields| fields.get(field))
            .cloned()
            .unwrap_or_default()
    }

    /// Records whose `field` at `event` equals `value`.
    pub async fn records_with_value(&self, project: ProjectId, event: EventId, field: &str, value: &str) -> Vec<RecordKey> {
        let projects = self.projects.lock().await;
        let Some(records) = projects.get(&project) else {
            return Vec::new();
        };
        records
            .iter()
            .filter(|(_, events)| {
                events.get(&event).and_then(|fields| fields.get(field)).map(String::as_str) == Some(value)
            })
            .map(|(record, _)| record.clone())
            .collect()
    }

    /// Number of individual field writes applied through the trait.
    pub fn write_count(&self) -> u64 {
        self.field_writes.load(Ordering::SeqCst)
    }

    /// Number of queries served through the trait.
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    pub async fn audit_events(&self) -> Vec<AuditEvent> {
        self.audit_log.lock().await.clone()
    }

    /// Reject every subsequent write to `field` with a per-write error.
    pub async fn reject_writes_to(&self, field: &str) {
        self.rejected_fields.lock().await.insert(field.to_string());
    }

    /// Make every trait call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Hold the next `count` queries at a barrier after they have taken their
    /// snapshot, so all of them observe the same state before any caller can
    /// act on the result.
    pub async fn gate_next_queries(&self, count: usize) {
        let mut gate = self.query_gate.lock().await;
        *gate = if count == 0 {
            None
        } else {
            Some(QueryGate {
                barrier: Arc::new(Barrier::new(count)),
                remaining: count,
            })
        };
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "deterministic store marked unavailable".into(),
            });
        }
        Ok(())
    }

    async fn take_gate(&self) -> Option<Arc<Barrier>> {
        let mut gate = self.query_gate.lock().await;
        let current = gate.as_mut()?;
        let barrier = current.barrier.clone();
        current.remaining -= 1;
        if current.remaining == 0 {
            *gate = None;
        }
        Some(barrier)
    }

    fn rejection(record: &RecordKey, event: EventId, field: &str) -> String {
        format!("{record},{event},{field}: write rejected by store")
    }
}

fn evaluate_conditions(records: &ProjectData, request: &ConditionalWriteRequest) -> Result<(), StoreError> {
    let current = records.get(&request.record).and_then(|events| events.get(&request.event));
    let current_value = |field: &str| current.and_then(|fields| fields.get(field)).map(String::as_str).unwrap_or("");

    for condition in &request.conditions {
        match condition {
            WriteCondition::FieldEquals { field, expected } => {
                let actual = current_value(field);
                let matches = if expected.is_empty() {
                    studyalloc_store::is_empty_value(actual)
                } else {
                    actual == expected
                };
                if !matches {
                    return Err(StoreError::ConditionFailed {
                        record: request.record.clone(),
                        field: field.clone(),
                        expected: expected.clone(),
                        actual: actual.to_string(),
                    });
                }
            }
            WriteCondition::UniqueValue { field } => {
                let Some((_, new_value)) = request.writes.iter().find(|(name, _)| name == field) else {
                    continue;
                };
                let holder = records.iter().find(|(record, events)| {
                    *record != &request.record
                        && events.get(&request.event).and_then(|fields| fields.get(field)) == Some(new_value)
                });
                if let Some((holder, _)) = holder {
                    return Err(StoreError::DuplicateValue {
                        field: field.clone(),
                        value: new_value.clone(),
                        holder: holder.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[async_trait]
impl RecordStore for DeterministicRecordStore {
    async fn read_fields(&self, request: ReadFieldsRequest) -> Result<RecordData, StoreError> {
        self.check_available()?;
        let projects = self.projects.lock().await;
        let records = projects.get(&request.project).ok_or(StoreError::NotFound {
            project: request.project,
        })?;

        let mut data = RecordData::default();
        if let Some(events) = records.get(&request.record) {
            for event in &request.events {
                let Some(fields) = events.get(event) else { continue };
                let selected: Fields = fields
                    .iter()
                    .filter(|(name, _)| request.fields.is_empty() || request.fields.contains(name))
                    .map(|(name, value)| (name.clone(), value.clone()))
                    .collect();
                data.events.insert(*event, selected);
            }
        }
        Ok(data)
    }

    async fn write_fields(&self, request: WriteFieldsRequest) -> Result<WriteFieldsResult, StoreError> {
        self.check_available()?;
        let rejected = self.rejected_fields.lock().await.clone();
        let mut projects = self.projects.lock().await;
        let records = projects.get_mut(&request.project).ok_or(StoreError::NotFound {
            project: request.project,
        })?;

        let mut result = WriteFieldsResult::default();
        for write in request.writes {
            if rejected.contains(&write.field) {
                result.errors.push(Self::rejection(&write.record, write.event, &write.field));
                continue;
            }
            records
                .entry(write.record)
                .or_default()
                .entry(write.event)
                .or_default()
                .insert(write.field, write.value);
            result.written += 1;
            self.field_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(result)
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<Row>, StoreError> {
        self.check_available()?;
        self.queries.fetch_add(1, Ordering::SeqCst);

        let rows = {
            let projects = self.projects.lock().await;
            let records = projects.get(&request.project).ok_or(StoreError::NotFound {
                project: request.project,
            })?;

            let limit = request.limit.map(|l| l as usize).unwrap_or(usize::MAX);
            let mut rows = Vec::new();
            'records: for (record, events) in records {
                for (event, fields) in events {
                    if request.event.is_some_and(|wanted| wanted != *event) {
                        continue;
                    }
                    if !request.filter.matches(fields) {
                        continue;
                    }
                    let selected: Fields = fields
                        .iter()
                        .filter(|(name, _)| request.fields.is_empty() || request.fields.contains(name))
                        .map(|(name, value)| (name.clone(), value.clone()))
                        .collect();
                    rows.push(Row {
                        record: record.clone(),
                        event: *event,
                        fields: selected,
                    });
                    if rows.len() >= limit {
                        break 'records;
                    }
                }
            }
            rows
        };

        if let Some(barrier) = self.take_gate().await {
            trace!(project = %request.project, rows = rows.len(), "query waiting at gate");
            barrier.wait().await;
        }
        Ok(rows)
    }

    async fn conditional_write(&self, request: ConditionalWriteRequest) -> Result<WriteFieldsResult, StoreError> {
        self.check_available()?;
        let rejected = self.rejected_fields.lock().await.clone();
        let mut projects = self.projects.lock().await;
        let records = projects.get_mut(&request.project).ok_or(StoreError::NotFound {
            project: request.project,
        })?;

        evaluate_conditions(records, &request)?;

        let errors: Vec<String> = request
            .writes
            .iter()
            .filter(|(field, _)| rejected.contains(field))
            .map(|(field, _)| Self::rejection(&request.record, request.event, field))
            .collect();
        if !errors.is_empty() {
            return Ok(WriteFieldsResult { written: 0, errors });
        }

        let fields = records.entry(request.record).or_default().entry(request.event).or_default();
        let mut written = 0u32;
        for (field, value) in request.writes {
            fields.insert(field, value);
            written += 1;
        }
        self.field_writes.fetch_add(u64::from(written), Ordering::SeqCst);
        Ok(WriteFieldsResult {
            written,
            errors: Vec::new(),
        })
    }

    async fn log_event(&self, event: AuditEvent) -> Result<(), StoreError> {
        self.check_available()?;
        self.audit_log.lock().await.push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use studyalloc_store::FieldWrite;
    use studyalloc_store::Filter;

    use super::*;

    const P: ProjectId = ProjectId(1);
    const E: EventId = EventId(10);

    #[tokio::test]
    async fn test_write_then_read() {
        let store = DeterministicRecordStore::new();
        store.create_project(P).await;

        let result = store
            .write_fields(WriteFieldsRequest {
                project: P,
                writes: vec![FieldWrite {
                    record: RecordKey::from("1"),
                    event: E,
                    field: "study_id".into(),
                    value: "R-001".into(),
                }],
            })
            .await
            .unwrap();
        assert!(result.is_ok());
        assert_eq!(store.write_count(), 1);

        let data = store
            .read_fields(ReadFieldsRequest::single(P, RecordKey::from("1"), "study_id", E))
            .await
            .unwrap();
        assert_eq!(data.value(E, "study_id"), "R-001");
    }

    #[tokio::test]
    async fn test_unknown_project() {
        let store = DeterministicRecordStore::new();
        let err = store
            .read_fields(ReadFieldsRequest::single(ProjectId(9), RecordKey::from("1"), "f", E))
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::NotFound { project: ProjectId(9) });
    }

    #[tokio::test]
    async fn test_field_equals_condition() {
        let store = DeterministicRecordStore::new();
        store.set_value(P, "1", E, "used_by", "").await;

        let claim = ConditionalWriteRequest {
            project: P,
            record: RecordKey::from("1"),
            event: E,
            conditions: vec![WriteCondition::FieldEquals {
                field: "used_by".into(),
                expected: String::new(),
            }],
            writes: vec![("used_by".into(), "rec-a".into())],
        };
        store.conditional_write(claim.clone()).await.unwrap();

        let mut second = claim;
        second.writes = vec![("used_by".into(), "rec-b".into())];
        let err = store.conditional_write(second).await.unwrap_err();
        assert!(matches!(err, StoreError::ConditionFailed { ref actual, .. } if actual == "rec-a"));
        assert_eq!(store.value(P, "1", E, "used_by").await, "rec-a");
    }

    #[tokio::test]
    async fn test_unique_value_condition() {
        let store = DeterministicRecordStore::new();
        store.set_value(P, "1", E, "study_id", "R-001").await;

        let err = store
            .conditional_write(ConditionalWriteRequest {
                project: P,
                record: RecordKey::from("2"),
                event: E,
                conditions: vec![WriteCondition::UniqueValue {
                    field: "study_id".into(),
                }],
                writes: vec![("study_id".into(), "R-001".into())],
            })
            .await
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateValue {
            field: "study_id".into(),
            value: "R-001".into(),
            holder: RecordKey::from("1"),
        });
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_conditional_write_is_all_or_nothing() {
        let store = DeterministicRecordStore::new();
        store.create_project(P).await;
        store.reject_writes_to("status").await;

        let result = store
            .conditional_write(ConditionalWriteRequest {
                project: P,
                record: RecordKey::from("1"),
                event: E,
                conditions: vec![],
                writes: vec![("used_by".into(), "x".into()), ("status".into(), "2".into())],
            })
            .await
            .unwrap();
        assert_eq!(result.errors.len(), 1);
        assert_eq!(store.value(P, "1", E, "used_by").await, "");
    }

    #[tokio::test]
    async fn test_query_filter_and_limit() {
        let store = DeterministicRecordStore::new();
        store.insert_row(P, "a", E, &[("group", "1"), ("used_by", "")]).await;
        store.insert_row(P, "b", E, &[("group", "1"), ("used_by", "7")]).await;
        store.insert_row(P, "c", E, &[("group", "2")]).await;
        store.insert_row(P, "d", E, &[("group", "1")]).await;

        let rows = store
            .query(QueryRequest {
                project: P,
                event: None,
                fields: vec![],
                filter: Filter::unset("used_by").and(Filter::equals("group", "1")),
                limit: Some(1),
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].record, RecordKey::from("a"));
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn test_query_gate_releases_together() {
        let store = DeterministicRecordStore::new();
        store.create_project(P).await;
        store.gate_next_queries(3).await;

        let handles: Vec<_> = (0..3)
            .map(|_| {
                let s = store.clone();
                tokio::spawn(async move {
                    s.query(QueryRequest {
                        project: P,
                        event: None,
                        fields: vec![],
                        filter: Filter::All,
                        limit: None,
                    })
                    .await
                })
            })
            .collect();
        for h in handles {
            assert!(h.await.unwrap().is_ok());
        }

        // Gate is consumed; a fourth query does not block.
        store
            .query(QueryRequest {
                project: P,
                event: None,
                fields: vec![],
                filter: Filter::All,
                limit: None,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_snapshot_round_trip() {
        let store = DeterministicRecordStore::new();
        store.set_value(P, "1", E, "f", "v").await;
        let json = serde_json::to_string(&store.snapshot().await).unwrap();
        let restored = DeterministicRecordStore::from_snapshot(serde_json::from_str(&json).unwrap());
        assert_eq!(restored.value(P, "1", E, "f").await, "v");
    }
}
