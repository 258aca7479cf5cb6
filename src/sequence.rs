//! Sequential identifier allocator.
//!
//! Assigns `prefix + zero-padded number` identifiers, where the prefix
//! embeds the record's site code. The next number is one past the largest
//! valid number currently stored in the namespace.
//!
//! # Concurrency
//!
//! The scan that computes the candidate is not atomic with the write, so
//! the candidate is written with a conditional write that requires both
//! that the record's own field is still empty and that no other record in
//! the project holds the candidate. A lost race rescans and retries with
//! exponential backoff, bounded by [`RetryPolicy::max_retries`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use snafu::ResultExt;
use studyalloc_store::ConditionalWriteRequest;
use studyalloc_store::EventId;
use studyalloc_store::Filter;
use studyalloc_store::GroupDirectory;
use studyalloc_store::GroupId;
use studyalloc_store::ProjectId;
use studyalloc_store::QueryRequest;
use studyalloc_store::ReadFieldsRequest;
use studyalloc_store::RecordStore;
use studyalloc_store::StoreError;
use studyalloc_store::WriteCondition;
use studyalloc_store::is_empty_value;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::audit;
use crate::config::RetryPolicy;
use crate::error::AllocationError;
use crate::error::ReadSnafu;
use crate::gate::EligibleRecord;
use crate::sites::SiteCodes;
use crate::verified::build_prefix;
use crate::verified::compute_backoff_ms;
use crate::verified::compute_next_value;
use crate::verified::format_identifier;
use crate::verified::scan_max;

/// Identifier allocator settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceConfig {
    pub field: String,
    pub event: EventId,
    pub base_prefix: String,
    pub separator: String,
    pub padding: u32,
    pub retry: RetryPolicy,
}

/// One allocation sequence: identifiers in `field` at `event` that start
/// with `prefix`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Namespace {
    pub prefix: String,
    pub field: String,
    pub event: EventId,
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:'{}'", self.field, self.event, self.prefix)
    }
}

/// Successful result of [`SequentialIdAllocator::allocate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum IdentifierOutcome {
    /// A new identifier was written to the record.
    Assigned { identifier: String },
    /// The record already held an identifier; nothing was written.
    AlreadyAssigned { existing: String },
}

pub struct SequentialIdAllocator<S: RecordStore + ?Sized, D: GroupDirectory + ?Sized> {
    store: Arc<S>,
    directory: Arc<D>,
    config: SequenceConfig,
}

impl<S: RecordStore + ?Sized, D: GroupDirectory + ?Sized> SequentialIdAllocator<S, D> {
    pub fn new(store: Arc<S>, directory: Arc<D>, config: SequenceConfig) -> Self {
        Self {
            store,
            directory,
            config,
        }
    }

    /// Allocate an identifier for `eligible`, namespaced by `group`'s site code.
    pub async fn allocate(
        &self,
        eligible: &EligibleRecord,
        group: Option<GroupId>,
    ) -> Result<IdentifierOutcome, AllocationError> {
        if let Some(existing) = self.current_value(eligible).await? {
            debug!(record = %eligible.record, %existing, "study id already assigned");
            return Ok(IdentifierOutcome::AlreadyAssigned { existing });
        }

        let namespace = match self.namespace_for(eligible.project, group).await {
            Ok(namespace) => namespace,
            Err(err @ AllocationError::UnresolvedGroup { .. }) => {
                audit::emit(
                    &*self.store,
                    eligible.project,
                    &eligible.record,
                    "Unable to get a valid site code",
                    err.to_string(),
                )
                .await;
                return Err(err);
            }
            Err(err) => return Err(err),
        };

        let mut attempt = 0u32;
        loop {
            let candidate = self.next_candidate(eligible.project, &namespace).await?;

            match self.write_candidate(eligible, &candidate).await {
                Ok(()) => {
                    info!(record = %eligible.record, %namespace, identifier = %candidate, "assigned study id");
                    return Ok(IdentifierOutcome::Assigned { identifier: candidate });
                }
                Err(WriteConflict::RecordChanged { actual }) => {
                    debug!(record = %eligible.record, existing = %actual, "study id assigned concurrently");
                    return Ok(IdentifierOutcome::AlreadyAssigned { existing: actual });
                }
                Err(WriteConflict::Duplicate { holder }) => {
                    attempt += 1;
                    if attempt >= self.config.retry.max_retries {
                        return Err(AllocationError::MaxRetriesExceeded {
                            operation: format!("study id allocation in {namespace}"),
                            attempts: attempt,
                        });
                    }
                    let backoff_ms = compute_backoff_ms(
                        attempt,
                        self.config.retry.initial_backoff_ms,
                        self.config.retry.max_backoff_ms,
                    );
                    debug!(
                        record = %eligible.record,
                        %candidate,
                        %holder,
                        attempt,
                        backoff_ms,
                        "study id candidate taken, rescanning"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                Err(WriteConflict::Failed(err)) => return Err(err),
            }
        }
    }

    /// Resolve the namespace for a save under `group`.
    ///
    /// A group whose name carries no site code fails with
    /// [`AllocationError::UnresolvedGroup`] rather than falling back to the
    /// ungrouped namespace.
    pub async fn namespace_for(&self, project: ProjectId, group: Option<GroupId>) -> Result<Namespace, AllocationError> {
        let site_code = match group {
            None => None,
            Some(group) => {
                let codes = SiteCodes::load(&*self.directory, project).await?;
                match codes.resolve(group) {
                    Some(code) => Some(code),
                    None => {
                        warn!(%project, %group, "unable to get a valid site code");
                        return Err(AllocationError::UnresolvedGroup { group });
                    }
                }
            }
        };

        Ok(Namespace {
            prefix: build_prefix(&self.config.base_prefix, site_code, &self.config.separator),
            field: self.config.field.clone(),
            event: self.config.event,
        })
    }

    /// Compute the next unused identifier in `namespace` from a fresh scan.
    pub async fn next_candidate(&self, project: ProjectId, namespace: &Namespace) -> Result<String, AllocationError> {
        let rows = self
            .store
            .query(QueryRequest {
                project,
                event: Some(namespace.event),
                fields: vec![namespace.field.clone()],
                filter: Filter::starts_with(namespace.field.clone(), namespace.prefix.clone()),
                limit: None,
            })
            .await
            .context(ReadSnafu {
                what: format!("identifiers in {namespace}"),
            })?;

        let summary = scan_max(rows.iter().map(|row| row.value(&namespace.field)), &namespace.prefix);
        for skipped in &summary.skipped {
            warn!(%namespace, value = %skipped, "skipping non-numeric identifier");
        }
        debug!(
            %namespace,
            rows = rows.len(),
            counted = summary.counted,
            skipped = summary.skipped.len(),
            max = summary.max,
            "scanned namespace"
        );

        let next = compute_next_value(summary.max).ok_or_else(|| AllocationError::SequenceExhausted {
            prefix: namespace.prefix.clone(),
        })?;
        Ok(format_identifier(&namespace.prefix, next, self.config.padding))
    }

    async fn current_value(&self, eligible: &EligibleRecord) -> Result<Option<String>, AllocationError> {
        let data = self
            .store
            .read_fields(ReadFieldsRequest::single(
                eligible.project,
                eligible.record.clone(),
                self.config.field.clone(),
                self.config.event,
            ))
            .await
            .context(ReadSnafu {
                what: format!("study id field '{}'", self.config.field),
            })?;
        let value = data.value(self.config.event, &self.config.field);
        Ok((!is_empty_value(value)).then(|| value.to_string()))
    }

    async fn write_candidate(&self, eligible: &EligibleRecord, candidate: &str) -> Result<(), WriteConflict> {
        let request = ConditionalWriteRequest {
            project: eligible.project,
            record: eligible.record.clone(),
            event: self.config.event,
            conditions: vec![
                WriteCondition::FieldEquals {
                    field: self.config.field.clone(),
                    expected: String::new(),
                },
                WriteCondition::UniqueValue {
                    field: self.config.field.clone(),
                },
            ],
            writes: vec![(self.config.field.clone(), candidate.to_string())],
        };

        match self.store.conditional_write(request).await {
            Ok(result) if result.is_ok() => Ok(()),
            Ok(result) => {
                warn!(record = %eligible.record, %candidate, errors = ?result.errors, "unable to save new study id");
                Err(WriteConflict::Failed(AllocationError::WriteRejected {
                    what: format!("study id '{candidate}'"),
                    errors: result.errors,
                }))
            }
            Err(StoreError::ConditionFailed { actual, .. }) => Err(WriteConflict::RecordChanged { actual }),
            Err(StoreError::DuplicateValue { holder, .. }) => Err(WriteConflict::Duplicate {
                holder: holder.to_string(),
            }),
            Err(source) => Err(WriteConflict::Failed(AllocationError::Write {
                what: format!("study id '{candidate}'"),
                source,
            })),
        }
    }
}

/// Why a candidate write did not land.
enum WriteConflict {
    /// The record's own field was filled by a concurrent save.
    RecordChanged { actual: String },
    /// Another record holds the candidate.
    Duplicate { holder: String },
    Failed(AllocationError),
}

#[cfg(test)]
mod tests {
    use studyalloc_store::RecordKey;
    use studyalloc_testing::DeterministicRecordStore;
    use studyalloc_testing::StaticGroupDirectory;

    use super::*;

    const P: ProjectId = ProjectId(1);
    const E: EventId = EventId(41);

    fn config() -> SequenceConfig {
        SequenceConfig {
            field: "study_id".into(),
            event: E,
            base_prefix: "R".into(),
            separator: "-".into(),
            padding: 3,
            retry: RetryPolicy::default(),
        }
    }

    fn eligible(record: &str) -> EligibleRecord {
        EligibleRecord {
            project: P,
            record: RecordKey::from(record),
            trigger_value: "1".into(),
        }
    }

    fn allocator(
        store: Arc<DeterministicRecordStore>,
        directory: StaticGroupDirectory,
    ) -> SequentialIdAllocator<DeterministicRecordStore, StaticGroupDirectory> {
        SequentialIdAllocator::new(store, Arc::new(directory), config())
    }

    #[tokio::test]
    async fn test_first_identifier() {
        let store = DeterministicRecordStore::new();
        store.create_project(P).await;
        let alloc = allocator(store.clone(), StaticGroupDirectory::new());

        let outcome = alloc.allocate(&eligible("1"), None).await.unwrap();
        assert_eq!(outcome, IdentifierOutcome::Assigned {
            identifier: "R-001".into()
        });
        assert_eq!(store.value(P, "1", E, "study_id").await, "R-001");
    }

    #[tokio::test]
    async fn test_next_after_max_skipping_malformed() {
        let store = DeterministicRecordStore::new();
        store.set_value(P, "a", E, "study_id", "R-001").await;
        store.set_value(P, "b", E, "study_id", "R-003").await;
        store.set_value(P, "c", E, "study_id", "R-abc").await;
        let alloc = allocator(store.clone(), StaticGroupDirectory::new());

        let outcome = alloc.allocate(&eligible("d"), None).await.unwrap();
        assert_eq!(outcome, IdentifierOutcome::Assigned {
            identifier: "R-004".into()
        });
    }

    #[tokio::test]
    async fn test_site_namespace() {
        let store = DeterministicRecordStore::new();
        store.set_value(P, "a", E, "study_id", "R5-002").await;
        store.set_value(P, "b", E, "study_id", "R-009").await;
        let directory = StaticGroupDirectory::new().with_group(P, GroupId(30), "05_duke");
        let alloc = allocator(store.clone(), directory);

        let namespace = alloc.namespace_for(P, Some(GroupId(30))).await.unwrap();
        assert_eq!(namespace.prefix, "R5-");

        let outcome = alloc.allocate(&eligible("c"), Some(GroupId(30))).await.unwrap();
        assert_eq!(outcome, IdentifierOutcome::Assigned {
            identifier: "R5-003".into()
        });
    }

    #[tokio::test]
    async fn test_already_assigned_is_noop() {
        let store = DeterministicRecordStore::new();
        store.set_value(P, "1", E, "study_id", "R-042").await;
        let alloc = allocator(store.clone(), StaticGroupDirectory::new());

        let outcome = alloc.allocate(&eligible("1"), None).await.unwrap();
        assert_eq!(outcome, IdentifierOutcome::AlreadyAssigned {
            existing: "R-042".into()
        });
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.query_count(), 0);
    }

    #[tokio::test]
    async fn test_unresolved_group_fails_closed() {
        let store = DeterministicRecordStore::new();
        store.create_project(P).await;
        let directory = StaticGroupDirectory::new().with_group(P, GroupId(30), "coordinating_center");
        let alloc = allocator(store.clone(), directory);

        let err = alloc.allocate(&eligible("1"), Some(GroupId(30))).await.unwrap_err();
        assert!(matches!(err, AllocationError::UnresolvedGroup { group } if group == GroupId(30)));
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.value(P, "1", E, "study_id").await, "");
        assert_eq!(store.audit_events().await.len(), 1);
    }

    #[tokio::test]
    async fn test_write_rejected() {
        let store = DeterministicRecordStore::new();
        store.create_project(P).await;
        store.reject_writes_to("study_id").await;
        let alloc = allocator(store.clone(), StaticGroupDirectory::new());

        let err = alloc.allocate(&eligible("1"), None).await.unwrap_err();
        assert!(matches!(err, AllocationError::WriteRejected { .. }));
        assert_eq!(store.value(P, "1", E, "study_id").await, "");
    }

    #[tokio::test]
    async fn test_sequence_exhausted() {
        let store = DeterministicRecordStore::new();
        store.set_value(P, "a", E, "study_id", &format!("R-{}", u64::MAX)).await;
        let alloc = allocator(store, StaticGroupDirectory::new());

        let err = alloc.allocate(&eligible("b"), None).await.unwrap_err();
        assert!(matches!(err, AllocationError::SequenceExhausted { .. }));
    }

    #[tokio::test]
    async fn test_grows_past_padding() {
        let store = DeterministicRecordStore::new();
        store.set_value(P, "a", E, "study_id", "R-999").await;
        let alloc = allocator(store, StaticGroupDirectory::new());

        let outcome = alloc.allocate(&eligible("b"), None).await.unwrap();
        assert_eq!(outcome, IdentifierOutcome::Assigned {
            identifier: "R-1000".into()
        });
    }

    #[tokio::test]
    async fn test_concurrent_allocations_are_unique() {
        let store = DeterministicRecordStore::new();
        store.create_project(P).await;
        let alloc = Arc::new(allocator(store.clone(), StaticGroupDirectory::new()));
        store.gate_next_queries(5).await;

        let handles: Vec<_> = (0..5)
            .map(|i| {
                let a = alloc.clone();
                tokio::spawn(async move { a.allocate(&eligible(&format!("rec-{i}")), None).await })
            })
            .collect();

        let mut ids = std::collections::BTreeSet::new();
        for h in handles {
            match h.await.unwrap().unwrap() {
                IdentifierOutcome::Assigned { identifier } => assert!(ids.insert(identifier)),
                other => panic!("unexpected outcome {other:?}"),
            }
        }
        let expected: std::collections::BTreeSet<String> = (1..=5).map(|n| format!("R-{n:03}")).collect();
        assert_eq!(ids, expected);
    }
}
