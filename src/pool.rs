//! Pool reservation engine.
//!
//! Reserves one unused alias code from a finite pool of pre-seeded entries
//! stored in a separate project, marks the entry as consumed by the
//! requesting record, then copies the code onto the record.
//!
//! # Concurrency
//!
//! An entry is claimed with one conditional write that requires its
//! claimed-by field to still be empty and no other entry to be claimed by the
//! same record. Two reservations can therefore never claim the same entry,
//! and one record never holds two entries:
//!
//! - losing an entry to another record re-queries the free entries and tries
//!   again; once none remain the result is [`ReservationOutcome::Exhausted`]
//! - finding an entry already held by the record (a concurrent save of the
//!   same record, or an earlier save whose alias write failed) resumes with
//!   that entry instead of claiming a new one
//!
//! A claimed entry is never released by this engine. If the record-side
//! write fails after a successful claim the result is
//! [`AllocationError::PartialCommit`] and the entry stays claimed.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use snafu::ResultExt;
use studyalloc_store::ConditionalWriteRequest;
use studyalloc_store::EventId;
use studyalloc_store::Filter;
use studyalloc_store::ProjectId;
use studyalloc_store::QueryRequest;
use studyalloc_store::ReadFieldsRequest;
use studyalloc_store::RecordKey;
use studyalloc_store::RecordStore;
use studyalloc_store::Row;
use studyalloc_store::StoreError;
use studyalloc_store::WriteCondition;
use studyalloc_store::is_empty_value;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::audit;
use crate::config::RetryPolicy;
use crate::constants::MAX_POOL_CANDIDATES;
use crate::error::AllocationError;
use crate::error::ReadSnafu;
use crate::gate::EligibleRecord;
use crate::verified::compute_backoff_ms;

/// Pool reservation settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Project holding the pool entries.
    pub pool_project: ProjectId,
    /// Field on the requesting record that receives the code.
    pub alias_field: String,
    pub alias_event: EventId,
    pub code_field: String,
    pub group_field: String,
    pub claimed_by_field: String,
    pub status_field: String,
    /// Status written on claim.
    pub complete_value: String,
    pub retry: RetryPolicy,
}

/// A row of the pool project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolEntry {
    pub record: RecordKey,
    pub event: EventId,
    pub code: String,
    pub group: String,
}

impl PoolEntry {
    fn from_row(row: &Row, config: &PoolConfig) -> Self {
        Self {
            record: row.record.clone(),
            event: row.event,
            code: row.value(&config.code_field).trim().to_string(),
            group: row.value(&config.group_field).to_string(),
        }
    }
}

/// Result of [`PoolReservation::reserve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReservationOutcome {
    /// `code` was claimed from pool record `entry` and written to the record.
    Reserved { code: String, entry: RecordKey },
    /// The record already held an alias; nothing was written.
    AlreadyAssigned { existing: String },
    /// No free entry exists for the group.
    Exhausted { group: String },
}

pub struct PoolReservation<S: RecordStore + ?Sized> {
    store: Arc<S>,
    config: PoolConfig,
}

impl<S: RecordStore + ?Sized> PoolReservation<S> {
    pub fn new(store: Arc<S>, config: PoolConfig) -> Self {
        Self { store, config }
    }

    /// Filter selecting free entries of `group` that carry a code.
    pub fn free_entry_filter(&self, group: &str) -> Filter {
        Filter::unset(self.config.claimed_by_field.clone())
            .and(Filter::equals(self.config.group_field.clone(), group))
            .and(Filter::present(self.config.code_field.clone()))
    }

    /// Reserve an alias for `eligible` from the entries tagged `group`.
    pub async fn reserve(&self, eligible: &EligibleRecord, group: &str) -> Result<ReservationOutcome, AllocationError> {
        if let Some(existing) = self.current_alias(eligible).await? {
            debug!(record = %eligible.record, %existing, "alias already assigned");
            return Ok(ReservationOutcome::AlreadyAssigned { existing });
        }

        let Some(entry) = self.claim_free_entry(eligible, group).await? else {
            return Ok(ReservationOutcome::Exhausted {
                group: group.to_string(),
            });
        };

        match self.write_alias(eligible, &entry).await? {
            AliasWrite::Written => {
                info!(
                    record = %eligible.record,
                    group,
                    code = %entry.code,
                    entry = %entry.record,
                    "reserved pool alias"
                );
                Ok(ReservationOutcome::Reserved {
                    code: entry.code,
                    entry: entry.record,
                })
            }
            AliasWrite::SavedConcurrently => Ok(ReservationOutcome::AlreadyAssigned { existing: entry.code }),
        }
    }

    /// Free entries for `group`, in store order.
    pub async fn free_entries(&self, group: &str) -> Result<Vec<PoolEntry>, AllocationError> {
        let filter = self.free_entry_filter(group);
        let rows = self
            .store
            .query(QueryRequest {
                project: self.config.pool_project,
                event: None,
                fields: vec![self.config.code_field.clone(), self.config.group_field.clone()],
                filter: filter.clone(),
                limit: Some(MAX_POOL_CANDIDATES),
            })
            .await
            .context(ReadSnafu {
                what: format!("pool entries matching {filter}"),
            })?;
        Ok(rows.iter().map(|row| PoolEntry::from_row(row, &self.config)).collect())
    }

    /// Claim the first free entry, retrying on lost races.
    ///
    /// Returns the entry held by the record, which is an earlier claim when
    /// one exists, or `None` when the pool has no free entry for the group.
    async fn claim_free_entry(&self, eligible: &EligibleRecord, group: &str) -> Result<Option<PoolEntry>, AllocationError> {
        let mut attempt = 0u32;
        loop {
            let entries = self.free_entries(group).await?;
            debug!(record = %eligible.record, group, found = entries.len(), "queried free pool entries");

            let Some(entry) = entries.into_iter().next() else {
                if let Some(held) = self.entry_held_by(eligible).await? {
                    debug!(record = %eligible.record, entry = %held.record, "record already holds a pool entry, resuming");
                    return Ok(Some(held));
                }
                let filter = self.free_entry_filter(group);
                warn!(
                    record = %eligible.record,
                    pool_project = %self.config.pool_project,
                    %filter,
                    "unable to find a free pool entry"
                );
                audit::emit(
                    &*self.store,
                    eligible.project,
                    &eligible.record,
                    "Error - unable to find pool alias",
                    format!("project {} filter {filter}", self.config.pool_project),
                )
                .await;
                return Ok(None);
            };

            match self.claim(eligible, &entry).await {
                Ok(()) => return Ok(Some(entry)),
                Err(ClaimError::Lost { winner }) if winner.trim() == eligible.record.as_str() => {
                    debug!(record = %eligible.record, entry = %entry.record, "entry claimed by a concurrent save of this record");
                    return Ok(Some(entry));
                }
                Err(ClaimError::AlreadyHolds { held }) => {
                    debug!(record = %eligible.record, entry = %held, "record already holds a pool entry, resuming");
                    return self.held_entry(held, entry.event).await.map(Some);
                }
                Err(ClaimError::Lost { winner }) => {
                    attempt += 1;
                    if attempt >= self.config.retry.max_retries {
                        return Err(AllocationError::MaxRetriesExceeded {
                            operation: format!("pool claim for group '{group}'"),
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
                        entry = %entry.record,
                        %winner,
                        attempt,
                        backoff_ms,
                        "pool entry claimed concurrently, retrying"
                    );
                    tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                }
                Err(ClaimError::Failed(err)) => {
                    error!(record = %eligible.record, entry = %entry.record, error = %err, "unable to claim pool entry");
                    audit::emit(
                        &*self.store,
                        eligible.project,
                        &eligible.record,
                        "Unable to claim pool alias",
                        err.to_string(),
                    )
                    .await;
                    return Err(err);
                }
            }
        }
    }

    /// Mark `entry` as consumed by the requesting record in one conditional write.
    async fn claim(&self, eligible: &EligibleRecord, entry: &PoolEntry) -> Result<(), ClaimError> {
        let request = ConditionalWriteRequest {
            project: self.config.pool_project,
            record: entry.record.clone(),
            event: entry.event,
            conditions: vec![
                WriteCondition::FieldEquals {
                    field: self.config.claimed_by_field.clone(),
                    expected: String::new(),
                },
                WriteCondition::UniqueValue {
                    field: self.config.claimed_by_field.clone(),
                },
            ],
            writes: vec![
                (self.config.claimed_by_field.clone(), eligible.record.to_string()),
                (self.config.status_field.clone(), self.config.complete_value.clone()),
            ],
        };

        match self.store.conditional_write(request).await {
            Ok(result) if result.is_ok() => Ok(()),
            Ok(result) => Err(ClaimError::Failed(AllocationError::WriteRejected {
                what: format!("claim of pool entry '{}'", entry.record),
                errors: result.errors,
            })),
            Err(StoreError::ConditionFailed { actual, .. }) => Err(ClaimError::Lost { winner: actual }),
            Err(StoreError::DuplicateValue { holder, .. }) => Err(ClaimError::AlreadyHolds { held: holder }),
            Err(source) => Err(ClaimError::Failed(AllocationError::Write {
                what: format!("claim of pool entry '{}'", entry.record),
                source,
            })),
        }
    }

    /// The entry claimed by `eligible`'s record, if any.
    async fn entry_held_by(&self, eligible: &EligibleRecord) -> Result<Option<PoolEntry>, AllocationError> {
        let filter = Filter::equals(self.config.claimed_by_field.clone(), eligible.record.as_str());
        let rows = self
            .store
            .query(QueryRequest {
                project: self.config.pool_project,
                event: None,
                fields: vec![self.config.code_field.clone(), self.config.group_field.clone()],
                filter: filter.clone(),
                limit: Some(1),
            })
            .await
            .context(ReadSnafu {
                what: format!("pool entries matching {filter}"),
            })?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };
        let entry = PoolEntry::from_row(row, &self.config);
        if entry.code.is_empty() {
            return Err(AllocationError::CorruptedPoolEntry {
                entry: entry.record,
                reason: format!("claimed entry has an empty '{}' field", self.config.code_field),
            });
        }
        Ok(Some(entry))
    }

    /// Load a pool entry the record has already claimed.
    async fn held_entry(&self, held: RecordKey, event: EventId) -> Result<PoolEntry, AllocationError> {
        let data = self
            .store
            .read_fields(ReadFieldsRequest {
                project: self.config.pool_project,
                record: held.clone(),
                fields: vec![self.config.code_field.clone(), self.config.group_field.clone()],
                events: vec![event],
            })
            .await
            .context(ReadSnafu {
                what: format!("pool entry '{held}'"),
            })?;

        let code = data.value(event, &self.config.code_field).trim().to_string();
        if code.is_empty() {
            return Err(AllocationError::CorruptedPoolEntry {
                entry: held,
                reason: format!("claimed entry has an empty '{}' field", self.config.code_field),
            });
        }
        Ok(PoolEntry {
            record: held,
            event,
            code,
            group: data.value(event, &self.config.group_field).to_string(),
        })
    }

    /// Copy the claimed code onto the requesting record.
    async fn write_alias(&self, eligible: &EligibleRecord, entry: &PoolEntry) -> Result<AliasWrite, AllocationError> {
        let request = ConditionalWriteRequest {
            project: eligible.project,
            record: eligible.record.clone(),
            event: self.config.alias_event,
            conditions: vec![WriteCondition::FieldEquals {
                field: self.config.alias_field.clone(),
                expected: String::new(),
            }],
            writes: vec![(self.config.alias_field.clone(), entry.code.clone())],
        };

        let reason = match self.store.conditional_write(request).await {
            Ok(result) if result.is_ok() => return Ok(AliasWrite::Written),
            Ok(result) => result.errors.join("; "),
            Err(StoreError::ConditionFailed { actual, .. }) if actual.trim() == entry.code => {
                debug!(record = %eligible.record, code = %entry.code, "alias saved by a concurrent save");
                return Ok(AliasWrite::SavedConcurrently);
            }
            Err(StoreError::ConditionFailed { actual, .. }) => {
                format!("record already holds a different alias '{actual}'")
            }
            Err(err) => err.to_string(),
        };

        let err = AllocationError::PartialCommit {
            record: eligible.record.clone(),
            entry: entry.record.clone(),
            code: entry.code.clone(),
            reason,
        };
        error!(
            record = %eligible.record,
            entry = %entry.record,
            code = %entry.code,
            error = %err,
            "pool entry claimed but alias not saved; manual reconciliation required"
        );
        audit::emit(
            &*self.store,
            eligible.project,
            &eligible.record,
            "Unable to save pool alias",
            err.to_string(),
        )
        .await;
        Err(err)
    }

    async fn current_alias(&self, eligible: &EligibleRecord) -> Result<Option<String>, AllocationError> {
        let data = self
            .store
            .read_fields(ReadFieldsRequest::single(
                eligible.project,
                eligible.record.clone(),
                self.config.alias_field.clone(),
                self.config.alias_event,
            ))
            .await
            .context(ReadSnafu {
                what: format!("alias field '{}'", self.config.alias_field),
            })?;
        let value = data.value(self.config.alias_event, &self.config.alias_field);
        Ok((!is_empty_value(value)).then(|| value.to_string()))
    }
}

enum ClaimError {
    /// Another reservation claimed the entry first.
    Lost { winner: String },
    /// The record already holds entry `held`.
    AlreadyHolds { held: RecordKey },
    Failed(AllocationError),
}

#[derive(Debug)]
enum AliasWrite {
    Written,
    /// A concurrent save of the same record wrote the same code first.
    SavedConcurrently,
}
