//! Eligibility gate.
//!
//! Decides from a record's current field state whether a save should trigger
//! allocation. The decision is returned as a value ([`Eligibility`]) and the
//! allocators receive the [`EligibleRecord`] explicitly; no state is carried
//! between calls.

use std::sync::Arc;

use serde::Serialize;
use snafu::ResultExt;
use studyalloc_store::EventId;
use studyalloc_store::ProjectId;
use studyalloc_store::ReadFieldsRequest;
use studyalloc_store::RecordKey;
use studyalloc_store::RecordStore;
use studyalloc_store::is_empty_value;
use tracing::debug;

use crate::error::AllocationError;
use crate::error::ReadSnafu;

/// Where the randomization result lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateConfig {
    pub trigger_event: EventId,
    pub trigger_field: String,
}

/// A record that has reached the randomized state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EligibleRecord {
    pub project: ProjectId,
    pub record: RecordKey,
    /// The non-empty randomization result. The pool is filtered by it.
    pub trigger_value: String,
}

/// Gate decision for one save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Eligibility {
    /// The save was not on the trigger event.
    NotApplicable,
    /// The trigger field is still empty.
    NotYetEligible,
    /// Allocation should proceed.
    Eligible(EligibleRecord),
}

impl Eligibility {
    pub fn eligible(&self) -> Option<&EligibleRecord> {
        match self {
            Eligibility::Eligible(record) => Some(record),
            _ => None,
        }
    }
}

pub struct EligibilityGate<S: RecordStore + ?Sized> {
    store: Arc<S>,
    config: GateConfig,
}

impl<S: RecordStore + ?Sized> EligibilityGate<S> {
    pub fn new(store: Arc<S>, config: GateConfig) -> Self {
        Self { store, config }
    }

    /// Evaluate a save of `record` on `event`.
    ///
    /// Performs at most one read. A read failure is returned as an error; the
    /// caller must not allocate for a record whose state is unknown.
    pub async fn evaluate(
        &self,
        project: ProjectId,
        record: &RecordKey,
        event: EventId,
    ) -> Result<Eligibility, AllocationError> {
        if event != self.config.trigger_event {
            return Ok(Eligibility::NotApplicable);
        }

        let data = self
            .store
            .read_fields(ReadFieldsRequest::single(
                project,
                record.clone(),
                self.config.trigger_field.clone(),
                self.config.trigger_event,
            ))
            .await
            .context(ReadSnafu {
                what: format!("trigger field '{}'", self.config.trigger_field),
            })?;

        let value = data.value(self.config.trigger_event, &self.config.trigger_field);
        if is_empty_value(value) {
            debug!(%record, %event, "record not yet randomized");
            return Ok(Eligibility::NotYetEligible);
        }

        Ok(Eligibility::Eligible(EligibleRecord {
            project,
            record: record.clone(),
            trigger_value: value.trim().to_string(),
        }))
    }
}
