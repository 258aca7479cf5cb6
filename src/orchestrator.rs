//! Save orchestrator.
//!
//! Entry point invoked by the host after every record save. It runs the
//! eligibility gate and then both allocators, isolating their failures: an
//! error in one allocator is logged and reported but never prevents the other
//! from running, and nothing is ever propagated to the host's save path.

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;
use studyalloc_store::EventId;
use studyalloc_store::GroupDirectory;
use studyalloc_store::GroupId;
use studyalloc_store::ProjectId;
use studyalloc_store::RecordKey;
use studyalloc_store::RecordStore;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::instrument;

use crate::config::AllocatorConfig;
use crate::config::ConfigError;
use crate::error::AllocationError;
use crate::gate::Eligibility;
use crate::gate::EligibilityGate;
use crate::pool::PoolReservation;
use crate::pool::ReservationOutcome;
use crate::sequence::IdentifierOutcome;
use crate::sequence::SequentialIdAllocator;

/// Context of one save, as delivered by the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveEvent {
    pub project: ProjectId,
    pub record: RecordKey,
    /// Instrument (form) that was saved; informational.
    #[serde(default)]
    pub instrument: Option<String>,
    pub event: EventId,
    /// Data access group of the saving user, if any.
    #[serde(default)]
    pub group: Option<GroupId>,
    #[serde(default)]
    pub repeat_instance: Option<u32>,
}

/// Result of one orchestration step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", content = "value", rename_all = "snake_case")]
pub enum StepReport<T> {
    Completed(T),
    Failed { kind: String, message: String },
}

impl<T> StepReport<T> {
    fn from_result(result: Result<T, AllocationError>) -> Self {
        match result {
            Ok(value) => StepReport::Completed(value),
            Err(err) => StepReport::Failed {
                kind: err.kind().to_string(),
                message: err.to_string(),
            },
        }
    }

    pub fn completed(&self) -> Option<&T> {
        match self {
            StepReport::Completed(value) => Some(value),
            StepReport::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, StepReport::Failed { .. })
    }
}

/// Everything that happened for one save.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SaveReport {
    pub project: ProjectId,
    pub record: RecordKey,
    pub event: EventId,
    pub gate: StepReport<Eligibility>,
    /// `None` when the gate did not pass.
    pub identifier: Option<StepReport<IdentifierOutcome>>,
    /// `None` when the gate did not pass.
    pub alias: Option<StepReport<ReservationOutcome>>,
}

impl SaveReport {
    /// True if the gate passed and both allocators completed.
    pub fn is_complete(&self) -> bool {
        self.identifier.as_ref().and_then(StepReport::completed).is_some()
            && self.alias.as_ref().and_then(StepReport::completed).is_some()
    }
}

pub struct SaveOrchestrator<S: RecordStore + ?Sized, D: GroupDirectory + ?Sized> {
    gate: EligibilityGate<S>,
    identifiers: SequentialIdAllocator<S, D>,
    pool: PoolReservation<S>,
}

impl<S: RecordStore + ?Sized, D: GroupDirectory + ?Sized> SaveOrchestrator<S, D> {
    /// Build the orchestrator from an already validated configuration.
    pub fn new(store: Arc<S>, directory: Arc<D>, config: &AllocatorConfig) -> Self {
        Self {
            gate: EligibilityGate::new(store.clone(), config.gate_config()),
            identifiers: SequentialIdAllocator::new(store.clone(), directory, config.sequence_config()),
            pool: PoolReservation::new(store, config.pool_config()),
        }
    }

    /// Validate `config` and build the orchestrator.
    pub fn try_new(store: Arc<S>, directory: Arc<D>, config: &AllocatorConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::new(store, directory, config))
    }

    /// Handle a completed save.
    ///
    /// Never fails: every outcome, including errors, is in the report.
    #[instrument(skip(self), fields(project = %save.project, record = %save.record, event = %save.event))]
    pub async fn on_record_saved(&self, save: SaveEvent) -> SaveReport {
        let mut report = SaveReport {
            project: save.project,
            record: save.record.clone(),
            event: save.event,
            gate: StepReport::Completed(Eligibility::NotApplicable),
            identifier: None,
            alias: None,
        };

        let eligibility = match self.gate.evaluate(save.project, &save.record, save.event).await {
            Ok(eligibility) => eligibility,
            Err(err) => {
                error!(error = %err, "eligibility check failed; skipping allocation");
                report.gate = StepReport::from_result(Err(err));
                return report;
            }
        };
        report.gate = StepReport::Completed(eligibility.clone());

        let Eligibility::Eligible(eligible) = eligibility else {
            debug!("save does not trigger allocation");
            return report;
        };

        let identifier = self.identifiers.allocate(&eligible, save.group).await;
        if let Err(err) = &identifier {
            error!(error = %err, kind = err.kind(), "study identifier allocation failed");
        }
        report.identifier = Some(StepReport::from_result(identifier));

        let alias = self.pool.reserve(&eligible, &eligible.trigger_value).await;
        if let Err(err) = &alias {
            error!(error = %err, kind = err.kind(), "pool alias reservation failed");
        }
        report.alias = Some(StepReport::from_result(alias));

        info!(
            group = ?save.group,
            pool_group = %eligible.trigger_value,
            identifier = ?report.identifier,
            alias = ?report.alias,
            "allocation finished"
        );
        report
    }
}
