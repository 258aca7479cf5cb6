//! Save-triggered study identifier and pool alias allocation.
//!
//! When a record of a randomized study is saved and its randomization result
//! becomes available, the [`SaveOrchestrator`] assigns:
//!
//! - a sequential, site-namespaced study identifier such as `R5-003`
//!   ([`SequentialIdAllocator`]), and
//! - an alias code reserved from a pre-seeded pool in a separate project
//!   ([`PoolReservation`]).
//!
//! Both allocators are idempotent and safe under concurrent saves: every
//! mutation goes through [`RecordStore::conditional_write`] and conflicts are
//! retried with bounded backoff.
//!
//! # Modules
//!
//! - [`gate`]: decides whether a save triggers allocation
//! - [`sequence`]: sequential identifier allocation
//! - [`pool`]: pool alias reservation
//! - [`orchestrator`]: runs the gate and both allocators for one save
//! - [`config`]: TOML configuration and validation
//! - [`verified`]: pure formatting, parsing and backoff functions

mod audit;
pub mod config;
pub mod constants;
pub mod error;
pub mod gate;
pub mod orchestrator;
pub mod pool;
pub mod sequence;
pub mod sites;
pub mod verified;

pub use config::AllocatorConfig;
pub use config::ConfigError;
pub use config::RetryPolicy;
pub use error::AllocationError;
pub use gate::Eligibility;
pub use gate::EligibilityGate;
pub use gate::EligibleRecord;
pub use gate::GateConfig;
pub use orchestrator::SaveEvent;
pub use orchestrator::SaveOrchestrator;
pub use orchestrator::SaveReport;
pub use orchestrator::StepReport;
pub use pool::PoolConfig;
pub use pool::PoolEntry;
pub use pool::PoolReservation;
pub use pool::ReservationOutcome;
pub use sequence::IdentifierOutcome;
pub use sequence::Namespace;
pub use sequence::SequenceConfig;
pub use sequence::SequentialIdAllocator;
pub use sites::SiteCodes;
pub use studyalloc_store::GroupDirectory;
pub use studyalloc_store::RecordStore;
