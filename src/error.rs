//! Error types for the allocation engine.
//!
//! `AlreadyAssigned` and `Exhausted` are not errors; they are outcomes of the
//! allocators (see [`IdentifierOutcome`](crate::IdentifierOutcome) and
//! [`ReservationOutcome`](crate::ReservationOutcome)).

use snafu::Snafu;
use studyalloc_store::GroupId;
use studyalloc_store::RecordKey;
use studyalloc_store::StoreError;

/// Errors from one allocator invocation.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum AllocationError {
    /// A group was supplied but its name carries no numeric site code.
    #[snafu(display("group {group} has no numeric site code"))]
    UnresolvedGroup {
        /// The group the save was made under.
        group: GroupId,
    },

    /// A read or query against the adapter failed.
    #[snafu(display("failed to read {what}: {source}"))]
    Read {
        /// What was being read.
        what: String,
        /// The underlying adapter error.
        source: StoreError,
    },

    /// The adapter failed a write as a whole.
    #[snafu(display("failed to write {what}: {source}"))]
    Write {
        /// What was being written.
        what: String,
        /// The underlying adapter error.
        source: StoreError,
    },

    /// The adapter processed a write but reported per-field errors.
    #[snafu(display("store rejected write of {what}: {}", errors.join("; ")))]
    WriteRejected {
        /// What was being written.
        what: String,
        /// Errors reported by the host.
        errors: Vec<String>,
    },

    /// The pool entry was claimed but the record never received its code.
    ///
    /// Requires manual reconciliation; the claim is not rolled back.
    #[snafu(display("pool entry '{entry}' claimed for record '{record}' but code '{code}' was not saved: {reason}"))]
    PartialCommit {
        /// Record that should have received the code.
        record: RecordKey,
        /// Pool record that is now claimed.
        entry: RecordKey,
        /// The claimed code.
        code: String,
        /// Why the record-side write failed.
        reason: String,
    },

    /// Conflict retries were exhausted.
    #[snafu(display("max retries exceeded for {operation}: {attempts} attempts"))]
    MaxRetriesExceeded {
        /// Description of the operation.
        operation: String,
        /// Number of attempts made.
        attempts: u32,
    },

    /// The numeric suffix of a namespace cannot grow further.
    #[snafu(display("identifier sequence exhausted for prefix '{prefix}'"))]
    SequenceExhausted {
        /// The namespace prefix.
        prefix: String,
    },

    /// A free pool entry has no usable code.
    #[snafu(display("corrupted pool entry '{entry}': {reason}"))]
    CorruptedPoolEntry {
        /// The pool record.
        entry: RecordKey,
        /// Description of what is wrong.
        reason: String,
    },
}

impl AllocationError {
    /// Stable snake_case name of the variant, for logs and reports.
    pub fn kind(&self) -> &'static str {
        match self {
            AllocationError::UnresolvedGroup { .. } => "unresolved_group",
            AllocationError::Read { .. } => "adapter_failure",
            AllocationError::Write { .. } | AllocationError::WriteRejected { .. } => "write_failure",
            AllocationError::PartialCommit { .. } => "partial_commit",
            AllocationError::MaxRetriesExceeded { .. } => "max_retries_exceeded",
            AllocationError::SequenceExhausted { .. } => "sequence_exhausted",
            AllocationError::CorruptedPoolEntry { .. } => "corrupted_pool_entry",
        }
    }
}
