//! Error types returned by record store adapters.

use snafu::Snafu;

use crate::types::ProjectId;
use crate::types::RecordKey;

/// Errors from a [`RecordStore`](crate::RecordStore) or
/// [`GroupDirectory`](crate::GroupDirectory) implementation.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    /// The project does not exist in this store.
    #[snafu(display("project {project} not found"))]
    NotFound {
        /// The project that was addressed.
        project: ProjectId,
    },

    /// A `FieldEquals` condition did not hold; nothing was written.
    #[snafu(display(
        "condition failed on record '{record}' field '{field}': expected {expected:?}, found {actual:?}"
    ))]
    ConditionFailed {
        /// Record the conditional write targeted.
        record: RecordKey,
        /// Field whose value was compared.
        field: String,
        /// Value the caller expected.
        expected: String,
        /// Value actually stored (empty when unset).
        actual: String,
    },

    /// A `UniqueValue` condition did not hold; nothing was written.
    #[snafu(display("value '{value}' for field '{field}' is already held by record '{holder}'"))]
    DuplicateValue {
        /// Field that must stay unique.
        field: String,
        /// The value being written.
        value: String,
        /// Record currently holding the value.
        holder: RecordKey,
    },

    /// The store could not be reached.
    #[snafu(display("store unavailable: {reason}"))]
    Unavailable {
        /// Human-readable cause.
        reason: String,
    },

    /// Any other adapter failure.
    #[snafu(display("operation failed: {reason}"))]
    Failed {
        /// Human-readable cause.
        reason: String,
    },
}
