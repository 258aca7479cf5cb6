//! Best-effort operator audit events.

use studyalloc_store::AuditEvent;
use studyalloc_store::ProjectId;
use studyalloc_store::RecordKey;
use studyalloc_store::RecordStore;
use tracing::warn;

/// Append an audit event to the host's project log.
///
/// A failure to log never affects the allocation result.
pub(crate) async fn emit<S: RecordStore + ?Sized>(
    store: &S,
    project: ProjectId,
    record: &RecordKey,
    description: &str,
    detail: String,
) {
    let event = AuditEvent {
        project,
        record: Some(record.clone()),
        description: description.to_string(),
        detail,
    };
    if let Err(error) = store.log_event(event).await {
        warn!(%project, %record, description, %error, "failed to write audit event");
    }
}
