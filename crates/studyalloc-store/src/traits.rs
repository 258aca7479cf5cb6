//! Adapter traits implemented by host integrations.

use std::collections::BTreeMap;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::types::AuditEvent;
use crate::types::ConditionalWriteRequest;
use crate::types::GroupId;
use crate::types::ProjectId;
use crate::types::QueryRequest;
use crate::types::ReadFieldsRequest;
use crate::types::RecordData;
use crate::types::Row;
use crate::types::WriteFieldsRequest;
use crate::types::WriteFieldsResult;

/// Read/write access to the host's record store.
///
/// Every call may block on the host; timeouts and transport retries are the
/// adapter's responsibility.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Read field values of one record.
    async fn read_fields(&self, request: ReadFieldsRequest) -> Result<RecordData, StoreError>;

    /// Apply unconditional writes.
    ///
    /// Per-write rejections are reported in [`WriteFieldsResult::errors`];
    /// `Err` means the request as a whole could not be processed.
    async fn write_fields(&self, request: WriteFieldsRequest) -> Result<WriteFieldsResult, StoreError>;

    /// Return the rows matching a filter, in adapter-defined order.
    async fn query(&self, request: QueryRequest) -> Result<Vec<Row>, StoreError>;

    /// Atomically check conditions and apply writes to one row.
    ///
    /// Returns [`StoreError::ConditionFailed`] or [`StoreError::DuplicateValue`]
    /// when a condition does not hold, in which case nothing was written.
    async fn conditional_write(&self, request: ConditionalWriteRequest) -> Result<WriteFieldsResult, StoreError>;

    /// Append an entry to the project's audit log.
    async fn log_event(&self, _event: AuditEvent) -> Result<(), StoreError> {
        Ok(())
    }
}

#[async_trait]
impl<T: RecordStore + ?Sized> RecordStore for std::sync::Arc<T> {
    async fn read_fields(&self, request: ReadFieldsRequest) -> Result<RecordData, StoreError> {
        (**self).read_fields(request).await
    }

    async fn write_fields(&self, request: WriteFieldsRequest) -> Result<WriteFieldsResult, StoreError> {
        (**self).write_fields(request).await
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<Row>, StoreError> {
        (**self).query(request).await
    }

    async fn conditional_write(&self, request: ConditionalWriteRequest) -> Result<WriteFieldsResult, StoreError> {
        (**self).conditional_write(request).await
    }

    async fn log_event(&self, event: AuditEvent) -> Result<(), StoreError> {
        (**self).log_event(event).await
    }
}

/// Directory of a project's data access groups.
#[async_trait]
pub trait GroupDirectory: Send + Sync {
    /// Map of group id to display name, e.g. `3 -> "05_duke"`.
    async fn group_names(&self, project: ProjectId) -> Result<BTreeMap<GroupId, String>, StoreError>;
}

#[async_trait]
impl<T: GroupDirectory + ?Sized> GroupDirectory for std::sync::Arc<T> {
    async fn group_names(&self, project: ProjectId) -> Result<BTreeMap<GroupId, String>, StoreError> {
        (**self).group_names(project).await
    }
}
