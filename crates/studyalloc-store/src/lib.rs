//! Record store adapter contract for studyalloc.
//!
//! The allocation engine never talks to a concrete clinical data store. It
//! talks to the traits in this crate, which a host integration implements:
//!
//! - [`RecordStore`]: field reads, plain writes, filtered queries, atomic
//!   conditional writes and operator audit events
//! - [`GroupDirectory`]: the project's group (site) display names
//!
//! Request and response types are plain serde-serializable structs so that
//! hosts can ship them across process boundaries unchanged.

mod error;
mod filter;
mod traits;
mod types;

pub use error::StoreError;
pub use filter::Filter;
pub use traits::GroupDirectory;
pub use traits::RecordStore;
pub use types::AuditEvent;
pub use types::ConditionalWriteRequest;
pub use types::EventId;
pub use types::FieldWrite;
pub use types::GroupId;
pub use types::ProjectId;
pub use types::QueryRequest;
pub use types::ReadFieldsRequest;
pub use types::RecordData;
pub use types::RecordKey;
pub use types::Row;
pub use types::WriteCondition;
pub use types::WriteFieldsRequest;
pub use types::WriteFieldsResult;
pub use types::is_empty_value;
