//! Testing infrastructure for studyalloc.
//!
//! - [`DeterministicRecordStore`]: in-memory [`RecordStore`](studyalloc_store::RecordStore)
//!   with atomic conditional writes, operation counters, failure injection and
//!   a query barrier for reproducing read-then-write races
//! - [`StaticGroupDirectory`]: fixed [`GroupDirectory`](studyalloc_store::GroupDirectory)
//! - [`StoreSnapshot`]: serde form of a store's contents, used for fixtures
//!
//! # Reproducing races
//!
//! ```ignore
//! let store = DeterministicRecordStore::new();
//! // The next 4 queries all take their snapshot before any of them returns.
//! store.gate_next_queries(4).await;
//! ```

mod directory;
mod store;

pub use directory::StaticGroupDirectory;
pub use store::DeterministicRecordStore;
pub use store::StoreSnapshot;
