//! Fixed limits and defaults for the allocation engine.
//!
//! Tiger Style: every retry loop and every query is bounded by a constant
//! declared here, with compile-time sanity checks below.

/// Maximum conflict retries for one identifier or pool allocation.
pub const MAX_CAS_RETRIES: u32 = 32;

/// Initial backoff after a lost compare-and-set race.
pub const CAS_RETRY_INITIAL_BACKOFF_MS: u64 = 2;

/// Backoff ceiling for compare-and-set retries.
pub const CAS_RETRY_MAX_BACKOFF_MS: u64 = 128;

/// Widest zero-padding accepted for formatted identifiers (`u64::MAX` has 20 digits).
pub const MAX_PADDING_WIDTH: u32 = 20;

/// Free pool rows fetched per claim attempt.
pub const MAX_POOL_CANDIDATES: u32 = 16;

/// Default identifier prefix.
pub const DEFAULT_STUDY_ID_PREFIX: &str = "R";

/// Default separator between site code and number.
pub const DEFAULT_STUDY_ID_SEPARATOR: &str = "-";

/// Default zero-padding width.
pub const DEFAULT_STUDY_ID_PADDING: u32 = 3;

/// Status value written to a claimed pool entry ("complete").
pub const DEFAULT_POOL_COMPLETE_VALUE: &str = "2";

const _: () = assert!(MAX_CAS_RETRIES > 0);
const _: () = assert!(MAX_CAS_RETRIES <= 1000);
const _: () = assert!(CAS_RETRY_INITIAL_BACKOFF_MS > 0);
const _: () = assert!(CAS_RETRY_INITIAL_BACKOFF_MS <= CAS_RETRY_MAX_BACKOFF_MS);
const _: () = assert!(DEFAULT_STUDY_ID_PADDING <= MAX_PADDING_WIDTH);
const _: () = assert!(MAX_POOL_CANDIDATES > 0);
