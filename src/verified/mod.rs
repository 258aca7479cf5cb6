//! Pure functions behind the allocators.
//!
//! This module is the functional core of the engine: identifier formatting,
//! suffix parsing, the max-scan, site code parsing and retry backoff. Nothing
//! here performs I/O, so every rule can be tested with explicit inputs.
//!
//! # Tiger Style
//!
//! - Checked or saturating arithmetic only; overflow is reported, never wrapped
//! - Explicit integer types (`u64` values, `u32` widths and codes)
//! - All functions are total

pub mod backoff;
pub mod identifier;
pub mod site;

pub use backoff::compute_backoff_ms;
pub use identifier::ScanSummary;
pub use identifier::build_prefix;
pub use identifier::compute_next_value;
pub use identifier::format_identifier;
pub use identifier::parse_suffix;
pub use identifier::scan_max;
pub use site::parse_site_code;
