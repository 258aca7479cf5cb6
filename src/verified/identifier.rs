//! Formatted identifier rules.
//!
//! A formatted identifier is `prefix + zero-padded number`. Padding is a
//! minimum width; numbers wider than the padding simply grow.

/// Build a namespace prefix: `base + site code + separator`.
///
/// # Example
///
/// ```ignore
/// assert_eq!(build_prefix("R", Some(5), "-"), "R5-");
/// assert_eq!(build_prefix("R", None, "-"), "R-");
/// ```
#[inline]
pub fn build_prefix(base: &str, site_code: Option<u32>, separator: &str) -> String {
    match site_code {
        Some(code) => format!("{base}{code}{separator}"),
        None => format!("{base}{separator}"),
    }
}

/// Format `value` after `prefix`, left-padded with zeros to `padding` digits.
///
/// A padding of `0` means no padding.
#[inline]
pub fn format_identifier(prefix: &str, value: u64, padding: u32) -> String {
    format!("{prefix}{value:0width$}", width = padding as usize)
}

/// Extract the numeric suffix of `value` within the namespace `prefix`.
///
/// Returns `None` when `value` does not start with the prefix or when the
/// remainder (surrounding whitespace trimmed) is not purely ASCII digits
/// that fit in a `u64`.
pub fn parse_suffix(value: &str, prefix: &str) -> Option<u64> {
    let remainder = value.strip_prefix(prefix)?.trim();
    if remainder.is_empty() || !remainder.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    remainder.parse::<u64>().ok()
}

/// Next value in a sequence whose current maximum is `max`.
///
/// Returns `None` on overflow.
#[inline]
pub fn compute_next_value(max: u64) -> Option<u64> {
    max.checked_add(1)
}

/// Result of scanning existing values in a namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Largest valid numeric suffix, `0` when none were found.
    pub max: u64,
    /// Number of values whose suffix was counted.
    pub counted: u32,
    /// Non-empty values skipped because their suffix is not numeric.
    pub skipped: Vec<String>,
}

/// Compute the current maximum of a namespace from its existing values.
///
/// Blank values are ignored. Malformed values never contribute to the
/// maximum but are reported in [`ScanSummary::skipped`].
pub fn scan_max<'a, I>(values: I, prefix: &str) -> ScanSummary
where I: IntoIterator<Item = &'a str> {
    let mut summary = ScanSummary::default();
    for value in values {
        if value.trim().is_empty() {
            continue;
        }
        match parse_suffix(value, prefix) {
            Some(n) => {
                summary.max = summary.max.max(n);
                summary.counted = summary.counted.saturating_add(1);
            }
            None => summary.skipped.push(value.to_string()),
        }
    }
    summary
}
