//! Exponential backoff for compare-and-set retries.

/// Backoff before retry number `attempt` (1-based): `initial * 2^(attempt-1)`,
/// capped at `max`.
#[inline]
pub fn compute_backoff_ms(attempt: u32, initial_ms: u64, max_ms: u64) -> u64 {
    let shift = attempt.saturating_sub(1).min(63);
    initial_ms.saturating_mul(1u64 << shift).min(max_ms)
}
