//! Update-count sentinels shared by every batch strategy.
//!
//! The values match `java.sql.Statement` so counts can be handed to callers
//! expecting JDBC semantics unchanged.

/// The entry succeeded but no row count can be attributed to it.
pub const SUCCESS_NO_INFO: i64 = -2;

/// The entry failed and the batch continued past it.
pub const EXECUTE_FAILED: i64 = -3;

/// Placeholder for entries that have not been attempted yet.
pub const NOT_ATTEMPTED: i64 = -3;

/// Convert large update counts to `i32`, clamping values above `i32::MAX`.
pub fn clamp_to_i32(counts: &[i64]) -> Vec<i32> {
    counts
        .iter()
        .map(|&c| i32::try_from(c).unwrap_or(if c > 0 { i32::MAX } else { i32::MIN }))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_keeps_sentinels() {
        assert_eq!(
            clamp_to_i32(&[0, 5, SUCCESS_NO_INFO, EXECUTE_FAILED]),
            vec![0, 5, -2, -3]
        );
    }

    #[test]
    fn clamp_saturates_large_counts() {
        assert_eq!(clamp_to_i32(&[i64::MAX]), vec![i32::MAX]);
    }
}
