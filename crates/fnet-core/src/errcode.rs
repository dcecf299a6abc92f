//! Signed step codes returned by numerical kernels.
//!
//! A negative code is a non-recoverable failure, `0` is success, and positive
//! codes are recoverable errors of increasing severity (the caller may retry
//! with a smaller step). Independent parallel evaluations each produce a code;
//! the codes are fused into one system-level result.

/// Fuse two step codes into one.
///
/// Any negative code wins (the most negative); otherwise the larger of the two
/// recoverable severities is kept.
pub fn merge_codes(cur: i32, next: i32) -> i32 {
    if cur < 0 || next < 0 {
        cur.min(next)
    } else {
        cur.max(next)
    }
}

/// Fuse a list of step codes into one.
///
/// `fuse_codes(&[]) == 0`. The fold is associative and commutative, so the
/// result does not depend on evaluation order of the parallel tasks that
/// produced the codes.
pub fn fuse_codes(codes: &[i32]) -> i32 {
    let mut total = 0;
    for &code in codes {
        if code < 0 {
            // Non-recoverable: keep scanning so the most negative code wins
            total = if total < 0 { total.min(code) } else { code };
        } else if total >= 0 {
            total = total.max(code);
        }
    }
    total
}
