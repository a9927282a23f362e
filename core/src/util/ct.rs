//! Constant-time byte-string equality.
//!
//! Used by the authentication pipeline to compare digests
//! and MACs without leaking timing information about the first
//! differing byte. Backed by the `subtle` crate rather than a hand-rolled
//! comparison, since `subtle` is the ecosystem-standard way to get a
//! compiler-fence-protected constant-time compare.

use subtle::ConstantTimeEq;

/// Compare two byte slices in constant time.
///
/// Returns `false` immediately if the lengths differ (length is not
/// considered secret in any of this crate's call sites); otherwise every
/// byte is compared and the result does not depend on the position of
/// the first mismatch.
#[must_use]
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.ct_eq(b).into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn equal_strings_match() {
        assert!(ct_eq(b"identical-secret", b"identical-secret"));
    }

    #[test]
    fn differing_strings_do_not_match() {
        assert!(!ct_eq(b"secret-a", b"secret-b"));
        assert!(!ct_eq(b"short", b"much-longer-string"));
        assert!(!ct_eq(b"", b"nonempty"));
    }

    /// Not a precise timing-attack test (infeasible in a unit test), but
    /// a sanity check that comparisons with the mismatch at the start vs.
    /// the end are not wildly different in wall-clock terms, which would
    /// indicate an early-exit comparison slipped in.
    #[test]
    fn timing_is_not_grossly_position_dependent() {
        let base = vec![0xAAu8; 4096];
        let mut mismatch_early = base.clone();
        mismatch_early[0] = 0x00;
        let mut mismatch_late = base.clone();
        mismatch_late[4095] = 0x00;

        let iterations = 2000;
        let start = Instant::now();
        for _ in 0..iterations {
            std::hint::black_box(ct_eq(&base, &mismatch_early));
        }
        let early = start.elapsed();

        let start = Instant::now();
        for _ in 0..iterations {
            std::hint::black_box(ct_eq(&base, &mismatch_late));
        }
        let late = start.elapsed();

        let ratio = early.as_secs_f64().max(1e-9) / late.as_secs_f64().max(1e-9);
        assert!((0.2..5.0).contains(&ratio), "suspicious timing ratio: {ratio}");
    }
}
