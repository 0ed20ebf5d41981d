/// Half-open overlap test: `[a_start, a_end)` and `[b_start, b_end)` share at
/// least one instant. Touching endpoints do not overlap.
///
/// Every conflict decision in the crate goes through this function.
pub fn overlaps<T: PartialOrd>(a_start: T, a_end: T, b_start: T, b_end: T) -> bool {
    a_start < b_end && b_start < a_end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockTime;
    use proptest::prelude::*;

    fn t(s: &str) -> ClockTime {
        ClockTime::parse(s).unwrap()
    }

    #[test]
    fn touching_boundary_does_not_overlap() {
        assert!(!overlaps(t("10:00"), t("10:30"), t("10:30"), t("11:00")));
        assert!(!overlaps(t("10:30"), t("11:00"), t("10:00"), t("10:30")));
    }

    #[test]
    fn partial_overlap() {
        assert!(overlaps(t("10:00"), t("10:30"), t("10:15"), t("10:45")));
    }

    #[test]
    fn containment_overlaps() {
        assert!(overlaps(t("09:00"), t("12:00"), t("10:00"), t("10:30")));
        assert!(overlaps(t("10:00"), t("10:30"), t("09:00"), t("12:00")));
    }

    #[test]
    fn identical_intervals_overlap() {
        assert!(overlaps(t("09:00"), t("09:30"), t("09:00"), t("09:30")));
    }

    #[test]
    fn disjoint_intervals() {
        assert!(!overlaps(t("08:00"), t("08:30"), t("14:00"), t("15:00")));
    }

    proptest! {
        #[test]
        fn symmetric(a in 0u32..1440, b in 0u32..1440, c in 0u32..1440, d in 0u32..1440) {
            prop_assert_eq!(overlaps(a, b, c, d), overlaps(c, d, a, b));
        }

        #[test]
        fn adjacent_never_overlap(start in 0u32..1000, len_a in 1u32..200, len_b in 1u32..200) {
            let mid = start + len_a;
            prop_assert!(!overlaps(start, mid, mid, mid + len_b));
        }
    }
}
