//! # Audit Progress
//!
//! An audit's progress is the share of its requirement's form templates
//! that have a submitted audit form, as a percentage.

/// Completion percentage for `completed` submitted forms out of `total`
/// required templates.
///
/// Returns `None` when `total` is zero: the caller leaves the stored
/// progress untouched instead of dividing by zero. The result is not
/// clamped; more submissions than required templates yields a value above
/// 100.
pub fn progress_percentage(completed: usize, total: usize) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some(completed as f64 / total as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn half_of_four_templates_is_fifty() {
        assert_eq!(progress_percentage(2, 4), Some(50.0));
    }

    #[test]
    fn zero_required_templates_yields_none() {
        assert_eq!(progress_percentage(0, 0), None);
        assert_eq!(progress_percentage(3, 0), None);
    }

    #[test]
    fn all_submitted_is_one_hundred() {
        assert_eq!(progress_percentage(2, 2), Some(100.0));
    }

    #[test]
    fn surplus_submissions_are_not_clamped() {
        assert_eq!(progress_percentage(3, 2), Some(150.0));
    }

    proptest! {
        #[test]
        fn within_bounds_when_not_over_submitted(total in 1usize..500, completed in 0usize..500) {
            let completed = completed.min(total);
            let p = progress_percentage(completed, total).unwrap();
            prop_assert!((0.0..=100.0).contains(&p));
        }
    }
}
