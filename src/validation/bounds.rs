//! Count-bound checks on richness surfaces.
//!
//! A richness cell counts the species present there, so no cell may exceed
//! the number of species that contributed. Under expansion mode a species
//! registers at the anchor marker wherever its raster holds nodata there, so
//! the maximum must equal that number exactly. A shortfall means some species
//! did not register.

use crate::core::error::{Anomaly, BoundScope};

/// Check a surface maximum against its species denominator.
///
/// Returns the violation, if any. Violations are recorded, never fatal.
pub fn check_bound(scope: BoundScope, max: u32, limit: usize, exact: bool) -> Option<Anomaly> {
    let max_wide = max as usize;
    let violated = if exact {
        max_wide != limit
    } else {
        max_wide > limit
    };

    violated.then(|| {
        log::warn!(
            "{}: maximum cell value {} against {} contributing species",
            scope,
            max,
            limit
        );
        Anomaly::BoundViolation {
            scope,
            max,
            limit,
            exact,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upper_bound() {
        assert!(check_bound(BoundScope::Final, 3, 3, false).is_none());
        assert!(check_bound(BoundScope::Final, 0, 3, false).is_none());
        assert!(check_bound(BoundScope::Final, 4, 3, false).is_some());
    }

    #[test]
    fn test_exact_bound() {
        let scope = BoundScope::Batch { offset: 40 };
        assert!(check_bound(scope, 2, 2, true).is_none());
        match check_bound(scope, 1, 2, true) {
            Some(Anomaly::BoundViolation { max, limit, exact, .. }) => {
                assert_eq!((max, limit, exact), (1, 2, true));
            }
            other => panic!("expected violation, got {:?}", other),
        }
    }

    #[test]
    fn test_empty_batch_is_within_bounds() {
        assert!(check_bound(BoundScope::Batch { offset: 0 }, 0, 0, true).is_none());
    }
}
