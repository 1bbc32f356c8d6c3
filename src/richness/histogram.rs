//! Histogram interpretation: raw value counts to seasonal expectations.
//!
//! The expectation is a closed form over the habitat codes. It does not
//! depend on which codes happen to be present, so an absent code simply
//! contributes zero.

use crate::core::raster::{Raster, NODATA};
use crate::core::types::{
    Season, CODE_NONE, CODE_SUMMER, CODE_WINTER, CODE_YEAR_ROUND, HABITAT_CODES,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Pixel count per cell value, nodata excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValueHistogram {
    counts: BTreeMap<u16, u64>,
}

impl ValueHistogram {
    /// Create an empty histogram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Count every data cell of a raster.
    pub fn from_raster(raster: &Raster) -> Self {
        let mut histogram = Self::new();
        for &value in raster.cells() {
            if value != NODATA {
                *histogram.counts.entry(value).or_insert(0) += 1;
            }
        }
        histogram
    }

    /// Build from explicit `(value, count)` pairs. Zero counts are dropped.
    pub fn from_counts<I>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (u16, u64)>,
    {
        let mut histogram = Self::new();
        for (value, count) in pairs {
            if value != NODATA && count > 0 {
                *histogram.counts.entry(value).or_insert(0) += count;
            }
        }
        histogram
    }

    /// Pixel count for a value, zero when absent.
    pub fn count(&self, value: u16) -> u64 {
        self.counts.get(&value).copied().unwrap_or(0)
    }

    /// Total data cells.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Values with a non-zero count, ascending.
    pub fn present_codes(&self) -> Vec<u16> {
        self.counts.keys().copied().collect()
    }

    /// Values outside the habitat code set.
    pub fn unexpected_codes(&self) -> Vec<u16> {
        self.counts
            .keys()
            .copied()
            .filter(|v| !HABITAT_CODES.contains(v))
            .collect()
    }

    /// Iterate `(value, count)` in ascending value order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, u64)> + '_ {
        self.counts.iter().map(|(&v, &c)| (v, c))
    }

    /// Whether no data cell was counted.
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    /// Whether the raster categorically cannot hold presence for `season`:
    /// at most one distinct value is present and it fails the predicate.
    pub fn excludes_season(&self, season: Season) -> bool {
        match self.present_codes().as_slice() {
            [] => true,
            [only] => !season.includes(*only),
            _ => false,
        }
    }
}

/// Expected presence cell counts per season, derived from a histogram.
///
/// Only used to verify reclassified masks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeasonalExpectation {
    /// Cells with any non-zero value.
    pub any_count: u64,
    /// Cells with summer presence (codes 1 and 3).
    pub summer_count: u64,
    /// Cells with winter presence (codes 2 and 3).
    pub winter_count: u64,
}

impl SeasonalExpectation {
    /// Derive the expectation from a histogram.
    pub fn from_histogram(histogram: &ValueHistogram) -> Self {
        let any_count = histogram
            .iter()
            .filter(|&(value, _)| value != CODE_NONE)
            .map(|(_, count)| count)
            .sum();
        Self {
            any_count,
            summer_count: histogram.count(CODE_SUMMER) + histogram.count(CODE_YEAR_ROUND),
            winter_count: histogram.count(CODE_WINTER) + histogram.count(CODE_YEAR_ROUND),
        }
    }

    /// The count matching `season`.
    pub fn for_season(&self, season: Season) -> u64 {
        match season {
            Season::Summer => self.summer_count,
            Season::Winter => self.winter_count,
            Season::Any => self.any_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RasterExtent;
    use proptest::prelude::*;

    #[test]
    fn test_summer_heavy_histogram() {
        let histogram = ValueHistogram::from_counts([(1, 100), (3, 50)]);
        let expectation = SeasonalExpectation::from_histogram(&histogram);
        assert_eq!(expectation.any_count, 150);
        assert_eq!(expectation.summer_count, 150);
        assert_eq!(expectation.winter_count, 50);
    }

    #[test]
    fn test_zero_code_not_counted_as_habitat() {
        let histogram = ValueHistogram::from_counts([(0, 1000), (2, 7)]);
        let expectation = SeasonalExpectation::from_histogram(&histogram);
        assert_eq!(expectation.any_count, 7);
        assert_eq!(expectation.summer_count, 0);
        assert_eq!(expectation.winter_count, 7);
        assert_eq!(histogram.total(), 1007);
    }

    #[test]
    fn test_from_raster_skips_nodata() {
        let raster =
            Raster::from_cells(3, 2, vec![0, 1, 1, NODATA, 3, NODATA]).unwrap();
        let histogram = ValueHistogram::from_raster(&raster);
        assert_eq!(histogram.total(), raster.data_cell_count());
        assert_eq!(histogram.count(1), 2);
        assert_eq!(histogram.count(NODATA), 0);
    }

    #[test]
    fn test_unexpected_codes() {
        let histogram = ValueHistogram::from_counts([(1, 4), (7, 2), (12, 1)]);
        assert_eq!(histogram.unexpected_codes(), vec![7, 12]);
        // Unexpected non-zero codes still count as habitat for Any.
        assert_eq!(SeasonalExpectation::from_histogram(&histogram).any_count, 7);
    }

    #[test]
    fn test_excludes_season() {
        let winter_only = ValueHistogram::from_counts([(2, 40)]);
        assert!(winter_only.excludes_season(Season::Summer));
        assert!(!winter_only.excludes_season(Season::Winter));
        assert!(!winter_only.excludes_season(Season::Any));

        let empty = ValueHistogram::new();
        assert!(empty.excludes_season(Season::Any));

        let all_zero = ValueHistogram::from_raster(&Raster::zeros(RasterExtent::new(2, 2)));
        assert!(all_zero.excludes_season(Season::Winter));

        let mixed = ValueHistogram::from_counts([(0, 5), (2, 5)]);
        assert!(!mixed.excludes_season(Season::Summer));
    }

    proptest! {
        #[test]
        fn prop_counts_independent_of_code_presence(
            c0 in proptest::option::of(1u64..10_000),
            c1 in proptest::option::of(1u64..10_000),
            c2 in proptest::option::of(1u64..10_000),
            c3 in proptest::option::of(1u64..10_000),
        ) {
            let pairs: Vec<(u16, u64)> = [(0u16, c0), (1, c1), (2, c2), (3, c3)]
                .into_iter()
                .filter_map(|(v, c)| c.map(|c| (v, c)))
                .collect();
            let forward = ValueHistogram::from_counts(pairs.clone());
            let reversed = ValueHistogram::from_counts(pairs.into_iter().rev());
            let e = SeasonalExpectation::from_histogram(&forward);

            let n = |c: Option<u64>| c.unwrap_or(0);
            prop_assert_eq!(e.summer_count, n(c1) + n(c3));
            prop_assert_eq!(e.winter_count, n(c2) + n(c3));
            prop_assert_eq!(e.any_count, n(c1) + n(c2) + n(c3));
            prop_assert_eq!(e, SeasonalExpectation::from_histogram(&reversed));
        }

        #[test]
        fn prop_histogram_total_matches_data_cells(
            cells in proptest::collection::vec(
                prop_oneof![Just(NODATA), 0u16..4], 1..200)
        ) {
            let len = cells.len() as u32;
            let raster = Raster::from_cells(len, 1, cells).unwrap();
            let histogram = ValueHistogram::from_raster(&raster);
            prop_assert_eq!(histogram.total(), raster.data_cell_count());
        }
    }
}
