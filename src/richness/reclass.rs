//! Seasonal reclassification of one species' habitat raster.
//!
//! For a target season the reclassifier:
//! 1. loads the raw habitat raster and checks it against the anchor grid
//! 2. skips the species if its histogram categorically excludes the season
//! 3. maps raw codes to a binary [`PresenceMask`]
//! 4. verifies the mask's presence count against the histogram expectation
//!
//! Loading and alignment problems become a [`SpeciesFailure`]; verification
//! problems become [`Anomaly`] records. Neither stops the run.

use crate::core::error::{Anomaly, RasterResult, SpeciesFailure};
use crate::core::raster::{Raster, NODATA, PRESENT};
use crate::core::store::RasterStore;
use crate::core::types::{RasterExtent, Season, SpeciesCode};
use crate::richness::histogram::{SeasonalExpectation, ValueHistogram};
use std::path::Path;

/// A binary raster: every data cell is [`PRESENT`], everything else is nodata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceMask(Raster);

impl PresenceMask {
    /// Reclassify raw habitat codes for a season.
    pub fn from_habitat(raster: &Raster, season: Season) -> Self {
        Self(raster.reclassify(|code| season.includes(code)))
    }

    /// Wrap a raster already known to be binary.
    ///
    /// Returns `None` if any data cell differs from [`PRESENT`].
    pub fn from_raster(raster: Raster) -> Option<Self> {
        raster
            .cells()
            .iter()
            .all(|&v| v == PRESENT || v == NODATA)
            .then_some(Self(raster))
    }

    /// Register the mask on the anchor's marker cells.
    ///
    /// A marker cell becomes present only where `habitat`, the raster the
    /// mask was built from, holds nodata. Valid data cells keep their
    /// seasonal presence, so a species with data under the marker and no
    /// presence there fails to register.
    pub fn expand_onto(&self, habitat: &Raster, anchor: &Raster) -> RasterResult<PresenceMask> {
        anchor.check_aligned(&self.0)?;
        anchor.check_aligned(habitat)?;
        let cells = self
            .0
            .cells()
            .iter()
            .zip(habitat.cells())
            .zip(anchor.cells())
            .map(|((&m, &h), &a)| {
                let marker = a != NODATA && a > 0;
                if m == PRESENT || (marker && h == NODATA) {
                    PRESENT
                } else {
                    NODATA
                }
            })
            .collect();
        let raster = Raster::from_cells(anchor.width(), anchor.height(), cells)?;
        Ok(Self(raster))
    }

    /// Number of present cells.
    pub fn presence_count(&self) -> u64 {
        self.0.count_value(PRESENT)
    }

    /// Grid dimensions.
    pub fn extent(&self) -> RasterExtent {
        self.0.extent()
    }

    /// Borrow the underlying raster.
    pub fn as_raster(&self) -> &Raster {
        &self.0
    }
}

/// Result of reclassifying one species.
#[derive(Debug)]
pub enum Reclassified {
    /// A usable mask, with any verification anomalies.
    Mask {
        /// Binary mask, expanded onto the anchor when requested.
        mask: PresenceMask,
        /// Presence counts derived from the source histogram.
        expectation: SeasonalExpectation,
        /// Presence cells of the unexpanded mask.
        presence_cells: u64,
        /// Verification problems found for this species.
        anomalies: Vec<Anomaly>,
    },
    /// The raster cannot hold presence in the target season.
    Skipped {
        /// The single value the raster holds, if any.
        only_code: Option<u16>,
    },
    /// The raster could not be used.
    Failed(SpeciesFailure),
}

/// Reclassifies species rasters for one season against one anchor grid.
pub struct SeasonalReclassifier<'a> {
    store: &'a dyn RasterStore,
    anchor: &'a Raster,
    season: Season,
    expand: bool,
}

impl<'a> SeasonalReclassifier<'a> {
    /// Create a reclassifier.
    pub fn new(store: &'a dyn RasterStore, anchor: &'a Raster, season: Season, expand: bool) -> Self {
        Self {
            store,
            anchor,
            season,
            expand,
        }
    }

    /// Reclassify the raster at `path` for `species`.
    pub fn reclassify(&self, species: &SpeciesCode, path: &Path) -> Reclassified {
        let raster = match self.load_aligned(path) {
            Ok(raster) => raster,
            Err(error) => {
                log::warn!("{}: {}", species, error);
                return Reclassified::Failed(SpeciesFailure::from_raster_error(
                    species.clone(),
                    error,
                ));
            }
        };

        let histogram = ValueHistogram::from_raster(&raster);
        if histogram.excludes_season(self.season) {
            let only_code = histogram.present_codes().first().copied();
            log::info!(
                "{}: skipped, raster holds only {:?} which has no {} habitat",
                species,
                only_code,
                self.season
            );
            return Reclassified::Skipped { only_code };
        }

        self.reclassify_loaded(species, &raster, &histogram)
    }

    /// Reclassify an already loaded and aligned raster.
    pub fn reclassify_loaded(
        &self,
        species: &SpeciesCode,
        raster: &Raster,
        histogram: &ValueHistogram,
    ) -> Reclassified {
        let mut anomalies = Vec::new();

        let unexpected = histogram.unexpected_codes();
        if !unexpected.is_empty() {
            log::warn!("{}: unexpected habitat codes {:?}", species, unexpected);
            anomalies.push(Anomaly::UnexpectedCodes {
                species: species.clone(),
                codes: unexpected,
            });
        }

        let expectation = SeasonalExpectation::from_histogram(histogram);
        let mask = PresenceMask::from_habitat(raster, self.season);
        let presence_cells = mask.presence_count();
        let expected = expectation.for_season(self.season);

        if presence_cells != expected {
            log::warn!(
                "{}: {} mask has {} presence cells, histogram expects {}",
                species,
                self.season,
                presence_cells,
                expected
            );
            anomalies.push(Anomaly::IntegrityMismatch {
                species: species.clone(),
                season: self.season,
                expected,
                actual: presence_cells,
            });
        }

        let mask = if self.expand {
            match mask.expand_onto(raster, self.anchor) {
                Ok(expanded) => expanded,
                Err(error) => {
                    return Reclassified::Failed(SpeciesFailure::from_raster_error(
                        species.clone(),
                        error,
                    ))
                }
            }
        } else {
            mask
        };

        Reclassified::Mask {
            mask,
            expectation,
            presence_cells,
            anomalies,
        }
    }

    fn load_aligned(&self, path: &Path) -> RasterResult<Raster> {
        let raster = self.store.read(path)?;
        self.anchor.check_aligned(&raster)?;
        Ok(raster)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::FailureKind;
    use crate::core::store::MemoryRasterStore;
    use proptest::prelude::*;

    fn extent() -> RasterExtent {
        RasterExtent::new(4, 2)
    }

    fn habitat(cells: Vec<u16>) -> Raster {
        Raster::from_cells(4, 2, cells).unwrap()
    }

    #[test]
    fn test_summer_mask() {
        let store = MemoryRasterStore::new();
        store.insert("/m/a.tif", habitat(vec![0, 1, 2, 3, 3, NODATA, 1, 0]));
        let anchor = Raster::zeros(extent());
        let reclassifier = SeasonalReclassifier::new(&store, &anchor, Season::Summer, false);

        match reclassifier.reclassify(&"a".into(), Path::new("/m/a.tif")) {
            Reclassified::Mask {
                mask,
                presence_cells,
                anomalies,
                expectation,
            } => {
                assert_eq!(presence_cells, 4);
                assert_eq!(expectation.summer_count, 4);
                assert!(anomalies.is_empty());
                assert_eq!(
                    mask.as_raster().cells(),
                    &[NODATA, 1, NODATA, 1, 1, NODATA, 1, NODATA]
                );
            }
            other => panic!("expected mask, got {:?}", other),
        }
    }

    #[test]
    fn test_winter_only_raster_skipped_for_summer() {
        let store = MemoryRasterStore::new();
        store.insert("/m/w.tif", habitat(vec![2; 8]));
        let anchor = Raster::zeros(extent());
        let reclassifier = SeasonalReclassifier::new(&store, &anchor, Season::Summer, false);

        assert!(matches!(
            reclassifier.reclassify(&"w".into(), Path::new("/m/w.tif")),
            Reclassified::Skipped { only_code: Some(2) }
        ));
    }

    #[test]
    fn test_missing_raster_fails() {
        let store = MemoryRasterStore::new();
        let anchor = Raster::zeros(extent());
        let reclassifier = SeasonalReclassifier::new(&store, &anchor, Season::Any, false);

        match reclassifier.reclassify(&"gone".into(), Path::new("/m/gone.tif")) {
            Reclassified::Failed(failure) => assert!(failure.is_missing_input()),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_misaligned_raster_fails() {
        let store = MemoryRasterStore::new();
        store.insert("/m/a.tif", Raster::filled(RasterExtent::new(3, 3), 1));
        let anchor = Raster::zeros(extent());
        let reclassifier = SeasonalReclassifier::new(&store, &anchor, Season::Any, false);

        match reclassifier.reclassify(&"a".into(), Path::new("/m/a.tif")) {
            Reclassified::Failed(failure) => {
                assert!(matches!(failure.kind, FailureKind::Misaligned { .. }))
            }
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[test]
    fn test_unexpected_codes_flagged_not_fatal() {
        let store = MemoryRasterStore::new();
        store.insert("/m/a.tif", habitat(vec![0, 1, 9, 3, 0, 0, 0, 0]));
        let anchor = Raster::zeros(extent());
        let reclassifier = SeasonalReclassifier::new(&store, &anchor, Season::Any, false);

        match reclassifier.reclassify(&"a".into(), Path::new("/m/a.tif")) {
            Reclassified::Mask {
                presence_cells,
                anomalies,
                ..
            } => {
                assert_eq!(presence_cells, 3);
                assert_eq!(anomalies.len(), 1);
                assert!(matches!(anomalies[0], Anomaly::UnexpectedCodes { .. }));
            }
            other => panic!("expected mask, got {:?}", other),
        }
    }

    #[test]
    fn test_integrity_mismatch_recorded() {
        let anchor = Raster::zeros(extent());
        let store = MemoryRasterStore::new();
        let reclassifier = SeasonalReclassifier::new(&store, &anchor, Season::Winter, false);
        let raster = habitat(vec![2, 2, 0, 0, 0, 0, 0, 0]);
        // A histogram that disagrees with the raster it claims to describe.
        let histogram = ValueHistogram::from_counts([(2, 5), (0, 3)]);

        match reclassifier.reclassify_loaded(&"a".into(), &raster, &histogram) {
            Reclassified::Mask { anomalies, presence_cells, .. } => {
                assert_eq!(presence_cells, 2);
                assert_eq!(
                    anomalies,
                    vec![Anomaly::IntegrityMismatch {
                        species: "a".into(),
                        season: Season::Winter,
                        expected: 5,
                        actual: 2,
                    }]
                );
            }
            other => panic!("expected mask, got {:?}", other),
        }
    }

    #[test]
    fn test_expand_registers_marker_on_nodata() {
        let store = MemoryRasterStore::new();
        store.insert("/m/a.tif", habitat(vec![NODATA, 0, 0, 1, 0, 0, 0, 0]));
        let anchor = Raster::anchor(extent(), 1);
        let reclassifier = SeasonalReclassifier::new(&store, &anchor, Season::Summer, true);

        match reclassifier.reclassify(&"a".into(), Path::new("/m/a.tif")) {
            Reclassified::Mask { mask, presence_cells, .. } => {
                // Verification uses the unexpanded count.
                assert_eq!(presence_cells, 1);
                assert_eq!(mask.presence_count(), 2);
                assert_eq!(mask.as_raster().get(0, 0), PRESENT);
                assert_eq!(mask.as_raster().get(3, 0), PRESENT);
            }
            other => panic!("expected mask, got {:?}", other),
        }
    }

    #[test]
    fn test_expand_keeps_valid_absence_under_marker() {
        let store = MemoryRasterStore::new();
        store.insert("/m/a.tif", habitat(vec![0, 2, 0, 1, 0, 0, 0, 0]));
        let anchor = Raster::anchor(extent(), 2);
        let reclassifier = SeasonalReclassifier::new(&store, &anchor, Season::Summer, true);

        match reclassifier.reclassify(&"a".into(), Path::new("/m/a.tif")) {
            Reclassified::Mask { mask, .. } => {
                // Codes 0 and 2 under the marker are valid summer absence.
                assert_eq!(mask.presence_count(), 1);
                assert_eq!(mask.as_raster().get(0, 0), NODATA);
                assert_eq!(mask.as_raster().get(1, 0), NODATA);
                assert_eq!(mask.as_raster().get(0, 1), NODATA);
            }
            other => panic!("expected mask, got {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_mask_is_binary(
            cells in proptest::collection::vec(prop_oneof![Just(NODATA), 0u16..6], 8),
            season_index in 0usize..3,
        ) {
            let season = Season::ALL[season_index];
            let raster = habitat(cells);
            let mask = PresenceMask::from_habitat(&raster, season);
            prop_assert!(mask.as_raster().cells().iter().all(|&v| v == PRESENT || v == NODATA));

            let expanded = mask.expand_onto(&raster, &Raster::anchor(extent(), 2)).unwrap();
            prop_assert!(expanded.as_raster().cells().iter().all(|&v| v == PRESENT || v == NODATA));
            prop_assert!(PresenceMask::from_raster(expanded.as_raster().clone()).is_some());

            // Data cells keep their seasonal presence.
            for ((&raw, &before), &after) in raster
                .cells()
                .iter()
                .zip(mask.as_raster().cells())
                .zip(expanded.as_raster().cells())
            {
                if raw != NODATA {
                    prop_assert_eq!(before, after);
                }
            }
        }
    }
}
