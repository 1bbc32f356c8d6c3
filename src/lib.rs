//! # Habitat Richness - Batch Species Richness Aggregation
//!
//! Builds a species richness surface from per-species seasonal habitat
//! rasters. Each raster holds codes 0 (no habitat), 1 (summer), 2 (winter)
//! and 3 (year-round); every species is reduced to a binary presence mask for
//! the chosen season and the masks are summed cell by cell.
//!
//! ## Features
//!
//! - **Histogram checks**: Every mask is verified against counts derived from
//!   the source raster's value histogram
//! - **Checkpointed batches**: Species are summed in batches, each persisted as
//!   an intermediate surface with a manifest, so interrupted runs can resume
//! - **Parallel reclassification**: Species in a batch can be reclassified on a
//!   rayon pool with a deterministic result
//! - **Provenance**: Species tables, a run log, an attribute table and a JSON
//!   summary are written next to the final surface
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use habitat_richness::prelude::*;
//!
//! let config = RichnessConfig::new("raptors", "/data/richness", "/data/models", "/data/anchor.tif")
//!     .with_species(["aagtox", "bbaeax"])
//!     .with_season(Season::Summer)
//!     .with_batch_size(20);
//!
//! let store = FileRasterStore::new();
//! let outcome = AggregationDriver::new(&store, config).run()?;
//! println!("{}", outcome.summary);
//! ```
//!
//! ## Architecture
//!
//! - [`core`]: Rasters, storage, configuration, batches and errors
//! - [`richness`]: Histogram interpretation, reclassification, batch
//!   processing and the aggregation driver
//! - [`validation`]: Count-bound checks on richness surfaces
//! - [`execution`]: Progress reporting and cancellation
//! - [`provenance`]: Output layout, run log, tables, manifests and summary

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod core;
pub mod execution;
pub mod provenance;
pub mod richness;
pub mod validation;

/// Prelude module for convenient imports.
///
/// Import everything commonly needed with:
/// ```rust,ignore
/// use habitat_richness::prelude::*;
/// ```
pub mod prelude {
    // Core types
    pub use crate::core::types::{RasterExtent, Season, SpeciesCode};
    pub use crate::core::raster::{Raster, NODATA};
    pub use crate::core::store::{FileRasterStore, MemoryRasterStore, RasterStore};
    pub use crate::core::config::RichnessConfig;
    pub use crate::core::batch::Batch;

    // Errors
    pub use crate::core::error::{
        Anomaly, ConfigError, FailureKind, RasterError, RichnessError, RichnessResult,
        SpeciesFailure,
    };

    // Richness
    pub use crate::richness::driver::AggregationDriver;
    pub use crate::richness::histogram::{SeasonalExpectation, ValueHistogram};
    pub use crate::richness::processor::{BatchOutcome, BatchProcessor, SpeciesReport, SpeciesStatus};
    pub use crate::richness::reclass::{PresenceMask, Reclassified, SeasonalReclassifier};

    // Execution
    pub use crate::execution::progress::{
        CancelToken, ProgressCallback, ProgressTracker, ProgressUpdate, RunPhase, SpeciesState,
    };

    // Provenance
    pub use crate::provenance::layout::OutputLayout;
    pub use crate::provenance::summary::{BatchFailure, RunOutcome, RunSummary};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name.
pub const NAME: &str = env!("CARGO_PKG_NAME");

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_version() {
        assert!(!super::VERSION.is_empty());
        assert_eq!(super::NAME, "habitat_richness");
    }

    #[test]
    fn test_prelude_run() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryRasterStore::new();
        store.insert("/anchor.tif", Raster::anchor(RasterExtent::new(2, 2), 1));
        store.insert(
            "/models/aagtox.tif",
            Raster::from_cells(2, 2, vec![3, 1, 0, NODATA]).unwrap(),
        );

        let config = RichnessConfig::new("g", dir.path(), "/models", "/anchor.tif")
            .with_species(["aagtox"])
            .with_season(Season::Summer);
        let outcome = AggregationDriver::new(&store, config).run().unwrap();

        assert_eq!(outcome.summary.processed, 1);
        assert_eq!(store.read(&outcome.richness_path).unwrap().cells(), &[1, 1, 0, 0]);
    }
}
