//! Species richness aggregation.
//!
//! Habitat rasters are interpreted through their value histograms,
//! reclassified into seasonal presence masks, summed per batch into
//! checkpoints, and the checkpoints are reduced into the final surface.

pub mod driver;
pub mod histogram;
pub mod processor;
pub mod reclass;

pub use driver::AggregationDriver;
pub use histogram::{SeasonalExpectation, ValueHistogram};
pub use processor::{BatchOutcome, BatchProcessor, SpeciesReport, SpeciesStatus};
pub use reclass::{PresenceMask, Reclassified, SeasonalReclassifier};
