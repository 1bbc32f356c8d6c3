//! Core types for the richness pipeline.
//!
//! This module contains the foundational pieces the pipeline is built from:
//! - Value types (species codes, seasons, extents)
//! - Rasters and cell-wise algebra
//! - Raster storage backends
//! - Batch partitioning
//! - Run configuration
//! - Error types

pub mod batch;
pub mod config;
pub mod error;
pub mod raster;
pub mod store;
pub mod types;

// Re-export commonly used types
pub use batch::Batch;
pub use config::RichnessConfig;
pub use error::{Anomaly, RasterError, RichnessError, SpeciesFailure};
pub use raster::{Raster, NODATA};
pub use store::{FileRasterStore, MemoryRasterStore, RasterStore};
pub use types::{RasterExtent, Season, SpeciesCode};
