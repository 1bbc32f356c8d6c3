//! Error types for the richness pipeline.
//!
//! Uses thiserror for structured errors with context. Errors fall in two groups:
//! - Fatal errors (`RichnessError`) that halt a run, such as a failed write of
//!   the final richness surface
//! - Recorded conditions (`SpeciesFailure`, `Anomaly`) that are collected into
//!   the run summary while processing continues

use crate::core::types::{RasterExtent, Season, SpeciesCode};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type.
///
/// Only storage failures on a required output, invalid configuration and
/// cancellation surface here; per-species problems never do.
#[derive(Error, Debug)]
pub enum RichnessError {
    /// The anchor or a required raster could not be used.
    #[error("Raster error: {0}")]
    Raster(#[from] RasterError),

    /// The configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A required output could not be written.
    #[error("Failed to write {path}: {error}")]
    Write {
        /// Output that failed.
        path: PathBuf,
        /// Underlying error message.
        error: String,
    },

    /// The run stopped on a cancellation request.
    #[error("Run cancelled after {completed}/{total} batches")]
    Cancelled {
        /// Batches finished before the request.
        completed: usize,
        /// Batches in the run.
        total: usize,
    },

    /// File system error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// The worker pool could not be built.
    #[error("Thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
}

/// Errors from the raster collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RasterError {
    /// No raster at the path.
    #[error("Raster not found: {}", path.display())]
    NotFound {
        /// Requested path.
        path: PathBuf,
    },

    /// The raster exists but cannot be decoded.
    #[error("Cannot read raster {}: {error}", path.display())]
    Unreadable {
        /// Requested path.
        path: PathBuf,
        /// Decoder message.
        error: String,
    },

    /// The raster cannot be stored.
    #[error("Cannot write raster {}: {error}", path.display())]
    Write {
        /// Destination path.
        path: PathBuf,
        /// Encoder or file system message.
        error: String,
    },

    /// Two rasters are on different grids.
    #[error("Raster extent {got} does not match expected {expected}")]
    ShapeMismatch {
        /// Reference grid.
        expected: RasterExtent,
        /// Grid found.
        got: RasterExtent,
    },

    /// A cell buffer does not fit its extent.
    #[error("Cell buffer holds {got} cells, extent {extent} needs {}", extent.cell_count())]
    BufferSize {
        /// Declared grid.
        extent: RasterExtent,
        /// Cells supplied.
        got: usize,
    },

    /// A cell-wise sum reached the nodata value.
    #[error("Cell-wise sum overflowed the 16-bit count range")]
    Overflow,
}

/// Errors in run configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration file cannot be read.
    #[error("Cannot read configuration {}: {error}", path.display())]
    Unreadable {
        /// Configuration path.
        path: PathBuf,
        /// File system message.
        error: String,
    },

    /// The configuration text or a pattern in it is malformed.
    #[error("Invalid configuration: {0}")]
    Parse(String),

    /// Batch size out of range.
    #[error("Batch size must be between 1 and {max}, got {got}")]
    BatchSize {
        /// Configured size.
        got: usize,
        /// Largest allowed size.
        max: usize,
    },

    /// Group name unusable as a directory name.
    #[error("Group name '{0}' must be non-empty and contain no path separators")]
    GroupName(String),

    /// Discovery found no species rasters.
    #[error("No species given and none found under {}", dir.display())]
    NoSpecies {
        /// Model directory searched.
        dir: PathBuf,
    },

    /// More species than a richness cell can count.
    #[error("{got} species requested, at most {max} fit the 16-bit count range")]
    TooManySpecies {
        /// Species requested.
        got: usize,
        /// Largest supported count.
        max: usize,
    },
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e.to_string())
    }
}

/// A species that could not contribute to the richness surface.
///
/// Failures are recorded and reported at the end of the run; the species is
/// removed from the effective denominator.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{species}: {kind}")]
pub struct SpeciesFailure {
    /// The species that failed.
    pub species: SpeciesCode,
    /// What went wrong.
    pub kind: FailureKind,
}

/// Why a species failed.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// No raster at the expected path.
    #[error("missing input raster {}", path.display())]
    MissingInput {
        /// Expected raster path.
        path: PathBuf,
    },

    /// The raster exists but cannot be decoded.
    #[error("unreadable input raster {}: {error}", path.display())]
    Unreadable {
        /// Raster path.
        path: PathBuf,
        /// Decoder message.
        error: String,
    },

    /// The raster is not on the anchor grid.
    #[error("raster extent {got} is not aligned with anchor extent {expected}")]
    Misaligned {
        /// Anchor grid.
        expected: RasterExtent,
        /// Species raster grid.
        got: RasterExtent,
    },
}

impl SpeciesFailure {
    /// Classify a raster error raised while loading a species.
    pub fn from_raster_error(species: SpeciesCode, error: RasterError) -> Self {
        let kind = match error {
            RasterError::NotFound { path } => FailureKind::MissingInput { path },
            RasterError::Unreadable { path, error } | RasterError::Write { path, error } => {
                FailureKind::Unreadable { path, error }
            }
            RasterError::ShapeMismatch { expected, got } => {
                FailureKind::Misaligned { expected, got }
            }
            other => FailureKind::Unreadable {
                path: PathBuf::new(),
                error: other.to_string(),
            },
        };
        Self { species, kind }
    }

    /// Whether the species raster was absent.
    pub fn is_missing_input(&self) -> bool {
        matches!(self.kind, FailureKind::MissingInput { .. })
    }
}

/// Where a count bound was checked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BoundScope {
    /// An intermediate checkpoint.
    Batch {
        /// Offset of the batch in the species list.
        offset: usize,
    },
    /// The final richness surface.
    Final,
}

impl fmt::Display for BoundScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoundScope::Batch { offset } => write!(f, "batch at offset {}", offset),
            BoundScope::Final => f.write_str("final richness"),
        }
    }
}

/// A non-fatal inconsistency found while verifying a transformation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Anomaly {
    /// Reclassified presence count disagrees with the histogram expectation.
    IntegrityMismatch {
        /// Species checked.
        species: SpeciesCode,
        /// Season of the mask.
        season: Season,
        /// Count derived from the histogram.
        expected: u64,
        /// Presence cells in the mask.
        actual: u64,
    },
    /// Histogram holds values outside the habitat code set.
    UnexpectedCodes {
        /// Species checked.
        species: SpeciesCode,
        /// Values outside the code set, ascending.
        codes: Vec<u16>,
    },
    /// A richness surface exceeded (or, when exact, missed) its expected maximum.
    BoundViolation {
        /// Surface checked.
        scope: BoundScope,
        /// Maximum cell value found.
        max: u32,
        /// Contributing species.
        limit: usize,
        /// Whether the maximum had to equal the limit.
        exact: bool,
    },
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::IntegrityMismatch {
                species,
                season,
                expected,
                actual,
            } => write!(
                f,
                "{}: {} mask has {} presence cells, histogram expects {}",
                species, season, actual, expected
            ),
            Anomaly::UnexpectedCodes { species, codes } => {
                write!(f, "{}: unexpected habitat codes {:?}", species, codes)
            }
            Anomaly::BoundViolation {
                scope,
                max,
                limit,
                exact,
            } => {
                let relation = if *exact { "==" } else { "<=" };
                write!(
                    f,
                    "{}: maximum cell value {} violates max {} {}",
                    scope, max, relation, limit
                )
            }
        }
    }
}

// ============================================================================
// Error Utilities
// ============================================================================

impl RichnessError {
    /// Build a write error for a required output.
    pub fn write(path: impl Into<PathBuf>, error: impl fmt::Display) -> Self {
        RichnessError::Write {
            path: path.into(),
            error: error.to_string(),
        }
    }

    /// Whether a run interrupted by this error can be resumed from its checkpoints.
    pub fn is_resumable(&self) -> bool {
        matches!(
            self,
            RichnessError::Cancelled { .. } | RichnessError::Write { .. } | RichnessError::Io(_)
        )
    }
}

impl RasterError {
    /// Whether the run can continue without the raster that raised this,
    /// recording it as a failed species or a dropped checkpoint.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, RasterError::Write { .. } | RasterError::Overflow)
    }
}

/// Result type alias for run-level operations.
pub type RichnessResult<T> = Result<T, RichnessError>;

/// Result type alias for raster operations.
pub type RasterResult<T> = Result<T, RasterError>;
