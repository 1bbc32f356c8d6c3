//! Run configuration.
//!
//! A [`RichnessConfig`] can be built in code with the `with_*` setters or
//! loaded from a TOML file:
//!
//! ```toml
//! group_name = "raptors"
//! species = ["aagtox", "bbaeax", "mnarox"]
//! output_location = "/data/richness"
//! model_directory = "/data/models"
//! anchor_raster = "/data/conus_anchor.tif"
//! season = "Summer"
//! batch_size = 20
//! expand = false
//! ```

use crate::core::error::ConfigError;
use crate::core::raster::NODATA;
use crate::core::types::{Season, SpeciesCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Largest species count whose per-cell sum can never collide with nodata.
pub const MAX_SPECIES: usize = (NODATA - 1) as usize;

/// Largest batch size. A batch never holds more species than a run.
pub const MAX_BATCH_SIZE: usize = MAX_SPECIES;

/// Default number of species per checkpoint.
pub const DEFAULT_BATCH_SIZE: usize = 20;

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_extension() -> String {
    "tif".to_string()
}

/// Configuration for one richness run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichnessConfig {
    /// Species to include, in processing order. Empty means every raster in
    /// the model directory.
    #[serde(default)]
    pub species: Vec<SpeciesCode>,
    /// Label used for the output directory and file names.
    pub group_name: String,
    /// Directory under which `<group_name>/` is created.
    pub output_location: PathBuf,
    /// Directory holding one habitat raster per species.
    pub model_directory: PathBuf,
    /// Seasonal definition.
    #[serde(default)]
    pub season: Season,
    /// Species per batch (and per intermediate checkpoint).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Add every mask onto the anchor surface as a registration check.
    #[serde(default)]
    pub expand: bool,
    /// Surface defining the output grid and used for alignment checks.
    pub anchor_raster: PathBuf,
    /// Reclassify species within a batch concurrently.
    #[serde(default)]
    pub parallel: bool,
    /// Worker threads when parallel (0 = all available).
    #[serde(default)]
    pub max_threads: usize,
    /// Reuse matching checkpoints from an earlier run.
    #[serde(default)]
    pub resume: bool,
    /// Leave the scratch directory in place after the run.
    #[serde(default)]
    pub keep_scratch: bool,
    /// File extension of species rasters.
    #[serde(default = "default_extension")]
    pub raster_extension: String,
}

impl RichnessConfig {
    /// Create a configuration with default options.
    pub fn new(
        group_name: impl Into<String>,
        output_location: impl Into<PathBuf>,
        model_directory: impl Into<PathBuf>,
        anchor_raster: impl Into<PathBuf>,
    ) -> Self {
        Self {
            species: Vec::new(),
            group_name: group_name.into(),
            output_location: output_location.into(),
            model_directory: model_directory.into(),
            season: Season::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            expand: false,
            anchor_raster: anchor_raster.into(),
            parallel: false,
            max_threads: 0,
            resume: false,
            keep_scratch: false,
            raster_extension: default_extension(),
        }
    }

    /// Load from a TOML file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::Unreadable {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Set the species list.
    pub fn with_species<I, S>(mut self, species: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SpeciesCode>,
    {
        self.species = species.into_iter().map(Into::into).collect();
        self
    }

    /// Set the season.
    pub fn with_season(mut self, season: Season) -> Self {
        self.season = season;
        self
    }

    /// Set the batch size.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Enable or disable expansion mode.
    pub fn with_expand(mut self, expand: bool) -> Self {
        self.expand = expand;
        self
    }

    /// Enable or disable concurrent reclassification.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set the worker thread bound.
    pub fn with_max_threads(mut self, threads: usize) -> Self {
        self.max_threads = threads;
        self
    }

    /// Enable or disable checkpoint reuse.
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    /// Keep or remove the scratch directory at the end of the run.
    pub fn with_keep_scratch(mut self, keep: bool) -> Self {
        self.keep_scratch = keep;
        self
    }

    /// Check option ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(ConfigError::BatchSize {
                got: self.batch_size,
                max: MAX_BATCH_SIZE,
            });
        }
        let name = self.group_name.trim();
        if name.is_empty() || name.contains('/') || name.contains('\\') || name == ".." {
            return Err(ConfigError::GroupName(self.group_name.clone()));
        }
        Ok(())
    }

    /// Path of a species' habitat raster.
    pub fn species_raster(&self, species: &SpeciesCode) -> PathBuf {
        self.model_directory
            .join(format!("{}.{}", species, self.raster_extension))
    }

    /// The configured species, or every raster stem in the model directory
    /// (sorted) when none were given.
    ///
    /// Fails when the list is longer than [`MAX_SPECIES`], since the final
    /// surface could not hold its counts.
    pub fn resolve_species(&self) -> Result<Vec<SpeciesCode>, ConfigError> {
        let species = if self.species.is_empty() {
            self.discover_species()?
        } else {
            self.species.clone()
        };
        if species.len() > MAX_SPECIES {
            return Err(ConfigError::TooManySpecies {
                got: species.len(),
                max: MAX_SPECIES,
            });
        }
        Ok(species)
    }

    fn discover_species(&self) -> Result<Vec<SpeciesCode>, ConfigError> {

        let pattern = self
            .model_directory
            .join(format!("*.{}", self.raster_extension));
        let pattern = pattern.to_string_lossy();
        let entries = glob::glob(&pattern).map_err(|e| ConfigError::Parse(e.to_string()))?;

        let mut species: Vec<SpeciesCode> = entries
            .filter_map(Result::ok)
            .filter(|p| p.is_file())
            .filter_map(|p| p.file_stem().map(|s| SpeciesCode::new(s.to_string_lossy())))
            .collect();
        species.sort();

        if species.is_empty() {
            return Err(ConfigError::NoSpecies {
                dir: self.model_directory.clone(),
            });
        }
        Ok(species)
    }
}
