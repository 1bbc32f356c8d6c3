//! Checkpoint manifests.
//!
//! Each intermediate checkpoint is accompanied by a JSON manifest describing
//! the inputs that produced it. A later run uses the manifest to decide
//! whether the checkpoint can be reused.

use crate::core::batch::Batch;
use crate::core::error::Anomaly;
use crate::core::types::{Season, SpeciesCode};
use crate::richness::processor::{BatchOutcome, SpeciesReport};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

/// Description of one batch checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    /// Group the checkpoint belongs to.
    pub group: String,
    /// Offset of the batch in the species list.
    pub offset: usize,
    /// Season the masks were built for.
    pub season: Season,
    /// Whether masks were expanded onto the anchor.
    pub expand: bool,
    /// Species requested for the batch, in order.
    pub species: Vec<SpeciesCode>,
    /// Per-species outcomes, in batch order.
    pub reports: Vec<SpeciesReport>,
    /// Effective denominator of the batch.
    pub denominator: usize,
    /// Observed maximum cell value.
    pub max: u32,
    /// Anomalies raised while building the checkpoint.
    pub anomalies: Vec<Anomaly>,
    /// RFC 3339 time the checkpoint was written.
    pub written_at: String,
}

impl CheckpointManifest {
    /// Describe a freshly written checkpoint.
    pub fn from_outcome(
        group: &str,
        batch: &Batch,
        season: Season,
        expand: bool,
        outcome: &BatchOutcome,
    ) -> Self {
        Self {
            group: group.to_string(),
            offset: batch.offset,
            season,
            expand,
            species: batch.species.clone(),
            reports: outcome.reports.clone(),
            denominator: outcome.denominator,
            max: outcome.max,
            anomalies: outcome.anomalies.clone(),
            written_at: chrono::Local::now().to_rfc3339(),
        }
    }

    /// Whether the checkpoint was produced for exactly this batch and options.
    pub fn matches(&self, batch: &Batch, season: Season, expand: bool) -> bool {
        self.offset == batch.offset
            && self.species == batch.species
            && self.season == season
            && self.expand == expand
            && self.reports.len() == batch.species.len()
    }

    /// Turn the manifest back into a batch outcome.
    pub fn into_outcome(self, checkpoint: PathBuf) -> BatchOutcome {
        BatchOutcome {
            offset: self.offset,
            checkpoint,
            denominator: self.denominator,
            max: self.max,
            reports: self.reports,
            anomalies: self.anomalies,
            resumed: true,
        }
    }

    /// Write as pretty JSON.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()
    }

    /// Read a manifest.
    pub fn read(path: &Path) -> io::Result<Self> {
        let reader = BufReader::new(File::open(path)?);
        Ok(serde_json::from_reader(reader)?)
    }
}
