//! Run summary and result.

use crate::core::batch::Batch;
use crate::core::error::{Anomaly, SpeciesFailure};
use crate::core::types::{Season, SpeciesCode};
use crate::provenance::run_log::format_duration;
use crate::richness::processor::BatchOutcome;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// A batch whose checkpoint could not be persisted or read back.
///
/// Its species are excluded from the final surface and its denominator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    /// Offset of the batch.
    pub offset: usize,
    /// Species requested in the batch.
    pub species: Vec<SpeciesCode>,
    /// Why the checkpoint was lost.
    pub error: String,
}

/// Counts, failures and anomalies of one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Group name.
    pub group: String,
    /// Season of the run.
    pub season: Season,
    /// RFC 3339 start time.
    pub started_at: String,
    /// Species requested.
    pub requested: usize,
    /// Species that contributed to the final surface.
    pub processed: usize,
    /// Species skipped for the season.
    pub skipped: usize,
    /// Species that failed.
    pub failed: usize,
    /// Species in dropped batches.
    pub dropped: usize,
    /// Batches in the run.
    pub batches: usize,
    /// Batches reused from an earlier run.
    pub resumed_batches: usize,
    /// Batches dropped because their checkpoint was lost.
    pub failed_batches: Vec<BatchFailure>,
    /// Sum of the batch denominators that reached the final surface.
    pub total_denominator: usize,
    /// Maximum cell value of the final surface.
    pub final_max: u32,
    /// Per-species failures.
    pub failures: Vec<SpeciesFailure>,
    /// Verification anomalies.
    pub anomalies: Vec<Anomaly>,
    /// Wall time of the run.
    pub runtime_ms: u64,
}

impl RunSummary {
    /// Start a summary for a run.
    pub fn new(
        group: impl Into<String>,
        season: Season,
        started_at: DateTime<Local>,
        requested: usize,
        batches: usize,
    ) -> Self {
        Self {
            group: group.into(),
            season,
            started_at: started_at.to_rfc3339(),
            requested,
            processed: 0,
            skipped: 0,
            failed: 0,
            dropped: 0,
            batches,
            resumed_batches: 0,
            failed_batches: Vec::new(),
            total_denominator: 0,
            final_max: 0,
            failures: Vec::new(),
            anomalies: Vec::new(),
            runtime_ms: 0,
        }
    }

    /// Fold in a batch whose checkpoint is part of the reduction.
    pub fn record_batch(&mut self, outcome: &BatchOutcome) {
        self.processed += outcome.denominator;
        self.skipped += outcome.skipped_count();
        self.failures.extend(outcome.failures().cloned());
        self.failed = self.failures.len();
        self.anomalies.extend(outcome.anomalies.iter().cloned());
        self.total_denominator += outcome.denominator;
        if outcome.resumed {
            self.resumed_batches += 1;
        }
    }

    /// Record a batch dropped from the reduction.
    pub fn record_failed_batch(&mut self, batch: &Batch, error: impl fmt::Display) {
        self.dropped += batch.len();
        self.failed_batches.push(BatchFailure {
            offset: batch.offset,
            species: batch.species.clone(),
            error: error.to_string(),
        });
    }

    /// Whether nothing went wrong.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty() && self.anomalies.is_empty() && self.failed_batches.is_empty()
    }

    /// Human-readable report.
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("Richness summary for {} ({})", self.group, self.season),
            format!("  Species requested: {}", self.requested),
            format!(
                "  Processed: {}, skipped: {}, failed: {}, dropped: {}",
                self.processed, self.skipped, self.failed, self.dropped
            ),
            format!(
                "  Batches: {} ({} resumed, {} failed)",
                self.batches,
                self.resumed_batches,
                self.failed_batches.len()
            ),
            format!(
                "  Effective denominator: {}, final maximum: {}",
                self.total_denominator, self.final_max
            ),
            format!(
                "  Runtime: {}",
                format_duration(Duration::from_millis(self.runtime_ms))
            ),
        ];

        if !self.failures.is_empty() {
            lines.push("  Failures:".to_string());
            lines.extend(self.failures.iter().map(|f| format!("    - {}", f)));
        }
        if !self.anomalies.is_empty() {
            lines.push("  Anomalies:".to_string());
            lines.extend(self.anomalies.iter().map(|a| format!("    - {}", a)));
        }
        if !self.failed_batches.is_empty() {
            lines.push("  Failed batches:".to_string());
            lines.extend(self.failed_batches.iter().map(|b| {
                format!(
                    "    - offset {} ({} species): {}",
                    b.offset,
                    b.species.len(),
                    b.error
                )
            }));
        }
        lines.join("\n")
    }

    /// Write as pretty JSON.
    pub fn write(&self, path: &Path) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush()
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// What a completed run returns.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Final richness surface.
    pub richness_path: PathBuf,
    /// Requested species table.
    pub species_table_path: PathBuf,
    /// Run summary.
    pub summary: RunSummary,
}
