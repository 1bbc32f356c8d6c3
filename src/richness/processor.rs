//! Batch processing: reclassify, sum and checkpoint one batch of species.
//!
//! Masks are added into a single running sum as soon as they are produced and
//! dropped right after, so a sequential batch holds the sum plus one species
//! raster at a time. In parallel mode each rayon worker keeps its own partial
//! sum and the partials are reduced at the end; integer addition makes the
//! result identical to the sequential one.

use crate::core::batch::Batch;
use crate::core::config::RichnessConfig;
use crate::core::error::{
    Anomaly, BoundScope, RasterError, RasterResult, RichnessError, RichnessResult,
    SpeciesFailure,
};
use crate::core::raster::Raster;
use crate::core::store::RasterStore;
use crate::core::types::{RasterExtent, SpeciesCode};
use crate::execution::progress::{ProgressTracker, SpeciesState};
use crate::provenance::layout::OutputLayout;
use crate::provenance::manifest::CheckpointManifest;
use crate::provenance::run_log::{format_duration, RunLog};
use crate::richness::reclass::{Reclassified, SeasonalReclassifier};
use crate::validation::bounds::check_bound;
use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{Duration, Instant};

/// Outcome for one species.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeciesStatus {
    /// Contributed a mask.
    Processed {
        /// Presence cells of the unexpanded mask.
        presence_cells: u64,
    },
    /// Structurally cannot hold the season.
    Skipped {
        /// The single value the raster holds, if any.
        only_code: Option<u16>,
    },
    /// Could not be used.
    Failed(SpeciesFailure),
}

impl SpeciesStatus {
    /// Coarse state for progress reporting.
    pub fn state(&self) -> SpeciesState {
        match self {
            SpeciesStatus::Processed { .. } => SpeciesState::Processed,
            SpeciesStatus::Skipped { .. } => SpeciesState::Skipped,
            SpeciesStatus::Failed(_) => SpeciesState::Failed,
        }
    }
}

/// Per-species record kept in the checkpoint manifest and run summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpeciesReport {
    /// The species.
    pub species: SpeciesCode,
    /// What happened.
    pub status: SpeciesStatus,
    /// Wall time spent on it.
    pub duration_ms: u64,
}

impl SpeciesReport {
    /// Whether the species contributed to the sum.
    pub fn is_processed(&self) -> bool {
        matches!(self.status, SpeciesStatus::Processed { .. })
    }

    fn log_line(&self) -> String {
        let runtime = format_duration(Duration::from_millis(self.duration_ms));
        match &self.status {
            SpeciesStatus::Processed { presence_cells } => format!(
                "\t{}: {} presence cells, runtime {}",
                self.species, presence_cells, runtime
            ),
            SpeciesStatus::Skipped { only_code } => format!(
                "\t{}: SKIPPED, raster holds only {:?}",
                self.species, only_code
            ),
            SpeciesStatus::Failed(failure) => format!("\tERROR -- {}", failure),
        }
    }
}

/// Result of one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    /// Offset of the batch in the species list.
    pub offset: usize,
    /// Durable checkpoint path.
    pub checkpoint: PathBuf,
    /// Species that contributed a mask.
    pub denominator: usize,
    /// Maximum cell value of the checkpoint.
    pub max: u32,
    /// Per-species records, in batch order.
    pub reports: Vec<SpeciesReport>,
    /// Verification anomalies, including bound violations.
    pub anomalies: Vec<Anomaly>,
    /// Whether the checkpoint came from an earlier run.
    pub resumed: bool,
}

impl BatchOutcome {
    /// Species that contributed, in batch order.
    pub fn processed_species(&self) -> impl Iterator<Item = &SpeciesCode> + '_ {
        self.reports
            .iter()
            .filter(|r| r.is_processed())
            .map(|r| &r.species)
    }

    /// Number of skipped species.
    pub fn skipped_count(&self) -> usize {
        self.reports
            .iter()
            .filter(|r| matches!(r.status, SpeciesStatus::Skipped { .. }))
            .count()
    }

    /// Failed species.
    pub fn failures(&self) -> impl Iterator<Item = &SpeciesFailure> + '_ {
        self.reports.iter().filter_map(|r| match &r.status {
            SpeciesStatus::Failed(failure) => Some(failure),
            _ => None,
        })
    }
}

/// Running sum for (part of) a batch.
struct BatchPartial {
    sum: Raster,
    reports: Vec<(usize, SpeciesReport)>,
    anomalies: Vec<(usize, Anomaly)>,
}

impl BatchPartial {
    fn new(extent: RasterExtent) -> Self {
        Self {
            sum: Raster::zeros(extent),
            reports: Vec::new(),
            anomalies: Vec::new(),
        }
    }

    /// Fold one species into the sum. The mask is dropped on return.
    fn absorb(
        &mut self,
        index: usize,
        species: &SpeciesCode,
        outcome: Reclassified,
        elapsed: Duration,
    ) -> SpeciesState {
        let status = match outcome {
            Reclassified::Mask {
                mask,
                presence_cells,
                anomalies,
                ..
            } => match self.sum.accumulate(mask.as_raster()) {
                Ok(()) => {
                    self.anomalies
                        .extend(anomalies.into_iter().map(|a| (index, a)));
                    SpeciesStatus::Processed { presence_cells }
                }
                Err(error) => SpeciesStatus::Failed(SpeciesFailure::from_raster_error(
                    species.clone(),
                    error,
                )),
            },
            Reclassified::Skipped { only_code } => SpeciesStatus::Skipped { only_code },
            Reclassified::Failed(failure) => SpeciesStatus::Failed(failure),
        };
        let state = status.state();

        self.reports.push((
            index,
            SpeciesReport {
                species: species.clone(),
                status,
                duration_ms: elapsed.as_millis() as u64,
            },
        ));
        state
    }

    fn merge(mut self, other: BatchPartial) -> RasterResult<BatchPartial> {
        self.sum.accumulate(&other.sum)?;
        self.reports.extend(other.reports);
        self.anomalies.extend(other.anomalies);
        Ok(self)
    }

    fn into_sorted(mut self) -> (Raster, Vec<SpeciesReport>, Vec<Anomaly>) {
        self.reports.sort_by_key(|(i, _)| *i);
        // Stable sort keeps each species' anomalies in emission order.
        self.anomalies.sort_by_key(|(i, _)| *i);
        (
            self.sum,
            self.reports.into_iter().map(|(_, r)| r).collect(),
            self.anomalies.into_iter().map(|(_, a)| a).collect(),
        )
    }
}

/// Processes one batch at a time against a fixed anchor grid.
pub struct BatchProcessor<'a> {
    store: &'a dyn RasterStore,
    config: &'a RichnessConfig,
    layout: &'a OutputLayout,
    anchor: &'a Raster,
    log: &'a RunLog,
    tracker: &'a ProgressTracker,
    pool: Option<&'a ThreadPool>,
}

impl<'a> BatchProcessor<'a> {
    /// Create a processor.
    pub fn new(
        store: &'a dyn RasterStore,
        config: &'a RichnessConfig,
        layout: &'a OutputLayout,
        anchor: &'a Raster,
        log: &'a RunLog,
        tracker: &'a ProgressTracker,
    ) -> Self {
        Self {
            store,
            config,
            layout,
            anchor,
            log,
            tracker,
            pool: None,
        }
    }

    /// Reclassify species concurrently on `pool`.
    pub fn with_pool(mut self, pool: &'a ThreadPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Process a batch, writing its checkpoint and manifest.
    ///
    /// Species problems are recorded in the outcome. Only a failure to persist
    /// the checkpoint or its manifest is returned as an error.
    pub fn process(&self, batch: &Batch) -> RichnessResult<BatchOutcome> {
        if self.config.resume {
            if let Some(outcome) = self.try_resume(batch) {
                return Ok(outcome);
            }
        }

        let start = Instant::now();
        self.tracker
            .batch_started(batch.offset, batch.index, batch.total_batches, batch.len());
        self.log.line(format!(
            "Batch {}/{} (offset {}): {} species",
            batch.index + 1,
            batch.total_batches,
            batch.offset,
            batch.len()
        ));

        let reclassifier = SeasonalReclassifier::new(
            self.store,
            self.anchor,
            self.config.season,
            self.config.expand,
        );

        let partial = match self.pool {
            Some(pool) => self.sum_parallel(batch, &reclassifier, pool)?,
            None => self.sum_sequential(batch, &reclassifier),
        };
        let (sum, reports, mut anomalies) = partial.into_sorted();

        for report in &reports {
            self.log.line(report.log_line());
        }

        let denominator = reports.iter().filter(|r| r.is_processed()).count();
        let max = sum.max_value().unwrap_or(0) as u32;
        if let Some(violation) = check_bound(
            BoundScope::Batch {
                offset: batch.offset,
            },
            max,
            denominator,
            self.config.expand,
        ) {
            self.log.line(format!("\tWARNING! {}", violation));
            anomalies.push(violation);
        }

        let checkpoint = self.write_checkpoint(batch, &sum)?;
        drop(sum);

        let outcome = BatchOutcome {
            offset: batch.offset,
            checkpoint,
            denominator,
            max,
            reports,
            anomalies,
            resumed: false,
        };

        let manifest_path = self.layout.manifest(batch);
        CheckpointManifest::from_outcome(
            self.layout.group(),
            batch,
            self.config.season,
            self.config.expand,
            &outcome,
        )
        .write(&manifest_path)
        .map_err(|e| RichnessError::write(&manifest_path, e))?;

        self.log.line(format!(
            "\tSaved to {} (max {}, {} contributing species, runtime {})",
            outcome.checkpoint.display(),
            max,
            denominator,
            format_duration(start.elapsed())
        ));
        self.tracker.batch_completed(
            batch.offset,
            denominator,
            max,
            start.elapsed().as_millis() as u64,
        );

        Ok(outcome)
    }

    /// Reclassify one species and fold it into `partial`.
    fn contribute(
        &self,
        partial: &mut BatchPartial,
        reclassifier: &SeasonalReclassifier<'_>,
        index: usize,
        species: &SpeciesCode,
    ) {
        let start = Instant::now();
        let path = self.config.species_raster(species);
        let outcome = reclassifier.reclassify(species, &path);
        let elapsed = start.elapsed();
        let state = partial.absorb(index, species, outcome, elapsed);
        self.tracker
            .species_finished(species, state, elapsed.as_millis() as u64);
    }

    fn sum_sequential(
        &self,
        batch: &Batch,
        reclassifier: &SeasonalReclassifier<'_>,
    ) -> BatchPartial {
        let mut partial = BatchPartial::new(self.anchor.extent());
        for (index, species) in batch.species.iter().enumerate() {
            self.contribute(&mut partial, reclassifier, index, species);
        }
        partial
    }

    fn sum_parallel(
        &self,
        batch: &Batch,
        reclassifier: &SeasonalReclassifier<'_>,
        pool: &ThreadPool,
    ) -> RasterResult<BatchPartial> {
        let extent = self.anchor.extent();
        pool.install(|| {
            batch
                .species
                .par_iter()
                .enumerate()
                .fold(
                    || BatchPartial::new(extent),
                    |mut partial, (index, species)| {
                        self.contribute(&mut partial, reclassifier, index, species);
                        partial
                    },
                )
                .map(Ok::<BatchPartial, RasterError>)
                .try_reduce(|| BatchPartial::new(extent), BatchPartial::merge)
        })
    }

    /// Write into this batch's scratch area, then promote to the durable path.
    fn write_checkpoint(&self, batch: &Batch, sum: &Raster) -> RichnessResult<PathBuf> {
        let checkpoint = self.layout.checkpoint(batch);
        let scratch = self
            .layout
            .batch_scratch(batch)
            .join(format!("{}.tif", batch.checkpoint_id(self.layout.group())));

        self.store
            .write(sum, &scratch)
            .and_then(|_| self.store.promote(&scratch, &checkpoint))
            .map_err(|e| RichnessError::write(&checkpoint, e))?;

        Ok(checkpoint)
    }

    /// Reuse an existing checkpoint when its manifest matches this batch.
    fn try_resume(&self, batch: &Batch) -> Option<BatchOutcome> {
        let checkpoint = self.layout.checkpoint(batch);
        let manifest_path = self.layout.manifest(batch);
        if !self.store.exists(&checkpoint) || !manifest_path.is_file() {
            return None;
        }

        let manifest = match CheckpointManifest::read(&manifest_path) {
            Ok(manifest) => manifest,
            Err(e) => {
                log::warn!("ignoring manifest {}: {}", manifest_path.display(), e);
                return None;
            }
        };

        if !manifest.matches(batch, self.config.season, self.config.expand) {
            log::info!(
                "checkpoint {} was produced for different inputs, recomputing",
                checkpoint.display()
            );
            return None;
        }

        match self.store.extent(&checkpoint) {
            Ok(extent) if extent == self.anchor.extent() => {}
            _ => {
                log::warn!(
                    "checkpoint {} does not match the anchor grid, recomputing",
                    checkpoint.display()
                );
                return None;
            }
        }

        let states: Vec<SpeciesState> = manifest.reports.iter().map(|r| r.status.state()).collect();
        self.tracker.batch_resumed(batch.offset, &states);
        self.log.line(format!(
            "Batch {}/{} (offset {}): reusing {}",
            batch.index + 1,
            batch.total_batches,
            batch.offset,
            checkpoint.display()
        ));

        Some(manifest.into_outcome(checkpoint))
    }
}
