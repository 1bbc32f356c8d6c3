//! Aggregation driver: the whole run from species list to final surface.
//!
//! `Initialized -> BatchLoop(0..n) -> Reducing -> Finalized`. Species
//! problems and lost checkpoints are recorded in the [`RunSummary`]; only a
//! failed write of a required final output (or cancellation) ends a run early.
//!
//! A batch counts toward the summary only once its checkpoint has been read
//! back and added to the final surface. A checkpoint that cannot be written,
//! or cannot be read during the reduction, drops its batch.

use crate::core::batch::Batch;
use crate::core::config::RichnessConfig;
use crate::core::error::{BoundScope, RasterResult, RichnessError, RichnessResult};
use crate::core::raster::Raster;
use crate::core::store::RasterStore;
use crate::core::types::SpeciesCode;
use crate::execution::progress::{CancelToken, ProgressTracker, ProgressUpdate, RunPhase};
use crate::provenance::layout::OutputLayout;
use crate::provenance::records::{write_attribute_table, write_species_table};
use crate::provenance::run_log::RunLog;
use crate::provenance::summary::{RunOutcome, RunSummary};
use crate::richness::histogram::ValueHistogram;
use crate::richness::processor::{BatchOutcome, BatchProcessor};
use crate::validation::bounds::check_bound;
use chrono::Local;
use rayon::ThreadPool;
use std::path::Path;
use std::time::Instant;

/// Runs a richness aggregation over a raster store.
pub struct AggregationDriver<'a> {
    store: &'a dyn RasterStore,
    config: RichnessConfig,
    tracker: ProgressTracker,
}

impl<'a> AggregationDriver<'a> {
    /// Create a driver.
    pub fn new(store: &'a dyn RasterStore, config: RichnessConfig) -> Self {
        Self {
            store,
            config,
            tracker: ProgressTracker::new(),
        }
    }

    /// Receive progress updates.
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        self.tracker = std::mem::take(&mut self.tracker).with_callback(Box::new(callback));
        self
    }

    /// Token that stops the run before its next batch.
    pub fn cancel_token(&self) -> CancelToken {
        self.tracker.cancel_token()
    }

    /// The run configuration.
    pub fn config(&self) -> &RichnessConfig {
        &self.config
    }

    /// Execute the run.
    pub fn run(&mut self) -> RichnessResult<RunOutcome> {
        let start = Instant::now();
        let started_at = Local::now();

        self.config.validate()?;
        let species = self.config.resolve_species()?;

        let layout = OutputLayout::new(&self.config.output_location, &self.config.group_name);
        layout
            .create_dirs()
            .map_err(|e| RichnessError::write(layout.root(), e))?;
        let log = RunLog::open(layout.log_file())
            .map_err(|e| RichnessError::write(layout.log_file(), e))?;

        let species_table = layout.species_table();
        write_species_table(&species_table, &species)
            .map_err(|e| RichnessError::write(&species_table, e))?;
        log.header(started_at, &self.config, &species, &species_table);

        let anchor = self.store.read(&self.config.anchor_raster)?;
        log::debug!(
            "anchor {} is {} ({} bytes)",
            self.config.anchor_raster.display(),
            anchor.extent(),
            anchor.memory_size()
        );

        let batches = Batch::partition(&species, self.config.batch_size);
        self.tracker.start(species.len(), batches.len());
        let pool = if self.config.parallel {
            Some(build_pool(self.config.max_threads)?)
        } else {
            None
        };

        let mut summary = RunSummary::new(
            &self.config.group_name,
            self.config.season,
            started_at,
            species.len(),
            batches.len(),
        );
        let mut completed: Vec<(&Batch, BatchOutcome)> = Vec::with_capacity(batches.len());

        {
            let mut processor = BatchProcessor::new(
                self.store,
                &self.config,
                &layout,
                &anchor,
                &log,
                &self.tracker,
            );
            if let Some(pool) = pool.as_ref() {
                processor = processor.with_pool(pool);
            }

            for batch in &batches {
                if self.tracker.is_cancelled() {
                    log.line(format!(
                        "Cancelled after {} of {} batches",
                        batch.index,
                        batches.len()
                    ));
                    self.tracker.cancelled();
                    return Err(RichnessError::Cancelled {
                        completed: batch.index,
                        total: batches.len(),
                    });
                }
                self.tracker.set_phase(RunPhase::BatchLoop {
                    index: batch.index,
                    total: batches.len(),
                });

                match processor.process(batch) {
                    Ok(outcome) => completed.push((batch, outcome)),
                    Err(RichnessError::Write { path, error }) => {
                        log.line(format!(
                            "\tERROR -- batch at offset {} dropped, cannot save {}: {}",
                            batch.offset,
                            path.display(),
                            error
                        ));
                        summary.record_failed_batch(batch, &error);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        self.tracker.set_phase(RunPhase::Reducing);
        let mut richness = Raster::zeros(anchor.extent());
        let mut processed: Vec<SpeciesCode> = Vec::new();
        let mut reduced = 0;
        for (batch, outcome) in &completed {
            let intermediate = match self.read_checkpoint(&outcome.checkpoint, &richness) {
                Ok(intermediate) => intermediate,
                Err(e) if e.is_recoverable() => {
                    log.line(format!(
                        "\tERROR -- batch at offset {} dropped, cannot read {}: {}",
                        batch.offset,
                        outcome.checkpoint.display(),
                        e
                    ));
                    summary.record_failed_batch(batch, &e);
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            richness.accumulate(&intermediate)?;
            summary.record_batch(outcome);
            processed.extend(outcome.processed_species().cloned());
            reduced += 1;
        }

        summary.final_max = richness.max_value().unwrap_or(0) as u32;
        if let Some(violation) = check_bound(
            BoundScope::Final,
            summary.final_max,
            summary.total_denominator,
            self.config.expand,
        ) {
            log.line(format!("WARNING! {}", violation));
            summary.anomalies.push(violation);
        }

        let richness_path = layout.final_richness();
        self.store
            .write(&richness, &richness_path)
            .map_err(|e| RichnessError::write(&richness_path, e))?;
        log.line(format!(
            "Final richness ({} checkpoints) saved to {}",
            reduced,
            richness_path.display()
        ));

        let rat = layout.attribute_table();
        if let Err(e) = write_attribute_table(&rat, &ValueHistogram::from_raster(&richness)) {
            log::warn!("cannot write attribute table {}: {}", rat.display(), e);
        }
        drop(richness);

        let processed_table = layout.processed_table();
        write_species_table(&processed_table, &processed)
            .map_err(|e| RichnessError::write(&processed_table, e))?;

        summary.runtime_ms = start.elapsed().as_millis() as u64;
        let summary_path = layout.summary_file();
        summary
            .write(&summary_path)
            .map_err(|e| RichnessError::write(&summary_path, e))?;
        log.lines(summary.render().lines());
        log.runtime(start.elapsed());

        self.tracker.set_phase(RunPhase::Finalized);
        if !self.config.keep_scratch {
            if let Err(e) = layout.remove_scratch() {
                log::warn!("cannot remove {}: {}", layout.scratch_root().display(), e);
            }
        }
        self.tracker.complete();

        Ok(RunOutcome {
            richness_path,
            species_table_path: species_table,
            summary,
        })
    }

    fn read_checkpoint(&self, path: &Path, grid: &Raster) -> RasterResult<Raster> {
        let intermediate = self.store.read(path)?;
        grid.check_aligned(&intermediate)?;
        Ok(intermediate)
    }
}

fn build_pool(max_threads: usize) -> RichnessResult<ThreadPool> {
    let mut builder = rayon::ThreadPoolBuilder::new();
    if max_threads > 0 {
        builder = builder.num_threads(max_threads);
    }
    Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{MAX_BATCH_SIZE, MAX_SPECIES};
    use crate::core::error::{Anomaly, ConfigError, FailureKind, RasterError};
    use crate::core::raster::NODATA;
    use crate::core::store::{FileRasterStore, MemoryRasterStore};
    use crate::core::types::{RasterExtent, Season};
    use crate::provenance::records::read_species_table;
    use std::path::PathBuf;
    use std::sync::{Arc, Mutex};

    const ANCHOR: &str = "/anchor.tif";

    fn store_with(species: &[(&str, Vec<u16>)]) -> MemoryRasterStore {
        let store = MemoryRasterStore::new();
        store.insert(ANCHOR, Raster::anchor(RasterExtent::new(3, 2), 1));
        for (code, cells) in species {
            store.insert(
                Path::new("/models").join(format!("{}.tif", code)),
                Raster::from_cells(3, 2, cells.clone()).unwrap(),
            );
        }
        store
    }

    fn config(out: &Path, species: &[&str]) -> RichnessConfig {
        RichnessConfig::new("birds", out, "/models", ANCHOR)
            .with_species(species.iter().copied())
            .with_batch_size(2)
    }

    fn three_species() -> Vec<(&'static str, Vec<u16>)> {
        vec![
            ("a", vec![1, 1, 0, 0, NODATA, 0]),
            ("b", vec![3, 0, 2, 0, NODATA, 0]),
            ("c", vec![2, 0, 0, 0, NODATA, 1]),
        ]
    }

    #[test]
    fn test_run_any_season() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&three_species());
        let mut driver = AggregationDriver::new(&store, config(dir.path(), &["a", "b", "c"]));

        let outcome = driver.run().unwrap();
        let summary = &outcome.summary;
        assert_eq!(summary.batches, 2);
        assert_eq!(summary.processed, 3);
        assert_eq!(summary.total_denominator, 3);
        assert_eq!(summary.final_max, 3);
        assert!(summary.is_clean());

        let richness = store.read(&outcome.richness_path).unwrap();
        assert_eq!(richness.cells(), &[3, 1, 1, 0, 0, 1]);

        let layout = OutputLayout::new(dir.path(), "birds");
        for batch in Batch::partition(&["a".into(), "b".into(), "c".into()], 2) {
            assert!(store.exists(&layout.checkpoint(&batch)));
        }
        assert_eq!(
            read_species_table(&outcome.species_table_path).unwrap().len(),
            3
        );
        assert!(layout.summary_file().is_file());
        assert!(layout.attribute_table().is_file());
        assert!(!layout.scratch_root().exists());

        let log = std::fs::read_to_string(layout.log_file()).unwrap();
        assert!(log.contains("PROCESSING 3 SPECIES AS \"BIRDS\"."));
        assert!(log.contains("Total runtime was:"));
    }

    #[test]
    fn test_missing_species_is_one_failure() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&three_species());
        let mut driver =
            AggregationDriver::new(&store, config(dir.path(), &["a", "gone", "b", "c"]));

        let outcome = driver.run().unwrap();
        let summary = &outcome.summary;
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].species, SpeciesCode::from("gone"));
        assert!(matches!(
            summary.failures[0].kind,
            FailureKind::MissingInput { .. }
        ));
        assert_eq!(summary.total_denominator, 3);

        let processed =
            read_species_table(&OutputLayout::new(dir.path(), "birds").processed_table()).unwrap();
        assert_eq!(
            processed,
            vec![SpeciesCode::from("a"), "b".into(), "c".into()]
        );
    }

    #[test]
    fn test_skipped_species_excluded_from_denominator() {
        let dir = tempfile::tempdir().unwrap();
        let mut species = three_species();
        species.push(("w", vec![2, 2, 2, 2, NODATA, 2]));
        let store = store_with(&species);
        let cfg = config(dir.path(), &["a", "b", "c", "w"]).with_season(Season::Summer);

        let outcome = AggregationDriver::new(&store, cfg).run().unwrap();
        assert_eq!(outcome.summary.skipped, 1);
        assert_eq!(outcome.summary.processed, 3);
        assert_eq!(outcome.summary.total_denominator, 3);

        let richness = store.read(&outcome.richness_path).unwrap();
        assert_eq!(richness.cells(), &[2, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_expand_final_max_equals_denominator() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&[
            ("a", vec![NODATA, 1, 0, 0, 0, 0]),
            ("b", vec![NODATA, 0, 2, 0, 0, 0]),
            ("c", vec![NODATA, 0, 3, 0, 0, 1]),
        ]);
        let cfg = config(dir.path(), &["a", "b", "c"])
            .with_season(Season::Winter)
            .with_expand(true);

        // "a" holds no winter habitat but registers on its nodata marker cell.
        let outcome = AggregationDriver::new(&store, cfg).run().unwrap();
        assert_eq!(outcome.summary.processed, 3);
        assert_eq!(outcome.summary.final_max, 3);
        assert!(outcome.summary.anomalies.is_empty());

        let richness = store.read(&outcome.richness_path).unwrap();
        assert_eq!(richness.cells(), &[3, 0, 2, 0, 0, 0]);
    }

    #[test]
    fn test_expand_keeps_valid_absence_under_marker() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&[
            ("a", vec![0, 1, 0, 0, 0, 0]),
            ("b", vec![0, 0, 1, 0, 0, 0]),
        ]);
        let plain = config(&dir.path().join("plain"), &["a", "b"]).with_season(Season::Summer);
        let expanded = config(&dir.path().join("expanded"), &["a", "b"])
            .with_season(Season::Summer)
            .with_expand(true);

        let plain = AggregationDriver::new(&store, plain).run().unwrap();
        let outcome = AggregationDriver::new(&store, expanded).run().unwrap();
        let richness = store.read(&outcome.richness_path).unwrap();
        assert_eq!(richness.cells(), &[0, 1, 1, 0, 0, 0]);
        assert_eq!(richness, store.read(&plain.richness_path).unwrap());

        // Neither species registered, so the exact bound reports it.
        assert!(outcome.summary.anomalies.contains(&Anomaly::BoundViolation {
            scope: BoundScope::Final,
            max: 1,
            limit: 2,
            exact: true,
        }));
    }

    #[test]
    fn test_parallel_run_matches_sequential() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&three_species());

        let seq = AggregationDriver::new(&store, config(&dir.path().join("seq"), &["a", "b", "c"]))
            .run()
            .unwrap();
        let par_cfg = config(&dir.path().join("par"), &["a", "b", "c"])
            .with_parallel(true)
            .with_max_threads(2);
        let par = AggregationDriver::new(&store, par_cfg).run().unwrap();

        assert_eq!(
            store.read(&seq.richness_path).unwrap(),
            store.read(&par.richness_path).unwrap()
        );
    }

    #[test]
    fn test_cancel_then_resume() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&three_species());

        let driver = AggregationDriver::new(&store, config(dir.path(), &["a", "b", "c"]));
        let token = driver.cancel_token();
        let mut driver = driver.with_progress(move |update| {
            if let ProgressUpdate::BatchCompleted { .. } = update {
                token.cancel();
            }
        });

        let err = driver.run().unwrap_err();
        assert!(matches!(
            err,
            RichnessError::Cancelled {
                completed: 1,
                total: 2
            }
        ));
        assert!(err.is_resumable());

        let phases = Arc::new(Mutex::new(Vec::new()));
        let seen = phases.clone();
        let cfg = config(dir.path(), &["a", "b", "c"]).with_resume(true);
        let outcome = AggregationDriver::new(&store, cfg)
            .with_progress(move |update| {
                if let ProgressUpdate::Phase(phase) = update {
                    seen.lock().unwrap().push(phase);
                }
            })
            .run()
            .unwrap();

        assert_eq!(outcome.summary.resumed_batches, 1);
        assert_eq!(outcome.summary.processed, 3);
        assert_eq!(outcome.summary.final_max, 3);
        assert_eq!(phases.lock().unwrap().last(), Some(&RunPhase::Finalized));
    }

    #[test]
    fn test_checkpoint_write_failure_drops_batches() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path(), "birds");
        let store = MemoryRasterStore::new().with_denied_writes(layout.intermediates_dir());
        store.insert(ANCHOR, Raster::anchor(RasterExtent::new(3, 2), 1));
        for (code, cells) in three_species() {
            store.insert(format!("/models/{}.tif", code), Raster::from_cells(3, 2, cells).unwrap());
        }

        let outcome = AggregationDriver::new(&store, config(dir.path(), &["a", "b", "c"]))
            .run()
            .unwrap();
        let summary = &outcome.summary;
        assert_eq!(summary.failed_batches.len(), 2);
        assert_eq!(summary.total_denominator, 0);
        assert_eq!(summary.final_max, 0);
        assert_eq!(summary.dropped, 3);
        assert_eq!(
            summary.processed + summary.skipped + summary.failed + summary.dropped,
            summary.requested
        );
    }

    /// Store whose rasters under one directory turn unreadable after writing.
    struct CorruptingStore {
        inner: MemoryRasterStore,
        corrupt: PathBuf,
    }

    impl RasterStore for CorruptingStore {
        fn read(&self, path: &Path) -> RasterResult<Raster> {
            if path.starts_with(&self.corrupt) {
                return Err(RasterError::Unreadable {
                    path: path.to_path_buf(),
                    error: "truncated strip".to_string(),
                });
            }
            self.inner.read(path)
        }

        fn write(&self, raster: &Raster, path: &Path) -> RasterResult<()> {
            self.inner.write(raster, path)
        }

        fn exists(&self, path: &Path) -> bool {
            self.inner.exists(path)
        }

        fn extent(&self, path: &Path) -> RasterResult<RasterExtent> {
            self.inner.extent(path)
        }

        fn promote(&self, from: &Path, to: &Path) -> RasterResult<()> {
            self.inner.promote(from, to)
        }
    }

    #[test]
    fn test_unreadable_checkpoint_drops_batch() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path(), "birds");
        let batches = Batch::partition(&["a".into(), "b".into(), "c".into()], 2);
        let store = CorruptingStore {
            inner: store_with(&three_species()),
            corrupt: layout.checkpoint(&batches[1]),
        };

        let outcome = AggregationDriver::new(&store, config(dir.path(), &["a", "b", "c"]))
            .run()
            .unwrap();
        let summary = &outcome.summary;
        assert_eq!(summary.failed_batches.len(), 1);
        assert_eq!(summary.failed_batches[0].offset, 2);
        assert_eq!(summary.processed, 2);
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.total_denominator, 2);
        assert_eq!(
            summary.processed + summary.skipped + summary.failed + summary.dropped,
            summary.requested
        );

        // Only the first batch ("a", "b") reaches the final surface.
        let richness = store.read(&outcome.richness_path).unwrap();
        assert_eq!(richness.cells(), &[2, 1, 1, 0, 0, 0]);
        assert_eq!(
            read_species_table(&layout.processed_table()).unwrap(),
            vec![SpeciesCode::from("a"), "b".into()]
        );
    }

    #[test]
    fn test_species_beyond_count_range_rejected_before_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = store_with(&three_species());
        let codes: Vec<String> = (0..=MAX_SPECIES).map(|i| format!("sp{}", i)).collect();
        let cfg = RichnessConfig::new("birds", dir.path(), "/models", ANCHOR)
            .with_species(codes)
            .with_batch_size(MAX_BATCH_SIZE);

        let err = AggregationDriver::new(&store, cfg).run().unwrap_err();
        assert!(matches!(
            err,
            RichnessError::Config(ConfigError::TooManySpecies { .. })
        ));
        assert!(!OutputLayout::new(dir.path(), "birds").root().exists());
    }

    #[test]
    fn test_final_write_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path(), "birds");
        let store = MemoryRasterStore::new().with_denied_writes(layout.final_richness());
        store.insert(ANCHOR, Raster::anchor(RasterExtent::new(3, 2), 1));
        store.insert("/models/a.tif", Raster::from_cells(3, 2, vec![1; 6]).unwrap());

        let err = AggregationDriver::new(&store, config(dir.path(), &["a"]))
            .run()
            .unwrap_err();
        assert!(matches!(err, RichnessError::Write { .. }));
    }

    #[test]
    fn test_missing_anchor_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryRasterStore::new();
        let err = AggregationDriver::new(&store, config(dir.path(), &["a"]))
            .run()
            .unwrap_err();
        assert!(matches!(err, RichnessError::Raster(_)));
    }

    #[test]
    fn test_file_store_end_to_end() {
        let dir = tempfile::tempdir().unwrap();
        let models = dir.path().join("models");
        let store = FileRasterStore::new();
        for (code, cells) in three_species() {
            store
                .write(
                    &Raster::from_cells(3, 2, cells).unwrap(),
                    &models.join(format!("{}.tif", code)),
                )
                .unwrap();
        }
        let anchor = dir.path().join("anchor.tif");
        store
            .write(&Raster::anchor(RasterExtent::new(3, 2), 1), &anchor)
            .unwrap();

        // No species listed: discovered from the model directory.
        let cfg = RichnessConfig::new("birds", dir.path().join("out"), &models, &anchor)
            .with_batch_size(2)
            .with_expand(true);
        let outcome = AggregationDriver::new(&store, cfg).run().unwrap();

        assert_eq!(outcome.summary.requested, 3);
        assert_eq!(outcome.summary.final_max, 3);
        assert!(outcome.summary.anomalies.is_empty());

        let richness = store.read(&outcome.richness_path).unwrap();
        assert_eq!(richness.get(0, 0), 3);

        let layout = OutputLayout::new(dir.path().join("out"), "birds");
        let summary: RunSummary =
            serde_json::from_str(&std::fs::read_to_string(layout.summary_file()).unwrap())
                .unwrap();
        assert_eq!(summary.processed, 3);
        assert!(!summary
            .anomalies
            .iter()
            .any(|a| matches!(a, Anomaly::BoundViolation { .. })));
    }
}
