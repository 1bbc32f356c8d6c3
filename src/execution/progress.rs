//! Progress tracking and cancellation for richness runs.

use crate::core::types::SpeciesCode;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Stage of a run.
///
/// `Initialized -> BatchLoop(0..n) -> Reducing -> Finalized`. Per-species
/// failures never move a run out of this sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    /// Outputs prepared, no batch started yet.
    Initialized,
    /// Processing a batch.
    BatchLoop {
        /// Zero-based batch index.
        index: usize,
        /// Batches in the run.
        total: usize,
    },
    /// Summing intermediate checkpoints into the final surface.
    Reducing,
    /// Final surface and records persisted.
    Finalized,
}

/// What happened to one species.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeciesState {
    /// Contributed a presence mask.
    Processed,
    /// Cannot hold presence in the target season.
    Skipped,
    /// Input missing, unreadable or misaligned.
    Failed,
}

/// A progress update event.
#[derive(Debug, Clone)]
pub enum ProgressUpdate {
    /// The run has started.
    Started {
        /// Species requested.
        total_species: usize,
        /// Batches planned.
        total_batches: usize,
    },
    /// The run entered a new phase.
    Phase(RunPhase),
    /// A batch has started processing.
    BatchStarted {
        /// Offset of the batch in the species list.
        offset: usize,
        /// Zero-based batch index.
        index: usize,
        /// Batches in the run.
        total: usize,
        /// Species in the batch.
        size: usize,
    },
    /// A batch was satisfied from an existing checkpoint.
    BatchResumed {
        /// Offset of the batch in the species list.
        offset: usize,
    },
    /// A species has been handled.
    SpeciesFinished {
        /// Species handled.
        species: SpeciesCode,
        /// How it was handled.
        state: SpeciesState,
        /// Time spent on it.
        duration_ms: u64,
    },
    /// A batch checkpoint was written.
    BatchCompleted {
        /// Offset of the batch in the species list.
        offset: usize,
        /// Species that contributed a mask.
        denominator: usize,
        /// Maximum cell value of the checkpoint.
        max: u32,
        /// Time spent on the batch.
        duration_ms: u64,
    },
    /// Overall progress percentage.
    Progress {
        /// Share of species handled, 0 to 100.
        percent: f32,
        /// Time since the run started.
        elapsed_ms: u64,
        /// Estimate from the average species time so far.
        estimated_remaining_ms: Option<u64>,
    },
    /// The run has completed.
    Completed {
        /// Wall time of the run.
        total_duration_ms: u64,
        /// Species that contributed a mask.
        processed: usize,
        /// Species skipped for the season.
        skipped: usize,
        /// Species that failed.
        failed: usize,
    },
    /// The run was cancelled between batches.
    Cancelled,
}

/// Callback type for progress updates.
pub type ProgressCallback = Box<dyn Fn(ProgressUpdate) + Send + Sync>;

/// Shared flag for requesting cancellation from another thread or a callback.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Create a token that is not cancelled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Tracks run progress and allows cancellation.
pub struct ProgressTracker {
    /// Total number of species to handle.
    total_species: usize,
    /// Species that contributed a mask.
    processed: AtomicU64,
    /// Species skipped for the season.
    skipped: AtomicU64,
    /// Species that failed.
    failed: AtomicU64,
    /// Cancellation flag.
    cancel: CancelToken,
    /// Start time.
    start_time: Option<Instant>,
    /// Current phase.
    phase: Mutex<RunPhase>,
    /// Progress callback.
    callback: Option<ProgressCallback>,
    /// Per-species times for estimation.
    species_times: Mutex<Vec<u64>>,
}

impl ProgressTracker {
    /// Create a new progress tracker.
    pub fn new() -> Self {
        Self {
            total_species: 0,
            processed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            cancel: CancelToken::new(),
            start_time: None,
            phase: Mutex::new(RunPhase::Initialized),
            callback: None,
            species_times: Mutex::new(Vec::new()),
        }
    }

    /// Set a callback for progress updates.
    pub fn with_callback(mut self, callback: ProgressCallback) -> Self {
        self.callback = Some(callback);
        self
    }

    /// Token that cancels this tracker's run.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Start tracking.
    pub fn start(&mut self, total_species: usize, total_batches: usize) {
        self.total_species = total_species;
        self.start_time = Some(Instant::now());
        self.send_update(ProgressUpdate::Started {
            total_species,
            total_batches,
        });
    }

    /// Enter a new phase.
    pub fn set_phase(&self, phase: RunPhase) {
        *self.phase.lock() = phase;
        self.send_update(ProgressUpdate::Phase(phase));
    }

    /// Current phase.
    pub fn phase(&self) -> RunPhase {
        *self.phase.lock()
    }

    /// Report that a batch has started.
    pub fn batch_started(&self, offset: usize, index: usize, total: usize, size: usize) {
        self.send_update(ProgressUpdate::BatchStarted {
            offset,
            index,
            total,
            size,
        });
    }

    /// Report that a batch was taken from an existing checkpoint.
    pub fn batch_resumed(&self, offset: usize, states: &[SpeciesState]) {
        for state in states {
            self.count(*state);
        }
        self.send_update(ProgressUpdate::BatchResumed { offset });
        self.send_progress_update();
    }

    /// Report that a species has been handled.
    pub fn species_finished(&self, species: &SpeciesCode, state: SpeciesState, duration_ms: u64) {
        self.count(state);
        self.species_times.lock().push(duration_ms);
        self.send_update(ProgressUpdate::SpeciesFinished {
            species: species.clone(),
            state,
            duration_ms,
        });
    }

    /// Report that a batch checkpoint was written.
    pub fn batch_completed(&self, offset: usize, denominator: usize, max: u32, duration_ms: u64) {
        self.send_update(ProgressUpdate::BatchCompleted {
            offset,
            denominator,
            max,
            duration_ms,
        });
        self.send_progress_update();
    }

    fn count(&self, state: SpeciesState) {
        let counter = match state {
            SpeciesState::Processed => &self.processed,
            SpeciesState::Skipped => &self.skipped,
            SpeciesState::Failed => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Check if the run should stop.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Report that the run stopped on a cancellation request.
    pub fn cancelled(&self) {
        self.send_update(ProgressUpdate::Cancelled);
    }

    /// Complete tracking.
    pub fn complete(&self) {
        let duration = self
            .start_time
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        self.send_update(ProgressUpdate::Completed {
            total_duration_ms: duration,
            processed: self.processed.load(Ordering::Relaxed) as usize,
            skipped: self.skipped.load(Ordering::Relaxed) as usize,
            failed: self.failed.load(Ordering::Relaxed) as usize,
        });
    }

    fn handled(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
            + self.skipped.load(Ordering::Relaxed)
            + self.failed.load(Ordering::Relaxed)
    }

    /// Get current progress percentage.
    pub fn progress_percent(&self) -> f32 {
        if self.total_species == 0 {
            return 100.0;
        }
        (self.handled() as f32 / self.total_species as f32) * 100.0
    }

    /// Estimate remaining time in milliseconds.
    pub fn estimated_remaining_ms(&self) -> Option<u64> {
        let times = self.species_times.lock();
        if times.is_empty() {
            return None;
        }

        let avg_time: u64 = times.iter().sum::<u64>() / times.len() as u64;
        let remaining = (self.total_species as u64).saturating_sub(self.handled());

        Some(avg_time * remaining)
    }

    fn send_update(&self, update: ProgressUpdate) {
        if let Some(ref callback) = self.callback {
            callback(update);
        }
    }

    fn send_progress_update(&self) {
        let elapsed = self
            .start_time
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        self.send_update(ProgressUpdate::Progress {
            percent: self.progress_percent(),
            elapsed_ms: elapsed,
            estimated_remaining_ms: self.estimated_remaining_ms(),
        });
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}
