//! Partitioning of the species list into checkpointed batches.
//!
//! A batch is a contiguous slice of the species list, identified by the
//! offset of its first species. Each batch produces exactly one intermediate
//! richness checkpoint.

use crate::core::types::SpeciesCode;
use serde::{Deserialize, Serialize};

/// A contiguous slice of the species list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// Index of the first species in the full list.
    pub offset: usize,
    /// Position of this batch among all batches.
    pub index: usize,
    /// Total number of batches in the run.
    pub total_batches: usize,
    /// Species in this batch, in list order.
    pub species: Vec<SpeciesCode>,
}

impl Batch {
    /// Create a batch.
    pub fn new(
        species: Vec<SpeciesCode>,
        offset: usize,
        index: usize,
        total_batches: usize,
    ) -> Self {
        Self {
            offset,
            index,
            total_batches,
            species,
        }
    }

    /// Split a species list into batches of at most `batch_size`.
    ///
    /// Only the last batch may be shorter.
    pub fn partition(species: &[SpeciesCode], batch_size: usize) -> Vec<Batch> {
        let size = batch_size.max(1);
        let total_batches = (species.len() + size - 1) / size;

        species
            .chunks(size)
            .enumerate()
            .map(|(i, chunk)| Batch::new(chunk.to_vec(), i * size, i, total_batches))
            .collect()
    }

    /// Number of species requested in this batch.
    pub fn len(&self) -> usize {
        self.species.len()
    }

    /// Check if the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.species.is_empty()
    }

    /// Checkpoint identifier, `<group>_<offset>`.
    pub fn checkpoint_id(&self, group_name: &str) -> String {
        format!("{}_{}", group_name, self.offset)
    }
}
