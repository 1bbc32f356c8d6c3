//! Paths of everything a run persists.
//!
//! ```text
//! <output_location>/<group>/
//!     <group>.csv                        requested species
//!     <group>_processed.csv              species that contributed
//!     <group>_summary.json               run summary
//!     <group>_rat.csv                    value/count table of the final surface
//!     <group>.tif                        final richness
//!     Log<group>.txt                     append-only run log
//!     Richness_intermediates/
//!         <group>_<offset>.tif           batch checkpoint
//!         <group>_<offset>.json          checkpoint manifest
//!     scratch/                           removed after a successful run
//! ```

use crate::core::batch::Batch;
use std::io;
use std::path::{Path, PathBuf};
use uuid::Uuid;

/// Name of the checkpoint directory.
pub const INTERMEDIATES_DIR: &str = "Richness_intermediates";

/// Name of the scratch directory.
pub const SCRATCH_DIR: &str = "scratch";

/// Output layout rooted at `<output_location>/<group>/`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    root: PathBuf,
    group: String,
}

impl OutputLayout {
    /// Create the layout for a group.
    pub fn new(output_location: impl AsRef<Path>, group: impl Into<String>) -> Self {
        let group = group.into();
        Self {
            root: output_location.as_ref().join(&group),
            group,
        }
    }

    /// Create the root and checkpoint directories.
    pub fn create_dirs(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.intermediates_dir())
    }

    /// Group name.
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Group output directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Requested species table.
    pub fn species_table(&self) -> PathBuf {
        self.root.join(format!("{}.csv", self.group))
    }

    /// Processed species record.
    pub fn processed_table(&self) -> PathBuf {
        self.root.join(format!("{}_processed.csv", self.group))
    }

    /// Run summary.
    pub fn summary_file(&self) -> PathBuf {
        self.root.join(format!("{}_summary.json", self.group))
    }

    /// Attribute table of the final surface.
    pub fn attribute_table(&self) -> PathBuf {
        self.root.join(format!("{}_rat.csv", self.group))
    }

    /// Final richness surface.
    pub fn final_richness(&self) -> PathBuf {
        self.root.join(format!("{}.tif", self.group))
    }

    /// Run log.
    pub fn log_file(&self) -> PathBuf {
        self.root.join(format!("Log{}.txt", self.group))
    }

    /// Checkpoint directory.
    pub fn intermediates_dir(&self) -> PathBuf {
        self.root.join(INTERMEDIATES_DIR)
    }

    /// Durable checkpoint for a batch.
    pub fn checkpoint(&self, batch: &Batch) -> PathBuf {
        self.intermediates_dir()
            .join(format!("{}.tif", batch.checkpoint_id(&self.group)))
    }

    /// Manifest accompanying a batch checkpoint.
    pub fn manifest(&self, batch: &Batch) -> PathBuf {
        self.intermediates_dir()
            .join(format!("{}.json", batch.checkpoint_id(&self.group)))
    }

    /// Scratch root.
    pub fn scratch_root(&self) -> PathBuf {
        self.root.join(SCRATCH_DIR)
    }

    /// A fresh working directory exclusive to one batch execution.
    ///
    /// The name is unique per call, so concurrent or repeated executions of
    /// the same batch never share scratch paths.
    pub fn batch_scratch(&self, batch: &Batch) -> PathBuf {
        let tag = Uuid::new_v4().simple().to_string();
        self.scratch_root()
            .join(format!("batch_{}_{}", batch.offset, &tag[..8]))
    }

    /// Remove the scratch root if present.
    pub fn remove_scratch(&self) -> io::Result<()> {
        let scratch = self.scratch_root();
        if scratch.exists() {
            std::fs::remove_dir_all(scratch)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SpeciesCode;

    fn batch(offset: usize) -> Batch {
        Batch::new(vec![SpeciesCode::from("a")], offset, 0, 1)
    }

    #[test]
    fn test_layout_paths() {
        let layout = OutputLayout::new("/data/richness", "raptors");
        assert_eq!(layout.root(), Path::new("/data/richness/raptors"));
        assert_eq!(
            layout.species_table(),
            PathBuf::from("/data/richness/raptors/raptors.csv")
        );
        assert_eq!(
            layout.log_file(),
            PathBuf::from("/data/richness/raptors/Lograptors.txt")
        );
        assert_eq!(
            layout.final_richness(),
            PathBuf::from("/data/richness/raptors/raptors.tif")
        );
        assert_eq!(
            layout.checkpoint(&batch(40)),
            PathBuf::from("/data/richness/raptors/Richness_intermediates/raptors_40.tif")
        );
        assert_eq!(
            layout.manifest(&batch(40)).extension().unwrap(),
            "json"
        );
    }

    #[test]
    fn test_batch_scratch_unique() {
        let layout = OutputLayout::new("/out", "g");
        let a = layout.batch_scratch(&batch(0));
        let b = layout.batch_scratch(&batch(0));
        assert_ne!(a, b);
        assert!(a.starts_with(layout.scratch_root()));
    }

    #[test]
    fn test_create_and_remove_scratch() {
        let dir = tempfile::tempdir().unwrap();
        let layout = OutputLayout::new(dir.path(), "g");
        layout.create_dirs().unwrap();
        assert!(layout.intermediates_dir().is_dir());

        std::fs::create_dir_all(layout.batch_scratch(&batch(0))).unwrap();
        layout.remove_scratch().unwrap();
        assert!(!layout.scratch_root().exists());
        // Removing twice is fine.
        layout.remove_scratch().unwrap();
    }
}
