//! Everything a run leaves on disk besides rasters.
//!
//! This module provides:
//! - The output directory layout
//! - The append-only run log
//! - Species and attribute tables
//! - Checkpoint manifests used for resuming
//! - The run summary

pub mod layout;
pub mod manifest;
pub mod records;
pub mod run_log;
pub mod summary;

pub use layout::OutputLayout;
pub use manifest::CheckpointManifest;
pub use records::{read_species_table, write_attribute_table, write_species_table};
pub use run_log::RunLog;
pub use summary::{BatchFailure, RunOutcome, RunSummary};
