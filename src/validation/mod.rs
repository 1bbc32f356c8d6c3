//! Validation of richness surfaces.
//!
//! Every intermediate and final surface is checked against the number of
//! species that contributed to it.

pub mod bounds;

pub use bounds::check_bound;
