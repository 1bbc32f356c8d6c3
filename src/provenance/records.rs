//! Tabular provenance records.

use crate::core::types::SpeciesCode;
use crate::richness::histogram::ValueHistogram;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Write one species code per line, replacing any earlier table.
pub fn write_species_table(path: &Path, species: &[SpeciesCode]) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    for code in species {
        writeln!(writer, "{}", code)?;
    }
    writer.flush()
}

/// Read a table written by [`write_species_table`].
///
/// Trailing commas (as in `aagtox,`) and blank lines are tolerated.
pub fn read_species_table(path: &Path) -> io::Result<Vec<SpeciesCode>> {
    let text = std::fs::read_to_string(path)?;
    Ok(text
        .lines()
        .map(|line| line.trim().trim_end_matches(',').trim())
        .filter(|line| !line.is_empty())
        .map(SpeciesCode::new)
        .collect())
}

/// Write a `value,count` attribute table for a richness surface.
pub fn write_attribute_table(path: &Path, histogram: &ValueHistogram) -> io::Result<()> {
    let mut writer = BufWriter::new(File::create(path)?);
    writeln!(writer, "value,count")?;
    for (value, count) in histogram.iter() {
        writeln!(writer, "{},{}", value, count)?;
    }
    writer.flush()
}
