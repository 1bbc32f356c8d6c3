//! Value types shared across the richness pipeline.
//!
//! This includes:
//! - Species identifiers
//! - Habitat codes and the seasonal presence predicate
//! - Raster extents

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// No habitat at this cell.
pub const CODE_NONE: u16 = 0;
/// Habitat in summer only.
pub const CODE_SUMMER: u16 = 1;
/// Habitat in winter only.
pub const CODE_WINTER: u16 = 2;
/// Habitat year-round.
pub const CODE_YEAR_ROUND: u16 = 3;

/// The habitat codes a species raster is allowed to contain.
pub const HABITAT_CODES: [u16; 4] = [CODE_NONE, CODE_SUMMER, CODE_WINTER, CODE_YEAR_ROUND];

/// Identifier of a species, e.g. `aagtox`.
///
/// The code doubles as the file stem of the species' habitat raster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpeciesCode(pub String);

impl SpeciesCode {
    /// Create a species code.
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }

    /// Borrow the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpeciesCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SpeciesCode {
    fn from(code: &str) -> Self {
        Self(code.to_string())
    }
}

impl From<String> for SpeciesCode {
    fn from(code: String) -> Self {
        Self(code)
    }
}

/// Seasonal definition a richness run is computed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Season {
    /// Summer-only or year-round habitat.
    Summer,
    /// Winter-only or year-round habitat.
    Winter,
    /// Any habitat at all.
    #[default]
    Any,
}

impl Season {
    /// All seasons, in display order.
    pub const ALL: [Season; 3] = [Season::Summer, Season::Winter, Season::Any];

    /// Whether a raw habitat code counts as presence in this season.
    pub fn includes(self, code: u16) -> bool {
        match self {
            Season::Summer => code == CODE_SUMMER || code == CODE_YEAR_ROUND,
            Season::Winter => code == CODE_WINTER || code == CODE_YEAR_ROUND,
            Season::Any => code > CODE_NONE,
        }
    }

    /// Human-readable name.
    pub fn name(self) -> &'static str {
        match self {
            Season::Summer => "Summer",
            Season::Winter => "Winter",
            Season::Any => "Any",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Season {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "summer" => Ok(Season::Summer),
            "winter" => Ok(Season::Winter),
            "any" => Ok(Season::Any),
            other => Err(format!(
                "unknown season '{}', expected Summer, Winter or Any",
                other
            )),
        }
    }
}

/// Grid dimensions of a raster, in cells.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RasterExtent {
    /// Number of columns.
    pub width: u32,
    /// Number of rows.
    pub height: u32,
}

impl RasterExtent {
    /// Create an extent.
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Total number of cells.
    pub fn cell_count(&self) -> usize {
        self.width as usize * self.height as usize
    }
}

impl fmt::Display for RasterExtent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
