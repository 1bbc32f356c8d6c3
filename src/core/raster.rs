//! In-memory single-band rasters and the cell-wise algebra the pipeline needs.
//!
//! A [`Raster`] is a row-major grid of `u16` cells. [`NODATA`] marks cells
//! outside the modelled area; it is never counted and is treated as zero when
//! rasters are summed.

use crate::core::error::{RasterError, RasterResult};
use crate::core::types::RasterExtent;

/// Sentinel for cells without data.
pub const NODATA: u16 = u16::MAX;

/// Value of a present cell in a presence mask.
pub const PRESENT: u16 = 1;

/// Side length of the marker square in a default anchor raster.
pub const DEFAULT_ANCHOR_MARKER: u32 = 3;

/// A single-band raster of 16-bit cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Raster {
    extent: RasterExtent,
    cells: Vec<u16>,
}

impl Raster {
    /// Create a raster with every cell set to `value`.
    pub fn filled(extent: RasterExtent, value: u16) -> Self {
        Self {
            extent,
            cells: vec![value; extent.cell_count()],
        }
    }

    /// Create an all-zero raster.
    pub fn zeros(extent: RasterExtent) -> Self {
        Self::filled(extent, 0)
    }

    /// Create a raster from row-major cells.
    pub fn from_cells(width: u32, height: u32, cells: Vec<u16>) -> RasterResult<Self> {
        let extent = RasterExtent::new(width, height);
        if cells.len() != extent.cell_count() {
            return Err(RasterError::BufferSize {
                extent,
                got: cells.len(),
            });
        }
        Ok(Self { extent, cells })
    }

    /// Build an anchor surface: zero everywhere except a `marker` x `marker`
    /// square of ones in the top-left corner.
    pub fn anchor(extent: RasterExtent, marker: u32) -> Self {
        let mut raster = Self::zeros(extent);
        for y in 0..marker.min(extent.height) {
            for x in 0..marker.min(extent.width) {
                raster.set(x, y, 1);
            }
        }
        raster
    }

    /// Grid dimensions.
    pub fn extent(&self) -> RasterExtent {
        self.extent
    }

    /// Number of columns.
    pub fn width(&self) -> u32 {
        self.extent.width
    }

    /// Number of rows.
    pub fn height(&self) -> u32 {
        self.extent.height
    }

    /// Row-major cell values.
    pub fn cells(&self) -> &[u16] {
        &self.cells
    }

    /// Value at a cell.
    pub fn get(&self, x: u32, y: u32) -> u16 {
        self.cells[self.index(x, y)]
    }

    /// Set the value at a cell.
    pub fn set(&mut self, x: u32, y: u32, value: u16) {
        let index = self.index(x, y);
        self.cells[index] = value;
    }

    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.extent.width as usize + x as usize
    }

    /// Fail unless `other` has the same grid dimensions.
    pub fn check_aligned(&self, other: &Raster) -> RasterResult<()> {
        if self.extent != other.extent {
            return Err(RasterError::ShapeMismatch {
                expected: self.extent,
                got: other.extent,
            });
        }
        Ok(())
    }

    /// Map every data cell to [`PRESENT`] when `predicate` holds and to
    /// [`NODATA`] otherwise.
    pub fn reclassify<F>(&self, predicate: F) -> Raster
    where
        F: Fn(u16) -> bool,
    {
        let cells = self
            .cells
            .iter()
            .map(|&v| {
                if v != NODATA && predicate(v) {
                    PRESENT
                } else {
                    NODATA
                }
            })
            .collect();
        Raster {
            extent: self.extent,
            cells,
        }
    }

    /// Add `other` into this raster cell by cell, treating nodata on either
    /// side as zero.
    pub fn accumulate(&mut self, other: &Raster) -> RasterResult<()> {
        self.check_aligned(other)?;
        for (acc, &v) in self.cells.iter_mut().zip(other.cells.iter()) {
            let lhs = if *acc == NODATA { 0 } else { *acc };
            let rhs = if v == NODATA { 0 } else { v };
            let sum = lhs.checked_add(rhs).ok_or(RasterError::Overflow)?;
            if sum == NODATA {
                return Err(RasterError::Overflow);
            }
            *acc = sum;
        }
        Ok(())
    }

    /// Largest data value, or `None` if every cell is nodata.
    pub fn max_value(&self) -> Option<u16> {
        self.cells.iter().copied().filter(|&v| v != NODATA).max()
    }

    /// Number of cells holding exactly `value`.
    pub fn count_value(&self, value: u16) -> u64 {
        self.cells.iter().filter(|&&v| v == value).count() as u64
    }

    /// Number of cells that are not nodata.
    pub fn data_cell_count(&self) -> u64 {
        self.cells.iter().filter(|&&v| v != NODATA).count() as u64
    }

    /// Approximate heap footprint in bytes.
    pub fn memory_size(&self) -> usize {
        self.cells.len() * std::mem::size_of::<u16>()
    }
}
