//! Raster storage backends.
//!
//! The pipeline reads species rasters and writes richness surfaces through the
//! [`RasterStore`] trait, so the same batch logic runs against TIFF files on
//! disk or an in-memory map.
//!
//! # File format
//!
//! [`FileRasterStore`] reads single-band grayscale TIFFs:
//! - 16-bit cells are taken as-is, with `u16::MAX` as nodata
//! - 8-bit cells are widened, with 255 mapped to nodata
//!
//! Everything it writes is 16-bit grayscale TIFF.

use crate::core::error::{RasterError, RasterResult};
use crate::core::raster::{Raster, NODATA};
use crate::core::types::RasterExtent;
use crate::richness::histogram::ValueHistogram;
use image::{DynamicImage, ImageBuffer, ImageFormat, Luma};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

/// Nodata value used by 8-bit habitat rasters.
pub const NODATA_U8: u8 = u8::MAX;

/// Trait for raster storage.
pub trait RasterStore: Send + Sync {
    /// Read a raster.
    fn read(&self, path: &Path) -> RasterResult<Raster>;

    /// Write a raster, replacing anything at `path`.
    fn write(&self, raster: &Raster, path: &Path) -> RasterResult<()>;

    /// Whether a raster exists at `path`.
    fn exists(&self, path: &Path) -> bool;

    /// Grid dimensions without loading cell data where the backend allows it.
    fn extent(&self, path: &Path) -> RasterResult<RasterExtent>;

    /// Move a written raster to its durable location.
    fn promote(&self, from: &Path, to: &Path) -> RasterResult<()>;

    /// Value histogram of a stored raster.
    fn histogram(&self, path: &Path) -> RasterResult<ValueHistogram> {
        Ok(ValueHistogram::from_raster(&self.read(path)?))
    }
}

/// TIFF-file raster store.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileRasterStore;

impl FileRasterStore {
    /// Create a file store.
    pub fn new() -> Self {
        Self
    }

    fn unreadable(path: &Path, error: impl ToString) -> RasterError {
        RasterError::Unreadable {
            path: path.to_path_buf(),
            error: error.to_string(),
        }
    }

    fn write_error(path: &Path, error: impl ToString) -> RasterError {
        RasterError::Write {
            path: path.to_path_buf(),
            error: error.to_string(),
        }
    }
}

impl RasterStore for FileRasterStore {
    fn read(&self, path: &Path) -> RasterResult<Raster> {
        if !path.is_file() {
            return Err(RasterError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let image = image::open(path).map_err(|e| Self::unreadable(path, e))?;
        let (width, height) = (image.width(), image.height());

        let cells = match image {
            DynamicImage::ImageLuma16(buffer) => buffer.into_raw(),
            DynamicImage::ImageLuma8(buffer) => buffer
                .into_raw()
                .into_iter()
                .map(|v| if v == NODATA_U8 { NODATA } else { v as u16 })
                .collect(),
            other => {
                return Err(Self::unreadable(
                    path,
                    format!("expected single-band grayscale, got {:?}", other.color()),
                ))
            }
        };

        Raster::from_cells(width, height, cells)
    }

    fn write(&self, raster: &Raster, path: &Path) -> RasterResult<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| Self::write_error(path, e))?;
            }
        }

        let buffer: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(raster.width(), raster.height(), raster.cells().to_vec())
                .ok_or_else(|| Self::write_error(path, "cell buffer does not match extent"))?;

        buffer
            .save_with_format(path, ImageFormat::Tiff)
            .map_err(|e| Self::write_error(path, e))
    }

    fn exists(&self, path: &Path) -> bool {
        path.is_file()
    }

    fn extent(&self, path: &Path) -> RasterResult<RasterExtent> {
        if !path.is_file() {
            return Err(RasterError::NotFound {
                path: path.to_path_buf(),
            });
        }
        let (width, height) =
            image::image_dimensions(path).map_err(|e| Self::unreadable(path, e))?;
        Ok(RasterExtent::new(width, height))
    }

    fn promote(&self, from: &Path, to: &Path) -> RasterResult<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent).map_err(|e| Self::write_error(to, e))?;
        }
        fs::rename(from, to).map_err(|e| Self::write_error(to, e))
    }
}

/// In-memory raster store.
///
/// Useful for tests and for callers that produce species rasters on the fly.
#[derive(Debug, Default)]
pub struct MemoryRasterStore {
    rasters: RwLock<HashMap<PathBuf, Raster>>,
    denied_prefix: Option<PathBuf>,
}

impl MemoryRasterStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every write under `prefix`.
    pub fn with_denied_writes(mut self, prefix: impl Into<PathBuf>) -> Self {
        self.denied_prefix = Some(prefix.into());
        self
    }

    /// Insert a raster directly.
    pub fn insert(&self, path: impl Into<PathBuf>, raster: Raster) {
        self.rasters.write().insert(path.into(), raster);
    }

    /// Remove a raster, returning it if present.
    pub fn remove(&self, path: &Path) -> Option<Raster> {
        self.rasters.write().remove(path)
    }

    /// Number of stored rasters.
    pub fn len(&self) -> usize {
        self.rasters.read().len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.rasters.read().is_empty()
    }

    fn check_writable(&self, path: &Path) -> RasterResult<()> {
        match &self.denied_prefix {
            Some(prefix) if path.starts_with(prefix) => Err(RasterError::Write {
                path: path.to_path_buf(),
                error: "write denied".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl RasterStore for MemoryRasterStore {
    fn read(&self, path: &Path) -> RasterResult<Raster> {
        self.rasters
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| RasterError::NotFound {
                path: path.to_path_buf(),
            })
    }

    fn write(&self, raster: &Raster, path: &Path) -> RasterResult<()> {
        self.check_writable(path)?;
        self.insert(path, raster.clone());
        Ok(())
    }

    fn exists(&self, path: &Path) -> bool {
        self.rasters.read().contains_key(path)
    }

    fn extent(&self, path: &Path) -> RasterResult<RasterExtent> {
        self.rasters
            .read()
            .get(path)
            .map(Raster::extent)
            .ok_or_else(|| RasterError::NotFound {
                path: path.to_path_buf(),
            })
    }

    fn promote(&self, from: &Path, to: &Path) -> RasterResult<()> {
        self.check_writable(to)?;
        let mut rasters = self.rasters.write();
        let raster = rasters.remove(from).ok_or_else(|| RasterError::NotFound {
            path: from.to_path_buf(),
        })?;
        rasters.insert(to.to_path_buf(), raster);
        Ok(())
    }
}
