//! Single-image elevation backing, used when no tileset is available

use std::path::Path;

use crate::core::types::Result;
use crate::elevation::source::ElevationSource;
use crate::elevation::tileset::Raster;

/// Whole raster held in memory, normalized over its own min/max
pub struct SourceImageElevation {
    raster: Raster,
}

impl SourceImageElevation {
    /// Decode any format the `image` crate reads, as 16-bit luma
    pub fn open(path: &Path) -> Result<Self> {
        let raster = load_raster(path)?;
        log::info!("Loaded source image {} ({}x{})", path.display(), raster.width, raster.height);
        Ok(Self::from_raster(&raster))
    }

    pub fn from_raster(raster: &Raster) -> Self {
        Self {
            raster: raster.normalized(),
        }
    }

    pub fn memory_bytes(&self) -> usize {
        self.raster.samples.len() * std::mem::size_of::<f32>()
    }
}

impl ElevationSource for SourceImageElevation {
    fn name(&self) -> &str {
        "source image"
    }

    fn dimensions(&self) -> (u32, u32) {
        (self.raster.width, self.raster.height)
    }

    fn sample(&mut self, px: u32, py: u32) -> Result<f32> {
        Ok(self.raster.get(px.min(self.raster.width - 1), py.min(self.raster.height - 1)))
    }
}

/// Read an image file as raw 16-bit luma values
pub fn load_raster(path: &Path) -> Result<Raster> {
    let image = image::open(path)?.into_luma16();
    let (width, height) = image.dimensions();
    let samples = image.into_raw().into_iter().map(|v| v as f32).collect();
    Raster::new(width, height, samples)
}
