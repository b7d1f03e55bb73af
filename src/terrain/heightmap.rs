//! Row-major sample grids shared by every terrain stage

use crate::core::types::Vec3;

/// 2D grid of normalized elevation samples.
///
/// Samples are row-major with `x` along columns and `z` along rows.
/// `spacing` is the ground distance between adjacent samples in meters.
#[derive(Clone, Debug, PartialEq)]
pub struct Heightmap {
    width: usize,
    height: usize,
    spacing: f32,
    samples: Vec<f32>,
}

impl Heightmap {
    /// Zero-filled heightmap
    pub fn new(width: usize, height: usize, spacing: f32) -> Self {
        Self {
            width,
            height,
            spacing,
            samples: vec![0.0; width * height],
        }
    }

    /// Wrap existing samples. Returns `None` if the length does not match.
    pub fn from_samples(width: usize, height: usize, spacing: f32, samples: Vec<f32>) -> Option<Self> {
        (samples.len() == width * height).then_some(Self {
            width,
            height,
            spacing,
            samples,
        })
    }

    /// Build by evaluating `f(x, z)` for every sample
    pub fn from_fn(width: usize, height: usize, spacing: f32, mut f: impl FnMut(usize, usize) -> f32) -> Self {
        let mut samples = Vec::with_capacity(width * height);
        for z in 0..height {
            for x in 0..width {
                samples.push(f(x, z));
            }
        }
        Self {
            width,
            height,
            spacing,
            samples,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn spacing(&self) -> f32 {
        self.spacing
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn samples_mut(&mut self) -> &mut [f32] {
        &mut self.samples
    }

    pub fn get(&self, x: usize, z: usize) -> f32 {
        self.samples[z * self.width + x]
    }

    pub fn set(&mut self, x: usize, z: usize, value: f32) {
        self.samples[z * self.width + x] = value;
    }

    /// Sample with coordinates clamped to the grid
    pub fn get_clamped(&self, x: isize, z: isize) -> f32 {
        let x = x.clamp(0, self.width as isize - 1) as usize;
        let z = z.clamp(0, self.height as isize - 1) as usize;
        self.get(x, z)
    }

    /// Bilinear sample at fractional sample coordinates (clamped)
    pub fn sample_bilinear(&self, fx: f32, fz: f32) -> f32 {
        let max_x = (self.width - 1) as f32;
        let max_z = (self.height - 1) as f32;
        let fx = fx.clamp(0.0, max_x);
        let fz = fz.clamp(0.0, max_z);

        let x0 = fx.floor() as usize;
        let z0 = fz.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let z1 = (z0 + 1).min(self.height - 1);
        let tx = fx - x0 as f32;
        let tz = fz - z0 as f32;

        let top = self.get(x0, z0) * (1.0 - tx) + self.get(x1, z0) * tx;
        let bottom = self.get(x0, z1) * (1.0 - tx) + self.get(x1, z1) * tx;
        top * (1.0 - tz) + bottom * tz
    }

    /// Resample to a new resolution covering the same footprint.
    ///
    /// Corner and edge samples land exactly on source samples when the
    /// resolutions divide evenly, so edges shared between chunks stay shared.
    pub fn resample(&self, width: usize, height: usize) -> Heightmap {
        let sx = (self.width - 1) as f32 / (width.max(2) - 1) as f32;
        let sz = (self.height - 1) as f32 / (height.max(2) - 1) as f32;
        let extent = self.spacing * (self.width - 1) as f32;
        let spacing = extent / (width.max(2) - 1) as f32;
        Heightmap::from_fn(width, height, spacing, |x, z| {
            self.sample_bilinear(x as f32 * sx, z as f32 * sz)
        })
    }

    /// Copy out a `width x height` window starting at `(x0, z0)`
    pub fn crop(&self, x0: usize, z0: usize, width: usize, height: usize) -> Heightmap {
        Heightmap::from_fn(width, height, self.spacing, |x, z| self.get(x0 + x, z0 + z))
    }

    /// (min, max) sample values
    pub fn min_max(&self) -> (f32, f32) {
        self.samples.iter().fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &h| {
            (lo.min(h), hi.max(h))
        })
    }

    /// `max - min` of the samples
    pub fn relief(&self) -> f32 {
        let (lo, hi) = self.min_max();
        if lo > hi { 0.0 } else { hi - lo }
    }

    pub fn memory_bytes(&self) -> usize {
        self.samples.len() * std::mem::size_of::<f32>()
    }
}

/// Per-sample unit normals with the same footprint as a heightmap
#[derive(Clone, Debug, PartialEq)]
pub struct NormalMap {
    width: usize,
    height: usize,
    normals: Vec<Vec3>,
}

impl NormalMap {
    pub fn from_fn(width: usize, height: usize, mut f: impl FnMut(usize, usize) -> Vec3) -> Self {
        let mut normals = Vec::with_capacity(width * height);
        for z in 0..height {
            for x in 0..width {
                normals.push(f(x, z));
            }
        }
        Self {
            width,
            height,
            normals,
        }
    }

    pub fn from_normals(width: usize, height: usize, normals: Vec<Vec3>) -> Option<Self> {
        (normals.len() == width * height).then_some(Self {
            width,
            height,
            normals,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn normals(&self) -> &[Vec3] {
        &self.normals
    }

    pub fn get(&self, x: usize, z: usize) -> Vec3 {
        self.normals[z * self.width + x]
    }

    pub fn crop(&self, x0: usize, z0: usize, width: usize, height: usize) -> NormalMap {
        NormalMap::from_fn(width, height, |x, z| self.get(x0 + x, z0 + z))
    }

    pub fn memory_bytes(&self) -> usize {
        self.normals.len() * std::mem::size_of::<Vec3>()
    }
}
