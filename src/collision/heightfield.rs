//! Heightfield collision shape
//!
//! A square grid of heights in meters over one chunk footprint. Each cell is
//! split along the same diagonal as the render mesh, and height, normal and
//! ray queries all use those two triangles, so a raycast lands exactly on
//! `height_at`.

use crate::core::config::ElevationRange;
use crate::core::types::{Vec2, Vec3};
use crate::math::{Aabb, Ray, TriangleHit};
use crate::terrain::Heightmap;

#[derive(Clone, Debug, PartialEq)]
pub struct HeightfieldShape {
    /// World (x, z) of the minimum corner
    origin: Vec2,
    /// Edge length in meters
    size: f32,
    /// Samples per edge
    resolution: usize,
    /// Row-major heights in meters
    heights: Vec<f32>,
    min_height: f32,
    max_height: f32,
}

impl HeightfieldShape {
    /// Resample a normalized heightmap to `resolution` samples per edge
    pub fn from_heightmap(
        heightmap: &Heightmap,
        range: ElevationRange,
        origin: Vec2,
        size: f32,
        resolution: usize,
    ) -> Self {
        let resolution = resolution.max(2);
        let resampled = if heightmap.width() == resolution && heightmap.height() == resolution {
            heightmap.clone()
        } else {
            heightmap.resample(resolution, resolution)
        };
        let heights: Vec<f32> = resampled.samples().iter().map(|&h| range.to_meters(h)).collect();
        let (min_height, max_height) = heights
            .iter()
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &h| (lo.min(h), hi.max(h)));
        Self {
            origin,
            size,
            resolution,
            heights,
            min_height,
            max_height,
        }
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    pub fn origin(&self) -> Vec2 {
        self.origin
    }

    pub fn heights(&self) -> &[f32] {
        &self.heights
    }

    fn cell_size(&self) -> f32 {
        self.size / (self.resolution - 1) as f32
    }

    fn height(&self, i: usize, j: usize) -> f32 {
        self.heights[j * self.resolution + i]
    }

    /// Chunk-local vertex position
    fn vertex(&self, i: usize, j: usize) -> Vec3 {
        let cell = self.cell_size();
        Vec3::new(i as f32 * cell, self.height(i, j), j as f32 * cell)
    }

    pub fn bounds(&self) -> Aabb {
        Aabb::from_footprint(
            self.origin,
            self.origin + Vec2::splat(self.size),
            self.min_height,
            self.max_height,
        )
    }

    /// Whether a world (x, z) lies on this shape's footprint
    pub fn contains(&self, x: f32, z: f32) -> bool {
        self.bounds().contains_xz(Vec2::new(x, z))
    }

    /// Cell and in-cell fractions for a world position, clamped onto the shape
    fn locate(&self, x: f32, z: f32) -> (usize, usize, f32, f32) {
        let cell = self.cell_size();
        let last = (self.resolution - 2) as f32;
        let gx = ((x - self.origin.x) / cell).clamp(0.0, last + 1.0);
        let gz = ((z - self.origin.y) / cell).clamp(0.0, last + 1.0);
        let i = gx.floor().min(last);
        let j = gz.floor().min(last);
        (i as usize, j as usize, gx - i, gz - j)
    }

    /// Surface height at a world position, clamped to the footprint
    pub fn height_at(&self, x: f32, z: f32) -> f32 {
        let (i, j, fx, fz) = self.locate(x, z);
        let a = self.height(i, j);
        let b = self.height(i + 1, j);
        let c = self.height(i, j + 1);
        let d = self.height(i + 1, j + 1);
        if fx + fz <= 1.0 {
            a + (b - a) * fx + (c - a) * fz
        } else {
            d + (c - d) * (1.0 - fx) + (b - d) * (1.0 - fz)
        }
    }

    /// Upward unit normal of the triangle under a world position
    pub fn normal_at(&self, x: f32, z: f32) -> Vec3 {
        let (i, j, fx, fz) = self.locate(x, z);
        let a = self.vertex(i, j);
        let b = self.vertex(i + 1, j);
        let c = self.vertex(i, j + 1);
        let d = self.vertex(i + 1, j + 1);
        let n = if fx + fz <= 1.0 {
            (c - a).cross(b - a)
        } else {
            (c - b).cross(d - b)
        };
        n.try_normalize().unwrap_or(Vec3::Y)
    }

    fn hit_cell(&self, ray: &Ray, i: usize, j: usize) -> Option<TriangleHit> {
        let a = self.vertex(i, j);
        let b = self.vertex(i + 1, j);
        let c = self.vertex(i, j + 1);
        let d = self.vertex(i + 1, j + 1);
        let first = ray.intersect_triangle(a, c, b);
        let second = ray.intersect_triangle(b, c, d);
        match (first, second) {
            (Some(x), Some(y)) => Some(if y.t < x.t { y } else { x }),
            (x, y) => x.or(y),
        }
    }

    /// First surface hit with `t` in `[t_min, t_max]`.
    ///
    /// Walks the cells under the ray with a 2D DDA and tests both triangles
    /// of each. `t` is measured along `ray` in world units.
    pub fn raycast(&self, ray: &Ray, t_min: f32, t_max: f32) -> Option<TriangleHit> {
        let (enter, exit) = ray.intersects_aabb(&self.bounds())?;
        let t0 = enter.max(t_min);
        let t1 = exit.min(t_max);
        if t0 > t1 {
            return None;
        }

        // Work in chunk-local space to keep f32 precision
        let shift = Vec3::new(self.origin.x, 0.0, self.origin.y);
        let local = Ray::new(ray.origin - shift, ray.direction)?;

        let cell = self.cell_size();
        let last = self.resolution - 2;
        let start = local.at(t0);
        let mut i = ((start.x / cell).floor().max(0.0) as usize).min(last);
        let mut j = ((start.z / cell).floor().max(0.0) as usize).min(last);

        let dir = local.direction;
        let step_x: isize = if dir.x >= 0.0 { 1 } else { -1 };
        let step_z: isize = if dir.z >= 0.0 { 1 } else { -1 };
        let boundary_t = |index: usize, step: isize, origin: f32, d: f32| {
            if d == 0.0 {
                return f32::INFINITY;
            }
            let edge = (if step > 0 { index + 1 } else { index }) as f32 * cell;
            (edge - origin) / d
        };
        let mut t_max_x = boundary_t(i, step_x, local.origin.x, dir.x);
        let mut t_max_z = boundary_t(j, step_z, local.origin.z, dir.z);
        let t_delta_x = if dir.x == 0.0 { f32::INFINITY } else { cell / dir.x.abs() };
        let t_delta_z = if dir.z == 0.0 { f32::INFINITY } else { cell / dir.z.abs() };

        let eps = 1e-4 * cell;
        loop {
            if let Some(hit) = self.hit_cell(&local, i, j) {
                if hit.t >= t0 - eps && hit.t <= t1 + eps {
                    return Some(hit);
                }
            }

            let next = t_max_x.min(t_max_z);
            if next > t1 {
                return None;
            }
            if t_max_x < t_max_z {
                let ni = i as isize + step_x;
                if ni < 0 || ni as usize > last {
                    return None;
                }
                i = ni as usize;
                t_max_x += t_delta_x;
            } else {
                let nj = j as isize + step_z;
                if nj < 0 || nj as usize > last {
                    return None;
                }
                j = nj as usize;
                t_max_z += t_delta_z;
            }
        }
    }

    pub fn memory_bytes(&self) -> usize {
        self.heights.len() * std::mem::size_of::<f32>()
    }
}
