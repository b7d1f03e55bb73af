//! Ray type and intersection tests

use crate::core::types::Vec3;
use super::aabb::Aabb;

/// A ray defined by origin and unit direction
#[derive(Clone, Copy, Debug)]
pub struct Ray {
    pub origin: Vec3,
    pub direction: Vec3,
    /// Precomputed 1/direction for fast AABB intersection
    pub inv_direction: Vec3,
}

/// Intersection of a ray with a triangle
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TriangleHit {
    /// Distance along the ray
    pub t: f32,
    /// Geometric normal, facing against the ray
    pub normal: Vec3,
}

impl Ray {
    /// Create a new ray. `direction` is normalized; a zero direction yields `None`.
    pub fn new(origin: Vec3, direction: Vec3) -> Option<Self> {
        let direction = direction.try_normalize()?;
        Some(Self {
            origin,
            direction,
            inv_direction: direction.recip(),
        })
    }

    /// Get point along ray at parameter t
    pub fn at(&self, t: f32) -> Vec3 {
        self.origin + self.direction * t
    }

    /// Ray-AABB intersection using slab method
    /// Returns Some((t_near, t_far)) if intersection, None otherwise
    pub fn intersects_aabb(&self, aabb: &Aabb) -> Option<(f32, f32)> {
        let mut t_near = f32::NEG_INFINITY;
        let mut t_far = f32::INFINITY;

        for axis in 0..3 {
            let origin = self.origin[axis];
            let (min, max) = (aabb.min[axis], aabb.max[axis]);

            // Axis-parallel: inside the slab or never
            if self.direction[axis] == 0.0 {
                if origin < min || origin > max {
                    return None;
                }
                continue;
            }

            let inv = self.inv_direction[axis];
            let t1 = (min - origin) * inv;
            let t2 = (max - origin) * inv;
            t_near = t_near.max(t1.min(t2));
            t_far = t_far.min(t1.max(t2));
            if t_near > t_far {
                return None;
            }
        }

        if t_far >= 0.0 {
            Some((t_near.max(0.0), t_far))
        } else {
            None
        }
    }

    /// Möller–Trumbore ray/triangle test, two-sided.
    pub fn intersect_triangle(&self, a: Vec3, b: Vec3, c: Vec3) -> Option<TriangleHit> {
        const EPSILON: f32 = 1e-7;

        let edge1 = b - a;
        let edge2 = c - a;
        let p = self.direction.cross(edge2);
        let det = edge1.dot(p);
        if det.abs() < EPSILON {
            return None;
        }
        let inv_det = 1.0 / det;

        let s = self.origin - a;
        let u = s.dot(p) * inv_det;
        if !(0.0..=1.0).contains(&u) {
            return None;
        }

        let q = s.cross(edge1);
        let v = self.direction.dot(q) * inv_det;
        if v < 0.0 || u + v > 1.0 {
            return None;
        }

        let t = edge2.dot(q) * inv_det;
        if t < 0.0 {
            return None;
        }

        let mut normal = edge1.cross(edge2).normalize_or_zero();
        if normal.dot(self.direction) > 0.0 {
            normal = -normal;
        }
        Some(TriangleHit { t, normal })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_at() {
        let ray = Ray::new(Vec3::ZERO, Vec3::new(2.0, 0.0, 0.0)).unwrap();
        assert_eq!(ray.at(5.0), Vec3::new(5.0, 0.0, 0.0));
    }

    #[test]
    fn test_zero_direction_rejected() {
        assert!(Ray::new(Vec3::ZERO, Vec3::ZERO).is_none());
    }

    #[test]
    fn test_intersects_aabb_hit() {
        let ray = Ray::new(Vec3::new(-2.0, 0.5, 0.5), Vec3::X).unwrap();
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        let (t_near, t_far) = ray.intersects_aabb(&aabb).unwrap();
        assert!((t_near - 2.0).abs() < 0.001);
        assert!((t_far - 3.0).abs() < 0.001);
    }

    #[test]
    fn test_intersects_aabb_miss() {
        let ray = Ray::new(Vec3::new(-2.0, 5.0, 0.5), Vec3::X).unwrap();
        let aabb = Aabb::new(Vec3::ZERO, Vec3::ONE);
        assert!(ray.intersects_aabb(&aabb).is_none());
    }

    #[test]
    fn test_vertical_ray_hits_flat_box() {
        let ray = Ray::new(Vec3::new(5.0, 100.0, 5.0), -Vec3::Y).unwrap();
        let aabb = Aabb::new(Vec3::new(0.0, -10.0, 0.0), Vec3::new(10.0, 0.0, 10.0));
        let (t_near, _) = ray.intersects_aabb(&aabb).unwrap();
        assert!((t_near - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_ray_on_box_face() {
        let ray = Ray::new(Vec3::new(0.0, 100.0, 0.0), -Vec3::Y).unwrap();
        let aabb = Aabb::new(Vec3::new(0.0, -10.0, 0.0), Vec3::new(512.0, 10.0, 512.0));
        let (t_near, t_far) = ray.intersects_aabb(&aabb).unwrap();
        assert!((t_near - 90.0).abs() < 1e-4);
        assert!((t_far - 110.0).abs() < 1e-4);
    }

    #[test]
    fn test_intersect_triangle() {
        let ray = Ray::new(Vec3::new(0.25, 10.0, 0.25), -Vec3::Y).unwrap();
        let hit = ray
            .intersect_triangle(Vec3::ZERO, Vec3::Z, Vec3::X)
            .unwrap();
        assert!((hit.t - 10.0).abs() < 1e-5);
        assert!((hit.normal - Vec3::Y).length() < 1e-5);
    }

    #[test]
    fn test_intersect_triangle_miss_outside() {
        let ray = Ray::new(Vec3::new(0.9, 10.0, 0.9), -Vec3::Y).unwrap();
        assert!(ray.intersect_triangle(Vec3::ZERO, Vec3::Z, Vec3::X).is_none());
    }

    #[test]
    fn test_intersect_triangle_behind_origin() {
        let ray = Ray::new(Vec3::new(0.25, -10.0, 0.25), -Vec3::Y).unwrap();
        assert!(ray.intersect_triangle(Vec3::ZERO, Vec3::Z, Vec3::X).is_none());
    }
}
