//! Axis-aligned bounding boxes in world coordinates.

use crate::Vec3;

/// Axis-aligned bounding box in world coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self { min, max }
    }

    /// Builds the bounding box of a non-empty point set.
    pub fn from_points(points: &[Vec3]) -> Option<Self> {
        let first = *points.first()?;
        let mut bounds = Self::new(first, first);
        for &p in &points[1..] {
            bounds.update(p);
        }
        Some(bounds)
    }

    /// Grows the box to contain `point`.
    pub fn update(&mut self, point: Vec3) {
        self.min = self.min.min(point);
        self.max = self.max.max(point);
    }

    /// Full 3D overlap test.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
            && self.min.z <= other.max.z
            && self.max.z >= other.min.z
    }

    /// Overlap test in the ground plane, ignoring the world up axis (z).
    pub fn intersects_2d(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_points_covers_all_inputs() {
        let points = [
            Vec3::new(1.0, -2.0, 3.0),
            Vec3::new(-4.0, 5.0, 0.5),
            Vec3::new(0.0, 0.0, 9.0),
        ];
        let bounds = Aabb::from_points(&points).unwrap();
        assert_eq!(bounds.min, Vec3::new(-4.0, -2.0, 0.5));
        assert_eq!(bounds.max, Vec3::new(1.0, 5.0, 9.0));
        assert!(Aabb::from_points(&[]).is_none());
    }

    #[test]
    fn intersect_2d_ignores_height() {
        let a = Aabb::new(Vec3::new(0.0, 0.0, 0.0), Vec3::new(10.0, 10.0, 1.0));
        let b = Aabb::new(Vec3::new(5.0, 5.0, 50.0), Vec3::new(15.0, 15.0, 60.0));
        assert!(!a.intersects(&b));
        assert!(a.intersects_2d(&b));

        let c = Aabb::new(Vec3::new(11.0, 0.0, 0.0), Vec3::new(12.0, 10.0, 1.0));
        assert!(!a.intersects_2d(&c));
    }
}
