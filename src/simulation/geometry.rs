//! 3-D geometry helpers for the simulation volume.
//!
//! Contains:
//! - `Point3`: world coordinates in metres
//! - Distance calculations (squared distance to avoid sqrt in hot paths)
//! - Bounding-box clipping used by every mobility model

use serde::Deserialize;

/// A position or displacement in the simulation volume, in metres.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const ZERO: Point3 = Point3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Point3 { x, y, z }
    }

    pub fn add(&self, other: &Point3) -> Point3 {
        Point3::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(&self, other: &Point3) -> Point3 {
        Point3::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(&self, k: f64) -> Point3 {
        Point3::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }
}

/// Squared Euclidean distance (avoids a sqrt when only comparing ranges).
pub fn distance2(a: &Point3, b: &Point3) -> f64 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    let dz = a.z - b.z;
    dx * dx + dy * dy + dz * dz
}

/// Euclidean distance in metres.
pub fn distance(a: &Point3, b: &Point3) -> f64 {
    distance2(a, b).sqrt()
}

/// Axis-aligned simulation volume: `[0, length] x [0, width] x [0, height]`.
#[derive(Debug, Clone, Copy)]
pub struct BoundingBox {
    pub length: f64,
    pub width: f64,
    pub height: f64,
}

impl BoundingBox {
    pub fn new(length: f64, width: f64, height: f64) -> Self {
        BoundingBox { length, width, height }
    }

    /// Clip a point into the volume. Mobility models never place a node
    /// outside the box; out-of-range targets are clamped onto the boundary.
    pub fn clip(&self, p: &Point3) -> Point3 {
        Point3::new(
            p.x.clamp(0.0, self.length),
            p.y.clamp(0.0, self.width),
            p.z.clamp(0.0, self.height),
        )
    }

    pub fn contains(&self, p: &Point3) -> bool {
        (0.0..=self.length).contains(&p.x)
            && (0.0..=self.width).contains(&p.y)
            && (0.0..=self.height).contains(&p.z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_is_euclidean() {
        let a = Point3::new(0.0, 0.0, 0.0);
        let b = Point3::new(3.0, 4.0, 0.0);
        assert!((distance(&a, &b) - 5.0).abs() < 1e-12);
        assert!((distance2(&a, &b) - 25.0).abs() < 1e-12);
    }

    #[test]
    fn clip_clamps_to_volume() {
        let bbox = BoundingBox::new(600.0, 600.0, 100.0);
        let inside = Point3::new(10.0, 20.0, 30.0);
        assert_eq!(bbox.clip(&inside), inside);
        assert!(bbox.contains(&inside));

        let outside = Point3::new(-5.0, 700.0, 120.0);
        let clipped = bbox.clip(&outside);
        assert_eq!(clipped, Point3::new(0.0, 600.0, 100.0));
        assert!(bbox.contains(&clipped));
    }

    #[test]
    fn vector_ops() {
        let a = Point3::new(1.0, 2.0, 3.0);
        let b = Point3::new(4.0, 6.0, 8.0);
        let d = b.sub(&a);
        assert_eq!(d, Point3::new(3.0, 4.0, 5.0));
        assert!((d.norm() - 50.0_f64.sqrt()).abs() < 1e-12);
        assert_eq!(a.add(&d), b);
        assert_eq!(d.scale(2.0), Point3::new(6.0, 8.0, 10.0));
    }
}
