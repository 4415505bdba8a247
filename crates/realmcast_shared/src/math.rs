//! Geometry used by targeting and range checks.
//!
//! The ground plane is X/Y, Z is height. Headings are radians measured
//! counter-clockwise from +X.

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};

/// 3D Vector - positions and ground targets
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable, Serialize, Deserialize)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component (height)
    pub z: f32,
}

impl Vec3 {
    /// Creates a new Vec3
    #[must_use]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);

    /// Dot product
    #[must_use]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Length squared (avoids sqrt)
    #[must_use]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Length
    #[must_use]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Distance to another point
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }

    /// Returns true if `other` lies within `radius` (inclusive).
    #[inline]
    #[must_use]
    pub fn within(self, other: Self, radius: f32) -> bool {
        (self - other).length_squared() <= radius * radius
    }

    /// Heading (radians) that points from `self` towards `target` on the ground plane.
    #[must_use]
    pub fn heading_to(self, target: Self) -> f32 {
        (target.y - self.y).atan2(target.x - self.x)
    }

    /// Checks whether `target` lies inside the frontal arc of a viewer standing
    /// at `self` and facing `heading`.
    ///
    /// `arc_degrees` is the full width of the arc (180 = everything in front).
    /// A target on the viewer's own spot is always in front.
    #[must_use]
    pub fn is_in_front(self, heading: f32, target: Self, arc_degrees: f32) -> bool {
        let dx = target.x - self.x;
        let dy = target.y - self.y;
        if dx.abs() <= f32::EPSILON && dy.abs() <= f32::EPSILON {
            return true;
        }
        let delta = normalize_angle(self.heading_to(target) - heading).abs();
        delta <= (arc_degrees * 0.5).to_radians() + 1e-4
    }
}

/// Wraps an angle into `(-PI, PI]`.
#[must_use]
pub fn normalize_angle(angle: f32) -> f32 {
    use std::f32::consts::{PI, TAU};
    let mut a = angle % TAU;
    if a > PI {
        a -= TAU;
    } else if a <= -PI {
        a += TAU;
    }
    a
}

impl std::ops::Add for Vec3 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl std::ops::Sub for Vec3 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl std::ops::Mul<f32> for Vec3 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}
