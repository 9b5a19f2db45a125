//! Planar geometry helpers shared by the layout, registry and spatial crates.
//!
//! Positions are region-space [`Vec3`] values with `Z` pointing up. Orientation
//! is reduced to a yaw angle in radians around the `Z` axis, where a yaw of zero
//! faces [`FORWARD`].

use std::f32::consts::{PI, TAU};

use glam::Vec3;
use serde::{Deserialize, Serialize};

/// Direction faced by an object with zero yaw.
pub const FORWARD: Vec3 = Vec3::X;
/// Direction to the right of an object with zero yaw.
pub const RIGHT: Vec3 = Vec3::Y;
/// Direction behind an object with zero yaw.
pub const BACK: Vec3 = Vec3::NEG_X;

/// Axis-aligned bounding box in region space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Aabb {
    min: Vec3,
    max: Vec3,
}

impl Aabb {
    /// Creates a box from two corners, normalising the component order.
    #[must_use]
    pub fn new(a: Vec3, b: Vec3) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Creates a box centred on `center` with the provided half extents.
    #[must_use]
    pub fn from_center(center: Vec3, half_extents: Vec3) -> Self {
        let half_extents = half_extents.abs();
        Self {
            min: center - half_extents,
            max: center + half_extents,
        }
    }

    /// Lower corner of the box.
    #[must_use]
    pub const fn min(&self) -> Vec3 {
        self.min
    }

    /// Upper corner of the box.
    #[must_use]
    pub const fn max(&self) -> Vec3 {
        self.max
    }

    /// Centre point of the box.
    #[must_use]
    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    /// Extent along the `X` axis.
    #[must_use]
    pub fn width(&self) -> f32 {
        self.max.x - self.min.x
    }

    /// Extent along the `Y` axis.
    #[must_use]
    pub fn length(&self) -> f32 {
        self.max.y - self.min.y
    }

    /// Extent along the `Z` axis.
    #[must_use]
    pub fn height(&self) -> f32 {
        self.max.z - self.min.z
    }

    /// Planar area of the box footprint.
    #[must_use]
    pub fn area_xy(&self) -> f32 {
        self.width() * self.length()
    }

    /// Reports whether the box has no planar footprint.
    #[must_use]
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0.0 || self.length() <= 0.0
    }

    /// Reports whether `point` lies inside the box footprint, edges included.
    #[must_use]
    pub fn contains_xy(&self, point: Vec3) -> bool {
        point.x >= self.min.x
            && point.x <= self.max.x
            && point.y >= self.min.y
            && point.y <= self.max.y
    }

    /// Reports whether `other` lies completely inside the box.
    #[must_use]
    pub fn fully_contains(&self, other: &Aabb) -> bool {
        other.min.cmpge(self.min).all() && other.max.cmple(self.max).all()
    }

    /// Reports whether the two boxes overlap, touching edges included.
    #[must_use]
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.cmple(other.max).all() && self.max.cmpge(other.min).all()
    }

    /// Returns a copy grown by `amount` on every side.
    #[must_use]
    pub fn expanded(&self, amount: f32) -> Self {
        Self {
            min: self.min - Vec3::splat(amount),
            max: self.max + Vec3::splat(amount),
        }
    }
}

/// Sphere in region space.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Sphere {
    center: Vec3,
    radius: f32,
}

impl Sphere {
    /// Creates a sphere; negative radii are clamped to zero.
    #[must_use]
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self {
            center,
            radius: radius.max(0.0),
        }
    }

    /// Centre of the sphere.
    #[must_use]
    pub const fn center(&self) -> Vec3 {
        self.center
    }

    /// Radius of the sphere.
    #[must_use]
    pub const fn radius(&self) -> f32 {
        self.radius
    }

    /// Tight axis-aligned bounds of the sphere.
    #[must_use]
    pub fn aabb(&self) -> Aabb {
        Aabb::from_center(self.center, Vec3::splat(self.radius))
    }

    /// Reports whether two spheres overlap.
    #[must_use]
    pub fn intersects(&self, other: &Sphere) -> bool {
        let reach = self.radius + other.radius;
        self.center.distance_squared(other.center) <= reach * reach
    }

    /// Reports whether the sphere overlaps `aabb`.
    #[must_use]
    pub fn intersects_aabb(&self, aabb: &Aabb) -> bool {
        let closest = self.center.clamp(aabb.min(), aabb.max());
        closest.distance_squared(self.center) <= self.radius * self.radius
    }
}

/// Position plus yaw, composable parent-to-child.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    position: Vec3,
    yaw: f32,
}

impl Transform {
    /// Transform that leaves positions and orientations untouched.
    pub const IDENTITY: Self = Self {
        position: Vec3::ZERO,
        yaw: 0.0,
    };

    /// Creates a transform from a translation and a yaw in radians.
    #[must_use]
    pub const fn new(position: Vec3, yaw: f32) -> Self {
        Self { position, yaw }
    }

    /// Translation component.
    #[must_use]
    pub const fn position(&self) -> Vec3 {
        self.position
    }

    /// Yaw component in radians.
    #[must_use]
    pub const fn yaw(&self) -> f32 {
        self.yaw
    }

    /// Applies `child`, expressed in this transform's space, yielding its
    /// transform in the parent space of `self`.
    #[must_use]
    pub fn compose(&self, child: &Transform) -> Transform {
        Transform {
            position: self.position + rotate_z(child.position, self.yaw),
            yaw: wrap_angle(self.yaw + child.yaw),
        }
    }
}

impl Default for Transform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Rotates `vector` around the `Z` axis by `angle` radians.
#[must_use]
pub fn rotate_z(vector: Vec3, angle: f32) -> Vec3 {
    if angle == 0.0 {
        return vector;
    }
    let (sin, cos) = angle.sin_cos();
    Vec3::new(
        vector.x * cos - vector.y * sin,
        vector.x * sin + vector.y * cos,
        vector.z,
    )
}

/// Yaw that faces along the planar part of `delta`; zero for a vertical or null delta.
#[must_use]
pub fn yaw_from_delta(delta: Vec3) -> f32 {
    if delta.x == 0.0 && delta.y == 0.0 {
        return 0.0;
    }
    delta.y.atan2(delta.x)
}

/// Planar distance between two points.
#[must_use]
pub fn distance_2d(a: Vec3, b: Vec3) -> f32 {
    (a.x - b.x).hypot(a.y - b.y)
}

/// Wraps an angle into `(-π, π]`.
#[must_use]
pub fn wrap_angle(angle: f32) -> f32 {
    let mut wrapped = angle % TAU;
    if wrapped <= -PI {
        wrapped += TAU;
    } else if wrapped > PI {
        wrapped -= TAU;
    }
    wrapped
}
