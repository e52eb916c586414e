//! Bounding spheres used for culling and level-of-detail metrics.

use glam::{Mat4, Vec3};

/// A sphere enclosing a subtree, in the local space of the node that owns it.
///
/// A negative radius marks the sphere as invalid (nothing enclosed yet).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BoundingSphere {
    /// Sphere center.
    pub center: Vec3,
    /// Sphere radius, negative when invalid.
    pub radius: f32,
}

impl Default for BoundingSphere {
    fn default() -> Self {
        Self::invalid()
    }
}

impl BoundingSphere {
    /// Create a sphere from a center and radius.
    pub fn new(center: Vec3, radius: f32) -> Self {
        Self { center, radius }
    }

    /// An empty sphere that any expansion replaces.
    pub fn invalid() -> Self {
        Self {
            center: Vec3::ZERO,
            radius: -1.0,
        }
    }

    /// Whether the sphere encloses anything.
    pub fn is_valid(&self) -> bool {
        self.radius >= 0.0
    }

    /// Overwrite center and radius.
    pub fn set(&mut self, center: Vec3, radius: f32) {
        self.center = center;
        self.radius = radius;
    }

    /// Squared radius.
    pub fn radius2(&self) -> f32 {
        self.radius * self.radius
    }

    /// Grow this sphere so that it also encloses `other`.
    ///
    /// Invalid spheres are ignored; expanding an invalid sphere copies `other`.
    pub fn expand_by_sphere(&mut self, other: &BoundingSphere) {
        if !other.is_valid() {
            return;
        }
        if !self.is_valid() {
            *self = *other;
            return;
        }

        let offset = other.center - self.center;
        let distance = offset.length();

        // other already inside self
        if distance + other.radius <= self.radius {
            return;
        }
        // self inside other
        if distance + self.radius <= other.radius {
            *self = *other;
            return;
        }

        let new_radius = (self.radius + distance + other.radius) * 0.5;
        let ratio = (new_radius - self.radius) / distance;
        self.center += offset * ratio;
        self.radius = new_radius;
    }

    /// Transform the sphere by an affine matrix.
    ///
    /// The radius is scaled by the largest axis scale so the result stays conservative.
    pub fn transformed(&self, matrix: &Mat4) -> BoundingSphere {
        if !self.is_valid() {
            return *self;
        }
        let scale = matrix
            .x_axis
            .truncate()
            .length()
            .max(matrix.y_axis.truncate().length())
            .max(matrix.z_axis.truncate().length());
        BoundingSphere {
            center: matrix.transform_point3(self.center),
            radius: self.radius * scale,
        }
    }
}
