//! Detail metrics: eye distance and projected pixel size, and the helpers that
//! turn them into the required range compared against child ranges.

use canopy_scene::Viewport;
use glam::{Mat4, Vec3, Vec4};

/// Half-open detail interval `[min, max)` assigned to one child slot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Range {
    pub min: f32,
    pub max: f32,
}

impl Range {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    /// Lower bound inclusive, upper bound exclusive.
    pub fn contains(&self, value: f32) -> bool {
        self.min <= value && value < self.max
    }
}

/// Which metric child ranges are expressed in.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RangeMode {
    /// Ranges are eye distances scaled by the visitor's LOD scale.
    #[default]
    DistanceFromEyePoint,
    /// Ranges are squared projected pixel sizes.
    PixelSizeOnScreen,
}

/// Eye position expressed in the local space of the model-view matrix.
pub fn eye_point(model_view: &Mat4) -> Vec3 {
    model_view.inverse().transform_point3(Vec3::ZERO)
}

/// Required range in distance mode.
pub fn distance_required_range(distance: f32, lod_scale: f32) -> f32 {
    distance * lod_scale
}

/// Vector whose dot product with a homogeneous point gives the size in
/// pixels of one world unit at that point.
///
/// The projection's horizontal and vertical scale terms are pre-multiplied by
/// the viewport window transform, then combined with the model-view matrix so
/// the result can be evaluated directly against object-space centers.
pub fn compute_pixel_size_vector(viewport: &Viewport, projection: &Mat4, model_view: &Mat4) -> Vec4 {
    let p = projection.to_cols_array();
    let m = model_view.to_cols_array();
    let half_width = viewport.width() * 0.5;
    let half_height = viewport.height() * 0.5;

    // horizontal pixels
    let p00 = p[0] * half_width;
    let p20_00 = p[8] * half_width + p[11] * half_width;
    let scale00 = Vec3::new(
        m[0] * p00 + m[2] * p20_00,
        m[4] * p00 + m[6] * p20_00,
        m[8] * p00 + m[10] * p20_00,
    );

    // vertical pixels
    let p10 = p[5] * half_height;
    let p20_10 = p[9] * half_height + p[11] * half_height;
    let scale10 = Vec3::new(
        m[1] * p10 + m[2] * p20_10,
        m[5] * p10 + m[6] * p20_10,
        m[9] * p10 + m[10] * p20_10,
    );

    let p23 = p[11];
    let p33 = p[15];
    let pixel_size_vector = Vec4::new(
        m[2] * p23,
        m[6] * p23,
        m[10] * p23,
        m[14] * p23 + m[15] * p33,
    );

    let scale_ratio =
        std::f32::consts::FRAC_1_SQRT_2 / (scale00.length_squared() + scale10.length_squared()).sqrt();
    pixel_size_vector * scale_ratio
}

/// Projected size in pixels of a sphere; may be negative behind the eye.
pub fn pixel_size(center: Vec3, radius: f32, pixel_size_vector: Vec4) -> f32 {
    radius / center.extend(1.0).dot(pixel_size_vector)
}

/// Absolute projected size, so spheres near the view plane stay usable.
pub fn clamped_pixel_size(center: Vec3, radius: f32, pixel_size_vector: Vec4) -> f32 {
    pixel_size(center, radius, pixel_size_vector).abs()
}

/// Required range in pixel-size mode: `(pixel_size / lod_scale)²`.
///
/// Negative or NaN values from degenerate projections fall back to `fallback`,
/// the lower bound of the last declared range.
pub fn pixel_required_range(clamped_pixel_size: f32, lod_scale: f32, fallback: f32) -> f32 {
    let required_range = (clamped_pixel_size / lod_scale).powi(2);
    if required_range >= 0.0 {
        required_range
    } else {
        fallback
    }
}

/// Projected screen area of a sphere (Quilez' exact ellipse area).
///
/// Not used by traversal, which ships with the squared pixel-size
/// approximation; kept as the candidate for a true solid-angle metric.
pub fn projected_sphere_area(center: Vec3, radius: f32, camera: &Mat4, focal_length: f32) -> f32 {
    let o = camera.transform_point3(center);
    let r2 = radius * radius;
    let z2 = o.z * o.z;
    let l2 = o.length_squared();
    -std::f32::consts::PI * focal_length * focal_length * r2 * ((l2 - r2) / (r2 - z2)).abs().sqrt()
        / (r2 - z2)
}

/// Load priority of a slot: where `required_range` sits relative to the slot's
/// range, normalized by the range width.
///
/// Pixel-size mode flips the sign so more detailed requests win.
pub fn slot_priority(range: Range, required_range: f32, mode: RangeMode) -> f32 {
    let priority = (range.min - required_range) / (range.max - range.min);
    match mode {
        RangeMode::DistanceFromEyePoint => priority,
        RangeMode::PixelSizeOnScreen => -priority,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn camera_at_distance(distance: f32) -> Mat4 {
        Mat4::from_translation(Vec3::new(0.0, 0.0, -distance))
    }

    fn projection() -> Mat4 {
        Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 800.0 / 600.0, 0.1, 10_000.0)
    }

    #[test]
    fn test_range_is_half_open() {
        let range = Range::new(0.0, 100.0);
        assert!(range.contains(0.0));
        assert!(range.contains(99.9));
        assert!(!range.contains(100.0));
        assert!(Range::new(100.0, f32::INFINITY).contains(1.0e30));
    }

    #[test]
    fn test_eye_point_inverts_model_view() {
        let eye = eye_point(&camera_at_distance(42.0));
        assert!((eye - Vec3::new(0.0, 0.0, 42.0)).length() < 1e-4);
    }

    #[test]
    fn test_distance_required_range_applies_scale() {
        assert_eq!(distance_required_range(50.0, 2.0), 100.0);
    }

    /// Closer spheres cover more pixels.
    #[test]
    fn test_pixel_size_shrinks_with_distance() {
        let viewport = Viewport::new(0.0, 0.0, 800.0, 600.0);
        let near = compute_pixel_size_vector(&viewport, &projection(), &camera_at_distance(10.0));
        let far = compute_pixel_size_vector(&viewport, &projection(), &camera_at_distance(100.0));
        let near_size = clamped_pixel_size(Vec3::ZERO, 1.0, near);
        let far_size = clamped_pixel_size(Vec3::ZERO, 1.0, far);
        assert!(near_size.is_finite() && far_size.is_finite());
        assert!(near_size > far_size);
        assert!((near_size / far_size - 10.0).abs() < 1e-2);
    }

    #[test]
    fn test_pixel_required_range_squares_and_scales() {
        assert_eq!(pixel_required_range(10.0, 1.0, 0.0), 100.0);
        assert_eq!(pixel_required_range(10.0, 2.0, 0.0), 25.0);
    }

    #[test]
    fn test_pixel_required_range_falls_back_on_nan() {
        assert_eq!(pixel_required_range(f32::NAN, 1.0, 7.0), 7.0);
    }

    #[test]
    fn test_slot_priority_sign_per_mode() {
        let range = Range::new(100.0, 1000.0);
        let distance = slot_priority(range, 150.0, RangeMode::DistanceFromEyePoint);
        let pixels = slot_priority(range, 150.0, RangeMode::PixelSizeOnScreen);
        assert!((distance - (-50.0 / 900.0)).abs() < 1e-6);
        assert_eq!(pixels, -distance);
    }

    #[test]
    fn test_slot_priority_with_unbounded_range() {
        let priority = slot_priority(Range::new(100.0, f32::INFINITY), 150.0, RangeMode::DistanceFromEyePoint);
        assert_eq!(priority, 0.0);
    }

    #[test]
    fn test_projected_area_grows_when_closer() {
        let near = projected_sphere_area(Vec3::ZERO, 1.0, &camera_at_distance(5.0), 1.0).abs();
        let far = projected_sphere_area(Vec3::ZERO, 1.0, &camera_at_distance(50.0), 1.0).abs();
        assert!(near > far);
    }
}
