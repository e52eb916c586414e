//! Range-based level-of-detail node.

use std::any::Any;

use canopy_scene::{BoundingSphere, Node, NodeId, NodeVisitor, SceneNode, TraversalMode, accept, union_bound};
use glam::Vec3;

use crate::metric::{self, Range, RangeMode};

/// How the node's bounding sphere (and thus its LOD center) is obtained.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CenterMode {
    /// Bound of the children.
    #[default]
    UseBoundingSphereCenter,
    /// User center and radius.
    UserDefinedCenter,
    /// User sphere expanded by the bound of the children.
    UnionOfBoundingSphereAndUserDefined,
}

/// Node selecting, among a fixed set of children, those whose range covers
/// the current detail metric.
///
/// Children and ranges are parallel arrays indexed by child slot.
#[derive(Debug)]
pub struct LodNode {
    pub(crate) id: NodeId,
    pub(crate) children: Vec<Node>,
    pub(crate) ranges: Vec<Range>,
    pub(crate) range_mode: RangeMode,
    pub(crate) center_mode: CenterMode,
    pub(crate) user_defined_center: Option<Vec3>,
    pub(crate) radius: f32,
    pub(crate) user_defined_radius: f32,
    pub(crate) active_children: Vec<usize>,
}

impl Default for LodNode {
    fn default() -> Self {
        Self::new()
    }
}

impl LodNode {
    pub fn new() -> Self {
        Self {
            id: NodeId::next(),
            children: Vec::new(),
            ranges: Vec::new(),
            range_mode: RangeMode::DistanceFromEyePoint,
            center_mode: CenterMode::UseBoundingSphereCenter,
            user_defined_center: None,
            radius: -1.0,
            user_defined_radius: -1.0,
            active_children: Vec::new(),
        }
    }

    /// Append `node` and give its slot the range `[min, max)`.
    pub fn add_child(&mut self, node: Node, min: f32, max: f32) {
        self.children.push(node);
        let slot = self.children.len() - 1;
        self.set_range(slot, min, max);
    }

    /// Append `node` without a meaningful range: a new slot receives the
    /// empty range `[last_max, last_max)`, an already declared slot keeps its range.
    pub fn add_child_node(&mut self, node: Node) {
        self.children.push(node);
        if self.children.len() > self.ranges.len() {
            let max = self.ranges.last().map_or(0.0, |range| range.max);
            self.ranges.push(Range::new(max, max));
        }
    }

    /// Set the range of `slot`, growing the range array when needed.
    ///
    /// Slots created by growth before `slot` receive an empty range at `min`.
    pub fn set_range(&mut self, slot: usize, min: f32, max: f32) {
        while self.ranges.len() <= slot {
            self.ranges.push(Range::new(min, min));
        }
        self.ranges[slot] = Range::new(min, max);
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn num_ranges(&self) -> usize {
        self.ranges.len()
    }

    pub fn num_children(&self) -> usize {
        self.children.len()
    }

    /// Detach and return the child in `slot`; its range stays declared.
    pub fn remove_child(&mut self, slot: usize) -> Option<Node> {
        if slot >= self.children.len() {
            return None;
        }
        self.active_children.retain(|&index| index != slot);
        Some(self.children.remove(slot))
    }

    pub fn range_mode(&self) -> RangeMode {
        self.range_mode
    }

    pub fn set_range_mode(&mut self, mode: RangeMode) {
        self.range_mode = mode;
    }

    pub fn center_mode(&self) -> CenterMode {
        self.center_mode
    }

    pub fn set_center_mode(&mut self, mode: CenterMode) {
        self.center_mode = mode;
    }

    /// Set the user center; switches to user-defined mode unless in union mode.
    pub fn set_center(&mut self, center: Vec3) {
        if self.center_mode != CenterMode::UnionOfBoundingSphereAndUserDefined {
            self.center_mode = CenterMode::UserDefinedCenter;
        }
        self.user_defined_center = Some(center);
    }

    /// Center used for level-of-detail decisions.
    pub fn center(&self) -> Vec3 {
        match (self.center_mode, self.user_defined_center) {
            (CenterMode::UseBoundingSphereCenter, _) | (_, None) => self.compute_bounding_sphere().center,
            (_, Some(center)) => center,
        }
    }

    /// Object-space radius of the volume, used when there are no children.
    pub fn radius(&self) -> f32 {
        self.radius
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.radius = radius;
    }

    /// Radius override for the computed bound and the pixel-size metric; -1 disables it.
    pub fn set_user_defined_radius(&mut self, radius: f32) {
        self.user_defined_radius = radius;
    }

    pub fn user_defined_radius(&self) -> f32 {
        self.user_defined_radius
    }

    /// Slots visited by the last active-children traversal.
    pub fn active_children(&self) -> &[usize] {
        &self.active_children
    }

    pub fn child(&self, slot: usize) -> Option<&Node> {
        self.children.get(slot)
    }

    pub fn compute_bounding_sphere(&self) -> BoundingSphere {
        let user_center = self.user_defined_center.unwrap_or(Vec3::ZERO);
        match self.center_mode {
            CenterMode::UserDefinedCenter if self.radius >= 0.0 => {
                BoundingSphere::new(user_center, self.radius)
            }
            CenterMode::UnionOfBoundingSphereAndUserDefined if self.radius >= 0.0 => {
                let mut bound = BoundingSphere::new(user_center, self.radius);
                bound.expand_by_sphere(&union_bound(&self.children));
                bound
            }
            _ => {
                let mut bound = union_bound(&self.children);
                if self.user_defined_radius >= 0.0 {
                    bound.radius = self.user_defined_radius;
                }
                bound
            }
        }
    }

    /// Pixel size of `bound`, using the user-defined radius when set.
    pub fn pixel_size(&self, bound: &BoundingSphere, visitor: &dyn NodeVisitor) -> f32 {
        let radius = if self.user_defined_radius == -1.0 {
            bound.radius
        } else {
            self.user_defined_radius
        };
        let pixel_size_vector = metric::compute_pixel_size_vector(
            &visitor.viewport(),
            &visitor.projection_matrix(),
            &visitor.model_view_matrix(),
        );
        metric::pixel_size(bound.center, radius, pixel_size_vector)
    }

    pub fn clamped_pixel_size(&self, bound: &BoundingSphere, visitor: &dyn NodeVisitor) -> f32 {
        self.pixel_size(bound, visitor).abs()
    }

    /// Lower bound of the last declared range, the fallback for degenerate metrics.
    pub(crate) fn last_range_min(&self) -> f32 {
        self.ranges.last().map_or(0.0, |range| range.min)
    }

    /// Detail metric for the current view.
    pub fn required_range(&self, visitor: &dyn NodeVisitor) -> f32 {
        let bound = self.compute_bounding_sphere();
        match self.range_mode {
            RangeMode::DistanceFromEyePoint => {
                let eye = metric::eye_point(&visitor.model_view_matrix());
                metric::distance_required_range(bound.center.distance(eye), visitor.lod_scale())
            }
            RangeMode::PixelSizeOnScreen => metric::pixel_required_range(
                self.clamped_pixel_size(&bound, visitor),
                visitor.lod_scale(),
                self.last_range_min(),
            ),
        }
    }

    pub fn traverse(&mut self, visitor: &mut dyn NodeVisitor) {
        match visitor.traversal_mode() {
            TraversalMode::TraverseAllChildren => {
                for child in &mut self.children {
                    accept(child.as_mut(), visitor);
                }
            }
            TraversalMode::TraverseActiveChildren => {
                let required_range = self.required_range(visitor);
                let count = self.children.len().min(self.ranges.len());

                self.active_children.clear();
                for slot in 0..count {
                    if self.ranges[slot].contains(required_range) {
                        accept(self.children[slot].as_mut(), visitor);
                        self.active_children.push(slot);
                    }
                }
            }
            TraversalMode::TraverseNone => {}
        }
    }
}

impl SceneNode for LodNode {
    fn id(&self) -> NodeId {
        self.id
    }

    fn compute_bound(&self) -> BoundingSphere {
        self.compute_bounding_sphere()
    }

    fn traverse(&mut self, visitor: &mut dyn NodeVisitor) {
        LodNode::traverse(self, visitor);
    }

    fn children(&self) -> &[Node] {
        &self.children
    }

    fn children_mut(&mut self) -> &mut [Node] {
        &mut self.children
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use canopy_scene::{CullVisitor, Geometry, GeometryCollector, Viewport};
    use glam::Mat4;

    fn unit_leaf(name: &str) -> (Node, NodeId) {
        let geometry = Geometry::new(name, BoundingSphere::new(Vec3::ZERO, 1.0));
        let id = geometry.id();
        (geometry.boxed(), id)
    }

    fn two_level_lod() -> (LodNode, NodeId, NodeId) {
        let mut lod = LodNode::new();
        let (near, near_id) = unit_leaf("near");
        let (far, far_id) = unit_leaf("far");
        lod.add_child(near, 0.0, 100.0);
        lod.add_child(far, 100.0, f32::INFINITY);
        (lod, near_id, far_id)
    }

    fn cull_at_distance(lod: &mut LodNode, distance: f32) -> Vec<NodeId> {
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -distance));
        let mut cull = CullVisitor::new(view, Mat4::IDENTITY, Viewport::default());
        accept(lod, &mut cull);
        cull.draw_list().to_vec()
    }

    #[test]
    fn test_add_child_keeps_ranges_in_sync() {
        let mut lod = LodNode::new();
        for i in 0..5 {
            let (leaf, _) = unit_leaf("leaf");
            lod.add_child(leaf, i as f32 * 10.0, (i + 1) as f32 * 10.0);
            assert_eq!(lod.num_children(), lod.num_ranges());
        }
        assert_eq!(lod.ranges()[3], Range::new(30.0, 40.0));
    }

    #[test]
    fn test_add_child_node_appends_empty_range() {
        let mut lod = LodNode::new();
        let (a, _) = unit_leaf("a");
        let (b, _) = unit_leaf("b");
        lod.add_child(a, 0.0, 50.0);
        lod.add_child_node(b);
        assert_eq!(lod.num_ranges(), 2);
        assert_eq!(lod.ranges()[1], Range::new(50.0, 50.0));
    }

    #[test]
    fn test_near_distance_selects_first_child() {
        let (mut lod, near, _) = two_level_lod();
        assert_eq!(cull_at_distance(&mut lod, 50.0), vec![near]);
        assert_eq!(lod.active_children(), &[0]);
    }

    #[test]
    fn test_far_distance_selects_second_child() {
        let (mut lod, _, far) = two_level_lod();
        assert_eq!(cull_at_distance(&mut lod, 150.0), vec![far]);
        assert_eq!(lod.active_children(), &[1]);
    }

    /// Ranges are lower-inclusive, so the boundary belongs to the farther child.
    #[test]
    fn test_boundary_distance_selects_second_child() {
        let (mut lod, _, far) = two_level_lod();
        assert_eq!(cull_at_distance(&mut lod, 100.0), vec![far]);
    }

    #[test]
    fn test_overlapping_ranges_activate_all_matches_once() {
        let mut lod = LodNode::new();
        let (a, a_id) = unit_leaf("a");
        let (b, b_id) = unit_leaf("b");
        let (c, _) = unit_leaf("c");
        lod.add_child(a, 0.0, 200.0);
        lod.add_child(b, 50.0, 150.0);
        lod.add_child(c, 150.0, 300.0);
        assert_eq!(cull_at_distance(&mut lod, 75.0), vec![a_id, b_id]);
        assert_eq!(lod.active_children(), &[0, 1]);
    }

    #[test]
    fn test_active_set_matches_range_predicate() {
        let (mut lod, _, _) = two_level_lod();
        for distance in [0.0_f32, 12.5, 99.0, 100.0, 101.0, 5_000.0] {
            cull_at_distance(&mut lod, distance);
            let expected: Vec<usize> = lod
                .ranges()
                .iter()
                .enumerate()
                .filter(|(_, range)| range.min <= distance && distance < range.max)
                .map(|(slot, _)| slot)
                .collect();
            assert_eq!(lod.active_children(), expected.as_slice(), "distance {distance}");
        }
    }

    #[test]
    fn test_lod_scale_multiplies_distance() {
        let (mut lod, near, far) = two_level_lod();
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -60.0));
        let mut cull = CullVisitor::new(view, Mat4::IDENTITY, Viewport::default()).with_lod_scale(2.0);
        accept(&mut lod, &mut cull);
        assert_eq!(cull.draw_list(), &[far]);
        assert_ne!(cull.draw_list(), &[near]);
    }

    #[test]
    fn test_all_children_mode_ignores_ranges() {
        let (mut lod, near, far) = two_level_lod();
        let mut collector = GeometryCollector::default();
        accept(&mut lod, &mut collector);
        assert_eq!(collector.ids(), vec![near, far]);
    }

    #[test]
    fn test_pixel_size_mode_prefers_detail_when_close() {
        let mut lod = LodNode::new();
        lod.set_range_mode(RangeMode::PixelSizeOnScreen);
        let (coarse, coarse_id) = unit_leaf("coarse");
        let (fine, fine_id) = unit_leaf("fine");
        lod.add_child(coarse, 0.0, 1_000.0);
        lod.add_child(fine, 1_000.0, f32::MAX);

        let projection = Mat4::perspective_rh(std::f32::consts::FRAC_PI_3, 4.0 / 3.0, 0.1, 10_000.0);
        let viewport = Viewport::new(0.0, 0.0, 800.0, 600.0);

        let mut near = CullVisitor::new(Mat4::from_translation(Vec3::new(0.0, 0.0, -2.0)), projection, viewport);
        accept(&mut lod, &mut near);
        assert_eq!(near.draw_list(), &[fine_id]);

        let mut far = CullVisitor::new(Mat4::from_translation(Vec3::new(0.0, 0.0, -500.0)), projection, viewport);
        accept(&mut lod, &mut far);
        assert_eq!(far.draw_list(), &[coarse_id]);
    }

    #[test]
    fn test_user_defined_center_and_radius() {
        let mut lod = LodNode::new();
        let (leaf, _) = unit_leaf("leaf");
        lod.add_child(leaf, 0.0, 10.0);
        lod.set_center(Vec3::new(5.0, 0.0, 0.0));
        lod.set_radius(2.0);
        assert_eq!(lod.center_mode(), CenterMode::UserDefinedCenter);
        assert_eq!(lod.center(), Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(lod.compute_bounding_sphere(), BoundingSphere::new(Vec3::new(5.0, 0.0, 0.0), 2.0));
    }

    #[test]
    fn test_union_center_mode_expands_user_sphere() {
        let mut lod = LodNode::new();
        let (leaf, _) = unit_leaf("leaf");
        lod.add_child(leaf, 0.0, 10.0);
        lod.set_center_mode(CenterMode::UnionOfBoundingSphereAndUserDefined);
        lod.set_center(Vec3::new(10.0, 0.0, 0.0));
        lod.set_radius(1.0);
        assert_eq!(lod.center_mode(), CenterMode::UnionOfBoundingSphereAndUserDefined);
        let bound = lod.compute_bounding_sphere();
        assert!((bound.radius - 6.0).abs() < 1e-5);
        assert!((bound.center - Vec3::new(5.0, 0.0, 0.0)).length() < 1e-5);
        assert_eq!(lod.center(), Vec3::new(10.0, 0.0, 0.0));
    }

    #[test]
    fn test_user_radius_overrides_only_radius() {
        let mut lod = LodNode::new();
        let geometry = Geometry::new("leaf", BoundingSphere::new(Vec3::new(3.0, 0.0, 0.0), 1.0));
        lod.add_child(geometry.boxed(), 0.0, 10.0);
        lod.set_user_defined_radius(8.0);
        let bound = lod.compute_bounding_sphere();
        assert_eq!(bound.center, Vec3::new(3.0, 0.0, 0.0));
        assert_eq!(bound.radius, 8.0);
    }

    #[test]
    fn test_user_center_without_radius_uses_children_bound() {
        let mut lod = LodNode::new();
        let (leaf, _) = unit_leaf("leaf");
        lod.add_child(leaf, 0.0, 10.0);
        lod.set_center(Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(lod.compute_bounding_sphere(), BoundingSphere::new(Vec3::ZERO, 1.0));
    }

    #[test]
    fn test_remove_child_keeps_range() {
        let (mut lod, _, _) = two_level_lod();
        assert!(lod.remove_child(1).is_some());
        assert_eq!(lod.num_children(), 1);
        assert_eq!(lod.num_ranges(), 2);
        assert!(lod.remove_child(5).is_none());
    }
}
