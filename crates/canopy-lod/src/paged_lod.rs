//! Level-of-detail node whose deeper children are streamed in on demand.
//!
//! Each child slot walks `Unloaded -> Loading -> Loaded`. A cull traversal that
//! needs a slot which is not resident shows the last resident child instead
//! and asks the visitor's [`TileLoadScheduler`] for the next slot. Idle
//! deepest children are evicted by [`PagedLodNode::remove_expired_children`].

use std::any::Any;

use canopy_scene::{
    BoundingSphere, FrameStamp, LoadRequest, LoaderFn, Node, NodeId, NodeVisitor, RequestHandle,
    RequestState, SceneNode, TileRequest, TileSource, TraversalMode, VisitorType, accept,
};
use glam::Vec3;
use tracing::warn;

use crate::lod::{CenterMode, LodNode};
use crate::metric::{self, Range, RangeMode};

/// Highest number of child slots a paged node accepts.
pub const MAX_PAGED_SLOTS: usize = 256;

/// Streaming bookkeeping of one child slot.
#[derive(Clone, Debug, Default)]
pub struct PerRangeData {
    pub(crate) source: Option<TileSource>,
    pub(crate) loaded: bool,
    pub(crate) time_stamp: f64,
    pub(crate) frame_number: u64,
    pub(crate) request: Option<RequestHandle>,
}

impl PerRangeData {
    pub fn source(&self) -> Option<&TileSource> {
        self.source.as_ref()
    }

    /// File name of the slot, if it is file-backed.
    pub fn file_name(&self) -> Option<&str> {
        match &self.source {
            Some(TileSource::File(name)) => Some(name),
            _ => None,
        }
    }

    /// Set once a load was issued; stays set while the child is resident.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Simulation time of the last cull traversal that used the slot.
    pub fn time_stamp(&self) -> f64 {
        self.time_stamp
    }

    pub fn frame_number(&self) -> u64 {
        self.frame_number
    }

    pub fn request(&self) -> Option<&RequestHandle> {
        self.request.as_ref()
    }
}

/// Observable state of a child slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Unloaded,
    Loading,
    Loaded,
}

#[derive(Debug)]
pub struct PagedLodNode {
    lod: LodNode,
    per_range_data: Vec<PerRangeData>,
    database_path: String,
    expiry_time: f64,
    expiry_frame: u64,
    num_children_that_cannot_be_expired: usize,
    frame_number_of_last_traversal: u64,
}

impl Default for PagedLodNode {
    fn default() -> Self {
        Self::new()
    }
}

impl PagedLodNode {
    pub fn new() -> Self {
        let mut lod = LodNode::new();
        lod.set_center_mode(CenterMode::UserDefinedCenter);
        Self {
            lod,
            per_range_data: Vec::new(),
            database_path: String::new(),
            expiry_time: 0.0,
            expiry_frame: 0,
            num_children_that_cannot_be_expired: 0,
            frame_number_of_last_traversal: 0,
        }
    }

    /// Range-selection state shared with [`LodNode`].
    pub fn lod(&self) -> &LodNode {
        &self.lod
    }

    pub fn lod_mut(&mut self) -> &mut LodNode {
        &mut self.lod
    }

    /// Append a resident child for `[min, max)`.
    pub fn add_child(&mut self, node: Node, min: f32, max: f32) {
        self.lod.add_child(node, min, max);
        self.grow_slots(self.lod.num_children());
    }

    /// Declare the range of `slot`; used for slots that are not resident yet.
    pub fn set_range(&mut self, slot: usize, min: f32, max: f32) {
        if Self::slot_in_bounds(slot, "set_range") {
            self.lod.set_range(slot, min, max);
        }
    }

    pub fn set_range_mode(&mut self, mode: RangeMode) {
        self.lod.set_range_mode(mode);
    }

    pub fn set_center(&mut self, center: Vec3) {
        self.lod.set_center(center);
    }

    pub fn set_radius(&mut self, radius: f32) {
        self.lod.set_radius(radius);
    }

    /// Load `slot` from `database_path + file_name` when it is needed.
    pub fn set_file_name(&mut self, slot: usize, file_name: impl Into<String>) {
        if !Self::slot_in_bounds(slot, "set_file_name") {
            return;
        }
        self.grow_slots(slot + 1);
        self.per_range_data[slot].source = Some(TileSource::File(file_name.into()));
    }

    /// Produce `slot` with `loader` when it is needed.
    pub fn set_function(&mut self, slot: usize, loader: LoaderFn) {
        if !Self::slot_in_bounds(slot, "set_function") {
            return;
        }
        self.grow_slots(slot + 1);
        self.per_range_data[slot].source = Some(TileSource::Function(loader));
    }

    pub fn set_database_path(&mut self, path: impl Into<String>) {
        self.database_path = path.into();
    }

    pub fn database_path(&self) -> &str {
        &self.database_path
    }

    /// Seconds a slot must stay untouched before it may expire.
    pub fn set_expiry_time(&mut self, seconds: f64) {
        self.expiry_time = seconds;
    }

    /// Frames a slot must stay untouched before it may expire.
    pub fn set_expiry_frame(&mut self, frames: u64) {
        self.expiry_frame = frames;
    }

    pub fn set_num_children_that_cannot_be_expired(&mut self, count: usize) {
        self.num_children_that_cannot_be_expired = count;
    }

    pub fn num_children_that_cannot_be_expired(&self) -> usize {
        self.num_children_that_cannot_be_expired
    }

    pub fn frame_number_of_last_traversal(&self) -> u64 {
        self.frame_number_of_last_traversal
    }

    pub fn set_frame_number_of_last_traversal(&mut self, frame_number: u64) {
        self.frame_number_of_last_traversal = frame_number;
    }

    pub fn set_time_stamp(&mut self, slot: usize, time_stamp: f64) {
        if let Some(data) = self.per_range_data.get_mut(slot) {
            data.time_stamp = time_stamp;
        }
    }

    pub fn set_frame_number(&mut self, slot: usize, frame_number: u64) {
        if let Some(data) = self.per_range_data.get_mut(slot) {
            data.frame_number = frame_number;
        }
    }

    pub fn per_range_data(&self, slot: usize) -> Option<&PerRangeData> {
        self.per_range_data.get(slot)
    }

    /// In-flight request of `slot`.
    pub fn request(&self, slot: usize) -> Option<&RequestHandle> {
        self.per_range_data.get(slot).and_then(|data| data.request.as_ref())
    }

    pub fn slot_state(&self, slot: usize) -> SlotState {
        if slot < self.lod.num_children() {
            SlotState::Loaded
        } else if self.per_range_data.get(slot).is_some_and(|data| data.loaded) {
            SlotState::Loading
        } else {
            SlotState::Unloaded
        }
    }

    /// Pixel size of `bound`. Unlike [`LodNode::pixel_size`] the user-defined
    /// radius is not applied.
    pub fn pixel_size(&self, bound: &BoundingSphere, visitor: &dyn NodeVisitor) -> f32 {
        let pixel_size_vector = metric::compute_pixel_size_vector(
            &visitor.viewport(),
            &visitor.projection_matrix(),
            &visitor.model_view_matrix(),
        );
        metric::pixel_size(bound.center, bound.radius, pixel_size_vector)
    }

    pub fn clamped_pixel_size(&self, bound: &BoundingSphere, visitor: &dyn NodeVisitor) -> f32 {
        self.pixel_size(bound, visitor).abs()
    }

    pub fn traverse(&mut self, visitor: &mut dyn NodeVisitor) {
        let frame_stamp = visitor.frame_stamp();
        let update_time_stamp = visitor.visitor_type() == VisitorType::CullVisitor;
        if update_time_stamp {
            self.frame_number_of_last_traversal = frame_stamp.frame_number;
        }

        match visitor.traversal_mode() {
            TraversalMode::TraverseAllChildren => {
                for child in &mut self.lod.children {
                    accept(child.as_mut(), visitor);
                }
            }
            TraversalMode::TraverseActiveChildren => {
                self.traverse_active(visitor, frame_stamp, update_time_stamp);
            }
            TraversalMode::TraverseNone => {}
        }
    }

    fn traverse_active(&mut self, visitor: &mut dyn NodeVisitor, frame_stamp: FrameStamp, update_time_stamp: bool) {
        let bound = self.lod.compute_bounding_sphere();
        let eye = metric::eye_point(&visitor.model_view_matrix());
        let distance = bound.center.distance(eye);
        let required_range = match self.lod.range_mode {
            RangeMode::DistanceFromEyePoint => metric::distance_required_range(distance, visitor.lod_scale()),
            RangeMode::PixelSizeOnScreen => metric::pixel_required_range(
                self.clamped_pixel_size(&bound, visitor),
                visitor.lod_scale(),
                self.lod.last_range_min(),
            ),
        };

        self.lod.active_children.clear();
        let mut need_to_load_child = false;
        let mut last_child_traversed = None;
        for slot in 0..self.lod.ranges.len() {
            if !self.lod.ranges[slot].contains(required_range) {
                continue;
            }
            if slot < self.lod.children.len() {
                if update_time_stamp {
                    self.touch(slot, frame_stamp);
                }
                accept(self.lod.children[slot].as_mut(), visitor);
                self.lod.active_children.push(slot);
                last_child_traversed = Some(slot);
            } else {
                need_to_load_child = true;
            }
        }

        if !need_to_load_child {
            return;
        }

        let num_children = self.lod.children.len();
        if num_children > 0 && last_child_traversed != Some(num_children - 1) {
            // show the deepest resident level while the next one streams in
            let fallback = num_children - 1;
            if update_time_stamp {
                self.touch(fallback, frame_stamp);
            }
            accept(self.lod.children[fallback].as_mut(), visitor);
            self.lod.active_children.push(fallback);
        }

        self.request_slot(num_children, required_range, distance, visitor, frame_stamp);
    }

    /// Issue or refresh the load of `slot`, the first non-resident one.
    fn request_slot(
        &mut self,
        slot: usize,
        required_range: f32,
        distance: f32,
        visitor: &mut dyn NodeVisitor,
        frame_stamp: FrameStamp,
    ) {
        if slot >= self.per_range_data.len() || slot >= self.lod.ranges.len() {
            return;
        }

        let state = RequestState {
            priority: metric::slot_priority(self.lod.ranges[slot], required_range, self.lod.range_mode),
            time_stamp: frame_stamp.simulation_time,
            depth: visitor.node_path().len(),
            required_range,
            distance,
        };
        let group = self.lod.id;
        let data = &mut self.per_range_data[slot];

        if !data.loaded {
            let Some(source) = data.source.clone() else {
                return;
            };
            let path = match &source {
                TileSource::File(name) => format!("{}{}", self.database_path, name),
                TileSource::Function(_) => self.database_path.clone(),
            };
            data.loaded = true;
            data.request = visitor.database_request_handler().and_then(|scheduler| {
                scheduler.request_load(TileRequest {
                    source,
                    path,
                    group,
                    slot,
                    state,
                })
            });
        } else if let Some(request) = &data.request {
            request.refresh(state);
        } else {
            // the scheduler rejected the request or the load failed
            data.loaded = false;
        }
    }

    fn touch(&mut self, slot: usize, frame_stamp: FrameStamp) {
        if let Some(data) = self.per_range_data.get_mut(slot) {
            data.time_stamp = frame_stamp.simulation_time;
            data.frame_number = frame_stamp.frame_number;
        }
    }

    fn slot_in_bounds(slot: usize, operation: &str) -> bool {
        if slot < MAX_PAGED_SLOTS {
            return true;
        }
        warn!(slot, max = MAX_PAGED_SLOTS, "{operation}: slot out of range, ignored");
        false
    }

    fn grow_slots(&mut self, len: usize) {
        if self.per_range_data.len() < len {
            self.per_range_data.resize_with(len, PerRangeData::default);
        }
    }

    /// Attach the subtree produced for `request`.
    ///
    /// Returns `false`, dropping nothing but the caller's `node`, when the
    /// request was orphaned by an eviction, superseded, or no longer targets
    /// the next free slot.
    pub fn attach_loaded(&mut self, request: &LoadRequest, node: Node) -> bool {
        if request.is_expired() {
            return false;
        }
        let slot = request.slot();
        if slot != self.lod.children.len() {
            return false;
        }
        let Some(data) = self.per_range_data.get_mut(slot) else {
            return false;
        };
        if !data.request.as_ref().is_some_and(|current| current.id() == request.id()) {
            return false;
        }

        data.request = None;
        data.time_stamp = request.time_stamp();
        data.frame_number = self.frame_number_of_last_traversal;
        self.lod.add_child_node(node);
        true
    }

    /// Forget the failed `request` so the slot is retried by a later traversal.
    pub fn load_failed(&mut self, request: &LoadRequest) -> bool {
        match self.per_range_data.get_mut(request.slot()) {
            Some(data) if data.request.as_ref().is_some_and(|current| current.id() == request.id()) => {
                data.request = None;
                true
            }
            _ => false,
        }
    }

    /// Evict the deepest child when it has been idle for longer than both
    /// thresholds, pushing it to `removed`.
    ///
    /// `expiry_time` and `expiry_frame` are the cut-offs: the slot's last use
    /// plus this node's own expiry delays must fall strictly before them.
    pub fn remove_expired_children(&mut self, expiry_time: f64, expiry_frame: u64, removed: &mut Vec<Node>) {
        let num_children = self.lod.children.len();
        if num_children == 0 || num_children <= self.num_children_that_cannot_be_expired {
            return;
        }

        let slot = num_children - 1;
        let Some(data) = self.per_range_data.get(slot) else {
            return;
        };
        let timed = data.time_stamp + self.expiry_time;
        let framed = data.frame_number.saturating_add(self.expiry_frame);
        if !(timed < expiry_time && framed < expiry_frame && data.source.is_some()) {
            return;
        }

        if let Some(child) = self.lod.remove_child(slot) {
            removed.push(child);
        }
        // deeper requests can no longer be attached either
        for data in &mut self.per_range_data[slot..] {
            data.loaded = false;
            if let Some(request) = data.request.take() {
                request.mark_expired();
            }
        }
    }

    /// Orphan every request this node still has in flight.
    pub fn mark_requests_expired(&self) {
        for request in self.per_range_data.iter().filter_map(|data| data.request.as_ref()) {
            request.mark_expired();
        }
    }

    pub fn ranges(&self) -> &[Range] {
        self.lod.ranges()
    }

    pub fn num_children(&self) -> usize {
        self.lod.num_children()
    }
}

impl SceneNode for PagedLodNode {
    fn id(&self) -> NodeId {
        self.lod.id
    }

    fn compute_bound(&self) -> BoundingSphere {
        self.lod.compute_bounding_sphere()
    }

    fn traverse(&mut self, visitor: &mut dyn NodeVisitor) {
        PagedLodNode::traverse(self, visitor);
    }

    fn children(&self) -> &[Node] {
        &self.lod.children
    }

    fn children_mut(&mut self) -> &mut [Node] {
        &mut self.lod.children
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
