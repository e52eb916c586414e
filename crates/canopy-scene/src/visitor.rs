//! Traversal visitors: the contract nodes consume while being traversed, a cull
//! visitor producing a draw list, and a collector for whole-tree passes.

use glam::Mat4;

use crate::database::TileLoadScheduler;
use crate::node::{Geometry, NodeId, SceneNode};

/// Which children a group-like node should visit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraversalMode {
    /// Visit nothing below the current node.
    TraverseNone,
    /// Visit every child regardless of level-of-detail ranges (serialization, bound updates).
    TraverseAllChildren,
    /// Visit only the children selected for the current view.
    TraverseActiveChildren,
}

impl TraversalMode {
    /// Whether plain groups should descend.
    pub fn visits_children(self) -> bool {
        !matches!(self, TraversalMode::TraverseNone)
    }
}

/// Kind of pass a visitor implements. Paged nodes only refresh their usage
/// time stamps during cull passes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VisitorType {
    NodeVisitor,
    UpdateVisitor,
    CullVisitor,
}

/// Frame number and simulation time of the frame being traversed.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct FrameStamp {
    pub frame_number: u64,
    /// Seconds since the start of the simulation.
    pub simulation_time: f64,
}

impl FrameStamp {
    pub fn new(frame_number: u64, simulation_time: f64) -> Self {
        Self {
            frame_number,
            simulation_time,
        }
    }
}

/// Render target rectangle in pixels.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(0.0, 0.0, 800.0, 600.0)
    }
}

impl Viewport {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }
}

/// What a node may ask of the visitor traversing it.
pub trait NodeVisitor {
    fn traversal_mode(&self) -> TraversalMode;

    fn visitor_type(&self) -> VisitorType {
        VisitorType::NodeVisitor
    }

    /// Model-view matrix at the node currently being visited.
    fn model_view_matrix(&self) -> Mat4 {
        Mat4::IDENTITY
    }

    fn projection_matrix(&self) -> Mat4 {
        Mat4::IDENTITY
    }

    fn viewport(&self) -> Viewport {
        Viewport::default()
    }

    /// Multiplier applied to level-of-detail metrics (higher means coarser).
    fn lod_scale(&self) -> f32 {
        1.0
    }

    fn frame_stamp(&self) -> FrameStamp {
        FrameStamp::default()
    }

    /// Scheduler that paged nodes hand their load requests to, if any.
    fn database_request_handler(&mut self) -> Option<&mut dyn TileLoadScheduler> {
        None
    }

    /// Ids of the nodes entered so far, root first.
    fn node_path(&self) -> &[NodeId];

    fn push_node(&mut self, id: NodeId);

    fn pop_node(&mut self);

    fn push_model_matrix(&mut self, _matrix: Mat4) {}

    fn pop_model_matrix(&mut self) {}

    fn apply_geometry(&mut self, _geometry: &Geometry) {}
}

/// Per-frame cull pass: tracks the model-view stack and records the geometry
/// that should be drawn this frame.
pub struct CullVisitor<'a> {
    view: Mat4,
    projection: Mat4,
    viewport: Viewport,
    lod_scale: f32,
    frame_stamp: FrameStamp,
    model_stack: Vec<Mat4>,
    node_path: Vec<NodeId>,
    scheduler: Option<&'a mut dyn TileLoadScheduler>,
    draw_list: Vec<NodeId>,
}

impl<'a> CullVisitor<'a> {
    /// Create a cull visitor for a camera.
    pub fn new(view: Mat4, projection: Mat4, viewport: Viewport) -> Self {
        Self {
            view,
            projection,
            viewport,
            lod_scale: 1.0,
            frame_stamp: FrameStamp::default(),
            model_stack: Vec::new(),
            node_path: Vec::new(),
            scheduler: None,
            draw_list: Vec::new(),
        }
    }

    pub fn with_lod_scale(mut self, lod_scale: f32) -> Self {
        self.lod_scale = lod_scale;
        self
    }

    pub fn with_frame_stamp(mut self, frame_stamp: FrameStamp) -> Self {
        self.frame_stamp = frame_stamp;
        self
    }

    /// Route load requests of paged nodes to `scheduler`.
    pub fn with_scheduler(mut self, scheduler: &'a mut dyn TileLoadScheduler) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Geometry recorded for drawing, in traversal order.
    pub fn draw_list(&self) -> &[NodeId] {
        &self.draw_list
    }

    pub fn clear_draw_list(&mut self) {
        self.draw_list.clear();
    }
}

impl NodeVisitor for CullVisitor<'_> {
    fn traversal_mode(&self) -> TraversalMode {
        TraversalMode::TraverseActiveChildren
    }

    fn visitor_type(&self) -> VisitorType {
        VisitorType::CullVisitor
    }

    fn model_view_matrix(&self) -> Mat4 {
        match self.model_stack.last() {
            Some(model) => self.view * *model,
            None => self.view,
        }
    }

    fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn lod_scale(&self) -> f32 {
        self.lod_scale
    }

    fn frame_stamp(&self) -> FrameStamp {
        self.frame_stamp
    }

    fn database_request_handler(&mut self) -> Option<&mut dyn TileLoadScheduler> {
        match self.scheduler.as_mut() {
            Some(scheduler) => Some(&mut **scheduler as &mut dyn TileLoadScheduler),
            None => None,
        }
    }

    fn node_path(&self) -> &[NodeId] {
        &self.node_path
    }

    fn push_node(&mut self, id: NodeId) {
        self.node_path.push(id);
    }

    fn pop_node(&mut self) {
        self.node_path.pop();
    }

    fn push_model_matrix(&mut self, matrix: Mat4) {
        let model = match self.model_stack.last() {
            Some(parent) => *parent * matrix,
            None => matrix,
        };
        self.model_stack.push(model);
    }

    fn pop_model_matrix(&mut self) {
        self.model_stack.pop();
    }

    fn apply_geometry(&mut self, geometry: &Geometry) {
        self.draw_list.push(geometry.id());
    }
}

/// Whole-tree pass that ignores level-of-detail selection and collects every
/// resident geometry leaf.
#[derive(Debug, Default)]
pub struct GeometryCollector {
    node_path: Vec<NodeId>,
    collected: Vec<(NodeId, String)>,
}

impl GeometryCollector {
    pub fn ids(&self) -> Vec<NodeId> {
        self.collected.iter().map(|(id, _)| *id).collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.collected.iter().map(|(_, name)| name.clone()).collect()
    }
}

impl NodeVisitor for GeometryCollector {
    fn traversal_mode(&self) -> TraversalMode {
        TraversalMode::TraverseAllChildren
    }

    fn node_path(&self) -> &[NodeId] {
        &self.node_path
    }

    fn push_node(&mut self, id: NodeId) {
        self.node_path.push(id);
    }

    fn pop_node(&mut self) {
        self.node_path.pop();
    }

    fn apply_geometry(&mut self, geometry: &Geometry) {
        self.collected.push((geometry.id(), geometry.name().to_string()));
    }
}
