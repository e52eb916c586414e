//! Scene-graph primitives: bounding spheres, node capabilities, traversal visitors,
//! and the tile-loading contract used by paged level-of-detail nodes.

mod bound;
pub mod database;
mod node;
mod visitor;

pub use bound::BoundingSphere;
pub use database::{
    LoadError, LoadRequest, LoaderFn, RequestHandle, RequestState, TileLoadScheduler, TileRequest,
    TileSource,
};
pub use node::{Geometry, Group, MatrixTransform, Node, NodeId, SceneNode, accept, union_bound};
pub use visitor::{
    CullVisitor, FrameStamp, GeometryCollector, NodeVisitor, TraversalMode, Viewport, VisitorType,
};
