//! Scene node capabilities and the basic node kinds (group, transform, geometry).

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use glam::Mat4;

use crate::bound::BoundingSphere;
use crate::visitor::NodeVisitor;

static NEXT_NODE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a scene node.
///
/// Load requests refer to their target group by id so that the pager never
/// holds a reference into the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        Self(NEXT_NODE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Capabilities shared by every node in the tree.
///
/// Nodes are owned by their parent; subtrees produced by loader threads are
/// moved back onto the traversal thread, hence the `Send` bound.
pub trait SceneNode: Any + Send + fmt::Debug {
    /// Identity of this node.
    fn id(&self) -> NodeId;

    /// Bound of this node and its subtree.
    fn compute_bound(&self) -> BoundingSphere;

    /// Visit the children selected by the visitor's traversal mode.
    fn traverse(&mut self, visitor: &mut dyn NodeVisitor);

    /// Currently attached children.
    fn children(&self) -> &[Node] {
        &[]
    }

    /// Mutable access to the attached children.
    fn children_mut(&mut self) -> &mut [Node] {
        &mut []
    }

    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Owned handle to a node of any kind.
pub type Node = Box<dyn SceneNode>;

/// Enter `node`: record it on the visitor's node path, traverse it, then leave.
pub fn accept(node: &mut dyn SceneNode, visitor: &mut dyn NodeVisitor) {
    visitor.push_node(node.id());
    node.traverse(visitor);
    visitor.pop_node();
}

/// Union of the bounds of `children`.
pub fn union_bound(children: &[Node]) -> BoundingSphere {
    let mut bound = BoundingSphere::invalid();
    for child in children {
        bound.expand_by_sphere(&child.compute_bound());
    }
    bound
}

/// A node that simply holds children.
#[derive(Debug)]
pub struct Group {
    id: NodeId,
    children: Vec<Node>,
}

impl Default for Group {
    fn default() -> Self {
        Self::new()
    }
}

impl Group {
    /// Create an empty group.
    pub fn new() -> Self {
        Self {
            id: NodeId::next(),
            children: Vec::new(),
        }
    }

    /// Append a child.
    pub fn add_child(&mut self, node: Node) {
        self.children.push(node);
    }

    /// Detach and return the child at `index`.
    pub fn remove_child(&mut self, index: usize) -> Option<Node> {
        if index < self.children.len() {
            Some(self.children.remove(index))
        } else {
            None
        }
    }
}

impl SceneNode for Group {
    fn id(&self) -> NodeId {
        self.id
    }

    fn compute_bound(&self) -> BoundingSphere {
        union_bound(&self.children)
    }

    fn traverse(&mut self, visitor: &mut dyn NodeVisitor) {
        if visitor.traversal_mode().visits_children() {
            for child in &mut self.children {
                accept(child.as_mut(), visitor);
            }
        }
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

/// A group that places its children with a local matrix.
#[derive(Debug)]
pub struct MatrixTransform {
    id: NodeId,
    matrix: Mat4,
    children: Vec<Node>,
}

impl MatrixTransform {
    /// Create a transform with no children.
    pub fn new(matrix: Mat4) -> Self {
        Self {
            id: NodeId::next(),
            matrix,
            children: Vec::new(),
        }
    }

    pub fn matrix(&self) -> Mat4 {
        self.matrix
    }

    pub fn set_matrix(&mut self, matrix: Mat4) {
        self.matrix = matrix;
    }

    pub fn add_child(&mut self, node: Node) {
        self.children.push(node);
    }
}

impl SceneNode for MatrixTransform {
    fn id(&self) -> NodeId {
        self.id
    }

    fn compute_bound(&self) -> BoundingSphere {
        union_bound(&self.children).transformed(&self.matrix)
    }

    fn traverse(&mut self, visitor: &mut dyn NodeVisitor) {
        if !visitor.traversal_mode().visits_children() {
            return;
        }
        visitor.push_model_matrix(self.matrix);
        for child in &mut self.children {
            accept(child.as_mut(), visitor);
        }
        visitor.pop_model_matrix();
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

/// A drawable leaf. Vertex data lives with the graphics collaborator; the scene
/// only keeps what culling and level-of-detail selection need.
#[derive(Debug, Clone)]
pub struct Geometry {
    id: NodeId,
    name: String,
    bound: BoundingSphere,
}

impl Geometry {
    /// Create a geometry leaf with a precomputed bound.
    pub fn new(name: impl Into<String>, bound: BoundingSphere) -> Self {
        Self {
            id: NodeId::next(),
            name: name.into(),
            bound,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Boxed, ready to be attached to a parent.
    pub fn boxed(self) -> Node {
        Box::new(self)
    }
}

impl SceneNode for Geometry {
    fn id(&self) -> NodeId {
        self.id
    }

    fn compute_bound(&self) -> BoundingSphere {
        self.bound
    }

    fn traverse(&mut self, visitor: &mut dyn NodeVisitor) {
        visitor.apply_geometry(self);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
