use std::fmt;
use std::sync::Arc;

use bitflags::bitflags;
use tracing::warn;

use crate::geometry::{Geometry, Matrix4, Rect};
use crate::id::NodeId;
use crate::material::Material;
use crate::render_node::RenderNode;
use crate::software::Paintable;

mod updater;

pub use updater::update_states;

/// Combined opacity below which an opacity node hides its subtree.
pub const OPACITY_BLOCK_THRESHOLD: f32 = 0.001;
/// Inherited opacity above which a geometry node draws with its opaque material.
pub const OPAQUE_MATERIAL_THRESHOLD: f32 = 0.999;

bitflags! {
    /// What changed on a node since the renderer last saw it.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFlags: u32 {
        const GEOMETRY = 0x001;
        const MATERIAL = 0x002;
        const MATRIX = 0x004;
        const NODE_ADDED = 0x008;
        const NODE_REMOVED = 0x010;
        const OPACITY = 0x020;
        const CLIP_LIST = 0x040;
        const CHILDREN_DO_NOT_OVERLAP = 0x080;
        const SUBTREE_BLOCKED = 0x100;
        const FORCE_UPDATE = 0x200;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NodeFlags: u32 {
        /// The owner guarantees sibling subtrees never overlap on screen, which
        /// allows the renderer to interleave their draws for batching.
        const CHILDREN_DO_NOT_OVERLAP = 0x01;
    }
}

/// Drawable leaf: geometry plus the material that shades it.
#[derive(Debug, Clone)]
pub struct GeometryNode {
    geometry: Arc<Geometry>,
    material: Option<Arc<dyn Material>>,
    opaque_material: Option<Arc<dyn Material>>,
    paintable: Option<Paintable>,
    pub(crate) inherited_opacity: f32,
    pub(crate) matrix: Option<NodeId>,
    pub(crate) clip_list: Option<NodeId>,
    pub(crate) render_order: i32,
}

impl GeometryNode {
    pub fn new(geometry: Geometry, material: Arc<dyn Material>) -> Self {
        Self {
            geometry: Arc::new(geometry),
            material: Some(material),
            opaque_material: None,
            paintable: None,
            inherited_opacity: 1.0,
            matrix: None,
            clip_list: None,
            render_order: 0,
        }
    }

    /// A node drawn only by the software renderer.
    pub fn from_paintable(paintable: Paintable) -> Self {
        Self {
            geometry: Arc::new(Geometry::default()),
            material: None,
            opaque_material: None,
            paintable: Some(paintable),
            inherited_opacity: 1.0,
            matrix: None,
            clip_list: None,
            render_order: 0,
        }
    }

    /// Material used instead of the regular one while the node is fully opaque.
    pub fn with_opaque_material(mut self, material: Arc<dyn Material>) -> Self {
        self.opaque_material = Some(material);
        self
    }

    pub fn with_paintable(mut self, paintable: Paintable) -> Self {
        self.paintable = Some(paintable);
        self
    }

    pub fn geometry(&self) -> &Arc<Geometry> {
        &self.geometry
    }

    pub fn material(&self) -> Option<&Arc<dyn Material>> {
        self.material.as_ref()
    }

    pub fn opaque_material(&self) -> Option<&Arc<dyn Material>> {
        self.opaque_material.as_ref()
    }

    /// The opaque material when one is set and the inherited opacity is above
    /// [`OPAQUE_MATERIAL_THRESHOLD`], otherwise the regular material.
    pub fn active_material(&self) -> Option<&Arc<dyn Material>> {
        match &self.opaque_material {
            Some(opaque) if self.inherited_opacity > OPAQUE_MATERIAL_THRESHOLD => Some(opaque),
            _ => self.material.as_ref(),
        }
    }

    pub fn paintable(&self) -> Option<&Paintable> {
        self.paintable.as_ref()
    }

    pub fn inherited_opacity(&self) -> f32 {
        self.inherited_opacity
    }

    /// Nearest ancestor transform node, `None` for identity.
    pub fn matrix(&self) -> Option<NodeId> {
        self.matrix
    }

    /// Nearest ancestor clip node.
    pub fn clip_list(&self) -> Option<NodeId> {
        self.clip_list
    }

    /// Order assigned by the last list rebuild.
    pub fn render_order(&self) -> i32 {
        self.render_order
    }
}

/// Externally drawn content together with the accumulated state it is drawn with.
#[derive(Debug)]
pub struct RenderNodeEntry {
    pub(crate) node: Box<dyn RenderNode>,
    pub(crate) inherited_opacity: f32,
    pub(crate) matrix: Option<NodeId>,
    pub(crate) clip_list: Option<NodeId>,
    pub(crate) render_order: i32,
}

impl RenderNodeEntry {
    pub fn new(node: Box<dyn RenderNode>) -> Self {
        Self {
            node,
            inherited_opacity: 1.0,
            matrix: None,
            clip_list: None,
            render_order: 0,
        }
    }

    pub fn render_node(&self) -> &dyn RenderNode {
        self.node.as_ref()
    }

    pub fn render_node_mut(&mut self) -> &mut dyn RenderNode {
        self.node.as_mut()
    }

    pub fn inherited_opacity(&self) -> f32 {
        self.inherited_opacity
    }

    pub fn matrix(&self) -> Option<NodeId> {
        self.matrix
    }

    pub fn clip_list(&self) -> Option<NodeId> {
        self.clip_list
    }

    pub fn render_order(&self) -> i32 {
        self.render_order
    }
}

#[derive(Debug, Clone)]
pub struct TransformNode {
    matrix: Matrix4,
    pub(crate) combined_matrix: Matrix4,
    pub(crate) parent_matrix: Option<NodeId>,
}

impl TransformNode {
    pub fn new(matrix: Matrix4) -> Self {
        Self {
            matrix,
            combined_matrix: matrix,
            parent_matrix: None,
        }
    }

    pub fn matrix(&self) -> &Matrix4 {
        &self.matrix
    }

    /// Local matrix followed by every ancestor transform.
    pub fn combined_matrix(&self) -> &Matrix4 {
        &self.combined_matrix
    }

    pub fn parent_matrix(&self) -> Option<NodeId> {
        self.parent_matrix
    }
}

/// Restricts drawing of its subtree to a shape.
///
/// Rectangular clips drawn with an axis-aligned transform become a scissor
/// rect; everything else is rasterized into the stencil buffer.
#[derive(Debug, Clone)]
pub struct ClipNode {
    clip_rect: Rect,
    is_rectangular: bool,
    geometry: Arc<Geometry>,
    pub(crate) matrix: Option<NodeId>,
    pub(crate) clip_list: Option<NodeId>,
}

impl ClipNode {
    pub fn rect(clip_rect: Rect) -> Self {
        Self {
            clip_rect,
            is_rectangular: true,
            geometry: Arc::new(Geometry::rect(clip_rect)),
            matrix: None,
            clip_list: None,
        }
    }

    /// Clips to an arbitrary shape; `clip_rect` is its bounding rect.
    pub fn shape(geometry: Geometry) -> Self {
        let clip_rect = geometry.bounds().unwrap_or_else(Rect::zero);
        Self {
            clip_rect,
            is_rectangular: false,
            geometry: Arc::new(geometry),
            matrix: None,
            clip_list: None,
        }
    }

    pub fn clip_rect(&self) -> Rect {
        self.clip_rect
    }

    pub fn is_rectangular(&self) -> bool {
        self.is_rectangular
    }

    pub fn geometry(&self) -> &Arc<Geometry> {
        &self.geometry
    }

    pub fn matrix(&self) -> Option<NodeId> {
        self.matrix
    }

    /// Next clip node up the chain.
    pub fn clip_list(&self) -> Option<NodeId> {
        self.clip_list
    }
}

#[derive(Debug, Clone)]
pub struct OpacityNode {
    opacity: f32,
    pub(crate) combined_opacity: f32,
}

impl OpacityNode {
    pub fn new(opacity: f32) -> Self {
        let opacity = opacity.clamp(0.0, 1.0);
        Self {
            opacity,
            combined_opacity: opacity,
        }
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    pub fn combined_opacity(&self) -> f32 {
        self.combined_opacity
    }

    pub fn is_subtree_blocked(&self) -> bool {
        self.combined_opacity < OPACITY_BLOCK_THRESHOLD
    }
}

#[derive(Debug)]
pub enum NodeKind {
    Root,
    Group,
    Geometry(GeometryNode),
    Render(RenderNodeEntry),
    Transform(TransformNode),
    Clip(ClipNode),
    Opacity(OpacityNode),
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            NodeKind::Root => "root",
            NodeKind::Group => "group",
            NodeKind::Geometry(_) => "geometry",
            NodeKind::Render(_) => "render",
            NodeKind::Transform(_) => "transform",
            NodeKind::Clip(_) => "clip",
            NodeKind::Opacity(_) => "opacity",
        }
    }
}

#[derive(Debug)]
pub struct Node {
    kind: NodeKind,
    flags: NodeFlags,
    blocked: bool,
}

impl Node {
    fn new(kind: NodeKind) -> Self {
        Self {
            kind,
            flags: NodeFlags::empty(),
            blocked: false,
        }
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn kind_mut(&mut self) -> &mut NodeKind {
        &mut self.kind
    }

    pub fn flags(&self) -> NodeFlags {
        self.flags
    }

    /// Explicitly blocked, or an opacity node below the visibility threshold.
    pub fn is_subtree_blocked(&self) -> bool {
        if self.blocked {
            return true;
        }
        match &self.kind {
            NodeKind::Opacity(opacity) => opacity.is_subtree_blocked(),
            _ => false,
        }
    }
}

/// The node tree both renderers consume.
///
/// Nodes live in an arena and are addressed by [`NodeId`]. Every mutator records
/// a dirty notification that the renderer drains at the start of a frame, so
/// callers never notify a renderer directly. Removing a subtree frees its
/// slots, and later insertions may reuse their ids.
pub struct SceneGraph {
    tree: easy_tree::Tree<Node>,
    root: Option<NodeId>,
    changes: Vec<(NodeId, DirtyFlags)>,
}

impl Default for SceneGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SceneGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SceneGraph")
            .field("len", &self.tree.len())
            .field("root", &self.root)
            .field("pending_changes", &self.changes.len())
            .finish()
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        Self {
            tree: easy_tree::Tree::new(),
            root: None,
            changes: Vec::new(),
        }
    }

    /// Replaces the whole tree with a single root node.
    pub fn set_root(&mut self, kind: NodeKind) -> NodeId {
        self.tree.clear();
        self.changes.clear();
        let root = NodeId(self.tree.add_node(Node::new(kind)));
        self.root = Some(root);
        self.changes
            .push((root, DirtyFlags::NODE_ADDED | DirtyFlags::FORCE_UPDATE));
        root
    }

    /// Appends `kind` as the last child of `parent`.
    ///
    /// # Panics
    ///
    /// Panics if `parent` is not a node of this graph.
    pub fn append_child(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        assert!(
            self.tree.get(parent.0).is_some(),
            "append_child: unknown parent {parent}"
        );
        let id = NodeId(self.tree.add_child(parent.0, Node::new(kind)));
        self.changes.push((id, DirtyFlags::NODE_ADDED));
        id
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.tree.get(id.0)
    }

    /// Mutable access that bypasses dirty tracking; follow with
    /// [`mark_dirty`](Self::mark_dirty) when the change affects rendering.
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.tree.get_mut(id.0)
    }

    pub fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.node(id).map(Node::kind)
    }

    pub fn geometry_node(&self, id: NodeId) -> Option<&GeometryNode> {
        match self.kind(id)? {
            NodeKind::Geometry(geometry) => Some(geometry),
            _ => None,
        }
    }

    pub fn clip_node(&self, id: NodeId) -> Option<&ClipNode> {
        match self.kind(id)? {
            NodeKind::Clip(clip) => Some(clip),
            _ => None,
        }
    }

    pub fn transform_node(&self, id: NodeId) -> Option<&TransformNode> {
        match self.kind(id)? {
            NodeKind::Transform(transform) => Some(transform),
            _ => None,
        }
    }

    pub fn render_node_entry(&self, id: NodeId) -> Option<&RenderNodeEntry> {
        match self.kind(id)? {
            NodeKind::Render(entry) => Some(entry),
            _ => None,
        }
    }

    pub(crate) fn render_node_entry_mut(&mut self, id: NodeId) -> Option<&mut RenderNodeEntry> {
        match self.tree.get_mut(id.0).map(Node::kind_mut)? {
            NodeKind::Render(entry) => Some(entry),
            _ => None,
        }
    }

    pub(crate) fn geometry_node_mut(&mut self, id: NodeId) -> Option<&mut GeometryNode> {
        match self.tree.get_mut(id.0).map(Node::kind_mut)? {
            NodeKind::Geometry(geometry) => Some(geometry),
            _ => None,
        }
    }

    /// Combined matrix of the transform node `matrix` refers to, identity for
    /// `None`.
    pub fn combined_matrix(&self, matrix: Option<NodeId>) -> Matrix4 {
        matrix
            .and_then(|id| self.transform_node(id))
            .map(|transform| transform.combined_matrix)
            .unwrap_or_else(Matrix4::identity)
    }

    fn child_slice(&self, id: NodeId) -> &[usize] {
        if self.tree.get(id.0).is_some() {
            self.tree.children(id.0)
        } else {
            &[]
        }
    }

    /// Children of `id` in insertion order; empty for ids not in the graph.
    pub fn children(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        self.child_slice(id).iter().map(|&child| NodeId(child))
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.child_slice(id).len()
    }

    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.tree.get(id.0)?;
        self.tree.parent_index_unchecked(id.0).map(NodeId)
    }

    /// Depth-first walk from the root without recursion. `pre` runs before a
    /// node's children, `post` after its whole subtree. Every node is visited;
    /// callers skip blocked subtrees themselves.
    pub(crate) fn traverse_mut<S>(
        &mut self,
        mut pre: impl FnMut(NodeId, &mut Node, &mut S),
        mut post: impl FnMut(NodeId, &mut Node, &mut S),
        state: &mut S,
    ) {
        let Some(root) = self.root else {
            return;
        };
        self.tree.traverse_subtree_mut(
            root.0,
            |index, node, state| pre(NodeId(index), node, state),
            |index, node, state| post(NodeId(index), node, state),
            state,
        );
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn is_subtree_blocked(&self, id: NodeId) -> bool {
        self.node(id).map(Node::is_subtree_blocked).unwrap_or(true)
    }

    pub fn mark_dirty(&mut self, id: NodeId, flags: DirtyFlags) {
        if !flags.is_empty() {
            self.changes.push((id, flags));
        }
    }

    pub fn has_pending_changes(&self) -> bool {
        !self.changes.is_empty()
    }

    /// Drains the notifications recorded since the last call.
    pub fn take_changes(&mut self) -> Vec<(NodeId, DirtyFlags)> {
        std::mem::take(&mut self.changes)
    }

    pub fn set_material(&mut self, id: NodeId, material: Arc<dyn Material>) {
        let Some(geometry) = self.geometry_node_mut(id) else {
            warn!("set_material: {id} is not a geometry node");
            return;
        };
        geometry.material = Some(material);
        self.mark_dirty(id, DirtyFlags::MATERIAL);
    }

    pub fn set_opaque_material(&mut self, id: NodeId, material: Option<Arc<dyn Material>>) {
        let Some(geometry) = self.geometry_node_mut(id) else {
            warn!("set_opaque_material: {id} is not a geometry node");
            return;
        };
        geometry.opaque_material = material;
        self.mark_dirty(id, DirtyFlags::MATERIAL);
    }

    pub fn set_geometry(&mut self, id: NodeId, new_geometry: Geometry) {
        let Some(geometry) = self.geometry_node_mut(id) else {
            warn!("set_geometry: {id} is not a geometry node");
            return;
        };
        geometry.geometry = Arc::new(new_geometry);
        self.mark_dirty(id, DirtyFlags::GEOMETRY);
    }

    pub fn set_paintable(&mut self, id: NodeId, paintable: Paintable) {
        let Some(geometry) = self.geometry_node_mut(id) else {
            warn!("set_paintable: {id} is not a geometry node");
            return;
        };
        geometry.paintable = Some(paintable);
        self.mark_dirty(id, DirtyFlags::GEOMETRY);
    }

    pub fn set_matrix(&mut self, id: NodeId, matrix: Matrix4) {
        let Some(NodeKind::Transform(transform)) = self.tree.get_mut(id.0).map(Node::kind_mut)
        else {
            warn!("set_matrix: {id} is not a transform node");
            return;
        };
        transform.matrix = matrix;
        self.mark_dirty(id, DirtyFlags::MATRIX);
    }

    pub fn set_opacity(&mut self, id: NodeId, opacity: f32) {
        let Some(NodeKind::Opacity(node)) = self.tree.get_mut(id.0).map(Node::kind_mut) else {
            warn!("set_opacity: {id} is not an opacity node");
            return;
        };
        let was_blocked = node.is_subtree_blocked();
        node.opacity = opacity.clamp(0.0, 1.0);
        // Refined by the updater; good enough to detect the visibility flip of a
        // top-level opacity node.
        node.combined_opacity = node.opacity;
        let mut flags = DirtyFlags::OPACITY;
        if was_blocked != node.is_subtree_blocked() {
            flags |= DirtyFlags::SUBTREE_BLOCKED;
        }
        self.mark_dirty(id, flags);
    }

    /// Moves a rectangular clip. Shape clips are left unchanged; replace their
    /// node to change the shape.
    pub fn set_clip_rect(&mut self, id: NodeId, clip_rect: Rect) {
        let Some(NodeKind::Clip(clip)) = self.tree.get_mut(id.0).map(Node::kind_mut) else {
            warn!("set_clip_rect: {id} is not a clip node");
            return;
        };
        if !clip.is_rectangular {
            warn!("set_clip_rect: {id} clips to a shape, not a rect");
            return;
        }
        *clip = ClipNode {
            matrix: clip.matrix,
            clip_list: clip.clip_list,
            ..ClipNode::rect(clip_rect)
        };
        self.mark_dirty(id, DirtyFlags::GEOMETRY);
    }

    pub fn set_flags(&mut self, id: NodeId, flags: NodeFlags) {
        let Some(node) = self.tree.get_mut(id.0) else {
            return;
        };
        if node.flags == flags {
            return;
        }
        let overlap_changed = (node.flags ^ flags).contains(NodeFlags::CHILDREN_DO_NOT_OVERLAP);
        node.flags = flags;
        if overlap_changed {
            self.mark_dirty(id, DirtyFlags::CHILDREN_DO_NOT_OVERLAP);
        }
    }

    pub fn set_subtree_blocked(&mut self, id: NodeId, blocked: bool) {
        let Some(node) = self.tree.get_mut(id.0) else {
            return;
        };
        if node.blocked == blocked {
            return;
        }
        node.blocked = blocked;
        self.mark_dirty(id, DirtyFlags::SUBTREE_BLOCKED);
    }

    /// Removes `id` and its descendants and frees their slots. Every removed
    /// node gets a `NODE_REMOVED` notification so renderers can drop per-node
    /// caches before the id is handed out again.
    pub fn remove_subtree(&mut self, id: NodeId) {
        if self.tree.get(id.0).is_none() {
            warn!("remove_subtree: {id} is not in the graph");
            return;
        }
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = self.tree.get_mut(current.0) else {
                continue;
            };
            if let NodeKind::Render(entry) = &mut node.kind {
                entry.node.release_resources();
            }
            self.changes.push((current, DirtyFlags::NODE_REMOVED));
            stack.extend(self.tree.children(current.0).iter().map(|&child| NodeId(child)));
        }
        self.tree.remove_subtree(id.0);
        if self.root == Some(id) {
            self.root = None;
        }
    }
}
