use std::ops::Range;

use tracing::{trace, warn};

use crate::id::NodeId;
use crate::scene::{GeometryNode, Node, NodeFlags, NodeKind, RenderNodeEntry, SceneGraph};
use crate::util::trim_vector_if_needed;

use super::merge::MergeHeap;
use super::ordering::compare_nodes;
use super::types::RenderGroup;

const MAX_WALK_STACK_CAPACITY: usize = 4_096;
const MAX_MERGE_SCRATCH_CAPACITY: usize = 65_536;

/// A node entered by the list walk and not left yet.
#[derive(Debug, Clone, Copy)]
struct OpenNode {
    /// Transparent list length when the node was entered.
    transparent_start: usize,
    /// Children's transparent runs get merged when the node is left.
    merge_children: bool,
    runs_base: usize,
    render_nodes_before: usize,
}

/// The opaque and transparent draw lists with the state used to build them.
///
/// Lists hold node ids only; the scene keeps ownership of the nodes.
#[derive(Debug)]
pub(crate) struct RenderLists {
    pub(crate) opaque_nodes: Vec<NodeId>,
    pub(crate) transparent_nodes: Vec<NodeId>,
    pub(crate) render_groups: Vec<RenderGroup>,
    /// Next free render order; opaque nodes take it and advance it by two.
    pub(crate) current_render_order: i32,
    reorder_nodes: bool,
    render_node_added: bool,
    render_node_count: usize,
    skip_depth: usize,
    open_nodes: Vec<OpenNode>,
    /// Transparent runs of the children of open merging nodes.
    run_stack: Vec<Range<usize>>,
    /// Runs of every merge found by the walk, grouped by `merges`.
    merge_runs: Vec<Range<usize>>,
    /// Ranges of `merge_runs`, innermost subtree first.
    merges: Vec<Range<usize>>,
    merge_scratch: Vec<NodeId>,
    merge_heap: MergeHeap,
}

impl RenderLists {
    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            opaque_nodes: Vec::with_capacity(capacity),
            transparent_nodes: Vec::with_capacity(capacity),
            render_groups: Vec::with_capacity(4),
            current_render_order: 1,
            reorder_nodes: true,
            render_node_added: false,
            render_node_count: 0,
            skip_depth: 0,
            open_nodes: Vec::new(),
            run_stack: Vec::new(),
            merge_runs: Vec::new(),
            merges: Vec::new(),
            merge_scratch: Vec::with_capacity(capacity),
            merge_heap: MergeHeap::new(),
        }
    }

    fn begin(&mut self, reorder_nodes: bool) {
        self.opaque_nodes.clear();
        self.transparent_nodes.clear();
        self.render_groups.clear();
        self.current_render_order = 1;
        self.reorder_nodes = reorder_nodes;
        self.render_node_added = false;
        self.render_node_count = 0;
        self.skip_depth = 0;
        self.open_nodes.clear();
        self.run_stack.clear();
        self.merge_runs.clear();
        self.merges.clear();
        self.merge_scratch.clear();
    }

    pub(crate) fn trim_to_policy(&mut self) {
        trim_vector_if_needed(&mut self.open_nodes, MAX_WALK_STACK_CAPACITY);
        trim_vector_if_needed(&mut self.run_stack, MAX_WALK_STACK_CAPACITY);
        trim_vector_if_needed(&mut self.merge_runs, MAX_WALK_STACK_CAPACITY);
        trim_vector_if_needed(&mut self.merges, MAX_WALK_STACK_CAPACITY);
        trim_vector_if_needed(&mut self.merge_scratch, MAX_MERGE_SCRATCH_CAPACITY);
    }

    /// Walks the scene from the root, assigning render orders and splitting
    /// leaves into the opaque and transparent lists. Always ends with a render
    /// group spanning the tail of both lists.
    pub(crate) fn rebuild(&mut self, scene: &mut SceneGraph, reorder_nodes: bool) {
        self.begin(reorder_nodes);
        scene.traverse_mut(Self::enter, Self::leave, self);
        self.apply_merges(scene);
        self.render_groups.push(RenderGroup {
            opaque_end: self.opaque_nodes.len(),
            transparent_end: self.transparent_nodes.len(),
        });
        trace!(
            "rebuilt lists: {} opaque, {} transparent, {} groups, next render order {}",
            self.opaque_nodes.len(),
            self.transparent_nodes.len(),
            self.render_groups.len(),
            self.current_render_order
        );
    }

    fn enter(id: NodeId, node: &mut Node, lists: &mut RenderLists) {
        if lists.skip_depth > 0 {
            lists.skip_depth += 1;
            return;
        }
        if node.is_subtree_blocked() {
            lists.skip_depth = 1;
            return;
        }

        let transparent_start = lists.transparent_nodes.len();
        let merge_children = lists.reorder_nodes
            && node.flags().contains(NodeFlags::CHILDREN_DO_NOT_OVERLAP);
        match node.kind_mut() {
            NodeKind::Geometry(geometry) => lists.add_geometry_node(id, geometry),
            NodeKind::Render(entry) => lists.add_render_node(id, entry),
            _ => {}
        }

        lists.open_nodes.push(OpenNode {
            transparent_start,
            merge_children,
            runs_base: lists.run_stack.len(),
            render_nodes_before: lists.render_node_count,
        });
    }

    fn leave(_id: NodeId, _node: &mut Node, lists: &mut RenderLists) {
        if lists.skip_depth > 0 {
            lists.skip_depth -= 1;
            return;
        }
        let Some(open) = lists.open_nodes.pop() else {
            return;
        };

        if open.merge_children {
            lists.record_merge(&open);
            lists.run_stack.truncate(open.runs_base);
        }

        if lists.open_nodes.last().is_some_and(|parent| parent.merge_children) {
            let run = open.transparent_start..lists.transparent_nodes.len();
            lists.run_stack.push(run);
        }
    }

    /// Queues the merge of the children's transparent runs of a node being
    /// left, when more than one of them is non-empty.
    fn record_merge(&mut self, open: &OpenNode) {
        // Render nodes pin group boundaries to transparent offsets, so their
        // subtrees keep construction order.
        if self.render_node_count != open.render_nodes_before {
            return;
        }
        let runs = &self.run_stack[open.runs_base..];
        if runs.iter().filter(|run| !run.is_empty()).count() < 2 {
            return;
        }
        let first = self.merge_runs.len();
        self.merge_runs.extend_from_slice(runs);
        self.merges.push(first..self.merge_runs.len());
    }

    /// Runs the queued merges in the order the walk left their nodes, so a
    /// subtree is merged before any enclosing merge sees its run.
    fn apply_merges(&mut self, scene: &SceneGraph) {
        for merge in self.merges.iter() {
            let runs = &self.merge_runs[merge.clone()];
            let span = runs[0].start..runs[runs.len() - 1].end;
            self.merge_scratch.clear();
            self.merge_heap.merge_runs(
                &self.transparent_nodes,
                runs,
                &mut self.merge_scratch,
                |a, b| compare_nodes(scene, *a, *b, false),
            );
            debug_assert_eq!(
                self.merge_scratch.len(),
                span.len(),
                "merged sequence must cover the spanned transparent range"
            );
            self.transparent_nodes[span].copy_from_slice(&self.merge_scratch);
        }
    }

    fn add_geometry_node(&mut self, id: NodeId, geometry: &mut GeometryNode) {
        let Some(material) = geometry.active_material() else {
            // Paintable-only nodes are drawn by the software renderer alone.
            if geometry.paintable().is_none() {
                debug_assert!(false, "geometry node {id} has no material");
                warn!("skipping geometry node {id} without a material");
            }
            return;
        };

        let transparent = material.requires_blending() || geometry.inherited_opacity() < 1.0;

        if transparent {
            geometry.render_order = self.current_render_order - 1;
            self.transparent_nodes.push(id);
        } else {
            if self.render_node_added {
                self.render_groups.push(RenderGroup {
                    opaque_end: self.opaque_nodes.len(),
                    transparent_end: self.transparent_nodes.len(),
                });
                self.render_node_added = false;
            }
            geometry.render_order = self.current_render_order;
            self.opaque_nodes.push(id);
            self.current_render_order += 2;
        }
    }

    fn add_render_node(&mut self, id: NodeId, entry: &mut RenderNodeEntry) {
        entry.render_order = self.current_render_order - 1;
        self.transparent_nodes.push(id);
        self.render_node_added = true;
        self.render_node_count += 1;
    }

    /// Opaque and transparent ranges of every group, in draw order.
    pub(crate) fn group_ranges(&self) -> impl Iterator<Item = (Range<usize>, Range<usize>)> + '_ {
        let mut opaque_start = 0;
        let mut transparent_start = 0;
        self.render_groups.iter().map(move |group| {
            let ranges = (
                opaque_start..group.opaque_end,
                transparent_start..group.transparent_end,
            );
            opaque_start = group.opaque_end;
            transparent_start = group.transparent_end;
            ranges
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::color::Color;
    use crate::geometry::Geometry;
    use crate::materials::FlatColorMaterial;
    use crate::render_node::{RenderNode, RenderNodeState, StateFlags};
    use crate::renderer::CommandList;
    use crate::scene::OpacityNode;

    fn rect(color: Color) -> NodeKind {
        NodeKind::Geometry(GeometryNode::new(
            Geometry::rect(euclid::rect(0.0, 0.0, 1.0, 1.0)),
            Arc::new(FlatColorMaterial::new(color)),
        ))
    }

    fn build(scene: &mut SceneGraph, reorder: bool) -> RenderLists {
        crate::scene::update_states(scene);
        let mut lists = RenderLists::with_capacity(8);
        lists.rebuild(scene, reorder);
        lists
    }

    #[derive(Debug)]
    struct NoopRenderNode;

    impl RenderNode for NoopRenderNode {
        fn changed_states(&self) -> StateFlags {
            StateFlags::empty()
        }

        fn render(&mut self, _state: &RenderNodeState, _commands: &mut CommandList) {}
    }

    #[test]
    fn opaque_nodes_take_odd_render_orders() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        let ids: Vec<NodeId> = (0..3)
            .map(|_| scene.append_child(root, rect(Color::BLACK)))
            .collect();

        let lists = build(&mut scene, true);

        let orders: Vec<i32> = ids
            .iter()
            .map(|id| scene.geometry_node(*id).unwrap().render_order())
            .collect();
        assert_eq!(orders, vec![1, 3, 5]);
        assert_eq!(lists.current_render_order, 7);
        assert!(lists.transparent_nodes.is_empty());
    }

    #[test]
    fn transparent_node_takes_order_below_next_opaque() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        let first = scene.append_child(root, rect(Color::BLACK));
        let translucent = scene.append_child(root, rect(Color::rgba(0, 0, 0, 10)));
        let last = scene.append_child(root, rect(Color::BLACK));

        let lists = build(&mut scene, true);

        assert_eq!(lists.opaque_nodes, vec![first, last]);
        assert_eq!(lists.transparent_nodes, vec![translucent]);
        assert_eq!(scene.geometry_node(translucent).unwrap().render_order(), 2);
        assert_eq!(scene.geometry_node(last).unwrap().render_order(), 3);
    }

    #[test]
    fn inherited_opacity_below_one_is_transparent() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        let opacity = scene.append_child(root, NodeKind::Opacity(OpacityNode::new(0.99)));
        let node = scene.append_child(opacity, rect(Color::BLACK));

        let lists = build(&mut scene, true);

        assert_eq!(lists.transparent_nodes, vec![node]);
        assert!(lists.opaque_nodes.is_empty());
    }

    #[test]
    fn blocked_subtrees_are_skipped() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        let group = scene.append_child(root, NodeKind::Group);
        scene.append_child(group, rect(Color::BLACK));
        scene.set_subtree_blocked(group, true);

        let lists = build(&mut scene, true);

        assert!(lists.opaque_nodes.is_empty());
        assert_eq!(lists.render_groups.len(), 1);
    }

    #[test]
    fn render_node_starts_a_new_group_before_next_opaque_node() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        let before = scene.append_child(root, rect(Color::BLACK));
        let custom = scene.append_child(
            root,
            NodeKind::Render(RenderNodeEntry::new(Box::new(NoopRenderNode))),
        );
        let after = scene.append_child(root, rect(Color::WHITE));

        let lists = build(&mut scene, true);

        assert_eq!(lists.opaque_nodes, vec![before, after]);
        assert_eq!(lists.transparent_nodes, vec![custom]);
        assert_eq!(
            lists.render_groups,
            vec![
                RenderGroup {
                    opaque_end: 1,
                    transparent_end: 1
                },
                RenderGroup {
                    opaque_end: 2,
                    transparent_end: 1
                },
            ]
        );
        let ranges: Vec<_> = lists.group_ranges().collect();
        assert_eq!(ranges, vec![(0..1, 0..1), (1..2, 1..1)]);
    }

    #[test]
    fn non_overlapping_children_merge_transparent_runs_by_material() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        scene.set_flags(root, NodeFlags::CHILDREN_DO_NOT_OVERLAP);
        let light = Color::rgba(200, 200, 200, 128);
        let dark = Color::rgba(10, 10, 10, 128);
        let first = scene.append_child(root, NodeKind::Group);
        let first_dark = scene.append_child(first, rect(dark));
        let first_light = scene.append_child(first, rect(light));
        let second = scene.append_child(root, NodeKind::Group);
        let second_dark = scene.append_child(second, rect(dark));
        let second_light = scene.append_child(second, rect(light));

        let merged = build(&mut scene, true);
        let unmerged = build(&mut scene, false);

        assert_eq!(
            unmerged.transparent_nodes,
            vec![first_dark, first_light, second_dark, second_light]
        );
        // Each child keeps dark before light; the dark runs of both children
        // are drawn back to back.
        assert_eq!(
            merged.transparent_nodes,
            vec![first_dark, second_dark, first_light, second_light]
        );
    }

    #[test]
    fn subtrees_with_render_nodes_keep_construction_order() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        scene.set_flags(root, NodeFlags::CHILDREN_DO_NOT_OVERLAP);
        let first = scene.append_child(root, rect(Color::rgba(200, 0, 0, 100)));
        let custom = scene.append_child(
            root,
            NodeKind::Render(RenderNodeEntry::new(Box::new(NoopRenderNode))),
        );
        let last = scene.append_child(root, rect(Color::rgba(0, 0, 0, 100)));

        let lists = build(&mut scene, true);

        assert_eq!(lists.transparent_nodes, vec![first, custom, last]);
    }

    #[test]
    fn nested_merges_see_the_merged_inner_run() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        scene.set_flags(root, NodeFlags::CHILDREN_DO_NOT_OVERLAP);
        let light = Color::rgba(200, 200, 200, 128);
        let dark = Color::rgba(10, 10, 10, 128);

        let inner = scene.append_child(root, NodeKind::Group);
        scene.set_flags(inner, NodeFlags::CHILDREN_DO_NOT_OVERLAP);
        let inner_light = scene.append_child(inner, rect(light));
        let inner_dark = scene.append_child(inner, rect(dark));
        let outer_light = scene.append_child(root, rect(light));

        let lists = build(&mut scene, true);

        assert_eq!(
            lists.transparent_nodes,
            vec![inner_dark, inner_light, outer_light]
        );
    }

    #[test]
    fn blocked_child_between_merged_runs_is_left_out() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        scene.set_flags(root, NodeFlags::CHILDREN_DO_NOT_OVERLAP);
        let light = scene.append_child(root, rect(Color::rgba(200, 200, 200, 128)));
        let hidden = scene.append_child(root, NodeKind::Opacity(OpacityNode::new(0.0)));
        scene.append_child(hidden, rect(Color::rgba(0, 0, 0, 128)));
        let dark = scene.append_child(root, rect(Color::rgba(10, 10, 10, 128)));

        let lists = build(&mut scene, true);

        assert_eq!(lists.transparent_nodes, vec![dark, light]);
    }

    #[test]
    fn deep_chains_build_without_recursion() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        let mut parent = root;
        for _ in 0..100_000 {
            parent = scene.append_child(parent, NodeKind::Group);
        }
        let leaf = scene.append_child(parent, rect(Color::BLACK));

        let lists = build(&mut scene, true);

        assert_eq!(lists.opaque_nodes, vec![leaf]);
        assert_eq!(lists.current_render_order, 3);
    }
}
