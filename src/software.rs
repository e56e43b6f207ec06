//! CPU fallback renderer.
//!
//! Paints the same [`SceneGraph`] as the batching renderer, but immediately and
//! in traversal order, through a [`RasterPainter`]. Geometry nodes take part
//! when they carry a [`Paintable`]. Only the region that changed since the
//! previous frame is repainted.

use ahash::{HashMap, HashMapExt};
use tracing::{debug, trace};

use crate::color::Color;
use crate::geometry::DeviceRect;
use crate::id::NodeId;
use crate::scene::{self, DirtyFlags, NodeKind, SceneGraph};

mod buffer;
mod paintable;
mod painter;
mod presenter;
mod region;
mod renderable;

pub use buffer::{Image, ImageFormat, PixelBuffer};
pub use paintable::{CanvasContent, GlyphBitmap, NinePatchInsets, Paintable};
pub use painter::{CompositionMode, RasterPainter};
pub use presenter::{PresentError, SoftbufferPresenter};
pub use region::DirtyRegion;

use renderable::RenderableNode;

const MAX_RENDER_LIST_CAPACITY: usize = 16_384;

/// Work done by one [`SoftwareRenderer::render`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SoftwareFrameStatistics {
    /// Paintable nodes visited this frame.
    pub rendered_nodes: u32,
    /// Nodes that painted at least one pixel rect.
    pub painted_nodes: u32,
    pub dirty_rects: u32,
    pub dirty_area: i64,
}

/// Region-driven software renderer.
///
/// Per frame the tree is walked into a flat render list, regions hidden by
/// opaque nodes above are discarded, and every list entry repaints the part of
/// the accumulated dirty region it covers.
#[derive(Debug)]
pub struct SoftwareRenderer {
    nodes: HashMap<NodeId, RenderableNode>,
    render_list: Vec<NodeId>,
    device_rect: DeviceRect,
    background: Color,
    dirty: DirtyRegion,
    last_statistics: SoftwareFrameStatistics,
}

impl Default for SoftwareRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftwareRenderer {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            render_list: Vec::new(),
            device_rect: DeviceRect::default(),
            background: Color::WHITE,
            dirty: DirtyRegion::new(),
            last_statistics: SoftwareFrameStatistics::default(),
        }
    }

    pub fn set_background(&mut self, color: Color) {
        if self.background != color {
            self.background = color;
            self.dirty.add_rect(self.device_rect);
        }
    }

    pub fn background(&self) -> Color {
        self.background
    }

    /// Forces the next frame to repaint everything.
    pub fn mark_all_dirty(&mut self) {
        self.dirty.add_rect(self.device_rect);
    }

    pub fn last_frame_statistics(&self) -> SoftwareFrameStatistics {
        self.last_statistics
    }

    /// Reacts to a change of `id`.
    ///
    /// A paintable leaf updates itself. Any other node refreshes every
    /// paintable leaf below it, since its transform, clip or opacity feeds
    /// theirs. Removed nodes dirty the area they covered.
    pub fn node_changed(&mut self, scene: &SceneGraph, id: NodeId, flags: DirtyFlags) {
        if flags.contains(DirtyFlags::NODE_REMOVED) {
            if let Some(removed) = self.nodes.remove(&id) {
                self.dirty.add_rect(removed.bounds());
                self.dirty.add_region(removed.dirty_region());
            }
            return;
        }
        if flags.contains(DirtyFlags::FORCE_UPDATE) && scene.root() == Some(id) {
            self.nodes.clear();
            self.mark_all_dirty();
        }
        if flags.contains(DirtyFlags::SUBTREE_BLOCKED) {
            // Content appearing or disappearing repaints where it is.
            self.mark_subtree_dirty(scene, id);
        }

        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            let Some(node) = scene.node(current) else {
                continue;
            };
            let NodeKind::Geometry(geometry) = node.kind() else {
                stack.extend(scene.children(current));
                continue;
            };
            match geometry.paintable() {
                Some(paintable) => {
                    let renderable = self
                        .nodes
                        .entry(current)
                        .or_insert_with(|| RenderableNode::new(paintable.clone()));
                    renderable.update(scene, current, geometry);
                }
                None => {
                    if let Some(stale) = self.nodes.remove(&current) {
                        self.dirty.add_rect(stale.bounds());
                    }
                }
            }
        }
    }

    fn mark_subtree_dirty(&mut self, scene: &SceneGraph, id: NodeId) {
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            if let Some(renderable) = self.nodes.get(&current) {
                self.dirty.add_rect(renderable.bounds());
            }
            stack.extend(scene.children(current));
        }
    }

    /// Renders one frame into `buffer` and returns the region that changed.
    ///
    /// `buffer` must hold the previous frame; a size change repaints it fully.
    pub fn render(&mut self, scene: &mut SceneGraph, buffer: &mut PixelBuffer) -> DirtyRegion {
        if scene.has_pending_changes() {
            scene::update_states(scene);
            for (id, flags) in scene.take_changes() {
                self.node_changed(scene, id, flags);
            }
        }

        if self.device_rect != buffer.rect() {
            debug!("software target resized to {:?}", buffer.size());
            self.device_rect = buffer.rect();
            self.dirty.add_rect(self.device_rect);
        }

        self.build_render_list(scene);
        let paint_regions = self.optimize_render_list();
        let dirty = self.dirty.intersected(&self.device_rect);

        let mut statistics = SoftwareFrameStatistics {
            rendered_nodes: self.render_list.len() as u32,
            dirty_rects: dirty.rects().len() as u32,
            dirty_area: dirty.area(),
            ..SoftwareFrameStatistics::default()
        };

        let mut painter = RasterPainter::new(buffer);
        painter.set_composition_mode(CompositionMode::Source);
        for rect in dirty.rects() {
            painter.set_clip_rect(*rect);
            painter.fill_rect(&rect.to_rect(), self.background);
        }

        for (id, region) in self.render_list.iter().zip(paint_regions.iter()) {
            let Some(renderable) = self.nodes.get_mut(id) else {
                continue;
            };
            renderable.dirty_region_mut().clear();
            if region.is_empty() {
                continue;
            }
            for rect in region.rects() {
                renderable.paint(&mut painter, *rect);
            }
            statistics.painted_nodes += 1;
        }

        debug!(
            "software frame: {} nodes, {} painted, {} dirty rect(s) covering {} px",
            statistics.rendered_nodes,
            statistics.painted_nodes,
            statistics.dirty_rects,
            statistics.dirty_area
        );
        self.last_statistics = statistics;
        self.dirty.clear();
        crate::util::trim_vector_if_needed(&mut self.render_list, MAX_RENDER_LIST_CAPACITY);
        dirty
    }

    /// Flattens the visible paintable leaves in back-to-front order.
    fn build_render_list(&mut self, scene: &SceneGraph) {
        self.render_list.clear();
        let Some(root) = scene.root() else {
            return;
        };
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if scene.is_subtree_blocked(id) {
                continue;
            }
            if let Some(geometry) = scene.geometry_node(id) {
                if let Some(paintable) = geometry.paintable() {
                    self.nodes.entry(id).or_insert_with(|| {
                        let mut renderable = RenderableNode::new(paintable.clone());
                        renderable.update(scene, id, geometry);
                        renderable
                    });
                    self.render_list.push(id);
                }
            }
            // Reversed so the first child is popped first.
            let first_unvisited = stack.len();
            stack.extend(scene.children(id));
            stack[first_unvisited..].reverse();
        }
        trace!("software render list: {:?}", self.render_list);
    }

    /// Walks the list front to back. Each node's own dirty region loses the
    /// parts covered by opaque nodes above it before joining the frame's dirty
    /// region; then each node gets the part of that region it must repaint.
    fn optimize_render_list(&mut self) -> Vec<DirtyRegion> {
        let mut obscured = DirtyRegion::new();
        for id in self.render_list.iter().rev() {
            let Some(renderable) = self.nodes.get(id) else {
                continue;
            };
            let mut own = renderable.dirty_region().clone();
            own.subtract_region(&obscured);
            self.dirty.add_region(&own);
            if renderable.is_opaque() {
                obscured.add_rect(renderable.bounds());
            }
        }

        let dirty = self.dirty.intersected(&self.device_rect);
        let mut obscured = DirtyRegion::new();
        let mut regions = vec![DirtyRegion::new(); self.render_list.len()];
        for (index, id) in self.render_list.iter().enumerate().rev() {
            let Some(renderable) = self.nodes.get(id) else {
                continue;
            };
            let mut region = dirty.intersected(&renderable.bounds());
            region.subtract_region(&obscured);
            regions[index] = region;
            if renderable.is_opaque() {
                obscured.add_rect(renderable.bounds());
            }
        }
        regions
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::geometry::Geometry;
    use crate::material::Material;
    use crate::materials::FlatColorMaterial;
    use crate::scene::{GeometryNode, OpacityNode};

    fn assert_send<T: Send>() {}

    fn rect_leaf(x: f32, y: f32, size: f32, color: Color) -> NodeKind {
        let material: Arc<dyn Material> = Arc::new(FlatColorMaterial::new(color));
        NodeKind::Geometry(
            GeometryNode::new(Geometry::default(), material).with_paintable(Paintable::Rect {
                rect: euclid::rect(x, y, size, size),
                color,
            }),
        )
    }

    #[test]
    fn software_renderer_is_send() {
        assert_send::<SoftwareRenderer>();
    }

    #[test]
    fn first_frame_repaints_everything() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        scene.append_child(root, rect_leaf(0.0, 0.0, 4.0, Color::rgb(255, 0, 0)));

        let mut renderer = SoftwareRenderer::new();
        let mut buffer = PixelBuffer::new(8, 8);
        let dirty = renderer.render(&mut scene, &mut buffer);

        assert_eq!(dirty.bounding_rect(), DeviceRect::new(0, 0, 8, 8));
        assert_eq!(buffer.pixel(1, 1), Some(0xFFFF_0000));
        assert_eq!(buffer.pixel(6, 6), Some(0xFFFF_FFFF));
    }

    #[test]
    fn unchanged_scene_repaints_nothing() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        scene.append_child(root, rect_leaf(0.0, 0.0, 4.0, Color::BLACK));

        let mut renderer = SoftwareRenderer::new();
        let mut buffer = PixelBuffer::new(8, 8);
        renderer.render(&mut scene, &mut buffer);
        let dirty = renderer.render(&mut scene, &mut buffer);

        assert!(dirty.is_empty());
        assert_eq!(renderer.last_frame_statistics().painted_nodes, 0);
    }

    #[test]
    fn moving_a_node_dirties_old_and_new_position() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        let node = scene.append_child(root, rect_leaf(0.0, 0.0, 2.0, Color::BLACK));

        let mut renderer = SoftwareRenderer::new();
        let mut buffer = PixelBuffer::new(10, 10);
        renderer.render(&mut scene, &mut buffer);

        scene.set_paintable(
            node,
            Paintable::Rect {
                rect: euclid::rect(6.0, 6.0, 2.0, 2.0),
                color: Color::BLACK,
            },
        );
        let dirty = renderer.render(&mut scene, &mut buffer);

        assert_eq!(
            dirty.rects(),
            &[DeviceRect::new(0, 0, 2, 2), DeviceRect::new(6, 6, 2, 2)]
        );
        assert_eq!(buffer.pixel(0, 0), Some(0xFFFF_FFFF));
        assert_eq!(buffer.pixel(7, 7), Some(0xFF00_0000));
    }

    #[test]
    fn changes_below_an_opaque_node_are_not_repainted() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        let below = scene.append_child(root, rect_leaf(2.0, 2.0, 2.0, Color::BLACK));
        scene.append_child(root, rect_leaf(0.0, 0.0, 8.0, Color::rgb(0, 0, 255)));

        let mut renderer = SoftwareRenderer::new();
        let mut buffer = PixelBuffer::new(10, 10);
        renderer.render(&mut scene, &mut buffer);

        scene.set_paintable(
            below,
            Paintable::Rect {
                rect: euclid::rect(3.0, 3.0, 2.0, 2.0),
                color: Color::BLACK,
            },
        );
        let dirty = renderer.render(&mut scene, &mut buffer);

        assert!(dirty.is_empty());
        assert_eq!(buffer.pixel(3, 3), Some(0xFF00_00FF));
    }

    #[test]
    fn removed_node_area_is_cleared_to_background() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        let node = scene.append_child(root, rect_leaf(1.0, 1.0, 3.0, Color::BLACK));

        let mut renderer = SoftwareRenderer::new();
        renderer.set_background(Color::rgb(0, 255, 0));
        let mut buffer = PixelBuffer::new(6, 6);
        renderer.render(&mut scene, &mut buffer);
        assert_eq!(buffer.pixel(2, 2), Some(0xFF00_0000));

        scene.remove_subtree(node);
        let dirty = renderer.render(&mut scene, &mut buffer);

        assert_eq!(dirty.rects(), &[DeviceRect::new(1, 1, 3, 3)]);
        assert_eq!(buffer.pixel(2, 2), Some(0xFF00_FF00));
    }

    #[test]
    fn reused_id_paints_the_new_node_only() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        let old = scene.append_child(root, rect_leaf(1.0, 1.0, 3.0, Color::BLACK));

        let mut renderer = SoftwareRenderer::new();
        let mut buffer = PixelBuffer::new(8, 8);
        renderer.render(&mut scene, &mut buffer);

        scene.remove_subtree(old);
        let new = scene.append_child(root, rect_leaf(5.0, 5.0, 2.0, Color::rgb(255, 0, 0)));
        assert_eq!(new, old);
        renderer.render(&mut scene, &mut buffer);

        assert_eq!(buffer.pixel(2, 2), Some(0xFFFF_FFFF));
        assert_eq!(buffer.pixel(5, 5), Some(0xFFFF_0000));
        assert_eq!(renderer.nodes.len(), 1);
    }

    #[test]
    fn append_remove_churn_drops_cached_nodes() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        let mut renderer = SoftwareRenderer::new();
        let mut buffer = PixelBuffer::new(8, 8);

        for _ in 0..200 {
            let node = scene.append_child(root, rect_leaf(0.0, 0.0, 2.0, Color::BLACK));
            renderer.render(&mut scene, &mut buffer);
            scene.remove_subtree(node);
            renderer.render(&mut scene, &mut buffer);
        }

        assert!(renderer.nodes.is_empty());
        assert_eq!(scene.len(), 1);
        assert_eq!(buffer.pixel(0, 0), Some(0xFFFF_FFFF));
    }

    #[test]
    fn opacity_node_fades_its_subtree() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        let opacity = scene.append_child(root, NodeKind::Opacity(OpacityNode::new(0.5)));
        scene.append_child(opacity, rect_leaf(0.0, 0.0, 4.0, Color::BLACK));

        let mut renderer = SoftwareRenderer::new();
        let mut buffer = PixelBuffer::new(4, 4);
        renderer.render(&mut scene, &mut buffer);

        assert_eq!(buffer.pixel(0, 0), Some(0xFF7F_7F7F));

        scene.set_opacity(opacity, 0.0);
        let dirty = renderer.render(&mut scene, &mut buffer);
        assert_eq!(dirty.bounding_rect(), DeviceRect::new(0, 0, 4, 4));
        assert_eq!(buffer.pixel(0, 0), Some(0xFFFF_FFFF));
    }
}
