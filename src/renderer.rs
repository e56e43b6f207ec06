use std::sync::Arc;

use tracing::{debug, trace};

use crate::color::Color;
use crate::geometry::{DeviceRect, Matrix4, Rect};
use crate::id::{NodeId, ProgramId};
use crate::material::{Material, MaterialType};
use crate::scene::{self, DirtyFlags, NodeKind, SceneGraph};

mod build;
mod clip;
mod commands;
mod construction;
mod emit;
mod merge;
mod metrics;
mod ordering;
mod programs;
mod sorting;
mod surface;
mod types;

use build::RenderLists;
use emit::EmitState;
use programs::ShaderCache;
use types::Pass;

pub use commands::{CommandList, GpuCommand};
pub use metrics::{FrameStatistics, PhaseTimings};
pub use types::{ClearMode, ClipType, RenderGroup};

const MAX_COMMAND_CAPACITY: usize = 65_536;

/// Flags that invalidate the render lists.
const REBUILD_FLAGS: DirtyFlags = DirtyFlags::NODE_ADDED
    .union(DirtyFlags::NODE_REMOVED)
    .union(DirtyFlags::MATERIAL)
    .union(DirtyFlags::OPACITY)
    .union(DirtyFlags::FORCE_UPDATE)
    .union(DirtyFlags::CHILDREN_DO_NOT_OVERLAP)
    .union(DirtyFlags::SUBTREE_BLOCKED);

/// Construction-time options of a [`Renderer`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RendererConfig {
    /// Merge the transparent runs of `CHILDREN_DO_NOT_OVERLAP` children.
    pub reorder_nodes: bool,
    /// Draw opaque nodes with equal batching keys nearest first.
    pub sort_front_to_back: bool,
    pub clear_mode: ClearMode,
    pub clear_color: Color,
    pub device_pixel_ratio: f32,
    /// Initial capacity of the opaque and transparent lists.
    pub initial_list_capacity: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            reorder_nodes: true,
            sort_front_to_back: false,
            clear_mode: ClearMode::default(),
            clear_color: Color::WHITE,
            device_pixel_ratio: 1.0,
            initial_list_capacity: 64,
        }
    }
}

/// Batching renderer.
///
/// Every call to [`Renderer::render`] turns the scene into a [`CommandList`]:
/// the scene is split into an opaque list drawn front to back with depth writes
/// and a transparent list drawn back to front with blending, both ordered so
/// that nodes sharing a program and material are drawn back to back. Only state
/// that differs from the previous draw is recorded.
///
/// Lists are rebuilt only when the scene reports structural changes and are
/// re-sorted only when the rebuild or a clip change requires it.
pub struct Renderer {
    config: RendererConfig,
    device_rect: DeviceRect,
    viewport_rect: DeviceRect,
    projection_matrix: Matrix4,

    lists: RenderLists,
    shader_cache: ShaderCache,
    commands: CommandList,

    needs_rebuild: bool,
    needs_resort: bool,
    emit_state: EmitState,

    frame_statistics: FrameStatistics,
    last_frame_statistics: FrameStatistics,
    #[cfg(feature = "render_metrics")]
    last_phase_timings: PhaseTimings,
}

impl Renderer {
    /// Records the commands of one frame of `scene`.
    ///
    /// Pending scene changes are applied first: accumulated state is brought up
    /// to date and every recorded notification goes through
    /// [`Renderer::node_changed`].
    pub fn render(&mut self, scene: &mut SceneGraph) -> &CommandList {
        #[cfg(feature = "render_metrics")]
        let frame_started_at = std::time::Instant::now();

        self.frame_statistics = FrameStatistics::default();

        if scene.has_pending_changes() {
            scene::update_states(scene);
            for (node, flags) in scene.take_changes() {
                self.node_changed(node, flags);
            }
        }

        #[cfg(feature = "render_metrics")]
        let after_update = std::time::Instant::now();

        if self.needs_rebuild {
            self.lists.rebuild(scene, self.config.reorder_nodes);
            self.needs_rebuild = false;
            self.needs_resort = true;
            self.frame_statistics.rebuilds = 1;
        }

        #[cfg(feature = "render_metrics")]
        let after_build = std::time::Instant::now();

        if self.needs_resort {
            self.sort_opaque_groups(scene);
            self.needs_resort = false;
            self.frame_statistics.resorts = 1;
        }

        #[cfg(feature = "render_metrics")]
        let after_sort = std::time::Instant::now();

        self.emit_frame(scene);

        #[cfg(feature = "render_metrics")]
        {
            let after_emit = std::time::Instant::now();
            self.last_phase_timings = PhaseTimings {
                update: after_update.saturating_duration_since(frame_started_at),
                build: after_build.saturating_duration_since(after_update),
                sort: after_sort.saturating_duration_since(after_build),
                emit: after_emit.saturating_duration_since(after_sort),
                total: after_emit.saturating_duration_since(frame_started_at),
            };
        }

        self.frame_statistics.opaque_nodes = self.lists.opaque_nodes.len() as u32;
        self.frame_statistics.transparent_nodes = self.lists.transparent_nodes.len() as u32;
        debug!(
            "frame: {} draws, {} program switches, {} material changes, {} uniform uploads, {} clip changes",
            self.frame_statistics.draw_calls,
            self.frame_statistics.program_switches,
            self.frame_statistics.material_changes,
            self.frame_statistics.uniform_uploads,
            self.frame_statistics.clip_changes
        );

        self.lists.trim_to_policy();
        self.last_frame_statistics = self.frame_statistics;
        &self.commands
    }

    /// Notifies the renderer that `node` changed.
    ///
    /// Structural, material and opacity changes rebuild the render lists on the
    /// next frame. Clip changes only re-sort them. Matrix and geometry changes
    /// are picked up while emitting and need no list work.
    pub fn node_changed(&mut self, node: NodeId, flags: DirtyFlags) {
        if flags.intersects(REBUILD_FLAGS) {
            trace!("{node} changed ({flags:?}), lists will be rebuilt");
            self.needs_rebuild = true;
        } else if flags.contains(DirtyFlags::CLIP_LIST) {
            trace!("{node} changed clip list, lists will be re-sorted");
            self.needs_resort = true;
        }
    }

    pub fn opaque_nodes(&self) -> &[NodeId] {
        &self.lists.opaque_nodes
    }

    pub fn transparent_nodes(&self) -> &[NodeId] {
        &self.lists.transparent_nodes
    }

    pub fn render_groups(&self) -> &[RenderGroup] {
        &self.lists.render_groups
    }

    /// Next free render order after the last rebuild.
    pub fn current_render_order(&self) -> i32 {
        self.lists.current_render_order
    }

    /// Commands recorded by the last call to [`Renderer::render`].
    pub fn commands(&self) -> &CommandList {
        &self.commands
    }

    /// Program prepared for `material_type`, once a material of that type has
    /// been drawn.
    pub fn program_for(&self, material_type: &MaterialType) -> Option<ProgramId> {
        self.shader_cache.lookup(material_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::materials::FlatColorMaterial;
    use crate::scene::{ClipNode, GeometryNode};

    fn rect_node(color: Color) -> NodeKind {
        NodeKind::Geometry(GeometryNode::new(
            Geometry::rect(euclid::rect(0.0, 0.0, 10.0, 10.0)),
            Arc::new(FlatColorMaterial::new(color)),
        ))
    }

    fn renderer() -> Renderer {
        let mut renderer = Renderer::new(RendererConfig::default());
        renderer.set_device_rect(DeviceRect::new(0, 0, 100, 100));
        renderer.set_projection_matrix_to_rect(euclid::rect(0.0, 0.0, 100.0, 100.0));
        renderer
    }

    #[test]
    fn renderer_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Renderer>();
    }

    #[test]
    fn first_frame_rebuilds_and_sorts() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        scene.append_child(root, rect_node(Color::BLACK));

        let mut renderer = renderer();
        renderer.render(&mut scene);

        let stats = renderer.last_frame_statistics();
        assert_eq!(stats.rebuilds, 1);
        assert_eq!(stats.resorts, 1);
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.opaque_nodes, 1);
    }

    #[test]
    fn unchanged_scene_skips_list_work() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        scene.append_child(root, rect_node(Color::BLACK));

        let mut renderer = renderer();
        let first = renderer.render(&mut scene).clone();
        let second = renderer.render(&mut scene).clone();

        let stats = renderer.last_frame_statistics();
        assert_eq!(stats.rebuilds, 0);
        assert_eq!(stats.resorts, 0);
        assert_eq!(first, second);
    }

    #[test]
    fn matrix_change_neither_rebuilds_nor_resorts() {
        let mut renderer = renderer();
        renderer.needs_rebuild = false;
        renderer.node_changed(NodeId(3), DirtyFlags::MATRIX | DirtyFlags::GEOMETRY);
        assert!(!renderer.needs_rebuild);
        assert!(!renderer.needs_resort);
    }

    #[test]
    fn clip_change_only_resorts() {
        let mut renderer = renderer();
        renderer.needs_rebuild = false;
        renderer.node_changed(NodeId(3), DirtyFlags::CLIP_LIST);
        assert!(!renderer.needs_rebuild);
        assert!(renderer.needs_resort);
    }

    #[test]
    fn every_structural_flag_requests_rebuild() {
        for flag in [
            DirtyFlags::NODE_ADDED,
            DirtyFlags::NODE_REMOVED,
            DirtyFlags::MATERIAL,
            DirtyFlags::OPACITY,
            DirtyFlags::FORCE_UPDATE,
            DirtyFlags::CHILDREN_DO_NOT_OVERLAP,
            DirtyFlags::SUBTREE_BLOCKED,
        ] {
            let mut renderer = renderer();
            renderer.needs_rebuild = false;
            renderer.node_changed(NodeId(1), flag);
            assert!(renderer.needs_rebuild, "{flag:?} should rebuild");
        }
    }

    #[test]
    fn clip_rect_change_resorts_on_next_frame() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        let clip = scene.append_child(
            root,
            NodeKind::Clip(ClipNode::rect(euclid::rect(0.0, 0.0, 50.0, 50.0))),
        );
        scene.append_child(clip, rect_node(Color::BLACK));

        let mut renderer = renderer();
        renderer.render(&mut scene);
        scene.set_clip_rect(clip, euclid::rect(0.0, 0.0, 20.0, 20.0));
        renderer.render(&mut scene);

        assert_eq!(renderer.last_frame_statistics().rebuilds, 0);
        assert!(renderer.commands().iter().any(|command| matches!(
            command,
            GpuCommand::SetScissor(Some(rect)) if *rect == DeviceRect::new(0, 0, 20, 20)
        )));
    }

    #[test]
    fn program_is_prepared_on_first_draw() {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        scene.append_child(root, rect_node(Color::BLACK));

        let mut renderer = renderer();
        assert_eq!(
            renderer.program_for(&crate::materials::FLAT_COLOR_MATERIAL_TYPE),
            None
        );
        renderer.render(&mut scene);
        assert_eq!(
            renderer.program_for(&crate::materials::FLAT_COLOR_MATERIAL_TYPE),
            Some(ProgramId(0))
        );
    }
}
