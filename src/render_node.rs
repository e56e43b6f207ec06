use std::fmt;

use bitflags::bitflags;

use crate::geometry::{DeviceRect, Matrix4, Rect};
use crate::renderer::CommandList;

bitflags! {
    /// GPU state categories a [`RenderNode`] may leave modified. The renderer
    /// restores exactly these after the node has recorded its commands.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct StateFlags: u32 {
        const VIEWPORT = 0x01;
        const STENCIL = 0x02;
        const SCISSOR = 0x04;
        const DEPTH = 0x08;
        const COLOR = 0x10;
        const BLEND = 0x20;
        const CULL = 0x40;
        const RENDER_TARGET = 0x80;
    }
}

/// State the renderer has set up when a render node runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderNodeState {
    pub model_view_matrix: Matrix4,
    pub projection_matrix: Matrix4,
    pub opacity: f32,
    pub depth: f32,
    pub scissor: Option<DeviceRect>,
    pub stencil_reference: Option<u32>,
    pub viewport: DeviceRect,
}

/// Content drawn by its owner instead of through a material.
///
/// Render nodes are always drawn in the back-to-front pass and opaque nodes
/// visited after one are never reordered before it.
pub trait RenderNode: Send + fmt::Debug {
    /// State categories `render` changes.
    fn changed_states(&self) -> StateFlags;

    fn render(&mut self, state: &RenderNodeState, commands: &mut CommandList);

    /// Local bounds, used by the software renderer for dirty tracking.
    fn rect(&self) -> Option<Rect> {
        None
    }

    fn release_resources(&mut self) {}
}
