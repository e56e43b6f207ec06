//! Retained-mode 2D scene graph renderer.
//!
//! A [`SceneGraph`] holds geometry, transform, clip and opacity nodes. The
//! batching [`Renderer`] turns it into a [`CommandList`] of GPU state changes
//! and draw calls, reordering draws so that nodes sharing a program and
//! material are drawn together while the visual result stays that of a
//! back-to-front traversal. [`gpu::WgpuExecutor`] replays a command list with
//! wgpu. [`software::SoftwareRenderer`] paints the same scene on the CPU,
//! repainting only dirty regions.

pub use wgpu;

mod color;
mod geometry;
mod id;
mod material;
mod render_node;
mod renderer;
mod scene;
mod util;

pub mod gpu;
pub mod materials;
pub mod software;

pub use color::Color;
pub use geometry::{
    is_rectilinear, map_rect, DeviceRect, DrawingMode, Geometry, Matrix4, Point, Rect, Size,
    BATCH_VERTEX_THRESHOLD, MAX_BATCH_VERTICES,
};
pub use id::{NodeId, ProgramId, TextureId};
pub use material::{
    material_identity, write_f32_uniforms, write_matrix_uniform, DirtyStates, Material,
    MaterialFlags, MaterialShader, MaterialType, RenderState,
};
pub use render_node::{RenderNode, RenderNodeState, StateFlags};
pub use renderer::{
    ClearMode, ClipType, CommandList, FrameStatistics, GpuCommand, PhaseTimings, RenderGroup,
    Renderer, RendererConfig,
};
pub use scene::{
    update_states, ClipNode, DirtyFlags, GeometryNode, Node, NodeFlags, NodeKind, OpacityNode,
    RenderNodeEntry, SceneGraph, TransformNode, OPACITY_BLOCK_THRESHOLD,
    OPAQUE_MATERIAL_THRESHOLD,
};
pub use util::{normalize_rgba_color, to_logical};
