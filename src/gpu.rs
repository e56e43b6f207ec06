//! wgpu backend: replays a [`CommandList`](crate::CommandList) into a render
//! pass.
//!
//! The executor owns the shared buffers and the stencil clip pipelines.
//! Material pipelines come from a [`PipelineSource`]; [`BuiltinPipelines`]
//! covers the materials shipped in [`crate::materials`].

mod executor;
mod pipeline;

pub use executor::{ExecuteError, ExecuteStats, WgpuExecutor};
pub use pipeline::{
    BindGroupLayouts, BuiltinPipelines, PipelineKey, PipelineSource, StencilPipelines,
    DEPTH_STENCIL_FORMAT, DEPTH_UNIFORM_SIZE, MAX_UNIFORM_BLOCK_SIZE,
};
