use std::num::NonZeroU64;
use std::ops::Range;

use ahash::{HashMap, HashMapExt};
use thiserror::Error;
use tracing::{debug, trace};
use wgpu::util::DeviceExt;

use crate::geometry::{DeviceRect, Geometry};
use crate::id::{NodeId, TextureId};
use crate::material::{write_f32_uniforms, write_matrix_uniform, MaterialType};
use crate::renderer::{ClearMode, CommandList, GpuCommand};
use crate::util::trim_vector_if_needed;

use super::pipeline::{
    BindGroupLayouts, PipelineKey, PipelineSource, StencilPipelines, DEPTH_UNIFORM_SIZE,
    MAX_UNIFORM_BLOCK_SIZE,
};

const MAX_VERTEX_SCRATCH_CAPACITY: usize = 4 * 1024 * 1024;
const MAX_INDEX_SCRATCH_CAPACITY: usize = 1024 * 1024;
const MAX_UNIFORM_SCRATCH_CAPACITY: usize = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ExecuteError {
    #[error("no pipeline for material type {material} with {key:?}")]
    MissingPipeline {
        material: &'static str,
        key: PipelineKey,
    },
    #[error("texture {0:?} is not loaded")]
    MissingTexture(TextureId),
    #[error("draw of {node} issued without an active program")]
    NoActiveProgram { node: NodeId },
    #[error("geometry of {node} has {vertices} vertices, more than 16-bit indices can address")]
    VertexOverflow { node: NodeId, vertices: usize },
    #[error("uniform block of {size} bytes exceeds the {max} byte binding")]
    UniformBlockTooLarge { size: usize, max: u64 },
}

/// Work done by one [`WgpuExecutor::execute`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecuteStats {
    pub draw_calls: u32,
    /// Draws folded into the draw call before them.
    pub merged_draws: u32,
    pub stencil_draws: u32,
    pub pipeline_binds: u32,
    pub vertex_bytes: u64,
    pub index_bytes: u64,
    pub uniform_bytes: u64,
}

/// Where a geometry, or a merged run of geometries, landed in the shared
/// buffers.
#[derive(Debug, Clone, PartialEq, Eq)]
struct GeometrySlot {
    /// Byte range in the vertex buffer.
    vertices: Range<u64>,
    /// Index range in the index buffer; `None` draws the vertices in order.
    indices: Option<Range<u32>>,
    vertex_count: u32,
}

/// Fixed-function state accumulated while walking a command list.
#[derive(Debug, Clone, Copy)]
struct ReplayState {
    blend: bool,
    depth_write: bool,
    color_write: bool,
    stencil_reference: Option<u32>,
    material_type: Option<&'static MaterialType>,
}

impl Default for ReplayState {
    fn default() -> Self {
        Self {
            blend: false,
            depth_write: true,
            color_write: true,
            stencil_reference: None,
            material_type: None,
        }
    }
}

impl ReplayState {
    fn apply(&mut self, command: &GpuCommand) {
        match command {
            GpuCommand::SetDepthState { write, .. } => self.depth_write = *write,
            GpuCommand::SetBlend(blend) => self.blend = *blend,
            GpuCommand::SetColorWrite(color_write) => self.color_write = *color_write,
            GpuCommand::SetStencilTest(reference) => self.stencil_reference = *reference,
            GpuCommand::ActivateProgram { material_type, .. } => {
                self.material_type = Some(*material_type)
            }
            GpuCommand::DeactivateProgram(_) => self.material_type = None,
            _ => {}
        }
    }

    fn key(&self, geometry: &Geometry) -> PipelineKey {
        PipelineKey {
            blend: self.blend,
            depth_write: self.depth_write,
            stencil_test: self.stencil_reference.is_some(),
            color_write: self.color_write,
            drawing_mode: geometry.drawing_mode(),
            vertex_stride: geometry.vertex_stride(),
        }
    }
}

fn align_up(value: usize, alignment: usize) -> usize {
    value.div_ceil(alignment) * alignment
}

/// CPU staging of one frame: geometry aggregated into shared buffers and
/// uniform blocks packed at dynamic-offset slots, in command order.
#[derive(Debug, Default)]
struct FrameData {
    vertices: Vec<u8>,
    stencil_vertices: Vec<u8>,
    indices: Vec<u16>,
    uniforms: Vec<u8>,
    /// One entry per `Draw`; `None` for draws merged into an earlier slot.
    draw_slots: Vec<Option<GeometrySlot>>,
    stencil_slots: Vec<GeometrySlot>,
    merge_flags: Vec<bool>,
    uniform_offsets: Vec<u32>,
    clip_uniform_offsets: Vec<u32>,
    depth_offsets: Vec<u32>,
    /// Geometry already appended this frame, keyed by `Arc` address.
    geometry_slots: HashMap<usize, GeometrySlot>,
    color_load: Option<wgpu::Color>,
    clear_mode: ClearMode,
}

impl FrameData {
    fn clear(&mut self) {
        self.vertices.clear();
        self.stencil_vertices.clear();
        self.indices.clear();
        self.uniforms.clear();
        self.draw_slots.clear();
        self.stencil_slots.clear();
        self.merge_flags.clear();
        self.uniform_offsets.clear();
        self.clip_uniform_offsets.clear();
        self.depth_offsets.clear();
        self.geometry_slots.clear();
        self.color_load = None;
        self.clear_mode = ClearMode::empty();
    }

    fn trim_to_policy(&mut self) {
        trim_vector_if_needed(&mut self.vertices, MAX_VERTEX_SCRATCH_CAPACITY);
        trim_vector_if_needed(&mut self.stencil_vertices, MAX_VERTEX_SCRATCH_CAPACITY);
        trim_vector_if_needed(&mut self.indices, MAX_INDEX_SCRATCH_CAPACITY);
        trim_vector_if_needed(&mut self.uniforms, MAX_UNIFORM_SCRATCH_CAPACITY);
    }

    /// Appends a uniform slot holding `bytes` and returns its offset.
    fn push_uniform_slot(&mut self, bytes: &[u8], slot_stride: usize) -> u32 {
        let offset = self.uniforms.len();
        self.uniforms.extend_from_slice(bytes);
        self.uniforms.resize(offset + slot_stride, 0);
        offset as u32
    }

    fn append_geometry(
        vertices: &mut Vec<u8>,
        indices: &mut Vec<u16>,
        vertex_bytes: &[u8],
        geometry_indices: &[u16],
        vertex_count: usize,
    ) -> GeometrySlot {
        vertices.resize(align_up(vertices.len(), wgpu::COPY_BUFFER_ALIGNMENT as usize), 0);
        let start = vertices.len() as u64;
        vertices.extend_from_slice(vertex_bytes);

        let indices_range = (!geometry_indices.is_empty()).then(|| {
            let first = indices.len() as u32;
            indices.extend_from_slice(geometry_indices);
            first..indices.len() as u32
        });

        GeometrySlot {
            vertices: start..vertices.len() as u64,
            indices: indices_range,
            vertex_count: vertex_count as u32,
        }
    }

    /// Opens a merged run with `geometry`, always indexed so later members
    /// can be appended with rebased indices.
    fn start_batch(vertices: &mut Vec<u8>, indices: &mut Vec<u16>, geometry: &Geometry) -> GeometrySlot {
        vertices.resize(align_up(vertices.len(), wgpu::COPY_BUFFER_ALIGNMENT as usize), 0);
        let start = vertices.len() as u64;
        vertices.extend_from_slice(geometry.vertex_data());
        let first = indices.len() as u32;
        geometry.append_rebased_indices(0, indices);

        GeometrySlot {
            vertices: start..vertices.len() as u64,
            indices: Some(first..indices.len() as u32),
            vertex_count: geometry.vertex_count() as u32,
        }
    }

    /// Appends `geometry` to the run in `slot`, which must end both buffers.
    fn extend_batch(
        vertices: &mut Vec<u8>,
        indices: &mut Vec<u16>,
        slot: &mut GeometrySlot,
        geometry: &Geometry,
    ) {
        debug_assert_eq!(slot.vertices.end, vertices.len() as u64);
        vertices.extend_from_slice(geometry.vertex_data());
        geometry.append_rebased_indices(slot.vertex_count as usize, indices);
        slot.vertices.end = vertices.len() as u64;
        let first = slot.indices.as_ref().map(|range| range.start).unwrap_or(0);
        slot.indices = Some(first..indices.len() as u32);
        slot.vertex_count += geometry.vertex_count() as u32;
    }

    /// Walks `commands` once, staging everything the render pass needs and
    /// reporting the material pipeline every draw will use.
    fn collect(
        &mut self,
        commands: &CommandList,
        slot_stride: usize,
        mut on_draw: impl FnMut(&'static MaterialType, &PipelineKey),
    ) -> Result<(), ExecuteError> {
        self.clear();
        // Slot 0 stays zeroed and backs draws recorded without uniforms.
        self.push_uniform_slot(&[], slot_stride);
        commands.merge_flags(&mut self.merge_flags);

        let mut state = ReplayState::default();
        let mut seen_draw = false;
        let mut draw_index = 0;
        let mut open_batch: Option<usize> = None;

        for command in commands {
            state.apply(command);
            match command {
                GpuCommand::Clear { mode, color } if !seen_draw => {
                    self.clear_mode = *mode;
                    if mode.contains(ClearMode::COLOR) {
                        let [r, g, b, a] = color.normalize();
                        self.color_load = Some(wgpu::Color {
                            r: (r * a) as f64,
                            g: (g * a) as f64,
                            b: (b * a) as f64,
                            a: a as f64,
                        });
                    }
                }
                GpuCommand::UploadUniforms { range, .. } => {
                    let bytes = commands.uniform_bytes(range.clone());
                    if bytes.len() as u64 > MAX_UNIFORM_BLOCK_SIZE {
                        return Err(ExecuteError::UniformBlockTooLarge {
                            size: bytes.len(),
                            max: MAX_UNIFORM_BLOCK_SIZE,
                        });
                    }
                    let offset = self.push_uniform_slot(bytes, slot_stride);
                    self.uniform_offsets.push(offset);
                }
                GpuCommand::SetDepth(depth) => {
                    let mut block = [0u8; DEPTH_UNIFORM_SIZE as usize];
                    write_f32_uniforms(&mut block, 0, &[*depth]);
                    let offset = self.push_uniform_slot(&block, slot_stride);
                    self.depth_offsets.push(offset);
                }
                GpuCommand::DrawStencilClip {
                    clip,
                    geometry,
                    matrix,
                    ..
                } => {
                    let mut block = [0u8; 64];
                    write_matrix_uniform(&mut block, 0, matrix);
                    let offset = self.push_uniform_slot(&block, slot_stride);
                    self.clip_uniform_offsets.push(offset);

                    check_vertex_count(*clip, geometry)?;
                    let positions: Vec<[f32; 2]> = geometry.positions().collect();
                    let slot = Self::append_geometry(
                        &mut self.stencil_vertices,
                        &mut self.indices,
                        bytemuck::cast_slice(&positions),
                        geometry.indices(),
                        geometry.vertex_count(),
                    );
                    self.stencil_slots.push(slot);
                }
                GpuCommand::Draw { node, geometry } => {
                    seen_draw = true;
                    let material_type = state
                        .material_type
                        .ok_or(ExecuteError::NoActiveProgram { node: *node })?;
                    check_vertex_count(*node, geometry)?;
                    on_draw(material_type, &state.key(geometry));

                    let merges = self.merge_flags.get(draw_index).copied().unwrap_or(false);
                    let starts_batch = self.merge_flags.get(draw_index + 1).copied().unwrap_or(false);
                    draw_index += 1;

                    if let (true, Some(batch)) = (merges, open_batch) {
                        if let Some(Some(slot)) = self.draw_slots.get_mut(batch) {
                            Self::extend_batch(&mut self.vertices, &mut self.indices, slot, geometry);
                        }
                        self.draw_slots.push(None);
                        continue;
                    }

                    let slot = if starts_batch {
                        open_batch = Some(self.draw_slots.len());
                        Self::start_batch(&mut self.vertices, &mut self.indices, geometry)
                    } else {
                        open_batch = None;
                        let address = std::sync::Arc::as_ptr(geometry) as usize;
                        match self.geometry_slots.get(&address) {
                            Some(slot) => slot.clone(),
                            None => {
                                let slot = Self::append_geometry(
                                    &mut self.vertices,
                                    &mut self.indices,
                                    geometry.vertex_data(),
                                    geometry.indices(),
                                    geometry.vertex_count(),
                                );
                                self.geometry_slots.insert(address, slot.clone());
                                slot
                            }
                        }
                    };
                    self.draw_slots.push(Some(slot));
                }
                _ => {}
            }
        }

        // Buffer writes must be a multiple of four bytes.
        self.vertices.resize(align_up(self.vertices.len(), 4), 0);
        self.stencil_vertices
            .resize(align_up(self.stencil_vertices.len(), 4), 0);
        if self.indices.len() % 2 == 1 {
            self.indices.push(0);
        }
        Ok(())
    }
}

fn check_vertex_count(node: NodeId, geometry: &Geometry) -> Result<(), ExecuteError> {
    let vertices = geometry.vertex_count();
    if !geometry.indices().is_empty() && vertices > u16::MAX as usize + 1 {
        return Err(ExecuteError::VertexOverflow { node, vertices });
    }
    Ok(())
}

/// Reuses `buffer` when it is large enough, otherwise replaces it. Returns
/// whether a new buffer was created.
fn upsert_gpu_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &mut Option<wgpu::Buffer>,
    label: &'static str,
    bytes: &[u8],
    usage: wgpu::BufferUsages,
) -> bool {
    if bytes.is_empty() {
        return false;
    }
    let should_reallocate = buffer
        .as_ref()
        .map(|existing| existing.size() < bytes.len() as u64)
        .unwrap_or(true);

    if should_reallocate {
        *buffer = Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytes,
            usage: usage | wgpu::BufferUsages::COPY_DST,
        }));
    } else if let Some(existing_buffer) = buffer.as_ref() {
        queue.write_buffer(existing_buffer, 0, bytes);
    }
    should_reallocate
}

fn clamp_to_target(rect: DeviceRect, target_size: (u32, u32)) -> DeviceRect {
    rect.intersect(&DeviceRect::from_size(target_size.0, target_size.1))
}

/// Replays [`CommandList`]s into a wgpu render pass.
///
/// Geometry of a frame is aggregated into one vertex and one index buffer and
/// every uniform block gets a slot of a single dynamic-offset uniform buffer,
/// so the pass itself only binds offsets and issues draws. Runs of draws that
/// [`CommandList::merge_flags`] marks mergeable share one indexed draw call.
#[derive(Debug)]
pub struct WgpuExecutor {
    layouts: BindGroupLayouts,
    stencil_pipelines: StencilPipelines,
    uniform_slot_stride: usize,
    frame: FrameData,

    vertex_buffer: Option<wgpu::Buffer>,
    stencil_vertex_buffer: Option<wgpu::Buffer>,
    index_buffer: Option<wgpu::Buffer>,
    uniform_buffer: Option<wgpu::Buffer>,
    uniform_bind_group: Option<wgpu::BindGroup>,
    depth_bind_group: Option<wgpu::BindGroup>,
}

impl WgpuExecutor {
    pub fn new(device: &wgpu::Device, color_format: wgpu::TextureFormat) -> Self {
        let layouts = BindGroupLayouts::new(device);
        let stencil_pipelines = StencilPipelines::new(device, &layouts, color_format);
        let alignment = device.limits().min_uniform_buffer_offset_alignment as usize;
        let uniform_slot_stride = align_up(MAX_UNIFORM_BLOCK_SIZE as usize, alignment);
        debug!("uniform slots are {uniform_slot_stride} bytes apart");

        Self {
            layouts,
            stencil_pipelines,
            uniform_slot_stride,
            frame: FrameData::default(),
            vertex_buffer: None,
            stencil_vertex_buffer: None,
            index_buffer: None,
            uniform_buffer: None,
            uniform_bind_group: None,
            depth_bind_group: None,
        }
    }

    pub fn layouts(&self) -> &BindGroupLayouts {
        &self.layouts
    }

    /// Creates a depth/stencil texture matching what the pipelines expect.
    pub fn create_depth_stencil_texture(device: &wgpu::Device, size: (u32, u32)) -> wgpu::Texture {
        device.create_texture(&wgpu::TextureDescriptor {
            label: Some("depth_stencil_texture"),
            size: wgpu::Extent3d {
                width: size.0.max(1),
                height: size.1.max(1),
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: super::pipeline::DEPTH_STENCIL_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        })
    }

    fn upload(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        upsert_gpu_buffer(
            device,
            queue,
            &mut self.vertex_buffer,
            "vertex_buffer",
            &self.frame.vertices,
            wgpu::BufferUsages::VERTEX,
        );
        upsert_gpu_buffer(
            device,
            queue,
            &mut self.stencil_vertex_buffer,
            "stencil_vertex_buffer",
            &self.frame.stencil_vertices,
            wgpu::BufferUsages::VERTEX,
        );
        upsert_gpu_buffer(
            device,
            queue,
            &mut self.index_buffer,
            "index_buffer",
            bytemuck::cast_slice(&self.frame.indices),
            wgpu::BufferUsages::INDEX,
        );
        let reallocated = upsert_gpu_buffer(
            device,
            queue,
            &mut self.uniform_buffer,
            "uniform_buffer",
            &self.frame.uniforms,
            wgpu::BufferUsages::UNIFORM,
        );

        if reallocated || self.uniform_bind_group.is_none() {
            if let Some(buffer) = self.uniform_buffer.as_ref() {
                self.uniform_bind_group = Some(create_window_bind_group(
                    device,
                    &self.layouts.uniforms,
                    buffer,
                    MAX_UNIFORM_BLOCK_SIZE,
                    "material_uniform_bind_group",
                ));
                self.depth_bind_group = Some(create_window_bind_group(
                    device,
                    &self.layouts.depth,
                    buffer,
                    DEPTH_UNIFORM_SIZE,
                    "depth_uniform_bind_group",
                ));
            }
        }
    }

    /// Records `commands` into one render pass drawing to `target`.
    ///
    /// Material pipelines are prepared through `source` before the pass
    /// begins. A leading `Clear` command becomes the load operations of the
    /// attachments.
    #[allow(clippy::too_many_arguments)]
    pub fn execute(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        target: &wgpu::TextureView,
        depth_stencil: &wgpu::TextureView,
        target_size: (u32, u32),
        commands: &CommandList,
        source: &mut dyn PipelineSource,
    ) -> Result<ExecuteStats, ExecuteError> {
        let layouts = &self.layouts;
        self.frame
            .collect(commands, self.uniform_slot_stride, |material_type, key| {
                source.prepare_pipeline(device, layouts, material_type, key)
            })?;
        self.upload(device, queue);

        let mut stats = ExecuteStats {
            vertex_bytes: (self.frame.vertices.len() + self.frame.stencil_vertices.len()) as u64,
            index_bytes: (self.frame.indices.len() * 2) as u64,
            uniform_bytes: self.frame.uniforms.len() as u64,
            ..ExecuteStats::default()
        };

        let clear_mode = self.frame.clear_mode;
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("scene_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: match self.frame.color_load {
                        Some(color) => wgpu::LoadOp::Clear(color),
                        None => wgpu::LoadOp::Load,
                    },
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: depth_stencil,
                depth_ops: Some(wgpu::Operations {
                    load: if clear_mode.contains(ClearMode::DEPTH) {
                        wgpu::LoadOp::Clear(1.0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: Some(wgpu::Operations {
                    load: if clear_mode.contains(ClearMode::STENCIL) {
                        wgpu::LoadOp::Clear(0)
                    } else {
                        wgpu::LoadOp::Load
                    },
                    store: wgpu::StoreOp::Store,
                }),
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        if let Some(index_buffer) = self.index_buffer.as_ref() {
            pass.set_index_buffer(index_buffer.slice(..), wgpu::IndexFormat::Uint16);
        }

        let full_target = DeviceRect::from_size(target_size.0, target_size.1);
        let mut state = ReplayState::default();
        let mut bound_pipeline: Option<(usize, PipelineKey)> = None;
        let mut texture: Option<TextureId> = None;
        let mut uniform_offset = 0;
        let mut depth_offset = 0;
        let mut uniform_offsets = self.frame.uniform_offsets.iter();
        let mut clip_uniform_offsets = self.frame.clip_uniform_offsets.iter();
        let mut depth_offsets = self.frame.depth_offsets.iter();
        let mut draw_slots = self.frame.draw_slots.iter();
        let mut stencil_slots = self.frame.stencil_slots.iter();

        for command in commands {
            state.apply(command);
            match command {
                GpuCommand::SetViewport(rect) => {
                    let rect = clamp_to_target(*rect, target_size);
                    if !rect.is_empty() {
                        pass.set_viewport(
                            rect.x as f32,
                            rect.y as f32,
                            rect.width as f32,
                            rect.height as f32,
                            0.0,
                            1.0,
                        );
                    }
                }
                GpuCommand::SetScissor(rect) => {
                    let rect = rect.unwrap_or(full_target).intersect(&full_target);
                    pass.set_scissor_rect(
                        rect.x.max(0) as u32,
                        rect.y.max(0) as u32,
                        rect.width.max(0) as u32,
                        rect.height.max(0) as u32,
                    );
                }
                GpuCommand::SetStencilTest(Some(reference)) => {
                    pass.set_stencil_reference(*reference);
                }
                GpuCommand::ActivateProgram { .. } => texture = None,
                GpuCommand::ClearStencil => {
                    pass.set_pipeline(&self.stencil_pipelines.reset);
                    pass.set_stencil_reference(0);
                    pass.draw(0..3, 0..1);
                    bound_pipeline = None;
                    stats.stencil_draws += 1;
                }
                GpuCommand::DrawStencilClip { reference, .. } => {
                    let (Some(slot), Some(offset)) = (stencil_slots.next(), clip_uniform_offsets.next())
                    else {
                        continue;
                    };
                    let (Some(buffer), Some(bind_group)) = (
                        self.stencil_vertex_buffer.as_ref(),
                        self.uniform_bind_group.as_ref(),
                    ) else {
                        continue;
                    };
                    pass.set_pipeline(&self.stencil_pipelines.clip);
                    pass.set_bind_group(0, bind_group, &[*offset]);
                    pass.set_vertex_buffer(0, buffer.slice(slot.vertices.clone()));
                    pass.set_stencil_reference(*reference);
                    draw_slot(&mut pass, slot);
                    bound_pipeline = None;
                    stats.stencil_draws += 1;
                }
                GpuCommand::UploadUniforms { .. } => {
                    uniform_offset = uniform_offsets.next().copied().unwrap_or(0);
                }
                GpuCommand::SetDepth(_) => {
                    depth_offset = depth_offsets.next().copied().unwrap_or(0);
                }
                GpuCommand::BindTexture { texture: bound, .. } => texture = Some(*bound),
                GpuCommand::Draw { node, geometry } => {
                    let Some(slot) = draw_slots.next() else {
                        continue;
                    };
                    let Some(slot) = slot else {
                        stats.merged_draws += 1;
                        continue;
                    };
                    let material_type = state
                        .material_type
                        .ok_or(ExecuteError::NoActiveProgram { node: *node })?;
                    let key = state.key(geometry);
                    let pipeline = source.pipeline(material_type, &key).ok_or(
                        ExecuteError::MissingPipeline {
                            material: material_type.name(),
                            key,
                        },
                    )?;

                    let pipeline_id = (material_type.identity(), key);
                    if bound_pipeline != Some(pipeline_id) {
                        pass.set_pipeline(pipeline);
                        bound_pipeline = Some(pipeline_id);
                        stats.pipeline_binds += 1;
                        if let Some(reference) = state.stencil_reference {
                            pass.set_stencil_reference(reference);
                        }
                    }

                    let (Some(vertex_buffer), Some(uniforms), Some(depth)) = (
                        self.vertex_buffer.as_ref(),
                        self.uniform_bind_group.as_ref(),
                        self.depth_bind_group.as_ref(),
                    ) else {
                        continue;
                    };
                    pass.set_bind_group(0, uniforms, &[uniform_offset]);
                    pass.set_bind_group(1, depth, &[depth_offset]);
                    if let Some(texture) = texture {
                        let bind_group = source
                            .texture_bind_group(texture)
                            .ok_or(ExecuteError::MissingTexture(texture))?;
                        pass.set_bind_group(2, bind_group, &[]);
                    }
                    pass.set_vertex_buffer(0, vertex_buffer.slice(slot.vertices.clone()));
                    draw_slot(&mut pass, slot);
                    stats.draw_calls += 1;
                }
                GpuCommand::RenderNodeCall(node) => trace!("replaying commands of render node {node}"),
                _ => {}
            }
        }
        drop(pass);

        self.frame.trim_to_policy();
        trace!("executed frame: {stats:?}");
        Ok(stats)
    }
}

fn draw_slot(pass: &mut wgpu::RenderPass<'_>, slot: &GeometrySlot) {
    match &slot.indices {
        Some(indices) => pass.draw_indexed(indices.clone(), 0, 0..1),
        None => pass.draw(0..slot.vertex_count, 0..1),
    }
}

fn create_window_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    buffer: &wgpu::Buffer,
    size: u64,
    label: &'static str,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer,
                offset: 0,
                size: NonZeroU64::new(size),
            }),
        }],
        label: Some(label),
    })
}
