use std::ptr;

use ahash::{HashMap, HashMapExt};
use tracing::{debug, warn};

use crate::geometry::DrawingMode;
use crate::id::TextureId;
use crate::material::MaterialType;
use crate::materials::{FLAT_COLOR_MATERIAL_TYPE, TEXTURE_MATERIAL_TYPE};

/// Depth/stencil attachment format every pipeline is built against.
pub const DEPTH_STENCIL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth24PlusStencil8;

/// Size of the window into the uniform buffer bound for one material draw.
pub const MAX_UNIFORM_BLOCK_SIZE: u64 = 256;

/// Size of the window bound for the depth of one draw.
pub const DEPTH_UNIFORM_SIZE: u64 = 16;

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x2];
const TEXTURED_ATTRIBUTES: [wgpu::VertexAttribute; 2] =
    wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

/// Fixed-function state a material pipeline is specialised for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub blend: bool,
    pub depth_write: bool,
    pub stencil_test: bool,
    pub color_write: bool,
    pub drawing_mode: DrawingMode,
    pub vertex_stride: u32,
}

/// Resolves material programs to wgpu pipelines.
///
/// Every pipeline must use [`BindGroupLayouts::pipeline_layout`] (or a layout
/// with the same first two groups): group 0 holds the material uniform block,
/// group 1 the depth of the draw, group 2 the sampled texture when the material
/// binds one. Vertex buffer 0 carries the geometry's vertices.
pub trait PipelineSource {
    /// Called for every key a frame uses before its render pass starts.
    fn prepare_pipeline(
        &mut self,
        device: &wgpu::Device,
        layouts: &BindGroupLayouts,
        material_type: &'static MaterialType,
        key: &PipelineKey,
    );

    fn pipeline(&self, material_type: &MaterialType, key: &PipelineKey)
        -> Option<&wgpu::RenderPipeline>;

    fn texture_bind_group(&self, _texture: TextureId) -> Option<&wgpu::BindGroup> {
        None
    }
}

/// Bind group layouts shared by the executor and every material pipeline.
#[derive(Debug)]
pub struct BindGroupLayouts {
    pub uniforms: wgpu::BindGroupLayout,
    pub depth: wgpu::BindGroupLayout,
    pub texture: wgpu::BindGroupLayout,
}

impl BindGroupLayouts {
    pub fn new(device: &wgpu::Device) -> Self {
        Self {
            uniforms: create_dynamic_uniform_bind_group_layout(
                device,
                "material_uniform_bind_group_layout",
                wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
            ),
            depth: create_dynamic_uniform_bind_group_layout(
                device,
                "depth_uniform_bind_group_layout",
                wgpu::ShaderStages::VERTEX,
            ),
            texture: create_texture_bind_group_layout(device),
        }
    }

    /// Layout with the uniform and depth groups, plus the texture group when
    /// `sampled` is set.
    pub fn pipeline_layout(&self, device: &wgpu::Device, sampled: bool) -> wgpu::PipelineLayout {
        let with_texture = [&self.uniforms, &self.depth, &self.texture];
        let bind_group_layouts: &[&wgpu::BindGroupLayout] = if sampled {
            &with_texture
        } else {
            &with_texture[..2]
        };
        device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("material_pipeline_layout"),
            bind_group_layouts,
            push_constant_ranges: &[],
        })
    }
}

fn create_dynamic_uniform_bind_group_layout(
    device: &wgpu::Device,
    label: &'static str,
    visibility: wgpu::ShaderStages,
) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some(label),
        entries: &[wgpu::BindGroupLayoutEntry {
            binding: 0,
            visibility,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: None,
            },
            count: None,
        }],
    })
}

fn create_texture_bind_group_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("texture_bind_group_layout"),
        entries: &[
            wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Texture {
                    multisampled: false,
                    view_dimension: wgpu::TextureViewDimension::D2,
                    sample_type: wgpu::TextureSampleType::Float { filterable: true },
                },
                count: None,
            },
            wgpu::BindGroupLayoutEntry {
                binding: 1,
                visibility: wgpu::ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                count: None,
            },
        ],
    })
}

pub fn primitive_topology(drawing_mode: DrawingMode) -> wgpu::PrimitiveTopology {
    match drawing_mode {
        DrawingMode::Triangles => wgpu::PrimitiveTopology::TriangleList,
        DrawingMode::TriangleStrip => wgpu::PrimitiveTopology::TriangleStrip,
        DrawingMode::Lines => wgpu::PrimitiveTopology::LineList,
        DrawingMode::LineStrip => wgpu::PrimitiveTopology::LineStrip,
        DrawingMode::Points => wgpu::PrimitiveTopology::PointList,
    }
}

pub fn primitive_state(drawing_mode: DrawingMode) -> wgpu::PrimitiveState {
    let topology = primitive_topology(drawing_mode);
    wgpu::PrimitiveState {
        topology,
        strip_index_format: topology
            .is_strip()
            .then_some(wgpu::IndexFormat::Uint16),
        cull_mode: None,
        ..Default::default()
    }
}

/// Premultiplied source-over.
pub fn premultiplied_blend_state() -> wgpu::BlendState {
    wgpu::BlendState {
        color: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
        alpha: wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::OneMinusSrcAlpha,
            operation: wgpu::BlendOperation::Add,
        },
    }
}

/// Stencil state of material draws: pass only where the stencil value equals
/// the reference, never write.
fn create_equal_test_stencil_state() -> wgpu::StencilState {
    let face_state = wgpu::StencilFaceState {
        compare: wgpu::CompareFunction::Equal,
        fail_op: wgpu::StencilOperation::Keep,
        depth_fail_op: wgpu::StencilOperation::Keep,
        pass_op: wgpu::StencilOperation::Keep,
    };

    wgpu::StencilState {
        front: face_state,
        back: face_state,
        read_mask: 0xff,
        write_mask: 0,
    }
}

/// Stencil state of clip shapes: increment where the value equals the number
/// of shapes drawn so far.
fn create_equal_increment_stencil_state() -> wgpu::StencilState {
    let face_state = wgpu::StencilFaceState {
        compare: wgpu::CompareFunction::Equal,
        fail_op: wgpu::StencilOperation::Keep,
        depth_fail_op: wgpu::StencilOperation::Keep,
        pass_op: wgpu::StencilOperation::IncrementClamp,
    };

    wgpu::StencilState {
        front: face_state,
        back: face_state,
        read_mask: 0xff,
        write_mask: 0xff,
    }
}

/// Stencil state of the reset pass: zero every covered sample.
fn create_always_zero_stencil_state() -> wgpu::StencilState {
    let face_state = wgpu::StencilFaceState {
        compare: wgpu::CompareFunction::Always,
        fail_op: wgpu::StencilOperation::Zero,
        depth_fail_op: wgpu::StencilOperation::Zero,
        pass_op: wgpu::StencilOperation::Zero,
    };

    wgpu::StencilState {
        front: face_state,
        back: face_state,
        read_mask: 0xff,
        write_mask: 0xff,
    }
}

/// Depth/stencil state of a material draw: depth tested with `Less` against a
/// buffer cleared to 1.0.
pub fn material_depth_stencil_state(key: &PipelineKey) -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: DEPTH_STENCIL_FORMAT,
        depth_write_enabled: key.depth_write,
        depth_compare: wgpu::CompareFunction::Less,
        stencil: if key.stencil_test {
            create_equal_test_stencil_state()
        } else {
            wgpu::StencilState::default()
        },
        bias: wgpu::DepthBiasState::default(),
    }
}

fn stencil_only_depth_stencil_state(stencil: wgpu::StencilState) -> wgpu::DepthStencilState {
    wgpu::DepthStencilState {
        format: DEPTH_STENCIL_FORMAT,
        depth_write_enabled: false,
        depth_compare: wgpu::CompareFunction::Always,
        stencil,
        bias: wgpu::DepthBiasState::default(),
    }
}

const STENCIL_SHADER: &str = r#"
struct ClipUniforms {
    matrix: mat4x4<f32>,
};

@group(0) @binding(0) var<uniform> clip: ClipUniforms;

@vertex
fn vs_clip(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return clip.matrix * vec4<f32>(position, 0.0, 1.0);
}

@vertex
fn vs_fullscreen(@builtin(vertex_index) index: u32) -> @builtin(position) vec4<f32> {
    let x = f32((index << 1u) & 2u) * 2.0 - 1.0;
    let y = f32(index & 2u) * 2.0 - 1.0;
    return vec4<f32>(x, y, 0.0, 1.0);
}

@fragment
fn fs_none() -> @location(0) vec4<f32> {
    return vec4<f32>(0.0);
}
"#;

/// Pipelines the executor uses for stencil clipping.
#[derive(Debug)]
pub struct StencilPipelines {
    pub clip: wgpu::RenderPipeline,
    pub reset: wgpu::RenderPipeline,
}

impl StencilPipelines {
    pub fn new(
        device: &wgpu::Device,
        layouts: &BindGroupLayouts,
        color_format: wgpu::TextureFormat,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("stencil_shader"),
            source: wgpu::ShaderSource::Wgsl(STENCIL_SHADER.into()),
        });
        let no_color = [Some(wgpu::ColorTargetState {
            format: color_format,
            blend: None,
            write_mask: wgpu::ColorWrites::empty(),
        })];

        let clip_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("stencil_clip_pipeline_layout"),
            bind_group_layouts: &[&layouts.uniforms],
            push_constant_ranges: &[],
        });
        let clip = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("stencil_clip_pipeline"),
            layout: Some(&clip_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_clip"),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: 8,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &POSITION_ATTRIBUTES,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_none"),
                compilation_options: Default::default(),
                targets: &no_color,
            }),
            primitive: primitive_state(DrawingMode::Triangles),
            depth_stencil: Some(stencil_only_depth_stencil_state(
                create_equal_increment_stencil_state(),
            )),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        let reset_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("stencil_reset_pipeline_layout"),
            bind_group_layouts: &[],
            push_constant_ranges: &[],
        });
        let reset = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("stencil_reset_pipeline"),
            layout: Some(&reset_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_fullscreen"),
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_none"),
                compilation_options: Default::default(),
                targets: &no_color,
            }),
            primitive: primitive_state(DrawingMode::Triangles),
            depth_stencil: Some(stencil_only_depth_stencil_state(
                create_always_zero_stencil_state(),
            )),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });

        Self { clip, reset }
    }
}

const BUILTIN_SHADER: &str = r#"
struct MaterialUniforms {
    matrix: mat4x4<f32>,
    color: vec4<f32>,
};

struct DepthUniforms {
    value: vec4<f32>,
};

@group(0) @binding(0) var<uniform> material: MaterialUniforms;
@group(1) @binding(0) var<uniform> depth: DepthUniforms;

fn to_clip(position: vec2<f32>) -> vec4<f32> {
    var clip = material.matrix * vec4<f32>(position, 0.0, 1.0);
    clip.z = depth.value.x * clip.w;
    return clip;
}

@vertex
fn vs_flat(@location(0) position: vec2<f32>) -> @builtin(position) vec4<f32> {
    return to_clip(position);
}

@fragment
fn fs_flat() -> @location(0) vec4<f32> {
    return material.color;
}

@group(2) @binding(0) var texture_view: texture_2d<f32>;
@group(2) @binding(1) var texture_sampler: sampler;

struct TexturedVertex {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_texture(@location(0) position: vec2<f32>, @location(1) uv: vec2<f32>) -> TexturedVertex {
    var out: TexturedVertex;
    out.position = to_clip(position);
    out.uv = uv;
    return out;
}

@fragment
fn fs_texture(in: TexturedVertex) -> @location(0) vec4<f32> {
    return textureSample(texture_view, texture_sampler, in.uv) * material.color.x;
}
"#;

/// GPU side of a texture registered with [`BuiltinPipelines`].
#[derive(Debug)]
struct TextureEntry {
    texture: wgpu::Texture,
    bind_group: wgpu::BindGroup,
}

/// Pipelines for the built-in flat color and texture materials, plus the
/// textures they sample.
#[derive(Debug)]
pub struct BuiltinPipelines {
    color_format: wgpu::TextureFormat,
    shader: wgpu::ShaderModule,
    flat_layout: wgpu::PipelineLayout,
    texture_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    pipelines: HashMap<(usize, PipelineKey), wgpu::RenderPipeline>,
    textures: HashMap<TextureId, TextureEntry>,
}

impl BuiltinPipelines {
    pub fn new(
        device: &wgpu::Device,
        layouts: &BindGroupLayouts,
        color_format: wgpu::TextureFormat,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("builtin_material_shader"),
            source: wgpu::ShaderSource::Wgsl(BUILTIN_SHADER.into()),
        });
        Self {
            color_format,
            shader,
            flat_layout: layouts.pipeline_layout(device, false),
            texture_layout: layouts.pipeline_layout(device, true),
            sampler: create_sampler(device),
            pipelines: HashMap::new(),
            textures: HashMap::new(),
        }
    }

    /// Allocates an RGBA8 texture holding premultiplied `data` and makes it
    /// available to [`TextureMaterial`](crate::materials::TextureMaterial)s
    /// referencing `texture_id`. Replaces any texture registered under the same
    /// id.
    pub fn upload_texture(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        layouts: &BindGroupLayouts,
        texture_id: TextureId,
        texture_dimensions: (u32, u32),
        data: &[u8],
    ) {
        let texture_extent = wgpu::Extent3d {
            width: texture_dimensions.0,
            height: texture_dimensions.1,
            depth_or_array_layers: 1,
        };
        let texture = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("material_texture"),
            size: texture_extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8UnormSrgb,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            data,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(4 * texture_dimensions.0),
                rows_per_image: Some(texture_dimensions.1),
            },
            texture_extent,
        );

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            layout: &layouts.texture,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
            label: Some("material_texture_bind_group"),
        });

        debug!("uploaded texture {texture_id:?} ({}x{})", texture_dimensions.0, texture_dimensions.1);
        self.textures
            .insert(texture_id, TextureEntry { texture, bind_group });
    }

    pub fn remove_texture(&mut self, texture_id: TextureId) {
        if let Some(entry) = self.textures.remove(&texture_id) {
            entry.texture.destroy();
        }
    }

    pub fn is_texture_loaded(&self, texture_id: TextureId) -> bool {
        self.textures.contains_key(&texture_id)
    }

    fn create_pipeline(
        &self,
        device: &wgpu::Device,
        sampled: bool,
        key: &PipelineKey,
    ) -> wgpu::RenderPipeline {
        let (vertex_entry, fragment_entry, layout, attributes): (_, _, _, &[wgpu::VertexAttribute]) =
            if sampled {
                (
                    "vs_texture",
                    "fs_texture",
                    &self.texture_layout,
                    &TEXTURED_ATTRIBUTES,
                )
            } else {
                (
                    "vs_flat",
                    "fs_flat",
                    &self.flat_layout,
                    &POSITION_ATTRIBUTES,
                )
            };

        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(if sampled {
                "texture_material_pipeline"
            } else {
                "flat_color_material_pipeline"
            }),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: &self.shader,
                entry_point: Some(vertex_entry),
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: key.vertex_stride as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.shader,
                entry_point: Some(fragment_entry),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.color_format,
                    blend: key.blend.then(premultiplied_blend_state),
                    write_mask: if key.color_write {
                        wgpu::ColorWrites::ALL
                    } else {
                        wgpu::ColorWrites::empty()
                    },
                })],
            }),
            primitive: primitive_state(key.drawing_mode),
            depth_stencil: Some(material_depth_stencil_state(key)),
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    }
}

impl PipelineSource for BuiltinPipelines {
    fn prepare_pipeline(
        &mut self,
        device: &wgpu::Device,
        _layouts: &BindGroupLayouts,
        material_type: &'static MaterialType,
        key: &PipelineKey,
    ) {
        let cache_key = (material_type.identity(), *key);
        if self.pipelines.contains_key(&cache_key) {
            return;
        }

        let sampled = if ptr::eq(material_type, &FLAT_COLOR_MATERIAL_TYPE) {
            false
        } else if ptr::eq(material_type, &TEXTURE_MATERIAL_TYPE) {
            true
        } else {
            warn!("no built-in pipeline for material type {}", material_type.name());
            return;
        };

        debug!("creating pipeline for {} with {key:?}", material_type.name());
        let pipeline = self.create_pipeline(device, sampled, key);
        self.pipelines.insert(cache_key, pipeline);
    }

    fn pipeline(
        &self,
        material_type: &MaterialType,
        key: &PipelineKey,
    ) -> Option<&wgpu::RenderPipeline> {
        self.pipelines.get(&(material_type.identity(), *key))
    }

    fn texture_bind_group(&self, texture: TextureId) -> Option<&wgpu::BindGroup> {
        self.textures.get(&texture).map(|entry| &entry.bind_group)
    }
}

fn create_sampler(device: &wgpu::Device) -> wgpu::Sampler {
    device.create_sampler(&wgpu::SamplerDescriptor {
        address_mode_u: wgpu::AddressMode::ClampToEdge,
        address_mode_v: wgpu::AddressMode::ClampToEdge,
        address_mode_w: wgpu::AddressMode::ClampToEdge,
        mag_filter: wgpu::FilterMode::Linear,
        min_filter: wgpu::FilterMode::Linear,
        mipmap_filter: wgpu::FilterMode::Linear,
        ..Default::default()
    })
}
