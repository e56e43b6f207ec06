//! Materials shipped with the crate. Their WGSL programs live in
//! [`BuiltinPipelines`](crate::gpu::BuiltinPipelines).

use std::any::Any;
use std::cmp::Ordering;

use crate::color::Color;
use crate::id::TextureId;
use crate::material::{
    write_f32_uniforms, write_matrix_uniform, Material, MaterialFlags, MaterialShader,
    MaterialType, RenderState,
};

pub static FLAT_COLOR_MATERIAL_TYPE: MaterialType = MaterialType::new("flat-color");
pub static TEXTURE_MATERIAL_TYPE: MaterialType = MaterialType::new("texture");

/// Size of the uniform block shared by both built-in programs: a `mat4x4<f32>`
/// followed by one `vec4<f32>`.
pub const BUILTIN_UNIFORM_BLOCK_SIZE: usize = 80;

/// Fills geometry with a single color. Blends only when the color is translucent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlatColorMaterial {
    color: Color,
}

impl FlatColorMaterial {
    pub fn new(color: Color) -> Self {
        Self { color }
    }

    pub fn color(&self) -> Color {
        self.color
    }
}

impl Material for FlatColorMaterial {
    fn material_type(&self) -> &'static MaterialType {
        &FLAT_COLOR_MATERIAL_TYPE
    }

    fn flags(&self) -> MaterialFlags {
        if self.color.is_opaque() {
            MaterialFlags::empty()
        } else {
            MaterialFlags::BLENDING
        }
    }

    fn compare(&self, other: &dyn Material) -> Ordering {
        match other.downcast_ref::<FlatColorMaterial>() {
            Some(other) => self.color.0.cmp(&other.color.0),
            None => Ordering::Equal,
        }
    }

    fn create_shader(&self) -> Box<dyn MaterialShader> {
        Box::new(FlatColorShader)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct FlatColorShader;

impl MaterialShader for FlatColorShader {
    fn uniform_block_size(&self) -> usize {
        BUILTIN_UNIFORM_BLOCK_SIZE
    }

    fn update_state(
        &mut self,
        state: &RenderState,
        uniforms: &mut [u8],
        new_material: &dyn Material,
        old_material: Option<&dyn Material>,
    ) -> bool {
        let Some(material) = new_material.downcast_ref::<FlatColorMaterial>() else {
            debug_assert!(false, "flat color program bound to {new_material:?}");
            return false;
        };

        let mut changed = false;
        if state.is_matrix_dirty() {
            write_matrix_uniform(uniforms, 0, &state.combined_matrix());
            changed = true;
        }

        let color_changed = old_material
            .and_then(|old| old.downcast_ref::<FlatColorMaterial>())
            .map(|old| old.color != material.color)
            .unwrap_or(true);
        if color_changed || state.is_opacity_dirty() {
            let [r, g, b, a] = material.color.normalize();
            let alpha = a * state.opacity();
            write_f32_uniforms(uniforms, 64, &[r * alpha, g * alpha, b * alpha, alpha]);
            changed = true;
        }

        changed
    }
}

/// Samples a texture registered with the executor or the software renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureMaterial {
    texture: TextureId,
    has_alpha: bool,
}

impl TextureMaterial {
    pub fn new(texture: TextureId, has_alpha: bool) -> Self {
        Self { texture, has_alpha }
    }

    pub fn texture(&self) -> TextureId {
        self.texture
    }

    pub fn has_alpha(&self) -> bool {
        self.has_alpha
    }
}

impl Material for TextureMaterial {
    fn material_type(&self) -> &'static MaterialType {
        &TEXTURE_MATERIAL_TYPE
    }

    fn flags(&self) -> MaterialFlags {
        if self.has_alpha {
            MaterialFlags::BLENDING
        } else {
            MaterialFlags::empty()
        }
    }

    fn compare(&self, other: &dyn Material) -> Ordering {
        match other.downcast_ref::<TextureMaterial>() {
            Some(other) => self.texture.cmp(&other.texture),
            None => Ordering::Equal,
        }
    }

    fn create_shader(&self) -> Box<dyn MaterialShader> {
        Box::new(TextureShader)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

struct TextureShader;

impl MaterialShader for TextureShader {
    fn uniform_block_size(&self) -> usize {
        BUILTIN_UNIFORM_BLOCK_SIZE
    }

    fn update_state(
        &mut self,
        state: &RenderState,
        uniforms: &mut [u8],
        _new_material: &dyn Material,
        _old_material: Option<&dyn Material>,
    ) -> bool {
        let mut changed = false;
        if state.is_matrix_dirty() {
            write_matrix_uniform(uniforms, 0, &state.combined_matrix());
            changed = true;
        }
        if state.is_opacity_dirty() {
            write_f32_uniforms(uniforms, 64, &[state.opacity(), 0.0, 0.0, 0.0]);
            changed = true;
        }
        changed
    }

    fn update_sampled_texture(
        &mut self,
        new_material: &dyn Material,
        old_material: Option<&dyn Material>,
    ) -> Option<TextureId> {
        let texture = new_material.downcast_ref::<TextureMaterial>()?.texture;
        let previous = old_material
            .and_then(|old| old.downcast_ref::<TextureMaterial>())
            .map(|old| old.texture);
        (previous != Some(texture)).then_some(texture)
    }
}
