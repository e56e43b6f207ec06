use std::any::Any;
use std::cmp::Ordering;
use std::fmt;

use bitflags::bitflags;

use crate::geometry::{DeviceRect, Matrix4};
use crate::id::TextureId;

/// Identity of a shader program family.
///
/// Declare one per material implementation as a `static`; two materials whose
/// [`Material::material_type`] return the same static share a compiled program.
/// Equality and ordering go by the address of the static, never by name.
///
/// ```
/// use strata::MaterialType;
///
/// static OUTLINE: MaterialType = MaterialType::new("outline");
/// static GLOW: MaterialType = MaterialType::new("outline");
///
/// assert_ne!(&OUTLINE, &GLOW);
/// ```
pub struct MaterialType {
    name: &'static str,
}

impl MaterialType {
    pub const fn new(name: &'static str) -> Self {
        Self { name }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Address-based identity used as a sort key.
    pub fn identity(&self) -> usize {
        self as *const MaterialType as usize
    }
}

impl PartialEq for MaterialType {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl Eq for MaterialType {}

impl fmt::Debug for MaterialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MaterialType({} @ {:#x})", self.name, self.identity())
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MaterialFlags: u32 {
        /// The material writes translucent pixels and must be drawn in the
        /// back-to-front pass regardless of opacity.
        const BLENDING = 0x01;
    }
}

bitflags! {
    /// Uniform state that changed since the previous draw with the same program.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirtyStates: u32 {
        const MATRIX = 0x01;
        const OPACITY = 0x02;
    }
}

/// Appearance of a geometry node: which program draws it and with what state.
///
/// `compare` orders materials of the same [`MaterialType`] for batching only. It
/// must be a strict weak order; debug builds check antisymmetry while sorting.
pub trait Material: Any + Send + Sync + fmt::Debug {
    fn material_type(&self) -> &'static MaterialType;

    fn flags(&self) -> MaterialFlags {
        MaterialFlags::empty()
    }

    /// Orders two materials sharing a type. The default orders by instance
    /// address, which batches identical instances together.
    fn compare(&self, other: &dyn Material) -> Ordering {
        material_identity(self).cmp(&material_identity(other))
    }

    fn create_shader(&self) -> Box<dyn MaterialShader>;

    fn as_any(&self) -> &dyn Any;
}

impl<'a> dyn Material + 'a {
    pub fn downcast_ref<T: Material>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn requires_blending(&self) -> bool {
        self.flags().contains(MaterialFlags::BLENDING)
    }
}

/// Address of a material instance, ignoring the vtable.
pub fn material_identity<M: Material + ?Sized>(material: &M) -> usize {
    (material as *const M).cast::<()>() as usize
}

/// Program side of a material type, created once per type and reused by every
/// instance of that type.
///
/// The program owns a persistent uniform block of [`uniform_block_size`] bytes.
/// `update_state` patches it for the next draw and reports whether anything was
/// written; `old_material` is `None` right after the program was activated.
///
/// [`uniform_block_size`]: MaterialShader::uniform_block_size
pub trait MaterialShader: Send {
    fn uniform_block_size(&self) -> usize;

    fn activate(&mut self) {}

    fn deactivate(&mut self) {}

    fn update_state(
        &mut self,
        state: &RenderState,
        uniforms: &mut [u8],
        new_material: &dyn Material,
        old_material: Option<&dyn Material>,
    ) -> bool;

    /// Texture the next draw samples, when it differs from what `old_material`
    /// had bound.
    fn update_sampled_texture(
        &mut self,
        _new_material: &dyn Material,
        _old_material: Option<&dyn Material>,
    ) -> Option<TextureId> {
        None
    }
}

/// Renderer state handed to [`MaterialShader::update_state`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RenderState {
    pub(crate) dirty: DirtyStates,
    pub(crate) model_view_matrix: Matrix4,
    pub(crate) projection_matrix: Matrix4,
    pub(crate) opacity: f32,
    pub(crate) depth: f32,
    pub(crate) device_rect: DeviceRect,
    pub(crate) device_pixel_ratio: f32,
}

impl RenderState {
    pub fn new(
        dirty: DirtyStates,
        model_view_matrix: Matrix4,
        projection_matrix: Matrix4,
        opacity: f32,
    ) -> Self {
        Self {
            dirty,
            model_view_matrix,
            projection_matrix,
            opacity,
            depth: 0.0,
            device_rect: DeviceRect::default(),
            device_pixel_ratio: 1.0,
        }
    }

    pub fn dirty_states(&self) -> DirtyStates {
        self.dirty
    }

    pub fn is_matrix_dirty(&self) -> bool {
        self.dirty.contains(DirtyStates::MATRIX)
    }

    pub fn is_opacity_dirty(&self) -> bool {
        self.dirty.contains(DirtyStates::OPACITY)
    }

    /// Model-view followed by projection.
    pub fn combined_matrix(&self) -> Matrix4 {
        self.model_view_matrix.then(&self.projection_matrix)
    }

    pub fn model_view_matrix(&self) -> &Matrix4 {
        &self.model_view_matrix
    }

    pub fn projection_matrix(&self) -> &Matrix4 {
        &self.projection_matrix
    }

    pub fn opacity(&self) -> f32 {
        self.opacity
    }

    /// Normalized depth the current draw is placed at.
    pub fn depth(&self) -> f32 {
        self.depth
    }

    pub fn device_rect(&self) -> DeviceRect {
        self.device_rect
    }

    pub fn device_pixel_ratio(&self) -> f32 {
        self.device_pixel_ratio
    }
}

/// Writes `matrix` into `uniforms[offset..offset + 64]` in the column-major
/// layout WGSL expects for `mat4x4<f32>`.
pub fn write_matrix_uniform(uniforms: &mut [u8], offset: usize, matrix: &Matrix4) {
    let columns = matrix.to_array();
    uniforms[offset..offset + 64].copy_from_slice(bytemuck::cast_slice(&columns));
}

pub fn write_f32_uniforms(uniforms: &mut [u8], offset: usize, values: &[f32]) {
    let bytes: &[u8] = bytemuck::cast_slice(values);
    uniforms[offset..offset + bytes.len()].copy_from_slice(bytes);
}

#[cfg(test)]
mod tests {
    use super::*;

    static FIRST: MaterialType = MaterialType::new("first");
    static SECOND: MaterialType = MaterialType::new("second");

    #[derive(Debug)]
    struct Plain;

    struct PlainShader;

    impl MaterialShader for PlainShader {
        fn uniform_block_size(&self) -> usize {
            0
        }

        fn update_state(
            &mut self,
            _state: &RenderState,
            _uniforms: &mut [u8],
            _new_material: &dyn Material,
            _old_material: Option<&dyn Material>,
        ) -> bool {
            false
        }
    }

    impl Material for Plain {
        fn material_type(&self) -> &'static MaterialType {
            &FIRST
        }

        fn create_shader(&self) -> Box<dyn MaterialShader> {
            Box::new(PlainShader)
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    fn material_types_compare_by_address() {
        assert_eq!(&FIRST, &FIRST);
        assert_ne!(&FIRST, &SECOND);
        assert_ne!(FIRST.identity(), SECOND.identity());
    }

    #[test]
    fn default_compare_orders_by_instance() {
        let a = Plain;
        let b = Plain;
        let material_a: &dyn Material = &a;
        assert_eq!(material_a.compare(&a), Ordering::Equal);
        assert_eq!(material_a.compare(&b), b.compare(&a).reverse());
    }

    #[test]
    fn downcast_ref_recovers_concrete_material() {
        let material: Box<dyn Material> = Box::new(Plain);
        assert!(material.downcast_ref::<Plain>().is_some());
        assert!(!material.requires_blending());
    }

    #[test]
    fn matrix_uniform_is_column_major() {
        let mut uniforms = [0u8; 64];
        write_matrix_uniform(&mut uniforms, 0, &Matrix4::translation(3.0, 4.0, 0.0));
        let floats: Vec<f32> = uniforms
            .chunks_exact(4)
            .map(|chunk| f32::from_ne_bytes(chunk.try_into().unwrap()))
            .collect();
        assert_eq!(&floats[12..14], &[3.0, 4.0]);
    }
}
