use ahash::{HashMap, HashMapExt};
use tracing::debug;

use crate::id::ProgramId;
use crate::material::{Material, MaterialShader, MaterialType};

pub(crate) struct ProgramEntry {
    pub(crate) material_type: &'static MaterialType,
    pub(crate) shader: Box<dyn MaterialShader>,
    /// Persistent uniform block patched by `MaterialShader::update_state`.
    pub(crate) uniforms: Vec<u8>,
}

/// Maps material types to prepared programs. Programs live as long as the
/// renderer.
#[derive(Default)]
pub(crate) struct ShaderCache {
    programs: Vec<ProgramEntry>,
    by_type: HashMap<usize, ProgramId>,
}

impl ShaderCache {
    pub(crate) fn new() -> Self {
        Self {
            programs: Vec::new(),
            by_type: HashMap::new(),
        }
    }

    /// Returns the program for `material`'s type, creating it on first use.
    pub(crate) fn prepare(&mut self, material: &dyn Material) -> ProgramId {
        let material_type = material.material_type();
        if let Some(program) = self.by_type.get(&material_type.identity()) {
            return *program;
        }

        let shader = material.create_shader();
        let uniforms = vec![0; shader.uniform_block_size()];
        let program = ProgramId(self.programs.len() as u32);
        debug!("prepared {program} for material type {}", material_type.name());

        self.programs.push(ProgramEntry {
            material_type,
            shader,
            uniforms,
        });
        self.by_type.insert(material_type.identity(), program);
        program
    }

    pub(crate) fn lookup(&self, material_type: &MaterialType) -> Option<ProgramId> {
        self.by_type.get(&material_type.identity()).copied()
    }

    pub(crate) fn program_mut(&mut self, program: ProgramId) -> &mut ProgramEntry {
        debug_assert!(
            (program.0 as usize) < self.programs.len(),
            "{program} was never prepared"
        );
        &mut self.programs[program.0 as usize]
    }

    pub(crate) fn len(&self) -> usize {
        self.programs.len()
    }
}
