use std::ops::Range;
use std::sync::Arc;

use crate::color::Color;
use crate::geometry::{DeviceRect, Geometry, Matrix4, MAX_BATCH_VERTICES};
use crate::id::{NodeId, ProgramId, TextureId};
use crate::material::MaterialType;
use crate::util::trim_vector_if_needed;

use super::types::ClearMode;

/// One GPU state change or draw recorded by the renderer.
#[derive(Debug, Clone, PartialEq)]
pub enum GpuCommand {
    SetViewport(DeviceRect),
    Clear {
        mode: ClearMode,
        color: Color,
    },
    SetDepthState {
        test: bool,
        write: bool,
    },
    SetBlend(bool),
    SetCulling(bool),
    SetColorWrite(bool),
    /// `None` disables the scissor test.
    SetScissor(Option<DeviceRect>),
    /// Resets the stencil buffer to zero before clip shapes are drawn.
    ClearStencil,
    /// Increments the stencil value where it equals `reference`, covering the
    /// clip shape of `clip`.
    DrawStencilClip {
        clip: NodeId,
        geometry: Arc<Geometry>,
        matrix: Matrix4,
        reference: u32,
    },
    /// `Some(reference)` draws only where the stencil value equals `reference`.
    SetStencilTest(Option<u32>),
    ActivateProgram {
        program: ProgramId,
        material_type: &'static MaterialType,
    },
    DeactivateProgram(ProgramId),
    /// Copies the program's uniform block; the bytes live in the list's uniform
    /// arena at `range`.
    UploadUniforms {
        program: ProgramId,
        range: Range<usize>,
    },
    BindTexture {
        slot: u32,
        texture: TextureId,
    },
    /// Normalized depth of the following draws.
    SetDepth(f32),
    Draw {
        node: NodeId,
        geometry: Arc<Geometry>,
    },
    /// Marks the start of the commands recorded by a render node.
    RenderNodeCall(NodeId),
    RestoreRenderTarget,
}

/// The recorded frame: commands plus the uniform bytes they reference.
///
/// Cleared, not reallocated, between frames.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandList {
    commands: Vec<GpuCommand>,
    uniform_data: Vec<u8>,
}

impl CommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            commands: Vec::with_capacity(capacity),
            uniform_data: Vec::new(),
        }
    }

    pub fn clear(&mut self) {
        self.commands.clear();
        self.uniform_data.clear();
    }

    pub(crate) fn trim_to_policy(&mut self, max_capacity: usize) {
        trim_vector_if_needed(&mut self.commands, max_capacity);
        trim_vector_if_needed(&mut self.uniform_data, max_capacity * 16);
    }

    pub fn push(&mut self, command: GpuCommand) {
        self.commands.push(command);
    }

    /// Records an upload of `uniforms` for `program`.
    pub fn push_uniforms(&mut self, program: ProgramId, uniforms: &[u8]) {
        let start = self.uniform_data.len();
        self.uniform_data.extend_from_slice(uniforms);
        self.commands.push(GpuCommand::UploadUniforms {
            program,
            range: start..self.uniform_data.len(),
        });
    }

    pub fn commands(&self) -> &[GpuCommand] {
        &self.commands
    }

    pub fn iter(&self) -> std::slice::Iter<'_, GpuCommand> {
        self.commands.iter()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn uniform_bytes(&self, range: Range<usize>) -> &[u8] {
        &self.uniform_data[range]
    }

    pub fn uniform_data(&self) -> &[u8] {
        &self.uniform_data
    }

    pub fn count(&self, predicate: impl Fn(&GpuCommand) -> bool) -> usize {
        self.commands.iter().filter(|command| predicate(command)).count()
    }

    pub fn draw_count(&self) -> usize {
        self.count(|command| matches!(command, GpuCommand::Draw { .. }))
    }

    pub fn program_activation_count(&self) -> usize {
        self.count(|command| matches!(command, GpuCommand::ActivateProgram { .. }))
    }

    /// Writes, for every `Draw` in order, whether it shares the draw call of the
    /// `Draw` right before it. Draws merge when nothing is recorded between
    /// them, their geometries can be merged and the merged draw stays within
    /// [`MAX_BATCH_VERTICES`].
    pub fn merge_flags(&self, flags: &mut Vec<bool>) {
        flags.clear();
        let mut previous: Option<&Geometry> = None;
        let mut batch_vertices = 0;
        for command in &self.commands {
            let GpuCommand::Draw { geometry, .. } = command else {
                previous = None;
                continue;
            };
            let vertices = geometry.vertex_count();
            let merges = previous.is_some_and(|previous| previous.can_merge_with(geometry))
                && batch_vertices + vertices <= MAX_BATCH_VERTICES;
            batch_vertices = if merges { batch_vertices + vertices } else { vertices };
            flags.push(merges);
            previous = Some(geometry.as_ref());
        }
    }

    /// Draw calls needed once mergeable draws share one.
    pub fn batch_count(&self) -> usize {
        let mut flags = Vec::new();
        self.merge_flags(&mut flags);
        flags.iter().filter(|merges| !**merges).count()
    }

    /// Nodes in the order they are drawn.
    pub fn drawn_nodes(&self) -> Vec<NodeId> {
        self.commands
            .iter()
            .filter_map(|command| match command {
                GpuCommand::Draw { node, .. } => Some(*node),
                _ => None,
            })
            .collect()
    }
}

impl<'a> IntoIterator for &'a CommandList {
    type Item = &'a GpuCommand;
    type IntoIter = std::slice::Iter<'a, GpuCommand>;

    fn into_iter(self) -> Self::IntoIter {
        self.commands.iter()
    }
}
