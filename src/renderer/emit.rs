use std::ops::Range;

use smallvec::SmallVec;
use tracing::warn;

use crate::material::{material_identity, DirtyStates, RenderState};
use crate::render_node::{RenderNodeState, StateFlags};

use super::*;

/// GPU state as last recorded into the command list. `None` means unknown,
/// so the next draw records it unconditionally.
#[derive(Debug, Default)]
pub(super) struct EmitState {
    pub(super) pass: Option<Pass>,
    pub(super) current_program: Option<ProgramId>,
    pub(super) current_material: Option<Arc<dyn Material>>,
    pub(super) current_matrix: Option<Option<NodeId>>,
    pub(super) current_opacity: Option<f32>,
    pub(super) current_render_order: Option<i32>,
    pub(super) current_clip: Option<Option<NodeId>>,
    pub(super) clip_type: ClipType,
    pub(super) scissor: Option<DeviceRect>,
    pub(super) stencil_reference: Option<u32>,
    pub(super) render_order_scale: f32,
}

impl EmitState {
    /// Forgets the cached shader state, leaving clip and pass state intact.
    fn forget_program(&mut self) {
        self.current_program = None;
        self.current_material = None;
        self.current_matrix = None;
        self.current_opacity = None;
    }
}

type GroupRanges = SmallVec<[(Range<usize>, Range<usize>); 4]>;

impl Renderer {
    /// Depth of a node with `render_order`: 1 maps to just below the clear
    /// value and higher orders move towards the viewer.
    pub(super) fn depth_for(&self, render_order: i32) -> f32 {
        1.0 - (render_order + 1) as f32 * self.emit_state.render_order_scale
    }

    pub(super) fn emit_frame(&mut self, scene: &mut SceneGraph) {
        // The previous frame's list has been consumed by now.
        self.commands.trim_to_policy(MAX_COMMAND_CAPACITY);
        self.commands.clear();
        self.emit_state = EmitState {
            render_order_scale: 1.0 / (self.lists.current_render_order + 1) as f32,
            ..EmitState::default()
        };

        self.commands.push(GpuCommand::SetViewport(self.viewport_rect));
        self.commands.push(GpuCommand::Clear {
            mode: self.config.clear_mode,
            color: self.config.clear_color,
        });

        let groups: GroupRanges = self.lists.group_ranges().collect();
        for (opaque, transparent) in groups {
            if !opaque.is_empty() {
                self.set_pass(Pass::Opaque);
                for index in opaque {
                    let id = self.lists.opaque_nodes[index];
                    self.emit_geometry_node(scene, id);
                }
            }

            if !transparent.is_empty() {
                self.set_pass(Pass::Transparent);
                for index in transparent {
                    let id = self.lists.transparent_nodes[index];
                    if matches!(scene.kind(id), Some(NodeKind::Render(_))) {
                        self.emit_render_node(scene, id);
                    } else {
                        self.emit_geometry_node(scene, id);
                    }
                }
            }
        }

        if let Some(program) = self.emit_state.current_program {
            self.deactivate_program(program);
        }
        self.reset_clip();
        self.frame_statistics.batches = self.commands.batch_count() as u32;
    }

    fn set_pass(&mut self, pass: Pass) {
        if self.emit_state.pass == Some(pass) {
            return;
        }
        self.push_pass_state(pass);
        self.emit_state.pass = Some(pass);
    }

    fn push_pass_state(&mut self, pass: Pass) {
        self.commands.push(GpuCommand::SetDepthState {
            test: true,
            write: pass.depth_write(),
        });
        self.commands.push(GpuCommand::SetBlend(pass.blending()));
    }

    fn deactivate_program(&mut self, program: ProgramId) {
        self.shader_cache.program_mut(program).shader.deactivate();
        self.commands.push(GpuCommand::DeactivateProgram(program));
        self.emit_state.forget_program();
    }

    /// Records the state changes and the draw call of one geometry node.
    fn emit_geometry_node(&mut self, scene: &SceneGraph, id: NodeId) {
        let Some(node) = scene.geometry_node(id) else {
            return;
        };
        let Some(material) = node.active_material().cloned() else {
            debug_assert!(false, "geometry node {id} in the render lists has no material");
            warn!("not drawing geometry node {id} without a material");
            return;
        };

        let mut force_program = false;
        if self.emit_state.current_clip != Some(node.clip_list()) {
            self.update_clip(scene, node.clip_list());
            // Stencil shapes are drawn with their own pipeline.
            force_program = self.emit_state.clip_type.contains(ClipType::STENCIL);
        }

        let program = self.shader_cache.prepare(material.as_ref());

        let mut dirty = DirtyStates::empty();
        if self.emit_state.current_matrix != Some(node.matrix()) {
            dirty |= DirtyStates::MATRIX;
        }
        if self.emit_state.current_opacity != Some(node.inherited_opacity()) {
            dirty |= DirtyStates::OPACITY;
        }

        let program_changed = force_program || self.emit_state.current_program != Some(program);
        if program_changed {
            if let Some(previous) = self.emit_state.current_program {
                self.deactivate_program(previous);
            }
            let entry = self.shader_cache.program_mut(program);
            entry.shader.activate();
            self.commands.push(GpuCommand::ActivateProgram {
                program,
                material_type: entry.material_type,
            });
            self.emit_state.current_program = Some(program);
            self.frame_statistics.program_switches += 1;
            dirty |= DirtyStates::MATRIX | DirtyStates::OPACITY;
        }

        if self.emit_state.current_render_order != Some(node.render_order()) {
            let depth = self.depth_for(node.render_order());
            self.commands.push(GpuCommand::SetDepth(depth));
            self.emit_state.current_render_order = Some(node.render_order());
            self.frame_statistics.depth_changes += 1;
        }

        let material_changed = match &self.emit_state.current_material {
            Some(current) => material_identity(current.as_ref()) != material_identity(material.as_ref()),
            None => true,
        };

        if program_changed || material_changed || !dirty.is_empty() {
            if program_changed || material_changed {
                self.frame_statistics.material_changes += 1;
            }

            let mut state = RenderState::new(
                dirty,
                scene.combined_matrix(node.matrix()),
                self.projection_matrix,
                node.inherited_opacity(),
            );
            state.depth = self.depth_for(node.render_order());
            state.device_rect = self.device_rect;
            state.device_pixel_ratio = self.config.device_pixel_ratio;

            let old_material = if program_changed {
                None
            } else {
                self.emit_state.current_material.clone()
            };

            let entry = self.shader_cache.program_mut(program);
            let written = entry.shader.update_state(
                &state,
                &mut entry.uniforms,
                material.as_ref(),
                old_material.as_deref(),
            );
            if let Some(texture) = entry
                .shader
                .update_sampled_texture(material.as_ref(), old_material.as_deref())
            {
                self.commands.push(GpuCommand::BindTexture { slot: 0, texture });
            }
            if written {
                self.commands.push_uniforms(program, &entry.uniforms);
                self.frame_statistics.uniform_uploads += 1;
                if dirty.contains(DirtyStates::MATRIX) {
                    self.frame_statistics.matrix_uploads += 1;
                }
                if dirty.contains(DirtyStates::OPACITY) {
                    self.frame_statistics.opacity_uploads += 1;
                }
            }
        }

        self.emit_state.current_material = Some(material);
        self.emit_state.current_matrix = Some(node.matrix());
        self.emit_state.current_opacity = Some(node.inherited_opacity());

        self.commands.push(GpuCommand::Draw {
            node: id,
            geometry: node.geometry().clone(),
        });
        self.frame_statistics.draw_calls += 1;
    }

    /// Hands the GPU to a render node and restores what it reports changing.
    fn emit_render_node(&mut self, scene: &mut SceneGraph, id: NodeId) {
        let Some((clip_list, matrix, opacity, render_order)) =
            scene.render_node_entry(id).map(|entry| {
                (
                    entry.clip_list(),
                    entry.matrix(),
                    entry.inherited_opacity(),
                    entry.render_order(),
                )
            })
        else {
            return;
        };

        if self.emit_state.current_clip != Some(clip_list) {
            self.update_clip(scene, clip_list);
        }
        if let Some(program) = self.emit_state.current_program {
            self.deactivate_program(program);
        }

        let state = RenderNodeState {
            model_view_matrix: scene.combined_matrix(matrix),
            projection_matrix: self.projection_matrix,
            opacity,
            depth: self.depth_for(render_order),
            scissor: self.emit_state.scissor,
            stencil_reference: self.emit_state.stencil_reference,
            viewport: self.viewport_rect,
        };

        self.commands.push(GpuCommand::RenderNodeCall(id));
        self.frame_statistics.render_node_calls += 1;

        let Some(entry) = scene.render_node_entry_mut(id) else {
            return;
        };
        let changed = entry.render_node().changed_states();
        entry.render_node_mut().render(&state, &mut self.commands);

        self.restore_after_render_node(changed);
    }

    fn restore_after_render_node(&mut self, changed: StateFlags) {
        if changed.contains(StateFlags::RENDER_TARGET) {
            self.commands.push(GpuCommand::RestoreRenderTarget);
        }
        if changed.contains(StateFlags::VIEWPORT) {
            self.commands.push(GpuCommand::SetViewport(self.viewport_rect));
        }
        if changed.intersects(StateFlags::DEPTH | StateFlags::BLEND) {
            if let Some(pass) = self.emit_state.pass {
                self.push_pass_state(pass);
            }
        }
        if changed.contains(StateFlags::CULL) {
            self.commands.push(GpuCommand::SetCulling(false));
        }
        if changed.contains(StateFlags::COLOR) {
            self.commands.push(GpuCommand::SetColorWrite(true));
        }
        if changed.intersects(StateFlags::SCISSOR | StateFlags::STENCIL) {
            // The node may have left either test in any state; switch both off
            // and let the next draw re-establish its clip.
            self.commands.push(GpuCommand::SetScissor(None));
            self.commands.push(GpuCommand::SetStencilTest(None));
            self.emit_state.scissor = None;
            self.emit_state.stencil_reference = None;
            self.emit_state.clip_type = ClipType::empty();
            self.emit_state.current_clip = None;
        }
        self.emit_state.current_render_order = None;
    }
}
