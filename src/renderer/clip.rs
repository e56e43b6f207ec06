use smallvec::SmallVec;

use crate::geometry::{is_rectilinear, map_rect};

use super::*;

impl Renderer {
    /// Maps normalized device coordinates to framebuffer pixels inside the
    /// viewport, origin at the top-left corner.
    pub(super) fn ndc_to_device_matrix(&self) -> Matrix4 {
        let viewport = self.viewport_rect;
        let half_width = viewport.width as f32 / 2.0;
        let half_height = viewport.height as f32 / 2.0;
        Matrix4::scale(half_width, -half_height, 1.0).then(&Matrix4::translation(
            viewport.x as f32 + half_width,
            viewport.y as f32 + half_height,
            0.0,
        ))
    }

    /// Resolves the clip chain starting at `clip_list` into scissor and stencil
    /// state and records the commands that establish it.
    ///
    /// Rectangular clips whose device transform keeps them axis-aligned are
    /// intersected into a single scissor rect. Any other clip is drawn into the
    /// stencil buffer: the buffer is reset, each shape increments where the
    /// value equals the number of shapes drawn before it, and drawing then
    /// tests for the final count.
    pub(super) fn update_clip(&mut self, scene: &SceneGraph, clip_list: Option<NodeId>) {
        self.emit_state.current_clip = Some(clip_list);
        self.frame_statistics.clip_changes += 1;

        let ndc_to_device = self.ndc_to_device_matrix();
        let mut scissor: Option<DeviceRect> = None;
        let mut stencil_clips: SmallVec<[NodeId; 4]> = SmallVec::new();

        let mut next = clip_list;
        while let Some(clip_id) = next {
            let Some(clip) = scene.clip_node(clip_id) else {
                break;
            };
            let device_matrix = scene
                .combined_matrix(clip.matrix())
                .then(&self.projection_matrix)
                .then(&ndc_to_device);

            let device_rect = if clip.is_rectangular() && is_rectilinear(&device_matrix) {
                map_rect(&device_matrix, &clip.clip_rect())
            } else {
                None
            };

            match device_rect {
                Some(rect) => {
                    let rect = DeviceRect::from_rounded(&rect);
                    scissor = Some(match scissor {
                        Some(current) => current.intersect(&rect),
                        None => rect,
                    });
                }
                None => stencil_clips.push(clip_id),
            }
            next = clip.clip_list();
        }

        let scissor = scissor.map(|rect| rect.intersect(&self.viewport_rect));
        if scissor != self.emit_state.scissor {
            self.commands.push(GpuCommand::SetScissor(scissor));
            self.emit_state.scissor = scissor;
        }

        let mut clip_type = ClipType::empty();
        if scissor.is_some() {
            clip_type |= ClipType::SCISSOR;
            self.frame_statistics.scissor_clips += 1;
        }

        if stencil_clips.is_empty() {
            if self.emit_state.stencil_reference.take().is_some() {
                self.commands.push(GpuCommand::SetStencilTest(None));
            }
        } else {
            self.commands.push(GpuCommand::ClearStencil);
            for (reference, clip_id) in stencil_clips.iter().enumerate() {
                let Some(clip) = scene.clip_node(*clip_id) else {
                    continue;
                };
                let matrix = scene
                    .combined_matrix(clip.matrix())
                    .then(&self.projection_matrix);
                self.commands.push(GpuCommand::DrawStencilClip {
                    clip: *clip_id,
                    geometry: clip.geometry().clone(),
                    matrix,
                    reference: reference as u32,
                });
            }
            let reference = stencil_clips.len() as u32;
            self.commands
                .push(GpuCommand::SetStencilTest(Some(reference)));
            self.emit_state.stencil_reference = Some(reference);
            clip_type |= ClipType::STENCIL;
            self.frame_statistics.stencil_clips += 1;
        }

        trace!("clip list {clip_list:?} resolved to {clip_type:?}");
        self.emit_state.clip_type = clip_type;
    }

    /// Disables whatever clipping is active.
    pub(super) fn reset_clip(&mut self) {
        if self.emit_state.scissor.take().is_some() {
            self.commands.push(GpuCommand::SetScissor(None));
        }
        if self.emit_state.stencil_reference.take().is_some() {
            self.commands.push(GpuCommand::SetStencilTest(None));
        }
        self.emit_state.clip_type = ClipType::empty();
        self.emit_state.current_clip = None;
    }
}
