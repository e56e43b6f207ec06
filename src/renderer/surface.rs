use crate::util::to_logical;

use super::*;

impl Renderer {
    /// Sets the framebuffer rect and resets the viewport to cover it.
    pub fn set_device_rect(&mut self, rect: DeviceRect) {
        self.device_rect = rect;
        self.viewport_rect = rect;
    }

    pub fn device_rect(&self) -> DeviceRect {
        self.device_rect
    }

    pub fn set_viewport_rect(&mut self, rect: DeviceRect) {
        self.viewport_rect = rect;
    }

    pub fn viewport_rect(&self) -> DeviceRect {
        self.viewport_rect
    }

    pub fn set_projection_matrix(&mut self, matrix: Matrix4) {
        self.projection_matrix = matrix;
    }

    /// Orthographic projection mapping `rect` onto the viewport, y pointing
    /// down.
    pub fn set_projection_matrix_to_rect(&mut self, rect: Rect) {
        let width = rect.size.width.max(f32::EPSILON);
        let height = rect.size.height.max(f32::EPSILON);
        self.projection_matrix = Matrix4::translation(-rect.origin.x, -rect.origin.y, 0.0)
            .then(&Matrix4::scale(2.0 / width, -2.0 / height, 1.0))
            .then(&Matrix4::translation(-1.0, 1.0, 0.0));
    }

    pub fn projection_matrix(&self) -> &Matrix4 {
        &self.projection_matrix
    }

    /// True when the projection flips handedness relative to the usual
    /// y-down mapping, which swaps the winding of front faces.
    pub fn is_mirrored(&self) -> bool {
        let m = &self.projection_matrix;
        m.m11 * m.m22 - m.m12 * m.m21 > 0.0
    }

    pub fn set_device_pixel_ratio(&mut self, ratio: f32) {
        self.config.device_pixel_ratio = ratio;
    }

    pub fn device_pixel_ratio(&self) -> f32 {
        self.config.device_pixel_ratio
    }

    /// Resizes to a framebuffer of `physical_size` pixels and projects the
    /// matching logical rect, `physical_size / device_pixel_ratio`, onto it.
    pub fn resize(&mut self, physical_size: (u32, u32)) {
        self.set_device_rect(DeviceRect::from_size(physical_size.0, physical_size.1));
        let (width, height) = to_logical(physical_size, self.config.device_pixel_ratio as f64);
        self.set_projection_matrix_to_rect(euclid::rect(0.0, 0.0, width, height));
    }
}
