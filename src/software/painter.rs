use crate::color::Color;
use crate::geometry::{DeviceRect, Point, Rect};

use super::buffer::{Image, PixelBuffer};
use super::paintable::{GlyphBitmap, NinePatchInsets};

/// How painted pixels combine with the buffer content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompositionMode {
    /// Replaces the destination; used for content known to be opaque.
    Source,
    /// Porter-Duff source-over blending.
    #[default]
    SourceOver,
}

/// Immediate-mode painter over a [`PixelBuffer`].
///
/// All coordinates are device pixels. Every operation is limited to the clip
/// rect and scaled by the current opacity.
#[derive(Debug)]
pub struct RasterPainter<'a> {
    buffer: &'a mut PixelBuffer,
    clip: DeviceRect,
    opacity: u32,
    mode: CompositionMode,
}

impl<'a> RasterPainter<'a> {
    pub fn new(buffer: &'a mut PixelBuffer) -> Self {
        let clip = buffer.rect();
        Self {
            buffer,
            clip,
            opacity: 255,
            mode: CompositionMode::SourceOver,
        }
    }

    pub fn clip_rect(&self) -> DeviceRect {
        self.clip
    }

    /// Restricts painting to `clip`, limited to the buffer.
    pub fn set_clip_rect(&mut self, clip: DeviceRect) {
        self.clip = clip.intersect(&self.buffer.rect());
    }

    pub fn set_opacity(&mut self, opacity: f32) {
        self.opacity = (opacity.clamp(0.0, 1.0) * 255.0).round() as u32;
    }

    pub fn set_composition_mode(&mut self, mode: CompositionMode) {
        self.mode = mode;
    }

    pub fn composition_mode(&self) -> CompositionMode {
        self.mode
    }

    /// Fills the pixels whose centers lie inside `rect`.
    pub fn fill_rect(&mut self, rect: &Rect, color: Color) {
        let source = color.to_premultiplied_argb();
        let area = DeviceRect::from_rounded(rect).intersect(&self.clip);
        self.for_each_pixel(area, |_, _| Some(source));
    }

    /// Rounded rectangle with an inner border of `border_width`, edges
    /// anti-aliased by distance to the outline.
    pub fn draw_styled_rect(
        &mut self,
        rect: &Rect,
        radius: f32,
        color: Color,
        border_color: Color,
        border_width: f32,
    ) {
        let fill = color.to_premultiplied_argb();
        let border = border_color.to_premultiplied_argb();
        let inner = rect.inflate(-border_width.max(0.0), -border_width.max(0.0));
        let inner_radius = (radius - border_width).max(0.0);
        let area = DeviceRect::from_covering(rect).intersect(&self.clip);

        self.for_each_pixel(area, |x, y| {
            let center = Point::new(x as f32 + 0.5, y as f32 + 0.5);
            let outer_coverage = rounded_rect_coverage(rect, radius, center);
            if outer_coverage <= 0.0 {
                return None;
            }
            let inner_coverage = if border_width > 0.0 {
                rounded_rect_coverage(&inner, inner_radius, center)
            } else {
                outer_coverage
            };
            let fill_part = scale_argb(fill, unit_to_byte(inner_coverage));
            let border_part = scale_argb(border, unit_to_byte(outer_coverage - inner_coverage));
            Some(add_argb(fill_part, border_part))
        });
    }

    /// Draws all of `image` stretched over `target`.
    pub fn draw_image(&mut self, target: &Rect, image: &Image) {
        let source = DeviceRect::from_size(image.width(), image.height());
        self.draw_image_rect(target, image, source);
    }

    /// Draws the `source` pixels of `image` stretched over `target`, sampling
    /// the nearest texel.
    ///
    /// # Panics
    ///
    /// Panics when the image format cannot be sampled on the CPU.
    pub fn draw_image_rect(&mut self, target: &Rect, image: &Image, source: DeviceRect) {
        if target.is_empty() || source.is_empty() {
            return;
        }
        let scale_x = source.width as f32 / target.width();
        let scale_y = source.height as f32 / target.height();
        let area = DeviceRect::from_rounded(target).intersect(&self.clip);

        self.for_each_pixel(area, |x, y| {
            let u = ((x as f32 + 0.5 - target.min_x()) * scale_x).floor() as i32;
            let v = ((y as f32 + 0.5 - target.min_y()) * scale_y).floor() as i32;
            let u = source.x + u.clamp(0, source.width - 1);
            let v = source.y + v.clamp(0, source.height - 1);
            Some(image.texel(u, v))
        });
    }

    /// Corners keep their size, edges stretch along one axis and the center
    /// along both.
    pub fn draw_nine_patch(&mut self, target: &Rect, image: &Image, insets: NinePatchInsets) {
        let (width, height) = (image.width() as i32, image.height() as i32);
        let left = (insets.left as i32).min(width / 2);
        let right = (insets.right as i32).min(width - left);
        let top = (insets.top as i32).min(height / 2);
        let bottom = (insets.bottom as i32).min(height - top);

        let target_left = (left as f32).min(target.width() / 2.0);
        let target_right = (right as f32).min(target.width() - target_left);
        let target_top = (top as f32).min(target.height() / 2.0);
        let target_bottom = (bottom as f32).min(target.height() - target_top);

        let source_columns = [(0, left), (left, width - left - right), (width - right, right)];
        let source_rows = [(0, top), (top, height - top - bottom), (height - bottom, bottom)];
        let target_columns = [
            (target.min_x(), target_left),
            (
                target.min_x() + target_left,
                target.width() - target_left - target_right,
            ),
            (target.max_x() - target_right, target_right),
        ];
        let target_rows = [
            (target.min_y(), target_top),
            (
                target.min_y() + target_top,
                target.height() - target_top - target_bottom,
            ),
            (target.max_y() - target_bottom, target_bottom),
        ];

        for (row, &(source_y, source_height)) in source_rows.iter().enumerate() {
            for (column, &(source_x, source_width)) in source_columns.iter().enumerate() {
                let (target_x, target_width) = target_columns[column];
                let (target_y, target_height) = target_rows[row];
                self.draw_image_rect(
                    &euclid::rect(target_x, target_y, target_width, target_height),
                    image,
                    DeviceRect::new(source_x, source_y, source_width, source_height),
                );
            }
        }
    }

    /// Blends `color` through the coverage mask of `glyph`, placed relative
    /// to `origin` rounded to whole pixels.
    pub fn draw_glyph(&mut self, origin: Point, glyph: &GlyphBitmap, color: Color) {
        let source = color.to_premultiplied_argb();
        let left = origin.x.round() as i32 + glyph.x;
        let top = origin.y.round() as i32 + glyph.y;
        let glyph_rect = DeviceRect::new(left, top, glyph.width as i32, glyph.height as i32);
        let area = glyph_rect.intersect(&self.clip);

        self.for_each_pixel(area, |x, y| {
            let index = (y - top) as usize * glyph.width as usize + (x - left) as usize;
            let coverage = *glyph.coverage.get(index)? as u32;
            (coverage > 0).then(|| scale_argb(source, coverage))
        });
    }

    /// Composites the pixel `shade` returns for every position in `area`;
    /// `None` leaves the pixel untouched.
    fn for_each_pixel(&mut self, area: DeviceRect, mut shade: impl FnMut(i32, i32) -> Option<u32>) {
        if area.is_empty() || self.opacity == 0 {
            return;
        }
        let (opacity, mode) = (self.opacity, self.mode);
        for y in area.y..area.bottom() {
            let row = self.buffer.row_mut(y as u32);
            for x in area.x..area.right() {
                if let Some(source) = shade(x, y) {
                    let destination = &mut row[x as usize];
                    *destination = composite(*destination, source, opacity, mode);
                }
            }
        }
    }
}

/// Coverage in `[0, 1]` of the pixel centered at `point` by a rounded rect.
fn rounded_rect_coverage(rect: &Rect, radius: f32, point: Point) -> f32 {
    if rect.is_empty() {
        return 0.0;
    }
    let half_width = rect.width() / 2.0;
    let half_height = rect.height() / 2.0;
    let radius = radius.clamp(0.0, half_width.min(half_height));
    let center = rect.center();
    let qx = (point.x - center.x).abs() - (half_width - radius);
    let qy = (point.y - center.y).abs() - (half_height - radius);
    let outside = (qx.max(0.0).powi(2) + qy.max(0.0).powi(2)).sqrt();
    let distance = outside + qx.max(qy).min(0.0) - radius;
    (0.5 - distance).clamp(0.0, 1.0)
}

fn unit_to_byte(value: f32) -> u32 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u32
}

#[inline(always)]
fn mul_div_255(value: u32, factor: u32) -> u32 {
    let product = value * factor + 128;
    (product + (product >> 8)) >> 8
}

/// Multiplies every channel of a premultiplied pixel by `factor / 255`.
#[inline(always)]
fn scale_argb(pixel: u32, factor: u32) -> u32 {
    if factor >= 255 {
        return pixel;
    }
    if factor == 0 {
        return 0;
    }
    [0, 8, 16, 24].iter().fold(0, |scaled, &shift| {
        scaled | (mul_div_255((pixel >> shift) & 0xFF, factor) << shift)
    })
}

#[inline(always)]
fn add_argb(a: u32, b: u32) -> u32 {
    [0, 8, 16, 24].iter().fold(0, |sum, &shift| {
        let channel = ((a >> shift) & 0xFF) + ((b >> shift) & 0xFF);
        sum | (channel.min(0xFF) << shift)
    })
}

fn composite(destination: u32, source: u32, opacity: u32, mode: CompositionMode) -> u32 {
    match mode {
        CompositionMode::Source => {
            add_argb(scale_argb(source, opacity), scale_argb(destination, 255 - opacity))
        }
        CompositionMode::SourceOver => {
            let source = scale_argb(source, opacity);
            add_argb(source, scale_argb(destination, 255 - (source >> 24)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::software::buffer::ImageFormat;

    fn buffer(width: u32, height: u32, color: Color) -> PixelBuffer {
        let mut buffer = PixelBuffer::new(width, height);
        buffer.fill(color);
        buffer
    }

    #[test]
    fn source_over_blends_half_transparent_red_over_white() {
        let mut target = buffer(2, 2, Color::WHITE);
        RasterPainter::new(&mut target)
            .fill_rect(&euclid::rect(0.0, 0.0, 2.0, 2.0), Color::rgba(255, 0, 0, 128));

        assert_eq!(target.pixel(0, 0), Some(0xFFFF_7F7F));
    }

    #[test]
    fn source_mode_replaces_destination() {
        let mut target = buffer(2, 1, Color::WHITE);
        let mut painter = RasterPainter::new(&mut target);
        painter.set_composition_mode(CompositionMode::Source);
        painter.fill_rect(&euclid::rect(0.0, 0.0, 1.0, 1.0), Color::rgba(0, 0, 0, 0));

        assert_eq!(target.pixel(0, 0), Some(0));
        assert_eq!(target.pixel(1, 0), Some(0xFFFF_FFFF));
    }

    #[test]
    fn clip_rect_limits_painting() {
        let mut target = PixelBuffer::new(4, 4);
        let mut painter = RasterPainter::new(&mut target);
        painter.set_clip_rect(DeviceRect::new(1, 1, 2, 2));
        painter.fill_rect(&euclid::rect(0.0, 0.0, 4.0, 4.0), Color::BLACK);

        let painted = target.pixels().iter().filter(|&&pixel| pixel != 0).count();
        assert_eq!(painted, 4);
        assert_eq!(target.pixel(0, 0), Some(0));
        assert_eq!(target.pixel(2, 2), Some(0xFF00_0000));
    }

    #[test]
    fn opacity_scales_source() {
        let mut target = PixelBuffer::new(1, 1);
        let mut painter = RasterPainter::new(&mut target);
        painter.set_opacity(0.5);
        painter.fill_rect(&euclid::rect(0.0, 0.0, 1.0, 1.0), Color::WHITE);

        assert_eq!(target.pixel(0, 0), Some(0x8080_8080));
    }

    #[test]
    fn styled_rect_draws_border_and_fill() {
        let mut target = PixelBuffer::new(6, 6);
        RasterPainter::new(&mut target).draw_styled_rect(
            &euclid::rect(0.0, 0.0, 6.0, 6.0),
            0.0,
            Color::WHITE,
            Color::BLACK,
            1.0,
        );

        assert_eq!(target.pixel(0, 3), Some(0xFF00_0000));
        assert_eq!(target.pixel(3, 3), Some(0xFFFF_FFFF));
    }

    #[test]
    fn rounded_corners_leave_the_corner_pixel_empty() {
        let mut target = PixelBuffer::new(10, 10);
        RasterPainter::new(&mut target).draw_styled_rect(
            &euclid::rect(0.0, 0.0, 10.0, 10.0),
            4.0,
            Color::BLACK,
            Color::TRANSPARENT,
            0.0,
        );

        assert_eq!(target.pixel(0, 0), Some(0));
        assert_eq!(target.pixel(5, 5), Some(0xFF00_0000));
    }

    #[test]
    fn image_is_scaled_with_nearest_sampling() {
        let image = Image::new(
            2,
            1,
            ImageFormat::Rgba8,
            vec![255, 0, 0, 255, 0, 0, 255, 255],
        );
        let mut target = PixelBuffer::new(4, 1);
        RasterPainter::new(&mut target).draw_image(&euclid::rect(0.0, 0.0, 4.0, 1.0), &image);

        assert_eq!(
            target.pixels(),
            &[0xFFFF_0000, 0xFFFF_0000, 0xFF00_00FF, 0xFF00_00FF]
        );
    }

    #[test]
    fn nine_patch_keeps_corners_unscaled() {
        let mut data = Vec::new();
        for y in 0..3 {
            for x in 0..3 {
                let center = x == 1 && y == 1;
                data.extend_from_slice(if center { &[255, 255, 255, 255] } else { &[0, 0, 0, 255] });
            }
        }
        let image = Image::new(3, 3, ImageFormat::Rgba8, data);
        let mut target = PixelBuffer::new(8, 8);
        RasterPainter::new(&mut target).draw_nine_patch(
            &euclid::rect(0.0, 0.0, 8.0, 8.0),
            &image,
            NinePatchInsets::uniform(1),
        );

        assert_eq!(target.pixel(0, 0), Some(0xFF00_0000));
        assert_eq!(target.pixel(0, 4), Some(0xFF00_0000));
        assert_eq!(target.pixel(1, 1), Some(0xFFFF_FFFF));
        assert_eq!(target.pixel(6, 6), Some(0xFFFF_FFFF));
        assert_eq!(target.pixel(7, 7), Some(0xFF00_0000));
    }

    #[test]
    fn glyph_coverage_tints_pixels() {
        let glyph = GlyphBitmap {
            x: 0,
            y: -1,
            width: 2,
            height: 1,
            coverage: vec![255, 0],
        };
        let mut target = PixelBuffer::new(2, 2);
        RasterPainter::new(&mut target).draw_glyph(Point::new(0.0, 1.0), &glyph, Color::BLACK);

        assert_eq!(target.pixels(), &[0xFF00_0000, 0, 0, 0]);
    }
}
