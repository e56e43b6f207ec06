use std::fmt;
use std::sync::Arc;

use crate::color::Color;
use crate::geometry::{Point, Rect};

use super::buffer::Image;
use super::painter::RasterPainter;

/// Content a geometry node shows when drawn by the software renderer.
///
/// Coordinates are in the node's local space; the renderer maps them through
/// the node's accumulated transform.
#[derive(Debug, Clone)]
pub enum Paintable {
    /// Solid rectangle.
    Rect { rect: Rect, color: Color },
    /// Image stretched over `rect`.
    Image { rect: Rect, image: Arc<Image> },
    /// Custom content painted through a [`RasterPainter`].
    Canvas {
        rect: Rect,
        content: Arc<dyn CanvasContent>,
    },
    /// Rounded rectangle with an optional border.
    StyledRect {
        rect: Rect,
        color: Color,
        border_color: Color,
        border_width: f32,
        radius: f32,
    },
    /// Pre-rasterized glyph coverage masks tinted with `color`.
    GlyphRun {
        origin: Point,
        glyphs: Arc<[GlyphBitmap]>,
        color: Color,
    },
    /// Image scaled with fixed-size borders.
    NinePatch {
        rect: Rect,
        image: Arc<Image>,
        insets: NinePatchInsets,
    },
}

impl Paintable {
    /// Local-space rect the content stays within.
    pub fn bounds(&self) -> Rect {
        match self {
            Paintable::Rect { rect, .. }
            | Paintable::Image { rect, .. }
            | Paintable::Canvas { rect, .. }
            | Paintable::StyledRect { rect, .. }
            | Paintable::NinePatch { rect, .. } => *rect,
            Paintable::GlyphRun { origin, glyphs, .. } => glyphs
                .iter()
                .map(|glyph| glyph.rect(*origin))
                .reduce(|bounds, rect| bounds.union(&rect))
                .unwrap_or_else(|| Rect::new(*origin, Default::default())),
        }
    }

    /// Whether the content covers every pixel of its bounds with full alpha.
    pub fn is_opaque(&self) -> bool {
        match self {
            Paintable::Rect { color, .. } => color.is_opaque(),
            Paintable::Image { image, .. } | Paintable::NinePatch { image, .. } => {
                !image.has_alpha()
            }
            Paintable::StyledRect {
                color,
                border_color,
                border_width,
                radius,
                ..
            } => {
                *radius <= 0.0
                    && color.is_opaque()
                    && (*border_width <= 0.0 || border_color.is_opaque())
            }
            Paintable::Canvas { content, .. } => content.is_opaque(),
            Paintable::GlyphRun { .. } => false,
        }
    }
}

/// Painter-driven node content.
pub trait CanvasContent: fmt::Debug + Send + Sync {
    /// Paints into `rect`, already in device space. Clip, opacity and
    /// composition mode are set up by the caller.
    fn paint(&self, painter: &mut RasterPainter<'_>, rect: Rect);

    fn is_opaque(&self) -> bool {
        false
    }
}

/// One glyph's 8-bit coverage mask, positioned relative to the run origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlyphBitmap {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub coverage: Vec<u8>,
}

impl GlyphBitmap {
    fn rect(&self, origin: Point) -> Rect {
        euclid::rect(
            origin.x + self.x as f32,
            origin.y + self.y as f32,
            self.width as f32,
            self.height as f32,
        )
    }
}

/// Border widths of a nine-patch image in image pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NinePatchInsets {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl NinePatchInsets {
    pub fn uniform(inset: u32) -> Self {
        Self {
            left: inset,
            top: inset,
            right: inset,
            bottom: inset,
        }
    }
}
