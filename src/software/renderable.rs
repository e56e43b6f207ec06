use tracing::trace;

use crate::geometry::{is_rectilinear, map_rect, DeviceRect, Matrix4, Point, Rect};
use crate::id::NodeId;
use crate::scene::{GeometryNode, SceneGraph};

use super::paintable::Paintable;
use super::painter::{CompositionMode, RasterPainter};
use super::region::DirtyRegion;

/// Software-side state of one paintable geometry node.
///
/// Keeps the device-space bounds of the last update so a change can dirty
/// both where the node was and where it is now.
#[derive(Debug, Clone)]
pub(crate) struct RenderableNode {
    paintable: Paintable,
    transform: Matrix4,
    opacity: f32,
    clip: Option<DeviceRect>,
    bounds: DeviceRect,
    opaque: bool,
    dirty: DirtyRegion,
}

impl RenderableNode {
    pub(crate) fn new(paintable: Paintable) -> Self {
        Self {
            paintable,
            transform: Matrix4::identity(),
            opacity: 1.0,
            clip: None,
            bounds: DeviceRect::default(),
            opaque: false,
            dirty: DirtyRegion::new(),
        }
    }

    pub(crate) fn bounds(&self) -> DeviceRect {
        self.bounds
    }

    pub(crate) fn is_opaque(&self) -> bool {
        self.opaque
    }

    pub(crate) fn dirty_region(&self) -> &DirtyRegion {
        &self.dirty
    }

    pub(crate) fn dirty_region_mut(&mut self) -> &mut DirtyRegion {
        &mut self.dirty
    }

    /// Recomputes transform, opacity and clipped bounds from `node`, then
    /// dirties the union of the previous and the new bounds.
    pub(crate) fn update(&mut self, scene: &SceneGraph, id: NodeId, node: &GeometryNode) {
        if let Some(paintable) = node.paintable() {
            self.paintable = paintable.clone();
        }
        self.transform = scene.combined_matrix(node.matrix());
        self.opacity = node.inherited_opacity();
        self.clip = clip_bounds(scene, node.clip_list());

        let previous = self.bounds;
        self.bounds = map_rect(&self.transform, &self.paintable.bounds())
            .map(|rect| DeviceRect::from_covering(&rect))
            .unwrap_or_default();
        if let Some(clip) = &self.clip {
            self.bounds = self.bounds.intersect(clip);
        }
        self.opaque = self.opacity >= 1.0
            && is_rectilinear(&self.transform)
            && self.paintable.is_opaque();

        self.dirty.add_rect(previous);
        self.dirty.add_rect(self.bounds);
        trace!(
            "{id}: software bounds {:?} -> {:?}, opaque: {}",
            previous,
            self.bounds,
            self.opaque
        );
    }

    /// Paints the node limited to `area`, which lies inside its bounds.
    pub(crate) fn paint(&self, painter: &mut RasterPainter<'_>, area: DeviceRect) {
        let clip = match &self.clip {
            Some(clip) => area.intersect(clip),
            None => area,
        };
        if clip.is_empty() {
            return;
        }
        painter.set_clip_rect(clip);
        painter.set_opacity(self.opacity);
        painter.set_composition_mode(if self.opaque {
            CompositionMode::Source
        } else {
            CompositionMode::SourceOver
        });

        let Some(target) = map_rect(&self.transform, &self.paintable.bounds()) else {
            return;
        };
        match &self.paintable {
            Paintable::Rect { color, .. } => painter.fill_rect(&target, *color),
            Paintable::Image { image, .. } => painter.draw_image(&target, image),
            Paintable::Canvas { content, .. } => content.paint(painter, target),
            Paintable::StyledRect {
                color,
                border_color,
                border_width,
                radius,
                ..
            } => {
                let scale = self.transform.m11.abs().max(self.transform.m12.abs());
                painter.draw_styled_rect(
                    &target,
                    radius * scale,
                    *color,
                    *border_color,
                    border_width * scale,
                )
            }
            Paintable::GlyphRun {
                origin,
                glyphs,
                color,
            } => {
                let origin = self
                    .transform
                    .transform_point2d(*origin)
                    .unwrap_or(Point::origin());
                for glyph in glyphs.iter() {
                    painter.draw_glyph(origin, glyph, *color);
                }
            }
            Paintable::NinePatch { image, insets, .. } => {
                painter.draw_nine_patch(&target, image, *insets)
            }
        }
    }
}

/// Device-space intersection of the rectangular bounds of every clip in the
/// chain starting at `clip_list`. Shaped clips contribute their bounding box.
fn clip_bounds(scene: &SceneGraph, clip_list: Option<NodeId>) -> Option<DeviceRect> {
    let mut bounds: Option<DeviceRect> = None;
    let mut current = clip_list;
    while let Some(id) = current {
        let Some(clip) = scene.clip_node(id) else {
            break;
        };
        let local: Rect = if clip.is_rectangular() {
            clip.clip_rect()
        } else {
            clip.geometry().bounds().unwrap_or_default()
        };
        let device = map_rect(&scene.combined_matrix(clip.matrix()), &local)
            .map(|rect| DeviceRect::from_rounded(&rect))
            .unwrap_or_default();
        bounds = Some(match bounds {
            Some(bounds) => bounds.intersect(&device),
            None => device,
        });
        current = clip.clip_list();
    }
    bounds
}
