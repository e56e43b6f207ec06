use std::sync::Arc;

use strata::materials::{FlatColorMaterial, TextureMaterial};
use strata::software::{
    CanvasContent, GlyphBitmap, Image, ImageFormat, NinePatchInsets, Paintable, RasterPainter,
};
use strata::{
    ClipNode, Color, Geometry, GeometryNode, Matrix4, NodeId, NodeKind, OpacityNode, Rect,
    SceneGraph, TextureId, TransformNode,
};

use crate::expectations::PixelExpectation;

// ── Grid layout constants ────────────────────────────────────────────────────

const TILE_SIZE: u32 = 80;
const COLUMNS: u32 = 4;
const ROWS: u32 = 4;

pub const CANVAS_WIDTH: u32 = TILE_SIZE * COLUMNS;
pub const CANVAS_HEIGHT: u32 = TILE_SIZE * ROWS;

const CHECKERBOARD_TEXTURE_ID: TextureId = TextureId(100);
const FRAME_TEXTURE_ID: TextureId = TextureId(101);

/// Returns the pixel origin (top-left corner) of tile number `n` (1-based).
fn tile_origin(tile_number: u32) -> (f32, f32) {
    let index = tile_number - 1;
    let column = index % COLUMNS;
    let row = index / COLUMNS;
    ((column * TILE_SIZE) as f32, (row * TILE_SIZE) as f32)
}

/// Pixel position `(dx, dy)` inside the tile whose origin is `(ox, oy)`.
fn at(ox: f32, oy: f32, dx: u32, dy: u32) -> (u32, u32) {
    (ox as u32 + dx, oy as u32 + dy)
}

/// A geometry node that both renderers draw as a solid rectangle.
pub fn rect_node(rect: Rect, color: Color) -> NodeKind {
    NodeKind::Geometry(
        GeometryNode::new(Geometry::rect(rect), Arc::new(FlatColorMaterial::new(color)))
            .with_paintable(Paintable::Rect { rect, color }),
    )
}

/// A geometry node shaded with `color` on the GPU and painted as `paintable`
/// in software.
fn paintable_node(rect: Rect, color: Color, paintable: Paintable) -> NodeKind {
    NodeKind::Geometry(
        GeometryNode::new(Geometry::rect(rect), Arc::new(FlatColorMaterial::new(color)))
            .with_paintable(paintable),
    )
}

/// Builds the entire main test scene below a fresh root and returns a list
/// of pixel expectations for a software render on a white background.
pub fn build_main_scene(scene: &mut SceneGraph) -> Vec<PixelExpectation> {
    let root = scene.set_root(NodeKind::Root);
    let mut expectations: Vec<PixelExpectation> = Vec::new();

    expectations.extend(tile_01_rect_solid(scene, root));
    expectations.extend(tile_02_rounded_rect(scene, root));
    expectations.extend(tile_03_translated_rect(scene, root));
    expectations.extend(tile_04_scaled_rect(scene, root));
    expectations.extend(tile_05_clip_overflow(scene, root));
    expectations.extend(tile_06_nested_clips(scene, root));
    expectations.extend(tile_07_group_opacity(scene, root));
    expectations.extend(tile_08_alpha_overlap(scene, root));
    expectations.extend(tile_09_checkerboard_image(scene, root));
    expectations.extend(tile_10_nine_patch(scene, root));
    expectations.extend(tile_11_glyph_run(scene, root));
    expectations.extend(tile_12_blocked_subtree(scene, root));
    expectations.extend(tile_13_siblings_overlap(scene, root));
    expectations.extend(tile_14_canvas(scene, root));
    expectations.extend(tile_15_tiny_1px_rect(scene, root));
    expectations.extend(tile_16_bordered_rect(scene, root));

    expectations
}

// ── Section A: Basic content ─────────────────────────────────────────────────

fn tile_01_rect_solid(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(1);
    scene.append_child(
        root,
        rect_node(euclid::rect(ox + 10.0, oy + 10.0, 60.0, 60.0), Color::rgb(220, 50, 50)),
    );

    let (cx, cy) = at(ox, oy, 40, 40);
    let (bx, by) = at(ox, oy, 5, 5);
    vec![
        PixelExpectation::opaque(cx, cy, 220, 50, 50, "t01_interior"),
        PixelExpectation::background(bx, by, "t01_outside_is_canvas_bg"),
    ]
}

fn tile_02_rounded_rect(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(2);
    let rect = euclid::rect(ox + 10.0, oy + 10.0, 60.0, 60.0);
    let color = Color::rgb(50, 180, 50);
    scene.append_child(
        root,
        paintable_node(
            rect,
            color,
            Paintable::StyledRect {
                rect,
                color,
                border_color: Color::TRANSPARENT,
                border_width: 0.0,
                radius: 15.0,
            },
        ),
    );

    let (cx, cy) = at(ox, oy, 40, 40);
    // Inside the rect bounds but outside the corner curve.
    let (kx, ky) = at(ox, oy, 11, 11);
    vec![
        PixelExpectation::opaque(cx, cy, 50, 180, 50, "t02_interior"),
        PixelExpectation::background(kx, ky, "t02_corner_is_bg"),
    ]
}

// ── Section B: Transforms ────────────────────────────────────────────────────

fn tile_03_translated_rect(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(3);
    let transform = scene.append_child(
        root,
        NodeKind::Transform(TransformNode::new(Matrix4::translation(
            ox + 20.0,
            oy + 20.0,
            0.0,
        ))),
    );
    scene.append_child(
        transform,
        rect_node(euclid::rect(0.0, 0.0, 40.0, 40.0), Color::rgb(50, 50, 220)),
    );

    let (cx, cy) = at(ox, oy, 40, 40);
    let (bx, by) = at(ox, oy, 10, 10);
    vec![
        PixelExpectation::opaque(cx, cy, 50, 50, 220, "t03_moved_interior"),
        PixelExpectation::background(bx, by, "t03_origin_is_bg"),
    ]
}

fn tile_04_scaled_rect(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(4);
    let matrix = Matrix4::scale(2.0, 2.0, 1.0).then(&Matrix4::translation(
        ox + 10.0,
        oy + 10.0,
        0.0,
    ));
    let transform = scene.append_child(root, NodeKind::Transform(TransformNode::new(matrix)));
    scene.append_child(
        transform,
        rect_node(euclid::rect(0.0, 0.0, 20.0, 20.0), Color::rgb(200, 100, 200)),
    );

    let (cx, cy) = at(ox, oy, 45, 45);
    let (bx, by) = at(ox, oy, 60, 60);
    vec![
        PixelExpectation::opaque(cx, cy, 200, 100, 200, "t04_scaled_interior"),
        PixelExpectation::background(bx, by, "t04_beyond_scaled_edge"),
    ]
}

// ── Section C: Clipping ──────────────────────────────────────────────────────

fn tile_05_clip_overflow(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(5);
    let clip = scene.append_child(
        root,
        NodeKind::Clip(ClipNode::rect(euclid::rect(ox + 10.0, oy + 10.0, 30.0, 30.0))),
    );
    scene.append_child(
        clip,
        rect_node(euclid::rect(ox + 20.0, oy + 20.0, 50.0, 50.0), Color::rgb(150, 200, 150)),
    );

    let (ix, iy) = at(ox, oy, 30, 30);
    let (cx, cy) = at(ox, oy, 50, 50);
    vec![
        PixelExpectation::opaque(ix, iy, 150, 200, 150, "t05_inside_clip"),
        PixelExpectation::background(cx, cy, "t05_overflow_clipped"),
    ]
}

fn tile_06_nested_clips(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(6);
    let wide = scene.append_child(
        root,
        NodeKind::Clip(ClipNode::rect(euclid::rect(ox + 10.0, oy + 10.0, 60.0, 30.0))),
    );
    let tall = scene.append_child(
        wide,
        NodeKind::Clip(ClipNode::rect(euclid::rect(ox + 10.0, oy + 10.0, 30.0, 60.0))),
    );
    scene.append_child(
        tall,
        rect_node(euclid::rect(ox, oy, 80.0, 80.0), Color::rgb(100, 150, 220)),
    );

    let (ix, iy) = at(ox, oy, 20, 20);
    let (rx, ry) = at(ox, oy, 55, 20);
    let (dx, dy) = at(ox, oy, 20, 55);
    vec![
        PixelExpectation::opaque(ix, iy, 100, 150, 220, "t06_inside_both"),
        PixelExpectation::background(rx, ry, "t06_outside_tall_clip"),
        PixelExpectation::background(dx, dy, "t06_outside_wide_clip"),
    ]
}

// ── Section D: Opacity & blending ────────────────────────────────────────────

fn tile_07_group_opacity(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(7);
    let group = scene.append_child(root, NodeKind::Opacity(OpacityNode::new(0.5)));
    scene.append_child(
        group,
        rect_node(euclid::rect(ox + 10.0, oy + 10.0, 60.0, 60.0), Color::BLACK),
    );

    let (cx, cy) = at(ox, oy, 40, 40);
    vec![PixelExpectation::opaque(cx, cy, 127, 127, 127, "t07_half_black_over_white")]
}

fn tile_08_alpha_overlap(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(8);
    scene.append_child(
        root,
        rect_node(
            euclid::rect(ox + 10.0, oy + 10.0, 40.0, 40.0),
            Color::rgba(255, 0, 0, 128),
        ),
    );
    scene.append_child(
        root,
        rect_node(
            euclid::rect(ox + 30.0, oy + 30.0, 40.0, 40.0),
            Color::rgba(0, 0, 255, 128),
        ),
    );

    let (rx, ry) = at(ox, oy, 15, 15);
    let (px, py) = at(ox, oy, 40, 40);
    vec![
        PixelExpectation::opaque(rx, ry, 255, 127, 127, "t08_red_only"),
        PixelExpectation::opaque(px, py, 127, 63, 191, "t08_blue_over_red"),
    ]
}

// ── Section E: Images & text ─────────────────────────────────────────────────

/// 4×4 checkerboard of white and black RGBA texels, white at the origin.
fn checkerboard() -> Image {
    let mut data = vec![0u8; 4 * 4 * 4];
    for row in 0..4usize {
        for column in 0..4usize {
            let value = if (row + column) % 2 == 0 { 255 } else { 0 };
            let offset = (row * 4 + column) * 4;
            data[offset..offset + 4].copy_from_slice(&[value, value, value, 255]);
        }
    }
    Image::new(4, 4, ImageFormat::Rgba8, data)
}

fn tile_09_checkerboard_image(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(9);
    let rect = euclid::rect(ox + 10.0, oy + 10.0, 60.0, 60.0);
    scene.append_child(
        root,
        NodeKind::Geometry(
            GeometryNode::new(
                Geometry::textured_rect(rect),
                Arc::new(TextureMaterial::new(CHECKERBOARD_TEXTURE_ID, false)),
            )
            .with_paintable(Paintable::Image {
                rect,
                image: Arc::new(checkerboard()),
            }),
        ),
    );

    // Every texel covers 15×15 pixels.
    let (wx, wy) = at(ox, oy, 12, 12);
    let (kx, ky) = at(ox, oy, 27, 12);
    vec![
        PixelExpectation::opaque(wx, wy, 255, 255, 255, "t09_white_texel"),
        PixelExpectation::opaque(kx, ky, 0, 0, 0, "t09_black_texel"),
    ]
}

fn tile_10_nine_patch(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(10);
    let mut data = Vec::with_capacity(3 * 3 * 4);
    for row in 0..3 {
        for column in 0..3 {
            let center = row == 1 && column == 1;
            data.extend_from_slice(if center {
                &[240, 240, 240, 255]
            } else {
                &[30, 30, 30, 255]
            });
        }
    }
    let rect = euclid::rect(ox + 10.0, oy + 10.0, 60.0, 60.0);
    scene.append_child(
        root,
        NodeKind::Geometry(
            GeometryNode::new(
                Geometry::textured_rect(rect),
                Arc::new(TextureMaterial::new(FRAME_TEXTURE_ID, false)),
            )
            .with_paintable(Paintable::NinePatch {
                rect,
                image: Arc::new(Image::new(3, 3, ImageFormat::Rgba8, data)),
                insets: NinePatchInsets::uniform(1),
            }),
        ),
    );

    let (tx, ty) = at(ox, oy, 10, 10);
    let (ex, ey) = at(ox, oy, 10, 40);
    let (cx, cy) = at(ox, oy, 40, 40);
    vec![
        PixelExpectation::opaque(tx, ty, 30, 30, 30, "t10_corner"),
        PixelExpectation::opaque(ex, ey, 30, 30, 30, "t10_left_edge_one_pixel"),
        PixelExpectation::opaque(cx, cy, 240, 240, 240, "t10_stretched_center"),
    ]
}

fn tile_11_glyph_run(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(11);
    let glyph = GlyphBitmap {
        x: 0,
        y: -10,
        width: 10,
        height: 10,
        coverage: vec![255; 100],
    };
    let color = Color::rgb(20, 20, 20);
    scene.append_child(
        root,
        paintable_node(
            euclid::rect(ox + 20.0, oy + 30.0, 10.0, 10.0),
            color,
            Paintable::GlyphRun {
                origin: euclid::point2(ox + 20.0, oy + 40.0),
                glyphs: vec![glyph].into(),
                color,
            },
        ),
    );

    let (gx, gy) = at(ox, oy, 25, 35);
    let (bx, by) = at(ox, oy, 35, 35);
    vec![
        PixelExpectation::opaque(gx, gy, 20, 20, 20, "t11_glyph_covered"),
        PixelExpectation::background(bx, by, "t11_after_glyph"),
    ]
}

// ── Section F: Tree structure ────────────────────────────────────────────────

fn tile_12_blocked_subtree(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(12);
    let group = scene.append_child(root, NodeKind::Group);
    scene.append_child(
        group,
        rect_node(euclid::rect(ox, oy, 80.0, 80.0), Color::rgb(255, 0, 0)),
    );
    scene.set_subtree_blocked(group, true);

    let (cx, cy) = at(ox, oy, 40, 40);
    vec![PixelExpectation::background(cx, cy, "t12_blocked_is_bg")]
}

fn tile_13_siblings_overlap(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(13);
    scene.append_child(
        root,
        rect_node(euclid::rect(ox + 10.0, oy + 10.0, 40.0, 40.0), Color::rgb(40, 160, 40)),
    );
    scene.append_child(
        root,
        rect_node(euclid::rect(ox + 30.0, oy + 30.0, 40.0, 40.0), Color::rgb(120, 40, 160)),
    );

    let (fx, fy) = at(ox, oy, 15, 15);
    let (ox2, oy2) = at(ox, oy, 40, 40);
    vec![
        PixelExpectation::opaque(fx, fy, 40, 160, 40, "t13_first_sibling"),
        PixelExpectation::opaque(ox2, oy2, 120, 40, 160, "t13_later_sibling_on_top"),
    ]
}

/// Two horizontal bands.
#[derive(Debug)]
struct Bands {
    top: Color,
    bottom: Color,
}

impl CanvasContent for Bands {
    fn paint(&self, painter: &mut RasterPainter<'_>, rect: Rect) {
        let half = rect.height() / 2.0;
        painter.fill_rect(
            &euclid::rect(rect.min_x(), rect.min_y(), rect.width(), half),
            self.top,
        );
        painter.fill_rect(
            &euclid::rect(rect.min_x(), rect.min_y() + half, rect.width(), half),
            self.bottom,
        );
    }

    fn is_opaque(&self) -> bool {
        self.top.is_opaque() && self.bottom.is_opaque()
    }
}

fn tile_14_canvas(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(14);
    let rect = euclid::rect(ox + 10.0, oy + 10.0, 60.0, 60.0);
    let bands = Bands {
        top: Color::rgb(250, 150, 0),
        bottom: Color::rgb(0, 90, 160),
    };
    scene.append_child(
        root,
        paintable_node(
            rect,
            bands.top,
            Paintable::Canvas {
                rect,
                content: Arc::new(bands),
            },
        ),
    );

    let (tx, ty) = at(ox, oy, 40, 20);
    let (bx, by) = at(ox, oy, 40, 60);
    vec![
        PixelExpectation::opaque(tx, ty, 250, 150, 0, "t14_top_band"),
        PixelExpectation::opaque(bx, by, 0, 90, 160, "t14_bottom_band"),
    ]
}

// ── Section G: Edge cases ────────────────────────────────────────────────────

fn tile_15_tiny_1px_rect(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(15);
    scene.append_child(
        root,
        rect_node(euclid::rect(ox + 40.0, oy + 40.0, 1.0, 1.0), Color::BLACK),
    );

    let (px, py) = at(ox, oy, 40, 40);
    let (nx, ny) = at(ox, oy, 41, 40);
    vec![
        PixelExpectation::opaque(px, py, 0, 0, 0, "t15_single_pixel"),
        PixelExpectation::background(nx, ny, "t15_neighbour_is_bg"),
    ]
}

fn tile_16_bordered_rect(scene: &mut SceneGraph, root: NodeId) -> Vec<PixelExpectation> {
    let (ox, oy) = tile_origin(16);
    let rect = euclid::rect(ox + 10.0, oy + 10.0, 60.0, 60.0);
    let color = Color::rgb(240, 200, 60);
    scene.append_child(
        root,
        paintable_node(
            rect,
            color,
            Paintable::StyledRect {
                rect,
                color,
                border_color: Color::rgb(40, 40, 40),
                border_width: 4.0,
                radius: 0.0,
            },
        ),
    );

    let (bx, by) = at(ox, oy, 11, 40);
    let (cx, cy) = at(ox, oy, 40, 40);
    vec![
        PixelExpectation::opaque(bx, by, 40, 40, 40, "t16_border"),
        PixelExpectation::opaque(cx, cy, 240, 200, 60, "t16_fill"),
    ]
}
