use crate::util::round_to_pixel;

pub type Matrix4 = euclid::default::Transform3D<f32>;
pub type Rect = euclid::default::Rect<f32>;
pub type Point = euclid::default::Point2D<f32>;
pub type Size = euclid::default::Size2D<f32>;

/// Primitive topology of a [`Geometry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DrawingMode {
    #[default]
    Triangles,
    TriangleStrip,
    Lines,
    LineStrip,
    Points,
}

impl DrawingMode {
    /// Independent primitives, which stay intact when index lists are joined.
    pub fn is_list(self) -> bool {
        matches!(
            self,
            DrawingMode::Triangles | DrawingMode::Lines | DrawingMode::Points
        )
    }
}

/// Geometries with more vertices than this are always drawn on their own.
pub const BATCH_VERTEX_THRESHOLD: usize = 1024;
/// Vertices one merged draw can hold with 16-bit indices.
pub const MAX_BATCH_VERTICES: usize = u16::MAX as usize + 1;

/// Vertex and index data of a drawable.
///
/// The vertex layout is owned by the material that draws it, with one rule shared
/// by every material: the first attribute of each vertex is the position as two
/// `f32`. Clip geometry is rasterized into the stencil buffer through that
/// attribute alone.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Geometry {
    vertex_data: Vec<u8>,
    vertex_stride: u32,
    indices: Vec<u16>,
    drawing_mode: DrawingMode,
}

impl Geometry {
    pub fn new(
        vertex_data: Vec<u8>,
        vertex_stride: u32,
        indices: Vec<u16>,
        drawing_mode: DrawingMode,
    ) -> Self {
        debug_assert!(vertex_stride >= 8, "vertices must start with an f32x2 position");
        debug_assert_eq!(vertex_data.len() % vertex_stride as usize, 0);
        Self {
            vertex_data,
            vertex_stride,
            indices,
            drawing_mode,
        }
    }

    /// Position-only geometry.
    pub fn from_positions(positions: &[[f32; 2]], indices: Vec<u16>) -> Self {
        Self::new(
            bytemuck::cast_slice(positions).to_vec(),
            8,
            indices,
            DrawingMode::Triangles,
        )
    }

    /// Two triangles covering `rect`.
    pub fn rect(rect: Rect) -> Self {
        Self::from_positions(&rect_corners(&rect), vec![0, 1, 2, 2, 1, 3])
    }

    /// Two triangles covering `rect` with interleaved `(x, y, u, v)` vertices
    /// spanning the full texture.
    pub fn textured_rect(rect: Rect) -> Self {
        let corners = rect_corners(&rect);
        let uvs = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0], [1.0, 1.0]];
        let vertices: Vec<[f32; 4]> = corners
            .iter()
            .zip(uvs.iter())
            .map(|(position, uv)| [position[0], position[1], uv[0], uv[1]])
            .collect();
        Self::new(
            bytemuck::cast_slice(&vertices).to_vec(),
            16,
            vec![0, 1, 2, 2, 1, 3],
            DrawingMode::Triangles,
        )
    }

    pub fn vertex_data(&self) -> &[u8] {
        &self.vertex_data
    }

    pub fn vertex_stride(&self) -> u32 {
        self.vertex_stride
    }

    pub fn vertex_count(&self) -> usize {
        if self.vertex_stride == 0 {
            return 0;
        }
        self.vertex_data.len() / self.vertex_stride as usize
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    pub fn drawing_mode(&self) -> DrawingMode {
        self.drawing_mode
    }

    pub fn set_drawing_mode(&mut self, drawing_mode: DrawingMode) {
        self.drawing_mode = drawing_mode;
    }

    pub fn is_empty(&self) -> bool {
        self.vertex_count() == 0
    }

    /// Whether back-to-back draws of `self` and `other` with identical state
    /// can be issued as one draw call.
    pub fn can_merge_with(&self, other: &Geometry) -> bool {
        self.is_mergeable()
            && other.is_mergeable()
            && self.vertex_stride == other.vertex_stride
            && self.drawing_mode == other.drawing_mode
    }

    fn is_mergeable(&self) -> bool {
        self.drawing_mode.is_list() && (1..=BATCH_VERTEX_THRESHOLD).contains(&self.vertex_count())
    }

    /// Appends this geometry's indices shifted by `base_vertex`. Unindexed
    /// geometry contributes one index per vertex.
    pub(crate) fn append_rebased_indices(&self, base_vertex: usize, indices: &mut Vec<u16>) {
        let base = base_vertex as u16;
        if self.indices.is_empty() {
            indices.extend((0..self.vertex_count() as u16).map(|index| base + index));
        } else {
            indices.extend(self.indices.iter().map(|index| base + index));
        }
    }

    /// Iterates the leading position attribute of every vertex.
    pub fn positions(&self) -> impl Iterator<Item = [f32; 2]> + '_ {
        self.vertex_data
            .chunks_exact(self.vertex_stride.max(8) as usize)
            .map(|vertex| {
                let x = f32::from_ne_bytes([vertex[0], vertex[1], vertex[2], vertex[3]]);
                let y = f32::from_ne_bytes([vertex[4], vertex[5], vertex[6], vertex[7]]);
                [x, y]
            })
    }

    /// Axis-aligned bounds of the positions, `None` for empty geometry.
    pub fn bounds(&self) -> Option<Rect> {
        let mut positions = self.positions();
        let first = positions.next()?;
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (first[0], first[1], first[0], first[1]);
        for [x, y] in positions {
            min_x = min_x.min(x);
            min_y = min_y.min(y);
            max_x = max_x.max(x);
            max_y = max_y.max(y);
        }
        Some(Rect::new(
            Point::new(min_x, min_y),
            Size::new(max_x - min_x, max_y - min_y),
        ))
    }
}

fn rect_corners(rect: &Rect) -> [[f32; 2]; 4] {
    [
        [rect.min_x(), rect.min_y()],
        [rect.max_x(), rect.min_y()],
        [rect.min_x(), rect.max_y()],
        [rect.max_x(), rect.max_y()],
    ]
}

/// Integer rectangle in device pixels, origin at the top-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DeviceRect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl DeviceRect {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn from_size(width: u32, height: u32) -> Self {
        Self::new(0, 0, width as i32, height as i32)
    }

    /// Smallest pixel rect enclosing `rect` after rounding each edge to the
    /// nearest pixel.
    pub fn from_rounded(rect: &Rect) -> Self {
        let left = round_to_pixel(rect.min_x());
        let top = round_to_pixel(rect.min_y());
        let right = round_to_pixel(rect.max_x());
        let bottom = round_to_pixel(rect.max_y());
        Self::new(left, top, right - left, bottom - top)
    }

    /// Smallest pixel rect fully covering `rect`.
    pub fn from_covering(rect: &Rect) -> Self {
        let left = rect.min_x().floor() as i32;
        let top = rect.min_y().floor() as i32;
        let right = rect.max_x().ceil() as i32;
        let bottom = rect.max_y().ceil() as i32;
        Self::new(left, top, right - left, bottom - top)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    pub fn area(&self) -> i64 {
        if self.is_empty() {
            0
        } else {
            self.width as i64 * self.height as i64
        }
    }

    /// Overlapping region; a zero-size rect when the two do not overlap.
    pub fn intersect(&self, other: &Self) -> Self {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Self::new(left, top, (right - left).max(0), (bottom - top).max(0))
    }

    pub fn intersects(&self, other: &Self) -> bool {
        !self.intersect(other).is_empty()
    }

    /// Bounding rect of both; empty operands are ignored.
    pub fn united(&self, other: &Self) -> Self {
        if self.is_empty() {
            return *other;
        }
        if other.is_empty() {
            return *self;
        }
        let left = self.x.min(other.x);
        let top = self.y.min(other.y);
        let right = self.right().max(other.right());
        let bottom = self.bottom().max(other.bottom());
        Self::new(left, top, right - left, bottom - top)
    }

    pub fn contains_rect(&self, other: &Self) -> bool {
        other.is_empty()
            || (other.x >= self.x
                && other.y >= self.y
                && other.right() <= self.right()
                && other.bottom() <= self.bottom())
    }

    pub fn contains_point(&self, x: i32, y: i32) -> bool {
        x >= self.x && y >= self.y && x < self.right() && y < self.bottom()
    }

    pub fn to_rect(&self) -> Rect {
        Rect::new(
            Point::new(self.x as f32, self.y as f32),
            Size::new(self.width as f32, self.height as f32),
        )
    }
}

/// Transforms the four corners of `rect` and returns their bounding box, or
/// `None` when a corner lands behind the projection plane.
pub fn map_rect(matrix: &Matrix4, rect: &Rect) -> Option<Rect> {
    let corners = rect_corners(rect);
    let mut mapped = corners
        .iter()
        .map(|corner| matrix.transform_point2d(Point::new(corner[0], corner[1])));
    let first = mapped.next()??;
    let (mut min_x, mut min_y, mut max_x, mut max_y) = (first.x, first.y, first.x, first.y);
    for point in mapped {
        let point = point?;
        min_x = min_x.min(point.x);
        min_y = min_y.min(point.y);
        max_x = max_x.max(point.x);
        max_y = max_y.max(point.y);
    }
    Some(Rect::new(
        Point::new(min_x, min_y),
        Size::new(max_x - min_x, max_y - min_y),
    ))
}

/// True when the 2D part of `matrix` keeps rectangles axis-aligned: translation,
/// scale, or a multiple of 90° rotation, with no perspective.
pub fn is_rectilinear(matrix: &Matrix4) -> bool {
    const EPSILON: f32 = 1e-5;
    let no_perspective = matrix.m14.abs() < EPSILON && matrix.m24.abs() < EPSILON;
    let no_rotate = matrix.m12.abs() < EPSILON && matrix.m21.abs() < EPSILON;
    let rotate_90 = matrix.m11.abs() < EPSILON && matrix.m22.abs() < EPSILON;
    no_perspective && (no_rotate || rotate_90)
}
