use smallvec::SmallVec;

use crate::geometry::DeviceRect;

/// Rect count above which a region collapses into its bounding rect.
const MAX_REGION_RECTS: usize = 16;

/// Set of device pixels that must be repainted, as a short list of rects.
///
/// Adding is conservative: once the list grows past a small bound the region
/// becomes its bounding rect, which only ever repaints more than needed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirtyRegion {
    rects: SmallVec<[DeviceRect; 4]>,
}

impl DirtyRegion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_rect(rect: DeviceRect) -> Self {
        let mut region = Self::new();
        region.add_rect(rect);
        region
    }

    pub fn is_empty(&self) -> bool {
        self.rects.is_empty()
    }

    pub fn rects(&self) -> &[DeviceRect] {
        &self.rects
    }

    pub fn clear(&mut self) {
        self.rects.clear();
    }

    pub fn bounding_rect(&self) -> DeviceRect {
        self.rects
            .iter()
            .fold(DeviceRect::default(), |bounds, rect| bounds.united(rect))
    }

    /// Sum of the rect areas; overlapping rects count twice.
    pub fn area(&self) -> i64 {
        self.rects.iter().map(DeviceRect::area).sum()
    }

    pub fn intersects(&self, rect: &DeviceRect) -> bool {
        self.rects.iter().any(|own| own.intersects(rect))
    }

    pub fn add_rect(&mut self, rect: DeviceRect) {
        if rect.is_empty() || self.rects.iter().any(|own| own.contains_rect(&rect)) {
            return;
        }
        self.rects.retain(|own| !rect.contains_rect(own));
        self.rects.push(rect);
        if self.rects.len() > MAX_REGION_RECTS {
            let bounds = self.bounding_rect();
            self.rects.clear();
            self.rects.push(bounds);
        }
    }

    pub fn add_region(&mut self, other: &DirtyRegion) {
        for rect in &other.rects {
            self.add_rect(*rect);
        }
    }

    /// Keeps only the parts inside `clip`.
    pub fn intersected(&self, clip: &DeviceRect) -> DirtyRegion {
        let mut result = DirtyRegion::new();
        for rect in &self.rects {
            result.add_rect(rect.intersect(clip));
        }
        result
    }

    /// Removes `hole` from the region. When the pieces would exceed the rect
    /// bound the region is left as it was, which is still a superset.
    pub fn subtract_rect(&mut self, hole: &DeviceRect) {
        if hole.is_empty() || !self.intersects(hole) {
            return;
        }
        let mut pieces: SmallVec<[DeviceRect; 4]> = SmallVec::new();
        for rect in &self.rects {
            split_around(rect, hole, &mut pieces);
        }
        if pieces.len() <= MAX_REGION_RECTS {
            self.rects = pieces;
        }
    }

    pub fn subtract_region(&mut self, other: &DirtyRegion) {
        for hole in &other.rects {
            self.subtract_rect(hole);
        }
    }
}

/// Pushes the parts of `rect` outside `hole`: full-width bands above and below,
/// then the left and right remainders of the middle band.
fn split_around(rect: &DeviceRect, hole: &DeviceRect, pieces: &mut SmallVec<[DeviceRect; 4]>) {
    let overlap = rect.intersect(hole);
    if overlap.is_empty() {
        pieces.push(*rect);
        return;
    }
    let mut push = |piece: DeviceRect| {
        if !piece.is_empty() {
            pieces.push(piece);
        }
    };
    push(DeviceRect::new(rect.x, rect.y, rect.width, overlap.y - rect.y));
    push(DeviceRect::new(
        rect.x,
        overlap.bottom(),
        rect.width,
        rect.bottom() - overlap.bottom(),
    ));
    push(DeviceRect::new(rect.x, overlap.y, overlap.x - rect.x, overlap.height));
    push(DeviceRect::new(
        overlap.right(),
        overlap.y,
        rect.right() - overlap.right(),
        overlap.height,
    ));
}
