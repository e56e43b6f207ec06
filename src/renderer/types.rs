use bitflags::bitflags;

bitflags! {
    /// Buffers cleared at the start of a frame.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ClearMode: u32 {
        const COLOR = 0x01;
        const DEPTH = 0x02;
        const STENCIL = 0x04;
    }
}

impl Default for ClearMode {
    fn default() -> Self {
        ClearMode::all()
    }
}

bitflags! {
    /// Clipping currently in effect. Empty means no clip.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClipType: u32 {
        const SCISSOR = 0x01;
        const STENCIL = 0x02;
    }
}

/// End offsets of one draw group in the opaque and transparent lists.
///
/// Groups are drawn in order, each as its opaque range followed by its
/// transparent range. A render node closes the current group so opaque nodes
/// visited after it can never be sorted in front of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RenderGroup {
    pub opaque_end: usize,
    pub transparent_end: usize,
}

/// Which half of a render group is being drawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Pass {
    Opaque,
    Transparent,
}

impl Pass {
    pub(crate) fn blending(self) -> bool {
        matches!(self, Pass::Transparent)
    }

    pub(crate) fn depth_write(self) -> bool {
        matches!(self, Pass::Opaque)
    }
}
