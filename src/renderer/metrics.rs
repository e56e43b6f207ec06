use std::time::Duration;

use super::Renderer;

/// Per-frame counts of the state changes the renderer emitted.
///
/// `scissor_clips` and `stencil_clips` count clip lists resolved to each
/// technique; a clip list needing both counts towards both.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStatistics {
    /// Draw calls issued for geometry nodes.
    pub draw_calls: u32,
    /// Draw calls left once back-to-back draws with identical state are merged.
    pub batches: u32,
    /// Program activations, including forced re-activations after stencil clips.
    pub program_switches: u32,
    /// Program switches plus material instance changes within one program.
    pub material_changes: u32,
    /// Uniform updates that carried a new matrix.
    pub matrix_uploads: u32,
    /// Uniform updates that carried a new opacity.
    pub opacity_uploads: u32,
    /// Uniform block uploads of any kind.
    pub uniform_uploads: u32,
    /// Depth changes caused by a new render order.
    pub depth_changes: u32,
    /// Clip list transitions.
    pub clip_changes: u32,
    pub scissor_clips: u32,
    pub stencil_clips: u32,
    pub render_node_calls: u32,
    pub opaque_nodes: u32,
    pub transparent_nodes: u32,
    /// Number of frames that rebuilt the lists.
    pub rebuilds: u32,
    /// Number of frames that re-sorted the opaque ranges.
    pub resorts: u32,
}

impl FrameStatistics {
    /// Merge another frame's counts into this accumulator.
    pub fn accumulate(&mut self, other: &Self) {
        self.draw_calls += other.draw_calls;
        self.batches += other.batches;
        self.program_switches += other.program_switches;
        self.material_changes += other.material_changes;
        self.matrix_uploads += other.matrix_uploads;
        self.opacity_uploads += other.opacity_uploads;
        self.uniform_uploads += other.uniform_uploads;
        self.depth_changes += other.depth_changes;
        self.clip_changes += other.clip_changes;
        self.scissor_clips += other.scissor_clips;
        self.stencil_clips += other.stencil_clips;
        self.render_node_calls += other.render_node_calls;
        self.opaque_nodes += other.opaque_nodes;
        self.transparent_nodes += other.transparent_nodes;
        self.rebuilds += other.rebuilds;
        self.resorts += other.resorts;
    }
}

/// Per-phase timing breakdown for a single frame.
///
/// Available when the `render_metrics` feature is enabled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Time spent refreshing accumulated node state and draining notifications.
    pub update: Duration,
    /// Time spent rebuilding the opaque and transparent lists.
    pub build: Duration,
    /// Time spent sorting the opaque ranges.
    pub sort: Duration,
    /// Time spent recording commands.
    pub emit: Duration,
    /// Total frame time.
    pub total: Duration,
}

impl PhaseTimings {
    pub fn accumulate(&mut self, other: &Self) {
        self.update += other.update;
        self.build += other.build;
        self.sort += other.sort;
        self.emit += other.emit;
        self.total += other.total;
    }
}

impl Renderer {
    /// Returns the state-change counts of the most recently rendered frame.
    pub fn last_frame_statistics(&self) -> FrameStatistics {
        self.last_frame_statistics
    }

    /// Returns the per-phase timing breakdown for the most recently rendered frame.
    #[cfg(feature = "render_metrics")]
    pub fn last_phase_timings(&self) -> PhaseTimings {
        self.last_phase_timings
    }
}
