use super::*;

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        debug!("creating renderer with {config:?}");
        Self {
            config,
            device_rect: DeviceRect::default(),
            viewport_rect: DeviceRect::default(),
            projection_matrix: Matrix4::identity(),

            lists: RenderLists::with_capacity(config.initial_list_capacity),
            shader_cache: ShaderCache::new(),
            commands: CommandList::with_capacity(config.initial_list_capacity * 4),

            needs_rebuild: true,
            needs_resort: true,
            emit_state: EmitState::default(),

            frame_statistics: FrameStatistics::default(),
            last_frame_statistics: FrameStatistics::default(),
            #[cfg(feature = "render_metrics")]
            last_phase_timings: PhaseTimings::default(),
        }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Changes the tie-break of opaque nodes with equal batching keys.
    ///
    /// Enabling takes effect through a re-sort. Disabling rebuilds the lists,
    /// since equal keys must fall back to traversal order, which the sorted
    /// lists no longer hold.
    pub fn set_sort_front_to_back_enabled(&mut self, enabled: bool) {
        if self.config.sort_front_to_back == enabled {
            return;
        }
        self.config.sort_front_to_back = enabled;
        if enabled {
            self.needs_resort = true;
        } else {
            self.needs_rebuild = true;
        }
    }

    pub fn is_sort_front_to_back_enabled(&self) -> bool {
        self.config.sort_front_to_back
    }

    /// Enables merging of transparent runs below `CHILDREN_DO_NOT_OVERLAP`
    /// nodes. Takes effect on the next frame through a rebuild.
    pub fn set_reorder_nodes_enabled(&mut self, enabled: bool) {
        if self.config.reorder_nodes != enabled {
            self.config.reorder_nodes = enabled;
            self.needs_rebuild = true;
        }
    }

    pub fn is_reorder_nodes_enabled(&self) -> bool {
        self.config.reorder_nodes
    }

    pub fn set_clear_color(&mut self, color: Color) {
        self.config.clear_color = color;
    }

    pub fn clear_color(&self) -> Color {
        self.config.clear_color
    }

    pub fn set_clear_mode(&mut self, mode: ClearMode) {
        self.config.clear_mode = mode;
    }

    pub fn clear_mode(&self) -> ClearMode {
        self.config.clear_mode
    }
}
