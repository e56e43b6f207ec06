use super::ordering::compare_nodes;
use super::*;

impl Renderer {
    /// Sorts the opaque range of every render group by batching key.
    ///
    /// The sort is stable so equal keys keep traversal order, and ranges never
    /// mix across render groups. Transparent lists are left in draw order.
    pub(super) fn sort_opaque_groups(&mut self, scene: &SceneGraph) {
        let front_to_back = self.config.sort_front_to_back;
        let mut start = 0;
        for group_index in 0..self.lists.render_groups.len() {
            let end = self.lists.render_groups[group_index].opaque_end;
            self.lists.opaque_nodes[start..end]
                .sort_by(|a, b| compare_nodes(scene, *a, *b, front_to_back));
            start = end;
        }
    }
}
