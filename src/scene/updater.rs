use super::*;
use tracing::trace;

#[derive(Debug, Clone, Copy)]
struct InheritedState {
    matrix: Option<NodeId>,
    combined_matrix: Matrix4,
    clip_list: Option<NodeId>,
    opacity: f32,
}

impl InheritedState {
    fn root() -> Self {
        Self {
            matrix: None,
            combined_matrix: Matrix4::identity(),
            clip_list: None,
            opacity: 1.0,
        }
    }
}

/// Walk state: inherited state for the children of every entered node, and
/// the depth inside a skipped subtree.
struct UpdateWalk<'a> {
    inherited: Vec<InheritedState>,
    skip_depth: usize,
    changes: &'a mut Vec<(NodeId, DirtyFlags)>,
}

/// Recomputes accumulated state below the root: combined matrices of transform
/// nodes, combined opacity of opacity nodes, and the matrix, clip and opacity
/// links of every leaf and clip node.
///
/// Leaves whose links changed get a notification (`MATRIX`, `CLIP_LIST` or
/// `OPACITY`). Blocked subtrees are skipped and refreshed once they unblock.
pub fn update_states(scene: &mut SceneGraph) {
    let mut changes = std::mem::take(&mut scene.changes);
    let mut walk = UpdateWalk {
        inherited: Vec::new(),
        skip_depth: 0,
        changes: &mut changes,
    };
    scene.traverse_mut(enter, leave, &mut walk);
    scene.changes = changes;
}

fn enter(id: NodeId, node: &mut Node, walk: &mut UpdateWalk<'_>) {
    if walk.skip_depth > 0 {
        walk.skip_depth += 1;
        return;
    }
    if node.blocked {
        walk.skip_depth = 1;
        return;
    }

    let inherited = walk
        .inherited
        .last()
        .copied()
        .unwrap_or_else(InheritedState::root);
    let mut for_children = inherited;
    let mut changes = DirtyFlags::empty();
    let mut descend = true;

    match &mut node.kind {
        NodeKind::Root | NodeKind::Group => {}
        NodeKind::Transform(transform) => {
            transform.combined_matrix = transform.matrix.then(&inherited.combined_matrix);
            transform.parent_matrix = inherited.matrix;
            for_children.matrix = Some(id);
            for_children.combined_matrix = transform.combined_matrix;
        }
        NodeKind::Clip(clip) => {
            clip.matrix = inherited.matrix;
            clip.clip_list = inherited.clip_list;
            for_children.clip_list = Some(id);
        }
        NodeKind::Opacity(opacity) => {
            let was_blocked = opacity.is_subtree_blocked();
            opacity.combined_opacity = opacity.opacity * inherited.opacity;
            if was_blocked != opacity.is_subtree_blocked() {
                changes |= DirtyFlags::SUBTREE_BLOCKED;
            }
            descend = !opacity.is_subtree_blocked();
            for_children.opacity = opacity.combined_opacity;
        }
        NodeKind::Geometry(geometry) => {
            changes |= sync_leaf(
                &mut geometry.matrix,
                &mut geometry.clip_list,
                &mut geometry.inherited_opacity,
                &inherited,
            );
        }
        NodeKind::Render(entry) => {
            changes |= sync_leaf(
                &mut entry.matrix,
                &mut entry.clip_list,
                &mut entry.inherited_opacity,
                &inherited,
            );
        }
    }

    if !changes.is_empty() {
        trace!("{id}: accumulated state changed ({changes:?})");
        walk.changes.push((id, changes));
    }

    if descend {
        walk.inherited.push(for_children);
    } else {
        walk.skip_depth = 1;
    }
}

fn leave(_id: NodeId, _node: &mut Node, walk: &mut UpdateWalk<'_>) {
    if walk.skip_depth > 0 {
        walk.skip_depth -= 1;
        return;
    }
    walk.inherited.pop();
}

fn sync_leaf(
    matrix: &mut Option<NodeId>,
    clip_list: &mut Option<NodeId>,
    opacity: &mut f32,
    inherited: &InheritedState,
) -> DirtyFlags {
    let mut changes = DirtyFlags::empty();
    if *matrix != inherited.matrix {
        *matrix = inherited.matrix;
        changes |= DirtyFlags::MATRIX;
    }
    if *clip_list != inherited.clip_list {
        *clip_list = inherited.clip_list;
        changes |= DirtyFlags::CLIP_LIST;
    }
    if *opacity != inherited.opacity {
        *opacity = inherited.opacity;
        changes |= DirtyFlags::OPACITY;
    }
    changes
}
