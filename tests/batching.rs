/// End-to-end batching tests: scene in, render lists and command list out.
///
/// Run with:   cargo test --test batching
use std::cmp::Ordering;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use strata::materials::{FlatColorMaterial, TextureMaterial};
use strata::{
    ClipNode, Color, DeviceRect, DirtyFlags, Geometry, GeometryNode, GpuCommand, Material,
    Matrix4, NodeFlags, NodeId, NodeKind, OpacityNode, Renderer, RendererConfig, SceneGraph,
    TextureId, TransformNode,
};
use strata_test_scenes::{build_main_scene, CANVAS_HEIGHT, CANVAS_WIDTH};

fn renderer() -> Renderer {
    let mut renderer = Renderer::new(RendererConfig::default());
    renderer.resize((CANVAS_WIDTH, CANVAS_HEIGHT));
    renderer
}

fn rect_with(material: Arc<dyn Material>) -> NodeKind {
    NodeKind::Geometry(GeometryNode::new(
        Geometry::rect(euclid::rect(0.0, 0.0, 10.0, 10.0)),
        material,
    ))
}

fn flat(color: Color) -> NodeKind {
    rect_with(Arc::new(FlatColorMaterial::new(color)))
}

fn material_of(scene: &SceneGraph, id: NodeId) -> Arc<dyn Material> {
    scene
        .geometry_node(id)
        .and_then(|node| node.active_material())
        .cloned()
        .expect("geometry node with a material")
}

/// Batching key of a node under the root: material type, then material order.
fn batching_order(scene: &SceneGraph, a: NodeId, b: NodeId) -> Ordering {
    let (a, b) = (material_of(scene, a), material_of(scene, b));
    a.material_type()
        .identity()
        .cmp(&b.material_type().identity())
        .then_with(|| a.compare(b.as_ref()))
}

/// Paintable geometry nodes in depth-first traversal order.
fn traversal_order(scene: &SceneGraph) -> Vec<NodeId> {
    let mut order = Vec::new();
    let mut stack: Vec<NodeId> = scene.root().into_iter().collect();
    while let Some(id) = stack.pop() {
        if scene.is_subtree_blocked(id) {
            continue;
        }
        if scene.geometry_node(id).is_some() {
            order.push(id);
        }
        let first = stack.len();
        stack.extend(scene.children(id));
        stack[first..].reverse();
    }
    order
}

fn random_opaque_material(rng: &mut StdRng) -> Arc<dyn Material> {
    let shade = rng.random_range(0..6u8) * 40;
    if rng.random_bool(0.3) {
        Arc::new(TextureMaterial::new(TextureId(rng.random_range(0..3)), false))
    } else {
        Arc::new(FlatColorMaterial::new(Color::rgb(shade, 255 - shade, 90)))
    }
}

fn random_translucent_color(rng: &mut StdRng) -> Color {
    let shade = rng.random_range(0..4u8) * 60;
    Color::rgba(shade, 100, 255 - shade, 128)
}

// ── Scenarios ────────────────────────────────────────────────────────────────

#[test]
fn two_opaque_siblings_sort_by_material_type() {
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    let textured = scene.append_child(
        root,
        rect_with(Arc::new(TextureMaterial::new(TextureId(7), false))),
    );
    let colored = scene.append_child(root, flat(Color::rgb(0, 128, 0)));

    let mut renderer = renderer();
    renderer.render(&mut scene);

    let texture_first = material_of(&scene, textured).material_type().identity()
        < material_of(&scene, colored).material_type().identity();
    let expected = if texture_first {
        vec![textured, colored]
    } else {
        vec![colored, textured]
    };
    assert_eq!(renderer.opaque_nodes(), expected.as_slice());
    assert!(renderer.transparent_nodes().is_empty());
}

#[test]
fn non_overlapping_children_merge_single_transparent_nodes_by_key() {
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    let group = scene.append_child(root, NodeKind::Group);
    scene.set_flags(group, NodeFlags::CHILDREN_DO_NOT_OVERLAP);

    let mut transparent = Vec::new();
    for shade in [220u8, 30] {
        let child = scene.append_child(group, NodeKind::Group);
        scene.append_child(child, flat(Color::rgb(shade, shade, shade)));
        transparent.push(scene.append_child(child, flat(Color::rgba(shade, 0, 0, 128))));
    }

    let mut renderer = renderer();
    renderer.render(&mut scene);

    assert_eq!(renderer.opaque_nodes().len(), 2);
    assert_eq!(renderer.transparent_nodes().len(), 2);
    let mut expected = transparent.clone();
    expected.sort_by(|a, b| batching_order(&scene, *a, *b));
    assert_eq!(renderer.transparent_nodes(), expected.as_slice());
    // The darker red of the second child sorts first.
    assert_eq!(renderer.transparent_nodes()[0], transparent[1]);
}

#[test]
fn three_opaque_nodes_advance_render_order_to_seven() {
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    let nodes: Vec<NodeId> = (0..3)
        .map(|index| scene.append_child(root, flat(Color::rgb(index * 50, 0, 0))))
        .collect();

    let mut renderer = renderer();
    renderer.render(&mut scene);

    let orders: Vec<i32> = nodes
        .iter()
        .map(|id| scene.geometry_node(*id).map(|node| node.render_order()).unwrap_or(0))
        .collect();
    assert_eq!(orders, vec![1, 3, 5]);
    assert_eq!(renderer.current_render_order(), 7);
}

#[test]
fn inherited_opacity_of_exactly_one_stays_opaque() {
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    let full = scene.append_child(root, NodeKind::Opacity(OpacityNode::new(1.0)));
    let opaque = scene.append_child(full, flat(Color::BLACK));
    let almost = scene.append_child(root, NodeKind::Opacity(OpacityNode::new(0.999)));
    let faded = scene.append_child(almost, flat(Color::BLACK));

    let mut renderer = renderer();
    renderer.render(&mut scene);

    assert_eq!(renderer.opaque_nodes(), &[opaque]);
    assert_eq!(renderer.transparent_nodes(), &[faded]);
}

// ── Properties ───────────────────────────────────────────────────────────────

#[test]
fn merged_transparent_runs_preserve_each_childs_order() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0001);

    for _ in 0..50 {
        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        scene.set_flags(root, NodeFlags::CHILDREN_DO_NOT_OVERLAP);

        let mut per_child: Vec<Vec<NodeId>> = Vec::new();
        for _ in 0..rng.random_range(2..6) {
            let child = scene.append_child(root, NodeKind::Group);
            let mut run = Vec::new();
            for _ in 0..rng.random_range(0..5) {
                if rng.random_bool(0.3) {
                    scene.append_child(child, flat(Color::BLACK));
                }
                run.push(scene.append_child(child, flat(random_translucent_color(&mut rng))));
            }
            per_child.push(run);
        }

        let mut renderer = renderer();
        renderer.render(&mut scene);
        let merged = renderer.transparent_nodes();

        assert_eq!(merged.len(), per_child.iter().map(Vec::len).sum::<usize>());
        for run in &per_child {
            let restricted: Vec<NodeId> = merged
                .iter()
                .copied()
                .filter(|id| run.contains(id))
                .collect();
            assert_eq!(&restricted, run);
        }
    }
}

#[test]
fn opaque_sort_is_a_consistent_total_preorder() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0002);

    let materials: Vec<Arc<dyn Material>> =
        (0..40).map(|_| random_opaque_material(&mut rng)).collect();

    let mut first_keys: Option<Vec<String>> = None;
    for attempt in 0..5 {
        let mut order: Vec<usize> = (0..materials.len()).collect();
        // Different insertion orders must sort to the same key sequence.
        for index in (1..order.len()).rev() {
            order.swap(index, rng.random_range(0..=index));
        }

        let mut scene = SceneGraph::new();
        let root = scene.set_root(NodeKind::Root);
        for index in &order {
            scene.append_child(root, rect_with(materials[*index].clone()));
        }

        let mut renderer = renderer();
        renderer.render(&mut scene);
        let sorted = renderer.opaque_nodes().to_vec();
        assert_eq!(sorted.len(), materials.len());

        for pair in sorted.windows(2) {
            assert_ne!(
                batching_order(&scene, pair[0], pair[1]),
                Ordering::Greater,
                "attempt {attempt}: {:?} sorted before {:?}",
                material_of(&scene, pair[0]),
                material_of(&scene, pair[1])
            );
        }

        // A forced rebuild sorts to the same order.
        scene.mark_dirty(root, DirtyFlags::FORCE_UPDATE);
        renderer.render(&mut scene);
        assert_eq!(renderer.opaque_nodes(), sorted.as_slice());

        let keys: Vec<String> = sorted
            .iter()
            .map(|id| format!("{:?}", material_of(&scene, *id)))
            .collect();
        match &first_keys {
            Some(first) => assert_eq!(first, &keys),
            None => first_keys = Some(keys),
        }
    }
}

#[test]
fn opaque_render_orders_increase_in_traversal_order() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0003);
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    let mut parents = vec![root];
    for _ in 0..60 {
        let parent = parents[rng.random_range(0..parents.len())];
        let kind = match rng.random_range(0..4) {
            0 => NodeKind::Group,
            1 => NodeKind::Transform(TransformNode::new(Matrix4::translation(1.0, 2.0, 0.0))),
            2 => flat(random_translucent_color(&mut rng)),
            _ => rect_with(random_opaque_material(&mut rng)),
        };
        let is_container = matches!(kind, NodeKind::Group | NodeKind::Transform(_));
        let id = scene.append_child(parent, kind);
        if is_container {
            parents.push(id);
        }
    }

    let mut renderer = renderer();
    renderer.render(&mut scene);

    let opaque: Vec<i32> = traversal_order(&scene)
        .into_iter()
        .filter(|id| renderer.opaque_nodes().contains(id))
        .filter_map(|id| scene.geometry_node(id).map(|node| node.render_order()))
        .collect();
    assert_eq!(opaque.len(), renderer.opaque_nodes().len());
    assert!(opaque.windows(2).all(|pair| pair[0] < pair[1]), "{opaque:?}");
}

#[test]
fn classification_follows_blending_and_inherited_opacity() {
    let mut rng = StdRng::seed_from_u64(0x5eed_0004);
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    for _ in 0..30 {
        let opacity = [1.0, 0.5, 0.25][rng.random_range(0..3)];
        let parent = scene.append_child(root, NodeKind::Opacity(OpacityNode::new(opacity)));
        let color = if rng.random_bool(0.5) {
            Color::rgb(10, 20, 30)
        } else {
            Color::rgba(10, 20, 30, 200)
        };
        scene.append_child(parent, flat(color));
    }

    let mut renderer = renderer();
    renderer.render(&mut scene);

    for id in traversal_order(&scene) {
        let Some(node) = scene.geometry_node(id) else {
            continue;
        };
        let blending = material_of(&scene, id).requires_blending();
        let expect_transparent = blending || node.inherited_opacity() < 1.0;
        assert_eq!(
            renderer.transparent_nodes().contains(&id),
            expect_transparent,
            "{id} (blending: {blending}, opacity: {})",
            node.inherited_opacity()
        );
        assert_eq!(renderer.opaque_nodes().contains(&id), !expect_transparent);
    }
}

#[test]
fn shared_material_and_matrix_run_binds_state_once() {
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    let material: Arc<dyn Material> = Arc::new(FlatColorMaterial::new(Color::rgb(40, 40, 200)));
    let transform = scene.append_child(
        root,
        NodeKind::Transform(TransformNode::new(Matrix4::translation(10.0, 10.0, 0.0))),
    );
    for _ in 0..8 {
        scene.append_child(transform, rect_with(material.clone()));
    }

    let mut renderer = renderer();
    let commands = renderer.render(&mut scene);

    assert_eq!(commands.draw_count(), 8);
    assert_eq!(commands.program_activation_count(), 1);
    assert_eq!(
        commands.count(|command| matches!(command, GpuCommand::UploadUniforms { .. })),
        1
    );
    let stats = renderer.last_frame_statistics();
    assert_eq!(stats.matrix_uploads, 1);
    assert_eq!(stats.material_changes, 1);
}

#[test]
fn matrix_change_within_a_run_uploads_only_the_matrix() {
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    let material: Arc<dyn Material> = Arc::new(FlatColorMaterial::new(Color::rgb(40, 40, 200)));
    for offset in [0.0, 20.0] {
        let transform = scene.append_child(
            root,
            NodeKind::Transform(TransformNode::new(Matrix4::translation(offset, 0.0, 0.0))),
        );
        scene.append_child(transform, rect_with(material.clone()));
        scene.append_child(transform, rect_with(material.clone()));
    }

    let mut renderer = renderer();
    renderer.render(&mut scene);

    let stats = renderer.last_frame_statistics();
    assert_eq!(stats.draw_calls, 4);
    assert_eq!(stats.program_switches, 1);
    assert_eq!(stats.material_changes, 1);
    assert_eq!(stats.matrix_uploads, 2);
}

#[test]
fn repeated_renders_emit_identical_commands() {
    let mut scene = SceneGraph::new();
    build_main_scene(&mut scene);

    let mut renderer = renderer();
    let first = renderer.render(&mut scene).clone();
    let second = renderer.render(&mut scene).clone();

    assert!(first.draw_count() > 0);
    assert_eq!(first, second);
    assert_eq!(renderer.last_frame_statistics().rebuilds, 0);
}

#[test]
fn main_scene_clips_resolve_to_scissor_rects() {
    let mut scene = SceneGraph::new();
    build_main_scene(&mut scene);

    let mut renderer = renderer();
    let commands = renderer.render(&mut scene);

    assert!(commands.iter().any(|command| matches!(
        command,
        GpuCommand::SetScissor(Some(rect)) if *rect == DeviceRect::new(10, 90, 30, 30)
    )));
    assert_eq!(
        commands.count(|command| matches!(command, GpuCommand::DrawStencilClip { .. })),
        0
    );
}

#[test]
fn translucent_run_with_shared_state_draws_as_one_batch() {
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    let material: Arc<dyn Material> =
        Arc::new(FlatColorMaterial::new(Color::rgba(200, 40, 40, 128)));
    for _ in 0..8 {
        scene.append_child(root, rect_with(material.clone()));
    }

    let mut renderer = renderer();
    let commands = renderer.render(&mut scene);

    assert_eq!(commands.draw_count(), 8);
    assert_eq!(commands.batch_count(), 1);
    let stats = renderer.last_frame_statistics();
    assert_eq!(stats.draw_calls, 8);
    assert_eq!(stats.batches, 1);
}

#[test]
fn front_to_back_orders_equal_opaque_keys_nearest_first() {
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    let flat_material: Arc<dyn Material> = Arc::new(FlatColorMaterial::new(Color::rgb(30, 60, 90)));
    let texture_material: Arc<dyn Material> = Arc::new(TextureMaterial::new(TextureId(1), false));
    let translucent: Arc<dyn Material> =
        Arc::new(FlatColorMaterial::new(Color::rgba(30, 60, 90, 128)));

    let a = scene.append_child(root, rect_with(flat_material.clone()));
    let x = scene.append_child(root, rect_with(texture_material.clone()));
    let first_translucent = scene.append_child(root, rect_with(translucent.clone()));
    let b = scene.append_child(root, rect_with(flat_material.clone()));
    let y = scene.append_child(root, rect_with(texture_material));
    let second_translucent = scene.append_child(root, rect_with(translucent));
    let c = scene.append_child(root, rect_with(flat_material));

    let flat_first = material_of(&scene, a).material_type().identity()
        < material_of(&scene, x).material_type().identity();
    let groups = |flat: Vec<NodeId>, textured: Vec<NodeId>| {
        if flat_first {
            [flat, textured].concat()
        } else {
            [textured, flat].concat()
        }
    };

    let mut renderer = renderer();
    renderer.render(&mut scene);
    let traversal = renderer.opaque_nodes().to_vec();
    assert_eq!(traversal, groups(vec![a, b, c], vec![x, y]));
    let transparent = vec![first_translucent, second_translucent];
    assert_eq!(renderer.transparent_nodes(), transparent.as_slice());

    renderer.set_sort_front_to_back_enabled(true);
    renderer.render(&mut scene);
    assert_eq!(renderer.opaque_nodes(), groups(vec![c, b, a], vec![y, x]).as_slice());
    assert_eq!(renderer.transparent_nodes(), transparent.as_slice());
    let orders: Vec<i32> = [c, b, a]
        .iter()
        .filter_map(|id| scene.geometry_node(*id).map(|node| node.render_order()))
        .collect();
    assert!(orders.windows(2).all(|pair| pair[0] > pair[1]), "{orders:?}");

    // Switching back restores traversal order, as a fresh renderer builds it.
    renderer.set_sort_front_to_back_enabled(false);
    renderer.render(&mut scene);
    assert_eq!(renderer.opaque_nodes(), traversal.as_slice());
    let mut fresh = self::renderer();
    fresh.render(&mut scene);
    assert_eq!(fresh.opaque_nodes(), renderer.opaque_nodes());
}

#[test]
fn entering_a_stencil_clip_reactivates_the_same_program() {
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    let material: Arc<dyn Material> = Arc::new(FlatColorMaterial::new(Color::rgb(0, 90, 0)));
    scene.append_child(root, rect_with(material.clone()));
    let clip = scene.append_child(
        root,
        NodeKind::Clip(ClipNode::shape(Geometry::from_positions(
            &[[0.0, 0.0], [40.0, 0.0], [0.0, 40.0]],
            vec![0, 1, 2],
        ))),
    );
    scene.append_child(clip, rect_with(material));

    let mut renderer = renderer();
    let commands = renderer.render(&mut scene);

    let position = |predicate: &dyn Fn(&GpuCommand) -> bool| -> Vec<usize> {
        commands
            .iter()
            .enumerate()
            .filter(|(_, command)| predicate(command))
            .map(|(index, _)| index)
            .collect()
    };
    let activations = position(&|command| matches!(command, GpuCommand::ActivateProgram { .. }));
    let stencil_draws = position(&|command| matches!(command, GpuCommand::DrawStencilClip { .. }));
    let draws = position(&|command| matches!(command, GpuCommand::Draw { .. }));

    assert_eq!(activations.len(), 2);
    assert_eq!(stencil_draws.len(), 1);
    assert_eq!(draws.len(), 2);
    assert!(draws[0] < stencil_draws[0]);
    assert!(stencil_draws[0] < activations[1] && activations[1] < draws[1]);
    let programs: Vec<_> = commands
        .iter()
        .filter_map(|command| match command {
            GpuCommand::ActivateProgram { program, .. } => Some(*program),
            _ => None,
        })
        .collect();
    assert_eq!(programs[0], programs[1]);
    assert!(commands
        .iter()
        .any(|command| *command == GpuCommand::SetStencilTest(Some(1))));
    assert_eq!(renderer.last_frame_statistics().program_switches, 2);
}

// ── Scale ────────────────────────────────────────────────────────────────────

#[test]
fn frames_beyond_the_command_capacity_are_returned_whole() {
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    let count = 30_000usize;
    for index in 0..count {
        let color = Color::rgb((index % 256) as u8, (index / 256) as u8, 7);
        scene.append_child(root, flat(color));
    }

    let mut renderer = renderer();
    for _ in 0..2 {
        let commands = renderer.render(&mut scene);

        assert!(commands.len() > 65_536);
        assert_eq!(commands.draw_count(), count);
        let uniform_len = commands.uniform_data().len();
        assert!(uniform_len > 0);
        assert!(commands.iter().all(|command| match command {
            GpuCommand::UploadUniforms { range, .. } => range.end <= uniform_len,
            _ => true,
        }));
    }
}

#[test]
fn deep_node_chains_render_without_recursion() {
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    let mut parent = root;
    for _ in 0..100_000 {
        parent = scene.append_child(parent, NodeKind::Group);
    }
    let leaf = scene.append_child(parent, flat(Color::BLACK));

    let mut renderer = renderer();
    let commands = renderer.render(&mut scene);

    assert_eq!(commands.drawn_nodes(), vec![leaf]);
}

#[test]
fn append_remove_churn_keeps_the_scene_bounded() {
    let mut scene = SceneGraph::new();
    let root = scene.set_root(NodeKind::Root);
    let mut renderer = renderer();

    for _ in 0..2_000 {
        let node = scene.append_child(root, flat(Color::BLACK));
        assert_eq!(renderer.render(&mut scene).drawn_nodes(), vec![node]);
        scene.remove_subtree(node);
        assert_eq!(renderer.render(&mut scene).draw_count(), 0);
    }

    assert_eq!(scene.len(), 1);
    assert_eq!(scene.child_count(root), 0);
    let live = scene.append_child(root, flat(Color::WHITE));
    assert_eq!(renderer.render(&mut scene).drawn_nodes(), vec![live]);
}
