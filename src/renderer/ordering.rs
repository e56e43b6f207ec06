use std::cmp::Ordering;

use crate::id::NodeId;
use crate::scene::{GeometryNode, SceneGraph};

/// Batching order of two geometry nodes.
///
/// Keys, most significant first: clip list identity, material type identity,
/// render order descending (front-to-back mode, non-blending materials only),
/// [`Material::compare`](crate::Material::compare), matrix identity.
///
/// Nodes that are not geometry nodes, or have no active material, compare equal
/// to everything so a stable sort leaves them in place.
pub(crate) fn compare_nodes(
    scene: &SceneGraph,
    a: NodeId,
    b: NodeId,
    front_to_back: bool,
) -> Ordering {
    match (scene.geometry_node(a), scene.geometry_node(b)) {
        (Some(a), Some(b)) => compare_geometry_nodes(a, b, front_to_back),
        _ => Ordering::Equal,
    }
}

pub(crate) fn compare_geometry_nodes(
    a: &GeometryNode,
    b: &GeometryNode,
    front_to_back: bool,
) -> Ordering {
    let ordering = a.clip_list().cmp(&b.clip_list());
    if ordering != Ordering::Equal {
        return ordering;
    }

    let (Some(material_a), Some(material_b)) = (a.active_material(), b.active_material()) else {
        return Ordering::Equal;
    };

    let ordering = material_a
        .material_type()
        .identity()
        .cmp(&material_b.material_type().identity());
    if ordering != Ordering::Equal {
        return ordering;
    }

    if front_to_back && !material_a.requires_blending() {
        let ordering = b.render_order().cmp(&a.render_order());
        if ordering != Ordering::Equal {
            return ordering;
        }
    }

    let ordering = material_a.compare(material_b.as_ref());
    #[cfg(debug_assertions)]
    {
        let reverse = material_b.compare(material_a.as_ref());
        assert_eq!(
            ordering,
            reverse.reverse(),
            "Material::compare is not antisymmetric for {:?} and {:?}",
            material_a,
            material_b
        );
    }
    if ordering != Ordering::Equal {
        return ordering;
    }

    a.matrix().cmp(&b.matrix())
}

#[cfg(test)]
mod tests {
    use std::any::Any;
    use std::sync::Arc;

    use super::*;
    use crate::color::Color;
    use crate::geometry::Geometry;
    use crate::material::{Material, MaterialShader, MaterialType};
    use crate::id::TextureId;
    use crate::materials::{
        FlatColorMaterial, TextureMaterial, FLAT_COLOR_MATERIAL_TYPE, TEXTURE_MATERIAL_TYPE,
    };

    fn node(material: Arc<dyn Material>) -> GeometryNode {
        GeometryNode::new(Geometry::default(), material)
    }

    #[test]
    fn clip_list_dominates_material() {
        let mut a = node(Arc::new(FlatColorMaterial::new(Color::BLACK)));
        let b = node(Arc::new(FlatColorMaterial::new(Color::BLACK)));
        a.clip_list = Some(NodeId(9));

        assert_eq!(compare_geometry_nodes(&a, &b, false), Ordering::Greater);
        assert_eq!(compare_geometry_nodes(&b, &a, false), Ordering::Less);
    }

    #[test]
    fn material_type_identity_orders_different_types() {
        let flat = node(Arc::new(FlatColorMaterial::new(Color::BLACK)));
        let texture = node(Arc::new(TextureMaterial::new(TextureId(1), false)));
        let expected = FLAT_COLOR_MATERIAL_TYPE
            .identity()
            .cmp(&TEXTURE_MATERIAL_TYPE.identity());

        assert_eq!(compare_geometry_nodes(&flat, &texture, false), expected);
    }

    #[test]
    fn front_to_back_puts_higher_render_order_first() {
        let material: Arc<dyn Material> = Arc::new(FlatColorMaterial::new(Color::BLACK));
        let mut near = node(material.clone());
        let mut far = node(material);
        near.render_order = 5;
        far.render_order = 1;

        assert_eq!(compare_geometry_nodes(&near, &far, true), Ordering::Less);
        assert_eq!(compare_geometry_nodes(&near, &far, false), Ordering::Equal);
    }

    #[test]
    fn matrix_identity_breaks_remaining_ties() {
        let material: Arc<dyn Material> = Arc::new(FlatColorMaterial::new(Color::WHITE));
        let mut a = node(material.clone());
        let mut b = node(material);
        a.matrix = Some(NodeId(2));
        b.matrix = Some(NodeId(7));

        assert_eq!(compare_geometry_nodes(&a, &b, false), Ordering::Less);
    }

    static BROKEN_TYPE: MaterialType = MaterialType::new("broken");

    #[derive(Debug)]
    struct AlwaysLess;

    impl Material for AlwaysLess {
        fn material_type(&self) -> &'static MaterialType {
            &BROKEN_TYPE
        }

        fn compare(&self, _other: &dyn Material) -> Ordering {
            Ordering::Less
        }

        fn create_shader(&self) -> Box<dyn MaterialShader> {
            unreachable!("never drawn")
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "not antisymmetric")]
    fn inconsistent_material_compare_fails_fast_in_debug_builds() {
        let a = node(Arc::new(AlwaysLess));
        let b = node(Arc::new(AlwaysLess));
        compare_geometry_nodes(&a, &b, false);
    }
}
