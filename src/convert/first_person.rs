use nalgebra::Vector3;

use crate::error::ConversionError;
use crate::rig::{
    FirstPersonFlag, HumanBone, NodeId, RendererVisibility, SceneGraph, Skeleton,
};

/// Offset of the first-person view anchor from the head bone.
///
/// Must run on the un-normalized rig: the anchor was authored against this
/// frame. The normalized head carries identity rotation and unit scale, so the
/// world-space difference is also the bone-local offset afterwards.
pub(super) fn first_person_offset(
    graph: &SceneGraph,
    skeleton: &Skeleton,
    view_position: Vector3<f32>,
) -> Result<Vector3<f32>, ConversionError> {
    let head = skeleton
        .resolve(graph, HumanBone::Head)
        .and_then(|head| graph.world_position(head))
        .ok_or_else(|| ConversionError::configuration("head bone is not mapped"))?;
    Ok(view_position - head)
}

/// Visibility flag of every renderer below `root`.
///
/// Renderers parented under the head are hidden from the first-person camera;
/// skinned renderers with any weight on the head subtree are left to the
/// runtime's automatic head removal; everything else is always visible.
pub(super) fn classify_renderers(
    graph: &SceneGraph,
    root: NodeId,
    head: NodeId,
) -> Vec<RendererVisibility> {
    graph
        .descendants(root)
        .into_iter()
        .filter_map(|id| {
            let renderer = graph.node(id)?.renderer.as_ref()?;
            let flag = if graph.is_in_subtree(id, head) {
                FirstPersonFlag::ThirdPersonOnly
            } else if let Some(skin) = &renderer.skin {
                let weighted_to_head = renderer.mesh.weights.iter().any(|weights| {
                    weights.influences().any(|(joint, _)| {
                        skin.bones
                            .get(usize::from(joint))
                            .is_some_and(|bone| graph.is_in_subtree(*bone, head))
                    })
                });
                if weighted_to_head {
                    FirstPersonFlag::Auto
                } else {
                    FirstPersonFlag::Both
                }
            } else {
                FirstPersonFlag::Both
            };
            Some(RendererVisibility { renderer: id, flag })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::{Renderer, fixtures};

    #[test]
    fn given_same_anchor_and_head_when_computing_offset_then_result_is_exact_difference() {
        let fixture = fixtures::humanoid();
        let anchor = Vector3::new(0.0, 1.65, 0.08);
        let head = fixture
            .rig
            .graph
            .world_position(fixture.head)
            .expect("head position");

        let first = first_person_offset(&fixture.rig.graph, &fixture.rig.skeleton, anchor)
            .expect("head mapped");
        let second = first_person_offset(&fixture.rig.graph, &fixture.rig.skeleton, anchor)
            .expect("head mapped");

        assert_eq!(first, second);
        assert_eq!(first, anchor - head);
    }

    #[test]
    fn given_unmapped_head_when_computing_offset_then_configuration_error() {
        let fixture = fixtures::humanoid();

        let error = first_person_offset(&fixture.rig.graph, &Skeleton::new(), Vector3::zeros())
            .expect_err("head missing");

        assert!(matches!(error, ConversionError::Configuration(_)));
    }

    #[test]
    fn given_mixed_renderers_when_classifying_then_flags_follow_head_relationship() {
        let mut fixture = fixtures::humanoid();
        let graph = &mut fixture.rig.graph;
        let hat = graph.add_node("Hat", Some(fixture.head));
        graph.node_mut(hat).expect("hat").renderer = Some(Renderer {
            mesh: fixtures::quad_mesh("Hat", Vector3::zeros()),
            materials: vec![fixture.standard_material],
            skin: None,
        });

        let flags = classify_renderers(graph, fixture.rig.root, fixture.head);
        let flag_of = |node: NodeId| {
            flags
                .iter()
                .find(|entry| entry.renderer == node)
                .map(|entry| entry.flag)
        };

        assert_eq!(flag_of(fixture.body), Some(FirstPersonFlag::Auto));
        assert_eq!(flag_of(fixture.outfit), Some(FirstPersonFlag::Both));
        assert_eq!(flag_of(hat), Some(FirstPersonFlag::ThirdPersonOnly));
    }
}
