use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use nalgebra::{Vector2, Vector3};

use crate::correction::{
    correct_normal_with_matrix, correct_vector_with_matrix, correct_vertex_with_matrix,
};
use crate::log_debug;
use crate::rig::{
    BoneWeights, MaterialId, Mesh, NodeId, Renderer, SceneGraph, ShapeKey, Skin, SubMesh,
};

use super::types::COMBINED_RENDERER_NAME;

/// Outcome of [`combine_renderers`].
#[derive(Debug, Clone, PartialEq)]
pub(super) struct CombineSummary {
    pub(super) renderer: NodeId,
    pub(super) source_renderers: usize,
    pub(super) submesh_count: usize,
    pub(super) retained_shape_keys: Vec<String>,
    pub(super) removed_shape_keys: Vec<String>,
}

/// Merge every renderer below `root` into a single skinned renderer on a new
/// child of `root`.
///
/// Submeshes are merged per distinct material in traversal order. Shape keys
/// are merged by name; `retain_shape_key` decides which survive before the
/// combined renderer is attached. Static renderers become rigid parts weighted
/// to their own node.
pub(super) fn combine_renderers(
    graph: &mut SceneGraph,
    root: NodeId,
    retain_shape_key: impl Fn(&str) -> bool,
) -> Result<CombineSummary> {
    let sources = renderer_nodes(graph, root);
    if sources.is_empty() {
        bail!("no renderers to combine below {root}");
    }

    let root_inverse = graph
        .world_matrix(root)
        .try_inverse()
        .context("avatar root has a singular world matrix")?;

    let mut combined = Mesh {
        name: COMBINED_RENDERER_NAME.to_string(),
        ..Mesh::default()
    };
    let mut bones = Vec::<NodeId>::new();
    let mut materials = Vec::<MaterialId>::new();
    let mut submesh_by_material = HashMap::<MaterialId, usize>::new();
    let mut shape_key_deltas = Vec::<(String, Vec<Vector3<f32>>, Vec<Vector3<f32>>)>::new();
    let mut every_part_has_normals = true;
    let mut skin_root = None;

    for source in &sources {
        let Some(renderer) = graph.node(*source).and_then(|node| node.renderer.as_ref()) else {
            continue;
        };
        let mesh = &renderer.mesh;
        mesh.validate()
            .with_context(|| format!("renderer '{}' has an invalid mesh", mesh.name))?;

        let to_combined = root_inverse * graph.world_matrix(*source);
        let base = combined.vertex_count();
        let vertex_count = mesh.vertex_count();

        let skinned = renderer
            .skin
            .as_ref()
            .is_some_and(|skin| !skin.bones.is_empty());
        let slot_map: Vec<u16> = match &renderer.skin {
            Some(skin) if skinned => {
                if skin_root.is_none() {
                    skin_root = skin.root_bone;
                }
                skin.bones
                    .iter()
                    .map(|bone| bone_slot(&mut bones, *bone))
                    .collect::<Result<_>>()?
            }
            _ => vec![bone_slot(&mut bones, *source)?],
        };
        let fallback_slot = slot_map[0];

        combined.positions.extend(
            mesh.positions
                .iter()
                .map(|position| correct_vertex_with_matrix(*position, &to_combined)),
        );
        if mesh.normals.len() == vertex_count {
            combined.normals.extend(
                mesh.normals
                    .iter()
                    .map(|normal| correct_normal_with_matrix(*normal, &to_combined)),
            );
        } else {
            every_part_has_normals = false;
        }
        if mesh.uvs.len() == vertex_count {
            combined.uvs.extend(mesh.uvs.iter().copied());
        } else {
            combined
                .uvs
                .extend(std::iter::repeat_n(Vector2::zeros(), vertex_count));
        }
        combined.weights.extend((0..vertex_count).map(|index| {
            match mesh.weights.get(index) {
                Some(weights) if skinned => remap_weights(weights, &slot_map, fallback_slot),
                _ => BoneWeights::single(fallback_slot),
            }
        }));

        for submesh in &mesh.submeshes {
            let material = renderer
                .materials
                .get(submesh.material)
                .copied()
                .with_context(|| {
                    format!(
                        "renderer '{}' submesh uses missing material slot {}",
                        mesh.name, submesh.material
                    )
                })?;
            let target = *submesh_by_material.entry(material).or_insert_with(|| {
                materials.push(material);
                combined.submeshes.push(SubMesh {
                    indices: Vec::new(),
                    material: materials.len() - 1,
                });
                combined.submeshes.len() - 1
            });
            let offset = u32::try_from(base).context("combined mesh exceeds u32 indices")?;
            combined.submeshes[target]
                .indices
                .extend(submesh.indices.iter().map(|index| index + offset));
        }

        for key in &mesh.shape_keys {
            let entry = match shape_key_deltas.iter().position(|(name, _, _)| *name == key.name) {
                Some(existing) => existing,
                None => {
                    shape_key_deltas.push((key.name.clone(), Vec::new(), Vec::new()));
                    shape_key_deltas.len() - 1
                }
            };
            let (_, positions, normals) = &mut shape_key_deltas[entry];
            positions.resize(base, Vector3::zeros());
            positions.extend(
                key.position_deltas
                    .iter()
                    .map(|delta| correct_vector_with_matrix(*delta, &to_combined)),
            );
            if !key.normal_deltas.is_empty() {
                normals.resize(base, Vector3::zeros());
                normals.extend(
                    key.normal_deltas
                        .iter()
                        .map(|delta| correct_vector_with_matrix(*delta, &to_combined)),
                );
            }
        }
    }

    if !every_part_has_normals {
        combined.normals.clear();
    }
    let total = combined.vertex_count();
    for (name, mut positions, mut normals) in shape_key_deltas {
        positions.resize(total, Vector3::zeros());
        if !normals.is_empty() {
            normals.resize(total, Vector3::zeros());
        }
        combined.add_shape_key(ShapeKey {
            name,
            position_deltas: positions,
            normal_deltas: normals,
        })?;
    }

    let removed_shape_keys = combined.retain_shape_keys(|name| retain_shape_key(name));
    if !removed_shape_keys.is_empty() {
        log_debug!("Dropped {} unreferenced shape key(s)", removed_shape_keys.len());
    }
    let retained_shape_keys = combined
        .shape_key_names()
        .into_iter()
        .map(str::to_string)
        .collect();
    let submesh_count = combined.submeshes.len();

    for source in &sources {
        let removable = graph.children_of(*source).is_empty() && !bones.contains(source);
        if removable {
            graph.destroy(*source);
        } else if let Some(node) = graph.node_mut(*source) {
            node.renderer = None;
        }
    }

    let renderer = graph.add_node(COMBINED_RENDERER_NAME, Some(root));
    let node = graph
        .node_mut(renderer)
        .context("combined renderer node is missing")?;
    node.renderer = Some(Renderer {
        mesh: combined,
        materials,
        skin: Some(Skin {
            bones,
            root_bone: skin_root.or(Some(root)),
        }),
    });

    log_debug!(
        "Combined {} renderer(s) into {} submesh(es)",
        sources.len(),
        submesh_count
    );

    Ok(CombineSummary {
        renderer,
        source_renderers: sources.len(),
        submesh_count,
        retained_shape_keys,
        removed_shape_keys,
    })
}

/// Index of `bone` in the combined joint list, appending it when new.
fn bone_slot(bones: &mut Vec<NodeId>, bone: NodeId) -> Result<u16> {
    let index = match bones.iter().position(|existing| *existing == bone) {
        Some(index) => index,
        None => {
            bones.push(bone);
            bones.len() - 1
        }
    };
    u16::try_from(index).context("combined skin exceeds 65535 joints")
}

fn remap_weights(weights: &BoneWeights, slot_map: &[u16], fallback: u16) -> BoneWeights {
    let mut remapped = BoneWeights::default();
    let mut lane = 0;
    for (joint, weight) in weights.influences() {
        remapped.joints[lane] = slot_map
            .get(usize::from(joint))
            .copied()
            .unwrap_or(fallback);
        remapped.weights[lane] = weight;
        lane += 1;
    }
    if lane == 0 {
        return BoneWeights::single(fallback);
    }
    remapped
}

/// Renderer nodes below `root`, in traversal order.
pub(super) fn renderer_nodes(graph: &SceneGraph, root: NodeId) -> Vec<NodeId> {
    graph
        .descendants(root)
        .into_iter()
        .filter(|id| graph.node(*id).is_some_and(|node| node.renderer.is_some()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::fixtures;

    fn combined_renderer(graph: &SceneGraph, node: NodeId) -> &Renderer {
        graph
            .node(node)
            .and_then(|node| node.renderer.as_ref())
            .expect("combined renderer")
    }

    #[test]
    fn given_two_skinned_renderers_when_combining_then_one_submesh_per_material() {
        let mut fixture = fixtures::humanoid();
        let root = fixture.rig.root;
        let graph = &mut fixture.rig.graph;

        let summary = combine_renderers(graph, root, |_| true).expect("combines");

        assert_eq!(summary.source_renderers, 2);
        assert_eq!(summary.submesh_count, 2);
        let renderer = combined_renderer(graph, summary.renderer);
        assert_eq!(
            renderer.materials,
            vec![fixture.standard_material, fixture.toon_material]
        );
        assert_eq!(renderer.mesh.vertex_count(), 8);
        assert_eq!(renderer.mesh.submeshes[1].indices, vec![4, 5, 6, 4, 6, 7]);
        assert!(renderer.mesh.validate().is_ok());
        assert!(!graph.contains(fixture.body));
        assert!(!graph.contains(fixture.outfit));
    }

    #[test]
    fn given_shape_keys_on_one_part_when_combining_then_deltas_are_zero_padded() {
        let mut fixture = fixtures::humanoid();
        let root = fixture.rig.root;
        let graph = &mut fixture.rig.graph;

        let summary = combine_renderers(graph, root, |_| true).expect("combines");

        let renderer = combined_renderer(graph, summary.renderer);
        assert_eq!(summary.retained_shape_keys.len(), fixtures::SHAPE_KEYS.len());
        let blink = &renderer.mesh.shape_keys[0];
        assert_eq!(blink.position_deltas.len(), 8);
        assert!(blink.affects(3));
        assert!(!blink.affects(7));
    }

    #[test]
    fn given_retain_filter_when_combining_then_only_selected_keys_survive() {
        let mut fixture = fixtures::humanoid();
        let root = fixture.rig.root;

        let summary =
            combine_renderers(&mut fixture.rig.graph, root, |name| name == "Blink").expect("combines");

        assert_eq!(summary.retained_shape_keys, vec!["Blink".to_string()]);
        assert_eq!(summary.removed_shape_keys.len(), 4);
    }

    #[test]
    fn given_static_renderer_when_combining_then_it_is_weighted_to_its_own_node() {
        let mut fixture = fixtures::humanoid();
        let root = fixture.rig.root;
        let graph = &mut fixture.rig.graph;
        let hat = graph.add_node("Hat", Some(fixture.head));
        graph.node_mut(hat).expect("hat").renderer = Some(Renderer {
            mesh: fixtures::quad_mesh("Hat", Vector3::zeros()),
            materials: vec![fixture.standard_material],
            skin: None,
        });
        let hat_world = graph.world_position(hat).expect("hat");

        let summary = combine_renderers(graph, root, |_| true).expect("combines");

        let renderer = combined_renderer(graph, summary.renderer);
        assert_eq!(summary.submesh_count, 2);
        let skin = renderer.skin.as_ref().expect("skin");
        // The hat sits under the armature, so it comes first in traversal.
        let hat_vertex = renderer.mesh.positions[0];
        let slot = usize::from(renderer.mesh.weights[0].joints[0]);
        assert!((hat_vertex - hat_world).norm() < 1e-6);
        assert!(graph.contains(hat));
        assert_eq!(skin.bones[slot], hat);
    }

    #[test]
    fn given_rig_without_renderers_when_combining_then_it_fails() {
        let mut graph = SceneGraph::new();
        let root = graph.add_node("Avatar", None);

        assert!(combine_renderers(&mut graph, root, |_| true).is_err());
    }
}
