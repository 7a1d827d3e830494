use std::collections::BTreeMap;

use anyhow::{Context, Result};
use nalgebra::Vector3;

use crate::rig::{
    BlendShapeBind, BlendShapeGroup, ExpressionPreset, Mesh, NodeId, Renderer, SceneGraph,
    ShapeKey, SubMesh,
};
use crate::{log_debug, log_warn};

use super::combine::renderer_nodes;
use super::expression::ShapeKeyWeights;

const SEPARATED_SUFFIX: &str = ".blendshape";

/// Move every triangle touched by a shape key into a sibling renderer named
/// `<name>.blendshape`, which takes all shape keys with it.
///
/// Vertex data is copied verbatim, so the rest pose is unchanged. Returns the
/// new node, or `None` when the mesh has no shape keys or one side of the split
/// would be empty.
pub(super) fn separate_shape_keys(graph: &mut SceneGraph, node: NodeId) -> Result<Option<NodeId>> {
    let source = graph
        .node(node)
        .context("renderer node to separate is missing")?;
    let Some(renderer) = source.renderer.as_ref() else {
        return Ok(None);
    };
    let mesh = &renderer.mesh;
    if mesh.shape_keys.is_empty() {
        return Ok(None);
    }

    let moving: Vec<bool> = (0..mesh.vertex_count())
        .map(|index| mesh.shape_keys.iter().any(|key| key.affects(index)))
        .collect();

    let mut animated = Vec::with_capacity(mesh.submeshes.len());
    let mut still = Vec::with_capacity(mesh.submeshes.len());
    for submesh in &mesh.submeshes {
        let (with_keys, without_keys): (Vec<[u32; 3]>, Vec<[u32; 3]>) = submesh
            .indices
            .chunks_exact(3)
            .map(|triangle| [triangle[0], triangle[1], triangle[2]])
            .partition(|triangle| {
                triangle
                    .iter()
                    .any(|index| moving.get(*index as usize).copied().unwrap_or(false))
            });
        animated.push((submesh.material, with_keys));
        still.push((submesh.material, without_keys));
    }

    let is_empty =
        |parts: &[(usize, Vec<[u32; 3]>)]| parts.iter().all(|(_, tris)| tris.is_empty());
    if is_empty(&animated) || is_empty(&still) {
        log_debug!(
            "Shape keys of '{}' cover the whole mesh or none of it; not separating",
            mesh.name
        );
        return Ok(None);
    }

    let separated_name = format!("{}{}", source.name, SEPARATED_SUFFIX);
    let parent = source.parent();
    let transform = source.transform;
    let mut with_keys = extract_part(mesh, &animated, true);
    with_keys.name = separated_name.clone();
    let without_keys = extract_part(mesh, &still, false);
    let separated = Renderer {
        mesh: with_keys,
        materials: renderer.materials.clone(),
        skin: renderer.skin.clone(),
    };

    let new_node = graph.add_node(separated_name, parent);
    if let Some(target) = graph.node_mut(new_node) {
        target.transform = transform;
        target.renderer = Some(separated);
    }
    if let Some(renderer) = graph.node_mut(node).and_then(|node| node.renderer.as_mut()) {
        renderer.mesh = without_keys;
    }
    Ok(Some(new_node))
}

/// Compact the vertices used by `parts` into a standalone mesh.
fn extract_part(mesh: &Mesh, parts: &[(usize, Vec<[u32; 3]>)], keep_shape_keys: bool) -> Mesh {
    let mut remap = BTreeMap::<u32, u32>::new();
    let mut order = Vec::<usize>::new();
    let mut submeshes = Vec::new();

    for (material, triangles) in parts {
        if triangles.is_empty() {
            continue;
        }
        let mut indices = Vec::with_capacity(triangles.len() * 3);
        for index in triangles.iter().flatten() {
            let next = remap.len() as u32;
            let mapped = *remap.entry(*index).or_insert_with(|| {
                order.push(*index as usize);
                next
            });
            indices.push(mapped);
        }
        submeshes.push(SubMesh {
            indices,
            material: *material,
        });
    }

    let pick = |values: &[Vector3<f32>]| -> Vec<Vector3<f32>> {
        if values.is_empty() {
            return Vec::new();
        }
        order
            .iter()
            .map(|index| values.get(*index).copied().unwrap_or_else(Vector3::zeros))
            .collect()
    };

    Mesh {
        name: mesh.name.clone(),
        positions: pick(&mesh.positions),
        normals: pick(&mesh.normals),
        uvs: if mesh.uvs.is_empty() {
            Vec::new()
        } else {
            order.iter().map(|index| mesh.uvs[*index]).collect()
        },
        weights: if mesh.weights.is_empty() {
            Vec::new()
        } else {
            order.iter().map(|index| mesh.weights[*index]).collect()
        },
        submeshes,
        shape_keys: if keep_shape_keys {
            mesh.shape_keys
                .iter()
                .map(|key| ShapeKey {
                    name: key.name.clone(),
                    position_deltas: pick(&key.position_deltas),
                    normal_deltas: pick(&key.normal_deltas),
                })
                .collect()
        } else {
            Vec::new()
        },
    }
}

/// Build one expression group per preset, binding each shape key to the
/// renderer that owns it below `root`. Unknown shape keys are skipped.
pub(super) fn bind_expressions(
    graph: &SceneGraph,
    root: NodeId,
    expressions: &BTreeMap<ExpressionPreset, ShapeKeyWeights>,
) -> Vec<BlendShapeGroup> {
    let renderers = renderer_nodes(graph, root);
    let locate = |name: &str| {
        renderers.iter().find_map(|id| {
            let mesh = &graph.node(*id)?.renderer.as_ref()?.mesh;
            mesh.shape_key_index(name).map(|index| (*id, index))
        })
    };

    expressions
        .iter()
        .map(|(preset, weights)| {
            let binds = weights
                .iter()
                .filter_map(|(name, weight)| match locate(name) {
                    Some((renderer, index)) => Some(BlendShapeBind {
                        renderer,
                        index,
                        weight: *weight,
                    }),
                    None => {
                        log_warn!(
                            "Expression '{}' references unknown shape key '{}'",
                            preset.display_name(),
                            name
                        );
                        None
                    }
                })
                .collect();
            BlendShapeGroup {
                name: preset.display_name().to_string(),
                preset: *preset,
                binds,
            }
        })
        .collect()
}
