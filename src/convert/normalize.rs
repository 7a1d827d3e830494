use std::collections::HashMap;

use anyhow::{Context, Result, bail};
use nalgebra::{Matrix4, UnitQuaternion, Vector3};

use crate::correction::{
    apply_corrected_rotation, blend_correction_matrix, correct_normal_with_matrix,
    correct_vector_with_matrix, correct_vertex_with_matrix, horizontal_arm_correction,
    world_correction_to_local,
};
use crate::log_debug;
use crate::rig::{
    BehaviorKind, Collider, HumanBone, NodeId, Renderer, SceneGraph, Skeleton, Transform,
};

/// Retargets a rig into the destination rest pose.
///
/// Implementations return a new root whose nodes keep the source bone names;
/// node identities may change, so callers must re-resolve every reference
/// against the returned root. The source subtree is left in place for the
/// caller to release.
pub trait SkeletonNormalizer {
    fn normalize(
        &self,
        graph: &mut SceneGraph,
        root: NodeId,
        skeleton: &Skeleton,
        force_t_pose: bool,
    ) -> Result<NodeId>;
}

/// Default normalizer: optional arm T-pose, then a copy of the rig with every
/// rotation and scale baked into geometry.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoneNormalizer;

const ARM_CHAINS: [(f32, [HumanBone; 3]); 2] = [
    (
        1.0,
        [
            HumanBone::LeftUpperArm,
            HumanBone::LeftLowerArm,
            HumanBone::LeftHand,
        ],
    ),
    (
        -1.0,
        [
            HumanBone::RightUpperArm,
            HumanBone::RightLowerArm,
            HumanBone::RightHand,
        ],
    ),
];

impl SkeletonNormalizer for BoneNormalizer {
    fn normalize(
        &self,
        graph: &mut SceneGraph,
        root: NodeId,
        skeleton: &Skeleton,
        force_t_pose: bool,
    ) -> Result<NodeId> {
        if !graph.contains(root) {
            bail!("normalization root {root} does not exist");
        }

        let bind_worlds = world_matrices(graph, root);
        if force_t_pose {
            pose_arms_horizontally(graph, skeleton);
        }
        let posed_worlds = world_matrices(graph, root);

        let mut mapping = HashMap::<NodeId, NodeId>::new();
        for old in graph.descendants(root) {
            let parent = if old == root {
                None
            } else {
                graph.parent_of(old).and_then(|parent| mapping.get(&parent).copied())
            };
            let position = translation_of(&posed_worlds, old);
            let parent_position = parent
                .and_then(|_| graph.parent_of(old))
                .map(|parent| translation_of(&posed_worlds, parent))
                .unwrap_or_else(Vector3::zeros);
            let source = graph
                .node(old)
                .cloned()
                .with_context(|| format!("node {old} vanished during normalization"))?;

            let new = graph.add_node(source.name.clone(), parent);
            let node = graph
                .node_mut(new)
                .with_context(|| format!("copied node {new} is missing"))?;
            node.active = source.active;
            node.transform = Transform::from_translation(position - parent_position);
            node.behaviors = source.behaviors;
            node.renderer = source.renderer;
            mapping.insert(old, new);
        }

        let remap = |id: NodeId| mapping.get(&id).copied();
        for (old, new) in &mapping {
            let bind = bind_worlds.get(old).copied().unwrap_or_else(Matrix4::identity);
            let posed = posed_worlds.get(old).copied().unwrap_or_else(Matrix4::identity);
            let Some(node) = graph.node_mut(*new) else {
                continue;
            };
            for behavior in &mut node.behaviors {
                behavior.kind.remap_nodes(&remap);
                if let BehaviorKind::SpringBoneColliderGroup(group) = &mut behavior.kind {
                    for collider in &mut group.colliders {
                        bake_collider(collider, &posed);
                    }
                }
            }
            if let Some(renderer) = node.renderer.as_mut() {
                bake_renderer(renderer, &bind, &posed, &bind_worlds, &posed_worlds)
                    .with_context(|| format!("failed to bake renderer on '{}'", node.name))?;
                if let Some(skin) = renderer.skin.as_mut() {
                    skin.bones = skin.bones.iter().filter_map(|bone| remap(*bone)).collect();
                    skin.root_bone = skin.root_bone.and_then(remap);
                }
            }
        }

        let new_root = mapping
            .get(&root)
            .copied()
            .context("normalized root was not created")?;
        log_debug!(
            "Normalized {} node(s) into new root {} (T-pose: {})",
            mapping.len(),
            new_root,
            force_t_pose
        );
        Ok(new_root)
    }
}

/// World matrix of every node below (and including) `root`.
fn world_matrices(graph: &SceneGraph, root: NodeId) -> HashMap<NodeId, Matrix4<f32>> {
    let mut worlds = HashMap::new();
    for id in graph.descendants(root) {
        let world = match graph.parent_of(id).and_then(|parent| worlds.get(&parent)) {
            Some(parent_world) if id != root => {
                let local = graph
                    .node(id)
                    .map(|node| node.transform.to_matrix())
                    .unwrap_or_else(Matrix4::identity);
                parent_world * local
            }
            _ => graph.world_matrix(id),
        };
        worlds.insert(id, world);
    }
    worlds
}

fn translation_of(worlds: &HashMap<NodeId, Matrix4<f32>>, id: NodeId) -> Vector3<f32> {
    worlds
        .get(&id)
        .map(|world| Vector3::new(world[(0, 3)], world[(1, 3)], world[(2, 3)]))
        .unwrap_or_else(Vector3::zeros)
}

fn world_rotation(graph: &SceneGraph, id: NodeId) -> UnitQuaternion<f32> {
    let mut rotation = UnitQuaternion::identity();
    let mut cursor = Some(id);
    while let Some(current) = cursor {
        let Some(node) = graph.node(current) else {
            break;
        };
        rotation = node.transform.rotation * rotation;
        cursor = node.parent();
    }
    rotation
}

/// Swing upper and lower arms so each segment points straight out to its
/// side. Chains with an unmapped bone are left alone.
fn pose_arms_horizontally(graph: &mut SceneGraph, skeleton: &Skeleton) {
    for (side, chain) in ARM_CHAINS {
        let nodes: Option<Vec<NodeId>> = chain
            .iter()
            .map(|bone| skeleton.resolve(graph, *bone))
            .collect();
        let Some(nodes) = nodes else {
            continue;
        };

        for segment in nodes.windows(2) {
            let (joint, tip) = (segment[0], segment[1]);
            let (Some(from), Some(to)) = (graph.world_position(joint), graph.world_position(tip))
            else {
                continue;
            };
            let world_correction = horizontal_arm_correction(to - from, side);
            let parent_rotation = graph
                .parent_of(joint)
                .map(|parent| world_rotation(graph, parent))
                .unwrap_or_else(UnitQuaternion::identity);
            let local_correction = world_correction_to_local(world_correction, parent_rotation);
            if let Some(node) = graph.node_mut(joint) {
                node.transform.rotation =
                    apply_corrected_rotation(node.transform.rotation, local_correction);
            }
        }
    }
}

/// Move the renderer's geometry into the frame of its normalized node.
///
/// Skinned vertices follow their bones from bind to posed pose by linear
/// blend skinning; static geometry follows the renderer node.
fn bake_renderer(
    renderer: &mut Renderer,
    bind: &Matrix4<f32>,
    posed: &Matrix4<f32>,
    bind_worlds: &HashMap<NodeId, Matrix4<f32>>,
    posed_worlds: &HashMap<NodeId, Matrix4<f32>>,
) -> Result<()> {
    let normalized_inverse = Matrix4::new_translation(&-Vector3::new(
        posed[(0, 3)],
        posed[(1, 3)],
        posed[(2, 3)],
    ));

    let slot_corrections: Vec<Matrix4<f32>> = match &renderer.skin {
        Some(skin) => skin
            .bones
            .iter()
            .map(|bone| {
                let before = bind_worlds.get(bone).copied().unwrap_or_else(Matrix4::identity);
                let after = posed_worlds.get(bone).copied().unwrap_or(before);
                before
                    .try_inverse()
                    .map(|inverse| after * inverse)
                    .with_context(|| format!("bone {bone} has a singular bind matrix"))
            })
            .collect::<Result<_>>()?,
        None => Vec::new(),
    };
    let rigid = match renderer.skin {
        Some(_) => None,
        None => Some(
            bind.try_inverse()
                .map(|inverse| posed * inverse)
                .context("renderer node has a singular world matrix")?,
        ),
    };

    let mesh = &mut renderer.mesh;
    let per_vertex: Vec<Matrix4<f32>> = (0..mesh.vertex_count())
        .map(|index| {
            let motion = match rigid {
                Some(rigid) => rigid,
                None => mesh
                    .weights
                    .get(index)
                    .map(|weights| blend_correction_matrix(weights, &slot_corrections))
                    .unwrap_or_else(Matrix4::identity),
            };
            normalized_inverse * motion * bind
        })
        .collect();

    for (position, matrix) in mesh.positions.iter_mut().zip(&per_vertex) {
        *position = correct_vertex_with_matrix(*position, matrix);
    }
    for (normal, matrix) in mesh.normals.iter_mut().zip(&per_vertex) {
        *normal = correct_normal_with_matrix(*normal, matrix);
    }
    for key in &mut mesh.shape_keys {
        for (delta, matrix) in key.position_deltas.iter_mut().zip(&per_vertex) {
            *delta = correct_vector_with_matrix(*delta, matrix);
        }
        for (delta, matrix) in key.normal_deltas.iter_mut().zip(&per_vertex) {
            *delta = correct_vector_with_matrix(*delta, matrix);
        }
    }
    Ok(())
}

/// Re-express a collider authored in the anchor's posed frame in the
/// normalized (rotation- and scale-free) frame.
fn bake_collider(collider: &mut Collider, anchor_world: &Matrix4<f32>) {
    let linear = crate::correction::linear_part(anchor_world);
    let scale = (linear.column(0).norm() + linear.column(1).norm() + linear.column(2).norm()) / 3.0;
    match collider {
        Collider::Sphere { offset, radius } => {
            *offset = correct_vector_with_matrix(*offset, anchor_world);
            *radius *= scale;
        }
        Collider::Capsule {
            offset,
            tail,
            radius,
        } => {
            *offset = correct_vector_with_matrix(*offset, anchor_world);
            *tail = correct_vector_with_matrix(*tail, anchor_world);
            *radius *= scale;
        }
    }
}
