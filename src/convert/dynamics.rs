use std::collections::{BTreeMap, HashMap};

use nalgebra::Vector3;

use crate::rig::{
    Behavior, BehaviorKind, Collider, ColliderGroup, NodeId, PhysBoneColliderShape, SceneGraph,
    SpringChain,
};
use crate::{log_debug, log_warn};

use super::capabilities::DynamicsFormat;

/// Destination stiffness range upper bound; source pull/elasticity are 0..1.
const STIFFNESS_SCALE: f32 = 4.0;

/// Format-neutral description of one source jiggle chain.
struct SourceChain {
    owner: NodeId,
    root: NodeId,
    excluded: Vec<NodeId>,
    stiffness: f32,
    drag: f32,
    gravity_power: f32,
    gravity_dir: Vector3<f32>,
    hit_radius: f32,
    collider_nodes: Vec<NodeId>,
}

/// Per-format reader of source dynamics data.
trait DynamicsAdapter {
    fn format_name(&self) -> &'static str;

    /// Every chain authored below `root`, in traversal order.
    fn chains(&self, graph: &SceneGraph, root: NodeId) -> Vec<SourceChain>;

    /// Destination colliders produced by the collider behaviors on `node`,
    /// paired with their anchor bone.
    fn colliders(&self, graph: &SceneGraph, node: NodeId) -> Vec<(NodeId, Collider)>;

    fn is_source_behavior(&self, kind: &BehaviorKind) -> bool;
}

/// Current SDK physics components.
///
/// Mapping: stiffness = pull × 4, drag = 1 − spring, gravity power = gravity
/// pointing down, hit radius = radius.
struct PrimaryDynamicsAdapter;

impl DynamicsAdapter for PrimaryDynamicsAdapter {
    fn format_name(&self) -> &'static str {
        "primary"
    }

    fn chains(&self, graph: &SceneGraph, root: NodeId) -> Vec<SourceChain> {
        let mut chains = Vec::new();
        for id in graph.descendants(root) {
            let Some(node) = graph.node(id) else {
                continue;
            };
            for behavior in &node.behaviors {
                let BehaviorKind::PhysBone(bone) = &behavior.kind else {
                    continue;
                };
                chains.push(SourceChain {
                    owner: id,
                    root: bone.root.unwrap_or(id),
                    excluded: bone.ignore.clone(),
                    stiffness: bone.pull.clamp(0.0, 1.0) * STIFFNESS_SCALE,
                    drag: (1.0 - bone.spring).clamp(0.0, 1.0),
                    gravity_power: bone.gravity.abs(),
                    gravity_dir: -Vector3::y(),
                    hit_radius: bone.radius.max(0.0),
                    collider_nodes: bone.colliders.clone(),
                });
            }
        }
        chains
    }

    fn colliders(&self, graph: &SceneGraph, node: NodeId) -> Vec<(NodeId, Collider)> {
        let Some(source) = graph.node(node) else {
            return Vec::new();
        };

        source
            .behaviors
            .iter()
            .filter_map(|behavior| match &behavior.kind {
                BehaviorKind::PhysBoneCollider(collider) => Some(collider),
                _ => None,
            })
            .filter_map(|collider| {
                let anchor = collider.root.unwrap_or(node);
                let radius = collider.radius.max(0.0);
                match collider.shape {
                    PhysBoneColliderShape::Sphere => Some((
                        anchor,
                        Collider::Sphere {
                            offset: collider.position,
                            radius,
                        },
                    )),
                    PhysBoneColliderShape::Capsule => {
                        let axis = collider.rotation * Vector3::y();
                        let half = (collider.height * 0.5 - radius).max(0.0);
                        Some((
                            anchor,
                            Collider::Capsule {
                                offset: collider.position - axis * half,
                                tail: collider.position + axis * half,
                                radius,
                            },
                        ))
                    }
                    PhysBoneColliderShape::Plane => {
                        log_warn!(
                            "Skipping plane collider on '{}': no destination equivalent",
                            source.name
                        );
                        None
                    }
                }
            })
            .collect()
    }

    fn is_source_behavior(&self, kind: &BehaviorKind) -> bool {
        matches!(
            kind,
            BehaviorKind::PhysBone(_) | BehaviorKind::PhysBoneCollider(_)
        )
    }
}

/// Legacy physics plugin components.
///
/// Mapping: stiffness = elasticity × 4, drag = damping, gravity power and
/// direction from the gravity vector, hit radius = radius.
struct LegacyDynamicsAdapter;

impl DynamicsAdapter for LegacyDynamicsAdapter {
    fn format_name(&self) -> &'static str {
        "legacy"
    }

    fn chains(&self, graph: &SceneGraph, root: NodeId) -> Vec<SourceChain> {
        let mut chains = Vec::new();
        for id in graph.descendants(root) {
            let Some(node) = graph.node(id) else {
                continue;
            };
            for behavior in &node.behaviors {
                let BehaviorKind::DynamicBone(bone) = &behavior.kind else {
                    continue;
                };
                let gravity_power = bone.gravity.norm();
                let gravity_dir = if gravity_power > f32::EPSILON {
                    bone.gravity / gravity_power
                } else {
                    -Vector3::y()
                };
                chains.push(SourceChain {
                    owner: id,
                    root: bone.root.unwrap_or(id),
                    excluded: bone.exclusions.clone(),
                    stiffness: bone.elasticity.clamp(0.0, 1.0) * STIFFNESS_SCALE,
                    drag: bone.damping.clamp(0.0, 1.0),
                    gravity_power,
                    gravity_dir,
                    hit_radius: bone.radius.max(0.0),
                    collider_nodes: bone.colliders.clone(),
                });
            }
        }
        chains
    }

    fn colliders(&self, graph: &SceneGraph, node: NodeId) -> Vec<(NodeId, Collider)> {
        let Some(source) = graph.node(node) else {
            return Vec::new();
        };

        source
            .behaviors
            .iter()
            .filter_map(|behavior| match &behavior.kind {
                BehaviorKind::DynamicBoneCollider(collider) => Some(collider),
                _ => None,
            })
            .map(|collider| {
                let radius = collider.radius.max(0.0);
                let half = collider.height * 0.5 - radius;
                let converted = if half > 0.0 {
                    let axis = collider.direction.unit();
                    Collider::Capsule {
                        offset: collider.center - axis * half,
                        tail: collider.center + axis * half,
                        radius,
                    }
                } else {
                    Collider::Sphere {
                        offset: collider.center,
                        radius,
                    }
                };
                (node, converted)
            })
            .collect()
    }

    fn is_source_behavior(&self, kind: &BehaviorKind) -> bool {
        matches!(
            kind,
            BehaviorKind::DynamicBone(_) | BehaviorKind::DynamicBoneCollider(_)
        )
    }
}

/// Result of converting the source dynamics of one rig.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(super) struct DynamicsSummary {
    pub(super) chains: usize,
    /// Anchors of the collider groups created or extended in this step.
    pub(super) collider_group_anchors: Vec<NodeId>,
}

/// Convert every source chain and collider below `root` into destination
/// spring chains (attached to `secondary`) and collider groups (attached to
/// their anchor bones). Source dynamics behaviors are removed afterwards.
pub(super) fn convert_secondary_dynamics(
    graph: &mut SceneGraph,
    root: NodeId,
    secondary: NodeId,
    format: DynamicsFormat,
) -> DynamicsSummary {
    let adapter: &dyn DynamicsAdapter = match format {
        DynamicsFormat::None => return DynamicsSummary::default(),
        DynamicsFormat::Primary => &PrimaryDynamicsAdapter,
        DynamicsFormat::Legacy => &LegacyDynamicsAdapter,
    };

    let source_chains = adapter.chains(graph, root);

    // Collider nodes referenced by several chains convert once.
    let mut anchors_by_collider_node = HashMap::<NodeId, Vec<NodeId>>::new();
    let mut pending_groups = BTreeMap::<NodeId, Vec<Collider>>::new();
    let mut chains = Vec::<SpringChain>::with_capacity(source_chains.len());

    for source in source_chains {
        if !graph.contains(source.root) {
            log_warn!(
                "Skipping {} chain on node {}: root bone {} does not exist",
                adapter.format_name(),
                source.owner,
                source.root
            );
            continue;
        }

        let mut collider_groups = Vec::<NodeId>::new();
        for collider_node in &source.collider_nodes {
            let anchors = anchors_by_collider_node
                .entry(*collider_node)
                .or_insert_with(|| {
                    let converted = adapter.colliders(graph, *collider_node);
                    let mut anchors = Vec::new();
                    for (anchor, collider) in converted {
                        if !graph.contains(anchor) {
                            continue;
                        }
                        pending_groups.entry(anchor).or_default().push(collider);
                        if !anchors.contains(&anchor) {
                            anchors.push(anchor);
                        }
                    }
                    anchors
                });
            for anchor in anchors.iter() {
                if !collider_groups.contains(anchor) {
                    collider_groups.push(*anchor);
                }
            }
        }

        let owner_name = graph.name_of(source.owner).unwrap_or_default().to_string();
        chains.push(SpringChain {
            comment: owner_name,
            bones: chain_bones(graph, source.root, &source.excluded),
            stiffness: source.stiffness,
            drag: source.drag,
            gravity_power: source.gravity_power,
            gravity_dir: source.gravity_dir,
            hit_radius: source.hit_radius,
            center: None,
            collider_groups,
        });
    }

    let collider_group_anchors = attach_collider_groups(graph, pending_groups);

    let chain_count = chains.len();
    if let Some(host) = graph.node_mut(secondary) {
        host.behaviors.extend(
            chains
                .into_iter()
                .map(|chain| Behavior::new(BehaviorKind::SpringBone(chain))),
        );
    }

    for id in graph.descendants(root) {
        if let Some(node) = graph.node_mut(id) {
            node.behaviors
                .retain(|behavior| !adapter.is_source_behavior(&behavior.kind));
        }
    }

    log_debug!(
        "Converted {} {} chain(s), {} collider group(s)",
        chain_count,
        adapter.format_name(),
        collider_group_anchors.len()
    );

    DynamicsSummary {
        chains: chain_count,
        collider_group_anchors,
    }
}

/// Bones of a chain: `root` then its descendants in pre-order, minus the
/// excluded subtrees.
fn chain_bones(graph: &SceneGraph, root: NodeId, excluded: &[NodeId]) -> Vec<NodeId> {
    graph
        .descendants(root)
        .into_iter()
        .filter(|id| {
            !excluded
                .iter()
                .any(|skip| graph.is_in_subtree(*id, *skip))
        })
        .collect()
}

/// Add colliders to the anchor's existing group, or create one.
fn attach_collider_groups(
    graph: &mut SceneGraph,
    pending: BTreeMap<NodeId, Vec<Collider>>,
) -> Vec<NodeId> {
    let mut anchors = Vec::with_capacity(pending.len());
    for (anchor, colliders) in pending {
        let Some(node) = graph.node_mut(anchor) else {
            continue;
        };
        let existing = node.find_behavior_mut(|kind| match kind {
            BehaviorKind::SpringBoneColliderGroup(group) => Some(group),
            _ => None,
        });
        match existing {
            Some(group) => group.colliders.extend(colliders),
            None => node
                .behaviors
                .push(Behavior::new(BehaviorKind::SpringBoneColliderGroup(
                    ColliderGroup { colliders },
                ))),
        }
        anchors.push(anchor);
    }
    anchors
}
