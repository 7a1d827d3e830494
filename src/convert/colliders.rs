use std::collections::HashSet;

use crate::error::ConversionError;
use crate::log_debug;
use crate::rig::{BehaviorKind, NodeId, RESERVED_COLLIDER_BONES, SceneGraph, Skeleton};

/// Remove every collider group whose anchor bone is neither referenced by a
/// spring chain nor one of the reserved hand bones. Returns the anchors whose
/// groups were removed.
pub(super) fn prune_unused_collider_groups(
    graph: &mut SceneGraph,
    root: NodeId,
    skeleton: &Skeleton,
) -> Result<Vec<NodeId>, ConversionError> {
    let mut keep = HashSet::<NodeId>::new();
    for bone in RESERVED_COLLIDER_BONES {
        let node = skeleton.resolve(graph, bone).ok_or_else(|| {
            ConversionError::configuration(format!(
                "reserved collider bone '{}' is not mapped",
                bone.as_str()
            ))
        })?;
        keep.insert(node);
    }

    let nodes = graph.descendants(root);
    for id in &nodes {
        let Some(node) = graph.node(*id) else {
            continue;
        };
        for behavior in &node.behaviors {
            if let BehaviorKind::SpringBone(chain) = &behavior.kind {
                keep.extend(chain.collider_groups.iter().copied());
            }
        }
    }

    let mut pruned = Vec::new();
    for id in nodes {
        if keep.contains(&id) {
            continue;
        }
        let Some(node) = graph.node_mut(id) else {
            continue;
        };
        let before = node.behaviors.len();
        node.behaviors
            .retain(|behavior| !matches!(behavior.kind, BehaviorKind::SpringBoneColliderGroup(_)));
        if node.behaviors.len() != before {
            log_debug!("Pruned unreferenced collider group on '{}'", node.name);
            pruned.push(id);
        }
    }

    Ok(pruned)
}
