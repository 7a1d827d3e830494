use crate::rig::{
    AvatarMeta, Behavior, BehaviorKind, BlendShapeProxy, FirstPersonConfig, LookAtConfig, NodeId,
    SceneGraph,
};

use super::types::SECONDARY_NODE_NAME;

/// Attach the destination avatar behaviors to `root` and create the node that
/// hosts spring chains. Returns that node.
pub(super) fn initialize_vrm_behaviors(
    graph: &mut SceneGraph,
    root: NodeId,
    meta: AvatarMeta,
    head: NodeId,
) -> NodeId {
    if let Some(node) = graph.node_mut(root) {
        node.behaviors.extend([
            Behavior::new(BehaviorKind::Meta(meta)),
            Behavior::new(BehaviorKind::FirstPerson(FirstPersonConfig {
                bone: Some(head),
                ..FirstPersonConfig::default()
            })),
            Behavior::new(BehaviorKind::LookAt(LookAtConfig::default())),
            Behavior::new(BehaviorKind::BlendShapeProxy(BlendShapeProxy::default())),
        ]);
    }
    graph.add_node(SECONDARY_NODE_NAME, Some(root))
}

pub(super) fn first_person_mut(graph: &mut SceneGraph, root: NodeId) -> Option<&mut FirstPersonConfig> {
    graph.node_mut(root)?.find_behavior_mut(|kind| match kind {
        BehaviorKind::FirstPerson(config) => Some(config),
        _ => None,
    })
}

pub(super) fn look_at_mut(graph: &mut SceneGraph, root: NodeId) -> Option<&mut LookAtConfig> {
    graph.node_mut(root)?.find_behavior_mut(|kind| match kind {
        BehaviorKind::LookAt(config) => Some(config),
        _ => None,
    })
}

pub(super) fn blend_shape_proxy_mut(
    graph: &mut SceneGraph,
    root: NodeId,
) -> Option<&mut BlendShapeProxy> {
    graph.node_mut(root)?.find_behavior_mut(|kind| match kind {
        BehaviorKind::BlendShapeProxy(proxy) => Some(proxy),
        _ => None,
    })
}
