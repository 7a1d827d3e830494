use crate::rig::{NodeId, SceneGraph};

/// Counts of what [`remove_inactive_nodes_and_disabled_behaviors`] removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct SanitizeSummary {
    pub(super) removed_nodes: usize,
    pub(super) removed_behaviors: usize,
}

/// Remove every inactive node (with its whole subtree, active descendants
/// included), then every disabled behavior left on the surviving nodes.
pub(super) fn remove_inactive_nodes_and_disabled_behaviors(
    graph: &mut SceneGraph,
    root: NodeId,
) -> SanitizeSummary {
    let mut summary = SanitizeSummary::default();

    // Snapshot first: destroying a subtree invalidates later entries, which
    // `destroy` tolerates.
    for id in graph.descendants(root) {
        let inactive = graph.node(id).map(|node| !node.active).unwrap_or(false);
        if inactive {
            summary.removed_nodes += graph.destroy(id);
        }
    }

    for id in graph.descendants(root) {
        let Some(node) = graph.node_mut(id) else {
            continue;
        };
        let before = node.behaviors.len();
        node.behaviors.retain(|behavior| behavior.enabled);
        summary.removed_behaviors += before - node.behaviors.len();
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::{Behavior, BehaviorKind, PhysBone, fixtures};

    #[test]
    fn given_inactive_parent_with_active_child_when_sanitizing_then_whole_subtree_is_removed() {
        let mut fixture = fixtures::humanoid();
        let graph = &mut fixture.rig.graph;
        let hair_tip = graph.children_of(fixture.hair)[0];
        graph.node_mut(fixture.hair).expect("hair").active = false;
        assert!(graph.node(hair_tip).expect("tip").active);

        let summary = remove_inactive_nodes_and_disabled_behaviors(graph, fixture.rig.root);

        assert_eq!(summary.removed_nodes, 2);
        assert!(!graph.contains(fixture.hair));
        assert!(!graph.contains(hair_tip));
        assert!(graph.contains(fixture.head));
    }

    #[test]
    fn given_disabled_behavior_when_sanitizing_then_owning_node_survives() {
        let mut fixture = fixtures::humanoid();
        let graph = &mut fixture.rig.graph;
        let head = graph.node_mut(fixture.head).expect("head");
        head.behaviors
            .push(Behavior::disabled(BehaviorKind::PhysBone(PhysBone::default())));
        head.behaviors.push(Behavior::new(BehaviorKind::Custom {
            type_name: "Marker".to_string(),
            payload: serde_json::Value::Null,
        }));

        let summary = remove_inactive_nodes_and_disabled_behaviors(graph, fixture.rig.root);

        assert_eq!(summary.removed_behaviors, 1);
        let head = graph.node(fixture.head).expect("head survives");
        assert_eq!(head.behaviors.len(), 1);
        assert_eq!(head.behaviors[0].kind.type_tag(), "Marker");
    }

    #[test]
    fn given_nested_inactive_nodes_when_sanitizing_then_already_destroyed_entries_are_skipped() {
        let mut fixture = fixtures::humanoid();
        let graph = &mut fixture.rig.graph;
        let hair_tip = graph.children_of(fixture.hair)[0];
        graph.node_mut(fixture.hair).expect("hair").active = false;
        graph.node_mut(hair_tip).expect("tip").active = false;

        let summary = remove_inactive_nodes_and_disabled_behaviors(graph, fixture.rig.root);

        assert_eq!(summary.removed_nodes, 2);
    }
}
