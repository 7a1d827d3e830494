use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::graph::{NodeId, SceneGraph};

/// Standard humanoid bone identifiers.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum HumanBone {
    Hips,
    Spine,
    Chest,
    UpperChest,
    Neck,
    Head,
    LeftEye,
    RightEye,
    Jaw,
    LeftShoulder,
    LeftUpperArm,
    LeftLowerArm,
    LeftHand,
    RightShoulder,
    RightUpperArm,
    RightLowerArm,
    RightHand,
    LeftUpperLeg,
    LeftLowerLeg,
    LeftFoot,
    LeftToes,
    RightUpperLeg,
    RightLowerLeg,
    RightFoot,
    RightToes,
    LeftThumbProximal,
    LeftThumbIntermediate,
    LeftThumbDistal,
    LeftIndexProximal,
    LeftIndexIntermediate,
    LeftIndexDistal,
    LeftMiddleProximal,
    LeftMiddleIntermediate,
    LeftMiddleDistal,
    LeftRingProximal,
    LeftRingIntermediate,
    LeftRingDistal,
    LeftLittleProximal,
    LeftLittleIntermediate,
    LeftLittleDistal,
    RightThumbProximal,
    RightThumbIntermediate,
    RightThumbDistal,
    RightIndexProximal,
    RightIndexIntermediate,
    RightIndexDistal,
    RightMiddleProximal,
    RightMiddleIntermediate,
    RightMiddleDistal,
    RightRingProximal,
    RightRingIntermediate,
    RightRingDistal,
    RightLittleProximal,
    RightLittleIntermediate,
    RightLittleDistal,
}

/// Bones that must resolve before dynamics and collider processing.
pub const REQUIRED_BONES: [HumanBone; 3] =
    [HumanBone::Head, HumanBone::LeftHand, HumanBone::RightHand];

/// Bones whose collider groups always survive pruning.
pub const RESERVED_COLLIDER_BONES: [HumanBone; 2] = [HumanBone::LeftHand, HumanBone::RightHand];

impl HumanBone {
    /// Bone name used by the destination humanoid table.
    pub fn as_str(&self) -> &'static str {
        match self {
            HumanBone::Hips => "hips",
            HumanBone::Spine => "spine",
            HumanBone::Chest => "chest",
            HumanBone::UpperChest => "upperChest",
            HumanBone::Neck => "neck",
            HumanBone::Head => "head",
            HumanBone::LeftEye => "leftEye",
            HumanBone::RightEye => "rightEye",
            HumanBone::Jaw => "jaw",
            HumanBone::LeftShoulder => "leftShoulder",
            HumanBone::LeftUpperArm => "leftUpperArm",
            HumanBone::LeftLowerArm => "leftLowerArm",
            HumanBone::LeftHand => "leftHand",
            HumanBone::RightShoulder => "rightShoulder",
            HumanBone::RightUpperArm => "rightUpperArm",
            HumanBone::RightLowerArm => "rightLowerArm",
            HumanBone::RightHand => "rightHand",
            HumanBone::LeftUpperLeg => "leftUpperLeg",
            HumanBone::LeftLowerLeg => "leftLowerLeg",
            HumanBone::LeftFoot => "leftFoot",
            HumanBone::LeftToes => "leftToes",
            HumanBone::RightUpperLeg => "rightUpperLeg",
            HumanBone::RightLowerLeg => "rightLowerLeg",
            HumanBone::RightFoot => "rightFoot",
            HumanBone::RightToes => "rightToes",
            HumanBone::LeftThumbProximal => "leftThumbProximal",
            HumanBone::LeftThumbIntermediate => "leftThumbIntermediate",
            HumanBone::LeftThumbDistal => "leftThumbDistal",
            HumanBone::LeftIndexProximal => "leftIndexProximal",
            HumanBone::LeftIndexIntermediate => "leftIndexIntermediate",
            HumanBone::LeftIndexDistal => "leftIndexDistal",
            HumanBone::LeftMiddleProximal => "leftMiddleProximal",
            HumanBone::LeftMiddleIntermediate => "leftMiddleIntermediate",
            HumanBone::LeftMiddleDistal => "leftMiddleDistal",
            HumanBone::LeftRingProximal => "leftRingProximal",
            HumanBone::LeftRingIntermediate => "leftRingIntermediate",
            HumanBone::LeftRingDistal => "leftRingDistal",
            HumanBone::LeftLittleProximal => "leftLittleProximal",
            HumanBone::LeftLittleIntermediate => "leftLittleIntermediate",
            HumanBone::LeftLittleDistal => "leftLittleDistal",
            HumanBone::RightThumbProximal => "rightThumbProximal",
            HumanBone::RightThumbIntermediate => "rightThumbIntermediate",
            HumanBone::RightThumbDistal => "rightThumbDistal",
            HumanBone::RightIndexProximal => "rightIndexProximal",
            HumanBone::RightIndexIntermediate => "rightIndexIntermediate",
            HumanBone::RightIndexDistal => "rightIndexDistal",
            HumanBone::RightMiddleProximal => "rightMiddleProximal",
            HumanBone::RightMiddleIntermediate => "rightMiddleIntermediate",
            HumanBone::RightMiddleDistal => "rightMiddleDistal",
            HumanBone::RightRingProximal => "rightRingProximal",
            HumanBone::RightRingIntermediate => "rightRingIntermediate",
            HumanBone::RightRingDistal => "rightRingDistal",
            HumanBone::RightLittleProximal => "rightLittleProximal",
            HumanBone::RightLittleIntermediate => "rightLittleIntermediate",
            HumanBone::RightLittleDistal => "rightLittleDistal",
        }
    }
}

/// Humanoid bone → node mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Skeleton {
    bones: BTreeMap<HumanBone, NodeId>,
}

impl Skeleton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, bone: HumanBone, node: NodeId) {
        self.bones.insert(bone, node);
    }

    pub fn get(&self, bone: HumanBone) -> Option<NodeId> {
        self.bones.get(&bone).copied()
    }

    /// Node of `bone` when it is mapped and still alive in `graph`.
    pub fn resolve(&self, graph: &SceneGraph, bone: HumanBone) -> Option<NodeId> {
        self.get(bone).filter(|node| graph.contains(*node))
    }

    pub fn iter(&self) -> impl Iterator<Item = (HumanBone, NodeId)> + '_ {
        self.bones.iter().map(|(bone, node)| (*bone, *node))
    }

    pub fn len(&self) -> usize {
        self.bones.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bones.is_empty()
    }

    /// Bones of `required` that do not resolve to a live node.
    pub fn missing(&self, graph: &SceneGraph, required: &[HumanBone]) -> Vec<HumanBone> {
        required
            .iter()
            .copied()
            .filter(|bone| self.resolve(graph, *bone).is_none())
            .collect()
    }

    /// Re-resolve every bone below `new_root`, a copy of `old_root`.
    ///
    /// Each bone is located by its path of sibling positions and names from
    /// `old_root`, so a prop that merely shares a bone's name elsewhere in the
    /// hierarchy never captures the binding. A step whose position no longer
    /// holds the expected name falls back to the first sibling with that name.
    /// This must run while the old nodes still exist; bones that cannot be
    /// found are left out.
    pub fn rebind(&self, graph: &SceneGraph, old_root: NodeId, new_root: NodeId) -> Skeleton {
        let bones = self
            .bones
            .iter()
            .filter_map(|(bone, node)| {
                let steps = path_below(graph, old_root, *node)?;
                follow_path(graph, new_root, &steps).map(|found| (*bone, found))
            })
            .collect();
        Skeleton { bones }
    }
}

/// Sibling index and name of every step from `root` down to `node`.
fn path_below(graph: &SceneGraph, root: NodeId, node: NodeId) -> Option<Vec<(usize, &str)>> {
    let mut steps = Vec::new();
    let mut cursor = node;
    while cursor != root {
        let parent = graph.parent_of(cursor)?;
        let index = graph
            .children_of(parent)
            .iter()
            .position(|child| *child == cursor)?;
        steps.push((index, graph.name_of(cursor)?));
        cursor = parent;
    }
    steps.reverse();
    Some(steps)
}

fn follow_path(graph: &SceneGraph, root: NodeId, steps: &[(usize, &str)]) -> Option<NodeId> {
    steps.iter().try_fold(root, |cursor, (index, name)| {
        let children = graph.children_of(cursor);
        let named = |child: &NodeId| graph.name_of(*child) == Some(*name);
        children
            .get(*index)
            .copied()
            .filter(named)
            .or_else(|| children.iter().copied().find(named))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn given_renamed_copy_when_rebinding_then_bones_resolve_under_new_root() {
        let mut graph = SceneGraph::new();
        let old_root = graph.add_node("Avatar", None);
        let old_head = graph.add_node("Head", Some(old_root));
        let new_root = graph.add_node("Avatar", None);
        let new_head = graph.add_node("Head", Some(new_root));

        let mut skeleton = Skeleton::new();
        skeleton.insert(HumanBone::Head, old_head);

        let rebound = skeleton.rebind(&graph, old_root, new_root);

        assert_eq!(rebound.get(HumanBone::Head), Some(new_head));
    }

    #[test]
    fn given_prop_sharing_bone_name_earlier_in_traversal_when_rebinding_then_bone_keeps_its_place() {
        let mut graph = SceneGraph::new();
        let build = |graph: &mut SceneGraph| {
            let root = graph.add_node("Avatar", None);
            graph.add_node("Head", Some(root));
            let armature = graph.add_node("Armature", Some(root));
            let head = graph.add_node("Head", Some(armature));
            (root, head)
        };
        let (old_root, old_head) = build(&mut graph);
        let (new_root, new_head) = build(&mut graph);
        let mut skeleton = Skeleton::new();
        skeleton.insert(HumanBone::Head, old_head);

        let rebound = skeleton.rebind(&graph, old_root, new_root);

        assert_eq!(rebound.get(HumanBone::Head), Some(new_head));
    }

    #[test]
    fn given_bone_outside_old_root_when_rebinding_then_it_is_left_out() {
        let mut graph = SceneGraph::new();
        let old_root = graph.add_node("Avatar", None);
        let stray = graph.add_node("Head", None);
        let new_root = graph.add_node("Avatar", None);
        graph.add_node("Head", Some(new_root));
        let mut skeleton = Skeleton::new();
        skeleton.insert(HumanBone::Head, stray);

        let rebound = skeleton.rebind(&graph, old_root, new_root);

        assert!(rebound.is_empty());
    }

    #[test]
    fn given_destroyed_hand_when_checking_required_then_hand_is_missing() {
        let mut graph = SceneGraph::new();
        let root = graph.add_node("Avatar", None);
        let head = graph.add_node("Head", Some(root));
        let hand = graph.add_node("LeftHand", Some(root));
        let mut skeleton = Skeleton::new();
        skeleton.insert(HumanBone::Head, head);
        skeleton.insert(HumanBone::LeftHand, hand);
        graph.destroy(hand);

        let missing = skeleton.missing(&graph, &REQUIRED_BONES);

        assert_eq!(missing, vec![HumanBone::LeftHand, HumanBone::RightHand]);
    }
}
