use std::fmt;

use nalgebra::{Matrix4, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use super::behavior::{Behavior, BehaviorKind};
use super::material::{Material, MaterialId, Texture, TextureId};
use super::mesh::Renderer;

/// Stable handle of a node inside a [`SceneGraph`].
///
/// Handles stay valid after other nodes are destroyed; a handle to a destroyed
/// node simply resolves to nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Local translation/rotation/scale of a node relative to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Transform {
    pub translation: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
    pub scale: Vector3<f32>,
}

impl Default for Transform {
    fn default() -> Self {
        Self {
            translation: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
            scale: Vector3::new(1.0, 1.0, 1.0),
        }
    }
}

impl Transform {
    pub fn from_translation(translation: Vector3<f32>) -> Self {
        Self {
            translation,
            ..Self::default()
        }
    }

    /// Compose `T * R * S` into a homogeneous matrix.
    pub fn to_matrix(&self) -> Matrix4<f32> {
        Matrix4::new_translation(&self.translation)
            * self.rotation.to_homogeneous()
            * Matrix4::new_nonuniform_scaling(&self.scale)
    }
}

fn active_by_default() -> bool {
    true
}

/// Hierarchical transform node. A node owns its children.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneNode {
    pub name: String,
    #[serde(default = "active_by_default")]
    pub active: bool,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    parent: Option<NodeId>,
    #[serde(default)]
    children: Vec<NodeId>,
    #[serde(default)]
    pub behaviors: Vec<Behavior>,
    #[serde(default)]
    pub renderer: Option<Renderer>,
}

impl SceneNode {
    fn new(name: String, parent: Option<NodeId>) -> Self {
        Self {
            name,
            active: true,
            transform: Transform::default(),
            parent,
            children: Vec::new(),
            behaviors: Vec::new(),
            renderer: None,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Returns the first behavior payload matching `select`.
    pub fn find_behavior<'a, T>(
        &'a self,
        select: impl Fn(&'a BehaviorKind) -> Option<&'a T>,
    ) -> Option<&'a T> {
        self.behaviors.iter().find_map(|behavior| select(&behavior.kind))
    }

    /// Mutable counterpart of [`SceneNode::find_behavior`].
    pub fn find_behavior_mut<'a, T>(
        &'a mut self,
        select: impl Fn(&'a mut BehaviorKind) -> Option<&'a mut T>,
    ) -> Option<&'a mut T> {
        self.behaviors
            .iter_mut()
            .find_map(|behavior| select(&mut behavior.kind))
    }
}

/// Structural defect found in a deserialized node arena.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    #[error("node {parent} lists child {child}, which does not exist")]
    MissingChild { parent: NodeId, child: NodeId },
    #[error("node {child} is listed under {parent} but names {actual:?} as its parent")]
    ParentMismatch {
        parent: NodeId,
        child: NodeId,
        actual: Option<NodeId>,
    },
    #[error("node {node} names {parent} as its parent but is not among its children")]
    UnlistedChild { node: NodeId, parent: NodeId },
    #[error("node {child} is listed as a child more than once")]
    DuplicateChild { child: NodeId },
    #[error("parent links through node {node} form a cycle")]
    Cycle { node: NodeId },
}

/// Arena-backed scene graph holding nodes, materials and textures.
///
/// Destroyed nodes leave an empty slot so outstanding [`NodeId`]s never alias
/// a different node. Deserialized arenas are checked with
/// [`SceneGraph::validate`], so every graph is a forest whose parent and child
/// links agree.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(try_from = "RawSceneGraph")]
pub struct SceneGraph {
    nodes: Vec<Option<SceneNode>>,
    #[serde(default)]
    materials: Vec<Material>,
    #[serde(default)]
    textures: Vec<Texture>,
}

#[derive(Deserialize)]
struct RawSceneGraph {
    nodes: Vec<Option<SceneNode>>,
    #[serde(default)]
    materials: Vec<Material>,
    #[serde(default)]
    textures: Vec<Texture>,
}

impl TryFrom<RawSceneGraph> for SceneGraph {
    type Error = GraphError;

    fn try_from(raw: RawSceneGraph) -> Result<Self, Self::Error> {
        let graph = SceneGraph {
            nodes: raw.nodes,
            materials: raw.materials,
            textures: raw.textures,
        };
        graph.validate()?;
        Ok(graph)
    }
}

impl SceneGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a node. An unknown `parent` leaves the node detached.
    pub fn add_node(&mut self, name: impl Into<String>, parent: Option<NodeId>) -> NodeId {
        let id = NodeId(self.nodes.len());
        let parent = parent.filter(|parent| self.contains(*parent));
        self.nodes.push(Some(SceneNode::new(name.into(), parent)));
        if let Some(parent) = parent.and_then(|parent| self.node_mut(parent)) {
            parent.children.push(id);
        }
        id
    }

    pub fn contains(&self, id: NodeId) -> bool {
        matches!(self.nodes.get(id.0), Some(Some(_)))
    }

    pub fn node(&self, id: NodeId) -> Option<&SceneNode> {
        self.nodes.get(id.0).and_then(Option::as_ref)
    }

    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut SceneNode> {
        self.nodes.get_mut(id.0).and_then(Option::as_mut)
    }

    pub fn name_of(&self, id: NodeId) -> Option<&str> {
        self.node(id).map(|node| node.name.as_str())
    }

    pub fn parent_of(&self, id: NodeId) -> Option<NodeId> {
        self.node(id).and_then(SceneNode::parent)
    }

    pub fn children_of(&self, id: NodeId) -> &[NodeId] {
        self.node(id).map(SceneNode::children).unwrap_or(&[])
    }

    /// Number of live (not destroyed) nodes.
    pub fn node_count(&self) -> usize {
        self.nodes.iter().filter(|slot| slot.is_some()).count()
    }

    /// Destroy `id` together with its entire subtree.
    ///
    /// Destroying an already-destroyed node is a no-op. Returns the number of
    /// nodes removed.
    pub fn destroy(&mut self, id: NodeId) -> usize {
        if !self.contains(id) {
            return 0;
        }

        if let Some(parent) = self.parent_of(id).and_then(|parent| self.node_mut(parent)) {
            parent.children.retain(|child| *child != id);
        }

        let subtree = self.descendants(id);
        for node in &subtree {
            if let Some(slot) = self.nodes.get_mut(node.0) {
                *slot = None;
            }
        }
        subtree.len()
    }

    /// Pre-order traversal of `root` and everything below it.
    pub fn descendants(&self, root: NodeId) -> Vec<NodeId> {
        let mut ordered = Vec::new();
        if !self.contains(root) {
            return ordered;
        }

        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let Some(node) = self.node(id) else {
                continue;
            };
            ordered.push(id);
            stack.extend(node.children.iter().rev().copied());
        }
        ordered
    }

    /// True when `id` is `ancestor` or lies below it.
    pub fn is_in_subtree(&self, id: NodeId, ancestor: NodeId) -> bool {
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            if !self.contains(current) {
                return false;
            }
            if current == ancestor {
                return true;
            }
            cursor = self.parent_of(current);
        }
        false
    }

    /// First node named `name` in pre-order below (and including) `root`.
    pub fn find_by_name(&self, root: NodeId, name: &str) -> Option<NodeId> {
        self.descendants(root)
            .into_iter()
            .find(|id| self.name_of(*id) == Some(name))
    }

    /// World matrix of `id`; identity for unknown nodes.
    pub fn world_matrix(&self, id: NodeId) -> Matrix4<f32> {
        let mut matrix = Matrix4::identity();
        let mut cursor = Some(id);
        while let Some(current) = cursor {
            let Some(node) = self.node(current) else {
                break;
            };
            matrix = node.transform.to_matrix() * matrix;
            cursor = node.parent;
        }
        matrix
    }

    pub fn world_position(&self, id: NodeId) -> Option<Vector3<f32>> {
        if !self.contains(id) {
            return None;
        }
        let world = self.world_matrix(id);
        Some(Vector3::new(world[(0, 3)], world[(1, 3)], world[(2, 3)]))
    }

    /// Check that parent and child links mirror each other and contain no
    /// cycle. Graphs built through [`SceneGraph::add_node`] always pass.
    pub fn validate(&self) -> Result<(), GraphError> {
        let mut listed = vec![false; self.nodes.len()];
        for (index, node) in self.nodes.iter().enumerate() {
            let Some(node) = node else {
                continue;
            };
            let parent = NodeId(index);
            for &child in &node.children {
                let Some(child_node) = self.node(child) else {
                    return Err(GraphError::MissingChild { parent, child });
                };
                if child_node.parent != Some(parent) {
                    return Err(GraphError::ParentMismatch {
                        parent,
                        child,
                        actual: child_node.parent,
                    });
                }
                if std::mem::replace(&mut listed[child.0], true) {
                    return Err(GraphError::DuplicateChild { child });
                }
            }
        }

        for (index, node) in self.nodes.iter().enumerate() {
            let Some(parent) = node.as_ref().and_then(SceneNode::parent) else {
                continue;
            };
            if !listed[index] || !self.children_of(parent).contains(&NodeId(index)) {
                return Err(GraphError::UnlistedChild {
                    node: NodeId(index),
                    parent,
                });
            }
        }

        // Links agree, so a cycle in parent links is the only way left to loop.
        let mut settled = vec![false; self.nodes.len()];
        let mut on_path = vec![false; self.nodes.len()];
        for start in 0..self.nodes.len() {
            let mut path = Vec::new();
            let mut cursor = Some(NodeId(start)).filter(|id| self.contains(*id));
            while let Some(id) = cursor {
                if settled[id.0] {
                    break;
                }
                if on_path[id.0] {
                    return Err(GraphError::Cycle { node: id });
                }
                on_path[id.0] = true;
                path.push(id);
                cursor = self.parent_of(id);
            }
            for id in path {
                on_path[id.0] = false;
                settled[id.0] = true;
            }
        }
        Ok(())
    }

    // ─── Materials & textures ────────────────────────────────────────────────

    pub fn add_material(&mut self, material: Material) -> MaterialId {
        self.materials.push(material);
        MaterialId(self.materials.len() - 1)
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.0)
    }

    pub fn material_mut(&mut self, id: MaterialId) -> Option<&mut Material> {
        self.materials.get_mut(id.0)
    }

    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    pub fn add_texture(&mut self, texture: Texture) -> TextureId {
        self.textures.push(texture);
        TextureId(self.textures.len() - 1)
    }

    pub fn texture(&self, id: TextureId) -> Option<&Texture> {
        self.textures.get(id.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain() -> (SceneGraph, NodeId, NodeId, NodeId) {
        let mut graph = SceneGraph::new();
        let root = graph.add_node("Root", None);
        let child = graph.add_node("Child", Some(root));
        let grandchild = graph.add_node("Grandchild", Some(child));
        (graph, root, child, grandchild)
    }

    #[test]
    fn given_subtree_when_destroying_parent_then_descendants_are_removed() {
        let (mut graph, root, child, grandchild) = chain();

        let removed = graph.destroy(child);

        assert_eq!(removed, 2);
        assert!(graph.contains(root));
        assert!(!graph.contains(child));
        assert!(!graph.contains(grandchild));
        assert!(graph.children_of(root).is_empty());
    }

    #[test]
    fn given_destroyed_node_when_destroying_again_then_nothing_happens() {
        let (mut graph, _, child, _) = chain();
        graph.destroy(child);

        assert_eq!(graph.destroy(child), 0);
        assert_eq!(graph.node_count(), 1);
    }

    #[test]
    fn given_translated_parents_when_computing_world_position_then_offsets_accumulate() {
        let (mut graph, root, child, grandchild) = chain();
        graph.node_mut(root).expect("root").transform =
            Transform::from_translation(Vector3::new(0.0, 1.0, 0.0));
        graph.node_mut(child).expect("child").transform =
            Transform::from_translation(Vector3::new(0.5, 0.0, 0.0));
        graph.node_mut(grandchild).expect("grandchild").transform =
            Transform::from_translation(Vector3::new(0.0, 0.0, 2.0));

        let position = graph.world_position(grandchild).expect("position");

        assert!((position - Vector3::new(0.5, 1.0, 2.0)).norm() < 1e-6);
    }

    #[test]
    fn given_siblings_when_traversing_then_order_is_pre_order() {
        let mut graph = SceneGraph::new();
        let root = graph.add_node("Root", None);
        let a = graph.add_node("A", Some(root));
        let a1 = graph.add_node("A1", Some(a));
        let b = graph.add_node("B", Some(root));

        assert_eq!(graph.descendants(root), vec![root, a, a1, b]);
        assert_eq!(graph.find_by_name(root, "B"), Some(b));
        assert!(graph.is_in_subtree(a1, a));
        assert!(!graph.is_in_subtree(b, a));
    }

    #[test]
    fn given_built_graph_when_round_tripping_through_json_then_it_validates() {
        let (graph, root, _, grandchild) = chain();

        let json = serde_json::to_string(&graph).expect("serialize");
        let restored: SceneGraph = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(restored.validate(), Ok(()));
        assert_eq!(restored.descendants(root).last(), Some(&grandchild));
    }

    #[test]
    fn given_child_pointing_back_at_root_when_deserializing_then_graph_is_rejected() {
        let json = r#"{"nodes":[
            {"name":"Avatar","children":[1]},
            {"name":"Armature","parent":0,"children":[0]}
        ]}"#;

        let error = serde_json::from_str::<SceneGraph>(json).expect_err("inconsistent links");

        assert!(error.to_string().contains("names None as its parent"), "{error}");
    }

    #[test]
    fn given_mirrored_parent_cycle_when_validating_then_cycle_is_reported() {
        let json = r#"{"nodes":[
            {"name":"A","parent":1,"children":[1]},
            {"name":"B","parent":0,"children":[0]}
        ]}"#;

        let error = serde_json::from_str::<SceneGraph>(json).expect_err("cyclic");

        assert!(error.to_string().contains("form a cycle"), "{error}");
    }

    #[test]
    fn given_parent_that_does_not_list_child_when_validating_then_link_is_reported() {
        let json = r#"{"nodes":[
            {"name":"Avatar"},
            {"name":"Stray","parent":0}
        ]}"#;

        let error = serde_json::from_str::<SceneGraph>(json).expect_err("unlisted");

        assert!(error.to_string().contains("not among its children"), "{error}");
    }

    #[test]
    fn given_missing_child_slot_when_validating_then_child_is_reported() {
        let json = r#"{"nodes":[{"name":"Avatar","children":[4]}]}"#;

        let error = serde_json::from_str::<SceneGraph>(json).expect_err("missing");

        assert!(error.to_string().contains("does not exist"), "{error}");
    }
}
