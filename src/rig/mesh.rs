use std::collections::HashSet;

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::graph::NodeId;
use super::material::MaterialId;

/// Up to four bone influences of a single vertex.
///
/// `joints` index into the owning renderer's [`Skin::bones`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct BoneWeights {
    pub joints: [u16; 4],
    pub weights: [f32; 4],
}

impl BoneWeights {
    /// Full influence of a single joint slot.
    pub fn single(joint: u16) -> Self {
        Self {
            joints: [joint, 0, 0, 0],
            weights: [1.0, 0.0, 0.0, 0.0],
        }
    }

    /// Non-zero `(joint, weight)` influences.
    pub fn influences(&self) -> impl Iterator<Item = (u16, f32)> + '_ {
        self.joints
            .iter()
            .copied()
            .zip(self.weights.iter().copied())
            .filter(|(_, weight)| *weight > 0.0)
    }
}

/// Triangle list drawn with one material slot of the renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubMesh {
    pub indices: Vec<u32>,
    /// Index into the renderer's material list.
    pub material: usize,
}

/// Named per-vertex offset blended by a scalar weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeKey {
    pub name: String,
    pub position_deltas: Vec<Vector3<f32>>,
    #[serde(default)]
    pub normal_deltas: Vec<Vector3<f32>>,
}

impl ShapeKey {
    /// True when the key moves vertex `index` at all.
    pub fn affects(&self, index: usize) -> bool {
        self.position_deltas
            .get(index)
            .map(|delta| delta.norm_squared() > f32::EPSILON * f32::EPSILON)
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeshError {
    #[error("mesh '{mesh}' already has a shape key named '{name}'")]
    DuplicateShapeKey { mesh: String, name: String },
    #[error("mesh '{mesh}' has {found} {attribute} entries but {expected} vertices")]
    AttributeLength {
        mesh: String,
        attribute: &'static str,
        found: usize,
        expected: usize,
    },
    #[error("mesh '{mesh}' submesh {submesh} references vertex {index} out of {count}")]
    IndexOutOfRange {
        mesh: String,
        submesh: usize,
        index: u32,
        count: usize,
    },
}

/// Vertex buffers, submeshes, skin weights and shape keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Mesh {
    pub name: String,
    pub positions: Vec<Vector3<f32>>,
    pub normals: Vec<Vector3<f32>>,
    pub uvs: Vec<Vector2<f32>>,
    pub weights: Vec<BoneWeights>,
    pub submeshes: Vec<SubMesh>,
    pub shape_keys: Vec<ShapeKey>,
}

impl Mesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.submeshes
            .iter()
            .map(|submesh| submesh.indices.len() / 3)
            .sum()
    }

    pub fn shape_key_index(&self, name: &str) -> Option<usize> {
        self.shape_keys.iter().position(|key| key.name == name)
    }

    pub fn shape_key_names(&self) -> Vec<&str> {
        self.shape_keys.iter().map(|key| key.name.as_str()).collect()
    }

    pub fn add_shape_key(&mut self, key: ShapeKey) -> Result<(), MeshError> {
        if self.shape_key_index(&key.name).is_some() {
            return Err(MeshError::DuplicateShapeKey {
                mesh: self.name.clone(),
                name: key.name,
            });
        }
        self.shape_keys.push(key);
        Ok(())
    }

    /// Drop every shape key for which `keep` returns false; returns the
    /// removed names in their original order.
    pub fn retain_shape_keys(&mut self, keep: impl Fn(&str) -> bool) -> Vec<String> {
        let mut removed = Vec::new();
        self.shape_keys.retain(|key| {
            let kept = keep(&key.name);
            if !kept {
                removed.push(key.name.clone());
            }
            kept
        });
        removed
    }

    /// Check buffer lengths, index ranges and shape-key name uniqueness.
    pub fn validate(&self) -> Result<(), MeshError> {
        let expected = self.vertex_count();
        let optional_attributes = [
            ("normal", self.normals.len()),
            ("uv", self.uvs.len()),
            ("skin weight", self.weights.len()),
        ];
        for (attribute, found) in optional_attributes {
            if found != 0 && found != expected {
                return Err(MeshError::AttributeLength {
                    mesh: self.name.clone(),
                    attribute,
                    found,
                    expected,
                });
            }
        }

        for (submesh_index, submesh) in self.submeshes.iter().enumerate() {
            if let Some(index) = submesh
                .indices
                .iter()
                .copied()
                .find(|index| *index as usize >= expected)
            {
                return Err(MeshError::IndexOutOfRange {
                    mesh: self.name.clone(),
                    submesh: submesh_index,
                    index,
                    count: expected,
                });
            }
        }

        let mut seen = HashSet::new();
        for key in &self.shape_keys {
            if !seen.insert(key.name.as_str()) {
                return Err(MeshError::DuplicateShapeKey {
                    mesh: self.name.clone(),
                    name: key.name.clone(),
                });
            }
            if key.position_deltas.len() != expected {
                return Err(MeshError::AttributeLength {
                    mesh: self.name.clone(),
                    attribute: "shape key delta",
                    found: key.position_deltas.len(),
                    expected,
                });
            }
        }

        Ok(())
    }
}

/// Skin binding of a renderer to skeleton nodes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Skin {
    pub bones: Vec<NodeId>,
    #[serde(default)]
    pub root_bone: Option<NodeId>,
}

/// Binds a mesh and its ordered material list to the owning node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Renderer {
    pub mesh: Mesh,
    #[serde(default)]
    pub materials: Vec<MaterialId>,
    #[serde(default)]
    pub skin: Option<Skin>,
}

impl Renderer {
    pub fn is_skinned(&self) -> bool {
        self.skin.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh_with_keys(names: &[&str]) -> Mesh {
        let mut mesh = Mesh {
            name: "Body".to_string(),
            positions: vec![Vector3::zeros(); 3],
            submeshes: vec![SubMesh {
                indices: vec![0, 1, 2],
                material: 0,
            }],
            ..Mesh::default()
        };
        for name in names {
            mesh.add_shape_key(ShapeKey {
                name: name.to_string(),
                position_deltas: vec![Vector3::zeros(); 3],
                normal_deltas: Vec::new(),
            })
            .expect("unique name");
        }
        mesh
    }

    #[test]
    fn given_existing_key_when_adding_same_name_then_duplicate_is_rejected() {
        let mut mesh = mesh_with_keys(&["Blink"]);

        let result = mesh.add_shape_key(ShapeKey {
            name: "Blink".to_string(),
            position_deltas: vec![Vector3::zeros(); 3],
            normal_deltas: Vec::new(),
        });

        assert!(matches!(result, Err(MeshError::DuplicateShapeKey { .. })));
    }

    #[test]
    fn given_key_filter_when_retaining_then_removed_names_are_reported_in_order() {
        let mut mesh = mesh_with_keys(&["A", "Blink", "Joy"]);

        let removed = mesh.retain_shape_keys(|name| name == "Blink");

        assert_eq!(removed, vec!["A".to_string(), "Joy".to_string()]);
        assert_eq!(mesh.shape_key_names(), vec!["Blink"]);
    }

    #[test]
    fn given_index_past_vertex_count_when_validating_then_error_names_submesh() {
        let mut mesh = mesh_with_keys(&[]);
        mesh.submeshes[0].indices = vec![0, 1, 7];

        let error = mesh.validate().expect_err("index 7 is out of range");

        assert!(error.to_string().contains("submesh 0"));
    }
}
