use std::{borrow::Cow, collections::HashMap};

use anyhow::{Context, Result, bail};
use gltf::binary::{Glb, Header};
use nalgebra::{Matrix4, Vector2, Vector3};
use serde_json::{Map, Value, json};

use crate::correction::rebuild_inverse_bind_matrix;
use crate::log_debug;
use crate::rig::{
    AvatarMeta, BehaviorKind, BlendShapeProxy, BoneWeights, Collider, FirstPersonConfig,
    HumanBone, LookAtConfig, LookAtRange, Material, MaterialId, MaterialParameter, NodeId, Renderer,
    SceneGraph, Skeleton, Skin, SpringChain, TextureId,
};
use crate::texture::reencode_texture;

use super::types::{ConvertOptions, DESTINATION_UNLIT_SHADER};

const COMPONENT_UNSIGNED_SHORT: u32 = 5123;
const COMPONENT_UNSIGNED_INT: u32 = 5125;
const COMPONENT_FLOAT: u32 = 5126;
const TARGET_ARRAY_BUFFER: u32 = 34962;
const TARGET_ELEMENT_ARRAY_BUFFER: u32 = 34963;
const MODE_TRIANGLES: u32 = 4;

const RENDER_QUEUE_ALPHA_TEST: i32 = 2450;
const RENDER_QUEUE_TRANSPARENT: i32 = 3000;

/// Input range of the look-at curves, in degrees.
const LOOK_AT_INPUT_DEGREES: f32 = 90.0;
const DEFAULT_LOOK_AT_DEGREES: f32 = 10.0;
const LINEAR_CURVE: [f32; 8] = [0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 0.0];

const UNLIT_EXTENSION: &str = "KHR_materials_unlit";
const VRM_EXTENSION: &str = "VRM";

/// Serializes a finalized avatar into destination file bytes.
pub trait VrmExporter {
    fn export(
        &self,
        graph: &SceneGraph,
        root: NodeId,
        skeleton: &Skeleton,
        options: &ConvertOptions,
    ) -> Result<Vec<u8>>;
}

/// Writes VRM 0.x as a binary glTF container.
#[derive(Debug, Clone, Copy, Default)]
pub struct GlbVrmExporter;

impl VrmExporter for GlbVrmExporter {
    fn export(
        &self,
        graph: &SceneGraph,
        root: NodeId,
        skeleton: &Skeleton,
        options: &ConvertOptions,
    ) -> Result<Vec<u8>> {
        if !graph.contains(root) {
            bail!("avatar root {root} is not part of the scene");
        }

        let mut document = DocumentBuilder::new(graph, options);
        document.write_nodes(root)?;
        let vrm = document.vrm_extension(root, skeleton)?;
        let (json, bin) = document.finish(vrm);

        let json_bytes = serde_json::to_vec(&json).context("failed to serialize glTF JSON")?;
        let glb = Glb {
            header: Header {
                magic: *b"glTF",
                version: 2,
                length: 0,
            },
            json: Cow::Owned(json_bytes),
            bin: if bin.is_empty() {
                None
            } else {
                Some(Cow::Owned(bin))
            },
        };

        let mut out = Vec::new();
        glb.to_writer(&mut out)
            .context("failed to write output GLB")?;
        log_debug!("Exported {} bytes", out.len());
        Ok(out)
    }
}

// ─── Binary chunk ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct BinaryChunk {
    bytes: Vec<u8>,
    views: Vec<Value>,
    accessors: Vec<Value>,
}

impl BinaryChunk {
    fn push_view(&mut self, data: &[u8], target: Option<u32>) -> usize {
        while self.bytes.len() % 4 != 0 {
            self.bytes.push(0);
        }
        let mut view = json!({
            "buffer": 0,
            "byteOffset": self.bytes.len(),
            "byteLength": data.len(),
        });
        if let Some(target) = target {
            view["target"] = json!(target);
        }
        self.bytes.extend_from_slice(data);
        self.views.push(view);
        self.views.len() - 1
    }

    fn push_accessor(
        &mut self,
        data: &[u8],
        target: Option<u32>,
        component_type: u32,
        count: usize,
        kind: &str,
    ) -> usize {
        let view = self.push_view(data, target);
        self.accessors.push(json!({
            "bufferView": view,
            "componentType": component_type,
            "count": count,
            "type": kind,
        }));
        self.accessors.len() - 1
    }

    fn push_vec3(&mut self, values: &[Vector3<f32>]) -> usize {
        let mut min = [f32::MAX; 3];
        let mut max = [f32::MIN; 3];
        for value in values {
            for axis in 0..3 {
                min[axis] = min[axis].min(value[axis]);
                max[axis] = max[axis].max(value[axis]);
            }
        }
        let data = float_bytes(values.iter().flat_map(|value| [value.x, value.y, value.z]));
        let accessor = self.push_accessor(
            &data,
            Some(TARGET_ARRAY_BUFFER),
            COMPONENT_FLOAT,
            values.len(),
            "VEC3",
        );
        self.accessors[accessor]["min"] = json!(min);
        self.accessors[accessor]["max"] = json!(max);
        accessor
    }

    fn push_uvs(&mut self, values: &[Vector2<f32>]) -> usize {
        // Texture space origin moves from bottom-left to top-left.
        let data = float_bytes(values.iter().flat_map(|uv| [uv.x, 1.0 - uv.y]));
        self.push_accessor(
            &data,
            Some(TARGET_ARRAY_BUFFER),
            COMPONENT_FLOAT,
            values.len(),
            "VEC2",
        )
    }

    fn push_joints(&mut self, weights: &[BoneWeights]) -> usize {
        let data: Vec<u8> = weights
            .iter()
            .flat_map(|weights| weights.joints)
            .flat_map(u16::to_le_bytes)
            .collect();
        self.push_accessor(
            &data,
            Some(TARGET_ARRAY_BUFFER),
            COMPONENT_UNSIGNED_SHORT,
            weights.len(),
            "VEC4",
        )
    }

    fn push_weights(&mut self, weights: &[BoneWeights]) -> usize {
        let data = float_bytes(weights.iter().flat_map(normalized_weights));
        self.push_accessor(
            &data,
            Some(TARGET_ARRAY_BUFFER),
            COMPONENT_FLOAT,
            weights.len(),
            "VEC4",
        )
    }

    fn push_indices(&mut self, indices: &[u32]) -> usize {
        let data: Vec<u8> = indices.iter().flat_map(|index| index.to_le_bytes()).collect();
        self.push_accessor(
            &data,
            Some(TARGET_ELEMENT_ARRAY_BUFFER),
            COMPONENT_UNSIGNED_INT,
            indices.len(),
            "SCALAR",
        )
    }

    fn push_matrices(&mut self, matrices: &[Matrix4<f32>]) -> usize {
        // nalgebra stores matrices column-major, as glTF expects.
        let data = float_bytes(matrices.iter().flat_map(|matrix| matrix.as_slice().to_vec()));
        self.push_accessor(&data, None, COMPONENT_FLOAT, matrices.len(), "MAT4")
    }
}

fn float_bytes(values: impl IntoIterator<Item = f32>) -> Vec<u8> {
    values.into_iter().flat_map(f32::to_le_bytes).collect()
}

/// Skin weights must sum to one; vertices without influence go to slot 0.
fn normalized_weights(weights: &BoneWeights) -> [f32; 4] {
    let total: f32 = weights.weights.iter().filter(|w| **w > 0.0).sum();
    if total <= f32::EPSILON {
        return [1.0, 0.0, 0.0, 0.0];
    }
    weights.weights.map(|weight| weight.max(0.0) / total)
}

fn xyz(vector: &Vector3<f32>) -> Value {
    json!({ "x": vector.x, "y": vector.y, "z": vector.z })
}

// ─── Document ─────────────────────────────────────────────────────────────────

struct DocumentBuilder<'a> {
    graph: &'a SceneGraph,
    options: &'a ConvertOptions,
    chunk: BinaryChunk,
    node_index: HashMap<NodeId, usize>,
    mesh_index: HashMap<NodeId, usize>,
    material_index: HashMap<MaterialId, usize>,
    texture_index: HashMap<TextureId, usize>,
    nodes: Vec<Value>,
    meshes: Vec<Value>,
    skins: Vec<Value>,
    materials: Vec<Value>,
    material_properties: Vec<Value>,
    textures: Vec<Value>,
    images: Vec<Value>,
    uses_unlit: bool,
}

impl<'a> DocumentBuilder<'a> {
    fn new(graph: &'a SceneGraph, options: &'a ConvertOptions) -> Self {
        Self {
            graph,
            options,
            chunk: BinaryChunk::default(),
            node_index: HashMap::new(),
            mesh_index: HashMap::new(),
            material_index: HashMap::new(),
            texture_index: HashMap::new(),
            nodes: Vec::new(),
            meshes: Vec::new(),
            skins: Vec::new(),
            materials: Vec::new(),
            material_properties: Vec::new(),
            textures: Vec::new(),
            images: Vec::new(),
            uses_unlit: false,
        }
    }

    /// Emit `root` and its subtree; `root` becomes node 0.
    fn write_nodes(&mut self, root: NodeId) -> Result<()> {
        let graph = self.graph;
        let order = graph.descendants(root);
        for (index, id) in order.iter().enumerate() {
            self.node_index.insert(*id, index);
        }

        for id in &order {
            let node = graph
                .node(*id)
                .with_context(|| format!("node {id} vanished during export"))?;
            let rotation = node.transform.rotation.coords;
            let mut entry = json!({
                "name": node.name,
                "translation": [
                    node.transform.translation.x,
                    node.transform.translation.y,
                    node.transform.translation.z,
                ],
                "rotation": [rotation.x, rotation.y, rotation.z, rotation.w],
                "scale": [node.transform.scale.x, node.transform.scale.y, node.transform.scale.z],
            });
            let children: Vec<usize> = node
                .children()
                .iter()
                .filter_map(|child| self.node_index.get(child).copied())
                .collect();
            if !children.is_empty() {
                entry["children"] = json!(children);
            }
            self.nodes.push(entry);
        }

        for id in &order {
            let Some(renderer) = graph.node(*id).and_then(|node| node.renderer.as_ref()) else {
                continue;
            };
            let node_index = self.node_index[id];
            let mesh = self.write_mesh(renderer)?;
            self.mesh_index.insert(*id, mesh);
            self.nodes[node_index]["mesh"] = json!(mesh);
            if let Some(skin) = renderer.skin.as_ref().filter(|skin| !skin.bones.is_empty()) {
                let skin = self.write_skin(*id, skin)?;
                self.nodes[node_index]["skin"] = json!(skin);
            }
        }
        Ok(())
    }

    fn write_mesh(&mut self, renderer: &Renderer) -> Result<usize> {
        let mesh = &renderer.mesh;
        mesh.validate()
            .with_context(|| format!("mesh '{}' cannot be exported", mesh.name))?;
        if mesh.vertex_count() == 0 {
            bail!("mesh '{}' has no vertices", mesh.name);
        }

        let mut attributes = Map::new();
        attributes.insert("POSITION".into(), json!(self.chunk.push_vec3(&mesh.positions)));
        if !mesh.normals.is_empty() {
            attributes.insert("NORMAL".into(), json!(self.chunk.push_vec3(&mesh.normals)));
        }
        if !mesh.uvs.is_empty() {
            attributes.insert("TEXCOORD_0".into(), json!(self.chunk.push_uvs(&mesh.uvs)));
        }
        if renderer.is_skinned() && !mesh.weights.is_empty() {
            attributes.insert("JOINTS_0".into(), json!(self.chunk.push_joints(&mesh.weights)));
            attributes.insert("WEIGHTS_0".into(), json!(self.chunk.push_weights(&mesh.weights)));
        }

        let targets: Vec<Value> = mesh
            .shape_keys
            .iter()
            .map(|key| {
                let mut target = json!({ "POSITION": self.chunk.push_vec3(&key.position_deltas) });
                if !key.normal_deltas.is_empty() {
                    target["NORMAL"] = json!(self.chunk.push_vec3(&key.normal_deltas));
                }
                target
            })
            .collect();

        let mut primitives = Vec::with_capacity(mesh.submeshes.len());
        for submesh in &mesh.submeshes {
            if submesh.indices.is_empty() {
                continue;
            }
            let mut primitive = json!({
                "attributes": attributes.clone(),
                "indices": self.chunk.push_indices(&submesh.indices),
                "mode": MODE_TRIANGLES,
            });
            if let Some(material) = renderer.materials.get(submesh.material) {
                primitive["material"] = json!(self.material(*material)?);
            }
            if !targets.is_empty() {
                primitive["targets"] = json!(targets.clone());
            }
            primitives.push(primitive);
        }
        if primitives.is_empty() {
            bail!("mesh '{}' has no triangles", mesh.name);
        }

        let mut entry = json!({ "name": mesh.name, "primitives": primitives });
        if !mesh.shape_keys.is_empty() {
            entry["extras"] = json!({ "targetNames": mesh.shape_key_names() });
        }
        self.meshes.push(entry);
        Ok(self.meshes.len() - 1)
    }

    fn write_skin(&mut self, owner: NodeId, skin: &Skin) -> Result<usize> {
        let graph = self.graph;
        let mesh_world = graph.world_matrix(owner);
        let mut joints = Vec::with_capacity(skin.bones.len());
        let mut inverse_binds = Vec::with_capacity(skin.bones.len());

        for bone in &skin.bones {
            let joint = self.node_index.get(bone).copied().with_context(|| {
                format!(
                    "skin of '{}' references bone {bone} outside the exported hierarchy",
                    graph.name_of(owner).unwrap_or_default()
                )
            })?;
            let parent_world = graph
                .parent_of(*bone)
                .map(|parent| graph.world_matrix(parent))
                .unwrap_or_else(Matrix4::identity);
            let local = graph
                .node(*bone)
                .map(|node| node.transform.to_matrix())
                .unwrap_or_else(Matrix4::identity);
            let inverse_bind = rebuild_inverse_bind_matrix(parent_world, local)
                .with_context(|| format!("bone {bone} has a singular bind matrix"))?;
            joints.push(joint);
            inverse_binds.push(inverse_bind * mesh_world);
        }

        let mut entry = json!({
            "joints": joints,
            "inverseBindMatrices": self.chunk.push_matrices(&inverse_binds),
        });
        if let Some(root_bone) = skin.root_bone.and_then(|bone| self.node_index.get(&bone)) {
            entry["skeleton"] = json!(root_bone);
        }
        self.skins.push(entry);
        Ok(self.skins.len() - 1)
    }

    fn material(&mut self, id: MaterialId) -> Result<usize> {
        if let Some(index) = self.material_index.get(&id) {
            return Ok(*index);
        }
        let graph = self.graph;
        let material = graph
            .material(id)
            .with_context(|| format!("renderer references missing material {}", id.0))?;

        let mut pbr = json!({
            "baseColorFactor": material.color("_Color").unwrap_or([1.0; 4]),
            "metallicFactor": 0.0,
            "roughnessFactor": 0.9,
        });
        if let Some(texture) = material.texture("_MainTex") {
            pbr["baseColorTexture"] = json!({ "index": self.texture(texture)? });
        }
        let mut entry = json!({
            "name": material.name,
            "pbrMetallicRoughness": pbr,
            "alphaMode": alpha_mode(material.render_queue),
        });
        if material.render_queue >= RENDER_QUEUE_ALPHA_TEST
            && material.render_queue < RENDER_QUEUE_TRANSPARENT
        {
            entry["alphaCutoff"] = json!(material.float("_Cutoff").unwrap_or(0.5));
        }
        if is_unlit(material.shader_name()) {
            entry["extensions"] = json!({ UNLIT_EXTENSION: {} });
            self.uses_unlit = true;
        }

        let properties = self.material_properties(material)?;
        self.materials.push(entry);
        self.material_properties.push(properties);
        let index = self.materials.len() - 1;
        self.material_index.insert(id, index);
        Ok(index)
    }

    fn material_properties(&mut self, material: &Material) -> Result<Value> {
        let mut floats = Map::new();
        let mut vectors = Map::new();
        let mut textures = Map::new();
        let mut keywords = Map::new();
        for (key, parameter) in &material.parameters {
            match parameter {
                MaterialParameter::Float(value) => {
                    floats.insert(key.clone(), json!(value));
                }
                MaterialParameter::Color(color) => {
                    vectors.insert(key.clone(), json!(color));
                }
                MaterialParameter::Texture(texture) => {
                    textures.insert(key.clone(), json!(self.texture(*texture)?));
                }
                MaterialParameter::Keyword(enabled) => {
                    keywords.insert(key.clone(), json!(enabled));
                }
            }
        }

        let render_type = match alpha_mode(material.render_queue) {
            "MASK" => "TransparentCutout",
            "BLEND" => "Transparent",
            _ => "Opaque",
        };
        Ok(json!({
            "name": material.name,
            "shader": material.shader.as_deref().unwrap_or("VRM_USE_GLTFSHADER"),
            "renderQueue": material.render_queue,
            "floatProperties": floats,
            "vectorProperties": vectors,
            "textureProperties": textures,
            "keywordMap": keywords,
            "tagMap": { "RenderType": render_type },
        }))
    }

    fn texture(&mut self, id: TextureId) -> Result<usize> {
        if let Some(index) = self.texture_index.get(&id) {
            return Ok(*index);
        }
        let texture = self
            .graph
            .texture(id)
            .with_context(|| format!("material references missing texture {}", id.0))?;
        let encoded = reencode_texture(
            &texture.name,
            &texture.data,
            self.options.texture_max_size,
            self.options.texture_resize_method,
        )?;

        let view = self.chunk.push_view(&encoded.png, None);
        self.images.push(json!({
            "name": texture.name,
            "bufferView": view,
            "mimeType": "image/png",
        }));
        self.textures.push(json!({ "source": self.images.len() - 1, "sampler": 0 }));
        let index = self.textures.len() - 1;
        self.texture_index.insert(id, index);
        Ok(index)
    }

    // ─── VRM extension ────────────────────────────────────────────────────────

    fn vrm_extension(&mut self, root: NodeId, skeleton: &Skeleton) -> Result<Value> {
        let graph = self.graph;
        let root_node = graph.node(root).context("avatar root vanished during export")?;
        let meta = root_node
            .find_behavior(|kind| match kind {
                BehaviorKind::Meta(meta) => Some(meta),
                _ => None,
            })
            .context("avatar root carries no VRM meta")?;
        let first_person = root_node
            .find_behavior(|kind| match kind {
                BehaviorKind::FirstPerson(config) => Some(config),
                _ => None,
            })
            .cloned()
            .unwrap_or_default();
        let look_at = root_node
            .find_behavior(|kind| match kind {
                BehaviorKind::LookAt(config) => Some(config),
                _ => None,
            })
            .cloned()
            .unwrap_or_default();
        let expressions = root_node
            .find_behavior(|kind| match kind {
                BehaviorKind::BlendShapeProxy(proxy) => Some(proxy),
                _ => None,
            })
            .cloned()
            .unwrap_or_default();

        Ok(json!({
            "exporterVersion": format!("vrc2vrm-{}", self.options.version),
            "specVersion": "0.0",
            "meta": meta_json(meta),
            "humanoid": self.humanoid_json(graph, skeleton),
            "firstPerson": self.first_person_json(graph, skeleton, &first_person, &look_at),
            "blendShapeMaster": self.blend_shape_json(&expressions),
            "secondaryAnimation": self.secondary_json(graph, root),
            "materialProperties": self.material_properties.clone(),
        }))
    }

    fn humanoid_json(&self, graph: &SceneGraph, skeleton: &Skeleton) -> Value {
        let bones: Vec<Value> = skeleton
            .iter()
            .filter(|(_, node)| graph.contains(*node))
            .filter_map(|(bone, node)| {
                self.node_index.get(&node).map(|index| {
                    json!({ "bone": bone.as_str(), "node": index, "useDefaultValues": true })
                })
            })
            .collect();
        json!({
            "humanBones": bones,
            "armStretch": 0.05,
            "legStretch": 0.05,
            "upperArmTwist": 0.5,
            "lowerArmTwist": 0.5,
            "upperLegTwist": 0.5,
            "lowerLegTwist": 0.5,
            "feetSpacing": 0.0,
            "hasTranslationDoF": false,
        })
    }

    fn first_person_json(
        &self,
        graph: &SceneGraph,
        skeleton: &Skeleton,
        config: &FirstPersonConfig,
        look_at: &LookAtConfig,
    ) -> Value {
        let bone = config
            .bone
            .or_else(|| skeleton.resolve(graph, HumanBone::Head))
            .and_then(|bone| self.node_index.get(&bone).copied())
            .map_or(-1, |index| index as i64);
        let annotations: Vec<Value> = config
            .renderers
            .iter()
            .filter_map(|entry| {
                self.mesh_index.get(&entry.renderer).map(|mesh| {
                    json!({ "mesh": mesh, "firstPersonFlag": entry.flag.as_str() })
                })
            })
            .collect();

        let range = look_at
            .range
            .unwrap_or_else(|| LookAtRange::symmetric(DEFAULT_LOOK_AT_DEGREES));
        let curve = |degrees: f32| {
            json!({ "curve": LINEAR_CURVE, "xRange": LOOK_AT_INPUT_DEGREES, "yRange": degrees })
        };

        json!({
            "firstPersonBone": bone,
            "firstPersonBoneOffset": xyz(&config.offset),
            "meshAnnotations": annotations,
            "lookAtTypeName": "Bone",
            "lookAtHorizontalInner": curve(range.horizontal_inner),
            "lookAtHorizontalOuter": curve(range.horizontal_outer),
            "lookAtVerticalDown": curve(range.down),
            "lookAtVerticalUp": curve(range.up),
        })
    }

    fn blend_shape_json(&self, proxy: &BlendShapeProxy) -> Value {
        let groups: Vec<Value> = proxy
            .groups
            .iter()
            .map(|group| {
                let binds: Vec<Value> = group
                    .binds
                    .iter()
                    .filter_map(|bind| {
                        self.mesh_index.get(&bind.renderer).map(|mesh| {
                            json!({ "mesh": mesh, "index": bind.index, "weight": bind.weight })
                        })
                    })
                    .collect();
                json!({
                    "name": group.name,
                    "presetName": group.preset.as_str(),
                    "binds": binds,
                    "materialValues": [],
                    "isBinary": false,
                })
            })
            .collect();
        json!({ "blendShapeGroups": groups })
    }

    fn secondary_json(&self, graph: &SceneGraph, root: NodeId) -> Value {
        let mut group_index = HashMap::<NodeId, usize>::new();
        let mut collider_groups = Vec::<Value>::new();
        let mut bone_groups = Vec::<Value>::new();

        let order = graph.descendants(root);
        for id in &order {
            let Some(node) = graph.node(*id) else {
                continue;
            };
            let colliders: Vec<Value> = node
                .behaviors
                .iter()
                .filter_map(|behavior| match &behavior.kind {
                    BehaviorKind::SpringBoneColliderGroup(group) => Some(&group.colliders),
                    _ => None,
                })
                .flatten()
                .flat_map(collider_spheres)
                .collect();
            if colliders.is_empty() {
                continue;
            }
            if let Some(index) = self.node_index.get(id) {
                group_index.insert(*id, collider_groups.len());
                collider_groups.push(json!({ "node": index, "colliders": colliders }));
            }
        }

        for id in &order {
            let Some(node) = graph.node(*id) else {
                continue;
            };
            for behavior in &node.behaviors {
                if let BehaviorKind::SpringBone(chain) = &behavior.kind {
                    bone_groups.push(self.bone_group_json(graph, chain, &group_index));
                }
            }
        }

        json!({ "boneGroups": bone_groups, "colliderGroups": collider_groups })
    }

    fn bone_group_json(
        &self,
        graph: &SceneGraph,
        chain: &SpringChain,
        group_index: &HashMap<NodeId, usize>,
    ) -> Value {
        // The runtime simulates everything below a listed bone, so only
        // chain roots are written.
        let roots: Vec<usize> = chain
            .bones
            .iter()
            .filter(|bone| {
                graph
                    .parent_of(**bone)
                    .is_none_or(|parent| !chain.bones.contains(&parent))
            })
            .filter_map(|bone| self.node_index.get(bone).copied())
            .collect();
        let groups: Vec<usize> = chain
            .collider_groups
            .iter()
            .filter_map(|anchor| group_index.get(anchor).copied())
            .collect();
        let center = chain
            .center
            .and_then(|center| self.node_index.get(&center).copied())
            .map_or(-1, |index| index as i64);

        json!({
            "comment": chain.comment,
            "stiffiness": chain.stiffness,
            "gravityPower": chain.gravity_power,
            "gravityDir": xyz(&chain.gravity_dir),
            "dragForce": chain.drag,
            "center": center,
            "hitRadius": chain.hit_radius,
            "bones": roots,
            "colliderGroups": groups,
        })
    }

    fn finish(self, vrm: Value) -> (Value, Vec<u8>) {
        let mut extensions_used = vec![VRM_EXTENSION];
        if self.uses_unlit {
            extensions_used.push(UNLIT_EXTENSION);
        }
        let samplers = if self.textures.is_empty() {
            Vec::new()
        } else {
            vec![json!({
                "magFilter": 9729,
                "minFilter": 9987,
                "wrapS": 10497,
                "wrapT": 10497,
            })]
        };
        let buffers = if self.chunk.bytes.is_empty() {
            Vec::new()
        } else {
            vec![json!({ "byteLength": self.chunk.bytes.len() })]
        };

        let mut document = json!({
            "asset": {
                "version": "2.0",
                "generator": format!("vrc2vrm {}", self.options.version),
            },
            "extensionsUsed": extensions_used,
            "scene": 0,
            "scenes": [{ "nodes": [0] }],
            "nodes": self.nodes,
            "meshes": self.meshes,
            "skins": self.skins,
            "materials": self.materials,
            "textures": self.textures,
            "samplers": samplers,
            "images": self.images,
            "accessors": self.chunk.accessors,
            "bufferViews": self.chunk.views,
            "buffers": buffers,
            "extensions": { VRM_EXTENSION: vrm },
        });
        // glTF forbids empty top-level arrays.
        if let Some(object) = document.as_object_mut() {
            object.retain(|_, value| value.as_array().is_none_or(|array| !array.is_empty()));
        }
        (document, self.chunk.bytes)
    }
}

fn alpha_mode(render_queue: i32) -> &'static str {
    if render_queue >= RENDER_QUEUE_TRANSPARENT {
        "BLEND"
    } else if render_queue >= RENDER_QUEUE_ALPHA_TEST {
        "MASK"
    } else {
        "OPAQUE"
    }
}

fn is_unlit(shader: &str) -> bool {
    shader == DESTINATION_UNLIT_SHADER || shader.starts_with("Unlit/") || shader.starts_with("VRM/Unlit")
}

fn meta_json(meta: &AvatarMeta) -> Value {
    json!({
        "title": meta.title,
        "version": meta.version,
        "author": meta.author,
        "contactInformation": meta.contact_information,
        "reference": meta.reference,
        "texture": -1,
        "allowedUserName": meta.allowed_user.as_str(),
        "violentUssageName": meta.violent_usage.as_str(),
        "sexualUssageName": meta.sexual_usage.as_str(),
        "commercialUssageName": meta.commercial_usage.as_str(),
        "otherPermissionUrl": meta.other_permission_url,
        "licenseName": meta.license.as_str(),
        "otherLicenseUrl": meta.other_license_url,
    })
}

/// Upper bound on the segments a capsule is split into.
const MAX_CAPSULE_SEGMENTS: usize = 32;

/// VRM 0.x only knows spheres; a capsule becomes a row of spheres spaced at
/// most one radius apart along its segment, capped at
/// [`MAX_CAPSULE_SEGMENTS`] + 1 spheres for very thin capsules.
fn collider_spheres(collider: &Collider) -> Vec<Value> {
    match collider {
        Collider::Sphere { offset, radius } => {
            vec![json!({ "offset": xyz(offset), "radius": radius })]
        }
        Collider::Capsule {
            offset,
            tail,
            radius,
        } => {
            let length = (tail - offset).norm();
            let steps = if *radius > f32::EPSILON {
                ((length / radius).ceil() as usize).clamp(1, MAX_CAPSULE_SEGMENTS)
            } else {
                1
            };
            (0..=steps)
                .map(|step| {
                    let t = step as f32 / steps as f32;
                    let center = offset + (tail - offset) * t;
                    json!({ "offset": xyz(&center), "radius": radius })
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::rig::{
        Behavior, ColliderGroup, Texture, fixtures,
    };
    use image::{DynamicImage, ImageFormat, RgbaImage};

    fn initialized_fixture() -> fixtures::HumanoidFixture {
        let mut fixture = fixtures::humanoid();
        let root = fixture.rig.root;
        let graph = &mut fixture.rig.graph;
        let meta = AvatarMeta {
            title: "Sample".to_string(),
            author: "Someone".to_string(),
            ..AvatarMeta::default()
        };
        let secondary = super::super::initialize::initialize_vrm_behaviors(graph, root, meta, fixture.head);
        let hair_tip = graph.children_of(fixture.hair)[0];
        graph.node_mut(secondary).expect("secondary").behaviors.push(Behavior::new(
            BehaviorKind::SpringBone(SpringChain {
                comment: "Hair".to_string(),
                bones: vec![fixture.hair, hair_tip],
                stiffness: 1.0,
                drag: 0.4,
                gravity_power: 0.0,
                gravity_dir: -Vector3::y(),
                hit_radius: 0.02,
                center: None,
                collider_groups: vec![fixture.head],
            }),
        ));
        graph.node_mut(fixture.head).expect("head").behaviors.push(Behavior::new(
            BehaviorKind::SpringBoneColliderGroup(ColliderGroup {
                colliders: vec![Collider::Capsule {
                    offset: Vector3::zeros(),
                    tail: Vector3::new(0.0, 0.1, 0.0),
                    radius: 0.05,
                }],
            }),
        ));
        fixture
    }

    fn parse(bytes: &[u8]) -> (Value, usize) {
        let glb = Glb::from_slice(bytes).expect("valid GLB");
        let json: Value = serde_json::from_slice(glb.json.as_ref()).expect("valid JSON");
        let bin_len = glb.bin.map(|bin| bin.len()).unwrap_or_default();
        (json, bin_len)
    }

    fn export(fixture: &fixtures::HumanoidFixture) -> (Value, usize) {
        let bytes = GlbVrmExporter
            .export(
                &fixture.rig.graph,
                fixture.rig.root,
                &fixture.rig.skeleton,
                &ConvertOptions::default(),
            )
            .expect("exports");
        parse(&bytes)
    }

    #[test]
    fn given_initialized_avatar_when_exporting_then_vrm_extension_describes_it() {
        let fixture = initialized_fixture();

        let (json, bin_len) = export(&fixture);

        assert_eq!(json["asset"]["version"], "2.0");
        let vrm = &json["extensions"]["VRM"];
        assert_eq!(vrm["meta"]["title"], "Sample");
        let head = vrm["humanoid"]["humanBones"]
            .as_array()
            .expect("bones")
            .iter()
            .find(|bone| bone["bone"] == "head")
            .expect("head bone");
        let head_index = head["node"].as_u64().expect("index") as usize;
        assert_eq!(json["nodes"][head_index]["name"], "Head");
        assert_eq!(vrm["firstPerson"]["firstPersonBone"], head_index as u64);
        for view in json["bufferViews"].as_array().expect("views") {
            let end = view["byteOffset"].as_u64().expect("offset") + view["byteLength"].as_u64().expect("length");
            assert!(end as usize <= bin_len);
        }
    }

    #[test]
    fn given_skinned_renderers_when_exporting_then_meshes_keep_target_names_and_skins() {
        let fixture = initialized_fixture();

        let (json, _) = export(&fixture);

        let meshes = json["meshes"].as_array().expect("meshes");
        assert_eq!(meshes.len(), 2);
        assert_eq!(meshes[0]["extras"]["targetNames"].as_array().map(Vec::len), Some(5));
        assert_eq!(meshes[0]["primitives"][0]["targets"].as_array().map(Vec::len), Some(5));
        assert_eq!(json["skins"].as_array().map(Vec::len), Some(2));
        assert_eq!(json["materials"].as_array().map(Vec::len), Some(2));
        assert_eq!(json["materials"][1]["alphaMode"], "MASK");
    }

    #[test]
    fn given_spring_chain_when_exporting_then_only_chain_root_and_capsule_spheres_are_written() {
        let fixture = initialized_fixture();

        let (json, _) = export(&fixture);

        let secondary = &json["extensions"]["VRM"]["secondaryAnimation"];
        let group = &secondary["boneGroups"][0];
        assert_eq!(group["bones"].as_array().map(Vec::len), Some(1));
        assert_eq!(json["nodes"][group["bones"][0].as_u64().expect("bone") as usize]["name"], "Hair");
        assert_eq!(group["colliderGroups"], json!([0]));
        let spheres = secondary["colliderGroups"][0]["colliders"].as_array().expect("spheres");
        assert_eq!(spheres.len(), 3);
        assert!((spheres[2]["offset"]["y"].as_f64().expect("y") - 0.1).abs() < 1e-6);
    }

    #[test]
    fn given_needle_thin_capsule_when_expanding_then_sphere_count_is_capped() {
        let capsule = Collider::Capsule {
            offset: Vector3::zeros(),
            tail: Vector3::new(0.0, 0.3, 0.0),
            radius: 1e-6,
        };

        let spheres = collider_spheres(&capsule);

        assert_eq!(spheres.len(), MAX_CAPSULE_SEGMENTS + 1);
        assert!((spheres[MAX_CAPSULE_SEGMENTS]["offset"]["y"].as_f64().expect("y") - 0.3).abs() < 1e-6);
    }

    #[test]
    fn given_directional_look_at_when_exporting_then_horizontal_curves_pair_each_eye() {
        let mut fixture = initialized_fixture();
        let root = fixture.rig.root;
        let look_at = super::super::initialize::look_at_mut(&mut fixture.rig.graph, root).expect("look at");
        look_at.range = Some(LookAtRange {
            up: 10.0,
            down: 8.0,
            left: 5.0,
            right: 4.0,
            horizontal_outer: 4.0,
            horizontal_inner: 6.0,
        });

        let (json, _) = export(&fixture);

        let first_person = &json["extensions"]["VRM"]["firstPerson"];
        assert_eq!(first_person["lookAtHorizontalInner"]["yRange"], 6.0);
        assert_eq!(first_person["lookAtHorizontalOuter"]["yRange"], 4.0);
        assert_eq!(first_person["lookAtVerticalUp"]["yRange"], 10.0);
        assert_eq!(first_person["lookAtVerticalDown"]["yRange"], 8.0);
    }

    #[test]
    fn given_unlit_textured_material_when_exporting_then_png_and_unlit_extension_are_written() {
        let mut fixture = initialized_fixture();
        let mut png = Vec::new();
        DynamicImage::ImageRgba8(RgbaImage::new(8, 8))
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .expect("encode");
        let graph = &mut fixture.rig.graph;
        let texture = graph.add_texture(Texture {
            name: "skin".to_string(),
            data: png,
        });
        let material = graph.material_mut(fixture.standard_material).expect("material");
        material.shader = Some(DESTINATION_UNLIT_SHADER.to_string());
        material
            .parameters
            .insert("_MainTex".to_string(), MaterialParameter::Texture(texture));

        let (json, _) = export(&fixture);

        assert_eq!(json["images"][0]["mimeType"], "image/png");
        assert_eq!(json["materials"][0]["pbrMetallicRoughness"]["baseColorTexture"]["index"], 0);
        assert!(json["materials"][0]["extensions"].get(UNLIT_EXTENSION).is_some());
        assert!(
            json["extensionsUsed"]
                .as_array()
                .expect("extensions")
                .contains(&json!(UNLIT_EXTENSION))
        );
        assert_eq!(
            json["extensions"]["VRM"]["materialProperties"][0]["textureProperties"]["_MainTex"],
            0
        );
    }

    #[test]
    fn given_skin_bone_outside_hierarchy_when_exporting_then_it_fails() {
        let mut fixture = initialized_fixture();
        let graph = &mut fixture.rig.graph;
        let stray = graph.add_node("Stray", None);
        if let Some(skin) = graph
            .node_mut(fixture.body)
            .and_then(|node| node.renderer.as_mut())
            .and_then(|renderer| renderer.skin.as_mut())
        {
            skin.bones[1] = stray;
        }

        let result = GlbVrmExporter.export(
            &fixture.rig.graph,
            fixture.rig.root,
            &fixture.rig.skeleton,
            &ConvertOptions::default(),
        );

        assert!(result.is_err());
    }
}
