//! Small humanoid rigs shared by unit tests.

use nalgebra::{Vector2, Vector3};

use super::{
    AvatarDescriptor, Behavior, BehaviorKind, BoneWeights, EyeAnglePair, EyeLookSettings,
    HumanBone, Material, MaterialId, Mesh, NodeId, Renderer, SceneGraph, ShapeKey, Skeleton, Skin,
    SourceRig, SubMesh, Transform,
};

pub(crate) const SHAPE_KEYS: [&str; 5] = ["Blink", "Joy", "Angry", "Sorrow", "A"];

pub(crate) fn translate(graph: &mut SceneGraph, node: NodeId, x: f32, y: f32, z: f32) {
    if let Some(node) = graph.node_mut(node) {
        node.transform = Transform::from_translation(Vector3::new(x, y, z));
    }
}

fn bone(
    graph: &mut SceneGraph,
    skeleton: &mut Skeleton,
    human: Option<HumanBone>,
    name: &str,
    parent: NodeId,
    offset: [f32; 3],
) -> NodeId {
    let node = graph.add_node(name, Some(parent));
    translate(graph, node, offset[0], offset[1], offset[2]);
    if let Some(human) = human {
        skeleton.insert(human, node);
    }
    node
}

/// Quad of four vertices split into two triangles, weighted to slot 0 and 1.
pub(crate) fn quad_mesh(name: &str, origin: Vector3<f32>) -> Mesh {
    Mesh {
        name: name.to_string(),
        positions: vec![
            origin,
            origin + Vector3::new(0.1, 0.0, 0.0),
            origin + Vector3::new(0.1, 0.1, 0.0),
            origin + Vector3::new(0.0, 0.1, 0.0),
        ],
        normals: vec![Vector3::z(); 4],
        uvs: vec![
            Vector2::new(0.0, 0.0),
            Vector2::new(1.0, 0.0),
            Vector2::new(1.0, 1.0),
            Vector2::new(0.0, 1.0),
        ],
        weights: vec![
            BoneWeights::single(0),
            BoneWeights::single(0),
            BoneWeights::single(1),
            BoneWeights::single(1),
        ],
        submeshes: vec![SubMesh {
            indices: vec![0, 1, 2, 0, 2, 3],
            material: 0,
        }],
        shape_keys: Vec::new(),
    }
}

/// Shape key moving only the last vertex of a quad.
pub(crate) fn top_vertex_key(name: &str) -> ShapeKey {
    ShapeKey {
        name: name.to_string(),
        position_deltas: vec![
            Vector3::zeros(),
            Vector3::zeros(),
            Vector3::zeros(),
            Vector3::new(0.0, 0.01, 0.0),
        ],
        normal_deltas: Vec::new(),
    }
}

pub(crate) struct HumanoidFixture {
    pub rig: SourceRig,
    pub head: NodeId,
    pub hair: NodeId,
    pub left_hand: NodeId,
    pub right_hand: NodeId,
    pub body: NodeId,
    pub outfit: NodeId,
    pub standard_material: MaterialId,
    pub toon_material: MaterialId,
}

/// Humanoid rig with two skinned renderers: `Body` (allow-listed shader, five
/// shape keys) and `Outfit` (a `ToonLit` shader).
pub(crate) fn humanoid() -> HumanoidFixture {
    let mut graph = SceneGraph::new();
    let mut skeleton = Skeleton::new();

    let root = graph.add_node("Avatar", None);
    let armature = graph.add_node("Armature", Some(root));
    let hips = bone(&mut graph, &mut skeleton, Some(HumanBone::Hips), "Hips", armature, [0.0, 1.0, 0.0]);
    let spine = bone(&mut graph, &mut skeleton, Some(HumanBone::Spine), "Spine", hips, [0.0, 0.2, 0.0]);
    let chest = bone(&mut graph, &mut skeleton, Some(HumanBone::Chest), "Chest", spine, [0.0, 0.2, 0.0]);
    let neck = bone(&mut graph, &mut skeleton, Some(HumanBone::Neck), "Neck", chest, [0.0, 0.1, 0.0]);
    let head = bone(&mut graph, &mut skeleton, Some(HumanBone::Head), "Head", neck, [0.0, 0.1, 0.0]);
    let hair = bone(&mut graph, &mut skeleton, None, "Hair", head, [0.0, 0.1, -0.05]);
    bone(&mut graph, &mut skeleton, None, "Hair.001", hair, [0.0, -0.1, 0.0]);
    bone(&mut graph, &mut skeleton, Some(HumanBone::LeftEye), "LeftEye", head, [0.03, 0.05, 0.08]);
    bone(&mut graph, &mut skeleton, Some(HumanBone::RightEye), "RightEye", head, [-0.03, 0.05, 0.08]);

    let left_upper = bone(&mut graph, &mut skeleton, Some(HumanBone::LeftUpperArm), "LeftUpperArm", chest, [0.15, 0.05, 0.0]);
    let left_lower = bone(&mut graph, &mut skeleton, Some(HumanBone::LeftLowerArm), "LeftLowerArm", left_upper, [0.25, 0.0, 0.0]);
    let left_hand = bone(&mut graph, &mut skeleton, Some(HumanBone::LeftHand), "LeftHand", left_lower, [0.25, 0.0, 0.0]);
    let right_upper = bone(&mut graph, &mut skeleton, Some(HumanBone::RightUpperArm), "RightUpperArm", chest, [-0.15, 0.05, 0.0]);
    let right_lower = bone(&mut graph, &mut skeleton, Some(HumanBone::RightLowerArm), "RightLowerArm", right_upper, [-0.25, 0.0, 0.0]);
    let right_hand = bone(&mut graph, &mut skeleton, Some(HumanBone::RightHand), "RightHand", right_lower, [-0.25, 0.0, 0.0]);

    let standard_material = graph.add_material(Material::new("Skin", "Standard"));
    let toon_material = graph.add_material(Material::new("Cloth", "Custom/ToonLit"));
    if let Some(material) = graph.material_mut(toon_material) {
        material.render_queue = 2450;
    }

    let mut body_mesh = quad_mesh("Body", Vector3::new(0.0, 1.0, 0.0));
    for name in SHAPE_KEYS {
        body_mesh
            .add_shape_key(top_vertex_key(name))
            .expect("fixture shape keys are unique");
    }
    let body = graph.add_node("Body", Some(root));
    if let Some(node) = graph.node_mut(body) {
        node.renderer = Some(Renderer {
            mesh: body_mesh,
            materials: vec![standard_material],
            skin: Some(Skin {
                bones: vec![hips, head],
                root_bone: Some(hips),
            }),
        });
    }

    let outfit = graph.add_node("Outfit", Some(root));
    if let Some(node) = graph.node_mut(outfit) {
        node.renderer = Some(Renderer {
            mesh: quad_mesh("Outfit", Vector3::new(0.0, 1.2, 0.05)),
            materials: vec![toon_material],
            skin: Some(Skin {
                bones: vec![spine, chest],
                root_bone: Some(hips),
            }),
        });
    }

    if let Some(node) = graph.node_mut(root) {
        node.behaviors.push(Behavior::new(BehaviorKind::AvatarDescriptor(
            AvatarDescriptor {
                view_position: Vector3::new(0.0, 1.65, 0.08),
                eye_look: EyeLookSettings::Current {
                    looking_up: Some(EyeAnglePair { left: -10.0, right: -12.0 }),
                    looking_down: Some(EyeAnglePair { left: 8.0, right: 9.0 }),
                    looking_left: Some(EyeAnglePair { left: 5.0, right: 7.0 }),
                    looking_right: Some(EyeAnglePair { left: 6.0, right: 4.0 }),
                },
            },
        )));
    }

    HumanoidFixture {
        rig: SourceRig {
            graph,
            root,
            skeleton,
        },
        head,
        hair,
        left_hand,
        right_hand,
        body,
        outfit,
        standard_material,
        toon_material,
    }
}
