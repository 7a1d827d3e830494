use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::graph::NodeId;
use super::physics::{
    ColliderGroup, DynamicBone, DynamicBoneCollider, PhysBone, PhysBoneCollider, SpringChain,
};
use super::vrm::{AvatarMeta, BlendShapeGroup, FirstPersonConfig, LookAtConfig};

fn enabled_by_default() -> bool {
    true
}

/// Data attached to a node, with an enabled flag.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Behavior {
    #[serde(default = "enabled_by_default")]
    pub enabled: bool,
    pub kind: BehaviorKind,
}

impl Behavior {
    pub fn new(kind: BehaviorKind) -> Self {
        Self {
            enabled: true,
            kind,
        }
    }

    pub fn disabled(kind: BehaviorKind) -> Self {
        Self {
            enabled: false,
            kind,
        }
    }
}

/// Type-specific behavior payloads.
///
/// Source-platform variants (`AvatarDescriptor`, `PhysBone*`, `DynamicBone*`)
/// come in with the rig; destination variants are produced by the converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BehaviorKind {
    AvatarDescriptor(AvatarDescriptor),
    PhysBone(PhysBone),
    PhysBoneCollider(PhysBoneCollider),
    DynamicBone(DynamicBone),
    DynamicBoneCollider(DynamicBoneCollider),
    Meta(AvatarMeta),
    FirstPerson(FirstPersonConfig),
    LookAt(LookAtConfig),
    BlendShapeProxy(BlendShapeProxy),
    SpringBone(SpringChain),
    SpringBoneColliderGroup(ColliderGroup),
    /// Any other component; carried through untouched and ignored on export.
    Custom {
        type_name: String,
        #[serde(default)]
        payload: Value,
    },
}

impl BehaviorKind {
    pub fn type_tag(&self) -> &str {
        match self {
            BehaviorKind::AvatarDescriptor(_) => "AvatarDescriptor",
            BehaviorKind::PhysBone(_) => "PhysBone",
            BehaviorKind::PhysBoneCollider(_) => "PhysBoneCollider",
            BehaviorKind::DynamicBone(_) => "DynamicBone",
            BehaviorKind::DynamicBoneCollider(_) => "DynamicBoneCollider",
            BehaviorKind::Meta(_) => "Meta",
            BehaviorKind::FirstPerson(_) => "FirstPerson",
            BehaviorKind::LookAt(_) => "LookAt",
            BehaviorKind::BlendShapeProxy(_) => "BlendShapeProxy",
            BehaviorKind::SpringBone(_) => "SpringBone",
            BehaviorKind::SpringBoneColliderGroup(_) => "SpringBoneColliderGroup",
            BehaviorKind::Custom { type_name, .. } => type_name,
        }
    }

    /// Rewrite every node reference through `remap`; references that map to
    /// `None` are dropped.
    pub fn remap_nodes(&mut self, remap: &dyn Fn(NodeId) -> Option<NodeId>) {
        let remap_list = |nodes: &mut Vec<NodeId>| {
            *nodes = nodes.iter().filter_map(|node| remap(*node)).collect();
        };

        match self {
            BehaviorKind::PhysBone(bone) => {
                bone.root = bone.root.and_then(remap);
                remap_list(&mut bone.ignore);
                remap_list(&mut bone.colliders);
            }
            BehaviorKind::PhysBoneCollider(collider) => {
                collider.root = collider.root.and_then(remap);
            }
            BehaviorKind::DynamicBone(bone) => {
                bone.root = bone.root.and_then(remap);
                remap_list(&mut bone.exclusions);
                remap_list(&mut bone.colliders);
            }
            BehaviorKind::FirstPerson(config) => {
                config.bone = config.bone.and_then(remap);
                config.renderers = config
                    .renderers
                    .iter()
                    .filter_map(|entry| {
                        remap(entry.renderer).map(|renderer| {
                            let mut entry = entry.clone();
                            entry.renderer = renderer;
                            entry
                        })
                    })
                    .collect();
            }
            BehaviorKind::BlendShapeProxy(proxy) => {
                for group in &mut proxy.groups {
                    group.binds = group
                        .binds
                        .iter()
                        .filter_map(|bind| {
                            remap(bind.renderer).map(|renderer| {
                                let mut bind = bind.clone();
                                bind.renderer = renderer;
                                bind
                            })
                        })
                        .collect();
                }
            }
            BehaviorKind::SpringBone(chain) => {
                remap_list(&mut chain.bones);
                remap_list(&mut chain.collider_groups);
                chain.center = chain.center.and_then(remap);
            }
            BehaviorKind::AvatarDescriptor(_)
            | BehaviorKind::DynamicBoneCollider(_)
            | BehaviorKind::Meta(_)
            | BehaviorKind::LookAt(_)
            | BehaviorKind::SpringBoneColliderGroup(_)
            | BehaviorKind::Custom { .. } => {}
        }
    }
}

/// Source avatar descriptor: view anchor and eye-look configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarDescriptor {
    /// World-space first-person view anchor.
    pub view_position: Vector3<f32>,
    pub eye_look: EyeLookSettings,
}

/// Eye-look configuration; the variant identifies the source SDK generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "sdk")]
pub enum EyeLookSettings {
    /// Older SDK: a single auto-eye-movement toggle.
    Legacy {
        #[serde(default)]
        auto_eye_movement: bool,
    },
    /// Current SDK: optional per-direction eye rotation samples.
    Current {
        #[serde(default)]
        looking_up: Option<EyeAnglePair>,
        #[serde(default)]
        looking_down: Option<EyeAnglePair>,
        #[serde(default)]
        looking_left: Option<EyeAnglePair>,
        #[serde(default)]
        looking_right: Option<EyeAnglePair>,
    },
}

/// Rotation sample (degrees) of the left and right eye for one direction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EyeAnglePair {
    pub left: f32,
    pub right: f32,
}

/// Destination expression table attached to the avatar root.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlendShapeProxy {
    #[serde(default)]
    pub groups: Vec<BlendShapeGroup>,
}
