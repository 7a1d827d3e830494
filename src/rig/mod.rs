//! In-memory avatar rig: scene graph, behaviors, meshes, materials and the
//! humanoid skeleton.

mod behavior;
mod graph;
mod humanoid;
mod material;
mod mesh;
mod physics;
mod vrm;

#[cfg(test)]
pub(crate) mod fixtures;

use serde::{Deserialize, Serialize};

pub use behavior::{
    AvatarDescriptor, Behavior, BehaviorKind, BlendShapeProxy, EyeAnglePair, EyeLookSettings,
};
pub use graph::{GraphError, NodeId, SceneGraph, SceneNode, Transform};
pub use humanoid::{HumanBone, REQUIRED_BONES, RESERVED_COLLIDER_BONES, Skeleton};
pub use material::{
    Material, MaterialId, MaterialParameter, RENDER_QUEUE_GEOMETRY, Texture, TextureId,
};
pub use mesh::{BoneWeights, Mesh, MeshError, Renderer, ShapeKey, Skin, SubMesh};
pub use physics::{
    Axis, Collider, ColliderGroup, DynamicBone, DynamicBoneCollider, PhysBone, PhysBoneCollider,
    PhysBoneColliderShape, SpringChain,
};
pub use vrm::{
    AllowedUser, AvatarMeta, BlendShapeBind, BlendShapeGroup, ExpressionPreset, FirstPersonConfig,
    FirstPersonFlag, LicenseType, LookAtConfig, LookAtRange, RendererVisibility, UsagePermission,
};

/// A source avatar: its scene graph, root node and humanoid mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRig {
    pub graph: SceneGraph,
    pub root: NodeId,
    pub skeleton: Skeleton,
}

impl SourceRig {
    /// Avatar descriptor attached to the root node, if any.
    pub fn descriptor(&self) -> Option<&AvatarDescriptor> {
        self.graph.node(self.root)?.find_behavior(|kind| match kind {
            BehaviorKind::AvatarDescriptor(descriptor) => Some(descriptor),
            _ => None,
        })
    }
}
