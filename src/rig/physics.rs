use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use super::graph::NodeId;

// ─── Source: primary format (PhysBone) ────────────────────────────────────────

/// Jiggle chain authored with the current SDK's physics component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysBone {
    /// Chain root; `None` means the node carrying the component.
    pub root: Option<NodeId>,
    /// Subtrees excluded from the chain.
    pub ignore: Vec<NodeId>,
    pub pull: f32,
    /// Momentum retained between frames (0..1).
    pub spring: f32,
    pub gravity: f32,
    pub radius: f32,
    /// Nodes carrying `PhysBoneCollider` behaviors.
    pub colliders: Vec<NodeId>,
}

impl Default for PhysBone {
    fn default() -> Self {
        Self {
            root: None,
            ignore: Vec::new(),
            pull: 0.2,
            spring: 0.2,
            gravity: 0.0,
            radius: 0.0,
            colliders: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PhysBoneColliderShape {
    Sphere,
    Capsule,
    Plane,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysBoneCollider {
    /// Anchor bone; `None` means the node carrying the component.
    pub root: Option<NodeId>,
    pub shape: PhysBoneColliderShape,
    pub radius: f32,
    /// Full capsule height including both caps.
    pub height: f32,
    pub position: Vector3<f32>,
    pub rotation: UnitQuaternion<f32>,
}

impl Default for PhysBoneCollider {
    fn default() -> Self {
        Self {
            root: None,
            shape: PhysBoneColliderShape::Sphere,
            radius: 0.5,
            height: 2.0,
            position: Vector3::zeros(),
            rotation: UnitQuaternion::identity(),
        }
    }
}

// ─── Source: legacy format (DynamicBone) ──────────────────────────────────────

/// Jiggle chain authored with the legacy third-party physics plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicBone {
    pub root: Option<NodeId>,
    pub exclusions: Vec<NodeId>,
    pub damping: f32,
    pub elasticity: f32,
    pub stiffness: f32,
    pub inert: f32,
    pub radius: f32,
    pub gravity: Vector3<f32>,
    pub colliders: Vec<NodeId>,
}

impl Default for DynamicBone {
    fn default() -> Self {
        Self {
            root: None,
            exclusions: Vec::new(),
            damping: 0.1,
            elasticity: 0.1,
            stiffness: 0.1,
            inert: 0.0,
            radius: 0.0,
            gravity: Vector3::zeros(),
            colliders: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Axis {
    X,
    #[default]
    Y,
    Z,
}

impl Axis {
    pub fn unit(self) -> Vector3<f32> {
        match self {
            Axis::X => Vector3::x(),
            Axis::Y => Vector3::y(),
            Axis::Z => Vector3::z(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DynamicBoneCollider {
    pub center: Vector3<f32>,
    pub radius: f32,
    pub height: f32,
    pub direction: Axis,
}

impl Default for DynamicBoneCollider {
    fn default() -> Self {
        Self {
            center: Vector3::zeros(),
            radius: 0.5,
            height: 0.0,
            direction: Axis::Y,
        }
    }
}

// ─── Destination: spring chains & collider groups ────────────────────────────

/// Collision primitive in anchor-bone local space.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "shape")]
pub enum Collider {
    Sphere {
        offset: Vector3<f32>,
        radius: f32,
    },
    Capsule {
        offset: Vector3<f32>,
        tail: Vector3<f32>,
        radius: f32,
    },
}

impl Collider {
    pub fn radius(&self) -> f32 {
        match self {
            Collider::Sphere { radius, .. } | Collider::Capsule { radius, .. } => *radius,
        }
    }
}

/// Collision primitives anchored to the node that carries this group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColliderGroup {
    #[serde(default)]
    pub colliders: Vec<Collider>,
}

/// Destination spring-bone chain.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpringChain {
    #[serde(default)]
    pub comment: String,
    pub bones: Vec<NodeId>,
    pub stiffness: f32,
    pub drag: f32,
    pub gravity_power: f32,
    pub gravity_dir: Vector3<f32>,
    pub hit_radius: f32,
    #[serde(default)]
    pub center: Option<NodeId>,
    /// Anchor nodes of the referenced collider groups.
    #[serde(default)]
    pub collider_groups: Vec<NodeId>,
}
