use nalgebra::{Matrix3, Matrix4, Point3, UnitQuaternion, Vector3};

use crate::rig::BoneWeights;

/// Applies a correction quaternion to the current local rotation.
///
/// # Arguments
///
/// * `current_pose` - Local-space rotation of the bone before correction.
/// * `correction` - Local-space correction, usually from
///   [`world_correction_to_local`].
///
/// # Returns
///
/// The corrected local-space rotation.
pub fn apply_corrected_rotation(
    current_pose: UnitQuaternion<f32>,
    correction: UnitQuaternion<f32>,
) -> UnitQuaternion<f32> {
    correction * current_pose
}

/// World-space rotation that swings an arm segment pointing along
/// `segment_direction` onto the horizontal axis of its side.
///
/// # Arguments
///
/// * `segment_direction` - World-space vector from the upper arm to the
///   lower arm (or lower arm to hand).
/// * `side` - `1.0` for the left arm (+X), `-1.0` for the right arm.
///
/// # Returns
///
/// The world-space swing; identity for a degenerate segment.
pub fn horizontal_arm_correction(
    segment_direction: Vector3<f32>,
    side: f32,
) -> UnitQuaternion<f32> {
    let target = Vector3::x() * side.signum();
    if segment_direction.norm_squared() <= f32::EPSILON {
        return UnitQuaternion::identity();
    }
    UnitQuaternion::rotation_between(&segment_direction, &target)
        .unwrap_or_else(|| {
            // Exactly opposite: swing around the vertical axis.
            UnitQuaternion::from_axis_angle(&Vector3::y_axis(), std::f32::consts::PI)
        })
}

/// Expresses a world-space rotation in the frame of a parent.
///
/// # Arguments
///
/// * `world_correction` - Rotation to apply, in world space.
/// * `parent_world` - World rotation of the bone's parent.
///
/// # Returns
///
/// The same rotation expressed in the parent's local frame.
pub fn world_correction_to_local(
    world_correction: UnitQuaternion<f32>,
    parent_world: UnitQuaternion<f32>,
) -> UnitQuaternion<f32> {
    parent_world.inverse() * world_correction * parent_world
}

/// Applies a correction matrix directly to a vertex position.
///
/// # Arguments
///
/// * `vertex` - Vertex position to transform.
/// * `correction_matrix` - Homogeneous transform, translation included.
///
/// # Returns
///
/// Transformed vertex position.
pub fn correct_vertex_with_matrix(
    vertex: Vector3<f32>,
    correction_matrix: &Matrix4<f32>,
) -> Vector3<f32> {
    correction_matrix.transform_point(&Point3::from(vertex)).coords
}

/// Applies the linear part of a correction matrix to a direction or offset
/// (normals, shape-key deltas, collider offsets).
pub fn correct_vector_with_matrix(
    vector: Vector3<f32>,
    correction_matrix: &Matrix4<f32>,
) -> Vector3<f32> {
    linear_part(correction_matrix) * vector
}

/// Like [`correct_vector_with_matrix`], re-normalized. Falls back to the input
/// when the result collapses.
pub fn correct_normal_with_matrix(
    normal: Vector3<f32>,
    correction_matrix: &Matrix4<f32>,
) -> Vector3<f32> {
    let corrected = correct_vector_with_matrix(normal, correction_matrix);
    let length = corrected.norm();
    if length > 1e-8 { corrected / length } else { normal }
}

/// Upper-left 3×3 of a homogeneous matrix.
pub fn linear_part(matrix: &Matrix4<f32>) -> Matrix3<f32> {
    matrix.fixed_view::<3, 3>(0, 0).into_owned()
}

/// Weighted sum of the per-joint corrections influencing one vertex.
///
/// # Arguments
///
/// * `weights` - Joint slots and weights of the vertex.
/// * `slot_corrections` - Correction matrix per joint slot. Out-of-range
///   slots count as identity.
///
/// # Returns
///
/// The weight-normalized blend, or identity for a vertex without effective
/// weight.
pub fn blend_correction_matrix(
    weights: &BoneWeights,
    slot_corrections: &[Matrix4<f32>],
) -> Matrix4<f32> {
    let mut result = Matrix4::<f32>::zeros();
    let mut total_weight = 0.0f32;

    for (slot, weight) in weights.influences() {
        if weight <= 1e-7 {
            continue;
        }
        let correction = slot_corrections
            .get(usize::from(slot))
            .copied()
            .unwrap_or_else(Matrix4::identity);
        result += correction * weight;
        total_weight += weight;
    }

    if total_weight < 1e-7 {
        return Matrix4::identity();
    }
    result / total_weight
}

/// Rebuilds an inverse bind matrix from parent/world and local transforms.
///
/// # Arguments
///
/// * `parent_world` - World matrix of the joint's parent.
/// * `local_transform` - Local matrix of the joint.
///
/// # Returns
///
/// The inverse of the joint's bind matrix, or `None` when it is singular.
pub fn rebuild_inverse_bind_matrix(
    parent_world: Matrix4<f32>,
    local_transform: Matrix4<f32>,
) -> Option<Matrix4<f32>> {
    let bind_matrix = parent_world * local_transform;
    bind_matrix.try_inverse()
}
