use crate::log_debug;
use crate::rig::{EyeAnglePair, EyeLookSettings, HumanBone, LookAtRange, SceneGraph, Skeleton};

use super::types::MAX_AUTO_EYE_MOVEMENT_DEGREE;

/// Derive look-at limits from the source eye-look settings.
///
/// Returns `None` when the stage does not apply: legacy settings without auto
/// eye movement (or without both eye bones), or current settings missing any
/// of the four directional samples.
pub(super) fn calibrate_look_at(
    settings: &EyeLookSettings,
    graph: &SceneGraph,
    skeleton: &Skeleton,
) -> Option<LookAtRange> {
    match settings {
        EyeLookSettings::Legacy { auto_eye_movement } => {
            if !auto_eye_movement {
                return None;
            }
            let eyes_mapped = skeleton.resolve(graph, HumanBone::LeftEye).is_some()
                && skeleton.resolve(graph, HumanBone::RightEye).is_some();
            if !eyes_mapped {
                log_debug!("Auto eye movement is enabled but eye bones are not mapped");
                return None;
            }
            Some(LookAtRange::symmetric(MAX_AUTO_EYE_MOVEMENT_DEGREE))
        }
        EyeLookSettings::Current {
            looking_up,
            looking_down,
            looking_left,
            looking_right,
        } => {
            let (Some(up), Some(down), Some(left), Some(right)) =
                (looking_up, looking_down, looking_left, looking_right)
            else {
                log_debug!("Eye-look samples are incomplete; keeping default look-at curves");
                return None;
            };
            Some(LookAtRange {
                up: narrower_eye(up),
                down: narrower_eye(down),
                left: narrower_eye(left),
                right: narrower_eye(right),
                // Looking left turns the left eye outward and the right eye inward.
                horizontal_outer: left.left.abs().min(right.right.abs()),
                horizontal_inner: left.right.abs().min(right.left.abs()),
            })
        }
    }
}

fn narrower_eye(pair: &EyeAnglePair) -> f32 {
    pair.left.abs().min(pair.right.abs())
}
