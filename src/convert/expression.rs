use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::ConversionError;
use crate::log_debug;
use crate::rig::ExpressionPreset;

/// Animated property prefix that drives a shape key.
const SHAPE_KEY_PROPERTY_PREFIX: &str = "blendShape.";

fn full_weight() -> f32 {
    100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Keyframe {
    pub time: f32,
    pub value: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationCurve {
    /// Relative path of the animated node.
    #[serde(default)]
    pub path: String,
    pub property: String,
    pub keyframes: Vec<Keyframe>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnimationClip {
    pub name: String,
    #[serde(default)]
    pub curves: Vec<AnimationCurve>,
}

/// Source-side trigger bound to an expression preset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ExpressionBinding {
    /// Directly drives a single shape key.
    ShapeKey {
        name: String,
        #[serde(default = "full_weight")]
        weight: f32,
    },
    /// An animation clip; its shape-key curves are sampled at their first key.
    Animation(AnimationClip),
    /// Several triggers fired together; later entries override earlier ones.
    Composite { bindings: Vec<ExpressionBinding> },
}

/// Shape-key name → target weight.
pub type ShapeKeyWeights = BTreeMap<String, f32>;

/// Resolve a single binding to the shape keys it ultimately drives.
pub fn extract_shape_key_weights(
    binding: &ExpressionBinding,
) -> Result<ShapeKeyWeights, ConversionError> {
    let mut weights = ShapeKeyWeights::new();
    collect_shape_key_weights(binding, &mut weights)?;
    Ok(weights)
}

fn collect_shape_key_weights(
    binding: &ExpressionBinding,
    weights: &mut ShapeKeyWeights,
) -> Result<(), ConversionError> {
    match binding {
        ExpressionBinding::ShapeKey { name, weight } => {
            insert_weight(weights, name, *weight)?;
        }
        ExpressionBinding::Animation(clip) => {
            for curve in &clip.curves {
                let Some(shape_key) = curve.property.strip_prefix(SHAPE_KEY_PROPERTY_PREFIX) else {
                    log_debug!(
                        "Ignoring non shape-key curve '{}' in clip '{}'",
                        curve.property,
                        clip.name
                    );
                    continue;
                };
                let first = curve
                    .keyframes
                    .iter()
                    .min_by(|a, b| a.time.total_cmp(&b.time))
                    .ok_or_else(|| {
                        ConversionError::configuration(format!(
                            "curve '{}' in clip '{}' has no keyframes",
                            curve.property, clip.name
                        ))
                    })?;
                insert_weight(weights, shape_key, first.value)?;
            }
        }
        ExpressionBinding::Composite { bindings } => {
            for nested in bindings {
                collect_shape_key_weights(nested, weights)?;
            }
        }
    }
    Ok(())
}

fn insert_weight(
    weights: &mut ShapeKeyWeights,
    name: &str,
    weight: f32,
) -> Result<(), ConversionError> {
    if name.trim().is_empty() {
        return Err(ConversionError::configuration(
            "expression binding references an empty shape key name",
        ));
    }
    if !weight.is_finite() {
        return Err(ConversionError::configuration(format!(
            "expression binding for shape key '{name}' has a non-finite weight"
        )));
    }
    weights.insert(name.to_string(), weight);
    Ok(())
}

/// Resolve every preset's binding.
pub fn extract_expressions(
    bindings: &BTreeMap<ExpressionPreset, ExpressionBinding>,
) -> Result<BTreeMap<ExpressionPreset, ShapeKeyWeights>, ConversionError> {
    bindings
        .iter()
        .map(|(preset, binding)| {
            extract_shape_key_weights(binding)
                .map(|weights| (*preset, weights))
                .map_err(|err| match err {
                    ConversionError::Configuration(message) => ConversionError::Configuration(
                        format!("expression '{}': {}", preset.display_name(), message),
                    ),
                    other => other,
                })
        })
        .collect()
}

/// Union of shape-key names referenced by any preset.
pub fn referenced_shape_keys(
    expressions: &BTreeMap<ExpressionPreset, ShapeKeyWeights>,
) -> BTreeSet<String> {
    expressions
        .values()
        .flat_map(|weights| weights.keys().cloned())
        .collect()
}
