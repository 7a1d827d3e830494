use std::{fmt, path::PathBuf};

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

use crate::texture::ResizeInterpolation;

use super::capabilities::SourceCapabilities;

// ─── Shader constants ─────────────────────────────────────────────────────────

/// Shaders the destination format renders natively.
pub const SUPPORTED_SHADERS: [&str; 15] = [
    "Standard",
    "Standard (Specular setup)",
    "Unlit/Color",
    "Unlit/Texture",
    "Unlit/Transparent",
    "Unlit/Transparent Cutout",
    "UniGLTF/NormalMapDecoder",
    "UniGLTF/NormalMapEncoder",
    "UniGLTF/StandardVColor",
    "UniGLTF/UniUnlit",
    "VRM/MToon",
    "VRM/UnlitCutout",
    "VRM/UnlitTexture",
    "VRM/UnlitTransparent",
    "VRM/UnlitTransparentZWrite",
];

pub const DESTINATION_UNLIT_SHADER: &str = "UniGLTF/UniUnlit";
pub const DESTINATION_TOON_SHADER: &str = "VRM/MToon";
pub const DEFAULT_FALLBACK_SHADER: &str = "Standard";

/// Eye rotation limit applied when legacy auto eye movement is enabled.
pub const MAX_AUTO_EYE_MOVEMENT_DEGREE: f32 = 30.0;

/// Name of the node that receives the combined mesh.
pub const COMBINED_RENDERER_NAME: &str = "vrm-mesh";

/// Name of the node hosting destination spring chains.
pub const SECONDARY_NODE_NAME: &str = "secondary";

// ─── Options ──────────────────────────────────────────────────────────────────

fn default_temporary_dir() -> PathBuf {
    std::env::temp_dir().join("vrc2vrm-temporary")
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Conversion options shared by the CLI and library callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// Keep shape keys that no expression references.
    pub keep_unused_shape_keys: bool,
    /// Ask the skeleton normalizer to force a T-pose.
    pub force_t_pose: bool,
    /// Scoped temporary storage location. Only one conversion may use a given
    /// directory at a time.
    pub temporary_dir: PathBuf,
    /// Shaders kept as-is by the material remapper.
    pub supported_shaders: Vec<String>,
    /// Shader assigned when a shader name matches no remapping rule.
    pub fallback_shader: String,
    /// Largest texture edge written to the output.
    pub texture_max_size: u32,
    /// Interpolation method used for texture resize operations.
    pub texture_resize_method: ResizeInterpolation,
    /// Converter version reported in failures and the exported file.
    pub version: String,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            keep_unused_shape_keys: false,
            force_t_pose: true,
            temporary_dir: default_temporary_dir(),
            supported_shaders: SUPPORTED_SHADERS.iter().map(|s| s.to_string()).collect(),
            fallback_shader: DEFAULT_FALLBACK_SHADER.to_string(),
            texture_max_size: 2048,
            texture_resize_method: ResizeInterpolation::Bilinear,
            version: default_version(),
        }
    }
}

// ─── Pipeline stages ──────────────────────────────────────────────────────────

/// States of a single conversion run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversionStage {
    Idle,
    Cloning,
    Initializing,
    DynamicsConversion,
    ColliderPruning,
    Normalizing,
    Combining,
    MaterialRemapping,
    Finalizing,
    Exporting,
    Succeeded,
    Failed,
}

impl ConversionStage {
    /// The stage that follows `self` on the success path.
    pub fn next(self) -> Option<ConversionStage> {
        match self {
            ConversionStage::Idle => Some(ConversionStage::Cloning),
            ConversionStage::Cloning => Some(ConversionStage::Initializing),
            ConversionStage::Initializing => Some(ConversionStage::DynamicsConversion),
            ConversionStage::DynamicsConversion => Some(ConversionStage::ColliderPruning),
            ConversionStage::ColliderPruning => Some(ConversionStage::Normalizing),
            ConversionStage::Normalizing => Some(ConversionStage::Combining),
            ConversionStage::Combining => Some(ConversionStage::MaterialRemapping),
            ConversionStage::MaterialRemapping => Some(ConversionStage::Finalizing),
            ConversionStage::Finalizing => Some(ConversionStage::Exporting),
            ConversionStage::Exporting => Some(ConversionStage::Succeeded),
            ConversionStage::Succeeded | ConversionStage::Failed => None,
        }
    }
}

impl fmt::Display for ConversionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ConversionStage::Idle => "idle",
            ConversionStage::Cloning => "cloning",
            ConversionStage::Initializing => "initializing",
            ConversionStage::DynamicsConversion => "converting dynamics",
            ConversionStage::ColliderPruning => "pruning colliders",
            ConversionStage::Normalizing => "normalizing",
            ConversionStage::Combining => "combining meshes",
            ConversionStage::MaterialRemapping => "remapping materials",
            ConversionStage::Finalizing => "finalizing",
            ConversionStage::Exporting => "exporting",
            ConversionStage::Succeeded => "succeeded",
            ConversionStage::Failed => "failed",
        };
        f.write_str(label)
    }
}

// ─── Reports ──────────────────────────────────────────────────────────────────

/// Severity level used by validation issues.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// A single validation issue produced during analysis/conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: Severity,
    pub code: String,
    pub message: String,
}

/// Analysis-only report generated without converting anything.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisReport {
    pub model_name: String,
    pub capabilities: SourceCapabilities,
    pub node_count: usize,
    pub renderer_count: usize,
    pub material_count: usize,
    pub shape_key_count: usize,
    pub mapped_bones: Vec<(String, String)>,
    pub missing_required_bones: Vec<String>,
    pub issues: Vec<ValidationIssue>,
}

impl AnalysisReport {
    pub fn has_errors(&self) -> bool {
        self.issues
            .iter()
            .any(|issue| issue.severity == Severity::Error)
    }
}

/// Full conversion report returned after export.
#[derive(Debug, Clone, Serialize)]
pub struct ConversionReport {
    pub model_name: String,
    pub output_path: PathBuf,
    pub output_bytes: usize,
    pub capabilities: SourceCapabilities,
    pub stages: Vec<ConversionStage>,
    pub spring_chain_count: usize,
    /// Bones that received a collider group converted from source colliders.
    pub converted_collider_anchors: Vec<String>,
    pub collider_group_count: usize,
    pub pruned_collider_group_count: usize,
    pub combined_submesh_count: usize,
    pub retained_shape_keys: Vec<String>,
    pub removed_shape_keys: Vec<String>,
    pub duplicated_material_count: usize,
    pub first_person_offset: [f32; 3],
    pub issues: Vec<ValidationIssue>,
}

pub(super) fn vector_to_array(vector: &Vector3<f32>) -> [f32; 3] {
    [vector.x, vector.y, vector.z]
}
