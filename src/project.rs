use std::{collections::BTreeMap, fs, path::Path, path::PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::convert::{ConvertOptions, ExpressionBinding};
use crate::rig::{AvatarMeta, ExpressionPreset, SourceRig};

/// Persisted project settings used by CLI workflows.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectSettings {
    pub input_path: Option<PathBuf>,
    pub output_path: Option<PathBuf>,
    pub options: ConvertOptions,
}

/// On-disk form of everything one conversion consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub rig: SourceRig,
    #[serde(default)]
    pub meta: AvatarMeta,
    #[serde(default)]
    pub expressions: BTreeMap<ExpressionPreset, ExpressionBinding>,
}

/// Save project settings to a JSON file.
pub fn save_project_settings(path: &Path, settings: &ProjectSettings) -> Result<()> {
    let content = serde_json::to_string_pretty(settings)
        .context("failed to serialize project settings as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save project settings: {}", path.display()))?;
    Ok(())
}

/// Load project settings from a JSON file.
pub fn load_project_settings(path: &Path) -> Result<ProjectSettings> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to load project settings: {}", path.display()))?;
    serde_json::from_str(&content).context("failed to parse project settings JSON")
}

pub fn save_source_document(path: &Path, document: &SourceDocument) -> Result<()> {
    let content = serde_json::to_string_pretty(document)
        .context("failed to serialize source document as JSON")?;
    fs::write(path, content)
        .with_context(|| format!("failed to save source document: {}", path.display()))?;
    Ok(())
}

/// Load a source document. The scene graph must be a consistent forest and
/// the rig root must be one of its top-level nodes.
pub fn load_source_document(path: &Path) -> Result<SourceDocument> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("failed to read source document: {}", path.display()))?;
    let document: SourceDocument = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse source document: {}", path.display()))?;
    if !document.rig.graph.contains(document.rig.root) {
        anyhow::bail!(
            "source document {} names root {} which is not in its scene graph",
            path.display(),
            document.rig.root
        );
    }
    if let Some(parent) = document.rig.graph.parent_of(document.rig.root) {
        anyhow::bail!(
            "source document {} names root {} which has parent {}",
            path.display(),
            document.rig.root,
            parent
        );
    }
    Ok(document)
}
