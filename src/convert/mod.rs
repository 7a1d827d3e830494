//! Source avatar → VRM 0.x conversion pipeline.

mod capabilities;
mod colliders;
mod combine;
mod dynamics;
mod export;
mod expression;
mod first_person;
mod initialize;
mod look_at;
mod materials;
mod normalize;
mod report;
mod sanitize;
mod shape_keys;
mod storage;
mod types;
mod validation;

use std::{collections::BTreeMap, ffi::OsString, fs, path::Path};

use crate::error::ConversionError;
use crate::rig::{
    AvatarMeta, BehaviorKind, ExpressionPreset, HumanBone, REQUIRED_BONES, SourceRig,
};
use crate::{log_debug, log_info, log_warn};

// Re-export public types for callers of this module.
pub use capabilities::{DynamicsFormat, SourceCapabilities, SourceSdk, detect_capabilities};
pub use export::{GlbVrmExporter, VrmExporter};
pub use expression::{
    AnimationClip, AnimationCurve, ExpressionBinding, Keyframe, ShapeKeyWeights,
    extract_expressions, extract_shape_key_weights, referenced_shape_keys,
};
pub use normalize::{BoneNormalizer, SkeletonNormalizer};
pub use report::{ErrorReporter, FailureContext, LogErrorReporter};
pub use types::{
    AnalysisReport, COMBINED_RENDERER_NAME, ConversionReport, ConversionStage, ConvertOptions,
    DEFAULT_FALLBACK_SHADER, DESTINATION_TOON_SHADER, DESTINATION_UNLIT_SHADER,
    MAX_AUTO_EYE_MOVEMENT_DEGREE, SECONDARY_NODE_NAME, SUPPORTED_SHADERS, Severity,
    ValidationIssue,
};
pub use validation::analyze_source;

use colliders::prune_unused_collider_groups;
use combine::combine_renderers;
use dynamics::convert_secondary_dynamics;
use first_person::{classify_renderers, first_person_offset};
use initialize::{blend_shape_proxy_mut, first_person_mut, initialize_vrm_behaviors, look_at_mut};
use look_at::calibrate_look_at;
use materials::MaterialRemapper;
use sanitize::remove_inactive_nodes_and_disabled_behaviors;
use shape_keys::{bind_expressions, separate_shape_keys};
use storage::TemporaryStorage;
use types::vector_to_array;

const TEMPORARY_RIG_FILE: &str = "temporary.json";
const TEMPORARY_OUTPUT_FILE: &str = "temporary.vrm";

/// Everything a conversion consumes.
#[derive(Debug, Clone, Copy)]
pub struct ConversionInput<'a> {
    pub rig: &'a SourceRig,
    /// Copied verbatim into the output.
    pub meta: &'a AvatarMeta,
    pub expressions: &'a BTreeMap<ExpressionPreset, ExpressionBinding>,
}

/// Replaceable parts of the pipeline.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub normalizer: &'a dyn SkeletonNormalizer,
    pub exporter: &'a dyn VrmExporter,
    pub reporter: &'a dyn ErrorReporter,
}

impl Default for Collaborators<'static> {
    fn default() -> Self {
        Self {
            normalizer: &BoneNormalizer,
            exporter: &GlbVrmExporter,
            reporter: &LogErrorReporter,
        }
    }
}

/// Convert a source avatar and write the result to `output_path`.
///
/// Runs the stages of [`ConversionStage`] strictly in order. On failure the
/// reporter is invoked once, intermediate state is released and the error is
/// returned; the output file is only written after every stage succeeded.
/// Conversions sharing `options.temporary_dir` must not run concurrently.
pub fn convert_avatar(
    input: ConversionInput<'_>,
    output_path: &Path,
    options: &ConvertOptions,
    collaborators: Collaborators<'_>,
) -> Result<ConversionReport, ConversionError> {
    let model_name = input
        .rig
        .graph
        .name_of(input.rig.root)
        .unwrap_or("unnamed")
        .to_string();
    log_info!("Converting '{}' -> {}", model_name, output_path.display());

    let mut run = ConversionRun::new(&model_name);
    let result = run.execute(input, output_path, options, collaborators);

    if let Err(error) = &result {
        let context = FailureContext::new(&model_name, &options.version, run.stage, error);
        collaborators.reporter.report(&context, error);
        run.enter(ConversionStage::Failed);
    }

    if let Err(cleanup_error) = run.release() {
        log_warn!("Cleanup after converting '{}' failed: {}", model_name, cleanup_error);
    }
    result
}

/// State of one conversion run and the resources it owns.
struct ConversionRun<'a> {
    model_name: &'a str,
    stage: ConversionStage,
    stages: Vec<ConversionStage>,
    working: Option<SourceRig>,
    storage: Option<TemporaryStorage>,
}

impl<'a> ConversionRun<'a> {
    fn new(model_name: &'a str) -> Self {
        Self {
            model_name,
            stage: ConversionStage::Idle,
            stages: vec![ConversionStage::Idle],
            working: None,
            storage: None,
        }
    }

    fn enter(&mut self, stage: ConversionStage) {
        log_info!("[{}] {}", self.model_name, stage);
        self.stage = stage;
        self.stages.push(stage);
    }

    fn execute(
        &mut self,
        input: ConversionInput<'_>,
        output_path: &Path,
        options: &ConvertOptions,
        collaborators: Collaborators<'_>,
    ) -> Result<ConversionReport, ConversionError> {
        let storage = self
            .storage
            .insert(TemporaryStorage::allocate(&options.temporary_dir)?);
        log_debug!("Temporary storage at {}", storage.path().display());

        let analysis = analyze_source(input.rig, input.expressions, options);
        if analysis.has_errors() {
            let messages: Vec<&str> = analysis
                .issues
                .iter()
                .filter(|issue| issue.severity == Severity::Error)
                .map(|issue| issue.message.as_str())
                .collect();
            return Err(ConversionError::configuration(messages.join("; ")));
        }

        // ─── Cloning ──────────────────────────────────────────────────────────
        advance(self.model_name, &mut self.stage, &mut self.stages);
        let rig = self.working.insert(input.rig.clone());

        // ─── Initializing ─────────────────────────────────────────────────────
        advance(self.model_name, &mut self.stage, &mut self.stages);
        let sanitized = remove_inactive_nodes_and_disabled_behaviors(&mut rig.graph, rig.root);
        log_debug!(
            "Removed {} inactive node(s) and {} disabled behavior(s)",
            sanitized.removed_nodes,
            sanitized.removed_behaviors
        );
        let expressions = extract_expressions(input.expressions)?;
        let descriptor = rig
            .descriptor()
            .cloned()
            .ok_or_else(|| ConversionError::configuration("avatar root has no avatar descriptor"))?;
        require_bones(rig, "source rig")?;
        let capabilities = detect_capabilities(&rig.graph, rig.root);
        log_debug!(
            "Detected SDK {:?} with {:?} dynamics",
            capabilities.sdk,
            capabilities.dynamics
        );
        let head = resolve_head(rig)?;
        let secondary = initialize_vrm_behaviors(&mut rig.graph, rig.root, input.meta.clone(), head);
        let look_at = calibrate_look_at(&descriptor.eye_look, &rig.graph, &rig.skeleton);
        if let Some(config) = look_at_mut(&mut rig.graph, rig.root) {
            config.range = look_at;
        }

        // ─── DynamicsConversion ───────────────────────────────────────────────
        advance(self.model_name, &mut self.stage, &mut self.stages);
        let dynamics =
            convert_secondary_dynamics(&mut rig.graph, rig.root, secondary, capabilities.dynamics);
        let converted_collider_anchors: Vec<String> = dynamics
            .collider_group_anchors
            .iter()
            .filter_map(|anchor| rig.graph.name_of(*anchor))
            .map(str::to_string)
            .collect();
        let offset = first_person_offset(&rig.graph, &rig.skeleton, descriptor.view_position)?;
        if let Some(config) = first_person_mut(&mut rig.graph, rig.root) {
            config.offset = offset;
        }

        // ─── ColliderPruning ──────────────────────────────────────────────────
        advance(self.model_name, &mut self.stage, &mut self.stages);
        let pruned = prune_unused_collider_groups(&mut rig.graph, rig.root, &rig.skeleton)?;

        // ─── Normalizing ──────────────────────────────────────────────────────
        advance(self.model_name, &mut self.stage, &mut self.stages);
        let source_root = rig.root;
        let normalized_root = collaborators
            .normalizer
            .normalize(&mut rig.graph, source_root, &rig.skeleton, options.force_t_pose)
            .map_err(|e| ConversionError::failure(ConversionStage::Normalizing, e))?;
        rig.skeleton = rig.skeleton.rebind(&rig.graph, source_root, normalized_root);
        rig.graph.destroy(source_root);
        rig.root = normalized_root;
        require_bones(rig, "normalized rig")
            .map_err(|e| ConversionError::failure(ConversionStage::Normalizing, e))?;

        // ─── Combining ────────────────────────────────────────────────────────
        advance(self.model_name, &mut self.stage, &mut self.stages);
        let referenced = referenced_shape_keys(&expressions);
        let keep_unused = options.keep_unused_shape_keys;
        let combined = combine_renderers(&mut rig.graph, rig.root, |name| {
            keep_unused || referenced.contains(name)
        })
        .map_err(|e| ConversionError::failure(ConversionStage::Combining, e))?;
        let separated = separate_shape_keys(&mut rig.graph, combined.renderer)
            .map_err(|e| ConversionError::failure(ConversionStage::Combining, e))?;
        if let Some(node) = separated {
            log_debug!("Moved shape-key geometry to node {}", node);
        }

        // ─── MaterialRemapping ────────────────────────────────────────────────
        advance(self.model_name, &mut self.stage, &mut self.stages);
        let mut remapper = MaterialRemapper::new(&options.supported_shaders, &options.fallback_shader);
        remapper.remap_renderers(&mut rig.graph, rig.root);
        let duplicated_material_count = remapper.duplicated_count();

        // ─── Finalizing ───────────────────────────────────────────────────────
        advance(self.model_name, &mut self.stage, &mut self.stages);
        let head = resolve_head(rig)?;
        let visibility = classify_renderers(&rig.graph, rig.root, head);
        if let Some(config) = first_person_mut(&mut rig.graph, rig.root) {
            config.bone = Some(head);
            config.renderers = visibility;
        }
        let groups = bind_expressions(&rig.graph, rig.root, &expressions);
        if let Some(proxy) = blend_shape_proxy_mut(&mut rig.graph, rig.root) {
            proxy.groups = groups;
        }
        let snapshot = serde_json::to_vec_pretty(&*rig)
            .map_err(|e| ConversionError::failure(ConversionStage::Finalizing, e))?;
        storage.write(TEMPORARY_RIG_FILE, &snapshot)?;

        // ─── Exporting ────────────────────────────────────────────────────────
        advance(self.model_name, &mut self.stage, &mut self.stages);
        let bytes = collaborators
            .exporter
            .export(&rig.graph, rig.root, &rig.skeleton, options)
            .map_err(|e| ConversionError::failure(ConversionStage::Exporting, e))?;
        storage.write(TEMPORARY_OUTPUT_FILE, &bytes)?;
        write_output(output_path, &bytes)?;

        let collider_group_count = rig
            .graph
            .descendants(rig.root)
            .into_iter()
            .filter_map(|id| rig.graph.node(id))
            .flat_map(|node| &node.behaviors)
            .filter(|behavior| matches!(behavior.kind, BehaviorKind::SpringBoneColliderGroup(_)))
            .count();

        advance(self.model_name, &mut self.stage, &mut self.stages);
        log_info!(
            "Converted '{}' ({} bytes, {} submesh(es), {} spring chain(s))",
            self.model_name,
            bytes.len(),
            combined.submesh_count,
            dynamics.chains
        );

        Ok(ConversionReport {
            model_name: self.model_name.to_string(),
            output_path: output_path.to_path_buf(),
            output_bytes: bytes.len(),
            capabilities,
            stages: self.stages.clone(),
            spring_chain_count: dynamics.chains,
            converted_collider_anchors,
            collider_group_count,
            pruned_collider_group_count: pruned.len(),
            combined_submesh_count: combined.submesh_count,
            retained_shape_keys: combined.retained_shape_keys,
            removed_shape_keys: combined.removed_shape_keys,
            duplicated_material_count,
            first_person_offset: vector_to_array(&offset),
            issues: analysis.issues,
        })
    }

    /// Destroy the working rig and delete the temporary storage. Runs on
    /// every exit path.
    fn release(&mut self) -> Result<(), ConversionError> {
        if let Some(mut rig) = self.working.take() {
            let destroyed = rig.graph.destroy(rig.root);
            log_debug!("Destroyed {} intermediate node(s)", destroyed);
        }
        match self.storage.take() {
            Some(storage) => storage.release(),
            None => Ok(()),
        }
    }
}

/// Move to the next stage on the success path.
fn advance(model_name: &str, stage: &mut ConversionStage, stages: &mut Vec<ConversionStage>) {
    if let Some(next) = stage.next() {
        log_info!("[{}] {}", model_name, next);
        *stage = next;
        stages.push(next);
    }
}

fn require_bones(rig: &SourceRig, what: &str) -> Result<(), ConversionError> {
    let missing = rig.skeleton.missing(&rig.graph, &REQUIRED_BONES);
    if missing.is_empty() {
        return Ok(());
    }
    let names: Vec<&str> = missing.iter().map(HumanBone::as_str).collect();
    Err(ConversionError::configuration(format!(
        "{} is missing required bones: {}",
        what,
        names.join(", ")
    )))
}

/// Write `bytes` to a hidden sibling of `output_path` and rename it into
/// place, so a failed write never leaves a truncated destination file.
fn write_output(output_path: &Path, bytes: &[u8]) -> Result<(), ConversionError> {
    if let Some(parent) = output_path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| ConversionError::resource(parent, source))?;
    }
    let file_name = output_path.file_name().ok_or_else(|| {
        ConversionError::configuration(format!(
            "output path {} does not name a file",
            output_path.display()
        ))
    })?;
    let mut staging_name = OsString::from(".");
    staging_name.push(file_name);
    staging_name.push(".partial");
    let staging = output_path.with_file_name(staging_name);

    let written = fs::write(&staging, bytes)
        .map_err(|source| ConversionError::resource(&staging, source))
        .and_then(|()| {
            fs::rename(&staging, output_path)
                .map_err(|source| ConversionError::resource(output_path, source))
        });
    if written.is_err() && staging.is_file() {
        if let Err(cleanup) = fs::remove_file(&staging) {
            log_warn!("Could not remove partial output {}: {}", staging.display(), cleanup);
        }
    }
    written
}

fn resolve_head(rig: &SourceRig) -> Result<crate::rig::NodeId, ConversionError> {
    rig.skeleton
        .resolve(&rig.graph, HumanBone::Head)
        .ok_or_else(|| ConversionError::configuration("head bone is not mapped"))
}
