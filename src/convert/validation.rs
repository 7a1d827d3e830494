use std::collections::{BTreeMap, BTreeSet};

use crate::rig::{
    BehaviorKind, EyeLookSettings, ExpressionPreset, HumanBone, MaterialId, PhysBoneColliderShape,
    REQUIRED_BONES, SourceRig,
};

use super::capabilities::detect_capabilities;
use super::combine::renderer_nodes;
use super::expression::{ExpressionBinding, extract_expressions};
use super::sanitize::remove_inactive_nodes_and_disabled_behaviors;
use super::types::{AnalysisReport, ConvertOptions, Severity, ValidationIssue};

fn issue(severity: Severity, code: &str, message: String) -> ValidationIssue {
    ValidationIssue {
        severity,
        code: code.to_string(),
        message,
    }
}

/// Inspect a source rig without converting it.
///
/// Analysis runs on a sanitized copy so that inactive nodes and disabled
/// behaviors are judged exactly as the conversion would see them.
pub fn analyze_source(
    rig: &SourceRig,
    expressions: &BTreeMap<ExpressionPreset, ExpressionBinding>,
    options: &ConvertOptions,
) -> AnalysisReport {
    let mut rig = rig.clone();
    let root = rig.root;
    remove_inactive_nodes_and_disabled_behaviors(&mut rig.graph, root);
    let graph = &rig.graph;
    let mut issues = Vec::new();

    let model_name = graph.name_of(root).unwrap_or("unnamed").to_string();
    let capabilities = detect_capabilities(graph, root);

    match rig.descriptor() {
        None => issues.push(issue(
            Severity::Error,
            "MISSING_AVATAR_DESCRIPTOR",
            "[ERROR] Avatar root has no avatar descriptor".to_string(),
        )),
        Some(descriptor) => {
            if let Some(message) = partial_eye_look(&descriptor.eye_look) {
                issues.push(issue(Severity::Warning, "PARTIAL_EYE_LOOK", message));
            }
        }
    }

    let missing_required = rig.skeleton.missing(graph, &REQUIRED_BONES);
    for bone in &missing_required {
        issues.push(issue(
            Severity::Error,
            "MISSING_REQUIRED_BONE",
            format!("[ERROR] Required bone '{}' is not mapped", bone.as_str()),
        ));
    }
    if let Err(error) = extract_expressions(expressions) {
        issues.push(issue(
            Severity::Error,
            "INVALID_EXPRESSION_BINDING",
            format!("[ERROR] {}", error),
        ));
    }

    let renderers = renderer_nodes(graph, root);
    if renderers.is_empty() {
        issues.push(issue(
            Severity::Error,
            "NO_RENDERERS",
            "[ERROR] Avatar has no active renderers".to_string(),
        ));
    }

    let mut materials = BTreeSet::<MaterialId>::new();
    let mut shape_key_count = 0;
    for id in &renderers {
        let Some(renderer) = graph.node(*id).and_then(|node| node.renderer.as_ref()) else {
            continue;
        };
        materials.extend(renderer.materials.iter().copied());
        shape_key_count += renderer.mesh.shape_keys.len();
        if let Err(error) = renderer.mesh.validate() {
            issues.push(issue(
                Severity::Error,
                "INVALID_MESH",
                format!("[ERROR] Mesh '{}': {}", renderer.mesh.name, error),
            ));
        }
    }

    for id in &materials {
        let Some(material) = graph.material(*id) else {
            continue;
        };
        let shader = material.shader_name();
        if options.supported_shaders.iter().any(|supported| supported == shader) {
            continue;
        }
        let lowered = shader.to_lowercase();
        if !lowered.contains("unlit") && !lowered.contains("toon") {
            issues.push(issue(
                Severity::Warning,
                "UNSUPPORTED_SHADER",
                format!(
                    "[WARN] Material '{}' uses shader '{}' with no mapping rule; '{}' will be used",
                    material.name, shader, options.fallback_shader
                ),
            ));
        }
    }

    for id in graph.descendants(root) {
        let Some(node) = graph.node(id) else {
            continue;
        };
        for behavior in &node.behaviors {
            let is_plane = matches!(
                &behavior.kind,
                BehaviorKind::PhysBoneCollider(collider)
                    if collider.shape == PhysBoneColliderShape::Plane
            );
            if is_plane {
                issues.push(issue(
                    Severity::Warning,
                    "UNSUPPORTED_COLLIDER_SHAPE",
                    format!(
                        "[WARN] Plane collider on '{}' has no destination equivalent and will be skipped",
                        node.name
                    ),
                ));
            }
        }
    }

    let mapped_bones = rig
        .skeleton
        .iter()
        .filter_map(|(bone, node)| {
            graph
                .name_of(node)
                .map(|name| (bone.as_str().to_string(), name.to_string()))
        })
        .collect();

    AnalysisReport {
        model_name,
        capabilities,
        node_count: graph.descendants(root).len(),
        renderer_count: renderers.len(),
        material_count: materials.len(),
        shape_key_count,
        mapped_bones,
        missing_required_bones: missing_required
            .iter()
            .map(HumanBone::as_str)
            .map(str::to_string)
            .collect(),
        issues,
    }
}

/// Warning text when some, but not all, directional eye samples are present.
fn partial_eye_look(settings: &EyeLookSettings) -> Option<String> {
    let EyeLookSettings::Current {
        looking_up,
        looking_down,
        looking_left,
        looking_right,
    } = settings
    else {
        return None;
    };
    let present = [looking_up, looking_down, looking_left, looking_right]
        .iter()
        .filter(|sample| sample.is_some())
        .count();
    (present > 0 && present < 4).then(|| {
        format!(
            "[WARN] Only {} of 4 eye-look directions are configured; eye-look calibration will be skipped",
            present
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rig::{Behavior, Material, PhysBoneCollider, fixtures};

    fn codes(report: &AnalysisReport) -> Vec<&str> {
        report.issues.iter().map(|issue| issue.code.as_str()).collect()
    }

    #[test]
    fn given_complete_fixture_when_analyzing_then_counts_are_reported_without_errors() {
        let fixture = fixtures::humanoid();

        let report = analyze_source(&fixture.rig, &BTreeMap::new(), &ConvertOptions::default());

        assert!(!report.has_errors(), "{:?}", report.issues);
        assert_eq!(report.model_name, "Avatar");
        assert_eq!(report.renderer_count, 2);
        assert_eq!(report.material_count, 2);
        assert_eq!(report.shape_key_count, fixtures::SHAPE_KEYS.len());
        assert!(report.missing_required_bones.is_empty());
        assert!(
            report
                .mapped_bones
                .contains(&("head".to_string(), "Head".to_string()))
        );
    }

    #[test]
    fn given_inactive_head_when_analyzing_then_missing_bones_are_errors() {
        let mut fixture = fixtures::humanoid();
        fixture.rig.graph.node_mut(fixture.head).expect("head").active = false;

        let report = analyze_source(&fixture.rig, &BTreeMap::new(), &ConvertOptions::default());

        assert!(report.has_errors());
        assert_eq!(report.missing_required_bones, vec!["head".to_string()]);
        assert!(codes(&report).contains(&"MISSING_REQUIRED_BONE"));
    }

    #[test]
    fn given_unknown_shader_and_plane_collider_when_analyzing_then_warnings_are_reported() {
        let mut fixture = fixtures::humanoid();
        let graph = &mut fixture.rig.graph;
        let glass = graph.add_material(Material::new("Glass", "Custom/Refraction"));
        if let Some(renderer) = graph.node_mut(fixture.body).and_then(|node| node.renderer.as_mut()) {
            renderer.materials = vec![glass];
        }
        graph.node_mut(fixture.hair).expect("hair").behaviors.push(Behavior::new(
            BehaviorKind::PhysBoneCollider(PhysBoneCollider {
                shape: PhysBoneColliderShape::Plane,
                ..PhysBoneCollider::default()
            }),
        ));

        let report = analyze_source(&fixture.rig, &BTreeMap::new(), &ConvertOptions::default());

        assert!(!report.has_errors());
        let codes = codes(&report);
        assert!(codes.contains(&"UNSUPPORTED_SHADER"));
        assert!(codes.contains(&"UNSUPPORTED_COLLIDER_SHAPE"));
    }

    #[test]
    fn given_three_eye_samples_when_analyzing_then_partial_eye_look_is_flagged() {
        let settings = EyeLookSettings::Current {
            looking_up: Some(crate::rig::EyeAnglePair { left: 1.0, right: 1.0 }),
            looking_down: Some(crate::rig::EyeAnglePair { left: 1.0, right: 1.0 }),
            looking_left: Some(crate::rig::EyeAnglePair { left: 1.0, right: 1.0 }),
            looking_right: None,
        };

        let message = partial_eye_look(&settings).expect("flagged");

        assert!(message.contains("3 of 4"));
        assert_eq!(partial_eye_look(&EyeLookSettings::Legacy { auto_eye_movement: true }), None);
    }
}
