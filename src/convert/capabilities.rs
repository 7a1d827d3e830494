use serde::Serialize;

use crate::rig::{BehaviorKind, EyeLookSettings, NodeId, SceneGraph};

/// Source SDK generation, identified from the avatar descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SourceSdk {
    /// Auto eye movement toggle only.
    Legacy,
    /// Per-direction eye-look samples, primary physics format.
    Current,
}

/// Jiggle-physics data found in the source rig.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DynamicsFormat {
    None,
    /// The current SDK's physics components.
    Primary,
    /// The legacy third-party physics plugin.
    Legacy,
}

/// Capabilities of a source rig, evaluated once per conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SourceCapabilities {
    pub sdk: Option<SourceSdk>,
    pub dynamics: DynamicsFormat,
}

/// Inspect the rig below `root` and classify its SDK and dynamics format.
///
/// Primary-format dynamics win whenever a single primary component exists
/// anywhere in the rig, even if legacy data is present as well.
pub fn detect_capabilities(graph: &SceneGraph, root: NodeId) -> SourceCapabilities {
    let sdk = graph.node(root).and_then(|node| {
        node.find_behavior(|kind| match kind {
            BehaviorKind::AvatarDescriptor(descriptor) => Some(&descriptor.eye_look),
            _ => None,
        })
        .map(|eye_look| match eye_look {
            EyeLookSettings::Legacy { .. } => SourceSdk::Legacy,
            EyeLookSettings::Current { .. } => SourceSdk::Current,
        })
    });

    let mut has_primary = false;
    let mut has_legacy = false;
    for id in graph.descendants(root) {
        let Some(node) = graph.node(id) else {
            continue;
        };
        for behavior in &node.behaviors {
            match behavior.kind {
                BehaviorKind::PhysBone(_) => has_primary = true,
                BehaviorKind::DynamicBone(_) => has_legacy = true,
                _ => {}
            }
        }
    }

    let dynamics = if has_primary {
        DynamicsFormat::Primary
    } else if has_legacy {
        DynamicsFormat::Legacy
    } else {
        DynamicsFormat::None
    };

    SourceCapabilities { sdk, dynamics }
}
