use std::collections::HashMap;

use crate::rig::{Material, MaterialId, NodeId, SceneGraph};
use crate::{log_debug, log_warn};

use super::combine::renderer_nodes;
use super::types::{DESTINATION_TOON_SHADER, DESTINATION_UNLIT_SHADER};

/// Maps non-conforming materials to destination-compatible duplicates.
///
/// One remapper lives for one conversion; its memo guarantees a single
/// duplicate per distinct source material regardless of how many renderers
/// use it.
pub(super) struct MaterialRemapper<'a> {
    supported_shaders: &'a [String],
    fallback_shader: &'a str,
    duplicates: HashMap<MaterialId, MaterialId>,
}

impl<'a> MaterialRemapper<'a> {
    pub(super) fn new(supported_shaders: &'a [String], fallback_shader: &'a str) -> Self {
        Self {
            supported_shaders,
            fallback_shader,
            duplicates: HashMap::new(),
        }
    }

    pub(super) fn duplicated_count(&self) -> usize {
        self.duplicates.len()
    }

    fn is_supported(&self, shader: &str) -> bool {
        self.supported_shaders.iter().any(|supported| supported == shader)
    }

    /// Material to use in place of `original`.
    pub(super) fn remap(&mut self, graph: &mut SceneGraph, original: MaterialId) -> MaterialId {
        let Some(material) = graph.material(original) else {
            return original;
        };
        if self.is_supported(material.shader_name()) {
            return original;
        }
        if let Some(duplicate) = self.duplicates.get(&original) {
            return *duplicate;
        }

        let shader = self.destination_shader(material.shader_name());
        let mut duplicate = Material::new(material.name.clone(), shader);
        duplicate.render_queue = material.render_queue;
        duplicate.parameters = material.parameters.clone();
        log_debug!(
            "Duplicated material '{}': '{}' -> '{}'",
            material.name,
            material.shader_name(),
            shader
        );

        let duplicate = graph.add_material(duplicate);
        self.duplicates.insert(original, duplicate);
        duplicate
    }

    fn destination_shader(&self, shader: &str) -> &'a str {
        let lowered = shader.to_lowercase();
        if lowered.contains("unlit") {
            DESTINATION_UNLIT_SHADER
        } else if lowered.contains("toon") {
            DESTINATION_TOON_SHADER
        } else {
            log_warn!(
                "Shader '{}' has no mapping rule; using fallback '{}'",
                shader,
                self.fallback_shader
            );
            self.fallback_shader
        }
    }

    /// Remap every material slot of every renderer below `root`.
    pub(super) fn remap_renderers(&mut self, graph: &mut SceneGraph, root: NodeId) {
        for id in renderer_nodes(graph, root) {
            let slots = graph
                .node(id)
                .and_then(|node| node.renderer.as_ref())
                .map(|renderer| renderer.materials.clone())
                .unwrap_or_default();
            let remapped: Vec<MaterialId> =
                slots.into_iter().map(|slot| self.remap(graph, slot)).collect();
            if let Some(renderer) = graph.node_mut(id).and_then(|node| node.renderer.as_mut()) {
                renderer.materials = remapped;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::types::{DEFAULT_FALLBACK_SHADER, SUPPORTED_SHADERS};
    use crate::rig::{Renderer, fixtures};
    use nalgebra::Vector3;

    fn supported() -> Vec<String> {
        SUPPORTED_SHADERS.iter().map(|s| s.to_string()).collect()
    }

    fn add_renderer(graph: &mut SceneGraph, root: NodeId, name: &str, material: MaterialId) -> NodeId {
        let node = graph.add_node(name, Some(root));
        graph.node_mut(node).expect("node").renderer = Some(Renderer {
            mesh: fixtures::quad_mesh(name, Vector3::zeros()),
            materials: vec![material],
            skin: None,
        });
        node
    }

    fn materials_of(graph: &SceneGraph, node: NodeId) -> Vec<MaterialId> {
        graph
            .node(node)
            .and_then(|node| node.renderer.as_ref())
            .map(|renderer| renderer.materials.clone())
            .unwrap_or_default()
    }

    #[test]
    fn given_allow_listed_material_when_remapping_then_instance_is_shared() {
        let mut graph = SceneGraph::new();
        let root = graph.add_node("Avatar", None);
        let standard = graph.add_material(Material::new("Skin", "Standard"));
        let a = add_renderer(&mut graph, root, "A", standard);
        let b = add_renderer(&mut graph, root, "B", standard);
        let shaders = supported();
        let mut remapper = MaterialRemapper::new(&shaders, DEFAULT_FALLBACK_SHADER);

        remapper.remap_renderers(&mut graph, root);

        assert_eq!(materials_of(&graph, a), vec![standard]);
        assert_eq!(materials_of(&graph, b), vec![standard]);
        assert_eq!(remapper.duplicated_count(), 0);
        assert_eq!(graph.material_count(), 1);
    }

    #[test]
    fn given_shared_toon_material_when_remapping_then_one_duplicate_keeps_render_queue() {
        let mut graph = SceneGraph::new();
        let root = graph.add_node("Avatar", None);
        let toon = graph.add_material(Material::new("Cloth", "Custom/ToonLit"));
        graph.material_mut(toon).expect("toon").render_queue = 2450;
        let a = add_renderer(&mut graph, root, "A", toon);
        let b = add_renderer(&mut graph, root, "B", toon);
        let shaders = supported();
        let mut remapper = MaterialRemapper::new(&shaders, DEFAULT_FALLBACK_SHADER);

        remapper.remap_renderers(&mut graph, root);

        let duplicate = materials_of(&graph, a)[0];
        assert_ne!(duplicate, toon);
        assert_eq!(materials_of(&graph, b), vec![duplicate]);
        assert_eq!(remapper.duplicated_count(), 1);
        let material = graph.material(duplicate).expect("duplicate");
        assert_eq!(material.name, "Cloth");
        assert_eq!(material.render_queue, 2450);
        assert_eq!(material.shader_name(), DESTINATION_TOON_SHADER);
    }

    #[test]
    fn given_mixed_case_unlit_shader_when_remapping_then_unlit_wins_over_toon() {
        let mut graph = SceneGraph::new();
        let shaders = supported();
        let mut remapper = MaterialRemapper::new(&shaders, DEFAULT_FALLBACK_SHADER);
        let unlit_toon = graph.add_material(Material::new("Face", "Custom/ToonUNLIT"));

        let remapped = remapper.remap(&mut graph, unlit_toon);

        assert_eq!(
            graph.material(remapped).map(Material::shader_name),
            Some(DESTINATION_UNLIT_SHADER)
        );
    }

    #[test]
    fn given_unknown_shader_family_when_remapping_then_fallback_shader_is_assigned() {
        let mut graph = SceneGraph::new();
        let shaders = supported();
        let mut remapper = MaterialRemapper::new(&shaders, "Standard");
        let custom = graph.add_material(Material::new("Eyes", "Custom/Refraction"));

        let remapped = remapper.remap(&mut graph, custom);

        assert_eq!(
            graph.material(remapped).map(Material::shader_name),
            Some("Standard")
        );
    }
}
