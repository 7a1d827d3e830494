use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Handle of a material inside a [`super::SceneGraph`]. Two renderers share a
/// material exactly when they hold the same handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TextureId(pub usize);

/// Default render queue of opaque geometry.
pub const RENDER_QUEUE_GEOMETRY: i32 = 2000;

fn default_render_queue() -> i32 {
    RENDER_QUEUE_GEOMETRY
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value")]
pub enum MaterialParameter {
    Float(f32),
    Color([f32; 4]),
    Texture(TextureId),
    Keyword(bool),
}

/// Shader reference, render queue and parameter set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Material {
    pub name: String,
    /// Shader identifier; `None` when no destination shader could be chosen.
    pub shader: Option<String>,
    #[serde(default = "default_render_queue")]
    pub render_queue: i32,
    #[serde(default)]
    pub parameters: BTreeMap<String, MaterialParameter>,
}

impl Material {
    pub fn new(name: impl Into<String>, shader: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            shader: Some(shader.into()),
            render_queue: RENDER_QUEUE_GEOMETRY,
            parameters: BTreeMap::new(),
        }
    }

    pub fn shader_name(&self) -> &str {
        self.shader.as_deref().unwrap_or_default()
    }

    pub fn color(&self, key: &str) -> Option<[f32; 4]> {
        match self.parameters.get(key) {
            Some(MaterialParameter::Color(color)) => Some(*color),
            _ => None,
        }
    }

    pub fn float(&self, key: &str) -> Option<f32> {
        match self.parameters.get(key) {
            Some(MaterialParameter::Float(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn texture(&self, key: &str) -> Option<TextureId> {
        match self.parameters.get(key) {
            Some(MaterialParameter::Texture(texture)) => Some(*texture),
            _ => None,
        }
    }
}

/// Encoded image referenced by materials.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Texture {
    pub name: String,
    /// Encoded bytes (PNG or JPEG).
    pub data: Vec<u8>,
}
