// src/shader.rs
//! Compiled shader objects and their reflection data.
//!
//! A [`Shader`] is immutable and only ever built by the shader compiler. It bundles the source it
//! was compiled from, the native code handed to the device, the device handle and the bindings
//! recovered from the IR. Binding names match the source identifiers exactly.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::gpu::{GpuShader, GraphicsDevice, ShaderTarget};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShaderStage {
    Vertex,
    Pixel,
    Compute,
}

impl ShaderStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Pixel => "pixel",
            ShaderStage::Compute => "compute",
        }
    }

    pub(crate) fn to_naga(self) -> naga::ShaderStage {
        match self {
            ShaderStage::Vertex => naga::ShaderStage::Vertex,
            ShaderStage::Pixel => naga::ShaderStage::Fragment,
            ShaderStage::Compute => naga::ShaderStage::Compute,
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------- Reflection ----------

/// A sampled texture. `slot` is the position among the shader's textures, ordered by
/// `(group, binding)`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderReflectionTexture {
    pub name: String,
    pub slot: u32,
    pub group: u32,
    pub binding: u32,
}

/// A sampler. Sampler slot `i` pairs with texture slot `i`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderReflectionSampler {
    pub name: String,
    pub slot: u32,
    pub group: u32,
    pub binding: u32,
}

/// One named value inside a uniform buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ShaderReflectionUniform {
    pub name: String,
    pub offset: u32,
    pub size: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UniformBufferLayout {
    pub name: String,
    pub group: u32,
    pub binding: u32,
    pub size: u32,
    pub members: Vec<ShaderReflectionUniform>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    pub textures: Vec<ShaderReflectionTexture>,
    pub samplers: Vec<ShaderReflectionSampler>,
    pub uniform_buffers: Vec<UniformBufferLayout>,
    /// Workgroup size; `[0, 0, 0]` outside compute.
    pub num_threads: [u32; 3],
}

impl ShaderReflection {
    pub fn texture(&self, name: &str) -> Option<&ShaderReflectionTexture> {
        self.textures.iter().find(|t| t.name == name)
    }

    pub fn sampler_for_slot(&self, slot: u32) -> Option<&ShaderReflectionSampler> {
        self.samplers.iter().find(|s| s.slot == slot)
    }

    /// Finds a uniform by member name across every buffer.
    pub fn uniform(&self, name: &str) -> Option<(&UniformBufferLayout, &ShaderReflectionUniform)> {
        self.uniform_buffers
            .iter()
            .find_map(|buffer| buffer.members.iter().find(|m| m.name == name).map(|m| (buffer, m)))
    }
}

// ---------- Shader ----------

pub struct Shader {
    name: String,
    stage: ShaderStage,
    entry_point: String,
    code: String,
    native_code: String,
    target: ShaderTarget,
    reflection: ShaderReflection,
    gpu: GpuShader,
    device: Arc<dyn GraphicsDevice>,
}

impl Shader {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        stage: ShaderStage,
        entry_point: String,
        code: String,
        native_code: String,
        target: ShaderTarget,
        reflection: ShaderReflection,
        gpu: GpuShader,
        device: Arc<dyn GraphicsDevice>,
    ) -> Self {
        Self {
            name,
            stage,
            entry_point,
            code,
            native_code,
            target,
            reflection,
            gpu,
            device,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// WGSL the shader was compiled from.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Transpiled code in [`Shader::target`]'s language.
    pub fn native_code(&self) -> &str {
        &self.native_code
    }

    pub fn target(&self) -> ShaderTarget {
        self.target
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    pub(crate) fn gpu(&self) -> GpuShader {
        self.gpu
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        self.device.destroy_shader(self.gpu);
    }
}

impl fmt::Debug for Shader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shader")
            .field("name", &self.name)
            .field("stage", &self.stage)
            .field("target", &self.target)
            .field("gpu", &self.gpu)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reflection() -> ShaderReflection {
        ShaderReflection {
            textures: vec![ShaderReflectionTexture {
                name: "mainTex".into(),
                slot: 0,
                group: 0,
                binding: 0,
            }],
            samplers: vec![ShaderReflectionSampler {
                name: "mainSamp".into(),
                slot: 0,
                group: 0,
                binding: 1,
            }],
            uniform_buffers: vec![UniformBufferLayout {
                name: "consts".into(),
                group: 1,
                binding: 0,
                size: 32,
                members: vec![
                    ShaderReflectionUniform {
                        name: "weight".into(),
                        offset: 0,
                        size: 16,
                    },
                    ShaderReflectionUniform {
                        name: "tint".into(),
                        offset: 16,
                        size: 16,
                    },
                ],
            }],
            num_threads: [0; 3],
        }
    }

    #[test]
    fn lookups_are_case_sensitive() {
        let r = reflection();
        assert!(r.texture("mainTex").is_some());
        assert!(r.texture("maintex").is_none());
        assert_eq!(r.sampler_for_slot(0).map(|s| s.binding), Some(1));
    }

    #[test]
    fn uniform_lookup_reports_buffer_and_offset() {
        let r = reflection();
        let (buffer, member) = r.uniform("tint").unwrap();
        assert_eq!((buffer.group, buffer.binding), (1, 0));
        assert_eq!((member.offset, member.size), (16, 16));
        assert!(r.uniform("missing").is_none());
    }
}
