// src/materials/material.rs
//! A bindable recipe: shaders per stage, named uniform values, named textures, blend mode.
//!
//! A `Material` owns no device memory. Its values are copied into each draw when the draw is
//! recorded, so later edits only affect later draws. Names that the bound shader does not
//! reflect are ignored.

use std::collections::HashMap;
use std::sync::Arc;

use glam::{Mat4, Vec4};
use parking_lot::RwLock;

use crate::error::ResourceError;
use crate::gpu::{TextureBinding, UniformBinding};
use crate::materials::AlphaBlend;
use crate::shader::{Shader, ShaderStage};
use crate::texture::{Texture, TextureBase};

#[derive(Default)]
struct MaterialState {
    vertex: Option<Arc<Shader>>,
    pixel: Option<Arc<Shader>>,
    compute: Option<Arc<Shader>>,
    vectors: HashMap<String, Vec4>,
    matrices: HashMap<String, Mat4>,
    textures: HashMap<String, TextureBase>,
    alpha_blend: AlphaBlend,
}

impl MaterialState {
    fn slot(&mut self, stage: ShaderStage) -> &mut Option<Arc<Shader>> {
        match stage {
            ShaderStage::Vertex => &mut self.vertex,
            ShaderStage::Pixel => &mut self.pixel,
            ShaderStage::Compute => &mut self.compute,
        }
    }
}

#[derive(Default)]
pub struct Material {
    state: RwLock<MaterialState>,
}

impl Material {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for the common "one pixel shader" material.
    pub fn with_pixel_shader(shader: Arc<Shader>) -> Self {
        let material = Self::new();
        material.set_shader(shader);
        material
    }

    /// Binds `shader` to the stage it was compiled for.
    pub fn set_shader(&self, shader: Arc<Shader>) {
        let stage = shader.stage();
        *self.state.write().slot(stage) = Some(shader);
    }

    pub fn remove_shader(&self, stage: ShaderStage) {
        *self.state.write().slot(stage) = None;
    }

    pub fn shader(&self, stage: ShaderStage) -> Option<Arc<Shader>> {
        let state = self.state.read();
        match stage {
            ShaderStage::Vertex => state.vertex.clone(),
            ShaderStage::Pixel => state.pixel.clone(),
            ShaderStage::Compute => state.compute.clone(),
        }
    }

    pub fn set_vector4(&self, name: &str, value: Vec4) {
        self.state.write().vectors.insert(name.to_string(), value);
    }

    pub fn vector4(&self, name: &str) -> Option<Vec4> {
        self.state.read().vectors.get(name).copied()
    }

    pub fn set_matrix44(&self, name: &str, value: Mat4) {
        self.state.write().matrices.insert(name.to_string(), value);
    }

    pub fn matrix44(&self, name: &str) -> Option<Mat4> {
        self.state.read().matrices.get(name).copied()
    }

    pub fn set_texture(&self, name: &str, texture: impl Into<TextureBase>) {
        self.state.write().textures.insert(name.to_string(), texture.into());
    }

    pub fn remove_texture(&self, name: &str) -> Option<TextureBase> {
        self.state.write().textures.remove(name)
    }

    pub fn texture(&self, name: &str) -> Option<TextureBase> {
        self.state.read().textures.get(name).cloned()
    }

    pub fn set_alpha_blend(&self, blend: AlphaBlend) {
        self.state.write().alpha_blend = blend;
    }

    pub fn alpha_blend(&self) -> AlphaBlend {
        self.state.read().alpha_blend
    }

    /// Lays out every uniform buffer `shader` declares. Members without a value stay zero.
    /// `overrides` take precedence over the material's own values for this one packing.
    pub(crate) fn uniform_bindings(&self, shader: &Shader, overrides: &[(&str, Vec4)]) -> Vec<UniformBinding> {
        let state = self.state.read();
        shader
            .reflection()
            .uniform_buffers
            .iter()
            .map(|buffer| {
                let mut data = vec![0u8; buffer.size as usize];
                for member in &buffer.members {
                    let vector = overrides
                        .iter()
                        .find(|(name, _)| *name == member.name)
                        .map(|(_, v)| v)
                        .or_else(|| state.vectors.get(&member.name));
                    let bytes: Option<Vec<u8>> = if let Some(v) = vector {
                        Some(bytemuck::cast_slice::<f32, u8>(&v.to_array()).to_vec())
                    } else {
                        state
                            .matrices
                            .get(&member.name)
                            .map(|m| bytemuck::cast_slice::<f32, u8>(&m.to_cols_array()).to_vec())
                    };
                    if let Some(bytes) = bytes {
                        let start = member.offset as usize;
                        let len = bytes.len().min(member.size as usize).min(data.len().saturating_sub(start));
                        data[start..start + len].copy_from_slice(&bytes[..len]);
                    }
                }
                UniformBinding {
                    stage: shader.stage(),
                    group: buffer.group,
                    binding: buffer.binding,
                    data,
                }
            })
            .collect()
    }

    /// Resolves every texture `shader` samples.
    ///
    /// Slot 0 takes `primary` when given (the drawable's own texture), otherwise the material's
    /// texture of the same name. Anything still unbound samples `fallback`. A stale render
    /// texture fails the whole resolution.
    pub(crate) fn texture_bindings(
        &self,
        shader: &Shader,
        primary: Option<&TextureBase>,
        fallback: &TextureBase,
    ) -> Result<Vec<TextureBinding>, ResourceError> {
        let state = self.state.read();
        let reflection = shader.reflection();
        reflection
            .textures
            .iter()
            .map(|slot| {
                let texture = match (slot.slot, primary) {
                    (0, Some(primary)) => primary,
                    _ => state.textures.get(&slot.name).unwrap_or(fallback),
                };
                Ok(TextureBinding {
                    group: slot.group,
                    binding: slot.binding,
                    texture: texture.gpu_texture()?,
                    sampler_binding: reflection.sampler_for_slot(slot.slot).map(|s| (s.group, s.binding)),
                    sampler: texture.sampler_state(),
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for Material {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Material")
            .field("vertex", &state.vertex.as_ref().map(|s| s.name().to_string()))
            .field("pixel", &state.pixel.as_ref().map(|s| s.name().to_string()))
            .field("vectors", &state.vectors.len())
            .field("textures", &state.textures.len())
            .field("alpha_blend", &state.alpha_blend)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builtin_shader::{BuiltinShaderType, BuiltinShaders};
    use crate::gpu::software::SoftwareDevice;
    use crate::gpu::GraphicsDevice;
    use crate::shader_compiler::ShaderCompiler;
    use crate::texture::{RenderTexture, Texture2D, TextureFormat};

    fn setup() -> (Arc<dyn GraphicsDevice>, BuiltinShaders) {
        let device: Arc<dyn GraphicsDevice> = Arc::new(SoftwareDevice::new(8, 8));
        let builtins = BuiltinShaders::new(Arc::new(ShaderCompiler::new(Arc::clone(&device))));
        (device, builtins)
    }

    #[test]
    fn unknown_keys_are_ignored() {
        let (_device, builtins) = setup();
        let font = builtins.create(BuiltinShaderType::FontUnlitPS).unwrap();
        let material = Material::with_pixel_shader(Arc::clone(&font));
        material.set_vector4("weight", Vec4::new(0.25, 0.0, 0.0, 0.0));
        material.set_vector4("doesNotExist", Vec4::ONE);
        material.set_matrix44("alsoMissing", Mat4::IDENTITY);

        let uniforms = material.uniform_bindings(&font, &[]);
        assert_eq!(uniforms.len(), 1);
        assert_eq!((uniforms[0].group, uniforms[0].binding), (1, 0));
        let expected: Vec<u8> = [0.25f32, 0.0, 0.0, 0.0].iter().flat_map(|v| v.to_le_bytes()).collect();
        assert_eq!(&uniforms[0].data[..16], expected.as_slice());
    }

    #[test]
    fn values_are_snapshotted() {
        let (_device, builtins) = setup();
        let font = builtins.create(BuiltinShaderType::FontUnlitPS).unwrap();
        let material = Material::with_pixel_shader(Arc::clone(&font));
        material.set_vector4("weight", Vec4::splat(1.0));
        let before = material.uniform_bindings(&font, &[]);
        material.set_vector4("weight", Vec4::splat(2.0));
        let after = material.uniform_bindings(&font, &[]);
        assert_ne!(before[0].data, after[0].data);
    }

    #[test]
    fn overrides_win_without_touching_the_material() {
        let (_device, builtins) = setup();
        let font = builtins.create(BuiltinShaderType::FontUnlitPS).unwrap();
        let material = Material::with_pixel_shader(Arc::clone(&font));
        material.set_vector4("weight", Vec4::new(0.7, 0.0, 0.0, 0.0));

        let uniforms = material.uniform_bindings(&font, &[("weight", Vec4::new(0.2, 0.0, 0.0, 0.0))]);
        assert_eq!(&uniforms[0].data[..4], &0.2f32.to_le_bytes());
        assert_eq!(material.vector4("weight"), Some(Vec4::new(0.7, 0.0, 0.0, 0.0)));
    }

    #[test]
    fn texture_resolution_order() {
        let (device, builtins) = setup();
        let mix = builtins.create(BuiltinShaderType::TextureMix).unwrap();
        let white: TextureBase = Texture2D::white(&device).unwrap().into();
        let sprite: TextureBase = Texture2D::white(&device).unwrap().into();
        let sub: TextureBase = Texture2D::white(&device).unwrap().into();

        let material = Material::with_pixel_shader(Arc::clone(&mix));
        material.set_texture("subTex", sub.clone());

        let bindings = material.texture_bindings(&mix, Some(&sprite), &white).unwrap();
        assert_eq!(bindings.len(), 2);
        assert_eq!(bindings[0].texture, sprite.gpu_texture().unwrap());
        assert_eq!(bindings[0].sampler_binding, Some((0, 1)));
        assert_eq!(bindings[1].texture, sub.gpu_texture().unwrap());
        assert_eq!(bindings[1].sampler_binding, Some((0, 3)));

        material.remove_texture("subTex");
        let bindings = material.texture_bindings(&mix, None, &white).unwrap();
        assert!(bindings.iter().all(|b| b.texture == white.gpu_texture().unwrap()));
    }

    #[test]
    fn stale_screen_texture_fails_resolution() {
        let (device, builtins) = setup();
        let sprite_ps = builtins.create(BuiltinShaderType::SpriteUnlitPS).unwrap();
        let generation = Arc::new(std::sync::atomic::AtomicU64::new(0));
        let (gpu, w, h, format) = device.screen().unwrap();
        let screen = RenderTexture::wrap_screen(&device, gpu, glam::UVec2::new(w, h), format, &generation);
        generation.store(1, std::sync::atomic::Ordering::Release);

        let white: TextureBase = Texture2D::white(&device).unwrap().into();
        let material = Material::with_pixel_shader(Arc::clone(&sprite_ps));
        let primary = TextureBase::from(screen);
        assert!(matches!(
            material.texture_bindings(&sprite_ps, Some(&primary), &white),
            Err(ResourceError::Stale)
        ));
        let fresh = TextureBase::from(RenderTexture::create(&device, 2, 2, TextureFormat::R8G8B8A8Unorm).unwrap());
        assert!(material.texture_bindings(&sprite_ps, Some(&fresh), &white).is_ok());
    }

    #[test]
    fn shader_slots_follow_stage() {
        let (_device, builtins) = setup();
        let material = Material::new();
        material.set_shader(builtins.create(BuiltinShaderType::SpriteUnlitVS).unwrap());
        assert!(material.shader(ShaderStage::Vertex).is_some());
        assert!(material.shader(ShaderStage::Pixel).is_none());
        material.remove_shader(ShaderStage::Vertex);
        assert!(material.shader(ShaderStage::Vertex).is_none());
        assert_eq!(material.alpha_blend(), AlphaBlend::normal());
    }
}
