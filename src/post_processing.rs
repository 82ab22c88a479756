// src/post_processing.rs
// Fullscreen post effects recorded through the command list.
//
// Public API:
// - PostEffect::new(builtins, options)
// - effect.gray_scale / sepia / downsample / high_luminance (src -> dst)
// - effect.gaussian_blur(src, tmp, dst), two separable passes
// - effect.texture_mix(a, b, dst, ratio)
// - effect.light_bloom(src, targets, dst), high luminance + blur + additive mix
// - BloomTargets::new(device, size, format)
//
// Every pass replaces the destination (opacity blend). Source and destination must differ.

use std::sync::Arc;

use glam::{UVec2, Vec4};

use crate::builtin_shader::{BuiltinShaderType, BuiltinShaders};
use crate::camera::RenderPassParameter;
use crate::command_list::CommandList;
use crate::error::{CommandListError, ResourceError, Result};
use crate::gpu::GraphicsDevice;
use crate::materials::{AlphaBlend, Material};
use crate::texture::{RenderTexture, Texture, TextureFormat};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct PostOptions {
    /// Luminance above which pixels feed the bloom.
    pub bloom_threshold: f32,
    pub bloom_intensity: f32,
    /// Blur tap spacing in texels.
    pub blur_scale: f32,
}

impl Default for PostOptions {
    fn default() -> Self {
        Self {
            bloom_threshold: 0.7,
            bloom_intensity: 1.0,
            blur_scale: 1.0,
        }
    }
}

/// Intermediate targets for [`PostEffect::light_bloom`], at half resolution.
pub struct BloomTargets {
    pub bright: RenderTexture,
    pub blur_tmp: RenderTexture,
    pub blurred: RenderTexture,
}

impl BloomTargets {
    pub fn new(device: &Arc<dyn GraphicsDevice>, size: UVec2, format: TextureFormat) -> std::result::Result<Self, ResourceError> {
        let half = (size / 2).max(UVec2::ONE);
        Ok(Self {
            bright: RenderTexture::create(device, half.x, half.y, format)?,
            blur_tmp: RenderTexture::create(device, half.x, half.y, format)?,
            blurred: RenderTexture::create(device, half.x, half.y, format)?,
        })
    }
}

pub struct PostEffect {
    options: PostOptions,
    gray_scale: Material,
    sepia: Material,
    downsample: Material,
    gaussian_blur: Material,
    high_luminance: Material,
    light_bloom: Material,
    texture_mix: Material,
}

fn effect_material(builtins: &BuiltinShaders, ty: BuiltinShaderType) -> Result<Material> {
    let material = Material::with_pixel_shader(builtins.create(ty)?);
    material.set_alpha_blend(AlphaBlend::opacity());
    Ok(material)
}

impl PostEffect {
    pub fn new(builtins: &BuiltinShaders, options: PostOptions) -> Result<Self> {
        Ok(Self {
            options,
            gray_scale: effect_material(builtins, BuiltinShaderType::GrayScale)?,
            sepia: effect_material(builtins, BuiltinShaderType::Sepia)?,
            downsample: effect_material(builtins, BuiltinShaderType::Downsample)?,
            gaussian_blur: effect_material(builtins, BuiltinShaderType::GaussianBlur)?,
            high_luminance: effect_material(builtins, BuiltinShaderType::HighLuminance)?,
            light_bloom: effect_material(builtins, BuiltinShaderType::LightBloom)?,
            texture_mix: effect_material(builtins, BuiltinShaderType::TextureMix)?,
        })
    }

    pub fn options(&self) -> PostOptions {
        self.options
    }

    pub fn set_options(&mut self, options: PostOptions) {
        self.options = options;
    }

    fn pass(
        cmd: &mut CommandList,
        material: &Material,
        src: &RenderTexture,
        dst: &RenderTexture,
    ) -> std::result::Result<(), CommandListError> {
        if src.ptr_eq(dst) {
            return Err(CommandListError::TargetIsSource);
        }
        material.set_texture("mainTex", src);
        cmd.render_to_render_texture(material, dst, &RenderPassParameter::load())
    }

    pub fn gray_scale(&self, cmd: &mut CommandList, src: &RenderTexture, dst: &RenderTexture) -> std::result::Result<(), CommandListError> {
        Self::pass(cmd, &self.gray_scale, src, dst)
    }

    pub fn sepia(&self, cmd: &mut CommandList, src: &RenderTexture, dst: &RenderTexture) -> std::result::Result<(), CommandListError> {
        Self::pass(cmd, &self.sepia, src, dst)
    }

    /// 2×2 box filter; `dst` is normally half the size of `src`.
    pub fn downsample(&self, cmd: &mut CommandList, src: &RenderTexture, dst: &RenderTexture) -> std::result::Result<(), CommandListError> {
        let texel = src.size().as_vec2().recip();
        self.downsample.set_vector4("texelSize", Vec4::new(texel.x, texel.y, 0.0, 0.0));
        Self::pass(cmd, &self.downsample, src, dst)
    }

    pub fn high_luminance(&self, cmd: &mut CommandList, src: &RenderTexture, dst: &RenderTexture) -> std::result::Result<(), CommandListError> {
        self.high_luminance
            .set_vector4("threshold", Vec4::new(self.options.bloom_threshold, 0.0, 0.0, 0.0));
        Self::pass(cmd, &self.high_luminance, src, dst)
    }

    /// Horizontal pass into `tmp`, vertical pass into `dst`.
    pub fn gaussian_blur(
        &self,
        cmd: &mut CommandList,
        src: &RenderTexture,
        tmp: &RenderTexture,
        dst: &RenderTexture,
    ) -> std::result::Result<(), CommandListError> {
        let texel = src.size().as_vec2().recip() * self.options.blur_scale;
        self.gaussian_blur.set_vector4("direction", Vec4::new(texel.x, 0.0, 0.0, 0.0));
        Self::pass(cmd, &self.gaussian_blur, src, tmp)?;
        let texel = tmp.size().as_vec2().recip() * self.options.blur_scale;
        self.gaussian_blur.set_vector4("direction", Vec4::new(0.0, texel.y, 0.0, 0.0));
        Self::pass(cmd, &self.gaussian_blur, tmp, dst)
    }

    /// `mix(a, b, ratio)` per pixel.
    pub fn texture_mix(
        &self,
        cmd: &mut CommandList,
        a: &RenderTexture,
        b: &RenderTexture,
        dst: &RenderTexture,
        ratio: f32,
    ) -> std::result::Result<(), CommandListError> {
        if b.ptr_eq(dst) {
            return Err(CommandListError::TargetIsSource);
        }
        self.texture_mix.set_texture("subTex", b);
        self.texture_mix.set_vector4("mixRatio", Vec4::new(ratio, 0.0, 0.0, 0.0));
        Self::pass(cmd, &self.texture_mix, a, dst)
    }

    pub fn light_bloom(
        &self,
        cmd: &mut CommandList,
        src: &RenderTexture,
        targets: &BloomTargets,
        dst: &RenderTexture,
    ) -> std::result::Result<(), CommandListError> {
        self.high_luminance(cmd, src, &targets.bright)?;
        self.gaussian_blur(cmd, &targets.bright, &targets.blur_tmp, &targets.blurred)?;
        if targets.blurred.ptr_eq(dst) {
            return Err(CommandListError::TargetIsSource);
        }
        self.light_bloom.set_texture("bloomTex", &targets.blurred);
        self.light_bloom
            .set_vector4("intensity", Vec4::new(self.options.bloom_intensity, 0.0, 0.0, 0.0));
        Self::pass(cmd, &self.light_bloom, src, dst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDevice;
    use crate::gpu::DeviceCommand;
    use crate::math::Color;
    use crate::shader_compiler::ShaderCompiler;
    use crate::texture::{Texture2D, TextureBase};
    use std::sync::atomic::AtomicU64;

    struct Fixture {
        device: Arc<dyn GraphicsDevice>,
        effect: PostEffect,
        cmd: CommandList,
    }

    fn fixture() -> Fixture {
        let device: Arc<dyn GraphicsDevice> = Arc::new(SoftwareDevice::new(16, 16));
        let builtins = BuiltinShaders::new(Arc::new(ShaderCompiler::new(Arc::clone(&device))));
        let (gpu, w, h, format) = device.screen().unwrap();
        let screen = RenderTexture::wrap_screen(&device, gpu, UVec2::new(w, h), format, &Arc::new(AtomicU64::new(0)));
        let white: TextureBase = Texture2D::white(&device).unwrap().into();
        let cmd = CommandList::new(screen, builtins.create(BuiltinShaderType::SpriteUnlitVS).unwrap(), white);
        let effect = PostEffect::new(&builtins, PostOptions::default()).unwrap();
        Fixture { device, effect, cmd }
    }

    fn rt(device: &Arc<dyn GraphicsDevice>, w: u32, h: u32) -> RenderTexture {
        RenderTexture::create(device, w, h, TextureFormat::R8G8B8A8Unorm).unwrap()
    }

    fn draws(cmd: &CommandList) -> Vec<&crate::gpu::DrawCommand> {
        cmd.commands()
            .iter()
            .filter_map(|c| match c {
                DeviceCommand::Draw(d) => Some(d),
                _ => None,
            })
            .collect()
    }

    fn first_f32(data: &[u8]) -> f32 {
        f32::from_le_bytes([data[0], data[1], data[2], data[3]])
    }

    #[test]
    fn blur_records_two_passes_with_their_own_directions() {
        let mut f = fixture();
        let (src, tmp, dst) = (rt(&f.device, 8, 8), rt(&f.device, 8, 8), rt(&f.device, 8, 8));
        f.effect.gaussian_blur(&mut f.cmd, &src, &tmp, &dst).unwrap();

        let draws = draws(&f.cmd);
        assert_eq!(draws.len(), 2);
        let horizontal = &draws[0].uniforms[0].data;
        let vertical = &draws[1].uniforms[0].data;
        assert_eq!(first_f32(horizontal), 0.125);
        assert_eq!(first_f32(vertical), 0.0);
        assert!(f.cmd.render_target().unwrap().ptr_eq(&dst));
    }

    #[test]
    fn light_bloom_runs_four_passes() {
        let mut f = fixture();
        let src = rt(&f.device, 16, 16);
        let dst = rt(&f.device, 16, 16);
        let targets = BloomTargets::new(&f.device, UVec2::new(16, 16), TextureFormat::R8G8B8A8Unorm).unwrap();
        assert_eq!(targets.bright.size(), UVec2::new(8, 8));

        f.effect.light_bloom(&mut f.cmd, &src, &targets, &dst).unwrap();
        let draws = draws(&f.cmd);
        assert_eq!(draws.len(), 4);
        // mainTex and bloomTex
        assert_eq!(draws[3].textures.len(), 2);
    }

    #[test]
    fn same_source_and_destination_is_rejected() {
        let mut f = fixture();
        let t = rt(&f.device, 4, 4);
        assert_eq!(f.effect.sepia(&mut f.cmd, &t, &t), Err(CommandListError::TargetIsSource));
        assert!(f.cmd.commands().is_empty());
    }

    #[test]
    fn downsample_writes_half_size_target() {
        let mut f = fixture();
        let src = rt(&f.device, 8, 8);
        let dst = rt(&f.device, 4, 4);
        f.cmd
            .set_render_target(&src, &RenderPassParameter::clear(Color::rgba(0, 128, 0, 255)))
            .unwrap();
        f.effect.downsample(&mut f.cmd, &src, &dst).unwrap();
        let submission = f.cmd.finish().unwrap();
        f.device.submit(&submission).unwrap();

        let pixels = dst.read_pixels().unwrap();
        assert_eq!(pixels.len(), 4 * 4 * 4);
        assert!(pixels.chunks_exact(4).all(|p| p == [0, 128, 0, 255]));
    }

    #[test]
    fn options_feed_uniforms() {
        let mut f = fixture();
        f.effect.set_options(PostOptions {
            bloom_threshold: 0.25,
            ..PostOptions::default()
        });
        let (src, dst) = (rt(&f.device, 4, 4), rt(&f.device, 4, 4));
        f.effect.high_luminance(&mut f.cmd, &src, &dst).unwrap();
        f.effect.texture_mix(&mut f.cmd, &src, &dst, &rt(&f.device, 4, 4), 0.5).unwrap();
        let draws = draws(&f.cmd);
        assert_eq!(first_f32(&draws[0].uniforms[0].data), 0.25);
        assert_eq!(first_f32(&draws[1].uniforms[0].data), 0.5);
    }
}
