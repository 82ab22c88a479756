// src/renderer.rs
//! Sprite/polygon/text batcher.
//!
//! Drawables queued with `draw_*` are kept in call order, tagged with the camera current at
//! queue time. [`Renderer::render`] walks each camera segment, keeps what the culling system
//! reports visible, expands it into pieces and merges neighbours sharing texture, material
//! and blend into one draw. Vertices are transformed on the CPU all the way to clip space.

use std::sync::Arc;

use glam::Vec4;

use crate::builtin_shader::{BuiltinShaderType, BuiltinShaders};
use crate::camera::{pixel_projection, RenderPassParameter, RenderedCamera};
use crate::command_list::{CommandList, DrawBatch};
use crate::culling::CullingSystem;
use crate::error::Result;
use crate::logging::{LogOnce, GRAPHICS};
use crate::materials::{AlphaBlend, Material};
use crate::math::BatchVertex;
use crate::rendered::{transform_vertices, MaterialRole, Piece, Rendered, RenderedPolygon, RenderedSprite, RenderedText};
use crate::shader::{Shader, ShaderStage};
use crate::texture::{RenderTexture, Texture, TextureBase};

/// Counters for the last [`Renderer::render`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderStats {
    pub draw_calls: usize,
    pub vertices: usize,
    pub culled: usize,
    /// Runs dropped because of a stale texture or an unusable material.
    pub skipped_runs: usize,
}

struct DrawEntry {
    rendered: Rendered,
    camera: RenderedCamera,
}

/// A piece with its defaults filled in, in clip space.
struct Resolved {
    texture: TextureBase,
    material: Arc<Material>,
    blend: AlphaBlend,
    weight: Option<f32>,
    vertices: Vec<BatchVertex>,
    indices: Vec<u32>,
}

impl Resolved {
    fn batches_with(&self, other: &Resolved) -> bool {
        self.texture.id() == other.texture.id()
            && Arc::ptr_eq(&self.material, &other.material)
            && self.blend == other.blend
            && self.weight.map(f32::to_bits) == other.weight.map(f32::to_bits)
    }
}

pub struct Renderer {
    white: TextureBase,
    sprite_vs: Arc<Shader>,
    sprite_material: Arc<Material>,
    glyph_material: Arc<Material>,
    camera: RenderedCamera,
    entries: Vec<DrawEntry>,
    warned: LogOnce,
    stats: RenderStats,
}

impl Renderer {
    pub fn new(builtins: &BuiltinShaders, white: impl Into<TextureBase>) -> Result<Self> {
        let sprite_vs = builtins.create(BuiltinShaderType::SpriteUnlitVS)?;

        let sprite_material = Material::new();
        sprite_material.set_shader(Arc::clone(&sprite_vs));
        sprite_material.set_shader(builtins.create(BuiltinShaderType::SpriteUnlitPS)?);

        let glyph_material = Material::new();
        glyph_material.set_shader(Arc::clone(&sprite_vs));
        glyph_material.set_shader(builtins.create(BuiltinShaderType::FontUnlitPS)?);

        Ok(Self {
            white: white.into(),
            sprite_vs,
            sprite_material: Arc::new(sprite_material),
            glyph_material: Arc::new(glyph_material),
            camera: RenderedCamera::create(),
            entries: Vec::new(),
            warned: LogOnce::new(256),
            stats: RenderStats::default(),
        })
    }

    /// Material used by sprites, polygons and image glyphs without their own.
    pub fn default_sprite_material(&self) -> &Arc<Material> {
        &self.sprite_material
    }

    /// Material used by atlas glyphs without their own.
    pub fn default_glyph_material(&self) -> &Arc<Material> {
        &self.glyph_material
    }

    pub fn white_texture(&self) -> &TextureBase {
        &self.white
    }

    pub fn draw_sprite(&mut self, sprite: &RenderedSprite) {
        self.push(sprite.into());
    }

    pub fn draw_polygon(&mut self, polygon: &RenderedPolygon) {
        self.push(polygon.into());
    }

    pub fn draw_text(&mut self, text: &RenderedText) {
        self.push(text.into());
    }

    pub fn draw(&mut self, rendered: &Rendered) {
        self.push(rendered.clone());
    }

    fn push(&mut self, rendered: Rendered) {
        self.entries.push(DrawEntry {
            rendered,
            camera: self.camera.clone(),
        });
    }

    pub fn set_camera(&mut self, camera: &RenderedCamera) {
        self.camera = camera.clone();
    }

    /// Back to an identity camera drawing into the bound target.
    pub fn reset_camera(&mut self) {
        self.camera = RenderedCamera::create();
    }

    pub fn camera(&self) -> &RenderedCamera {
        &self.camera
    }

    pub fn queued_count(&self) -> usize {
        self.entries.len()
    }

    pub fn stats(&self) -> RenderStats {
        self.stats
    }

    /// Drops queued drawables without recording them.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Records every queued drawable into `cmd` and empties the queue.
    pub fn render(&mut self, cmd: &mut CommandList, culling: &mut CullingSystem) -> RenderStats {
        let entries = std::mem::take(&mut self.entries);
        self.stats = RenderStats::default();

        for segment in entries.chunk_by(|a, b| a.camera.ptr_eq(&b.camera)) {
            let camera = &segment[0].camera;
            let previous = cmd.render_target().cloned();

            let target = match camera.target_texture() {
                Some(target) => match cmd.set_render_target(&target, &camera.render_pass_parameter()) {
                    Ok(()) => target,
                    Err(e) => {
                        self.warned.warn(GRAPHICS, "camera target", format!("camera target rejected: {e}"));
                        self.stats.skipped_runs += 1;
                        continue;
                    }
                },
                None => match &previous {
                    Some(target) => target.clone(),
                    None => {
                        self.warned.warn(GRAPHICS, "no target", "render called without a bound render target");
                        self.stats.skipped_runs += 1;
                        continue;
                    }
                },
            };

            self.render_segment(cmd, culling, camera, &target, segment);

            if camera.target_texture().is_some() {
                if let Some(previous) = previous {
                    if let Err(e) = cmd.set_render_target(&previous, &RenderPassParameter::load()) {
                        self.warned.warn(GRAPHICS, "restore target", format!("could not restore render target: {e}"));
                    }
                }
            }
        }

        log::trace!(
            target: GRAPHICS,
            "rendered {} draw calls, {} vertices, {} culled",
            self.stats.draw_calls,
            self.stats.vertices,
            self.stats.culled
        );
        self.stats
    }

    fn render_segment(
        &mut self,
        cmd: &mut CommandList,
        culling: &mut CullingSystem,
        camera: &RenderedCamera,
        target: &RenderTexture,
        segment: &[DrawEntry],
    ) {
        let size = target.size();
        for entry in segment {
            culling.register(&entry.rendered);
        }
        culling.cull(camera.view_bounds(size));

        let view_proj = pixel_projection(size) * camera.view_matrix();
        let mut resolved = Vec::new();
        for entry in segment {
            if !culling.is_drawing(entry.rendered.id()) {
                self.stats.culled += 1;
                continue;
            }
            let world = view_proj * entry.rendered.transform();
            let blend = entry.rendered.alpha_blend();
            for piece in entry.rendered.pieces() {
                resolved.push(self.resolve(piece, &world, blend));
            }
        }

        let mut start = 0;
        while start < resolved.len() {
            let mut end = start + 1;
            while end < resolved.len() && resolved[start].batches_with(&resolved[end]) {
                end += 1;
            }
            self.flush(cmd, &resolved[start..end]);
            start = end;
        }
    }

    fn resolve(&self, piece: Piece, world: &glam::Mat4, blend: Option<AlphaBlend>) -> Resolved {
        let material = piece.material.unwrap_or_else(|| match piece.role {
            MaterialRole::Glyph => Arc::clone(&self.glyph_material),
            MaterialRole::Sprite | MaterialRole::Image => Arc::clone(&self.sprite_material),
        });
        let mut vertices = piece.vertices;
        transform_vertices(&mut vertices, world);
        Resolved {
            texture: piece.texture.unwrap_or_else(|| self.white.clone()),
            blend: blend.unwrap_or_else(|| material.alpha_blend()),
            material,
            weight: piece.weight,
            vertices,
            indices: piece.indices,
        }
    }

    fn flush(&mut self, cmd: &mut CommandList, run: &[Resolved]) {
        let head = &run[0];
        let Some(pixel_shader) = head.material.shader(ShaderStage::Pixel) else {
            self.warned.warn(
                GRAPHICS,
                &format!("no pixel shader {:p}", Arc::as_ptr(&head.material)),
                "material has no pixel shader, skipping its draws",
            );
            self.stats.skipped_runs += 1;
            return;
        };
        if head.texture.is_stale() {
            self.warned.warn(
                GRAPHICS,
                &format!("stale texture {}", head.texture.id().0),
                format!("texture '{}' is stale, skipping its draws", head.texture.label()),
            );
            self.stats.skipped_runs += 1;
            return;
        }
        let vertex_shader = head
            .material
            .shader(ShaderStage::Vertex)
            .unwrap_or_else(|| Arc::clone(&self.sprite_vs));
        let weight = head.weight.map(|w| ("weight", Vec4::new(w, 0.0, 0.0, 0.0)));

        let mut vertices = Vec::with_capacity(run.iter().map(|r| r.vertices.len()).sum());
        let mut indices = Vec::with_capacity(run.iter().map(|r| r.indices.len()).sum());
        for piece in run {
            let base = vertices.len() as u32;
            vertices.extend_from_slice(&piece.vertices);
            indices.extend(piece.indices.iter().map(|i| i + base));
        }

        let batch = DrawBatch {
            vertices: &vertices,
            indices: &indices,
            vertex_shader: &vertex_shader,
            pixel_shader: &pixel_shader,
            material: &head.material,
            primary: Some(&head.texture),
            blend: head.blend,
            overrides: weight.as_slice(),
        };
        match cmd.draw(&batch) {
            Ok(()) => {
                self.stats.draw_calls += 1;
                self.stats.vertices += vertices.len();
            }
            Err(e) => {
                self.warned.warn(GRAPHICS, &format!("draw {e}"), format!("draw skipped: {e}"));
                self.stats.skipped_runs += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::RenderPassParameter;
    use crate::font::sample_font;
    use crate::gpu::software::SoftwareDevice;
    use crate::gpu::{DeviceCommand, GraphicsDevice};
    use crate::math::{Color, RectF};
    use crate::shader_compiler::ShaderCompiler;
    use crate::texture::{Texture2D, TextureConfig, TextureFormat};
    use glam::{Mat4, UVec2, Vec3};
    use std::sync::atomic::AtomicU64;

    struct Fixture {
        device: Arc<dyn GraphicsDevice>,
        renderer: Renderer,
        culling: CullingSystem,
        cmd: CommandList,
        target: RenderTexture,
    }

    fn fixture() -> Fixture {
        let device: Arc<dyn GraphicsDevice> = Arc::new(SoftwareDevice::new(64, 64));
        let builtins = BuiltinShaders::new(Arc::new(ShaderCompiler::new(Arc::clone(&device))));
        let white = Texture2D::white(&device).unwrap();
        let renderer = Renderer::new(&builtins, &white).unwrap();
        let (gpu, w, h, format) = device.screen().unwrap();
        let screen = RenderTexture::wrap_screen(&device, gpu, UVec2::new(w, h), format, &Arc::new(AtomicU64::new(0)));
        let mut cmd = CommandList::new(
            screen,
            builtins.create(BuiltinShaderType::SpriteUnlitVS).unwrap(),
            white.into(),
        );
        let target = RenderTexture::create(&device, 64, 64, TextureFormat::R8G8B8A8Unorm).unwrap();
        cmd.set_render_target(&target, &RenderPassParameter::clear(Color::BLACK)).unwrap();
        Fixture {
            device,
            renderer,
            culling: CullingSystem::new(),
            cmd,
            target,
        }
    }

    fn solid(device: &Arc<dyn GraphicsDevice>, color: Color) -> Texture2D {
        let pixels: Vec<u8> = std::iter::repeat(color.to_array()).take(4 * 4).flatten().collect();
        Texture2D::from_pixels(device, 4, 4, &pixels, TextureConfig::pixel_art()).unwrap()
    }

    fn sprite(texture: Option<&Texture2D>, x: f32, y: f32, size: f32) -> RenderedSprite {
        let sprite = RenderedSprite::create();
        sprite.set_texture(texture.map(TextureBase::from));
        sprite.set_src(RectF::new(0.0, 0.0, size, size));
        sprite.set_transform(Mat4::from_translation(Vec3::new(x, y, 0.0)));
        sprite
    }

    fn pixel(f: &mut Fixture, x: u32, y: u32) -> [u8; 4] {
        let submission = f.cmd.finish().unwrap();
        f.device.submit(&submission).unwrap();
        let pixels = f.target.read_pixels().unwrap();
        let i = ((y * 64 + x) * 4) as usize;
        [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
    }

    fn draw_count(cmd: &CommandList) -> usize {
        cmd.commands().iter().filter(|c| matches!(c, DeviceCommand::Draw(_))).count()
    }

    #[test]
    fn batch_order_is_call_order() {
        let mut f = fixture();
        let red = solid(&f.device, Color::rgba(255, 0, 0, 255));
        let green = solid(&f.device, Color::rgba(0, 255, 0, 255));
        let a = sprite(Some(&red), 0.0, 0.0, 32.0);
        let b = sprite(Some(&green), 8.0, 8.0, 32.0);
        let c = sprite(Some(&red), 16.0, 16.0, 32.0);
        f.renderer.draw_sprite(&a);
        f.renderer.draw_sprite(&b);
        f.renderer.draw_sprite(&c);

        let stats = f.renderer.render(&mut f.cmd, &mut f.culling);
        // red, green, red cannot merge across the green run
        assert_eq!(stats.draw_calls, 3);
        assert_eq!(draw_count(&f.cmd), 3);
        assert_eq!(f.renderer.queued_count(), 0);

        assert_eq!(pixel(&mut f, 20, 20), [255, 0, 0, 255]);
    }

    #[test]
    fn neighbours_with_same_state_merge() {
        let mut f = fixture();
        let red = solid(&f.device, Color::rgba(255, 0, 0, 255));
        let sprites: Vec<_> = (0..4).map(|i| sprite(Some(&red), i as f32 * 8.0, 0.0, 8.0)).collect();
        for s in &sprites {
            f.renderer.draw_sprite(s);
        }
        let stats = f.renderer.render(&mut f.cmd, &mut f.culling);
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.vertices, 16);

        // a different material breaks the run even with the same texture
        let custom = Arc::new(Material::new());
        custom.set_shader(f.renderer.default_sprite_material().shader(ShaderStage::Pixel).unwrap());
        sprites[2].set_material(Some(custom));
        for s in &sprites {
            f.renderer.draw_sprite(s);
        }
        assert_eq!(f.renderer.render(&mut f.cmd, &mut f.culling).draw_calls, 3);
    }

    #[test]
    fn unset_texture_draws_white_times_color() {
        let mut f = fixture();
        let s = sprite(None, 0.0, 0.0, 16.0);
        s.set_color(Color::rgba(0, 0, 255, 255));
        f.renderer.draw_sprite(&s);
        f.renderer.render(&mut f.cmd, &mut f.culling);
        assert_eq!(pixel(&mut f, 8, 8), [0, 0, 255, 255]);
    }

    #[test]
    fn out_of_view_drawables_are_culled() {
        let mut f = fixture();
        f.renderer.draw_sprite(&sprite(None, 0.0, 0.0, 16.0));
        f.renderer.draw_sprite(&sprite(None, 500.0, 500.0, 16.0));
        let stats = f.renderer.render(&mut f.cmd, &mut f.culling);
        assert_eq!(stats.culled, 1);
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(f.culling.registered_count(), 2);
    }

    #[test]
    fn stale_texture_and_shaderless_material_are_skipped() {
        let mut f = fixture();
        let generation = Arc::new(AtomicU64::new(0));
        let (gpu, w, h, format) = f.device.screen().unwrap();
        let old_screen = RenderTexture::wrap_screen(&f.device, gpu, UVec2::new(w, h), format, &generation);
        generation.store(1, std::sync::atomic::Ordering::Release);

        let stale = sprite(None, 0.0, 0.0, 16.0);
        stale.set_texture(Some(old_screen.into()));
        let broken = sprite(None, 16.0, 0.0, 16.0);
        broken.set_material(Some(Arc::new(Material::new())));
        let fine = sprite(None, 32.0, 0.0, 16.0);

        f.renderer.draw_sprite(&stale);
        f.renderer.draw_sprite(&broken);
        f.renderer.draw_sprite(&fine);
        let stats = f.renderer.render(&mut f.cmd, &mut f.culling);
        assert_eq!(stats.skipped_runs, 2);
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(pixel(&mut f, 40, 8), [255, 255, 255, 255]);
    }

    #[test]
    fn camera_target_is_drawn_then_previous_restored() {
        let mut f = fixture();
        let offscreen = RenderTexture::create(&f.device, 32, 32, TextureFormat::R8G8B8A8Unorm).unwrap();
        let camera = RenderedCamera::create();
        camera.set_target_texture(Some(offscreen.clone()));
        camera.set_render_pass_parameter(RenderPassParameter::clear(Color::BLACK));
        camera.set_transform(Mat4::from_translation(Vec3::new(100.0, 0.0, 0.0)));

        f.renderer.set_camera(&camera);
        f.renderer.draw_sprite(&sprite(None, 100.0, 0.0, 8.0));
        f.renderer.reset_camera();
        f.renderer.draw_sprite(&sprite(None, 0.0, 0.0, 8.0));
        let stats = f.renderer.render(&mut f.cmd, &mut f.culling);

        assert_eq!(stats.draw_calls, 2);
        assert!(f.cmd.render_target().unwrap().ptr_eq(&f.target));
        assert_eq!(pixel(&mut f, 4, 4), [255, 255, 255, 255]);
        let off = offscreen.read_pixels().unwrap();
        assert_eq!(&off[..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn text_draws_one_quad_per_visible_glyph() {
        let mut f = fixture();
        let text = RenderedText::create();
        text.set_font(Some(sample_font(&f.device)));
        text.set_text("A V");
        f.renderer.draw_text(&text);
        let stats = f.renderer.render(&mut f.cmd, &mut f.culling);
        // the space has no pixels; both glyphs share one atlas page
        assert_eq!(stats.draw_calls, 1);
        assert_eq!(stats.vertices, 8);
        assert_eq!(f.renderer.default_glyph_material().vector4("weight"), None);
    }

    fn weight_uniform(cmd: &CommandList) -> f32 {
        let draw = cmd
            .commands()
            .iter()
            .find_map(|c| match c {
                DeviceCommand::Draw(d) => Some(d),
                _ => None,
            })
            .unwrap();
        let buffer = draw.uniforms.iter().find(|u| (u.group, u.binding) == (1, 0)).unwrap();
        f32::from_le_bytes(buffer.data[..4].try_into().unwrap())
    }

    #[test]
    fn text_weight_does_not_overwrite_a_custom_glyph_material() {
        let mut f = fixture();
        let glyph_ps = f.renderer.default_glyph_material().shader(ShaderStage::Pixel).unwrap();
        let mine = Arc::new(Material::with_pixel_shader(glyph_ps));
        mine.set_vector4("weight", Vec4::new(0.7, 0.0, 0.0, 0.0));

        let text = RenderedText::create();
        text.set_font(Some(sample_font(&f.device)));
        text.set_text("A");
        text.set_material_glyph(Some(Arc::clone(&mine)));
        text.set_weight(0.25);
        f.renderer.draw_text(&text);
        let stats = f.renderer.render(&mut f.cmd, &mut f.culling);

        assert_eq!(stats.draw_calls, 1);
        assert_eq!(weight_uniform(&f.cmd), 0.25);
        assert_eq!(mine.vector4("weight"), Some(Vec4::new(0.7, 0.0, 0.0, 0.0)));
    }
}
