// src/engine.rs
use std::sync::Arc;

use crate::builtin_shader::BuiltinShaders;
use crate::camera::RenderPassParameter;
use crate::config::{DeviceType, EngineConfig};
use crate::context::Context;
use crate::culling::CullingSystem;
use crate::error::Result;
use crate::file::FileSystem;
use crate::fps_counter::FpsCounter;
use crate::gpu::software::SoftwareDevice;
use crate::gpu::wgpu_device::WgpuDevice;
use crate::gpu::GraphicsDevice;
use crate::graphics::Graphics;
use crate::input_system::{ButtonState, Key, MouseButton};
use crate::logging::{self, CORE};
use crate::platform::{HeadlessPlatform, Platform, WinitPlatform};
use crate::profiler::Profiler;
use crate::renderer::{RenderStats, Renderer};
use crate::resource_manager::Resources;
use crate::shader_compiler::ShaderCompiler;

/// Every engine service, owned in one place and handed out by reference.
///
/// Per frame: `do_events`, `begin_frame`, queue drawables on the renderer, `render`,
/// `end_frame`.
pub struct Engine {
    config: EngineConfig,
    platform: Box<dyn Platform>,
    files: Arc<FileSystem>,
    compiler: Arc<ShaderCompiler>,
    builtins: BuiltinShaders,
    resources: Resources,
    graphics: Graphics,
    renderer: Renderer,
    culling: CullingSystem,
    fps: FpsCounter,
    profiler: Profiler,
}

impl Engine {
    pub fn initialize(config: EngineConfig, platform: Box<dyn Platform>, device: Arc<dyn GraphicsDevice>) -> Result<Self> {
        let config = config.sanitized();
        logging::init(&config)?;

        // 1. Files: loose roots plus mounted packages
        let files = Arc::new(FileSystem::with_roots(config.asset_roots.iter().cloned()));
        for package in &config.package_files {
            files
                .add_package_file(package)
                .with_context(|| format!("mounting package {}", package.display()))?;
        }

        // 2. Shaders; the built-ins compile lazily but the sprite pair is needed right away
        let compiler = Arc::new(ShaderCompiler::new(Arc::clone(&device)));
        let builtins = BuiltinShaders::new(Arc::clone(&compiler));

        // 3. Frame driver and batcher
        let graphics = Graphics::new(Arc::clone(&device), &builtins, &config)?;
        let renderer = Renderer::new(&builtins, graphics.white_texture())?;
        let resources = Resources::new(device, Arc::clone(&files));
        let fps = FpsCounter::new(config.target_fps, config.framerate_mode);
        let profiler = Profiler::new();
        if config.profiling {
            profiler.start_capture();
        }

        log::info!(target: CORE, "engine '{}' initialized", config.title);
        Ok(Self {
            config,
            platform,
            files,
            compiler,
            builtins,
            resources,
            graphics,
            renderer,
            culling: CullingSystem::new(),
            fps,
            profiler,
        })
    }

    /// Software device, no window. `DeviceType::Wgpu` asks for a windowless wgpu device instead.
    pub fn headless(config: EngineConfig) -> Result<Self> {
        let config = config.sanitized();
        let device: Arc<dyn GraphicsDevice> = match config.device_type {
            DeviceType::Wgpu => Arc::new(WgpuDevice::new(None, config.width, config.height, false)?),
            DeviceType::Software | DeviceType::Default => Arc::new(SoftwareDevice::new(config.width, config.height)),
        };
        let platform = Box::new(HeadlessPlatform::new(config.width, config.height));
        Self::initialize(config, platform, device)
    }

    /// Opens a window. `DeviceType::Default` falls back to the software device when wgpu fails.
    pub fn windowed(config: EngineConfig) -> Result<Self> {
        let config = config.sanitized();
        let platform = WinitPlatform::new(&config).context("opening the main window")?;
        let size = platform.window_size();
        let device: Arc<dyn GraphicsDevice> = match config.device_type {
            DeviceType::Software => Arc::new(SoftwareDevice::new(size.x, size.y)),
            DeviceType::Wgpu => Arc::new(WgpuDevice::new(platform.window(), size.x, size.y, config.wait_vsync)?),
            DeviceType::Default => match WgpuDevice::new(platform.window(), size.x, size.y, config.wait_vsync) {
                Ok(device) => Arc::new(device),
                Err(e) => {
                    log::warn!(target: CORE, "wgpu unavailable ({}), using the software device", e);
                    Arc::new(SoftwareDevice::new(size.x, size.y))
                }
            },
        };
        Self::initialize(config, Box::new(platform), device)
    }

    // ---------------- Frame loop ----------------

    /// Pumps window events. Returns false once the application should quit.
    pub fn do_events(&mut self) -> bool {
        self.graphics.do_events(self.platform.as_mut())
    }

    /// Opens a frame that clears the screen with the default color.
    pub fn begin_frame(&mut self) -> bool {
        self.begin_frame_with(&RenderPassParameter::default())
    }

    pub fn begin_frame_with(&mut self, params: &RenderPassParameter) -> bool {
        let _scope = self.profiler.scope("begin_frame");
        self.graphics.begin_frame(params)
    }

    /// Refreshes culling bounds and records everything queued on the renderer.
    pub fn render(&mut self) -> RenderStats {
        let _scope = self.profiler.scope("render");
        self.culling.update_aabb();
        match self.graphics.command_list() {
            Ok(cmd) => self.renderer.render(cmd, &mut self.culling),
            Err(e) => {
                log::warn!(target: CORE, "render outside of a frame: {}", e);
                self.renderer.clear();
                RenderStats::default()
            }
        }
    }

    /// Submits the frame, then paces to the target frame rate.
    pub fn end_frame(&mut self) -> bool {
        let ok = {
            let _scope = self.profiler.scope("end_frame");
            self.graphics.end_frame()
        };
        self.fps.update();
        ok
    }

    pub fn terminate(&mut self) {
        self.renderer.clear();
        self.graphics.terminate();
        log::info!(target: CORE, "engine terminated");
    }

    // ---------------- Services ----------------

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn graphics(&self) -> &Graphics {
        &self.graphics
    }

    pub fn graphics_mut(&mut self) -> &mut Graphics {
        &mut self.graphics
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    pub fn culling(&self) -> &CullingSystem {
        &self.culling
    }

    pub fn culling_mut(&mut self) -> &mut CullingSystem {
        &mut self.culling
    }

    pub fn shader_compiler(&self) -> &Arc<ShaderCompiler> {
        &self.compiler
    }

    pub fn builtin_shaders(&self) -> &BuiltinShaders {
        &self.builtins
    }

    /// Times `begin_frame`, `render` and `end_frame` while capturing.
    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }

    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    pub fn files(&self) -> &Arc<FileSystem> {
        &self.files
    }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        self.graphics.device()
    }

    pub fn fps(&self) -> &FpsCounter {
        &self.fps
    }

    pub fn fps_mut(&mut self) -> &mut FpsCounter {
        &mut self.fps
    }

    pub fn platform(&self) -> &dyn Platform {
        self.platform.as_ref()
    }

    pub fn platform_mut(&mut self) -> &mut dyn Platform {
        self.platform.as_mut()
    }

    // ---------------- Input ----------------
    // graphics-only engines never report input

    pub fn key_state(&self, key: Key) -> ButtonState {
        if self.config.graphics_only {
            return ButtonState::Free;
        }
        self.platform.key_state(key)
    }

    pub fn mouse_button_state(&self, button: MouseButton) -> ButtonState {
        if self.config.graphics_only {
            return ButtonState::Free;
        }
        self.platform.mouse_button_state(button)
    }

    pub fn mouse_position(&self) -> glam::Vec2 {
        self.platform.mouse_position()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.terminate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::Package;
    use crate::graphics::GraphicsState;
    use crate::math::Color;
    use crate::rendered::RenderedSprite;
    use crate::texture::Texture;
    use glam::{Mat4, Vec3};
    use std::io::Cursor;

    fn config() -> EngineConfig {
        let mut config = EngineConfig::headless(64, 64);
        config.target_fps = 1000;
        config
    }

    fn png(color: [u8; 4]) -> Vec<u8> {
        let image = image::RgbaImage::from_pixel(4, 4, image::Rgba(color));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn pixel(engine: &Engine, x: u32, y: u32) -> [u8; 4] {
        let screen = engine.graphics().screen_texture();
        let pixels = engine.graphics().read_pixels(&screen).unwrap();
        let i = ((y * 64 + x) * 4) as usize;
        [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
    }

    #[test]
    fn headless_frame_draws_packaged_texture() {
        let dir = tempfile::tempdir().unwrap();
        let mut package = Package::new("assets");
        package.insert("sprites/red.png", png([255, 0, 0, 255]));
        let package_path = dir.path().join("assets.pak");
        std::fs::write(&package_path, package.to_bytes()).unwrap();

        let mut engine = Engine::headless(config().with_package_file(&package_path)).unwrap();
        let texture = engine.resources().load_texture("sprites/red.png").unwrap();
        assert_eq!(texture.size(), glam::UVec2::new(4, 4));

        let sprite = RenderedSprite::create();
        sprite.set_texture(Some(texture.into()));
        sprite.set_src(crate::math::RectF::new(0.0, 0.0, 4.0, 4.0));

        assert!(engine.do_events());
        assert!(engine.begin_frame_with(&RenderPassParameter::clear(Color::BLACK)));
        engine.renderer_mut().draw_sprite(&sprite);
        let stats = engine.render();
        assert_eq!(stats.draw_calls, 1);
        assert!(engine.end_frame());

        assert_eq!(pixel(&engine, 2, 2), [255, 0, 0, 255]);
        assert_eq!(pixel(&engine, 40, 40), [0, 0, 0, 255]);
        assert_eq!(engine.fps().frame_count(), 1);
    }

    #[test]
    fn render_picks_up_moved_drawables() {
        let mut engine = Engine::headless(config()).unwrap();
        let sprite = RenderedSprite::create();
        sprite.set_src(crate::math::RectF::new(0.0, 0.0, 8.0, 8.0));
        sprite.set_transform(Mat4::from_translation(Vec3::new(200.0, 0.0, 0.0)));

        assert!(engine.begin_frame());
        engine.renderer_mut().draw_sprite(&sprite);
        assert_eq!(engine.render().culled, 1);
        assert!(engine.end_frame());

        sprite.set_transform(Mat4::from_translation(Vec3::new(8.0, 8.0, 0.0)));
        assert!(engine.begin_frame_with(&RenderPassParameter::clear(Color::BLACK)));
        engine.renderer_mut().draw_sprite(&sprite);
        let stats = engine.render();
        assert_eq!((stats.culled, stats.draw_calls), (0, 1));
        assert!(engine.end_frame());
        assert_eq!(pixel(&engine, 12, 12), [255, 255, 255, 255]);
    }

    #[test]
    fn render_outside_a_frame_drops_the_queue() {
        let mut engine = Engine::headless(config()).unwrap();
        engine.renderer_mut().draw_sprite(&RenderedSprite::create());
        assert_eq!(engine.render(), RenderStats::default());
        assert_eq!(engine.renderer().queued_count(), 0);
    }

    #[test]
    fn close_and_terminate() {
        let mut engine = Engine::headless(config()).unwrap();
        assert_eq!(engine.key_state(Key::Space), ButtonState::Free);
        engine.platform_mut().request_close();
        assert!(!engine.do_events());
        assert!(!engine.begin_frame());

        engine.terminate();
        assert_eq!(engine.graphics().state(), GraphicsState::Uninitialized);
    }

    #[test]
    fn profiling_times_each_frame_phase() {
        let mut engine = Engine::headless(EngineConfig { profiling: true, ..config() }).unwrap();
        assert!(engine.profiler().is_capturing());
        assert!(engine.begin_frame());
        engine.render();
        assert!(engine.end_frame());

        let names: Vec<String> = engine.profiler().records().into_iter().map(|r| r.name).collect();
        assert_eq!(names, vec!["begin_frame", "render", "end_frame"]);

        engine.profiler().stop_capture();
        assert!(engine.begin_frame());
        assert!(engine.end_frame());
        assert_eq!(engine.profiler().records().len(), 3);
    }

    #[test]
    fn services_share_one_compiler() {
        let engine = Engine::headless(config()).unwrap();
        assert!(Arc::ptr_eq(engine.builtin_shaders().compiler(), engine.shader_compiler()));
        // sprite VS/PS and the font PS were compiled while starting up
        assert_eq!(engine.builtin_shaders().cached_count(), 3);
        assert!(!engine.files().exists("no/such/file.png"));
    }
}
