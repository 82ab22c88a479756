// src/graphics.rs
//! # Frame driver
//!
//! `Uninitialized → Ready → FrameOpen → Ready`, with `DeviceLost` as a sink.
//!
//! * A ring of `frames_in_flight` slots, each with its own [`CommandList`] and fence. The CPU
//!   records frame N+1 while the GPU may still run frame N; `end_frame` blocks only when the
//!   slot it advances to is still in flight.
//! * A fence wait past `fence_timeout_ms` fails `end_frame` and the driver stays in
//!   `DeviceLost`.
//! * Resizes and screen format requests are applied when the next frame begins. Screen
//!   textures handed out before go stale through a shared generation counter.
//! * `begin_frame` / `end_frame` return `bool`; the reason of the last failure is kept in
//!   [`Graphics::last_frame_error`].

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use glam::UVec2;

use crate::builtin_shader::{BuiltinShaderType, BuiltinShaders};
use crate::camera::RenderPassParameter;
use crate::command_list::CommandList;
use crate::config::EngineConfig;
use crate::error::{DeviceError, FrameError, ResourceError, Result};
use crate::gpu::{FenceValue, GraphicsDevice};
use crate::logging::{LogOnce, GRAPHICS};
use crate::platform::Platform;
use crate::texture::{to_rgba8, RenderTexture, Texture, Texture2D, TextureBase, TextureFormat};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum GraphicsState {
    Uninitialized,
    Ready,
    FrameOpen,
    DeviceLost,
}

struct FrameSlot {
    cmd: CommandList,
    fence: Option<FenceValue>,
}

pub struct Graphics {
    device: Arc<dyn GraphicsDevice>,
    state: GraphicsState,
    slots: Vec<FrameSlot>,
    current: usize,
    frame_count: u64,
    screen: RenderTexture,
    screen_generation: Arc<AtomicU64>,
    pending_size: Option<UVec2>,
    pending_format: Option<TextureFormat>,
    fence_timeout: Duration,
    close_requested: bool,
    screenshot: Option<PathBuf>,
    last_error: Option<FrameError>,
    warned: LogOnce,
    white: Texture2D,
}

impl Graphics {
    pub fn new(device: Arc<dyn GraphicsDevice>, builtins: &BuiltinShaders, config: &EngineConfig) -> Result<Self> {
        let sprite_vs = builtins.create(BuiltinShaderType::SpriteUnlitVS)?;
        let white = Texture2D::white(&device)?;
        let screen_generation = Arc::new(AtomicU64::new(0));
        let screen = wrap_screen(&device, &screen_generation)?;

        let slots = (0..config.frames_in_flight.max(1))
            .map(|_| FrameSlot {
                cmd: CommandList::new(screen.clone(), Arc::clone(&sprite_vs), TextureBase::from(&white)),
                fence: None,
            })
            .collect::<Vec<_>>();

        log::info!(
            target: GRAPHICS,
            "graphics ready on '{}' ({}x{}, {} frames in flight)",
            device.name(),
            screen.size().x,
            screen.size().y,
            slots.len()
        );

        Ok(Self {
            device,
            state: GraphicsState::Ready,
            slots,
            current: 0,
            frame_count: 0,
            screen,
            screen_generation,
            pending_size: None,
            pending_format: None,
            fence_timeout: Duration::from_millis(config.fence_timeout_ms),
            close_requested: false,
            screenshot: None,
            last_error: None,
            warned: LogOnce::new(64),
            white,
        })
    }

    pub fn device(&self) -> &Arc<dyn GraphicsDevice> {
        &self.device
    }

    pub fn state(&self) -> GraphicsState {
        self.state
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    /// Frames ended successfully since creation.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    pub fn white_texture(&self) -> &Texture2D {
        &self.white
    }

    pub fn last_frame_error(&self) -> Option<&FrameError> {
        self.last_error.as_ref()
    }

    pub fn is_close_requested(&self) -> bool {
        self.close_requested
    }

    /// Pumps the platform and picks up resizes. Returns false once the window should close.
    pub fn do_events(&mut self, platform: &mut dyn Platform) -> bool {
        if !platform.do_events() {
            self.close_requested = true;
        }
        if let Some(size) = platform.take_resize() {
            self.resize(size.x, size.y);
        }
        !self.close_requested
    }

    pub fn request_close(&mut self) {
        self.close_requested = true;
    }

    /// Schedules a screen resize for the next `begin_frame`.
    pub fn resize(&mut self, width: u32, height: u32) {
        let size = UVec2::new(width.max(1), height.max(1));
        if size != self.screen.size() || self.pending_size.is_some() {
            self.pending_size = Some(size);
        }
    }

    /// The screen target of the current (or, between frames, the upcoming) frame.
    pub fn screen_texture(&self) -> RenderTexture {
        self.screen.clone()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Frame sequencing
    // ─────────────────────────────────────────────────────────────────────

    /// Opens a frame and binds the screen with `params`.
    pub fn begin_frame(&mut self, params: &RenderPassParameter) -> bool {
        let result = self.try_begin_frame(params);
        self.record(result)
    }

    pub fn try_begin_frame(&mut self, params: &RenderPassParameter) -> std::result::Result<(), FrameError> {
        match self.state {
            GraphicsState::Uninitialized => return Err(FrameError::NotInitialized),
            GraphicsState::FrameOpen => return Err(FrameError::FrameAlreadyOpen),
            GraphicsState::DeviceLost => return Err(FrameError::DeviceLost),
            GraphicsState::Ready => {}
        }
        if self.close_requested {
            return Err(FrameError::CloseRequested);
        }
        if self.device.is_lost() {
            self.state = GraphicsState::DeviceLost;
            return Err(FrameError::DeviceLost);
        }
        self.apply_screen_changes().map_err(|e| self.device_failure(e))?;

        let slot = &mut self.slots[self.current];
        if let Some(fence) = slot.fence {
            // end_frame normally already waited; this covers a skipped wait after an error
            if let Err(e) = self.device.wait_fence(fence, self.fence_timeout) {
                return Err(self.fence_failure(e));
            }
            slot.fence = None;
        }

        let slot = &mut self.slots[self.current];
        slot.cmd.begin(self.screen.clone());
        if let Err(e) = slot.cmd.set_render_target(&self.screen, params) {
            slot.cmd.recycle();
            return Err(e.into());
        }
        self.state = GraphicsState::FrameOpen;
        Ok(())
    }

    /// The open frame's command list.
    pub fn command_list(&mut self) -> std::result::Result<&mut CommandList, FrameError> {
        if self.state != GraphicsState::FrameOpen {
            return Err(FrameError::NoOpenFrame);
        }
        Ok(&mut self.slots[self.current].cmd)
    }

    /// Submits and presents the open frame.
    pub fn end_frame(&mut self) -> bool {
        let result = self.try_end_frame();
        self.record(result)
    }

    pub fn try_end_frame(&mut self) -> std::result::Result<(), FrameError> {
        match self.state {
            GraphicsState::FrameOpen => {}
            GraphicsState::Uninitialized => return Err(FrameError::NotInitialized),
            GraphicsState::DeviceLost => return Err(FrameError::DeviceLost),
            GraphicsState::Ready => return Err(FrameError::NoOpenFrame),
        }

        let slot = &mut self.slots[self.current];
        if let Some(format) = slot.cmd.take_requested_screen_format() {
            self.pending_format = Some(format);
        }
        let submitted = slot.cmd.finish().map_err(FrameError::from).and_then(|submission| {
            self.device.submit(&submission).map_err(FrameError::from)
        });
        let fence = match submitted {
            Ok(fence) => fence,
            Err(e) => {
                self.state = GraphicsState::Ready;
                return Err(self.classify(e));
            }
        };
        slot.fence = Some(fence);
        self.state = GraphicsState::Ready;

        if let Some(path) = self.screenshot.take() {
            match self.screen.save(&path) {
                Ok(()) => log::info!(target: GRAPHICS, "screenshot saved to {}", path.display()),
                Err(e) => log::error!(target: GRAPHICS, "screenshot {} failed: {}", path.display(), e),
            }
        }

        if let Err(e) = self.device.present() {
            if e == DeviceError::Lost {
                self.state = GraphicsState::DeviceLost;
                return Err(FrameError::DeviceLost);
            }
            self.warned.warn(GRAPHICS, "present", format!("present failed: {e}"));
        }

        self.frame_count += 1;
        self.current = (self.current + 1) % self.slots.len();

        // block only when the slot about to be reused is still on the GPU
        let next = &mut self.slots[self.current];
        if let Some(fence) = next.fence {
            if let Err(e) = self.device.wait_fence(fence, self.fence_timeout) {
                return Err(self.fence_failure(e));
            }
            next.fence = None;
            next.cmd.recycle();
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Screen
    // ─────────────────────────────────────────────────────────────────────

    /// Saves the screen as an image once the next frame has been submitted.
    pub fn save_screenshot(&mut self, path: impl AsRef<Path>) {
        self.screenshot = Some(path.as_ref().to_path_buf());
    }

    /// Waits for the GPU and returns the texture's pixels as RGBA8.
    pub fn read_pixels(&self, texture: &dyn Texture) -> std::result::Result<Vec<u8>, ResourceError> {
        let bytes = texture.read_pixels()?;
        let size = texture.size();
        to_rgba8(texture.format(), size, &bytes)
            .map(|image| image.into_raw())
            .ok_or(ResourceError::DataLength {
                expected: size.x as usize * size.y as usize * texture.format().bytes_per_pixel(),
                actual: bytes.len(),
            })
    }

    /// Waits for the GPU and drops every recorded frame. The driver is unusable afterwards.
    pub fn terminate(&mut self) {
        if self.state == GraphicsState::Uninitialized {
            return;
        }
        if let Err(e) = self.device.wait_idle() {
            log::warn!(target: GRAPHICS, "waiting for the GPU on shutdown failed: {}", e);
        }
        for slot in &mut self.slots {
            slot.cmd.recycle();
            slot.fence = None;
        }
        self.state = GraphicsState::Uninitialized;
        log::info!(target: GRAPHICS, "graphics terminated after {} frames", self.frame_count);
    }

    fn apply_screen_changes(&mut self) -> std::result::Result<(), DeviceError> {
        if self.pending_size.is_none() && self.pending_format.is_none() {
            return Ok(());
        }
        let size = self.pending_size.unwrap_or_else(|| self.screen.size());
        let format = self.pending_format.unwrap_or_else(|| self.screen.format());
        // the old screen may still be read by frames in flight
        self.device.wait_idle()?;
        self.device.recreate_screen(size.x, size.y, format)?;
        self.screen_generation.fetch_add(1, Ordering::AcqRel);
        self.screen = wrap_screen(&self.device, &self.screen_generation)?;
        self.pending_size = None;
        self.pending_format = None;
        log::debug!(target: GRAPHICS, "screen recreated at {}x{} {:?}", size.x, size.y, format);
        Ok(())
    }

    fn record(&mut self, result: std::result::Result<(), FrameError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                self.warned.warn(GRAPHICS, &format!("{e:?}"), &e);
                self.last_error = Some(e);
                false
            }
        }
    }

    fn classify(&mut self, error: FrameError) -> FrameError {
        match error {
            FrameError::Device(DeviceError::Lost) => {
                self.state = GraphicsState::DeviceLost;
                FrameError::DeviceLost
            }
            other => other,
        }
    }

    fn device_failure(&mut self, error: DeviceError) -> FrameError {
        self.classify(FrameError::Device(error))
    }

    fn fence_failure(&mut self, error: DeviceError) -> FrameError {
        self.state = GraphicsState::DeviceLost;
        match error {
            DeviceError::Timeout => {
                log::error!(
                    target: GRAPHICS,
                    "GPU did not finish a frame within {} ms, treating the device as lost",
                    self.fence_timeout.as_millis()
                );
                FrameError::FenceTimeout(self.fence_timeout.as_millis() as u64)
            }
            _ => FrameError::DeviceLost,
        }
    }
}

impl Drop for Graphics {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn wrap_screen(
    device: &Arc<dyn GraphicsDevice>,
    generation: &Arc<AtomicU64>,
) -> std::result::Result<RenderTexture, DeviceError> {
    let (gpu, width, height, format) = device.screen()?;
    Ok(RenderTexture::wrap_screen(device, gpu, UVec2::new(width, height), format, generation))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::culling::CullingSystem;
    use crate::gpu::software::SoftwareDevice;
    use crate::math::{Color, RectF};
    use crate::platform::HeadlessPlatform;
    use crate::rendered::RenderedSprite;
    use crate::renderer::Renderer;
    use crate::shader_compiler::ShaderCompiler;

    struct Fixture {
        soft: Arc<SoftwareDevice>,
        builtins: BuiltinShaders,
        graphics: Graphics,
    }

    fn fixture_with(config: EngineConfig) -> Fixture {
        let soft = Arc::new(SoftwareDevice::new(config.width, config.height));
        let device: Arc<dyn GraphicsDevice> = soft.clone();
        let builtins = BuiltinShaders::new(Arc::new(ShaderCompiler::new(Arc::clone(&device))));
        let graphics = Graphics::new(device, &builtins, &config).unwrap();
        Fixture { soft, builtins, graphics }
    }

    fn fixture() -> Fixture {
        fixture_with(EngineConfig::headless(256, 256))
    }

    #[test]
    fn end_without_begin_fails_and_keeps_state() {
        let mut f = fixture();
        assert!(!f.graphics.end_frame());
        assert_eq!(f.graphics.last_frame_error(), Some(&FrameError::NoOpenFrame));
        assert_eq!(f.graphics.state(), GraphicsState::Ready);
        assert!(f.graphics.command_list().is_err());

        assert!(f.graphics.begin_frame(&RenderPassParameter::default()));
        assert!(!f.graphics.begin_frame(&RenderPassParameter::default()));
        assert_eq!(f.graphics.last_frame_error(), Some(&FrameError::FrameAlreadyOpen));
        assert_eq!(f.graphics.state(), GraphicsState::FrameOpen);

        assert!(f.graphics.end_frame());
        assert_eq!(f.graphics.state(), GraphicsState::Ready);
        assert_eq!(f.graphics.frame_count(), 1);
        assert_eq!(f.soft.present_count(), 1);
    }

    #[test]
    fn sprite_in_render_texture_then_copied() {
        let mut f = fixture();
        let device = Arc::clone(f.graphics.device());
        let mut renderer = Renderer::new(&f.builtins, f.graphics.white_texture()).unwrap();
        let mut culling = CullingSystem::new();
        let r = RenderTexture::create(&device, 256, 256, TextureFormat::R8G8B8A8Unorm).unwrap();
        let r2 = RenderTexture::create(&device, 256, 256, TextureFormat::R8G8B8A8Unorm).unwrap();

        let sprite = RenderedSprite::create();
        sprite.set_src(RectF::new(0.0, 0.0, 64.0, 64.0));

        assert!(f.graphics.begin_frame(&RenderPassParameter::default()));
        let cmd = f.graphics.command_list().unwrap();
        cmd.set_render_target(&r, &RenderPassParameter::clear(Color::BLACK)).unwrap();
        renderer.draw_sprite(&sprite);
        assert_eq!(renderer.render(cmd, &mut culling).draw_calls, 1);
        assert!(f.graphics.end_frame());

        assert!(f.graphics.begin_frame(&RenderPassParameter::default()));
        f.graphics.command_list().unwrap().copy_texture(&r, &r2).unwrap();
        assert!(f.graphics.end_frame());

        let pixels = f.graphics.read_pixels(&r2).unwrap();
        let at = |x: usize, y: usize| &pixels[(y * 256 + x) * 4..(y * 256 + x) * 4 + 4];
        assert_eq!(at(32, 32), &[255, 255, 255, 255]);
        assert_eq!(at(200, 200), &[0, 0, 0, 255]);
    }

    #[test]
    fn render_texture_round_trips_cleared_color() {
        let mut f = fixture();
        let device = Arc::clone(f.graphics.device());
        let color = Color::rgba(12, 200, 77, 255);
        for format in [TextureFormat::R8G8B8A8Unorm, TextureFormat::R16G16B16A16Float] {
            let target = RenderTexture::create(&device, 16, 8, format).unwrap();
            assert!(f.graphics.begin_frame(&RenderPassParameter::load()));
            f.graphics
                .command_list()
                .unwrap()
                .set_render_target(&target, &RenderPassParameter::clear(color))
                .unwrap();
            assert!(f.graphics.end_frame());

            let pixels = f.graphics.read_pixels(&target).unwrap();
            assert_eq!(pixels.len(), 16 * 8 * 4);
            assert!(pixels.chunks_exact(4).all(|p| p == color.to_array()), "{format:?}");
        }
    }

    #[test]
    fn resize_recreates_screen_and_stales_old_handles() {
        let mut f = fixture();
        let mut platform = HeadlessPlatform::new(256, 256);
        let old = f.graphics.screen_texture();

        platform.resize(128, 64);
        assert!(f.graphics.do_events(&mut platform));
        assert!(!old.is_stale());

        assert!(f.graphics.begin_frame(&RenderPassParameter::default()));
        assert!(old.is_stale());
        let screen = f.graphics.screen_texture();
        assert_eq!(screen.size(), UVec2::new(128, 64));
        assert!(!screen.is_stale());
        assert_eq!(
            f.graphics.command_list().unwrap().copy_texture(&old, &screen),
            Err(crate::error::CommandListError::StaleTexture)
        );
        assert!(f.graphics.end_frame());
    }

    #[test]
    fn screen_format_change_applies_next_frame() {
        let mut f = fixture();
        assert!(f.graphics.begin_frame(&RenderPassParameter::default()));
        let cmd = f.graphics.command_list().unwrap();
        cmd.set_screen_texture_format(TextureFormat::R16G16B16A16Float);
        assert_eq!(cmd.screen_texture().format(), TextureFormat::R8G8B8A8Unorm);
        assert!(f.graphics.end_frame());

        assert!(f.graphics.begin_frame(&RenderPassParameter::default()));
        assert_eq!(f.graphics.screen_texture().format(), TextureFormat::R16G16B16A16Float);
        assert!(f.graphics.end_frame());
    }

    #[test]
    fn fence_timeout_moves_to_device_lost() {
        let mut config = EngineConfig::headless(32, 32);
        config.frames_in_flight = 2;
        config.fence_timeout_ms = 5;
        let mut f = fixture_with(config);
        f.soft.set_stall(true);

        // the first wrap-around waits on frame 1's fence
        assert!(f.graphics.begin_frame(&RenderPassParameter::default()));
        assert!(f.graphics.end_frame());
        assert!(f.graphics.begin_frame(&RenderPassParameter::default()));
        assert!(!f.graphics.end_frame());
        assert_eq!(f.graphics.last_frame_error(), Some(&FrameError::FenceTimeout(5)));
        assert_eq!(f.graphics.state(), GraphicsState::DeviceLost);

        assert!(!f.graphics.begin_frame(&RenderPassParameter::default()));
        assert_eq!(f.graphics.last_frame_error(), Some(&FrameError::DeviceLost));
        f.soft.set_stall(false);
    }

    #[test]
    fn lost_device_refuses_frames() {
        let mut f = fixture();
        f.soft.simulate_device_lost();
        assert!(!f.graphics.begin_frame(&RenderPassParameter::default()));
        assert_eq!(f.graphics.last_frame_error(), Some(&FrameError::DeviceLost));
        assert_eq!(f.graphics.state(), GraphicsState::DeviceLost);
    }

    #[test]
    fn close_request_and_terminate_stop_frames() {
        let mut f = fixture();
        let mut platform = HeadlessPlatform::new(256, 256);
        platform.request_close();
        assert!(!f.graphics.do_events(&mut platform));
        assert!(!f.graphics.begin_frame(&RenderPassParameter::default()));
        assert_eq!(f.graphics.last_frame_error(), Some(&FrameError::CloseRequested));

        f.graphics.terminate();
        assert_eq!(f.graphics.state(), GraphicsState::Uninitialized);
        assert!(!f.graphics.begin_frame(&RenderPassParameter::default()));
        assert_eq!(f.graphics.last_frame_error(), Some(&FrameError::NotInitialized));
    }

    #[test]
    fn screenshot_is_written_after_the_next_frame() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shot.png");
        let mut f = fixture_with(EngineConfig::headless(8, 4));
        f.graphics.save_screenshot(&path);
        assert!(!path.exists());

        assert!(f.graphics.begin_frame(&RenderPassParameter::clear(Color::rgba(0, 0, 255, 255))));
        assert!(f.graphics.end_frame());

        let image = image::open(&path).unwrap().to_rgba8();
        assert_eq!(image.dimensions(), (8, 4));
        assert_eq!(image.get_pixel(3, 2).0, [0, 0, 255, 255]);
    }
}
