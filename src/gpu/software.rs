// src/gpu/software.rs
//! Headless CPU device.
//!
//! Executes each submission synchronously: clears, copies and a scanline-free triangle
//! rasterizer (edge functions, pixel centers, tie-break by edge direction so shared edges are
//! covered once). Shading is fixed-function: first bound texture times vertex color, then the
//! draw's blend equation. Native "compilation" checks the transpiled GLSL for an entry point.
//!
//! Fences complete on submit unless [`SoftwareDevice::set_stall`] is on, which is how tests
//! exercise the timeout path.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use glam::{Vec2, Vec4};
use parking_lot::Mutex;

use super::{
    DeviceCommand, DrawCommand, FenceValue, FrameSubmission, GpuShader, GpuTexture, GraphicsDevice,
    NativeShaderSource, ShaderTarget, TextureDescriptor,
};
use crate::error::DeviceError;
use crate::logging::GRAPHICS;
use crate::math::BatchVertex;
use crate::resource_manager::Arena;
use crate::shader::ShaderStage;
use crate::texture::{SamplerState, TextureFilter, TextureFormat, TextureWrapMode};

struct SoftTexture {
    width: u32,
    height: u32,
    format: TextureFormat,
    pixels: Vec<Vec4>,
}

impl SoftTexture {
    fn texel(&self, x: i64, y: i64, wrap: TextureWrapMode) -> Vec4 {
        let (w, h) = (self.width as i64, self.height as i64);
        let (x, y) = match wrap {
            TextureWrapMode::Clamp => (x.clamp(0, w - 1), y.clamp(0, h - 1)),
            TextureWrapMode::Repeat => (x.rem_euclid(w), y.rem_euclid(h)),
        };
        self.pixels[(y * w + x) as usize]
    }

    fn sample(&self, uv: Vec2, sampler: SamplerState) -> Vec4 {
        let x = uv.x * self.width as f32;
        let y = uv.y * self.height as f32;
        match sampler.filter {
            TextureFilter::Nearest => self.texel(x.floor() as i64, y.floor() as i64, sampler.wrap),
            TextureFilter::Linear => {
                let (fx, fy) = (x - 0.5, y - 0.5);
                let (x0, y0) = (fx.floor(), fy.floor());
                let (tx, ty) = (fx - x0, fy - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);
                let top = self
                    .texel(x0, y0, sampler.wrap)
                    .lerp(self.texel(x0 + 1, y0, sampler.wrap), tx);
                let bottom = self
                    .texel(x0, y0 + 1, sampler.wrap)
                    .lerp(self.texel(x0 + 1, y0 + 1, sampler.wrap), tx);
                top.lerp(bottom, ty)
            }
        }
    }
}

/// Rounds `value` through the texture format so reads see what a GPU would have stored.
fn quantize(format: TextureFormat, value: Vec4, scratch: &mut Vec<u8>) -> Vec4 {
    scratch.clear();
    format.encode_pixel(value, scratch);
    format.decode_pixel(scratch)
}

struct State {
    textures: Arena<SoftTexture>,
    shaders: Arena<ShaderStage>,
    screen: GpuTexture,
    submitted: u64,
    completed: u64,
    presented: u64,
    draws: u64,
}

pub struct SoftwareDevice {
    state: Mutex<State>,
    stall: AtomicBool,
    lost: AtomicBool,
    triangles: AtomicU64,
}

impl SoftwareDevice {
    /// A device whose screen is an RGBA8 target of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        let mut textures = Arena::new();
        let screen = GpuTexture(textures.insert(blank(width.max(1), height.max(1), TextureFormat::R8G8B8A8Unorm)));
        Self {
            state: Mutex::new(State {
                textures,
                shaders: Arena::new(),
                screen,
                submitted: 0,
                completed: 0,
                presented: 0,
                draws: 0,
            }),
            stall: AtomicBool::new(false),
            lost: AtomicBool::new(false),
            triangles: AtomicU64::new(0),
        }
    }

    /// While stalled, submissions execute but their fences never signal. Clearing the stall
    /// completes everything submitted so far.
    pub fn set_stall(&self, stall: bool) {
        self.stall.store(stall, Ordering::Release);
        if !stall {
            let mut state = self.state.lock();
            state.completed = state.submitted;
        }
    }

    pub fn simulate_device_lost(&self) {
        log::warn!(target: GRAPHICS, "software device: simulated device loss");
        self.lost.store(true, Ordering::Release);
    }

    pub fn live_texture_count(&self) -> usize {
        self.state.lock().textures.len()
    }

    pub fn live_shader_count(&self) -> usize {
        self.state.lock().shaders.len()
    }

    pub fn present_count(&self) -> u64 {
        self.state.lock().presented
    }

    /// Draw commands executed since creation.
    pub fn draw_count(&self) -> u64 {
        self.state.lock().draws
    }

    pub fn triangle_count(&self) -> u64 {
        self.triangles.load(Ordering::Relaxed)
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.lost.load(Ordering::Acquire) {
            return Err(DeviceError::Lost);
        }
        Ok(())
    }

    fn draw(
        &self,
        state: &mut State,
        target: GpuTexture,
        draw: &DrawCommand,
        vertices: &[BatchVertex],
        indices: &[u32],
    ) -> Result<(), DeviceError> {
        if !state.shaders.contains(draw.vertex_shader.0) || !state.shaders.contains(draw.pixel_shader.0) {
            return Err(DeviceError::InvalidHandle);
        }
        let start = draw.first_index as usize;
        let end = start + draw.index_count as usize;
        let indices = indices.get(start..end).ok_or(DeviceError::InvalidHandle)?;

        // The target's pixels are moved out while drawing and restored afterwards.
        let mut canvas = {
            let t = state.textures.get_mut(target.0).ok_or(DeviceError::InvalidHandle)?;
            SoftTexture {
                width: t.width,
                height: t.height,
                format: t.format,
                pixels: std::mem::take(&mut t.pixels),
            }
        };
        let result = shade_triangles(&state.textures, &mut canvas, target, draw, vertices, indices);
        if let Some(t) = state.textures.get_mut(target.0) {
            t.pixels = canvas.pixels;
        }
        self.triangles.fetch_add(result?, Ordering::Relaxed);
        state.draws += 1;
        Ok(())
    }
}

fn shade_triangles(
    textures: &Arena<SoftTexture>,
    canvas: &mut SoftTexture,
    target: GpuTexture,
    draw: &DrawCommand,
    vertices: &[BatchVertex],
    indices: &[u32],
) -> Result<u64, DeviceError> {
    // Sampling the target itself reads the pre-draw contents.
    let snapshot;
    let source = match draw.textures.first() {
        Some(binding) if binding.texture == target => {
            snapshot = SoftTexture {
                width: canvas.width,
                height: canvas.height,
                format: canvas.format,
                pixels: canvas.pixels.clone(),
            };
            Some((&snapshot, binding.sampler))
        }
        Some(binding) => Some((
            textures.get(binding.texture.0).ok_or(DeviceError::InvalidHandle)?,
            binding.sampler,
        )),
        None => None,
    };

    let mut scratch = Vec::with_capacity(16);
    let mut triangles = 0;
    for tri in indices.chunks_exact(3) {
        let fetch = |i: u32| vertices.get(i as usize).copied().ok_or(DeviceError::InvalidHandle);
        let verts = [fetch(tri[0])?, fetch(tri[1])?, fetch(tri[2])?];
        rasterize(canvas, &verts, |canvas, index, color, uv| {
            let texel = source.map_or(Vec4::ONE, |(tex, sampler)| tex.sample(uv, sampler));
            let dst = canvas.pixels[index];
            canvas.pixels[index] = quantize(canvas.format, draw.blend.blend(texel * color, dst), &mut scratch);
        });
        triangles += 1;
    }
    Ok(triangles)
}

fn blank(width: u32, height: u32, format: TextureFormat) -> SoftTexture {
    SoftTexture {
        width,
        height,
        format,
        pixels: vec![Vec4::new(0.0, 0.0, 0.0, 0.0); width as usize * height as usize],
    }
}

/// Edge function; positive when `p` is on the inner side of `a → b` for the normalized winding.
fn edge(a: Vec2, b: Vec2, p: Vec2) -> f32 {
    (p.x - a.x) * (b.y - a.y) - (p.y - a.y) * (b.x - a.x)
}

/// Ties go to exactly one of two triangles sharing an edge, since they walk it in opposite
/// directions.
fn owns_tie(a: Vec2, b: Vec2) -> bool {
    let d = b - a;
    d.y > 0.0 || (d.y == 0.0 && d.x > 0.0)
}

fn rasterize(
    target: &mut SoftTexture,
    verts: &[BatchVertex; 3],
    mut shade: impl FnMut(&mut SoftTexture, usize, Vec4, Vec2),
) {
    let (w, h) = (target.width as f32, target.height as f32);
    let to_screen = |v: &BatchVertex| Vec2::new((v.position[0] * 0.5 + 0.5) * w, (0.5 - v.position[1] * 0.5) * h);
    let mut order = [0usize, 1, 2];
    let mut p = [to_screen(&verts[0]), to_screen(&verts[1]), to_screen(&verts[2])];
    let mut area = edge(p[0], p[1], p[2]);
    if area == 0.0 || !area.is_finite() {
        return;
    }
    if area < 0.0 {
        p.swap(1, 2);
        order.swap(1, 2);
        area = -area;
    }
    let colors = order.map(|i| Vec4::from_array(verts[i].color.map(|c| c as f32 / 255.0)));
    let uvs = order.map(|i| Vec2::from_array(verts[i].uv1));

    let min = p[0].min(p[1]).min(p[2]).floor().max(Vec2::ZERO);
    let max = p[0].max(p[1]).max(p[2]).ceil().min(Vec2::new(w, h));
    let edges = [(p[1], p[2]), (p[2], p[0]), (p[0], p[1])];
    let ties = edges.map(|(a, b)| owns_tie(a, b));

    for y in min.y as u32..max.y as u32 {
        for x in min.x as u32..max.x as u32 {
            let center = Vec2::new(x as f32 + 0.5, y as f32 + 0.5);
            let mut weights = [0.0f32; 3];
            let mut inside = true;
            for (i, (a, b)) in edges.iter().enumerate() {
                let e = edge(*a, *b, center);
                if e < 0.0 || (e == 0.0 && !ties[i]) {
                    inside = false;
                    break;
                }
                weights[i] = e / area;
            }
            if !inside {
                continue;
            }
            let color = colors[0] * weights[0] + colors[1] * weights[1] + colors[2] * weights[2];
            let uv = uvs[0] * weights[0] + uvs[1] * weights[1] + uvs[2] * weights[2];
            let index = (y * target.width + x) as usize;
            shade(target, index, color, uv);
        }
    }
}

impl GraphicsDevice for SoftwareDevice {
    fn name(&self) -> &str {
        "software"
    }

    fn shader_target(&self) -> ShaderTarget {
        ShaderTarget::Glsl
    }

    fn create_texture(&self, desc: &TextureDescriptor, data: Option<&[u8]>) -> Result<GpuTexture, DeviceError> {
        self.check_lost()?;
        let mut texture = blank(desc.width, desc.height, desc.format);
        if let Some(data) = data {
            write_pixels(&mut texture, data)?;
        }
        Ok(GpuTexture(self.state.lock().textures.insert(texture)))
    }

    fn write_texture(&self, texture: GpuTexture, data: &[u8]) -> Result<(), DeviceError> {
        self.check_lost()?;
        let mut state = self.state.lock();
        let texture = state.textures.get_mut(texture.0).ok_or(DeviceError::InvalidHandle)?;
        write_pixels(texture, data)
    }

    fn read_texture(&self, texture: GpuTexture) -> Result<Vec<u8>, DeviceError> {
        self.wait_idle()?;
        let state = self.state.lock();
        let texture = state.textures.get(texture.0).ok_or(DeviceError::InvalidHandle)?;
        let mut out = Vec::with_capacity(texture.pixels.len() * texture.format.bytes_per_pixel());
        for px in &texture.pixels {
            texture.format.encode_pixel(*px, &mut out);
        }
        Ok(out)
    }

    fn destroy_texture(&self, texture: GpuTexture) {
        self.state.lock().textures.remove(texture.0);
    }

    fn compile_shader(&self, source: &NativeShaderSource<'_>) -> Result<GpuShader, DeviceError> {
        self.check_lost()?;
        if source.code.trim().is_empty() || !source.code.contains("void main") {
            return Err(DeviceError::ShaderCompile(format!(
                "{}: no entry point 'main' in {} shader",
                source.name, source.stage
            )));
        }
        Ok(GpuShader(self.state.lock().shaders.insert(source.stage)))
    }

    fn destroy_shader(&self, shader: GpuShader) {
        self.state.lock().shaders.remove(shader.0);
    }

    fn screen(&self) -> Result<(GpuTexture, u32, u32, TextureFormat), DeviceError> {
        let state = self.state.lock();
        let texture = state.textures.get(state.screen.0).ok_or(DeviceError::InvalidHandle)?;
        Ok((state.screen, texture.width, texture.height, texture.format))
    }

    fn recreate_screen(&self, width: u32, height: u32, format: TextureFormat) -> Result<GpuTexture, DeviceError> {
        self.check_lost()?;
        let mut state = self.state.lock();
        let old = state.screen;
        state.textures.remove(old.0);
        state.screen = GpuTexture(state.textures.insert(blank(width.max(1), height.max(1), format)));
        log::debug!(target: GRAPHICS, "software screen recreated at {}x{} {:?}", width, height, format);
        Ok(state.screen)
    }

    fn submit(&self, frame: &FrameSubmission<'_>) -> Result<FenceValue, DeviceError> {
        self.check_lost()?;
        let mut state = self.state.lock();
        let mut target = None;
        let mut scratch = Vec::with_capacity(16);
        for command in frame.commands {
            match command {
                DeviceCommand::BeginPass { target: t, clear } => {
                    let texture = state.textures.get_mut(t.0).ok_or(DeviceError::InvalidHandle)?;
                    if let Some(color) = clear {
                        let value = quantize(texture.format, color.to_vec4(), &mut scratch);
                        texture.pixels.fill(value);
                    }
                    target = Some(*t);
                }
                DeviceCommand::Draw(draw) => {
                    let t = target.ok_or_else(|| DeviceError::Backend("draw outside of a pass".into()))?;
                    self.draw(&mut state, t, draw, frame.vertices, frame.indices)?;
                }
                DeviceCommand::Copy { src, dst } => {
                    let source = state.textures.get(src.0).ok_or(DeviceError::InvalidHandle)?;
                    let (pixels, size, format) = (source.pixels.clone(), (source.width, source.height), source.format);
                    let dest = state.textures.get_mut(dst.0).ok_or(DeviceError::InvalidHandle)?;
                    if (dest.width, dest.height) != size || dest.format != format {
                        return Err(DeviceError::Unsupported("copy between mismatched textures".into()));
                    }
                    dest.pixels = pixels;
                }
            }
        }
        state.submitted += 1;
        if !self.stall.load(Ordering::Acquire) {
            state.completed = state.submitted;
        }
        Ok(FenceValue(state.submitted))
    }

    fn present(&self) -> Result<(), DeviceError> {
        self.check_lost()?;
        self.state.lock().presented += 1;
        Ok(())
    }

    fn is_fence_complete(&self, fence: FenceValue) -> bool {
        fence.0 <= self.state.lock().completed
    }

    fn wait_fence(&self, fence: FenceValue, timeout: Duration) -> Result<(), DeviceError> {
        self.check_lost()?;
        if self.is_fence_complete(fence) {
            return Ok(());
        }
        // Nothing runs in the background, so a pending fence can only complete by un-stalling.
        std::thread::sleep(timeout.min(Duration::from_millis(1)));
        if self.is_fence_complete(fence) {
            Ok(())
        } else {
            Err(DeviceError::Timeout)
        }
    }

    fn wait_idle(&self) -> Result<(), DeviceError> {
        let submitted = self.state.lock().submitted;
        self.wait_fence(FenceValue(submitted), Duration::ZERO)
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}

fn write_pixels(texture: &mut SoftTexture, data: &[u8]) -> Result<(), DeviceError> {
    let bpp = texture.format.bytes_per_pixel();
    if data.len() != texture.pixels.len() * bpp {
        return Err(DeviceError::Backend(format!(
            "expected {} bytes of pixel data, got {}",
            texture.pixels.len() * bpp,
            data.len()
        )));
    }
    for (px, raw) in texture.pixels.iter_mut().zip(data.chunks_exact(bpp)) {
        *px = texture.format.decode_pixel(raw);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::TextureUsage;
    use crate::materials::AlphaBlend;
    use crate::math::Color;
    use glam::Vec3;

    fn desc(width: u32, height: u32, format: TextureFormat) -> TextureDescriptor {
        TextureDescriptor {
            label: "t".into(),
            width,
            height,
            format,
            usage: TextureUsage::RenderTarget,
        }
    }

    fn shaders(device: &SoftwareDevice) -> (GpuShader, GpuShader) {
        let src = |stage| NativeShaderSource {
            name: "s",
            stage,
            entry_point: "main",
            code: "void main() {}",
        };
        (
            device.compile_shader(&src(ShaderStage::Vertex)).unwrap(),
            device.compile_shader(&src(ShaderStage::Pixel)).unwrap(),
        )
    }

    /// Clip-space quad covering pixels `[x0, x1) × [y0, y1)` of a `size`-square target.
    fn quad(x0: f32, y0: f32, x1: f32, y1: f32, size: f32, color: Color) -> Vec<BatchVertex> {
        let clip = |x: f32, y: f32| Vec3::new(x / size * 2.0 - 1.0, 1.0 - y / size * 2.0, 0.0);
        vec![
            BatchVertex::new(clip(x0, y0), color, Vec2::new(0.0, 0.0), Vec2::ZERO),
            BatchVertex::new(clip(x1, y0), color, Vec2::new(1.0, 0.0), Vec2::ZERO),
            BatchVertex::new(clip(x1, y1), color, Vec2::new(1.0, 1.0), Vec2::ZERO),
            BatchVertex::new(clip(x0, y1), color, Vec2::new(0.0, 1.0), Vec2::ZERO),
        ]
    }

    fn pixel(bytes: &[u8], width: u32, x: u32, y: u32) -> [u8; 4] {
        let i = ((y * width + x) * 4) as usize;
        [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]]
    }

    #[test]
    fn clear_and_quad_cover_expected_pixels() {
        let device = SoftwareDevice::new(4, 4);
        let target = device.create_texture(&desc(16, 16, TextureFormat::R8G8B8A8Unorm), None).unwrap();
        let (vs, ps) = shaders(&device);
        let vertices = quad(0.0, 0.0, 8.0, 8.0, 16.0, Color::WHITE);
        let indices = [0, 1, 2, 0, 2, 3];
        let commands = [
            DeviceCommand::BeginPass {
                target,
                clear: Some(Color::BLACK),
            },
            DeviceCommand::Draw(DrawCommand {
                vertex_shader: vs,
                pixel_shader: ps,
                blend: AlphaBlend::normal(),
                textures: Vec::new(),
                uniforms: Vec::new(),
                first_index: 0,
                index_count: 6,
            }),
        ];
        let fence = device
            .submit(&FrameSubmission {
                commands: &commands,
                vertices: &vertices,
                indices: &indices,
            })
            .unwrap();
        assert!(device.is_fence_complete(fence));

        let bytes = device.read_texture(target).unwrap();
        let mut covered = 0;
        for y in 0..16 {
            for x in 0..16 {
                let expected = if x < 8 && y < 8 { [255; 4] } else { [0, 0, 0, 255] };
                assert_eq!(pixel(&bytes, 16, x, y), expected, "pixel {x},{y}");
                covered += (x < 8 && y < 8) as u32;
            }
        }
        assert_eq!(covered, 64);
        assert_eq!(device.triangle_count(), 2);
    }

    #[test]
    fn shared_diagonal_is_blended_once() {
        let device = SoftwareDevice::new(4, 4);
        let target = device.create_texture(&desc(8, 8, TextureFormat::R8G8B8A8Unorm), None).unwrap();
        let (vs, ps) = shaders(&device);
        let vertices = quad(0.0, 0.0, 8.0, 8.0, 8.0, Color::rgba(255, 255, 255, 128));
        let indices = [0, 1, 2, 0, 2, 3];
        let commands = [
            DeviceCommand::BeginPass {
                target,
                clear: Some(Color::BLACK),
            },
            DeviceCommand::Draw(DrawCommand {
                vertex_shader: vs,
                pixel_shader: ps,
                blend: AlphaBlend::normal(),
                textures: Vec::new(),
                uniforms: Vec::new(),
                first_index: 0,
                index_count: 6,
            }),
        ];
        device
            .submit(&FrameSubmission {
                commands: &commands,
                vertices: &vertices,
                indices: &indices,
            })
            .unwrap();
        let bytes = device.read_texture(target).unwrap();
        let diagonal = pixel(&bytes, 8, 3, 3);
        let off_diagonal = pixel(&bytes, 8, 5, 2);
        assert_eq!(diagonal, off_diagonal);
    }

    #[test]
    fn copy_requires_matching_textures() {
        let device = SoftwareDevice::new(4, 4);
        let a = device.create_texture(&desc(2, 2, TextureFormat::R8G8B8A8Unorm), Some(&[7u8; 16][..])).unwrap();
        let b = device.create_texture(&desc(2, 2, TextureFormat::R8G8B8A8Unorm), None).unwrap();
        let c = device.create_texture(&desc(2, 2, TextureFormat::R32G32B32A32Float), None).unwrap();
        let submit = |src, dst| {
            device.submit(&FrameSubmission {
                commands: &[DeviceCommand::Copy { src, dst }],
                vertices: &[],
                indices: &[],
            })
        };
        submit(a, b).unwrap();
        assert_eq!(device.read_texture(b).unwrap(), vec![7; 16]);
        assert!(matches!(submit(a, c), Err(DeviceError::Unsupported(_))));
    }

    #[test]
    fn stall_times_out_until_released() {
        let device = SoftwareDevice::new(2, 2);
        device.set_stall(true);
        let fence = device
            .submit(&FrameSubmission {
                commands: &[],
                vertices: &[],
                indices: &[],
            })
            .unwrap();
        assert!(!device.is_fence_complete(fence));
        assert_eq!(device.wait_fence(fence, Duration::from_millis(1)), Err(DeviceError::Timeout));
        device.set_stall(false);
        assert!(device.wait_fence(fence, Duration::ZERO).is_ok());
    }

    #[test]
    fn lost_device_rejects_work() {
        let device = SoftwareDevice::new(2, 2);
        device.simulate_device_lost();
        assert!(device.is_lost());
        assert_eq!(
            device.create_texture(&desc(1, 1, TextureFormat::R8Unorm), None),
            Err(DeviceError::Lost)
        );
    }

    #[test]
    fn recreated_screen_invalidates_old_handle() {
        let device = SoftwareDevice::new(4, 4);
        let (old, ..) = device.screen().unwrap();
        let new = device.recreate_screen(8, 2, TextureFormat::R8G8B8A8Unorm).unwrap();
        assert_ne!(old, new);
        assert_eq!(device.read_texture(old), Err(DeviceError::InvalidHandle));
        let (_, w, h, _) = device.screen().unwrap();
        assert_eq!((w, h), (8, 2));
    }

    #[test]
    fn compile_requires_entry_point() {
        let device = SoftwareDevice::new(1, 1);
        let err = device
            .compile_shader(&NativeShaderSource {
                name: "empty",
                stage: ShaderStage::Pixel,
                entry_point: "main",
                code: "  ",
            })
            .unwrap_err();
        assert!(matches!(err, DeviceError::ShaderCompile(_)));
        assert_eq!(device.live_shader_count(), 0);
    }
}
