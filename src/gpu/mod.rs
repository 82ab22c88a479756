// src/gpu/mod.rs
//! The native device as an opaque capability.
//!
//! Everything above this module talks to a `dyn GraphicsDevice`: create/destroy textures and
//! shaders, execute a recorded frame, present, and wait on fences. Two backends ship:
//! - [`software::SoftwareDevice`]: headless CPU rasterizer, synchronous, used by the tests.
//! - [`wgpu_device::WgpuDevice`]: wgpu 22 with an optional window surface.

pub mod software;
pub mod wgpu_device;

use std::time::Duration;

use crate::error::DeviceError;
use crate::materials::AlphaBlend;
use crate::math::{BatchVertex, Color};
use crate::resource_manager::Handle;
use crate::shader::ShaderStage;
use crate::texture::{SamplerState, TextureFormat};

/// Device-side texture handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GpuTexture(pub Handle);

/// Device-side compiled shader handle.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct GpuShader(pub Handle);

/// Monotonic submission counter. A fence completes when the device finished that submission.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FenceValue(pub u64);

/// Shading language the device's native compiler consumes.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ShaderTarget {
    Hlsl,
    Msl,
    Glsl,
    Wgsl,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    /// Uploaded once, sampled by shaders.
    Sampled,
    /// Render target, also sampleable and copyable.
    RenderTarget,
}

#[derive(Clone, Debug)]
pub struct TextureDescriptor {
    pub label: String,
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    pub usage: TextureUsage,
}

/// Input to the native compiler: already transpiled code plus its entry point.
#[derive(Clone, Copy, Debug)]
pub struct NativeShaderSource<'a> {
    pub name: &'a str,
    pub stage: ShaderStage,
    pub entry_point: &'a str,
    pub code: &'a str,
}

/// A texture bound for one draw, with the sampler paired to it.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureBinding {
    pub group: u32,
    pub binding: u32,
    pub texture: GpuTexture,
    /// `(group, binding)` of the sampler, if the shader declares one for this slot.
    pub sampler_binding: Option<(u32, u32)>,
    pub sampler: SamplerState,
}

/// Bytes of one uniform buffer, laid out per shader reflection.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformBinding {
    pub stage: ShaderStage,
    pub group: u32,
    pub binding: u32,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DrawCommand {
    pub vertex_shader: GpuShader,
    pub pixel_shader: GpuShader,
    pub blend: AlphaBlend,
    pub textures: Vec<TextureBinding>,
    pub uniforms: Vec<UniformBinding>,
    /// Range into the submission's index list. Indices address the vertex list directly.
    pub first_index: u32,
    pub index_count: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum DeviceCommand {
    /// Subsequent draws go to `target`; cleared first when `clear` is set.
    BeginPass { target: GpuTexture, clear: Option<Color> },
    Draw(DrawCommand),
    Copy { src: GpuTexture, dst: GpuTexture },
}

/// One frame's worth of recorded work.
#[derive(Clone, Copy, Debug)]
pub struct FrameSubmission<'a> {
    pub commands: &'a [DeviceCommand],
    pub vertices: &'a [BatchVertex],
    pub indices: &'a [u32],
}

pub trait GraphicsDevice: Send + Sync {
    fn name(&self) -> &str;

    /// Fixed for the lifetime of the device.
    fn shader_target(&self) -> ShaderTarget;

    fn create_texture(&self, desc: &TextureDescriptor, data: Option<&[u8]>) -> Result<GpuTexture, DeviceError>;

    fn write_texture(&self, texture: GpuTexture, data: &[u8]) -> Result<(), DeviceError>;

    /// Tightly packed pixels in the texture's format. Waits for all submitted work first.
    fn read_texture(&self, texture: GpuTexture) -> Result<Vec<u8>, DeviceError>;

    fn destroy_texture(&self, texture: GpuTexture);

    /// The native compiler step. Errors carry the compiler's message.
    fn compile_shader(&self, source: &NativeShaderSource<'_>) -> Result<GpuShader, DeviceError>;

    fn destroy_shader(&self, shader: GpuShader);

    /// Current screen target, its size and format.
    fn screen(&self) -> Result<(GpuTexture, u32, u32, TextureFormat), DeviceError>;

    /// Recreates the screen target. The previous screen handle stops resolving.
    fn recreate_screen(&self, width: u32, height: u32, format: TextureFormat) -> Result<GpuTexture, DeviceError>;

    fn submit(&self, frame: &FrameSubmission<'_>) -> Result<FenceValue, DeviceError>;

    /// Shows the screen target.
    fn present(&self) -> Result<(), DeviceError>;

    fn is_fence_complete(&self, fence: FenceValue) -> bool;

    fn wait_fence(&self, fence: FenceValue, timeout: Duration) -> Result<(), DeviceError>;

    fn wait_idle(&self) -> Result<(), DeviceError>;

    fn is_lost(&self) -> bool;
}
