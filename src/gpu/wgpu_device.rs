// src/gpu/wgpu_device.rs
//! wgpu 22 backend.
//!
//! The screen is an offscreen RGBA target; `present` blits it onto the window surface with a
//! fullscreen triangle, so screen textures can be sampled, copied and read back like any other
//! render texture. Shaders arrive as WGSL and become `wgpu::ShaderModule`s; validation errors
//! are caught with an error scope and reported as native compile failures.
//!
//! Pipelines use automatic layouts and are cached per (vertex shader, pixel shader, blend,
//! target format). Fences are submission counters signalled by `on_submitted_work_done`.

use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use wgpu::util::DeviceExt;
use winit::window::Window;

use super::{
    DeviceCommand, DrawCommand, FenceValue, FrameSubmission, GpuShader, GpuTexture, GraphicsDevice,
    NativeShaderSource, ShaderTarget, TextureDescriptor, TextureUsage,
};
use crate::error::DeviceError;
use crate::logging::GRAPHICS;
use crate::materials::{AlphaBlend, BlendFactor, BlendOp};
use crate::math::BatchVertex;
use crate::resource_manager::Arena;
use crate::texture::{SamplerState, TextureFilter, TextureFormat, TextureWrapMode};

const BLIT_WGSL: &str = r#"
struct VsOut {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@vertex
fn vs_main(@builtin(vertex_index) index: u32) -> VsOut {
    let uv = vec2<f32>(f32((index << 1u) & 2u), f32(index & 2u));
    var out: VsOut;
    out.position = vec4<f32>(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0, 0.0, 1.0);
    out.uv = uv;
    return out;
}

@group(0) @binding(0) var src: texture_2d<f32>;
@group(0) @binding(1) var samp: sampler;

@fragment
fn fs_main(input: VsOut) -> @location(0) vec4<f32> {
    return textureSample(src, samp, input.uv);
}
"#;

fn texture_format(format: TextureFormat) -> wgpu::TextureFormat {
    match format {
        TextureFormat::R8G8B8A8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        TextureFormat::R16G16B16A16Float => wgpu::TextureFormat::Rgba16Float,
        TextureFormat::R32G32B32A32Float => wgpu::TextureFormat::Rgba32Float,
        TextureFormat::R8G8B8A8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
        TextureFormat::R16G16Float => wgpu::TextureFormat::Rg16Float,
        TextureFormat::R8Unorm => wgpu::TextureFormat::R8Unorm,
    }
}

fn blend_factor(factor: BlendFactor) -> wgpu::BlendFactor {
    match factor {
        BlendFactor::Zero => wgpu::BlendFactor::Zero,
        BlendFactor::One => wgpu::BlendFactor::One,
        BlendFactor::SrcColor => wgpu::BlendFactor::Src,
        BlendFactor::OneMinusSrcColor => wgpu::BlendFactor::OneMinusSrc,
        BlendFactor::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        BlendFactor::DstColor => wgpu::BlendFactor::Dst,
        BlendFactor::OneMinusDstColor => wgpu::BlendFactor::OneMinusDst,
        BlendFactor::DstAlpha => wgpu::BlendFactor::DstAlpha,
        BlendFactor::OneMinusDstAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
    }
}

fn blend_component(src: BlendFactor, dst: BlendFactor, op: BlendOp) -> wgpu::BlendComponent {
    let operation = match op {
        BlendOp::Add => wgpu::BlendOperation::Add,
        BlendOp::Subtract => wgpu::BlendOperation::Subtract,
        BlendOp::ReverseSubtract => wgpu::BlendOperation::ReverseSubtract,
        BlendOp::Min => wgpu::BlendOperation::Min,
        BlendOp::Max => wgpu::BlendOperation::Max,
    };
    // min/max ignore factors and wgpu requires them to be One
    let (src, dst) = match op {
        BlendOp::Min | BlendOp::Max => (wgpu::BlendFactor::One, wgpu::BlendFactor::One),
        _ => (blend_factor(src), blend_factor(dst)),
    };
    wgpu::BlendComponent {
        src_factor: src,
        dst_factor: dst,
        operation,
    }
}

fn blend_state(blend: &AlphaBlend) -> wgpu::BlendState {
    wgpu::BlendState {
        color: blend_component(blend.src_color, blend.dst_color, blend.color_op),
        alpha: blend_component(blend.src_alpha, blend.dst_alpha, blend.alpha_op),
    }
}

struct DeviceTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
    format: TextureFormat,
}

struct ShaderModule {
    module: wgpu::ShaderModule,
    entry_point: String,
}

#[derive(Copy, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    vertex: GpuShader,
    pixel: GpuShader,
    blend: AlphaBlend,
    format: TextureFormat,
}

struct State {
    textures: Arena<DeviceTexture>,
    shaders: Arena<ShaderModule>,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,
    samplers: HashMap<SamplerState, wgpu::Sampler>,
    screen: GpuTexture,
    submitted: u64,
}

struct Presenter {
    surface: wgpu::Surface<'static>,
    config: Mutex<wgpu::SurfaceConfiguration>,
    pipeline: wgpu::RenderPipeline,
    sampler: wgpu::Sampler,
}

pub struct WgpuDevice {
    device: wgpu::Device,
    queue: wgpu::Queue,
    presenter: Option<Presenter>,
    adapter_name: String,
    state: Mutex<State>,
    completed: Arc<AtomicU64>,
    lost: Arc<AtomicBool>,
}

impl WgpuDevice {
    /// Creates the device and, when `window` is given, a surface presenting the screen target.
    pub fn new(window: Option<Arc<Window>>, width: u32, height: u32, vsync: bool) -> Result<Self, DeviceError> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            dx12_shader_compiler: Default::default(),
            flags: wgpu::InstanceFlags::empty(),
            gles_minor_version: wgpu::Gles3MinorVersion::Automatic,
        });

        let surface = match window {
            Some(window) => Some(
                instance
                    .create_surface(window)
                    .map_err(|e| DeviceError::Backend(format!("failed to create surface: {e}")))?,
            ),
            None => None,
        };

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: surface.as_ref(),
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| DeviceError::Unsupported("no suitable graphics adapter".into()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("slop2d_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::default(),
                memory_hints: Default::default(),
            },
            None,
        ))
        .map_err(|e| DeviceError::Backend(format!("failed to request device: {e}")))?;

        let lost = Arc::new(AtomicBool::new(false));
        {
            let lost = Arc::clone(&lost);
            device.set_device_lost_callback(move |reason, message| {
                log::error!(target: GRAPHICS, "wgpu device lost ({:?}): {}", reason, message);
                lost.store(true, Ordering::Release);
            });
        }
        device.on_uncaptured_error(Box::new(|err| {
            log::error!(target: GRAPHICS, "wgpu error: {}", err);
        }));

        let (width, height) = (width.max(1), height.max(1));
        let presenter = match surface {
            Some(surface) => Some(Self::presenter(&device, &adapter, surface, width, height, vsync)?),
            None => None,
        };

        let info = adapter.get_info();
        log::info!(target: GRAPHICS, "wgpu adapter: {} ({:?})", info.name, info.backend);

        let mut textures = Arena::new();
        let screen = GpuTexture(textures.insert(create_device_texture(
            &device,
            "screen",
            width,
            height,
            TextureFormat::R8G8B8A8Unorm,
            TextureUsage::RenderTarget,
        )));

        Ok(Self {
            device,
            queue,
            presenter,
            adapter_name: format!("wgpu ({})", info.name),
            state: Mutex::new(State {
                textures,
                shaders: Arena::new(),
                pipelines: HashMap::new(),
                samplers: HashMap::new(),
                screen,
                submitted: 0,
            }),
            completed: Arc::new(AtomicU64::new(0)),
            lost,
        })
    }

    fn presenter(
        device: &wgpu::Device,
        adapter: &wgpu::Adapter,
        surface: wgpu::Surface<'static>,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> Result<Presenter, DeviceError> {
        let caps = surface.get_capabilities(adapter);
        let format = caps
            .formats
            .iter()
            .copied()
            .find(|f| !f.is_srgb())
            .or_else(|| caps.formats.first().copied())
            .ok_or_else(|| DeviceError::Unsupported("surface reports no formats".into()))?;
        let config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width,
            height,
            present_mode: if vsync {
                wgpu::PresentMode::AutoVsync
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode: caps.alpha_modes.first().copied().unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(device, &config);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("screen_blit"),
            source: wgpu::ShaderSource::Wgsl(BLIT_WGSL.into()),
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("screen_blit"),
            layout: None,
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: "vs_main",
                compilation_options: Default::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: "fs_main",
                compilation_options: Default::default(),
                targets: &[Some(format.into())],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("screen_blit"),
            ..Default::default()
        });
        Ok(Presenter {
            surface,
            config: Mutex::new(config),
            pipeline,
            sampler,
        })
    }

    fn check_lost(&self) -> Result<(), DeviceError> {
        if self.lost.load(Ordering::Acquire) {
            return Err(DeviceError::Lost);
        }
        Ok(())
    }

    fn sampler(&self, state: &mut State, sampler: SamplerState) {
        state.samplers.entry(sampler).or_insert_with(|| {
            let address = match sampler.wrap {
                TextureWrapMode::Clamp => wgpu::AddressMode::ClampToEdge,
                TextureWrapMode::Repeat => wgpu::AddressMode::Repeat,
            };
            let filter = match sampler.filter {
                TextureFilter::Nearest => wgpu::FilterMode::Nearest,
                TextureFilter::Linear => wgpu::FilterMode::Linear,
            };
            self.device.create_sampler(&wgpu::SamplerDescriptor {
                label: Some("slop2d_sampler"),
                address_mode_u: address,
                address_mode_v: address,
                address_mode_w: address,
                mag_filter: filter,
                min_filter: filter,
                ..Default::default()
            })
        });
    }

    fn pipeline(&self, state: &mut State, key: PipelineKey) -> Result<(), DeviceError> {
        if state.pipelines.contains_key(&key) {
            return Ok(());
        }
        let vs = state.shaders.get(key.vertex.0).ok_or(DeviceError::InvalidHandle)?;
        let ps = state.shaders.get(key.pixel.0).ok_or(DeviceError::InvalidHandle)?;
        let attributes = wgpu::vertex_attr_array![0 => Float32x3, 1 => Unorm8x4, 2 => Float32x2, 3 => Float32x2];
        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("slop2d_batch"),
            layout: None,
            vertex: wgpu::VertexState {
                module: &vs.module,
                entry_point: &vs.entry_point,
                compilation_options: Default::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: BatchVertex::STRIDE as wgpu::BufferAddress,
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes: &attributes,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &ps.module,
                entry_point: &ps.entry_point,
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: texture_format(key.format),
                    blend: Some(blend_state(&key.blend)),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        });
        log::debug!(target: GRAPHICS, "created pipeline ({} pipelines cached)", state.pipelines.len() + 1);
        state.pipelines.insert(key, pipeline);
        Ok(())
    }

    /// Bind groups for one draw, indexed by group number. Gaps get empty groups.
    fn bind_groups(&self, state: &State, draw: &DrawCommand, key: &PipelineKey) -> Result<Vec<wgpu::BindGroup>, DeviceError> {
        let pipeline = state.pipelines.get(key).ok_or(DeviceError::InvalidHandle)?;
        let max_group = draw
            .textures
            .iter()
            .map(|t| t.group)
            .chain(draw.textures.iter().filter_map(|t| t.sampler_binding.map(|(g, _)| g)))
            .chain(draw.uniforms.iter().map(|u| u.group))
            .max();
        let Some(max_group) = max_group else {
            return Ok(Vec::new());
        };

        let buffers: Vec<(u32, u32, wgpu::Buffer)> = draw
            .uniforms
            .iter()
            .map(|u| {
                let buffer = self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("slop2d_uniforms"),
                    contents: &u.data,
                    usage: wgpu::BufferUsages::UNIFORM,
                });
                (u.group, u.binding, buffer)
            })
            .collect();

        let mut groups = Vec::with_capacity(max_group as usize + 1);
        for group in 0..=max_group {
            let mut entries = Vec::new();
            for texture in draw.textures.iter() {
                let resource = state.textures.get(texture.texture.0).ok_or(DeviceError::InvalidHandle)?;
                if texture.group == group {
                    entries.push(wgpu::BindGroupEntry {
                        binding: texture.binding,
                        resource: wgpu::BindingResource::TextureView(&resource.view),
                    });
                }
                if let Some((g, binding)) = texture.sampler_binding {
                    if g == group {
                        let sampler = state.samplers.get(&texture.sampler).ok_or(DeviceError::InvalidHandle)?;
                        entries.push(wgpu::BindGroupEntry {
                            binding,
                            resource: wgpu::BindingResource::Sampler(sampler),
                        });
                    }
                }
            }
            for (g, binding, buffer) in buffers.iter() {
                if *g == group {
                    entries.push(wgpu::BindGroupEntry {
                        binding: *binding,
                        resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer,
                            offset: 0,
                            size: NonZeroU64::new(buffer.size()),
                        }),
                    });
                }
            }
            groups.push(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("slop2d_bind_group"),
                layout: &pipeline.get_bind_group_layout(group),
                entries: &entries,
            }));
        }
        Ok(groups)
    }

    fn read_back(&self, texture: &DeviceTexture) -> Result<Vec<u8>, DeviceError> {
        let bpp = texture.format.bytes_per_pixel() as u32;
        let unpadded = texture.width * bpp;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("slop2d_readback"),
            size: padded as u64 * texture.height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("slop2d_readback") });
        encoder.copy_texture_to_buffer(
            texture.texture.as_image_copy(),
            wgpu::ImageCopyBuffer {
                buffer: &buffer,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(texture.height),
                },
            },
            wgpu::Extent3d {
                width: texture.width,
                height: texture.height,
                depth_or_array_layers: 1,
            },
        );
        self.queue.submit(Some(encoder.finish()));

        let slice = buffer.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|_| DeviceError::Backend("readback callback dropped".into()))?
            .map_err(|e| DeviceError::Backend(format!("readback failed: {e}")))?;

        let mapped = slice.get_mapped_range();
        let mut out = Vec::with_capacity((unpadded * texture.height) as usize);
        for row in mapped.chunks(padded as usize) {
            out.extend_from_slice(&row[..unpadded as usize]);
        }
        drop(mapped);
        buffer.unmap();
        Ok(out)
    }
}

fn create_device_texture(
    device: &wgpu::Device,
    label: &str,
    width: u32,
    height: u32,
    format: TextureFormat,
    usage: TextureUsage,
) -> DeviceTexture {
    let usage = match usage {
        TextureUsage::Sampled => {
            wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST | wgpu::TextureUsages::COPY_SRC
        }
        TextureUsage::RenderTarget => {
            wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC
                | wgpu::TextureUsages::RENDER_ATTACHMENT
        }
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: texture_format(format),
        usage,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    DeviceTexture {
        texture,
        view,
        width,
        height,
        format,
    }
}

impl GraphicsDevice for WgpuDevice {
    fn name(&self) -> &str {
        &self.adapter_name
    }

    fn shader_target(&self) -> ShaderTarget {
        ShaderTarget::Wgsl
    }

    fn create_texture(&self, desc: &TextureDescriptor, data: Option<&[u8]>) -> Result<GpuTexture, DeviceError> {
        self.check_lost()?;
        let texture = create_device_texture(&self.device, &desc.label, desc.width, desc.height, desc.format, desc.usage);
        let handle = GpuTexture(self.state.lock().textures.insert(texture));
        if let Some(data) = data {
            self.write_texture(handle, data)?;
        }
        Ok(handle)
    }

    fn write_texture(&self, texture: GpuTexture, data: &[u8]) -> Result<(), DeviceError> {
        self.check_lost()?;
        let state = self.state.lock();
        let texture = state.textures.get(texture.0).ok_or(DeviceError::InvalidHandle)?;
        let row = texture.width * texture.format.bytes_per_pixel() as u32;
        if data.len() != (row * texture.height) as usize {
            return Err(DeviceError::Backend(format!(
                "expected {} bytes of pixel data, got {}",
                row * texture.height,
                data.len()
            )));
        }
        self.queue.write_texture(
            texture.texture.as_image_copy(),
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(row),
                rows_per_image: Some(texture.height),
            },
            wgpu::Extent3d {
                width: texture.width,
                height: texture.height,
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn read_texture(&self, texture: GpuTexture) -> Result<Vec<u8>, DeviceError> {
        self.check_lost()?;
        let state = self.state.lock();
        let texture = state.textures.get(texture.0).ok_or(DeviceError::InvalidHandle)?;
        self.read_back(texture)
    }

    fn destroy_texture(&self, texture: GpuTexture) {
        if let Some(texture) = self.state.lock().textures.remove(texture.0) {
            texture.texture.destroy();
        }
    }

    fn compile_shader(&self, source: &NativeShaderSource<'_>) -> Result<GpuShader, DeviceError> {
        self.check_lost()?;
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(source.name),
            source: wgpu::ShaderSource::Wgsl(source.code.into()),
        });
        if let Some(err) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(DeviceError::ShaderCompile(err.to_string()));
        }
        let handle = self.state.lock().shaders.insert(ShaderModule {
            module,
            entry_point: source.entry_point.to_string(),
        });
        Ok(GpuShader(handle))
    }

    fn destroy_shader(&self, shader: GpuShader) {
        let mut state = self.state.lock();
        if state.shaders.remove(shader.0).is_some() {
            state.pipelines.retain(|key, _| key.vertex != shader && key.pixel != shader);
        }
    }

    fn screen(&self) -> Result<(GpuTexture, u32, u32, TextureFormat), DeviceError> {
        let state = self.state.lock();
        let texture = state.textures.get(state.screen.0).ok_or(DeviceError::InvalidHandle)?;
        Ok((state.screen, texture.width, texture.height, texture.format))
    }

    fn recreate_screen(&self, width: u32, height: u32, format: TextureFormat) -> Result<GpuTexture, DeviceError> {
        self.check_lost()?;
        let (width, height) = (width.max(1), height.max(1));
        if let Some(presenter) = &self.presenter {
            let mut config = presenter.config.lock();
            config.width = width;
            config.height = height;
            presenter.surface.configure(&self.device, &config);
        }
        let texture = create_device_texture(&self.device, "screen", width, height, format, TextureUsage::RenderTarget);
        let mut state = self.state.lock();
        let old = state.screen;
        if let Some(old) = state.textures.remove(old.0) {
            old.texture.destroy();
        }
        state.screen = GpuTexture(state.textures.insert(texture));
        Ok(state.screen)
    }

    fn submit(&self, frame: &FrameSubmission<'_>) -> Result<FenceValue, DeviceError> {
        self.check_lost()?;
        let mut state = self.state.lock();

        // Resolve every pipeline and sampler before any pass borrows the state.
        let mut target_format = None;
        for command in frame.commands {
            match command {
                DeviceCommand::BeginPass { target, .. } => {
                    target_format = Some(state.textures.get(target.0).ok_or(DeviceError::InvalidHandle)?.format);
                }
                DeviceCommand::Draw(draw) => {
                    let format = target_format.ok_or_else(|| DeviceError::Backend("draw outside of a pass".into()))?;
                    let key = PipelineKey {
                        vertex: draw.vertex_shader,
                        pixel: draw.pixel_shader,
                        blend: draw.blend,
                        format,
                    };
                    self.pipeline(&mut state, key)?;
                    for texture in &draw.textures {
                        self.sampler(&mut state, texture.sampler);
                    }
                }
                DeviceCommand::Copy { .. } => {}
            }
        }

        let vertex_buffer = (!frame.vertices.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("slop2d_vertices"),
                contents: bytemuck::cast_slice(frame.vertices),
                usage: wgpu::BufferUsages::VERTEX,
            })
        });
        let index_buffer = (!frame.indices.is_empty()).then(|| {
            self.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("slop2d_indices"),
                contents: bytemuck::cast_slice(frame.indices),
                usage: wgpu::BufferUsages::INDEX,
            })
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("slop2d_frame") });
        let mut i = 0;
        while i < frame.commands.len() {
            match &frame.commands[i] {
                DeviceCommand::BeginPass { target, clear } => {
                    let end = frame.commands[i + 1..]
                        .iter()
                        .position(|c| !matches!(c, DeviceCommand::Draw(_)))
                        .map_or(frame.commands.len(), |p| i + 1 + p);
                    let target_texture = state.textures.get(target.0).ok_or(DeviceError::InvalidHandle)?;
                    let mut prepared = Vec::new();
                    for command in &frame.commands[i + 1..end] {
                        if let DeviceCommand::Draw(draw) = command {
                            let key = PipelineKey {
                                vertex: draw.vertex_shader,
                                pixel: draw.pixel_shader,
                                blend: draw.blend,
                                format: target_texture.format,
                            };
                            let groups = self.bind_groups(&state, draw, &key)?;
                            prepared.push((key, groups, draw));
                        }
                    }
                    let load = match clear {
                        Some(c) => {
                            let v = c.to_vec4();
                            wgpu::LoadOp::Clear(wgpu::Color {
                                r: v.x as f64,
                                g: v.y as f64,
                                b: v.z as f64,
                                a: v.w as f64,
                            })
                        }
                        None => wgpu::LoadOp::Load,
                    };
                    let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                        label: Some("slop2d_pass"),
                        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                            view: &target_texture.view,
                            resolve_target: None,
                            ops: wgpu::Operations {
                                load,
                                store: wgpu::StoreOp::Store,
                            },
                        })],
                        depth_stencil_attachment: None,
                        occlusion_query_set: None,
                        timestamp_writes: None,
                    });
                    if let (Some(vertices), Some(indices)) = (&vertex_buffer, &index_buffer) {
                        pass.set_vertex_buffer(0, vertices.slice(..));
                        pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                        for (key, groups, draw) in &prepared {
                            let pipeline = state.pipelines.get(key).ok_or(DeviceError::InvalidHandle)?;
                            pass.set_pipeline(pipeline);
                            for (index, group) in groups.iter().enumerate() {
                                pass.set_bind_group(index as u32, group, &[]);
                            }
                            pass.draw_indexed(draw.first_index..draw.first_index + draw.index_count, 0, 0..1);
                        }
                    }
                    drop(pass);
                    i = end;
                }
                DeviceCommand::Copy { src, dst } => {
                    let src = state.textures.get(src.0).ok_or(DeviceError::InvalidHandle)?;
                    let dst = state.textures.get(dst.0).ok_or(DeviceError::InvalidHandle)?;
                    if (src.width, src.height, src.format) != (dst.width, dst.height, dst.format) {
                        return Err(DeviceError::Unsupported("copy between mismatched textures".into()));
                    }
                    encoder.copy_texture_to_texture(
                        src.texture.as_image_copy(),
                        dst.texture.as_image_copy(),
                        wgpu::Extent3d {
                            width: src.width,
                            height: src.height,
                            depth_or_array_layers: 1,
                        },
                    );
                    i += 1;
                }
                DeviceCommand::Draw(_) => {
                    return Err(DeviceError::Backend("draw outside of a pass".into()));
                }
            }
        }

        self.queue.submit(Some(encoder.finish()));
        state.submitted += 1;
        let fence = state.submitted;
        let completed = Arc::clone(&self.completed);
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(fence, Ordering::AcqRel);
        });
        Ok(FenceValue(fence))
    }

    fn present(&self) -> Result<(), DeviceError> {
        self.check_lost()?;
        let Some(presenter) = &self.presenter else {
            return Ok(());
        };
        let frame = match presenter.surface.get_current_texture() {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!(target: GRAPHICS, "failed to acquire swap chain texture: {:?}; reconfiguring", err);
                presenter.surface.configure(&self.device, &presenter.config.lock());
                presenter
                    .surface
                    .get_current_texture()
                    .map_err(|e| DeviceError::Backend(format!("failed to acquire frame: {e:?}")))?
            }
        };
        let view = frame.texture.create_view(&wgpu::TextureViewDescriptor::default());

        let state = self.state.lock();
        let screen = state.textures.get(state.screen.0).ok_or(DeviceError::InvalidHandle)?;
        let group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("screen_blit"),
            layout: &presenter.pipeline.get_bind_group_layout(0),
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&screen.view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&presenter.sampler),
                },
            ],
        });
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some("screen_blit") });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("screen_blit"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&presenter.pipeline);
            pass.set_bind_group(0, &group, &[]);
            pass.draw(0..3, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
        frame.present();
        Ok(())
    }

    fn is_fence_complete(&self, fence: FenceValue) -> bool {
        fence.0 <= self.completed.load(Ordering::Acquire)
    }

    fn wait_fence(&self, fence: FenceValue, timeout: Duration) -> Result<(), DeviceError> {
        let deadline = Instant::now() + timeout;
        loop {
            self.check_lost()?;
            if self.is_fence_complete(fence) {
                return Ok(());
            }
            let _ = self.device.poll(wgpu::Maintain::Poll);
            if self.is_fence_complete(fence) {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(DeviceError::Timeout);
            }
            std::thread::sleep(Duration::from_micros(200));
        }
    }

    fn wait_idle(&self) -> Result<(), DeviceError> {
        self.check_lost()?;
        let _ = self.device.poll(wgpu::Maintain::Wait);
        Ok(())
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }
}
