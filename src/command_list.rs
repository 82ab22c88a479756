// src/command_list.rs
//! Per-frame command recording.
//!
//! A `CommandList` records target binds, draws and copies for one frame slot into a flat
//! [`DeviceCommand`] stream plus shared vertex/index storage, then hands the whole thing to
//! the device in one submission.
//!
//! States: `Unbound → TargetSet → Recording → Submitted`. Binding a new target ends the
//! previous target's pass, so its pending draws stay with it. Everything fails once the list
//! was submitted, until the frame driver recycles it for the slot's next frame.

use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};

use crate::camera::RenderPassParameter;
use crate::error::CommandListError;
use crate::gpu::{DeviceCommand, DrawCommand, FrameSubmission, GpuTexture, UniformBinding};
use crate::materials::{AlphaBlend, Material};
use crate::math::{BatchVertex, Color};
use crate::shader::{Shader, ShaderStage};
use crate::texture::{RenderTexture, Texture, TextureBase, TextureFormat};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CommandListState {
    Unbound,
    TargetSet,
    Recording,
    Submitted,
}

/// One run of geometry sharing shaders, material, primary texture and blend.
///
/// Vertices are already in clip space; indices are relative to `vertices`.
pub(crate) struct DrawBatch<'a> {
    pub vertices: &'a [BatchVertex],
    pub indices: &'a [u32],
    pub vertex_shader: &'a Arc<Shader>,
    pub pixel_shader: &'a Arc<Shader>,
    pub material: &'a Material,
    pub primary: Option<&'a TextureBase>,
    pub blend: AlphaBlend,
    /// Per-draw uniform values applied over the material's, which stays untouched.
    pub overrides: &'a [(&'a str, Vec4)],
}

pub struct CommandList {
    state: CommandListState,
    commands: Vec<DeviceCommand>,
    vertices: Vec<BatchVertex>,
    indices: Vec<u32>,
    target: Option<RenderTexture>,
    pass_open: bool,
    screen: RenderTexture,
    requested_screen_format: Option<TextureFormat>,
    sprite_vs: Arc<Shader>,
    fallback: TextureBase,
    /// Resources referenced by recorded commands, held until the slot is recycled.
    retained_textures: Vec<TextureBase>,
    retained_shaders: Vec<Arc<Shader>>,
    draw_calls: usize,
}

impl std::fmt::Debug for CommandList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandList")
            .field("state", &self.state)
            .field("commands", &self.commands.len())
            .field("vertices", &self.vertices.len())
            .field("draw_calls", &self.draw_calls)
            .finish()
    }
}

impl CommandList {
    pub(crate) fn new(screen: RenderTexture, sprite_vs: Arc<Shader>, fallback: TextureBase) -> Self {
        Self {
            state: CommandListState::Unbound,
            commands: Vec::new(),
            vertices: Vec::new(),
            indices: Vec::new(),
            target: None,
            pass_open: false,
            screen,
            requested_screen_format: None,
            sprite_vs,
            fallback,
            retained_textures: Vec::new(),
            retained_shaders: Vec::new(),
            draw_calls: 0,
        }
    }

    /// Clears everything recorded for the previous use of this slot.
    pub(crate) fn begin(&mut self, screen: RenderTexture) {
        self.recycle();
        self.screen = screen;
        self.state = CommandListState::Unbound;
    }

    /// Releases retained resources once the device finished with them.
    pub(crate) fn recycle(&mut self) {
        self.commands.clear();
        self.vertices.clear();
        self.indices.clear();
        self.target = None;
        self.pass_open = false;
        self.retained_textures.clear();
        self.retained_shaders.clear();
        self.draw_calls = 0;
    }

    pub fn state(&self) -> CommandListState {
        self.state
    }

    pub fn render_target(&self) -> Option<&RenderTexture> {
        self.target.as_ref()
    }

    pub fn draw_call_count(&self) -> usize {
        self.draw_calls
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    fn check_open(&self) -> Result<(), CommandListError> {
        if self.state == CommandListState::Submitted {
            return Err(CommandListError::Submitted);
        }
        Ok(())
    }

    /// Binds `target`, clearing it when `params` asks for it.
    pub fn set_render_target(&mut self, target: &RenderTexture, params: &RenderPassParameter) -> Result<(), CommandListError> {
        self.check_open()?;
        let gpu = target.gpu_texture().map_err(|_| CommandListError::StaleTexture)?;
        self.commands.push(DeviceCommand::BeginPass {
            target: gpu,
            clear: params.clear_color_if_any(),
        });
        self.pass_open = true;
        self.target = Some(target.clone());
        self.retained_textures.push(target.into());
        self.state = CommandListState::TargetSet;
        Ok(())
    }

    /// Binds `target` and draws a fullscreen quad into it with `material`.
    pub fn render_to_render_texture(
        &mut self,
        material: &Material,
        target: &RenderTexture,
        params: &RenderPassParameter,
    ) -> Result<(), CommandListError> {
        self.set_render_target(target, params)?;
        self.render_to_render_target(material)
    }

    /// Draws a fullscreen quad with `material` into the bound target.
    pub fn render_to_render_target(&mut self, material: &Material) -> Result<(), CommandListError> {
        self.check_open()?;
        if self.target.is_none() {
            return Err(CommandListError::NoRenderTarget);
        }
        let pixel_shader = material.shader(ShaderStage::Pixel).ok_or(CommandListError::MissingShader("pixel"))?;
        let vertex_shader = material
            .shader(ShaderStage::Vertex)
            .unwrap_or_else(|| Arc::clone(&self.sprite_vs));
        let corner = |x: f32, y: f32, u: f32, v: f32| BatchVertex::new(Vec3::new(x, y, 0.5), Color::WHITE, Vec2::new(u, v), Vec2::ZERO);
        let vertices = [
            corner(-1.0, 1.0, 0.0, 0.0),
            corner(1.0, 1.0, 1.0, 0.0),
            corner(1.0, -1.0, 1.0, 1.0),
            corner(-1.0, -1.0, 0.0, 1.0),
        ];
        self.draw(&DrawBatch {
            vertices: &vertices,
            indices: &[0, 1, 2, 0, 2, 3],
            vertex_shader: &vertex_shader,
            pixel_shader: &pixel_shader,
            material,
            primary: None,
            blend: material.alpha_blend(),
            overrides: &[],
        })
    }

    /// Copies `src` into `dst`. Both must share format and size.
    pub fn copy_texture(&mut self, src: &RenderTexture, dst: &RenderTexture) -> Result<(), CommandListError> {
        self.check_open()?;
        let src_gpu = src.gpu_texture().map_err(|_| CommandListError::StaleTexture)?;
        let dst_gpu = dst.gpu_texture().map_err(|_| CommandListError::StaleTexture)?;
        if src.format() != dst.format() {
            return Err(CommandListError::FormatMismatch {
                src: src.format(),
                dst: dst.format(),
            });
        }
        if src.size() != dst.size() {
            return Err(CommandListError::SizeMismatch {
                src: src.size().into(),
                dst: dst.size().into(),
            });
        }
        self.commands.push(DeviceCommand::Copy {
            src: src_gpu,
            dst: dst_gpu,
        });
        // the bound target's pass has to be resumed before the next draw
        self.pass_open = false;
        self.retained_textures.push(src.into());
        self.retained_textures.push(dst.into());
        Ok(())
    }

    /// The screen target of this frame.
    pub fn screen_texture(&self) -> RenderTexture {
        self.screen.clone()
    }

    /// Format the screen will have from the next frame on.
    pub fn screen_texture_format(&self) -> TextureFormat {
        self.requested_screen_format.unwrap_or_else(|| self.screen.format())
    }

    /// Requests a new screen format. Applied when the next frame begins; screen textures taken
    /// before then go stale.
    pub fn set_screen_texture_format(&mut self, format: TextureFormat) {
        self.requested_screen_format = (format != self.screen.format()).then_some(format);
    }

    pub(crate) fn take_requested_screen_format(&mut self) -> Option<TextureFormat> {
        self.requested_screen_format.take()
    }

    fn ensure_pass(&mut self) -> Result<GpuTexture, CommandListError> {
        let target = self.target.as_ref().ok_or(CommandListError::NoRenderTarget)?;
        let gpu = target.gpu_texture().map_err(|_| CommandListError::StaleTexture)?;
        if !self.pass_open {
            self.commands.push(DeviceCommand::BeginPass { target: gpu, clear: None });
            self.pass_open = true;
        }
        Ok(gpu)
    }

    /// Appends one run. Material values are copied now, so later edits do not affect it.
    pub(crate) fn draw(&mut self, batch: &DrawBatch<'_>) -> Result<(), CommandListError> {
        self.check_open()?;
        if batch.indices.is_empty() {
            return Ok(());
        }
        let textures = batch
            .material
            .texture_bindings(batch.pixel_shader, batch.primary, &self.fallback)
            .map_err(|_| CommandListError::StaleTexture)?;
        let target = self.ensure_pass()?;
        if textures.iter().any(|t| t.texture == target) {
            return Err(CommandListError::TargetIsSource);
        }

        let mut uniforms: Vec<UniformBinding> = batch.material.uniform_bindings(batch.vertex_shader, batch.overrides);
        for binding in batch.material.uniform_bindings(batch.pixel_shader, batch.overrides) {
            if !uniforms.iter().any(|u| (u.group, u.binding) == (binding.group, binding.binding)) {
                uniforms.push(binding);
            }
        }

        let base = self.vertices.len() as u32;
        let first_index = self.indices.len() as u32;
        self.vertices.extend_from_slice(batch.vertices);
        self.indices.extend(batch.indices.iter().map(|i| i + base));
        self.commands.push(DeviceCommand::Draw(DrawCommand {
            vertex_shader: batch.vertex_shader.gpu(),
            pixel_shader: batch.pixel_shader.gpu(),
            blend: batch.blend,
            textures,
            uniforms,
            first_index,
            index_count: batch.indices.len() as u32,
        }));

        if let Some(primary) = batch.primary {
            self.retained_textures.push(primary.clone());
        }
        for slot in &batch.pixel_shader.reflection().textures {
            if let Some(texture) = batch.material.texture(&slot.name) {
                self.retained_textures.push(texture);
            }
        }
        self.retained_shaders.push(Arc::clone(batch.vertex_shader));
        self.retained_shaders.push(Arc::clone(batch.pixel_shader));
        self.draw_calls += 1;
        self.state = CommandListState::Recording;
        Ok(())
    }

    /// Seals the list and exposes it for submission.
    pub(crate) fn finish(&mut self) -> Result<FrameSubmission<'_>, CommandListError> {
        self.check_open()?;
        self.state = CommandListState::Submitted;
        Ok(FrameSubmission {
            commands: &self.commands,
            vertices: &self.vertices,
            indices: &self.indices,
        })
    }
}
