// src/lib.rs
//! slop2d: a 2D renderer with a resource lifecycle and a frame-submission pipeline.
//!
//! Textures, shaders, materials and fonts are loaded through [`Resources`] and
//! [`ShaderCompiler`]; drawables are queued on the [`Renderer`], batched into a
//! [`CommandList`] and submitted by [`Graphics`] to a [`GraphicsDevice`].

// ----------------------------------------------------------------------------
// Core
// ----------------------------------------------------------------------------
pub mod config;
pub mod context;
pub mod error;
pub mod file;
pub mod fps_counter;
pub mod logging;
pub mod math;
pub mod profiler;

// ----------------------------------------------------------------------------
// Resources
// ----------------------------------------------------------------------------
pub mod builtin_shader;
pub mod font;
pub mod materials;
pub mod resource_manager;
pub mod shader;
pub mod shader_compiler;
pub mod texture;

// ----------------------------------------------------------------------------
// Rendering
// ----------------------------------------------------------------------------
pub mod camera;
pub mod command_list;
pub mod culling;
pub mod gpu;
pub mod graphics;
pub mod post_processing;
pub mod rendered;
pub mod renderer;

// ----------------------------------------------------------------------------
// Platform
// ----------------------------------------------------------------------------
pub mod engine;
pub mod input_system;
pub mod platform;

pub use builtin_shader::{BuiltinShaderType, BuiltinShaders};
pub use camera::{RenderPassParameter, RenderTargetCareType, RenderedCamera};
pub use command_list::CommandList;
pub use config::{DeviceType, EngineConfig};
pub use context::{Context, OptionContext};
pub use culling::CullingSystem;
pub use engine::Engine;
pub use error::{Error, Result};
pub use file::{FileSystem, Package};
pub use font::Font;
pub use fps_counter::{FpsCounter, FramerateMode};
pub use gpu::GraphicsDevice;
pub use graphics::{Graphics, GraphicsState};
pub use input_system::{ButtonState, InputSystem, Key, MouseButton};
pub use materials::{AlphaBlend, Material};
pub use math::{Aabb2, BatchVertex, Color, RectF};
pub use platform::{HeadlessPlatform, Platform, WinitPlatform};
pub use profiler::{ProfileRecord, Profiler};
pub use post_processing::{BloomTargets, PostEffect, PostOptions};
pub use rendered::{Rendered, RenderedPolygon, RenderedSprite, RenderedText, WritingDirection};
pub use renderer::{RenderStats, Renderer};
pub use resource_manager::Resources;
pub use shader::{Shader, ShaderStage};
pub use shader_compiler::ShaderCompiler;
pub use texture::{RenderTexture, Texture, Texture2D, TextureBase, TextureConfig, TextureFormat};
