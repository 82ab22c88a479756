// src/shader_compiler.rs
//! WGSL → naga IR → native shader pipeline.
//!
//! 1. parse and validate (both report `ParseError`, with the rendered diagnostic)
//! 2. transpile into the device's language, fixed when the compiler is created
//! 3. hand the result to the device's native compiler
//! 4. reflect bindings from the IR
//!
//! Failures never produce a `Shader`. Each distinct failure is logged once.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use naga::valid::{Capabilities, ModuleInfo, ValidationFlags, Validator};
use naga::{AddressSpace, Module, TypeInner};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::{FileError, ShaderCompileError, ShaderErrorKind};
use crate::file::FileSystem;
use crate::gpu::{GraphicsDevice, NativeShaderSource, ShaderTarget};
use crate::logging::{LogOnce, SHADER};
use crate::shader::{
    Shader, ShaderReflection, ShaderReflectionSampler, ShaderReflectionTexture, ShaderReflectionUniform, ShaderStage,
    UniformBufferLayout,
};

pub struct ShaderCompiler {
    device: Arc<dyn GraphicsDevice>,
    target: ShaderTarget,
    native_compiles: AtomicUsize,
    failures: LogOnce,
}

impl ShaderCompiler {
    pub fn new(device: Arc<dyn GraphicsDevice>) -> Self {
        let target = device.shader_target();
        log::debug!(target: SHADER, "shader compiler targets {:?} on {}", target, device.name());
        Self {
            device,
            target,
            native_compiles: AtomicUsize::new(0),
            failures: LogOnce::default(),
        }
    }

    pub fn target(&self) -> ShaderTarget {
        self.target
    }

    /// How many times the device's native compiler was invoked.
    pub fn native_compile_count(&self) -> usize {
        self.native_compiles.load(Ordering::Relaxed)
    }

    pub fn compile(&self, name: &str, source: &str, stage: ShaderStage) -> Result<Arc<Shader>, ShaderCompileError> {
        self.compile_inner(name, source, stage).map_err(|err| {
            let key = format!("shader:{}:{}:{:x}", name, stage, xxh3_64(source.as_bytes()));
            self.failures.error(SHADER, &key, &err);
            err
        })
    }

    /// Reads `path` through the file system and compiles it.
    pub fn compile_from_file(
        &self,
        files: &FileSystem,
        name: &str,
        path: &str,
        stage: ShaderStage,
    ) -> Result<Arc<Shader>, ShaderCompileError> {
        let source = match files.read_to_string(path) {
            Ok(source) => source,
            Err(err) => {
                let message = match err {
                    FileError::NotFound { .. } => "File not found".to_string(),
                    other => other.to_string(),
                };
                let err = ShaderCompileError::new(ShaderErrorKind::ParseError, name, message, "");
                self.failures.error(SHADER, &format!("shader-file:{path}"), format_args!("{err} ({path})"));
                return Err(err);
            }
        };
        self.compile(name, &source, stage)
    }

    fn compile_inner(&self, name: &str, source: &str, stage: ShaderStage) -> Result<Arc<Shader>, ShaderCompileError> {
        let fail = |kind, message: String| ShaderCompileError::new(kind, name, message, source);

        let module = naga::front::wgsl::parse_str(source)
            .map_err(|e| fail(ShaderErrorKind::ParseError, e.emit_to_string(source)))?;
        let info = Validator::new(ValidationFlags::all(), Capabilities::default())
            .validate(&module)
            .map_err(|e| fail(ShaderErrorKind::ParseError, e.emit_to_string(source)))?;

        let ep_index = find_entry_point(&module, stage)
            .ok_or_else(|| fail(ShaderErrorKind::ParseError, format!("no {stage} entry point")))?;
        let entry_point = module.entry_points[ep_index].name.clone();

        let native_code = transpile(self.target, &module, &info, stage, &entry_point)
            .map_err(|message| fail(ShaderErrorKind::TranspileError, message))?;

        self.native_compiles.fetch_add(1, Ordering::Relaxed);
        let gpu = self
            .device
            .compile_shader(&NativeShaderSource {
                name,
                stage,
                entry_point: &entry_point,
                code: &native_code,
            })
            .map_err(|e| fail(ShaderErrorKind::NativeCompileError, e.to_string()))?;

        // from here on the device handle must be released on failure
        let reflection = match reflect(&module, &info, ep_index) {
            Ok(reflection) => reflection,
            Err(message) => {
                self.device.destroy_shader(gpu);
                return Err(fail(ShaderErrorKind::ReflectionError, message));
            }
        };

        log::debug!(
            target: SHADER,
            "compiled {} shader '{}' ({} textures, {} uniform buffers)",
            stage,
            name,
            reflection.textures.len(),
            reflection.uniform_buffers.len()
        );
        Ok(Arc::new(Shader::new(
            name.to_string(),
            stage,
            entry_point,
            source.to_string(),
            native_code,
            self.target,
            reflection,
            gpu,
            Arc::clone(&self.device),
        )))
    }
}

/// Picks the entry point for `stage`, preferring one called `main`.
fn find_entry_point(module: &Module, stage: ShaderStage) -> Option<usize> {
    let stage = stage.to_naga();
    let mut candidates = module.entry_points.iter().enumerate().filter(|(_, ep)| ep.stage == stage);
    let first = candidates.next()?;
    if first.1.name == "main" {
        return Some(first.0);
    }
    Some(candidates.find(|(_, ep)| ep.name == "main").map_or(first.0, |(i, _)| i))
}

fn transpile(
    target: ShaderTarget,
    module: &Module,
    info: &ModuleInfo,
    stage: ShaderStage,
    entry_point: &str,
) -> Result<String, String> {
    use naga::back;

    match target {
        ShaderTarget::Wgsl => {
            let mut writer = back::wgsl::Writer::new(String::new(), back::wgsl::WriterFlags::empty());
            writer.write(module, info).map_err(|e| e.to_string())?;
            Ok(writer.finish())
        }
        ShaderTarget::Hlsl => {
            let mut out = String::new();
            let options = back::hlsl::Options::default();
            back::hlsl::Writer::new(&mut out, &options)
                .write(module, info, None)
                .map_err(|e| e.to_string())?;
            Ok(out)
        }
        ShaderTarget::Msl => {
            let options = back::msl::Options::default();
            let pipeline = back::msl::PipelineOptions::default();
            back::msl::write_string(module, info, &options, &pipeline)
                .map(|(code, _)| code)
                .map_err(|e| e.to_string())
        }
        ShaderTarget::Glsl => {
            let mut out = String::new();
            let options = back::glsl::Options {
                version: back::glsl::Version::Desktop(430),
                ..Default::default()
            };
            let pipeline = back::glsl::PipelineOptions {
                shader_stage: stage.to_naga(),
                entry_point: entry_point.to_string(),
                multiview: None,
            };
            let mut writer = back::glsl::Writer::new(
                &mut out,
                module,
                info,
                &options,
                &pipeline,
                naga::proc::BoundsCheckPolicies::default(),
            )
            .map_err(|e| e.to_string())?;
            writer.write().map_err(|e| e.to_string())?;
            Ok(out)
        }
    }
}

/// Collects the bindings the entry point actually uses.
fn reflect(module: &Module, info: &ModuleInfo, ep_index: usize) -> Result<ShaderReflection, String> {
    let function_info = info.get_entry_point(ep_index);
    let gctx = module.to_ctx();

    let mut textures = Vec::new();
    let mut samplers = Vec::new();
    let mut uniform_buffers = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for (handle, var) in module.global_variables.iter() {
        if function_info[handle].is_empty() {
            continue;
        }
        let Some(binding) = var.binding.as_ref() else {
            continue;
        };
        let name = var.name.clone().unwrap_or_else(|| format!("_group{}_binding{}", binding.group, binding.binding));
        if !seen.insert((binding.group, binding.binding)) {
            return Err(format!("'{name}' reuses group {} binding {}", binding.group, binding.binding));
        }
        let ty = &module.types[var.ty];
        match (&ty.inner, var.space) {
            (TypeInner::Image { .. }, _) => textures.push(ShaderReflectionTexture {
                name,
                slot: 0,
                group: binding.group,
                binding: binding.binding,
            }),
            (TypeInner::Sampler { .. }, _) => samplers.push(ShaderReflectionSampler {
                name,
                slot: 0,
                group: binding.group,
                binding: binding.binding,
            }),
            (TypeInner::BindingArray { .. }, _) => {
                return Err(format!("binding array '{name}' is not supported"));
            }
            (TypeInner::Struct { members, span }, AddressSpace::Uniform) => {
                let members = members
                    .iter()
                    .map(|m| ShaderReflectionUniform {
                        name: m.name.clone().unwrap_or_default(),
                        offset: m.offset,
                        size: module.types[m.ty].inner.size(gctx),
                    })
                    .collect();
                uniform_buffers.push(UniformBufferLayout {
                    name,
                    group: binding.group,
                    binding: binding.binding,
                    size: *span,
                    members,
                });
            }
            (inner, AddressSpace::Uniform) => {
                let size = inner.size(gctx);
                uniform_buffers.push(UniformBufferLayout {
                    members: vec![ShaderReflectionUniform {
                        name: name.clone(),
                        offset: 0,
                        size,
                    }],
                    name,
                    group: binding.group,
                    binding: binding.binding,
                    size,
                });
            }
            (_, space) => {
                log::debug!(target: SHADER, "skipping '{}' in {:?} space", name, space);
            }
        }
    }

    textures.sort_by_key(|t| (t.group, t.binding));
    for (slot, texture) in textures.iter_mut().enumerate() {
        texture.slot = slot as u32;
    }
    samplers.sort_by_key(|s| (s.group, s.binding));
    for (slot, sampler) in samplers.iter_mut().enumerate() {
        sampler.slot = slot as u32;
    }
    uniform_buffers.sort_by_key(|b| (b.group, b.binding));

    let ep = &module.entry_points[ep_index];
    Ok(ShaderReflection {
        textures,
        samplers,
        uniform_buffers,
        num_threads: if ep.stage == naga::ShaderStage::Compute {
            ep.workgroup_size
        } else {
            [0; 3]
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDevice;

    fn compiler() -> ShaderCompiler {
        ShaderCompiler::new(Arc::new(SoftwareDevice::new(16, 16)))
    }

    const PIXEL: &str = r#"
struct Params {
    tint: vec4<f32>,
    transform: mat4x4<f32>,
    strength: f32,
};

@group(0) @binding(0) var mainTex: texture_2d<f32>;
@group(0) @binding(1) var mainSamp: sampler;
@group(0) @binding(2) var unusedTex: texture_2d<f32>;
@group(1) @binding(0) var<uniform> params: Params;

@fragment
fn main(@location(0) uv: vec2<f32>) -> @location(0) vec4<f32> {
    let c = textureSample(mainTex, mainSamp, uv) * params.tint;
    return (params.transform * c) * params.strength;
}
"#;

    #[test]
    fn syntax_error_is_a_parse_error() {
        let compiler = compiler();
        let err = compiler
            .compile("broken", "@fragment fn main( -> @location(0) vec4<f32> { return vec4<f32>(1.0); }", ShaderStage::Pixel)
            .unwrap_err();
        assert_eq!(err.kind, ShaderErrorKind::ParseError);
        assert!(!err.message.is_empty());
        assert!(err.expanded_source.contains("fn main("));
        assert_eq!(compiler.native_compile_count(), 0);
    }

    #[test]
    fn validation_error_is_a_parse_error() {
        let src = "@fragment fn main() -> @location(0) vec4<f32> { return 1.0; }";
        let err = compiler().compile("mistyped", src, ShaderStage::Pixel).unwrap_err();
        assert_eq!(err.kind, ShaderErrorKind::ParseError);
        assert!(!err.message.is_empty());
    }

    #[test]
    fn missing_stage_entry_point_is_rejected() {
        let err = compiler().compile("px", PIXEL, ShaderStage::Vertex).unwrap_err();
        assert_eq!(err.kind, ShaderErrorKind::ParseError);
        assert!(err.message.contains("vertex"));
    }

    #[test]
    fn reflects_used_bindings_with_offsets() {
        let compiler = compiler();
        let shader = compiler.compile("px", PIXEL, ShaderStage::Pixel).unwrap();
        let reflection = shader.reflection();

        let names: Vec<&str> = reflection.textures.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["mainTex"]);
        assert_eq!(reflection.samplers[0].name, "mainSamp");
        assert_eq!(reflection.samplers[0].slot, 0);

        let (buffer, tint) = reflection.uniform("tint").unwrap();
        assert_eq!((buffer.group, buffer.binding), (1, 0));
        assert_eq!((tint.offset, tint.size), (0, 16));
        let (_, transform) = reflection.uniform("transform").unwrap();
        assert_eq!((transform.offset, transform.size), (16, 64));
        let (_, strength) = reflection.uniform("strength").unwrap();
        assert_eq!((strength.offset, strength.size), (80, 4));
        assert!(buffer.size >= 84);

        assert_eq!(shader.stage(), ShaderStage::Pixel);
        assert_eq!(shader.target(), ShaderTarget::Glsl);
        assert!(shader.native_code().contains("void main"));
        assert_eq!(compiler.native_compile_count(), 1);
    }

    #[test]
    fn compute_reports_workgroup_size() {
        let src = r#"
@group(0) @binding(0) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(8, 4, 1)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = data[id.x] * 2.0;
}
"#;
        let shader = compiler().compile("double", src, ShaderStage::Compute).unwrap();
        assert_eq!(shader.reflection().num_threads, [8, 4, 1]);
        assert!(shader.reflection().uniform_buffers.is_empty());
    }

    #[test]
    fn prefers_main_among_entry_points() {
        let src = r#"
@fragment fn other() -> @location(0) vec4<f32> { return vec4<f32>(0.0); }
@fragment fn main() -> @location(0) vec4<f32> { return vec4<f32>(1.0); }
"#;
        let shader = compiler().compile("two", src, ShaderStage::Pixel).unwrap();
        assert_eq!(shader.entry_point(), "main");
    }

    #[test]
    fn missing_file_reports_file_not_found() {
        let err = compiler()
            .compile_from_file(&FileSystem::new(), "nope", "shaders/nope.wgsl", ShaderStage::Pixel)
            .unwrap_err();
        assert_eq!(err.kind, ShaderErrorKind::ParseError);
        assert_eq!(err.message, "File not found");
    }

    #[test]
    fn compiles_from_package() {
        let files = FileSystem::new();
        let mut package = crate::file::Package::new("shaders");
        package.insert("px.wgsl", PIXEL.as_bytes().to_vec());
        files.add_package(package);
        let shader = compiler().compile_from_file(&files, "px", "px.wgsl", ShaderStage::Pixel).unwrap();
        assert_eq!(shader.code(), PIXEL);
    }
}
