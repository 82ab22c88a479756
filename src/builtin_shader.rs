// src/builtin_shader.rs
//! Engine-provided shaders, compiled on first request and cached by type.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::shader::{Shader, ShaderStage};
use crate::shader_compiler::ShaderCompiler;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BuiltinShaderType {
    SpriteUnlitVS,
    SpriteUnlitPS,
    FontUnlitPS,
    Downsample,
    GaussianBlur,
    GrayScale,
    HighLuminance,
    LightBloom,
    Sepia,
    TextureMix,
}

impl BuiltinShaderType {
    pub const ALL: [BuiltinShaderType; 10] = [
        BuiltinShaderType::SpriteUnlitVS,
        BuiltinShaderType::SpriteUnlitPS,
        BuiltinShaderType::FontUnlitPS,
        BuiltinShaderType::Downsample,
        BuiltinShaderType::GaussianBlur,
        BuiltinShaderType::GrayScale,
        BuiltinShaderType::HighLuminance,
        BuiltinShaderType::LightBloom,
        BuiltinShaderType::Sepia,
        BuiltinShaderType::TextureMix,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BuiltinShaderType::SpriteUnlitVS => "SpriteUnlitVS",
            BuiltinShaderType::SpriteUnlitPS => "SpriteUnlitPS",
            BuiltinShaderType::FontUnlitPS => "FontUnlitPS",
            BuiltinShaderType::Downsample => "Downsample",
            BuiltinShaderType::GaussianBlur => "GaussianBlur",
            BuiltinShaderType::GrayScale => "GrayScale",
            BuiltinShaderType::HighLuminance => "HighLuminance",
            BuiltinShaderType::LightBloom => "LightBloom",
            BuiltinShaderType::Sepia => "Sepia",
            BuiltinShaderType::TextureMix => "TextureMix",
        }
    }

    pub fn stage(self) -> ShaderStage {
        match self {
            BuiltinShaderType::SpriteUnlitVS => ShaderStage::Vertex,
            _ => ShaderStage::Pixel,
        }
    }

    pub fn source(self) -> &'static str {
        match self {
            BuiltinShaderType::SpriteUnlitVS => SPRITE_UNLIT_VS,
            BuiltinShaderType::SpriteUnlitPS => SPRITE_UNLIT_PS,
            BuiltinShaderType::FontUnlitPS => FONT_UNLIT_PS,
            BuiltinShaderType::Downsample => DOWNSAMPLE_PS,
            BuiltinShaderType::GaussianBlur => GAUSSIAN_BLUR_PS,
            BuiltinShaderType::GrayScale => GRAY_SCALE_PS,
            BuiltinShaderType::HighLuminance => HIGH_LUMINANCE_PS,
            BuiltinShaderType::LightBloom => LIGHT_BLOOM_PS,
            BuiltinShaderType::Sepia => SEPIA_PS,
            BuiltinShaderType::TextureMix => TEXTURE_MIX_PS,
        }
    }
}

/// Lazily compiled built-in shaders. A second request for the same type is a map lookup.
pub struct BuiltinShaders {
    compiler: Arc<ShaderCompiler>,
    cache: Mutex<HashMap<BuiltinShaderType, Arc<Shader>>>,
}

impl BuiltinShaders {
    pub fn new(compiler: Arc<ShaderCompiler>) -> Self {
        Self {
            compiler,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn compiler(&self) -> &Arc<ShaderCompiler> {
        &self.compiler
    }

    /// Returns the cached shader or compiles it. A built-in that fails to compile is fatal to the
    /// engine, so the error is `Error::BuiltinShader`. The compiler has already logged the failure.
    pub fn create(&self, ty: BuiltinShaderType) -> Result<Arc<Shader>> {
        let mut cache = self.cache.lock();
        if let Some(shader) = cache.get(&ty) {
            return Ok(Arc::clone(shader));
        }
        let shader = self
            .compiler
            .compile(ty.name(), ty.source(), ty.stage())
            .map_err(|source| Error::BuiltinShader { name: ty.name(), source })?;
        cache.insert(ty, Arc::clone(&shader));
        Ok(shader)
    }

    /// Compiles every built-in up front.
    pub fn warm_up(&self) -> Result<()> {
        for ty in BuiltinShaderType::ALL {
            self.create(ty)?;
        }
        Ok(())
    }

    pub fn cached_count(&self) -> usize {
        self.cache.lock().len()
    }

    /// Drops every cached shader; used on device reinitialization.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

// ---------- Sources ----------

const SPRITE_UNLIT_VS: &str = r#"
struct VertexInput {
    @location(0) position: vec3<f32>,
    @location(1) color: vec4<f32>,
    @location(2) uv1: vec2<f32>,
    @location(3) uv2: vec2<f32>,
};

struct VertexOutput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
    @location(1) uv1: vec2<f32>,
    @location(2) uv2: vec2<f32>,
};

@vertex
fn main(input: VertexInput) -> VertexOutput {
    var out: VertexOutput;
    out.position = vec4<f32>(input.position, 1.0);
    out.color = input.color;
    out.uv1 = input.uv1;
    out.uv2 = input.uv2;
    return out;
}
"#;

/// Shared by every pixel shader: the interpolants written by the sprite vertex shader.
macro_rules! pixel_header {
    () => {
        r#"
struct PixelInput {
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
    @location(1) uv1: vec2<f32>,
    @location(2) uv2: vec2<f32>,
};

@group(0) @binding(0) var mainTex: texture_2d<f32>;
@group(0) @binding(1) var mainSamp: sampler;
"#
    };
}

const SPRITE_UNLIT_PS: &str = concat!(
    pixel_header!(),
    r#"
@fragment
fn main(input: PixelInput) -> @location(0) vec4<f32> {
    return textureSample(mainTex, mainSamp, input.uv1) * input.color;
}
"#
);

const FONT_UNLIT_PS: &str = concat!(
    pixel_header!(),
    r#"
struct Consts {
    weight: vec4<f32>,
};
@group(1) @binding(0) var<uniform> consts: Consts;

@fragment
fn main(input: PixelInput) -> @location(0) vec4<f32> {
    let c = textureSample(mainTex, mainSamp, input.uv1);
    let a = clamp(c.a + consts.weight.x, 0.0, 1.0);
    return vec4<f32>(c.rgb, a) * input.color;
}
"#
);

const DOWNSAMPLE_PS: &str = concat!(
    pixel_header!(),
    r#"
struct Consts {
    texelSize: vec4<f32>,
};
@group(1) @binding(0) var<uniform> consts: Consts;

@fragment
fn main(input: PixelInput) -> @location(0) vec4<f32> {
    let d = consts.texelSize.xy * 0.5;
    var c = textureSample(mainTex, mainSamp, input.uv1 + vec2<f32>(-d.x, -d.y));
    c += textureSample(mainTex, mainSamp, input.uv1 + vec2<f32>(d.x, -d.y));
    c += textureSample(mainTex, mainSamp, input.uv1 + vec2<f32>(-d.x, d.y));
    c += textureSample(mainTex, mainSamp, input.uv1 + vec2<f32>(d.x, d.y));
    return c * 0.25;
}
"#
);

const GAUSSIAN_BLUR_PS: &str = concat!(
    pixel_header!(),
    r#"
struct Consts {
    direction: vec4<f32>,
};
@group(1) @binding(0) var<uniform> consts: Consts;

@fragment
fn main(input: PixelInput) -> @location(0) vec4<f32> {
    let dir = consts.direction.xy;
    var c = textureSample(mainTex, mainSamp, input.uv1) * 0.227027;
    c += textureSample(mainTex, mainSamp, input.uv1 + dir * 1.0) * 0.1945946;
    c += textureSample(mainTex, mainSamp, input.uv1 - dir * 1.0) * 0.1945946;
    c += textureSample(mainTex, mainSamp, input.uv1 + dir * 2.0) * 0.1216216;
    c += textureSample(mainTex, mainSamp, input.uv1 - dir * 2.0) * 0.1216216;
    c += textureSample(mainTex, mainSamp, input.uv1 + dir * 3.0) * 0.054054;
    c += textureSample(mainTex, mainSamp, input.uv1 - dir * 3.0) * 0.054054;
    c += textureSample(mainTex, mainSamp, input.uv1 + dir * 4.0) * 0.016216;
    c += textureSample(mainTex, mainSamp, input.uv1 - dir * 4.0) * 0.016216;
    return c;
}
"#
);

const GRAY_SCALE_PS: &str = concat!(
    pixel_header!(),
    r#"
@fragment
fn main(input: PixelInput) -> @location(0) vec4<f32> {
    let c = textureSample(mainTex, mainSamp, input.uv1);
    let y = dot(c.rgb, vec3<f32>(0.299, 0.587, 0.114));
    return vec4<f32>(y, y, y, c.a);
}
"#
);

const HIGH_LUMINANCE_PS: &str = concat!(
    pixel_header!(),
    r#"
struct Consts {
    threshold: vec4<f32>,
};
@group(1) @binding(0) var<uniform> consts: Consts;

@fragment
fn main(input: PixelInput) -> @location(0) vec4<f32> {
    let c = textureSample(mainTex, mainSamp, input.uv1);
    let y = dot(c.rgb, vec3<f32>(0.299, 0.587, 0.114));
    let k = smoothstep(consts.threshold.x, consts.threshold.x + 0.05, y);
    return vec4<f32>(c.rgb * k, c.a);
}
"#
);

const LIGHT_BLOOM_PS: &str = concat!(
    pixel_header!(),
    r#"
@group(0) @binding(2) var bloomTex: texture_2d<f32>;
@group(0) @binding(3) var bloomSamp: sampler;

struct Consts {
    intensity: vec4<f32>,
};
@group(1) @binding(0) var<uniform> consts: Consts;

@fragment
fn main(input: PixelInput) -> @location(0) vec4<f32> {
    let base = textureSample(mainTex, mainSamp, input.uv1);
    let glow = textureSample(bloomTex, bloomSamp, input.uv1);
    return vec4<f32>(base.rgb + glow.rgb * consts.intensity.x, base.a);
}
"#
);

const SEPIA_PS: &str = concat!(
    pixel_header!(),
    r#"
@fragment
fn main(input: PixelInput) -> @location(0) vec4<f32> {
    let c = textureSample(mainTex, mainSamp, input.uv1);
    let r = dot(c.rgb, vec3<f32>(0.393, 0.769, 0.189));
    let g = dot(c.rgb, vec3<f32>(0.349, 0.686, 0.168));
    let b = dot(c.rgb, vec3<f32>(0.272, 0.534, 0.131));
    return vec4<f32>(min(vec3<f32>(r, g, b), vec3<f32>(1.0)), c.a);
}
"#
);

const TEXTURE_MIX_PS: &str = concat!(
    pixel_header!(),
    r#"
@group(0) @binding(2) var subTex: texture_2d<f32>;
@group(0) @binding(3) var subSamp: sampler;

struct Consts {
    mixRatio: vec4<f32>,
};
@group(1) @binding(0) var<uniform> consts: Consts;

@fragment
fn main(input: PixelInput) -> @location(0) vec4<f32> {
    let a = textureSample(mainTex, mainSamp, input.uv1);
    let b = textureSample(subTex, subSamp, input.uv1);
    return mix(a, b, consts.mixRatio.x);
}
"#
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ShaderErrorKind;
    use crate::gpu::software::SoftwareDevice;

    fn builtins() -> BuiltinShaders {
        BuiltinShaders::new(Arc::new(ShaderCompiler::new(Arc::new(SoftwareDevice::new(16, 16)))))
    }

    #[test]
    fn second_request_hits_the_cache() {
        let builtins = builtins();
        let first = builtins.create(BuiltinShaderType::SpriteUnlitPS).unwrap();
        assert_eq!(builtins.compiler().native_compile_count(), 1);
        let second = builtins.create(BuiltinShaderType::SpriteUnlitPS).unwrap();
        assert_eq!(builtins.compiler().native_compile_count(), 1);
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(first.reflection(), second.reflection());
    }

    #[test]
    fn every_builtin_compiles() {
        let builtins = builtins();
        builtins.warm_up().unwrap();
        assert_eq!(builtins.cached_count(), BuiltinShaderType::ALL.len());
        assert_eq!(builtins.compiler().native_compile_count(), BuiltinShaderType::ALL.len());
    }

    #[test]
    fn builtin_reflection_names() {
        let builtins = builtins();
        let font = builtins.create(BuiltinShaderType::FontUnlitPS).unwrap();
        assert_eq!(font.reflection().textures[0].name, "mainTex");
        let (buffer, weight) = font.reflection().uniform("weight").unwrap();
        assert_eq!((buffer.group, buffer.binding, weight.offset), (1, 0, 0));

        let mix = builtins.create(BuiltinShaderType::TextureMix).unwrap();
        let textures: Vec<&str> = mix.reflection().textures.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(textures, vec!["mainTex", "subTex"]);
        assert_eq!(mix.reflection().sampler_for_slot(1).map(|s| s.name.as_str()), Some("subSamp"));
    }

    #[test]
    fn builtin_failure_is_fatal_and_not_cached() {
        let device = Arc::new(SoftwareDevice::new(4, 4));
        let builtins = BuiltinShaders::new(Arc::new(ShaderCompiler::new(device.clone())));
        device.simulate_device_lost();

        let err = builtins.create(BuiltinShaderType::SpriteUnlitPS).unwrap_err();
        match &err {
            Error::BuiltinShader { name, source } => {
                assert_eq!(*name, BuiltinShaderType::SpriteUnlitPS.name());
                assert_eq!(source.kind, ShaderErrorKind::NativeCompileError);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_shader());
        assert_eq!(builtins.cached_count(), 0);
        assert!(matches!(builtins.warm_up(), Err(Error::BuiltinShader { .. })));
    }
}
