// src/texture.rs
//! Texture resources.
//!
//! - [`Texture2D`]: decoded from a file or memory, immutable after load, can [`Texture2D::reload`].
//! - [`RenderTexture`]: GPU-writable target with a format fixed at creation. Screen targets carry
//!   the screen generation they were taken from and go stale on resize.
//! - [`TextureBase`]: the sum of both, used wherever either kind is accepted.
//!
//! All of them are cheap `Arc` clones; the device texture is destroyed with the last clone.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::{UVec2, Vec4};
use image::{DynamicImage, RgbaImage};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::xxh3_64;

use crate::error::ResourceError;
use crate::file::FileSystem;
use crate::gpu::{GpuTexture, GraphicsDevice, TextureDescriptor, TextureUsage};

// ─────────────────────────────────────────────────────────────────────────────
// Formats & sampler state
// ─────────────────────────────────────────────────────────────────────────────

/// Pixel layout. Discriminants are persisted and must not change.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureFormat {
    #[default]
    R8G8B8A8Unorm = 0,
    R16G16B16A16Float = 1,
    R32G32B32A32Float = 2,
    R8G8B8A8UnormSrgb = 3,
    R16G16Float = 4,
    R8Unorm = 5,
}

impl TextureFormat {
    pub fn from_i32(value: i32) -> Option<Self> {
        Some(match value {
            0 => TextureFormat::R8G8B8A8Unorm,
            1 => TextureFormat::R16G16B16A16Float,
            2 => TextureFormat::R32G32B32A32Float,
            3 => TextureFormat::R8G8B8A8UnormSrgb,
            4 => TextureFormat::R16G16Float,
            5 => TextureFormat::R8Unorm,
            _ => return None,
        })
    }

    #[inline]
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            TextureFormat::R8G8B8A8Unorm | TextureFormat::R8G8B8A8UnormSrgb => 4,
            TextureFormat::R16G16B16A16Float => 8,
            TextureFormat::R32G32B32A32Float => 16,
            TextureFormat::R16G16Float => 4,
            TextureFormat::R8Unorm => 1,
        }
    }

    /// Decodes one pixel into normalized RGBA. Missing channels read as `(0, 0, 1)`.
    pub fn decode_pixel(self, raw: &[u8]) -> Vec4 {
        match self {
            TextureFormat::R8G8B8A8Unorm | TextureFormat::R8G8B8A8UnormSrgb => {
                Vec4::new(raw[0] as f32, raw[1] as f32, raw[2] as f32, raw[3] as f32) / 255.0
            }
            TextureFormat::R16G16B16A16Float => Vec4::new(
                f16_to_f32(u16::from_le_bytes([raw[0], raw[1]])),
                f16_to_f32(u16::from_le_bytes([raw[2], raw[3]])),
                f16_to_f32(u16::from_le_bytes([raw[4], raw[5]])),
                f16_to_f32(u16::from_le_bytes([raw[6], raw[7]])),
            ),
            TextureFormat::R32G32B32A32Float => {
                let f = |i: usize| f32::from_le_bytes([raw[i], raw[i + 1], raw[i + 2], raw[i + 3]]);
                Vec4::new(f(0), f(4), f(8), f(12))
            }
            TextureFormat::R16G16Float => Vec4::new(
                f16_to_f32(u16::from_le_bytes([raw[0], raw[1]])),
                f16_to_f32(u16::from_le_bytes([raw[2], raw[3]])),
                0.0,
                1.0,
            ),
            TextureFormat::R8Unorm => Vec4::new(raw[0] as f32 / 255.0, 0.0, 0.0, 1.0),
        }
    }

    /// Appends the encoding of `color` to `out`.
    pub fn encode_pixel(self, color: Vec4, out: &mut Vec<u8>) {
        let unorm = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
        match self {
            TextureFormat::R8G8B8A8Unorm | TextureFormat::R8G8B8A8UnormSrgb => {
                out.extend_from_slice(&[unorm(color.x), unorm(color.y), unorm(color.z), unorm(color.w)]);
            }
            TextureFormat::R16G16B16A16Float => {
                for c in color.to_array() {
                    out.extend_from_slice(&f32_to_f16(c).to_le_bytes());
                }
            }
            TextureFormat::R32G32B32A32Float => {
                for c in color.to_array() {
                    out.extend_from_slice(&c.to_le_bytes());
                }
            }
            TextureFormat::R16G16Float => {
                out.extend_from_slice(&f32_to_f16(color.x).to_le_bytes());
                out.extend_from_slice(&f32_to_f16(color.y).to_le_bytes());
            }
            TextureFormat::R8Unorm => out.push(unorm(color.x)),
        }
    }
}

/// IEEE half to single precision.
pub fn f16_to_f32(bits: u16) -> f32 {
    let sign = ((bits >> 15) & 1) as u32;
    let exp = ((bits >> 10) & 0x1f) as u32;
    let mant = (bits & 0x3ff) as u32;
    let value = match (exp, mant) {
        (0, 0) => sign << 31,
        (0, m) => {
            // subnormal
            let v = m as f32 / 1024.0 * 2f32.powi(-14);
            return if sign == 1 { -v } else { v };
        }
        (0x1f, 0) => (sign << 31) | 0x7f80_0000,
        (0x1f, m) => (sign << 31) | 0x7f80_0000 | (m << 13),
        (e, m) => (sign << 31) | ((e + 127 - 15) << 23) | (m << 13),
    };
    f32::from_bits(value)
}

/// Single to half precision, round-to-nearest on the dropped mantissa bits.
pub fn f32_to_f16(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mant = bits & 0x7f_ffff;
    if exp == 0xff {
        return sign | 0x7c00 | if mant != 0 { 0x200 } else { 0 };
    }
    let e = exp - 127 + 15;
    if e >= 0x1f {
        return sign | 0x7c00;
    }
    if e <= 0 {
        if e < -10 {
            return sign;
        }
        let m = (mant | 0x80_0000) >> (1 - e);
        return sign | ((m + 0x1000) >> 13) as u16;
    }
    let rounded = ((e as u32) << 10 | (mant >> 13)) + ((mant >> 12) & 1);
    sign | rounded as u16
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureWrapMode {
    #[default]
    Clamp,
    Repeat,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum TextureFilter {
    Nearest,
    #[default]
    Linear,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub struct SamplerState {
    pub wrap: TextureWrapMode,
    pub filter: TextureFilter,
}

// ─────────────────────────────────────────────────────────────────────────────
// Texture configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Controls how a texture is created and sampled.
#[derive(Debug, Clone)]
pub struct TextureConfig {
    pub label: Option<String>,
    pub format: TextureFormat,
    pub wrap: TextureWrapMode,
    pub filter: TextureFilter,
    pub max_dimension: Option<u32>,
}

impl Default for TextureConfig {
    fn default() -> Self {
        Self {
            label: None,
            format: TextureFormat::R8G8B8A8Unorm,
            wrap: TextureWrapMode::Clamp,
            filter: TextureFilter::Linear,
            max_dimension: None,
        }
    }
}

impl TextureConfig {
    pub fn pixel_art() -> Self {
        Self {
            filter: TextureFilter::Nearest,
            ..Default::default()
        }
    }

    pub fn srgb() -> Self {
        Self {
            format: TextureFormat::R8G8B8A8UnormSrgb,
            ..Default::default()
        }
    }

    pub fn hdr() -> Self {
        Self {
            format: TextureFormat::R16G16B16A16Float,
            ..Default::default()
        }
    }

    pub fn repeating() -> Self {
        Self {
            wrap: TextureWrapMode::Repeat,
            ..Default::default()
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    pub fn with_format(mut self, format: TextureFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_filter(mut self, filter: TextureFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_wrap(mut self, wrap: TextureWrapMode) -> Self {
        self.wrap = wrap;
        self
    }

    pub fn with_max_dimension(mut self, max: u32) -> Self {
        self.max_dimension = Some(max);
        self
    }

    fn sampler(&self) -> SamplerState {
        SamplerState {
            wrap: self.wrap,
            filter: self.filter,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Shared core
// ─────────────────────────────────────────────────────────────────────────────

/// Process-unique texture identity, used as the texture part of batch keys.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(pub u64);

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

impl TextureId {
    fn next() -> Self {
        TextureId(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed))
    }
}

#[derive(Copy, Clone, Debug)]
struct Backing {
    gpu: GpuTexture,
    size: UVec2,
}

/// State common to every texture kind. Opaque outside the crate.
pub struct TextureCore {
    id: TextureId,
    device: Arc<dyn GraphicsDevice>,
    backing: RwLock<Backing>,
    format: TextureFormat,
    sampler: RwLock<SamplerState>,
    label: String,
    /// Screen textures belong to the device and are never destroyed through a wrapper.
    owned: bool,
}

impl TextureCore {
    fn create(
        device: &Arc<dyn GraphicsDevice>,
        size: UVec2,
        config: &TextureConfig,
        usage: TextureUsage,
        data: Option<&[u8]>,
    ) -> Result<Self, ResourceError> {
        validate_size(size, config.max_dimension)?;
        if let Some(data) = data {
            let expected = size.x as usize * size.y as usize * config.format.bytes_per_pixel();
            if data.len() != expected {
                return Err(ResourceError::DataLength {
                    expected,
                    actual: data.len(),
                });
            }
        }
        let desc = TextureDescriptor {
            label: config.label.clone().unwrap_or_default(),
            width: size.x,
            height: size.y,
            format: config.format,
            usage,
        };
        let gpu = device.create_texture(&desc, data)?;
        Ok(Self {
            id: TextureId::next(),
            device: Arc::clone(device),
            backing: RwLock::new(Backing { gpu, size }),
            format: config.format,
            sampler: RwLock::new(config.sampler()),
            label: desc.label,
            owned: true,
        })
    }

    fn replace_backing(&self, gpu: GpuTexture, size: UVec2) {
        let old = std::mem::replace(&mut *self.backing.write(), Backing { gpu, size });
        if self.owned {
            self.device.destroy_texture(old.gpu);
        }
    }

    pub(crate) fn gpu(&self) -> GpuTexture {
        self.backing.read().gpu
    }
}

impl Drop for TextureCore {
    fn drop(&mut self) {
        if self.owned {
            self.device.destroy_texture(self.backing.get_mut().gpu);
        }
    }
}

impl std::fmt::Debug for TextureCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TextureCore")
            .field("id", &self.id)
            .field("label", &self.label)
            .field("size", &self.backing.read().size)
            .field("format", &self.format)
            .finish()
    }
}

fn validate_size(size: UVec2, max: Option<u32>) -> Result<(), ResourceError> {
    let limit = max.unwrap_or(16_384);
    if size.x == 0 || size.y == 0 || size.x > limit || size.y > limit {
        return Err(ResourceError::InvalidSize {
            width: size.x,
            height: size.y,
        });
    }
    Ok(())
}

/// Accessors shared by every texture kind.
pub trait Texture {
    #[doc(hidden)]
    fn core(&self) -> &TextureCore;

    fn id(&self) -> TextureId {
        self.core().id
    }

    fn size(&self) -> UVec2 {
        self.core().backing.read().size
    }

    fn format(&self) -> TextureFormat {
        self.core().format
    }

    fn label(&self) -> &str {
        &self.core().label
    }

    fn wrap_mode(&self) -> TextureWrapMode {
        self.core().sampler.read().wrap
    }

    fn set_wrap_mode(&self, wrap: TextureWrapMode) {
        self.core().sampler.write().wrap = wrap;
    }

    fn filter_type(&self) -> TextureFilter {
        self.core().sampler.read().filter
    }

    fn set_filter_type(&self, filter: TextureFilter) {
        self.core().sampler.write().filter = filter;
    }

    fn sampler_state(&self) -> SamplerState {
        *self.core().sampler.read()
    }

    /// Reads the current contents, tightly packed in [`Texture::format`]. Waits for the device.
    fn read_pixels(&self) -> Result<Vec<u8>, ResourceError> {
        let core = self.core();
        Ok(core.device.read_texture(core.gpu())?)
    }

    /// Writes the current contents as an RGBA8 PNG (or whatever the extension asks for).
    fn save(&self, path: &Path) -> Result<(), ResourceError> {
        let bytes = self.read_pixels()?;
        let size = self.size();
        let image = to_rgba8(self.format(), size, &bytes).ok_or(ResourceError::DataLength {
            expected: size.x as usize * size.y as usize * self.format().bytes_per_pixel(),
            actual: bytes.len(),
        })?;
        image.save(path).map_err(|e| ResourceError::Decode {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }
}

/// Converts packed pixels of `format` into an 8-bit RGBA image.
pub fn to_rgba8(format: TextureFormat, size: UVec2, bytes: &[u8]) -> Option<RgbaImage> {
    let bpp = format.bytes_per_pixel();
    if bytes.len() != size.x as usize * size.y as usize * bpp {
        return None;
    }
    let mut out = Vec::with_capacity(size.x as usize * size.y as usize * 4);
    for raw in bytes.chunks_exact(bpp) {
        let px = format.decode_pixel(raw);
        TextureFormat::R8G8B8A8Unorm.encode_pixel(px, &mut out);
    }
    RgbaImage::from_raw(size.x, size.y, out)
}

// ─────────────────────────────────────────────────────────────────────────────
// Texture2D
// ─────────────────────────────────────────────────────────────────────────────

struct Texture2DInner {
    core: TextureCore,
    path: Option<String>,
    content_hash: AtomicU64,
    config: TextureConfig,
}

#[derive(Clone)]
pub struct Texture2D {
    inner: Arc<Texture2DInner>,
}

impl Texture for Texture2D {
    fn core(&self) -> &TextureCore {
        &self.inner.core
    }
}

impl std::fmt::Debug for Texture2D {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Texture2D")
            .field("core", &self.inner.core)
            .field("path", &self.inner.path)
            .finish()
    }
}

impl Texture2D {
    /// Creates a texture from raw pixels laid out in `config.format`.
    pub fn from_pixels(
        device: &Arc<dyn GraphicsDevice>,
        width: u32,
        height: u32,
        data: &[u8],
        config: TextureConfig,
    ) -> Result<Self, ResourceError> {
        let core = TextureCore::create(device, UVec2::new(width, height), &config, TextureUsage::Sampled, Some(data))?;
        Ok(Self::wrap(core, None, xxh3_64(data), config))
    }

    /// 1×1 opaque white, bound when a drawable has no texture.
    pub fn white(device: &Arc<dyn GraphicsDevice>) -> Result<Self, ResourceError> {
        Self::from_pixels(device, 1, 1, &[255, 255, 255, 255], TextureConfig::default().with_label("white"))
    }

    /// Decodes an encoded image (PNG, JPEG) from memory.
    pub fn from_bytes(
        device: &Arc<dyn GraphicsDevice>,
        bytes: &[u8],
        label: &str,
        config: TextureConfig,
    ) -> Result<Self, ResourceError> {
        let image = decode_image(bytes, label)?;
        Self::from_image(device, &image, config.with_label(label), xxh3_64(bytes), None)
    }

    /// Loads through the virtual file system and remembers the path for [`Texture2D::reload`].
    pub fn load(
        device: &Arc<dyn GraphicsDevice>,
        files: &FileSystem,
        path: &str,
        config: TextureConfig,
    ) -> Result<Self, ResourceError> {
        let bytes = files.read(path)?;
        let image = decode_image(&bytes, path)?;
        let config = if config.label.is_none() { config.with_label(path) } else { config };
        Self::from_image(device, &image, config, xxh3_64(&bytes), Some(path.to_string()))
    }

    fn from_image(
        device: &Arc<dyn GraphicsDevice>,
        image: &DynamicImage,
        config: TextureConfig,
        hash: u64,
        path: Option<String>,
    ) -> Result<Self, ResourceError> {
        let data = image_bytes(image, config.format)?;
        let size = UVec2::new(image.width(), image.height());
        let core = TextureCore::create(device, size, &config, TextureUsage::Sampled, Some(&data))?;
        Ok(Self::wrap(core, path, hash, config))
    }

    fn wrap(core: TextureCore, path: Option<String>, hash: u64, config: TextureConfig) -> Self {
        Self {
            inner: Arc::new(Texture2DInner {
                core,
                path,
                content_hash: AtomicU64::new(hash),
                config,
            }),
        }
    }

    pub fn path(&self) -> Option<&str> {
        self.inner.path.as_deref()
    }

    /// Re-reads the backing file. Returns `Ok(false)` when the bytes did not change.
    ///
    /// Draws already recorded keep the old contents only if the device copied them; the software
    /// and wgpu devices both execute on submit, so reloading between frames is safe.
    pub fn reload(&self, files: &FileSystem) -> Result<bool, ResourceError> {
        let path = self.inner.path.as_deref().ok_or(ResourceError::NotReloadable)?;
        let bytes = files.read(path)?;
        let hash = xxh3_64(&bytes);
        if hash == self.inner.content_hash.load(Ordering::Acquire) {
            return Ok(false);
        }
        let image = decode_image(&bytes, path)?;
        let data = image_bytes(&image, self.format())?;
        let size = UVec2::new(image.width(), image.height());
        let core = &self.inner.core;
        if size == self.size() {
            core.device.write_texture(core.gpu(), &data)?;
        } else {
            validate_size(size, self.inner.config.max_dimension)?;
            let desc = TextureDescriptor {
                label: core.label.clone(),
                width: size.x,
                height: size.y,
                format: core.format,
                usage: TextureUsage::Sampled,
            };
            let gpu = core.device.create_texture(&desc, Some(&data))?;
            core.replace_backing(gpu, size);
        }
        self.inner.content_hash.store(hash, Ordering::Release);
        log::info!(target: "slop2d::resource", "reloaded texture {}", path);
        Ok(true)
    }

    pub fn ptr_eq(&self, other: &Texture2D) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Overwrites the whole texture. Used by the dynamic font atlas.
    pub(crate) fn write_pixels(&self, data: &[u8]) -> Result<(), ResourceError> {
        let core = &self.inner.core;
        let size = self.size();
        let expected = size.x as usize * size.y as usize * core.format.bytes_per_pixel();
        if data.len() != expected {
            return Err(ResourceError::DataLength {
                expected,
                actual: data.len(),
            });
        }
        core.device.write_texture(core.gpu(), data)?;
        Ok(())
    }

    pub(crate) fn downgrade(&self) -> WeakTexture2D {
        WeakTexture2D(Arc::downgrade(&self.inner))
    }
}

/// Non-owning reference used by the path cache.
pub(crate) struct WeakTexture2D(std::sync::Weak<Texture2DInner>);

impl WeakTexture2D {
    pub(crate) fn upgrade(&self) -> Option<Texture2D> {
        self.0.upgrade().map(|inner| Texture2D { inner })
    }
}

fn decode_image(bytes: &[u8], path: &str) -> Result<DynamicImage, ResourceError> {
    image::load_from_memory(bytes).map_err(|e| ResourceError::Decode {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

fn image_bytes(image: &DynamicImage, format: TextureFormat) -> Result<Vec<u8>, ResourceError> {
    match format {
        TextureFormat::R8G8B8A8Unorm | TextureFormat::R8G8B8A8UnormSrgb => Ok(image.to_rgba8().into_raw()),
        TextureFormat::R8Unorm => Ok(image.to_luma8().into_raw()),
        other => {
            let rgba = image.to_rgba32f();
            let mut out = Vec::with_capacity(rgba.len() / 4 * other.bytes_per_pixel());
            for px in rgba.pixels() {
                other.encode_pixel(Vec4::from_array(px.0), &mut out);
            }
            Ok(out)
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// RenderTexture
// ─────────────────────────────────────────────────────────────────────────────

/// Screen generation a wrapper was taken from, compared against the live counter.
struct ScreenGeneration {
    generation: u64,
    current: Arc<AtomicU64>,
}

struct RenderTextureInner {
    core: TextureCore,
    screen: Option<ScreenGeneration>,
}

#[derive(Clone)]
pub struct RenderTexture {
    inner: Arc<RenderTextureInner>,
}

impl Texture for RenderTexture {
    fn core(&self) -> &TextureCore {
        &self.inner.core
    }
}

impl std::fmt::Debug for RenderTexture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderTexture")
            .field("core", &self.inner.core)
            .field("screen", &self.is_screen())
            .finish()
    }
}

impl RenderTexture {
    pub fn create(
        device: &Arc<dyn GraphicsDevice>,
        width: u32,
        height: u32,
        format: TextureFormat,
    ) -> Result<Self, ResourceError> {
        Self::with_config(device, width, height, TextureConfig::default().with_format(format))
    }

    pub fn with_config(
        device: &Arc<dyn GraphicsDevice>,
        width: u32,
        height: u32,
        config: TextureConfig,
    ) -> Result<Self, ResourceError> {
        let core = TextureCore::create(device, UVec2::new(width, height), &config, TextureUsage::RenderTarget, None)?;
        Ok(Self {
            inner: Arc::new(RenderTextureInner { core, screen: None }),
        })
    }

    /// Wraps the device's current screen target.
    pub(crate) fn wrap_screen(
        device: &Arc<dyn GraphicsDevice>,
        gpu: GpuTexture,
        size: UVec2,
        format: TextureFormat,
        current: &Arc<AtomicU64>,
    ) -> Self {
        let core = TextureCore {
            id: TextureId::next(),
            device: Arc::clone(device),
            backing: RwLock::new(Backing { gpu, size }),
            format,
            sampler: RwLock::new(SamplerState::default()),
            label: "screen".to_string(),
            owned: false,
        };
        Self {
            inner: Arc::new(RenderTextureInner {
                core,
                screen: Some(ScreenGeneration {
                    generation: current.load(Ordering::Acquire),
                    current: Arc::clone(current),
                }),
            }),
        }
    }

    pub fn is_screen(&self) -> bool {
        self.inner.screen.is_some()
    }

    /// A screen wrapper taken before the last resize.
    pub fn is_stale(&self) -> bool {
        self.inner
            .screen
            .as_ref()
            .is_some_and(|s| s.generation != s.current.load(Ordering::Acquire))
    }

    /// The device texture, unless this wrapper went stale.
    pub(crate) fn gpu_texture(&self) -> Result<GpuTexture, ResourceError> {
        if self.is_stale() {
            return Err(ResourceError::Stale);
        }
        Ok(self.inner.core.gpu())
    }

    pub fn ptr_eq(&self, other: &RenderTexture) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// TextureBase
// ─────────────────────────────────────────────────────────────────────────────

/// Either texture kind.
#[derive(Clone, Debug)]
pub enum TextureBase {
    Texture2D(Texture2D),
    RenderTexture(RenderTexture),
}

impl Texture for TextureBase {
    fn core(&self) -> &TextureCore {
        match self {
            TextureBase::Texture2D(t) => t.core(),
            TextureBase::RenderTexture(t) => t.core(),
        }
    }
}

impl TextureBase {
    pub fn is_stale(&self) -> bool {
        matches!(self, TextureBase::RenderTexture(t) if t.is_stale())
    }

    pub(crate) fn gpu_texture(&self) -> Result<GpuTexture, ResourceError> {
        match self {
            TextureBase::Texture2D(t) => Ok(t.core().gpu()),
            TextureBase::RenderTexture(t) => t.gpu_texture(),
        }
    }

    pub fn as_render_texture(&self) -> Option<&RenderTexture> {
        match self {
            TextureBase::RenderTexture(t) => Some(t),
            TextureBase::Texture2D(_) => None,
        }
    }
}

impl From<Texture2D> for TextureBase {
    fn from(t: Texture2D) -> Self {
        TextureBase::Texture2D(t)
    }
}

impl From<RenderTexture> for TextureBase {
    fn from(t: RenderTexture) -> Self {
        TextureBase::RenderTexture(t)
    }
}

impl From<&Texture2D> for TextureBase {
    fn from(t: &Texture2D) -> Self {
        TextureBase::Texture2D(t.clone())
    }
}

impl From<&RenderTexture> for TextureBase {
    fn from(t: &RenderTexture) -> Self {
        TextureBase::RenderTexture(t.clone())
    }
}
