// src/font.rs
//! Fonts and glyph atlases.
//!
//! - **Dynamic** fonts rasterize glyphs from a TrueType face on first use (rusttype) into
//!   RGBA8 atlas pages, coverage in alpha and white in RGB.
//! - **Static** fonts load a pre-rasterized atlas from an `SFNT` file written by
//!   [`Font::generate_font_file`].
//! - **Image** fonts share a base font's glyphs and metrics and carry their own
//!   character → texture table.
//!
//! Image glyphs are consulted before the atlas by the text layout in [`crate::rendered`].

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use glam::{IVec2, UVec2};
use image::RgbaImage;
use parking_lot::{Mutex, RwLock};
use rusttype::{point, Scale};

use crate::error::ResourceError;
use crate::file::{ByteReader, FileSystem};
use crate::gpu::GraphicsDevice;
use crate::logging::RESOURCE;
use crate::texture::{Texture, Texture2D, TextureBase, TextureConfig};

const STATIC_FONT_MAGIC: &[u8; 4] = b"SFNT";
const STATIC_FONT_VERSION: u32 = 1;
const PAGE_SIZE: u32 = 512;
const GLYPH_PADDING: u32 = 1;

/// Where a character lives in the atlas and how it advances the pen.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Glyph {
    /// Atlas page, `-1` for glyphs without pixels (spaces).
    pub texture_index: i32,
    /// Top-left corner inside the page.
    pub position: IVec2,
    pub size: IVec2,
    /// From the pen position on the baseline to the top-left corner.
    pub offset: IVec2,
    pub advance: i32,
    pub texture_size: IVec2,
}

impl Glyph {
    fn blank(advance: i32) -> Self {
        Self {
            texture_index: -1,
            position: IVec2::ZERO,
            size: IVec2::ZERO,
            offset: IVec2::ZERO,
            advance,
            texture_size: IVec2::ZERO,
        }
    }

    pub fn has_pixels(&self) -> bool {
        self.texture_index >= 0 && self.size.x > 0 && self.size.y > 0
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub struct FontMetrics {
    pub size: i32,
    pub ascent: i32,
    /// Negative, below the baseline.
    pub descent: i32,
    pub line_gap: i32,
}

impl FontMetrics {
    pub fn line_height(&self) -> i32 {
        self.ascent - self.descent
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Atlas packing
// ─────────────────────────────────────────────────────────────────────────────

/// Row-by-row rectangle packer for one page.
#[derive(Debug, Clone)]
struct ShelfPacker {
    size: u32,
    cursor: UVec2,
    row_height: u32,
}

impl ShelfPacker {
    fn new(size: u32) -> Self {
        Self {
            size,
            cursor: UVec2::ZERO,
            row_height: 0,
        }
    }

    fn allocate(&mut self, width: u32, height: u32) -> Option<UVec2> {
        let (w, h) = (width + GLYPH_PADDING, height + GLYPH_PADDING);
        if w > self.size || h > self.size {
            return None;
        }
        if self.cursor.x + w > self.size {
            self.cursor = UVec2::new(0, self.cursor.y + self.row_height);
            self.row_height = 0;
        }
        if self.cursor.y + h > self.size {
            return None;
        }
        let origin = self.cursor;
        self.cursor.x += w;
        self.row_height = self.row_height.max(h);
        Some(origin)
    }
}

struct AtlasPage {
    texture: Texture2D,
    pixels: Vec<u8>,
    dirty: bool,
}

struct DynamicAtlas {
    device: Arc<dyn GraphicsDevice>,
    face: rusttype::Font<'static>,
    scale: Scale,
    label: String,
    pages: Vec<AtlasPage>,
    packer: ShelfPacker,
    /// `None` records a character the face does not contain.
    glyphs: HashMap<char, Option<Glyph>>,
}

impl DynamicAtlas {
    fn glyph(&mut self, ch: char) -> Result<Option<Glyph>, ResourceError> {
        if let Some(cached) = self.glyphs.get(&ch) {
            return Ok(*cached);
        }
        let glyph = self.rasterize(ch)?;
        self.glyphs.insert(ch, glyph);
        Ok(glyph)
    }

    fn rasterize(&mut self, ch: char) -> Result<Option<Glyph>, ResourceError> {
        let glyph = self.face.glyph(ch);
        if glyph.id().0 == 0 {
            return Ok(None);
        }
        let scaled = glyph.scaled(self.scale);
        let advance = scaled.h_metrics().advance_width.round() as i32;
        let positioned = scaled.positioned(point(0.0, 0.0));
        let Some(bounds) = positioned.pixel_bounding_box() else {
            return Ok(Some(Glyph::blank(advance)));
        };
        let (width, height) = (bounds.width() as u32, bounds.height() as u32);
        let (page_index, origin) = self.allocate(width, height)?;

        let page = &mut self.pages[page_index];
        positioned.draw(|x, y, coverage| {
            let index = (((origin.y + y) * PAGE_SIZE + origin.x + x) * 4 + 3) as usize;
            if let Some(alpha) = page.pixels.get_mut(index) {
                *alpha = (coverage.clamp(0.0, 1.0) * 255.0).round() as u8;
            }
        });
        page.dirty = true;

        Ok(Some(Glyph {
            texture_index: page_index as i32,
            position: origin.as_ivec2(),
            size: IVec2::new(width as i32, height as i32),
            offset: IVec2::new(bounds.min.x, bounds.min.y),
            advance,
            texture_size: IVec2::splat(PAGE_SIZE as i32),
        }))
    }

    fn allocate(&mut self, width: u32, height: u32) -> Result<(usize, UVec2), ResourceError> {
        if !self.pages.is_empty() {
            if let Some(origin) = self.packer.allocate(width, height) {
                return Ok((self.pages.len() - 1, origin));
            }
        }
        self.packer = ShelfPacker::new(PAGE_SIZE);
        let origin = self
            .packer
            .allocate(width, height)
            .ok_or(ResourceError::InvalidSize { width, height })?;
        let pixels = blank_page();
        let texture = Texture2D::from_pixels(
            &self.device,
            PAGE_SIZE,
            PAGE_SIZE,
            &pixels,
            TextureConfig::default().with_label(&format!("{}#{}", self.label, self.pages.len())),
        )?;
        log::debug!(target: RESOURCE, "font {}: new atlas page {}", self.label, self.pages.len());
        self.pages.push(AtlasPage {
            texture,
            pixels,
            dirty: false,
        });
        Ok((self.pages.len() - 1, origin))
    }

    fn page(&mut self, index: usize) -> Option<Texture2D> {
        let page = self.pages.get_mut(index)?;
        if page.dirty {
            if let Err(err) = page.texture.write_pixels(&page.pixels) {
                log::warn!(target: RESOURCE, "font {}: failed to upload atlas page {}: {}", self.label, index, err);
            }
            page.dirty = false;
        }
        Some(page.texture.clone())
    }

    fn kerning(&self, first: char, second: char) -> i32 {
        self.face.pair_kerning(self.scale, first, second).round() as i32
    }
}

fn blank_page() -> Vec<u8> {
    [255u8, 255, 255, 0].repeat((PAGE_SIZE * PAGE_SIZE) as usize)
}

struct StaticAtlas {
    pages: Vec<Texture2D>,
    glyphs: HashMap<char, Glyph>,
    kerning: HashMap<(char, char), i32>,
}

enum FontKind {
    Static(StaticAtlas),
    Dynamic(Mutex<DynamicAtlas>),
    Image(Font),
}

struct FontInner {
    path: String,
    metrics: FontMetrics,
    kind: FontKind,
    image_glyphs: RwLock<HashMap<char, TextureBase>>,
}

/// Shared font handle. Clones refer to the same atlas.
#[derive(Clone)]
pub struct Font {
    inner: Arc<FontInner>,
}

impl std::fmt::Debug for Font {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.inner.kind {
            FontKind::Static(_) => "static",
            FontKind::Dynamic(_) => "dynamic",
            FontKind::Image(_) => "image",
        };
        f.debug_struct("Font")
            .field("path", &self.inner.path)
            .field("kind", &kind)
            .field("metrics", &self.inner.metrics)
            .finish()
    }
}

impl Font {
    /// Loads a TrueType/OpenType face that rasterizes at `size` pixels.
    pub fn load_dynamic(
        device: &Arc<dyn GraphicsDevice>,
        files: &FileSystem,
        path: &str,
        size: i32,
    ) -> Result<Self, ResourceError> {
        let bytes = files.read(path)?;
        Self::dynamic_from_bytes(device, bytes.to_vec(), path, size)
    }

    pub fn dynamic_from_bytes(
        device: &Arc<dyn GraphicsDevice>,
        bytes: Vec<u8>,
        path: &str,
        size: i32,
    ) -> Result<Self, ResourceError> {
        if size <= 0 {
            return Err(ResourceError::Decode {
                path: path.to_string(),
                reason: format!("font size {size} is not positive"),
            });
        }
        let face = rusttype::Font::try_from_vec(bytes).ok_or_else(|| ResourceError::Decode {
            path: path.to_string(),
            reason: "not a TrueType/OpenType font".into(),
        })?;
        let scale = Scale::uniform(size as f32);
        let v = face.v_metrics(scale);
        let metrics = FontMetrics {
            size,
            ascent: v.ascent.round() as i32,
            descent: v.descent.round() as i32,
            line_gap: v.line_gap.round() as i32,
        };
        log::info!(target: RESOURCE, "loaded dynamic font {} at {}px", path, size);
        Ok(Self::from_kind(
            path,
            metrics,
            FontKind::Dynamic(Mutex::new(DynamicAtlas {
                device: Arc::clone(device),
                face,
                scale,
                label: path.to_string(),
                pages: Vec::new(),
                packer: ShelfPacker::new(PAGE_SIZE),
                glyphs: HashMap::new(),
            })),
        ))
    }

    /// Loads a pre-rasterized `SFNT` font.
    pub fn load_static(device: &Arc<dyn GraphicsDevice>, files: &FileSystem, path: &str) -> Result<Self, ResourceError> {
        let bytes = files.read(path)?;
        let data = StaticFontData::from_bytes(&bytes, path)?;
        let pages = data
            .pages
            .iter()
            .enumerate()
            .map(|(i, page)| {
                Texture2D::from_pixels(
                    device,
                    page.width(),
                    page.height(),
                    page.as_raw(),
                    TextureConfig::default().with_label(&format!("{path}#{i}")),
                )
            })
            .collect::<Result<Vec<_>, _>>()?;
        log::info!(target: RESOURCE, "loaded static font {} ({} glyphs)", path, data.glyphs.len());
        Ok(Self::from_kind(
            path,
            data.metrics,
            FontKind::Static(StaticAtlas {
                pages,
                glyphs: data.glyphs,
                kerning: data.kerning,
            }),
        ))
    }

    /// A font with `base`'s glyphs and metrics and an empty image-glyph table of its own.
    pub fn create_image_font(base: &Font) -> Self {
        Self::from_kind(&base.inner.path, base.inner.metrics, FontKind::Image(base.clone()))
    }

    fn from_kind(path: &str, metrics: FontMetrics, kind: FontKind) -> Self {
        Self {
            inner: Arc::new(FontInner {
                path: path.to_string(),
                metrics,
                kind,
                image_glyphs: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn metrics(&self) -> FontMetrics {
        self.inner.metrics
    }

    pub fn size(&self) -> i32 {
        self.inner.metrics.size
    }

    pub fn ascent(&self) -> i32 {
        self.inner.metrics.ascent
    }

    pub fn descent(&self) -> i32 {
        self.inner.metrics.descent
    }

    pub fn line_gap(&self) -> i32 {
        self.inner.metrics.line_gap
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn is_static(&self) -> bool {
        match &self.inner.kind {
            FontKind::Static(_) => true,
            FontKind::Dynamic(_) => false,
            FontKind::Image(base) => base.is_static(),
        }
    }

    /// Atlas entry for `ch`, rasterizing it on first use for dynamic fonts.
    pub fn glyph(&self, ch: char) -> Option<Glyph> {
        match &self.inner.kind {
            FontKind::Static(atlas) => atlas.glyphs.get(&ch).copied(),
            FontKind::Dynamic(atlas) => match atlas.lock().glyph(ch) {
                Ok(glyph) => glyph,
                Err(err) => {
                    log::warn!(target: RESOURCE, "font {}: cannot rasterize {:?}: {}", self.inner.path, ch, err);
                    None
                }
            },
            FontKind::Image(base) => base.glyph(ch),
        }
    }

    /// Atlas page `index`, with pending glyph uploads applied.
    pub fn font_texture(&self, index: i32) -> Option<Texture2D> {
        let index = usize::try_from(index).ok()?;
        match &self.inner.kind {
            FontKind::Static(atlas) => atlas.pages.get(index).cloned(),
            FontKind::Dynamic(atlas) => atlas.lock().page(index),
            FontKind::Image(base) => base.font_texture(index as i32),
        }
    }

    pub fn kerning(&self, first: char, second: char) -> i32 {
        match &self.inner.kind {
            FontKind::Static(atlas) => atlas.kerning.get(&(first, second)).copied().unwrap_or(0),
            FontKind::Dynamic(atlas) => atlas.lock().kerning(first, second),
            FontKind::Image(base) => base.kerning(first, second),
        }
    }

    pub fn add_image_glyph(&self, ch: char, texture: impl Into<TextureBase>) {
        self.inner.image_glyphs.write().insert(ch, texture.into());
    }

    pub fn image_glyph(&self, ch: char) -> Option<TextureBase> {
        self.inner.image_glyphs.read().get(&ch).cloned()
    }

    pub fn ptr_eq(&self, other: &Font) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Rasterizes `characters` and writes them as a static font to `out`.
    ///
    /// Only dynamic fonts (or image fonts over one) can be baked.
    pub fn generate_font_file(&self, characters: &str, out: &Path) -> Result<(), ResourceError> {
        let atlas = match &self.inner.kind {
            FontKind::Dynamic(atlas) => atlas,
            FontKind::Image(base) => return base.generate_font_file(characters, out),
            FontKind::Static(_) => return Err(ResourceError::Unsupported("static fonts cannot be baked again")),
        };
        let mut chars: Vec<char> = characters.chars().collect();
        chars.sort_unstable();
        chars.dedup();

        let mut atlas = atlas.lock();
        let mut glyphs = HashMap::new();
        for &ch in &chars {
            if let Some(glyph) = atlas.glyph(ch)? {
                glyphs.insert(ch, glyph);
            }
        }
        let mut kerning = HashMap::new();
        for &a in glyphs.keys() {
            for &b in glyphs.keys() {
                let k = atlas.kerning(a, b);
                if k != 0 {
                    kerning.insert((a, b), k);
                }
            }
        }
        let pages = atlas
            .pages
            .iter()
            .map(|p| {
                RgbaImage::from_raw(PAGE_SIZE, PAGE_SIZE, p.pixels.clone()).ok_or(ResourceError::DataLength {
                    expected: (PAGE_SIZE * PAGE_SIZE * 4) as usize,
                    actual: p.pixels.len(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        drop(atlas);

        let data = StaticFontData {
            metrics: self.inner.metrics,
            pages,
            glyphs,
            kerning,
        };
        let bytes = data.to_bytes()?;
        std::fs::write(out, bytes).map_err(|e| ResourceError::Decode {
            path: out.display().to_string(),
            reason: e.to_string(),
        })?;
        log::info!(target: RESOURCE, "wrote static font {} ({} glyphs)", out.display(), data.glyphs.len());
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Static font file
// ─────────────────────────────────────────────────────────────────────────────

/// Decoded contents of an `SFNT` file.
struct StaticFontData {
    metrics: FontMetrics,
    pages: Vec<RgbaImage>,
    glyphs: HashMap<char, Glyph>,
    kerning: HashMap<(char, char), i32>,
}

impl StaticFontData {
    fn to_bytes(&self) -> Result<Vec<u8>, ResourceError> {
        let mut out = Vec::new();
        out.extend_from_slice(STATIC_FONT_MAGIC);
        put_u32(&mut out, STATIC_FONT_VERSION);
        for v in [self.metrics.size, self.metrics.ascent, self.metrics.descent, self.metrics.line_gap] {
            put_i32(&mut out, v);
        }

        put_u32(&mut out, self.pages.len() as u32);
        for page in &self.pages {
            let mut png = Cursor::new(Vec::new());
            page.write_to(&mut png, image::ImageFormat::Png)
                .map_err(|e| ResourceError::Decode {
                    path: "font page".into(),
                    reason: e.to_string(),
                })?;
            let png = png.into_inner();
            put_u32(&mut out, png.len() as u32);
            out.extend_from_slice(&png);
        }

        let mut glyphs: Vec<(&char, &Glyph)> = self.glyphs.iter().collect();
        glyphs.sort_by_key(|(ch, _)| **ch);
        put_u32(&mut out, glyphs.len() as u32);
        for (ch, g) in glyphs {
            put_u32(&mut out, *ch as u32);
            for v in [
                g.texture_index,
                g.position.x,
                g.position.y,
                g.size.x,
                g.size.y,
                g.offset.x,
                g.offset.y,
                g.advance,
            ] {
                put_i32(&mut out, v);
            }
        }

        let mut kerning: Vec<(&(char, char), &i32)> = self.kerning.iter().collect();
        kerning.sort_by_key(|(pair, _)| **pair);
        put_u32(&mut out, kerning.len() as u32);
        for ((a, b), k) in kerning {
            put_u32(&mut out, *a as u32);
            put_u32(&mut out, *b as u32);
            put_i32(&mut out, *k);
        }
        Ok(out)
    }

    fn from_bytes(bytes: &[u8], path: &str) -> Result<Self, ResourceError> {
        let decode = |reason: &str| ResourceError::Decode {
            path: path.to_string(),
            reason: reason.to_string(),
        };
        let mut r = ByteReader::new(bytes);
        if r.take(4).ok_or_else(|| decode("truncated header"))? != STATIC_FONT_MAGIC {
            return Err(decode("bad magic"));
        }
        let version = r.u32().ok_or_else(|| decode("truncated header"))?;
        if version != STATIC_FONT_VERSION {
            return Err(decode(&format!("unsupported version {version}")));
        }
        let mut header = [0i32; 4];
        for v in header.iter_mut() {
            *v = r.i32().ok_or_else(|| decode("truncated header"))?;
        }
        let metrics = FontMetrics {
            size: header[0],
            ascent: header[1],
            descent: header[2],
            line_gap: header[3],
        };

        let page_count = r.u32().ok_or_else(|| decode("truncated page table"))?;
        let mut pages = Vec::with_capacity(page_count.min(64) as usize);
        for _ in 0..page_count {
            let len = r.u32().ok_or_else(|| decode("truncated page"))? as usize;
            let png = r.take(len).ok_or_else(|| decode("truncated page"))?;
            let page = image::load_from_memory(png)
                .map_err(|e| decode(&format!("bad page image: {e}")))?
                .to_rgba8();
            pages.push(page);
        }

        let glyph_count = r.u32().ok_or_else(|| decode("truncated glyph table"))?;
        let mut glyphs = HashMap::with_capacity(glyph_count.min(65_536) as usize);
        for _ in 0..glyph_count {
            let ch = r
                .u32()
                .and_then(char::from_u32)
                .ok_or_else(|| decode("bad glyph character"))?;
            let mut v = [0i32; 8];
            for field in v.iter_mut() {
                *field = r.i32().ok_or_else(|| decode("truncated glyph"))?;
            }
            let texture_size = usize::try_from(v[0])
                .ok()
                .and_then(|i| pages.get(i))
                .map_or(IVec2::ZERO, |p| IVec2::new(p.width() as i32, p.height() as i32));
            glyphs.insert(
                ch,
                Glyph {
                    texture_index: v[0],
                    position: IVec2::new(v[1], v[2]),
                    size: IVec2::new(v[3], v[4]),
                    offset: IVec2::new(v[5], v[6]),
                    advance: v[7],
                    texture_size,
                },
            );
        }

        let kerning_count = r.u32().ok_or_else(|| decode("truncated kerning table"))?;
        let mut kerning = HashMap::new();
        for _ in 0..kerning_count {
            let a = r.u32().and_then(char::from_u32).ok_or_else(|| decode("bad kerning pair"))?;
            let b = r.u32().and_then(char::from_u32).ok_or_else(|| decode("bad kerning pair"))?;
            let k = r.i32().ok_or_else(|| decode("truncated kerning pair"))?;
            kerning.insert((a, b), k);
        }

        Ok(Self {
            metrics,
            pages,
            glyphs,
            kerning,
        })
    }
}

fn put_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn put_i32(out: &mut Vec<u8>, v: i32) {
    out.extend_from_slice(&v.to_le_bytes());
}

/// Hand-built 8px static font: `A` and `V` with pixels, a blank space, kerning `AV = -2`.
#[cfg(test)]
fn sample_data() -> StaticFontData {
    let mut page = RgbaImage::from_pixel(8, 8, image::Rgba([255, 255, 255, 0]));
    page.put_pixel(1, 1, image::Rgba([255, 255, 255, 255]));
    let glyph = |x: i32| Glyph {
        texture_index: 0,
        position: IVec2::new(x, 1),
        size: IVec2::new(3, 4),
        offset: IVec2::new(0, -4),
        advance: 5,
        texture_size: IVec2::new(8, 8),
    };
    let mut glyphs = HashMap::new();
    glyphs.insert('A', glyph(1));
    glyphs.insert('V', glyph(4));
    glyphs.insert(' ', Glyph::blank(3));
    let mut kerning = HashMap::new();
    kerning.insert(('A', 'V'), -2);
    StaticFontData {
        metrics: FontMetrics {
            size: 8,
            ascent: 6,
            descent: -2,
            line_gap: 1,
        },
        pages: vec![page],
        glyphs,
        kerning,
    }
}

#[cfg(test)]
pub(crate) fn sample_font(device: &Arc<dyn GraphicsDevice>) -> Font {
    let files = FileSystem::new();
    let mut package = crate::file::Package::new("fonts");
    package.insert("sample.sfnt", sample_data().to_bytes().unwrap());
    files.add_package(package);
    Font::load_static(device, &files, "sample.sfnt").unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::software::SoftwareDevice;

    fn device() -> Arc<dyn GraphicsDevice> {
        Arc::new(SoftwareDevice::new(16, 16))
    }

    #[test]
    fn shelf_packer_wraps_rows_and_fills_up() {
        let mut packer = ShelfPacker::new(10);
        assert_eq!(packer.allocate(4, 2), Some(UVec2::new(0, 0)));
        assert_eq!(packer.allocate(4, 3), Some(UVec2::new(5, 0)));
        // next row starts below the tallest entry of the previous one
        assert_eq!(packer.allocate(4, 2), Some(UVec2::new(0, 4)));
        assert_eq!(packer.allocate(20, 1), None);
        assert_eq!(packer.allocate(9, 5), None);
    }

    #[test]
    fn static_font_loads_from_package() {
        let device = device();
        let files = FileSystem::new();
        let mut package = crate::file::Package::new("fonts");
        package.insert("fonts/test.sfnt", sample_data().to_bytes().unwrap());
        files.add_package(package);

        let font = Font::load_static(&device, &files, "fonts/test.sfnt").unwrap();
        assert!(font.is_static());
        assert_eq!(font.path(), "fonts/test.sfnt");
        assert_eq!((font.size(), font.ascent(), font.descent(), font.line_gap()), (8, 6, -2, 1));

        let a = font.glyph('A').unwrap();
        assert_eq!(a.size, IVec2::new(3, 4));
        assert_eq!(a.texture_size, IVec2::new(8, 8));
        assert!(a.has_pixels());
        assert!(!font.glyph(' ').unwrap().has_pixels());
        assert!(font.glyph('Z').is_none());

        assert_eq!(font.kerning('A', 'V'), -2);
        assert_eq!(font.kerning('V', 'A'), 0);

        let page = font.font_texture(0).unwrap();
        assert_eq!(page.size(), UVec2::new(8, 8));
        assert_eq!(page.read_pixels().unwrap()[(8 + 1) * 4 + 3], 255);
        assert!(font.font_texture(1).is_none());
        assert!(font.font_texture(-1).is_none());
    }

    #[test]
    fn corrupt_static_font_is_a_decode_error() {
        let device = device();
        let files = FileSystem::new();
        let mut package = crate::file::Package::new("fonts");
        let mut bytes = sample_data().to_bytes().unwrap();
        bytes.truncate(bytes.len() - 3);
        package.insert("cut.sfnt", bytes);
        package.insert("magic.sfnt", b"NOPE\x01\0\0\0".to_vec());
        files.add_package(package);

        assert!(matches!(
            Font::load_static(&device, &files, "cut.sfnt"),
            Err(ResourceError::Decode { .. })
        ));
        assert!(matches!(
            Font::load_static(&device, &files, "magic.sfnt"),
            Err(ResourceError::Decode { .. })
        ));
        assert!(matches!(
            Font::load_static(&device, &files, "missing.sfnt"),
            Err(ResourceError::NotFound { .. })
        ));
    }

    #[test]
    fn dynamic_font_rejects_garbage() {
        let device = device();
        let err = Font::dynamic_from_bytes(&device, b"not a font".to_vec(), "junk.ttf", 16).unwrap_err();
        assert!(matches!(err, ResourceError::Decode { .. }));
        let err = Font::dynamic_from_bytes(&device, Vec::new(), "neg.ttf", -12).unwrap_err();
        match err {
            ResourceError::Decode { path, reason } => {
                assert_eq!(path, "neg.ttf");
                assert!(reason.contains("-12"), "{reason}");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn image_font_shares_base_glyphs_but_not_images() {
        let device = device();
        let files = FileSystem::new();
        let mut package = crate::file::Package::new("fonts");
        package.insert("a.sfnt", sample_data().to_bytes().unwrap());
        files.add_package(package);
        let base = Font::load_static(&device, &files, "a.sfnt").unwrap();

        let image_font = Font::create_image_font(&base);
        image_font.add_image_glyph('〇', Texture2D::white(&device).unwrap());
        assert!(image_font.image_glyph('〇').is_some());
        assert!(base.image_glyph('〇').is_none());
        assert_eq!(image_font.glyph('A'), base.glyph('A'));
        assert_eq!(image_font.metrics(), base.metrics());
        assert!(image_font.is_static());
        assert!(matches!(
            image_font.generate_font_file("A", Path::new("unused.sfnt")),
            Err(ResourceError::Unsupported(_))
        ));
    }
}
