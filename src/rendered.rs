// src/rendered.rs
//! Drawables.
//!
//! [`Rendered`] is the sum of the three drawable kinds. Each kind is a cheap `Arc` handle, so
//! the renderer's draw list and the culling system can share one drawable; it lives until the
//! last strong handle goes away. Every drawable gets a process-unique, never reused id.
//!
//! Geometry is produced in local space. The renderer applies world × view × projection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use glam::{Mat4, Vec2, Vec3};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::font::Font;
use crate::materials::{AlphaBlend, Material};
use crate::math::{Aabb2, BatchVertex, Color, RectF};
use crate::texture::{Texture, TextureBase};

static NEXT_RENDERED_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RenderedId(pub u64);

impl RenderedId {
    fn next() -> Self {
        RenderedId(NEXT_RENDERED_ID.fetch_add(1, Ordering::Relaxed))
    }
}

/// State every drawable carries.
#[derive(Clone, Debug)]
struct RenderedBase {
    transform: Mat4,
    alpha_blend: Option<AlphaBlend>,
}

impl Default for RenderedBase {
    fn default() -> Self {
        Self {
            transform: Mat4::IDENTITY,
            alpha_blend: None,
        }
    }
}

pub(crate) struct Node<T> {
    id: RenderedId,
    base: RwLock<RenderedBase>,
    data: RwLock<T>,
}

impl<T: Default> Node<T> {
    fn create() -> Arc<Self> {
        Arc::new(Self {
            id: RenderedId::next(),
            base: RwLock::new(RenderedBase::default()),
            data: RwLock::new(T::default()),
        })
    }
}

macro_rules! rendered_handle {
    ($(#[$meta:meta])* $name:ident, $data:ty) => {
        $(#[$meta])*
        #[derive(Clone)]
        pub struct $name {
            node: Arc<Node<$data>>,
        }

        impl $name {
            pub fn create() -> Self {
                Self { node: Node::create() }
            }

            pub fn id(&self) -> RenderedId {
                self.node.id
            }

            pub fn transform(&self) -> Mat4 {
                self.node.base.read().transform
            }

            pub fn set_transform(&self, transform: Mat4) {
                self.node.base.write().transform = transform;
            }

            /// Overrides the material's blend mode when set.
            pub fn alpha_blend(&self) -> Option<AlphaBlend> {
                self.node.base.read().alpha_blend
            }

            pub fn set_alpha_blend(&self, blend: Option<AlphaBlend>) {
                self.node.base.write().alpha_blend = blend;
            }

            pub fn ptr_eq(&self, other: &Self) -> bool {
                Arc::ptr_eq(&self.node, &other.node)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::create()
            }
        }

        impl std::fmt::Debug for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.debug_struct(stringify!($name)).field("id", &self.node.id).finish()
            }
        }
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Pieces handed to the renderer
// ─────────────────────────────────────────────────────────────────────────────

/// Which default material a piece falls back to when the drawable has none.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum MaterialRole {
    Sprite,
    Glyph,
    Image,
}

/// One batchable part of a drawable, in local space.
pub(crate) struct Piece {
    pub texture: Option<TextureBase>,
    pub material: Option<Arc<Material>>,
    pub role: MaterialRole,
    /// Text weight, packed as a per-draw `weight` uniform over the glyph material's values.
    pub weight: Option<f32>,
    pub vertices: Vec<BatchVertex>,
    pub indices: Vec<u32>,
}

fn quad(rect: RectF, uv: RectF, color: Color) -> (Vec<BatchVertex>, Vec<u32>) {
    let vertices = rect
        .corners()
        .into_iter()
        .zip(uv.corners())
        .map(|(p, t)| BatchVertex::new(p.extend(0.0), color, t, Vec2::ZERO))
        .collect();
    (vertices, vec![0, 1, 2, 0, 2, 3])
}

/// Normalized UV rect of `src` inside `texture`. A zero-sized `src` selects the whole texture.
fn uv_rect(src: RectF, texture: Option<&TextureBase>) -> RectF {
    match texture {
        Some(t) if src.width != 0.0 && src.height != 0.0 => {
            let size = t.size().as_vec2();
            RectF::new(src.x / size.x, src.y / size.y, src.width / size.x, src.height / size.y)
        }
        _ => RectF::new(0.0, 0.0, 1.0, 1.0),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sprite
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub(crate) struct SpriteData {
    texture: Option<TextureBase>,
    src: RectF,
    material: Option<Arc<Material>>,
    color: Color,
}

rendered_handle!(
    /// A textured rectangle. Its local size is the source rect, or the texture size when the
    /// source rect is empty.
    RenderedSprite,
    SpriteData
);

impl RenderedSprite {
    pub fn texture(&self) -> Option<TextureBase> {
        self.node.data.read().texture.clone()
    }

    pub fn set_texture(&self, texture: Option<TextureBase>) {
        self.node.data.write().texture = texture;
    }

    pub fn src(&self) -> RectF {
        self.node.data.read().src
    }

    pub fn set_src(&self, src: RectF) {
        self.node.data.write().src = src;
    }

    pub fn material(&self) -> Option<Arc<Material>> {
        self.node.data.read().material.clone()
    }

    pub fn set_material(&self, material: Option<Arc<Material>>) {
        self.node.data.write().material = material;
    }

    pub fn color(&self) -> Color {
        self.node.data.read().color
    }

    pub fn set_color(&self, color: Color) {
        self.node.data.write().color = color;
    }

    fn local_rect(data: &SpriteData) -> RectF {
        match &data.texture {
            Some(t) if data.src.width == 0.0 || data.src.height == 0.0 => {
                let size = t.size().as_vec2();
                RectF::new(0.0, 0.0, size.x, size.y)
            }
            _ => RectF::new(0.0, 0.0, data.src.width, data.src.height),
        }
    }

    fn bounds(&self) -> Aabb2 {
        Aabb2::from_rect(Self::local_rect(&self.node.data.read()))
    }

    fn pieces(&self) -> Vec<Piece> {
        let data = self.node.data.read();
        let rect = Self::local_rect(&data);
        let (vertices, indices) = quad(rect, uv_rect(data.src, data.texture.as_ref()), data.color);
        vec![Piece {
            texture: data.texture.clone(),
            material: data.material.clone(),
            role: MaterialRole::Sprite,
            weight: None,
            vertices,
            indices,
        }]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Polygon
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Default)]
pub(crate) struct PolygonData {
    vertices: Vec<BatchVertex>,
    /// `None` draws the vertices as a triangle fan.
    indices: Option<Vec<u32>>,
    texture: Option<TextureBase>,
    src: RectF,
    material: Option<Arc<Material>>,
}

rendered_handle!(
    /// Arbitrary vertices, drawn as a triangle fan unless explicit indices are set.
    RenderedPolygon,
    PolygonData
);

impl RenderedPolygon {
    pub fn vertexes(&self) -> Vec<BatchVertex> {
        self.node.data.read().vertices.clone()
    }

    pub fn set_vertexes(&self, vertices: Vec<BatchVertex>) {
        self.node.data.write().vertices = vertices;
    }

    /// Positions in local space, white, with UVs spanning the points' bounding box.
    pub fn create_vertexes_by_vector2(&self, positions: &[Vec2]) {
        let bounds = Aabb2::from_points(positions.iter().copied());
        let extent = (bounds.max - bounds.min).max(Vec2::splat(f32::EPSILON));
        let vertices = positions
            .iter()
            .map(|p| BatchVertex::new(p.extend(0.0), Color::WHITE, (*p - bounds.min) / extent, Vec2::ZERO))
            .collect();
        self.set_vertexes(vertices);
    }

    pub fn overwrite_vertexes_color(&self, color: Color) {
        for v in self.node.data.write().vertices.iter_mut() {
            v.color = color.to_array();
        }
    }

    pub fn indices(&self) -> Option<Vec<u32>> {
        self.node.data.read().indices.clone()
    }

    /// Triangle list into the vertex array. Triangles naming a missing vertex are dropped.
    pub fn set_indices(&self, indices: Option<Vec<u32>>) {
        self.node.data.write().indices = indices;
    }

    pub fn texture(&self) -> Option<TextureBase> {
        self.node.data.read().texture.clone()
    }

    pub fn set_texture(&self, texture: Option<TextureBase>) {
        self.node.data.write().texture = texture;
    }

    /// UVs are remapped into this region of the texture. Empty means the whole texture.
    pub fn src(&self) -> RectF {
        self.node.data.read().src
    }

    pub fn set_src(&self, src: RectF) {
        self.node.data.write().src = src;
    }

    pub fn material(&self) -> Option<Arc<Material>> {
        self.node.data.read().material.clone()
    }

    pub fn set_material(&self, material: Option<Arc<Material>>) {
        self.node.data.write().material = material;
    }

    fn triangle_indices(data: &PolygonData) -> Vec<u32> {
        let count = data.vertices.len() as u32;
        match &data.indices {
            Some(indices) => indices
                .chunks_exact(3)
                .filter(|tri| tri.iter().all(|&i| i < count))
                .flatten()
                .copied()
                .collect(),
            None => (1..count.saturating_sub(1)).flat_map(|i| [0, i, i + 1]).collect(),
        }
    }

    fn bounds(&self) -> Aabb2 {
        Aabb2::from_points(
            self.node
                .data
                .read()
                .vertices
                .iter()
                .map(|v| Vec2::new(v.position[0], v.position[1])),
        )
    }

    fn pieces(&self) -> Vec<Piece> {
        let data = self.node.data.read();
        let indices = Self::triangle_indices(&data);
        if indices.is_empty() {
            return Vec::new();
        }
        let region = uv_rect(data.src, data.texture.as_ref());
        let vertices = data
            .vertices
            .iter()
            .map(|v| {
                let uv = region.position() + Vec2::from_array(v.uv1) * region.size();
                BatchVertex { uv1: uv.to_array(), ..*v }
            })
            .collect();
        vec![Piece {
            texture: data.texture.clone(),
            material: data.material.clone(),
            role: MaterialRole::Sprite,
            weight: None,
            vertices,
            indices,
        }]
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Text
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Copy, Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WritingDirection {
    /// Left to right, lines go down.
    #[default]
    Horizontal,
    /// Top to bottom, columns go left.
    Vertical,
}

#[derive(Clone, Debug)]
pub(crate) struct TextData {
    font: Option<Font>,
    text: String,
    material_glyph: Option<Arc<Material>>,
    material_image: Option<Arc<Material>>,
    weight: f32,
    is_enable_kerning: bool,
    writing_direction: WritingDirection,
    line_gap: f32,
    character_space: f32,
    color: Color,
}

impl Default for TextData {
    fn default() -> Self {
        Self {
            font: None,
            text: String::new(),
            material_glyph: None,
            material_image: None,
            weight: 0.0,
            is_enable_kerning: true,
            writing_direction: WritingDirection::Horizontal,
            line_gap: 0.0,
            character_space: 0.0,
            color: Color::WHITE,
        }
    }
}

/// A laid-out glyph quad in local space.
#[derive(Clone, Debug)]
pub(crate) struct GlyphQuad {
    pub rect: RectF,
    pub uv: RectF,
    pub texture: TextureBase,
    pub image: bool,
}

struct TextLayout {
    quads: Vec<GlyphQuad>,
    extents: Aabb2,
}

fn layout(data: &TextData) -> TextLayout {
    let mut out = TextLayout {
        quads: Vec::new(),
        extents: Aabb2::EMPTY,
    };
    let Some(font) = &data.font else {
        return out;
    };
    let metrics = font.metrics();
    let line_height = metrics.line_height() as f32;
    let line_advance = line_height + metrics.line_gap as f32 + data.line_gap;
    let vertical = data.writing_direction == WritingDirection::Vertical;

    let mut pen = Vec2::ZERO;
    let mut prev: Option<char> = None;
    for ch in data.text.chars() {
        match ch {
            '\n' => {
                if vertical {
                    pen = Vec2::new(pen.x - line_advance, 0.0);
                } else {
                    pen = Vec2::new(0.0, pen.y + line_advance);
                }
                prev = None;
                continue;
            }
            '\r' => continue,
            _ => {}
        }
        if data.is_enable_kerning && !vertical {
            if let Some(p) = prev {
                pen.x += font.kerning(p, ch) as f32;
            }
        }

        let advance = if let Some(image) = font.image_glyph(ch) {
            let size = image.size().as_vec2();
            let width = size.x * line_height / size.y.max(1.0);
            out.quads.push(GlyphQuad {
                rect: RectF::new(pen.x, pen.y, width, line_height),
                uv: RectF::new(0.0, 0.0, 1.0, 1.0),
                texture: image,
                image: true,
            });
            width
        } else if let Some(glyph) = font.glyph(ch) {
            if glyph.has_pixels() {
                if let Some(page) = font.font_texture(glyph.texture_index) {
                    let page_size = glyph.texture_size.as_vec2().max(Vec2::ONE);
                    let column_shift = if vertical {
                        (metrics.size - glyph.advance) as f32 * 0.5
                    } else {
                        0.0
                    };
                    out.quads.push(GlyphQuad {
                        rect: RectF::new(
                            pen.x + column_shift + glyph.offset.x as f32,
                            pen.y + metrics.ascent as f32 + glyph.offset.y as f32,
                            glyph.size.x as f32,
                            glyph.size.y as f32,
                        ),
                        uv: RectF::new(
                            glyph.position.x as f32 / page_size.x,
                            glyph.position.y as f32 / page_size.y,
                            glyph.size.x as f32 / page_size.x,
                            glyph.size.y as f32 / page_size.y,
                        ),
                        texture: page.into(),
                        image: false,
                    });
                }
            }
            glyph.advance as f32
        } else {
            prev = Some(ch);
            continue;
        };

        let cell = if vertical {
            RectF::new(pen.x, pen.y, metrics.size as f32, line_height)
        } else {
            RectF::new(pen.x, pen.y, advance, line_height)
        };
        out.extents = out.extents.union(&Aabb2::from_rect(cell));
        if vertical {
            pen.y += line_height + data.character_space;
        } else {
            pen.x += advance + data.character_space;
        }
        prev = Some(ch);
    }
    for quad in &out.quads {
        out.extents = out.extents.union(&Aabb2::from_rect(quad.rect));
    }
    out
}

rendered_handle!(
    /// A string drawn with a [`Font`].
    RenderedText,
    TextData
);

impl RenderedText {
    pub fn font(&self) -> Option<Font> {
        self.node.data.read().font.clone()
    }

    pub fn set_font(&self, font: Option<Font>) {
        self.node.data.write().font = font;
    }

    pub fn text(&self) -> String {
        self.node.data.read().text.clone()
    }

    pub fn set_text(&self, text: impl Into<String>) {
        self.node.data.write().text = text.into();
    }

    pub fn material_glyph(&self) -> Option<Arc<Material>> {
        self.node.data.read().material_glyph.clone()
    }

    pub fn set_material_glyph(&self, material: Option<Arc<Material>>) {
        self.node.data.write().material_glyph = material;
    }

    pub fn material_image(&self) -> Option<Arc<Material>> {
        self.node.data.read().material_image.clone()
    }

    pub fn set_material_image(&self, material: Option<Arc<Material>>) {
        self.node.data.write().material_image = material;
    }

    pub fn weight(&self) -> f32 {
        self.node.data.read().weight
    }

    pub fn set_weight(&self, weight: f32) {
        self.node.data.write().weight = weight;
    }

    pub fn is_enable_kerning(&self) -> bool {
        self.node.data.read().is_enable_kerning
    }

    pub fn set_is_enable_kerning(&self, enabled: bool) {
        self.node.data.write().is_enable_kerning = enabled;
    }

    pub fn writing_direction(&self) -> WritingDirection {
        self.node.data.read().writing_direction
    }

    pub fn set_writing_direction(&self, direction: WritingDirection) {
        self.node.data.write().writing_direction = direction;
    }

    pub fn line_gap(&self) -> f32 {
        self.node.data.read().line_gap
    }

    pub fn set_line_gap(&self, gap: f32) {
        self.node.data.write().line_gap = gap;
    }

    pub fn character_space(&self) -> f32 {
        self.node.data.read().character_space
    }

    pub fn set_character_space(&self, space: f32) {
        self.node.data.write().character_space = space;
    }

    pub fn color(&self) -> Color {
        self.node.data.read().color
    }

    pub fn set_color(&self, color: Color) {
        self.node.data.write().color = color;
    }

    /// Size of the laid-out run, zero without a font or text.
    pub fn text_size(&self) -> Vec2 {
        let layout = layout(&self.node.data.read());
        if layout.extents.is_empty() {
            return Vec2::ZERO;
        }
        layout.extents.max - layout.extents.min
    }

    pub(crate) fn glyph_quads(&self) -> Vec<GlyphQuad> {
        layout(&self.node.data.read()).quads
    }

    fn bounds(&self) -> Aabb2 {
        layout(&self.node.data.read()).extents
    }

    fn pieces(&self) -> Vec<Piece> {
        let data = self.node.data.read();
        layout(&data)
            .quads
            .into_iter()
            .map(|q| {
                let (vertices, indices) = quad(q.rect, q.uv, data.color);
                if q.image {
                    Piece {
                        texture: Some(q.texture),
                        material: data.material_image.clone(),
                        role: MaterialRole::Image,
                        weight: None,
                        vertices,
                        indices,
                    }
                } else {
                    Piece {
                        texture: Some(q.texture),
                        material: data.material_glyph.clone(),
                        role: MaterialRole::Glyph,
                        weight: Some(data.weight),
                        vertices,
                        indices,
                    }
                }
            })
            .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Sum type
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Clone, Debug)]
pub enum Rendered {
    Sprite(RenderedSprite),
    Polygon(RenderedPolygon),
    Text(RenderedText),
}

impl Rendered {
    pub fn id(&self) -> RenderedId {
        match self {
            Rendered::Sprite(r) => r.id(),
            Rendered::Polygon(r) => r.id(),
            Rendered::Text(r) => r.id(),
        }
    }

    pub fn transform(&self) -> Mat4 {
        match self {
            Rendered::Sprite(r) => r.transform(),
            Rendered::Polygon(r) => r.transform(),
            Rendered::Text(r) => r.transform(),
        }
    }

    pub fn alpha_blend(&self) -> Option<AlphaBlend> {
        match self {
            Rendered::Sprite(r) => r.alpha_blend(),
            Rendered::Polygon(r) => r.alpha_blend(),
            Rendered::Text(r) => r.alpha_blend(),
        }
    }

    /// Intrinsic extent before the transform.
    pub fn local_bounds(&self) -> Aabb2 {
        match self {
            Rendered::Sprite(r) => r.bounds(),
            Rendered::Polygon(r) => r.bounds(),
            Rendered::Text(r) => r.bounds(),
        }
    }

    pub fn world_bounds(&self) -> Aabb2 {
        self.local_bounds().transformed(&self.transform())
    }

    pub(crate) fn pieces(&self) -> Vec<Piece> {
        match self {
            Rendered::Sprite(r) => r.pieces(),
            Rendered::Polygon(r) => r.pieces(),
            Rendered::Text(r) => r.pieces(),
        }
    }

    pub(crate) fn downgrade(&self) -> WeakRendered {
        match self {
            Rendered::Sprite(r) => WeakRendered::Sprite(Arc::downgrade(&r.node)),
            Rendered::Polygon(r) => WeakRendered::Polygon(Arc::downgrade(&r.node)),
            Rendered::Text(r) => WeakRendered::Text(Arc::downgrade(&r.node)),
        }
    }
}

impl From<&RenderedSprite> for Rendered {
    fn from(r: &RenderedSprite) -> Self {
        Rendered::Sprite(r.clone())
    }
}

impl From<&RenderedPolygon> for Rendered {
    fn from(r: &RenderedPolygon) -> Self {
        Rendered::Polygon(r.clone())
    }
}

impl From<&RenderedText> for Rendered {
    fn from(r: &RenderedText) -> Self {
        Rendered::Text(r.clone())
    }
}

/// Non-owning reference held by the culling system.
#[derive(Clone)]
pub(crate) enum WeakRendered {
    Sprite(Weak<Node<SpriteData>>),
    Polygon(Weak<Node<PolygonData>>),
    Text(Weak<Node<TextData>>),
}

impl WeakRendered {
    pub(crate) fn upgrade(&self) -> Option<Rendered> {
        Some(match self {
            WeakRendered::Sprite(w) => Rendered::Sprite(RenderedSprite { node: w.upgrade()? }),
            WeakRendered::Polygon(w) => Rendered::Polygon(RenderedPolygon { node: w.upgrade()? }),
            WeakRendered::Text(w) => Rendered::Text(RenderedText { node: w.upgrade()? }),
        })
    }
}

/// Applies `transform` to local-space vertices.
pub(crate) fn transform_vertices(vertices: &mut [BatchVertex], transform: &Mat4) {
    for v in vertices {
        let p = transform.transform_point3(Vec3::from_array(v.position));
        v.position = p.to_array();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::font::sample_font;
    use crate::gpu::software::SoftwareDevice;
    use crate::gpu::GraphicsDevice;
    use crate::texture::{Texture2D, TextureConfig};

    fn device() -> Arc<dyn GraphicsDevice> {
        Arc::new(SoftwareDevice::new(16, 16))
    }

    #[test]
    fn ids_are_unique_and_increasing() {
        let a = RenderedSprite::create();
        let b = RenderedPolygon::create();
        let c = RenderedText::create();
        assert!(a.id() < b.id() && b.id() < c.id());
        assert_eq!(Rendered::from(&a).id(), a.id());
        assert_eq!(a.clone().id(), a.id());
    }

    #[test]
    fn sprite_bounds_follow_src_and_transform() {
        let sprite = RenderedSprite::create();
        sprite.set_src(RectF::new(0.0, 0.0, 64.0, 32.0));
        sprite.set_transform(Mat4::from_translation(Vec3::new(10.0, 20.0, 0.0)));
        let world = Rendered::from(&sprite).world_bounds();
        assert_eq!(world.min, Vec2::new(10.0, 20.0));
        assert_eq!(world.max, Vec2::new(74.0, 52.0));
    }

    #[test]
    fn sprite_uvs_cover_src_region() {
        let device = device();
        let texture: TextureBase = Texture2D::from_pixels(&device, 4, 4, &[255; 64], TextureConfig::default())
            .unwrap()
            .into();
        let sprite = RenderedSprite::create();
        sprite.set_texture(Some(texture));
        sprite.set_src(RectF::new(2.0, 0.0, 2.0, 4.0));
        let pieces = Rendered::from(&sprite).pieces();
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0].vertices[0].uv1, [0.5, 0.0]);
        assert_eq!(pieces[0].vertices[2].uv1, [1.0, 1.0]);
        assert_eq!(pieces[0].vertices[2].position, [2.0, 4.0, 0.0]);
        assert_eq!(pieces[0].indices, vec![0, 1, 2, 0, 2, 3]);
    }

    #[test]
    fn empty_src_uses_texture_size() {
        let device = device();
        let sprite = RenderedSprite::create();
        sprite.set_texture(Some(Texture2D::white(&device).unwrap().into()));
        let bounds = Rendered::from(&sprite).local_bounds();
        assert_eq!(bounds.max, Vec2::ONE);
    }

    #[test]
    fn polygon_fan_and_helpers() {
        let polygon = RenderedPolygon::create();
        polygon.create_vertexes_by_vector2(&[
            Vec2::new(0.0, 0.0),
            Vec2::new(10.0, 0.0),
            Vec2::new(10.0, 10.0),
            Vec2::new(0.0, 10.0),
        ]);
        let vertices = polygon.vertexes();
        assert_eq!(vertices[2].uv1, [1.0, 1.0]);
        assert!(vertices.iter().all(|v| v.color == [255, 255, 255, 255]));

        polygon.overwrite_vertexes_color(Color::rgba(1, 2, 3, 4));
        assert!(polygon.vertexes().iter().all(|v| v.color == [1, 2, 3, 4]));

        let pieces = Rendered::from(&polygon).pieces();
        assert_eq!(pieces[0].indices, vec![0, 1, 2, 0, 2, 3]);
        assert_eq!(Rendered::from(&polygon).local_bounds().max, Vec2::new(10.0, 10.0));
    }

    #[test]
    fn polygon_drops_out_of_range_triangles() {
        let polygon = RenderedPolygon::create();
        polygon.create_vertexes_by_vector2(&[Vec2::ZERO, Vec2::X, Vec2::Y]);
        polygon.set_indices(Some(vec![0, 1, 2, 0, 2, 9, 1]));
        let pieces = Rendered::from(&polygon).pieces();
        assert_eq!(pieces[0].indices, vec![0, 1, 2]);

        let degenerate = RenderedPolygon::create();
        degenerate.create_vertexes_by_vector2(&[Vec2::ZERO, Vec2::X]);
        assert!(Rendered::from(&degenerate).pieces().is_empty());
    }

    #[test]
    fn text_layout_applies_kerning_only_when_enabled() {
        let device = device();
        let text = RenderedText::create();
        text.set_font(Some(sample_font(&device)));
        text.set_text("AV");

        // advance 5 each, kerning AV = -2
        assert_eq!(text.text_size(), Vec2::new(8.0, 8.0));
        let quads = text.glyph_quads();
        assert_eq!(quads.len(), 2);
        assert_eq!(quads[1].rect.x, 3.0);
        // ascent 6 + offset -4
        assert_eq!(quads[0].rect.y, 2.0);

        text.set_is_enable_kerning(false);
        assert_eq!(text.text_size(), Vec2::new(10.0, 8.0));
        assert_eq!(text.glyph_quads()[1].rect.x, 5.0);
    }

    #[test]
    fn text_lines_spaces_and_missing_glyphs() {
        let device = device();
        let text = RenderedText::create();
        text.set_font(Some(sample_font(&device)));
        text.set_is_enable_kerning(false);
        text.set_text("A A\nA?");
        // spaces advance without a quad, unknown characters are skipped
        assert_eq!(text.glyph_quads().len(), 3);
        // line height 8 + font gap 1
        assert_eq!(text.text_size(), Vec2::new(13.0, 17.0));
        assert!(RenderedText::create().text_size() == Vec2::ZERO);
    }

    #[test]
    fn image_glyphs_take_precedence() {
        let device = device();
        let font = crate::font::Font::create_image_font(&sample_font(&device));
        let image = Texture2D::from_pixels(&device, 2, 4, &[255; 32], TextureConfig::default()).unwrap();
        font.add_image_glyph('A', image);
        let text = RenderedText::create();
        text.set_font(Some(font));
        text.set_text("AV");
        let pieces = Rendered::from(&text).pieces();
        assert_eq!(pieces.len(), 2);
        assert_eq!(pieces[0].role, MaterialRole::Image);
        assert_eq!(pieces[1].role, MaterialRole::Glyph);
        // scaled to the 8px line height
        let quads = text.glyph_quads();
        assert_eq!((quads[0].rect.width, quads[0].rect.height), (4.0, 8.0));
    }

    #[test]
    fn vertical_text_stacks_downwards() {
        let device = device();
        let text = RenderedText::create();
        text.set_font(Some(sample_font(&device)));
        text.set_writing_direction(WritingDirection::Vertical);
        text.set_text("AA");
        let quads = text.glyph_quads();
        assert_eq!(quads[1].rect.y - quads[0].rect.y, 8.0);
        assert_eq!(quads[0].rect.x, quads[1].rect.x);
    }

    #[test]
    fn weak_reference_expires_with_last_handle() {
        let sprite = RenderedSprite::create();
        let weak = Rendered::from(&sprite).downgrade();
        assert!(weak.upgrade().is_some());
        drop(sprite);
        assert!(weak.upgrade().is_none());
    }
}
