// src/math.rs
//! Small value types shared by the renderer: colors, rectangles, the batch vertex and 2D AABBs.

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};

/// 8-bit RGBA color.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Pod, Zeroable, Serialize, Deserialize)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgba(255, 255, 255, 255);
    pub const BLACK: Color = Color::rgba(0, 0, 0, 255);
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Normalized `[0, 1]` components.
    pub fn to_vec4(self) -> Vec4 {
        Vec4::new(self.r as f32, self.g as f32, self.b as f32, self.a as f32) / 255.0
    }

    pub fn from_vec4(v: Vec4) -> Self {
        let c = (v.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round();
        Self::rgba(c.x as u8, c.y as u8, c.z as u8, c.w as u8)
    }
}

impl Default for Color {
    fn default() -> Self {
        Color::WHITE
    }
}

/// Axis-aligned rectangle, `(x, y)` is the top-left corner.
#[derive(Copy, Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RectF {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl RectF {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self { x, y, width, height }
    }

    pub fn position(&self) -> Vec2 {
        Vec2::new(self.x, self.y)
    }

    pub fn size(&self) -> Vec2 {
        Vec2::new(self.width, self.height)
    }

    /// Corners in clockwise order starting at the top-left.
    pub fn corners(&self) -> [Vec2; 4] {
        [
            Vec2::new(self.x, self.y),
            Vec2::new(self.x + self.width, self.y),
            Vec2::new(self.x + self.width, self.y + self.height),
            Vec2::new(self.x, self.y + self.height),
        ]
    }
}

/// Vertex layout shared by every batch: `Position[3], Color[4], UV1[2], UV2[2]`.
/// The field order is part of the public contract.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct BatchVertex {
    pub position: [f32; 3],
    pub color: [u8; 4],
    pub uv1: [f32; 2],
    pub uv2: [f32; 2],
}

impl BatchVertex {
    pub const STRIDE: usize = std::mem::size_of::<BatchVertex>();

    pub fn new(position: Vec3, color: Color, uv1: Vec2, uv2: Vec2) -> Self {
        Self {
            position: position.to_array(),
            color: color.to_array(),
            uv1: uv1.to_array(),
            uv2: uv2.to_array(),
        }
    }
}

/// 2D bounding box in world space.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Aabb2 {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb2 {
    pub const EMPTY: Aabb2 = Aabb2 {
        min: Vec2::splat(f32::INFINITY),
        max: Vec2::splat(f32::NEG_INFINITY),
    };

    pub fn from_rect(rect: RectF) -> Self {
        Self::from_points(rect.corners())
    }

    pub fn from_points(points: impl IntoIterator<Item = Vec2>) -> Self {
        points.into_iter().fold(Self::EMPTY, |acc, p| Aabb2 {
            min: acc.min.min(p),
            max: acc.max.max(p),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.min.x > self.max.x || self.min.y > self.max.y
    }

    pub fn union(&self, other: &Aabb2) -> Self {
        Aabb2 {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Bounds of `self` after applying `m` to its four corners.
    pub fn transformed(&self, m: &Mat4) -> Self {
        if self.is_empty() {
            return *self;
        }
        let corners = [
            Vec2::new(self.min.x, self.min.y),
            Vec2::new(self.max.x, self.min.y),
            Vec2::new(self.max.x, self.max.y),
            Vec2::new(self.min.x, self.max.y),
        ];
        Self::from_points(corners.into_iter().map(|c| m.transform_point3(c.extend(0.0)).truncate()))
    }

    /// Touching edges count as overlap so zero-width drawables on a boundary stay visible.
    pub fn intersects(&self, other: &Aabb2) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vertex_layout_matches_contract() {
        assert_eq!(BatchVertex::STRIDE, 12 + 4 + 8 + 8);
        let v = BatchVertex::new(Vec3::new(1.0, 2.0, 3.0), Color::rgba(1, 2, 3, 4), Vec2::ZERO, Vec2::ONE);
        let bytes: &[u8] = bytemuck::bytes_of(&v);
        assert_eq!(&bytes[12..16], &[1, 2, 3, 4]);
    }

    #[test]
    fn aabb_translate_and_intersect() {
        let b = Aabb2::from_rect(RectF::new(0.0, 0.0, 10.0, 10.0));
        let moved = b.transformed(&Mat4::from_translation(Vec3::new(100.0, 0.0, 0.0)));
        assert_eq!(moved.min, Vec2::new(100.0, 0.0));
        assert!(!b.intersects(&moved));
        assert!(moved.intersects(&Aabb2::from_rect(RectF::new(95.0, 5.0, 10.0, 1.0))));
    }

    #[test]
    fn empty_never_intersects() {
        assert!(!Aabb2::EMPTY.intersects(&Aabb2::from_rect(RectF::new(0.0, 0.0, 1.0, 1.0))));
    }

    #[test]
    fn color_vec4_conversion() {
        assert_eq!(Color::from_vec4(Color::WHITE.to_vec4()), Color::WHITE);
        assert_eq!(Color::from_vec4(Vec4::new(2.0, -1.0, 0.5, 1.0)), Color::rgba(255, 0, 128, 255));
    }
}
