// src/camera.rs
use std::sync::Arc;

use glam::{Mat4, UVec2, Vec2, Vec3};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::math::{Aabb2, Color, RectF};
use crate::texture::RenderTexture;

/// What happens to a target's previous contents when a pass starts.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RenderTargetCareType {
    /// Keep whatever is there.
    #[default]
    DontCare,
    Clear,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RenderPassParameter {
    pub clear_color: Color,
    pub color_care: RenderTargetCareType,
    pub depth_care: RenderTargetCareType,
}

impl Default for RenderPassParameter {
    fn default() -> Self {
        Self {
            clear_color: Color::rgba(50, 50, 50, 255),
            color_care: RenderTargetCareType::Clear,
            depth_care: RenderTargetCareType::Clear,
        }
    }
}

impl RenderPassParameter {
    pub fn clear(color: Color) -> Self {
        Self {
            clear_color: color,
            ..Default::default()
        }
    }

    /// Draw on top of the existing contents.
    pub fn load() -> Self {
        Self {
            color_care: RenderTargetCareType::DontCare,
            depth_care: RenderTargetCareType::DontCare,
            ..Default::default()
        }
    }

    pub(crate) fn clear_color_if_any(&self) -> Option<Color> {
        (self.color_care == RenderTargetCareType::Clear).then_some(self.clear_color)
    }
}

#[derive(Clone, Debug)]
struct CameraState {
    transform: Mat4,
    center_offset: Vec2,
    target_texture: Option<RenderTexture>,
    render_pass_parameter: RenderPassParameter,
}

/// 2D camera. Clones share state.
///
/// The view maps world space to target pixels: the inverse of `transform`, then shifted by
/// `center_offset` so the camera position lands at that pixel.
#[derive(Clone, Debug)]
pub struct RenderedCamera {
    state: Arc<RwLock<CameraState>>,
}

impl Default for RenderedCamera {
    fn default() -> Self {
        Self::create()
    }
}

impl RenderedCamera {
    pub fn create() -> Self {
        Self {
            state: Arc::new(RwLock::new(CameraState {
                transform: Mat4::IDENTITY,
                center_offset: Vec2::ZERO,
                target_texture: None,
                render_pass_parameter: RenderPassParameter::load(),
            })),
        }
    }

    pub fn transform(&self) -> Mat4 {
        self.state.read().transform
    }

    pub fn set_transform(&self, transform: Mat4) {
        self.state.write().transform = transform;
    }

    pub fn center_offset(&self) -> Vec2 {
        self.state.read().center_offset
    }

    pub fn set_center_offset(&self, offset: Vec2) {
        self.state.write().center_offset = offset;
    }

    /// `None` renders into whatever target is bound.
    pub fn target_texture(&self) -> Option<RenderTexture> {
        self.state.read().target_texture.clone()
    }

    pub fn set_target_texture(&self, target: Option<RenderTexture>) {
        self.state.write().target_texture = target;
    }

    /// Used when the camera switches to its own target texture.
    pub fn render_pass_parameter(&self) -> RenderPassParameter {
        self.state.read().render_pass_parameter
    }

    pub fn set_render_pass_parameter(&self, parameter: RenderPassParameter) {
        self.state.write().render_pass_parameter = parameter;
    }

    pub fn view_matrix(&self) -> Mat4 {
        let state = self.state.read();
        Mat4::from_translation(state.center_offset.extend(0.0)) * state.transform.inverse()
    }

    /// World-space rectangle the camera sees on a target of `size` pixels.
    pub fn view_bounds(&self, size: UVec2) -> Aabb2 {
        let to_world = self.view_matrix().inverse();
        Aabb2::from_rect(RectF::new(0.0, 0.0, size.x as f32, size.y as f32)).transformed(&to_world)
    }

    pub fn ptr_eq(&self, other: &RenderedCamera) -> bool {
        Arc::ptr_eq(&self.state, &other.state)
    }
}

/// Pixel space (origin top-left, y down) to clip space for a target of `size` pixels.
pub fn pixel_projection(size: UVec2) -> Mat4 {
    let (w, h) = (size.x.max(1) as f32, size.y.max(1) as f32);
    Mat4::from_cols(
        Vec3::new(2.0 / w, 0.0, 0.0).extend(0.0),
        Vec3::new(0.0, -2.0 / h, 0.0).extend(0.0),
        Vec3::Z.extend(0.0),
        Vec3::new(-1.0, 1.0, 0.0).extend(1.0),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn default_camera_is_identity() {
        let camera = RenderedCamera::create();
        assert_eq!(camera.view_matrix(), Mat4::IDENTITY);
        let bounds = camera.view_bounds(UVec2::new(100, 50));
        assert_eq!((bounds.min, bounds.max), (Vec2::ZERO, Vec2::new(100.0, 50.0)));
    }

    #[test]
    fn center_offset_puts_camera_position_at_pixel() {
        let camera = RenderedCamera::create();
        camera.set_transform(Mat4::from_translation(Vec3::new(500.0, 300.0, 0.0)));
        camera.set_center_offset(Vec2::new(50.0, 25.0));
        let p = camera.view_matrix().transform_point3(Vec3::new(500.0, 300.0, 0.0));
        assert_eq!(p, Vec3::new(50.0, 25.0, 0.0));
        let bounds = camera.view_bounds(UVec2::new(100, 50));
        assert_eq!(bounds.min, Vec2::new(450.0, 275.0));
    }

    #[test]
    fn projection_maps_corners_to_clip() {
        let m = pixel_projection(UVec2::new(256, 128));
        assert_eq!(m * Vec4::new(0.0, 0.0, 0.0, 1.0), Vec4::new(-1.0, 1.0, 0.0, 1.0));
        assert_eq!(m * Vec4::new(256.0, 128.0, 0.0, 1.0), Vec4::new(1.0, -1.0, 0.0, 1.0));
    }

    #[test]
    fn clones_share_state() {
        let a = RenderedCamera::create();
        let b = a.clone();
        b.set_center_offset(Vec2::ONE);
        assert_eq!(a.center_offset(), Vec2::ONE);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&RenderedCamera::create()));
        assert_eq!(RenderPassParameter::load().clear_color_if_any(), None);
        assert_eq!(RenderPassParameter::clear(Color::BLACK).clear_color_if_any(), Some(Color::BLACK));
    }
}
