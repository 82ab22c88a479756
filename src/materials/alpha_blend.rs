// src/materials/alpha_blend.rs
//! Fixed-function blend state and its CPU evaluation.

use glam::Vec4;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstColor,
    OneMinusDstColor,
    DstAlpha,
    OneMinusDstAlpha,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlendOp {
    Add,
    /// `src - dst`
    Subtract,
    /// `dst - src`
    ReverseSubtract,
    Min,
    Max,
}

/// `result = op(src * src_factor, dst * dst_factor)`, separately for color and alpha.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AlphaBlend {
    pub src_color: BlendFactor,
    pub dst_color: BlendFactor,
    pub color_op: BlendOp,
    pub src_alpha: BlendFactor,
    pub dst_alpha: BlendFactor,
    pub alpha_op: BlendOp,
}

impl Default for AlphaBlend {
    fn default() -> Self {
        Self::normal()
    }
}

impl AlphaBlend {
    /// Source replaces destination.
    pub const fn opacity() -> Self {
        Self {
            src_color: BlendFactor::One,
            dst_color: BlendFactor::Zero,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::Zero,
            alpha_op: BlendOp::Add,
        }
    }

    /// Straight alpha "over".
    pub const fn normal() -> Self {
        Self {
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::OneMinusSrcAlpha,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::One,
            dst_alpha: BlendFactor::OneMinusSrcAlpha,
            alpha_op: BlendOp::Add,
        }
    }

    pub const fn add() -> Self {
        Self {
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::One,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::Zero,
            dst_alpha: BlendFactor::One,
            alpha_op: BlendOp::Add,
        }
    }

    pub const fn subtract() -> Self {
        Self {
            src_color: BlendFactor::SrcAlpha,
            dst_color: BlendFactor::One,
            color_op: BlendOp::ReverseSubtract,
            src_alpha: BlendFactor::Zero,
            dst_alpha: BlendFactor::One,
            alpha_op: BlendOp::Add,
        }
    }

    pub const fn multiply() -> Self {
        Self {
            src_color: BlendFactor::Zero,
            dst_color: BlendFactor::SrcColor,
            color_op: BlendOp::Add,
            src_alpha: BlendFactor::Zero,
            dst_alpha: BlendFactor::One,
            alpha_op: BlendOp::Add,
        }
    }

    /// Evaluates the blend equation for one pixel. The result is not clamped.
    pub fn blend(&self, src: Vec4, dst: Vec4) -> Vec4 {
        let rgb = |v: Vec4| v.truncate();
        let color = apply(
            self.color_op,
            rgb(src) * rgb(factor(self.src_color, src, dst)),
            rgb(dst) * rgb(factor(self.dst_color, src, dst)),
        );
        let alpha = apply_scalar(
            self.alpha_op,
            src.w * factor(self.src_alpha, src, dst).w,
            dst.w * factor(self.dst_alpha, src, dst).w,
        );
        color.extend(alpha)
    }
}

fn factor(factor: BlendFactor, src: Vec4, dst: Vec4) -> Vec4 {
    match factor {
        BlendFactor::Zero => Vec4::ZERO,
        BlendFactor::One => Vec4::ONE,
        BlendFactor::SrcColor => src,
        BlendFactor::OneMinusSrcColor => Vec4::ONE - src,
        BlendFactor::SrcAlpha => Vec4::splat(src.w),
        BlendFactor::OneMinusSrcAlpha => Vec4::splat(1.0 - src.w),
        BlendFactor::DstColor => dst,
        BlendFactor::OneMinusDstColor => Vec4::ONE - dst,
        BlendFactor::DstAlpha => Vec4::splat(dst.w),
        BlendFactor::OneMinusDstAlpha => Vec4::splat(1.0 - dst.w),
    }
}

fn apply(op: BlendOp, a: glam::Vec3, b: glam::Vec3) -> glam::Vec3 {
    match op {
        BlendOp::Add => a + b,
        BlendOp::Subtract => a - b,
        BlendOp::ReverseSubtract => b - a,
        BlendOp::Min => a.min(b),
        BlendOp::Max => a.max(b),
    }
}

fn apply_scalar(op: BlendOp, a: f32, b: f32) -> f32 {
    match op {
        BlendOp::Add => a + b,
        BlendOp::Subtract => a - b,
        BlendOp::ReverseSubtract => b - a,
        BlendOp::Min => a.min(b),
        BlendOp::Max => a.max(b),
    }
}
