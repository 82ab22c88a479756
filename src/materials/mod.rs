// src/materials/mod.rs
//! Materials and blend state.

pub mod alpha_blend;
pub mod material;

pub use alpha_blend::{AlphaBlend, BlendFactor, BlendOp};
pub use material::Material;
