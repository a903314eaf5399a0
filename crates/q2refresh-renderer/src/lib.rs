#![allow(clippy::needless_range_loop, clippy::too_many_arguments, clippy::manual_range_contains)]
// Programmable-pipeline refresh: BSP visibility, shadow atlas, post-processing.

// GPU seam
pub mod backend;
pub mod shaders;
pub mod uniforms;
pub mod framebuffer;

// world data
pub mod error;
pub mod model_types;
pub mod model;
pub mod lightmap;
pub mod warp;
pub mod entities;

// per-frame state
pub mod config;
pub mod refdef;
pub mod matrix;
pub mod view;
pub mod surfbatch;
pub mod surf;
pub mod light;
pub mod area_alloc;
pub mod shadow;
pub mod postfx;
pub mod fog;
pub mod debug;
pub mod rmain;

#[cfg(test)]
mod testutil;

pub use error::{ModelError, RefError, ShaderError};
pub use refdef::{DLight, DLightShadow, Entity, LightStyle, RefDef};
pub use rmain::Renderer;
