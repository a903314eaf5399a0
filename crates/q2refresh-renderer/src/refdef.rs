// refdef.rs — per-frame input handed to the refresh by the client

use q2refresh_common::q_shared::Vec3;

use crate::model::ModelHandle;
use crate::uniforms::MAX_LIGHTSTYLES;

/// Entity to draw this frame.
#[derive(Debug, Clone, Default)]
pub struct Entity {
    pub model: Option<ModelHandle>,
    pub angles: Vec3,
    pub origin: Vec3,
    /// also used for texture animation of brush models
    pub frame: i32,
    /// ignore if RF_TRANSLUCENT isn't set
    pub alpha: f32,
    pub flags: i32,
}

/// How a dynamic light wants to be shadowed.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DLightShadow {
    /// a fresh per-frame shadow light
    #[default]
    Dynamic,
    /// reuse the baked static light with this index
    Static(usize),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DLight {
    pub origin: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub shadow: DLightShadow,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LightStyle {
    pub rgb: Vec3,
    pub white: f32,
}

/// Rendering parameters for a frame.
#[derive(Debug, Clone)]
pub struct RefDef {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub fov_x: f32,
    pub fov_y: f32,
    pub vieworg: Vec3,
    pub viewangles: Vec3,
    /// rgba 0-1 full screen blend
    pub blend: [f32; 4],
    /// time is used to auto animate
    pub time: f32,
    /// RDF_UNDERWATER, etc
    pub rdflags: i32,
    /// if set, only areas with set bits will be drawn
    pub areabits: Option<Vec<u8>>,
    pub lightstyles: Vec<LightStyle>,
    pub entities: Vec<Entity>,
    pub dlights: Vec<DLight>,
}

impl Default for RefDef {
    fn default() -> Self {
        Self {
            x: 0,
            y: 0,
            width: 640,
            height: 480,
            fov_x: 90.0,
            fov_y: 73.74,
            vieworg: [0.0; 3],
            viewangles: [0.0; 3],
            blend: [0.0; 4],
            time: 0.0,
            rdflags: 0,
            areabits: None,
            lightstyles: vec![LightStyle { rgb: [1.0; 3], white: 3.0 }; MAX_LIGHTSTYLES],
            entities: Vec::new(),
            dlights: Vec::new(),
        }
    }
}
