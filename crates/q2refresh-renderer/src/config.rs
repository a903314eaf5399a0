// config.rs — renderer cvars and their per-frame snapshot

use q2refresh_common::cvar::{CvarContext, CVAR_ARCHIVE};
use q2refresh_common::q_shared::parse_floats;

/// name, default, flags
const REF_CVARS: &[(&str, &str, i32)] = &[
    ("r_novis", "0", 0),
    ("r_lockpvs", "0", 0),
    ("gl_cull", "1", 0),
    ("r_drawworld", "1", 0),
    ("flushmap", "0", 0),
    ("vid_gamma", "1.2", CVAR_ARCHIVE),
    ("gl3_intensity", "1.5", CVAR_ARCHIVE),
    ("gl3_intensity_2D", "1.5", CVAR_ARCHIVE),
    ("gl3_overbrightbits", "1.3", CVAR_ARCHIVE),
    ("gl3_particle_fade_factor", "1.2", CVAR_ARCHIVE),
    ("gl_msaa_samples", "0", CVAR_ARCHIVE),
    ("gl_zfar", "4096", 0),
    ("r_shadowmap", "1", CVAR_ARCHIVE),
    ("r_shadowmap_maxlights", "32", CVAR_ARCHIVE),
    ("r_shadowmap_distances", "1024 2048 3072", CVAR_ARCHIVE),
    ("r_ssao", "0", CVAR_ARCHIVE),
    ("r_ssao_intensity", "1", CVAR_ARCHIVE),
    ("r_bloom", "0", CVAR_ARCHIVE),
    ("r_bloom_threshold", "1", CVAR_ARCHIVE),
    ("r_bloom_intensity", "0.5", CVAR_ARCHIVE),
    ("r_hdr", "0", CVAR_ARCHIVE),
    ("r_hdr_mode", "0", CVAR_ARCHIVE),
    ("r_hdr_exposure", "1", CVAR_ARCHIVE),
    ("r_motionblur", "0", CVAR_ARCHIVE),
    ("r_motionblur_samples", "8", CVAR_ARCHIVE),
    ("r_debug_frustum", "0", 0),
    ("r_debug_lights", "0", 0),
];

/// Creates every renderer cvar with its default, keeping values already set.
pub fn register_cvars(cvars: &mut CvarContext) {
    for &(name, value, flags) in REF_CVARS {
        cvars.get(name, value, flags);
    }
}

/// Typed copy of the renderer cvars, taken once per frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RefSettings {
    pub novis: bool,
    pub lockpvs: bool,
    pub cull: bool,
    pub drawworld: bool,
    pub flushmap: bool,
    pub gamma: f32,
    pub intensity: f32,
    pub intensity_2d: f32,
    pub overbrightbits: f32,
    pub particle_fade_factor: f32,
    pub msaa_samples: i32,
    pub zfar: f32,
    pub shadowmap: bool,
    pub shadowmap_maxlights: usize,
    /// halve resolution, halve again, drop
    pub shadowmap_distances: [f32; 3],
    pub ssao: bool,
    pub ssao_intensity: f32,
    pub bloom: bool,
    pub bloom_threshold: f32,
    pub bloom_intensity: f32,
    pub hdr: bool,
    pub hdr_mode: i32,
    pub hdr_exposure: f32,
    pub motionblur: f32,
    pub motionblur_samples: i32,
    pub debug_frustum: bool,
    pub debug_lights: bool,
}

impl Default for RefSettings {
    fn default() -> Self {
        let mut cvars = CvarContext::new();
        register_cvars(&mut cvars);
        Self::snapshot(&cvars)
    }
}

impl RefSettings {
    pub fn snapshot(cvars: &CvarContext) -> Self {
        let v = |name: &str| cvars.variable_value(name);
        let on = |name: &str| cvars.variable_value(name) != 0.0;

        let overbrightbits = v("gl3_overbrightbits");
        Self {
            novis: on("r_novis"),
            lockpvs: on("r_lockpvs"),
            cull: on("gl_cull"),
            drawworld: on("r_drawworld"),
            flushmap: on("flushmap"),
            gamma: v("vid_gamma"),
            intensity: v("gl3_intensity"),
            intensity_2d: v("gl3_intensity_2D"),
            overbrightbits: if overbrightbits <= 0.0 { 1.0 } else { overbrightbits },
            particle_fade_factor: v("gl3_particle_fade_factor"),
            msaa_samples: v("gl_msaa_samples").max(0.0) as i32,
            zfar: v("gl_zfar"),
            shadowmap: on("r_shadowmap"),
            shadowmap_maxlights: v("r_shadowmap_maxlights").max(0.0) as usize,
            shadowmap_distances: parse_floats::<3>(cvars.variable_string("r_shadowmap_distances")),
            ssao: on("r_ssao"),
            ssao_intensity: v("r_ssao_intensity"),
            bloom: on("r_bloom"),
            bloom_threshold: v("r_bloom_threshold"),
            bloom_intensity: v("r_bloom_intensity"),
            hdr: on("r_hdr"),
            hdr_mode: v("r_hdr_mode") as i32,
            hdr_exposure: v("r_hdr_exposure"),
            motionblur: v("r_motionblur"),
            motionblur_samples: v("r_motionblur_samples").max(1.0) as i32,
            debug_frustum: on("r_debug_frustum"),
            debug_lights: on("r_debug_lights"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let s = RefSettings::default();
        assert!(!s.novis);
        assert!(s.cull);
        assert!(s.drawworld);
        assert!(s.shadowmap);
        assert_eq!(s.shadowmap_maxlights, 32);
        assert_eq!(s.shadowmap_distances, [1024.0, 2048.0, 3072.0]);
        assert!((s.gamma - 1.2).abs() < 1e-6);
        assert!((s.overbrightbits - 1.3).abs() < 1e-6);
        assert_eq!(s.motionblur_samples, 8);
        assert!((s.zfar - 4096.0).abs() < 1e-6);
    }

    #[test]
    fn test_register_keeps_user_values() {
        let mut cvars = CvarContext::new();
        cvars.set("r_shadowmap_maxlights", "4");
        cvars.set("gl3_overbrightbits", "0");
        register_cvars(&mut cvars);
        let s = RefSettings::snapshot(&cvars);
        assert_eq!(s.shadowmap_maxlights, 4);
        assert_eq!(s.overbrightbits, 1.0);
    }
}
