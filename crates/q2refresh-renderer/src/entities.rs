// entities.rs — scan of the map entity lump for renderer features
//
// Only fog and shadow light hints are of interest here. The scanner works on
// characters, never allocates per brush, and ignores anything it does not
// understand.

use q2refresh_common::q_shared::{atof, parse_floats, Vec3};

pub const DEFAULT_LIGHT_RADIUS: f32 = 300.0;
pub const DEFAULT_LIGHT_RESOLUTION: i32 = 512;

/// A `_shadowlight` entity.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityLight {
    pub origin: Vec3,
    /// pitch yaw roll of the cone axis
    pub angles: Vec3,
    pub cone_angle: f32,
    pub radius: f32,
    pub resolution: i32,
    pub darken: f32,
    pub spot: bool,
}

/// What the renderer takes from the entity lump.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapEntities {
    /// r, g, b, density
    pub fog: Option<[f32; 4]>,
    pub sun: bool,
    pub sun_angles: [f32; 2],
    pub lights: Vec<EntityLight>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EntityKind {
    Invalid,
    Worldspawn,
    Light,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Initial,
    Entity1,
    Entity2,
    FieldKey,
    FieldValue,
    Brushes,
    Comment,
}

/// Per entity scratch, cleared at every closing brace.
#[derive(Debug, Default)]
struct Pending {
    sun: bool,
    shadowlight: bool,
    origin: Vec3,
    angles: Vec3,
    cone_angle: f32,
    radius: f32,
    resolution: f32,
    darken: f32,
    spot: bool,
}

impl Pending {
    fn handle_key(&mut self, kind: EntityKind, key: &str, value: &str, out: &mut MapEntities) {
        if key.is_empty() {
            return;
        }

        match kind {
            EntityKind::Worldspawn => match key {
                "_shadowsun" => self.sun = true,
                "_shadowsunangle" => out.sun_angles = parse_floats::<2>(value),
                "fog" => {
                    let [d, r, g, b] = parse_floats::<4>(value);
                    out.fog = Some([r, g, b, d]);
                }
                _ => {}
            },
            EntityKind::Light => match key {
                "_shadowlight" => self.shadowlight = true,
                "origin" => self.origin = parse_floats::<3>(value),
                "mangle" => {
                    self.angles = parse_floats::<3>(value);
                    self.spot = true;
                }
                "angle" | "_shadowlightconeangle" => {
                    self.cone_angle = atof(value);
                    self.spot = true;
                }
                "_shadowlightradius" => self.radius = atof(value),
                "_shadowlightresolution" => self.resolution = atof(value),
                "_shadowlightdarken" => self.darken = atof(value),
                _ => {}
            },
            EntityKind::Invalid => {}
        }
    }

    fn end_entity(&mut self, kind: EntityKind, out: &mut MapEntities) {
        match kind {
            EntityKind::Light if self.shadowlight => {
                let radius = if self.radius > 0.0 { self.radius } else { DEFAULT_LIGHT_RADIUS };
                let resolution = if self.resolution as i32 > 0 {
                    self.resolution as i32
                } else {
                    DEFAULT_LIGHT_RESOLUTION
                };
                out.lights.push(EntityLight {
                    origin: self.origin,
                    angles: self.angles,
                    cone_angle: self.cone_angle,
                    radius,
                    resolution,
                    darken: self.darken,
                    spot: self.spot,
                });
            }
            EntityKind::Worldspawn if self.sun => out.sun = true,
            _ => {}
        }
        *self = Pending::default();
    }
}

/// Scans `text` and collects fog and shadow light definitions.
///
/// The first entity is assumed to be the worldspawn. Later entities only
/// become interesting once a key starting with `_shadowlight` shows up.
/// Malformed numbers read as 0.
pub fn parse_entities(text: &str) -> MapEntities {
    let bytes = text.as_bytes();
    let mut out = MapEntities::default();
    let mut pending = Pending::default();

    let mut state = ParseState::Initial;
    let mut kind = EntityKind::Worldspawn;
    let mut field_begin = 0usize;
    let mut key = "";

    let mut offs = 0usize;
    while offs < bytes.len() {
        let c = bytes[offs];
        match state {
            ParseState::Initial => {
                if c == b'/' && bytes.get(offs + 1) == Some(&b'/') {
                    state = ParseState::Comment;
                    offs += 1;
                } else if c == b'{' {
                    state = ParseState::Entity1;
                }
            }
            ParseState::Entity1 => match c {
                b'"' => {
                    state = ParseState::FieldKey;
                    field_begin = offs + 1;
                }
                b'{' => state = ParseState::Brushes,
                b'}' => {
                    state = ParseState::Initial;
                    pending.end_entity(kind, &mut out);
                    kind = EntityKind::Invalid;
                }
                _ => {}
            },
            ParseState::Entity2 => {
                if c == b'"' {
                    state = ParseState::FieldValue;
                    field_begin = offs + 1;
                }
            }
            ParseState::FieldKey => {
                if c == b'"' {
                    state = ParseState::Entity2;
                    key = text.get(field_begin..offs).unwrap_or("");
                }
            }
            ParseState::FieldValue => {
                if c == b'"' {
                    state = ParseState::Entity1;
                    let value = text.get(field_begin..offs).unwrap_or("");

                    if key == "classname" && value == "worldspawn" {
                        kind = EntityKind::Worldspawn;
                    }
                    if kind == EntityKind::Invalid && key.starts_with("_shadowlight") {
                        kind = EntityKind::Light;
                    }
                    pending.handle_key(kind, key, value, &mut out);
                }
            }
            ParseState::Brushes => {
                if c == b'}' {
                    state = ParseState::Entity1;
                }
            }
            ParseState::Comment => {
                if c == b'\n' {
                    state = ParseState::Initial;
                }
            }
        }
        offs += 1;
    }

    log::debug!(
        "parse_entities: fog {:?}, {} shadow lights{}",
        out.fog,
        out.lights.len(),
        if out.sun { ", sun" } else { "" }
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worldspawn_fog() {
        let e = parse_entities("{\"classname\" \"worldspawn\" \"fog\" \"0.002 0.5 0.5 0.5\"}");
        assert_eq!(e.fog, Some([0.5, 0.5, 0.5, 0.002]));
        assert!(e.lights.is_empty());
        assert!(!e.sun);
    }

    #[test]
    fn test_shadowlight_entity() {
        let text = "{\n\"classname\" \"worldspawn\"\n}\n\
                    {\n\"classname\" \"light\"\n\"_shadowlight\" \"1\"\n\"origin\" \"64 -32 128\"\n\
                    \"_shadowlightradius\" \"500\"\n}\n";
        let e = parse_entities(text);
        assert_eq!(e.lights.len(), 1);
        let l = &e.lights[0];
        assert_eq!(l.origin, [64.0, -32.0, 128.0]);
        assert_eq!(l.radius, 500.0);
        assert_eq!(l.resolution, DEFAULT_LIGHT_RESOLUTION);
        assert!(!l.spot);
    }

    #[test]
    fn test_keys_before_shadowlight_are_dropped() {
        // origin arrives while the entity is still unclassified
        let text = "{\"classname\" \"worldspawn\"}\n\
                    {\"origin\" \"1 2 3\" \"_shadowlight\" \"1\" \"mangle\" \"10 20 0\"}";
        let e = parse_entities(text);
        assert_eq!(e.lights.len(), 1);
        assert_eq!(e.lights[0].origin, [0.0; 3]);
        assert_eq!(e.lights[0].angles, [10.0, 20.0, 0.0]);
        assert!(e.lights[0].spot);
        assert_eq!(e.lights[0].radius, DEFAULT_LIGHT_RADIUS);
    }

    #[test]
    fn test_plain_lights_are_ignored() {
        let text = "{\"classname\" \"worldspawn\"}\n{\"classname\" \"light\" \"origin\" \"0 0 0\" \"light\" \"300\"}";
        let e = parse_entities(text);
        assert!(e.lights.is_empty());
    }

    #[test]
    fn test_comments_and_brushes_skipped() {
        let text = "// \"fog\" \"1 1 1 1\" {\n\
                    {\n\"classname\" \"worldspawn\"\n{\n( 0 0 0 ) ( 1 0 0 ) ( 0 1 0 ) \"tex\" 0 0 0\n}\n\
                    \"fog\" \"0.01 1 0 0\"\n}\n";
        let e = parse_entities(text);
        assert_eq!(e.fog, Some([1.0, 0.0, 0.0, 0.01]));
    }

    #[test]
    fn test_sun_flag_and_malformed_numbers() {
        let text = "{\"classname\" \"worldspawn\" \"_shadowsun\" \"1\" \"_shadowsunangle\" \"45 90\" \"fog\" \"abc\"}";
        let e = parse_entities(text);
        assert!(e.sun);
        assert_eq!(e.sun_angles, [45.0, 90.0]);
        assert_eq!(e.fog, Some([0.0; 4]));
    }

    #[test]
    fn test_unterminated_text() {
        let e = parse_entities("{\"classname\" \"worldspawn\" \"fog\" \"0.1");
        assert_eq!(e.fog, None);
        assert_eq!(parse_entities(""), MapEntities::default());
    }
}
