// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// shared.h -> q_shared.rs
// Math and shared types used by every refresh module

use crate::qfiles::{PLANE_ANYZ, PLANE_X, PLANE_Y, PLANE_Z};

// ============================================================
// Basic types
// ============================================================

pub type Vec3 = [f32; 3];

// angle indexes
pub const PITCH: usize = 0;
pub const YAW: usize = 1;
pub const ROLL: usize = 2;

// ============================================================
// Contents and surface flags
// ============================================================

pub const CONTENTS_SOLID: i32 = 1;

/// value will hold the light strength
pub const SURF_LIGHT: i32 = 0x1;
/// don't draw, but add to skybox
pub const SURF_SKY: i32 = 0x4;
/// turbulent water warp
pub const SURF_WARP: i32 = 0x8;
pub const SURF_TRANS33: i32 = 0x10;
pub const SURF_TRANS66: i32 = 0x20;
/// scroll towards angle
pub const SURF_FLOWING: i32 = 0x40;

// refdef flags
pub const RDF_UNDERWATER: i32 = 1;
pub const RDF_NOWORLDMODEL: i32 = 2;

// entity render flags
/// only draw through eyes
pub const RF_WEAPONMODEL: i32 = 4;
pub const RF_TRANSLUCENT: i32 = 32;

// ============================================================
// Plane
// ============================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CPlane {
    pub normal: Vec3,
    pub dist: f32,
    /// for fast side tests
    pub plane_type: u8,
    /// signx + (signy<<1) + (signz<<2)
    pub signbits: u8,
}

impl Default for CPlane {
    fn default() -> Self {
        Self {
            normal: [0.0; 3],
            dist: 0.0,
            plane_type: PLANE_ANYZ as u8,
            signbits: 0,
        }
    }
}

impl CPlane {
    pub fn new(normal: Vec3, dist: f32) -> Self {
        let mut p = Self {
            normal,
            dist,
            plane_type: plane_type_for_normal(&normal) as u8,
            signbits: 0,
        };
        p.signbits = signbits_for_plane(&p);
        p
    }

    /// Signed distance of `point` in front of the plane.
    pub fn distance(&self, point: &Vec3) -> f32 {
        match self.plane_type as i32 {
            PLANE_X => point[0] - self.dist,
            PLANE_Y => point[1] - self.dist,
            PLANE_Z => point[2] - self.dist,
            _ => dot_product(point, &self.normal) - self.dist,
        }
    }
}

/// Bit `j` is set when normal component `j` is negative.
pub fn signbits_for_plane(p: &CPlane) -> u8 {
    let mut bits = 0u8;
    for j in 0..3 {
        if p.normal[j] < 0.0 {
            bits |= 1 << j;
        }
    }
    bits
}

pub fn plane_type_for_normal(n: &Vec3) -> i32 {
    if n[0] == 1.0 {
        return PLANE_X;
    }
    if n[1] == 1.0 {
        return PLANE_Y;
    }
    if n[2] == 1.0 {
        return PLANE_Z;
    }
    PLANE_ANYZ
}

/// Returns 1 if the box is in front, 2 if behind, 3 if it straddles the plane.
pub fn box_on_plane_side(emins: &Vec3, emaxs: &Vec3, p: &CPlane) -> i32 {
    // fast axial cases
    if (p.plane_type as usize) < 3 {
        let t = p.plane_type as usize;
        if p.dist <= emins[t] {
            return 1;
        }
        if p.dist >= emaxs[t] {
            return 2;
        }
        return 3;
    }

    // general case: pick the nearest and farthest corners from the sign bits
    let mut near = [0.0f32; 3];
    let mut far = [0.0f32; 3];
    for j in 0..3 {
        if p.signbits & (1 << j) != 0 {
            near[j] = emaxs[j];
            far[j] = emins[j];
        } else {
            near[j] = emins[j];
            far[j] = emaxs[j];
        }
    }
    let dist1 = dot_product(&p.normal, &far);
    let dist2 = dot_product(&p.normal, &near);

    let mut sides = 0;
    if dist1 >= p.dist {
        sides = 1;
    }
    if dist2 < p.dist {
        sides |= 2;
    }
    sides
}

// ============================================================
// Vector helpers
// ============================================================

#[inline]
pub fn dot_product(a: &Vec3, b: &Vec3) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

#[inline]
pub fn vector_subtract(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2]]
}

#[inline]
pub fn vector_add(a: &Vec3, b: &Vec3) -> Vec3 {
    [a[0] + b[0], a[1] + b[1], a[2] + b[2]]
}

#[inline]
pub fn vector_scale(v: &Vec3, s: f32) -> Vec3 {
    [v[0] * s, v[1] * s, v[2] * s]
}

/// `a + scale * b`
#[inline]
pub fn vector_ma(a: &Vec3, scale: f32, b: &Vec3) -> Vec3 {
    [a[0] + scale * b[0], a[1] + scale * b[1], a[2] + scale * b[2]]
}

pub fn vector_length(v: &Vec3) -> f32 {
    dot_product(v, v).sqrt()
}

pub fn cross_product(v1: &Vec3, v2: &Vec3) -> Vec3 {
    [
        v1[1] * v2[2] - v1[2] * v2[1],
        v1[2] * v2[0] - v1[0] * v2[2],
        v1[0] * v2[1] - v1[1] * v2[0],
    ]
}

/// Normalizes in place and returns the original length.
pub fn vector_normalize(v: &mut Vec3) -> f32 {
    let length = vector_length(v);
    if length != 0.0 {
        let ilength = 1.0 / length;
        v[0] *= ilength;
        v[1] *= ilength;
        v[2] *= ilength;
    }
    length
}

pub fn r_concat_rotations(in1: &[[f32; 3]; 3], in2: &[[f32; 3]; 3], out: &mut [[f32; 3]; 3]) {
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = in1[i][0] * in2[0][j] + in1[i][1] * in2[1][j] + in1[i][2] * in2[2][j];
        }
    }
}

// ============================================================
// Angle functions
// ============================================================

pub fn angle_vectors(
    angles: &Vec3,
    forward: Option<&mut Vec3>,
    right: Option<&mut Vec3>,
    up: Option<&mut Vec3>,
) {
    let (sy, cy) = angles[YAW].to_radians().sin_cos();
    let (sp, cp) = angles[PITCH].to_radians().sin_cos();
    let (sr, cr) = angles[ROLL].to_radians().sin_cos();

    if let Some(fwd) = forward {
        fwd[0] = cp * cy;
        fwd[1] = cp * sy;
        fwd[2] = -sp;
    }
    if let Some(r) = right {
        r[0] = -sr * sp * cy + -cr * -sy;
        r[1] = -sr * sp * sy + -cr * cy;
        r[2] = -sr * cp;
    }
    if let Some(u) = up {
        u[0] = cr * sp * cy + -sr * -sy;
        u[1] = cr * sp * sy + -sr * cy;
        u[2] = cr * cp;
    }
}

/// Returns (forward, right, up).
pub fn angle_vectors_tuple(angles: &Vec3) -> (Vec3, Vec3, Vec3) {
    let mut forward = [0.0f32; 3];
    let mut right = [0.0f32; 3];
    let mut up = [0.0f32; 3];
    angle_vectors(angles, Some(&mut forward), Some(&mut right), Some(&mut up));
    (forward, right, up)
}

pub fn project_point_on_plane(p: &Vec3, normal: &Vec3) -> Vec3 {
    let inv_denom = 1.0 / dot_product(normal, normal);
    let d = dot_product(normal, p) * inv_denom;
    let n = vector_scale(normal, inv_denom);
    [p[0] - d * n[0], p[1] - d * n[1], p[2] - d * n[2]]
}

/// Find a vector perpendicular to `src` (assumed normalized).
pub fn perpendicular_vector(src: &Vec3) -> Vec3 {
    let mut min_elem: f32 = 1.0;
    let mut pos = 0;
    for i in 0..3 {
        if src[i].abs() < min_elem {
            pos = i;
            min_elem = src[i].abs();
        }
    }
    let mut tempvec = [0.0f32; 3];
    tempvec[pos] = 1.0;

    let mut dst = project_point_on_plane(&tempvec, src);
    vector_normalize(&mut dst);
    dst
}

/// Rotates `point` around the axis `dir` by `degrees`.
pub fn rotate_point_around_vector(dir: &Vec3, point: &Vec3, degrees: f32) -> Vec3 {
    let vf = *dir;
    let vr = perpendicular_vector(dir);
    let vup = cross_product(&vr, &vf);

    let m = [
        [vr[0], vup[0], vf[0]],
        [vr[1], vup[1], vf[1]],
        [vr[2], vup[2], vf[2]],
    ];
    let im = [
        [m[0][0], m[1][0], m[2][0]],
        [m[0][1], m[1][1], m[2][1]],
        [m[0][2], m[1][2], m[2][2]],
    ];

    let (s, c) = degrees.to_radians().sin_cos();
    let zrot = [[c, s, 0.0], [-s, c, 0.0], [0.0, 0.0, 1.0]];

    let mut tmpmat = [[0.0f32; 3]; 3];
    r_concat_rotations(&m, &zrot, &mut tmpmat);
    let mut rot = [[0.0f32; 3]; 3];
    r_concat_rotations(&tmpmat, &im, &mut rot);

    let mut dst = [0.0f32; 3];
    for i in 0..3 {
        dst[i] = rot[i][0] * point[0] + rot[i][1] * point[1] + rot[i][2] * point[2];
    }
    dst
}

pub fn radius_from_bounds(mins: &Vec3, maxs: &Vec3) -> f32 {
    let mut corner = [0.0f32; 3];
    for i in 0..3 {
        corner[i] = mins[i].abs().max(maxs[i].abs());
    }
    vector_length(&corner)
}

// ============================================================
// Parsing helpers
// ============================================================

/// Parses a float the way `atof` does: leading numeric prefix, 0 on garbage.
pub fn atof(s: &str) -> f32 {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    let mut seen_digit = false;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while end < bytes.len() {
        let c = bytes[end];
        match c {
            b'0'..=b'9' => seen_digit = true,
            b'+' | b'-' if end == 0 => {}
            b'+' | b'-' if seen_exp && matches!(bytes[end - 1], b'e' | b'E') => {}
            b'.' if !seen_dot && !seen_exp => seen_dot = true,
            b'e' | b'E' if seen_digit && !seen_exp => seen_exp = true,
            _ => break,
        }
        end += 1;
    }
    // drop a dangling exponent marker or sign
    let mut candidate = &s[..end];
    while !candidate.is_empty() {
        if let Ok(v) = candidate.parse::<f32>() {
            return v;
        }
        candidate = &candidate[..candidate.len() - 1];
    }
    0.0
}

/// Parses up to `N` whitespace separated floats, missing entries stay 0.
pub fn parse_floats<const N: usize>(s: &str) -> [f32; N] {
    let mut out = [0.0f32; N];
    for (slot, tok) in out.iter_mut().zip(s.split_whitespace()) {
        *slot = atof(tok);
    }
    out
}

/// Parses the next token from `data`, skipping whitespace and `//` comments.
/// Returns the token and the remaining input (None at end of data).
pub fn com_parse(data: &str) -> (String, Option<&str>) {
    let bytes = data.as_bytes();
    let mut pos = 0;

    loop {
        while pos < bytes.len() && bytes[pos] <= b' ' {
            pos += 1;
        }
        if pos >= bytes.len() {
            return (String::new(), None);
        }
        if bytes[pos] == b'/' && bytes.get(pos + 1) == Some(&b'/') {
            while pos < bytes.len() && bytes[pos] != b'\n' {
                pos += 1;
            }
            continue;
        }
        break;
    }

    let start;
    let end;
    if bytes[pos] == b'"' {
        start = pos + 1;
        pos = start;
        while pos < bytes.len() && bytes[pos] != b'"' {
            pos += 1;
        }
        end = pos;
        if pos < bytes.len() {
            pos += 1;
        }
    } else {
        start = pos;
        while pos < bytes.len() && bytes[pos] > b' ' {
            pos += 1;
        }
        end = pos;
    }

    let token = data[start..end].to_string();
    let rest = if pos >= bytes.len() { None } else { Some(&data[pos..]) };
    (token, rest)
}
