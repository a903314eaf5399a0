// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// gl3_warp.c -> warp.rs
// Water surface subdivision

use q2refresh_common::q_shared::{dot_product, vector_add, vector_scale, Vec3};

use crate::error::ModelError;

pub const SUBDIVIDE_SIZE: f32 = 64.0;
const MAX_SUBDIVIDE_VERTS: usize = 60;

/// Compute axis-aligned bounds for a set of vertices.
pub fn bound_poly(verts: &[Vec3]) -> (Vec3, Vec3) {
    let mut mins = [9999.0f32; 3];
    let mut maxs = [-9999.0f32; 3];
    for v in verts {
        for j in 0..3 {
            mins[j] = mins[j].min(v[j]);
            maxs[j] = maxs[j].max(v[j]);
        }
    }
    (mins, maxs)
}

/// Recursively cuts `verts` on the SUBDIVIDE_SIZE grid and appends the
/// resulting convex pieces to `out`.
pub fn subdivide_polygon(verts: &[Vec3], out: &mut Vec<Vec<Vec3>>) -> Result<(), ModelError> {
    let numverts = verts.len();
    if numverts > MAX_SUBDIVIDE_VERTS {
        return Err(ModelError::TooManyVerts(numverts));
    }

    let (mins, maxs) = bound_poly(verts);

    for i in 0..3 {
        let m = SUBDIVIDE_SIZE * ((mins[i] + maxs[i]) * 0.5 / SUBDIVIDE_SIZE + 0.5).floor();
        if maxs[i] - m < 8.0 {
            continue;
        }
        if m - mins[i] < 8.0 {
            continue;
        }

        // cut it
        let dist: Vec<f32> = verts.iter().map(|v| v[i] - m).collect();

        let mut front: Vec<Vec3> = Vec::with_capacity(numverts + 2);
        let mut back: Vec<Vec3> = Vec::with_capacity(numverts + 2);

        for j in 0..numverts {
            let next = (j + 1) % numverts;
            let v = verts[j];

            if dist[j] >= 0.0 {
                front.push(v);
            }
            if dist[j] <= 0.0 {
                back.push(v);
            }
            if dist[j] == 0.0 || dist[next] == 0.0 {
                continue;
            }
            if (dist[j] > 0.0) != (dist[next] > 0.0) {
                // clip point
                let frac = dist[j] / (dist[j] - dist[next]);
                let w = verts[next];
                let e = [
                    v[0] + frac * (w[0] - v[0]),
                    v[1] + frac * (w[1] - v[1]),
                    v[2] + frac * (w[2] - v[2]),
                ];
                front.push(e);
                back.push(e);
            }
        }

        subdivide_polygon(&front, out)?;
        subdivide_polygon(&back, out)?;
        return Ok(());
    }

    out.push(verts.to_vec());
    Ok(())
}

/// A subdivided piece as drawn: a centre vertex, the ring, and the first
/// ring vertex repeated to close the fan. Texture coordinates are raw
/// (unscaled) texinfo projections; the turbulent shaders scale them.
pub fn warp_fan(verts: &[Vec3], vecs: &[[f32; 4]; 2]) -> Vec<(Vec3, [f32; 2])> {
    let s_axis = [vecs[0][0], vecs[0][1], vecs[0][2]];
    let t_axis = [vecs[1][0], vecs[1][1], vecs[1][2]];

    let mut fan = Vec::with_capacity(verts.len() + 2);
    let mut total = [0.0f32; 3];
    let mut total_s = 0.0f32;
    let mut total_t = 0.0f32;

    fan.push(([0.0; 3], [0.0; 2]));
    for v in verts {
        let s = dot_product(v, &s_axis);
        let t = dot_product(v, &t_axis);
        total_s += s;
        total_t += t;
        total = vector_add(&total, v);
        fan.push((*v, [s, t]));
    }

    let n = verts.len().max(1) as f32;
    fan[0] = (vector_scale(&total, 1.0 / n), [total_s / n, total_t / n]);

    // copy first vertex to last
    if let Some(&first) = fan.get(1) {
        fan.push(first);
    }
    fan
}
