// matrix.rs — column-major 4x4 helpers shared by the view, shadow and post-fx code

use q2refresh_common::q_shared::Vec3;

/// Column-major 4x4 matrix, element `(row, col)` lives at `col * 4 + row`.
pub type Mat4 = [f32; 16];

pub const IDENTITY: Mat4 = [
    1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 1.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// Converts from the engine's Z-up world to the renderer's Y-up, -Z-forward eye space.
pub const Z_UP_BASIS: Mat4 = [
    0.0, 0.0, -1.0, 0.0, // first *column*
    -1.0, 0.0, 0.0, 0.0, //
    0.0, 1.0, 0.0, 0.0, //
    0.0, 0.0, 0.0, 1.0,
];

/// result = a * b
pub fn mat4_multiply(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut result = [0.0f32; 16];
    for col in 0..4 {
        for row in 0..4 {
            let mut sum = 0.0;
            for k in 0..4 {
                sum += a[k * 4 + row] * b[col * 4 + k];
            }
            result[col * 4 + row] = sum;
        }
    }
    result
}

pub fn mat4_mul_vec4(m: &Mat4, v: &[f32; 4]) -> [f32; 4] {
    let mut out = [0.0f32; 4];
    for row in 0..4 {
        out[row] = m[row] * v[0] + m[4 + row] * v[1] + m[8 + row] * v[2] + m[12 + row] * v[3];
    }
    out
}

pub fn mat4_translate(t: &Vec3) -> Mat4 {
    let mut m = IDENTITY;
    m[12] = t[0];
    m[13] = t[1];
    m[14] = t[2];
    m
}

/// General inverse via cofactors. Returns None for singular matrices.
pub fn mat4_invert(m: &Mat4) -> Option<Mat4> {
    let mut inv = [0.0f32; 16];

    inv[0] = m[5] * m[10] * m[15] - m[5] * m[11] * m[14] - m[9] * m[6] * m[15]
        + m[9] * m[7] * m[14] + m[13] * m[6] * m[11] - m[13] * m[7] * m[10];
    inv[4] = -m[4] * m[10] * m[15] + m[4] * m[11] * m[14] + m[8] * m[6] * m[15]
        - m[8] * m[7] * m[14] - m[12] * m[6] * m[11] + m[12] * m[7] * m[10];
    inv[8] = m[4] * m[9] * m[15] - m[4] * m[11] * m[13] - m[8] * m[5] * m[15]
        + m[8] * m[7] * m[13] + m[12] * m[5] * m[11] - m[12] * m[7] * m[9];
    inv[12] = -m[4] * m[9] * m[14] + m[4] * m[10] * m[13] + m[8] * m[5] * m[14]
        - m[8] * m[6] * m[13] - m[12] * m[5] * m[10] + m[12] * m[6] * m[9];
    inv[1] = -m[1] * m[10] * m[15] + m[1] * m[11] * m[14] + m[9] * m[2] * m[15]
        - m[9] * m[3] * m[14] - m[13] * m[2] * m[11] + m[13] * m[3] * m[10];
    inv[5] = m[0] * m[10] * m[15] - m[0] * m[11] * m[14] - m[8] * m[2] * m[15]
        + m[8] * m[3] * m[14] + m[12] * m[2] * m[11] - m[12] * m[3] * m[10];
    inv[9] = -m[0] * m[9] * m[15] + m[0] * m[11] * m[13] + m[8] * m[1] * m[15]
        - m[8] * m[3] * m[13] - m[12] * m[1] * m[11] + m[12] * m[3] * m[9];
    inv[13] = m[0] * m[9] * m[14] - m[0] * m[10] * m[13] - m[8] * m[1] * m[14]
        + m[8] * m[2] * m[13] + m[12] * m[1] * m[10] - m[12] * m[2] * m[9];
    inv[2] = m[1] * m[6] * m[15] - m[1] * m[7] * m[14] - m[5] * m[2] * m[15]
        + m[5] * m[3] * m[14] + m[13] * m[2] * m[7] - m[13] * m[3] * m[6];
    inv[6] = -m[0] * m[6] * m[15] + m[0] * m[7] * m[14] + m[4] * m[2] * m[15]
        - m[4] * m[3] * m[14] - m[12] * m[2] * m[7] + m[12] * m[3] * m[6];
    inv[10] = m[0] * m[5] * m[15] - m[0] * m[7] * m[13] - m[4] * m[1] * m[15]
        + m[4] * m[3] * m[13] + m[12] * m[1] * m[7] - m[12] * m[3] * m[5];
    inv[14] = -m[0] * m[5] * m[14] + m[0] * m[6] * m[13] + m[4] * m[1] * m[14]
        - m[4] * m[2] * m[13] - m[12] * m[1] * m[6] + m[12] * m[2] * m[5];
    inv[3] = -m[1] * m[6] * m[11] + m[1] * m[7] * m[10] + m[5] * m[2] * m[11]
        - m[5] * m[3] * m[10] - m[9] * m[2] * m[7] + m[9] * m[3] * m[6];
    inv[7] = m[0] * m[6] * m[11] - m[0] * m[7] * m[10] - m[4] * m[2] * m[11]
        + m[4] * m[3] * m[10] + m[8] * m[2] * m[7] - m[8] * m[3] * m[6];
    inv[11] = -m[0] * m[5] * m[11] + m[0] * m[7] * m[9] + m[4] * m[1] * m[11]
        - m[4] * m[3] * m[9] - m[8] * m[1] * m[7] + m[8] * m[3] * m[5];
    inv[15] = m[0] * m[5] * m[10] - m[0] * m[6] * m[9] - m[4] * m[1] * m[10]
        + m[4] * m[2] * m[9] + m[8] * m[1] * m[6] - m[8] * m[2] * m[5];

    let det = m[0] * inv[0] + m[1] * inv[4] + m[2] * inv[8] + m[3] * inv[12];
    if det == 0.0 {
        return None;
    }
    let inv_det = 1.0 / det;
    for v in inv.iter_mut() {
        *v *= inv_det;
    }
    Some(inv)
}

/// Yaw-pitch-roll: `R_z * R_y * R_x`.
pub fn rot_around_axis_zyx(around_z_deg: f32, around_y_deg: f32, around_x_deg: f32) -> Mat4 {
    let (sin_a, cos_a) = around_z_deg.to_radians().sin_cos();
    let (sin_b, cos_b) = around_y_deg.to_radians().sin_cos();
    let (sin_g, cos_g) = around_x_deg.to_radians().sin_cos();

    [
        cos_a * cos_b, sin_a * cos_b, -sin_b, 0.0, // first *column*
        cos_a * sin_b * sin_g - sin_a * cos_g, sin_a * sin_b * sin_g + cos_a * cos_g, cos_b * sin_g, 0.0,
        cos_a * sin_b * cos_g + sin_a * sin_g, sin_a * sin_b * cos_g - cos_a * sin_g, cos_b * cos_g, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// `R_x * R_y * R_z`.
pub fn rot_around_axis_xyz(around_x_deg: f32, around_y_deg: f32, around_z_deg: f32) -> Mat4 {
    let (sin_a, cos_a) = around_x_deg.to_radians().sin_cos();
    let (sin_b, cos_b) = around_y_deg.to_radians().sin_cos();
    let (sin_g, cos_g) = around_z_deg.to_radians().sin_cos();

    [
        cos_b * cos_g, sin_a * sin_b * cos_g + cos_a * sin_g, -cos_a * sin_b * cos_g + sin_a * sin_g, 0.0,
        -cos_b * sin_g, -sin_a * sin_b * sin_g + cos_a * cos_g, cos_a * sin_b * sin_g + sin_a * cos_g, 0.0,
        sin_b, -sin_a * cos_b, cos_a * cos_b, 0.0,
        0.0, 0.0, 0.0, 1.0,
    ]
}

/// Off-center perspective in the style of glFrustum, with `zoom` scaling the
/// half extents (values below 1 narrow the effective field of view).
pub fn perspective(fovy: f64, aspect: f64, zoom: f64, z_near: f64, z_far: f64) -> Mat4 {
    let top = z_near * (fovy * std::f64::consts::PI / 360.0).tan() * zoom;
    let bottom = -top;
    let left = bottom * aspect;
    let right = top * aspect;

    let a = (right + left) / (right - left);
    let b = (top + bottom) / (top - bottom);
    let c = -(z_far + z_near) / (z_far - z_near);
    let d = -(2.0 * z_far * z_near) / (z_far - z_near);

    [
        ((2.0 * z_near) / (right - left)) as f32, 0.0, 0.0, 0.0, // first *column*
        0.0, ((2.0 * z_near) / (top - bottom)) as f32, 0.0, 0.0,
        a as f32, b as f32, c as f32, -1.0,
        0.0, 0.0, d as f32, 0.0,
    ]
}

/// Depth-linearization pair for a projection: `depth = q + r / z`.
pub fn depth_linearization(z_near: f32, z_far: f32) -> (f32, f32) {
    let q = z_far / (z_far - z_near);
    let r = -q * z_near;
    (q, r)
}

/// View matrix for a camera at `origin` looking along `angles` (pitch, yaw, roll).
pub fn view_matrix(origin: &Vec3, angles: &Vec3) -> Mat4 {
    let rot = rot_around_axis_xyz(-angles[2], -angles[0], -angles[1]);
    let view = mat4_multiply(&Z_UP_BASIS, &rot);
    mat4_multiply(&view, &mat4_translate(&[-origin[0], -origin[1], -origin[2]]))
}
