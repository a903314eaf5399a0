// debug.rs — immediate mode line overlay for frustums, lights and bounds
// Converted from: src/client/refresh/gl3/gl3_debug.c

use log::trace;

use q2refresh_common::q_shared::{cross_product, perpendicular_vector, vector_add, vector_ma, vector_scale, Vec3};

use crate::backend::{DebugVertex, RenderBackend};
use crate::matrix::IDENTITY;
use crate::shaders::{ProgramKind, ShaderSet};
use crate::uniforms::{UniformBlock, UniformBuffers};

pub const MAX_DEBUG_VERTICES: usize = 4096 * 4;
pub const MAX_DEBUG_INDICES: usize = 4096 * 8;

const SPHERE_STEP: f32 = 45.0;

/// Line list collected during a frame and drawn in one call. Shapes that
/// would overflow the arrays are dropped whole.
#[derive(Debug, Default)]
pub struct DebugLines {
    vertices: Vec<DebugVertex>,
    indices: Vec<u16>,
}

fn sphere_point(radius: f32, theta: f32, phi: f32) -> Vec3 {
    let (theta, phi) = (theta.to_radians(), phi.to_radians());
    [radius * theta.sin() * phi.sin(), radius * phi.cos(), radius * theta.cos() * phi.sin()]
}

impl DebugLines {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn vertices(&self) -> &[DebugVertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u16] {
        &self.indices
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    fn fits(&self, vertices: usize, indices: usize) -> bool {
        let ok = self.vertices.len() + vertices <= MAX_DEBUG_VERTICES
            && self.indices.len() + indices <= MAX_DEBUG_INDICES;
        if !ok {
            trace!("debug lines full, dropping shape");
        }
        ok
    }

    /// Appends `points` and returns the index of the first one.
    fn push_vertices(&mut self, points: &[Vec3], color: &Vec3) -> u16 {
        let start = self.vertices.len() as u16;
        let color = [color[0], color[1], color[2], 1.0];
        self.vertices.extend(points.iter().map(|&pos| DebugVertex { pos, color }));
        start
    }

    /// `edges` are pairs of offsets from `start`.
    fn push_edges(&mut self, start: u16, edges: &[(u16, u16)]) {
        for &(a, b) in edges {
            self.indices.push(start + a);
            self.indices.push(start + b);
        }
    }

    pub fn add_line(&mut self, from: &Vec3, to: &Vec3, color: &Vec3) {
        if !self.fits(2, 2) {
            return;
        }
        let start = self.push_vertices(&[*from, *to], color);
        self.push_edges(start, &[(0, 1)]);
    }

    /// Wire sphere of 45 degree latitude/longitude patches.
    pub fn add_sphere(&mut self, origin: &Vec3, radius: f32, color: &Vec3) {
        let rings = (180.0 / SPHERE_STEP) as usize;
        let segments = (360.0 / SPHERE_STEP) as usize;
        if !self.fits(rings * segments * 4, rings * segments * 8) {
            return;
        }

        for ring in 0..rings {
            let phi = ring as f32 * SPHERE_STEP;
            for segment in 0..segments {
                let theta = segment as f32 * SPHERE_STEP;
                let patch = [
                    sphere_point(radius, theta, phi),
                    sphere_point(radius, theta + SPHERE_STEP, phi),
                    sphere_point(radius, theta, phi + SPHERE_STEP),
                    sphere_point(radius, theta + SPHERE_STEP, phi + SPHERE_STEP),
                ]
                .map(|p| vector_add(origin, &p));
                let start = self.push_vertices(&patch, color);
                self.push_edges(start, &[(0, 1), (2, 3), (0, 2), (1, 3)]);
            }
        }
    }

    /// Square of side `size` facing `normal`, with a tick along the normal.
    pub fn add_plane(&mut self, origin: &Vec3, normal: &Vec3, size: f32, color: &Vec3) {
        if !self.fits(6, 10) {
            return;
        }
        let half = size * 0.5;
        let tangent = perpendicular_vector(normal);
        let u = vector_scale(&tangent, half);
        let v = vector_scale(&cross_product(normal, &tangent), half);

        let corner = |su: f32, sv: f32| vector_ma(&vector_ma(origin, su, &u), sv, &v);
        let points = [
            corner(-1.0, -1.0),
            corner(1.0, -1.0),
            corner(1.0, 1.0),
            corner(-1.0, 1.0),
            *origin,
            vector_ma(origin, half, normal),
        ];
        let start = self.push_vertices(&points, color);
        self.push_edges(start, &[(0, 1), (1, 2), (2, 3), (3, 0), (4, 5)]);
    }

    /// The 12 edges of an axial box.
    pub fn add_box(&mut self, mins: &Vec3, maxs: &Vec3, color: &Vec3) {
        if !self.fits(8, 24) {
            return;
        }
        let corners: [Vec3; 8] = std::array::from_fn(|i| {
            [
                if i & 1 != 0 { maxs[0] } else { mins[0] },
                if i & 2 != 0 { maxs[1] } else { mins[1] },
                if i & 4 != 0 { maxs[2] } else { mins[2] },
            ]
        });
        let start = self.push_vertices(&corners, color);
        self.push_edges(
            start,
            &[
                (0, 1), (1, 3), (3, 2), (2, 0),
                (4, 5), (5, 7), (7, 6), (6, 4),
                (0, 4), (1, 5), (2, 6), (3, 7),
            ],
        );
    }

    /// Frustum from its near corners 0..4 and far corners 4..8.
    pub fn add_frustum(&mut self, vertices: &[Vec3; 8], color: &Vec3) {
        if !self.fits(8, 24) {
            return;
        }
        let start = self.push_vertices(vertices, color);
        self.push_edges(
            start,
            &[
                (0, 1), (1, 2), (2, 3), (3, 0),
                (4, 5), (5, 6), (6, 7), (7, 4),
                (0, 4), (1, 5), (2, 6), (3, 7),
            ],
        );
    }

    /// Draws everything collected with the current view and empties the list.
    pub fn draw(&mut self, backend: &mut dyn RenderBackend, shaders: &mut ShaderSet, ubos: &mut UniformBuffers) {
        if !self.is_empty() {
            shaders.use_program(backend, ProgramKind::Debug);
            ubos.three_d.trans_model = IDENTITY;
            ubos.update(backend, UniformBlock::ThreeD);
            backend.draw_lines(&self.vertices, &self.indices);
        }
        self.vertices.clear();
        self.indices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, RecordingBackend};
    use crate::uniforms::{Uni3D, UniCommon};

    const RED: Vec3 = [1.0, 0.0, 0.0];

    #[test]
    fn test_line_uses_two_indices() {
        let mut lines = DebugLines::new();
        lines.add_line(&[0.0; 3], &[1.0, 2.0, 3.0], &RED);
        lines.add_line(&[0.0; 3], &[4.0, 5.0, 6.0], &RED);
        assert_eq!(lines.indices(), &[0, 1, 2, 3]);
        assert_eq!(lines.vertices()[3].pos, [4.0, 5.0, 6.0]);
        assert_eq!(lines.vertices()[0].color, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_sphere_points_on_radius() {
        let mut lines = DebugLines::new();
        let origin = [10.0, 20.0, 30.0];
        lines.add_sphere(&origin, 8.0, &RED);
        assert_eq!(lines.vertices().len(), 4 * 8 * 4);
        assert_eq!(lines.indices().len(), 4 * 8 * 8);
        for v in lines.vertices() {
            let d: f32 = (0..3).map(|i| (v.pos[i] - origin[i]).powi(2)).sum::<f32>().sqrt();
            assert!((d - 8.0).abs() < 1e-3);
        }
    }

    #[test]
    fn test_plane_is_square_with_tick() {
        let mut lines = DebugLines::new();
        let normal = [0.0, 0.0, 1.0];
        lines.add_plane(&[0.0, 0.0, 5.0], &normal, 4.0, &RED);
        assert_eq!(lines.indices().len(), 10);
        let verts = lines.vertices();
        for v in &verts[..4] {
            assert!((v.pos[2] - 5.0).abs() < 1e-5);
            let d = (v.pos[0] * v.pos[0] + v.pos[1] * v.pos[1]).sqrt();
            assert!((d - 8.0f32.sqrt()).abs() < 1e-4);
        }
        assert_eq!(verts[4].pos, [0.0, 0.0, 5.0]);
        assert_eq!(verts[5].pos, [0.0, 0.0, 7.0]);
        assert_eq!(&lines.indices()[8..], &[4, 5]);
    }

    #[test]
    fn test_box_and_frustum_edges() {
        let mut lines = DebugLines::new();
        lines.add_box(&[-1.0; 3], &[1.0; 3], &RED);
        assert_eq!(lines.vertices().len(), 8);
        assert_eq!(lines.indices().len(), 24);
        // every edge is axis aligned with length 2
        for pair in lines.indices().chunks(2) {
            let a = lines.vertices()[pair[0] as usize].pos;
            let b = lines.vertices()[pair[1] as usize].pos;
            let diff: Vec<f32> = (0..3).map(|i| (a[i] - b[i]).abs()).collect();
            assert_eq!(diff.iter().filter(|&&d| d == 2.0).count(), 1);
            assert_eq!(diff.iter().filter(|&&d| d == 0.0).count(), 2);
        }

        let frustum: [Vec3; 8] = std::array::from_fn(|i| [i as f32, 0.0, 0.0]);
        lines.add_frustum(&frustum, &RED);
        assert_eq!(lines.vertices().len(), 16);
        assert_eq!(lines.indices().len(), 48);
        assert_eq!(&lines.indices()[24..26], &[8, 9]);
    }

    #[test]
    fn test_overflow_drops_whole_shapes() {
        let mut lines = DebugLines::new();
        for _ in 0..MAX_DEBUG_VERTICES / 2 {
            lines.add_line(&[0.0; 3], &[1.0; 3], &RED);
        }
        assert_eq!(lines.vertices().len(), MAX_DEBUG_VERTICES);
        lines.add_line(&[0.0; 3], &[1.0; 3], &RED);
        assert_eq!(lines.vertices().len(), MAX_DEBUG_VERTICES);

        // index space runs out first for boxes
        let mut boxes = DebugLines::new();
        for _ in 0..MAX_DEBUG_VERTICES / 8 {
            boxes.add_box(&[0.0; 3], &[1.0; 3], &RED);
        }
        assert_eq!(boxes.indices().len(), MAX_DEBUG_INDICES / 24 * 24);
        assert_eq!(boxes.vertices().len(), MAX_DEBUG_INDICES / 24 * 8);
    }

    #[test]
    fn test_draw_uploads_and_resets() {
        let mut be = RecordingBackend::new();
        let mut shaders = ShaderSet::init(&mut be).unwrap();
        let mut ubos = UniformBuffers::new(&mut be, UniCommon::default(), Uni3D::default());
        ubos.three_d.trans_model = [2.0; 16];
        shaders.invalidate();
        be.clear_calls();

        let mut lines = DebugLines::new();
        lines.draw(&mut be, &mut shaders, &mut ubos);
        assert!(be.calls.is_empty());

        lines.add_box(&[0.0; 3], &[1.0; 3], &RED);
        lines.draw(&mut be, &mut shaders, &mut ubos);
        assert!(lines.is_empty());
        assert!(lines.vertices().is_empty());
        assert_eq!(ubos.three_d.trans_model, IDENTITY);
        assert!(be.calls.contains(&BackendCall::DrawLines { vertices: 8, indices: 24 }));
        let program = shaders.program(ProgramKind::Debug).unwrap();
        assert!(be.calls.contains(&BackendCall::UseProgram(program)));
    }
}
