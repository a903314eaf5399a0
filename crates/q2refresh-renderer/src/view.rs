// view.rs — per-view frustum, culling and PVS cluster lookup
// Converted from: src/client/refresh/gl3/gl3_view.c

use q2refresh_common::q_shared::{
    angle_vectors_tuple, box_on_plane_side, dot_product, rotate_point_around_vector, signbits_for_plane,
    vector_ma, vector_subtract, CPlane, Vec3, CONTENTS_SOLID,
};
use q2refresh_common::qfiles::PLANE_ANYZ;

use crate::model_types::{BspData, BspNode};

/// Camera state for one render pass: the main view or one shadow face.
#[derive(Debug, Clone)]
pub struct ViewParams {
    pub origin: Vec3,
    pub angles: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub fov_x: f32,
    pub fov_y: f32,
    /// left, right, bottom, top; normals face inward
    pub frustum: [CPlane; 4],
    /// near corners 0..4, far corners 4..8
    pub vertices: [Vec3; 8],
    /// false disables every cull test
    pub cull: bool,
}

impl ViewParams {
    pub fn new(
        origin: Vec3,
        angles: Vec3,
        fov_x: f32,
        fov_y: f32,
        near_z: f32,
        far_z: f32,
        aspect: f32,
    ) -> Self {
        let (forward, right, up) = angle_vectors_tuple(&angles);

        let mut frustum = [CPlane::default(); 4];
        // rotate VFORWARD right by FOV_X/2 degrees
        frustum[0].normal = rotate_point_around_vector(&up, &forward, -(90.0 - fov_x / 2.0));
        // rotate VFORWARD left by FOV_X/2 degrees
        frustum[1].normal = rotate_point_around_vector(&up, &forward, 90.0 - fov_x / 2.0);
        // rotate VFORWARD up by FOV_Y/2 degrees
        frustum[2].normal = rotate_point_around_vector(&right, &forward, 90.0 - fov_y / 2.0);
        // rotate VFORWARD down by FOV_Y/2 degrees
        frustum[3].normal = rotate_point_around_vector(&right, &forward, -(90.0 - fov_y / 2.0));

        for plane in frustum.iter_mut() {
            plane.plane_type = PLANE_ANYZ as u8;
            plane.dist = dot_product(&origin, &plane.normal);
            plane.signbits = signbits_for_plane(plane);
        }

        let near_z = near_z.max(0.0);
        let far_z = far_z.max(near_z);
        let half = (fov_y.to_radians() * 0.5).tan();

        let mut vertices = [[0.0f32; 3]; 8];
        for (i, z) in [near_z, far_z].into_iter().enumerate() {
            let y = z * half;
            let x = y * aspect;
            let center = vector_ma(&origin, z, &forward);
            let corners = [(x, y), (x, -y), (-x, -y), (-x, y)];
            for (j, (cx, cy)) in corners.into_iter().enumerate() {
                vertices[i * 4 + j] = vector_ma(&vector_ma(&center, cx, &right), cy, &up);
            }
        }

        Self {
            origin,
            angles,
            forward,
            right,
            up,
            fov_x,
            fov_y,
            frustum,
            vertices,
            cull: true,
        }
    }

    /// Returns true if the box is completely outside the frustum.
    pub fn cull_box(&self, mins: &Vec3, maxs: &Vec3) -> bool {
        if !self.cull {
            return false;
        }
        self.frustum.iter().any(|p| box_on_plane_side(mins, maxs, p) == 2)
    }

    /// Returns true if the sphere is completely outside the frustum. Spheres
    /// around the viewer are never culled.
    pub fn cull_sphere(&self, center: &Vec3, radius: f32) -> bool {
        if !self.cull {
            return false;
        }

        let to_view = vector_subtract(center, &self.origin);
        if dot_product(&to_view, &to_view) <= radius * radius * 1.5 {
            return false;
        }

        self.frustum.iter().any(|p| dot_product(center, &p.normal) - p.dist < -radius)
    }
}

/// The PVS clusters the view origin sees from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewClusters {
    pub cluster: i32,
    /// differs from `cluster` when straddling a water surface
    pub cluster2: i32,
}

impl Default for ViewClusters {
    fn default() -> Self {
        Self { cluster: -1, cluster2: -1 }
    }
}

impl ViewClusters {
    /// Looks up the leaf under `origin`, then checks 16 units below (or above
    /// when already inside a content volume) so crossing solid water doesn't
    /// draw wrong.
    pub fn setup(world: &BspData, origin: &Vec3) -> Self {
        let leaf_at = |p: &Vec3| match world.point_in_leaf(p).and_then(|i| world.nodes.get(i)) {
            Some(BspNode::Leaf(leaf)) => Some((leaf.contents, leaf.cluster)),
            _ => None,
        };

        let Some((contents, cluster)) = leaf_at(origin) else {
            return Self::default();
        };
        let mut clusters = Self { cluster, cluster2: cluster };

        let mut temp = *origin;
        if contents == 0 {
            // look down a bit
            temp[2] -= 16.0;
        } else {
            // look up a bit
            temp[2] += 16.0;
        }
        if let Some((contents2, cluster2)) = leaf_at(&temp) {
            if contents2 & CONTENTS_SOLID == 0 && cluster2 != clusters.cluster2 {
                clusters.cluster2 = cluster2;
            }
        }
        clusters
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::load_brush_model;
    use crate::testutil::{FakeImports, TestMap};

    fn view() -> ViewParams {
        ViewParams::new([0.0; 3], [0.0; 3], 90.0, 90.0, 4.0, 4096.0, 1.0)
    }

    #[test]
    fn test_box_in_front_is_kept() {
        let v = view();
        assert!(!v.cull_box(&[100.0, -10.0, -10.0], &[120.0, 10.0, 10.0]));
    }

    #[test]
    fn test_box_outside_one_plane_is_culled() {
        let v = view();
        // far to the left (+Y is left for yaw 0)
        assert!(v.cull_box(&[10.0, 200.0, -5.0], &[20.0, 220.0, 5.0]));
        // behind the viewer
        assert!(v.cull_box(&[-300.0, -5.0, -5.0], &[-200.0, 5.0, 5.0]));
        // high above
        assert!(v.cull_box(&[10.0, -5.0, 300.0], &[20.0, 5.0, 320.0]));
    }

    #[test]
    fn test_straddling_box_is_kept() {
        let v = view();
        assert!(!v.cull_box(&[10.0, -500.0, -5.0], &[20.0, 500.0, 5.0]));
    }

    #[test]
    fn test_cull_disabled() {
        let mut v = view();
        v.cull = false;
        assert!(!v.cull_box(&[-300.0, -5.0, -5.0], &[-200.0, 5.0, 5.0]));
        assert!(!v.cull_sphere(&[-300.0, 0.0, 0.0], 1.0));
    }

    #[test]
    fn test_cull_sphere() {
        let v = view();
        assert!(!v.cull_sphere(&[200.0, 0.0, 0.0], 10.0));
        assert!(v.cull_sphere(&[-200.0, 0.0, 0.0], 10.0));
        // grazing the left plane
        assert!(!v.cull_sphere(&[100.0, 105.0, 0.0], 10.0));
        // viewer inside the sphere
        assert!(!v.cull_sphere(&[-5.0, 0.0, 0.0], 10.0));
    }

    #[test]
    fn test_frustum_corners() {
        let v = ViewParams::new([10.0, 0.0, 0.0], [0.0; 3], 90.0, 90.0, 4.0, 100.0, 2.0);
        // near plane 4 units ahead, half height 4, half width 8
        assert!((v.vertices[0][0] - 14.0).abs() < 1e-3);
        assert!((v.vertices[0][2] - 4.0).abs() < 1e-3);
        assert!((v.vertices[0][1] + 8.0).abs() < 1e-3);
        assert!((v.vertices[6][0] - 110.0).abs() < 1e-3);
        assert!((v.vertices[6][2] + 100.0).abs() < 1e-3);
    }

    #[test]
    fn test_view_clusters() {
        let map = TestMap::two_rooms();
        let mut imports = FakeImports::default();
        let (bsp, _) = load_brush_model("maps/test.bsp", &map.to_bytes(), &mut imports).unwrap();

        assert_eq!(ViewClusters::setup(&bsp, &[32.0, 0.0, 0.0]), ViewClusters { cluster: 0, cluster2: 0 });
        assert_eq!(ViewClusters::setup(&bsp, &[-32.0, 0.0, 0.0]), ViewClusters { cluster: 1, cluster2: 1 });
        // inside the solid leaf: looks up, finds solid again
        assert_eq!(ViewClusters::setup(&bsp, &[100.0, 0.0, 0.0]), ViewClusters { cluster: -1, cluster2: -1 });
    }
}
