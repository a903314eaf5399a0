// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// gl3_light.c -> light.rs
// Dynamic light marking and the light uniform block

use q2refresh_common::q_shared::dot_product;

use crate::model_types::{BspData, BspNode, SurfFlags, WorldVertex};
use crate::refdef::DLight;
use crate::uniforms::{UniLights, MAX_DLIGHTS};

pub const DLIGHT_CUTOFF: f32 = 16.0;

/// Which dynamic lights touch which world surfaces. The bits end up in the
/// light flags of a private copy of the world vertices.
#[derive(Debug, Default)]
pub struct LightMarks {
    bits: Vec<u32>,
    vertices: Vec<WorldVertex>,
}

impl LightMarks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes a fresh copy of the world vertices with no light bits.
    pub fn reset(&mut self, world: &BspData) {
        self.bits = vec![0; world.surfaces.len()];
        self.vertices = world.vertices.clone();
    }

    pub fn surface_bits(&self, surface: usize) -> u32 {
        self.bits.get(surface).copied().unwrap_or(0)
    }

    pub fn vertices(&self) -> &[WorldVertex] {
        &self.vertices
    }

    /// Marks the surfaces every light reaches and patches the vertex copy.
    /// Returns true when any vertex changed and the buffer needs uploading.
    pub fn mark(&mut self, world: &BspData, dlights: &[DLight]) -> bool {
        if self.bits.len() != world.surfaces.len() {
            self.reset(world);
        }

        let mut bits = vec![0u32; world.surfaces.len()];
        for (i, light) in dlights.iter().take(MAX_DLIGHTS).enumerate() {
            mark_node(world, light, 1 << i, 0, &mut bits);
        }

        let mut changed = false;
        for (s, (&new, old)) in bits.iter().zip(self.bits.iter_mut()).enumerate() {
            if new == *old {
                continue;
            }
            *old = new;
            changed = true;
            for poly in &world.polys[world.surfaces[s].polys.clone()] {
                let range = poly.first_vert as usize..(poly.first_vert + poly.numverts) as usize;
                if let Some(verts) = self.vertices.get_mut(range) {
                    verts.iter_mut().for_each(|v| v.light_flags = new);
                }
            }
        }
        changed
    }
}

fn mark_node(world: &BspData, light: &DLight, bit: u32, index: usize, bits: &mut [u32]) {
    let Some(BspNode::Node(node)) = world.nodes.get(index) else {
        return;
    };

    let plane = &world.planes[node.plane];
    let dist = dot_product(&light.origin, &plane.normal) - plane.dist;

    if dist > light.intensity - DLIGHT_CUTOFF {
        mark_node(world, light, bit, node.children[0], bits);
        return;
    }
    if dist < -light.intensity + DLIGHT_CUTOFF {
        mark_node(world, light, bit, node.children[1], bits);
        return;
    }

    // mark the polygons facing the light
    for s in node.firstsurface..node.firstsurface + node.numsurfaces {
        let Some(surf) = world.surfaces.get(s) else {
            continue;
        };
        let plane = &world.planes[surf.plane];
        let side = dot_product(&light.origin, &plane.normal) - plane.dist;
        let sidebit = if side >= 0.0 { SurfFlags::empty() } else { SurfFlags::PLANEBACK };
        if surf.flags & SurfFlags::PLANEBACK != sidebit {
            continue;
        }
        bits[s] |= bit;
    }

    mark_node(world, light, bit, node.children[0], bits);
    mark_node(world, light, bit, node.children[1], bits);
}

/// Copies up to MAX_DLIGHTS lights into the block. Shadow fields are left to
/// the shadow system.
pub fn fill_light_uniforms(dlights: &[DLight], lights: &mut UniLights) {
    let count = dlights.len().min(MAX_DLIGHTS);
    for (entry, light) in lights.dyn_lights.iter_mut().zip(dlights) {
        entry.origin = light.origin;
        entry.color = [light.color[0], light.color[1], light.color[2], light.intensity];
    }
    lights.num_dyn_lights = count as u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::load_brush_model;
    use crate::refdef::DLightShadow;
    use crate::testutil::{FakeImports, TestMap};

    fn world() -> BspData {
        let mut imports = FakeImports::default();
        load_brush_model("maps/test.bsp", &TestMap::two_rooms().to_bytes(), &mut imports).unwrap().0
    }

    fn dlight(origin: [f32; 3], intensity: f32) -> DLight {
        DLight { origin, color: [1.0, 0.5, 0.25], intensity, shadow: DLightShadow::None }
    }

    #[test]
    fn test_light_reaches_facing_wall_only() {
        let world = world();
        let mut marks = LightMarks::new();
        marks.reset(&world);

        // near the x = 64 wall of the first room
        assert!(marks.mark(&world, &[dlight([48.0, 0.0, 0.0], 100.0)]));
        assert_eq!(marks.surface_bits(0), 1);
        assert_eq!(marks.surface_bits(1), 0);

        let poly = &world.polys[world.surfaces[0].polys.start];
        assert_eq!(marks.vertices()[poly.first_vert as usize].light_flags, 1);
        assert!(world.vertices.iter().all(|v| v.light_flags == 0));

        // nothing moved
        assert!(!marks.mark(&world, &[dlight([48.0, 0.0, 0.0], 100.0)]));
        // light gone
        assert!(marks.mark(&world, &[]));
        assert_eq!(marks.surface_bits(0), 0);
    }

    #[test]
    fn test_uniform_fill_clamps_count() {
        let lights: Vec<DLight> = (0..40).map(|i| dlight([i as f32, 0.0, 0.0], 200.0)).collect();
        let mut ubo = UniLights::default();
        fill_light_uniforms(&lights, &mut ubo);
        assert_eq!(ubo.num_dyn_lights, MAX_DLIGHTS as u32);
        assert_eq!(ubo.dyn_lights[3].origin, [3.0, 0.0, 0.0]);
        assert_eq!(ubo.dyn_lights[3].color, [1.0, 0.5, 0.25, 200.0]);
    }
}
