// surfbatch.rs — index batching of world surfaces
// Converted from: src/client/refresh/gl3/gl3_surfbatch.c

use crate::backend::RenderBackend;
use crate::model_types::{BspData, MSurface, SurfFlags};
use crate::surf::RenderPass;

pub const MAX_BATCH_INDICES: usize = 4096;

/// Appends the triangle fan of a convex polygon starting at `first`.
pub fn fan_indices(first: u32, numverts: u32, out: &mut Vec<u32>) {
    for i in 2..numverts {
        out.push(first);
        out.push(first + i - 1);
        out.push(first + i);
    }
}

/// Accumulates fan indices of consecutive surfaces that share one lightmap
/// page and submits them as one draw.
#[derive(Debug)]
pub struct SurfBatch {
    indices: Vec<u32>,
    lightmap: Option<i32>,
}

impl Default for SurfBatch {
    fn default() -> Self {
        Self::new()
    }
}

impl SurfBatch {
    pub fn new() -> Self {
        Self { indices: Vec::with_capacity(MAX_BATCH_INDICES), lightmap: None }
    }

    pub fn len(&self) -> usize {
        self.indices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }

    /// Forgets pending indices and the bound lightmap.
    pub fn clear(&mut self) {
        self.lightmap = None;
        self.indices.clear();
    }

    pub fn flush(&mut self, backend: &mut dyn RenderBackend) {
        if self.indices.is_empty() {
            return;
        }
        backend.draw_world_indexed(&self.indices);
        self.indices.clear();
    }

    /// Queues every (sub)polygon of `surf`. A surface larger than the whole
    /// batch goes out on its own.
    pub fn add(&mut self, world: &BspData, surf: &MSurface, backend: &mut dyn RenderBackend) {
        let count = world.surface_index_count(surf);
        if self.indices.len() + count > MAX_BATCH_INDICES {
            self.flush(backend);
        }

        for poly in &world.polys[surf.polys.clone()] {
            fan_indices(poly.first_vert, poly.numverts, &mut self.indices);
        }

        if self.indices.len() > MAX_BATCH_INDICES {
            self.flush(backend);
        }
    }

    pub fn draw_single(&mut self, world: &BspData, surf: &MSurface, backend: &mut dyn RenderBackend) {
        self.add(world, surf, backend);
        self.flush(backend);
    }

    /// Queues a chain surface, flushing first when a scene pass needs a
    /// different lightmap page.
    pub fn render_world_poly(
        &mut self,
        pass: RenderPass,
        world: &BspData,
        surf: &MSurface,
        backend: &mut dyn RenderBackend,
    ) {
        if pass == RenderPass::Scene
            && !surf.flags.contains(SurfFlags::DRAWTURB)
            && Some(surf.lightmaptexturenum) != self.lightmap
        {
            self.flush(backend);
            self.lightmap = Some(surf.lightmaptexturenum);
            backend.bind_lightmap(surf.lightmaptexturenum.max(0) as usize);
        }
        self.add(world, surf, backend);
    }
}
