// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// model.h -> model_types.rs
// In-memory brush model representation
// d*_t structures are on-disk (q2refresh_common::qfiles), m* structures are in-memory

use std::ops::Range;

use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use q2refresh_common::q_shared::{CPlane, Vec3};
use q2refresh_common::qfiles::{MAXLIGHTMAPS, MAX_MAP_LEAFS};

use crate::backend::TextureHandle;

// ============================================================================
// BRUSH MODELS
// ============================================================================

bitflags! {
    /// Load-time classification of a surface.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct SurfFlags: u32 {
        const PLANEBACK      = 0x02;
        const DRAWSKY        = 0x04;
        const DRAWTURB       = 0x10;
        const DRAWBACKGROUND = 0x40;
        const UNDERWATER     = 0x80;
        /// warped but carries a lightmap
        const DRAWTURBLIT    = 0x100;
    }
}

pub const BACKFACE_EPSILON: f32 = 0.01;

/// One vertex of the shared world vertex buffer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct WorldVertex {
    pub pos: [f32; 3],
    pub tex_coord: [f32; 2],
    pub lm_tex_coord: [f32; 2],
    pub normal: [f32; 3],
    /// each set bit means "dynamic light i affects this surface"
    pub light_flags: u32,
    pub styles: [u8; MAXLIGHTMAPS],
}

/// External image as the refresh sees it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImageInfo {
    pub handle: TextureHandle,
    pub width: i32,
    pub height: i32,
    pub has_alpha: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MModel {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub origin: Vec3, // for sounds or lights
    pub radius: f32,
    pub headnode: i32,
    pub visleafs: i32, // not including the solid leaf 0
    pub firstface: usize,
    pub numfaces: usize,
}

#[derive(Debug, Clone)]
pub struct MTexInfo {
    pub vecs: [[f32; 4]; 2],
    pub flags: i32,
    pub numframes: i32,
    /// animation chain, index into the texinfo array
    pub next: Option<usize>,
    pub image: ImageInfo,
    pub image_name: String,
}

/// Vertex range of one (sub)polygon inside `BspData::vertices`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlPoly {
    pub first_vert: u32,
    pub numverts: u32,
}

#[derive(Debug, Clone)]
pub struct MSurface {
    pub plane: usize,
    pub flags: SurfFlags,

    pub firstedge: i32, // look up in model->surfedges[], negative numbers
    pub numedges: i32,  // are backwards edges

    pub texturemins: [i16; 2],
    pub extents: [i16; 2],

    pub light_s: i32,
    pub light_t: i32, // lightmap page coordinates

    /// multiple if warped
    pub polys: Range<usize>,

    pub texinfo: usize,

    pub lightmaptexturenum: i32,
    pub styles: [u8; MAXLIGHTMAPS],
    /// offset into lightdata
    pub samples: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MNode {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub parent: Option<usize>,

    pub plane: usize,
    pub children: [usize; 2],

    pub firstsurface: usize,
    pub numsurfaces: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MLeaf {
    pub mins: Vec3,
    pub maxs: Vec3,
    pub parent: Option<usize>,

    pub contents: i32,
    pub cluster: i32,
    pub area: i32,

    /// range into `BspData::marksurfaces`
    pub firstmarksurface: usize,
    pub nummarksurfaces: usize,
}

/// Nodes and leaves share one index space: leaf `n` lives at `numnodes + n`.
#[derive(Debug, Clone, PartialEq)]
pub enum BspNode {
    Node(MNode),
    Leaf(MLeaf),
}

impl BspNode {
    pub fn parent(&self) -> Option<usize> {
        match self {
            BspNode::Node(n) => n.parent,
            BspNode::Leaf(l) => l.parent,
        }
    }

    pub fn set_parent(&mut self, parent: Option<usize>) {
        match self {
            BspNode::Node(n) => n.parent = parent,
            BspNode::Leaf(l) => l.parent = parent,
        }
    }

    pub fn bounds(&self) -> (&Vec3, &Vec3) {
        match self {
            BspNode::Node(n) => (&n.mins, &n.maxs),
            BspNode::Leaf(l) => (&l.mins, &l.maxs),
        }
    }

    pub fn as_leaf(&self) -> Option<&MLeaf> {
        match self {
            BspNode::Leaf(l) => Some(l),
            BspNode::Node(_) => None,
        }
    }
}

/// Decoded visibility lump.
#[derive(Debug, Clone, Default)]
pub struct VisData {
    pub numclusters: usize,
    /// [DVIS_PVS, DVIS_PHS] byte offsets per cluster, relative to the lump
    pub bitofs: Vec<[i32; 2]>,
    pub data: Vec<u8>,
}

impl VisData {
    /// Run-length decompression of one cluster's PVS row.
    pub fn decompress_pvs(&self, cluster: usize) -> Vec<u8> {
        let row = self.numclusters.div_ceil(8);
        let mut out = Vec::with_capacity(row);

        let Some(start) = self.bitofs.get(cluster).map(|o| o[0]) else {
            return vec![0xff; row];
        };
        if start < 0 {
            return vec![0xff; row];
        }

        let mut pos = start as usize;
        while out.len() < row {
            let Some(&b) = self.data.get(pos) else {
                break;
            };
            if b != 0 {
                out.push(b);
                pos += 1;
                continue;
            }

            let count = self.data.get(pos + 1).copied().unwrap_or(0) as usize;
            pos += 2;
            let count = count.min(row - out.len());
            out.extend(std::iter::repeat(0).take(count));
            if count == 0 {
                break;
            }
        }
        out.resize(row, 0);
        out
    }
}

/// Lightmap page with one layer per style slot.
#[derive(Debug, Clone)]
pub struct LightmapPage {
    pub layers: Vec<Vec<u8>>,
}

/// Everything derived from one BSP file. Shared by the world and its inline models.
#[derive(Debug, Clone, Default)]
pub struct BspData {
    pub name: String,

    pub planes: Vec<CPlane>,
    pub vertexes: Vec<Vec3>,
    pub edges: Vec<[u16; 2]>,
    pub surfedges: Vec<i32>,
    pub texinfo: Vec<MTexInfo>,
    pub surfaces: Vec<MSurface>,
    pub polys: Vec<GlPoly>,
    pub vertices: Vec<WorldVertex>,
    pub marksurfaces: Vec<usize>,

    pub nodes: Vec<BspNode>,
    pub numnodes: usize,
    pub numleafs: usize,

    pub vis: Option<VisData>,
    pub lightdata: Vec<u8>,
    pub lightmaps: Vec<LightmapPage>,
    pub submodels: Vec<MModel>,
    pub entities: String,
}

impl BspData {
    pub fn leaf(&self, leafnum: usize) -> Option<&MLeaf> {
        self.nodes.get(self.numnodes + leafnum).and_then(BspNode::as_leaf)
    }

    /// Index of the leaf containing `p`, descending from node 0.
    pub fn point_in_leaf(&self, p: &Vec3) -> Option<usize> {
        let mut index = 0usize;
        loop {
            match self.nodes.get(index)? {
                BspNode::Leaf(_) => return Some(index),
                BspNode::Node(node) => {
                    let plane = self.planes.get(node.plane)?;
                    let d = plane.distance(p);
                    index = if d > 0.0 { node.children[0] } else { node.children[1] };
                }
            }
        }
    }

    /// Decompressed PVS row for `cluster`; everything is visible without vis data.
    pub fn cluster_pvs(&self, cluster: i32) -> Vec<u8> {
        match &self.vis {
            Some(vis) if cluster >= 0 => vis.decompress_pvs(cluster as usize),
            _ => vec![0xff; MAX_MAP_LEAFS / 8],
        }
    }

    /// Current animation frame of a texinfo chain for `frame`.
    pub fn texture_animation(&self, texinfo: usize, frame: i32) -> &MTexInfo {
        let mut tex = &self.texinfo[texinfo];
        if tex.next.is_none() || tex.numframes <= 0 {
            return tex;
        }
        let mut c = frame.rem_euclid(tex.numframes);
        while c > 0 {
            match tex.next {
                Some(next) => tex = &self.texinfo[next],
                None => break,
            }
            c -= 1;
        }
        tex
    }

    /// Number of fan indices a surface expands to.
    pub fn surface_index_count(&self, surf: &MSurface) -> usize {
        self.polys[surf.polys.clone()]
            .iter()
            .map(|p| 3 * (p.numverts as usize).saturating_sub(2))
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_vertex_layout() {
        assert_eq!(std::mem::size_of::<WorldVertex>(), 48);
    }

    #[test]
    fn test_decompress_pvs_runs() {
        // 20 clusters -> 3 bytes per row
        let vis = VisData {
            numclusters: 20,
            bitofs: vec![[0, 0], [3, 0], [-1, 0]],
            data: vec![0x05, 0x00, 0x02, 0x00, 0x01, 0x80, 0x01],
        };
        assert_eq!(vis.decompress_pvs(0), vec![0x05, 0x00, 0x00]);
        // zero run of 1 then literal bytes
        assert_eq!(vis.decompress_pvs(1), vec![0x00, 0x80, 0x01]);
        assert_eq!(vis.decompress_pvs(2), vec![0xff; 3]);
        assert_eq!(vis.decompress_pvs(7), vec![0xff; 3]);
    }
}
