// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// files.h -> qfiles.rs
// On-disk level format consumed by the refresh
//
// Record layouts are byte-exact with the IBSP version 38 lump table.

use bytemuck::{Pod, Zeroable};

// ============================================================
// Identifiers
// ============================================================

pub const IDBSPHEADER: i32 = (b'P' as i32) << 24 | (b'S' as i32) << 16 | (b'B' as i32) << 8 | b'I' as i32;
/// Extended-limits variant; recognised only to report it as unsupported.
pub const QBSPHEADER: i32 = (b'P' as i32) << 24 | (b'S' as i32) << 16 | (b'B' as i32) << 8 | b'Q' as i32;
pub const BSPVERSION: i32 = 38;

pub const IDALIASHEADER: i32 = (b'2' as i32) << 24 | (b'P' as i32) << 16 | (b'D' as i32) << 8 | b'I' as i32;
pub const IDSPRITEHEADER: i32 = (b'2' as i32) << 24 | (b'S' as i32) << 16 | (b'D' as i32) << 8 | b'I' as i32;

// upper design bounds
pub const MAX_MAP_LEAFS: usize = 65536;
pub const MAX_MAP_SURFEDGES: usize = 256000;

// ============================================================
// Lumps
// ============================================================

pub const LUMP_ENTITIES: usize = 0;
pub const LUMP_PLANES: usize = 1;
pub const LUMP_VERTEXES: usize = 2;
pub const LUMP_VISIBILITY: usize = 3;
pub const LUMP_NODES: usize = 4;
pub const LUMP_TEXINFO: usize = 5;
pub const LUMP_FACES: usize = 6;
pub const LUMP_LIGHTING: usize = 7;
pub const LUMP_LEAFS: usize = 8;
pub const LUMP_LEAFFACES: usize = 9;
pub const LUMP_EDGES: usize = 11;
pub const LUMP_SURFEDGES: usize = 12;
pub const LUMP_MODELS: usize = 13;
pub const HEADER_LUMPS: usize = 19;

/// Converts a record read from disk into host byte order.
///
/// Little-endian hosts compile every conversion down to nothing.
pub trait FromLittleEndian {
    fn from_le(self) -> Self;
}

fn le_f32(f: f32) -> f32 {
    f32::from_bits(u32::from_le(f.to_bits()))
}

fn le_vec3(v: [f32; 3]) -> [f32; 3] {
    [le_f32(v[0]), le_f32(v[1]), le_f32(v[2])]
}

fn le_short3(v: [i16; 3]) -> [i16; 3] {
    [i16::from_le(v[0]), i16::from_le(v[1]), i16::from_le(v[2])]
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct Lump {
    pub fileofs: i32,
    pub filelen: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct DHeader {
    pub ident: i32,
    pub version: i32,
    pub lumps: [Lump; HEADER_LUMPS],
}

impl FromLittleEndian for DHeader {
    fn from_le(mut self) -> Self {
        self.ident = i32::from_le(self.ident);
        self.version = i32::from_le(self.version);
        for l in self.lumps.iter_mut() {
            l.fileofs = i32::from_le(l.fileofs);
            l.filelen = i32::from_le(l.filelen);
        }
        self
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DModel {
    pub mins: [f32; 3],
    pub maxs: [f32; 3],
    pub origin: [f32; 3],
    pub headnode: i32,
    pub firstface: i32,
    pub numfaces: i32,
}

impl FromLittleEndian for DModel {
    fn from_le(self) -> Self {
        Self {
            mins: le_vec3(self.mins),
            maxs: le_vec3(self.maxs),
            origin: le_vec3(self.origin),
            headnode: i32::from_le(self.headnode),
            firstface: i32::from_le(self.firstface),
            numfaces: i32::from_le(self.numfaces),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DVertex {
    pub point: [f32; 3],
}

impl FromLittleEndian for DVertex {
    fn from_le(self) -> Self {
        Self { point: le_vec3(self.point) }
    }
}

// 0-2 are axial planes
pub const PLANE_X: i32 = 0;
pub const PLANE_Y: i32 = 1;
pub const PLANE_Z: i32 = 2;
// non-axial planes use the generic distance test
pub const PLANE_ANYZ: i32 = 5;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DPlane {
    pub normal: [f32; 3],
    pub dist: f32,
    pub plane_type: i32,
}

impl FromLittleEndian for DPlane {
    fn from_le(self) -> Self {
        Self {
            normal: le_vec3(self.normal),
            dist: le_f32(self.dist),
            plane_type: i32::from_le(self.plane_type),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DNode {
    pub planenum: i32,
    /// negative numbers are -(leafs+1), not nodes
    pub children: [i32; 2],
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub firstface: u16,
    /// counting both sides
    pub numfaces: u16,
}

impl FromLittleEndian for DNode {
    fn from_le(self) -> Self {
        Self {
            planenum: i32::from_le(self.planenum),
            children: [i32::from_le(self.children[0]), i32::from_le(self.children[1])],
            mins: le_short3(self.mins),
            maxs: le_short3(self.maxs),
            firstface: u16::from_le(self.firstface),
            numfaces: u16::from_le(self.numfaces),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
pub struct TexInfo {
    /// [s/t][xyz offset]
    pub vecs: [[f32; 4]; 2],
    /// miptex flags + overrides
    pub flags: i32,
    /// light emission, etc
    pub value: i32,
    pub texture: [u8; 32],
    /// for animations, -1 = end of chain
    pub nexttexinfo: i32,
}

impl TexInfo {
    /// Texture name up to the first NUL.
    pub fn texture_name(&self) -> String {
        let end = self.texture.iter().position(|&b| b == 0).unwrap_or(self.texture.len());
        String::from_utf8_lossy(&self.texture[..end]).into_owned()
    }
}

impl FromLittleEndian for TexInfo {
    fn from_le(mut self) -> Self {
        for v in self.vecs.iter_mut() {
            for f in v.iter_mut() {
                *f = le_f32(*f);
            }
        }
        self.flags = i32::from_le(self.flags);
        self.value = i32::from_le(self.value);
        self.nexttexinfo = i32::from_le(self.nexttexinfo);
        self
    }
}

/// Edge 0 is never used; negative surfedge numbers walk an edge backwards.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DEdge {
    pub v: [u16; 2],
}

impl FromLittleEndian for DEdge {
    fn from_le(self) -> Self {
        Self { v: [u16::from_le(self.v[0]), u16::from_le(self.v[1])] }
    }
}

pub const MAXLIGHTMAPS: usize = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DFace {
    pub planenum: u16,
    pub side: i16,
    /// we must support > 64k edges
    pub firstedge: i32,
    pub numedges: i16,
    pub texinfo: i16,
    pub styles: [u8; MAXLIGHTMAPS],
    /// start of [numstyles*surfsize] samples
    pub lightofs: i32,
}

impl FromLittleEndian for DFace {
    fn from_le(self) -> Self {
        Self {
            planenum: u16::from_le(self.planenum),
            side: i16::from_le(self.side),
            firstedge: i32::from_le(self.firstedge),
            numedges: i16::from_le(self.numedges),
            texinfo: i16::from_le(self.texinfo),
            styles: self.styles,
            lightofs: i32::from_le(self.lightofs),
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DLeaf {
    /// OR of all brushes (not needed?)
    pub contents: i32,
    pub cluster: i16,
    pub area: i16,
    pub mins: [i16; 3],
    pub maxs: [i16; 3],
    pub firstleafface: u16,
    pub numleaffaces: u16,
    pub firstleafbrush: u16,
    pub numleafbrushes: u16,
}

impl FromLittleEndian for DLeaf {
    fn from_le(self) -> Self {
        Self {
            contents: i32::from_le(self.contents),
            cluster: i16::from_le(self.cluster),
            area: i16::from_le(self.area),
            mins: le_short3(self.mins),
            maxs: le_short3(self.maxs),
            firstleafface: u16::from_le(self.firstleafface),
            numleaffaces: u16::from_le(self.numleaffaces),
            firstleafbrush: u16::from_le(self.firstleafbrush),
            numleafbrushes: u16::from_le(self.numleafbrushes),
        }
    }
}

/// Mark-surface lump record.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DLeafFace(pub u16);

impl FromLittleEndian for DLeafFace {
    fn from_le(self) -> Self {
        Self(u16::from_le(self.0))
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct DSurfEdge(pub i32);

impl FromLittleEndian for DSurfEdge {
    fn from_le(self) -> Self {
        Self(i32::from_le(self.0))
    }
}

pub const DVIS_PVS: usize = 0;
pub const DVIS_PHS: usize = 1;

/// Header of the visibility lump: `numclusters` followed by
/// `numclusters` pairs of byte offsets into the lump.
pub fn vis_header(data: &[u8]) -> Option<(usize, Vec<[i32; 2]>)> {
    let num = i32::from_le_bytes(data.get(0..4)?.try_into().ok()?);
    if num < 0 {
        return None;
    }
    let num = num as usize;
    let mut offsets = Vec::with_capacity(num);
    for i in 0..num {
        let base = 4 + i * 8;
        let pvs = i32::from_le_bytes(data.get(base..base + 4)?.try_into().ok()?);
        let phs = i32::from_le_bytes(data.get(base + 4..base + 8)?.try_into().ok()?);
        offsets.push([pvs, phs]);
    }
    Some((num, offsets))
}
