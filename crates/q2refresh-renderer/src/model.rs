// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// gl3_model.c -> model.rs
// Model loading and caching
//
// Brush models are decoded into a `BspData` whose derived records refer to each
// other by index. The whole structure is charged against one byte budget
// computed up front from the lump table, and is dropped in one go when the
// model is freed.

use std::sync::Arc;

use bytemuck::Pod;
use rayon::prelude::*;

use q2refresh_common::q_shared::{
    dot_product, radius_from_bounds, signbits_for_plane, CPlane, Vec3, SURF_SKY, SURF_WARP,
};
use q2refresh_common::qfiles::*;

use crate::backend::TextureHandle;
use crate::error::ModelError;
use crate::lightmap::{LightmapBuilder, BLOCK_HEIGHT, BLOCK_WIDTH};
use crate::model_types::*;
use crate::warp::{subdivide_polygon, warp_fan};

pub const MAX_MOD_KNOWN: usize = 512;

/// Below this record count sequential decoding is faster.
const PARALLEL_LUMP_THRESHOLD: usize = 64;

/// Upper bound reserved per warped face, its subdivision is not known up front.
const WARP_FACE_ALLOWANCE: usize = 49152;
const HUNK_MARGIN: usize = 1_000_000;

/// Polygon header plus the four vertices every polygon carries inline.
const POLY_BASE_SIZE: usize =
    std::mem::size_of::<GlPoly>() + 4 * std::mem::size_of::<WorldVertex>();

/// Services the model store needs from the host.
pub trait RefImports {
    fn load_file(&mut self, path: &str) -> Option<Vec<u8>>;
    fn find_image(&mut self, name: &str) -> Option<ImageInfo>;
    /// Checkerboard used when a wall texture is missing.
    fn notexture(&self) -> ImageInfo;
    fn touch_image(&mut self, image: TextureHandle, sequence: i32);
    fn image_has_free_space(&self) -> bool;
    fn free_unused_images(&mut self, sequence: i32);
}

// =============================================================
//  Hunk accounting
// =============================================================

/// Byte budget for one model. Every allocation is rounded to a cache line.
#[derive(Debug)]
struct Hunk {
    name: String,
    capacity: usize,
    used: usize,
}

fn round_cacheline(size: usize) -> usize {
    (size + 31) & !31
}

impl Hunk {
    fn new(name: &str, capacity: usize) -> Self {
        Self { name: name.to_string(), capacity, used: 0 }
    }

    fn alloc(&mut self, size: usize) -> Result<(), ModelError> {
        let size = round_cacheline(size);
        if self.used + size > self.capacity {
            return Err(ModelError::ArenaOverflow {
                name: self.name.clone(),
                requested: size,
                available: self.capacity - self.used,
            });
        }
        self.used += size;
        Ok(())
    }

    fn alloc_records<T>(&mut self, count: usize) -> Result<(), ModelError> {
        self.alloc(count * std::mem::size_of::<T>())
    }
}

// =============================================================
//  Lump access
// =============================================================

struct LumpReader<'a> {
    name: &'a str,
    data: &'a [u8],
    header: DHeader,
}

impl<'a> LumpReader<'a> {
    fn new(name: &'a str, data: &'a [u8]) -> Result<Self, ModelError> {
        let size = std::mem::size_of::<DHeader>();
        let raw = data.get(..size).ok_or_else(|| ModelError::Truncated(name.to_string()))?;
        let header = bytemuck::pod_read_unaligned::<DHeader>(raw).from_le();
        Ok(Self { name, data, header })
    }

    fn lump(&self, index: usize) -> &Lump {
        &self.header.lumps[index]
    }

    fn bytes(&self, index: usize) -> Result<&'a [u8], ModelError> {
        let l = self.lump(index);
        let out_of_range = || ModelError::LumpOutOfRange { name: self.name.to_string(), lump: index };
        if l.fileofs < 0 || l.filelen < 0 {
            return Err(out_of_range());
        }
        let start = l.fileofs as usize;
        let end = start + l.filelen as usize;
        self.data.get(start..end).ok_or_else(out_of_range)
    }

    /// Decodes every record of a lump, rejecting lengths that are not a
    /// whole number of records.
    fn records<T>(&self, index: usize) -> Result<Vec<T>, ModelError>
    where
        T: Pod + FromLittleEndian + Send,
    {
        let bytes = self.bytes(index)?;
        let size = std::mem::size_of::<T>();
        if bytes.len() % size != 0 {
            return Err(ModelError::FunnyLumpSize { name: self.name.to_string(), lump: index });
        }

        if bytes.len() / size >= PARALLEL_LUMP_THRESHOLD {
            Ok(bytes
                .par_chunks_exact(size)
                .map(|c| bytemuck::pod_read_unaligned::<T>(c).from_le())
                .collect())
        } else {
            Ok(bytes
                .chunks_exact(size)
                .map(|c| bytemuck::pod_read_unaligned::<T>(c).from_le())
                .collect())
        }
    }

    /// Size the lump will take once decoded, 0 for a funny sized lump (the
    /// decoder reports that one).
    fn hunk_size(&self, index: usize, in_size: usize, out_size: usize) -> usize {
        let len = self.lump(index).filelen.max(0) as usize;
        if len % in_size != 0 {
            return 0;
        }
        round_cacheline(len / in_size * out_size)
    }

    /// Total budget for the model, including the per-face polygon estimate.
    fn total_hunk_size(&self, faces: &[DFace], texinfo: &[TexInfo]) -> usize {
        let mut size = 0;
        size += self.hunk_size(LUMP_VERTEXES, std::mem::size_of::<DVertex>(), std::mem::size_of::<Vec3>());
        size += self.hunk_size(LUMP_EDGES, std::mem::size_of::<DEdge>(), std::mem::size_of::<[u16; 2]>());
        size += std::mem::size_of::<[u16; 2]>() + 31; // count + 1 edges
        let surfedge_count = (self.lump(LUMP_SURFEDGES).filelen.max(0) as usize).div_ceil(4);
        if surfedge_count < MAX_MAP_SURFEDGES {
            size += self.hunk_size(LUMP_SURFEDGES, 4, std::mem::size_of::<i32>());
        }
        size += self.hunk_size(LUMP_LIGHTING, 1, 1);
        size += self.hunk_size(LUMP_PLANES, std::mem::size_of::<DPlane>(), std::mem::size_of::<CPlane>() * 2);
        size += texinfo_and_faces_size(faces, texinfo);
        size += self.hunk_size(LUMP_LEAFFACES, std::mem::size_of::<DLeafFace>(), std::mem::size_of::<usize>());
        size += self.hunk_size(LUMP_VISIBILITY, 1, 1);
        size += self.hunk_size(LUMP_LEAFS, std::mem::size_of::<DLeaf>(), std::mem::size_of::<BspNode>());
        size += self.hunk_size(LUMP_NODES, std::mem::size_of::<DNode>(), std::mem::size_of::<BspNode>());
        size += self.hunk_size(LUMP_MODELS, std::mem::size_of::<DModel>(), std::mem::size_of::<MModel>());
        size += self.hunk_size(LUMP_ENTITIES, 1, 1);
        size
    }
}

fn texinfo_and_faces_size(faces: &[DFace], texinfo: &[TexInfo]) -> usize {
    let mut size = round_cacheline(faces.len() * std::mem::size_of::<MSurface>());
    size += round_cacheline(texinfo.len() * std::mem::size_of::<MTexInfo>());

    for face in faces {
        let numverts = face.numedges.max(0) as usize;
        let warped = texinfo
            .get(face.texinfo.max(0) as usize)
            .is_some_and(|ti| ti.flags & SURF_WARP != 0);
        if warped {
            size += WARP_FACE_ALLOWANCE;
        } else {
            let poly = POLY_BASE_SIZE + numverts.saturating_sub(4) * std::mem::size_of::<WorldVertex>();
            size += round_cacheline(poly);
        }
    }
    size + HUNK_MARGIN
}

fn bad_index(name: &str, what: &'static str, index: impl Into<i64>) -> ModelError {
    ModelError::BadIndex { name: name.to_string(), what, index: index.into() }
}

// =============================================================
//  Brush model loading
// =============================================================

struct BrushLoader<'a, 'i> {
    reader: LumpReader<'a>,
    hunk: Hunk,
    imports: &'i mut dyn RefImports,
    bsp: BspData,
}

/// Decodes a complete BSP file. Returns the model and the number of bytes
/// charged against its budget.
pub fn load_brush_model(
    name: &str,
    data: &[u8],
    imports: &mut dyn RefImports,
) -> Result<(BspData, usize), ModelError> {
    let reader = LumpReader::new(name, data)?;

    match reader.header.ident {
        IDBSPHEADER => {}
        QBSPHEADER => return Err(ModelError::UnsupportedFormat(name.to_string())),
        _ => return Err(ModelError::UnknownFormat(name.to_string())),
    }
    if reader.header.version != BSPVERSION {
        return Err(ModelError::BadVersion {
            name: name.to_string(),
            version: reader.header.version,
            expected: BSPVERSION,
        });
    }

    let faces: Vec<DFace> = reader.records(LUMP_FACES)?;
    let texinfo: Vec<TexInfo> = reader.records(LUMP_TEXINFO)?;
    let hunk = Hunk::new(name, reader.total_hunk_size(&faces, &texinfo));

    let mut loader = BrushLoader {
        reader,
        hunk,
        imports,
        bsp: BspData { name: name.to_string(), ..Default::default() },
    };

    loader.load_vertexes()?;
    loader.load_edges()?;
    loader.load_surfedges()?;
    loader.load_lighting()?;
    loader.load_planes()?;
    loader.load_texinfo(&texinfo)?;
    loader.load_faces(&faces)?;
    loader.load_marksurfaces()?;
    loader.load_visibility()?;
    let leafs = loader.load_leafs()?;
    loader.load_nodes(leafs)?;
    loader.load_submodels()?;
    loader.load_entities()?;

    log::debug!(
        "{}: {} surfaces, {} nodes, {} leafs, {} lightmap pages, {} bytes",
        name,
        loader.bsp.surfaces.len(),
        loader.bsp.numnodes,
        loader.bsp.numleafs,
        loader.bsp.lightmaps.len(),
        loader.hunk.used
    );

    Ok((loader.bsp, loader.hunk.used))
}

impl BrushLoader<'_, '_> {
    fn name(&self) -> &str {
        &self.bsp.name
    }

    fn load_vertexes(&mut self) -> Result<(), ModelError> {
        let input: Vec<DVertex> = self.reader.records(LUMP_VERTEXES)?;
        self.hunk.alloc_records::<Vec3>(input.len())?;
        self.bsp.vertexes = input.into_iter().map(|v| v.point).collect();
        Ok(())
    }

    fn load_edges(&mut self) -> Result<(), ModelError> {
        let input: Vec<DEdge> = self.reader.records(LUMP_EDGES)?;
        self.hunk.alloc_records::<[u16; 2]>(input.len() + 1)?;
        self.bsp.edges = input.into_iter().map(|e| e.v).collect();
        self.bsp.edges.push([0, 0]);
        Ok(())
    }

    fn load_surfedges(&mut self) -> Result<(), ModelError> {
        let input: Vec<DSurfEdge> = self.reader.records(LUMP_SURFEDGES)?;
        if input.is_empty() || input.len() >= MAX_MAP_SURFEDGES {
            return Err(bad_index(self.name(), "surfedges count", input.len() as i64));
        }
        self.hunk.alloc_records::<i32>(input.len())?;
        self.bsp.surfedges = input.into_iter().map(|e| e.0).collect();
        Ok(())
    }

    fn load_lighting(&mut self) -> Result<(), ModelError> {
        let bytes = self.reader.bytes(LUMP_LIGHTING)?;
        self.hunk.alloc(bytes.len())?;
        self.bsp.lightdata = bytes.to_vec();
        Ok(())
    }

    fn load_planes(&mut self) -> Result<(), ModelError> {
        let input: Vec<DPlane> = self.reader.records(LUMP_PLANES)?;
        self.hunk.alloc_records::<CPlane>(input.len() * 2)?;
        self.bsp.planes = input
            .into_iter()
            .map(|p| {
                let mut plane = CPlane {
                    normal: p.normal,
                    dist: p.dist,
                    plane_type: p.plane_type as u8,
                    signbits: 0,
                };
                plane.signbits = signbits_for_plane(&plane);
                plane
            })
            .collect();
        Ok(())
    }

    fn find_wall_image(&mut self, texture: &str) -> ImageInfo {
        let wal = format!("textures/{}.wal", texture);
        if let Some(image) = self.imports.find_image(&wal) {
            return image;
        }
        let m8 = format!("textures/{}.m8", texture);
        if let Some(image) = self.imports.find_image(&m8) {
            return image;
        }
        log::warn!("Couldn't load {}", wal);
        self.imports.notexture()
    }

    fn load_texinfo(&mut self, input: &[TexInfo]) -> Result<(), ModelError> {
        self.hunk.alloc_records::<MTexInfo>(input.len())?;

        let count = input.len();
        let mut out = Vec::with_capacity(count);
        for ti in input {
            let next = if ti.nexttexinfo > 0 {
                if ti.nexttexinfo as usize >= count {
                    return Err(bad_index(self.name(), "texinfo chain", ti.nexttexinfo));
                }
                Some(ti.nexttexinfo as usize)
            } else {
                None
            };
            let image_name = ti.texture_name();
            let image = self.find_wall_image(&image_name);
            out.push(MTexInfo { vecs: ti.vecs, flags: ti.flags, numframes: 1, next, image, image_name });
        }

        // count animation frames
        for i in 0..count {
            let mut frames = 1;
            let mut step = out[i].next;
            while let Some(n) = step {
                if n == i || frames > count as i32 {
                    break;
                }
                frames += 1;
                step = out[n].next;
            }
            out[i].numframes = frames;
        }

        self.bsp.texinfo = out;
        Ok(())
    }

    /// Positions of a face's vertex loop, following the sign of each surfedge.
    fn face_vertices(&self, firstedge: i32, numedges: i32) -> Result<Vec<Vec3>, ModelError> {
        let mut verts = Vec::with_capacity(numedges as usize);
        for i in 0..numedges {
            let index = firstedge as i64 + i as i64;
            let lindex = *usize::try_from(index)
                .ok()
                .and_then(|i| self.bsp.surfedges.get(i))
                .ok_or_else(|| bad_index(self.name(), "surfedge", index))?;
            let (edge, end) = if lindex > 0 { (lindex as usize, 0) } else { (lindex.unsigned_abs() as usize, 1) };
            let v = self
                .bsp
                .edges
                .get(edge)
                .map(|e| e[end] as usize)
                .ok_or_else(|| bad_index(self.name(), "edge", lindex))?;
            let pos = self.bsp.vertexes.get(v).ok_or_else(|| bad_index(self.name(), "vertex", v as i64))?;
            verts.push(*pos);
        }
        Ok(verts)
    }

    fn load_faces(&mut self, input: &[DFace]) -> Result<(), ModelError> {
        self.hunk.alloc_records::<MSurface>(input.len())?;

        let mut lightmaps = LightmapBuilder::new();
        let mut surfaces = Vec::with_capacity(input.len());

        for face in input {
            let planenum = face.planenum as usize;
            if planenum >= self.bsp.planes.len() {
                return Err(bad_index(self.name(), "plane", planenum as i64));
            }
            let ti = face.texinfo;
            if ti < 0 || ti as usize >= self.bsp.texinfo.len() {
                return Err(bad_index(self.name(), "texinfo", ti));
            }
            let numedges = face.numedges as i32;
            if numedges < 3 {
                return Err(ModelError::DegenerateFace { name: self.name().to_string(), numedges });
            }

            let verts = self.face_vertices(face.firstedge, numedges)?;
            let tex = &self.bsp.texinfo[ti as usize];
            let (texturemins, extents) = calc_surface_extents(&verts, &tex.vecs);
            let unlit = tex.flags & SURF_SKY != 0 || (tex.flags & SURF_WARP != 0 && face.lightofs <= 0);
            let in_range = (0..=MAX_SURFACE_EXTENT).contains(&extents[0])
                && (0..=MAX_SURFACE_EXTENT).contains(&extents[1])
                && texturemins.iter().all(|&m| i16::try_from(m).is_ok());
            if !unlit && !in_range {
                return Err(ModelError::BadSurfaceExtents(self.name().to_string()));
            }

            let mut surf = MSurface {
                plane: planenum,
                flags: SurfFlags::empty(),
                firstedge: face.firstedge,
                numedges,
                texturemins: texturemins.map(saturate_i16),
                extents: extents.map(saturate_i16),
                light_s: 0,
                light_t: 0,
                polys: 0..0,
                texinfo: ti as usize,
                lightmaptexturenum: -1,
                styles: face.styles,
                samples: usize::try_from(face.lightofs).ok(),
            };
            if face.side != 0 {
                surf.flags |= SurfFlags::PLANEBACK;
            }

            // set the drawing flags
            if tex.flags & SURF_WARP != 0 {
                if face.lightofs > 0 {
                    surf.flags |= SurfFlags::DRAWTURBLIT;
                } else {
                    surf.flags |= SurfFlags::DRAWTURB;
                    surf.extents = [16384, 16384];
                    surf.texturemins = [-8192, -8192];
                }
            }
            if tex.flags & SURF_SKY != 0 {
                surf.flags |= SurfFlags::DRAWSKY;
            }

            // create lightmaps and polygons
            lightmaps.create_surface_lightmap(&mut surf, &self.bsp.lightdata)?;

            let first_poly = self.bsp.polys.len();
            if surf.flags.contains(SurfFlags::DRAWTURB) {
                self.build_warp_polygons(&surf, &verts)?;
            } else {
                self.build_polygon(&surf, &verts)?;
            }
            surf.polys = first_poly..self.bsp.polys.len();

            surfaces.push(surf);
        }

        self.bsp.surfaces = surfaces;
        self.bsp.lightmaps = lightmaps.finish();
        Ok(())
    }

    fn surface_normal(&self, surf: &MSurface) -> Vec3 {
        let n = self.bsp.planes[surf.plane].normal;
        if surf.flags.contains(SurfFlags::PLANEBACK) {
            [-n[0], -n[1], -n[2]]
        } else {
            n
        }
    }

    fn push_poly(&mut self, verts: Vec<WorldVertex>) -> Result<(), ModelError> {
        let extra = verts.len().saturating_sub(4) * std::mem::size_of::<WorldVertex>();
        self.hunk.alloc(POLY_BASE_SIZE + extra)?;
        self.bsp.polys.push(GlPoly { first_vert: self.bsp.vertices.len() as u32, numverts: verts.len() as u32 });
        self.bsp.vertices.extend(verts);
        Ok(())
    }

    fn build_polygon(&mut self, surf: &MSurface, verts: &[Vec3]) -> Result<(), ModelError> {
        let tex = &self.bsp.texinfo[surf.texinfo];
        let s_axis = [tex.vecs[0][0], tex.vecs[0][1], tex.vecs[0][2]];
        let t_axis = [tex.vecs[1][0], tex.vecs[1][1], tex.vecs[1][2]];
        let width = tex.image.width.max(1) as f32;
        let height = tex.image.height.max(1) as f32;
        let normal = self.surface_normal(surf);

        let out = verts
            .iter()
            .map(|v| {
                let s = dot_product(v, &s_axis) + tex.vecs[0][3];
                let t = dot_product(v, &t_axis) + tex.vecs[1][3];

                // lightmap texture coordinates
                let ls = (s - surf.texturemins[0] as f32 + surf.light_s as f32 * 16.0 + 8.0) / (BLOCK_WIDTH * 16) as f32;
                let lt = (t - surf.texturemins[1] as f32 + surf.light_t as f32 * 16.0 + 8.0) / (BLOCK_HEIGHT * 16) as f32;

                WorldVertex {
                    pos: *v,
                    tex_coord: [s / width, t / height],
                    lm_tex_coord: [ls, lt],
                    normal,
                    light_flags: 0,
                    styles: surf.styles,
                }
            })
            .collect();
        self.push_poly(out)
    }

    fn build_warp_polygons(&mut self, surf: &MSurface, verts: &[Vec3]) -> Result<(), ModelError> {
        let mut pieces = Vec::new();
        subdivide_polygon(verts, &mut pieces)?;

        let vecs = self.bsp.texinfo[surf.texinfo].vecs;
        let normal = self.surface_normal(surf);
        for piece in pieces {
            let out = warp_fan(&piece, &vecs)
                .into_iter()
                .map(|(pos, st)| WorldVertex {
                    pos,
                    tex_coord: st,
                    lm_tex_coord: [0.0; 2],
                    normal,
                    light_flags: 0,
                    styles: surf.styles,
                })
                .collect();
            self.push_poly(out)?;
        }
        Ok(())
    }

    fn load_marksurfaces(&mut self) -> Result<(), ModelError> {
        let input: Vec<DLeafFace> = self.reader.records(LUMP_LEAFFACES)?;
        self.hunk.alloc_records::<usize>(input.len())?;
        let numsurfaces = self.bsp.surfaces.len();
        self.bsp.marksurfaces = input
            .into_iter()
            .map(|m| {
                let j = m.0 as usize;
                if j >= numsurfaces {
                    Err(bad_index(self.name(), "surface", j as i64))
                } else {
                    Ok(j)
                }
            })
            .collect::<Result<_, _>>()?;
        Ok(())
    }

    fn load_visibility(&mut self) -> Result<(), ModelError> {
        let bytes = self.reader.bytes(LUMP_VISIBILITY)?;
        if bytes.is_empty() {
            self.bsp.vis = None;
            return Ok(());
        }
        self.hunk.alloc(bytes.len())?;
        let (numclusters, bitofs) =
            vis_header(bytes).ok_or_else(|| ModelError::FunnyLumpSize { name: self.name().to_string(), lump: LUMP_VISIBILITY })?;
        self.bsp.vis = Some(VisData { numclusters, bitofs, data: bytes.to_vec() });
        Ok(())
    }

    fn load_leafs(&mut self) -> Result<Vec<BspNode>, ModelError> {
        let input: Vec<DLeaf> = self.reader.records(LUMP_LEAFS)?;
        self.hunk.alloc_records::<BspNode>(input.len())?;
        let nummarksurfaces = self.bsp.marksurfaces.len();

        let mut out = Vec::with_capacity(input.len());
        for l in input {
            let first = l.firstleafface as usize;
            let count = l.numleaffaces as usize;
            if first + count > nummarksurfaces {
                return Err(ModelError::BadMarkSurfaces(self.name().to_string()));
            }
            out.push(BspNode::Leaf(MLeaf {
                mins: l.mins.map(f32::from),
                maxs: l.maxs.map(f32::from),
                parent: None,
                contents: l.contents,
                cluster: l.cluster as i32,
                area: l.area as i32,
                firstmarksurface: first,
                nummarksurfaces: count,
            }));
        }
        self.bsp.numleafs = out.len();
        Ok(out)
    }

    fn load_nodes(&mut self, leafs: Vec<BspNode>) -> Result<(), ModelError> {
        let input: Vec<DNode> = self.reader.records(LUMP_NODES)?;
        self.hunk.alloc_records::<BspNode>(input.len())?;

        let numnodes = input.len();
        let numleafs = leafs.len();
        let mut nodes = Vec::with_capacity(numnodes + numleafs);

        for (index, n) in input.into_iter().enumerate() {
            let plane = n.planenum;
            if plane < 0 || plane as usize >= self.bsp.planes.len() {
                return Err(bad_index(self.name(), "plane", plane));
            }
            let first = n.firstface as usize;
            let count = n.numfaces as usize;
            if first + count > self.bsp.surfaces.len() {
                return Err(bad_index(self.name(), "node surface", (first + count) as i64));
            }

            let mut children = [0usize; 2];
            for (slot, &p) in children.iter_mut().zip(n.children.iter()) {
                *slot = if p >= 0 {
                    // children always follow their parent
                    if p as usize <= index || p as usize >= numnodes {
                        return Err(bad_index(self.name(), "node child", p));
                    }
                    p as usize
                } else {
                    let leaf = (-1 - p) as usize;
                    if leaf >= numleafs {
                        return Err(bad_index(self.name(), "leaf child", p));
                    }
                    numnodes + leaf
                };
            }

            nodes.push(BspNode::Node(MNode {
                mins: n.mins.map(f32::from),
                maxs: n.maxs.map(f32::from),
                parent: None,
                plane: plane as usize,
                children,
                firstsurface: first,
                numsurfaces: count,
            }));
        }
        nodes.extend(leafs);

        set_parents(&mut nodes);
        self.bsp.numnodes = numnodes;
        self.bsp.nodes = nodes;
        Ok(())
    }

    fn load_submodels(&mut self) -> Result<(), ModelError> {
        let input: Vec<DModel> = self.reader.records(LUMP_MODELS)?;
        self.hunk.alloc_records::<MModel>(input.len())?;

        let mut out = Vec::with_capacity(input.len());
        for (i, m) in input.into_iter().enumerate() {
            // spread the mins / maxs by a pixel
            let mins = m.mins.map(|v| v - 1.0);
            let maxs = m.maxs.map(|v| v + 1.0);
            if m.headnode >= self.bsp.numnodes as i32 {
                return Err(ModelError::BadInlineModel(i as i32));
            }
            let firstface = m.firstface.max(0) as usize;
            let numfaces = m.numfaces.max(0) as usize;
            if firstface + numfaces > self.bsp.surfaces.len() {
                return Err(bad_index(self.name(), "model surface", (firstface + numfaces) as i64));
            }
            out.push(MModel {
                mins,
                maxs,
                origin: m.origin,
                radius: radius_from_bounds(&mins, &maxs),
                headnode: m.headnode,
                visleafs: 0,
                firstface,
                numfaces,
            });
        }
        self.bsp.submodels = out;
        Ok(())
    }

    fn load_entities(&mut self) -> Result<(), ModelError> {
        let bytes = self.reader.bytes(LUMP_ENTITIES)?;
        self.hunk.alloc(bytes.len())?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        self.bsp.entities = String::from_utf8_lossy(&bytes[..end]).into_owned();
        Ok(())
    }
}

/// Largest texture-space extent a lightmapped face may cover.
pub const MAX_SURFACE_EXTENT: i32 = 512 * 16;

/// Texture-space bounds of a face, snapped to the 16 unit lightmap grid.
pub fn calc_surface_extents(verts: &[Vec3], vecs: &[[f32; 4]; 2]) -> ([i32; 2], [i32; 2]) {
    let mut mins = [999999.0f32; 2];
    let mut maxs = [-99999.0f32; 2];

    for v in verts {
        for j in 0..2 {
            let val = v[0] * vecs[j][0] + v[1] * vecs[j][1] + v[2] * vecs[j][2] + vecs[j][3];
            mins[j] = mins[j].min(val);
            maxs[j] = maxs[j].max(val);
        }
    }

    let mut texturemins = [0i32; 2];
    let mut extents = [0i32; 2];
    for i in 0..2 {
        let bmin = (mins[i] / 16.0).floor() as i32;
        let bmax = (maxs[i] / 16.0).ceil() as i32;
        texturemins[i] = bmin.saturating_mul(16);
        extents[i] = bmax.saturating_sub(bmin).saturating_mul(16);
    }
    (texturemins, extents)
}

fn saturate_i16(v: i32) -> i16 {
    v.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Links every node and leaf to its parent, starting from the root.
fn set_parents(nodes: &mut [BspNode]) {
    if nodes.is_empty() {
        return;
    }
    let mut stack = vec![(0usize, None)];
    while let Some((index, parent)) = stack.pop() {
        let Some(node) = nodes.get_mut(index) else {
            continue;
        };
        node.set_parent(parent);
        if let BspNode::Node(n) = node {
            stack.push((n.children[0], Some(index)));
            stack.push((n.children[1], Some(index)));
        }
    }
}

// =============================================================
//  Model cache
// =============================================================

#[derive(Debug, Clone)]
pub enum ModelKind {
    Brush(Arc<BspData>),
    /// Alias and sprite files are resident but decoded elsewhere.
    External { ident: i32 },
}

#[derive(Debug, Clone)]
pub struct Model {
    pub name: String,
    pub registration_sequence: i32,
    pub extradatasize: usize,
    pub kind: ModelKind,
}

/// Refers to a model table slot or to an inline model of the world.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ModelHandle {
    Known(usize),
    Inline(usize),
}

/// A brush model as the walker sees it.
#[derive(Debug, Clone, Copy)]
pub struct BrushModelRef<'a> {
    pub bsp: &'a Arc<BspData>,
    pub submodel: &'a MModel,
}

#[derive(Debug, Default)]
pub struct ModelStore {
    known: Vec<Option<Model>>,
    registration_sequence: i32,
    mod_max: usize,
}

impl ModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn registration_sequence(&self) -> i32 {
        self.registration_sequence
    }

    pub fn get(&self, handle: ModelHandle) -> Option<&Model> {
        match handle {
            ModelHandle::Known(i) => self.known.get(i)?.as_ref(),
            ModelHandle::Inline(_) => self.known.first()?.as_ref(),
        }
    }

    /// The map loaded into slot 0.
    pub fn world(&self) -> Option<&Arc<BspData>> {
        match &self.known.first()?.as_ref()?.kind {
            ModelKind::Brush(bsp) => Some(bsp),
            ModelKind::External { .. } => None,
        }
    }

    pub fn brush(&self, handle: ModelHandle) -> Option<BrushModelRef<'_>> {
        match handle {
            ModelHandle::Known(i) => match &self.known.get(i)?.as_ref()?.kind {
                ModelKind::Brush(bsp) => Some(BrushModelRef { bsp, submodel: bsp.submodels.first()? }),
                ModelKind::External { .. } => None,
            },
            ModelHandle::Inline(i) => {
                let bsp = self.world()?;
                Some(BrushModelRef { bsp, submodel: bsp.submodels.get(i)? })
            }
        }
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.known.iter().position(|m| m.as_ref().is_some_and(|m| m.name == name))
    }

    /// Loads a model for the given name, reusing a resident copy.
    ///
    /// Inline models (`*N`) are grabbed only from the world. A missing file
    /// is an error when `crash` is set and `Ok(None)` otherwise.
    pub fn for_name(
        &mut self,
        name: &str,
        crash: bool,
        imports: &mut dyn RefImports,
    ) -> Result<Option<ModelHandle>, ModelError> {
        if name.is_empty() {
            return Err(ModelError::EmptyName);
        }

        if let Some(num) = name.strip_prefix('*') {
            if let Some(world) = self.world() {
                let i = atoi(num);
                if i < 1 || i as usize >= world.submodels.len() {
                    return Err(ModelError::BadInlineModel(i));
                }
                return Ok(Some(ModelHandle::Inline(i as usize)));
            }
        }

        // search the currently loaded models
        if let Some(i) = self.find(name) {
            return Ok(Some(ModelHandle::Known(i)));
        }

        // find a free model slot spot
        let slot = match self.known.iter().position(Option::is_none) {
            Some(slot) => slot,
            None => {
                if self.known.len() == MAX_MOD_KNOWN {
                    return Err(ModelError::TableFull);
                }
                self.known.push(None);
                self.known.len() - 1
            }
        };

        let Some(buf) = imports.load_file(name) else {
            if crash {
                return Err(ModelError::NotFound(name.to_string()));
            }
            return Ok(None);
        };

        let ident = buf.get(..4).map(|b| i32::from_le_bytes([b[0], b[1], b[2], b[3]])).unwrap_or(0);
        let (kind, size) = match ident {
            IDALIASHEADER | IDSPRITEHEADER => (ModelKind::External { ident }, buf.len()),
            IDBSPHEADER | QBSPHEADER => {
                if slot != 0 {
                    return Err(ModelError::BrushAfterWorld);
                }
                let (bsp, size) = load_brush_model(name, &buf, imports)?;
                (ModelKind::Brush(Arc::new(bsp)), size)
            }
            _ => return Err(ModelError::UnknownFormat(name.to_string())),
        };

        log::info!("loaded {} ({} bytes)", name, size);
        self.known[slot] = Some(Model {
            name: name.to_string(),
            registration_sequence: self.registration_sequence,
            extradatasize: size,
            kind,
        });
        Ok(Some(ModelHandle::Known(slot)))
    }

    /// Starts a level load: bumps the sequence and loads `maps/<map>.bsp`
    /// into slot 0, dropping the old world unless it is the same map.
    pub fn begin_registration(
        &mut self,
        map: &str,
        flushmap: bool,
        imports: &mut dyn RefImports,
    ) -> Result<ModelHandle, ModelError> {
        self.registration_sequence += 1;

        let fullname = format!("maps/{}.bsp", map);

        // explicitly free the old map if different
        // this guarantees that known[0] is the world map
        let same = self.known.first().and_then(Option::as_ref).is_some_and(|m| m.name == fullname);
        if flushmap || !same {
            if let Some(world) = self.known.first_mut() {
                *world = None;
            }
        }

        let handle = self.for_name(&fullname, true, imports)?.ok_or(ModelError::NotFound(fullname))?;
        self.touch(handle, imports);
        Ok(handle)
    }

    fn touch(&mut self, handle: ModelHandle, imports: &mut dyn RefImports) {
        let sequence = self.registration_sequence;
        let ModelHandle::Known(i) = handle else {
            return;
        };
        let Some(model) = self.known.get_mut(i).and_then(Option::as_mut) else {
            return;
        };
        model.registration_sequence = sequence;

        // register any images used by the model
        if let ModelKind::Brush(bsp) = &model.kind {
            for ti in &bsp.texinfo {
                imports.touch_image(ti.image.handle, sequence);
            }
        }
    }

    /// Loads (or finds) a model and marks it live for this sequence.
    pub fn register_model(
        &mut self,
        name: &str,
        imports: &mut dyn RefImports,
    ) -> Result<Option<ModelHandle>, ModelError> {
        let handle = self.for_name(name, false, imports)?;
        if let Some(handle) = handle {
            self.touch(handle, imports);
        }
        Ok(handle)
    }

    /// Frees every model not touched during this registration pass, unless
    /// both the model table and the image cache still have room.
    pub fn end_registration(&mut self, imports: &mut dyn RefImports) {
        if self.has_free_space() && imports.image_has_free_space() {
            // should be enough space for load next maps
            return;
        }

        let sequence = self.registration_sequence;
        let mut freed = 0;
        for slot in self.known.iter_mut() {
            if slot.as_ref().is_some_and(|m| m.registration_sequence != sequence) {
                *slot = None;
                freed += 1;
            }
        }
        log::debug!("end_registration: freed {} models", freed);

        imports.free_unused_images(sequence);
    }

    /// True while the table has as many free slots as the most models ever
    /// registered at once.
    pub fn has_free_space(&mut self) -> bool {
        let used = self.count_used();
        self.mod_max = self.mod_max.max(used);
        self.known.len() + self.mod_max < MAX_MOD_KNOWN
    }

    fn count_used(&self) -> usize {
        self.known
            .iter()
            .flatten()
            .filter(|m| m.registration_sequence == self.registration_sequence)
            .count()
    }

    pub fn free_all(&mut self) {
        self.known.iter_mut().for_each(|m| *m = None);
    }

    /// Text of the `modellist` command.
    pub fn modellist(&mut self) -> String {
        let mut out = String::from("Loaded models:\n");
        let mut total = 0;
        for m in self.known.iter().flatten() {
            let in_use = if m.registration_sequence == self.registration_sequence { "*" } else { "" };
            out.push_str(&format!("{:8} : {} {}\n", m.extradatasize, m.name, in_use));
            total += m.extradatasize;
        }
        out.push_str(&format!("Total resident: {}\n", total));

        // update statistics
        let used = self.count_used();
        let freeup = self.has_free_space();
        out.push_str(&format!(
            "Used {} of {} models{}.\n",
            used,
            self.mod_max,
            if freeup { ", has free space" } else { "" }
        ));
        out
    }
}

/// Integer prefix of `s`, 0 when there is none.
fn atoi(s: &str) -> i32 {
    let s = s.trim_start();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map(|(i, _)| i)
        .unwrap_or(s.len());
    s[..end].parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeImports, TestMap};

    fn world_store(map: &TestMap) -> (ModelStore, FakeImports) {
        let mut imports = FakeImports::with_map("maps/test.bsp", map);
        let mut store = ModelStore::new();
        store.begin_registration("test", false, &mut imports).unwrap();
        (store, imports)
    }

    #[test]
    fn test_load_two_rooms() {
        let (store, _) = world_store(&TestMap::two_rooms());
        let world = store.world().unwrap();
        assert_eq!(world.numnodes, 3);
        assert_eq!(world.numleafs, 3);
        assert_eq!(world.surfaces.len(), 3);
        assert_eq!(world.submodels.len(), 2);
        assert_eq!(world.vis.as_ref().unwrap().numclusters, 2);
        assert!(world.entities.contains("worldspawn"));
    }

    #[test]
    fn test_parents_and_point_in_leaf() {
        let (store, _) = world_store(&TestMap::two_rooms());
        let world = store.world().unwrap();
        assert_eq!(world.nodes[0].parent(), None);
        assert_eq!(world.nodes[1].parent(), Some(0));
        // leaf 1 sits under node 1
        assert_eq!(world.nodes[world.numnodes + 1].parent(), Some(1));

        let leaf = world.point_in_leaf(&[32.0, 0.0, 0.0]).unwrap();
        assert_eq!(leaf, world.numnodes + 1);
        assert_eq!(world.nodes[leaf].as_leaf().unwrap().cluster, 0);
        let leaf = world.point_in_leaf(&[-32.0, 0.0, 0.0]).unwrap();
        assert_eq!(world.nodes[leaf].as_leaf().unwrap().cluster, 1);
        let leaf = world.point_in_leaf(&[100.0, 0.0, 0.0]).unwrap();
        assert_eq!(world.nodes[leaf].as_leaf().unwrap().contents, 1);
    }

    #[test]
    fn test_surface_extents_and_polygons() {
        let (store, _) = world_store(&TestMap::two_rooms());
        let world = store.world().unwrap();
        let surf = &world.surfaces[0];
        assert_eq!(surf.texturemins, [-64, -64]);
        assert_eq!(surf.extents, [128, 128]);
        assert!(surf.flags.contains(SurfFlags::PLANEBACK));
        assert_eq!(surf.lightmaptexturenum, 0);
        assert_eq!(surf.polys.len(), 1);
        assert_eq!(world.polys[surf.polys.start].numverts, 4);
        assert_eq!(world.surface_index_count(surf), 6);

        // back side surface normal points toward -x
        let v = &world.vertices[world.polys[surf.polys.start].first_vert as usize];
        assert_eq!(v.normal, [-1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_submodels_are_padded() {
        let (store, _) = world_store(&TestMap::two_rooms());
        let world = store.world().unwrap();
        let m = &world.submodels[1];
        assert_eq!(m.mins, [15.0, -17.0, -1.0]);
        assert_eq!(m.maxs, [49.0, 17.0, 17.0]);
        assert_eq!((m.firstface, m.numfaces), (2, 1));
        assert!((m.radius - radius_from_bounds(&m.mins, &m.maxs)).abs() < 1e-6);
    }

    #[test]
    fn test_warp_faces_are_subdivided() {
        let mut map = TestMap::two_rooms();
        map.texinfo[0].flags = SURF_WARP;
        let (store, _) = world_store(&map);
        let world = store.world().unwrap();
        let surf = &world.surfaces[0];
        assert!(surf.flags.contains(SurfFlags::DRAWTURB));
        assert_eq!(surf.lightmaptexturenum, -1);
        // 128x128 on the 64 grid
        assert_eq!(surf.polys.len(), 4);
        for p in &world.polys[surf.polys.clone()] {
            assert_eq!(p.numverts, 6);
        }
    }

    #[test]
    fn test_lit_warp_keeps_lightmap() {
        let mut map = TestMap::two_rooms();
        map.texinfo[0].flags = SURF_WARP;
        map.faces[0].lightofs = 3;
        let (store, _) = world_store(&map);
        let surf = &store.world().unwrap().surfaces[0];
        assert!(surf.flags.contains(SurfFlags::DRAWTURBLIT));
        assert_eq!(surf.lightmaptexturenum, 0);
    }

    #[test]
    fn test_texture_animation_chain() {
        let mut map = TestMap::two_rooms();
        map.texinfo.push(TestMap::texinfo("e1u1/anim1", 0));
        map.texinfo.push(TestMap::texinfo("e1u1/anim2", 0));
        map.texinfo[2].nexttexinfo = 3;
        map.texinfo[3].nexttexinfo = 2;
        let (store, _) = world_store(&map);
        let world = store.world().unwrap();
        assert_eq!(world.texinfo[0].numframes, 1);
        assert_eq!(world.texinfo[2].numframes, 2);
        assert_eq!(world.texinfo[3].numframes, 2);
        assert_eq!(world.texture_animation(2, 1).image_name, "e1u1/anim2");
        assert_eq!(world.texture_animation(2, 2).image_name, "e1u1/anim1");
        assert_eq!(world.texture_animation(0, 5).image_name, world.texinfo[0].image_name);
    }

    #[test]
    fn test_missing_texture_uses_notexture() {
        let mut map = TestMap::two_rooms();
        map.texinfo[1] = TestMap::texinfo("missing/tex", 0);
        let mut imports = FakeImports::with_map("maps/test.bsp", &map);
        imports.missing.push("textures/missing/tex.wal".into());
        imports.missing.push("textures/missing/tex.m8".into());
        let mut store = ModelStore::new();
        store.begin_registration("test", false, &mut imports).unwrap();
        assert_eq!(store.world().unwrap().texinfo[1].image, imports.notexture());
    }

    #[test]
    fn test_bad_headers() {
        let mut map = TestMap::two_rooms();
        map.version = 37;
        let mut imports = FakeImports::with_map("maps/test.bsp", &map);
        let err = ModelStore::new().begin_registration("test", false, &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::BadVersion { version: 37, .. }));

        let mut map = TestMap::two_rooms();
        map.ident = QBSPHEADER;
        let mut imports = FakeImports::with_map("maps/test.bsp", &map);
        let err = ModelStore::new().begin_registration("test", false, &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::UnsupportedFormat(_)));

        let mut imports = FakeImports::default();
        imports.files.insert("maps/junk.bsp".into(), b"JUNKJUNK".to_vec());
        let err = ModelStore::new().begin_registration("junk", false, &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::UnknownFormat(_)));

        let mut imports = FakeImports::default();
        let err = ModelStore::new().begin_registration("nope", false, &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::NotFound(_)));
    }

    #[test]
    fn test_funny_lump_size() {
        let map = TestMap::two_rooms();
        let mut bytes = map.to_bytes();
        // shorten the planes lump by one byte
        let lump = 8 + LUMP_PLANES * 8 + 4;
        let len = i32::from_le_bytes(bytes[lump..lump + 4].try_into().unwrap());
        bytes[lump..lump + 4].copy_from_slice(&(len - 1).to_le_bytes());
        let mut imports = FakeImports::default();
        let err = load_brush_model("maps/test.bsp", &bytes, &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::FunnyLumpSize { lump: LUMP_PLANES, .. }));
    }

    #[test]
    fn test_out_of_range_indices() {
        let mut map = TestMap::two_rooms();
        map.faces[1].texinfo = 9;
        let mut imports = FakeImports::default();
        let err = load_brush_model("maps/test.bsp", &map.to_bytes(), &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::BadIndex { what: "texinfo", index: 9, .. }));

        let mut map = TestMap::two_rooms();
        map.leaffaces[0] = 40;
        let err = load_brush_model("maps/test.bsp", &map.to_bytes(), &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::BadIndex { what: "surface", index: 40, .. }));

        let mut map = TestMap::two_rooms();
        map.leafs[1].numleaffaces = 5;
        let err = load_brush_model("maps/test.bsp", &map.to_bytes(), &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::BadMarkSurfaces(_)));

        let mut map = TestMap::two_rooms();
        map.nodes[0].children[1] = -9;
        let err = load_brush_model("maps/test.bsp", &map.to_bytes(), &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::BadIndex { what: "leaf child", .. }));

        // a child pointing back up the tree
        let mut map = TestMap::two_rooms();
        map.nodes[1].children[0] = 0;
        let err = load_brush_model("maps/test.bsp", &map.to_bytes(), &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::BadIndex { what: "node child", index: 0, .. }));

        let mut map = TestMap::two_rooms();
        map.nodes[2].children[1] = 2;
        let err = load_brush_model("maps/test.bsp", &map.to_bytes(), &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::BadIndex { what: "node child", index: 2, .. }));

        let mut map = TestMap::two_rooms();
        map.models[1].headnode = 7;
        let err = load_brush_model("maps/test.bsp", &map.to_bytes(), &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::BadInlineModel(1)));
    }

    #[test]
    fn test_oversized_texture_extents() {
        let mut imports = FakeImports::default();
        let mut map = TestMap::two_rooms();
        map.texinfo[0].vecs = [[0.0, 300.0, 0.0, 0.0], [0.0, 0.0, 300.0, 0.0]];
        let err = load_brush_model("maps/test.bsp", &map.to_bytes(), &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::BadSurfaceExtents(_)));

        // unlit warp surfaces skip the check
        let mut map = TestMap::two_rooms();
        map.texinfo[0].vecs = [[0.0, 300.0, 0.0, 0.0], [0.0, 0.0, 300.0, 0.0]];
        map.texinfo[0].flags = SURF_WARP;
        for face in map.faces.iter_mut().filter(|f| f.texinfo == 0) {
            face.lightofs = -1;
        }
        assert!(load_brush_model("maps/test.bsp", &map.to_bytes(), &mut imports).is_ok());
    }

    #[test]
    fn test_hunk_overflow() {
        let mut hunk = Hunk::new("maps/x.bsp", 64);
        hunk.alloc(10).unwrap();
        assert_eq!(hunk.used, 32);
        let err = hunk.alloc(40).unwrap_err();
        assert!(matches!(err, ModelError::ArenaOverflow { requested: 64, available: 32, .. }));
    }

    #[test]
    fn test_budget_covers_load() {
        let map = TestMap::two_rooms();
        let bytes = map.to_bytes();
        let reader = LumpReader::new("maps/test.bsp", &bytes).unwrap();
        let faces: Vec<DFace> = reader.records(LUMP_FACES).unwrap();
        let texinfo: Vec<TexInfo> = reader.records(LUMP_TEXINFO).unwrap();
        let budget = reader.total_hunk_size(&faces, &texinfo);
        let (_, used) = load_brush_model("maps/test.bsp", &bytes, &mut FakeImports::default()).unwrap();
        assert!(used > 0);
        assert!(used <= budget);
        assert!(budget >= HUNK_MARGIN);
    }

    #[test]
    fn test_parallel_decode_matches_sequential() {
        let mut map = TestMap::two_rooms();
        for i in 0..200 {
            map.vertexes.push(DVertex { point: [i as f32, -(i as f32), 0.5] });
        }
        let bytes = map.to_bytes();
        let reader = LumpReader::new("maps/test.bsp", &bytes).unwrap();
        let verts: Vec<DVertex> = reader.records(LUMP_VERTEXES).unwrap();
        assert_eq!(verts.len(), map.vertexes.len());
        for (a, b) in verts.iter().zip(map.vertexes.iter()) {
            assert_eq!(a.point, b.point);
        }
    }

    #[test]
    fn test_inline_models() {
        let (mut store, mut imports) = world_store(&TestMap::two_rooms());
        let h = store.for_name("*1", true, &mut imports).unwrap().unwrap();
        assert_eq!(h, ModelHandle::Inline(1));
        let brush = store.brush(h).unwrap();
        assert_eq!(brush.submodel.numfaces, 1);
        assert!(matches!(store.for_name("*2", true, &mut imports), Err(ModelError::BadInlineModel(2))));
        assert!(matches!(store.for_name("*0", true, &mut imports), Err(ModelError::BadInlineModel(0))));
    }

    #[test]
    fn test_brush_after_world_rejected() {
        let (mut store, mut imports) = world_store(&TestMap::two_rooms());
        imports.files.insert("maps/other.bsp".into(), TestMap::two_rooms().to_bytes());
        let err = store.for_name("maps/other.bsp", true, &mut imports).unwrap_err();
        assert!(matches!(err, ModelError::BrushAfterWorld));
    }

    #[test]
    fn test_external_models_and_missing() {
        let (mut store, mut imports) = world_store(&TestMap::two_rooms());
        let mut md2 = IDALIASHEADER.to_le_bytes().to_vec();
        md2.extend_from_slice(&[0u8; 96]);
        imports.files.insert("models/monsters/tank/tris.md2".into(), md2);

        let h = store.register_model("models/monsters/tank/tris.md2", &mut imports).unwrap().unwrap();
        let m = store.get(h).unwrap();
        assert_eq!(m.extradatasize, 100);
        assert!(matches!(m.kind, ModelKind::External { ident: IDALIASHEADER }));
        // same name comes back from the cache
        assert_eq!(store.register_model("models/monsters/tank/tris.md2", &mut imports).unwrap(), Some(h));

        assert_eq!(store.register_model("models/none.md2", &mut imports).unwrap(), None);
        assert!(matches!(store.for_name("", false, &mut imports), Err(ModelError::EmptyName)));
    }

    #[test]
    fn test_registration_eviction() {
        let map = TestMap::two_rooms();
        let mut imports = FakeImports::with_map("maps/test.bsp", &map);
        imports.files.insert("models/a.md2".into(), IDALIASHEADER.to_le_bytes().to_vec());
        imports.files.insert("models/b.sp2".into(), IDSPRITEHEADER.to_le_bytes().to_vec());

        let mut store = ModelStore::new();
        store.begin_registration("test", false, &mut imports).unwrap();
        store.register_model("models/a.md2", &mut imports).unwrap();
        store.register_model("models/b.sp2", &mut imports).unwrap();
        store.end_registration(&mut imports);
        assert_eq!(imports.freed_unused, 0);

        // second level only needs a.md2; lack of image room forces a sweep
        imports.image_space = false;
        store.begin_registration("test", false, &mut imports).unwrap();
        store.register_model("models/a.md2", &mut imports).unwrap();
        store.end_registration(&mut imports);
        assert_eq!(imports.freed_unused, 1);
        assert!(store.find("models/b.sp2").is_none());
        assert!(store.find("models/a.md2").is_some());
        // same map name keeps the world
        assert!(store.world().is_some());
    }

    #[test]
    fn test_flushmap_reloads_world() {
        let (mut store, mut imports) = world_store(&TestMap::two_rooms());
        let first = Arc::as_ptr(store.world().unwrap());
        store.begin_registration("test", false, &mut imports).unwrap();
        assert_eq!(Arc::as_ptr(store.world().unwrap()), first);
        store.begin_registration("test", true, &mut imports).unwrap();
        assert_ne!(Arc::as_ptr(store.world().unwrap()), first);
    }

    #[test]
    fn test_register_touches_textures() {
        let (_, imports) = world_store(&TestMap::two_rooms());
        assert!(!imports.touched.is_empty());
    }

    #[test]
    fn test_has_free_space_tracks_high_water_mark() {
        let mut store = ModelStore::new();
        for i in 0..300 {
            store.known.push(Some(Model {
                name: format!("m{}", i),
                registration_sequence: 0,
                extradatasize: 1,
                kind: ModelKind::External { ident: IDALIASHEADER },
            }));
        }
        // 300 known + 300 used >= 512
        assert!(!store.has_free_space());
        store.registration_sequence = 1;
        // the high-water mark survives
        assert!(!store.has_free_space());
        store.known.truncate(250);
        assert!(!store.has_free_space());
        store.known.truncate(200);
        assert!(store.has_free_space());
    }

    #[test]
    fn test_modellist_format() {
        let (mut store, mut imports) = world_store(&TestMap::two_rooms());
        imports.files.insert("models/a.md2".into(), vec![b'I', b'D', b'P', b'2', 0, 0]);
        store.register_model("models/a.md2", &mut imports).unwrap();
        let text = store.modellist();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Loaded models:");
        assert!(lines[1].ends_with(" : maps/test.bsp *"));
        assert_eq!(lines[2], "       6 : models/a.md2 *");
        assert!(lines[3].starts_with("Total resident: "));
        assert_eq!(lines[4], "Used 2 of 2 models, has free space.");
    }

    #[test]
    fn test_atoi() {
        assert_eq!(atoi("12"), 12);
        assert_eq!(atoi("3abc"), 3);
        assert_eq!(atoi("x"), 0);
        assert_eq!(atoi("-4"), -4);
    }
}
