// testutil.rs — in-memory BSP fixtures and a fake host for unit tests

use std::collections::HashMap;

use q2refresh_common::q_shared::Vec3;
use q2refresh_common::qfiles::*;

use crate::backend::TextureHandle;
use crate::model::RefImports;
use crate::model_types::ImageInfo;

/// Raw lump contents, written out by `to_bytes`.
#[derive(Debug, Clone)]
pub struct TestMap {
    pub ident: i32,
    pub version: i32,
    pub planes: Vec<DPlane>,
    pub vertexes: Vec<DVertex>,
    pub edges: Vec<DEdge>,
    pub surfedges: Vec<i32>,
    pub texinfo: Vec<TexInfo>,
    pub faces: Vec<DFace>,
    pub leaffaces: Vec<u16>,
    pub leafs: Vec<DLeaf>,
    pub nodes: Vec<DNode>,
    pub models: Vec<DModel>,
    pub lighting: Vec<u8>,
    pub visibility: Vec<u8>,
    pub entities: String,
}

fn plane(normal: Vec3, dist: f32) -> DPlane {
    let plane_type = if normal[0] == 1.0 {
        PLANE_X
    } else if normal[1] == 1.0 {
        PLANE_Y
    } else if normal[2] == 1.0 {
        PLANE_Z
    } else {
        PLANE_ANYZ
    };
    DPlane { normal, dist, plane_type }
}

fn leaf(contents: i32, cluster: i16, mins: [i16; 3], maxs: [i16; 3], first: u16, count: u16) -> DLeaf {
    DLeaf {
        contents,
        cluster,
        area: 0,
        mins,
        maxs,
        firstleafface: first,
        numleaffaces: count,
        firstleafbrush: 0,
        numleafbrushes: 0,
    }
}

impl TestMap {
    pub fn texinfo(name: &str, flags: i32) -> TexInfo {
        let mut texture = [0u8; 32];
        texture[..name.len()].copy_from_slice(name.as_bytes());
        TexInfo {
            vecs: [[0.0, 1.0, 0.0, 0.0], [0.0, 0.0, 1.0, 0.0]],
            flags,
            value: 0,
            texture,
            nexttexinfo: -1,
        }
    }

    /// Builds a PVS lump from uncompressed rows (one byte per row).
    pub fn vis_lump(rows: &[u8]) -> Vec<u8> {
        let n = rows.len();
        let mut out = (n as i32).to_le_bytes().to_vec();
        let data_start = 4 + n * 8;
        for i in 0..n {
            out.extend_from_slice(&((data_start + i) as i32).to_le_bytes());
            out.extend_from_slice(&((data_start + i) as i32).to_le_bytes());
        }
        // rows never contain a zero byte, so no run-length encoding is needed
        out.extend_from_slice(rows);
        out
    }

    /// Appends a four sided face, returning its index.
    pub fn add_quad(&mut self, corners: [Vec3; 4], planenum: u16, side: i16, texinfo: i16, lightofs: i32) -> usize {
        let firstedge = self.surfedges.len() as i32;
        let base = self.vertexes.len() as u16;
        for c in corners {
            self.vertexes.push(DVertex { point: c });
        }
        for i in 0..4u16 {
            self.surfedges.push(self.edges.len() as i32);
            self.edges.push(DEdge { v: [base + i, base + (i + 1) % 4] });
        }
        self.faces.push(DFace {
            planenum,
            side,
            firstedge,
            numedges: 4,
            texinfo,
            styles: [0, 255, 255, 255],
            lightofs,
        });
        self.faces.len() - 1
    }

    /// Two rooms split by the plane x = 0, each with one wall facing the
    /// middle, plus a one-face inline model.
    ///
    /// ```text
    ///         node 0 (x = 0)
    ///        /              \
    ///   node 1 (x = 64)   node 2 (x = -64)
    ///   /        \         /        \
    /// solid    leaf 1   leaf 2    solid
    /// ```
    pub fn two_rooms() -> Self {
        let mut map = TestMap {
            ident: IDBSPHEADER,
            version: BSPVERSION,
            planes: vec![
                plane([1.0, 0.0, 0.0], 0.0),
                plane([1.0, 0.0, 0.0], 64.0),
                plane([1.0, 0.0, 0.0], -64.0),
                plane([0.0, 0.0, 1.0], 16.0),
            ],
            vertexes: Vec::new(),
            edges: vec![DEdge::default()],
            surfedges: Vec::new(),
            texinfo: vec![Self::texinfo("e1u1/wall1", 0), Self::texinfo("e1u1/door1", 0)],
            faces: Vec::new(),
            leaffaces: vec![0, 1],
            leafs: vec![
                leaf(1, -1, [0; 3], [0; 3], 0, 0),
                leaf(0, 0, [0, -128, -128], [64, 128, 128], 0, 1),
                leaf(0, 1, [-64, -128, -128], [0, 128, 128], 1, 1),
            ],
            nodes: vec![
                DNode { planenum: 0, children: [1, 2], mins: [-128; 3], maxs: [128; 3], firstface: 0, numfaces: 0 },
                DNode { planenum: 1, children: [-1, -2], mins: [0, -128, -128], maxs: [128; 3], firstface: 0, numfaces: 1 },
                DNode { planenum: 2, children: [-3, -1], mins: [-128; 3], maxs: [0, 128, 128], firstface: 1, numfaces: 1 },
            ],
            models: vec![
                DModel { mins: [-128.0; 3], maxs: [128.0; 3], origin: [0.0; 3], headnode: 0, firstface: 0, numfaces: 2 },
                DModel {
                    mins: [16.0, -16.0, 0.0],
                    maxs: [48.0, 16.0, 16.0],
                    origin: [0.0; 3],
                    headnode: 0,
                    firstface: 2,
                    numfaces: 1,
                },
            ],
            // 9x9 samples for the lit wall
            lighting: vec![128; 243],
            visibility: Self::vis_lump(&[0x03, 0x03]),
            entities: "{\n\"classname\" \"worldspawn\"\n}\n".to_string(),
        };

        // wall at x = 64 facing the middle
        map.add_quad(
            [[64.0, -64.0, -64.0], [64.0, 64.0, -64.0], [64.0, 64.0, 64.0], [64.0, -64.0, 64.0]],
            1,
            1,
            0,
            0,
        );
        // wall at x = -64 facing the middle
        map.add_quad(
            [[-64.0, -64.0, -64.0], [-64.0, -64.0, 64.0], [-64.0, 64.0, 64.0], [-64.0, 64.0, -64.0]],
            2,
            0,
            0,
            -1,
        );
        // top of the inline model
        map.add_quad(
            [[16.0, -16.0, 16.0], [48.0, -16.0, 16.0], [48.0, 16.0, 16.0], [16.0, 16.0, 16.0]],
            3,
            0,
            1,
            -1,
        );
        map
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        fn pod_bytes<T: bytemuck::Pod>(v: &[T]) -> Vec<u8> {
            bytemuck::cast_slice(v).to_vec()
        }

        let mut lumps: Vec<Vec<u8>> = vec![Vec::new(); HEADER_LUMPS];
        lumps[LUMP_ENTITIES] = {
            let mut e = self.entities.as_bytes().to_vec();
            e.push(0);
            e
        };
        lumps[LUMP_PLANES] = pod_bytes(&self.planes);
        lumps[LUMP_VERTEXES] = pod_bytes(&self.vertexes);
        lumps[LUMP_VISIBILITY] = self.visibility.clone();
        lumps[LUMP_NODES] = pod_bytes(&self.nodes);
        lumps[LUMP_TEXINFO] = pod_bytes(&self.texinfo);
        lumps[LUMP_FACES] = pod_bytes(&self.faces);
        lumps[LUMP_LIGHTING] = self.lighting.clone();
        lumps[LUMP_LEAFS] = pod_bytes(&self.leafs);
        lumps[LUMP_LEAFFACES] = pod_bytes(&self.leaffaces);
        lumps[LUMP_EDGES] = pod_bytes(&self.edges);
        lumps[LUMP_SURFEDGES] = pod_bytes(&self.surfedges);
        lumps[LUMP_MODELS] = pod_bytes(&self.models);

        let header_size = std::mem::size_of::<DHeader>();
        let mut out = Vec::new();
        out.extend_from_slice(&self.ident.to_le_bytes());
        out.extend_from_slice(&self.version.to_le_bytes());
        let mut ofs = header_size;
        for lump in &lumps {
            out.extend_from_slice(&(ofs as i32).to_le_bytes());
            out.extend_from_slice(&(lump.len() as i32).to_le_bytes());
            ofs += lump.len().next_multiple_of(4);
        }
        for lump in &lumps {
            out.extend_from_slice(lump);
            out.resize(out.len().next_multiple_of(4), 0);
        }
        out
    }
}

/// Host stand-in: files from a map, images handed out on demand.
#[derive(Debug)]
pub struct FakeImports {
    pub files: HashMap<String, Vec<u8>>,
    pub images: HashMap<String, ImageInfo>,
    pub missing: Vec<String>,
    pub touched: Vec<(TextureHandle, i32)>,
    pub image_space: bool,
    pub freed_unused: usize,
}

impl Default for FakeImports {
    fn default() -> Self {
        Self {
            files: HashMap::new(),
            images: HashMap::new(),
            missing: Vec::new(),
            touched: Vec::new(),
            image_space: true,
            freed_unused: 0,
        }
    }
}

impl FakeImports {
    pub fn with_map(path: &str, map: &TestMap) -> Self {
        let mut imports = Self::default();
        imports.files.insert(path.to_string(), map.to_bytes());
        imports
    }
}

impl RefImports for FakeImports {
    fn load_file(&mut self, path: &str) -> Option<Vec<u8>> {
        self.files.get(path).cloned()
    }

    fn find_image(&mut self, name: &str) -> Option<ImageInfo> {
        if self.missing.iter().any(|m| m == name) {
            return None;
        }
        let next = self.images.len() as u32 + 100;
        Some(*self.images.entry(name.to_string()).or_insert(ImageInfo {
            handle: TextureHandle(next),
            width: 64,
            height: 64,
            has_alpha: false,
        }))
    }

    fn notexture(&self) -> ImageInfo {
        ImageInfo { handle: TextureHandle(1), width: 16, height: 16, has_alpha: false }
    }

    fn touch_image(&mut self, image: TextureHandle, sequence: i32) {
        self.touched.push((image, sequence));
    }

    fn image_has_free_space(&self) -> bool {
        self.image_space
    }

    fn free_unused_images(&mut self, _sequence: i32) {
        self.freed_unused += 1;
    }
}
