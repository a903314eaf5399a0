// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// gl3_shaders.c -> shaders.rs
// Program creation, uniform block validation and binding

use std::collections::HashMap;

use crate::backend::{ProgramHandle, RenderBackend, UniformValue};
use crate::error::ShaderError;
use crate::uniforms::UniformBlock;

/// Programs used by the refresh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProgramKind {
    /// Lightmapped world surfaces.
    Lm3D,
    /// Lightmapped surfaces with SURF_FLOWING.
    LmFlow3D,
    /// Warped surfaces that still carry a lightmap.
    LmTurb3D,
    /// SURF_TRANS33/66 surfaces.
    Trans3D,
    TransFlow3D,
    /// Water, slime, lava.
    Turb3D,
    /// Depth only, renders one shadow map view.
    ShadowMap,
    /// Copies a baked region of the static atlas into the frame atlas.
    ShadowBlit,
    /// View space position and normal for SSAO.
    SsaoGeometry,
    Ssao,
    SsaoBlur,
    /// Multisample resolve of color and depth.
    Resolve,
    BloomFilter,
    BloomBlur,
    /// HDR tonemap, bloom composite and gamma.
    Tonemap,
    /// Marks the weapon model so motion blur skips it.
    MotionBlurMask,
    MotionBlur,
    Underwater,
    /// Full screen v_blend overlay.
    Blend,
    Debug,
}

impl ProgramKind {
    pub fn name(self) -> &'static str {
        match self {
            ProgramKind::Lm3D => "3Dlm",
            ProgramKind::LmFlow3D => "3DlmFlow",
            ProgramKind::LmTurb3D => "3DlmTurb",
            ProgramKind::Trans3D => "3Dtrans",
            ProgramKind::TransFlow3D => "3DtransFlow",
            ProgramKind::Turb3D => "3Dturb",
            ProgramKind::ShadowMap => "shadowMap",
            ProgramKind::ShadowBlit => "shadowBlit",
            ProgramKind::SsaoGeometry => "ssaoGeometry",
            ProgramKind::Ssao => "ssao",
            ProgramKind::SsaoBlur => "ssaoBlur",
            ProgramKind::Resolve => "resolve",
            ProgramKind::BloomFilter => "bloomFilter",
            ProgramKind::BloomBlur => "bloomBlur",
            ProgramKind::Tonemap => "tonemap",
            ProgramKind::MotionBlurMask => "motionBlurMask",
            ProgramKind::MotionBlur => "motionBlur",
            ProgramKind::Underwater => "underwater",
            ProgramKind::Blend => "2Dcolor",
            ProgramKind::Debug => "debug",
        }
    }
}

// ============================================================================
// Texture units
// ============================================================================

pub const TU_DIFFUSE: i32 = 0;
/// four consecutive units, one per lightmap style layer
pub const TU_LIGHTMAP: i32 = 1;
pub const TU_SSAO: i32 = 5;
pub const TU_SHADOW_ATLAS: i32 = 6;
pub const TU_SHADOW_SELECT: i32 = 7;
pub const TU_SHADOW_ADJUST: i32 = 8;

/// Fixed vertex attribute slots shared by every program, so one vertex
/// layout serves them all.
pub const ATTRIBUTES: [(&str, u32); 10] = [
    ("position", 0),
    ("texCoord", 1),
    ("lmTexCoord", 2),
    ("vertColor", 3),
    ("normal", 4),
    ("lightFlags", 5),
    ("style0", 6),
    ("style1", 7),
    ("style2", 8),
    ("style3", 9),
];

// ============================================================================
// Shader sources
// ============================================================================

const GLSL_VERSION: &str = "#version 330 core\n";

const PRELUDE_COMMON: &str = include_str!("../shaders/prelude_common.glsl");
const PRELUDE_2D: &str = include_str!("../shaders/prelude_2d.glsl");
const PRELUDE_3D: &str = include_str!("../shaders/prelude_3d.glsl");
const PRELUDE_LIGHTS: &str = include_str!("../shaders/prelude_lights.glsl");

const WORLD_VERT: &str = include_str!("../shaders/world.vert.glsl");
const WORLD_FRAG: &str = include_str!("../shaders/world.frag.glsl");
const SHADOW_FRAG: &str = include_str!("../shaders/shadow.frag.glsl");
const FULLSCREEN_VERT: &str = include_str!("../shaders/fullscreen.vert.glsl");
const SHADOW_BLIT_FRAG: &str = include_str!("../shaders/shadowblit.frag.glsl");
const SSAO_GEOMETRY_FRAG: &str = include_str!("../shaders/ssao_geometry.frag.glsl");
const SSAO_FRAG: &str = include_str!("../shaders/ssao.frag.glsl");
const SSAO_BLUR_FRAG: &str = include_str!("../shaders/ssao_blur.frag.glsl");
const RESOLVE_FRAG: &str = include_str!("../shaders/resolve.frag.glsl");
const BLOOM_FILTER_FRAG: &str = include_str!("../shaders/bloom_filter.frag.glsl");
const BLOOM_BLUR_FRAG: &str = include_str!("../shaders/bloom_blur.frag.glsl");
const TONEMAP_FRAG: &str = include_str!("../shaders/tonemap.frag.glsl");
const MOTION_BLUR_MASK_FRAG: &str = include_str!("../shaders/motionblur_mask.frag.glsl");
const MOTION_BLUR_FRAG: &str = include_str!("../shaders/motionblur.frag.glsl");
const UNDERWATER_FRAG: &str = include_str!("../shaders/underwater.frag.glsl");
const VERT_2D: &str = include_str!("../shaders/2d.vert.glsl");
const COLOR_2D_FRAG: &str = include_str!("../shaders/2dcolor.frag.glsl");
const DEBUG_VERT: &str = include_str!("../shaders/debug.vert.glsl");
const DEBUG_FRAG: &str = include_str!("../shaders/debug.frag.glsl");

const WORLD_VS: &[&str] = &[PRELUDE_COMMON, PRELUDE_3D, WORLD_VERT];
const WORLD_LM_FS: &[&str] = &[PRELUDE_COMMON, PRELUDE_3D, PRELUDE_LIGHTS, WORLD_FRAG];
const WORLD_FS: &[&str] = &[PRELUDE_COMMON, PRELUDE_3D, WORLD_FRAG];
const FULLSCREEN_VS: &[&str] = &[PRELUDE_COMMON, FULLSCREEN_VERT];

const BLOCKS_COMMON: &[UniformBlock] = &[UniformBlock::Common];
const BLOCKS_3D: &[UniformBlock] = &[UniformBlock::Common, UniformBlock::ThreeD];

const LM_SAMPLERS: &[(&str, i32)] = &[
    ("tex", TU_DIFFUSE),
    ("lightmap0", TU_LIGHTMAP),
    ("lightmap1", TU_LIGHTMAP + 1),
    ("lightmap2", TU_LIGHTMAP + 2),
    ("lightmap3", TU_LIGHTMAP + 3),
    ("ssaoMap", TU_SSAO),
    ("shadowAtlas", TU_SHADOW_ATLAS),
    ("shadowCubeSelect", TU_SHADOW_SELECT),
    ("shadowCubeAdjust", TU_SHADOW_ADJUST),
];

struct ProgramDesc {
    kind: ProgramKind,
    defines: &'static [&'static str],
    vertex: &'static [&'static str],
    fragment: &'static [&'static str],
    /// blocks that must exist; the rest are checked only when present
    required: &'static [UniformBlock],
    samplers: &'static [(&'static str, i32)],
}

const PROGRAMS: &[ProgramDesc] = &[
    ProgramDesc {
        kind: ProgramKind::Lm3D,
        defines: &["LIGHTMAP"],
        vertex: WORLD_VS,
        fragment: WORLD_LM_FS,
        required: BLOCKS_3D,
        samplers: LM_SAMPLERS,
    },
    ProgramDesc {
        kind: ProgramKind::LmFlow3D,
        defines: &["LIGHTMAP", "FLOW"],
        vertex: WORLD_VS,
        fragment: WORLD_LM_FS,
        required: BLOCKS_3D,
        samplers: LM_SAMPLERS,
    },
    ProgramDesc {
        kind: ProgramKind::LmTurb3D,
        defines: &["LIGHTMAP", "TURB"],
        vertex: WORLD_VS,
        fragment: WORLD_LM_FS,
        required: BLOCKS_3D,
        samplers: LM_SAMPLERS,
    },
    ProgramDesc {
        kind: ProgramKind::Trans3D,
        defines: &[],
        vertex: WORLD_VS,
        fragment: WORLD_FS,
        required: BLOCKS_3D,
        samplers: &[("tex", TU_DIFFUSE)],
    },
    ProgramDesc {
        kind: ProgramKind::TransFlow3D,
        defines: &["FLOW"],
        vertex: WORLD_VS,
        fragment: WORLD_FS,
        required: BLOCKS_3D,
        samplers: &[("tex", TU_DIFFUSE)],
    },
    ProgramDesc {
        kind: ProgramKind::Turb3D,
        defines: &["TURB"],
        vertex: WORLD_VS,
        fragment: WORLD_FS,
        required: BLOCKS_3D,
        samplers: &[("tex", TU_DIFFUSE)],
    },
    ProgramDesc {
        kind: ProgramKind::ShadowMap,
        defines: &[],
        vertex: WORLD_VS,
        fragment: &[PRELUDE_COMMON, SHADOW_FRAG],
        required: BLOCKS_3D,
        samplers: &[],
    },
    ProgramDesc {
        kind: ProgramKind::ShadowBlit,
        defines: &[],
        vertex: FULLSCREEN_VS,
        fragment: &[PRELUDE_COMMON, SHADOW_BLIT_FRAG],
        required: BLOCKS_COMMON,
        samplers: &[("staticAtlas", 0)],
    },
    ProgramDesc {
        kind: ProgramKind::SsaoGeometry,
        defines: &[],
        vertex: WORLD_VS,
        fragment: &[PRELUDE_COMMON, PRELUDE_3D, SSAO_GEOMETRY_FRAG],
        required: BLOCKS_3D,
        samplers: &[],
    },
    ProgramDesc {
        kind: ProgramKind::Ssao,
        defines: &[],
        vertex: FULLSCREEN_VS,
        fragment: &[PRELUDE_COMMON, PRELUDE_3D, SSAO_FRAG],
        required: &[UniformBlock::Common, UniformBlock::ThreeD, UniformBlock::Ssao],
        samplers: &[("positionMap", 0), ("normalMap", 1), ("noiseMap", 2)],
    },
    ProgramDesc {
        kind: ProgramKind::SsaoBlur,
        defines: &[],
        vertex: FULLSCREEN_VS,
        fragment: &[PRELUDE_COMMON, SSAO_BLUR_FRAG],
        required: BLOCKS_COMMON,
        samplers: &[("ssaoInput", 0)],
    },
    ProgramDesc {
        kind: ProgramKind::Resolve,
        defines: &[],
        vertex: FULLSCREEN_VS,
        fragment: &[PRELUDE_COMMON, RESOLVE_FRAG],
        required: BLOCKS_COMMON,
        samplers: &[("colorMS", 0), ("depthMS", 1)],
    },
    ProgramDesc {
        kind: ProgramKind::BloomFilter,
        defines: &[],
        vertex: FULLSCREEN_VS,
        fragment: &[PRELUDE_COMMON, BLOOM_FILTER_FRAG],
        required: BLOCKS_COMMON,
        samplers: &[("scene", 0)],
    },
    ProgramDesc {
        kind: ProgramKind::BloomBlur,
        defines: &[],
        vertex: FULLSCREEN_VS,
        fragment: &[PRELUDE_COMMON, BLOOM_BLUR_FRAG],
        required: BLOCKS_COMMON,
        samplers: &[("image", 0)],
    },
    ProgramDesc {
        kind: ProgramKind::Tonemap,
        defines: &[],
        vertex: FULLSCREEN_VS,
        fragment: &[PRELUDE_COMMON, TONEMAP_FRAG],
        required: BLOCKS_COMMON,
        samplers: &[("scene", 0), ("bloom", 1)],
    },
    ProgramDesc {
        kind: ProgramKind::MotionBlurMask,
        defines: &[],
        vertex: WORLD_VS,
        fragment: &[PRELUDE_COMMON, MOTION_BLUR_MASK_FRAG],
        required: BLOCKS_3D,
        samplers: &[],
    },
    ProgramDesc {
        kind: ProgramKind::MotionBlur,
        defines: &[],
        vertex: FULLSCREEN_VS,
        fragment: &[PRELUDE_COMMON, MOTION_BLUR_FRAG],
        required: BLOCKS_COMMON,
        samplers: &[("scene", 0), ("depthMap", 1), ("mask", 2)],
    },
    ProgramDesc {
        kind: ProgramKind::Underwater,
        defines: &[],
        vertex: FULLSCREEN_VS,
        fragment: &[PRELUDE_COMMON, UNDERWATER_FRAG],
        required: BLOCKS_COMMON,
        samplers: &[("scene", 0)],
    },
    ProgramDesc {
        kind: ProgramKind::Blend,
        defines: &[],
        vertex: &[PRELUDE_COMMON, PRELUDE_2D, VERT_2D],
        fragment: &[PRELUDE_COMMON, COLOR_2D_FRAG],
        required: &[UniformBlock::Common, UniformBlock::TwoD],
        samplers: &[],
    },
    ProgramDesc {
        kind: ProgramKind::Debug,
        defines: &[],
        vertex: &[PRELUDE_COMMON, PRELUDE_3D, DEBUG_VERT],
        fragment: &[PRELUDE_COMMON, DEBUG_FRAG],
        required: BLOCKS_3D,
        samplers: &[],
    },
];

/// Glues the version line, the defines and the source pieces of one stage.
fn stage_source(defines: &[&str], pieces: &[&str]) -> String {
    let mut src = String::from(GLSL_VERSION);
    for define in defines {
        src.push_str("#define ");
        src.push_str(define);
        src.push('\n');
    }
    for piece in pieces {
        src.push_str(piece);
        src.push('\n');
    }
    src
}

/// Compares every uniform block the linked program declares against the
/// host struct and binds it to its fixed binding point.
fn check_uniform_blocks(
    backend: &mut dyn RenderBackend,
    program: ProgramHandle,
    name: &str,
    required: &[UniformBlock],
) -> Result<(), ShaderError> {
    for block in UniformBlock::ALL {
        match backend.uniform_block_size(program, block.name()) {
            Some(size) if size != block.host_size() => {
                return Err(ShaderError::BlockSizeMismatch {
                    program: name.to_string(),
                    block: block.name(),
                    driver: size,
                    host: block.host_size(),
                });
            }
            Some(_) => backend.bind_uniform_block(program, block.name(), block.binding()),
            None if required.contains(&block) => {
                return Err(ShaderError::MissingBlock { program: name.to_string(), block: block.name() });
            }
            None => {}
        }
    }
    Ok(())
}

// ============================================================================
// ShaderSet
// ============================================================================

/// Every linked program plus the one currently in use.
#[derive(Debug, Default)]
pub struct ShaderSet {
    programs: HashMap<ProgramKind, ProgramHandle>,
    current: Option<ProgramHandle>,
}

impl ShaderSet {
    /// Builds the whole program set. Any failure is fatal: programs created so
    /// far are deleted and the error is returned.
    pub fn init(backend: &mut dyn RenderBackend) -> Result<Self, ShaderError> {
        let mut set = Self::default();
        for desc in PROGRAMS {
            match create_program(backend, desc) {
                Ok(program) => {
                    set.programs.insert(desc.kind, program);
                }
                Err(e) => {
                    log::error!("shaders: {}", e);
                    set.shutdown(backend);
                    return Err(e);
                }
            }
        }
        log::debug!("shaders: {} programs linked", set.programs.len());
        // create_program left an arbitrary program bound
        set.current = None;
        Ok(set)
    }

    pub fn program(&self, kind: ProgramKind) -> Option<ProgramHandle> {
        self.programs.get(&kind).copied()
    }

    pub fn len(&self) -> usize {
        self.programs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.programs.is_empty()
    }

    /// Binds `kind` unless it already is the current program.
    pub fn use_program(&mut self, backend: &mut dyn RenderBackend, kind: ProgramKind) {
        let Some(program) = self.program(kind) else {
            return;
        };
        if self.current != Some(program) {
            self.current = Some(program);
            backend.use_program(program);
        }
    }

    /// Forgets the current binding, e.g. after a backend reset.
    pub fn invalidate(&mut self) {
        self.current = None;
    }

    pub fn shutdown(&mut self, backend: &mut dyn RenderBackend) {
        for (_, program) in self.programs.drain() {
            backend.delete_program(program);
        }
        self.current = None;
    }
}

fn create_program(backend: &mut dyn RenderBackend, desc: &ProgramDesc) -> Result<ProgramHandle, ShaderError> {
    let name = desc.kind.name();
    let vertex = stage_source(desc.defines, desc.vertex);
    let fragment = stage_source(desc.defines, desc.fragment);

    let program = backend.compile_program(name, &vertex, &fragment, &ATTRIBUTES)?;
    if let Err(e) = check_uniform_blocks(backend, program, name, desc.required) {
        backend.delete_program(program);
        return Err(e);
    }

    if !desc.samplers.is_empty() {
        backend.use_program(program);
        for (sampler, unit) in desc.samplers {
            backend.set_uniform(sampler, UniformValue::Int(*unit));
        }
    }
    Ok(program)
}
