// error.rs — error types surfaced by the refresh

use thiserror::Error;

/// Fatal problems while loading or registering a model.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Mod_ForName: NULL name")]
    EmptyName,
    #[error("{0} not found")]
    NotFound(String),
    #[error("{name} has wrong version number ({version} should be {expected})")]
    BadVersion { name: String, version: i32, expected: i32 },
    #[error("{0}: unsupported extended BSP format")]
    UnsupportedFormat(String),
    #[error("{0}: unsupported unknown BSP format")]
    UnknownFormat(String),
    #[error("{0}: file too short for a BSP header")]
    Truncated(String),
    #[error("Mod_LoadBmodel: funny lump size in {name} (lump {lump})")]
    FunnyLumpSize { name: String, lump: usize },
    #[error("Mod_LoadBmodel: lump {lump} in {name} lies outside the file")]
    LumpOutOfRange { name: String, lump: usize },
    #[error("{what}: bad index {index} in {name}")]
    BadIndex { name: String, what: &'static str, index: i64 },
    #[error("Mod_LoadLeafs: wrong marksurfaces position in {0}")]
    BadMarkSurfaces(String),
    #[error("Bad surface extents in {0}")]
    BadSurfaceExtents(String),
    #[error("Mod_LoadFaces: surface with {numedges} edges in {name}")]
    DegenerateFace { name: String, numedges: i32 },
    #[error("Loaded a brush model after the world")]
    BrushAfterWorld,
    #[error("bad inline model number {0}")]
    BadInlineModel(i32),
    #[error("mod_numknown == MAX_MOD_KNOWN")]
    TableFull,
    #[error("{name}: arena overflow ({requested} bytes requested, {available} available)")]
    ArenaOverflow { name: String, requested: usize, available: usize },
    #[error("SubdividePolygon: too many vertices ({0})")]
    TooManyVerts(usize),
    #[error("LM_AllocBlock: full")]
    LightmapsFull,
}

/// Shader program creation failures. All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ShaderError {
    #[error("compiling shader {name} failed: {log}")]
    Compile { name: String, log: String },
    #[error("linking shader program {name} failed: {log}")]
    Link { name: String, log: String },
    #[error("{program}: uniform block {block} has size {driver} on the GPU but {host} on the host")]
    BlockSizeMismatch { program: String, block: &'static str, driver: usize, host: usize },
    #[error("{program}: required uniform block {block} not found")]
    MissingBlock { program: String, block: &'static str },
}

/// Umbrella error for renderer entry points.
#[derive(Debug, Error)]
pub enum RefError {
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Shader(#[from] ShaderError),
    #[error("no world model loaded")]
    NoWorld,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let e = ModelError::FunnyLumpSize { name: "maps/q2dm1.bsp".into(), lump: 6 };
        assert_eq!(e.to_string(), "Mod_LoadBmodel: funny lump size in maps/q2dm1.bsp (lump 6)");
        let r: RefError = ShaderError::MissingBlock { program: "3Dlm".into(), block: "uni3D" }.into();
        assert!(r.to_string().contains("uni3D"));
    }
}
