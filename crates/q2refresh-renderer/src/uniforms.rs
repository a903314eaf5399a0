// uniforms.rs — std140 uniform block mirrors and the buffer update path
// Converted from: src/client/refresh/gl3/header/local.h
//
// Every struct here must match its `layout (std140) uniform` block in
// shaders/common*.glsl byte for byte. The shader layer checks the sizes the
// driver reports against `host_block_size` when a program is linked.

use bytemuck::{Pod, Zeroable};

use crate::backend::{BufferHandle, RenderBackend};
use crate::matrix::{Mat4, IDENTITY};

pub const MAX_DLIGHTS: usize = 32;
pub const MAX_LIGHTSTYLES: usize = 256;
pub const SSAO_KERNEL_SIZE: usize = 64;

/// Uniform block binding points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum UniformBlock {
    Common = 0,
    TwoD = 1,
    ThreeD = 2,
    Lights = 3,
    Styles = 4,
    Ssao = 5,
}

impl UniformBlock {
    pub const ALL: [UniformBlock; 6] = [
        UniformBlock::Common,
        UniformBlock::TwoD,
        UniformBlock::ThreeD,
        UniformBlock::Lights,
        UniformBlock::Styles,
        UniformBlock::Ssao,
    ];

    /// Block name as declared in GLSL.
    pub fn name(self) -> &'static str {
        match self {
            UniformBlock::Common => "uniCommon",
            UniformBlock::TwoD => "uni2D",
            UniformBlock::ThreeD => "uni3D",
            UniformBlock::Lights => "uniLights",
            UniformBlock::Styles => "uniStyles",
            UniformBlock::Ssao => "uniSSAO",
        }
    }

    pub fn binding(self) -> u32 {
        self as u32
    }

    pub fn host_size(self) -> usize {
        match self {
            UniformBlock::Common => std::mem::size_of::<UniCommon>(),
            UniformBlock::TwoD => std::mem::size_of::<Uni2D>(),
            UniformBlock::ThreeD => std::mem::size_of::<Uni3D>(),
            UniformBlock::Lights => std::mem::size_of::<UniLights>(),
            UniformBlock::Styles => std::mem::size_of::<UniStyles>(),
            UniformBlock::Ssao => std::mem::size_of::<UniSsao>(),
        }
    }
}

/// Host struct size for a block name.
pub fn host_block_size(name: &str) -> Option<usize> {
    UniformBlock::ALL.iter().find(|b| b.name() == name).map(|b| b.host_size())
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct UniCommon {
    pub gamma: f32,
    pub intensity: f32,
    /// for HUD, menu etc
    pub intensity_2d: f32,
    pub _pad: f32,
    /// for flashes etc
    pub color: [f32; 4],
}

impl Default for UniCommon {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            intensity: 1.0,
            intensity_2d: 1.0,
            _pad: 0.0,
            color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Uni2D {
    pub trans_mat: Mat4,
}

impl Default for Uni2D {
    fn default() -> Self {
        Self { trans_mat: IDENTITY }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct Uni3D {
    pub trans_proj: Mat4,
    pub trans_view: Mat4,
    pub trans_model: Mat4,

    pub scroll: f32,
    /// for warping surfaces like water
    pub time: f32,
    /// for translucent surfaces
    pub alpha: f32,
    /// for light surfaces
    pub emission: f32,
    pub overbrightbits: f32,
    pub particle_fade_factor: f32,
    /// 1 when the SSAO map should modulate the lightmap
    pub ssao: f32,
    pub _pad: f32,

    /// rgb color, w density
    pub fog_params: [f32; 4],
}

impl Default for Uni3D {
    fn default() -> Self {
        Self {
            trans_proj: IDENTITY,
            trans_view: IDENTITY,
            trans_model: IDENTITY,
            scroll: 0.0,
            time: 0.0,
            alpha: 1.0,
            emission: 0.0,
            overbrightbits: 1.0,
            particle_fade_factor: 1.0,
            ssao: 0.0,
            _pad: 0.0,
            fog_params: [0.0; 4],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct UniDynLight {
    pub origin: [f32; 3],
    pub _pad: f32,
    /// .a is intensity; this way it also works on OSX
    pub color: [f32; 4],
    /// texel size xy, fade z (0 shadowed, 1 unshadowed)
    pub shadow_parameters: [f32; 4],
    /// row 0 atlas scale/offset, row 1 (zoom, q, r, -)
    pub shadow_matrix: Mat4,
}

impl Default for UniDynLight {
    fn default() -> Self {
        Self {
            origin: [0.0; 3],
            _pad: 0.0,
            color: [0.0; 4],
            shadow_parameters: [0.0, 0.0, 1.0, 0.0],
            shadow_matrix: IDENTITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct UniLights {
    pub dyn_lights: [UniDynLight; MAX_DLIGHTS],
    pub num_dyn_lights: u32,
    pub _pad: [u32; 3],
}

impl Default for UniLights {
    fn default() -> Self {
        Self {
            dyn_lights: [UniDynLight::default(); MAX_DLIGHTS],
            num_dyn_lights: 0,
            _pad: [0; 3],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct UniStyles {
    pub lightstyles: [[f32; 4]; MAX_LIGHTSTYLES],
}

impl Default for UniStyles {
    fn default() -> Self {
        Self { lightstyles: [[1.0; 4]; MAX_LIGHTSTYLES] }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct UniSsao {
    pub kernel: [[f32; 4]; SSAO_KERNEL_SIZE],
}

impl Default for UniSsao {
    fn default() -> Self {
        Self { kernel: [[0.0; 4]; SSAO_KERNEL_SIZE] }
    }
}

/// Host copies of every block plus the buffers they live in.
#[derive(Debug)]
pub struct UniformBuffers {
    pub common: UniCommon,
    pub two_d: Uni2D,
    pub three_d: Uni3D,
    pub lights: UniLights,
    pub styles: UniStyles,
    pub ssao: UniSsao,
    buffers: [BufferHandle; 6],
    current: Option<BufferHandle>,
}

impl UniformBuffers {
    /// Creates one buffer per block, filled with the initial contents.
    pub fn new(backend: &mut dyn RenderBackend, common: UniCommon, three_d: Uni3D) -> Self {
        let mut buffers = [BufferHandle::default(); 6];
        for (i, block) in UniformBlock::ALL.iter().enumerate() {
            buffers[i] = backend.create_uniform_buffer(block.binding(), block.host_size());
        }
        let mut ubos = Self {
            common,
            two_d: Uni2D::default(),
            three_d,
            lights: UniLights::default(),
            styles: UniStyles::default(),
            ssao: UniSsao::default(),
            buffers,
            current: None,
        };
        for block in UniformBlock::ALL {
            ubos.update(backend, block);
        }
        ubos
    }

    pub fn buffer(&self, block: UniformBlock) -> BufferHandle {
        self.buffers[block as usize]
    }

    fn bytes(&self, block: UniformBlock) -> &[u8] {
        match block {
            UniformBlock::Common => bytemuck::bytes_of(&self.common),
            UniformBlock::TwoD => bytemuck::bytes_of(&self.two_d),
            UniformBlock::ThreeD => bytemuck::bytes_of(&self.three_d),
            UniformBlock::Lights => bytemuck::bytes_of(&self.lights),
            UniformBlock::Styles => bytemuck::bytes_of(&self.styles),
            UniformBlock::Ssao => bytemuck::bytes_of(&self.ssao),
        }
    }

    /// Pushes the whole host struct. The buffer is only re-bound when it is
    /// not the current one; the upload itself always happens.
    pub fn update(&mut self, backend: &mut dyn RenderBackend, block: UniformBlock) {
        let buffer = self.buffer(block);
        if self.current != Some(buffer) {
            backend.bind_uniform_buffer(buffer);
            self.current = Some(buffer);
        }
        backend.upload_uniform_buffer(buffer, self.bytes(block));
    }

    pub fn shutdown(&mut self, backend: &mut dyn RenderBackend) {
        for buffer in self.buffers {
            backend.delete_uniform_buffer(buffer);
        }
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, RecordingBackend};

    #[test]
    fn test_std140_sizes() {
        assert_eq!(std::mem::size_of::<UniCommon>(), 32);
        assert_eq!(std::mem::size_of::<Uni2D>(), 64);
        assert_eq!(std::mem::size_of::<Uni3D>(), 240);
        assert_eq!(std::mem::size_of::<UniDynLight>(), 112);
        assert_eq!(std::mem::size_of::<UniLights>(), 3600);
        assert_eq!(std::mem::size_of::<UniStyles>(), 4096);
        assert_eq!(std::mem::size_of::<UniSsao>(), 1024);
    }

    #[test]
    fn test_host_block_size_lookup() {
        assert_eq!(host_block_size("uni3D"), Some(240));
        assert_eq!(host_block_size("uniSSAO"), Some(1024));
        assert_eq!(host_block_size("uniNope"), None);
    }

    #[test]
    fn test_update_binds_once_and_always_uploads() {
        let mut be = RecordingBackend::new();
        let mut ubos = UniformBuffers::new(&mut be, UniCommon::default(), Uni3D::default());
        be.clear_calls();

        ubos.three_d.time = 1.5;
        ubos.update(&mut be, UniformBlock::ThreeD);
        ubos.update(&mut be, UniformBlock::ThreeD);

        let binds = be.count(|c| matches!(c, BackendCall::BindUniformBuffer(_)));
        let uploads = be.count(|c| matches!(c, BackendCall::UploadUniformBuffer { size: 240, .. }));
        assert_eq!(binds, 1);
        assert_eq!(uploads, 2);

        let stored = &be.buffer_contents[&ubos.buffer(UniformBlock::ThreeD)];
        let back: Uni3D = bytemuck::pod_read_unaligned(stored);
        assert_eq!(back.time, 1.5);
    }

    #[test]
    fn test_switching_blocks_rebinds() {
        let mut be = RecordingBackend::new();
        let mut ubos = UniformBuffers::new(&mut be, UniCommon::default(), Uni3D::default());
        be.clear_calls();
        ubos.update(&mut be, UniformBlock::Common);
        ubos.update(&mut be, UniformBlock::ThreeD);
        ubos.update(&mut be, UniformBlock::Common);
        assert_eq!(be.count(|c| matches!(c, BackendCall::BindUniformBuffer(_))), 3);
    }
}
