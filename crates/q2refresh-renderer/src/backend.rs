// backend.rs — the seam between the refresh and the graphics API
//
// Everything the refresh needs from the GPU goes through `RenderBackend`.
// Handles are opaque; the backend owns the actual API objects.

use std::collections::HashMap;

use bitflags::bitflags;

use crate::error::ShaderError;
use crate::matrix::Mat4;
use crate::model_types::WorldVertex;
use crate::uniforms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct ProgramHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct BufferHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct TextureHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
pub struct FramebufferHandle(pub u32);

bitflags! {
    /// Capabilities of an offscreen render target.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FramebufferFlags: u32 {
        const FILTERED     = 1;
        const MULTISAMPLED = 2;
        const HDR          = 4;
        const DEPTH        = 8;
        const SHADOWMAP    = 16;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FramebufferDesc {
    pub width: i32,
    pub height: i32,
    pub color_textures: usize,
    pub flags: FramebufferFlags,
    /// only meaningful with MULTISAMPLED
    pub samples: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Rgba8,
    Rgba32F,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: i32,
    pub height: i32,
    pub format: TextureFormat,
    /// six faces in +X -X +Y -Y +Z -Z order, packed back to back
    pub cube: bool,
    pub repeat: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Off,
    /// src * a + dst * (1 - a)
    Alpha,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UniformValue {
    Int(i32),
    Float(f32),
    Vec2([f32; 2]),
    Vec4([f32; 4]),
    Mat4(Mat4),
}

/// Debug overlay vertex.
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct DebugVertex {
    pub pos: [f32; 3],
    pub color: [f32; 4],
}

pub trait RenderBackend {
    // programs

    /// Compiles and links a program, binding `attribs` to fixed slots before linking.
    fn compile_program(
        &mut self,
        name: &str,
        vertex_src: &str,
        fragment_src: &str,
        attribs: &[(&str, u32)],
    ) -> Result<ProgramHandle, ShaderError>;
    /// Driver-reported byte size of a uniform block, None if the program has no such block.
    fn uniform_block_size(&self, program: ProgramHandle, block: &str) -> Option<usize>;
    fn bind_uniform_block(&mut self, program: ProgramHandle, block: &str, binding: u32);
    fn delete_program(&mut self, program: ProgramHandle);
    fn use_program(&mut self, program: ProgramHandle);
    /// Sets a loose uniform on the currently used program; unknown names are ignored.
    fn set_uniform(&mut self, name: &str, value: UniformValue);

    // uniform buffers

    fn create_uniform_buffer(&mut self, binding: u32, size: usize) -> BufferHandle;
    fn bind_uniform_buffer(&mut self, buffer: BufferHandle);
    /// Replaces the whole content of the currently bound buffer.
    fn upload_uniform_buffer(&mut self, buffer: BufferHandle, data: &[u8]);
    fn delete_uniform_buffer(&mut self, buffer: BufferHandle);

    // textures and geometry

    fn create_texture(&mut self, desc: &TextureDesc, data: &[u8]) -> TextureHandle;
    fn delete_texture(&mut self, texture: TextureHandle);
    fn bind_texture(&mut self, unit: u32, texture: TextureHandle);
    fn upload_lightmap(&mut self, page: usize, layer: usize, width: i32, height: i32, data: &[u8]);
    fn bind_lightmap(&mut self, page: usize);
    fn upload_world_vertices(&mut self, vertices: &[WorldVertex]);
    fn draw_world_indexed(&mut self, indices: &[u32]);
    fn draw_lines(&mut self, vertices: &[DebugVertex], indices: &[u16]);
    fn draw_fullscreen_quad(&mut self);

    // render targets

    fn create_framebuffer(&mut self, desc: &FramebufferDesc, name: &str) -> FramebufferHandle;
    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle);
    /// None binds the default framebuffer.
    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>);
    fn clear(&mut self, color: Option<[f32; 4]>, depth: bool);
    fn bind_framebuffer_texture(&mut self, unit: u32, framebuffer: FramebufferHandle, index: usize);
    fn bind_framebuffer_depth(&mut self, unit: u32, framebuffer: FramebufferHandle);
    fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32);
    /// Restricts drawing and clears to a rectangle; None lifts it.
    fn set_scissor(&mut self, rect: Option<[i32; 4]>);
    fn set_depth_test(&mut self, enabled: bool, write: bool);
    fn set_blend(&mut self, mode: BlendMode);
}

// ============================================================================
// Headless backend
// ============================================================================

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    CompileProgram { name: String, program: ProgramHandle },
    BindUniformBlock { program: ProgramHandle, block: String, binding: u32 },
    DeleteProgram(ProgramHandle),
    UseProgram(ProgramHandle),
    SetUniform { name: String, value: UniformValue },
    CreateUniformBuffer { buffer: BufferHandle, binding: u32, size: usize },
    BindUniformBuffer(BufferHandle),
    UploadUniformBuffer { buffer: BufferHandle, size: usize },
    DeleteUniformBuffer(BufferHandle),
    CreateTexture { texture: TextureHandle, desc: TextureDesc },
    DeleteTexture(TextureHandle),
    BindTexture { unit: u32, texture: TextureHandle },
    UploadLightmap { page: usize, layer: usize },
    BindLightmap(usize),
    UploadWorldVertices(usize),
    DrawWorldIndexed(Vec<u32>),
    DrawLines { vertices: usize, indices: usize },
    DrawFullscreenQuad,
    CreateFramebuffer { framebuffer: FramebufferHandle, desc: FramebufferDesc, name: String },
    DestroyFramebuffer(FramebufferHandle),
    BindFramebuffer(Option<FramebufferHandle>),
    Clear { color: Option<[f32; 4]>, depth: bool },
    BindFramebufferTexture { unit: u32, framebuffer: FramebufferHandle, index: usize },
    BindFramebufferDepth { unit: u32, framebuffer: FramebufferHandle },
    SetViewport(i32, i32, i32, i32),
    SetScissor(Option<[i32; 4]>),
    SetDepthTest { enabled: bool, write: bool },
    SetBlend(BlendMode),
}

/// Backend that performs no GPU work and records every call. Uniform block
/// sizes are answered from the host structs, so the full shader set links.
#[derive(Debug, Default)]
pub struct RecordingBackend {
    pub calls: Vec<BackendCall>,
    /// per block-name overrides of the reported size
    pub block_size_overrides: HashMap<String, usize>,
    /// program name whose compile fails
    pub fail_compile: Option<String>,
    /// name and concatenated source per live program
    programs: HashMap<ProgramHandle, (String, String)>,
    /// last uploaded bytes per buffer
    pub buffer_contents: HashMap<BufferHandle, Vec<u8>>,
    next_handle: u32,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&mut self) -> u32 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Index lists of every world draw, in submission order.
    pub fn world_draws(&self) -> Vec<&[u32]> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                BackendCall::DrawWorldIndexed(indices) => Some(indices.as_slice()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, pred: impl Fn(&BackendCall) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn program_name(&self, program: ProgramHandle) -> Option<&str> {
        self.programs.get(&program).map(|(name, _)| name.as_str())
    }
}

impl RenderBackend for RecordingBackend {
    fn compile_program(
        &mut self,
        name: &str,
        vertex_src: &str,
        fragment_src: &str,
        _attribs: &[(&str, u32)],
    ) -> Result<ProgramHandle, ShaderError> {
        if self.fail_compile.as_deref() == Some(name) {
            return Err(ShaderError::Compile {
                name: name.to_string(),
                log: "0:1(1): error: recording backend refused".to_string(),
            });
        }
        let program = ProgramHandle(self.next());
        let mut source = String::with_capacity(vertex_src.len() + fragment_src.len());
        source.push_str(vertex_src);
        source.push_str(fragment_src);
        self.programs.insert(program, (name.to_string(), source));
        self.calls.push(BackendCall::CompileProgram { name: name.to_string(), program });
        Ok(program)
    }

    fn uniform_block_size(&self, program: ProgramHandle, block: &str) -> Option<usize> {
        let (_, source) = self.programs.get(&program)?;
        if !source.contains(&format!("uniform {}", block)) {
            return None;
        }
        if let Some(&size) = self.block_size_overrides.get(block) {
            return Some(size);
        }
        uniforms::host_block_size(block)
    }

    fn bind_uniform_block(&mut self, program: ProgramHandle, block: &str, binding: u32) {
        self.calls.push(BackendCall::BindUniformBlock { program, block: block.to_string(), binding });
    }

    fn delete_program(&mut self, program: ProgramHandle) {
        self.programs.remove(&program);
        self.calls.push(BackendCall::DeleteProgram(program));
    }

    fn use_program(&mut self, program: ProgramHandle) {
        self.calls.push(BackendCall::UseProgram(program));
    }

    fn set_uniform(&mut self, name: &str, value: UniformValue) {
        self.calls.push(BackendCall::SetUniform { name: name.to_string(), value });
    }

    fn create_uniform_buffer(&mut self, binding: u32, size: usize) -> BufferHandle {
        let buffer = BufferHandle(self.next());
        self.calls.push(BackendCall::CreateUniformBuffer { buffer, binding, size });
        buffer
    }

    fn bind_uniform_buffer(&mut self, buffer: BufferHandle) {
        self.calls.push(BackendCall::BindUniformBuffer(buffer));
    }

    fn upload_uniform_buffer(&mut self, buffer: BufferHandle, data: &[u8]) {
        self.buffer_contents.insert(buffer, data.to_vec());
        self.calls.push(BackendCall::UploadUniformBuffer { buffer, size: data.len() });
    }

    fn delete_uniform_buffer(&mut self, buffer: BufferHandle) {
        self.buffer_contents.remove(&buffer);
        self.calls.push(BackendCall::DeleteUniformBuffer(buffer));
    }

    fn create_texture(&mut self, desc: &TextureDesc, _data: &[u8]) -> TextureHandle {
        let texture = TextureHandle(self.next());
        self.calls.push(BackendCall::CreateTexture { texture, desc: *desc });
        texture
    }

    fn delete_texture(&mut self, texture: TextureHandle) {
        self.calls.push(BackendCall::DeleteTexture(texture));
    }

    fn bind_texture(&mut self, unit: u32, texture: TextureHandle) {
        self.calls.push(BackendCall::BindTexture { unit, texture });
    }

    fn upload_lightmap(&mut self, page: usize, layer: usize, _width: i32, _height: i32, _data: &[u8]) {
        self.calls.push(BackendCall::UploadLightmap { page, layer });
    }

    fn bind_lightmap(&mut self, page: usize) {
        self.calls.push(BackendCall::BindLightmap(page));
    }

    fn upload_world_vertices(&mut self, vertices: &[WorldVertex]) {
        self.calls.push(BackendCall::UploadWorldVertices(vertices.len()));
    }

    fn draw_world_indexed(&mut self, indices: &[u32]) {
        self.calls.push(BackendCall::DrawWorldIndexed(indices.to_vec()));
    }

    fn draw_lines(&mut self, vertices: &[DebugVertex], indices: &[u16]) {
        self.calls.push(BackendCall::DrawLines { vertices: vertices.len(), indices: indices.len() });
    }

    fn draw_fullscreen_quad(&mut self) {
        self.calls.push(BackendCall::DrawFullscreenQuad);
    }

    fn create_framebuffer(&mut self, desc: &FramebufferDesc, name: &str) -> FramebufferHandle {
        let framebuffer = FramebufferHandle(self.next());
        self.calls.push(BackendCall::CreateFramebuffer { framebuffer, desc: *desc, name: name.to_string() });
        framebuffer
    }

    fn destroy_framebuffer(&mut self, framebuffer: FramebufferHandle) {
        self.calls.push(BackendCall::DestroyFramebuffer(framebuffer));
    }

    fn bind_framebuffer(&mut self, framebuffer: Option<FramebufferHandle>) {
        self.calls.push(BackendCall::BindFramebuffer(framebuffer));
    }

    fn clear(&mut self, color: Option<[f32; 4]>, depth: bool) {
        self.calls.push(BackendCall::Clear { color, depth });
    }

    fn bind_framebuffer_texture(&mut self, unit: u32, framebuffer: FramebufferHandle, index: usize) {
        self.calls.push(BackendCall::BindFramebufferTexture { unit, framebuffer, index });
    }

    fn bind_framebuffer_depth(&mut self, unit: u32, framebuffer: FramebufferHandle) {
        self.calls.push(BackendCall::BindFramebufferDepth { unit, framebuffer });
    }

    fn set_viewport(&mut self, x: i32, y: i32, width: i32, height: i32) {
        self.calls.push(BackendCall::SetViewport(x, y, width, height));
    }

    fn set_scissor(&mut self, rect: Option<[i32; 4]>) {
        self.calls.push(BackendCall::SetScissor(rect));
    }

    fn set_depth_test(&mut self, enabled: bool, write: bool) {
        self.calls.push(BackendCall::SetDepthTest { enabled, write });
    }

    fn set_blend(&mut self, mode: BlendMode) {
        self.calls.push(BackendCall::SetBlend(mode));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_block_size_needs_declaration() {
        let mut be = RecordingBackend::new();
        let p = be
            .compile_program("t", "layout (std140) uniform uniCommon { vec4 x; };", "void main() {}", &[])
            .unwrap();
        assert_eq!(be.uniform_block_size(p, "uniCommon"), uniforms::host_block_size("uniCommon"));
        assert_eq!(be.uniform_block_size(p, "uni3D"), None);

        be.block_size_overrides.insert("uniCommon".to_string(), 12);
        assert_eq!(be.uniform_block_size(p, "uniCommon"), Some(12));
    }

    #[test]
    fn test_recording_forced_compile_failure() {
        let mut be = RecordingBackend::new();
        be.fail_compile = Some("bad".to_string());
        assert!(matches!(be.compile_program("bad", "", "", &[]), Err(ShaderError::Compile { .. })));
        assert!(be.compile_program("good", "", "", &[]).is_ok());
    }

    #[test]
    fn test_handles_are_unique() {
        let mut be = RecordingBackend::new();
        let desc = FramebufferDesc {
            width: 4,
            height: 4,
            color_textures: 1,
            flags: FramebufferFlags::empty(),
            samples: 0,
        };
        let a = be.create_framebuffer(&desc, "a");
        let b = be.create_framebuffer(&desc, "b");
        assert_ne!(a, b);
        assert_eq!(be.count(|c| matches!(c, BackendCall::CreateFramebuffer { .. })), 2);
    }
}
