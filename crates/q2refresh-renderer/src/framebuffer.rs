// framebuffer.rs — pooled offscreen render targets
// Converted from: src/client/refresh/gl3/gl3_framebuffer.c

use log::debug;

use crate::backend::{FramebufferDesc, FramebufferFlags, FramebufferHandle, RenderBackend};

/// Frames an unused framebuffer may sit in the pool before it is destroyed.
pub const MAX_IDLE_FRAMES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Usage {
    Free,
    InUse,
    /// freed at the end of the frame
    Deferred,
}

#[derive(Debug, Clone)]
struct PooledFramebuffer {
    handle: FramebufferHandle,
    desc: FramebufferDesc,
    usage: Usage,
    idle_frames: u32,
}

/// Borrowed render target. Carries its description so passes can size
/// their viewport without asking the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Framebuffer {
    pub handle: FramebufferHandle,
    pub desc: FramebufferDesc,
}

impl Framebuffer {
    pub fn width(&self) -> i32 {
        self.desc.width
    }

    pub fn height(&self) -> i32 {
        self.desc.height
    }

    pub fn has_depth(&self) -> bool {
        self.desc.flags.contains(FramebufferFlags::DEPTH)
    }
}

/// Binds `fb`, sets the viewport to its size and clears it. Depth is only
/// cleared on targets with a depth attachment.
pub fn bind_framebuffer(backend: &mut dyn RenderBackend, fb: &Framebuffer, clear_color: [f32; 4]) {
    backend.bind_framebuffer(Some(fb.handle));
    backend.set_viewport(0, 0, fb.width(), fb.height());
    backend.clear(Some(clear_color), fb.has_depth());
}

/// Back to the default framebuffer with the refdef viewport.
pub fn unbind_framebuffer(backend: &mut dyn RenderBackend, width: i32, height: i32) {
    backend.bind_framebuffer(None);
    backend.set_viewport(0, 0, width, height);
}

/// Growable pool of render targets, matched by exact description.
#[derive(Debug, Default)]
pub struct FramebufferPool {
    entries: Vec<PooledFramebuffer>,
}

impl FramebufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn in_use(&self) -> usize {
        self.entries.iter().filter(|e| e.usage != Usage::Free).count()
    }

    /// Hands out an unused framebuffer matching `desc`, creating one on a miss.
    pub fn borrow(&mut self, backend: &mut dyn RenderBackend, desc: FramebufferDesc, name: &str) -> Framebuffer {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.usage == Usage::Free && e.desc == desc) {
            entry.usage = Usage::InUse;
            entry.idle_frames = 0;
            return Framebuffer { handle: entry.handle, desc };
        }

        let handle = backend.create_framebuffer(&desc, name);
        debug!(
            "framebuffer pool: created {} {}x{} ({} color, {:?}), {} pooled",
            name,
            desc.width,
            desc.height,
            desc.color_textures,
            desc.flags,
            self.entries.len() + 1
        );
        self.entries.push(PooledFramebuffer { handle, desc, usage: Usage::InUse, idle_frames: 0 });
        Framebuffer { handle, desc }
    }

    /// Makes `fb` available again within this frame.
    pub fn give_back(&mut self, fb: &Framebuffer) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.handle == fb.handle) {
            entry.usage = Usage::Free;
        }
    }

    /// Keeps `fb` reserved until `end_frame`.
    pub fn defer_give_back(&mut self, fb: &Framebuffer) {
        if let Some(entry) = self.entries.iter_mut().find(|e| e.handle == fb.handle) {
            entry.usage = Usage::Deferred;
        }
    }

    /// Ages idle framebuffers, releases deferred ones and destroys those idle
    /// for more than MAX_IDLE_FRAMES frames.
    pub fn end_frame(&mut self, backend: &mut dyn RenderBackend) {
        for entry in &mut self.entries {
            match entry.usage {
                Usage::Free => entry.idle_frames += 1,
                Usage::Deferred => {
                    entry.usage = Usage::Free;
                    entry.idle_frames = 0;
                }
                Usage::InUse => {}
            }
        }

        self.entries.retain(|entry| {
            if entry.usage == Usage::Free && entry.idle_frames > MAX_IDLE_FRAMES {
                debug!(
                    "framebuffer pool: evicting {}x{} after {} idle frames",
                    entry.desc.width, entry.desc.height, entry.idle_frames
                );
                backend.destroy_framebuffer(entry.handle);
                false
            } else {
                true
            }
        });
    }

    pub fn destroy_all(&mut self, backend: &mut dyn RenderBackend) {
        for entry in self.entries.drain(..) {
            backend.destroy_framebuffer(entry.handle);
        }
    }
}
