// postfx.rs — offscreen scene target and the full screen pass chain
// Converted from: src/client/refresh/gl3/gl3_postfx.c
//
// The scene is rendered into a pooled framebuffer. After it, each enabled stage
// reads the previous stage's output:
//
//     resolve (msaa) -> bloom -> tonemap + gamma -> motion blur -> underwater
//
// and the last one writes to the default framebuffer. SSAO runs before the
// scene and leaves its result for the lightmap pass.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::backend::{
    BlendMode, FramebufferDesc, FramebufferFlags, RenderBackend, TextureDesc, TextureFormat, TextureHandle,
    UniformValue,
};
use crate::config::RefSettings;
use crate::framebuffer::{bind_framebuffer, unbind_framebuffer, Framebuffer, FramebufferPool};
use crate::matrix::{mat4_invert, Mat4, IDENTITY};
use crate::shaders::{ProgramKind, ShaderSet};
use crate::uniforms::{UniformBlock, UniformBuffers, SSAO_KERNEL_SIZE};

pub const BLOOM_PASSES: usize = 10;
pub const SSAO_NOISE_SIZE: i32 = 4;

const SSAO_SEED: u64 = 0x5353_414f;
const CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

/// Hemisphere sample offsets, denser close to the origin.
pub fn ssao_kernel(seed: u64) -> [[f32; 4]; SSAO_KERNEL_SIZE] {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut kernel = [[0.0; 4]; SSAO_KERNEL_SIZE];
    for (i, k) in kernel.iter_mut().enumerate() {
        let mut v = [rng.gen::<f32>() * 2.0 - 1.0, rng.gen::<f32>() * 2.0 - 1.0, rng.gen::<f32>()];
        let len = (v[0] * v[0] + v[1] * v[1] + v[2] * v[2]).sqrt();
        if len > 0.0 {
            v.iter_mut().for_each(|c| *c /= len);
        }

        let t = i as f32 / SSAO_KERNEL_SIZE as f32;
        let scale = 0.1 + t * t * 0.9;
        let r = rng.gen::<f32>() * scale;
        *k = [v[0] * r, v[1] * r, v[2] * r, 0.0];
    }
    kernel
}

/// Random rotations around z, tiled over the screen.
pub fn ssao_noise(seed: u64) -> Vec<f32> {
    let mut rng = StdRng::seed_from_u64(seed);
    let texels = (SSAO_NOISE_SIZE * SSAO_NOISE_SIZE) as usize;
    let mut noise = Vec::with_capacity(texels * 4);
    for _ in 0..texels {
        noise.extend_from_slice(&[rng.gen::<f32>() * 2.0 - 1.0, rng.gen::<f32>() * 2.0 - 1.0, 0.0, 0.0]);
    }
    noise
}

fn target_desc(width: i32, height: i32, color_textures: usize, flags: FramebufferFlags) -> FramebufferDesc {
    FramebufferDesc { width, height, color_textures, flags, samples: 0 }
}

/// Per-frame inputs of the pass chain.
#[derive(Debug, Clone, Copy)]
pub struct PostFxFrame {
    pub width: i32,
    pub height: i32,
    pub time: f32,
    pub underwater: bool,
    pub blend: [f32; 4],
    /// projection * view of this frame
    pub view_proj: Mat4,
}

#[derive(Debug, Default)]
pub struct PostFx {
    noise: Option<TextureHandle>,
    scene: Option<Framebuffer>,
    ssao: Option<Framebuffer>,
    mask: Option<Framebuffer>,
    prev_view_proj: Option<Mat4>,
    /// borrowed during after_scene, given back at its end
    frame_targets: Vec<Framebuffer>,
}

impl PostFx {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uploads the SSAO kernel and creates the noise texture.
    pub fn init(&mut self, backend: &mut dyn RenderBackend, ubos: &mut UniformBuffers) {
        ubos.ssao.kernel = ssao_kernel(SSAO_SEED);
        ubos.update(backend, UniformBlock::Ssao);

        let noise = ssao_noise(SSAO_SEED + 1);
        let desc = TextureDesc {
            width: SSAO_NOISE_SIZE,
            height: SSAO_NOISE_SIZE,
            format: TextureFormat::Rgba32F,
            cube: false,
            repeat: true,
        };
        self.noise = Some(backend.create_texture(&desc, bytemuck::cast_slice(&noise)));
    }

    pub fn shutdown(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(noise) = self.noise.take() {
            backend.delete_texture(noise);
        }
        self.scene = None;
        self.ssao = None;
        self.mask = None;
        self.prev_view_proj = None;
        self.frame_targets.clear();
    }

    pub fn ssao_result(&self) -> Option<&Framebuffer> {
        self.ssao.as_ref()
    }

    // ========================================================================
    // SSAO
    // ========================================================================

    /// Binds a cleared position + normal target. The caller draws the opaque
    /// world into it with the SSAO geometry program, then calls `end_ssao`.
    pub fn begin_ssao(
        &mut self,
        backend: &mut dyn RenderBackend,
        pool: &mut FramebufferPool,
        width: i32,
        height: i32,
    ) -> Framebuffer {
        let desc = target_desc(width, height, 2, FramebufferFlags::HDR | FramebufferFlags::DEPTH);
        let geometry = pool.borrow(backend, desc, "ssaoGeometry");
        bind_framebuffer(backend, &geometry, [0.0; 4]);
        geometry
    }

    /// Occlusion from the geometry target, then the box blur. The blurred
    /// target stays reserved until the end of the frame.
    pub fn end_ssao(
        &mut self,
        backend: &mut dyn RenderBackend,
        pool: &mut FramebufferPool,
        shaders: &mut ShaderSet,
        geometry: Framebuffer,
        intensity: f32,
    ) {
        let (width, height) = (geometry.width(), geometry.height());
        backend.set_depth_test(false, false);

        let occlusion = pool.borrow(backend, target_desc(width, height, 1, FramebufferFlags::empty()), "ssao");
        bind_framebuffer(backend, &occlusion, [1.0; 4]);
        shaders.use_program(backend, ProgramKind::Ssao);
        backend.set_uniform(
            "noiseScale",
            UniformValue::Vec2([width as f32 / SSAO_NOISE_SIZE as f32, height as f32 / SSAO_NOISE_SIZE as f32]),
        );
        backend.set_uniform("radius", UniformValue::Float(4.0 * intensity));
        backend.bind_framebuffer_texture(0, geometry.handle, 0);
        backend.bind_framebuffer_texture(1, geometry.handle, 1);
        if let Some(noise) = self.noise {
            backend.bind_texture(2, noise);
        }
        backend.draw_fullscreen_quad();
        pool.give_back(&geometry);

        let blurred = pool.borrow(backend, target_desc(width, height, 1, FramebufferFlags::empty()), "ssaoBlur");
        bind_framebuffer(backend, &blurred, [1.0; 4]);
        shaders.use_program(backend, ProgramKind::SsaoBlur);
        backend.bind_framebuffer_texture(0, occlusion.handle, 0);
        backend.draw_fullscreen_quad();
        pool.give_back(&occlusion);

        pool.defer_give_back(&blurred);
        self.ssao = Some(blurred);
        backend.set_depth_test(true, true);
    }

    // ========================================================================
    // Scene
    // ========================================================================

    /// Borrows and binds the target the 3D scene is drawn into.
    pub fn begin_scene(
        &mut self,
        backend: &mut dyn RenderBackend,
        pool: &mut FramebufferPool,
        settings: &RefSettings,
        width: i32,
        height: i32,
    ) -> Framebuffer {
        let mut desc = target_desc(width, height, 1, FramebufferFlags::DEPTH);
        if settings.hdr || settings.bloom {
            desc.flags |= FramebufferFlags::HDR;
        }
        if settings.msaa_samples > 0 {
            desc.flags |= FramebufferFlags::MULTISAMPLED;
            desc.samples = settings.msaa_samples;
        }
        let scene = pool.borrow(backend, desc, "scene");
        bind_framebuffer(backend, &scene, CLEAR_COLOR);
        self.scene = Some(scene);
        scene
    }

    /// Binds a cleared mask target when motion blur is on. The caller draws
    /// the weapon model into it with the mask program.
    pub fn begin_weapon_mask(
        &mut self,
        backend: &mut dyn RenderBackend,
        pool: &mut FramebufferPool,
        settings: &RefSettings,
        width: i32,
        height: i32,
    ) -> Option<Framebuffer> {
        if settings.motionblur <= 0.0 {
            return None;
        }
        let mask = pool.borrow(backend, target_desc(width, height, 1, FramebufferFlags::DEPTH), "motionBlurMask");
        bind_framebuffer(backend, &mask, [0.0; 4]);
        pool.defer_give_back(&mask);
        self.mask = Some(mask);
        Some(mask)
    }

    /// Offscreen target for a stage that feeds another one, or the default
    /// framebuffer for the last stage.
    fn stage_target(
        &mut self,
        backend: &mut dyn RenderBackend,
        pool: &mut FramebufferPool,
        offscreen: bool,
        frame: &PostFxFrame,
        name: &str,
    ) -> Option<Framebuffer> {
        if !offscreen {
            unbind_framebuffer(backend, frame.width, frame.height);
            return None;
        }
        let fb = pool.borrow(backend, target_desc(frame.width, frame.height, 1, FramebufferFlags::empty()), name);
        bind_framebuffer(backend, &fb, CLEAR_COLOR);
        self.frame_targets.push(fb);
        Some(fb)
    }

    /// Runs the pass chain over the scene target and composites the result
    /// to the default framebuffer.
    pub fn after_scene(
        &mut self,
        backend: &mut dyn RenderBackend,
        pool: &mut FramebufferPool,
        shaders: &mut ShaderSet,
        ubos: &mut UniformBuffers,
        settings: &RefSettings,
        frame: &PostFxFrame,
    ) {
        let Some(scene) = self.scene.take() else {
            return;
        };
        self.frame_targets.push(scene);

        backend.set_depth_test(false, false);
        backend.set_blend(BlendMode::Off);

        let motion = settings.motionblur > 0.0;

        // color attachment 0 of `color` holds the image so far
        let mut color = scene;
        let mut depth = scene;

        if scene.desc.flags.contains(FramebufferFlags::MULTISAMPLED) {
            let flags = FramebufferFlags::DEPTH | (scene.desc.flags & FramebufferFlags::HDR);
            let resolved = pool.borrow(backend, target_desc(frame.width, frame.height, 1, flags), "resolve");
            self.frame_targets.push(resolved);
            bind_framebuffer(backend, &resolved, CLEAR_COLOR);

            // the resolve writes gl_FragDepth
            backend.set_depth_test(true, true);
            shaders.use_program(backend, ProgramKind::Resolve);
            backend.set_uniform("samples", UniformValue::Int(scene.desc.samples));
            backend.bind_framebuffer_texture(0, scene.handle, 0);
            backend.bind_framebuffer_depth(1, scene.handle);
            backend.draw_fullscreen_quad();
            backend.set_depth_test(false, false);

            color = resolved;
            depth = resolved;
        }

        let bloom = if settings.bloom {
            let flags = FramebufferFlags::FILTERED | FramebufferFlags::HDR;
            let mut ping = pool.borrow(backend, target_desc(frame.width, frame.height, 1, flags), "bloom0");
            let mut pong = pool.borrow(backend, target_desc(frame.width, frame.height, 1, flags), "bloom1");
            self.frame_targets.push(ping);
            self.frame_targets.push(pong);

            bind_framebuffer(backend, &ping, CLEAR_COLOR);
            shaders.use_program(backend, ProgramKind::BloomFilter);
            backend.set_uniform("threshold", UniformValue::Float(settings.bloom_threshold));
            backend.bind_framebuffer_texture(0, color.handle, 0);
            backend.draw_fullscreen_quad();

            shaders.use_program(backend, ProgramKind::BloomBlur);
            for pass in 0..BLOOM_PASSES {
                bind_framebuffer(backend, &pong, CLEAR_COLOR);
                backend.set_uniform("horizontal", UniformValue::Int((pass % 2 == 0) as i32));
                backend.bind_framebuffer_texture(0, ping.handle, 0);
                backend.draw_fullscreen_quad();
                std::mem::swap(&mut ping, &mut pong);
            }
            Some(ping)
        } else {
            None
        };

        // tonemap always runs, it applies gamma
        let tonemapped = self.stage_target(backend, pool, motion || frame.underwater, frame, "tonemap");
        shaders.use_program(backend, ProgramKind::Tonemap);
        backend.set_uniform(
            "bloomIntensity",
            UniformValue::Float(if bloom.is_some() { settings.bloom_intensity } else { 0.0 }),
        );
        backend.set_uniform("exposure", UniformValue::Float(settings.hdr_exposure));
        backend.set_uniform("mode", UniformValue::Int(settings.hdr_mode));
        backend.set_uniform("hdr", UniformValue::Int(settings.hdr as i32));
        backend.bind_framebuffer_texture(0, color.handle, 0);
        backend.bind_framebuffer_texture(1, bloom.unwrap_or(color).handle, 0);
        backend.draw_fullscreen_quad();
        if let Some(fb) = tonemapped {
            color = fb;
        }

        if motion {
            let mask = match self.mask {
                Some(mask) => mask,
                None => {
                    // nothing excluded
                    let mask = pool.borrow(
                        backend,
                        target_desc(frame.width, frame.height, 1, FramebufferFlags::DEPTH),
                        "motionBlurMask",
                    );
                    bind_framebuffer(backend, &mask, [0.0; 4]);
                    self.frame_targets.push(mask);
                    mask
                }
            };

            let blurred = self.stage_target(backend, pool, frame.underwater, frame, "motionBlur");
            shaders.use_program(backend, ProgramKind::MotionBlur);
            let inverse = mat4_invert(&frame.view_proj).unwrap_or(IDENTITY);
            let previous = self.prev_view_proj.unwrap_or(frame.view_proj);
            backend.set_uniform("invViewProj", UniformValue::Mat4(inverse));
            backend.set_uniform("prevViewProj", UniformValue::Mat4(previous));
            backend.set_uniform("numSamples", UniformValue::Int(settings.motionblur_samples));
            backend.bind_framebuffer_texture(0, color.handle, 0);
            backend.bind_framebuffer_depth(1, depth.handle);
            backend.bind_framebuffer_texture(2, mask.handle, 0);
            backend.draw_fullscreen_quad();
            if let Some(fb) = blurred {
                color = fb;
            }
        }

        if frame.underwater {
            unbind_framebuffer(backend, frame.width, frame.height);
            shaders.use_program(backend, ProgramKind::Underwater);
            backend.set_uniform("time", UniformValue::Float(frame.time));
            backend.set_uniform("blend", UniformValue::Vec4(frame.blend));
            backend.bind_framebuffer_texture(0, color.handle, 0);
            backend.draw_fullscreen_quad();
        } else if frame.blend[3] > 0.0 {
            draw_blend_overlay(backend, shaders, ubos, frame.blend);
        }

        self.prev_view_proj = Some(frame.view_proj);
        for fb in self.frame_targets.drain(..) {
            pool.give_back(&fb);
        }
        self.mask = None;
        self.ssao = None;

        backend.set_depth_test(true, true);
    }
}

/// Alpha blends `blend` over the whole default framebuffer.
fn draw_blend_overlay(
    backend: &mut dyn RenderBackend,
    shaders: &mut ShaderSet,
    ubos: &mut UniformBuffers,
    blend: [f32; 4],
) {
    backend.set_blend(BlendMode::Alpha);
    shaders.use_program(backend, ProgramKind::Blend);

    ubos.two_d.trans_mat = IDENTITY;
    ubos.update(backend, UniformBlock::TwoD);
    let saved = ubos.common.color;
    ubos.common.color = blend;
    ubos.update(backend, UniformBlock::Common);

    backend.draw_fullscreen_quad();

    ubos.common.color = saved;
    ubos.update(backend, UniformBlock::Common);
    backend.set_blend(BlendMode::Off);
}
