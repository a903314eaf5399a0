// shadow.rs — point light shadow maps packed into depth atlases
// Converted from: src/client/refresh/gl3/gl3_shadow.c
//
// Every admitted light owns a 3x2 grid of square cube faces in the frame atlas.
// Static lights additionally keep a baked copy in a larger static atlas and are
// blitted from there while the copy is valid.

use log::{debug, info};

use q2refresh_common::q_shared::{vector_subtract, Vec3};

use crate::area_alloc::{AreaAllocator, AreaRect};
use crate::backend::{
    FramebufferDesc, FramebufferFlags, FramebufferHandle, RenderBackend, TextureDesc, TextureFormat, TextureHandle,
    UniformValue,
};
use crate::config::RefSettings;
use crate::framebuffer::{bind_framebuffer, Framebuffer, FramebufferPool};
use crate::matrix::{depth_linearization, perspective, view_matrix, Mat4};
use crate::shaders::{TU_SHADOW_ADJUST, TU_SHADOW_ATLAS, TU_SHADOW_SELECT};
use crate::uniforms::{UniLights, MAX_DLIGHTS};
use crate::view::ViewParams;

pub const MAX_SHADOW_LIGHTS: usize = 32;
pub const MAX_STATIC_SHADOW_LIGHTS: usize = 256;
pub const DEFAULT_SHADOWMAP_SIZE: i32 = 512;
pub const SHADOW_ATLAS_SIZE: i32 = 4096;
pub const SHADOW_STATIC_ATLAS_SIZE: i32 = 8192;

const SHADOW_ATLAS_START_SIZE: i32 = 1024;

/// How a light's shadow is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ShadowMode {
    /// rendered every frame, entities included
    #[default]
    Dynamic,
    NoShadow,
    /// world only, baked once into the static atlas
    Static,
}

/// (pitch, yaw, roll) of each cube face, in +X -X +Y -Y +Z -Z order. The
/// rolls are tuned per face; the lookup textures are derived from this table.
pub const FACE_ANGLES: [Vec3; 6] = [
    [0.0, 0.0, 90.0],
    [0.0, 180.0, 90.0],
    [0.0, 90.0, 0.0],
    [0.0, 270.0, 0.0],
    [-90.0, 0.0, 90.0],
    [90.0, 0.0, 90.0],
];

/// Cell of face `face` inside the light's 3x2 grid.
pub fn face_cell(face: usize) -> (i32, i32) {
    ((face % 3) as i32, (face / 3) as i32)
}

/// Texels of the two face lookup cube maps, one per face.
///
/// `select.xyz` is the face's screen right axis in world space scaled to the
/// grid width, `.w` the cell centre in s. `adjust` holds the same for the up
/// axis and t. A direction `v` with largest component `major` lands at
/// `(dot(v, select.xyz), dot(v, adjust.xyz)) / major * zoom + (select.w, adjust.w)`.
pub fn face_lookup_tables() -> ([[f32; 4]; 6], [[f32; 4]; 6]) {
    let mut select = [[0.0; 4]; 6];
    let mut adjust = [[0.0; 4]; 6];
    for (face, angles) in FACE_ANGLES.iter().enumerate() {
        let m = view_matrix(&[0.0; 3], angles);
        let (col, row) = face_cell(face);
        select[face] = [m[0] / 6.0, m[4] / 6.0, m[8] / 6.0, (col as f32 + 0.5) / 3.0];
        adjust[face] = [m[1] / 4.0, m[5] / 4.0, m[9] / 4.0, (row as f32 + 0.5) / 2.0];
    }
    (select, adjust)
}

/// One cube face of one light, handed to the drawer.
#[derive(Debug, Clone)]
pub struct ShadowView {
    pub origin: Vec3,
    pub radius: f32,
    pub view: Mat4,
    pub proj: Mat4,
    /// for culling
    pub params: ViewParams,
}

impl ShadowView {
    pub fn new(origin: Vec3, radius: f32, face: usize, zoom: f32) -> Self {
        let angles = FACE_ANGLES[face];
        let near = radius * 0.01;
        let proj = perspective(90.0, 1.0, 1.0 / zoom as f64, near as f64, radius as f64);
        let fov = 2.0 * (1.0 / zoom).atan().to_degrees();
        Self {
            origin,
            radius,
            view: view_matrix(&origin, &angles),
            proj,
            params: ViewParams::new(origin, angles, fov, fov, near, radius, 1.0),
        }
    }
}

/// Draws depth for the shadow pass. Implemented by the frame renderer, which
/// owns the world walker and the programs.
pub trait ShadowDrawer {
    /// Depth of the world as seen by `view`; brush entities too when `entities`.
    fn draw_view(&mut self, backend: &mut dyn RenderBackend, view: &ShadowView, entities: bool);
    /// Binds the program that copies static atlas depth.
    fn use_blit_program(&mut self, backend: &mut dyn RenderBackend);
}

#[derive(Debug, Clone)]
pub struct StaticLight {
    pub origin: Vec3,
    pub radius: f32,
    pub resolution: i32,
    pub mode: ShadowMode,
    /// 3x2 grid in the static atlas, static mode only
    pub region: Option<AreaRect>,
    /// baked depth in `region` is current
    pub valid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShadowSource {
    Dynamic,
    Static(usize),
}

#[derive(Debug, Clone, Copy)]
struct Candidate {
    dlight: usize,
    source: ShadowSource,
    origin: Vec3,
    radius: f32,
    resolution: i32,
}

/// A light admitted this frame.
#[derive(Debug, Clone)]
pub struct ShadowLight {
    /// index into the refdef dlights
    pub dlight: usize,
    pub source: ShadowSource,
    pub origin: Vec3,
    pub radius: f32,
    /// face size in the frame atlas
    pub resolution: i32,
    pub region: AreaRect,
    /// projection zoom of the depth that ended up in `region`
    pub zoom: f32,
}

fn face_zoom(resolution: i32) -> f32 {
    (resolution - 4) as f32 / resolution as f32
}

fn grid_rect(left: i32, top: i32, resolution: i32) -> AreaRect {
    AreaRect::new(left, top, left + 3 * resolution, top + 2 * resolution)
}

#[derive(Debug)]
pub struct ShadowSystem {
    static_lights: Vec<StaticLight>,
    static_atlas: AreaAllocator,
    static_fb: Option<FramebufferHandle>,
    atlas: AreaAllocator,
    atlas_fb: Option<Framebuffer>,
    candidates: Vec<Candidate>,
    lights: Vec<ShadowLight>,
    select_tex: Option<TextureHandle>,
    adjust_tex: Option<TextureHandle>,
    frame_count: usize,
}

impl Default for ShadowSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowSystem {
    pub fn new() -> Self {
        Self {
            static_lights: Vec::new(),
            static_atlas: AreaAllocator::new(
                SHADOW_STATIC_ATLAS_SIZE,
                SHADOW_STATIC_ATLAS_SIZE,
                SHADOW_STATIC_ATLAS_SIZE,
                SHADOW_STATIC_ATLAS_SIZE,
            ),
            static_fb: None,
            atlas: AreaAllocator::new(
                SHADOW_ATLAS_START_SIZE,
                SHADOW_ATLAS_START_SIZE,
                SHADOW_ATLAS_SIZE,
                SHADOW_ATLAS_SIZE,
            ),
            atlas_fb: None,
            candidates: Vec::new(),
            lights: Vec::new(),
            select_tex: None,
            adjust_tex: None,
            frame_count: 0,
        }
    }

    /// Creates the face lookup cube maps.
    pub fn init(&mut self, backend: &mut dyn RenderBackend) {
        let (select, adjust) = face_lookup_tables();
        let desc = TextureDesc { width: 1, height: 1, format: TextureFormat::Rgba32F, cube: true, repeat: false };
        self.select_tex = Some(backend.create_texture(&desc, bytemuck::cast_slice(&select)));
        self.adjust_tex = Some(backend.create_texture(&desc, bytemuck::cast_slice(&adjust)));
    }

    pub fn static_lights(&self) -> &[StaticLight] {
        &self.static_lights
    }

    /// Lights admitted by the last `render_shadow_maps`.
    pub fn lights(&self) -> &[ShadowLight] {
        &self.lights
    }

    pub fn atlas_size(&self) -> (i32, i32) {
        (self.atlas.width(), self.atlas.height())
    }

    /// Registers a level light. Static lights reserve their baked region
    /// now; None when the light casts no shadow or nothing is left.
    pub fn create_static_light(
        &mut self,
        origin: Vec3,
        radius: f32,
        resolution: i32,
        mode: ShadowMode,
    ) -> Option<usize> {
        if mode == ShadowMode::NoShadow {
            return None;
        }
        if self.static_lights.len() >= MAX_STATIC_SHADOW_LIGHTS {
            debug!("shadow: static light limit {} reached", MAX_STATIC_SHADOW_LIGHTS);
            return None;
        }
        let resolution = resolution.clamp(8, SHADOW_ATLAS_SIZE / 3);

        let region = if mode == ShadowMode::Static {
            let Some((left, top)) = self.static_atlas.allocate(3 * resolution, 2 * resolution) else {
                debug!("shadow: static atlas full, light at {:?} dropped", origin);
                return None;
            };
            Some(grid_rect(left, top, resolution))
        } else {
            None
        };

        self.static_lights.push(StaticLight { origin, radius, resolution, mode, region, valid: false });
        Some(self.static_lights.len() - 1)
    }

    /// Forces every static light to be baked again.
    pub fn invalidate_static_lights(&mut self) {
        self.static_lights.iter_mut().for_each(|l| l.valid = false);
    }

    pub fn begin_frame(&mut self) {
        self.frame_count += 1;
        self.candidates.clear();
    }

    /// Asks for a shadow of the dynamic light `dlight` this frame.
    pub fn add_dyn_light(&mut self, dlight: usize, origin: Vec3, radius: f32) {
        self.candidates.push(Candidate {
            dlight,
            source: ShadowSource::Dynamic,
            origin,
            radius,
            resolution: DEFAULT_SHADOWMAP_SIZE,
        });
    }

    /// Asks for the shadow of static light `id`, published for `dlight`.
    pub fn touch_static_light(&mut self, id: usize, dlight: usize) {
        let Some(light) = self.static_lights.get(id) else {
            return;
        };
        self.candidates.push(Candidate {
            dlight,
            source: ShadowSource::Static(id),
            origin: light.origin,
            radius: light.radius,
            resolution: light.resolution,
        });
    }

    /// Distance culling, budget and atlas placement.
    fn admit(&mut self, view_origin: &Vec3, settings: &RefSettings) -> Vec<ShadowLight> {
        let [half, quarter, cutoff] = settings.shadowmap_distances;

        let mut scored: Vec<(f32, Candidate)> = self
            .candidates
            .iter()
            .filter_map(|c| {
                let d = vector_subtract(&c.origin, view_origin);
                let dist = (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt();
                let resolution = if dist > cutoff {
                    return None;
                } else if dist > quarter {
                    c.resolution / 4
                } else if dist > half {
                    c.resolution / 2
                } else {
                    c.resolution
                };
                Some((dist, Candidate { resolution, ..*c }))
            })
            .filter(|(_, c)| c.resolution > 4)
            .collect();

        scored.sort_by(|a, b| a.0.total_cmp(&b.0));
        let budget = settings.shadowmap_maxlights.min(MAX_SHADOW_LIGHTS);
        if scored.len() > budget {
            debug!("shadow: {} candidates over budget {}", scored.len(), budget);
            scored.truncate(budget);
        }

        self.atlas.init(SHADOW_ATLAS_START_SIZE, SHADOW_ATLAS_START_SIZE, SHADOW_ATLAS_SIZE, SHADOW_ATLAS_SIZE);
        let mut admitted = Vec::with_capacity(scored.len());
        for (_, c) in scored {
            let Some((left, top)) = self.atlas.allocate(3 * c.resolution, 2 * c.resolution) else {
                debug!("shadow: atlas full, skipping light for dlight {}", c.dlight);
                continue;
            };
            admitted.push(ShadowLight {
                dlight: c.dlight,
                source: c.source,
                origin: c.origin,
                radius: c.radius,
                resolution: c.resolution,
                region: grid_rect(left, top, c.resolution),
                zoom: face_zoom(c.resolution),
            });
        }
        admitted
    }

    fn draw_faces(
        backend: &mut dyn RenderBackend,
        drawer: &mut dyn ShadowDrawer,
        origin: Vec3,
        radius: f32,
        region: &AreaRect,
        resolution: i32,
        entities: bool,
    ) {
        let zoom = face_zoom(resolution);
        for face in 0..6 {
            let (col, row) = face_cell(face);
            backend.set_viewport(region.left + col * resolution, region.top + row * resolution, resolution, resolution);
            drawer.draw_view(backend, &ShadowView::new(origin, radius, face, zoom), entities);
        }
    }

    fn ensure_static_fb(&mut self, backend: &mut dyn RenderBackend) -> FramebufferHandle {
        if let Some(fb) = self.static_fb {
            return fb;
        }
        let desc = FramebufferDesc {
            width: SHADOW_STATIC_ATLAS_SIZE,
            height: SHADOW_STATIC_ATLAS_SIZE,
            color_textures: 0,
            flags: FramebufferFlags::DEPTH | FramebufferFlags::SHADOWMAP,
            samples: 0,
        };
        let fb = backend.create_framebuffer(&desc, "shadowStaticAtlas");
        bind_framebuffer(
            backend,
            &Framebuffer { handle: fb, desc },
            [0.0; 4],
        );
        self.static_fb = Some(fb);
        fb
    }

    /// Renders or blits every admitted light into this frame's atlas. The
    /// atlas is cleared even when no light is admitted.
    pub fn render_shadow_maps(
        &mut self,
        backend: &mut dyn RenderBackend,
        pool: &mut FramebufferPool,
        view_origin: &Vec3,
        settings: &RefSettings,
        drawer: &mut dyn ShadowDrawer,
    ) {
        self.lights = if settings.shadowmap { self.admit(view_origin, settings) } else { Vec::new() };

        let desc = FramebufferDesc {
            width: self.atlas.width(),
            height: self.atlas.height(),
            color_textures: 0,
            flags: FramebufferFlags::DEPTH | FramebufferFlags::SHADOWMAP,
            samples: 0,
        };
        let atlas = pool.borrow(backend, desc, "shadowAtlas");
        pool.defer_give_back(&atlas);
        self.atlas_fb = Some(atlas);

        backend.set_depth_test(true, true);
        bind_framebuffer(backend, &atlas, [1.0; 4]);

        let static_count = self.static_lights.len();
        let mut lights = std::mem::take(&mut self.lights);
        for light in &mut lights {
            let id = match light.source {
                ShadowSource::Dynamic => {
                    Self::draw_faces(backend, drawer, light.origin, light.radius, &light.region, light.resolution, true);
                    continue;
                }
                ShadowSource::Static(id) => id,
            };

            let (baked_region, baked_res, valid) = match self.static_lights.get(id) {
                Some(sl) if sl.mode == ShadowMode::Static => (sl.region, sl.resolution, sl.valid),
                // static position, dynamic shadow
                _ => {
                    Self::draw_faces(backend, drawer, light.origin, light.radius, &light.region, light.resolution, true);
                    continue;
                }
            };
            let Some(baked_region) = baked_region else {
                continue;
            };

            let rebake = !valid && static_count > 0 && self.frame_count % static_count == id;
            if !valid && !rebake {
                // not its turn yet
                Self::draw_faces(backend, drawer, light.origin, light.radius, &light.region, light.resolution, false);
                continue;
            }

            if rebake {
                let static_fb = self.ensure_static_fb(backend);
                backend.bind_framebuffer(Some(static_fb));
                let r = baked_region;
                backend.set_scissor(Some([r.left, r.top, r.width(), r.height()]));
                backend.clear(None, true);
                Self::draw_faces(backend, drawer, light.origin, light.radius, &baked_region, baked_res, false);
                backend.set_scissor(None);
                if let Some(sl) = self.static_lights.get_mut(id) {
                    sl.valid = true;
                }
                debug!("shadow: baked static light {}", id);
                backend.bind_framebuffer(Some(atlas.handle));
            }

            self.blit(backend, drawer, &baked_region, &light.region);
            light.zoom = face_zoom(baked_res);
        }
        self.lights = lights;

        backend.bind_framebuffer(None);
    }

    /// Copies a baked grid from the static atlas into the frame atlas.
    fn blit(
        &mut self,
        backend: &mut dyn RenderBackend,
        drawer: &mut dyn ShadowDrawer,
        source: &AreaRect,
        dest: &AreaRect,
    ) {
        let Some(static_fb) = self.static_fb else {
            return;
        };
        let size = SHADOW_STATIC_ATLAS_SIZE as f32;
        drawer.use_blit_program(backend);
        backend.bind_framebuffer_depth(0, static_fb);
        backend.set_uniform(
            "sourceRect",
            UniformValue::Vec4([
                source.width() as f32 / size,
                source.height() as f32 / size,
                source.left as f32 / size,
                source.top as f32 / size,
            ]),
        );
        backend.set_viewport(dest.left, dest.top, dest.width(), dest.height());
        backend.draw_fullscreen_quad();
    }

    /// Binds the atlas and lookup textures for the lighting pass.
    pub fn bind_textures(&self, backend: &mut dyn RenderBackend) {
        if let Some(atlas) = &self.atlas_fb {
            backend.bind_framebuffer_depth(TU_SHADOW_ATLAS as u32, atlas.handle);
        }
        if let Some(select) = self.select_tex {
            backend.bind_texture(TU_SHADOW_SELECT as u32, select);
        }
        if let Some(adjust) = self.adjust_tex {
            backend.bind_texture(TU_SHADOW_ADJUST as u32, adjust);
        }
    }

    /// Fills the shadow fields of the light entries. Lights without an
    /// admitted shadow are marked unshadowed.
    pub fn publish(&self, lights: &mut UniLights) {
        for light in lights.dyn_lights.iter_mut() {
            light.shadow_parameters = [0.0, 0.0, 1.0, 0.0];
        }

        let (w, h) = (self.atlas.width() as f32, self.atlas.height() as f32);
        for light in &self.lights {
            if light.dlight >= MAX_DLIGHTS {
                continue;
            }
            let (q, r) = depth_linearization(light.radius * 0.01, light.radius);
            let region = &light.region;

            let mut matrix = [0.0; 16];
            matrix[0] = region.width() as f32 / w;
            matrix[1] = region.height() as f32 / h;
            matrix[2] = region.left as f32 / w;
            matrix[3] = region.top as f32 / h;
            matrix[4] = light.zoom;
            matrix[5] = q;
            matrix[6] = r;

            let entry = &mut lights.dyn_lights[light.dlight];
            entry.shadow_matrix = matrix;
            entry.shadow_parameters = [1.0 / w, 1.0 / h, 0.0, 0.0];
        }
    }

    /// Drops every light and the static atlas; called when a level is loaded.
    pub fn shutdown(&mut self, backend: &mut dyn RenderBackend) {
        if !self.static_lights.is_empty() {
            info!("shadow: dropping {} static lights", self.static_lights.len());
        }
        self.static_lights.clear();
        self.static_atlas.init(
            SHADOW_STATIC_ATLAS_SIZE,
            SHADOW_STATIC_ATLAS_SIZE,
            SHADOW_STATIC_ATLAS_SIZE,
            SHADOW_STATIC_ATLAS_SIZE,
        );
        if let Some(fb) = self.static_fb.take() {
            backend.destroy_framebuffer(fb);
        }
        self.candidates.clear();
        self.lights.clear();
        self.atlas_fb = None;
    }

    /// Releases the lookup textures as well.
    pub fn destroy(&mut self, backend: &mut dyn RenderBackend) {
        self.shutdown(backend);
        for tex in [self.select_tex.take(), self.adjust_tex.take()].into_iter().flatten() {
            backend.delete_texture(tex);
        }
    }
}
