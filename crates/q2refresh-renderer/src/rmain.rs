// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// gl3_main.c -> rmain.rs
// Refresh entry points: init, level registration, frame composition

use std::sync::Arc;

use log::{debug, info, trace};

use q2refresh_common::cmd::{CmdArgs, CmdRegistry};
use q2refresh_common::cvar::CvarContext;
use q2refresh_common::q_shared::{Vec3, RDF_NOWORLDMODEL, RDF_UNDERWATER, RF_TRANSLUCENT, RF_WEAPONMODEL};

use crate::backend::RenderBackend;
use crate::config::{register_cvars, RefSettings};
use crate::debug::DebugLines;
use crate::entities::parse_entities;
use crate::error::RefError;
use crate::fog::{Fog, DEFAULT_FOG};
use crate::framebuffer::FramebufferPool;
use crate::light::{fill_light_uniforms, LightMarks};
use crate::lightmap::{BLOCK_HEIGHT, BLOCK_WIDTH};
use crate::matrix::{mat4_multiply, perspective, view_matrix, Mat4, IDENTITY};
use crate::model::{ModelHandle, ModelStore, RefImports};
use crate::model_types::BspData;
use crate::postfx::{PostFx, PostFxFrame};
use crate::refdef::{DLightShadow, Entity, RefDef};
use crate::shaders::{ProgramKind, ShaderSet, TU_SSAO};
use crate::shadow::{ShadowDrawer, ShadowLight, ShadowMode, ShadowSystem, ShadowView, StaticLight};
use crate::surf::{PvsState, RenderPass, SurfaceDrawer, VisContext, WorldWalk};
use crate::surfbatch::SurfBatch;
use crate::uniforms::{Uni3D, UniCommon, UniformBlock, UniformBuffers, MAX_DLIGHTS, MAX_LIGHTSTYLES};
use crate::view::{ViewClusters, ViewParams};

const NEAR_Z: f32 = 4.0;
const DEBUG_LIGHT_COLOR: Vec3 = [1.0, 1.0, 0.0];
const DEBUG_FRUSTUM_COLOR: Vec3 = [0.0, 1.0, 0.0];

/// The refresh module. Owns every piece of GPU side state; the host hands in
/// the backend on each call.
pub struct Renderer {
    cvars: CvarContext,
    settings: RefSettings,
    commands: CmdRegistry<Renderer>,

    models: ModelStore,
    shaders: ShaderSet,
    ubos: UniformBuffers,
    batch: SurfBatch,

    pvs: PvsState,
    scene: VisContext,
    /// light clusters and lists for the shadow faces
    shadow_pvs: PvsState,
    shadow_ctx: VisContext,
    /// depth-only walks: the SSAO geometry and the weapon mask
    depth_ctx: VisContext,

    marks: LightMarks,
    pool: FramebufferPool,
    postfx: PostFx,
    shadows: ShadowSystem,
    fog: Fog,
    debug: DebugLines,
    /// frustum captured when r_debug_frustum was switched on
    frozen_frustum: Option<[Vec3; 8]>,

    view: Option<ViewParams>,
    time: f32,
}

// ============================================================================
// Console commands
// ============================================================================

fn fog_f(r: &mut Renderer, args: &CmdArgs, out: &mut String) {
    r.fog.command(args, out);
}

fn foglerp_f(r: &mut Renderer, args: &CmdArgs, out: &mut String) {
    let now = r.time;
    r.fog.lerp_command(args, now, out);
}

fn modellist_f(r: &mut Renderer, _args: &CmdArgs, out: &mut String) {
    out.push_str(&r.models.modellist());
}

impl Renderer {
    /// Registers the cvars, links every program and creates the uniform
    /// buffers and lookup textures.
    pub fn init(backend: &mut dyn RenderBackend, mut cvars: CvarContext) -> Result<Self, RefError> {
        register_cvars(&mut cvars);
        let settings = RefSettings::snapshot(&cvars);

        let shaders = ShaderSet::init(backend)?;
        let mut ubos = UniformBuffers::new(backend, common_block(&settings), Uni3D {
            overbrightbits: settings.overbrightbits,
            particle_fade_factor: settings.particle_fade_factor,
            ..Uni3D::default()
        });

        let mut postfx = PostFx::new();
        postfx.init(backend, &mut ubos);
        let mut shadows = ShadowSystem::new();
        shadows.init(backend);

        let mut commands = CmdRegistry::new();
        commands.add_command("fog", fog_f);
        commands.add_command("foglerp", foglerp_f);
        commands.add_command("modellist", modellist_f);

        info!("refresh initialized with {} programs", shaders.len());

        Ok(Self {
            cvars,
            settings,
            commands,
            models: ModelStore::new(),
            shaders,
            ubos,
            batch: SurfBatch::new(),
            pvs: PvsState::new(),
            scene: VisContext::new(RenderPass::Scene),
            shadow_pvs: PvsState::new(),
            shadow_ctx: VisContext::new(RenderPass::Shadow),
            depth_ctx: VisContext::new(RenderPass::Ssao),
            marks: LightMarks::new(),
            pool: FramebufferPool::new(),
            postfx,
            shadows,
            fog: Fog::new(),
            debug: DebugLines::new(),
            frozen_frustum: None,
            view: None,
            time: 0.0,
        })
    }

    pub fn shutdown(&mut self, backend: &mut dyn RenderBackend) {
        self.pool.destroy_all(backend);
        self.postfx.shutdown(backend);
        self.shadows.destroy(backend);
        self.ubos.shutdown(backend);
        self.shaders.shutdown(backend);
        self.models.free_all();
        info!("refresh shut down");
    }

    pub fn cvars(&self) -> &CvarContext {
        &self.cvars
    }

    pub fn cvars_mut(&mut self) -> &mut CvarContext {
        &mut self.cvars
    }

    pub fn settings(&self) -> &RefSettings {
        &self.settings
    }

    pub fn models(&self) -> &ModelStore {
        &self.models
    }

    pub fn uniforms(&self) -> &UniformBuffers {
        &self.ubos
    }

    /// Current fog target as (r, g, b, density).
    pub fn fog_params(&self) -> [f32; 4] {
        self.fog.params()
    }

    /// Lights admitted to this frame's atlas.
    pub fn shadow_lights(&self) -> &[ShadowLight] {
        self.shadows.lights()
    }

    /// Baked lights of the level, indexed by `DLightShadow::Static`.
    pub fn static_lights(&self) -> &[StaticLight] {
        self.shadows.static_lights()
    }

    pub fn framebuffer_pool(&self) -> &FramebufferPool {
        &self.pool
    }

    /// Runs one console line if it names a refresh command. The output is
    /// logged and returned.
    pub fn execute(&mut self, text: &str) -> Option<String> {
        let commands = std::mem::take(&mut self.commands);
        let out = commands.execute(self, text);
        self.commands = commands;

        if let Some(out) = &out {
            for line in out.lines() {
                info!("{}", line);
            }
        }
        out
    }

    // ========================================================================
    // Registration
    // ========================================================================

    /// Loads `maps/<map>.bsp`, uploads its geometry and lightmaps, and sets
    /// up fog and static shadow lights from the entity lump.
    pub fn begin_registration(
        &mut self,
        backend: &mut dyn RenderBackend,
        map: &str,
        imports: &mut dyn RefImports,
    ) -> Result<(), RefError> {
        self.settings = RefSettings::snapshot(&self.cvars);
        self.models.begin_registration(map, self.settings.flushmap, imports)?;

        self.pvs.reset();
        self.shadow_pvs.reset();
        self.shadows.shutdown(backend);
        let [r, g, b, d] = DEFAULT_FOG;
        self.fog.set(r, g, b, d);

        let world = Arc::clone(self.models.world().ok_or(RefError::NoWorld)?);
        backend.upload_world_vertices(&world.vertices);
        for (page, lightmap) in world.lightmaps.iter().enumerate() {
            for (layer, data) in lightmap.layers.iter().enumerate() {
                backend.upload_lightmap(page, layer, BLOCK_WIDTH as i32, BLOCK_HEIGHT as i32, data);
            }
        }
        self.marks.reset(&world);

        let entities = parse_entities(&world.entities);
        if let Some([r, g, b, d]) = entities.fog {
            self.fog.set(r, g, b, d);
        }
        for light in &entities.lights {
            let id = self.shadows.create_static_light(light.origin, light.radius, light.resolution, ShadowMode::Static);
            if id.is_none() {
                debug!("static shadow light at {:?} not created", light.origin);
            }
        }

        info!(
            "registered {}: {} surfaces, {} lightmap pages, {} static lights",
            map,
            world.surfaces.len(),
            world.lightmaps.len(),
            self.shadows.static_lights().len()
        );
        Ok(())
    }

    pub fn register_model(
        &mut self,
        name: &str,
        imports: &mut dyn RefImports,
    ) -> Result<Option<ModelHandle>, RefError> {
        Ok(self.models.register_model(name, imports)?)
    }

    pub fn end_registration(&mut self, imports: &mut dyn RefImports) {
        self.models.end_registration(imports);
    }

    // ========================================================================
    // Frame
    // ========================================================================

    /// Takes the cvar snapshot and pushes the blocks that follow cvars.
    fn setup_settings(&mut self, backend: &mut dyn RenderBackend) {
        self.settings = RefSettings::snapshot(&self.cvars);
        if self.cvars.take_modified("r_novis") {
            self.pvs.reset();
        }

        self.ubos.common = UniCommon { color: self.ubos.common.color, ..common_block(&self.settings) };
        self.ubos.update(backend, UniformBlock::Common);
        self.ubos.three_d.overbrightbits = self.settings.overbrightbits;
        self.ubos.three_d.particle_fade_factor = self.settings.particle_fade_factor;
    }

    /// View parameters, matrices and the per-frame 3D uniforms.
    fn setup_frame(&mut self, backend: &mut dyn RenderBackend, fd: &RefDef) -> (Mat4, Mat4) {
        self.time = fd.time;

        let aspect = fd.width as f32 / fd.height.max(1) as f32;
        let zfar = self.settings.zfar.max(NEAR_Z + 1.0);
        let mut view = ViewParams::new(fd.vieworg, fd.viewangles, fd.fov_x, fd.fov_y, NEAR_Z, zfar, aspect);
        view.cull = self.settings.cull;

        let proj = perspective(fd.fov_y as f64, aspect as f64, 1.0, NEAR_Z as f64, zfar as f64);
        let view_mat = view_matrix(&fd.vieworg, &fd.viewangles);

        let t = &mut self.ubos.three_d;
        t.trans_proj = proj;
        t.trans_view = view_mat;
        t.trans_model = IDENTITY;
        t.time = fd.time;
        t.scroll = -64.0 * (fd.time / 40.0).fract();
        t.fog_params = self.fog.setup_frame(fd.time);
        t.ssao = 0.0;
        self.ubos.update(backend, UniformBlock::ThreeD);

        for (slot, style) in self.ubos.styles.lightstyles.iter_mut().zip(fd.lightstyles.iter().take(MAX_LIGHTSTYLES)) {
            *slot = [style.rgb[0], style.rgb[1], style.rgb[2], 1.0];
        }
        self.ubos.update(backend, UniformBlock::Styles);

        if self.settings.debug_frustum {
            self.frozen_frustum.get_or_insert(view.vertices);
        } else {
            self.frozen_frustum = None;
        }

        self.view = Some(view);
        (view_mat, proj)
    }

    /// Light bits on the world vertices, the light block and this frame's
    /// shadow atlas.
    fn setup_lights(&mut self, backend: &mut dyn RenderBackend, fd: &RefDef, world: Option<&BspData>) {
        if let Some(world) = world {
            if self.marks.mark(world, &fd.dlights) {
                backend.upload_world_vertices(self.marks.vertices());
            }
        }
        fill_light_uniforms(&fd.dlights, &mut self.ubos.lights);

        self.shadows.begin_frame();
        for (i, dl) in fd.dlights.iter().take(MAX_DLIGHTS).enumerate() {
            match dl.shadow {
                DLightShadow::Dynamic => self.shadows.add_dyn_light(i, dl.origin, dl.intensity),
                DLightShadow::Static(id) => self.shadows.touch_static_light(id, i),
                DLightShadow::None => {}
            }
        }

        if let Some(world) = world {
            let mut drawer = ShadowPassDrawer {
                world,
                models: &self.models,
                entities: &fd.entities,
                pvs: &mut self.shadow_pvs,
                ctx: &mut self.shadow_ctx,
                shaders: &mut self.shaders,
                ubos: &mut self.ubos,
                batch: &mut self.batch,
                novis: self.settings.novis,
                frame: world_frame(fd.time),
            };
            self.shadows.render_shadow_maps(backend, &mut self.pool, &fd.vieworg, &self.settings, &mut drawer);
        }

        self.shadows.publish(&mut self.ubos.lights);
        self.ubos.update(backend, UniformBlock::Lights);
    }

    /// Position and normal targets for the occlusion pass.
    fn render_ssao(&mut self, backend: &mut dyn RenderBackend, fd: &RefDef, world: &BspData) {
        let Some(view) = &self.view else {
            return;
        };
        let geometry = self.postfx.begin_ssao(backend, &mut self.pool, fd.width, fd.height);
        self.shaders.use_program(backend, ProgramKind::SsaoGeometry);

        self.depth_ctx.begin_frame(world);
        self.depth_ctx.walk_world(&WorldWalk {
            world,
            pvs: &self.pvs,
            view,
            modelorg: fd.vieworg,
            areabits: fd.areabits.as_deref(),
            frame: world_frame(fd.time),
        });
        let mut d = SurfaceDrawer {
            backend: &mut *backend,
            shaders: &mut self.shaders,
            ubos: &mut self.ubos,
            batch: &mut self.batch,
        };
        self.depth_ctx.draw_texture_chains(world, &mut d);
        draw_brush_entities(&mut self.depth_ctx, &self.models, &fd.entities, view, &fd.vieworg, &mut d, |e| {
            e.flags & RF_TRANSLUCENT == 0
        });

        self.postfx.end_ssao(backend, &mut self.pool, &mut self.shaders, geometry, self.settings.ssao_intensity);
    }

    /// Opaque world, brush entities, then the translucent surfaces.
    fn render_scene(&mut self, backend: &mut dyn RenderBackend, fd: &RefDef, world: Option<&BspData>) {
        let Some(view) = &self.view else {
            return;
        };
        let mut d = SurfaceDrawer {
            backend: &mut *backend,
            shaders: &mut self.shaders,
            ubos: &mut self.ubos,
            batch: &mut self.batch,
        };
        let Some(world) = world else {
            return;
        };

        if self.settings.drawworld && fd.rdflags & RDF_NOWORLDMODEL == 0 {
            self.scene.begin_frame(world);
            self.scene.walk_world(&WorldWalk {
                world,
                pvs: &self.pvs,
                view,
                modelorg: fd.vieworg,
                areabits: fd.areabits.as_deref(),
                frame: world_frame(fd.time),
            });
            self.scene.draw_texture_chains(world, &mut d);
        }

        draw_brush_entities(&mut self.scene, &self.models, &fd.entities, view, &fd.vieworg, &mut d, |e| {
            e.flags & RF_TRANSLUCENT == 0
        });
        self.scene.draw_alpha_surfaces(world, &mut d);
        draw_brush_entities(&mut self.scene, &self.models, &fd.entities, view, &fd.vieworg, &mut d, |e| {
            e.flags & RF_TRANSLUCENT != 0
        });
    }

    /// Brush weapon entities into the motion blur mask. Other weapon models
    /// are drawn by their own collaborators.
    fn render_weapon_mask(&mut self, backend: &mut dyn RenderBackend, fd: &RefDef) {
        if self.postfx.begin_weapon_mask(backend, &mut self.pool, &self.settings, fd.width, fd.height).is_none() {
            return;
        }
        let Some(view) = &self.view else {
            return;
        };
        self.shaders.use_program(backend, ProgramKind::MotionBlurMask);
        let mut d = SurfaceDrawer {
            backend: &mut *backend,
            shaders: &mut self.shaders,
            ubos: &mut self.ubos,
            batch: &mut self.batch,
        };
        draw_brush_entities(&mut self.depth_ctx, &self.models, &fd.entities, view, &fd.vieworg, &mut d, |e| {
            e.flags & RF_WEAPONMODEL != 0
        });
    }

    fn collect_debug_lines(&mut self, fd: &RefDef) {
        if let Some(frustum) = &self.frozen_frustum {
            self.debug.add_frustum(frustum, &DEBUG_FRUSTUM_COLOR);
        }
        if !self.settings.debug_lights {
            return;
        }
        for light in self.shadows.lights() {
            let color = fd.dlights.get(light.dlight).map_or(DEBUG_LIGHT_COLOR, |dl| dl.color);
            self.debug.add_sphere(&light.origin, light.radius, &color);
        }
        for light in self.shadows.static_lights() {
            let r = [8.0; 3];
            let mins = [light.origin[0] - r[0], light.origin[1] - r[1], light.origin[2] - r[2]];
            let maxs = [light.origin[0] + r[0], light.origin[1] + r[1], light.origin[2] + r[2]];
            self.debug.add_box(&mins, &maxs, &DEBUG_LIGHT_COLOR);
        }
    }

    /// Draws one view: shadow atlas, SSAO, scene, post-processing.
    pub fn render_frame(&mut self, backend: &mut dyn RenderBackend, fd: &RefDef) -> Result<(), RefError> {
        let world = self.models.world().cloned();
        if world.is_none() && fd.rdflags & RDF_NOWORLDMODEL == 0 {
            return Err(RefError::NoWorld);
        }
        let world = world.as_deref();

        self.setup_settings(backend);
        let (view_mat, proj) = self.setup_frame(backend, fd);

        if let (Some(world), Some(view)) = (world, &self.view) {
            let clusters = ViewClusters::setup(world, &view.origin);
            if self.pvs.mark_leaves(world, clusters, self.settings.novis, self.settings.lockpvs) {
                trace!("pvs remarked for clusters {:?}", clusters);
            }
        }

        self.setup_lights(backend, fd, world);

        // the shadow faces left their own matrices behind
        self.ubos.three_d.trans_view = view_mat;
        self.ubos.three_d.trans_proj = proj;
        self.ubos.three_d.trans_model = IDENTITY;

        if let (true, Some(world)) = (self.settings.ssao, world) {
            self.ubos.update(backend, UniformBlock::ThreeD);
            self.render_ssao(backend, fd, world);
            if let Some(ssao) = self.postfx.ssao_result() {
                backend.bind_framebuffer_texture(TU_SSAO as u32, ssao.handle, 0);
                self.ubos.three_d.ssao = 1.0;
            }
        }
        self.ubos.update(backend, UniformBlock::ThreeD);

        self.postfx.begin_scene(backend, &mut self.pool, &self.settings, fd.width, fd.height);
        backend.set_depth_test(true, true);
        self.shadows.bind_textures(backend);
        self.render_scene(backend, fd, world);

        self.collect_debug_lines(fd);
        self.debug.draw(backend, &mut self.shaders, &mut self.ubos);

        self.render_weapon_mask(backend, fd);

        let frame = PostFxFrame {
            width: fd.width,
            height: fd.height,
            time: fd.time,
            underwater: fd.rdflags & RDF_UNDERWATER != 0,
            blend: fd.blend,
            view_proj: mat4_multiply(&proj, &view_mat),
        };
        self.postfx.after_scene(backend, &mut self.pool, &mut self.shaders, &mut self.ubos, &self.settings, &frame);

        self.pool.end_frame(backend);
        Ok(())
    }
}

fn common_block(settings: &RefSettings) -> UniCommon {
    UniCommon {
        gamma: 1.0 / settings.gamma.max(0.1),
        intensity: settings.intensity,
        intensity_2d: settings.intensity_2d,
        ..UniCommon::default()
    }
}

/// Texture animation frame of the world entity.
fn world_frame(time: f32) -> i32 {
    (time * 2.0) as i32
}

fn draw_brush_entities(
    ctx: &mut VisContext,
    models: &ModelStore,
    entities: &[Entity],
    view: &ViewParams,
    eye: &Vec3,
    d: &mut SurfaceDrawer,
    filter: impl Fn(&Entity) -> bool,
) {
    for entity in entities {
        let Some(handle) = entity.model.filter(|_| filter(entity)) else {
            continue;
        };
        match models.brush(handle) {
            Some(brush) => ctx.draw_brush_model(brush.bsp, brush.submodel, entity, view, eye, d),
            None => trace!("entity model {:?} is not a brush model", handle),
        }
    }
}

/// Depth of the world and brush entities as seen from one shadow face.
struct ShadowPassDrawer<'a> {
    world: &'a BspData,
    models: &'a ModelStore,
    entities: &'a [Entity],
    pvs: &'a mut PvsState,
    ctx: &'a mut VisContext,
    shaders: &'a mut ShaderSet,
    ubos: &'a mut UniformBuffers,
    batch: &'a mut SurfBatch,
    novis: bool,
    frame: i32,
}

impl ShadowDrawer for ShadowPassDrawer<'_> {
    fn draw_view(&mut self, backend: &mut dyn RenderBackend, view: &ShadowView, entities: bool) {
        let world = self.world;
        self.pvs.mark_leaves(world, ViewClusters::setup(world, &view.origin), self.novis, false);

        self.ubos.three_d.trans_view = view.view;
        self.ubos.three_d.trans_proj = view.proj;
        self.ubos.three_d.trans_model = IDENTITY;
        self.ubos.update(backend, UniformBlock::ThreeD);
        self.shaders.use_program(backend, ProgramKind::ShadowMap);

        self.ctx.begin_frame(world);
        self.ctx.walk_world(&WorldWalk {
            world,
            pvs: &*self.pvs,
            view: &view.params,
            modelorg: view.origin,
            areabits: None,
            frame: self.frame,
        });

        let mut d = SurfaceDrawer {
            backend,
            shaders: &mut *self.shaders,
            ubos: &mut *self.ubos,
            batch: &mut *self.batch,
        };
        self.ctx.draw_texture_chains(world, &mut d);
        if entities {
            draw_brush_entities(&mut *self.ctx, self.models, self.entities, &view.params, &view.origin, &mut d, |e| {
                e.flags & (RF_TRANSLUCENT | RF_WEAPONMODEL) == 0
            });
        }
    }

    fn use_blit_program(&mut self, backend: &mut dyn RenderBackend) {
        self.shaders.use_program(backend, ProgramKind::ShadowBlit);
    }
}
