// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// gl3_surf.c -> surf.rs
// PVS leaf marking, the front to back world walk and the texture chain,
// alpha and inline model drawing built on it

use std::collections::BTreeMap;

use q2refresh_common::q_shared::{
    angle_vectors_tuple, dot_product, vector_add, vector_subtract, Vec3, CONTENTS_SOLID, RF_TRANSLUCENT,
    SURF_FLOWING, SURF_LIGHT, SURF_SKY, SURF_TRANS33, SURF_TRANS66,
};
use q2refresh_common::qfiles::{PLANE_X, PLANE_Y, PLANE_Z};

use crate::backend::{BlendMode, RenderBackend, TextureHandle};
use crate::matrix::{mat4_multiply, mat4_translate, rot_around_axis_zyx, IDENTITY};
use crate::model_types::{BspData, BspNode, MModel, SurfFlags, BACKFACE_EPSILON};
use crate::refdef::Entity;
use crate::shaders::{ProgramKind, ShaderSet, TU_DIFFUSE};
use crate::surfbatch::SurfBatch;
use crate::uniforms::{UniformBlock, UniformBuffers};
use crate::view::{ViewClusters, ViewParams};

/// What the current walk feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderPass {
    /// depth only, into a shadow map view
    Shadow,
    /// view space position and normal for ambient occlusion
    Ssao,
    Scene,
}

// ============================================================================
// PVS
// ============================================================================

/// Per node "visible this frame" stamps derived from the PVS.
#[derive(Debug)]
pub struct PvsState {
    visframecount: i32,
    visframe: Vec<i32>,
    old: Option<ViewClusters>,
}

impl Default for PvsState {
    fn default() -> Self {
        Self::new()
    }
}

impl PvsState {
    pub fn new() -> Self {
        Self { visframecount: 0, visframe: Vec::new(), old: None }
    }

    /// Forces the next `mark_leaves` to recompute.
    pub fn reset(&mut self) {
        self.old = None;
    }

    pub fn visframecount(&self) -> i32 {
        self.visframecount
    }

    /// Marks the nodes and leaves in the PVS of the view clusters by walking
    /// up from every visible leaf until an already marked node. Returns false
    /// when nothing had to be recomputed.
    pub fn mark_leaves(&mut self, world: &BspData, clusters: ViewClusters, novis: bool, lockpvs: bool) -> bool {
        if self.visframe.len() != world.nodes.len() {
            self.visframe = vec![-1; world.nodes.len()];
            self.old = None;
        }

        if self.old == Some(clusters) && !novis && clusters.cluster != -1 {
            return false;
        }

        // development aid to let you run around and see exactly where
        // the pvs ends
        if lockpvs && self.old.is_some() {
            return false;
        }

        self.visframecount += 1;
        self.old = Some(clusters);

        if novis || clusters.cluster == -1 || world.vis.is_none() {
            // mark everything
            self.visframe.fill(self.visframecount);
            return true;
        }

        let mut vis = world.cluster_pvs(clusters.cluster);
        // may have to combine two clusters because of solid water boundaries
        if clusters.cluster2 != clusters.cluster {
            let vis2 = world.cluster_pvs(clusters.cluster2);
            for (a, b) in vis.iter_mut().zip(vis2) {
                *a |= b;
            }
        }

        for i in 0..world.numleafs {
            let index = world.numnodes + i;
            let Some(BspNode::Leaf(leaf)) = world.nodes.get(index) else {
                continue;
            };
            let cluster = leaf.cluster;
            if cluster == -1 {
                continue;
            }
            let bit = vis.get((cluster >> 3) as usize).copied().unwrap_or(0) & (1 << (cluster & 7));
            if bit == 0 {
                continue;
            }

            let mut node = Some(index);
            while let Some(n) = node {
                if self.visframe[n] == self.visframecount {
                    break;
                }
                self.visframe[n] = self.visframecount;
                node = world.nodes[n].parent();
            }
        }
        true
    }

    pub fn is_visible(&self, node: usize) -> bool {
        self.visframe.get(node) == Some(&self.visframecount)
    }

    /// Leaf numbers marked by the last `mark_leaves`.
    pub fn visible_leaves(&self, world: &BspData) -> Vec<usize> {
        (0..world.numleafs).filter(|&i| self.is_visible(world.numnodes + i)).collect()
    }
}

// ============================================================================
// Visibility context
// ============================================================================

/// Inputs of one world walk.
#[derive(Debug, Clone, Copy)]
pub struct WorldWalk<'a> {
    pub world: &'a BspData,
    pub pvs: &'a PvsState,
    pub view: &'a ViewParams,
    /// eye or light position the side tests use
    pub modelorg: Vec3,
    pub areabits: Option<&'a [u8]>,
    /// entity frame for texture animation
    pub frame: i32,
}

/// The GPU side collaborators a draw needs.
pub struct SurfaceDrawer<'a> {
    pub backend: &'a mut dyn RenderBackend,
    pub shaders: &'a mut ShaderSet,
    pub ubos: &'a mut UniformBuffers,
    pub batch: &'a mut SurfBatch,
}

/// Surface lists gathered by one walk. One per render pass so shadow views
/// can walk while the scene lists are alive.
#[derive(Debug)]
pub struct VisContext {
    pass: RenderPass,
    framecount: i32,
    surf_visframe: Vec<i32>,
    /// per texture chains; each list is pushed in walk order and drawn from the back
    chains: BTreeMap<TextureHandle, Vec<usize>>,
    /// translucent surfaces with their animated image, drawn from the back
    alpha: Vec<(usize, TextureHandle)>,
    sky: Vec<usize>,
    /// every surface of a shadow or ssao walk
    depth: Vec<usize>,
}

impl VisContext {
    pub fn new(pass: RenderPass) -> Self {
        Self {
            pass,
            framecount: 0,
            surf_visframe: Vec::new(),
            chains: BTreeMap::new(),
            alpha: Vec::new(),
            sky: Vec::new(),
            depth: Vec::new(),
        }
    }

    pub fn pass(&self) -> RenderPass {
        self.pass
    }

    /// Starts a new walk over `world`.
    pub fn begin_frame(&mut self, world: &BspData) {
        self.framecount += 1;
        if self.surf_visframe.len() != world.surfaces.len() {
            self.surf_visframe = vec![-1; world.surfaces.len()];
        }
        self.chains.clear();
        self.alpha.clear();
        self.sky.clear();
        self.depth.clear();
    }

    pub fn chain(&self, texture: TextureHandle) -> Option<&[usize]> {
        self.chains.get(&texture).map(Vec::as_slice)
    }

    pub fn num_chains(&self) -> usize {
        self.chains.len()
    }

    pub fn alpha_surfaces(&self) -> &[(usize, TextureHandle)] {
        &self.alpha
    }

    /// Sky surfaces for the sky box collaborator.
    pub fn sky_surfaces(&self) -> &[usize] {
        &self.sky
    }

    pub fn depth_surfaces(&self) -> &[usize] {
        &self.depth
    }

    /// Walks the world front to back from `walk.modelorg`, filling the lists.
    pub fn walk_world(&mut self, walk: &WorldWalk) {
        if walk.world.nodes.is_empty() {
            return;
        }
        self.recursive_world_node(walk, 0);
    }

    fn recursive_world_node(&mut self, walk: &WorldWalk, index: usize) {
        let world = walk.world;
        let Some(node) = world.nodes.get(index) else {
            return;
        };

        match node {
            BspNode::Leaf(leaf) => {
                if leaf.contents == CONTENTS_SOLID {
                    return; // solid
                }
                if !walk.pvs.is_visible(index) || walk.view.cull_box(&leaf.mins, &leaf.maxs) {
                    return;
                }

                // check for door connected areas
                if let Some(areabits) = walk.areabits {
                    let area = leaf.area.max(0);
                    let bits = areabits.get((area >> 3) as usize).copied().unwrap_or(0);
                    if bits & (1 << (area & 7)) == 0 {
                        return; // not visible
                    }
                }

                let end = leaf.firstmarksurface + leaf.nummarksurfaces;
                for &s in world.marksurfaces.get(leaf.firstmarksurface..end).unwrap_or(&[]) {
                    if let Some(stamp) = self.surf_visframe.get_mut(s) {
                        *stamp = self.framecount;
                    }
                }
            }
            BspNode::Node(node) => {
                if !walk.pvs.is_visible(index) || walk.view.cull_box(&node.mins, &node.maxs) {
                    return;
                }

                // find which side of the node we are on
                let plane = &world.planes[node.plane];
                let dot = match plane.plane_type as i32 {
                    PLANE_X => walk.modelorg[0] - plane.dist,
                    PLANE_Y => walk.modelorg[1] - plane.dist,
                    PLANE_Z => walk.modelorg[2] - plane.dist,
                    _ => dot_product(&walk.modelorg, &plane.normal) - plane.dist,
                };
                let (side, sidebit) = if dot >= 0.0 { (0, SurfFlags::empty()) } else { (1, SurfFlags::PLANEBACK) };

                // recurse down the children, front side first
                self.recursive_world_node(walk, node.children[side]);

                for s in node.firstsurface..node.firstsurface + node.numsurfaces {
                    if self.surf_visframe.get(s) != Some(&self.framecount) {
                        continue;
                    }
                    if world.surfaces[s].flags & SurfFlags::PLANEBACK != sidebit {
                        continue; // wrong side
                    }
                    self.add_surface(world, s, walk.frame);
                }

                // recurse down the back side
                self.recursive_world_node(walk, node.children[side ^ 1]);
            }
        }
    }

    fn add_surface(&mut self, world: &BspData, s: usize, frame: i32) {
        if self.pass != RenderPass::Scene {
            self.depth.push(s);
            return;
        }

        let surf = &world.surfaces[s];
        let flags = world.texinfo[surf.texinfo].flags;
        if flags & SURF_SKY != 0 {
            // just adds to visible sky bounds
            self.sky.push(s);
        } else if flags & (SURF_TRANS33 | SURF_TRANS66) != 0 {
            // add to the translucent chain
            let image = world.texture_animation(surf.texinfo, frame).image.handle;
            self.alpha.push((s, image));
        } else {
            // the polygon is visible, so add it to the texture sorted chain
            let image = world.texture_animation(surf.texinfo, frame).image.handle;
            self.chains.entry(image).or_default().push(s);
        }
    }

    /// Draws and empties the opaque chains (or the depth list outside the
    /// scene pass). Emission follows SURF_LIGHT and is reset afterwards.
    pub fn draw_texture_chains(&mut self, world: &BspData, d: &mut SurfaceDrawer) {
        d.batch.clear();

        if self.pass != RenderPass::Scene {
            for &s in self.depth.iter().rev() {
                d.batch.add(world, &world.surfaces[s], d.backend);
            }
            d.batch.flush(d.backend);
            self.depth.clear();
            return;
        }

        for (&image, chain) in &self.chains {
            let Some(&head) = chain.last() else {
                continue;
            };
            d.batch.clear();

            let first = &world.surfaces[head];
            let mut is_emissive = world.texinfo[first.texinfo].flags & SURF_LIGHT != 0;

            if first.flags.contains(SurfFlags::DRAWTURB) {
                d.shaders.use_program(d.backend, ProgramKind::Turb3D);
            } else if first.flags.contains(SurfFlags::DRAWTURBLIT) {
                d.shaders.use_program(d.backend, ProgramKind::LmTurb3D);
            } else if world.texinfo[first.texinfo].flags & SURF_FLOWING != 0 {
                d.shaders.use_program(d.backend, ProgramKind::LmFlow3D);
            } else {
                set_emission(d, is_emissive);
                d.shaders.use_program(d.backend, ProgramKind::Lm3D);
            }

            d.backend.bind_texture(TU_DIFFUSE as u32, image);

            for &s in chain.iter().rev() {
                let surf = &world.surfaces[s];
                let emissive = world.texinfo[surf.texinfo].flags & SURF_LIGHT != 0;
                if emissive != is_emissive {
                    is_emissive = emissive;
                    set_emission(d, is_emissive);
                }
                d.batch.render_world_poly(self.pass, world, surf, d.backend);
            }
            d.batch.flush(d.backend);
        }
        self.chains.clear();

        set_emission(d, false);
    }

    /// Draws the translucent surfaces back to front, one draw each, with
    /// blending on and the world model matrix.
    pub fn draw_alpha_surfaces(&mut self, world: &BspData, d: &mut SurfaceDrawer) {
        if self.alpha.is_empty() {
            return;
        }

        // go back to the world matrix
        d.ubos.three_d.trans_model = IDENTITY;
        d.ubos.update(d.backend, UniformBlock::ThreeD);

        d.backend.set_blend(BlendMode::Alpha);
        d.batch.clear();

        for &(s, image) in self.alpha.iter().rev() {
            let surf = &world.surfaces[s];
            let flags = world.texinfo[surf.texinfo].flags;
            d.backend.bind_texture(TU_DIFFUSE as u32, image);

            let alpha = if flags & SURF_TRANS33 != 0 {
                0.333
            } else if flags & SURF_TRANS66 != 0 {
                0.666
            } else {
                1.0
            };
            if alpha != d.ubos.three_d.alpha {
                d.ubos.three_d.alpha = alpha;
                d.ubos.update(d.backend, UniformBlock::ThreeD);
            }

            if surf.flags.contains(SurfFlags::DRAWTURB) {
                d.shaders.use_program(d.backend, ProgramKind::Turb3D);
            } else if surf.flags.contains(SurfFlags::DRAWTURBLIT) {
                d.shaders.use_program(d.backend, ProgramKind::LmTurb3D);
                d.backend.bind_lightmap(surf.lightmaptexturenum.max(0) as usize);
            } else if flags & SURF_FLOWING != 0 {
                d.shaders.use_program(d.backend, ProgramKind::TransFlow3D);
            } else {
                d.shaders.use_program(d.backend, ProgramKind::Trans3D);
            }
            d.batch.draw_single(world, surf, d.backend);
        }

        d.ubos.three_d.alpha = 1.0;
        d.ubos.update(d.backend, UniformBlock::ThreeD);
        d.backend.set_blend(BlendMode::Off);

        self.alpha.clear();
    }

    /// Draws one inline brush model. `eye` is the view origin, or the light
    /// origin in a shadow pass. Translucent faces join the alpha list.
    pub fn draw_brush_model(
        &mut self,
        world: &BspData,
        model: &MModel,
        entity: &Entity,
        view: &ViewParams,
        eye: &Vec3,
        d: &mut SurfaceDrawer,
    ) {
        if model.numfaces == 0 {
            return;
        }

        let rotated = entity.angles.iter().any(|&a| a != 0.0);
        let (mins, maxs) = if rotated {
            let r = [model.radius; 3];
            (vector_subtract(&entity.origin, &r), vector_add(&entity.origin, &r))
        } else {
            (vector_add(&entity.origin, &model.mins), vector_add(&entity.origin, &model.maxs))
        };
        if view.cull_box(&mins, &maxs) {
            return;
        }

        let mut modelorg = vector_subtract(eye, &entity.origin);
        if rotated {
            let temp = modelorg;
            let (forward, right, up) = angle_vectors_tuple(&entity.angles);
            modelorg = [dot_product(&temp, &forward), -dot_product(&temp, &right), dot_product(&temp, &up)];
        }

        let old_model = d.ubos.three_d.trans_model;
        d.ubos.three_d.trans_model = mat4_multiply(
            &mat4_translate(&entity.origin),
            &rot_around_axis_zyx(entity.angles[1], entity.angles[0], entity.angles[2]),
        );
        d.ubos.update(d.backend, UniformBlock::ThreeD);

        let translucent = entity.flags & RF_TRANSLUCENT != 0;
        if translucent {
            d.backend.set_blend(BlendMode::Alpha);
        }

        d.batch.clear();
        let last = (model.firstface + model.numfaces).min(world.surfaces.len());
        for s in model.firstface..last {
            let surf = &world.surfaces[s];
            let plane = &world.planes[surf.plane];
            let dot = dot_product(&modelorg, &plane.normal) - plane.dist;

            // draw the polygon
            let back = surf.flags.contains(SurfFlags::PLANEBACK);
            if !((back && dot < -BACKFACE_EPSILON) || (!back && dot > BACKFACE_EPSILON)) {
                continue;
            }

            if self.pass != RenderPass::Scene {
                d.batch.add(world, surf, d.backend);
                continue;
            }

            let tex = world.texture_animation(surf.texinfo, entity.frame);
            let flags = world.texinfo[surf.texinfo].flags;
            if flags & (SURF_TRANS33 | SURF_TRANS66) != 0 {
                // add to the translucent chain
                self.alpha.push((s, tex.image.handle));
            } else if !surf.flags.contains(SurfFlags::DRAWTURB) {
                d.backend.bind_texture(TU_DIFFUSE as u32, tex.image.handle);
                d.backend.bind_lightmap(surf.lightmaptexturenum.max(0) as usize);
                let program = if flags & SURF_FLOWING != 0 { ProgramKind::LmFlow3D } else { ProgramKind::Lm3D };
                d.shaders.use_program(d.backend, program);
                d.batch.draw_single(world, surf, d.backend);
            } else {
                d.backend.bind_texture(TU_DIFFUSE as u32, tex.image.handle);
                d.shaders.use_program(d.backend, ProgramKind::Turb3D);
                d.batch.draw_single(world, surf, d.backend);
            }
        }
        if self.pass != RenderPass::Scene {
            d.batch.flush(d.backend);
        }

        if translucent {
            d.backend.set_blend(BlendMode::Off);
        }

        d.ubos.three_d.trans_model = old_model;
        d.ubos.update(d.backend, UniformBlock::ThreeD);
    }
}

fn set_emission(d: &mut SurfaceDrawer, emissive: bool) {
    let emission = if emissive { 1.0 } else { 0.0 };
    if d.ubos.three_d.emission != emission {
        d.ubos.three_d.emission = emission;
        d.ubos.update(d.backend, UniformBlock::ThreeD);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendCall, RecordingBackend};
    use crate::model::load_brush_model;
    use crate::testutil::{FakeImports, TestMap};
    use crate::uniforms::{Uni3D, UniCommon};

    fn load(map: &TestMap) -> BspData {
        let mut imports = FakeImports::default();
        load_brush_model("maps/test.bsp", &map.to_bytes(), &mut imports).unwrap().0
    }

    fn open_view(origin: Vec3) -> ViewParams {
        let mut v = ViewParams::new(origin, [0.0; 3], 90.0, 90.0, 4.0, 4096.0, 1.0);
        v.cull = false;
        v
    }

    /// Marks with the clusters of `origin` and walks from there.
    fn walk(world: &BspData, ctx: &mut VisContext, origin: Vec3, novis: bool, areabits: Option<&[u8]>) {
        let mut pvs = PvsState::new();
        pvs.mark_leaves(world, ViewClusters::setup(world, &origin), novis, false);
        let view = open_view(origin);
        ctx.begin_frame(world);
        ctx.walk_world(&WorldWalk { world, pvs: &pvs, view: &view, modelorg: origin, areabits, frame: 0 });
    }

    struct Gpu {
        be: RecordingBackend,
        shaders: ShaderSet,
        ubos: UniformBuffers,
        batch: SurfBatch,
    }

    impl Gpu {
        fn new() -> Self {
            let mut be = RecordingBackend::new();
            let shaders = ShaderSet::init(&mut be).unwrap();
            let ubos = UniformBuffers::new(&mut be, UniCommon::default(), Uni3D::default());
            be.clear_calls();
            Self { be, shaders, ubos, batch: SurfBatch::new() }
        }

        fn drawer(&mut self) -> SurfaceDrawer<'_> {
            SurfaceDrawer {
                backend: &mut self.be,
                shaders: &mut self.shaders,
                ubos: &mut self.ubos,
                batch: &mut self.batch,
            }
        }

        fn used(&self, kind: ProgramKind) -> usize {
            let program = self.shaders.program(kind).unwrap();
            self.be.count(|c| *c == BackendCall::UseProgram(program))
        }
    }

    fn first_vert(world: &BspData, s: usize) -> u32 {
        world.polys[world.surfaces[s].polys.start].first_vert
    }

    #[test]
    fn test_mark_leaves_is_deterministic() {
        let world = load(&TestMap::two_rooms());
        let mut pvs = PvsState::new();
        let clusters = ViewClusters::setup(&world, &[32.0, 0.0, 0.0]);
        assert!(pvs.mark_leaves(&world, clusters, false, false));
        let first = pvs.visible_leaves(&world);

        // same leaf, different position: nothing to redo
        let moved = ViewClusters::setup(&world, &[40.0, 10.0, 5.0]);
        assert!(!pvs.mark_leaves(&world, moved, false, false));
        assert_eq!(pvs.visible_leaves(&world), first);

        pvs.reset();
        assert!(pvs.mark_leaves(&world, clusters, false, false));
        assert_eq!(pvs.visible_leaves(&world), first);
        assert_eq!(first, vec![1, 2]);
    }

    #[test]
    fn test_pvs_restricts_leaves_and_marks_parents() {
        let mut map = TestMap::two_rooms();
        // cluster 0 only sees itself
        map.visibility = TestMap::vis_lump(&[0x01, 0x03]);
        let world = load(&map);

        let mut pvs = PvsState::new();
        pvs.mark_leaves(&world, ViewClusters::setup(&world, &[32.0, 0.0, 0.0]), false, false);
        assert_eq!(pvs.visible_leaves(&world), vec![1]);
        assert!(pvs.is_visible(0));
        assert!(pvs.is_visible(1));
        assert!(!pvs.is_visible(2));

        pvs.mark_leaves(&world, ViewClusters::setup(&world, &[-32.0, 0.0, 0.0]), false, false);
        assert_eq!(pvs.visible_leaves(&world), vec![1, 2]);
    }

    #[test]
    fn test_novis_and_lockpvs() {
        let mut map = TestMap::two_rooms();
        map.visibility = TestMap::vis_lump(&[0x01, 0x02]);
        let world = load(&map);

        let mut pvs = PvsState::new();
        let c0 = ViewClusters::setup(&world, &[32.0, 0.0, 0.0]);
        let c1 = ViewClusters::setup(&world, &[-32.0, 0.0, 0.0]);

        pvs.mark_leaves(&world, c0, true, false);
        assert_eq!(pvs.visible_leaves(&world), vec![0, 1, 2]);

        // same clusters: turning novis off needs a reset
        assert!(!pvs.mark_leaves(&world, c0, false, false));
        pvs.reset();
        pvs.mark_leaves(&world, c0, false, false);
        assert_eq!(pvs.visible_leaves(&world), vec![1]);

        // locked: moving into the other room keeps the old set
        assert!(!pvs.mark_leaves(&world, c1, false, true));
        assert_eq!(pvs.visible_leaves(&world), vec![1]);
        assert!(pvs.mark_leaves(&world, c1, false, false));
        assert_eq!(pvs.visible_leaves(&world), vec![2]);
    }

    #[test]
    fn test_walk_is_front_to_back() {
        let world = load(&TestMap::two_rooms());
        let wall = world.texinfo[0].image.handle;
        let mut ctx = VisContext::new(RenderPass::Scene);

        walk(&world, &mut ctx, [32.0, 0.0, 0.0], false, None);
        assert_eq!(ctx.num_chains(), 1);
        assert_eq!(ctx.chain(wall), Some(&[0usize, 1][..]));

        walk(&world, &mut ctx, [-32.0, 0.0, 0.0], false, None);
        assert_eq!(ctx.chain(wall), Some(&[1usize, 0][..]));
        assert!(ctx.alpha_surfaces().is_empty());
        assert!(ctx.sky_surfaces().is_empty());
    }

    #[test]
    fn test_surfaces_behind_their_plane_are_skipped() {
        let world = load(&TestMap::two_rooms());
        let mut ctx = VisContext::new(RenderPass::Scene);
        // behind the x = 64 wall, inside the solid leaf
        walk(&world, &mut ctx, [80.0, 0.0, 0.0], true, None);
        assert_eq!(ctx.chain(world.texinfo[0].image.handle), Some(&[1usize][..]));
    }

    #[test]
    fn test_areabits_reject_leaves() {
        let world = load(&TestMap::two_rooms());
        let mut ctx = VisContext::new(RenderPass::Scene);
        walk(&world, &mut ctx, [32.0, 0.0, 0.0], false, Some(&[0x00]));
        assert_eq!(ctx.num_chains(), 0);
        walk(&world, &mut ctx, [32.0, 0.0, 0.0], false, Some(&[0x01]));
        assert_eq!(ctx.num_chains(), 1);
    }

    #[test]
    fn test_only_pvs_leaves_contribute() {
        let mut map = TestMap::two_rooms();
        // cluster 0 sees only the other room
        map.visibility = TestMap::vis_lump(&[0x02, 0x01]);
        let world = load(&map);
        let mut ctx = VisContext::new(RenderPass::Scene);
        walk(&world, &mut ctx, [32.0, 0.0, 0.0], false, None);
        assert_eq!(ctx.chain(world.texinfo[0].image.handle), Some(&[1usize][..]));
    }

    #[test]
    fn test_empty_visible_set_draws_nothing() {
        let mut map = TestMap::two_rooms();
        map.visibility = TestMap::vis_lump(&[0x80, 0x80]);
        let world = load(&map);
        let mut ctx = VisContext::new(RenderPass::Scene);
        walk(&world, &mut ctx, [32.0, 0.0, 0.0], false, None);

        let mut gpu = Gpu::new();
        ctx.draw_texture_chains(&world, &mut gpu.drawer());
        ctx.draw_alpha_surfaces(&world, &mut gpu.drawer());
        assert!(gpu.be.world_draws().is_empty());
    }

    #[test]
    fn test_scene_chains_batch_by_texture() {
        let world = load(&TestMap::two_rooms());
        let mut ctx = VisContext::new(RenderPass::Scene);
        walk(&world, &mut ctx, [32.0, 0.0, 0.0], false, None);

        let mut gpu = Gpu::new();
        ctx.draw_texture_chains(&world, &mut gpu.drawer());

        let draws = gpu.be.world_draws();
        // both walls share texture and lightmap page: one draw, last pushed first
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].len(), 12);
        assert_eq!(draws[0][0], first_vert(&world, 1));
        assert_eq!(gpu.used(ProgramKind::Lm3D), 1);
        assert_eq!(gpu.be.count(|c| matches!(c, BackendCall::BindLightmap(0))), 1);
        assert_eq!(ctx.num_chains(), 0);
    }

    #[test]
    fn test_emission_follows_surf_light() {
        let mut map = TestMap::two_rooms();
        map.texinfo[0].flags = SURF_LIGHT;
        let world = load(&map);
        let mut ctx = VisContext::new(RenderPass::Scene);
        walk(&world, &mut ctx, [32.0, 0.0, 0.0], false, None);

        let mut gpu = Gpu::new();
        let buffer = gpu.ubos.buffer(UniformBlock::ThreeD);
        ctx.draw_texture_chains(&world, &mut gpu.drawer());
        // raised for the chain, dropped afterwards
        let uploads = gpu
            .be
            .count(|c| matches!(c, BackendCall::UploadUniformBuffer { buffer: b, .. } if *b == buffer));
        assert_eq!(uploads, 2);
        assert_eq!(gpu.ubos.three_d.emission, 0.0);
    }

    #[test]
    fn test_alpha_surfaces_drawn_back_to_front() {
        let mut map = TestMap::two_rooms();
        map.texinfo[0].flags = SURF_TRANS33;
        let world = load(&map);
        let mut ctx = VisContext::new(RenderPass::Scene);
        walk(&world, &mut ctx, [32.0, 0.0, 0.0], false, None);
        assert_eq!(ctx.num_chains(), 0);
        assert_eq!(ctx.alpha_surfaces().len(), 2);

        let mut gpu = Gpu::new();
        ctx.draw_alpha_surfaces(&world, &mut gpu.drawer());
        let draws = gpu.be.world_draws();
        assert_eq!(draws.len(), 2);
        // face 1 at x = -64 is the farther one
        assert_eq!(draws[0][0], first_vert(&world, 1));
        assert_eq!(draws[1][0], first_vert(&world, 0));

        assert_eq!(gpu.used(ProgramKind::Trans3D), 1);
        assert_eq!(gpu.be.count(|c| *c == BackendCall::SetBlend(BlendMode::Alpha)), 1);
        assert_eq!(gpu.be.calls.last(), Some(&BackendCall::SetBlend(BlendMode::Off)));
        assert_eq!(gpu.ubos.three_d.alpha, 1.0);
        assert!(ctx.alpha_surfaces().is_empty());
    }

    #[test]
    fn test_shadow_pass_uses_single_chain() {
        let mut map = TestMap::two_rooms();
        map.texinfo[0].flags = SURF_TRANS66;
        let world = load(&map);
        let mut ctx = VisContext::new(RenderPass::Shadow);
        walk(&world, &mut ctx, [32.0, 0.0, 0.0], false, None);
        assert_eq!(ctx.depth_surfaces(), &[0, 1]);
        assert!(ctx.alpha_surfaces().is_empty());

        let mut gpu = Gpu::new();
        ctx.draw_texture_chains(&world, &mut gpu.drawer());
        assert_eq!(gpu.be.world_draws().len(), 1);
        assert_eq!(gpu.be.count(|c| matches!(c, BackendCall::UseProgram(_))), 0);
        assert_eq!(gpu.be.count(|c| matches!(c, BackendCall::BindLightmap(_))), 0);
        assert!(ctx.depth_surfaces().is_empty());
    }

    #[test]
    fn test_brush_model_backface_test() {
        let world = load(&TestMap::two_rooms());
        let model = world.submodels[1];
        let entity = Entity { alpha: 1.0, ..Default::default() };
        let mut ctx = VisContext::new(RenderPass::Scene);
        ctx.begin_frame(&world);

        // the only face points up
        let above = open_view([32.0, 0.0, 100.0]);
        let mut gpu = Gpu::new();
        ctx.draw_brush_model(&world, &model, &entity, &above, &[32.0, 0.0, 100.0], &mut gpu.drawer());
        assert_eq!(gpu.be.world_draws().len(), 1);
        assert_eq!(gpu.used(ProgramKind::Lm3D), 1);
        assert_eq!(gpu.ubos.three_d.trans_model, IDENTITY);

        let below = open_view([32.0, 0.0, 0.0]);
        let mut gpu = Gpu::new();
        ctx.draw_brush_model(&world, &model, &entity, &below, &[32.0, 0.0, 0.0], &mut gpu.drawer());
        assert!(gpu.be.world_draws().is_empty());
    }

    #[test]
    fn test_brush_model_moved_and_culled() {
        let world = load(&TestMap::two_rooms());
        let model = world.submodels[1];
        let mut ctx = VisContext::new(RenderPass::Shadow);
        ctx.begin_frame(&world);

        // lowered by 32 units the face is above the eye at z = 0
        let entity = Entity { origin: [0.0, 0.0, -32.0], ..Default::default() };
        let eye = [32.0, 0.0, 0.0];
        let mut gpu = Gpu::new();
        ctx.draw_brush_model(&world, &model, &entity, &open_view(eye), &eye, &mut gpu.drawer());
        assert_eq!(gpu.be.world_draws().len(), 1);

        // behind a culling view
        let mut view = ViewParams::new(eye, [0.0, 180.0, 0.0], 90.0, 90.0, 4.0, 4096.0, 1.0);
        view.cull = true;
        let entity = Entity { origin: [200.0, 0.0, -32.0], ..Default::default() };
        let mut gpu = Gpu::new();
        ctx.draw_brush_model(&world, &model, &entity, &view, &eye, &mut gpu.drawer());
        assert!(gpu.be.world_draws().is_empty());
    }
}
