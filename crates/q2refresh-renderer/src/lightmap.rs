// Copyright (C) 1997-2001 Id Software, Inc.
// GPL-2.0-or-later
//
// gl3_lightmap.c -> lightmap.rs
// Lightmap page packing and texel building at load time

use q2refresh_common::qfiles::MAXLIGHTMAPS;

use crate::error::ModelError;
use crate::model_types::{LightmapPage, MSurface, SurfFlags};

pub const BLOCK_WIDTH: i32 = 1024;
pub const BLOCK_HEIGHT: i32 = 512;
pub const MAX_LIGHTMAPS: usize = 16;
pub const LIGHTMAP_BYTES: i32 = 4;

/// Skyline packer filling one page at a time.
pub struct LightmapBuilder {
    allocated: Vec<i32>,
    current: Vec<Vec<u8>>,
    pages: Vec<LightmapPage>,
}

impl Default for LightmapBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl LightmapBuilder {
    pub fn new() -> Self {
        Self {
            allocated: vec![0; BLOCK_WIDTH as usize],
            current: Self::blank_layers(),
            pages: Vec::new(),
        }
    }

    fn blank_layers() -> Vec<Vec<u8>> {
        (0..MAXLIGHTMAPS)
            .map(|_| vec![0u8; (BLOCK_WIDTH * BLOCK_HEIGHT * LIGHTMAP_BYTES) as usize])
            .collect()
    }

    fn init_block(&mut self) {
        self.allocated.iter_mut().for_each(|a| *a = 0);
        self.current = Self::blank_layers();
    }

    /// Finds the lowest spot for a `w x h` block in the current page.
    fn alloc_block(&mut self, w: i32, h: i32) -> Option<(i32, i32)> {
        let mut best = BLOCK_HEIGHT;
        let mut pos = None;

        for i in 0..=(BLOCK_WIDTH - w).max(-1) {
            let i = i as usize;
            let mut best2 = 0;
            let mut j = 0;
            while j < w as usize {
                if self.allocated[i + j] >= best {
                    break;
                }
                best2 = best2.max(self.allocated[i + j]);
                j += 1;
            }
            if j == w as usize {
                // this is a valid spot
                pos = Some((i as i32, best2));
                best = best2;
            }
        }

        let (x, y) = pos?;
        if best + h > BLOCK_HEIGHT {
            return None;
        }
        for a in &mut self.allocated[x as usize..(x + w) as usize] {
            *a = best + h;
        }
        Some((x, y))
    }

    fn flush_page(&mut self) -> Result<(), ModelError> {
        if self.pages.len() + 1 >= MAX_LIGHTMAPS {
            return Err(ModelError::LightmapsFull);
        }
        let layers = std::mem::take(&mut self.current);
        self.pages.push(LightmapPage { layers });
        self.init_block();
        Ok(())
    }

    /// Places `surf`'s lightmap and copies its style layers from `lightdata`.
    pub fn create_surface_lightmap(&mut self, surf: &mut MSurface, lightdata: &[u8]) -> Result<(), ModelError> {
        if surf.flags.intersects(SurfFlags::DRAWSKY | SurfFlags::DRAWTURB) {
            return Ok(());
        }

        let smax = (surf.extents[0] as i32 >> 4) + 1;
        let tmax = (surf.extents[1] as i32 >> 4) + 1;
        if smax < 1 || tmax < 1 {
            return Err(ModelError::BadSurfaceExtents(format!("{}x{} lightmap", smax, tmax)));
        }
        if smax > BLOCK_WIDTH || tmax > BLOCK_HEIGHT {
            return Err(ModelError::LightmapsFull);
        }

        let (s, t) = match self.alloc_block(smax, tmax) {
            Some(p) => p,
            None => {
                self.flush_page()?;
                self.alloc_block(smax, tmax).ok_or(ModelError::LightmapsFull)?
            }
        };
        surf.light_s = s;
        surf.light_t = t;
        surf.lightmaptexturenum = self.pages.len() as i32;

        self.build_light_map(surf, smax, tmax, lightdata);
        Ok(())
    }

    /// Copies the raw samples of every style slot into the matching layer.
    /// Surfaces without light data are full bright in layer 0.
    fn build_light_map(&mut self, surf: &MSurface, smax: i32, tmax: i32, lightdata: &[u8]) {
        let size = (smax * tmax) as usize;
        let stride = (BLOCK_WIDTH * LIGHTMAP_BYTES) as usize;
        let base = ((surf.light_t * BLOCK_WIDTH + surf.light_s) * LIGHTMAP_BYTES) as usize;

        let Some(samples) = surf.samples else {
            let layer = &mut self.current[0];
            for t in 0..tmax as usize {
                let row = base + t * stride;
                layer[row..row + smax as usize * 4].fill(255);
            }
            return;
        };

        for (map, &style) in surf.styles.iter().enumerate() {
            if style == 255 {
                break;
            }
            let src = samples + map * size * 3;
            let layer = &mut self.current[map];
            for t in 0..tmax as usize {
                for s in 0..smax as usize {
                    let i = src + (t * smax as usize + s) * 3;
                    let Some(rgb) = lightdata.get(i..i + 3) else {
                        continue;
                    };
                    let o = base + t * stride + s * 4;
                    layer[o..o + 3].copy_from_slice(rgb);
                    layer[o + 3] = 255;
                }
            }
        }
    }

    /// Flushes the page in progress and returns every page built.
    pub fn finish(mut self) -> Vec<LightmapPage> {
        let layers = std::mem::take(&mut self.current);
        self.pages.push(LightmapPage { layers });
        self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surf(extents: [i16; 2]) -> MSurface {
        MSurface {
            plane: 0,
            flags: SurfFlags::empty(),
            firstedge: 0,
            numedges: 4,
            texturemins: [0, 0],
            extents,
            light_s: 0,
            light_t: 0,
            polys: 0..0,
            texinfo: 0,
            lightmaptexturenum: 0,
            styles: [0, 255, 255, 255],
            samples: Some(0),
        }
    }

    #[test]
    fn test_blocks_pack_side_by_side() {
        let data = vec![10u8; 4096];
        let mut lm = LightmapBuilder::new();
        let mut a = surf([16 * 3, 16 * 3]);
        let mut b = surf([16 * 3, 16 * 3]);
        lm.create_surface_lightmap(&mut a, &data).unwrap();
        lm.create_surface_lightmap(&mut b, &data).unwrap();
        assert_eq!((a.light_s, a.light_t), (0, 0));
        assert_eq!((b.light_s, b.light_t), (4, 0));
        assert_eq!(a.lightmaptexturenum, 0);
    }

    #[test]
    fn test_samples_copied_into_layer() {
        let data: Vec<u8> = (0..12).collect();
        let mut lm = LightmapBuilder::new();
        // 2x2 samples
        let mut s = surf([16, 16]);
        lm.create_surface_lightmap(&mut s, &data).unwrap();
        let pages = lm.finish();
        assert_eq!(pages.len(), 1);
        let layer = &pages[0].layers[0];
        assert_eq!(&layer[0..4], &[0, 1, 2, 255]);
        assert_eq!(&layer[4..8], &[3, 4, 5, 255]);
        let row = (BLOCK_WIDTH * LIGHTMAP_BYTES) as usize;
        assert_eq!(&layer[row..row + 4], &[6, 7, 8, 255]);
    }

    #[test]
    fn test_warp_and_sky_get_no_lightmap() {
        let mut lm = LightmapBuilder::new();
        let mut s = surf([16, 16]);
        s.flags = SurfFlags::DRAWTURB;
        s.lightmaptexturenum = -1;
        lm.create_surface_lightmap(&mut s, &[]).unwrap();
        assert_eq!(s.lightmaptexturenum, -1);
    }

    #[test]
    fn test_negative_extents_rejected() {
        let mut lm = LightmapBuilder::new();
        let mut s = surf([-2000, 16]);
        s.lightmaptexturenum = -1;
        let err = lm.create_surface_lightmap(&mut s, &[]).unwrap_err();
        assert!(matches!(err, ModelError::BadSurfaceExtents(_)));
        assert_eq!(s.lightmaptexturenum, -1);

        // the page is still usable
        let mut ok = surf([16, 16]);
        ok.samples = None;
        lm.create_surface_lightmap(&mut ok, &[]).unwrap();
        assert_eq!((ok.light_s, ok.light_t), (0, 0));
    }

    #[test]
    fn test_full_page_moves_to_next() {
        let mut lm = LightmapBuilder::new();
        // 256x256 texels: 4 fit across, 2 down
        for i in 0..9 {
            let mut s = surf([255 * 16, 255 * 16]);
            s.samples = None;
            lm.create_surface_lightmap(&mut s, &[]).unwrap();
            let expected = if i < 8 { 0 } else { 1 };
            assert_eq!(s.lightmaptexturenum, expected, "surface {}", i);
        }
        assert_eq!(lm.finish().len(), 2);
    }
}
