// area_alloc.rs — free-rectangle packer for the shadow atlases
// Converted from: src/common/areaalloc.c

/// Half-open rectangle `[left, right) x [top, bottom)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AreaRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl AreaRect {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self { left, top, right, bottom }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> i64 {
        self.width() as i64 * self.height() as i64
    }

    pub fn intersects(&self, other: &AreaRect) -> bool {
        self.left < other.right && self.right > other.left && self.top < other.bottom && self.bottom > other.top
    }

    pub fn contains(&self, other: &AreaRect) -> bool {
        other.left >= self.left && other.right <= self.right && other.top >= self.top && other.bottom <= self.bottom
    }
}

/// Rectangle packer over a 2D atlas. There is no free operation; callers
/// re-`init` the whole area when its contents are rebuilt.
#[derive(Debug, Clone)]
pub struct AreaAllocator {
    width: i32,
    height: i32,
    max_width: i32,
    max_height: i32,
    free: Vec<AreaRect>,
    grow_width_next: bool,
}

impl AreaAllocator {
    pub fn new(width: i32, height: i32, max_width: i32, max_height: i32) -> Self {
        let mut alloc = Self {
            width: 0,
            height: 0,
            max_width: 0,
            max_height: 0,
            free: Vec::new(),
            grow_width_next: false,
        };
        alloc.init(width, height, max_width, max_height);
        alloc
    }

    /// Resets to a single free rectangle covering `width x height`.
    pub fn init(&mut self, width: i32, height: i32, max_width: i32, max_height: i32) {
        self.width = width.max(0);
        self.height = height.max(0);
        self.max_width = max_width.max(self.width);
        self.max_height = max_height.max(self.height);
        self.free.clear();
        self.free.push(AreaRect::new(0, 0, self.width, self.height));
        self.grow_width_next = false;
    }

    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn free_areas(&self) -> &[AreaRect] {
        &self.free
    }

    /// Reserves a `width x height` region and returns its top-left corner,
    /// growing the atlas when nothing fits. None once growth is exhausted.
    pub fn allocate(&mut self, width: i32, height: i32) -> Option<(i32, i32)> {
        let width = width.max(0);
        let height = height.max(0);

        loop {
            if let Some(best) = self.best_fit(width, height) {
                let reserve = AreaRect::new(best.left, best.top, best.left + width, best.top + height);
                self.split(&reserve);
                self.cleanup();
                return Some((reserve.left, reserve.top));
            }

            if width == 0 || height == 0 {
                // nothing left to split, an empty region fits anywhere
                return Some((0, 0));
            }

            if !self.grow() {
                return None;
            }
        }
    }

    /// Smallest-area free rectangle that fits, first in scan order on ties.
    fn best_fit(&self, width: i32, height: i32) -> Option<AreaRect> {
        let mut best: Option<AreaRect> = None;
        for area in &self.free {
            if area.width() < width || area.height() < height {
                continue;
            }
            match best {
                Some(b) if b.area() <= area.area() => {}
                _ => best = Some(*area),
            }
        }
        best
    }

    fn split(&mut self, reserve: &AreaRect) {
        if reserve.area() == 0 {
            return;
        }

        let mut remaining = Vec::with_capacity(self.free.len() + 4);
        for area in self.free.drain(..) {
            if !area.intersects(reserve) {
                remaining.push(area);
                continue;
            }

            if reserve.right < area.right {
                remaining.push(AreaRect::new(reserve.right, area.top, area.right, area.bottom));
            }
            if reserve.left > area.left {
                remaining.push(AreaRect::new(area.left, area.top, reserve.left, area.bottom));
            }
            if reserve.bottom < area.bottom {
                remaining.push(AreaRect::new(area.left, reserve.bottom, area.right, area.bottom));
            }
            if reserve.top > area.top {
                remaining.push(AreaRect::new(area.left, area.top, area.right, reserve.top));
            }
        }
        self.free = remaining;
    }

    /// Drops every free rectangle contained in another one.
    fn cleanup(&mut self) {
        let mut i = 0;
        while i < self.free.len() {
            let a = self.free[i];
            let contained = self
                .free
                .iter()
                .enumerate()
                .any(|(j, b)| j != i && b.contains(&a) && (a != *b || j < i));
            if contained {
                self.free.remove(i);
            } else {
                i += 1;
            }
        }
    }

    /// Doubles one dimension, height first, then alternating. Falls back to
    /// the other axis once one has reached its maximum.
    fn grow(&mut self) -> bool {
        let can_grow_width = self.width > 0 && self.width * 2 <= self.max_width;
        let can_grow_height = self.height > 0 && self.height * 2 <= self.max_height;

        let grow_width = match (self.grow_width_next, can_grow_width, can_grow_height) {
            (_, false, false) => return false,
            (true, true, _) | (false, true, false) => true,
            _ => false,
        };

        if grow_width {
            self.free.push(AreaRect::new(self.width, 0, self.width * 2, self.height));
            self.width *= 2;
        } else {
            self.free.push(AreaRect::new(0, self.height, self.width, self.height * 2));
            self.height *= 2;
        }
        self.grow_width_next = !grow_width;
        log::debug!("AreaAlloc: grown to {}x{}", self.width, self.height);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn overlaps(a: &AreaRect, b: &AreaRect) -> bool {
        a.intersects(b)
    }

    #[test]
    fn test_first_allocation_at_origin() {
        let mut alloc = AreaAllocator::new(256, 256, 256, 256);
        assert_eq!(alloc.allocate(64, 32), Some((0, 0)));
    }

    #[test]
    fn test_two_halves_fit() {
        let mut alloc = AreaAllocator::new(128, 64, 128, 64);
        let a = alloc.allocate(64, 64).unwrap();
        let b = alloc.allocate(64, 64).unwrap();
        assert_ne!(a, b);
        assert!(alloc.allocate(1, 1).is_none());
    }

    #[test]
    fn test_smallest_fit_is_chosen() {
        let mut alloc = AreaAllocator::new(100, 100, 100, 100);
        // right remainder 40x100, bottom remainder 100x50
        alloc.allocate(60, 50).unwrap();
        assert_eq!(alloc.allocate(30, 30), Some((60, 0)));

        // equal areas, scan order picks the right-hand one
        let mut alloc = AreaAllocator::new(100, 100, 100, 100);
        alloc.allocate(40, 40).unwrap();
        assert_eq!(alloc.allocate(50, 30), Some((40, 0)));
    }

    #[test]
    fn test_zero_size_always_succeeds() {
        let mut alloc = AreaAllocator::new(16, 16, 16, 16);
        alloc.allocate(16, 16).unwrap();
        assert!(alloc.allocate(-5, 0).is_some());
        assert!(alloc.allocate(0, 0).is_some());
    }

    #[test]
    fn test_growth_doubles_height_first() {
        let mut alloc = AreaAllocator::new(64, 64, 256, 256);
        alloc.allocate(64, 64).unwrap();
        let (x, y) = alloc.allocate(64, 64).unwrap();
        assert_eq!((x, y), (0, 64));
        assert_eq!((alloc.width(), alloc.height()), (64, 128));
        let (x, y) = alloc.allocate(64, 64).unwrap();
        assert_eq!(x, 64);
        assert!(y == 0 || y == 64);
        assert_eq!((alloc.width(), alloc.height()), (128, 128));
    }

    #[test]
    fn test_growth_falls_back_to_other_axis() {
        let mut alloc = AreaAllocator::new(64, 64, 512, 64);
        alloc.allocate(64, 64).unwrap();
        assert_eq!(alloc.allocate(64, 64), Some((64, 0)));
        assert_eq!((alloc.width(), alloc.height()), (128, 64));
    }

    #[test]
    fn test_growth_exhausted() {
        let mut alloc = AreaAllocator::new(32, 32, 64, 64);
        for _ in 0..4 {
            assert!(alloc.allocate(32, 32).is_some());
        }
        assert!(alloc.allocate(32, 32).is_none());
    }

    #[test]
    fn test_random_allocations_never_overlap() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut alloc = AreaAllocator::new(1024, 1024, 1024, 1024);
        let mut placed: Vec<AreaRect> = Vec::new();
        for _ in 0..300 {
            let w = rng.gen_range(1..96);
            let h = rng.gen_range(1..96);
            if let Some((x, y)) = alloc.allocate(w, h) {
                let r = AreaRect::new(x, y, x + w, y + h);
                assert!(r.right <= alloc.width() && r.bottom <= alloc.height());
                for p in &placed {
                    assert!(!overlaps(p, &r), "{:?} overlaps {:?}", p, r);
                }
                placed.push(r);
            }
        }
        assert!(placed.len() > 50);
    }

    #[test]
    fn test_free_list_has_no_contained_rects() {
        let mut alloc = AreaAllocator::new(512, 512, 512, 512);
        for (w, h) in [(100, 50), (30, 200), (64, 64), (250, 10)] {
            alloc.allocate(w, h).unwrap();
        }
        let free = alloc.free_areas();
        for (i, a) in free.iter().enumerate() {
            for (j, b) in free.iter().enumerate() {
                if i != j {
                    assert!(!b.contains(a), "{:?} inside {:?}", a, b);
                }
            }
        }
    }
}
