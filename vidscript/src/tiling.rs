//! Recursive 2D tiling scheduler.
//!
//! Image-shaped operations are decomposed into tiles by halving the region
//! along Y, then along X, until both spans fit under the configured cutoffs;
//! the per-tile kernel runs on the leaf tiles, in parallel across the worker
//! pool via `rayon::join`. Reduction-shaped operations (histograms, cluster
//! accumulation) additionally supply horizontal and vertical merge functors
//! that combine two child results as the recursion unwinds. Merge functors
//! must be associative and commutative; the scheduler gives no guarantee
//! about the order partial results meet.
//!
//! Guarantees:
//! - the leaf tiles of a region form an exact partition of it,
//! - a region whose spans are already within the cutoffs is passed to the
//!   kernel whole,
//! - errors from any tile abort the recursion and surface to the caller.

use crate::error::{Result, ScriptError};

/// Sampling policy for kernels that read outside the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BorderMode {
    /// Leave a kernel-sized margin untouched.
    Ignore,
    /// Treat out-of-bounds samples as 0.
    Constant,
    /// Reflect coordinates around the edge.
    Mirror,
}

impl BorderMode {
    pub fn parse(text: &str) -> Result<Self> {
        match text {
            "ignore" => Ok(BorderMode::Ignore),
            "constant" => Ok(BorderMode::Constant),
            "mirror" => Ok(BorderMode::Mirror),
            other => Err(ScriptError::InvalidParameter(format!(
                "unknown border mode '{other}'"
            ))),
        }
    }
}

/// Half-open pixel region `[x0, x1) x [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x0: usize,
    pub x1: usize,
    pub y0: usize,
    pub y1: usize,
}

impl TileRect {
    pub fn full(width: usize, height: usize) -> Self {
        Self {
            x0: 0,
            x1: width,
            y0: 0,
            y1: height,
        }
    }

    pub fn width(&self) -> usize {
        self.x1 - self.x0
    }

    pub fn height(&self) -> usize {
        self.y1 - self.y0
    }
}

/// Parameters shared by every tile kernel of one operation run.
#[derive(Debug, Clone)]
pub struct TilingParams {
    pub cutoff_x: usize,
    pub cutoff_y: usize,
    pub image_width: usize,
    pub image_height: usize,
    /// Output dimensions when they differ from the input (resize, pooling).
    pub dst_width: usize,
    pub dst_height: usize,
    pub border_mode: BorderMode,
    /// Per-operation integer arguments (filter sizes, offsets, ...).
    pub ints: Vec<i32>,
    /// Per-operation real arguments.
    pub reals: Vec<f64>,
}

impl TilingParams {
    pub fn new(image_width: usize, image_height: usize, cutoff_x: usize, cutoff_y: usize) -> Self {
        Self {
            cutoff_x: cutoff_x.max(1),
            cutoff_y: cutoff_y.max(1),
            image_width,
            image_height,
            dst_width: image_width,
            dst_height: image_height,
            border_mode: BorderMode::Constant,
            ints: Vec::new(),
            reals: Vec::new(),
        }
    }
}

/// Run `kernel` once for every leaf tile of `region`, in parallel.
pub fn for_each_tile<K>(region: TileRect, cutoff_x: usize, cutoff_y: usize, kernel: &K) -> Result<()>
where
    K: Fn(TileRect) -> Result<()> + Sync,
{
    if region.height() > cutoff_y {
        let mid = region.y0 + region.height() / 2;
        let top = TileRect { y1: mid, ..region };
        let bottom = TileRect { y0: mid, ..region };
        let (a, b) = rayon::join(
            || for_each_tile(top, cutoff_x, cutoff_y, kernel),
            || for_each_tile(bottom, cutoff_x, cutoff_y, kernel),
        );
        a.and(b)
    } else if region.width() > cutoff_x {
        let mid = region.x0 + region.width() / 2;
        let left = TileRect { x1: mid, ..region };
        let right = TileRect { x0: mid, ..region };
        let (a, b) = rayon::join(
            || for_each_tile(left, cutoff_x, cutoff_y, kernel),
            || for_each_tile(right, cutoff_x, cutoff_y, kernel),
        );
        a.and(b)
    } else {
        kernel(region)
    }
}

/// Fold `kernel` results over the leaf tiles of `region`.
///
/// Vertical splits combine child results with `v_merge`, horizontal splits
/// with `h_merge`; the fold shape follows the recursion, so both functors
/// must be associative and commutative.
pub fn reduce_tiles<T, K, HM, VM>(
    region: TileRect,
    cutoff_x: usize,
    cutoff_y: usize,
    kernel: &K,
    h_merge: &HM,
    v_merge: &VM,
) -> Result<T>
where
    T: Send,
    K: Fn(TileRect) -> Result<T> + Sync,
    HM: Fn(T, T) -> T + Sync,
    VM: Fn(T, T) -> T + Sync,
{
    if region.height() > cutoff_y {
        let mid = region.y0 + region.height() / 2;
        let top = TileRect { y1: mid, ..region };
        let bottom = TileRect { y0: mid, ..region };
        let (a, b) = rayon::join(
            || reduce_tiles(top, cutoff_x, cutoff_y, kernel, h_merge, v_merge),
            || reduce_tiles(bottom, cutoff_x, cutoff_y, kernel, h_merge, v_merge),
        );
        Ok(v_merge(a?, b?))
    } else if region.width() > cutoff_x {
        let mid = region.x0 + region.width() / 2;
        let left = TileRect { x1: mid, ..region };
        let right = TileRect { x0: mid, ..region };
        let (a, b) = rayon::join(
            || reduce_tiles(left, cutoff_x, cutoff_y, kernel, h_merge, v_merge),
            || reduce_tiles(right, cutoff_x, cutoff_y, kernel, h_merge, v_merge),
        );
        Ok(h_merge(a?, b?))
    } else {
        kernel(region)
    }
}

/// Shared handle to an output plane written by concurrent tile kernels.
///
/// Tile regions are pairwise disjoint, so concurrent kernels never write the
/// same sample. The handle hands each kernel a mutable view of the whole
/// plane; the kernel must only write inside its own tile.
pub struct PlanePtr {
    ptr: *mut u8,
    len: usize,
}

unsafe impl Send for PlanePtr {}
unsafe impl Sync for PlanePtr {}

impl PlanePtr {
    pub fn new(plane: &mut [u8]) -> Self {
        Self {
            ptr: plane.as_mut_ptr(),
            len: plane.len(),
        }
    }

    /// # Safety
    ///
    /// The caller must restrict writes to sample indices inside its own tile
    /// region so no two concurrent kernels alias a write.
    #[allow(clippy::mut_from_ref)]
    pub unsafe fn plane(&self) -> &mut [u8] {
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collect_tiles(w: usize, h: usize, cx: usize, cy: usize) -> Vec<TileRect> {
        let tiles = Mutex::new(Vec::new());
        for_each_tile(TileRect::full(w, h), cx, cy, &|t| {
            tiles.lock().unwrap().push(t);
            Ok(())
        })
        .unwrap();
        tiles.into_inner().unwrap()
    }

    #[test]
    fn tiles_partition_the_region() {
        let tiles = collect_tiles(13, 7, 4, 3);
        let mut coverage = vec![0u32; 13 * 7];
        for t in &tiles {
            assert!(t.width() <= 4 && t.height() <= 3);
            for y in t.y0..t.y1 {
                for x in t.x0..t.x1 {
                    coverage[y * 13 + x] += 1;
                }
            }
        }
        assert!(coverage.iter().all(|&c| c == 1));
    }

    #[test]
    fn degenerate_cutoff_visits_whole_region() {
        let tiles = collect_tiles(32, 20, 32, 32);
        assert_eq!(tiles, vec![TileRect::full(32, 20)]);
    }

    #[test]
    fn unit_cutoff_visits_every_pixel() {
        let tiles = collect_tiles(5, 4, 1, 1);
        assert_eq!(tiles.len(), 20);
        assert!(tiles.iter().all(|t| t.width() == 1 && t.height() == 1));
    }

    #[test]
    fn reduce_matches_serial_sum() {
        // Sum of pixel "values" x+y over the region, tiled vs. whole.
        let kernel = |t: TileRect| {
            let mut sum = 0u64;
            for y in t.y0..t.y1 {
                for x in t.x0..t.x1 {
                    sum += (x + y) as u64;
                }
            }
            Ok(sum)
        };
        let merge = |a: u64, b: u64| a + b;
        let tiled =
            reduce_tiles(TileRect::full(100, 60), 16, 16, &kernel, &merge, &merge).unwrap();
        let whole =
            reduce_tiles(TileRect::full(100, 60), 128, 128, &kernel, &merge, &merge).unwrap();
        assert_eq!(tiled, whole);
    }
}
