//! Built-in image operations.
//!
//! Every leaf follows the same contract: declare name/category/result types
//! and a validated parameter set, contribute parse-time overloads, and build
//! an execution closure that pulls its inputs from the processing context,
//! runs through the tiling scheduler and returns one new item. Adding an
//! operation means adding a file here and listing it in [`default_ops`].

use std::sync::Arc;

use crate::context::ProcessingContext;
use crate::error::{Result, ScriptError};
use crate::image::Image;
use crate::parser::Operation;
use crate::tiling::{self, BorderMode, PlanePtr, TileRect, TilingParams};

mod convert;
mod diff;
mod equalize;
mod hist;
mod input;
mod logic;
mod mean;
mod multiply_add;
mod pooling;
mod resize;
mod sobel;
mod threshold;

pub use threshold::otsu_threshold;

/// The built-in operation catalogue.
pub fn default_ops() -> Vec<Box<dyn Operation>> {
    vec![
        Box::new(input::Input),
        Box::new(mean::Mean),
        Box::new(diff::Diff),
        Box::new(logic::And),
        Box::new(multiply_add::MultiplyAdd),
        Box::new(threshold::Threshold),
        Box::new(threshold::BinaryThreshold),
        Box::new(sobel::Sobel),
        Box::new(sobel::Scharr),
        Box::new(pooling::Pooling),
        Box::new(resize::Resize),
        Box::new(hist::HistogramOp),
        Box::new(equalize::HistogramEqualization),
        Box::new(convert::ConvertToGray),
        Box::new(convert::ConvertToRgb),
    ]
}

/// Tiling parameters for an operation over `image`, honoring the
/// evaluation-wide `cutoff_x`/`cutoff_y` parameters.
pub(crate) fn tiling_params_for(ctx: &ProcessingContext, image: &Image) -> TilingParams {
    TilingParams::new(
        image.width() as usize,
        image.height() as usize,
        ctx.param_usize("cutoff_x", 512),
        ctx.param_usize("cutoff_y", 512),
    )
}

/// Drop row padding so kernels can index planes as `y * width + x`.
pub(crate) fn unpadded(image: &Image) -> Image {
    if image.padding() == 0 {
        return image.clone();
    }
    let (w, h) = (image.width() as usize, image.height() as usize);
    let stride = image.stride();
    let planes = (0..image.channels())
        .map(|c| {
            let src = image.plane(c);
            let mut plane = Vec::with_capacity(w * h);
            for y in 0..h {
                plane.extend_from_slice(&src[y * stride..y * stride + w]);
            }
            plane
        })
        .collect();
    Image::from_planes(image.width(), image.height(), 0, planes)
        .expect("repacked planes have exact length")
}

/// Per-plane tile kernel: `(src, dst, tile, params)`.
pub(crate) type UnaryKernel = dyn Fn(&[u8], &mut [u8], TileRect, &TilingParams) + Sync;
/// Per-plane tile kernel with two sources: `(src1, src2, dst, tile, params)`.
pub(crate) type BinaryKernel = dyn Fn(&[u8], &[u8], &mut [u8], TileRect, &TilingParams) + Sync;

/// Run a single-input, image-to-image operation tiled over every channel.
pub(crate) fn run_tiled_unary(
    src: &Image,
    params: &TilingParams,
    kernel: &UnaryKernel,
) -> Result<Image> {
    let src = unpadded(src);
    let (w, h) = (src.width() as usize, src.height() as usize);
    let region = TileRect::full(w, h);

    let mut out_planes: Vec<Vec<u8>> = (0..src.channels()).map(|_| vec![0u8; w * h]).collect();
    for (c, out) in out_planes.iter_mut().enumerate() {
        let dst = PlanePtr::new(out);
        let plane = src.plane(c);
        tiling::for_each_tile(region, params.cutoff_x, params.cutoff_y, &|tile| {
            // Safety: tile regions are disjoint; the kernel writes only
            // inside its tile.
            kernel(plane, unsafe { dst.plane() }, tile, params);
            Ok(())
        })?;
    }
    Image::from_planes(src.width(), src.height(), 0, out_planes)
}

/// Run a two-input, image-to-image operation tiled over every channel.
pub(crate) fn run_tiled_binary(
    src1: &Image,
    src2: &Image,
    params: &TilingParams,
    kernel: &BinaryKernel,
) -> Result<Image> {
    if src1.width() != src2.width()
        || src1.height() != src2.height()
        || src1.channels() != src2.channels()
    {
        return Err(ScriptError::evaluate(
            "binary-op",
            format!(
                "input shapes differ: {}x{}x{} vs {}x{}x{}",
                src1.width(),
                src1.height(),
                src1.channels(),
                src2.width(),
                src2.height(),
                src2.channels()
            ),
        ));
    }
    let src1 = unpadded(src1);
    let src2 = unpadded(src2);
    let (w, h) = (src1.width() as usize, src1.height() as usize);
    let region = TileRect::full(w, h);

    let mut out_planes: Vec<Vec<u8>> = (0..src1.channels()).map(|_| vec![0u8; w * h]).collect();
    for (c, out) in out_planes.iter_mut().enumerate() {
        let dst = PlanePtr::new(out);
        let a = src1.plane(c);
        let b = src2.plane(c);
        tiling::for_each_tile(region, params.cutoff_x, params.cutoff_y, &|tile| {
            // Safety: tile regions are disjoint; the kernel writes only
            // inside its tile.
            kernel(a, b, unsafe { dst.plane() }, tile, params);
            Ok(())
        })?;
    }
    Image::from_planes(src1.width(), src1.height(), 0, out_planes)
}

/// Run an operation whose output size differs from the input, tiled over the
/// destination region. The kernel receives destination-space tiles.
pub(crate) fn run_tiled_to_size(
    src: &Image,
    dst_width: usize,
    dst_height: usize,
    params: &TilingParams,
    kernel: &UnaryKernel,
) -> Result<Image> {
    let src = unpadded(src);
    let region = TileRect::full(dst_width, dst_height);

    let mut out_planes: Vec<Vec<u8>> =
        (0..src.channels()).map(|_| vec![0u8; dst_width * dst_height]).collect();
    for (c, out) in out_planes.iter_mut().enumerate() {
        let dst = PlanePtr::new(out);
        let plane = src.plane(c);
        tiling::for_each_tile(region, params.cutoff_x, params.cutoff_y, &|tile| {
            // Safety: tile regions are disjoint; the kernel writes only
            // inside its tile.
            kernel(plane, unsafe { dst.plane() }, tile, params);
            Ok(())
        })?;
    }
    Image::from_planes(dst_width as u32, dst_height as u32, 0, out_planes)
}

/// Sample a plane with border handling; `None` means "skip this sample"
/// (only produced by [`BorderMode::Ignore`], whose callers clamp the
/// iteration range instead).
#[inline]
pub(crate) fn sample_bordered(
    plane: &[u8],
    x: i64,
    y: i64,
    width: i64,
    height: i64,
    mode: BorderMode,
) -> u8 {
    let (x, y) = match mode {
        BorderMode::Constant => {
            if x < 0 || y < 0 || x >= width || y >= height {
                return 0;
            }
            (x, y)
        }
        BorderMode::Mirror => {
            let reflect = |v: i64, len: i64| -> i64 {
                if v < 0 {
                    -v - 1
                } else if v >= len {
                    2 * len - v - 1
                } else {
                    v
                }
            };
            (reflect(x, width), reflect(y, height))
        }
        // Ignore-mode kernels never sample outside their clamped range.
        BorderMode::Ignore => (x.clamp(0, width - 1), y.clamp(0, height - 1)),
    };
    plane[(y * width + x) as usize]
}

/// Intersect a tile with the interior region `[margin_x, w-margin_x) x
/// [margin_y, h-margin_y)`; used by ignore-mode kernels.
pub(crate) fn clamp_to_interior(
    tile: TileRect,
    margin_x: usize,
    margin_y: usize,
    width: usize,
    height: usize,
) -> Option<TileRect> {
    let x0 = tile.x0.max(margin_x);
    let x1 = tile.x1.min(width.saturating_sub(margin_x));
    let y0 = tile.y0.max(margin_y);
    let y1 = tile.y1.min(height.saturating_sub(margin_y));
    (x0 < x1 && y0 < y1).then_some(TileRect { x0, x1, y0, y1 })
}

/// Wrap a pure function as an operation closure with uniform error context.
pub(crate) fn closure<F>(op: &'static str, f: F) -> crate::compiler::OpClosure
where
    F: Fn(&ProcessingContext) -> Result<crate::item::Item> + Send + Sync + 'static,
{
    Arc::new(move |ctx| {
        f(ctx).map_err(|e| match e {
            e @ ScriptError::Evaluate { .. } => e,
            other => ScriptError::evaluate(op, other.to_string()),
        })
    })
}
