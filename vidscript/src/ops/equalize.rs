//! `histogram_equalization` — spread a grayscale image's contrast.
//!
//! Two tiled phases: a histogram reduction over the whole image, then a
//! per-pixel remap through the cumulative distribution,
//! `dst = (cdf[src] - cdf_min) / (pixels - cdf_min) * 255`.

use crate::compiler::OpClosure;
use crate::error::{Result, ScriptError};
use crate::histogram::{Histogram, BINS};
use crate::item::{Item, ItemType};
use crate::parser::{
    Constraint, Operation, Overload, ParamKind, ParameterDef, ParameterSet, ScriptArg, ScriptNode,
};
use crate::tiling::{TileRect, TilingParams};

use super::{hist::histogram_of_plane, run_tiled_unary, tiling_params_for, unpadded};

pub struct HistogramEqualization;

fn gray_result(_args: &[ScriptArg]) -> Result<ItemType> {
    Ok(ItemType::GrayImage)
}

/// Cumulative distribution of a histogram.
fn cumulative(histogram: &Histogram) -> [u64; BINS] {
    let mut cdf = [0u64; BINS];
    let mut running = 0u64;
    for (bin, slot) in cdf.iter_mut().enumerate() {
        running += histogram[bin];
        *slot = running;
    }
    cdf
}

/// Build the 256-entry remap table from the cumulative distribution.
fn remap_table(cdf: &[u64; BINS], pixels: u64) -> [u8; BINS] {
    let cdf_min = cdf.iter().copied().find(|&c| c > 0).unwrap_or(0);
    let denom = pixels.saturating_sub(cdf_min);
    let mut table = [0u8; BINS];
    if denom == 0 {
        // Flat image; the map is the identity of its single value.
        return table;
    }
    for (bin, slot) in table.iter_mut().enumerate() {
        let scaled = (cdf[bin].saturating_sub(cdf_min)) as f64 / denom as f64 * 255.0;
        *slot = scaled as u8;
    }
    table
}

impl Operation for HistogramEqualization {
    fn name(&self) -> &'static str {
        "histogram_equalization"
    }

    fn category(&self) -> &'static str {
        "enhancement"
    }

    fn result_types(&self) -> Vec<ItemType> {
        vec![ItemType::GrayImage]
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::new(vec![ParameterDef {
            name: "image",
            description: "input image",
            unit: "",
            constraint: Constraint::None,
        }])
    }

    fn overloads(&self) -> Vec<Overload> {
        vec![Overload {
            params: vec![ParamKind::Gray],
            result: gray_result,
        }]
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let input_id = node.args[0].ref_id().unwrap_or_default();

        super::closure("histogram_equalization", move |ctx| {
            let image = unpadded(&ctx.load_image(input_id)?);
            let params = tiling_params_for(ctx, &image);

            let histogram = histogram_of_plane(image.plane(0), &params)?;
            let pixels = histogram.total();
            if pixels == 0 {
                return Err(ScriptError::evaluate(
                    "histogram_equalization",
                    "empty image",
                ));
            }
            let table = remap_table(&cumulative(&histogram), pixels);

            let kernel = move |src: &[u8], dst: &mut [u8], tile: TileRect, p: &TilingParams| {
                let stride = p.image_width;
                for y in tile.y0..tile.y1 {
                    for x in tile.x0..tile.x1 {
                        let i = y * stride + x;
                        dst[i] = table[src[i] as usize];
                    }
                }
            };
            let out = run_tiled_unary(&image, &params, &kernel)?;
            Ok(Item::from_image(out))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    fn equalize(image: Image) -> Image {
        let processor = crate::processor::ImageProcessor::with_threads(2).unwrap();
        let id = processor
            .compile("a = input(\"gray\", 8);\nb = histogram_equalization(a);\nb")
            .unwrap();
        processor.evaluate(id, image).unwrap().into_image().unwrap()
    }

    #[test]
    fn two_level_image_stretches_to_full_range() {
        // Half 100, half 150: equalization pushes the levels apart.
        let mut plane = vec![100u8; 32];
        plane.extend(vec![150u8; 32]);
        let out = equalize(Image::gray_from_plane(8, 8, plane).unwrap());
        let low = out.plane(0).iter().copied().min().unwrap();
        let high = out.plane(0).iter().copied().max().unwrap();
        assert_eq!(low, 0);
        assert_eq!(high, 255);
    }

    #[test]
    fn flat_image_stays_flat() {
        let out = equalize(Image::gray_from_plane(4, 4, vec![77; 16]).unwrap());
        let first = out.plane(0)[0];
        assert!(out.plane(0).iter().all(|&p| p == first));
    }

    #[test]
    fn remap_is_monotone() {
        let mut histogram = Histogram::new();
        for v in [0u8, 10, 10, 40, 200, 200, 200, 255] {
            histogram.push(v);
        }
        let table = remap_table(&cumulative(&histogram), histogram.total());
        for pair in table.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
    }
}
