//! `histogram` — 256-bin histogram as a tiled reduction.
//!
//! The per-tile kernel counts its own samples; partial histograms meet in the
//! scheduler's merge functors. Histogram addition is associative and
//! commutative, so the result is independent of tile shape and merge order.

use crate::compiler::OpClosure;
use crate::error::Result;
use crate::histogram::Histogram;
use crate::item::{Item, ItemType};
use crate::parser::{
    Constraint, Operation, Overload, ParamKind, ParameterDef, ParameterSet, ScriptArg, ScriptNode,
};
use crate::tiling::{self, TileRect, TilingParams};

use super::{tiling_params_for, unpadded};

pub struct HistogramOp;

/// Tiled histogram of one plane.
pub(crate) fn histogram_of_plane(plane: &[u8], params: &TilingParams) -> Result<Histogram> {
    let stride = params.image_width;
    let region = TileRect::full(params.image_width, params.image_height);
    let merge = |a: Histogram, b: Histogram| a + b;
    tiling::reduce_tiles(
        region,
        params.cutoff_x,
        params.cutoff_y,
        &|tile| {
            let mut histogram = Histogram::new();
            for y in tile.y0..tile.y1 {
                for x in tile.x0..tile.x1 {
                    histogram.push(plane[y * stride + x]);
                }
            }
            Ok(histogram)
        },
        &merge,
        &merge,
    )
}

fn result_type(args: &[ScriptArg]) -> Result<ItemType> {
    Ok(match args[0].item_type() {
        ItemType::GrayImage => ItemType::Histogram,
        _ => ItemType::List,
    })
}

impl Operation for HistogramOp {
    fn name(&self) -> &'static str {
        "histogram"
    }

    fn category(&self) -> &'static str {
        "statistics"
    }

    fn result_types(&self) -> Vec<ItemType> {
        vec![ItemType::Histogram, ItemType::List]
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
            params: vec![ParamKind::AnyImage],
            result: result_type,
        }]
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let input_id = node.args[0].ref_id().unwrap_or_default();

        super::closure("histogram", move |ctx| {
            let image = unpadded(&ctx.load_image(input_id)?);
            let params = tiling_params_for(ctx, &image);
            if image.is_gray() {
                Ok(Item::Histogram(histogram_of_plane(image.plane(0), &params)?))
            } else {
                let mut per_channel = Vec::with_capacity(3);
                for c in 0..3 {
                    per_channel.push(Item::Histogram(histogram_of_plane(
                        image.plane(c),
                        &params,
                    )?));
                }
                Ok(Item::List(per_channel))
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A 256-wide gradient counts every value once per row, whatever the
    /// tile cutoffs are.
    #[test]
    fn gradient_histogram_is_cutoff_independent() {
        let height = 64usize;
        let mut plane = Vec::with_capacity(256 * height);
        for _ in 0..height {
            for x in 0..256usize {
                plane.push(x as u8);
            }
        }

        let fine = histogram_of_plane(&plane, &TilingParams::new(256, height, 16, 16)).unwrap();
        let coarse =
            histogram_of_plane(&plane, &TilingParams::new(256, height, 2048, 2048)).unwrap();

        assert_eq!(fine, coarse);
        assert!(fine.bins().iter().all(|&c| c == height as u64));
    }
}
