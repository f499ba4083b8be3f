//! `multiply_add` — per-sample linear transform `px * factor + offset`.

use crate::compiler::OpClosure;
use crate::error::Result;
use crate::item::{Item, ItemType};
use crate::parser::{
    Constraint, Operation, Overload, ParamKind, ParameterDef, ParameterSet, ScriptArg, ScriptNode,
};
use crate::tiling::{TileRect, TilingParams};

use super::{run_tiled_unary, tiling_params_for};

pub struct MultiplyAdd;

fn same_as_input(args: &[ScriptArg]) -> Result<ItemType> {
    Ok(args[0].item_type())
}

fn multiply_add_kernel(src: &[u8], dst: &mut [u8], tile: TileRect, params: &TilingParams) {
    let stride = params.image_width;
    let factor = params.reals[0];
    let offset = params.ints[0] as f64;
    for y in tile.y0..tile.y1 {
        for x in tile.x0..tile.x1 {
            let i = y * stride + x;
            dst[i] = (src[i] as f64 * factor + offset).round().clamp(0.0, 255.0) as u8;
        }
    }
}

impl Operation for MultiplyAdd {
    fn name(&self) -> &'static str {
        "multiply_add"
    }

    fn category(&self) -> &'static str {
        "arithmetic"
    }

    fn result_types(&self) -> Vec<ItemType> {
        vec![ItemType::GrayImage, ItemType::RgbImage]
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::new(vec![
            ParameterDef {
                name: "image",
                description: "input image",
                unit: "",
                constraint: Constraint::None,
            },
            ParameterDef {
                name: "factor",
                description: "multiplier applied to each sample",
                unit: "",
                constraint: Constraint::None,
            },
            ParameterDef {
                name: "offset",
                description: "value added after multiplication",
                unit: "",
                constraint: Constraint::IntRange {
                    min: -255,
                    max: 255,
                },
            },
        ])
    }

    fn overloads(&self) -> Vec<Overload> {
        vec![Overload {
            params: vec![ParamKind::AnyImage, ParamKind::Real, ParamKind::Integer],
            result: same_as_input,
        }]
    }

    fn validate(&self, args: &[ScriptArg]) -> Result<()> {
        self.parameters().check_int("offset", args[2].integer()?)
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let input_id = node.args[0].ref_id().unwrap_or_default();
        let factor = node.args[1].real().unwrap_or(1.0);
        let offset = node.args[2].integer().unwrap_or(0);

        super::closure("multiply_add", move |ctx| {
            let image = ctx.load_image(input_id)?;
            let mut params = tiling_params_for(ctx, &image);
            params.reals = vec![factor];
            params.ints = vec![offset];
            let out = run_tiled_unary(&image, &params, &multiply_add_kernel)?;
            Ok(Item::from_image(out))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    #[test]
    fn scales_and_saturates() {
        let img = Image::gray_from_plane(3, 1, vec![10, 100, 200]).unwrap();
        let mut params = TilingParams::new(3, 1, 512, 512);
        params.reals = vec![2.0];
        params.ints = vec![5];
        let out = run_tiled_unary(&img, &params, &multiply_add_kernel).unwrap();
        assert_eq!(out.plane(0), &[25, 205, 255]);
    }
}
