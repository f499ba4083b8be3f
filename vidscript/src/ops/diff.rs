//! `diff` — absolute difference of two images.
//!
//! `diff(a, b)` or `diff(a, b, offset)`; the offset is added to each absolute
//! difference and the sum saturates at 255. Two identical inputs with offset
//! 0 produce an all-zero image.

use crate::compiler::OpClosure;
use crate::error::Result;
use crate::item::{Item, ItemType};
use crate::parser::{
    Constraint, Operation, Overload, ParamKind, ParameterDef, ParameterSet, ScriptArg, ScriptNode,
};
use crate::tiling::{TileRect, TilingParams};

use super::{run_tiled_binary, tiling_params_for};

pub struct Diff;

fn same_as_input(args: &[ScriptArg]) -> Result<ItemType> {
    Ok(args[0].item_type())
}

pub(crate) fn diff_kernel(
    src1: &[u8],
    src2: &[u8],
    dst: &mut [u8],
    tile: TileRect,
    params: &TilingParams,
) {
    let stride = params.image_width;
    let offset = params.ints[0] as i32;
    for y in tile.y0..tile.y1 {
        for x in tile.x0..tile.x1 {
            let i = y * stride + x;
            let d = (src1[i] as i32 - src2[i] as i32).abs() + offset;
            dst[i] = d.clamp(0, 255) as u8;
        }
    }
}

impl Operation for Diff {
    fn name(&self) -> &'static str {
        "diff"
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
                name: "image1",
                description: "first input image",
                unit: "",
                constraint: Constraint::None,
            },
            ParameterDef {
                name: "image2",
                description: "second input image",
                unit: "",
                constraint: Constraint::None,
            },
            ParameterDef {
                name: "offset",
                description: "value added to each difference",
                unit: "",
                constraint: Constraint::IntRange { min: 0, max: 255 },
            },
        ])
    }

    fn overloads(&self) -> Vec<Overload> {
        vec![
            Overload {
                params: vec![ParamKind::AnyImage, ParamKind::AnyImage, ParamKind::Integer],
                result: same_as_input,
            },
            Overload {
                params: vec![ParamKind::AnyImage, ParamKind::AnyImage],
                result: same_as_input,
            },
        ]
    }

    fn validate(&self, args: &[ScriptArg]) -> Result<()> {
        if let Some(offset) = args.get(2) {
            self.parameters().check_int("offset", offset.integer()?)?;
        }
        Ok(())
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let id1 = node.args[0].ref_id().unwrap_or_default();
        let id2 = node.args[1].ref_id().unwrap_or_default();
        let offset = node.args.get(2).and_then(|a| a.integer().ok()).unwrap_or(0);

        super::closure("diff", move |ctx| {
            let a = ctx.load_image(id1)?;
            let b = ctx.load_image(id2)?;
            let mut params = tiling_params_for(ctx, &a);
            params.ints = vec![offset];
            let out = run_tiled_binary(&a, &b, &params, &diff_kernel)?;
            Ok(Item::from_image(out))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    #[test]
    fn identical_inputs_yield_zero() {
        let img = Image::gray_from_plane(4, 2, vec![42; 8]).unwrap();
        let mut params = TilingParams::new(4, 2, 512, 512);
        params.ints = vec![0];
        let out = run_tiled_binary(&img, &img, &params, &diff_kernel).unwrap();
        assert!(out.plane(0).iter().all(|&p| p == 0));
    }

    #[test]
    fn offset_saturates() {
        let a = Image::gray_from_plane(2, 1, vec![200, 0]).unwrap();
        let b = Image::gray_from_plane(2, 1, vec![0, 0]).unwrap();
        let mut params = TilingParams::new(2, 1, 512, 512);
        params.ints = vec![100];
        let out = run_tiled_binary(&a, &b, &params, &diff_kernel).unwrap();
        assert_eq!(out.plane(0), &[255, 100]);
    }
}
