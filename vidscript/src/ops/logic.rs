//! `and` — bitwise AND of two images.

use crate::compiler::OpClosure;
use crate::error::Result;
use crate::item::{Item, ItemType};
use crate::parser::{
    Constraint, Operation, Overload, ParamKind, ParameterDef, ParameterSet, ScriptArg, ScriptNode,
};
use crate::tiling::{TileRect, TilingParams};

use super::{run_tiled_binary, tiling_params_for};

pub struct And;

fn same_as_input(args: &[ScriptArg]) -> Result<ItemType> {
    Ok(args[0].item_type())
}

fn and_kernel(src1: &[u8], src2: &[u8], dst: &mut [u8], tile: TileRect, params: &TilingParams) {
    let stride = params.image_width;
    for y in tile.y0..tile.y1 {
        for x in tile.x0..tile.x1 {
            let i = y * stride + x;
            dst[i] = src1[i] & src2[i];
        }
    }
}

impl Operation for And {
    fn name(&self) -> &'static str {
        "and"
    }

    fn category(&self) -> &'static str {
        "logic"
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
        ])
    }

    fn overloads(&self) -> Vec<Overload> {
        vec![Overload {
            params: vec![ParamKind::AnyImage, ParamKind::AnyImage],
            result: same_as_input,
        }]
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let id1 = node.args[0].ref_id().unwrap_or_default();
        let id2 = node.args[1].ref_id().unwrap_or_default();

        super::closure("and", move |ctx| {
            let a = ctx.load_image(id1)?;
            let b = ctx.load_image(id2)?;
            let params = tiling_params_for(ctx, &a);
            let out = run_tiled_binary(&a, &b, &params, &and_kernel)?;
            Ok(Item::from_image(out))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    #[test]
    fn masks_bits() {
        let a = Image::gray_from_plane(4, 1, vec![0b1111_0000, 255, 0, 7]).unwrap();
        let b = Image::gray_from_plane(4, 1, vec![0b1010_1010, 13, 255, 7]).unwrap();
        let params = TilingParams::new(4, 1, 512, 512);
        let out = run_tiled_binary(&a, &b, &params, &and_kernel).unwrap();
        assert_eq!(out.plane(0), &[0b1010_0000, 13, 0, 7]);
    }
}
