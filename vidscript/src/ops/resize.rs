//! `resize` — nearest-neighbour scaling to an explicit size.

use crate::compiler::OpClosure;
use crate::error::Result;
use crate::item::{Item, ItemType};
use crate::parser::{
    Constraint, Operation, Overload, ParamKind, ParameterDef, ParameterSet, ScriptArg, ScriptNode,
};
use crate::tiling::{TileRect, TilingParams};

use super::{run_tiled_to_size, tiling_params_for};

pub struct Resize;

fn same_as_input(args: &[ScriptArg]) -> Result<ItemType> {
    Ok(args[0].item_type())
}

/// Destination-space kernel; samples the nearest source pixel.
fn resize_kernel(src: &[u8], dst: &mut [u8], tile: TileRect, params: &TilingParams) {
    let src_w = params.image_width;
    let src_h = params.image_height;
    let dst_w = params.dst_width;
    let dst_h = params.dst_height;
    let scale_x = src_w as f64 / dst_w as f64;
    let scale_y = src_h as f64 / dst_h as f64;

    for dy in tile.y0..tile.y1 {
        let sy = ((dy as f64 + 0.5) * scale_y) as usize;
        let sy = sy.min(src_h - 1);
        for dx in tile.x0..tile.x1 {
            let sx = ((dx as f64 + 0.5) * scale_x) as usize;
            let sx = sx.min(src_w - 1);
            dst[dy * dst_w + dx] = src[sy * src_w + sx];
        }
    }
}

impl Operation for Resize {
    fn name(&self) -> &'static str {
        "resize"
    }

    fn category(&self) -> &'static str {
        "geometry"
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
                name: "width",
                description: "output width",
                unit: "pixels",
                constraint: Constraint::IntRange { min: 1, max: 65535 },
            },
            ParameterDef {
                name: "height",
                description: "output height",
                unit: "pixels",
                constraint: Constraint::IntRange { min: 1, max: 65535 },
            },
        ])
    }

    fn overloads(&self) -> Vec<Overload> {
        vec![Overload {
            params: vec![ParamKind::AnyImage, ParamKind::Integer, ParamKind::Integer],
            result: same_as_input,
        }]
    }

    fn validate(&self, args: &[ScriptArg]) -> Result<()> {
        let params = self.parameters();
        params.check_int("width", args[1].integer()?)?;
        params.check_int("height", args[2].integer()?)?;
        Ok(())
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let input_id = node.args[0].ref_id().unwrap_or_default();
        let width = node.args[1].integer().unwrap_or(1).max(1) as usize;
        let height = node.args[2].integer().unwrap_or(1).max(1) as usize;

        super::closure("resize", move |ctx| {
            let image = ctx.load_image(input_id)?;
            let mut params = tiling_params_for(ctx, &image);
            params.dst_width = width;
            params.dst_height = height;
            let out = run_tiled_to_size(&image, width, height, &params, &resize_kernel)?;
            Ok(Item::from_image(out))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    #[test]
    fn doubling_replicates_pixels() {
        let image = Image::gray_from_plane(2, 1, vec![10, 20]).unwrap();
        let mut params = TilingParams::new(2, 1, 512, 512);
        params.dst_width = 4;
        params.dst_height = 1;
        let out = run_tiled_to_size(&image, 4, 1, &params, &resize_kernel).unwrap();
        assert_eq!(out.plane(0), &[10, 10, 20, 20]);
    }

    #[test]
    fn identity_resize_is_lossless() {
        let image = Image::gray_from_plane(3, 2, vec![1, 2, 3, 4, 5, 6]).unwrap();
        let mut params = TilingParams::new(3, 2, 512, 512);
        params.dst_width = 3;
        params.dst_height = 2;
        let out = run_tiled_to_size(&image, 3, 2, &params, &resize_kernel).unwrap();
        assert_eq!(out.plane(0), image.plane(0));
    }
}
