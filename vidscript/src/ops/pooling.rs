//! `pooling` — power-of-two downscaling with max/min/average aggregation.

use crate::compiler::OpClosure;
use crate::error::Result;
use crate::item::{Item, ItemType};
use crate::parser::{
    Constraint, Operation, Overload, ParamKind, ParameterDef, ParameterSet, ScriptArg, ScriptNode,
};
use crate::tiling::{TileRect, TilingParams};

use super::{run_tiled_to_size, tiling_params_for};

pub struct Pooling;

fn same_as_input(args: &[ScriptArg]) -> Result<ItemType> {
    Ok(args[0].item_type())
}

#[derive(Clone, Copy, PartialEq)]
enum PoolMode {
    Max = 0,
    Min = 1,
    Average = 2,
}

/// Destination-space kernel; each output pixel aggregates one `f x f` block.
fn pooling_kernel(src: &[u8], dst: &mut [u8], tile: TileRect, params: &TilingParams) {
    let src_w = params.image_width;
    let src_h = params.image_height;
    let dst_w = params.dst_width;
    let factor = params.ints[0] as usize;
    let mode = match params.ints[1] {
        0 => PoolMode::Max,
        1 => PoolMode::Min,
        _ => PoolMode::Average,
    };

    for dy in tile.y0..tile.y1 {
        for dx in tile.x0..tile.x1 {
            let x0 = dx * factor;
            let y0 = dy * factor;
            let x1 = (x0 + factor).min(src_w);
            let y1 = (y0 + factor).min(src_h);

            let mut max = 0u8;
            let mut min = 255u8;
            let mut sum = 0u32;
            let mut count = 0u32;
            for y in y0..y1 {
                for x in x0..x1 {
                    let v = src[y * src_w + x];
                    max = max.max(v);
                    min = min.min(v);
                    sum += v as u32;
                    count += 1;
                }
            }
            dst[dy * dst_w + dx] = match mode {
                PoolMode::Max => max,
                PoolMode::Min => min,
                PoolMode::Average => {
                    if count == 0 {
                        0
                    } else {
                        (sum / count) as u8
                    }
                }
            };
        }
    }
}

impl Operation for Pooling {
    fn name(&self) -> &'static str {
        "pooling"
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
                name: "exponent",
                description: "downscale factor as a power of two",
                unit: "",
                constraint: Constraint::IntRange { min: 1, max: 8 },
            },
            ParameterDef {
                name: "mode",
                description: "block aggregation",
                unit: "",
                constraint: Constraint::OneOf(&["max", "min", "average"]),
            },
        ])
    }

    fn overloads(&self) -> Vec<Overload> {
        vec![Overload {
            params: vec![ParamKind::AnyImage, ParamKind::Integer, ParamKind::Characters],
            result: same_as_input,
        }]
    }

    fn validate(&self, args: &[ScriptArg]) -> Result<()> {
        let params = self.parameters();
        params.check_int("exponent", args[1].integer()?)?;
        params.check_str("mode", args[2].characters()?)?;
        Ok(())
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let input_id = node.args[0].ref_id().unwrap_or_default();
        let exponent = node.args[1].integer().unwrap_or(1).clamp(1, 8) as u32;
        let mode = match node.args[2].characters().unwrap_or("max") {
            "min" => PoolMode::Min,
            "average" => PoolMode::Average,
            _ => PoolMode::Max,
        };

        super::closure("pooling", move |ctx| {
            let image = ctx.load_image(input_id)?;
            let factor = 1usize << exponent;
            let dst_w = (image.width() as usize).div_ceil(factor).max(1);
            let dst_h = (image.height() as usize).div_ceil(factor).max(1);

            let mut params = tiling_params_for(ctx, &image);
            params.dst_width = dst_w;
            params.dst_height = dst_h;
            params.ints = vec![factor as i32, mode as i32];
            let out = run_tiled_to_size(&image, dst_w, dst_h, &params, &pooling_kernel)?;
            Ok(Item::from_image(out))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    #[test]
    fn max_pooling_halves_dimensions() {
        #[rustfmt::skip]
        let plane = vec![
            1, 2, 3, 4,
            5, 6, 7, 8,
            9, 10, 11, 12,
            13, 14, 15, 16,
        ];
        let image = Image::gray_from_plane(4, 4, plane).unwrap();
        let mut params = TilingParams::new(4, 4, 512, 512);
        params.dst_width = 2;
        params.dst_height = 2;
        params.ints = vec![2, PoolMode::Max as i32];
        let out = run_tiled_to_size(&image, 2, 2, &params, &pooling_kernel).unwrap();
        assert_eq!(out.plane(0), &[6, 8, 14, 16]);
    }

    #[test]
    fn average_pooling_rounds_down() {
        let image = Image::gray_from_plane(2, 2, vec![1, 2, 3, 4]).unwrap();
        let mut params = TilingParams::new(2, 2, 512, 512);
        params.dst_width = 1;
        params.dst_height = 1;
        params.ints = vec![2, PoolMode::Average as i32];
        let out = run_tiled_to_size(&image, 1, 1, &params, &pooling_kernel).unwrap();
        assert_eq!(out.plane(0), &[2]);
    }
}
