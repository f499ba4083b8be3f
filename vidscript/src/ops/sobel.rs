//! `sobel` and `scharr` — gradient edge detectors.
//!
//! Both convolve with a fixed derivative mask along "x" or "y" and store the
//! absolute response, saturated at 255. Sobel supports 3x3 and 5x5 masks;
//! Scharr is the 3x3 mask with stronger rotational symmetry.

use crate::compiler::OpClosure;
use crate::error::Result;
use crate::item::{Item, ItemType};
use crate::parser::{
    Constraint, Operation, Overload, ParamKind, ParameterDef, ParameterSet, ScriptArg, ScriptNode,
};
use crate::tiling::{BorderMode, TileRect, TilingParams};

use super::{clamp_to_interior, run_tiled_unary, sample_bordered, tiling_params_for};

#[rustfmt::skip]
const SOBEL_3: [i32; 9] = [
    -1, 0, 1,
    -2, 0, 2,
    -1, 0, 1,
];

#[rustfmt::skip]
const SOBEL_5: [i32; 25] = [
    -1,  -2, 0,  2, 1,
    -4,  -8, 0,  8, 4,
    -6, -12, 0, 12, 6,
    -4,  -8, 0,  8, 4,
    -1,  -2, 0,  2, 1,
];

#[rustfmt::skip]
const SCHARR_3: [i32; 9] = [
     -3, 0,  3,
    -10, 0, 10,
     -3, 0,  3,
];

/// Convolve one plane with a square derivative mask.
///
/// `params.ints` carries `[mask_size, transpose]`; transposing the mask turns
/// an x-derivative into the y-derivative. `params.reals[0]` is unused for
/// Sobel/Scharr but reserved for normalized masks.
fn gradient_kernel(mask: &[i32], src: &[u8], dst: &mut [u8], tile: TileRect, params: &TilingParams) {
    let w = params.image_width as i64;
    let h = params.image_height as i64;
    let size = params.ints[0] as i64;
    let transpose = params.ints[1] != 0;
    let half = size / 2;

    let tile = if params.border_mode == BorderMode::Ignore {
        match clamp_to_interior(
            tile,
            half as usize,
            half as usize,
            params.image_width,
            params.image_height,
        ) {
            Some(t) => t,
            None => return,
        }
    } else {
        tile
    };

    for y in tile.y0..tile.y1 {
        for x in tile.x0..tile.x1 {
            let mut sum = 0i64;
            for my in 0..size {
                for mx in 0..size {
                    let weight = if transpose {
                        mask[(mx * size + my) as usize]
                    } else {
                        mask[(my * size + mx) as usize]
                    } as i64;
                    if weight == 0 {
                        continue;
                    }
                    let sx = x as i64 + mx - half;
                    let sy = y as i64 + my - half;
                    sum += weight
                        * sample_bordered(src, sx, sy, w, h, params.border_mode) as i64;
                }
            }
            dst[y * w as usize + x] = sum.abs().min(255) as u8;
        }
    }
}

fn sobel_kernel(src: &[u8], dst: &mut [u8], tile: TileRect, params: &TilingParams) {
    let mask: &[i32] = if params.ints[0] == 5 { &SOBEL_5 } else { &SOBEL_3 };
    gradient_kernel(mask, src, dst, tile, params);
}

fn scharr_kernel(src: &[u8], dst: &mut [u8], tile: TileRect, params: &TilingParams) {
    gradient_kernel(&SCHARR_3, src, dst, tile, params);
}

fn same_as_input(args: &[ScriptArg]) -> Result<ItemType> {
    Ok(args[0].item_type())
}

fn direction_is_y(direction: &str) -> bool {
    direction == "y"
}

pub struct Sobel;

impl Operation for Sobel {
    fn name(&self) -> &'static str {
        "sobel"
    }

    fn category(&self) -> &'static str {
        "filters/edge"
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
                name: "size",
                description: "mask size",
                unit: "pixels",
                constraint: Constraint::IntRange { min: 3, max: 5 },
            },
            ParameterDef {
                name: "direction",
                description: "derivative direction",
                unit: "",
                constraint: Constraint::OneOf(&["x", "y"]),
            },
            ParameterDef {
                name: "border_mode",
                description: "border mode",
                unit: "",
                constraint: Constraint::OneOf(&["ignore", "constant", "mirror"]),
            },
        ])
    }

    fn overloads(&self) -> Vec<Overload> {
        vec![Overload {
            params: vec![
                ParamKind::AnyImage,
                ParamKind::Integer,
                ParamKind::Characters,
                ParamKind::Characters,
            ],
            result: same_as_input,
        }]
    }

    fn validate(&self, args: &[ScriptArg]) -> Result<()> {
        let params = self.parameters();
        let size = args[1].integer()?;
        params.check_int("size", size)?;
        if size == 4 {
            return Err(crate::error::ScriptError::InvalidParameter(
                "'size' must be 3 or 5".into(),
            ));
        }
        params.check_str("direction", args[2].characters()?)?;
        params.check_str("border_mode", args[3].characters()?)?;
        Ok(())
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let input_id = node.args[0].ref_id().unwrap_or_default();
        let size = node.args[1].integer().unwrap_or(3);
        let transpose = node.args[2]
            .characters()
            .map(direction_is_y)
            .unwrap_or(false);
        let border = node.args[3]
            .characters()
            .map(str::to_owned)
            .unwrap_or_else(|_| "constant".to_string());

        super::closure("sobel", move |ctx| {
            let image = ctx.load_image(input_id)?;
            let mut params = tiling_params_for(ctx, &image);
            params.border_mode = BorderMode::parse(&border)?;
            params.ints = vec![size, transpose as i32];
            let out = run_tiled_unary(&image, &params, &sobel_kernel)?;
            Ok(Item::from_image(out))
        })
    }
}

pub struct Scharr;

impl Operation for Scharr {
    fn name(&self) -> &'static str {
        "scharr"
    }

    fn category(&self) -> &'static str {
        "filters/edge"
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
                name: "direction",
                description: "derivative direction",
                unit: "",
                constraint: Constraint::OneOf(&["x", "y"]),
            },
            ParameterDef {
                name: "border_mode",
                description: "border mode",
                unit: "",
                constraint: Constraint::OneOf(&["ignore", "constant", "mirror"]),
            },
        ])
    }

    fn overloads(&self) -> Vec<Overload> {
        vec![Overload {
            params: vec![
                ParamKind::AnyImage,
                ParamKind::Characters,
                ParamKind::Characters,
            ],
            result: same_as_input,
        }]
    }

    fn validate(&self, args: &[ScriptArg]) -> Result<()> {
        let params = self.parameters();
        params.check_str("direction", args[1].characters()?)?;
        params.check_str("border_mode", args[2].characters()?)?;
        Ok(())
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let input_id = node.args[0].ref_id().unwrap_or_default();
        let transpose = node.args[1]
            .characters()
            .map(direction_is_y)
            .unwrap_or(false);
        let border = node.args[2]
            .characters()
            .map(str::to_owned)
            .unwrap_or_else(|_| "constant".to_string());

        super::closure("scharr", move |ctx| {
            let image = ctx.load_image(input_id)?;
            let mut params = tiling_params_for(ctx, &image);
            params.border_mode = BorderMode::parse(&border)?;
            params.ints = vec![3, transpose as i32];
            let out = run_tiled_unary(&image, &params, &scharr_kernel)?;
            Ok(Item::from_image(out))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    fn vertical_edge() -> Image {
        // Left half 0, right half 200.
        let mut plane = Vec::with_capacity(36);
        for _ in 0..6 {
            plane.extend_from_slice(&[0, 0, 0, 200, 200, 200]);
        }
        Image::gray_from_plane(6, 6, plane).unwrap()
    }

    fn run(kernel: &super::super::UnaryKernel, ints: Vec<i32>) -> Image {
        let image = vertical_edge();
        let mut params = TilingParams::new(6, 6, 512, 512);
        params.border_mode = BorderMode::Mirror;
        params.ints = ints;
        run_tiled_unary(&image, &params, kernel).unwrap()
    }

    #[test]
    fn x_direction_finds_vertical_edge() {
        let out = run(&sobel_kernel, vec![3, 0]);
        // Response saturates on the edge column, zero in flat areas.
        assert_eq!(out.sample(0, 3, 3), 255);
        assert_eq!(out.sample(0, 0, 3), 0);
        assert_eq!(out.sample(0, 5, 3), 0);
    }

    #[test]
    fn y_direction_ignores_vertical_edge() {
        let out = run(&sobel_kernel, vec![3, 1]);
        assert_eq!(out.sample(0, 3, 3), 0);
    }

    #[test]
    fn scharr_matches_sobel_on_edges() {
        let sobel = run(&sobel_kernel, vec![3, 0]);
        let scharr = run(&scharr_kernel, vec![3, 0]);
        assert_eq!(sobel.sample(0, 3, 3), scharr.sample(0, 3, 3));
    }
}
