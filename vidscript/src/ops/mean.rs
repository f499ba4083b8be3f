//! `mean` — box filter smoothing.
//!
//! Uses a sliding column-sum so each output row costs O(filter_width) per
//! pixel instead of O(filter_width * filter_height). Border behavior follows
//! the configured mode: `ignore` leaves a half-kernel margin untouched,
//! `constant` treats out-of-bounds samples as 0, `mirror` reflects.

use std::collections::VecDeque;

use crate::compiler::OpClosure;
use crate::error::Result;
use crate::item::{Item, ItemType};
use crate::parser::{
    Constraint, Operation, Overload, ParamKind, ParameterDef, ParameterSet, ScriptArg, ScriptNode,
};
use crate::tiling::{BorderMode, TileRect, TilingParams};

use super::{clamp_to_interior, run_tiled_unary, sample_bordered, tiling_params_for};

pub struct Mean;

fn same_as_input(args: &[ScriptArg]) -> Result<ItemType> {
    Ok(args[0].item_type())
}

pub(crate) fn mean_kernel(src: &[u8], dst: &mut [u8], tile: TileRect, params: &TilingParams) {
    let w = params.image_width as i64;
    let h = params.image_height as i64;
    let fw = params.ints[0] as i64;
    let fh = params.ints[1] as i64;
    let half_w = fw / 2;
    let half_h = fh / 2;
    let inv_size = 1.0 / (fw * fh) as f64;

    let tile = if params.border_mode == BorderMode::Ignore {
        match clamp_to_interior(
            tile,
            half_w as usize,
            half_h as usize,
            params.image_width,
            params.image_height,
        ) {
            Some(t) => t,
            None => return,
        }
    } else {
        tile
    };

    let mut column_sums: VecDeque<i64> = VecDeque::with_capacity(fw as usize);

    for y in tile.y0..tile.y1 {
        let y = y as i64;
        column_sums.clear();

        // Seed the window with the columns left of the first output pixel.
        let x0 = tile.x0 as i64;
        for fx in (x0 - half_w)..=(x0 + half_w) {
            let mut sum = 0i64;
            for fy in (y - half_h)..=(y + half_h) {
                sum += sample_bordered(src, fx, fy, w, h, params.border_mode) as i64;
            }
            column_sums.push_back(sum);
        }
        let mut window: i64 = column_sums.iter().sum();

        for x in tile.x0..tile.x1 {
            dst[y as usize * w as usize + x] = (window as f64 * inv_size) as u8;

            // Slide: add the column entering the window, drop the oldest.
            let enter = x as i64 + 1 + half_w;
            let mut sum = 0i64;
            for fy in (y - half_h)..=(y + half_h) {
                sum += sample_bordered(src, enter, fy, w, h, params.border_mode) as i64;
            }
            window += sum - column_sums.pop_front().unwrap_or(0);
            column_sums.push_back(sum);
        }
    }
}

impl Operation for Mean {
    fn name(&self) -> &'static str {
        "mean"
    }

    fn category(&self) -> &'static str {
        "filters/smoothing"
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
                name: "filter_width",
                description: "filter width",
                unit: "pixels",
                constraint: Constraint::IntRange { min: 3, max: 65535 },
            },
            ParameterDef {
                name: "filter_height",
                description: "filter height",
                unit: "pixels",
                constraint: Constraint::IntRange { min: 3, max: 65535 },
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
        vec![
            Overload {
                params: vec![
                    ParamKind::AnyImage,
                    ParamKind::Integer,
                    ParamKind::Integer,
                    ParamKind::Characters,
                ],
                result: same_as_input,
            },
            // Border mode defaults to "constant".
            Overload {
                params: vec![ParamKind::AnyImage, ParamKind::Integer, ParamKind::Integer],
                result: same_as_input,
            },
        ]
    }

    fn validate(&self, args: &[ScriptArg]) -> Result<()> {
        let params = self.parameters();
        params.check_int("filter_width", args[1].integer()?)?;
        params.check_int("filter_height", args[2].integer()?)?;
        if let Some(mode) = args.get(3) {
            params.check_str("border_mode", mode.characters()?)?;
        }
        Ok(())
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let input_id = node.args[0].ref_id().unwrap_or_default();
        let filter_width = node.args[1].integer().unwrap_or(3);
        let filter_height = node.args[2].integer().unwrap_or(3);
        let border = node
            .args
            .get(3)
            .and_then(|a| a.characters().ok().map(str::to_owned))
            .unwrap_or_else(|| "constant".to_string());

        super::closure("mean", move |ctx| {
            let image = ctx.load_image(input_id)?;
            let mut params = tiling_params_for(ctx, &image);
            params.border_mode = BorderMode::parse(&border)?;
            params.ints = vec![filter_width, filter_height];
            let out = run_tiled_unary(&image, &params, &mean_kernel)?;
            Ok(Item::from_image(out))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Image;

    fn cross_image() -> Image {
        #[rustfmt::skip]
        let plane = vec![
            0, 0, 0, 0,
            0, 255, 255, 0,
            0, 255, 255, 0,
            0, 0, 0, 0,
        ];
        Image::gray_from_plane(4, 4, plane).unwrap()
    }

    fn run(image: &Image, border: BorderMode, cutoff: usize) -> Image {
        let mut params = TilingParams::new(
            image.width() as usize,
            image.height() as usize,
            cutoff,
            cutoff,
        );
        params.border_mode = border;
        params.ints = vec![3, 3];
        run_tiled_unary(image, &params, &mean_kernel).unwrap()
    }

    #[test]
    fn constant_border_center_pixel() {
        let out = run(&cross_image(), BorderMode::Constant, 512);
        // (255 * 4) / 9 = 113 for every interior pixel of the 2x2 block.
        assert_eq!(out.sample(0, 1, 1), 113);
        assert_eq!(out.sample(0, 2, 2), 113);
    }

    #[test]
    fn tiled_result_matches_whole_image(){
        let whole = run(&cross_image(), BorderMode::Constant, 512);
        let tiled = run(&cross_image(), BorderMode::Constant, 1);
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(whole.sample(0, x, y), tiled.sample(0, x, y));
            }
        }
    }

    #[test]
    fn ignore_border_leaves_margin_untouched() {
        let out = run(&cross_image(), BorderMode::Ignore, 512);
        for i in 0..4 {
            assert_eq!(out.sample(0, i, 0), 0);
            assert_eq!(out.sample(0, 0, i), 0);
        }
        // Interior is still filtered.
        assert_eq!(out.sample(0, 1, 1), 113);
    }

    #[test]
    fn mirror_border_smooths_edges() {
        let uniform = Image::gray_from_plane(4, 4, vec![100; 16]).unwrap();
        let out = run(&uniform, BorderMode::Mirror, 512);
        // Reflection keeps a uniform image uniform.
        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(out.sample(0, x, y), 100);
            }
        }
    }
}
