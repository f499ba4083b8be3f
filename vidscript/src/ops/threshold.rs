//! `threshold` and `binary_threshold` — fixed and Otsu thresholding.
//!
//! `threshold(image, value [, mode])` maps samples above `value` to 255.
//! `binary_threshold(image, mode)` picks the threshold with Otsu's method
//! from the image histogram; `binary_threshold(image, value)` is the fixed
//! form. Mode "normal" keeps bright samples, "inverse" flips the polarity.

use crate::compiler::OpClosure;
use crate::error::Result;
use crate::histogram::Histogram;
use crate::item::{Item, ItemType};
use crate::parser::{
    Constraint, Operation, Overload, ParamKind, ParameterDef, ParameterSet, ScriptArg, ScriptNode,
};
use crate::tiling::{TileRect, TilingParams};

use super::{hist::histogram_of_plane, run_tiled_unary, tiling_params_for};

/// Otsu's method: the threshold maximizing between-class variance.
pub fn otsu_threshold(histogram: &Histogram) -> u8 {
    let total = histogram.total();
    if total == 0 {
        return 0;
    }

    let weighted_total: f64 = histogram
        .bins()
        .iter()
        .enumerate()
        .map(|(v, &count)| v as f64 * count as f64)
        .sum();

    let mut best_threshold = 0u8;
    let mut best_variance = -1.0f64;
    let mut background_count = 0f64;
    let mut background_sum = 0f64;

    for t in 0..256usize {
        background_count += histogram[t] as f64;
        if background_count == 0.0 {
            continue;
        }
        let foreground_count = total as f64 - background_count;
        if foreground_count == 0.0 {
            break;
        }
        background_sum += t as f64 * histogram[t] as f64;

        let mean_background = background_sum / background_count;
        let mean_foreground = (weighted_total - background_sum) / foreground_count;
        let variance = background_count
            * foreground_count
            * (mean_background - mean_foreground)
            * (mean_background - mean_foreground);

        if variance > best_variance {
            best_variance = variance;
            best_threshold = t as u8;
        }
    }

    best_threshold
}

fn threshold_kernel(src: &[u8], dst: &mut [u8], tile: TileRect, params: &TilingParams) {
    let stride = params.image_width;
    let threshold = params.ints[0];
    let inverse = params.ints[1] != 0;
    for y in tile.y0..tile.y1 {
        for x in tile.x0..tile.x1 {
            let i = y * stride + x;
            let above = src[i] as i32 > threshold;
            dst[i] = if above != inverse { 255 } else { 0 };
        }
    }
}

fn gray_only(_args: &[ScriptArg]) -> Result<ItemType> {
    Ok(ItemType::GrayImage)
}

fn threshold_parameters() -> ParameterSet {
    ParameterSet::new(vec![
        ParameterDef {
            name: "image",
            description: "input image",
            unit: "",
            constraint: Constraint::None,
        },
        ParameterDef {
            name: "threshold",
            description: "fixed threshold value",
            unit: "",
            constraint: Constraint::IntRange { min: 0, max: 255 },
        },
        ParameterDef {
            name: "mode",
            description: "polarity",
            unit: "",
            constraint: Constraint::OneOf(&["normal", "inverse"]),
        },
    ])
}

pub struct Threshold;

impl Operation for Threshold {
    fn name(&self) -> &'static str {
        "threshold"
    }

    fn category(&self) -> &'static str {
        "segmentation"
    }

    fn result_types(&self) -> Vec<ItemType> {
        vec![ItemType::GrayImage]
    }

    fn parameters(&self) -> ParameterSet {
        threshold_parameters()
    }

    fn overloads(&self) -> Vec<Overload> {
        vec![
            Overload {
                params: vec![ParamKind::Gray, ParamKind::Integer],
                result: gray_only,
            },
            Overload {
                params: vec![ParamKind::Gray, ParamKind::Integer, ParamKind::Characters],
                result: gray_only,
            },
        ]
    }

    fn validate(&self, args: &[ScriptArg]) -> Result<()> {
        let params = self.parameters();
        params.check_int("threshold", args[1].integer()?)?;
        if let Some(mode) = args.get(2) {
            params.check_str("mode", mode.characters()?)?;
        }
        Ok(())
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let input_id = node.args[0].ref_id().unwrap_or_default();
        let value = node.args[1].integer().unwrap_or(0);
        let inverse = node
            .args
            .get(2)
            .and_then(|a| a.characters().ok())
            .map(|m| m == "inverse")
            .unwrap_or(false);

        super::closure("threshold", move |ctx| {
            let image = ctx.load_image(input_id)?;
            let mut params = tiling_params_for(ctx, &image);
            params.ints = vec![value, inverse as i32];
            let out = run_tiled_unary(&image, &params, &threshold_kernel)?;
            Ok(Item::from_image(out))
        })
    }
}

pub struct BinaryThreshold;

impl Operation for BinaryThreshold {
    fn name(&self) -> &'static str {
        "binary_threshold"
    }

    fn category(&self) -> &'static str {
        "segmentation"
    }

    fn result_types(&self) -> Vec<ItemType> {
        vec![ItemType::GrayImage]
    }

    fn parameters(&self) -> ParameterSet {
        threshold_parameters()
    }

    fn overloads(&self) -> Vec<Overload> {
        vec![
            // Otsu; the mode selects polarity.
            Overload {
                params: vec![ParamKind::Gray, ParamKind::Characters],
                result: gray_only,
            },
            // Fixed threshold.
            Overload {
                params: vec![ParamKind::Gray, ParamKind::Integer],
                result: gray_only,
            },
        ]
    }

    fn validate(&self, args: &[ScriptArg]) -> Result<()> {
        let params = self.parameters();
        match &args[1] {
            arg if arg.characters().is_ok() => params.check_str("mode", arg.characters()?),
            arg => params.check_int("threshold", arg.integer()?),
        }
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let input_id = node.args[0].ref_id().unwrap_or_default();
        let fixed = node.args[1].integer().ok();
        let inverse = node.args[1]
            .characters()
            .map(|m| m == "inverse")
            .unwrap_or(false);

        super::closure("binary_threshold", move |ctx| {
            let image = super::unpadded(&ctx.load_image(input_id)?);
            let mut params = tiling_params_for(ctx, &image);

            let value = match fixed {
                Some(v) => v,
                None => {
                    let histogram = histogram_of_plane(image.plane(0), &params)?;
                    otsu_threshold(&histogram) as i32
                }
            };
            params.ints = vec![value, inverse as i32];
            let out = run_tiled_unary(&image, &params, &threshold_kernel)?;
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

    #[test]
    fn otsu_separates_two_classes() {
        let mut histogram = Histogram::new();
        for _ in 0..12 {
            histogram.push(0);
        }
        for _ in 0..4 {
            histogram.push(255);
        }
        let t = otsu_threshold(&histogram);
        assert!(t < 255);
    }

    #[test]
    fn binary_threshold_on_reference_image() {
        let image = cross_image();
        let params = TilingParams::new(4, 4, 512, 512);
        let histogram = histogram_of_plane(image.plane(0), &params).unwrap();
        let t = otsu_threshold(&histogram) as i32;

        let mut run_params = TilingParams::new(4, 4, 512, 512);
        run_params.ints = vec![t, 0];
        let out = run_tiled_unary(&image, &run_params, &threshold_kernel).unwrap();

        let white: usize = out.plane(0).iter().filter(|&&p| p == 255).count();
        let black: usize = out.plane(0).iter().filter(|&&p| p == 0).count();
        assert_eq!((white, black), (4, 12));
        assert_eq!(out.sample(0, 1, 1), 255);
        assert_eq!(out.sample(0, 0, 0), 0);
    }

    #[test]
    fn inverse_mode_flips_polarity() {
        let image = cross_image();
        let mut params = TilingParams::new(4, 4, 512, 512);
        params.ints = vec![127, 1];
        let out = run_tiled_unary(&image, &params, &threshold_kernel).unwrap();
        assert_eq!(out.sample(0, 1, 1), 0);
        assert_eq!(out.sample(0, 0, 0), 255);
    }
}
