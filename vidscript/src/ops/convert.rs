//! `convert_to_gray` / `convert_to_rgb` — channel-count conversions.
//!
//! Gray-to-RGB replicates the single plane. RGB-to-gray either picks one
//! channel or computes the BT.601 luminance (the default).

use crate::compiler::OpClosure;
use crate::error::Result;
use crate::image::Image;
use crate::item::{Item, ItemType};
use crate::parser::{
    Constraint, Operation, Overload, ParamKind, ParameterDef, ParameterSet, ScriptArg, ScriptNode,
};
use crate::tiling::{self, PlanePtr, TileRect};

use super::{tiling_params_for, unpadded};

pub struct ConvertToGray;

fn gray_result(_args: &[ScriptArg]) -> Result<ItemType> {
    Ok(ItemType::GrayImage)
}

fn rgb_result(_args: &[ScriptArg]) -> Result<ItemType> {
    Ok(ItemType::RgbImage)
}

impl Operation for ConvertToGray {
    fn name(&self) -> &'static str {
        "convert_to_gray"
    }

    fn category(&self) -> &'static str {
        "conversion"
    }

    fn result_types(&self) -> Vec<ItemType> {
        vec![ItemType::GrayImage]
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
                name: "mode",
                description: "channel selection",
                unit: "",
                constraint: Constraint::OneOf(&[
                    "use_red",
                    "use_green",
                    "use_blue",
                    "calc_luminance",
                ]),
            },
        ])
    }

    fn overloads(&self) -> Vec<Overload> {
        vec![
            Overload {
                params: vec![ParamKind::Rgb],
                result: gray_result,
            },
            Overload {
                params: vec![ParamKind::Rgb, ParamKind::Characters],
                result: gray_result,
            },
        ]
    }

    fn validate(&self, args: &[ScriptArg]) -> Result<()> {
        if let Some(mode) = args.get(1) {
            self.parameters().check_str("mode", mode.characters()?)?;
        }
        Ok(())
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let input_id = node.args[0].ref_id().unwrap_or_default();
        let mode = node
            .args
            .get(1)
            .and_then(|a| a.characters().ok().map(str::to_owned))
            .unwrap_or_else(|| "calc_luminance".to_string());

        super::closure("convert_to_gray", move |ctx| {
            let image = unpadded(&ctx.load_image(input_id)?);
            let params = tiling_params_for(ctx, &image);
            let (w, h) = (image.width() as usize, image.height() as usize);

            let mut out = vec![0u8; w * h];
            let dst = PlanePtr::new(&mut out);
            let (r, g, b) = (image.plane(0), image.plane(1), image.plane(2));
            let channel = match mode.as_str() {
                "use_red" => Some(0usize),
                "use_green" => Some(1),
                "use_blue" => Some(2),
                _ => None,
            };
            tiling::for_each_tile(
                TileRect::full(w, h),
                params.cutoff_x,
                params.cutoff_y,
                &|tile| {
                    // Safety: tile regions are disjoint.
                    let dst = unsafe { dst.plane() };
                    for y in tile.y0..tile.y1 {
                        for x in tile.x0..tile.x1 {
                            let i = y * w + x;
                            dst[i] = match channel {
                                Some(0) => r[i],
                                Some(1) => g[i],
                                Some(_) => b[i],
                                None => (0.299 * r[i] as f64
                                    + 0.587 * g[i] as f64
                                    + 0.114 * b[i] as f64)
                                    .round()
                                    .min(255.0) as u8,
                            };
                        }
                    }
                    Ok(())
                },
            )?;
            Ok(Item::from_image(Image::gray_from_plane(
                image.width(),
                image.height(),
                out,
            )?))
        })
    }
}

pub struct ConvertToRgb;

impl Operation for ConvertToRgb {
    fn name(&self) -> &'static str {
        "convert_to_rgb"
    }

    fn category(&self) -> &'static str {
        "conversion"
    }

    fn result_types(&self) -> Vec<ItemType> {
        vec![ItemType::RgbImage]
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
            result: rgb_result,
        }]
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let input_id = node.args[0].ref_id().unwrap_or_default();

        super::closure("convert_to_rgb", move |ctx| {
            let image = unpadded(&ctx.load_image(input_id)?);
            let plane = image.plane(0).to_vec();
            Ok(Item::from_image(Image::rgb_from_planes(
                image.width(),
                image.height(),
                [plane.clone(), plane.clone(), plane],
            )?))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ProcessingContext;
    use crate::parser::{parse, OperationRegistry};

    #[test]
    fn luminance_of_white_is_white() {
        let registry = OperationRegistry::with_default_ops();
        let graph = parse("a = input(\"rgb\", 8); b = convert_to_gray(a); b", &registry).unwrap();
        let node = &graph.nodes[1];
        let closure = ConvertToGray.compile(node);

        let mut ctx = ProcessingContext::default();
        let white = Image::rgb_from_planes(2, 1, [vec![255; 2], vec![255; 2], vec![255; 2]])
            .unwrap();
        ctx.store(crate::context::INPUT_SLOT_1, Item::from_image(white.clone()));
        ctx.store(node.args[0].ref_id().unwrap(), Item::from_image(white));

        let out = closure(&ctx).unwrap().into_image().unwrap();
        assert!(out.is_gray());
        assert_eq!(out.plane(0), &[255, 255]);
    }

    #[test]
    fn gray_to_rgb_replicates_planes() {
        let registry = OperationRegistry::with_default_ops();
        let graph = parse("a = input(\"gray\", 8); b = convert_to_rgb(a); b", &registry).unwrap();
        let node = &graph.nodes[1];
        let closure = ConvertToRgb.compile(node);

        let mut ctx = ProcessingContext::default();
        let gray = Image::gray_from_plane(2, 1, vec![7, 9]).unwrap();
        ctx.store(node.args[0].ref_id().unwrap(), Item::from_image(gray));

        let out = closure(&ctx).unwrap().into_image().unwrap();
        assert!(out.is_rgb());
        assert_eq!(out.plane(0), out.plane(2));
    }
}
