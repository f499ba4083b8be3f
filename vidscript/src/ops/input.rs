//! `input` — bind an evaluation input image.
//!
//! `input(mode, bits)` binds the first input, `input(mode, bits, source)`
//! selects input 1 or 2. Frame scripts see one input; inter-frame scripts see
//! the left frame as source 1 and the right frame as source 2.

use crate::compiler::OpClosure;
use crate::context::{INPUT_SLOT_1, INPUT_SLOT_2};
use crate::error::{Result, ScriptError};
use crate::item::ItemType;
use crate::parser::{
    Constraint, Operation, Overload, ParamKind, ParameterDef, ParameterSet, ScriptArg, ScriptNode,
};

pub struct Input;

fn result_type(args: &[ScriptArg]) -> Result<ItemType> {
    match args[0].characters()? {
        "gray" => Ok(ItemType::GrayImage),
        "rgb" => Ok(ItemType::RgbImage),
        other => Err(ScriptError::InvalidParameter(format!(
            "invalid input mode '{other}'"
        ))),
    }
}

impl Operation for Input {
    fn name(&self) -> &'static str {
        "input"
    }

    fn category(&self) -> &'static str {
        "input"
    }

    fn result_types(&self) -> Vec<ItemType> {
        vec![ItemType::GrayImage, ItemType::RgbImage]
    }

    fn parameters(&self) -> ParameterSet {
        ParameterSet::new(vec![
            ParameterDef {
                name: "mode",
                description: "type of input image",
                unit: "",
                constraint: Constraint::OneOf(&["gray", "rgb"]),
            },
            ParameterDef {
                name: "bits",
                description: "sample depth",
                unit: "bits",
                constraint: Constraint::IntRange { min: 8, max: 8 },
            },
            ParameterDef {
                name: "source",
                description: "evaluation input to bind",
                unit: "",
                constraint: Constraint::IntRange { min: 1, max: 2 },
            },
        ])
    }

    fn overloads(&self) -> Vec<Overload> {
        vec![
            Overload {
                params: vec![ParamKind::Characters, ParamKind::Integer],
                result: result_type,
            },
            Overload {
                params: vec![ParamKind::Characters, ParamKind::Integer, ParamKind::Integer],
                result: result_type,
            },
        ]
    }

    fn validate(&self, args: &[ScriptArg]) -> Result<()> {
        let params = self.parameters();
        params.check_str("mode", args[0].characters()?)?;
        params.check_int("bits", args[1].integer()?)?;
        if let Some(source) = args.get(2) {
            params.check_int("source", source.integer()?)?;
        }
        Ok(())
    }

    fn compile(&self, node: &ScriptNode) -> OpClosure {
        let source = node
            .args
            .get(2)
            .and_then(|a| a.integer().ok())
            .unwrap_or(1);
        let slot = if source == 2 { INPUT_SLOT_2 } else { INPUT_SLOT_1 };
        let expected = node.result_type;

        super::closure("input", move |ctx| {
            let item = ctx.load(slot)?.clone();
            if item.item_type() != expected {
                return Err(ScriptError::evaluate(
                    "input",
                    format!(
                        "evaluation input {} is {}, script declared {}",
                        if slot == INPUT_SLOT_2 { 2 } else { 1 },
                        item.item_type(),
                        expected
                    ),
                ));
            }
            Ok(item)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, OperationRegistry};

    #[test]
    fn declares_both_image_modes() {
        let registry = OperationRegistry::with_default_ops();
        let gray = parse("a = input(\"gray\", 8); a", &registry).unwrap();
        assert_eq!(gray.nodes[0].result_type, ItemType::GrayImage);
        let rgb = parse("a = input(\"rgb\", 8, 2); a", &registry).unwrap();
        assert_eq!(rgb.nodes[0].result_type, ItemType::RgbImage);
    }

    #[test]
    fn rejects_unknown_mode_and_depth() {
        let registry = OperationRegistry::with_default_ops();
        assert!(parse("a = input(\"bgr\", 8); a", &registry).is_err());
        assert!(parse("a = input(\"gray\", 16); a", &registry).is_err());
        assert!(parse("a = input(\"gray\", 8, 3); a", &registry).is_err());
    }
}
