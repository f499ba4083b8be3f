//! Script parser: source text to a typed operation graph.
//!
//! Scripts are a sequence of bindings followed by a result identifier:
//!
//! ```text
//! a = input("gray", 8);
//! b = mean(a, 3, 3, "constant");
//! c = binary_threshold(b, "normal");
//! c
//! ```
//!
//! Each call is bound to exactly one overload of a registered operation.
//! Argument types (literals and prior binding results) are matched against
//! every declared overload; no match and multiple matches are both parse
//! errors, so typing is fully resolved before anything executes. Every node
//! gets a fresh result id, and producer/consumer edges are recorded for the
//! compiler.

use std::collections::HashMap;

use crate::compiler::OpClosure;
use crate::context::FIRST_RESULT_ID;
use crate::error::{Result, ScriptError};
use crate::item::{Item, ItemType};

/// Kind of value an overload parameter accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    /// Grayscale or RGB image.
    AnyImage,
    Gray,
    Rgb,
    Integer,
    Real,
    Characters,
    Histogram,
}

impl ParamKind {
    pub fn matches(self, item_type: ItemType) -> bool {
        match self {
            ParamKind::AnyImage => item_type.is_image(),
            ParamKind::Gray => item_type == ItemType::GrayImage,
            ParamKind::Rgb => item_type == ItemType::RgbImage,
            ParamKind::Integer => item_type == ItemType::SignedInteger,
            ParamKind::Real => item_type == ItemType::Real,
            ParamKind::Characters => item_type == ItemType::Characters,
            ParamKind::Histogram => item_type == ItemType::Histogram,
        }
    }
}

/// One callable signature of an operation.
pub struct Overload {
    pub params: Vec<ParamKind>,
    /// Resolves the node's result type from the bound arguments.
    pub result: fn(&[ScriptArg]) -> Result<ItemType>,
}

/// Constraint attached to a declared parameter.
#[derive(Debug, Clone)]
pub enum Constraint {
    None,
    IntRange { min: i32, max: i32 },
    OneOf(&'static [&'static str]),
}

/// Declared parameter of an operation, used for validation and reporting.
#[derive(Debug, Clone)]
pub struct ParameterDef {
    pub name: &'static str,
    pub description: &'static str,
    pub unit: &'static str,
    pub constraint: Constraint,
}

/// The declared parameter set of an operation.
#[derive(Debug, Clone, Default)]
pub struct ParameterSet {
    defs: Vec<ParameterDef>,
}

impl ParameterSet {
    pub fn new(defs: Vec<ParameterDef>) -> Self {
        Self { defs }
    }

    pub fn defs(&self) -> &[ParameterDef] {
        &self.defs
    }

    /// Check an integer argument against the named parameter's range.
    pub fn check_int(&self, name: &str, value: i32) -> Result<()> {
        for def in &self.defs {
            if def.name == name {
                if let Constraint::IntRange { min, max } = def.constraint {
                    if value < min || value > max {
                        return Err(ScriptError::InvalidParameter(format!(
                            "'{name}' must be in {min}..={max}, got {value}"
                        )));
                    }
                }
                return Ok(());
            }
        }
        Ok(())
    }

    /// Check a characters argument against the named parameter's value list.
    pub fn check_str(&self, name: &str, value: &str) -> Result<()> {
        for def in &self.defs {
            if def.name == name {
                if let Constraint::OneOf(allowed) = def.constraint {
                    if !allowed.contains(&value) {
                        return Err(ScriptError::InvalidParameter(format!(
                            "'{name}' must be one of {allowed:?}, got '{value}'"
                        )));
                    }
                }
                return Ok(());
            }
        }
        Ok(())
    }
}

/// A registered script operation.
///
/// The contract every leaf fulfils: declare a name, a category, result types
/// and a parameter set; contribute overloads for parse-time binding; validate
/// literal arguments; and produce an execution closure for a bound node.
pub trait Operation: Send + Sync {
    fn name(&self) -> &'static str;
    fn category(&self) -> &'static str;
    fn result_types(&self) -> Vec<ItemType>;
    fn parameters(&self) -> ParameterSet;
    fn overloads(&self) -> Vec<Overload>;

    /// Range-check bound literal arguments. Called once at parse time.
    fn validate(&self, _args: &[ScriptArg]) -> Result<()> {
        Ok(())
    }

    /// Build the execution closure for a bound node of this operation.
    fn compile(&self, node: &ScriptNode) -> OpClosure;
}

/// Operation lookup table consulted by the parser.
pub struct OperationRegistry {
    ops: HashMap<&'static str, Box<dyn Operation>>,
}

impl OperationRegistry {
    pub fn empty() -> Self {
        Self {
            ops: HashMap::new(),
        }
    }

    /// Registry with the built-in operation catalogue.
    pub fn with_default_ops() -> Self {
        let mut registry = Self::empty();
        for op in crate::ops::default_ops() {
            registry.register(op);
        }
        registry
    }

    pub fn register(&mut self, op: Box<dyn Operation>) {
        self.ops.insert(op.name(), op);
    }

    pub fn get(&self, name: &str) -> Option<&dyn Operation> {
        self.ops.get(name).map(|b| b.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.ops.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

/// A bound call argument.
#[derive(Debug, Clone)]
pub enum ScriptArg {
    /// Literal integer, real or characters value.
    Literal(Item),
    /// Reference to a prior binding's result.
    Ref { id: u32, item_type: ItemType },
}

impl ScriptArg {
    pub fn item_type(&self) -> ItemType {
        match self {
            ScriptArg::Literal(item) => item.item_type(),
            ScriptArg::Ref { item_type, .. } => *item_type,
        }
    }

    pub fn ref_id(&self) -> Result<u32> {
        match self {
            ScriptArg::Ref { id, .. } => Ok(*id),
            ScriptArg::Literal(item) => Err(ScriptError::Parse(format!(
                "expected a binding reference, got literal {}",
                item.item_type()
            ))),
        }
    }

    pub fn integer(&self) -> Result<i32> {
        match self {
            ScriptArg::Literal(item) => item.as_integer(),
            ScriptArg::Ref { .. } => Err(ScriptError::Parse(
                "expected a literal integer, got a binding reference".into(),
            )),
        }
    }

    pub fn real(&self) -> Result<f64> {
        match self {
            ScriptArg::Literal(item) => item.as_real(),
            ScriptArg::Ref { .. } => Err(ScriptError::Parse(
                "expected a literal real, got a binding reference".into(),
            )),
        }
    }

    pub fn characters(&self) -> Result<&str> {
        match self {
            ScriptArg::Literal(item) => item.as_characters(),
            ScriptArg::Ref { .. } => Err(ScriptError::Parse(
                "expected a literal string, got a binding reference".into(),
            )),
        }
    }
}

/// One operation node of the parsed graph.
#[derive(Debug, Clone)]
pub struct ScriptNode {
    pub result_id: u32,
    pub op: String,
    pub args: Vec<ScriptArg>,
    pub result_type: ItemType,
}

/// Parsed script: typed nodes plus producer/consumer edges.
#[derive(Debug, Clone)]
pub struct ScriptGraph {
    pub nodes: Vec<ScriptNode>,
    /// `(producer result id, consumer result id)` edges.
    pub links: Vec<(u32, u32)>,
    /// Result id of the final expression.
    pub result_id: u32,
}

impl ScriptGraph {
    pub fn node(&self, id: u32) -> Option<&ScriptNode> {
        self.nodes.iter().find(|n| n.result_id == id)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Int(i64),
    Real(f64),
    Str(String),
    Equals,
    LParen,
    RParen,
    Comma,
    Semicolon,
}

fn tokenize(source: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(pos, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '=' => {
                chars.next();
                tokens.push(Token::Equals);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            ';' => {
                chars.next();
                tokens.push(Token::Semicolon);
            }
            '"' => {
                chars.next();
                let mut text = String::new();
                loop {
                    match chars.next() {
                        Some((_, '"')) => break,
                        Some((_, c)) => text.push(c),
                        None => {
                            return Err(ScriptError::Parse(format!(
                                "unterminated string starting at offset {pos}"
                            )))
                        }
                    }
                }
                tokens.push(Token::Str(text));
            }
            c if c.is_ascii_digit() || c == '-' => {
                let mut text = String::new();
                text.push(c);
                chars.next();
                let mut is_real = false;
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        text.push(c);
                        chars.next();
                    } else if c == '.' && !is_real {
                        is_real = true;
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if is_real {
                    let value = text.parse::<f64>().map_err(|_| {
                        ScriptError::Parse(format!("invalid real literal '{text}'"))
                    })?;
                    tokens.push(Token::Real(value));
                } else {
                    let value = text.parse::<i64>().map_err(|_| {
                        ScriptError::Parse(format!("invalid integer literal '{text}'"))
                    })?;
                    tokens.push(Token::Int(value));
                }
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut text = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        text.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(text));
            }
            other => {
                return Err(ScriptError::Parse(format!(
                    "unexpected character '{other}' at offset {pos}"
                )))
            }
        }
    }

    Ok(tokens)
}

/// Parse `source` against the operation registry.
pub fn parse(source: &str, registry: &OperationRegistry) -> Result<ScriptGraph> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ScriptError::Parse("empty script".into()));
    }

    let mut nodes: Vec<ScriptNode> = Vec::new();
    let mut links: Vec<(u32, u32)> = Vec::new();
    let mut bindings: HashMap<String, u32> = HashMap::new();
    let mut next_id = FIRST_RESULT_ID;

    let mut pos = 0usize;

    let expect = |tokens: &[Token], pos: usize, token: Token| -> Result<()> {
        match tokens.get(pos) {
            Some(t) if *t == token => Ok(()),
            Some(t) => Err(ScriptError::Parse(format!(
                "expected {token:?}, found {t:?}"
            ))),
            None => Err(ScriptError::Parse(format!(
                "expected {token:?}, found end of script"
            ))),
        }
    };

    loop {
        let name = match tokens.get(pos) {
            Some(Token::Ident(name)) => name.clone(),
            other => {
                return Err(ScriptError::Parse(format!(
                    "expected an identifier, found {other:?}"
                )))
            }
        };

        // `name` alone is the final result expression.
        if pos + 1 == tokens.len() {
            let result_id = *bindings.get(&name).ok_or_else(|| {
                ScriptError::Parse(format!("result references unknown binding '{name}'"))
            })?;
            return Ok(ScriptGraph {
                nodes,
                links,
                result_id,
            });
        }

        expect(&tokens, pos + 1, Token::Equals)?;
        let op_name = match tokens.get(pos + 2) {
            Some(Token::Ident(op)) => op.clone(),
            other => {
                return Err(ScriptError::Parse(format!(
                    "expected an operation name, found {other:?}"
                )))
            }
        };
        expect(&tokens, pos + 3, Token::LParen)?;

        // Collect call arguments up to the closing parenthesis.
        let mut args: Vec<ScriptArg> = Vec::new();
        let mut cursor = pos + 4;
        if tokens.get(cursor) == Some(&Token::RParen) {
            cursor += 1;
        } else {
            loop {
                let arg = match tokens.get(cursor) {
                    Some(Token::Int(v)) => {
                        let v = i32::try_from(*v).map_err(|_| {
                            ScriptError::Parse(format!("integer literal {v} out of range"))
                        })?;
                        ScriptArg::Literal(Item::SignedInteger(v))
                    }
                    Some(Token::Real(v)) => ScriptArg::Literal(Item::Real(*v)),
                    Some(Token::Str(s)) => ScriptArg::Literal(Item::Characters(s.clone())),
                    Some(Token::Ident(binding)) => {
                        let id = *bindings.get(binding).ok_or_else(|| {
                            ScriptError::Parse(format!("unknown binding '{binding}'"))
                        })?;
                        let item_type = nodes
                            .iter()
                            .find(|n| n.result_id == id)
                            .map(|n| n.result_type)
                            .unwrap_or(ItemType::Invalid);
                        ScriptArg::Ref { id, item_type }
                    }
                    other => {
                        return Err(ScriptError::Parse(format!(
                            "expected an argument, found {other:?}"
                        )))
                    }
                };
                args.push(arg);
                cursor += 1;
                match tokens.get(cursor) {
                    Some(Token::Comma) => cursor += 1,
                    Some(Token::RParen) => {
                        cursor += 1;
                        break;
                    }
                    other => {
                        return Err(ScriptError::Parse(format!(
                            "expected ',' or ')', found {other:?}"
                        )))
                    }
                }
            }
        }
        expect(&tokens, cursor, Token::Semicolon)?;
        pos = cursor + 1;

        // Resolve the call against the registry.
        let op = registry.get(&op_name).ok_or_else(|| {
            ScriptError::Parse(format!("unknown operation '{op_name}'"))
        })?;

        let overloads = op.overloads();
        let matches: Vec<&Overload> = overloads
            .iter()
            .filter(|o| {
                o.params.len() == args.len()
                    && o.params
                        .iter()
                        .zip(args.iter())
                        .all(|(p, a)| p.matches(a.item_type()))
            })
            .collect();
        let overload = match matches.as_slice() {
            [single] => *single,
            [] => {
                let got: Vec<String> = args.iter().map(|a| a.item_type().to_string()).collect();
                return Err(ScriptError::Parse(format!(
                    "no overload of '{op_name}' matches ({})",
                    got.join(", ")
                )));
            }
            many => {
                return Err(ScriptError::Parse(format!(
                    "call to '{op_name}' is ambiguous: {} overloads match",
                    many.len()
                )));
            }
        };

        op.validate(&args)?;
        let result_type = (overload.result)(&args)?;

        let result_id = next_id;
        next_id += 1;

        for arg in &args {
            if let ScriptArg::Ref { id, .. } = arg {
                links.push((*id, result_id));
            }
        }

        if bindings.insert(name.clone(), result_id).is_some() {
            return Err(ScriptError::Parse(format!(
                "binding '{name}' is defined twice"
            )));
        }

        nodes.push(ScriptNode {
            result_id,
            op: op_name,
            args,
            result_type,
        });
    }
}

/// Render a parsed graph back to canonical script source.
///
/// Bindings are named after their result ids, so a print/parse round trip
/// preserves the graph up to result-id renumbering.
pub fn print(graph: &ScriptGraph) -> String {
    let mut out = String::new();
    for node in &graph.nodes {
        out.push_str(&format!("r{} = {}(", node.result_id, node.op));
        for (i, arg) in node.args.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            match arg {
                ScriptArg::Ref { id, .. } => out.push_str(&format!("r{id}")),
                ScriptArg::Literal(Item::SignedInteger(v)) => out.push_str(&v.to_string()),
                ScriptArg::Literal(Item::Real(v)) => out.push_str(&format!("{v:?}")),
                ScriptArg::Literal(Item::Characters(s)) => out.push_str(&format!("\"{s}\"")),
                ScriptArg::Literal(other) => out.push_str(&format!("<{}>", other.item_type())),
            }
        }
        out.push_str(");\n");
    }
    out.push_str(&format!("r{}", graph.result_id));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> OperationRegistry {
        OperationRegistry::with_default_ops()
    }

    #[test]
    fn parses_the_reference_script() {
        let graph = parse(
            "a = input(\"gray\", 8);\n\
             b = mean(a, 3, 3, \"constant\");\n\
             c = binary_threshold(b, \"normal\");\n\
             c",
            &registry(),
        )
        .unwrap();
        assert_eq!(graph.nodes.len(), 3);
        assert_eq!(graph.links.len(), 2);
        assert_eq!(graph.result_id, graph.nodes[2].result_id);
        assert_eq!(graph.nodes[0].result_type, ItemType::GrayImage);
    }

    #[test]
    fn rejects_unknown_operation() {
        let err = parse("a = wobble(1); a", &registry()).unwrap_err();
        assert!(err.to_string().contains("unknown operation"));
    }

    #[test]
    fn rejects_unknown_binding() {
        let err = parse("a = mean(b, 3, 3); a", &registry()).unwrap_err();
        assert!(err.to_string().contains("unknown binding"));
    }

    #[test]
    fn rejects_type_mismatch() {
        let err = parse("a = input(\"gray\", 8); b = mean(a, \"x\", 3); b", &registry())
            .unwrap_err();
        assert!(err.to_string().contains("no overload"));
    }

    #[test]
    fn rejects_out_of_range_parameter() {
        let err =
            parse("a = input(\"gray\", 8); b = mean(a, 1, 3); b", &registry()).unwrap_err();
        assert!(matches!(err, ScriptError::InvalidParameter(_)));
    }

    #[test]
    fn print_parse_round_trip_preserves_shape() {
        let source = "a = input(\"gray\", 8);\n\
                      b = mean(a, 3, 3, \"mirror\");\n\
                      c = diff(a, b, 0);\n\
                      c";
        let first = parse(source, &registry()).unwrap();
        let second = parse(&print(&first), &registry()).unwrap();
        assert_eq!(first.nodes.len(), second.nodes.len());
        assert_eq!(first.links.len(), second.links.len());
        for (a, b) in first.nodes.iter().zip(second.nodes.iter()) {
            assert_eq!(a.op, b.op);
            assert_eq!(a.result_type, b.result_type);
            assert_eq!(a.args.len(), b.args.len());
        }
    }
}
