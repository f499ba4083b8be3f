//! Script compiler: parsed graph to an execution plan.
//!
//! The compiler orders nodes topologically along producer/consumer edges and
//! groups them into a plan tree: independent siblings form a [`Parallel`]
//! node, dependent groups are chained in a [`Sequence`], and each operation
//! ends up as a [`Single`] leaf wrapping its execution closure. A cycle or a
//! result nothing consumes (other than the final result and input bindings)
//! is a compile error.
//!
//! [`Parallel`]: PlanNode::Parallel
//! [`Sequence`]: PlanNode::Sequence
//! [`Single`]: PlanNode::Single

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::context::ProcessingContext;
use crate::error::{Result, ScriptError};
use crate::item::Item;
use crate::parser::{OperationRegistry, ScriptGraph};

/// Execution closure of one operation node.
///
/// Reads its inputs from the processing context and returns the produced
/// item; the executor stores it under the node's result id.
pub type OpClosure = Arc<dyn Fn(&ProcessingContext) -> Result<Item> + Send + Sync>;

/// A node of the execution plan.
#[derive(Debug, Clone)]
pub enum PlanNode {
    /// Run one operation closure.
    Single(u32),
    /// Run children in order, awaiting each.
    Sequence(Vec<PlanNode>),
    /// Run children concurrently and join.
    Parallel(Vec<PlanNode>),
}

/// An immutable compiled script.
pub struct CompiledScript {
    pub plan: PlanNode,
    pub closures: HashMap<u32, OpClosure>,
    pub op_names: HashMap<u32, String>,
    pub result_id: u32,
}

impl std::fmt::Debug for CompiledScript {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledScript")
            .field("plan", &self.plan)
            .field("op_names", &self.op_names)
            .field("result_id", &self.result_id)
            .finish()
    }
}

/// Compile a parsed graph into an execution plan.
pub fn compile(graph: &ScriptGraph, registry: &OperationRegistry) -> Result<CompiledScript> {
    if graph.node(graph.result_id).is_none() {
        return Err(ScriptError::Compile(format!(
            "result id {} is not produced by any node",
            graph.result_id
        )));
    }

    // Dedup edges; a node may consume the same producer twice.
    let edges: HashSet<(u32, u32)> = graph.links.iter().copied().collect();

    // Every node must feed the final result, except the result itself and
    // `input` bindings (those are seeded by the evaluation, not consumed).
    let mut ancestors: HashSet<u32> = HashSet::new();
    let mut queue = VecDeque::from([graph.result_id]);
    while let Some(id) = queue.pop_front() {
        if !ancestors.insert(id) {
            continue;
        }
        for (producer, consumer) in &edges {
            if *consumer == id {
                queue.push_back(*producer);
            }
        }
    }
    for node in &graph.nodes {
        if !ancestors.contains(&node.result_id) && node.op != "input" {
            return Err(ScriptError::Compile(format!(
                "result of '{}' (id {}) is never used",
                node.op, node.result_id
            )));
        }
    }

    // Kahn's algorithm, level by level: each level holds nodes whose
    // producers are all scheduled, so siblings within a level are
    // independent and may run concurrently.
    let mut indegree: HashMap<u32, usize> = graph
        .nodes
        .iter()
        .map(|n| (n.result_id, 0))
        .collect();
    for (_, consumer) in &edges {
        if let Some(d) = indegree.get_mut(consumer) {
            *d += 1;
        }
    }

    let mut scheduled: HashSet<u32> = HashSet::new();
    let mut levels: Vec<Vec<u32>> = Vec::new();
    loop {
        let mut level: Vec<u32> = graph
            .nodes
            .iter()
            .map(|n| n.result_id)
            .filter(|id| !scheduled.contains(id) && indegree[id] == 0)
            .collect();
        if level.is_empty() {
            break;
        }
        level.sort_unstable();
        for id in &level {
            scheduled.insert(*id);
            for (producer, consumer) in &edges {
                if producer == id {
                    if let Some(d) = indegree.get_mut(consumer) {
                        *d -= 1;
                    }
                }
            }
        }
        levels.push(level);
    }

    if scheduled.len() != graph.nodes.len() {
        return Err(ScriptError::Compile(
            "operation graph contains a cycle".into(),
        ));
    }

    let mut sequence: Vec<PlanNode> = Vec::new();
    for level in levels {
        if level.len() == 1 {
            sequence.push(PlanNode::Single(level[0]));
        } else {
            sequence.push(PlanNode::Parallel(
                level.into_iter().map(PlanNode::Single).collect(),
            ));
        }
    }
    let plan = if sequence.len() == 1 {
        sequence.pop().expect("non-empty plan")
    } else {
        PlanNode::Sequence(sequence)
    };

    // Ask each operation to install its execution closure.
    let mut closures = HashMap::new();
    let mut op_names = HashMap::new();
    for node in &graph.nodes {
        let op = registry.get(&node.op).ok_or_else(|| {
            ScriptError::Compile(format!("operation '{}' disappeared from registry", node.op))
        })?;
        closures.insert(node.result_id, op.compile(node));
        op_names.insert(node.result_id, node.op.clone());
    }

    Ok(CompiledScript {
        plan,
        closures,
        op_names,
        result_id: graph.result_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{parse, OperationRegistry};

    fn registry() -> OperationRegistry {
        OperationRegistry::with_default_ops()
    }

    fn compiled(source: &str) -> Result<CompiledScript> {
        let registry = registry();
        let graph = parse(source, &registry)?;
        compile(&graph, &registry)
    }

    #[test]
    fn linear_chain_becomes_a_sequence() {
        let script = compiled(
            "a = input(\"gray\", 8);\n\
             b = mean(a, 3, 3);\n\
             c = binary_threshold(b, \"normal\");\n\
             c",
        )
        .unwrap();
        match &script.plan {
            PlanNode::Sequence(children) => {
                assert_eq!(children.len(), 3);
                assert!(children.iter().all(|c| matches!(c, PlanNode::Single(_))));
            }
            other => panic!("expected a sequence, got {other:?}"),
        }
    }

    #[test]
    fn independent_siblings_become_parallel() {
        let script = compiled(
            "a = input(\"gray\", 8);\n\
             b = mean(a, 3, 3);\n\
             c = mean(a, 5, 5);\n\
             d = diff(b, c, 0);\n\
             d",
        )
        .unwrap();
        match &script.plan {
            PlanNode::Sequence(children) => {
                assert!(children
                    .iter()
                    .any(|c| matches!(c, PlanNode::Parallel(p) if p.len() == 2)));
            }
            other => panic!("expected a sequence, got {other:?}"),
        }
    }

    #[test]
    fn unused_result_is_a_compile_error() {
        let err = compiled(
            "a = input(\"gray\", 8);\n\
             b = mean(a, 3, 3);\n\
             c = mean(a, 5, 5);\n\
             b",
        )
        .unwrap_err();
        assert!(matches!(err, ScriptError::Compile(_)));
    }

    #[test]
    fn unused_input_binding_is_allowed() {
        // Inter-frame identity scripts bind the second input without using it.
        let script = compiled(
            "a = input(\"rgb\", 8);\n\
             b = input(\"rgb\", 8, 2);\n\
             a",
        );
        assert!(script.is_ok());
    }
}
