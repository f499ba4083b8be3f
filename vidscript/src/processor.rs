//! Scripting runtime: compile scripts, evaluate them against images.
//!
//! The [`ImageProcessor`] owns the operation registry, the compiled-script
//! table and the worker pool. `compile` deduplicates by hashing the source
//! text, so compiling the same script twice returns the same compile id.
//! `evaluate` creates a fresh processing context, seeds the input image(s)
//! at the reserved slots, drives the plan against the pool and returns the
//! last stored item.
//!
//! Plan execution: a `Single` node runs one operation closure; a `Sequence`
//! runs children in order; a `Parallel` runs children concurrently against
//! context snapshots and merges the produced items afterwards. Per-operation
//! wall-clock durations are accumulated for the diagnostics report.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::compiler::{self, CompiledScript, PlanNode};
use crate::context::{ProcessingContext, INPUT_SLOT_1, INPUT_SLOT_2};
use crate::error::{Result, ScriptError};
use crate::image::Image;
use crate::item::Item;
use crate::parser::{self, OperationRegistry};

/// Aggregated timings of one operation across all evaluations.
#[derive(Debug, Clone)]
pub struct OpTiming {
    pub operation: String,
    pub count: u64,
    pub total: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl OpTiming {
    pub fn mean(&self) -> Duration {
        if self.count == 0 {
            Duration::ZERO
        } else {
            self.total / self.count as u32
        }
    }
}

#[derive(Debug, Clone, Default)]
struct TimingAccum {
    count: u64,
    total: Duration,
    min: Option<Duration>,
    max: Duration,
}

/// Compiles scripts and evaluates them against the worker pool.
pub struct ImageProcessor {
    pool: Arc<rayon::ThreadPool>,
    registry: Arc<OperationRegistry>,
    compiled: RwLock<Vec<Arc<CompiledScript>>>,
    hashes: RwLock<HashMap<u64, usize>>,
    params: RwLock<HashMap<String, Item>>,
    stats: Mutex<HashMap<String, TimingAccum>>,
}

impl ImageProcessor {
    pub fn new(pool: Arc<rayon::ThreadPool>, registry: OperationRegistry) -> Self {
        Self {
            pool,
            registry: Arc::new(registry),
            compiled: RwLock::new(Vec::new()),
            hashes: RwLock::new(HashMap::new()),
            params: RwLock::new(HashMap::new()),
            stats: Mutex::new(HashMap::new()),
        }
    }

    /// Build a processor with a pool of `threads` workers (0 = host
    /// parallelism) and the default operation catalogue.
    pub fn with_threads(threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("vidscript-worker-{i}"))
            .build()
            .map_err(|e| ScriptError::Compile(format!("failed to build worker pool: {e}")))?;
        Ok(Self::new(
            Arc::new(pool),
            OperationRegistry::with_default_ops(),
        ))
    }

    pub fn pool(&self) -> &Arc<rayon::ThreadPool> {
        &self.pool
    }

    /// Set a process-wide evaluation parameter, e.g. `cutoff_x`.
    pub fn add_param(&self, key: impl Into<String>, value: Item) {
        self.params.write().unwrap().insert(key.into(), value);
    }

    /// Compile `source`, deduplicating by source hash.
    pub fn compile(&self, source: &str) -> Result<usize> {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        let hash = hasher.finish();

        if let Some(&id) = self.hashes.read().unwrap().get(&hash) {
            return Ok(id);
        }

        let graph = parser::parse(source, &self.registry)?;
        let script = compiler::compile(&graph, &self.registry)?;

        let mut compiled = self.compiled.write().unwrap();
        let mut hashes = self.hashes.write().unwrap();
        // Double-checked: another caller may have compiled it meanwhile.
        if let Some(&id) = hashes.get(&hash) {
            return Ok(id);
        }
        let compile_id = compiled.len();
        compiled.push(Arc::new(script));
        hashes.insert(hash, compile_id);
        tracing::debug!(compile_id, "compiled script");
        Ok(compile_id)
    }

    /// Evaluate a compiled script against one input image.
    pub fn evaluate(&self, compile_id: usize, image: Image) -> Result<Item> {
        self.evaluate_inputs(compile_id, image, None)
    }

    /// Evaluate a compiled script against a pair of adjacent images.
    pub fn evaluate_pair(&self, compile_id: usize, first: Image, second: Image) -> Result<Item> {
        self.evaluate_inputs(compile_id, first, Some(second))
    }

    /// Dispatch an evaluation onto the pool; `callback` fires on completion.
    pub fn evaluate_with(
        self: &Arc<Self>,
        compile_id: usize,
        first: Image,
        second: Option<Image>,
        callback: impl FnOnce(Result<Item>) + Send + 'static,
    ) {
        let this = Arc::clone(self);
        self.pool.spawn(move || {
            callback(this.evaluate_inputs(compile_id, first, second));
        });
    }

    fn evaluate_inputs(
        &self,
        compile_id: usize,
        first: Image,
        second: Option<Image>,
    ) -> Result<Item> {
        let script = self
            .compiled
            .read()
            .unwrap()
            .get(compile_id)
            .cloned()
            .ok_or_else(|| {
                ScriptError::Compile(format!("unknown compile id {compile_id}"))
            })?;

        let mut ctx = ProcessingContext::new(self.params.read().unwrap().clone());
        ctx.store(INPUT_SLOT_1, Item::from_image(first));
        if let Some(second) = second {
            ctx.store(INPUT_SLOT_2, Item::from_image(second));
        }

        self.pool.install(|| self.exec_node(&script, &script.plan, &mut ctx))?;
        self.absorb_timings(&ctx);
        // The final expression's item, not `last_stored`: when the result
        // node shares a parallel level with an unused input binding, the
        // branch that merged last is arbitrary.
        ctx.load(script.result_id).cloned()
    }

    fn exec_node(
        &self,
        script: &CompiledScript,
        node: &PlanNode,
        ctx: &mut ProcessingContext,
    ) -> Result<()> {
        match node {
            PlanNode::Single(id) => {
                let closure = script.closures.get(id).ok_or_else(|| {
                    ScriptError::Compile(format!("no closure registered for result id {id}"))
                })?;
                let start = Instant::now();
                let item = closure(ctx)?;
                if let Some(name) = script.op_names.get(id) {
                    ctx.record_duration(name, start.elapsed());
                }
                ctx.store(*id, item);
                Ok(())
            }
            PlanNode::Sequence(children) => {
                for child in children {
                    self.exec_node(script, child, ctx)?;
                }
                Ok(())
            }
            PlanNode::Parallel(children) => {
                let branches: Result<Vec<ProcessingContext>> = children
                    .par_iter()
                    .map(|child| {
                        let mut local = ctx.clone();
                        self.exec_node(script, child, &mut local)?;
                        Ok(local)
                    })
                    .collect();
                for branch in branches? {
                    ctx.merge(branch);
                }
                Ok(())
            }
        }
    }

    fn absorb_timings(&self, ctx: &ProcessingContext) {
        let mut stats = self.stats.lock().unwrap();
        for (operation, duration) in ctx.durations() {
            let accum = stats.entry(operation.clone()).or_default();
            accum.count += 1;
            accum.total += *duration;
            accum.max = accum.max.max(*duration);
            accum.min = Some(accum.min.map_or(*duration, |m| m.min(*duration)));
        }
    }

    /// Per-operation timing aggregates, sorted by operation name.
    pub fn timing_report(&self) -> Vec<OpTiming> {
        let stats = self.stats.lock().unwrap();
        let mut report: Vec<OpTiming> = stats
            .iter()
            .map(|(operation, a)| OpTiming {
                operation: operation.clone(),
                count: a.count,
                total: a.total,
                min: a.min.unwrap_or_default(),
                max: a.max,
            })
            .collect();
        report.sort_by(|a, b| a.operation.cmp(&b.operation));
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> Arc<ImageProcessor> {
        Arc::new(ImageProcessor::with_threads(2).unwrap())
    }

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
    fn compile_deduplicates_by_source_hash() {
        let processor = processor();
        let a = processor.compile("a = input(\"gray\", 8); a").unwrap();
        let b = processor.compile("a = input(\"gray\", 8); a").unwrap();
        let c = processor.compile("a = input(\"rgb\", 8); a").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn identity_script_reproduces_input() {
        let processor = processor();
        let id = processor.compile("a = input(\"gray\", 8); a").unwrap();
        let image = cross_image();
        let out = processor
            .evaluate(id, image.clone())
            .unwrap()
            .into_image()
            .unwrap();
        assert_eq!(out.plane(0), image.plane(0));
    }

    #[test]
    fn reference_script_end_to_end() {
        let processor = processor();
        let id = processor
            .compile(
                "a = input(\"gray\", 8);\n\
                 b = mean(a, 3, 3, \"constant\");\n\
                 c = binary_threshold(b, \"normal\");\n\
                 c",
            )
            .unwrap();
        let out = processor
            .evaluate(id, cross_image())
            .unwrap()
            .into_image()
            .unwrap();
        // The blurred plus sign thresholds back to its 2x2 core.
        assert_eq!(out.sample(0, 1, 1), 255);
        assert_eq!(out.sample(0, 0, 0), 0);
    }

    #[test]
    fn pair_evaluation_sees_both_inputs() {
        let processor = processor();
        let id = processor
            .compile(
                "a = input(\"gray\", 8);\n\
                 b = input(\"gray\", 8, 2);\n\
                 c = diff(a, b, 0);\n\
                 c",
            )
            .unwrap();
        let image = cross_image();
        let out = processor
            .evaluate_pair(id, image.clone(), image)
            .unwrap()
            .into_image()
            .unwrap();
        assert!(out.plane(0).iter().all(|&p| p == 0));
    }

    #[test]
    fn cutoff_parameter_does_not_change_results() {
        let processor = processor();
        let id = processor
            .compile("a = input(\"gray\", 8); b = mean(a, 3, 3); b")
            .unwrap();
        let coarse = processor.evaluate(id, cross_image()).unwrap();

        processor.add_param("cutoff_x", Item::SignedInteger(1));
        processor.add_param("cutoff_y", Item::SignedInteger(1));
        let fine = processor.evaluate(id, cross_image()).unwrap();

        assert_eq!(
            coarse.into_image().unwrap().plane(0),
            fine.into_image().unwrap().plane(0)
        );
    }

    #[test]
    fn timings_are_collected() {
        let processor = processor();
        let id = processor
            .compile("a = input(\"gray\", 8); b = mean(a, 3, 3); b")
            .unwrap();
        processor.evaluate(id, cross_image()).unwrap();
        let report = processor.timing_report();
        assert!(report.iter().any(|t| t.operation == "mean" && t.count == 1));
    }
}
