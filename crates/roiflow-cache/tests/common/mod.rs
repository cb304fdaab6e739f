#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ndarray::{ArrayD, IxDyn};

use roiflow_cache::OpBlockCache;
use roiflow_core::{
    Array, CoreError, CoreResult, DType, ExecuteContext, Graph, GraphConfig, LazyResult, Meta,
    OpContext, Operator, OperatorId, Roi, SlotId, SlotRef, SlotSpec, Value, ValueKind,
};

/// Array whose elements are their own row-major index.
pub fn ramp(shape: &[usize]) -> Array {
    let n: usize = shape.iter().product();
    ArrayD::from_shape_vec(IxDyn(shape), (0..n).map(|v| v as f32).collect())
        .unwrap()
        .into_shared()
}

/// A source producing [`ramp`] data, counting how often it computes.
pub struct OpCountingSource {
    shape: Vec<usize>,
    pub executions: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
    /// Panics on the next computation, then clears itself.
    pub panic_once: Arc<AtomicBool>,
    /// Returns a one-element array instead of the requested region.
    pub misshapen: Arc<AtomicBool>,
    delay: Duration,
}

impl OpCountingSource {
    pub fn new(shape: &[usize]) -> Self {
        OpCountingSource {
            shape: shape.to_vec(),
            executions: Arc::new(AtomicUsize::new(0)),
            fail: Arc::new(AtomicBool::new(false)),
            panic_once: Arc::new(AtomicBool::new(false)),
            misshapen: Arc::new(AtomicBool::new(false)),
            delay: Duration::ZERO,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

impl Operator for OpCountingSource {
    fn name(&self) -> &str {
        "OpCountingSource"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![SlotSpec::output("Output", ValueKind::Array)]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        let output = ctx.output("Output")?;
        ctx.set_meta(output, Meta::array(&self.shape, DType::F32))
    }

    fn execute(&self, _ctx: &ExecuteContext<'_>, _output: &SlotRef, roi: &Roi) -> CoreResult<LazyResult> {
        let roi = roi.clone();
        let shape = self.shape.clone();
        let executions = self.executions.clone();
        let fail = self.fail.clone();
        let panic_once = self.panic_once.clone();
        let misshapen = self.misshapen.clone();
        let delay = self.delay;
        Ok(LazyResult::deferred(move || {
            executions.fetch_add(1, Ordering::SeqCst);
            std::thread::sleep(delay);
            if fail.load(Ordering::SeqCst) {
                return Err(CoreError::compute("source failed"));
            }
            if panic_once.swap(false, Ordering::SeqCst) {
                panic!("source panicked");
            }
            if misshapen.load(Ordering::SeqCst) {
                return Ok(ramp(&[1]));
            }
            Ok(roi.slice(&ramp(&shape)))
        }))
    }
}

pub struct Pipeline {
    pub graph: Graph,
    pub source: OperatorId,
    pub cache: OperatorId,
    pub output: SlotId,
    pub executions: Arc<AtomicUsize>,
    pub fail: Arc<AtomicBool>,
}

impl Pipeline {
    pub fn recompute_count(&self) -> u64 {
        self.graph
            .with_operator::<OpBlockCache, _>(self.cache, |c| c.recompute_count())
            .unwrap()
    }

    pub fn read(&self, roi: &Roi) -> CoreResult<Array> {
        self.graph.get(self.output, roi)?.wait()
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

/// Source -> cache with the given block shape.
pub fn pipeline_with(source: OpCountingSource, cache: OpBlockCache, block: &[usize]) -> Pipeline {
    let graph = Graph::new(GraphConfig::named("cache-test").with_worker_threads(4)).unwrap();
    let executions = source.executions.clone();
    let fail = source.fail.clone();
    let source = graph.add_operator(source).unwrap();
    let cache = graph.add_operator(cache).unwrap();
    graph
        .set_value(graph.input(cache, "BlockShape").unwrap(), Value::Shape(block.to_vec()))
        .unwrap();
    graph
        .connect(
            graph.input(cache, "Input").unwrap(),
            graph.output(source, "Output").unwrap(),
        )
        .unwrap();
    let output = graph.output(cache, "Output").unwrap();
    Pipeline {
        graph,
        source,
        cache,
        output,
        executions,
        fail,
    }
}

pub fn pipeline(shape: &[usize], block: &[usize]) -> Pipeline {
    pipeline_with(OpCountingSource::new(shape), OpBlockCache::new(), block)
}
