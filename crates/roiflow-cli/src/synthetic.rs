//! A reader producing deterministic test volumes for the demo.
//!
//! Locations look like `mem://demo/lane-3`; the trailing number seeds the
//! pattern so every lane shows different data.

use ndarray::{ArrayD, IxDyn};

use roiflow_core::{
    CoreResult, DType, ExecuteContext, LazyResult, Meta, OpContext, Operator, Roi, SlotRef,
    SlotSpec, ValueKind,
};
use roiflow_ops::DataReader;

/// Shape of every synthetic volume, labelled `tyx`.
pub const VOLUME_SHAPE: [usize; 3] = [6, 64, 64];

pub struct SyntheticReader;

impl DataReader for SyntheticReader {
    fn format(&self) -> &str {
        "synthetic"
    }

    fn open(&self, location: &str) -> CoreResult<Box<dyn Operator>> {
        let seed = location
            .rsplit('-')
            .next()
            .and_then(|n| n.parse().ok())
            .unwrap_or(0);
        Ok(Box::new(OpSynthetic { seed }))
    }
}

struct OpSynthetic {
    seed: usize,
}

impl Operator for OpSynthetic {
    fn name(&self) -> &str {
        "OpSynthetic"
    }

    fn category(&self) -> &str {
        "source"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![SlotSpec::output("Output", ValueKind::Array)]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        let output = ctx.output("Output")?;
        ctx.set_meta(output, Meta::array(&VOLUME_SHAPE, DType::U8).with_axes("tyx"))
    }

    fn execute(&self, _ctx: &ExecuteContext<'_>, _output: &SlotRef, roi: &Roi) -> CoreResult<LazyResult> {
        let start = roi.start().to_vec();
        let shape = roi.shape();
        let seed = self.seed;
        Ok(LazyResult::deferred(move || {
            let data = ArrayD::from_shape_fn(IxDyn(&shape), |idx| {
                let (t, y, x) = (idx[0] + start[0], idx[1] + start[1], idx[2] + start[2]);
                ((t * 7 + y * 3 + x + seed * 13) % 256) as f32
            });
            Ok(data.into_shared())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roiflow_core::{Graph, GraphConfig};

    #[test]
    fn lanes_are_seeded_by_their_trailing_number() {
        let graph = Graph::new(GraphConfig::named("synthetic").with_worker_threads(1)).unwrap();
        let a = graph.add_operator_boxed(SyntheticReader.open("mem://demo/lane-0").unwrap()).unwrap();
        let b = graph.add_operator_boxed(SyntheticReader.open("mem://demo/lane-2").unwrap()).unwrap();
        let roi = Roi::new(&[1, 0, 0], &[2, 1, 2]).unwrap();
        let first = graph.get(graph.output(a, "Output").unwrap(), &roi).unwrap().wait().unwrap();
        let second = graph.get(graph.output(b, "Output").unwrap(), &roi).unwrap().wait().unwrap();
        assert_eq!(first.iter().copied().collect::<Vec<_>>(), vec![7.0, 8.0]);
        assert_eq!(second.iter().copied().collect::<Vec<_>>(), vec![33.0, 34.0]);
    }
}
