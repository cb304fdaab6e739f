#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use ndarray::{ArrayD, IxDyn};

use roiflow_core::{Array, CoreResult, DType, Graph, GraphConfig, Operator};
use roiflow_ops::{DataReader, OpZeroSource, ReaderRegistry};

pub fn ramp(shape: &[usize]) -> Array {
    let n: usize = shape.iter().product();
    ArrayD::from_shape_vec(IxDyn(shape), (0..n).map(|v| v as f32).collect())
        .unwrap()
        .into_shared()
}

pub fn graph() -> Graph {
    Graph::new(GraphConfig::named("ops-test").with_worker_threads(2)).unwrap()
}

/// Serves zero volumes of a fixed shape and remembers what was opened.
pub struct RecordingReader {
    shape: Vec<usize>,
    axes: String,
    pub opened: Arc<Mutex<Vec<String>>>,
}

impl RecordingReader {
    pub fn new(shape: &[usize], axes: &str) -> Arc<Self> {
        Arc::new(RecordingReader {
            shape: shape.to_vec(),
            axes: axes.to_string(),
            opened: Arc::new(Mutex::new(Vec::new())),
        })
    }

    pub fn last_opened(&self) -> Option<String> {
        self.opened.lock().unwrap().last().cloned()
    }
}

impl DataReader for RecordingReader {
    fn format(&self) -> &str {
        "recording"
    }

    fn open(&self, location: &str) -> CoreResult<Box<dyn Operator>> {
        self.opened.lock().unwrap().push(location.to_string());
        Ok(Box::new(OpZeroSource::new(&self.shape, DType::U16).with_axes(&self.axes)))
    }
}

/// A registry reading `.vol` files, `mem://` URLs and project data through
/// `reader`.
pub fn registry(reader: &Arc<RecordingReader>) -> Arc<ReaderRegistry> {
    Arc::new(
        ReaderRegistry::new()
            .with_extension("vol", reader.clone())
            .with_scheme("mem", reader.clone())
            .with_project(reader.clone()),
    )
}
