//! Datasets copied into the project.
//!
//! [`DatasetInfo::import_as_local`](crate::source::DatasetInfo::import_as_local)
//! writes an in-memory array to the project's payload store under
//! `local_data/{key}`. [`PayloadReader`] is the project reader that serves
//! those paths again through an [`OpArraySource`].

use std::sync::Arc;

use roiflow_core::{
    Array, CoreError, CoreResult, DType, ExecuteContext, LazyResult, Meta, OpContext, Operator,
    Roi, SlotRef, SlotSpec, ValueKind,
};
use roiflow_storage::{decode_array, PayloadKey, PayloadStore};

use crate::reader::DataReader;

/// Group of the project that imported datasets live under.
pub const LOCAL_DATA: &str = "local_data";

/// Serves a fixed array on `Output`.
pub struct OpArraySource {
    data: Array,
}

impl OpArraySource {
    pub fn new(data: Array) -> Self {
        OpArraySource { data }
    }
}

impl Operator for OpArraySource {
    fn name(&self) -> &str {
        "OpArraySource"
    }

    fn category(&self) -> &str {
        "source"
    }

    fn slots(&self) -> Vec<SlotSpec> {
        vec![SlotSpec::output("Output", ValueKind::Array)]
    }

    fn configure(&mut self, ctx: &mut OpContext<'_>) -> CoreResult<()> {
        let output = ctx.output("Output")?;
        ctx.set_meta(output, Meta::array(self.data.shape(), DType::F32))
    }

    fn execute(&self, _ctx: &ExecuteContext<'_>, _output: &SlotRef, roi: &Roi) -> CoreResult<LazyResult> {
        Ok(LazyResult::ready(roi.slice(&self.data)))
    }
}

/// Reads `local_data/{key}` paths from a payload store.
pub struct PayloadReader {
    store: Arc<dyn PayloadStore>,
}

impl PayloadReader {
    pub fn new(store: Arc<dyn PayloadStore>) -> Self {
        PayloadReader { store }
    }
}

impl DataReader for PayloadReader {
    fn format(&self) -> &str {
        "project payload"
    }

    fn open(&self, location: &str) -> CoreResult<Box<dyn Operator>> {
        let key = location
            .strip_prefix(LOCAL_DATA)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| {
                CoreError::constraint("DataSelection", format!("'{location}' is not imported project data"))
            })?;
        let data = self
            .store
            .get_payload(&PayloadKey(key.to_string()))
            .and_then(|bytes| decode_array(&bytes))
            .map_err(|e| CoreError::constraint("DataSelection", format!("reading '{location}': {e}")))?;
        Ok(Box::new(OpArraySource::new(data)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};
    use roiflow_storage::{encode_array, InMemoryStore};

    #[test]
    fn opens_stored_arrays_and_rejects_foreign_paths() {
        let store = InMemoryStore::new();
        let data: Array = ArrayD::from_elem(IxDyn(&[2, 3]), 7.0).into_shared();
        let key = store.put_payload(&encode_array(&data).unwrap()).unwrap();
        let reader = PayloadReader::new(Arc::new(store));

        assert!(reader.open(&format!("{LOCAL_DATA}/{}", key.as_str())).is_ok());
        assert!(reader.open("local_data/0000").is_err());
        let err = reader.open("elsewhere/raw").err().unwrap();
        assert!(matches!(err, CoreError::ConstraintViolation { .. }));
    }
}
