//! Pluggable readers for external data.
//!
//! A [`DataReader`] turns a location into an operator whose `Output` slot
//! serves the data. The [`ReaderRegistry`] picks a reader by file
//! extension, by URL scheme, or (for data stored inside the project) the
//! single project reader. Asking for a format nobody registered is a
//! constraint violation raised while configuring.

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;

use roiflow_core::{CoreError, CoreResult, Operator};

/// Opens one kind of external dataset.
pub trait DataReader: Send + Sync {
    /// Short format name used in log and error messages.
    fn format(&self) -> &str;

    /// Builds an operator serving the dataset at `location` on its
    /// `Output` slot.
    fn open(&self, location: &str) -> CoreResult<Box<dyn Operator>>;
}

#[derive(Clone, Default)]
pub struct ReaderRegistry {
    by_extension: IndexMap<String, Arc<dyn DataReader>>,
    by_scheme: IndexMap<String, Arc<dyn DataReader>>,
    project: Option<Arc<dyn DataReader>>,
}

impl ReaderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `reader` for files ending in `.{extension}` (case-insensitive).
    pub fn with_extension(mut self, extension: &str, reader: Arc<dyn DataReader>) -> Self {
        self.by_extension.insert(extension.to_ascii_lowercase(), reader);
        self
    }

    /// Registers `reader` for URLs of the form `{scheme}://...`.
    pub fn with_scheme(mut self, scheme: &str, reader: Arc<dyn DataReader>) -> Self {
        self.by_scheme.insert(scheme.to_ascii_lowercase(), reader);
        self
    }

    /// Sets the reader for datasets stored inside the project.
    pub fn with_project(mut self, reader: Arc<dyn DataReader>) -> Self {
        self.project = Some(reader);
        self
    }

    pub fn extensions(&self) -> impl Iterator<Item = &str> {
        self.by_extension.keys().map(String::as_str)
    }

    pub fn for_path(&self, path: &str) -> CoreResult<&Arc<dyn DataReader>> {
        let extension = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        self.by_extension.get(&extension).ok_or_else(|| {
            CoreError::constraint(
                "DataSelection",
                format!("no reader registered for '{path}' (extension '{extension}')"),
            )
        })
    }

    pub fn for_url(&self, url: &str) -> CoreResult<&Arc<dyn DataReader>> {
        let scheme = url
            .split_once("://")
            .map(|(scheme, _)| scheme.to_ascii_lowercase())
            .ok_or_else(|| CoreError::constraint("DataSelection", format!("'{url}' is not a URL")))?;
        self.by_scheme.get(&scheme).ok_or_else(|| {
            CoreError::constraint(
                "DataSelection",
                format!("no reader registered for '{scheme}' URLs"),
            )
        })
    }

    pub fn for_project(&self) -> CoreResult<&Arc<dyn DataReader>> {
        self.project.as_ref().ok_or_else(|| {
            CoreError::constraint("DataSelection", "no reader registered for project-internal data")
        })
    }
}
