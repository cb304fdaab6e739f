//! Operators for getting data into a roiflow graph.
//!
//! General building blocks (a pass-through, a zero source, metadata
//! overrides, axis reordering) plus the data-selection stack: a dataset
//! description with pluggable sources, a per-dataset selection operator, a
//! per-role group of selections and a lane group of role groups.
//!
//! # Modules
//!
//! - [`piper`]: OpArrayPiper
//! - [`zero`]: OpZeroSource
//! - [`metadata`]: OpMetadataInjector
//! - [`reorder`]: OpReorderAxes and the axis plan behind it
//! - [`reader`]: DataReader and ReaderRegistry
//! - [`payload`]: datasets imported into the project, and their reader
//! - [`source`]: DataSource and DatasetInfo
//! - [`selection`]: OpDataSelection
//! - [`roles`]: OpDataSelectionGroup
//! - [`multilane`]: MultiLaneDataSelection
//! - [`serial`]: SerialDataset

pub mod metadata;
pub mod multilane;
pub mod payload;
pub mod piper;
pub mod reader;
pub mod reorder;
pub mod roles;
pub mod selection;
pub mod serial;
pub mod source;
pub mod zero;

// Re-export key types for ergonomic use.
pub use metadata::OpMetadataInjector;
pub use multilane::MultiLaneDataSelection;
pub use payload::{OpArraySource, PayloadReader, LOCAL_DATA};
pub use piper::OpArrayPiper;
pub use reader::{DataReader, ReaderRegistry};
pub use reorder::{default_axes, AxisPlan, OpReorderAxes};
pub use roles::OpDataSelectionGroup;
pub use selection::{output_axis_order, OpDataSelection};
pub use serial::SerialDataset;
pub use source::{DataSource, DatasetInfo};
pub use zero::OpZeroSource;
