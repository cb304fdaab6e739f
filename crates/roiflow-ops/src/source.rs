//! Data sources and the per-dataset description a user configures.
//!
//! A [`DatasetInfo`] pairs a [`DataSource`] (where the pixels come from)
//! with the presentation fields shared by every kind of source. Building a
//! provider instantiates the source's operator as a child of the calling
//! operator and wraps it in an [`OpMetadataInjector`] carrying the info's
//! axis labels, display hints and caller overrides.
//!
//! Only sources that can be found again after a restart have a persisted
//! form: in-memory arrays and zero placeholders do not. An in-memory array
//! can be imported into the project first, which turns it into a
//! project-internal source.

use std::path::Path;

use tracing::debug;

use roiflow_core::{
    Array, CoreError, CoreResult, DType, Meta, OpContext, Roi, SlotId, Value,
};
use roiflow_storage::{encode_array, Attr, Group, PayloadStore, StorageError};

use crate::metadata::OpMetadataInjector;
use crate::payload::LOCAL_DATA;
use crate::piper::OpArrayPiper;
use crate::reader::ReaderRegistry;
use crate::reorder::default_axes;
use crate::zero::OpZeroSource;

/// Where a dataset's data comes from.
#[derive(Debug, Clone)]
pub enum DataSource {
    /// An array already in memory.
    Preloaded { data: Array },
    /// A zero-filled stand-in for data that could not be found.
    Missing,
    /// Data stored inside the project, addressed by its internal path.
    ProjectInternal { inner_path: String },
    /// A file read through the reader registry. Relative paths resolve
    /// against the working directory.
    Filesystem { path: String, relative: bool },
    /// Remote data read through the reader registered for the URL scheme.
    Url { url: String },
}

#[derive(Debug, Clone)]
pub struct DatasetInfo {
    pub source: DataSource,
    pub nickname: String,
    pub axes: Option<String>,
    pub shape: Option<Vec<usize>>,
    pub dtype: Option<DType>,
    pub drange: Option<(f64, f64)>,
    pub display_mode: String,
    pub allow_labels: bool,
    pub normalize_display: Option<bool>,
    pub subvolume_roi: Option<Roi>,
}

impl DatasetInfo {
    fn with_source(source: DataSource, nickname: String) -> Self {
        DatasetInfo {
            source,
            nickname,
            axes: None,
            shape: None,
            dtype: None,
            drange: None,
            display_mode: "default".to_string(),
            allow_labels: true,
            normalize_display: None,
            subvolume_roi: None,
        }
    }

    pub fn preloaded(data: Array, dtype: DType) -> Self {
        let shape = data.shape().to_vec();
        let mut info = Self::with_source(
            DataSource::Preloaded { data },
            format!("preloaded-{}-array", dtype.name()),
        );
        info.shape = Some(shape);
        info.dtype = Some(dtype);
        info
    }

    pub fn missing(shape: &[usize], dtype: DType) -> Self {
        let mut info = Self::with_source(DataSource::Missing, "missing-data".to_string());
        info.shape = Some(shape.to_vec());
        info.dtype = Some(dtype);
        info
    }

    pub fn project_internal(inner_path: &str) -> Self {
        let nickname = inner_path.rsplit('/').next().unwrap_or(inner_path).to_string();
        Self::with_source(
            DataSource::ProjectInternal {
                inner_path: inner_path.to_string(),
            },
            nickname,
        )
    }

    pub fn filesystem(path: &str) -> Self {
        let relative = Path::new(path).is_relative();
        let nickname = Path::new(path)
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or(path)
            .to_string();
        Self::with_source(
            DataSource::Filesystem {
                path: path.to_string(),
                relative,
            },
            nickname,
        )
    }

    pub fn url(url: &str) -> Self {
        let nickname = url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or(url)
            .to_string();
        Self::with_source(DataSource::Url { url: url.to_string() }, nickname)
    }

    pub fn with_nickname(mut self, nickname: &str) -> Self {
        self.nickname = nickname.to_string();
        self
    }

    /// Sets the axis labels. Must match the shape's length when both are
    /// known.
    pub fn with_axes(mut self, axes: &str) -> CoreResult<Self> {
        if let Some(shape) = &self.shape {
            check_axes(axes, shape)?;
        }
        self.axes = Some(axes.to_string());
        Ok(self)
    }

    pub fn with_drange(mut self, lo: f64, hi: f64) -> Self {
        self.drange = Some((lo, hi));
        self
    }

    pub fn with_display_mode(mut self, mode: &str) -> Self {
        self.display_mode = mode.to_string();
        self
    }

    pub fn with_allow_labels(mut self, allow: bool) -> Self {
        self.allow_labels = allow;
        self
    }

    pub fn with_normalize_display(mut self, normalize: bool) -> Self {
        self.normalize_display = Some(normalize);
        self
    }

    pub fn with_subvolume(mut self, roi: Roi) -> Self {
        self.subvolume_roi = Some(roi);
        self
    }

    /// Whether display should be normalized; defaults to having a range.
    pub fn normalize_display(&self) -> bool {
        self.normalize_display.unwrap_or(self.drange.is_some())
    }

    pub fn display_string(&self) -> String {
        match &self.source {
            DataSource::Preloaded { .. } => "Preloaded Array".to_string(),
            DataSource::Missing => "Dummy Zero Array".to_string(),
            DataSource::ProjectInternal { inner_path } => format!("Project Internal: {inner_path}"),
            DataSource::Filesystem { path, relative: false } => format!("Absolute Link: {path}"),
            DataSource::Filesystem { path, relative: true } => format!("Relative Link: {path}"),
            DataSource::Url { url } => format!("Remote: {url}"),
        }
    }

    // -----------------------------------------------------------------------
    // Providers
    // -----------------------------------------------------------------------

    /// Builds the operator chain serving this dataset as children of the
    /// operator behind `ctx`, returning the output slot to read from.
    pub fn get_provider(
        &self,
        ctx: &mut OpContext<'_>,
        meta_overrides: &Meta,
        readers: &ReaderRegistry,
        working_dir: &str,
    ) -> CoreResult<SlotId> {
        let raw = match &self.source {
            DataSource::Preloaded { data } => {
                let piper = ctx.add_child(OpArrayPiper::new())?;
                let input = ctx.child_input(piper, "Input")?;
                ctx.set_value(input, Value::Array(data.clone()))?;
                ctx.child_output(piper, "Output")?
            }
            DataSource::Missing => {
                let shape = self.shape.as_ref().ok_or_else(|| {
                    CoreError::constraint("DataSelection", "missing data needs a known shape")
                })?;
                let zeros = ctx.add_child(OpZeroSource::new(shape, self.dtype.unwrap_or(DType::F32)))?;
                ctx.child_output(zeros, "Output")?
            }
            DataSource::ProjectInternal { inner_path } => {
                let op = readers.for_project()?.open(inner_path)?;
                let child = ctx.add_child_boxed(op)?;
                ctx.child_output(child, "Output")?
            }
            DataSource::Filesystem { path, relative } => {
                let location = if *relative {
                    Path::new(working_dir).join(path).to_string_lossy().into_owned()
                } else {
                    path.clone()
                };
                let op = readers.for_path(&location)?.open(&location)?;
                let child = ctx.add_child_boxed(op)?;
                ctx.child_output(child, "Output")?
            }
            DataSource::Url { url } => {
                let op = readers.for_url(url)?.open(url)?;
                let child = ctx.add_child_boxed(op)?;
                ctx.child_output(child, "Output")?
            }
        };

        let provided = ctx.meta(raw)?;
        let overrides = self.provider_meta(&provided)?.merged(meta_overrides);
        let injector = ctx.add_child(OpMetadataInjector::new())?;
        let input = ctx.child_input(injector, "Input")?;
        ctx.connect(input, raw)?;
        let metadata = ctx.child_input(injector, "Metadata")?;
        ctx.set_value(metadata, OpMetadataInjector::overrides_value(&overrides)?)?;
        ctx.child_output(injector, "Output")
    }

    /// The metadata this info imposes on whatever its source provides.
    fn provider_meta(&self, provided: &Meta) -> CoreResult<Meta> {
        let shape = provided
            .shape
            .as_ref()
            .ok_or_else(|| CoreError::constraint("DataSelection", "data source declares no shape"))?;
        let axes = match (&self.axes, &provided.axes) {
            (Some(axes), _) | (None, Some(axes)) => axes.clone(),
            (None, None) => default_axes(shape.len())?.to_string(),
        };
        check_axes(&axes, shape)?;

        let dtype = self.dtype.or(provided.dtype);
        let drange = self
            .drange
            .or(provided.drange)
            .or_else(|| (dtype == Some(DType::U8)).then_some((0.0, 255.0)));

        let mut meta = Meta {
            axes: Some(axes),
            dtype,
            drange,
            display_mode: Some(self.display_mode.clone()),
            ..Meta::default()
        };
        meta.extras
            .insert("nickname".into(), serde_json::json!(self.nickname));
        meta.extras.insert(
            "normalize_display".into(),
            serde_json::json!(self.normalize_display.unwrap_or(drange.is_some())),
        );
        if let Some(roi) = &self.subvolume_roi {
            meta.extras.insert(
                "subvolume_roi".into(),
                serde_json::json!([roi.start(), roi.stop()]),
            );
        }
        Ok(meta)
    }

    // -----------------------------------------------------------------------
    // Persisted form
    // -----------------------------------------------------------------------

    /// Copies an in-memory array into `store` and returns an info reading
    /// it back as project data. Infos already inside the project come back
    /// unchanged.
    pub fn import_as_local(&self, store: &dyn PayloadStore) -> Result<DatasetInfo, StorageError> {
        let data = match &self.source {
            DataSource::Preloaded { data } => data,
            DataSource::ProjectInternal { .. } => return Ok(self.clone()),
            _ => {
                return Err(StorageError::Unsupported {
                    reason: format!("{} cannot be imported into the project", self.display_string()),
                })
            }
        };
        let key = store.put_payload(&encode_array(data)?)?;
        debug!(dataset = %self.nickname, key = key.as_str(), "dataset imported into the project");
        Ok(DatasetInfo {
            source: DataSource::ProjectInternal {
                inner_path: format!("{LOCAL_DATA}/{}", key.as_str()),
            },
            ..self.clone()
        })
    }

    pub fn to_persisted_form(&self) -> Result<Group, StorageError> {
        let mut group = Group::new();
        match &self.source {
            DataSource::Preloaded { .. } | DataSource::Missing => {
                return Err(StorageError::Unsupported {
                    reason: format!("{} cannot be stored", self.display_string()),
                })
            }
            DataSource::ProjectInternal { inner_path } => {
                group.set_attr("source", Attr::Str("project_internal".into()));
                group.set_attr("inner_path", Attr::Str(inner_path.clone()));
            }
            DataSource::Filesystem { path, relative } => {
                let kind = if *relative { "relative_filesystem" } else { "filesystem" };
                group.set_attr("source", Attr::Str(kind.into()));
                group.set_attr("path", Attr::Str(path.clone()));
            }
            DataSource::Url { url } => {
                group.set_attr("source", Attr::Str("url".into()));
                group.set_attr("url", Attr::Str(url.clone()));
            }
        }
        group.set_attr("nickname", Attr::Str(self.nickname.clone()));
        group.set_attr("display_mode", Attr::Str(self.display_mode.clone()));
        group.set_attr("allow_labels", Attr::Bool(self.allow_labels));
        if let Some(axes) = &self.axes {
            group.set_attr("axistags", Attr::Str(axes.clone()));
        }
        if let Some(shape) = &self.shape {
            group.set_attr("shape", Attr::IntArray(shape.iter().map(|&n| n as i64).collect()));
        }
        if let Some(dtype) = self.dtype {
            group.set_attr("dtype", Attr::Str(dtype.name().into()));
        }
        if let Some((lo, hi)) = self.drange {
            group.set_attr("drange", Attr::FloatArray(vec![lo, hi]));
        }
        if let Some(normalize) = self.normalize_display {
            group.set_attr("normalize_display", Attr::Bool(normalize));
        }
        if let Some(roi) = &self.subvolume_roi {
            let bounds = roi.start().iter().chain(roi.stop()).map(|&n| n as i64).collect();
            group.set_attr("subvolume_roi", Attr::IntArray(bounds));
        }
        Ok(group)
    }

    /// Reads a persisted info, including forms written before the `source`
    /// attribute existed (`location` + `filePath` / `datasetId`).
    pub fn from_persisted_form(group: &Group) -> Result<Self, StorageError> {
        let text = |key: &str| group.attr(key).and_then(Attr::as_str);
        let corrupt = |reason: String| StorageError::Corrupt { reason };

        let mut info = match (text("source"), text("location")) {
            (Some("project_internal"), _) => Self::project_internal(
                text("inner_path").ok_or_else(|| corrupt("project dataset without inner_path".into()))?,
            ),
            (Some("filesystem" | "relative_filesystem"), _) => Self::filesystem(
                text("path")
                    .or(text("filePath"))
                    .ok_or_else(|| corrupt("file dataset without path".into()))?,
            ),
            (Some("url"), _) => Self::url(
                text("url")
                    .or(text("filePath"))
                    .ok_or_else(|| corrupt("remote dataset without url".into()))?,
            ),
            (Some(other), _) => return Err(corrupt(format!("unknown data source '{other}'"))),
            (None, Some("ProjectInternal")) => {
                let inner_path = match (text("inner_path"), text("datasetId")) {
                    (Some(path), _) => path.to_string(),
                    (None, Some(id)) => format!("local_data/{id}"),
                    (None, None) => {
                        return Err(corrupt("project dataset without inner_path or datasetId".into()))
                    }
                };
                Self::project_internal(&inner_path)
            }
            (None, Some("FileSystem")) => {
                let path = text("filePath").ok_or_else(|| corrupt("file dataset without filePath".into()))?;
                if path.contains("://") {
                    Self::url(path)
                } else {
                    Self::filesystem(path)
                }
            }
            (None, location) => {
                return Err(corrupt(format!("unknown dataset location {location:?}")))
            }
        };

        if let Some(nickname) = text("nickname") {
            info.nickname = nickname.to_string();
        }
        if let Some(mode) = text("display_mode") {
            info.display_mode = mode.to_string();
        }
        if let Some(allow) = group
            .attr("allow_labels")
            .or(group.attr("allowLabels"))
            .and_then(Attr::as_bool)
        {
            info.allow_labels = allow;
        }
        info.axes = text("axistags").or(text("axisorder")).map(str::to_string);
        if let Some(dims) = group.attr("shape").and_then(Attr::as_int_array) {
            info.shape = Some(to_usizes(dims).ok_or_else(|| corrupt(format!("bad shape {dims:?}")))?);
        }
        if let Some(name) = text("dtype") {
            info.dtype = Some(DType::from_name(name).ok_or_else(|| corrupt(format!("unknown dtype '{name}'")))?);
        }
        if let Some(Attr::FloatArray(range)) = group.attr("drange") {
            match range.as_slice() {
                [lo, hi] => info.drange = Some((*lo, *hi)),
                _ => return Err(corrupt(format!("bad drange {range:?}"))),
            }
        }
        info.normalize_display = group
            .attr("normalize_display")
            .or(group.attr("normalizeDisplay"))
            .and_then(Attr::as_bool);
        if let Some(bounds) = group.attr("subvolume_roi").and_then(Attr::as_int_array) {
            let bounds = to_usizes(bounds).filter(|b| b.len() % 2 == 0).ok_or_else(|| {
                corrupt(format!("bad subvolume_roi {bounds:?}"))
            })?;
            let (start, stop) = bounds.split_at(bounds.len() / 2);
            info.subvolume_roi = Some(Roi::new(start, stop)?);
        }
        if let (Some(axes), Some(shape)) = (&info.axes, &info.shape) {
            check_axes(axes, shape)?;
        }
        Ok(info)
    }
}

fn to_usizes(values: &[i64]) -> Option<Vec<usize>> {
    values.iter().map(|&v| usize::try_from(v).ok()).collect()
}

pub(crate) fn check_axes(axes: &str, shape: &[usize]) -> CoreResult<()> {
    if axes.chars().count() != shape.len() {
        return Err(CoreError::constraint(
            "DataSelection",
            format!("axes '{axes}' do not fit data of shape {shape:?}"),
        ));
    }
    Ok(())
}
