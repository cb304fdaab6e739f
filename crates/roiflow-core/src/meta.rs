//! Slot metadata: shape, element type, axis order, display hints and
//! free-form extensions.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::roi::Roi;
use crate::value::Value;

/// Logical element type of an array slot.
///
/// Array data always travels as `f32`; the tag records what the producer
/// declared so display ranges and persistence can honor it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DType {
    Bool,
    U8,
    U16,
    U32,
    I32,
    I64,
    F32,
    F64,
}

impl DType {
    /// Parses the lowercase numpy-style name (`"uint8"`, `"float32"`, ...).
    pub fn from_name(name: &str) -> Option<DType> {
        Some(match name {
            "bool" => DType::Bool,
            "uint8" | "u8" => DType::U8,
            "uint16" | "u16" => DType::U16,
            "uint32" | "u32" => DType::U32,
            "int32" | "i32" => DType::I32,
            "int64" | "i64" => DType::I64,
            "float32" | "f32" => DType::F32,
            "float64" | "f64" => DType::F64,
            _ => return None,
        })
    }

    pub fn name(self) -> &'static str {
        match self {
            DType::Bool => "bool",
            DType::U8 => "uint8",
            DType::U16 => "uint16",
            DType::U32 => "uint32",
            DType::I32 => "int32",
            DType::I64 => "int64",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }

    /// Natural display range for integer types; `None` for floats.
    pub fn default_drange(self) -> Option<(f64, f64)> {
        match self {
            DType::Bool => Some((0.0, 1.0)),
            DType::U8 => Some((0.0, 255.0)),
            DType::U16 => Some((0.0, 65535.0)),
            _ => None,
        }
    }
}

/// The metadata bag attached to a slot.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Meta {
    pub shape: Option<Vec<usize>>,
    pub dtype: Option<DType>,
    /// One character per axis, e.g. `"tzyxc"`.
    pub axes: Option<String>,
    pub drange: Option<(f64, f64)>,
    pub display_mode: Option<String>,
    #[serde(default)]
    pub extras: IndexMap<String, serde_json::Value>,
}

impl Meta {
    /// Metadata for an array of the given shape and element type.
    pub fn array(shape: &[usize], dtype: DType) -> Self {
        Meta {
            shape: Some(shape.to_vec()),
            dtype: Some(dtype),
            ..Meta::default()
        }
    }

    /// Metadata describing a directly-held value.
    pub fn for_value(value: &Value) -> Self {
        match value {
            Value::Array(a) => Meta::array(a.shape(), DType::F32),
            _ => Meta::default(),
        }
    }

    pub fn with_axes(mut self, axes: &str) -> Self {
        self.axes = Some(axes.to_string());
        self
    }

    pub fn with_drange(mut self, lo: f64, hi: f64) -> Self {
        self.drange = Some((lo, hi));
        self
    }

    /// Position of an axis label in `axes`.
    pub fn axis_index(&self, axis: char) -> Option<usize> {
        self.axes.as_ref()?.chars().position(|c| c == axis)
    }

    /// Extent of a labelled axis, if both axes and shape are known.
    pub fn axis_len(&self, axis: char) -> Option<usize> {
        let i = self.axis_index(axis)?;
        self.shape.as_ref()?.get(i).copied()
    }

    /// The ROI covering the whole shape, or a scalar ROI if none is declared.
    pub fn full_roi(&self) -> Roi {
        match &self.shape {
            Some(shape) => Roi::full(shape),
            None => Roi::scalar(),
        }
    }

    /// Returns a copy where every field set in `overrides` replaces ours.
    pub fn merged(&self, overrides: &Meta) -> Meta {
        let mut out = self.clone();
        if overrides.shape.is_some() {
            out.shape.clone_from(&overrides.shape);
        }
        if overrides.dtype.is_some() {
            out.dtype = overrides.dtype;
        }
        if overrides.axes.is_some() {
            out.axes.clone_from(&overrides.axes);
        }
        if overrides.drange.is_some() {
            out.drange = overrides.drange;
        }
        if overrides.display_mode.is_some() {
            out.display_mode.clone_from(&overrides.display_mode);
        }
        for (k, v) in &overrides.extras {
            out.extras.insert(k.clone(), v.clone());
        }
        out
    }
}
