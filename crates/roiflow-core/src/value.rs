//! Values carried by slots.
//!
//! Array payloads are `ndarray` shared arrays so one computed block can be
//! handed to many readers without copying. Everything else a slot can hold
//! (flags, names, shapes, configuration JSON, opaque collaborator objects)
//! is a variant of [`Value`].

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use ndarray::{ArcArray, IxDyn};
use serde::{Deserialize, Serialize};

/// The array type flowing through `get(roi)` requests.
pub type Array = ArcArray<f32, IxDyn>;

/// Type tag declared by a slot, checked on `set_value` and `connect`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    /// Accepts any value; connects to any kind.
    Any,
    Array,
    Bool,
    Int,
    Float,
    Str,
    StrList,
    Shape,
    Json,
    Object,
}

impl ValueKind {
    /// True if a slot of kind `self` can be driven by a slot of kind `other`.
    pub fn compatible(self, other: ValueKind) -> bool {
        self == ValueKind::Any || other == ValueKind::Any || self == other
    }

    /// True if `value` may be stored in a slot of this kind.
    pub fn accepts(self, value: &Value) -> bool {
        self.compatible(value.kind())
    }
}

/// A value held by a slot.
#[derive(Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    StrList(Vec<String>),
    Shape(Vec<usize>),
    Json(serde_json::Value),
    Array(Array),
    /// An opaque collaborator object, compared by identity.
    Object(Arc<dyn Any + Send + Sync>),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::StrList(_) => ValueKind::StrList,
            Value::Shape(_) => ValueKind::Shape,
            Value::Json(_) => ValueKind::Json,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
        }
    }

    /// Wraps a collaborator object.
    pub fn object<T: Any + Send + Sync>(value: T) -> Self {
        Value::Object(Arc::new(value))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_str_list(&self) -> Option<&[String]> {
        match self {
            Value::StrList(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_shape(&self) -> Option<&[usize]> {
        match self {
            Value::Shape(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Array> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Downcasts an [`Value::Object`] payload.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        match self {
            Value::Object(obj) => obj.downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::StrList(a), Value::StrList(b)) => a == b,
            (Value::Shape(a), Value::Shape(b)) => a == b,
            (Value::Json(a), Value::Json(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(v) => write!(f, "Bool({v})"),
            Value::Int(v) => write!(f, "Int({v})"),
            Value::Float(v) => write!(f, "Float({v})"),
            Value::Str(v) => write!(f, "Str({v:?})"),
            Value::StrList(v) => write!(f, "StrList({v:?})"),
            Value::Shape(v) => write!(f, "Shape({v:?})"),
            Value::Json(v) => write!(f, "Json({v})"),
            Value::Array(a) => write!(f, "Array(shape={:?})", a.shape()),
            Value::Object(_) => write!(f, "Object(..)"),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Str(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Str(v)
    }
}

impl From<Array> for Value {
    fn from(v: Array) -> Self {
        Value::Array(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::ArrayD;

    #[test]
    fn any_kind_is_compatible_with_everything() {
        assert!(ValueKind::Any.compatible(ValueKind::Array));
        assert!(ValueKind::Str.compatible(ValueKind::Any));
        assert!(!ValueKind::Str.compatible(ValueKind::Int));
    }

    #[test]
    fn arrays_compare_by_content() {
        let a: Array = ArrayD::zeros(IxDyn(&[2, 2])).into_shared();
        let b: Array = ArrayD::zeros(IxDyn(&[2, 2])).into_shared();
        assert_eq!(Value::Array(a), Value::Array(b));
    }

    #[test]
    fn objects_compare_by_identity() {
        let a = Value::object(5u32);
        let b = Value::object(5u32);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.downcast_ref::<u32>(), Some(&5));
    }
}
