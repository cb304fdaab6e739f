//! Conversion between slot [`Value`]s and stored [`Attr`]s.
//!
//! Arrays are stored through ndarray's serde form inside an [`Attr::Json`]
//! (`{"v": 1, "dim": [...], "data": [...]}`), shapes as integer arrays.
//! Decoding is guided by the slot's declared [`ValueKind`] so a shape and an
//! integer array, or an array and a JSON document, come back as what the
//! slot expects. Opaque objects have no stored form.

use roiflow_core::{Array, Value, ValueKind};

use crate::error::StorageError;
use crate::group::Attr;

pub fn value_to_attr(value: &Value) -> Result<Attr, StorageError> {
    Ok(match value {
        Value::Bool(b) => Attr::Bool(*b),
        Value::Int(v) => Attr::Int(*v),
        Value::Float(v) => Attr::Float(*v),
        Value::Str(s) => Attr::Str(s.clone()),
        Value::StrList(items) => Attr::StrArray(items.clone()),
        Value::Shape(shape) => Attr::IntArray(shape.iter().map(|&n| n as i64).collect()),
        Value::Json(json) => Attr::Json(json.clone()),
        Value::Array(array) => Attr::Json(serde_json::to_value(array)?),
        Value::Object(_) => {
            return Err(StorageError::Unsupported {
                reason: "opaque objects cannot be stored".to_string(),
            })
        }
    })
}

pub fn attr_to_value(attr: &Attr, kind: ValueKind) -> Result<Value, StorageError> {
    let mismatch = || StorageError::Corrupt {
        reason: format!("cannot read {attr:?} into a {kind:?} slot"),
    };
    let value = match (kind, attr) {
        (ValueKind::Array | ValueKind::Any, Attr::Json(json)) if is_array_form(json) => {
            let array: Array = serde_json::from_value(json.clone())?;
            Value::Array(array)
        }
        (ValueKind::Shape | ValueKind::Any, Attr::IntArray(dims)) => {
            let shape = dims
                .iter()
                .map(|&d| usize::try_from(d).map_err(|_| mismatch()))
                .collect::<Result<Vec<_>, _>>()?;
            Value::Shape(shape)
        }
        (ValueKind::Bool | ValueKind::Any, Attr::Bool(b)) => Value::Bool(*b),
        (ValueKind::Int | ValueKind::Any, Attr::Int(v)) => Value::Int(*v),
        (ValueKind::Float | ValueKind::Any, Attr::Float(v)) => Value::Float(*v),
        // Older projects stored whole-number floats as integers.
        (ValueKind::Float, Attr::Int(v)) => Value::Float(*v as f64),
        (ValueKind::Str | ValueKind::Any, Attr::Str(s)) => Value::Str(s.clone()),
        (ValueKind::StrList | ValueKind::Any, Attr::StrArray(items)) => {
            Value::StrList(items.clone())
        }
        (ValueKind::StrList, Attr::Str(s)) => Value::StrList(vec![s.clone()]),
        (ValueKind::Json | ValueKind::Any, Attr::Json(json)) => Value::Json(json.clone()),
        _ => return Err(mismatch()),
    };
    Ok(value)
}

fn is_array_form(json: &serde_json::Value) -> bool {
    json.get("dim").is_some() && json.get("data").is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{ArrayD, IxDyn};

    #[test]
    fn array_survives_the_trip() {
        let array = ArrayD::from_shape_vec(IxDyn(&[2, 2]), vec![1.0f32, 2.0, 3.0, 4.0])
            .unwrap()
            .into_shared();
        let attr = value_to_attr(&Value::Array(array.clone())).unwrap();
        assert_eq!(attr_to_value(&attr, ValueKind::Array).unwrap(), Value::Array(array));
    }

    #[test]
    fn kind_guides_decoding() {
        let attr = Attr::IntArray(vec![3, 4]);
        assert_eq!(
            attr_to_value(&attr, ValueKind::Shape).unwrap(),
            Value::Shape(vec![3, 4])
        );
        assert!(attr_to_value(&attr, ValueKind::Str).is_err());
        assert_eq!(
            attr_to_value(&Attr::Int(2), ValueKind::Float).unwrap(),
            Value::Float(2.0)
        );
        assert!(attr_to_value(&Attr::IntArray(vec![-1]), ValueKind::Shape).is_err());
    }

    #[test]
    fn plain_json_is_not_mistaken_for_an_array() {
        let json = serde_json::json!({"mode": "grayscale"});
        assert_eq!(
            attr_to_value(&Attr::Json(json.clone()), ValueKind::Any).unwrap(),
            Value::Json(json)
        );
    }

    #[test]
    fn objects_are_rejected() {
        let err = value_to_attr(&Value::object(5u8)).unwrap_err();
        assert!(matches!(err, StorageError::Unsupported { .. }));
    }
}
