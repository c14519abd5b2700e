//! Conversion of document values into JSON-native values.
//!
//! The sanitizer is a pure pre-pass run before encoding: every numeric-library
//! scalar becomes a plain JSON number (or bool), every n-dimensional array
//! becomes nested lists following its shape, and maps keep their key order.
//! After this pass the tree holds nothing the JSON encoder cannot write.

use crate::error::{ExportError, ExportResult};
use crate::experiment::{ArrayData, DocValue, Document, NdArray, Scalar};
use serde_json::{Map, Number, Value};
use std::sync::Arc;

/// Hook consulted for every value before the default conversion.
///
/// Returning `Some` replaces the value (and everything nested in it) with the
/// returned JSON; returning `None` falls through to the default rules.
pub type TypeHook = Arc<dyn Fn(&DocValue) -> Option<Value> + Send + Sync>;

/// Sanitize every field of `doc`, preserving key order.
pub fn sanitize_document(
    doc: &Document,
    hook: Option<&TypeHook>,
) -> ExportResult<Map<String, Value>> {
    doc.fields()
        .iter()
        .map(|(key, value)| Ok((key.clone(), sanitize_value(value, hook)?)))
        .collect()
}

/// Sanitize a single value, recursing through lists and maps.
pub fn sanitize_value(value: &DocValue, hook: Option<&TypeHook>) -> ExportResult<Value> {
    if let Some(replaced) = hook.and_then(|hook| hook(value)) {
        return Ok(replaced);
    }

    Ok(match value {
        DocValue::Null => Value::Null,
        DocValue::Bool(b) => Value::Bool(*b),
        DocValue::Int(i) => Value::from(*i),
        DocValue::UInt(u) => Value::from(*u),
        DocValue::Float(f) => float(*f)?,
        DocValue::String(s) => Value::String(s.clone()),
        DocValue::List(items) => Value::Array(
            items
                .iter()
                .map(|item| sanitize_value(item, hook))
                .collect::<ExportResult<_>>()?,
        ),
        DocValue::Map(map) => Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), sanitize_value(v, hook)?)))
                .collect::<ExportResult<_>>()?,
        ),
        DocValue::Scalar(scalar) => scalar_to_json(*scalar)?,
        DocValue::Array(array) => array_to_json(array)?,
    })
}

fn float(f: f64) -> ExportResult<Value> {
    Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| ExportError::Unrepresentable(format!("non-finite float {f}")))
}

fn scalar_to_json(scalar: Scalar) -> ExportResult<Value> {
    Ok(match scalar {
        Scalar::Bool(b) => Value::Bool(b),
        Scalar::I8(v) => Value::from(v),
        Scalar::I16(v) => Value::from(v),
        Scalar::I32(v) => Value::from(v),
        Scalar::I64(v) => Value::from(v),
        Scalar::U8(v) => Value::from(v),
        Scalar::U16(v) => Value::from(v),
        Scalar::U32(v) => Value::from(v),
        Scalar::U64(v) => Value::from(v),
        Scalar::F32(v) => float(f64::from(v))?,
        Scalar::F64(v) => float(v)?,
    })
}

fn array_to_json(array: &NdArray) -> ExportResult<Value> {
    let data = array.data();
    if array.ndim() == 0 {
        return element(data, 0, array.shape());
    }
    let mut offset = 0;
    nest(array.shape(), array.shape(), data, &mut offset)
}

fn nest(
    full_shape: &[usize],
    shape: &[usize],
    data: &ArrayData,
    offset: &mut usize,
) -> ExportResult<Value> {
    let Some((&len, rest)) = shape.split_first() else {
        let value = element(data, *offset, full_shape)?;
        *offset += 1;
        return Ok(value);
    };
    let mut items = Vec::with_capacity(len);
    for _ in 0..len {
        items.push(nest(full_shape, rest, data, offset)?);
    }
    Ok(Value::Array(items))
}

fn element(data: &ArrayData, index: usize, shape: &[usize]) -> ExportResult<Value> {
    let scalar = data.get(index).ok_or_else(|| ExportError::ShapeMismatch {
        shape: shape.to_vec(),
        expected: shape.iter().product(),
        actual: data.len(),
    })?;
    scalar_to_json(scalar)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::experiment::ValueMap;
    use serde_json::json;

    #[test]
    fn test_scalars_become_native_numbers() {
        let doc = Document::new()
            .with("exposure", Scalar::F32(0.5))
            .with("gain", Scalar::U16(4))
            .with("offset", Scalar::I8(-3))
            .with("enabled", Scalar::Bool(true));

        let sanitized = sanitize_document(&doc, None).unwrap();
        assert_eq!(
            Value::Object(sanitized),
            json!({"exposure": 0.5, "gain": 4, "offset": -3, "enabled": true})
        );
    }

    #[test]
    fn test_arrays_follow_their_shape() {
        let image = NdArray::new(vec![2, 3], ArrayData::U8(vec![1, 2, 3, 4, 5, 6])).unwrap();
        let empty_rows = NdArray::new(vec![2, 0], ArrayData::F64(vec![])).unwrap();
        let zero_dim = NdArray::new(vec![], ArrayData::I64(vec![42])).unwrap();

        assert_eq!(
            sanitize_value(&image.into(), None).unwrap(),
            json!([[1, 2, 3], [4, 5, 6]])
        );
        assert_eq!(
            sanitize_value(&empty_rows.into(), None).unwrap(),
            json!([[], []])
        );
        assert_eq!(sanitize_value(&zero_dim.into(), None).unwrap(), json!(42));
    }

    #[test]
    fn test_narrow_signed_arrays_keep_their_sign() {
        let offsets = NdArray::new(vec![2, 2], ArrayData::I16(vec![-300, 7, 0, 32767])).unwrap();
        let steps = NdArray::from_vec(ArrayData::I8(vec![-128, 127]));

        assert_eq!(
            sanitize_value(&offsets.into(), None).unwrap(),
            json!([[-300, 7], [0, 32767]])
        );
        assert_eq!(sanitize_value(&steps.into(), None).unwrap(), json!([-128, 127]));
    }

    #[test]
    fn test_nested_numeric_values_are_found_at_any_depth() {
        let mut data_key = ValueMap::new();
        data_key.insert("dtype".into(), "array".into());
        data_key.insert(
            "shape".into(),
            NdArray::from_vec(ArrayData::I64(vec![512, 512])).into(),
        );
        data_key.insert(
            "limits".into(),
            DocValue::List(vec![Scalar::F64(0.0).into(), Scalar::F64(65535.0).into()]),
        );
        let mut data_keys = ValueMap::new();
        data_keys.insert("camera".into(), DocValue::Map(data_key));

        let doc = Document::new().with("data_keys", data_keys);
        let sanitized = sanitize_document(&doc, None).unwrap();

        assert_eq!(
            Value::Object(sanitized),
            json!({"data_keys": {"camera": {
                "dtype": "array",
                "shape": [512, 512],
                "limits": [0.0, 65535.0],
            }}})
        );
    }

    #[test]
    fn test_key_order_is_preserved() {
        let doc = Document::new().with("z", 1).with("a", 2).with("m", 3);
        let keys: Vec<_> = sanitize_document(&doc, None)
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_non_finite_floats_are_rejected() {
        let err = sanitize_value(&Scalar::F32(f32::NAN).into(), None).unwrap_err();
        assert!(matches!(err, ExportError::Unrepresentable(_)));

        let err = sanitize_value(&DocValue::Float(f64::INFINITY), None).unwrap_err();
        assert!(matches!(err, ExportError::Unrepresentable(_)));
    }

    #[test]
    fn test_hook_runs_before_default_conversion() {
        let hook: TypeHook = Arc::new(|value: &DocValue| match value {
            DocValue::Array(array) => Some(json!({"shape": array.shape()})),
            _ => None,
        });
        let doc = Document::new()
            .with("frame", NdArray::new(vec![2, 2], ArrayData::U16(vec![0; 4])).unwrap())
            .with("count", Scalar::U32(9));

        let sanitized = sanitize_document(&doc, Some(&hook)).unwrap();
        assert_eq!(
            Value::Object(sanitized),
            json!({"frame": {"shape": [2, 2]}, "count": 9})
        );
    }
}
