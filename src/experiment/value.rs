//! In-memory values carried by documents.
//!
//! Documents arrive from acquisition code that works with typed numeric data
//! (fixed-width scalars, contiguous n-dimensional buffers) alongside plain
//! JSON-like metadata. [`DocValue`] holds both. The JSON-native variants map
//! one-to-one onto `serde_json::Value`; [`Scalar`] and [`NdArray`] are the
//! numeric-library types that must be converted by the sanitizer before
//! anything is written out.

use crate::error::{ExportError, ExportResult};
use indexmap::IndexMap;

/// Ordered, string-keyed mapping of document values.
pub type ValueMap = IndexMap<String, DocValue>;

/// A single value inside a document.
#[derive(Debug, Clone, PartialEq)]
pub enum DocValue {
    /// JSON `null`.
    Null,
    /// JSON boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Unsigned integer, e.g. one above `i64::MAX`.
    UInt(u64),
    /// Double; may be non-finite until sanitized.
    Float(f64),
    /// UTF-8 text.
    String(String),
    /// JSON array.
    List(Vec<DocValue>),
    /// JSON object, in insertion order.
    Map(ValueMap),
    /// Fixed-width numeric scalar (numeric-library type)
    Scalar(Scalar),
    /// N-dimensional typed array (numeric-library type)
    Array(NdArray),
}

impl DocValue {
    /// The text of a `String` value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DocValue::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Fixed-width numeric scalar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// `bool`
    Bool(bool),
    /// `i8`
    I8(i8),
    /// `i16`
    I16(i16),
    /// `i32`
    I32(i32),
    /// `i64`
    I64(i64),
    /// `u8`
    U8(u8),
    /// `u16`
    U16(u16),
    /// `u32`
    U32(u32),
    /// `u64`
    U64(u64),
    /// `f32`
    F32(f32),
    /// `f64`
    F64(f64),
}

/// Contiguous typed storage backing an [`NdArray`].
///
/// Stored in its native element type so that narrow integer data does not get
/// widened until it is sanitized.
#[derive(Debug, Clone, PartialEq)]
pub enum ArrayData {
    /// `bool` elements
    Bool(Vec<bool>),
    /// `i8` elements
    I8(Vec<i8>),
    /// `i16` elements
    I16(Vec<i16>),
    /// `i32` elements
    I32(Vec<i32>),
    /// `i64` elements
    I64(Vec<i64>),
    /// `u8` elements
    U8(Vec<u8>),
    /// `u16` elements
    U16(Vec<u16>),
    /// `u32` elements
    U32(Vec<u32>),
    /// `u64` elements
    U64(Vec<u64>),
    /// `f32` elements
    F32(Vec<f32>),
    /// `f64` elements
    F64(Vec<f64>),
}

impl ArrayData {
    /// Returns the number of elements in the buffer.
    pub fn len(&self) -> usize {
        match self {
            ArrayData::Bool(data) => data.len(),
            ArrayData::I8(data) => data.len(),
            ArrayData::I16(data) => data.len(),
            ArrayData::I32(data) => data.len(),
            ArrayData::I64(data) => data.len(),
            ArrayData::U8(data) => data.len(),
            ArrayData::U16(data) => data.len(),
            ArrayData::U32(data) => data.len(),
            ArrayData::U64(data) => data.len(),
            ArrayData::F32(data) => data.len(),
            ArrayData::F64(data) => data.len(),
        }
    }

    /// Returns true if the buffer contains no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Element at flat (row-major) index `i` as a scalar.
    pub fn get(&self, i: usize) -> Option<Scalar> {
        match self {
            ArrayData::Bool(data) => data.get(i).copied().map(Scalar::Bool),
            ArrayData::I8(data) => data.get(i).copied().map(Scalar::I8),
            ArrayData::I16(data) => data.get(i).copied().map(Scalar::I16),
            ArrayData::I32(data) => data.get(i).copied().map(Scalar::I32),
            ArrayData::I64(data) => data.get(i).copied().map(Scalar::I64),
            ArrayData::U8(data) => data.get(i).copied().map(Scalar::U8),
            ArrayData::U16(data) => data.get(i).copied().map(Scalar::U16),
            ArrayData::U32(data) => data.get(i).copied().map(Scalar::U32),
            ArrayData::U64(data) => data.get(i).copied().map(Scalar::U64),
            ArrayData::F32(data) => data.get(i).copied().map(Scalar::F32),
            ArrayData::F64(data) => data.get(i).copied().map(Scalar::F64),
        }
    }
}

/// N-dimensional array: a shape plus a row-major element buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct NdArray {
    shape: Vec<usize>,
    data: ArrayData,
}

impl NdArray {
    /// Build an array, checking that `shape` accounts for every element.
    ///
    /// An empty shape describes a 0-d array holding exactly one element.
    pub fn new(shape: Vec<usize>, data: ArrayData) -> ExportResult<Self> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ExportError::ShapeMismatch {
                shape,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { shape, data })
    }

    /// One-dimensional array over `data`.
    pub fn from_vec(data: ArrayData) -> Self {
        Self {
            shape: vec![data.len()],
            data,
        }
    }

    /// Extent of each dimension; empty for a 0-d array.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// The flat buffer, in row-major order.
    pub fn data(&self) -> &ArrayData {
        &self.data
    }

    /// Number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }
}

macro_rules! impl_from_native {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for DocValue {
                fn from(v: $ty) -> Self {
                    DocValue::$variant(v.into())
                }
            }
        )*
    };
}

impl_from_native! {
    bool => Bool,
    i32 => Int,
    i64 => Int,
    u32 => UInt,
    u64 => UInt,
    f64 => Float,
    String => String,
}

impl From<&str> for DocValue {
    fn from(v: &str) -> Self {
        DocValue::String(v.to_string())
    }
}

impl From<Scalar> for DocValue {
    fn from(v: Scalar) -> Self {
        DocValue::Scalar(v)
    }
}

impl From<NdArray> for DocValue {
    fn from(v: NdArray) -> Self {
        DocValue::Array(v)
    }
}

impl From<Vec<DocValue>> for DocValue {
    fn from(v: Vec<DocValue>) -> Self {
        DocValue::List(v)
    }
}

impl From<ValueMap> for DocValue {
    fn from(v: ValueMap) -> Self {
        DocValue::Map(v)
    }
}

impl<T: Into<DocValue>> From<Option<T>> for DocValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(DocValue::Null, Into::into)
    }
}

impl From<serde_json::Value> for DocValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value;
        match value {
            Value::Null => DocValue::Null,
            Value::Bool(b) => DocValue::Bool(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    DocValue::Int(i)
                } else if let Some(u) = n.as_u64() {
                    DocValue::UInt(u)
                } else {
                    DocValue::Float(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            Value::String(s) => DocValue::String(s),
            Value::Array(items) => DocValue::List(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => {
                DocValue::Map(map.into_iter().map(|(k, v)| (k, v.into())).collect())
            }
        }
    }
}
