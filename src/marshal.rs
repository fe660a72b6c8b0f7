//! Conversion between host values and objects living in the embedded
//! interpreter.
//!
//! [`HostValue`] is the untyped host-side representation. JSON documents are
//! converted tag by tag; the numeric tag is governed by [`NumberMode`]:
//! [`NumberMode::Lossy`] turns every number into a Python `float`, so integer
//! kwargs such as `{"bins": 3}` reach the algorithm as `3.0`.

use pyo3::prelude::*;
use pyo3::types::{PyBool, PyDict, PyFloat, PyList, PyLong, PyString, PyTuple};
use serde::Serialize;
use thiserror::Error;

use crate::foreign::ForeignValue;
use crate::runtime::section::{self, RuntimeUnavailable};

/// How JSON numbers are represented in the embedded interpreter.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum NumberMode {
    /// Every number becomes a `float`.
    #[default]
    Lossy,
    /// Integral numbers become `int`, the rest `float`.
    PreserveIntegers,
}

/// Untyped host value mirroring the shapes the interpreter can hold.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum HostValue {
    /// `None`.
    #[default]
    Null,
    /// `bool`.
    Bool(bool),
    /// `int` within the signed 64-bit range.
    Int(i64),
    /// Finite `float`.
    Float(f64),
    /// `str`.
    Str(String),
    /// `list`; tuples convert to this variant too.
    List(Vec<HostValue>),
    /// String-keyed `dict` in insertion order.
    Map(Vec<(String, HostValue)>),
}

impl HostValue {
    /// Converts a parsed JSON element.
    #[must_use]
    pub fn from_document(value: &serde_json::Value, mode: NumberMode) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(flag) => Self::Bool(*flag),
            serde_json::Value::Number(number) => Self::from_number(number, mode),
            serde_json::Value::String(text) => Self::Str(text.clone()),
            serde_json::Value::Array(items) => Self::List(
                items
                    .iter()
                    .map(|item| Self::from_document(item, mode))
                    .collect(),
            ),
            serde_json::Value::Object(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(key, item)| (key.clone(), Self::from_document(item, mode)))
                    .collect(),
            ),
        }
    }

    fn from_number(number: &serde_json::Number, mode: NumberMode) -> Self {
        if mode == NumberMode::PreserveIntegers
            && let Some(integer) = number.as_i64()
        {
            return Self::Int(integer);
        }
        number.as_f64().map_or(Self::Null, Self::Float)
    }

    /// Converts any serialisable host type, keeping integers intact.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError::Serialize`] naming `T` when serialisation fails,
    /// for example for maps with non-string keys.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Result<Self, MarshalError> {
        let document = serde_json::to_value(value).map_err(|err| MarshalError::Serialize {
            type_name: std::any::type_name::<T>(),
            message: err.to_string(),
        })?;
        Ok(Self::from_document(&document, NumberMode::PreserveIntegers))
    }

    /// Renders the value as JSON. Floats are always finite, so this is
    /// infallible.
    #[must_use]
    pub fn to_document(&self) -> serde_json::Value {
        match self {
            Self::Null => serde_json::Value::Null,
            Self::Bool(flag) => serde_json::Value::Bool(*flag),
            Self::Int(integer) => serde_json::Value::from(*integer),
            Self::Float(float) => serde_json::Number::from_f64(*float)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Str(text) => serde_json::Value::String(text.clone()),
            Self::List(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_document).collect())
            }
            Self::Map(entries) => serde_json::Value::Object(
                entries
                    .iter()
                    .map(|(key, item)| (key.clone(), item.to_document()))
                    .collect(),
            ),
        }
    }

    /// Looks up `key` in a map value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        match self {
            Self::Map(entries) => entries
                .iter()
                .find_map(|(name, value)| (name == key).then_some(value)),
            _ => None,
        }
    }

    /// Returns the element at `position` of a list value.
    #[must_use]
    pub fn at(&self, position: usize) -> Option<&Self> {
        match self {
            Self::List(items) => items.get(position),
            _ => None,
        }
    }

    /// Returns the string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(text) => Some(text),
            _ => None,
        }
    }

    /// Returns the integer payload, if any.
    #[must_use]
    pub const fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(integer) => Some(*integer),
            _ => None,
        }
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for HostValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl<T: Into<Self>> From<Vec<T>> for HostValue {
    fn from(value: Vec<T>) -> Self {
        Self::List(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Self>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Errors raised while converting values in either direction.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MarshalError {
    /// The interpreter value has no host representation.
    #[error("cannot convert Python value of type {type_name} to a host value")]
    Unsupported {
        /// Python type name of the offending value.
        type_name: String,
    },
    /// A `dict` key is not a `str`.
    #[error("cannot convert dict with {type_name} key; only str keys are supported")]
    NonStringKey {
        /// Python type name of the offending key.
        type_name: String,
    },
    /// The float is NaN or infinite.
    #[error("cannot convert non-finite float {repr}")]
    NonFiniteFloat {
        /// Python representation of the float.
        repr: String,
    },
    /// The host float is NaN or infinite.
    #[error("cannot convert non-finite host float")]
    NonFiniteHostFloat,
    /// The integer does not fit in 64 bits.
    #[error("integer {repr} does not fit in 64 bits")]
    IntegerOutOfRange {
        /// Python representation of the integer.
        repr: String,
    },
    /// A host type could not be serialised.
    #[error("cannot convert host value of type {type_name}: {message}")]
    Serialize {
        /// Rust type name of the offending value.
        type_name: &'static str,
        /// Serialiser error.
        message: String,
    },
    /// The interpreter raised while building or inspecting a value.
    #[error("Python raised during conversion: {0}")]
    Python(String),
    /// No interpreter is running.
    #[error(transparent)]
    Unavailable(#[from] RuntimeUnavailable),
}

impl From<PyErr> for MarshalError {
    fn from(value: PyErr) -> Self {
        Self::Python(value.to_string())
    }
}

/// Builds the interpreter object for `value`. Intermediate objects are owned
/// by the returned tree.
///
/// # Errors
///
/// Returns [`MarshalError::NonFiniteHostFloat`] for NaN or infinite floats and
/// [`MarshalError::Python`] when the interpreter raises.
pub fn to_py<'py>(py: Python<'py>, value: &HostValue) -> Result<Bound<'py, PyAny>, MarshalError> {
    Ok(match value {
        HostValue::Null => py.None().into_bound(py),
        HostValue::Bool(flag) => PyBool::new_bound(py, *flag).to_owned().into_any(),
        HostValue::Int(integer) => integer.to_object(py).into_bound(py),
        HostValue::Float(float) => {
            if !float.is_finite() {
                return Err(MarshalError::NonFiniteHostFloat);
            }
            PyFloat::new_bound(py, *float).into_any()
        }
        HostValue::Str(text) => PyString::new_bound(py, text).into_any(),
        HostValue::List(items) => {
            let list = PyList::empty_bound(py);
            for item in items {
                list.append(to_py(py, item)?)?;
            }
            list.into_any()
        }
        HostValue::Map(entries) => {
            let dict = PyDict::new_bound(py);
            for (key, item) in entries {
                dict.set_item(PyString::new_bound(py, key), to_py(py, item)?)?;
            }
            dict.into_any()
        }
    })
}

/// Builds the interpreter object for a JSON element without an intermediate
/// host tree.
///
/// # Errors
///
/// Returns [`MarshalError::Python`] when the interpreter raises.
pub fn document_to_py<'py>(
    py: Python<'py>,
    value: &serde_json::Value,
    mode: NumberMode,
) -> Result<Bound<'py, PyAny>, MarshalError> {
    Ok(match value {
        serde_json::Value::Null => py.None().into_bound(py),
        serde_json::Value::Bool(flag) => PyBool::new_bound(py, *flag).to_owned().into_any(),
        serde_json::Value::Number(number) => match HostValue::from_number(number, mode) {
            HostValue::Int(integer) => integer.to_object(py).into_bound(py),
            HostValue::Float(float) => PyFloat::new_bound(py, float).into_any(),
            _ => py.None().into_bound(py),
        },
        serde_json::Value::String(text) => PyString::new_bound(py, text).into_any(),
        serde_json::Value::Array(items) => {
            let list = PyList::empty_bound(py);
            for item in items {
                list.append(document_to_py(py, item, mode)?)?;
            }
            list.into_any()
        }
        serde_json::Value::Object(entries) => {
            let dict = PyDict::new_bound(py);
            for (key, item) in entries {
                dict.set_item(PyString::new_bound(py, key), document_to_py(py, item, mode)?)?;
            }
            dict.into_any()
        }
    })
}

fn type_name(object: &Bound<'_, PyAny>) -> String {
    object
        .get_type()
        .getattr("__name__")
        .and_then(|name| name.extract::<String>())
        .unwrap_or_else(|_| String::from("<unknown>"))
}

fn repr(object: &Bound<'_, PyAny>) -> String {
    object
        .repr()
        .map_or_else(|_| type_name(object), |text| text.to_string())
}

/// Reads an interpreter object back into a [`HostValue`].
///
/// # Errors
///
/// Returns [`MarshalError::Unsupported`] naming the Python type for objects
/// outside the supported shapes, [`MarshalError::NonStringKey`] for dicts with
/// non-`str` keys, [`MarshalError::NonFiniteFloat`] and
/// [`MarshalError::IntegerOutOfRange`] for unrepresentable numbers.
pub fn from_py(object: &Bound<'_, PyAny>) -> Result<HostValue, MarshalError> {
    if object.is_none() {
        return Ok(HostValue::Null);
    }
    // `bool` subclasses `int`, so it is checked first.
    if let Ok(flag) = object.downcast::<PyBool>() {
        return Ok(HostValue::Bool(flag.is_true()));
    }
    if object.is_instance_of::<PyLong>() {
        return object
            .extract::<i64>()
            .map(HostValue::Int)
            .map_err(|_| MarshalError::IntegerOutOfRange {
                repr: repr(object),
            });
    }
    if let Ok(float) = object.downcast::<PyFloat>() {
        let value = float.value();
        if !value.is_finite() {
            return Err(MarshalError::NonFiniteFloat {
                repr: repr(object),
            });
        }
        return Ok(HostValue::Float(value));
    }
    if let Ok(text) = object.downcast::<PyString>() {
        return Ok(HostValue::Str(text.to_str()?.to_owned()));
    }
    if let Ok(dict) = object.downcast::<PyDict>() {
        let mut entries = Vec::with_capacity(dict.len());
        for (key, item) in dict.iter() {
            let name = key
                .downcast::<PyString>()
                .map_err(|_| MarshalError::NonStringKey {
                    type_name: type_name(&key),
                })?
                .to_str()?
                .to_owned();
            entries.push((name, from_py(&item)?));
        }
        return Ok(HostValue::Map(entries));
    }
    if let Ok(list) = object.downcast::<PyList>() {
        return list
            .iter()
            .map(|item| from_py(&item))
            .collect::<Result<Vec<_>, _>>()
            .map(HostValue::List);
    }
    if let Ok(tuple) = object.downcast::<PyTuple>() {
        return tuple
            .iter()
            .map(|item| from_py(&item))
            .collect::<Result<Vec<_>, _>>()
            .map(HostValue::List);
    }
    Err(MarshalError::Unsupported {
        type_name: type_name(object),
    })
}

/// Converts values across the boundary inside the exclusive section.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Marshaler {
    mode: NumberMode,
}

impl Marshaler {
    /// Creates a marshaler using `mode` for JSON numbers.
    #[must_use]
    pub const fn new(mode: NumberMode) -> Self {
        Self { mode }
    }

    /// Numeric mode applied to JSON documents.
    #[must_use]
    pub const fn mode(&self) -> NumberMode {
        self.mode
    }

    /// Converts a host value into a promoted interpreter handle.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError`] when conversion fails or no interpreter is
    /// running.
    pub fn to_foreign(&self, value: &HostValue) -> Result<ForeignValue, MarshalError> {
        section::run(|py| to_py(py, value).map(ForeignValue::from_bound))
    }

    /// Converts a JSON element into a promoted interpreter handle using the
    /// configured [`NumberMode`].
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError`] when conversion fails or no interpreter is
    /// running.
    pub fn document_to_foreign(
        &self,
        value: &serde_json::Value,
    ) -> Result<ForeignValue, MarshalError> {
        section::run(|py| document_to_py(py, value, self.mode).map(ForeignValue::from_bound))
    }

    /// Converts any serialisable host type into an interpreter handle.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError::Serialize`] naming `T` when the type cannot be
    /// represented.
    pub fn serialize_to_foreign<T: Serialize + ?Sized>(
        &self,
        value: &T,
    ) -> Result<ForeignValue, MarshalError> {
        self.to_foreign(&HostValue::from_serialize(value)?)
    }

    /// Reads an interpreter handle back into a host value.
    ///
    /// # Errors
    ///
    /// Returns [`MarshalError`] for unsupported shapes or when no interpreter
    /// is running.
    pub fn to_host(&self, value: &ForeignValue) -> Result<HostValue, MarshalError> {
        section::run(|py| from_py(value.bind(py)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use serde_json::json;

    #[rstest]
    #[case(json!(3), NumberMode::Lossy, HostValue::Float(3.0))]
    #[case(json!(3), NumberMode::PreserveIntegers, HostValue::Int(3))]
    #[case(json!(2.5), NumberMode::PreserveIntegers, HostValue::Float(2.5))]
    #[case(json!(null), NumberMode::Lossy, HostValue::Null)]
    fn numbers_follow_mode(
        #[case] document: serde_json::Value,
        #[case] mode: NumberMode,
        #[case] expected: HostValue,
    ) {
        assert_eq!(HostValue::from_document(&document, mode), expected);
    }

    #[test]
    fn documents_keep_key_order() {
        let document = json!({"zeta": 1, "alpha": 2, "mid": 3});

        let HostValue::Map(entries) = HostValue::from_document(&document, NumberMode::Lossy) else {
            panic!("object should convert to a map");
        };
        let keys: Vec<_> = entries.iter().map(|(key, _)| key.as_str()).collect();

        assert_eq!(keys, ["zeta", "alpha", "mid"]);
    }

    #[test]
    fn serialize_names_the_offending_type() {
        let mut map = std::collections::HashMap::new();
        map.insert((1, 2), "tuple key");

        let err = HostValue::from_serialize(&map).expect_err("tuple keys are unsupported");

        let MarshalError::Serialize { type_name, .. } = err else {
            panic!("expected Serialize error, got {err:?}");
        };
        assert!(type_name.contains("HashMap"), "type name: {type_name}");
    }

    #[test]
    fn to_document_round_trips_host_values() {
        let value = HostValue::Map(vec![
            (String::from("count"), HostValue::Int(2)),
            (
                String::from("labels"),
                HostValue::from(vec!["a", "b"]),
            ),
        ]);

        assert_eq!(
            value.to_document(),
            json!({"count": 2, "labels": ["a", "b"]})
        );
    }
}
