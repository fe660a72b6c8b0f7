//! Opaque handles to objects owned by the embedded interpreter.

use std::fmt;

use pyo3::prelude::*;
use pyo3::types::{PyDict, PyString, PyTuple};
use thiserror::Error;

use crate::marshal::{self, HostValue, MarshalError};
use crate::runtime::section::{self, RuntimeUnavailable};

/// Errors raised while operating on a [`ForeignValue`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ForeignError {
    /// No interpreter is running.
    #[error(transparent)]
    Unavailable(#[from] RuntimeUnavailable),
    /// The interpreter raised an exception.
    #[error("{context} failed: {message}")]
    Python {
        /// Operation that raised, for example `task.create`.
        context: String,
        /// Rendered exception (`TypeError: ...`).
        message: String,
    },
    /// A value could not be converted.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
}

impl ForeignError {
    pub(crate) fn python(context: impl Into<String>, err: &PyErr) -> Self {
        Self::Python {
            context: context.into(),
            message: err.to_string(),
        }
    }
}

/// Key used by [`ForeignValue::index`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ForeignKey<'a> {
    /// Mapping key.
    Name(&'a str),
    /// Sequence position.
    Position(usize),
}

impl<'a> From<&'a str> for ForeignKey<'a> {
    fn from(value: &'a str) -> Self {
        Self::Name(value)
    }
}

impl From<usize> for ForeignKey<'_> {
    fn from(value: usize) -> Self {
        Self::Position(value)
    }
}

impl fmt::Display for ForeignKey<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Name(name) => write!(f, "[{name:?}]"),
            Self::Position(position) => write!(f, "[{position}]"),
        }
    }
}

/// Handle to an interpreter object.
///
/// Handles are created inside the exclusive section and promoted out of it.
/// Dropping one outside the section defers the reference release to the next
/// interpreter entry; [`ForeignValue::release`] releases it immediately.
#[derive(Debug)]
pub struct ForeignValue {
    object: Py<PyAny>,
}

impl ForeignValue {
    pub(crate) fn from_bound(object: Bound<'_, PyAny>) -> Self {
        Self {
            object: object.unbind(),
        }
    }

    pub(crate) fn bind<'py>(&self, py: Python<'py>) -> &Bound<'py, PyAny> {
        self.object.bind(py)
    }

    /// Reads attribute `name`.
    ///
    /// # Errors
    ///
    /// Returns [`ForeignError::Python`] when the attribute is missing.
    pub fn get_field(&self, name: &str) -> Result<Self, ForeignError> {
        section::run(|py| {
            self.bind(py)
                .getattr(name)
                .map(Self::from_bound)
                .map_err(|err| ForeignError::python(format!("attribute {name}"), &err))
        })
    }

    /// Subscripts the object with `key`.
    ///
    /// # Errors
    ///
    /// Returns [`ForeignError::Python`] when the object is not subscriptable
    /// or the key is absent.
    pub fn index<'k>(&self, key: impl Into<ForeignKey<'k>>) -> Result<Self, ForeignError> {
        let selector = key.into();
        section::run(|py| {
            let object = self.bind(py);
            let item = match selector {
                ForeignKey::Name(name) => object.get_item(PyString::new_bound(py, name)),
                ForeignKey::Position(position) => object.get_item(position),
            };
            item.map(Self::from_bound)
                .map_err(|err| ForeignError::python(format!("subscript {selector}"), &err))
        })
    }

    /// Looks `name` up as a mapping key, falling back to attribute access
    /// for objects that are not subscriptable by name.
    ///
    /// # Errors
    ///
    /// Returns the subscript error when both lookups fail.
    pub fn lookup(&self, name: &str) -> Result<Self, ForeignError> {
        section::run(|py| lookup_bound(self.bind(py), name).map(Self::from_bound))
    }

    /// Calls method `name` with positional and keyword arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ForeignError::Python`] carrying the exception message when
    /// the method is missing or raises.
    pub fn call(
        &self,
        name: &str,
        args: &[&Self],
        kwargs: &[(&str, &Self)],
    ) -> Result<Self, ForeignError> {
        section::run(|py| {
            let positional = PyTuple::new_bound(py, args.iter().map(|arg| arg.bind(py)));
            let keywords = PyDict::new_bound(py);
            for (key, value) in kwargs {
                keywords
                    .set_item(*key, value.bind(py))
                    .map_err(|err| ForeignError::python(name, &err))?;
            }
            self.bind(py)
                .call_method(name, positional, Some(&keywords))
                .map(Self::from_bound)
                .map_err(|err| ForeignError::python(name, &err))
        })
    }

    /// Number of items, for sized objects.
    ///
    /// # Errors
    ///
    /// Returns [`ForeignError::Python`] when the object has no length.
    pub fn len(&self) -> Result<usize, ForeignError> {
        section::run(|py| {
            self.bind(py)
                .len()
                .map_err(|err| ForeignError::python("len", &err))
        })
    }

    /// Whether the object is `None`.
    ///
    /// # Errors
    ///
    /// Returns [`ForeignError::Unavailable`] when no interpreter is running.
    pub fn is_none(&self) -> Result<bool, ForeignError> {
        section::run(|py| Ok(self.bind(py).is_none()))
    }

    /// Python type name of the object.
    ///
    /// # Errors
    ///
    /// Returns [`ForeignError::Python`] when the name cannot be read.
    pub fn type_name(&self) -> Result<String, ForeignError> {
        section::run(|py| {
            self.bind(py)
                .get_type()
                .getattr("__name__")
                .and_then(|name| name.extract::<String>())
                .map_err(|err| ForeignError::python("type name", &err))
        })
    }

    /// `str()` of the object.
    ///
    /// # Errors
    ///
    /// Returns [`ForeignError::Python`] when `__str__` raises.
    pub fn display(&self) -> Result<String, ForeignError> {
        section::run(|py| {
            self.bind(py)
                .str()
                .map(|text| text.to_string())
                .map_err(|err| ForeignError::python("str", &err))
        })
    }

    /// Converts the object into a host value.
    ///
    /// # Errors
    ///
    /// Returns [`ForeignError::Marshal`] for unsupported shapes.
    pub fn to_host(&self) -> Result<HostValue, ForeignError> {
        section::run(|py| marshal::from_py(self.bind(py)).map_err(ForeignError::from))
    }

    /// Creates a second handle to the same object.
    ///
    /// # Errors
    ///
    /// Returns [`ForeignError::Unavailable`] when no interpreter is running.
    pub fn try_clone(&self) -> Result<Self, ForeignError> {
        section::run(|py| {
            Ok(Self {
                object: self.object.clone_ref(py),
            })
        })
    }

    /// Releases the handle inside the exclusive section. Without a running
    /// interpreter the release is deferred like a plain drop.
    pub fn release(self) {
        let object = self.object;
        if let Err(RuntimeUnavailable) = section::enter(move |_py| drop(object)) {
            tracing::debug!("interpreter not running; handle release deferred");
        }
    }
}

pub(crate) fn lookup_bound<'py>(
    object: &Bound<'py, PyAny>,
    name: &str,
) -> Result<Bound<'py, PyAny>, ForeignError> {
    let py = object.py();
    match object.get_item(PyString::new_bound(py, name)) {
        Ok(item) => Ok(item),
        Err(subscript_err) => object
            .getattr(name)
            .map_err(|_| ForeignError::python(format!("lookup of {name:?}"), &subscript_err)),
    }
}
