//! Error types for the client facade.

use thiserror::Error;

use crate::foreign::ForeignError;
use crate::marshal::MarshalError;
use crate::runtime::section::RuntimeUnavailable;

/// Errors raised by [`crate::Vantage6Client`] operations.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ClientError {
    /// The operation requires a successful [`crate::Vantage6Client::connect`].
    #[error("not connected to vantage6; call connect first")]
    NotConnected,
    /// No interpreter is running.
    #[error(transparent)]
    Unavailable(#[from] RuntimeUnavailable),
    /// The client library raised.
    #[error(transparent)]
    Foreign(#[from] ForeignError),
    /// An argument or result could not be converted.
    #[error(transparent)]
    Marshal(#[from] MarshalError),
    /// The blocking worker running the operation did not complete.
    #[error("{operation} worker failed: {message}")]
    Worker {
        /// Facade operation that was running.
        operation: &'static str,
        /// Join error reported by the runtime.
        message: String,
    },
}
