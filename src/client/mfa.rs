//! One-time codes for accounts that require multi-factor login.

use thiserror::Error;

/// Raised when a code cannot be produced.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("failed to generate MFA code: {0}")]
pub struct MfaError(pub String);

/// Supplies the one-time code passed to `authenticate` as `mfa_code`.
///
/// Closures returning `Result<Option<String>, MfaError>` implement the trait,
/// so a TOTP generator can be plugged in without a wrapper type.
pub trait MfaCodeSource: Send + Sync {
    /// Returns the current code, or `None` when the account needs none.
    ///
    /// # Errors
    ///
    /// Returns [`MfaError`] when the code cannot be generated.
    fn current_code(&self) -> Result<Option<String>, MfaError>;
}

impl<F> MfaCodeSource for F
where
    F: Fn() -> Result<Option<String>, MfaError> + Send + Sync,
{
    fn current_code(&self) -> Result<Option<String>, MfaError> {
        self()
    }
}

/// Code source returning a fixed code.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StaticMfaCode(String);

impl StaticMfaCode {
    /// Wraps `code`.
    #[must_use]
    pub fn new(code: impl Into<String>) -> Self {
        Self(code.into())
    }
}

impl MfaCodeSource for StaticMfaCode {
    fn current_code(&self) -> Result<Option<String>, MfaError> {
        Ok(Some(self.0.clone()))
    }
}
