//! Gate-set error types.
//!
//! Errors are categorized by who has to act on them:
//!
//! | Category | Variants | Recovery |
//! |----------|----------|----------|
//! | **Lifecycle** | `InvalidReconfiguration` | Build a new gate set instead |
//! | **Programming** | `ShapeMismatch`, `UnknownParameter`, `Unimplemented` | Fix the caller |
//! | **Input** | `InvalidConfiguration`, `InvalidArgument` | Fix the options or arguments |
//! | **Persistence** | `Serialization`, `Io` | Surface to the persistence layer |
//!
//! Nothing in this crate retries. Every error propagates synchronously to
//! the immediate caller.

use thiserror::Error;

/// Errors that can occur in gate-set operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GateSetError {
    // ── Lifecycle ────────────────────────────────────────────────────
    /// `reconfigure` tried to change the optimization kind.
    #[error("Invalid reconfiguration: {0}")]
    InvalidReconfiguration(String),

    // ── Programming errors (fix the caller) ──────────────────────────
    /// An array shape or key set disagrees with the batch contract.
    #[error("Shape mismatch in {context}: expected {expected}, found {found}")]
    ShapeMismatch {
        /// Where the mismatch was detected (parameter name or operation).
        context: String,
        /// Expected shape or key set.
        expected: String,
        /// Shape or key set actually supplied.
        found: String,
    },

    /// A parameter name was not present in the set.
    #[error("Unknown parameter: {0}")]
    UnknownParameter(String),

    /// An optional capability this gate set does not provide.
    #[error("Not implemented: {0}")]
    Unimplemented(&'static str),

    // ── Input errors ─────────────────────────────────────────────────
    /// An option value is unusable.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// A call argument is out of range.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // ── Persistence ──────────────────────────────────────────────────
    /// JSON (de)serialization failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Writing a save record failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl GateSetError {
    /// Build a [`GateSetError::ShapeMismatch`].
    pub fn shape_mismatch(
        context: impl Into<String>,
        expected: impl std::fmt::Debug,
        found: impl std::fmt::Debug,
    ) -> Self {
        Self::ShapeMismatch {
            context: context.into(),
            expected: format!("{expected:?}"),
            found: format!("{found:?}"),
        }
    }

    /// Returns `true` if the error is an integration bug rather than bad input.
    ///
    /// These are never worth retrying with the same code path.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::ShapeMismatch { .. } | Self::UnknownParameter(_) | Self::Unimplemented(_)
        )
    }
}

/// Result type for gate-set operations.
pub type GateSetResult<T> = Result<T, GateSetError>;
