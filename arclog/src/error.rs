//! Error types for registration and handler execution.

use thiserror::Error;

use crate::lineage::TypeKey;

/// Registration conflict: the type already has a handler.
///
/// Returned synchronously by [`Encoder::register`](crate::Encoder::register)
/// so misconfiguration surfaces at startup, not at log time. Recover by
/// calling [`Encoder::register_override`](crate::Encoder::register_override)
/// or by registering a different type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("a handler is already registered for {key}")]
pub struct ConflictError {
    /// The type whose registration was refused.
    pub key: TypeKey,
}

/// Errors a handler may return instead of an encoded value.
///
/// These never escape [`Encoder::encode`](crate::Encoder::encode): the
/// encoder replaces them with a fallback object that records the failure.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler was invoked with a value of a different type.
    #[error("handler for {expected} received a value of another type")]
    TypeMismatch {
        /// Type the handler was registered for.
        expected: &'static str,
    },

    /// The value cannot be represented by this handler.
    #[error("unsupported value: {0}")]
    Unsupported(String),

    /// Serializing the value through serde failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Free-form failure message.
    #[error("{0}")]
    Message(String),

    /// Catch-all.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// Build a [`HandlerError::Message`] from anything string-like.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conflict_error_names_the_type() {
        let err = ConflictError {
            key: TypeKey::of::<String>(),
        };
        assert!(err.to_string().contains("alloc::string::String"));
    }

    #[test]
    fn handler_error_from_boxed() {
        let boxed: Box<dyn std::error::Error + Send + Sync> = "disk on fire".into();
        let err: HandlerError = boxed.into();
        assert_eq!(err.to_string(), "disk on fire");
    }

    #[test]
    fn handler_error_type_mismatch_display() {
        let err = HandlerError::TypeMismatch { expected: "u32" };
        assert!(err.to_string().contains("u32"));
    }
}
