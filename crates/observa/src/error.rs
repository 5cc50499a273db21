#![forbid(unsafe_code)]

//! Error type shared by every fallible engine operation.

use thiserror::Error;

use crate::value::ValueKind;

pub type Result<T> = std::result::Result<T, ObserveError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObserveError {
    /// A declared observable field could not be redefined as a notifying
    /// accessor.
    #[error("cannot redefine field `{field}` of `{class}`: field is not configurable")]
    NotConfigurable { class: String, field: String },

    #[error("field `{field}` of `{class}` is read-only")]
    ReadOnly { class: String, field: String },

    #[error("cannot mutate a frozen {kind}")]
    Frozen { kind: ValueKind },

    #[error("index {index} out of bounds (length {len})")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("{kind} has no addressable properties")]
    NoProperties { kind: ValueKind },

    #[error("invalid key {key} for {kind}")]
    InvalidKey { kind: ValueKind, key: String },

    #[error("`{operation}` is not supported on {kind}")]
    Unsupported {
        operation: &'static str,
        kind: ValueKind,
    },

    #[error("{kind} cannot be made observable")]
    NotObservable { kind: ValueKind },

    /// Returned by a getter that must run against the raw instance rather
    /// than a tracked view. The tracker retries such getters once.
    #[error("getter `{field}` requires the raw instance as receiver")]
    ReceiverMismatch { field: String },

    #[error("getter `{field}` failed: {message}")]
    Getter { field: String, message: String },
}

impl ObserveError {
    #[must_use]
    pub fn getter(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Getter {
            field: field.into(),
            message: message.into(),
        }
    }

    #[must_use]
    pub fn receiver_mismatch(field: impl Into<String>) -> Self {
        Self::ReceiverMismatch {
            field: field.into(),
        }
    }

    /// Whether this error is the recoverable receiver-identity failure.
    #[must_use]
    pub fn is_receiver_mismatch(&self) -> bool {
        matches!(self, Self::ReceiverMismatch { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_location() {
        let err = ObserveError::NotConfigurable {
            class: "Cell".into(),
            field: "source".into(),
        };
        assert_eq!(
            err.to_string(),
            "cannot redefine field `source` of `Cell`: field is not configurable"
        );

        let err = ObserveError::Frozen {
            kind: ValueKind::List,
        };
        assert_eq!(err.to_string(), "cannot mutate a frozen list");
    }

    #[test]
    fn receiver_mismatch_is_detectable() {
        assert!(ObserveError::receiver_mismatch("len").is_receiver_mismatch());
        assert!(!ObserveError::getter("len", "boom").is_receiver_mismatch());
    }
}
