use thiserror::Error;

/// Contract violations raised by the sweep data structures.
///
/// Orchestration code wraps these in `anyhow::Error`; callers that need to
/// branch on a specific kind can recover it with `downcast_ref::<SweepError>()`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SweepError {
    /// Unpack requested on a scalar parameter or on an unknown name.
    #[error("invalid parameter kind for '{name}': {reason}")]
    InvalidParameterKind { name: String, reason: String },

    /// A value lies outside the domain of the named parameter.
    #[error("value {value} is not a legal value of parameter '{name}'")]
    InvalidValue { name: String, value: String },

    /// A ratio accumulator was updated without both value and total.
    #[error("accumulator '{name}' requires both value and total")]
    MissingOperand { name: String },

    #[error("cannot merge accumulator '{left}' with '{right}': {reason}")]
    IncompatibleMerge {
        left: String,
        right: String,
        reason: String,
    },

    #[error("accumulator '{name}' does not accumulate history")]
    NoHistory { name: String },

    #[error("result '{name}' is missing from the collection being merged")]
    MissingKey { name: String },

    #[error(
        "checkpoint at {path} was produced by a different parameter space; remove or rename it before resuming"
    )]
    CheckpointMismatch { path: String },

    #[error("{operation} requires a results filename to be configured")]
    NotConfigured { operation: String },
}

impl SweepError {
    pub(crate) fn invalid_kind(name: &str, reason: impl Into<String>) -> Self {
        SweepError::InvalidParameterKind {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn incompatible(left: &str, right: &str, reason: impl Into<String>) -> Self {
        SweepError::IncompatibleMerge {
            left: left.to_string(),
            right: right.to_string(),
            reason: reason.into(),
        }
    }
}

pub type SweepResult<T> = std::result::Result<T, SweepError>;
