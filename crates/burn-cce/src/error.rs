use alloc::string::String;

use burn_core::tensor::DType;

/// Errors returned when a cut cross-entropy setting cannot be resolved.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum CceError {
    /// The filter epsilon policy name is not one of `auto` or `high`.
    #[error("Unknown eps filter_eps={0:?}")]
    UnknownFilterEps(String),

    /// The epsilon policy only applies to floating point precisions.
    #[error("No machine epsilon for non-float dtype {0:?}")]
    UnsupportedDType(DType),
}

/// Result type of the fallible cut cross-entropy helpers.
pub type Result<T> = core::result::Result<T, CceError>;
