//! Error types for data parsing in dyson-types.

use thiserror::Error;

/// Errors that can occur when classifying devices or parsing field values.
///
/// This error type is transport-agnostic and does not include
/// connection errors (those belong in dyson-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// The product type belongs to a device family this crate does not model
    /// (e.g. robot vacuums).
    #[error("Unsupported product type: {0}")]
    UnsupportedProduct(String),

    /// A device field carried a value outside its known set.
    #[error("Invalid value for {field}: {value:?}")]
    InvalidValue {
        /// The wire name of the field.
        field: &'static str,
        /// The raw value received.
        value: String,
    },
}

impl ParseError {
    pub(crate) fn invalid(field: &'static str, value: &str) -> Self {
        ParseError::InvalidValue {
            field,
            value: value.to_string(),
        }
    }
}

/// Result type alias using dyson-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
