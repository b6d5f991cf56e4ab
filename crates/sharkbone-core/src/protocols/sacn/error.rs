use thiserror::Error;

use crate::error::DissectError;

/// Validation failures of an sACN data packet.
///
/// # Examples
/// ```
/// use sharkbone_core::protocols::sacn::error::SacnError;
///
/// let err = SacnError::InvalidDmpVector { value: 1 };
/// assert!(err.to_string().contains("invalid DMP vector"));
/// ```
#[derive(Debug, Error)]
pub enum SacnError {
    #[error("payload too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },
    #[error("invalid property value count: {count}")]
    InvalidPropertyValueCount { count: u16 },
    #[error("invalid DMX data length: {length}")]
    InvalidDmxLength { length: usize },
    #[error("invalid root vector: {value}")]
    InvalidRootVector { value: u32 },
    #[error("invalid framing vector: {value}")]
    InvalidFramingVector { value: u32 },
    #[error("invalid DMP vector: {value}")]
    InvalidDmpVector { value: u8 },
}

impl From<SacnError> for DissectError {
    fn from(err: SacnError) -> Self {
        DissectError::malformed(err.to_string())
    }
}
