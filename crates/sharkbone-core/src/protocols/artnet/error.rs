use thiserror::Error;

use crate::error::DissectError;

#[derive(Debug, Error)]
pub enum ArtNetError {
    #[error("payload too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },
    #[error("invalid ArtDMX length: {length} (expected 1..=512)")]
    InvalidLength { length: u16 },
}

impl From<ArtNetError> for DissectError {
    fn from(err: ArtNetError) -> Self {
        DissectError::malformed(err.to_string())
    }
}
