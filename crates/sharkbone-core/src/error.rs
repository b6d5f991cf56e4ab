use thiserror::Error;

use crate::buffer::{BufferError, Origin};

/// Failures raised while a frame is being dissected.
///
/// Dissectors return these with `?`; they unwind to the nearest dispatch
/// boundary (see [`PacketContext::call_dissector`](crate::dissect::PacketContext::call_dissector)),
/// which records them in the tree. Only the fatal variants travel further and
/// end the frame's pass.
///
/// # Examples
/// ```
/// use sharkbone_core::DissectError;
///
/// let err = DissectError::malformed("negative header length");
/// assert!(!err.is_fatal());
/// assert!(err.to_string().contains("negative header length"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DissectError {
    /// A read outside the buffer (`Bounds` or `ContainedBounds`).
    #[error(transparent)]
    Buffer(#[from] BufferError),
    /// A dissector's own invariant failed.
    #[error("malformed data: {0}")]
    Malformed(String),
    /// A declared message length cannot be trusted.
    #[error("stream desynchronized: {0}")]
    Desync(String),
    #[error("dissector nesting depth {depth} exceeds limit {limit}")]
    RecursionLimit { depth: usize, limit: usize },
    #[error("dissected {bytes} bytes, over the per-frame budget of {limit}")]
    ByteBudget { bytes: usize, limit: usize },
}

impl DissectError {
    pub fn malformed(message: impl Into<String>) -> Self {
        DissectError::Malformed(message.into())
    }

    pub fn desync(message: impl Into<String>) -> Self {
        DissectError::Desync(message.into())
    }

    /// Fatal errors abort the whole frame instead of one protocol layer.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DissectError::RecursionLimit { .. } | DissectError::ByteBudget { .. }
        )
    }

    /// True for reads past the captured but inside the reported length.
    pub fn is_truncation(&self) -> bool {
        matches!(self, DissectError::Buffer(err) if err.is_truncation())
    }

    /// Offset of a failed read, relative to the buffer that raised it.
    pub fn offset(&self) -> Option<usize> {
        match self {
            DissectError::Buffer(err) => Some(err.offset()),
            _ => None,
        }
    }

    /// Where a failed read landed in the buffer that owns the bytes.
    pub fn origin(&self) -> Option<Origin> {
        match self {
            DissectError::Buffer(err) => Some(err.origin()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DissectError;
    use crate::buffer::Buffer;

    #[test]
    fn buffer_errors_convert_and_keep_their_kind() {
        let buffer = Buffer::real(vec![0u8; 8], 20);
        let err: DissectError = buffer.check(10, 4).unwrap_err().into();
        assert!(err.is_truncation());
        assert_eq!(err.offset(), Some(10));
        assert_eq!(err.origin().map(|at| at.offset), Some(10));
        assert!(!err.is_fatal());
    }

    #[test]
    fn limits_are_fatal() {
        assert!(DissectError::RecursionLimit { depth: 65, limit: 64 }.is_fatal());
        assert!(DissectError::ByteBudget { bytes: 10, limit: 5 }.is_fatal());
        assert!(!DissectError::desync("zero length").is_fatal());
    }
}
