use thiserror::Error;

/// Access failures raised by [`Buffer`](super::Buffer) reads.
///
/// The two variants separate data that never existed on the wire from data
/// that existed but was cut off by the capture's snapshot length.
///
/// # Examples
/// ```
/// use sharkbone_core::buffer::{Buffer, BufferError};
///
/// let buffer = Buffer::real(vec![0u8; 8], 20);
/// let err = buffer.read_bytes(10, 4).unwrap_err();
/// assert!(matches!(err, BufferError::ContainedBounds { .. }));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BufferError {
    /// The range ends past the reported length.
    #[error("bounds error: {length} bytes at offset {offset} exceed reported length {reported}")]
    Bounds {
        offset: usize,
        length: usize,
        reported: usize,
        at: Origin,
    },
    /// The range ends past the captured length but inside the reported length.
    #[error(
        "contained bounds error: {length} bytes at offset {offset} exceed captured length {captured} (reported {reported})"
    )]
    ContainedBounds {
        offset: usize,
        length: usize,
        captured: usize,
        reported: usize,
        at: Origin,
    },
}

/// Identity of a buffer that owns its bytes (a real or composite buffer).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(super) u64);

/// Where an access landed in the buffer that owns the bytes, after walking up
/// through any subsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub buffer: BufferId,
    pub offset: usize,
}

impl BufferError {
    /// Offset of the failed access, relative to the buffer that raised it.
    pub fn offset(&self) -> usize {
        match self {
            BufferError::Bounds { offset, .. } | BufferError::ContainedBounds { offset, .. } => {
                *offset
            }
        }
    }

    /// Location of the failed access in the owning buffer.
    pub fn origin(&self) -> Origin {
        match self {
            BufferError::Bounds { at, .. } | BufferError::ContainedBounds { at, .. } => *at,
        }
    }

    /// True when the data existed on the wire but was not captured.
    pub fn is_truncation(&self) -> bool {
        matches!(self, BufferError::ContainedBounds { .. })
    }
}
