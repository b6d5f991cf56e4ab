//! Layered, bounds-checked packet buffers.
//!
//! A [`Buffer`] addresses packet bytes in one of three ways:
//! - `Real`: owns captured bytes (cheaply shared through `bytes::Bytes`);
//! - `Subset`: a contiguous window into a parent buffer, without copying;
//! - `Composite`: several buffers addressed as one range, copied into a
//!   contiguous block only when a read first crosses a part boundary.
//!
//! Every buffer carries two lengths. The *reported* length is what the wire
//! claimed; the *captured* length is what is actually present. Reads are checked
//! against both: past the captured length but inside the reported length is a
//! [`BufferError::ContainedBounds`] (truncated capture), past the reported length
//! is a [`BufferError::Bounds`] (the data never existed).
//!
//! Buffers are immutable and reference counted; cloning one is cheap.
//!
//! # Examples
//! ```
//! use sharkbone_core::buffer::{Buffer, ByteOrder};
//!
//! let frame = Buffer::real(vec![0x00, 0x10, 0xde, 0xad, 0xbe, 0xef], 6);
//! let payload = frame.subset(2, 4)?;
//! assert_eq!(payload.read_u32(0, ByteOrder::Big)?, 0xdead_beef);
//! # Ok::<(), sharkbone_core::buffer::BufferError>(())
//! ```

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use serde::{Deserialize, Serialize};

mod composite;
pub mod error;
mod reader;

pub use error::{BufferError, BufferId, Origin};
pub use reader::ByteOrder;

use composite::Composite;

/// How a buffer addresses its bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BufferKind {
    Real,
    Subset,
    Composite,
}

/// Immutable view over packet bytes. See the module documentation.
#[derive(Clone)]
pub struct Buffer {
    inner: Arc<Inner>,
}

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

impl BufferId {
    fn next() -> Self {
        BufferId(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

struct Inner {
    id: BufferId,
    reported: usize,
    captured: usize,
    backing: Backing,
}

enum Backing {
    Real(Bytes),
    Subset { parent: Buffer, offset: usize },
    Composite(Composite),
}

impl Buffer {
    /// Wrap captured bytes.
    ///
    /// `reported_length` may exceed `bytes.len()` when the capture was cut by a
    /// snapshot length. When it is smaller, the extra bytes are not addressable.
    pub fn real(bytes: impl Into<Bytes>, reported_length: usize) -> Self {
        let mut data: Bytes = bytes.into();
        let captured = data.len().min(reported_length);
        data.truncate(captured);
        Self::from_inner(Inner {
            id: BufferId::next(),
            reported: reported_length,
            captured,
            backing: Backing::Real(data),
        })
    }

    /// Wrap bytes that were captured in full.
    pub fn from_bytes(bytes: impl Into<Bytes>) -> Self {
        let data: Bytes = bytes.into();
        let len = data.len();
        Self::real(data, len)
    }

    /// Window of `length` bytes starting at `offset`.
    ///
    /// The range is validated against this buffer's reported length; the
    /// window's captured length is whatever part of it this buffer captured.
    ///
    /// # Errors
    /// `BufferError::Bounds` when the range ends past the reported length.
    pub fn subset(&self, offset: usize, length: usize) -> Result<Buffer, BufferError> {
        let end = offset
            .checked_add(length)
            .ok_or_else(|| self.bounds_error(offset, length))?;
        if end > self.inner.reported {
            return Err(self.bounds_error(offset, length));
        }

        let captured = length.min(self.inner.captured.saturating_sub(offset));
        let (parent, base) = match &self.inner.backing {
            Backing::Subset { parent, offset: base } => (parent.clone(), base + offset),
            _ => (self.clone(), offset),
        };
        Ok(Self::from_inner(Inner {
            id: BufferId::next(),
            reported: length,
            captured,
            backing: Backing::Subset {
                parent,
                offset: base,
            },
        }))
    }

    /// Window of `length` claimed bytes starting at `offset`, which may run past
    /// this buffer's end. Only the part this buffer captured is readable; reads
    /// beyond it fail with `ContainedBounds`.
    ///
    /// # Errors
    /// `BufferError::Bounds` when `offset` is past the reported length.
    pub fn subset_claimed(&self, offset: usize, length: usize) -> Result<Buffer, BufferError> {
        let available = self
            .inner
            .reported
            .checked_sub(offset)
            .ok_or_else(|| self.bounds_error(offset, length))?;
        let window = self.subset(offset, length.min(available))?;
        if length <= available {
            return Ok(window);
        }
        let Backing::Subset { parent, offset: base } = &window.inner.backing else {
            return Ok(window);
        };
        Ok(Self::from_inner(Inner {
            id: BufferId::next(),
            reported: length,
            captured: window.inner.captured,
            backing: Backing::Subset {
                parent: parent.clone(),
                offset: *base,
            },
        }))
    }

    /// Window from `offset` to the end of the reported length.
    ///
    /// # Errors
    /// `BufferError::Bounds` when `offset` is past the reported length.
    pub fn subset_remaining(&self, offset: usize) -> Result<Buffer, BufferError> {
        let length = self
            .inner
            .reported
            .checked_sub(offset)
            .ok_or_else(|| self.bounds_error(offset, 0))?;
        self.subset(offset, length)
    }

    /// Concatenate `parts` into one addressable range.
    ///
    /// Nothing is copied here; see [`Buffer::get_contiguous_slice`].
    pub fn composite(parts: Vec<Buffer>) -> Self {
        let (composite, reported, captured) = Composite::new(parts);
        Self::from_inner(Inner {
            id: BufferId::next(),
            reported,
            captured,
            backing: Backing::Composite(composite),
        })
    }

    fn from_inner(inner: Inner) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    /// Identity of this buffer; see [`Buffer::origin`].
    pub fn id(&self) -> BufferId {
        self.inner.id
    }

    /// Owning buffer and offset of `offset`, like [`Buffer::resolve`] but
    /// without cloning. Offsets past the end are translated all the same.
    pub fn origin(&self, offset: usize) -> Origin {
        match &self.inner.backing {
            Backing::Subset { parent, offset: base } => parent.origin(base.saturating_add(offset)),
            _ => Origin {
                buffer: self.inner.id,
                offset,
            },
        }
    }

    pub(crate) fn bounds_error(&self, offset: usize, length: usize) -> BufferError {
        BufferError::Bounds {
            offset,
            length,
            reported: self.inner.reported,
            at: self.origin(offset),
        }
    }

    fn contained_error(&self, offset: usize, length: usize) -> BufferError {
        BufferError::ContainedBounds {
            offset,
            length,
            captured: self.inner.captured,
            reported: self.inner.reported,
            at: self.origin(offset),
        }
    }

    /// Length claimed on the wire.
    pub fn reported_length(&self) -> usize {
        self.inner.reported
    }

    /// Bytes actually available.
    pub fn captured_length(&self) -> usize {
        self.inner.captured
    }

    pub fn kind(&self) -> BufferKind {
        match self.inner.backing {
            Backing::Real(_) => BufferKind::Real,
            Backing::Subset { .. } => BufferKind::Subset,
            Backing::Composite(_) => BufferKind::Composite,
        }
    }

    /// Captured bytes left from `offset`, or 0 when `offset` is past them.
    pub fn remaining_captured(&self, offset: usize) -> usize {
        self.inner.captured.saturating_sub(offset)
    }

    /// Reported bytes left from `offset`, or 0 when `offset` is past them.
    pub fn remaining_reported(&self, offset: usize) -> usize {
        self.inner.reported.saturating_sub(offset)
    }

    /// True when both handles refer to the same buffer.
    pub fn ptr_eq(&self, other: &Buffer) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// True once a composite buffer has been copied into contiguous memory.
    /// Always false for other kinds.
    pub fn is_materialized(&self) -> bool {
        match &self.inner.backing {
            Backing::Composite(composite) => composite.is_materialized(),
            _ => false,
        }
    }

    /// Number of constituents of a composite buffer (1 for other kinds).
    pub fn part_count(&self) -> usize {
        match &self.inner.backing {
            Backing::Composite(composite) => composite.parts().len(),
            _ => 1,
        }
    }

    /// The buffer that owns the bytes at `offset`, with the offset translated
    /// into it. Subsets resolve to their origin; real and composite buffers are
    /// their own origin.
    pub fn resolve(&self, offset: usize) -> (Buffer, usize) {
        match &self.inner.backing {
            Backing::Subset { parent, offset: base } => parent.resolve(base + offset),
            _ => (self.clone(), offset),
        }
    }

    /// Check that `[offset, offset + length)` is captured.
    ///
    /// # Errors
    /// `ContainedBounds` when the range ends inside the reported but past the
    /// captured length, `Bounds` when it ends past the reported length.
    pub fn check(&self, offset: usize, length: usize) -> Result<(), BufferError> {
        let Some(end) = offset.checked_add(length) else {
            return Err(self.bounds_error(offset, length));
        };
        if end <= self.inner.captured {
            Ok(())
        } else if end <= self.inner.reported {
            Err(self.contained_error(offset, length))
        } else {
            Err(self.bounds_error(offset, length))
        }
    }

    /// Borrow `[offset, offset + length)` as one slice.
    ///
    /// Real buffers and subsets of them borrow directly. A composite borrows
    /// from the constituent when the range stays inside one, and is
    /// materialized otherwise.
    ///
    /// # Errors
    /// See [`Buffer::check`].
    pub fn get_contiguous_slice(&self, offset: usize, length: usize) -> Result<&[u8], BufferError> {
        self.check(offset, length)?;
        match &self.inner.backing {
            Backing::Real(data) => Ok(&data[offset..offset + length]),
            Backing::Subset { parent, offset: base } => {
                parent.get_contiguous_slice(base + offset, length)
            }
            Backing::Composite(composite) => {
                if length == 0 {
                    return Ok(&[]);
                }
                match composite.single_part(offset, length) {
                    Some((part, local)) => part.get_contiguous_slice(local, length),
                    None => {
                        let data = composite.materialized(self.inner.captured);
                        Ok(&data[offset..offset + length])
                    }
                }
            }
        }
    }

    /// Owned handle to `[offset, offset + length)`; zero-copy unless a
    /// composite boundary is crossed.
    ///
    /// # Errors
    /// See [`Buffer::check`].
    pub fn read_bytes(&self, offset: usize, length: usize) -> Result<Bytes, BufferError> {
        self.check(offset, length)?;
        match &self.inner.backing {
            Backing::Real(data) => Ok(data.slice(offset..offset + length)),
            Backing::Subset { parent, offset: base } => parent.read_bytes(base + offset, length),
            Backing::Composite(composite) => {
                if length == 0 {
                    return Ok(Bytes::new());
                }
                match composite.single_part(offset, length) {
                    Some((part, local)) => part.read_bytes(local, length),
                    None => Ok(composite
                        .materialized(self.inner.captured)
                        .slice(offset..offset + length)),
                }
            }
        }
    }

    /// All captured bytes.
    pub fn captured_bytes(&self) -> Bytes {
        self.read_bytes(0, self.inner.captured).unwrap_or_default()
    }
}

impl fmt::Debug for Buffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("kind", &self.kind())
            .field("reported", &self.inner.reported)
            .field("captured", &self.inner.captured)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::{Buffer, BufferError, BufferKind, ByteOrder};
    use proptest::prelude::*;

    fn truncated() -> Buffer {
        Buffer::real((0u8..8).collect::<Vec<_>>(), 20)
    }

    #[test]
    fn truncated_capture_distinguishes_errors() {
        let buffer = truncated();
        assert_eq!(buffer.reported_length(), 20);
        assert_eq!(buffer.captured_length(), 8);

        let err = buffer.read_bytes(10, 4).unwrap_err();
        assert!(matches!(err, BufferError::ContainedBounds { offset: 10, length: 4, .. }));

        let err = buffer.read_bytes(18, 6).unwrap_err();
        assert!(matches!(err, BufferError::Bounds { offset: 18, length: 6, reported: 20, .. }));
    }

    #[test]
    fn claimed_window_past_the_end_reads_as_truncated() {
        let frame = Buffer::from_bytes((0u8..10).collect::<Vec<_>>());
        let cut = frame.subset_claimed(6, 12).unwrap();
        assert_eq!((cut.reported_length(), cut.captured_length()), (12, 4));
        assert_eq!(cut.read_u8(3).unwrap(), 9);
        let err = cut.read_u8(4).unwrap_err();
        assert!(err.is_truncation());
        assert_eq!(err.origin().offset, 10);
        assert_eq!(err.origin().buffer, frame.id());

        assert_eq!(frame.subset_claimed(2, 3).unwrap().reported_length(), 3);
        assert!(matches!(frame.subset_claimed(11, 1), Err(BufferError::Bounds { .. })));
    }

    #[test]
    fn errors_in_nested_subsets_point_at_the_owning_bytes() {
        let frame = Buffer::from_bytes(vec![0u8; 16]);
        let outer = frame.subset(4, 10).unwrap();
        let err = outer.subset(6, 4).unwrap().read_u32(2, ByteOrder::Big).unwrap_err();
        assert_eq!(err.offset(), 2);
        assert_eq!(err.origin().buffer, frame.id());
        assert_eq!(err.origin().offset, 12);
    }

    #[test]
    fn reported_shorter_than_data_hides_the_tail() {
        let buffer = Buffer::real(vec![1, 2, 3, 4], 2);
        assert_eq!(buffer.captured_length(), 2);
        assert!(matches!(buffer.read_u8(2), Err(BufferError::Bounds { .. })));
    }

    #[test]
    fn overflowing_offset_is_a_bounds_error() {
        let buffer = Buffer::from_bytes(vec![0u8; 4]);
        assert!(matches!(
            buffer.check(usize::MAX, 2),
            Err(BufferError::Bounds { .. })
        ));
        assert!(matches!(
            buffer.subset(usize::MAX, 2),
            Err(BufferError::Bounds { .. })
        ));
    }

    #[test]
    fn subset_validates_against_reported_length() {
        let buffer = truncated();
        let inside = buffer.subset(4, 12).unwrap();
        assert_eq!(inside.reported_length(), 12);
        assert_eq!(inside.captured_length(), 4);
        assert_eq!(inside.kind(), BufferKind::Subset);

        let err = buffer.subset(10, 11).unwrap_err();
        assert!(matches!(err, BufferError::Bounds { .. }));
    }

    #[test]
    fn subset_past_captured_has_no_captured_bytes() {
        let buffer = truncated();
        let tail = buffer.subset_remaining(12).unwrap();
        assert_eq!(tail.reported_length(), 8);
        assert_eq!(tail.captured_length(), 0);
        assert!(matches!(tail.read_u8(0), Err(BufferError::ContainedBounds { .. })));
    }

    #[test]
    fn nested_subset_resolves_to_origin() {
        let frame = Buffer::from_bytes((0u8..32).collect::<Vec<_>>());
        let outer = frame.subset(4, 20).unwrap();
        let inner = outer.subset(3, 5).unwrap();
        let (origin, offset) = inner.resolve(2);
        assert!(origin.ptr_eq(&frame));
        assert_eq!(offset, 9);
        assert_eq!(inner.read_u8(2).unwrap(), 9);
    }

    #[test]
    fn composite_reads_inside_a_part_without_materializing() {
        let a = Buffer::from_bytes(vec![1, 2, 3]);
        let b = Buffer::from_bytes(vec![4, 5, 6, 7]);
        let joined = Buffer::composite(vec![a, b]);
        assert_eq!(joined.kind(), BufferKind::Composite);
        assert_eq!(joined.reported_length(), 7);
        assert_eq!(joined.captured_length(), 7);

        assert_eq!(joined.read_u8(4).unwrap(), 5);
        assert_eq!(joined.get_contiguous_slice(0, 3).unwrap(), &[1, 2, 3]);
        assert!(!joined.is_materialized());

        assert_eq!(joined.read_u16(2, ByteOrder::Big).unwrap(), 0x0304);
        assert!(joined.is_materialized());
        assert_eq!(joined.get_contiguous_slice(0, 7).unwrap(), &[1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn composite_captured_length_stops_at_first_short_part() {
        let a = Buffer::real(vec![1, 2], 4);
        let b = Buffer::from_bytes(vec![3, 4]);
        let joined = Buffer::composite(vec![a, b]);
        assert_eq!(joined.reported_length(), 6);
        assert_eq!(joined.captured_length(), 2);
        assert!(matches!(joined.read_u8(4), Err(BufferError::ContainedBounds { .. })));
    }

    #[test]
    fn composite_skips_empty_parts() {
        let empty = Buffer::from_bytes(Vec::new());
        let a = Buffer::from_bytes(vec![9]);
        let joined = Buffer::composite(vec![empty, a]);
        assert_eq!(joined.part_count(), 1);
        assert_eq!(joined.read_u8(0).unwrap(), 9);
    }

    proptest! {
        #[test]
        fn nested_subset_matches_direct_addressing(
            data in proptest::collection::vec(any::<u8>(), 1..128),
            o1 in 0usize..128,
            l1 in 0usize..128,
            o2 in 0usize..128,
            l2 in 0usize..128,
        ) {
            let frame = Buffer::from_bytes(data.clone());
            prop_assume!(o1 + l1 <= data.len());
            prop_assume!(o2 <= l1 && l2 <= l1 - o2);

            let nested = frame.subset(o1, l1).unwrap().subset(o2, l2).unwrap();
            let direct = frame.read_bytes(o1 + o2, l2).unwrap();
            prop_assert_eq!(nested.read_bytes(0, l2).unwrap(), direct);
        }

        #[test]
        fn reads_inside_capture_match_storage(
            data in proptest::collection::vec(any::<u8>(), 1..64),
            extra in 0usize..64,
            offset in 0usize..64,
            length in 0usize..64,
        ) {
            let buffer = Buffer::real(data.clone(), data.len() + extra);
            let end = offset + length;
            let result = buffer.read_bytes(offset, length);
            if end <= data.len() {
                prop_assert_eq!(&result.unwrap()[..], &data[offset..end]);
                prop_assert_eq!(buffer.read_bytes(offset, length).unwrap(), buffer.read_bytes(offset, length).unwrap());
            } else if end <= data.len() + extra {
                prop_assert!(matches!(result, Err(BufferError::ContainedBounds { .. })), "expected contained bounds error");
            } else {
                prop_assert!(matches!(result, Err(BufferError::Bounds { .. })), "expected bounds error");
            }
        }

        #[test]
        fn composite_equals_concatenation(
            parts in proptest::collection::vec(proptest::collection::vec(any::<u8>(), 0..16), 1..6),
            offset in 0usize..96,
            length in 0usize..32,
        ) {
            let flat: Vec<u8> = parts.concat();
            let joined = Buffer::composite(parts.into_iter().map(Buffer::from_bytes).collect());
            prop_assert_eq!(joined.reported_length(), flat.len());
            match joined.read_bytes(offset, length) {
                Ok(bytes) => prop_assert_eq!(&bytes[..], &flat[offset..offset + length]),
                Err(_) => prop_assert!(offset + length > flat.len()),
            }
        }
    }
}
