use serde::{Deserialize, Serialize};

use super::{Buffer, BufferError};

/// Byte order of a multi-byte integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    #[default]
    Big,
    Little,
}

impl Buffer {
    pub fn read_u8(&self, offset: usize) -> Result<u8, BufferError> {
        Ok(self.get_contiguous_slice(offset, 1)?[0])
    }

    pub fn read_u16(&self, offset: usize, order: ByteOrder) -> Result<u16, BufferError> {
        let bytes = self.read_array::<2>(offset)?;
        Ok(match order {
            ByteOrder::Big => u16::from_be_bytes(bytes),
            ByteOrder::Little => u16::from_le_bytes(bytes),
        })
    }

    pub fn read_u24(&self, offset: usize, order: ByteOrder) -> Result<u32, BufferError> {
        Ok(self.read_uint(offset, 3, order)? as u32)
    }

    pub fn read_u32(&self, offset: usize, order: ByteOrder) -> Result<u32, BufferError> {
        let bytes = self.read_array::<4>(offset)?;
        Ok(match order {
            ByteOrder::Big => u32::from_be_bytes(bytes),
            ByteOrder::Little => u32::from_le_bytes(bytes),
        })
    }

    pub fn read_u64(&self, offset: usize, order: ByteOrder) -> Result<u64, BufferError> {
        let bytes = self.read_array::<8>(offset)?;
        Ok(match order {
            ByteOrder::Big => u64::from_be_bytes(bytes),
            ByteOrder::Little => u64::from_le_bytes(bytes),
        })
    }

    /// Unsigned integer of `width` bytes (1..=8).
    ///
    /// # Panics
    /// Panics when `width` is 0 or larger than 8.
    pub fn read_uint(&self, offset: usize, width: usize, order: ByteOrder) -> Result<u64, BufferError> {
        assert!((1..=8).contains(&width), "integer width {width} out of range");
        let bytes = self.get_contiguous_slice(offset, width)?;
        let fold = |acc: u64, b: &u8| (acc << 8) | u64::from(*b);
        Ok(match order {
            ByteOrder::Big => bytes.iter().fold(0, fold),
            ByteOrder::Little => bytes.iter().rev().fold(0, fold),
        })
    }

    fn read_array<const N: usize>(&self, offset: usize) -> Result<[u8; N], BufferError> {
        let bytes = self.get_contiguous_slice(offset, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    /// Fixed-width string field. Stops at the first NUL; invalid UTF-8 is
    /// replaced.
    pub fn read_string(&self, offset: usize, length: usize) -> Result<String, BufferError> {
        let bytes = self.get_contiguous_slice(offset, length)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }

    /// NUL-terminated string starting at `offset`.
    ///
    /// Returns the decoded string and the number of bytes it occupies,
    /// terminator included. With `max_length`, a string that fills the whole
    /// window without a terminator is returned as is.
    ///
    /// # Errors
    /// `ContainedBounds` when the terminator would lie past the captured bytes,
    /// `Bounds` when no terminator exists before the reported end.
    pub fn read_cstring(
        &self,
        offset: usize,
        max_length: Option<usize>,
    ) -> Result<(String, usize), BufferError> {
        self.check(offset, 0)?;
        let window = max_length
            .unwrap_or(usize::MAX)
            .min(self.reported_length() - offset);
        let available = window.min(self.captured_length() - offset);
        let bytes = self.get_contiguous_slice(offset, available)?;

        if let Some(pos) = bytes.iter().position(|&b| b == 0) {
            return Ok((String::from_utf8_lossy(&bytes[..pos]).into_owned(), pos + 1));
        }
        if max_length == Some(window) && available == window {
            return Ok((String::from_utf8_lossy(bytes).into_owned(), window));
        }
        match self.check(offset, available + 1) {
            Err(err) => Err(err),
            Ok(()) => Err(self.bounds_error(offset, available + 1)),
        }
    }

    /// Position of the first `needle` at or after `offset`, searching only
    /// captured bytes and at most `max_length` of them.
    pub fn find_u8(&self, offset: usize, max_length: Option<usize>, needle: u8) -> Option<usize> {
        let available = self.remaining_captured(offset);
        let length = max_length.map_or(available, |max| max.min(available));
        let bytes = self.get_contiguous_slice(offset, length).ok()?;
        bytes.iter().position(|&b| b == needle).map(|pos| offset + pos)
    }
}

#[cfg(test)]
mod tests {
    use super::ByteOrder;
    use crate::buffer::{Buffer, BufferError};

    #[test]
    fn integers_honour_byte_order() {
        let buffer = Buffer::from_bytes(vec![0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(buffer.read_u16(0, ByteOrder::Big).unwrap(), 0x0102);
        assert_eq!(buffer.read_u16(0, ByteOrder::Little).unwrap(), 0x0201);
        assert_eq!(buffer.read_u24(1, ByteOrder::Big).unwrap(), 0x0002_0304);
        assert_eq!(buffer.read_u24(1, ByteOrder::Little).unwrap(), 0x0004_0302);
        assert_eq!(buffer.read_u32(4, ByteOrder::Big).unwrap(), 0x0506_0708);
        assert_eq!(buffer.read_u64(0, ByteOrder::Little).unwrap(), 0x0807_0605_0403_0201);
    }

    #[test]
    fn integer_read_past_capture_fails() {
        let buffer = Buffer::real(vec![0xff; 3], 4);
        assert!(matches!(
            buffer.read_u32(0, ByteOrder::Big),
            Err(BufferError::ContainedBounds { .. })
        ));
        assert!(matches!(
            buffer.read_u32(1, ByteOrder::Big),
            Err(BufferError::Bounds { .. })
        ));
    }

    #[test]
    fn cstring_includes_terminator_in_length() {
        let buffer = Buffer::from_bytes(b"abc\0def".to_vec());
        assert_eq!(buffer.read_cstring(0, None).unwrap(), ("abc".to_string(), 4));
        assert!(matches!(
            buffer.read_cstring(4, None),
            Err(BufferError::Bounds { .. })
        ));
    }

    #[test]
    fn cstring_without_terminator_in_truncated_capture() {
        let buffer = Buffer::real(b"abcd".to_vec(), 10);
        assert!(matches!(
            buffer.read_cstring(0, None),
            Err(BufferError::ContainedBounds { .. })
        ));
    }

    #[test]
    fn cstring_with_full_window_is_unterminated() {
        let buffer = Buffer::from_bytes(b"abcdef".to_vec());
        assert_eq!(buffer.read_cstring(1, Some(3)).unwrap(), ("bcd".to_string(), 3));
    }

    #[test]
    fn fixed_string_stops_at_nul() {
        let buffer = Buffer::from_bytes(b"name\0\0\0\0".to_vec());
        assert_eq!(buffer.read_string(0, 8).unwrap(), "name");
    }

    #[test]
    fn find_only_searches_captured_bytes() {
        let buffer = Buffer::real(vec![1, 2, 3], 8);
        assert_eq!(buffer.find_u8(0, None, 3), Some(2));
        assert_eq!(buffer.find_u8(1, Some(1), 3), None);
        assert_eq!(buffer.find_u8(5, None, 0), None);
    }
}
