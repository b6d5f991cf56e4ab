use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::buffer::{Buffer, ByteOrder};
use crate::error::DissectError;

/// Value type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Text or grouping item without a value.
    None,
    /// Top-level item of a protocol layer.
    Protocol,
    Boolean,
    UInt8,
    UInt16,
    UInt24,
    UInt32,
    UInt64,
    Int8,
    Int16,
    Int32,
    Bytes,
    /// Fixed-width string.
    String,
    /// NUL-terminated string; the item length includes the terminator.
    StringZ,
    Ipv4,
    Ipv6,
    Ether,
    /// Seconds since the Unix epoch, 32 bits.
    AbsoluteTime,
}

impl FieldType {
    /// Width in bytes for fixed-size types.
    pub fn fixed_width(self) -> Option<usize> {
        match self {
            FieldType::UInt8 | FieldType::Int8 => Some(1),
            FieldType::UInt16 | FieldType::Int16 => Some(2),
            FieldType::UInt24 => Some(3),
            FieldType::UInt32 | FieldType::Int32 | FieldType::Ipv4 | FieldType::AbsoluteTime => {
                Some(4)
            }
            FieldType::UInt64 => Some(8),
            FieldType::Ipv6 => Some(16),
            FieldType::Ether => Some(6),
            _ => None,
        }
    }
}

/// How integer values are shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayBase {
    None,
    Dec,
    Hex,
    DecHex,
}

/// How the bytes of an item are laid out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encoding {
    BigEndian,
    LittleEndian,
    Ascii,
    /// Not applicable (raw bytes, addresses, grouping items).
    Na,
}

impl Encoding {
    pub fn byte_order(self) -> ByteOrder {
        match self {
            Encoding::LittleEndian => ByteOrder::Little,
            _ => ByteOrder::Big,
        }
    }
}

/// Static description of a field, registered once at startup.
///
/// # Examples
/// ```
/// use sharkbone_core::tree::{DisplayBase, FieldDescriptor, FieldType};
///
/// static SYN: FieldDescriptor = FieldDescriptor::new("Syn", "tcp.flags.syn", FieldType::Boolean)
///     .with_bitmask(0x0002);
/// assert_eq!(SYN.bitmask, 0x0002);
/// assert_eq!(SYN.base, DisplayBase::None);
/// ```
#[derive(Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    pub abbrev: &'static str,
    pub field_type: FieldType,
    pub base: DisplayBase,
    /// Zero when the field uses all of its bytes.
    pub bitmask: u64,
}

impl FieldDescriptor {
    pub const fn new(name: &'static str, abbrev: &'static str, field_type: FieldType) -> Self {
        let base = match field_type {
            FieldType::UInt8
            | FieldType::UInt16
            | FieldType::UInt24
            | FieldType::UInt32
            | FieldType::UInt64
            | FieldType::Int8
            | FieldType::Int16
            | FieldType::Int32 => DisplayBase::Dec,
            _ => DisplayBase::None,
        };
        Self {
            name,
            abbrev,
            field_type,
            base,
            bitmask: 0,
        }
    }

    pub const fn with_base(self, base: DisplayBase) -> Self {
        Self { base, ..self }
    }

    pub const fn with_bitmask(self, bitmask: u64) -> Self {
        Self { bitmask, ..self }
    }

    /// Decode the value this field describes from `[offset, offset + length)`.
    ///
    /// The range must already be known to be captured.
    pub(crate) fn decode(
        &self,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        encoding: Encoding,
    ) -> Result<FieldValue, DissectError> {
        if let Some(width) = self.field_type.fixed_width() {
            if width != length {
                return Err(DissectError::malformed(format!(
                    "field {} needs {width} bytes, item has {length}",
                    self.abbrev
                )));
            }
        }

        let order = encoding.byte_order();
        let value = match self.field_type {
            FieldType::None | FieldType::Protocol => FieldValue::None,
            FieldType::Boolean => {
                if !(1..=8).contains(&length) {
                    return Err(DissectError::malformed(format!(
                        "boolean field {} spans {length} bytes",
                        self.abbrev
                    )));
                }
                let raw = buffer.read_uint(offset, length, order)?;
                let masked = if self.bitmask == 0 { raw } else { raw & self.bitmask };
                FieldValue::Bool(masked != 0)
            }
            FieldType::UInt8 | FieldType::UInt16 | FieldType::UInt24 | FieldType::UInt32
            | FieldType::UInt64 => {
                FieldValue::UInt(self.apply_mask(buffer.read_uint(offset, length, order)?))
            }
            FieldType::Int8 | FieldType::Int16 | FieldType::Int32 => {
                let raw = self.apply_mask(buffer.read_uint(offset, length, order)?);
                let shift = 64 - 8 * length as u32;
                FieldValue::Int(((raw << shift) as i64) >> shift)
            }
            FieldType::Bytes => FieldValue::Bytes(buffer.read_bytes(offset, length)?),
            FieldType::String => FieldValue::String(buffer.read_string(offset, length)?),
            FieldType::StringZ => {
                let (value, _) = buffer.read_cstring(offset, Some(length))?;
                FieldValue::String(value)
            }
            FieldType::Ipv4 => {
                let raw = buffer.read_u32(offset, ByteOrder::Big)?;
                FieldValue::Ipv4(Ipv4Addr::from(raw))
            }
            FieldType::Ipv6 => {
                let bytes = buffer.get_contiguous_slice(offset, 16)?;
                let mut octets = [0u8; 16];
                octets.copy_from_slice(bytes);
                FieldValue::Ipv6(Ipv6Addr::from(octets))
            }
            FieldType::Ether => {
                let bytes = buffer.get_contiguous_slice(offset, 6)?;
                let mut octets = [0u8; 6];
                octets.copy_from_slice(bytes);
                FieldValue::Ether(octets)
            }
            FieldType::AbsoluteTime => {
                FieldValue::Time(i64::from(buffer.read_u32(offset, order)?))
            }
        };
        Ok(value)
    }

    fn apply_mask(&self, raw: u64) -> u64 {
        if self.bitmask == 0 {
            raw
        } else {
            (raw & self.bitmask) >> self.bitmask.trailing_zeros()
        }
    }

    /// Text shown for `value` according to the display base.
    pub fn format_value(&self, value: &FieldValue) -> Option<String> {
        let text = match value {
            FieldValue::None => return None,
            FieldValue::UInt(v) => self.format_uint(*v),
            FieldValue::Int(v) => v.to_string(),
            other => other.to_string(),
        };
        Some(text)
    }

    fn format_uint(&self, value: u64) -> String {
        let digits = self.field_type.fixed_width().unwrap_or(1) * 2;
        match self.base {
            DisplayBase::Hex => format!("0x{value:0digits$x}"),
            DisplayBase::DecHex => format!("{value} (0x{value:0digits$x})"),
            DisplayBase::Dec | DisplayBase::None => value.to_string(),
        }
    }
}

/// Decoded value of a field node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    None,
    Bool(bool),
    UInt(u64),
    Int(i64),
    Bytes(Bytes),
    String(String),
    Ipv4(Ipv4Addr),
    Ipv6(Ipv6Addr),
    Ether([u8; 6]),
    /// Seconds since the Unix epoch.
    Time(i64),
}

impl FieldValue {
    pub fn as_uint(&self) -> Option<u64> {
        match self {
            FieldValue::UInt(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(v) => Some(v),
            _ => None,
        }
    }
}

const BYTES_DISPLAY_LIMIT: usize = 24;

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::None => Ok(()),
            FieldValue::Bool(v) => write!(f, "{}", if *v { "Set" } else { "Not set" }),
            FieldValue::UInt(v) => write!(f, "{v}"),
            FieldValue::Int(v) => write!(f, "{v}"),
            FieldValue::Bytes(bytes) => {
                for b in bytes.iter().take(BYTES_DISPLAY_LIMIT) {
                    write!(f, "{b:02x}")?;
                }
                if bytes.len() > BYTES_DISPLAY_LIMIT {
                    write!(f, "…")?;
                }
                Ok(())
            }
            FieldValue::String(v) => write!(f, "{v}"),
            FieldValue::Ipv4(v) => write!(f, "{v}"),
            FieldValue::Ipv6(v) => write!(f, "{v}"),
            FieldValue::Ether(octets) => {
                let parts: Vec<String> = octets.iter().map(|b| format!("{b:02x}")).collect();
                write!(f, "{}", parts.join(":"))
            }
            FieldValue::Time(secs) => {
                match OffsetDateTime::from_unix_timestamp(*secs)
                    .ok()
                    .and_then(|dt| dt.format(&Rfc3339).ok())
                {
                    Some(text) => write!(f, "{text}"),
                    None => write!(f, "{secs}"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{DisplayBase, Encoding, FieldDescriptor, FieldType, FieldValue};
    use crate::buffer::Buffer;
    use crate::error::DissectError;

    static PORT: FieldDescriptor = FieldDescriptor::new("Port", "t.port", FieldType::UInt16);
    static FLAGS: FieldDescriptor =
        FieldDescriptor::new("Flags", "t.flags", FieldType::UInt16).with_base(DisplayBase::Hex);
    static NIBBLE: FieldDescriptor =
        FieldDescriptor::new("Version", "t.version", FieldType::UInt8).with_bitmask(0xf0);
    static DELTA: FieldDescriptor = FieldDescriptor::new("Delta", "t.delta", FieldType::Int16);
    static STAMP: FieldDescriptor =
        FieldDescriptor::new("Stamp", "t.stamp", FieldType::AbsoluteTime);

    #[test]
    fn unsigned_fields_decode_with_encoding() {
        let buffer = Buffer::from_bytes(vec![0x15, 0x45]);
        let big = PORT.decode(&buffer, 0, 2, Encoding::BigEndian).unwrap();
        let little = PORT.decode(&buffer, 0, 2, Encoding::LittleEndian).unwrap();
        assert_eq!(big, FieldValue::UInt(5445));
        assert_eq!(little, FieldValue::UInt(0x4515));
    }

    #[test]
    fn width_mismatch_is_malformed() {
        let buffer = Buffer::from_bytes(vec![0u8; 4]);
        let err = PORT.decode(&buffer, 0, 3, Encoding::BigEndian).unwrap_err();
        assert!(matches!(err, DissectError::Malformed(_)));
    }

    #[test]
    fn bitmask_shifts_value() {
        let buffer = Buffer::from_bytes(vec![0x45]);
        let value = NIBBLE.decode(&buffer, 0, 1, Encoding::BigEndian).unwrap();
        assert_eq!(value, FieldValue::UInt(4));
    }

    #[test]
    fn signed_values_are_sign_extended() {
        let buffer = Buffer::from_bytes(vec![0xff, 0xfe]);
        let value = DELTA.decode(&buffer, 0, 2, Encoding::BigEndian).unwrap();
        assert_eq!(value, FieldValue::Int(-2));
    }

    #[test]
    fn hex_base_pads_to_field_width() {
        assert_eq!(FLAGS.format_value(&FieldValue::UInt(0x12)).unwrap(), "0x0012");
        assert_eq!(PORT.format_value(&FieldValue::UInt(80)).unwrap(), "80");
    }

    #[test]
    fn absolute_time_formats_as_rfc3339() {
        let buffer = Buffer::from_bytes(vec![0, 0, 0, 60]);
        let value = STAMP.decode(&buffer, 0, 4, Encoding::BigEndian).unwrap();
        assert_eq!(value.to_string(), "1970-01-01T00:01:00Z");
    }
}
