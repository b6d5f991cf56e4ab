use std::io::{Read, Seek, SeekFrom};

use super::error::PcapSourceError;
use super::layout;

/// Per-interface details from a PCAPNG interface description block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    pub linktype: u32,
    /// Raw `if_tsresol` option value.
    pub ts_resolution: u8,
}

impl Default for Interface {
    fn default() -> Self {
        Self {
            linktype: layout::LINKTYPE_ETHERNET,
            ts_resolution: 6,
        }
    }
}

/// Read the magic bytes and rewind the reader to the start.
///
/// # Errors
/// Returns `PcapSourceError` when the reader cannot be read or rewound.
pub fn read_magic_and_rewind<R: Read + Seek>(reader: &mut R) -> Result<[u8; 4], PcapSourceError> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    reader.seek(SeekFrom::Start(0))?;
    Ok(magic)
}

pub fn is_pcapng_magic(magic: &[u8; 4]) -> bool {
    magic == &layout::PCAPNG_MAGIC
}

/// Interface a packet refers to; unknown ids fall back to microsecond
/// Ethernet.
pub fn interface_for(interfaces: &[Interface], if_id: u32) -> Interface {
    interfaces.get(if_id as usize).copied().unwrap_or_default()
}

/// Packet bytes without record padding.
pub fn captured_slice(data: &[u8], caplen: u32) -> &[u8] {
    &data[..data.len().min(caplen as usize)]
}

/// Ticks per second for an `if_tsresol` value: a power of ten, or of two
/// when the high bit is set.
pub fn ts_units_per_second(ts_resolution: u8) -> u64 {
    let exponent = u32::from(ts_resolution & 0x7f);
    if ts_resolution & 0x80 == 0 {
        10u64.checked_pow(exponent).unwrap_or(u64::MAX)
    } else {
        2u64.checked_pow(exponent).unwrap_or(u64::MAX)
    }
}

/// Convert a PCAPNG high/low timestamp to seconds.
pub fn pcapng_ts_to_seconds(ts_high: u32, ts_low: u32, ts_resolution: u8) -> f64 {
    let ts = ((ts_high as u64) << 32) | (ts_low as u64);
    let units = ts_units_per_second(ts_resolution);
    (ts / units) as f64 + (ts % units) as f64 / units as f64
}

pub fn legacy_ts_to_seconds(ts_sec: u32, ts_fraction: u32, nanoseconds: bool) -> f64 {
    let scale = if nanoseconds { 1e-9 } else { 1e-6 };
    ts_sec as f64 + ts_fraction as f64 * scale
}

#[cfg(test)]
mod tests {
    use super::{
        Interface, captured_slice, interface_for, is_pcapng_magic, legacy_ts_to_seconds,
        pcapng_ts_to_seconds, read_magic_and_rewind, ts_units_per_second,
    };
    use crate::source::pcap::error::PcapSourceError;
    use std::io::Cursor;
    use std::io::Read;

    #[test]
    fn detect_pcapng_magic() {
        let data = super::layout::PCAPNG_MAGIC;
        assert!(is_pcapng_magic(&data));
        assert!(!is_pcapng_magic(&[0xd4, 0xc3, 0xb2, 0xa1]));
    }

    #[test]
    fn read_magic_rewinds() {
        let bytes = [0x0a, 0x0d, 0x0d, 0x0a, 0x01];
        let mut cursor = Cursor::new(bytes);
        let magic = read_magic_and_rewind(&mut cursor).unwrap();
        assert_eq!(magic, [0x0a, 0x0d, 0x0d, 0x0a]);
        let mut buf = [0u8; 1];
        cursor.read_exact(&mut buf).unwrap();
        assert_eq!(buf[0], 0x0a);
    }

    #[test]
    fn read_magic_too_short() {
        let bytes = [0x0a, 0x0d, 0x0d];
        let mut cursor = Cursor::new(bytes);
        let err = read_magic_and_rewind(&mut cursor).unwrap_err();
        assert!(matches!(err, PcapSourceError::Io(_)));
    }

    #[test]
    fn unknown_interface_defaults_to_ethernet_microseconds() {
        let interfaces = [Interface {
            linktype: 101,
            ts_resolution: 9,
        }];
        assert_eq!(interface_for(&interfaces, 0).linktype, 101);
        assert_eq!(interface_for(&interfaces, 1), Interface::default());
    }

    #[test]
    fn timestamps_honour_the_resolution() {
        assert!((pcapng_ts_to_seconds(0, 1_500_000, 6) - 1.5).abs() < f64::EPSILON);
        assert!((pcapng_ts_to_seconds(0, 2_250_000_000, 9) - 2.25).abs() < 1e-9);
        assert_eq!(ts_units_per_second(0x80 | 10), 1024);
        assert!((legacy_ts_to_seconds(3, 500_000_000, true) - 3.5).abs() < 1e-9);
    }

    #[test]
    fn record_padding_is_dropped() {
        assert_eq!(captured_slice(&[1, 2, 3, 0], 3), &[1, 2, 3]);
        assert_eq!(captured_slice(&[1, 2], 8), &[1, 2]);
    }
}
