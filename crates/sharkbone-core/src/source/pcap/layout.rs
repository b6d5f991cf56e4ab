//! PCAP/PCAPNG file constants.

/// Section header block type, which is also the file magic of PCAPNG.
pub const PCAPNG_MAGIC: [u8; 4] = [0x0a, 0x0d, 0x0d, 0x0a];

/// Read buffer handed to the `pcap-parser` readers.
pub const PCAP_READER_BUFFER_SIZE: usize = 64 * 1024;

/// `LINKTYPE_ETHERNET`, assumed when a packet names no known interface.
pub const LINKTYPE_ETHERNET: u32 = 1;
