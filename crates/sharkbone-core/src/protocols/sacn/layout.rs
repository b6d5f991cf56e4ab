use std::ops::Range;

pub const UDP_PORT: u16 = 5568;

pub const PREAMBLE_SIZE_RANGE: Range<usize> = 0..2;
pub const POSTAMBLE_SIZE_RANGE: Range<usize> = 2..4;
pub const ACN_PID_RANGE: Range<usize> = 4..16;

pub const ROOT_LAYER_OFFSET: usize = 16;
pub const ROOT_VECTOR_RANGE: Range<usize> = 18..22;
pub const CID_RANGE: Range<usize> = 22..38;

pub const FRAMING_LAYER_OFFSET: usize = 38;
pub const FRAMING_VECTOR_RANGE: Range<usize> = 40..44;
pub const SOURCE_NAME_RANGE: Range<usize> = 44..108;
pub const PRIORITY_OFFSET: usize = 108;
pub const SYNC_ADDRESS_RANGE: Range<usize> = 109..111;
pub const SEQUENCE_OFFSET: usize = 111;
pub const OPTIONS_OFFSET: usize = 112;
pub const UNIVERSE_RANGE: Range<usize> = 113..115;

pub const DMP_LAYER_OFFSET: usize = 115;
pub const DMP_VECTOR_OFFSET: usize = 117;
pub const DMP_ADDRESS_TYPE_OFFSET: usize = 118;
pub const DMP_FIRST_ADDRESS_RANGE: Range<usize> = 119..121;
pub const DMP_ADDRESS_INCREMENT_RANGE: Range<usize> = 121..123;
pub const DMP_PROPERTY_VALUE_COUNT_RANGE: Range<usize> = 123..125;
pub const START_CODE_OFFSET: usize = 125;
pub const DMX_DATA_OFFSET: usize = 126;
pub const DMX_MAX_SLOTS: usize = 512;

/// Low 12 bits of a layer's first two bytes: the PDU length.
pub const PDU_LENGTH_MASK: u16 = 0x0fff;

pub const ACN_PID: &[u8; 12] = b"ASC-E1.17\0\0\0";
pub const PREAMBLE_SIZE: u16 = 0x0010;
pub const POSTAMBLE_SIZE: u16 = 0x0000;
pub const ROOT_VECTOR_DATA: u32 = 0x0000_0004;
pub const FRAMING_VECTOR_DMX: u32 = 0x0000_0002;
pub const DMP_VECTOR_SET_PROPERTY: u8 = 0x02;
