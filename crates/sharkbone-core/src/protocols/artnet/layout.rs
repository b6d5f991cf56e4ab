use std::ops::Range;

pub const UDP_PORT: u16 = 6454;
pub const ARTNET_ID: &[u8; 8] = b"Art-Net\0";

pub const ID_RANGE: Range<usize> = 0..8;
pub const OP_CODE_RANGE: Range<usize> = 8..10;
pub const PROT_VER_RANGE: Range<usize> = 10..12;
pub const SEQUENCE_OFFSET: usize = 12;
pub const PHYSICAL_OFFSET: usize = 13;
pub const UNIVERSE_RANGE: Range<usize> = 14..16;
pub const LENGTH_RANGE: Range<usize> = 16..18;
pub const DMX_DATA_OFFSET: usize = 18;
pub const DMX_MAX_SLOTS: usize = 512;

pub const OP_POLL: u16 = 0x2000;
pub const OP_POLL_REPLY: u16 = 0x2100;
pub const OP_DMX: u16 = 0x5000;
pub const OP_SYNC: u16 = 0x5200;

pub fn opcode_name(opcode: u16) -> Option<&'static str> {
    match opcode {
        OP_POLL => Some("ArtPoll"),
        OP_POLL_REPLY => Some("ArtPollReply"),
        OP_DMX => Some("ArtDmx"),
        OP_SYNC => Some("ArtSync"),
        _ => None,
    }
}
