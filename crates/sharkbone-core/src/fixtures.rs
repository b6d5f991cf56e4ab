//! Synthetic frames and captures for tests and the `capture_fixtures` binary.
//!
//! Payload builders produce well-formed messages of the shipped client
//! protocols; frame builders wrap them in Ethernet/IPv4/UDP or TCP with
//! `etherparse`; [`pcapng_bytes`] writes frames as a big-endian PCAPNG file
//! with one Ethernet interface.

use std::fs;
use std::path::Path;

use etherparse::PacketBuilder;
use thiserror::Error;

use crate::protocols::{artnet, lmsg, recs, sacn};
use crate::source::Frame;

pub const MAC_A: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x01];
pub const MAC_B: [u8; 6] = [0x02, 0x00, 0x00, 0x00, 0x00, 0x02];
pub const HOST_A: [u8; 4] = [10, 0, 0, 1];
pub const HOST_B: [u8; 4] = [10, 0, 0, 2];
/// Timestamp of the first fixture frame, in seconds.
pub const BASE_TIMESTAMP: f64 = 1_700_000_000.0;
pub const LMSG_CLIENT_PORT: u16 = 40000;
pub const LMSG_FIRST_SEQ: u32 = 1000;

const LINKTYPE_ETHERNET: u32 = 1;

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to build packet: {0}")]
    Build(String),
    #[error("failed to write {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
}

/// E1.31 data packet with correct layer lengths and a NUL-padded source name.
pub fn sacn_payload(universe: u16, sequence: u8, source_name: &str, slots: &[u8]) -> Vec<u8> {
    use sacn::layout;

    let length = slots.len().min(layout::DMX_MAX_SLOTS);
    let total = layout::DMX_DATA_OFFSET + length;
    let mut payload = vec![0u8; total];
    payload[layout::PREAMBLE_SIZE_RANGE].copy_from_slice(&layout::PREAMBLE_SIZE.to_be_bytes());
    payload[layout::POSTAMBLE_SIZE_RANGE].copy_from_slice(&layout::POSTAMBLE_SIZE.to_be_bytes());
    payload[layout::ACN_PID_RANGE].copy_from_slice(layout::ACN_PID);

    let layer = |offset: usize| (0x7000 | (total - offset) as u16).to_be_bytes();
    payload[layout::ROOT_LAYER_OFFSET..layout::ROOT_LAYER_OFFSET + 2]
        .copy_from_slice(&layer(layout::ROOT_LAYER_OFFSET));
    payload[layout::ROOT_VECTOR_RANGE].copy_from_slice(&layout::ROOT_VECTOR_DATA.to_be_bytes());
    for (idx, byte) in payload[layout::CID_RANGE].iter_mut().enumerate() {
        *byte = idx as u8;
    }

    payload[layout::FRAMING_LAYER_OFFSET..layout::FRAMING_LAYER_OFFSET + 2]
        .copy_from_slice(&layer(layout::FRAMING_LAYER_OFFSET));
    payload[layout::FRAMING_VECTOR_RANGE].copy_from_slice(&layout::FRAMING_VECTOR_DMX.to_be_bytes());
    let name = source_name.as_bytes();
    let name_len = name.len().min(layout::SOURCE_NAME_RANGE.len() - 1);
    payload[layout::SOURCE_NAME_RANGE.start..layout::SOURCE_NAME_RANGE.start + name_len]
        .copy_from_slice(&name[..name_len]);
    payload[layout::PRIORITY_OFFSET] = 100;
    payload[layout::SEQUENCE_OFFSET] = sequence;
    payload[layout::UNIVERSE_RANGE].copy_from_slice(&universe.to_be_bytes());

    payload[layout::DMP_LAYER_OFFSET..layout::DMP_LAYER_OFFSET + 2]
        .copy_from_slice(&layer(layout::DMP_LAYER_OFFSET));
    payload[layout::DMP_VECTOR_OFFSET] = layout::DMP_VECTOR_SET_PROPERTY;
    payload[layout::DMP_ADDRESS_TYPE_OFFSET] = 0xa1;
    payload[layout::DMP_ADDRESS_INCREMENT_RANGE].copy_from_slice(&1u16.to_be_bytes());
    payload[layout::DMP_PROPERTY_VALUE_COUNT_RANGE]
        .copy_from_slice(&(length as u16 + 1).to_be_bytes());
    payload[layout::START_CODE_OFFSET] = 0x00;
    payload[layout::DMX_DATA_OFFSET..].copy_from_slice(&slots[..length]);
    payload
}

/// ArtDmx packet; `slots` is written as given, so an oversized slice makes a
/// packet the dissector rejects.
pub fn artdmx_payload(universe: u16, sequence: u8, slots: &[u8]) -> Vec<u8> {
    use artnet::layout;

    let mut payload = vec![0u8; layout::DMX_DATA_OFFSET];
    payload[layout::ID_RANGE].copy_from_slice(layout::ARTNET_ID);
    payload[layout::OP_CODE_RANGE].copy_from_slice(&layout::OP_DMX.to_le_bytes());
    payload[layout::PROT_VER_RANGE].copy_from_slice(&14u16.to_be_bytes());
    payload[layout::SEQUENCE_OFFSET] = sequence;
    payload[layout::UNIVERSE_RANGE].copy_from_slice(&universe.to_le_bytes());
    payload[layout::LENGTH_RANGE].copy_from_slice(&(slots.len() as u16).to_be_bytes());
    payload.extend_from_slice(slots);
    payload
}

/// One length-prefixed message; the prefix counts everything after it.
pub fn lmsg_message(kind: u8, channel: u32, body: &[u8]) -> Vec<u8> {
    let declared = (lmsg::BODY_OFFSET - lmsg::LENGTH_RANGE.end + body.len()) as u32;
    let mut message = declared.to_be_bytes().to_vec();
    message.push(kind);
    message.extend_from_slice(&channel.to_be_bytes());
    message.extend_from_slice(body);
    message
}

pub fn recs_record(kind: u16, time: u32, data: &[u8]) -> Vec<u8> {
    let mut record = Vec::with_capacity(recs::RECORD_HEADER_LEN + data.len());
    record.extend_from_slice(&kind.to_be_bytes());
    record.extend_from_slice(&(data.len() as u16).to_be_bytes());
    record.extend_from_slice(&time.to_be_bytes());
    record.extend_from_slice(data);
    record
}

pub fn recs_payload(records: &[Vec<u8>]) -> Vec<u8> {
    let mut payload = recs::MAGIC.to_vec();
    for record in records {
        payload.extend_from_slice(record);
    }
    payload
}

/// Ethernet/IPv4/UDP frame from [`HOST_A`] to [`HOST_B`].
pub fn udp_frame(src_port: u16, dst_port: u16, payload: &[u8]) -> Result<Vec<u8>, FixtureError> {
    let builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
        .ipv4(HOST_A, HOST_B, 64)
        .udp(src_port, dst_port);
    let mut packet = Vec::<u8>::with_capacity(builder.size(payload.len()));
    builder
        .write(&mut packet, payload)
        .map_err(|err| FixtureError::Build(err.to_string()))?;
    Ok(packet)
}

/// TCP flags set on a fixture segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    pub syn: bool,
    pub fin: bool,
    pub psh: bool,
}

impl TcpFlags {
    pub const SYN: Self = Self {
        syn: true,
        fin: false,
        psh: false,
    };
    pub const FIN: Self = Self {
        syn: false,
        fin: true,
        psh: false,
    };
    pub const PSH: Self = Self {
        syn: false,
        fin: false,
        psh: true,
    };
}

/// Ethernet/IPv4/TCP segment from [`HOST_A`] to [`HOST_B`].
pub fn tcp_frame(
    src_port: u16,
    dst_port: u16,
    seq: u32,
    flags: TcpFlags,
    payload: &[u8],
) -> Result<Vec<u8>, FixtureError> {
    let mut builder = PacketBuilder::ethernet2(MAC_A, MAC_B)
        .ipv4(HOST_A, HOST_B, 64)
        .tcp(src_port, dst_port, seq, 64240);
    if flags.syn {
        builder = builder.syn();
    } else {
        builder = builder.ack(1);
    }
    if flags.psh {
        builder = builder.psh();
    }
    if flags.fin {
        builder = builder.fin();
    }
    let mut packet = Vec::<u8>::with_capacity(builder.size(payload.len()));
    builder
        .write(&mut packet, payload)
        .map_err(|err| FixtureError::Build(err.to_string()))?;
    Ok(packet)
}

fn numbered(packets: Vec<Vec<u8>>) -> Vec<Frame> {
    packets
        .into_iter()
        .enumerate()
        .map(|(idx, data)| {
            Frame::new(idx as u64 + 1, LINKTYPE_ETHERNET, data)
                .with_timestamp(BASE_TIMESTAMP + idx as f64 * 0.25)
        })
        .collect()
}

/// UDP capture touching every UDP client protocol, plus one malformed and one
/// truncated frame:
///
/// 1. ArtDmx on its port
/// 2. sACN on its port
/// 3. sACN on a foreign port (heuristic)
/// 4. record stream (heuristic)
/// 5. ArtDmx with 600 slots (malformed)
/// 6. unknown UDP payload (data)
/// 7. ArtDmx cut by the snapshot length
pub fn mixed_capture() -> Result<Vec<Frame>, FixtureError> {
    let artnet_port = artnet::layout::UDP_PORT;
    let sacn_port = sacn::layout::UDP_PORT;
    let truncated = udp_frame(artnet_port, artnet_port, &artdmx_payload(2, 7, &[0x55; 24]))?;

    let mut frames = numbered(vec![
        udp_frame(artnet_port, artnet_port, &artdmx_payload(1, 1, &[0, 64, 128, 255]))?,
        udp_frame(49152, sacn_port, &sacn_payload(1, 1, "desk", &[10, 20, 30]))?,
        udp_frame(49152, 6000, &sacn_payload(3, 9, "backup", &[1, 2]))?,
        udp_frame(
            7000,
            7001,
            &recs_payload(&[recs_record(1, 1_700_000_000, b"up"), recs_record(2, 1_700_000_001, b"")]),
        )?,
        udp_frame(artnet_port, artnet_port, &artdmx_payload(1, 2, &[0; 600]))?,
        udp_frame(50000, 9999, b"hello, world")?,
        truncated[..truncated.len() - 8].to_vec(),
    ]);
    if let Some(last) = frames.last_mut() {
        *last = last.clone().with_reported_length(truncated.len());
    }
    Ok(frames)
}

/// One TCP direction to the message port: SYN, a segment with one whole
/// message and the head of a second, the rest of the second, then FIN.
pub fn lmsg_capture() -> Result<Vec<Frame>, FixtureError> {
    let port = lmsg::TCP_PORT;
    let client = LMSG_CLIENT_PORT;
    let first = lmsg_message(lmsg::TYPE_HELLO, 1, b"");
    let second = lmsg_message(lmsg::TYPE_DATA, 1, b"spanning two segments");
    let split = 5;

    let mut segment = first.clone();
    segment.extend_from_slice(&second[..split]);
    let data_seq = LMSG_FIRST_SEQ + 1;
    let rest_seq = data_seq + segment.len() as u32;
    let fin_seq = rest_seq + (second.len() - split) as u32;

    Ok(numbered(vec![
        tcp_frame(client, port, LMSG_FIRST_SEQ, TcpFlags::SYN, &[])?,
        tcp_frame(client, port, data_seq, TcpFlags::PSH, &segment)?,
        tcp_frame(client, port, rest_seq, TcpFlags::PSH, &second[split..])?,
        tcp_frame(client, port, fin_seq, TcpFlags::FIN, &[])?,
    ]))
}

/// Big-endian PCAPNG: section header, one Ethernet interface with
/// microsecond timestamps, one enhanced packet block per frame.
pub fn pcapng_bytes(frames: &[Frame]) -> Vec<u8> {
    let mut output = Vec::new();
    output.extend_from_slice(&pcapng_block(0x0A0D_0D0A, &section_header_body()));
    output.extend_from_slice(&pcapng_block(1, &interface_desc_body()));
    for frame in frames {
        output.extend_from_slice(&pcapng_block(6, &enhanced_packet_body(frame)));
    }
    output
}

pub fn write_pcapng(path: &Path, frames: &[Frame]) -> Result<(), FixtureError> {
    let io = |source| FixtureError::Io {
        path: path.display().to_string(),
        source,
    };
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(io)?;
    }
    fs::write(path, pcapng_bytes(frames)).map_err(io)
}

fn pcapng_block(block_type: u32, body: &[u8]) -> Vec<u8> {
    let total_len = (8 + body.len() + 4) as u32;
    let mut block = Vec::with_capacity(total_len as usize);
    block.extend_from_slice(&block_type.to_be_bytes());
    block.extend_from_slice(&total_len.to_be_bytes());
    block.extend_from_slice(body);
    block.extend_from_slice(&total_len.to_be_bytes());
    block
}

fn section_header_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&0x1A2B_3C4Du32.to_be_bytes());
    body.extend_from_slice(&1u16.to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&(-1i64).to_be_bytes());
    body
}

fn interface_desc_body() -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(LINKTYPE_ETHERNET as u16).to_be_bytes());
    body.extend_from_slice(&0u16.to_be_bytes());
    body.extend_from_slice(&65535u32.to_be_bytes());
    body
}

fn enhanced_packet_body(frame: &Frame) -> Vec<u8> {
    let ts_us = frame
        .timestamp
        .map_or(0, |ts| (ts * 1_000_000.0).round() as u64);
    let ts_high = (ts_us >> 32) as u32;
    let ts_low = (ts_us & 0xFFFF_FFFF) as u32;
    let data = &frame.data;
    let mut body = Vec::new();
    body.extend_from_slice(&0u32.to_be_bytes());
    body.extend_from_slice(&ts_high.to_be_bytes());
    body.extend_from_slice(&ts_low.to_be_bytes());
    body.extend_from_slice(&(data.len() as u32).to_be_bytes());
    body.extend_from_slice(&(frame.reported_length as u32).to_be_bytes());
    body.extend_from_slice(data);
    let pad_len = (4 - (data.len() % 4)) % 4;
    body.extend(std::iter::repeat_n(0u8, pad_len));
    body
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lmsg_prefix_counts_the_rest() {
        let message = lmsg_message(2, 7, b"abc");
        assert_eq!(message.len(), 12);
        assert_eq!(&message[..4], &8u32.to_be_bytes());
    }

    #[test]
    fn sacn_layers_declare_their_extent() {
        let payload = sacn_payload(1, 1, "desk", &[1, 2, 3]);
        assert_eq!(payload.len(), 129);
        let flags_len = |offset: usize| u16::from_be_bytes([payload[offset], payload[offset + 1]]);
        assert_eq!(flags_len(16), 0x7000 | 113);
        assert_eq!(flags_len(38), 0x7000 | 91);
        assert_eq!(flags_len(115), 0x7000 | 14);
        assert_eq!(&payload[44..49], b"desk\0");
    }

    #[test]
    fn blocks_are_padded_to_four_bytes() {
        let frames = vec![Frame::new(1, 1, vec![0xaa; 5])];
        let bytes = pcapng_bytes(&frames);
        assert_eq!(bytes.len() % 4, 0);
        assert_eq!(&bytes[..4], &0x0A0D_0D0Au32.to_be_bytes());
    }

    #[test]
    fn truncated_frame_keeps_its_wire_length() {
        let frames = mixed_capture().expect("capture");
        let last = frames.last().expect("frame");
        assert_eq!(last.reported_length, last.captured_length() + 8);
    }
}
