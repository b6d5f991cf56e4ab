use crate::buffer::{Buffer, ByteOrder};
use crate::dissect::PacketContext;
use crate::error::DissectError;
use crate::tree::{Encoding, ProtoTree};

use super::error::ArtNetError;
use super::layout;
use super::{
    HF_ARTNET, HF_DATA, HF_ID, HF_LENGTH, HF_OPCODE, HF_PAYLOAD, HF_PHYSICAL, HF_PROT_VER,
    HF_SEQUENCE, HF_UNIVERSE,
};

/// Signature check on the captured bytes; short or foreign payloads are not
/// Art-Net.
pub fn has_signature(buffer: &Buffer) -> bool {
    buffer
        .get_contiguous_slice(0, layout::ARTNET_ID.len())
        .is_ok_and(|id| id == layout::ARTNET_ID)
}

/// Dissect one Art-Net packet. Returns 0 when the signature does not match.
pub fn dissect(
    buffer: &Buffer,
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
) -> Result<usize, DissectError> {
    if !has_signature(buffer) {
        return Ok(0);
    }
    let opcode = buffer.read_u16(layout::OP_CODE_RANGE.start, ByteOrder::Little)?;
    let name = layout::opcode_name(opcode).unwrap_or("Unknown");
    cx.columns_mut().set_protocol("ARTNET");
    cx.columns_mut().set_info(format!("{name} (0x{opcode:04x})"));

    let item = tree.add_subtree(&HF_ARTNET, buffer, 0, layout::OP_CODE_RANGE.end)?;
    let end = {
        let mut sub = tree.child(item.node());
        sub.add_item(&HF_ID, buffer, 0, layout::ID_RANGE.end, Encoding::Ascii)?;
        let id = sub.add_item(&HF_OPCODE, buffer, layout::OP_CODE_RANGE.start, 2, Encoding::LittleEndian)?;
        sub.append_text(id, &format!(" ({name})"));

        if opcode == layout::OP_DMX {
            let summary = dissect_dmx(buffer, &mut sub)?;
            cx.columns_mut().append_info(&summary.info);
            summary.end
        } else {
            let rest = buffer.remaining_reported(layout::OP_CODE_RANGE.end);
            if rest > 0 {
                sub.add_item(&HF_PAYLOAD, buffer, layout::OP_CODE_RANGE.end, rest, Encoding::Na)?;
            }
            buffer.reported_length()
        }
    };
    let node = tree.finalize(item, end)?;
    tree.append_text(node, &format!(", Opcode: {name}"));
    Ok(end)
}

struct DmxSummary {
    end: usize,
    info: String,
}

fn dissect_dmx(buffer: &Buffer, tree: &mut ProtoTree<'_>) -> Result<DmxSummary, DissectError> {
    if buffer.reported_length() < layout::DMX_DATA_OFFSET {
        return Err(ArtNetError::TooShort {
            needed: layout::DMX_DATA_OFFSET,
            actual: buffer.reported_length(),
        }
        .into());
    }
    tree.add_item(&HF_PROT_VER, buffer, layout::PROT_VER_RANGE.start, 2, Encoding::BigEndian)?;
    tree.add_item(&HF_SEQUENCE, buffer, layout::SEQUENCE_OFFSET, 1, Encoding::BigEndian)?;
    tree.add_item(&HF_PHYSICAL, buffer, layout::PHYSICAL_OFFSET, 1, Encoding::BigEndian)?;
    tree.add_item(&HF_UNIVERSE, buffer, layout::UNIVERSE_RANGE.start, 2, Encoding::LittleEndian)?;
    tree.add_item(&HF_LENGTH, buffer, layout::LENGTH_RANGE.start, 2, Encoding::BigEndian)?;

    let sequence = buffer.read_u8(layout::SEQUENCE_OFFSET)?;
    let universe = buffer.read_u16(layout::UNIVERSE_RANGE.start, ByteOrder::Little)?;
    let length = buffer.read_u16(layout::LENGTH_RANGE.start, ByteOrder::Big)?;
    if length == 0 || usize::from(length) > layout::DMX_MAX_SLOTS {
        return Err(ArtNetError::InvalidLength { length }.into());
    }
    let data_len = usize::from(length);
    if buffer.reported_length() < layout::DMX_DATA_OFFSET + data_len {
        return Err(ArtNetError::TooShort {
            needed: layout::DMX_DATA_OFFSET + data_len,
            actual: buffer.reported_length(),
        }
        .into());
    }
    tree.add_item(&HF_DATA, buffer, layout::DMX_DATA_OFFSET, data_len, Encoding::Na)?;

    Ok(DmxSummary {
        end: layout::DMX_DATA_OFFSET + data_len,
        info: format!(", Universe {universe}, Seq {sequence}, Length {length}"),
    })
}

#[cfg(test)]
mod tests {
    use crate::protocols::artnet::layout;
    use crate::protocols::testing::run;
    use crate::tree::FieldValue;

    fn artdmx(universe: u16, sequence: u8, data: &[u8]) -> Vec<u8> {
        let mut payload = vec![0u8; layout::DMX_DATA_OFFSET];
        payload[layout::ID_RANGE].copy_from_slice(layout::ARTNET_ID);
        payload[layout::OP_CODE_RANGE].copy_from_slice(&layout::OP_DMX.to_le_bytes());
        payload[layout::PROT_VER_RANGE].copy_from_slice(&14u16.to_be_bytes());
        payload[layout::SEQUENCE_OFFSET] = sequence;
        payload[layout::UNIVERSE_RANGE].copy_from_slice(&universe.to_le_bytes());
        payload[layout::LENGTH_RANGE].copy_from_slice(&(data.len() as u16).to_be_bytes());
        payload.extend_from_slice(data);
        payload
    }

    #[test]
    fn artdmx_fields_are_decoded() {
        let out = run("artnet", artdmx(3, 0x12, &[1, 2, 3, 4]));
        assert_eq!(out.consumed, Some(layout::DMX_DATA_OFFSET + 4));
        let value = |abbrev: &str| out.tree.first(abbrev).map(|n| n.value().clone());
        assert_eq!(value("artnet.header.opcode"), Some(FieldValue::UInt(0x5000)));
        assert_eq!(value("artnet.output.universe"), Some(FieldValue::UInt(3)));
        assert_eq!(value("artnet.output.sequence"), Some(FieldValue::UInt(0x12)));
        assert_eq!(value("artnet.output.length"), Some(FieldValue::UInt(4)));
        assert_eq!(out.tree.first("artnet").map(|n| n.length()), Some(22));
        assert!(out.columns.info.starts_with("ArtDmx (0x5000)"));
    }

    #[test]
    fn foreign_payload_is_declined() {
        let out = run("artnet", vec![0u8; 32]);
        assert_eq!(out.consumed, None);
        assert!(out.tree.is_empty());
    }

    #[test]
    fn oversized_dmx_length_is_malformed() {
        let mut payload = artdmx(1, 1, &[0; 4]);
        payload[layout::LENGTH_RANGE].copy_from_slice(&513u16.to_be_bytes());
        let out = run("artnet", payload);
        assert!(out.tree.first("_ws.malformed").is_some());
        assert!(out.columns.info.contains("[Malformed Packet]"));
    }

    #[test]
    fn other_opcodes_keep_their_body_as_bytes() {
        let mut payload = layout::ARTNET_ID.to_vec();
        payload.extend_from_slice(&layout::OP_POLL.to_le_bytes());
        payload.extend_from_slice(&[0, 14, 0, 0]);
        let out = run("artnet", payload);
        assert!(out.columns.info.starts_with("ArtPoll"));
        assert_eq!(out.tree.first("artnet.payload").map(|n| n.length()), Some(4));
    }
}
