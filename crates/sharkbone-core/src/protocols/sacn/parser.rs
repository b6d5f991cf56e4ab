use crate::buffer::{Buffer, ByteOrder};
use crate::dissect::PacketContext;
use crate::error::DissectError;
use crate::tree::{Encoding, ProtoTree};

use super::error::SacnError;
use super::layout;
use super::{
    HF_ADDRESS_INCREMENT, HF_ADDRESS_TYPE, HF_CID, HF_DATA, HF_DMP, HF_DMP_LENGTH, HF_DMP_VECTOR,
    HF_FIRST_ADDRESS, HF_FRAMING, HF_FRAMING_LENGTH, HF_FRAMING_VECTOR, HF_OPTIONS, HF_PID,
    HF_POSTAMBLE, HF_PREAMBLE, HF_PRIORITY, HF_ROOT, HF_ROOT_LENGTH, HF_ROOT_VECTOR, HF_SACN,
    HF_SEQUENCE, HF_SOURCE_NAME, HF_START_CODE, HF_SYNC_ADDRESS, HF_UNIVERSE, HF_VALUE_COUNT,
};

/// Preamble, postamble, and packet identifier match, on captured bytes.
pub fn has_acn_header(buffer: &Buffer) -> bool {
    let Ok(header) = buffer.get_contiguous_slice(0, layout::ACN_PID_RANGE.end) else {
        return false;
    };
    header[layout::PREAMBLE_SIZE_RANGE] == layout::PREAMBLE_SIZE.to_be_bytes()
        && header[layout::POSTAMBLE_SIZE_RANGE] == layout::POSTAMBLE_SIZE.to_be_bytes()
        && &header[layout::ACN_PID_RANGE] == layout::ACN_PID
}

struct DmxSummary {
    source_name: String,
    priority: u8,
    sequence: u8,
    universe: u16,
    slots: usize,
}

/// Dissect one sACN data packet. Returns 0 when the ACN header is absent.
pub fn dissect(
    buffer: &Buffer,
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
) -> Result<usize, DissectError> {
    if !has_acn_header(buffer) {
        return Ok(0);
    }
    if buffer.reported_length() < layout::DMX_DATA_OFFSET {
        return Err(SacnError::TooShort {
            needed: layout::DMX_DATA_OFFSET,
            actual: buffer.reported_length(),
        }
        .into());
    }
    cx.columns_mut().set_protocol("sACN");

    let root_len = pdu_length(buffer, layout::ROOT_LAYER_OFFSET)?;
    let packet = tree.add_subtree(&HF_SACN, buffer, 0, layout::ROOT_LAYER_OFFSET)?;
    let summary = {
        let mut top = tree.child(packet.node());
        top.add_item(&HF_PREAMBLE, buffer, layout::PREAMBLE_SIZE_RANGE.start, 2, Encoding::BigEndian)?;
        top.add_item(&HF_POSTAMBLE, buffer, layout::POSTAMBLE_SIZE_RANGE.start, 2, Encoding::BigEndian)?;
        top.add_item(&HF_PID, buffer, layout::ACN_PID_RANGE.start, layout::ACN_PID.len(), Encoding::Na)?;

        let root = top.add_subtree(
            &HF_ROOT,
            buffer,
            layout::ROOT_LAYER_OFFSET,
            layout::FRAMING_LAYER_OFFSET - layout::ROOT_LAYER_OFFSET,
        )?;
        let summary = root_layer(buffer, &mut top.child(root.node()))?;
        top.finalize(root, root_len)?;
        summary
    };
    let end = layout::ROOT_LAYER_OFFSET + root_len;
    let node = tree.finalize(packet, end)?;
    tree.append_text(
        node,
        &format!(", Universe {}, Seq {}", summary.universe, summary.sequence),
    );

    cx.columns_mut().set_info(format!(
        "sACN Data, Universe {}, Seq {}, Prio {}, Slots {}, Source \"{}\"",
        summary.universe, summary.sequence, summary.priority, summary.slots, summary.source_name
    ));
    Ok(end)
}

fn pdu_length(buffer: &Buffer, offset: usize) -> Result<usize, DissectError> {
    Ok(usize::from(buffer.read_u16(offset, ByteOrder::Big)? & layout::PDU_LENGTH_MASK))
}

fn root_layer(buffer: &Buffer, tree: &mut ProtoTree<'_>) -> Result<DmxSummary, DissectError> {
    tree.add_item(&HF_ROOT_LENGTH, buffer, layout::ROOT_LAYER_OFFSET, 2, Encoding::BigEndian)?;
    tree.add_item(&HF_ROOT_VECTOR, buffer, layout::ROOT_VECTOR_RANGE.start, 4, Encoding::BigEndian)?;
    let vector = buffer.read_u32(layout::ROOT_VECTOR_RANGE.start, ByteOrder::Big)?;
    if vector != layout::ROOT_VECTOR_DATA {
        return Err(SacnError::InvalidRootVector { value: vector }.into());
    }
    tree.add_item(&HF_CID, buffer, layout::CID_RANGE.start, layout::CID_RANGE.len(), Encoding::Na)?;

    let framing_len = pdu_length(buffer, layout::FRAMING_LAYER_OFFSET)?;
    let framing = tree.add_subtree(
        &HF_FRAMING,
        buffer,
        layout::FRAMING_LAYER_OFFSET,
        layout::DMP_LAYER_OFFSET - layout::FRAMING_LAYER_OFFSET,
    )?;
    let summary = framing_layer(buffer, &mut tree.child(framing.node()))?;
    let node = tree.finalize(framing, framing_len)?;
    tree.append_text(node, &format!(", Source: {}", summary.source_name));
    Ok(summary)
}

fn framing_layer(buffer: &Buffer, tree: &mut ProtoTree<'_>) -> Result<DmxSummary, DissectError> {
    tree.add_item(&HF_FRAMING_LENGTH, buffer, layout::FRAMING_LAYER_OFFSET, 2, Encoding::BigEndian)?;
    tree.add_item(&HF_FRAMING_VECTOR, buffer, layout::FRAMING_VECTOR_RANGE.start, 4, Encoding::BigEndian)?;
    let vector = buffer.read_u32(layout::FRAMING_VECTOR_RANGE.start, ByteOrder::Big)?;
    if vector != layout::FRAMING_VECTOR_DMX {
        return Err(SacnError::InvalidFramingVector { value: vector }.into());
    }
    tree.add_item(
        &HF_SOURCE_NAME,
        buffer,
        layout::SOURCE_NAME_RANGE.start,
        layout::SOURCE_NAME_RANGE.len(),
        Encoding::Ascii,
    )?;
    tree.add_item(&HF_PRIORITY, buffer, layout::PRIORITY_OFFSET, 1, Encoding::BigEndian)?;
    tree.add_item(&HF_SYNC_ADDRESS, buffer, layout::SYNC_ADDRESS_RANGE.start, 2, Encoding::BigEndian)?;
    tree.add_item(&HF_SEQUENCE, buffer, layout::SEQUENCE_OFFSET, 1, Encoding::BigEndian)?;
    tree.add_item(&HF_OPTIONS, buffer, layout::OPTIONS_OFFSET, 1, Encoding::BigEndian)?;
    tree.add_item(&HF_UNIVERSE, buffer, layout::UNIVERSE_RANGE.start, 2, Encoding::BigEndian)?;

    let source_name = buffer
        .read_string(layout::SOURCE_NAME_RANGE.start, layout::SOURCE_NAME_RANGE.len())?
        .trim()
        .to_string();
    let priority = buffer.read_u8(layout::PRIORITY_OFFSET)?;
    let sequence = buffer.read_u8(layout::SEQUENCE_OFFSET)?;
    let universe = buffer.read_u16(layout::UNIVERSE_RANGE.start, ByteOrder::Big)?;

    let dmp_len = pdu_length(buffer, layout::DMP_LAYER_OFFSET)?;
    let dmp = tree.add_subtree(
        &HF_DMP,
        buffer,
        layout::DMP_LAYER_OFFSET,
        layout::DMX_DATA_OFFSET - layout::DMP_LAYER_OFFSET,
    )?;
    let slots = dmp_layer(buffer, &mut tree.child(dmp.node()))?;
    let node = tree.finalize(dmp, dmp_len)?;
    tree.append_text(node, &format!(", {slots} slots"));

    Ok(DmxSummary {
        source_name,
        priority,
        sequence,
        universe,
        slots,
    })
}

/// Returns the number of DMX slots after the start code.
fn dmp_layer(buffer: &Buffer, tree: &mut ProtoTree<'_>) -> Result<usize, DissectError> {
    tree.add_item(&HF_DMP_LENGTH, buffer, layout::DMP_LAYER_OFFSET, 2, Encoding::BigEndian)?;
    tree.add_item(&HF_DMP_VECTOR, buffer, layout::DMP_VECTOR_OFFSET, 1, Encoding::BigEndian)?;
    let vector = buffer.read_u8(layout::DMP_VECTOR_OFFSET)?;
    if vector != layout::DMP_VECTOR_SET_PROPERTY {
        return Err(SacnError::InvalidDmpVector { value: vector }.into());
    }
    tree.add_item(&HF_ADDRESS_TYPE, buffer, layout::DMP_ADDRESS_TYPE_OFFSET, 1, Encoding::BigEndian)?;
    tree.add_item(&HF_FIRST_ADDRESS, buffer, layout::DMP_FIRST_ADDRESS_RANGE.start, 2, Encoding::BigEndian)?;
    tree.add_item(
        &HF_ADDRESS_INCREMENT,
        buffer,
        layout::DMP_ADDRESS_INCREMENT_RANGE.start,
        2,
        Encoding::BigEndian,
    )?;
    tree.add_item(
        &HF_VALUE_COUNT,
        buffer,
        layout::DMP_PROPERTY_VALUE_COUNT_RANGE.start,
        2,
        Encoding::BigEndian,
    )?;
    let count = buffer.read_u16(layout::DMP_PROPERTY_VALUE_COUNT_RANGE.start, ByteOrder::Big)?;
    if count == 0 {
        return Err(SacnError::InvalidPropertyValueCount { count }.into());
    }
    let slots = usize::from(count) - 1;
    if slots > layout::DMX_MAX_SLOTS {
        return Err(SacnError::InvalidDmxLength { length: slots }.into());
    }
    tree.add_item(&HF_START_CODE, buffer, layout::START_CODE_OFFSET, 1, Encoding::BigEndian)?;
    if slots > 0 {
        tree.add_item(&HF_DATA, buffer, layout::DMX_DATA_OFFSET, slots, Encoding::Na)?;
    }
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::has_acn_header;
    use crate::buffer::Buffer;
    use crate::fixtures::sacn_payload;
    use crate::protocols::testing::run;
    use crate::tree::FieldValue;

    #[test]
    fn layers_are_nested_with_their_declared_lengths() {
        let payload = sacn_payload(7, 42, "desk", &[10, 20, 30]);
        let len = payload.len();
        let out = run("sacn", payload);
        assert_eq!(out.consumed, Some(len));

        let node = |abbrev: &str| out.tree.first(abbrev).expect(abbrev);
        assert_eq!((node("sacn").offset(), node("sacn").length()), (0, len));
        assert_eq!((node("sacn.root").offset(), node("sacn.root").length()), (16, len - 16));
        assert_eq!((node("sacn.framing").offset(), node("sacn.framing").length()), (38, len - 38));
        assert_eq!((node("sacn.dmp").offset(), node("sacn.dmp").length()), (115, len - 115));
        assert_eq!(node("sacn.universe").value(), &FieldValue::UInt(7));
        assert_eq!(node("sacn.sequence").value(), &FieldValue::UInt(42));
        assert_eq!(node("sacn.source_name").value(), &FieldValue::String("desk".into()));
        assert_eq!(node("sacn.data").length(), 3);
        assert!(out.columns.info.contains("Universe 7"));
    }

    #[test]
    fn short_layer_length_is_malformed() {
        let mut payload = sacn_payload(1, 1, "desk", &[1, 2, 3, 4]);
        // DMP layer claims fewer bytes than its fields occupy.
        payload[115..117].copy_from_slice(&(0x7000u16 | 5).to_be_bytes());
        let out = run("sacn", payload);
        assert!(out.tree.first("_ws.malformed").is_some());
        assert_eq!(out.protocols, vec!["sacn"]);
    }

    #[test]
    fn wrong_dmp_vector_is_malformed() {
        let mut payload = sacn_payload(1, 1, "desk", &[1]);
        payload[117] = 0x01;
        let out = run("sacn", payload);
        let expert = out
            .tree
            .experts()
            .map(|(_, info)| info.message.clone())
            .next()
            .unwrap_or_default();
        assert!(expert.contains("invalid DMP vector"), "{expert}");
    }

    #[test]
    fn probe_needs_the_packet_identifier() {
        let payload = sacn_payload(1, 1, "desk", &[1]);
        assert!(has_acn_header(&Buffer::from_bytes(payload.clone())));
        let mut other = payload;
        other[4] = b'X';
        assert!(!has_acn_header(&Buffer::from_bytes(other)));
        assert!(!has_acn_header(&Buffer::from_bytes(vec![0, 0x10])));
    }
}
