//! Record stream over UDP.
//!
//! A datagram starts with the magic `RECS` and carries back-to-back records,
//! each `type: u16`, `length: u16` (of the data), `timestamp: u32` seconds,
//! then `length` bytes of data. Bytes too few to form a record header are
//! shown as a trailer. There is no well-known port; the protocol is found by
//! a heuristic on the magic.

use crate::buffer::{Buffer, ByteOrder};
use crate::dissect::{PacketContext, RegistrationError, RegistryBuilder};
use crate::error::DissectError;
use crate::tree::{DisplayBase, Encoding, FieldDescriptor, FieldType, FieldValue, ProtoTree};

use super::udp;

pub const NAME: &str = "recs";
pub const HEURISTIC: &str = "recs_udp";
pub const MAGIC: &[u8; 4] = b"RECS";
pub const RECORD_HEADER_LEN: usize = 8;

pub static HF_RECS: FieldDescriptor = FieldDescriptor::new("Record Stream", "recs", FieldType::Protocol);
pub static HF_MAGIC: FieldDescriptor = FieldDescriptor::new("Magic", "recs.magic", FieldType::String);
pub static HF_COUNT: FieldDescriptor =
    FieldDescriptor::new("Record count", "recs.count", FieldType::UInt32);
pub static HF_RECORD: FieldDescriptor = FieldDescriptor::new("Record", "recs.record", FieldType::None);
pub static HF_RECORD_TYPE: FieldDescriptor =
    FieldDescriptor::new("Type", "recs.record.type", FieldType::UInt16).with_base(DisplayBase::Hex);
pub static HF_RECORD_LENGTH: FieldDescriptor =
    FieldDescriptor::new("Length", "recs.record.length", FieldType::UInt16);
pub static HF_RECORD_TIME: FieldDescriptor =
    FieldDescriptor::new("Timestamp", "recs.record.time", FieldType::AbsoluteTime);
pub static HF_RECORD_DATA: FieldDescriptor =
    FieldDescriptor::new("Data", "recs.record.data", FieldType::Bytes);
pub static HF_TRAILER: FieldDescriptor = FieldDescriptor::new("Trailer", "recs.trailer", FieldType::Bytes);

static FIELDS: &[&FieldDescriptor] = &[
    &HF_RECS,
    &HF_MAGIC,
    &HF_COUNT,
    &HF_RECORD,
    &HF_RECORD_TYPE,
    &HF_RECORD_LENGTH,
    &HF_RECORD_TIME,
    &HF_RECORD_DATA,
    &HF_TRAILER,
];

pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    let proto = builder.register_protocol("Record Stream", "RECS", NAME)?;
    builder.register_fields(FIELDS)?;
    let handle = builder.register_fn(NAME, proto, dissect)?;
    builder.register_heuristic(
        udp::HEURISTICS,
        HEURISTIC,
        "Record stream over UDP",
        |buffer, _cx| has_magic(buffer),
        &handle,
    )?;
    Ok(())
}

pub fn has_magic(buffer: &Buffer) -> bool {
    buffer
        .get_contiguous_slice(0, MAGIC.len())
        .is_ok_and(|magic| magic == MAGIC)
}

fn dissect(
    buffer: &Buffer,
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
) -> Result<usize, DissectError> {
    if !has_magic(buffer) {
        return Ok(0);
    }
    cx.columns_mut().set_protocol("RECS");
    let end = buffer.reported_length();

    let item = tree.add_subtree(&HF_RECS, buffer, 0, MAGIC.len())?;
    let mut records = 0u32;
    {
        let mut sub = tree.child(item.node());
        sub.add_item(&HF_MAGIC, buffer, 0, MAGIC.len(), Encoding::Ascii)?;

        let mut pos = MAGIC.len();
        while pos < end {
            if end - pos < RECORD_HEADER_LEN {
                sub.add_item(&HF_TRAILER, buffer, pos, end - pos, Encoding::Na)?;
                break;
            }
            pos += record(buffer, pos, records, &mut sub)?;
            records += 1;
        }
        sub.add_generated(&HF_COUNT, buffer, 0, 0, FieldValue::UInt(records.into()))?;
    }
    let node = tree.finalize(item, end)?;
    tree.append_text(node, &format!(", {records} records"));

    cx.columns_mut().set_info(format!("Record stream, {records} records"));
    tracing::trace!(records, "record stream dissected");
    Ok(end)
}

/// One record at `offset`; returns its total size.
fn record(
    buffer: &Buffer,
    offset: usize,
    index: u32,
    tree: &mut ProtoTree<'_>,
) -> Result<usize, DissectError> {
    let kind = buffer.read_u16(offset, ByteOrder::Big)?;
    let length = usize::from(buffer.read_u16(offset + 2, ByteOrder::Big)?);

    let item = tree.add_subtree(&HF_RECORD, buffer, offset, RECORD_HEADER_LEN)?;
    {
        let mut sub = tree.child(item.node());
        sub.add_item(&HF_RECORD_TYPE, buffer, offset, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_RECORD_LENGTH, buffer, offset + 2, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_RECORD_TIME, buffer, offset + 4, 4, Encoding::BigEndian)?;
        if length > 0 {
            sub.add_item(
                &HF_RECORD_DATA,
                buffer,
                offset + RECORD_HEADER_LEN,
                length,
                Encoding::Na,
            )?;
        }
    }
    let size = RECORD_HEADER_LEN + length;
    let node = tree.finalize(item, size)?;
    tree.append_text(node, &format!(" #{index}: type 0x{kind:04x}, {length} bytes"));
    Ok(size)
}

#[cfg(test)]
mod tests {
    use crate::fixtures::{recs_payload, recs_record};
    use crate::protocols::testing::run;
    use crate::tree::FieldValue;

    #[test]
    fn records_become_subtrees() {
        let payload = recs_payload(&[
            recs_record(1, 1_700_000_000, b"abc"),
            recs_record(2, 1_700_000_001, b""),
        ]);
        let out = run("recs", payload);
        let records = out.tree.find_all("recs.record");
        assert_eq!(records.len(), 2);
        assert_eq!(out.tree.node(records[0]).length(), 11);
        assert_eq!(out.tree.node(records[1]).length(), 8);
        assert_eq!(
            out.tree.first("recs.record.time").map(|n| n.value().clone()),
            Some(FieldValue::Time(1_700_000_000))
        );
        assert_eq!(
            out.tree.first("recs.count").map(|n| n.value().clone()),
            Some(FieldValue::UInt(2))
        );
        assert!(out.tree.first("recs.trailer").is_none());
    }

    #[test]
    fn short_tail_is_a_trailer() {
        let mut payload = recs_payload(&[recs_record(1, 0, b"x")]);
        payload.extend_from_slice(&[0xde, 0xad]);
        let out = run("recs", payload);
        assert_eq!(out.tree.first("recs.trailer").map(|n| n.length()), Some(2));
    }

    #[test]
    fn record_running_past_the_datagram_is_malformed() {
        let mut payload = recs_payload(&[recs_record(1, 0, b"abcd")]);
        payload.truncate(payload.len() - 2);
        let out = run("recs", payload);
        assert!(out.tree.first("_ws.malformed").is_some());
        assert!(out.tree.first("recs.record.data").is_none());
    }

    #[test]
    fn missing_magic_is_declined() {
        let out = run("recs", b"NOPE\0\0\0\0".to_vec());
        assert_eq!(out.consumed, None);
    }
}
