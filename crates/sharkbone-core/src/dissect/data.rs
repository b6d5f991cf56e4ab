//! Raw data dissector, the end of every fallback chain.

use crate::buffer::Buffer;
use crate::error::DissectError;
use crate::tree::{Encoding, FieldDescriptor, FieldType, FieldValue, ProtoTree};

use super::context::PacketContext;

pub const NAME: &str = "data";

pub static HF_DATA: FieldDescriptor = FieldDescriptor::new("Data", "data", FieldType::Protocol);
pub static HF_DATA_BYTES: FieldDescriptor =
    FieldDescriptor::new("Data", "data.data", FieldType::Bytes);
pub static HF_DATA_LEN: FieldDescriptor =
    FieldDescriptor::new("Length", "data.len", FieldType::UInt32);

pub static FIELDS: &[&FieldDescriptor] = &[&HF_DATA, &HF_DATA_BYTES, &HF_DATA_LEN];

pub(crate) fn dissect(
    buffer: &Buffer,
    _cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
) -> Result<usize, DissectError> {
    let reported = buffer.reported_length();
    if reported == 0 {
        return Ok(0);
    }
    let captured = buffer.captured_length();

    let item = tree.add_subtree(&HF_DATA, buffer, 0, captured)?;
    {
        let mut sub = tree.child(item.node());
        sub.add_item(&HF_DATA_BYTES, buffer, 0, captured, Encoding::Na)?;
        sub.add_generated(&HF_DATA_LEN, buffer, 0, 0, FieldValue::UInt(reported as u64))?;
    }
    let id = tree.finalize(item, captured)?;
    tree.append_text(id, &format!(" ({reported} bytes)"));
    Ok(reported)
}
