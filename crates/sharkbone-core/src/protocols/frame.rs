//! Frame: capture metadata and the link-layer dispatch.

use crate::buffer::Buffer;
use crate::dissect::{BindPolicy, KeyType, PacketContext, RegistrationError, RegistryBuilder};
use crate::error::DissectError;
use crate::tree::{FieldDescriptor, FieldType, FieldValue, ProtoTree};

pub const NAME: &str = "frame";
/// Table keyed by `LINKTYPE_*` value.
pub const LINK_TABLE: &str = "link.type";

pub static HF_FRAME: FieldDescriptor = FieldDescriptor::new("Frame", "frame", FieldType::Protocol);
pub static HF_NUMBER: FieldDescriptor =
    FieldDescriptor::new("Frame Number", "frame.number", FieldType::UInt64);
pub static HF_TIME: FieldDescriptor =
    FieldDescriptor::new("Arrival Time", "frame.time", FieldType::AbsoluteTime);
pub static HF_TIME_EPOCH: FieldDescriptor =
    FieldDescriptor::new("Epoch Arrival Time", "frame.time_epoch", FieldType::String);
pub static HF_LEN: FieldDescriptor =
    FieldDescriptor::new("Frame Length", "frame.len", FieldType::UInt32);
pub static HF_CAP_LEN: FieldDescriptor =
    FieldDescriptor::new("Capture Length", "frame.cap_len", FieldType::UInt32);
pub static HF_LINKTYPE: FieldDescriptor =
    FieldDescriptor::new("Link Type", "frame.linktype", FieldType::UInt32);
pub static HF_PROTOCOLS: FieldDescriptor =
    FieldDescriptor::new("Protocols in frame", "frame.protocols", FieldType::String);

static FIELDS: &[&FieldDescriptor] = &[
    &HF_FRAME,
    &HF_NUMBER,
    &HF_TIME,
    &HF_TIME_EPOCH,
    &HF_LEN,
    &HF_CAP_LEN,
    &HF_LINKTYPE,
    &HF_PROTOCOLS,
];

pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    let proto = builder.register_protocol("Frame", "FRAME", NAME)?;
    builder.register_fields(FIELDS)?;
    builder.register_table(LINK_TABLE, KeyType::Uint, BindPolicy::FirstWins)?;
    builder.register_fn(NAME, proto, dissect)?;
    Ok(())
}

fn dissect(
    buffer: &Buffer,
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
) -> Result<usize, DissectError> {
    let info = cx.frame().clone();
    let captured = buffer.captured_length();

    let item = tree.add_subtree(&HF_FRAME, buffer, 0, captured)?;
    let frame_node = {
        let mut sub = tree.child(item.node());
        sub.add_generated(&HF_NUMBER, buffer, 0, 0, FieldValue::UInt(info.number))?;
        if let Some(ts) = info.timestamp {
            sub.add_generated(&HF_TIME, buffer, 0, 0, FieldValue::Time(ts.floor() as i64))?;
            sub.add_generated(
                &HF_TIME_EPOCH,
                buffer,
                0,
                0,
                FieldValue::String(format!("{ts:.6}")),
            )?;
        }
        sub.add_generated(
            &HF_LEN,
            buffer,
            0,
            0,
            FieldValue::UInt(info.reported_length as u64),
        )?;
        sub.add_generated(&HF_CAP_LEN, buffer, 0, 0, FieldValue::UInt(captured as u64))?;
        sub.add_generated(&HF_LINKTYPE, buffer, 0, 0, FieldValue::UInt(info.linktype.into()))?;
        tree.finalize(item, captured)?
    };
    tree.append_text(
        frame_node,
        &format!(
            ": {} bytes on wire, {} bytes captured",
            info.reported_length, captured
        ),
    );
    cx.columns_mut().set_protocol("FRAME");

    let registry = cx.registry();
    registry.dispatch_or_fallback(
        LINK_TABLE,
        &[info.linktype.into()],
        None,
        buffer,
        cx,
        tree,
    )?;

    let path = cx.protocol_path();
    tree.child(frame_node)
        .add_generated(&HF_PROTOCOLS, buffer, 0, 0, FieldValue::String(path))?;
    Ok(buffer.reported_length())
}
