//! Length-prefixed messages over TCP.
//!
//! Each message is a 4-byte big-endian length of what follows, then a type
//! byte, a 32-bit channel, and the body. Messages may span segments or share
//! one; the stream dissector frames them through
//! [`process_stream`](crate::reassembly::process_stream) and the message
//! dissector sees exactly one whole message.

use std::ops::Range;

use crate::buffer::{Buffer, ByteOrder};
use crate::dissect::{PacketContext, RegistrationError, RegistryBuilder};
use crate::error::DissectError;
use crate::reassembly;
use crate::tree::{Encoding, ExpertGroup, ExpertInfo, FieldDescriptor, FieldType, ProtoTree};

use super::tcp;

pub const NAME: &str = "lmsg";
pub const MESSAGE_DISSECTOR: &str = "lmsg.message";
pub const TCP_PORT: u16 = 5445;

pub const LENGTH_RANGE: Range<usize> = 0..4;
pub const TYPE_OFFSET: usize = 4;
pub const CHANNEL_RANGE: Range<usize> = 5..9;
pub const BODY_OFFSET: usize = 9;

pub const TYPE_HELLO: u8 = 1;
pub const TYPE_DATA: u8 = 2;
pub const TYPE_ACK: u8 = 3;
pub const TYPE_BYE: u8 = 4;

pub static HF_LMSG: FieldDescriptor = FieldDescriptor::new("Length-prefixed Message", "lmsg", FieldType::Protocol);
pub static HF_LENGTH: FieldDescriptor = FieldDescriptor::new("Length", "lmsg.length", FieldType::UInt32);
pub static HF_TYPE: FieldDescriptor = FieldDescriptor::new("Type", "lmsg.type", FieldType::UInt8);
pub static HF_CHANNEL: FieldDescriptor = FieldDescriptor::new("Channel", "lmsg.channel", FieldType::UInt32);
pub static HF_BODY: FieldDescriptor = FieldDescriptor::new("Body", "lmsg.body", FieldType::Bytes);

static FIELDS: &[&FieldDescriptor] = &[&HF_LMSG, &HF_LENGTH, &HF_TYPE, &HF_CHANNEL, &HF_BODY];

pub fn type_name(kind: u8) -> Option<&'static str> {
    match kind {
        TYPE_HELLO => Some("Hello"),
        TYPE_DATA => Some("Data"),
        TYPE_ACK => Some("Ack"),
        TYPE_BYE => Some("Bye"),
        _ => None,
    }
}

pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    let proto = builder.register_protocol("Length-prefixed Messages", "LMSG", NAME)?;
    builder.register_fields(FIELDS)?;
    let message = builder.register_fn(MESSAGE_DISSECTOR, proto, dissect_message)?;
    let stream = builder.register_fn(NAME, proto, move |buffer, cx, tree| {
        reassembly::process_stream(
            cx,
            tree,
            buffer,
            LENGTH_RANGE.end,
            message_length,
            &message,
        )
    })?;
    builder.bind(tcp::PORT_TABLE, TCP_PORT, &stream)?;
    Ok(())
}

/// Total length of the message starting at `offset`, length prefix included.
///
/// # Errors
/// `Desync` when the prefix is too small to hold the type and channel.
pub fn message_length(buffer: &Buffer, offset: usize) -> Result<usize, DissectError> {
    let declared = buffer.read_u32(offset + LENGTH_RANGE.start, ByteOrder::Big)? as usize;
    let total = declared.saturating_add(LENGTH_RANGE.end);
    if total < BODY_OFFSET {
        return Err(DissectError::desync(format!(
            "message length {declared} cannot hold a type and channel"
        )));
    }
    Ok(total)
}

fn dissect_message(
    buffer: &Buffer,
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
) -> Result<usize, DissectError> {
    let length = buffer.reported_length();
    if length < BODY_OFFSET {
        return Err(DissectError::malformed(format!(
            "message of {length} bytes is shorter than its {BODY_OFFSET}-byte header"
        )));
    }
    let kind = buffer.read_u8(TYPE_OFFSET)?;
    let channel = buffer.read_u32(CHANNEL_RANGE.start, ByteOrder::Big)?;
    let name = type_name(kind).unwrap_or("Unknown");

    let item = tree.add_subtree(&HF_LMSG, buffer, 0, BODY_OFFSET)?;
    {
        let mut sub = tree.child(item.node());
        sub.add_item(&HF_LENGTH, buffer, LENGTH_RANGE.start, 4, Encoding::BigEndian)?;
        let id = sub.add_item(&HF_TYPE, buffer, TYPE_OFFSET, 1, Encoding::BigEndian)?;
        sub.append_text(id, &format!(" ({name})"));
        if type_name(kind).is_none() {
            sub.add_expert(
                buffer,
                TYPE_OFFSET,
                1,
                ExpertInfo::warning(ExpertGroup::Protocol, format!("Unknown message type {kind}")),
            );
        }
        sub.add_item(&HF_CHANNEL, buffer, CHANNEL_RANGE.start, 4, Encoding::BigEndian)?;
        if length > BODY_OFFSET {
            sub.add_item(&HF_BODY, buffer, BODY_OFFSET, length - BODY_OFFSET, Encoding::Na)?;
        }
    }
    let node = tree.finalize(item, length)?;
    tree.append_text(node, &format!(", {name}, Channel {channel}"));

    let summary = format!("{name} ch={channel} len={}", length - BODY_OFFSET);
    let columns = cx.columns_mut();
    if columns.protocol == "LMSG" {
        columns.append_info(&format!(", {summary}"));
    } else {
        columns.set_protocol("LMSG");
        columns.set_info(summary);
    }
    Ok(length)
}

#[cfg(test)]
mod tests {
    use super::{message_length, type_name};
    use crate::buffer::Buffer;
    use crate::fixtures::lmsg_message;
    use crate::protocols::testing::run;
    use crate::tree::FieldValue;

    #[test]
    fn message_length_includes_the_prefix() {
        let buffer = Buffer::from_bytes(lmsg_message(2, 7, b"abc"));
        assert_eq!(message_length(&buffer, 0), Ok(12));
        let bad = Buffer::from_bytes(vec![0, 0, 0, 2, 1, 0]);
        assert!(matches!(message_length(&bad, 0), Err(crate::DissectError::Desync(_))));
    }

    #[test]
    fn several_messages_in_one_buffer() {
        let mut payload = lmsg_message(1, 9, b"");
        payload.extend_from_slice(&lmsg_message(2, 9, b"payload"));
        let len = payload.len();
        let out = run("lmsg", payload);
        assert_eq!(out.consumed, Some(len));
        assert_eq!(out.tree.find_all("lmsg").len(), 2);
        assert_eq!(out.tree.find_all("lmsg.body").len(), 1);
        assert_eq!(out.columns.info, "Hello ch=9 len=0, Data ch=9 len=7");
        assert_eq!(out.protocols, vec!["lmsg"]);
    }

    #[test]
    fn unknown_type_is_flagged_but_decoded() {
        let out = run("lmsg.message", lmsg_message(9, 1, b"x"));
        assert_eq!(type_name(9), None);
        assert_eq!(
            out.tree.first("lmsg.channel").map(|n| n.value().clone()),
            Some(FieldValue::UInt(1))
        );
        assert!(out.tree.experts().any(|(_, e)| e.message == "Unknown message type 9"));
    }
}
