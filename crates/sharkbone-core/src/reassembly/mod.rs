//! Streaming PDU reassembly.
//!
//! Turns the segments of a byte stream into discrete length-delimited
//! messages before they are dissected. The protocol supplies a function that
//! reads the total message length from a header of `min_header_length` bytes;
//! [`process_stream`] buffers partial messages per stream direction and hands
//! every complete message, as one contiguous buffer, to the message dissector.
//!
//! Messages that fit in one segment are subsets of the segment; messages that
//! span segments are composite buffers and appear as a "Reassembled PDU" data
//! source.
//!
//! Implausible lengths (zero, shorter than the header, above
//! `max_pdu_length`) desynchronize the stream: nothing more is buffered for
//! it and its later segments are shown as undecoded continuation data.

use crate::buffer::Buffer;
use crate::dissect::{DissectorHandle, PacketContext};
use crate::error::DissectError;
use crate::tree::{Encoding, FieldDescriptor, FieldType, FieldValue, ProtoTree};

mod stream;

pub use stream::{StreamKey, StreamTable};

use stream::{Pdu, SegmentRecord, Tail};

pub static HF_REASSEMBLED_LENGTH: FieldDescriptor = FieldDescriptor::new(
    "Reassembled PDU length",
    "reassembly.length",
    FieldType::UInt32,
);
pub static HF_CONTINUATION: FieldDescriptor =
    FieldDescriptor::new("Continuation data", "reassembly.continuation", FieldType::Bytes);

pub static FIELDS: &[&FieldDescriptor] = &[&HF_REASSEMBLED_LENGTH, &HF_CONTINUATION];

/// Frame the messages of the current segment and dissect every complete one
/// with `message_dissector`.
///
/// Without segment information in `cx` (or with reassembly disabled) the
/// buffer is split into messages on its own and a message running past its
/// end is dissected truncated.
///
/// Returns the bytes consumed, which is always the whole buffer.
///
/// # Errors
/// Only fatal errors from nested dissection, plus framing errors when the
/// buffer is dissected on its own.
pub fn process_stream<P>(
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
    buffer: &Buffer,
    min_header_length: usize,
    peek_message_length: P,
    message_dissector: &DissectorHandle,
) -> Result<usize, DissectError>
where
    P: Fn(&Buffer, usize) -> Result<usize, DissectError>,
{
    let config = &cx.registry().config().reassembly;
    let segment = match cx.segment() {
        Some(segment) if config.enabled => segment,
        _ => {
            return dissect_standalone(
                cx,
                tree,
                buffer,
                min_header_length,
                &peek_message_length,
                message_dissector,
            );
        }
    };

    let frame = cx.frame().number;
    let record = match cx.streams().record(&segment, frame) {
        Some(record) => record.clone(),
        None => {
            let record = cx.streams_mut().plan(
                &segment,
                frame,
                buffer,
                min_header_length,
                &peek_message_length,
                config,
            );
            cx.streams_mut().store(&segment, frame, record.clone());
            record
        }
    };
    apply(&record, cx, tree, buffer, Some(message_dissector))
}

/// Record the end of the current stream direction for a segment that
/// carries no payload (e.g. a bare FIN).
pub fn end_of_stream(
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
    buffer: &Buffer,
) -> Result<(), DissectError> {
    let Some(segment) = cx.segment() else {
        return Ok(());
    };
    let frame = cx.frame().number;
    let record = match cx.streams().record(&segment, frame) {
        Some(record) => record.clone(),
        None => {
            let record = cx.streams_mut().close(&segment, buffer.reported_length());
            cx.streams_mut().store(&segment, frame, record.clone());
            record
        }
    };
    apply(&record, cx, tree, buffer, None)?;
    Ok(())
}

fn apply(
    record: &SegmentRecord,
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
    buffer: &Buffer,
    message_dissector: Option<&DissectorHandle>,
) -> Result<usize, DissectError> {
    for note in &record.notes {
        tree.add_expert(buffer, note.offset, note.length, note.info.clone());
    }

    for pdu in &record.pdus {
        let Some(dissector) = message_dissector else {
            break;
        };
        let message = match pdu {
            Pdu::InSegment { offset, length } => buffer.subset(*offset, *length)?,
            Pdu::Reassembled {
                earlier,
                frames,
                length,
            } => {
                let mut parts = earlier.clone();
                parts.push(buffer.subset(record.skip, *length)?);
                let message = Buffer::composite(parts);
                cx.add_data_source("Reassembled PDU", &message);

                let frames: Vec<String> = frames
                    .iter()
                    .chain(std::iter::once(&cx.frame().number))
                    .map(u64::to_string)
                    .collect();
                let id = tree.add_generated(
                    &HF_REASSEMBLED_LENGTH,
                    &message,
                    0,
                    0,
                    FieldValue::UInt(message.reported_length() as u64),
                )?;
                tree.append_text(id, &format!(" (frames {})", frames.join(", ")));
                message
            }
        };
        if cx.call_dissector(dissector, &message, tree)?.is_none() {
            cx.call_data(&message, tree)?;
        }
    }

    let remaining = |offset: usize| buffer.remaining_captured(offset);
    match record.tail {
        Tail::Complete => {}
        Tail::Pending { offset } => {
            tree.add_text(
                buffer,
                offset,
                remaining(offset),
                "[Segment of a reassembled PDU]",
            )?;
            cx.columns_mut()
                .append_info(" [Segment of a reassembled PDU]");
        }
        Tail::Undecoded { offset } => {
            let offset = offset.min(buffer.captured_length());
            tree.add_item(
                &HF_CONTINUATION,
                buffer,
                offset,
                remaining(offset),
                Encoding::Na,
            )?;
            cx.columns_mut().append_info(" [Continuation]");
        }
        Tail::Retransmission => {
            tree.add_text(buffer, 0, remaining(0), "[Retransmitted data]")?;
            cx.columns_mut().append_info(" [Retransmission]");
        }
    }
    Ok(buffer.reported_length())
}

fn dissect_standalone<P>(
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
    buffer: &Buffer,
    min_header_length: usize,
    peek: &P,
    message_dissector: &DissectorHandle,
) -> Result<usize, DissectError>
where
    P: Fn(&Buffer, usize) -> Result<usize, DissectError>,
{
    let end = buffer.reported_length();
    let mut pos = 0;
    while pos < end {
        let remaining = end - pos;
        if remaining < min_header_length {
            let captured = buffer.remaining_captured(pos).min(remaining);
            tree.add_text(buffer, pos, captured, "[Incomplete message header]")?;
            break;
        }
        let total = peek(buffer, pos)?;
        if total == 0 || total < min_header_length {
            return Err(DissectError::desync(format!(
                "implausible message length {total}"
            )));
        }
        let message = buffer.subset_claimed(pos, total)?;
        if cx.call_dissector(message_dissector, &message, tree)?.is_none() {
            cx.call_data(&message, tree)?;
        }
        pos += message.reported_length();
    }
    Ok(end)
}
