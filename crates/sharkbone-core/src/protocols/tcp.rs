//! Transmission Control Protocol.
//!
//! Decodes the header and hands the payload on with the segment's stream
//! identity and sequence number set in the packet context, so a protocol
//! above can use [`process_stream`](crate::reassembly::process_stream) to
//! frame its messages across segments. Options are shown as raw bytes.

use std::net::SocketAddr;

use etherparse::TcpHeaderSlice;

use crate::buffer::Buffer;
use crate::dissect::{
    BindPolicy, KeyType, PacketContext, RegistrationError, RegistryBuilder, SegmentInfo,
};
use crate::error::DissectError;
use crate::reassembly::{self, StreamKey};
use crate::tree::{DisplayBase, Encoding, FieldDescriptor, FieldType, FieldValue, ProtoTree};

use super::ip::PROTO_TABLE;
use super::port_keys;

pub const NAME: &str = "tcp";
pub const PORT_TABLE: &str = "tcp.port";
pub const HEURISTICS: &str = "tcp";
pub const IP_PROTO_TCP: u8 = 6;
const MIN_HEADER_LEN: usize = 20;

pub static HF_TCP: FieldDescriptor =
    FieldDescriptor::new("Transmission Control Protocol", "tcp", FieldType::Protocol);
pub static HF_SRCPORT: FieldDescriptor =
    FieldDescriptor::new("Source Port", "tcp.srcport", FieldType::UInt16);
pub static HF_DSTPORT: FieldDescriptor =
    FieldDescriptor::new("Destination Port", "tcp.dstport", FieldType::UInt16);
pub static HF_SEQ: FieldDescriptor =
    FieldDescriptor::new("Sequence Number", "tcp.seq", FieldType::UInt32);
pub static HF_ACK: FieldDescriptor =
    FieldDescriptor::new("Acknowledgment Number", "tcp.ack", FieldType::UInt32);
pub static HF_HDR_LEN: FieldDescriptor =
    FieldDescriptor::new("Header Length", "tcp.hdr_len", FieldType::UInt8).with_bitmask(0xf0);
pub static HF_FLAGS: FieldDescriptor = FieldDescriptor::new("Flags", "tcp.flags", FieldType::UInt16)
    .with_base(DisplayBase::Hex)
    .with_bitmask(0x0fff);
pub static HF_FLAG_URG: FieldDescriptor =
    FieldDescriptor::new("Urgent", "tcp.flags.urg", FieldType::Boolean).with_bitmask(0x020);
pub static HF_FLAG_ACK: FieldDescriptor =
    FieldDescriptor::new("Acknowledgment", "tcp.flags.ack", FieldType::Boolean).with_bitmask(0x010);
pub static HF_FLAG_PUSH: FieldDescriptor =
    FieldDescriptor::new("Push", "tcp.flags.push", FieldType::Boolean).with_bitmask(0x008);
pub static HF_FLAG_RESET: FieldDescriptor =
    FieldDescriptor::new("Reset", "tcp.flags.reset", FieldType::Boolean).with_bitmask(0x004);
pub static HF_FLAG_SYN: FieldDescriptor =
    FieldDescriptor::new("Syn", "tcp.flags.syn", FieldType::Boolean).with_bitmask(0x002);
pub static HF_FLAG_FIN: FieldDescriptor =
    FieldDescriptor::new("Fin", "tcp.flags.fin", FieldType::Boolean).with_bitmask(0x001);
pub static HF_WINDOW: FieldDescriptor =
    FieldDescriptor::new("Window", "tcp.window_size_value", FieldType::UInt16);
pub static HF_CHECKSUM: FieldDescriptor =
    FieldDescriptor::new("Checksum", "tcp.checksum", FieldType::UInt16).with_base(DisplayBase::Hex);
pub static HF_URGENT: FieldDescriptor =
    FieldDescriptor::new("Urgent Pointer", "tcp.urgent_pointer", FieldType::UInt16);
pub static HF_OPTIONS: FieldDescriptor = FieldDescriptor::new("Options", "tcp.options", FieldType::Bytes);
pub static HF_LEN: FieldDescriptor = FieldDescriptor::new("TCP Segment Len", "tcp.len", FieldType::UInt32);

static FIELDS: &[&FieldDescriptor] = &[
    &HF_TCP,
    &HF_SRCPORT,
    &HF_DSTPORT,
    &HF_SEQ,
    &HF_ACK,
    &HF_HDR_LEN,
    &HF_FLAGS,
    &HF_FLAG_URG,
    &HF_FLAG_ACK,
    &HF_FLAG_PUSH,
    &HF_FLAG_RESET,
    &HF_FLAG_SYN,
    &HF_FLAG_FIN,
    &HF_WINDOW,
    &HF_CHECKSUM,
    &HF_URGENT,
    &HF_OPTIONS,
    &HF_LEN,
];

static FLAG_FIELDS: &[&FieldDescriptor] = &[
    &HF_FLAG_URG,
    &HF_FLAG_ACK,
    &HF_FLAG_PUSH,
    &HF_FLAG_RESET,
    &HF_FLAG_SYN,
    &HF_FLAG_FIN,
];

pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    let proto = builder.register_protocol("Transmission Control Protocol", "TCP", NAME)?;
    builder.register_fields(FIELDS)?;
    builder.register_table(PORT_TABLE, KeyType::Uint, BindPolicy::Stack)?;
    let handle = builder.register_fn(NAME, proto, dissect)?;
    builder.bind(PROTO_TABLE, IP_PROTO_TCP, &handle)?;
    Ok(())
}

fn dissect(
    buffer: &Buffer,
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
) -> Result<usize, DissectError> {
    let header_len = usize::from(buffer.read_u8(12)? >> 4) * 4;
    if header_len < MIN_HEADER_LEN {
        return Err(DissectError::malformed(format!(
            "TCP header length {header_len} is below {MIN_HEADER_LEN}"
        )));
    }
    let header = TcpHeaderSlice::from_slice(buffer.get_contiguous_slice(0, header_len)?)
        .map_err(|err| DissectError::malformed(err.to_string()))?;
    let source = header.source_port();
    let destination = header.destination_port();
    let seq = header.sequence_number();
    let (syn, fin) = (header.syn(), header.fin());
    let payload_len = buffer.reported_length().saturating_sub(header_len);

    let item = tree.add_subtree(&HF_TCP, buffer, 0, header_len)?;
    {
        let mut sub = tree.child(item.node());
        sub.add_item(&HF_SRCPORT, buffer, 0, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_DSTPORT, buffer, 2, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_SEQ, buffer, 4, 4, Encoding::BigEndian)?;
        sub.add_item(&HF_ACK, buffer, 8, 4, Encoding::BigEndian)?;
        let id = sub.add_value(
            &HF_HDR_LEN,
            buffer,
            12,
            1,
            FieldValue::UInt(header_len as u64),
        )?;
        sub.append_text(id, " bytes");

        let flags = sub.add_subtree(&HF_FLAGS, buffer, 12, 2)?;
        {
            let mut bits = sub.child(flags.node());
            for field in FLAG_FIELDS {
                bits.add_item(field, buffer, 12, 2, Encoding::BigEndian)?;
            }
        }
        let flags = sub.finalize(flags, 2)?;
        sub.append_text(flags, &format!(" ({})", flag_names(&header)));

        sub.add_item(&HF_WINDOW, buffer, 14, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_CHECKSUM, buffer, 16, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_URGENT, buffer, 18, 2, Encoding::BigEndian)?;
        if header_len > MIN_HEADER_LEN {
            sub.add_item(
                &HF_OPTIONS,
                buffer,
                MIN_HEADER_LEN,
                header_len - MIN_HEADER_LEN,
                Encoding::Na,
            )?;
        }
        sub.add_generated(&HF_LEN, buffer, 0, 0, FieldValue::UInt(payload_len as u64))?;
    }
    let node = tree.finalize(item, header_len)?;
    tree.append_text(
        node,
        &format!(", Src Port: {source}, Dst Port: {destination}, Seq: {seq}, Len: {payload_len}"),
    );

    cx.set_ports(source, destination);
    let columns = cx.columns_mut();
    columns.set_protocol("TCP");
    columns.set_info(format!(
        "{source} → {destination} [{}] Seq={seq} Len={payload_len}",
        flag_names(&header)
    ));

    let segment = cx.addresses().map(|(src, dst)| SegmentInfo {
        stream: StreamKey::new(SocketAddr::new(src, source), SocketAddr::new(dst, destination)),
        seq: seq.wrapping_add(u32::from(syn)),
        fin,
    });
    let payload = buffer.subset_remaining(header_len)?;
    if payload.reported_length() == 0 {
        if fin && segment.is_some() {
            cx.set_segment(segment);
            let closed = reassembly::end_of_stream(cx, tree, &payload);
            cx.set_segment(None);
            closed?;
        }
        return Ok(buffer.reported_length());
    }

    cx.set_segment(segment);
    let registry = cx.registry();
    let dispatched = registry.dispatch_or_fallback(
        PORT_TABLE,
        &port_keys(source, destination),
        Some(HEURISTICS),
        &payload,
        cx,
        tree,
    );
    cx.set_segment(None);
    dispatched?;
    Ok(buffer.reported_length())
}

fn flag_names(header: &TcpHeaderSlice<'_>) -> String {
    let names: Vec<&str> = [
        (header.syn(), "SYN"),
        (header.fin(), "FIN"),
        (header.rst(), "RST"),
        (header.psh(), "PSH"),
        (header.ack(), "ACK"),
        (header.urg(), "URG"),
    ]
    .into_iter()
    .filter_map(|(set, name)| set.then_some(name))
    .collect();
    if names.is_empty() {
        "<None>".to_string()
    } else {
        names.join(", ")
    }
}
