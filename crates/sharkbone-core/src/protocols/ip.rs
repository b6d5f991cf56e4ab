//! IPv4 and IPv6, plus the raw-IP link type that picks between them.
//!
//! Both versions hand their payload to the shared `ip.proto` table. The
//! payload is cut to the length the header declares, so link-layer padding
//! never reaches the transport layer. IPv6 extension headers are not walked;
//! the next-header value of the fixed header is used as is.

use std::net::IpAddr;

use etherparse::{Ipv4HeaderSlice, Ipv6HeaderSlice};

use crate::buffer::{Buffer, ByteOrder};
use crate::dissect::{BindPolicy, KeyType, PacketContext, RegistrationError, RegistryBuilder};
use crate::error::DissectError;
use crate::tree::{DisplayBase, Encoding, FieldDescriptor, FieldType, FieldValue, ProtoTree};

use super::eth::ETHERTYPE_TABLE;
use super::frame::LINK_TABLE;

pub const PROTO_TABLE: &str = "ip.proto";
pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_IPV6: u16 = 0x86dd;
pub const LINKTYPE_RAW: u32 = 101;

const IPV4_MIN_HEADER: usize = 20;
const IPV6_HEADER: usize = 40;

pub static HF_IP: FieldDescriptor =
    FieldDescriptor::new("Internet Protocol Version 4", "ip", FieldType::Protocol);
pub static HF_VERSION: FieldDescriptor =
    FieldDescriptor::new("Version", "ip.version", FieldType::UInt8).with_bitmask(0xf0);
pub static HF_HDR_LEN: FieldDescriptor =
    FieldDescriptor::new("Header Length", "ip.hdr_len", FieldType::UInt8).with_bitmask(0x0f);
pub static HF_DSFIELD: FieldDescriptor =
    FieldDescriptor::new("Differentiated Services Field", "ip.dsfield", FieldType::UInt8)
        .with_base(DisplayBase::Hex);
pub static HF_LEN: FieldDescriptor = FieldDescriptor::new("Total Length", "ip.len", FieldType::UInt16);
pub static HF_ID: FieldDescriptor =
    FieldDescriptor::new("Identification", "ip.id", FieldType::UInt16).with_base(DisplayBase::DecHex);
pub static HF_FLAGS_DF: FieldDescriptor =
    FieldDescriptor::new("Don't fragment", "ip.flags.df", FieldType::Boolean).with_bitmask(0x4000);
pub static HF_FLAGS_MF: FieldDescriptor =
    FieldDescriptor::new("More fragments", "ip.flags.mf", FieldType::Boolean).with_bitmask(0x2000);
pub static HF_FRAG_OFFSET: FieldDescriptor =
    FieldDescriptor::new("Fragment Offset", "ip.frag_offset", FieldType::UInt16).with_bitmask(0x1fff);
pub static HF_TTL: FieldDescriptor = FieldDescriptor::new("Time to Live", "ip.ttl", FieldType::UInt8);
pub static HF_PROTO: FieldDescriptor = FieldDescriptor::new("Protocol", "ip.proto", FieldType::UInt8);
pub static HF_CHECKSUM: FieldDescriptor =
    FieldDescriptor::new("Header Checksum", "ip.checksum", FieldType::UInt16)
        .with_base(DisplayBase::Hex);
pub static HF_SRC: FieldDescriptor = FieldDescriptor::new("Source Address", "ip.src", FieldType::Ipv4);
pub static HF_DST: FieldDescriptor =
    FieldDescriptor::new("Destination Address", "ip.dst", FieldType::Ipv4);

pub static HF_IPV6: FieldDescriptor =
    FieldDescriptor::new("Internet Protocol Version 6", "ipv6", FieldType::Protocol);
pub static HF_IPV6_VERSION: FieldDescriptor =
    FieldDescriptor::new("Version", "ipv6.version", FieldType::UInt8).with_bitmask(0xf0);
pub static HF_IPV6_FLOW: FieldDescriptor =
    FieldDescriptor::new("Flow Label", "ipv6.flow", FieldType::UInt24)
        .with_base(DisplayBase::Hex)
        .with_bitmask(0x0f_ffff);
pub static HF_IPV6_PLEN: FieldDescriptor =
    FieldDescriptor::new("Payload Length", "ipv6.plen", FieldType::UInt16);
pub static HF_IPV6_NXT: FieldDescriptor =
    FieldDescriptor::new("Next Header", "ipv6.nxt", FieldType::UInt8);
pub static HF_IPV6_HLIM: FieldDescriptor =
    FieldDescriptor::new("Hop Limit", "ipv6.hlim", FieldType::UInt8);
pub static HF_IPV6_SRC: FieldDescriptor =
    FieldDescriptor::new("Source Address", "ipv6.src", FieldType::Ipv6);
pub static HF_IPV6_DST: FieldDescriptor =
    FieldDescriptor::new("Destination Address", "ipv6.dst", FieldType::Ipv6);

static FIELDS: &[&FieldDescriptor] = &[
    &HF_IP,
    &HF_VERSION,
    &HF_HDR_LEN,
    &HF_DSFIELD,
    &HF_LEN,
    &HF_ID,
    &HF_FLAGS_DF,
    &HF_FLAGS_MF,
    &HF_FRAG_OFFSET,
    &HF_TTL,
    &HF_PROTO,
    &HF_CHECKSUM,
    &HF_SRC,
    &HF_DST,
    &HF_IPV6,
    &HF_IPV6_VERSION,
    &HF_IPV6_FLOW,
    &HF_IPV6_PLEN,
    &HF_IPV6_NXT,
    &HF_IPV6_HLIM,
    &HF_IPV6_SRC,
    &HF_IPV6_DST,
];

pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    let ipv4 = builder.register_protocol("Internet Protocol Version 4", "IPv4", "ip")?;
    let ipv6 = builder.register_protocol("Internet Protocol Version 6", "IPv6", "ipv6")?;
    let raw = builder.register_protocol("Raw packet data", "Raw", "raw")?;
    builder.register_fields(FIELDS)?;
    builder.register_table(PROTO_TABLE, KeyType::Uint, BindPolicy::FirstWins)?;

    let ipv4 = builder.register_fn("ip", ipv4, dissect_ipv4)?;
    let ipv6 = builder.register_fn("ipv6", ipv6, dissect_ipv6)?;
    builder.bind(ETHERTYPE_TABLE, ETHERTYPE_IPV4, &ipv4)?;
    builder.bind(ETHERTYPE_TABLE, ETHERTYPE_IPV6, &ipv6)?;

    let raw = builder.register_fn("raw", raw, move |buffer, cx, tree| {
        let handle = match buffer.read_u8(0)? >> 4 {
            4 => &ipv4,
            6 => &ipv6,
            version => {
                return Err(DissectError::malformed(format!("unknown IP version {version}")));
            }
        };
        cx.columns_mut().set_protocol("Raw");
        cx.call_dissector(handle, buffer, tree)?;
        Ok(buffer.reported_length())
    })?;
    builder.bind(LINK_TABLE, LINKTYPE_RAW, &raw)?;
    Ok(())
}

fn dissect_ipv4(
    buffer: &Buffer,
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
) -> Result<usize, DissectError> {
    let header_len = usize::from(buffer.read_u8(0)? & 0x0f) * 4;
    if header_len < IPV4_MIN_HEADER {
        return Err(DissectError::malformed(format!(
            "IPv4 header length {header_len} is below {IPV4_MIN_HEADER}"
        )));
    }
    let header = Ipv4HeaderSlice::from_slice(buffer.get_contiguous_slice(0, header_len)?)
        .map_err(|err| DissectError::malformed(err.to_string()))?;
    let total_len = usize::from(header.total_len());
    if total_len < header_len {
        return Err(DissectError::malformed(format!(
            "IPv4 total length {total_len} is shorter than the header ({header_len})"
        )));
    }
    let source = header.source_addr();
    let destination = header.destination_addr();
    let protocol = buffer.read_u8(9)?;
    let fragment = buffer.read_u16(6, ByteOrder::Big)?;
    let more_fragments = fragment & 0x2000 != 0;
    let fragment_offset = fragment & 0x1fff;

    let item = tree.add_subtree(&HF_IP, buffer, 0, header_len)?;
    {
        let mut sub = tree.child(item.node());
        sub.add_item(&HF_VERSION, buffer, 0, 1, Encoding::BigEndian)?;
        let id = sub.add_item(&HF_HDR_LEN, buffer, 0, 1, Encoding::BigEndian)?;
        sub.append_text(id, &format!(" ({header_len} bytes)"));
        sub.add_item(&HF_DSFIELD, buffer, 1, 1, Encoding::BigEndian)?;
        sub.add_item(&HF_LEN, buffer, 2, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_ID, buffer, 4, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_FLAGS_DF, buffer, 6, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_FLAGS_MF, buffer, 6, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_FRAG_OFFSET, buffer, 6, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_TTL, buffer, 8, 1, Encoding::BigEndian)?;
        sub.add_item(&HF_PROTO, buffer, 9, 1, Encoding::BigEndian)?;
        sub.add_item(&HF_CHECKSUM, buffer, 10, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_SRC, buffer, 12, 4, Encoding::Na)?;
        sub.add_item(&HF_DST, buffer, 16, 4, Encoding::Na)?;
    }
    let node = tree.finalize(item, header_len)?;
    tree.append_text(node, &format!(", Src: {source}, Dst: {destination}"));

    cx.set_addresses(IpAddr::V4(source), IpAddr::V4(destination));
    let columns = cx.columns_mut();
    columns.set_protocol("IPv4");
    columns.set_source(source.to_string());
    columns.set_destination(destination.to_string());

    let payload = buffer.subset(header_len, total_len - header_len)?;
    if fragment_offset != 0 || more_fragments {
        cx.columns_mut().set_info(format!(
            "Fragmented IP protocol (proto={protocol}, off={})",
            usize::from(fragment_offset) * 8
        ));
        if fragment_offset != 0 {
            cx.call_data(&payload, tree)?;
            return Ok(buffer.reported_length());
        }
    }
    dispatch_payload(protocol, &payload, cx, tree)?;
    Ok(buffer.reported_length())
}

fn dissect_ipv6(
    buffer: &Buffer,
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
) -> Result<usize, DissectError> {
    let header = Ipv6HeaderSlice::from_slice(buffer.get_contiguous_slice(0, IPV6_HEADER)?)
        .map_err(|err| DissectError::malformed(err.to_string()))?;
    let payload_len = usize::from(header.payload_length());
    let next_header = header.next_header().0;
    let source = header.source_addr();
    let destination = header.destination_addr();

    let item = tree.add_subtree(&HF_IPV6, buffer, 0, IPV6_HEADER)?;
    {
        let mut sub = tree.child(item.node());
        sub.add_item(&HF_IPV6_VERSION, buffer, 0, 1, Encoding::BigEndian)?;
        sub.add_item(&HF_IPV6_FLOW, buffer, 1, 3, Encoding::BigEndian)?;
        sub.add_item(&HF_IPV6_PLEN, buffer, 4, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_IPV6_NXT, buffer, 6, 1, Encoding::BigEndian)?;
        sub.add_item(&HF_IPV6_HLIM, buffer, 7, 1, Encoding::BigEndian)?;
        sub.add_item(&HF_IPV6_SRC, buffer, 8, 16, Encoding::Na)?;
        sub.add_item(&HF_IPV6_DST, buffer, 24, 16, Encoding::Na)?;
    }
    let node = tree.finalize(item, IPV6_HEADER)?;
    tree.append_text(node, &format!(", Src: {source}, Dst: {destination}"));

    cx.set_addresses(IpAddr::V6(source), IpAddr::V6(destination));
    let columns = cx.columns_mut();
    columns.set_protocol("IPv6");
    columns.set_source(source.to_string());
    columns.set_destination(destination.to_string());

    let payload = buffer.subset(IPV6_HEADER, payload_len)?;
    dispatch_payload(next_header, &payload, cx, tree)?;
    Ok(buffer.reported_length())
}

fn dispatch_payload(
    protocol: u8,
    payload: &Buffer,
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
) -> Result<usize, DissectError> {
    let registry = cx.registry();
    registry.dispatch_or_fallback(PROTO_TABLE, &[protocol.into()], None, payload, cx, tree)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_fields_decode_through_their_masks() {
        let buffer = Buffer::from_bytes(vec![0x45, 0x00, 0x00, 0x14, 0x12, 0x34, 0x20, 0x05]);
        let df = HF_FLAGS_DF.decode(&buffer, 6, 2, Encoding::BigEndian).unwrap();
        let mf = HF_FLAGS_MF.decode(&buffer, 6, 2, Encoding::BigEndian).unwrap();
        let off = HF_FRAG_OFFSET.decode(&buffer, 6, 2, Encoding::BigEndian).unwrap();
        assert_eq!(df, FieldValue::Bool(false));
        assert_eq!(mf, FieldValue::Bool(true));
        assert_eq!(off, FieldValue::UInt(5));
        assert_eq!(
            HF_VERSION.decode(&buffer, 0, 1, Encoding::BigEndian).unwrap(),
            FieldValue::UInt(4)
        );
    }
}
