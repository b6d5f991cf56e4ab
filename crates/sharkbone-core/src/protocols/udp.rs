//! User Datagram Protocol.

use etherparse::UdpHeaderSlice;

use crate::buffer::Buffer;
use crate::dissect::{BindPolicy, KeyType, PacketContext, RegistrationError, RegistryBuilder};
use crate::error::DissectError;
use crate::tree::{DisplayBase, Encoding, FieldDescriptor, FieldType, ProtoTree};

use super::ip::PROTO_TABLE;
use super::port_keys;

pub const NAME: &str = "udp";
pub const PORT_TABLE: &str = "udp.port";
/// Heuristic list tried when no port matches.
pub const HEURISTICS: &str = "udp";
pub const IP_PROTO_UDP: u8 = 17;
const HEADER_LEN: usize = 8;

pub static HF_UDP: FieldDescriptor =
    FieldDescriptor::new("User Datagram Protocol", "udp", FieldType::Protocol);
pub static HF_SRCPORT: FieldDescriptor =
    FieldDescriptor::new("Source Port", "udp.srcport", FieldType::UInt16);
pub static HF_DSTPORT: FieldDescriptor =
    FieldDescriptor::new("Destination Port", "udp.dstport", FieldType::UInt16);
pub static HF_LENGTH: FieldDescriptor = FieldDescriptor::new("Length", "udp.length", FieldType::UInt16);
pub static HF_CHECKSUM: FieldDescriptor =
    FieldDescriptor::new("Checksum", "udp.checksum", FieldType::UInt16).with_base(DisplayBase::Hex);

static FIELDS: &[&FieldDescriptor] = &[&HF_UDP, &HF_SRCPORT, &HF_DSTPORT, &HF_LENGTH, &HF_CHECKSUM];

pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    let proto = builder.register_protocol("User Datagram Protocol", "UDP", NAME)?;
    builder.register_fields(FIELDS)?;
    builder.register_table(PORT_TABLE, KeyType::Uint, BindPolicy::Stack)?;
    let handle = builder.register_fn(NAME, proto, dissect)?;
    builder.bind(PROTO_TABLE, IP_PROTO_UDP, &handle)?;
    Ok(())
}

fn dissect(
    buffer: &Buffer,
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
) -> Result<usize, DissectError> {
    let header = UdpHeaderSlice::from_slice(buffer.get_contiguous_slice(0, HEADER_LEN)?)
        .map_err(|err| DissectError::malformed(err.to_string()))?;
    let source = header.source_port();
    let destination = header.destination_port();
    let length = usize::from(header.length());
    if length < HEADER_LEN {
        return Err(DissectError::malformed(format!(
            "UDP length {length} is shorter than the header"
        )));
    }

    let item = tree.add_subtree(&HF_UDP, buffer, 0, HEADER_LEN)?;
    {
        let mut sub = tree.child(item.node());
        sub.add_item(&HF_SRCPORT, buffer, 0, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_DSTPORT, buffer, 2, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_LENGTH, buffer, 4, 2, Encoding::BigEndian)?;
        sub.add_item(&HF_CHECKSUM, buffer, 6, 2, Encoding::BigEndian)?;
    }
    let node = tree.finalize(item, HEADER_LEN)?;
    tree.append_text(node, &format!(", Src Port: {source}, Dst Port: {destination}"));

    cx.set_ports(source, destination);
    let columns = cx.columns_mut();
    columns.set_protocol("UDP");
    columns.set_info(format!(
        "{source} → {destination} Len={}",
        length - HEADER_LEN
    ));

    let payload = buffer.subset(HEADER_LEN, length - HEADER_LEN)?;
    let registry = cx.registry();
    registry.dispatch_or_fallback(
        PORT_TABLE,
        &port_keys(source, destination),
        Some(HEURISTICS),
        &payload,
        cx,
        tree,
    )?;
    Ok(buffer.reported_length())
}
