//! Ethernet II.

use etherparse::Ethernet2HeaderSlice;

use crate::buffer::Buffer;
use crate::dissect::{BindPolicy, KeyType, PacketContext, RegistrationError, RegistryBuilder};
use crate::error::DissectError;
use crate::tree::{DisplayBase, Encoding, FieldDescriptor, FieldType, FieldValue, ProtoTree};

use super::frame::LINK_TABLE;

pub const NAME: &str = "eth";
pub const ETHERTYPE_TABLE: &str = "ethertype";
pub const LINKTYPE_ETHERNET: u32 = 1;
const HEADER_LEN: usize = 14;

pub static HF_ETH: FieldDescriptor = FieldDescriptor::new("Ethernet II", "eth", FieldType::Protocol);
pub static HF_DST: FieldDescriptor = FieldDescriptor::new("Destination", "eth.dst", FieldType::Ether);
pub static HF_SRC: FieldDescriptor = FieldDescriptor::new("Source", "eth.src", FieldType::Ether);
pub static HF_TYPE: FieldDescriptor =
    FieldDescriptor::new("Type", "eth.type", FieldType::UInt16).with_base(DisplayBase::Hex);

static FIELDS: &[&FieldDescriptor] = &[&HF_ETH, &HF_DST, &HF_SRC, &HF_TYPE];

pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    let proto = builder.register_protocol("Ethernet II", "ETH", NAME)?;
    builder.register_fields(FIELDS)?;
    builder.register_table(ETHERTYPE_TABLE, KeyType::Uint, BindPolicy::FirstWins)?;
    let handle = builder.register_fn(NAME, proto, dissect)?;
    builder.bind(LINK_TABLE, LINKTYPE_ETHERNET, &handle)?;
    Ok(())
}

fn dissect(
    buffer: &Buffer,
    cx: &mut PacketContext<'_>,
    tree: &mut ProtoTree<'_>,
) -> Result<usize, DissectError> {
    let header = Ethernet2HeaderSlice::from_slice(buffer.get_contiguous_slice(0, HEADER_LEN)?)
        .map_err(|err| DissectError::malformed(err.to_string()))?;
    let ether_type = header.ether_type().0;
    let source = FieldValue::Ether(header.source()).to_string();
    let destination = FieldValue::Ether(header.destination()).to_string();

    let item = tree.add_subtree(&HF_ETH, buffer, 0, HEADER_LEN)?;
    {
        let mut sub = tree.child(item.node());
        sub.add_item(&HF_DST, buffer, 0, 6, Encoding::Na)?;
        sub.add_item(&HF_SRC, buffer, 6, 6, Encoding::Na)?;
        sub.add_item(&HF_TYPE, buffer, 12, 2, Encoding::BigEndian)?;
    }
    let node = tree.finalize(item, HEADER_LEN)?;
    tree.append_text(node, &format!(", Src: {source}, Dst: {destination}"));

    let columns = cx.columns_mut();
    columns.set_protocol("ETH");
    columns.set_source(source);
    columns.set_destination(destination);
    columns.set_info(format!("Ethernet II, type 0x{ether_type:04x}"));

    let payload = buffer.subset_remaining(HEADER_LEN)?;
    let registry = cx.registry();
    let consumed = registry.dispatch_or_fallback(
        ETHERTYPE_TABLE,
        &[ether_type.into()],
        None,
        &payload,
        cx,
        tree,
    )?;
    tracing::trace!(ether_type, consumed, "ethernet payload dispatched");
    Ok(buffer.reported_length())
}
