//! Art-Net protocol decoding.
//!
//! Packets are recognised by their `Art-Net\0` signature; anything else on
//! the port is declined so the caller falls back. ArtDmx is decoded field by
//! field, other opcodes are named and their body shown as raw bytes. The DMX
//! length must be within 1..=512 and covered by the payload.
//!
//! Byte offsets live in `layout`, validation failures in `error`.
//!
//! Version française (résumé):
//! Le module reconnaît Art-Net par sa signature et décode ArtDmx (séquence,
//! univers, longueur 1..=512, données). Les positions sont dans `layout`.

use crate::dissect::{RegistrationError, RegistryBuilder};
use crate::tree::{DisplayBase, FieldDescriptor, FieldType};

use super::udp;

pub mod error;
pub mod layout;
pub mod parser;

pub const NAME: &str = "artnet";

pub static HF_ARTNET: FieldDescriptor = FieldDescriptor::new("Art-Net", "artnet", FieldType::Protocol);
pub static HF_ID: FieldDescriptor = FieldDescriptor::new("ID", "artnet.header.id", FieldType::String);
pub static HF_OPCODE: FieldDescriptor =
    FieldDescriptor::new("OpCode", "artnet.header.opcode", FieldType::UInt16).with_base(DisplayBase::Hex);
pub static HF_PROT_VER: FieldDescriptor =
    FieldDescriptor::new("ProtVer", "artnet.header.protver", FieldType::UInt16);
pub static HF_SEQUENCE: FieldDescriptor =
    FieldDescriptor::new("Sequence", "artnet.output.sequence", FieldType::UInt8);
pub static HF_PHYSICAL: FieldDescriptor =
    FieldDescriptor::new("Physical", "artnet.output.physical", FieldType::UInt8);
pub static HF_UNIVERSE: FieldDescriptor =
    FieldDescriptor::new("Universe", "artnet.output.universe", FieldType::UInt16);
pub static HF_LENGTH: FieldDescriptor =
    FieldDescriptor::new("Length", "artnet.output.length", FieldType::UInt16);
pub static HF_DATA: FieldDescriptor =
    FieldDescriptor::new("DMX data", "artnet.output.data", FieldType::Bytes);
pub static HF_PAYLOAD: FieldDescriptor =
    FieldDescriptor::new("Payload", "artnet.payload", FieldType::Bytes);

static FIELDS: &[&FieldDescriptor] = &[
    &HF_ARTNET,
    &HF_ID,
    &HF_OPCODE,
    &HF_PROT_VER,
    &HF_SEQUENCE,
    &HF_PHYSICAL,
    &HF_UNIVERSE,
    &HF_LENGTH,
    &HF_DATA,
    &HF_PAYLOAD,
];

pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    let proto = builder.register_protocol("Art-Net", "ARTNET", NAME)?;
    builder.register_fields(FIELDS)?;
    let handle = builder.register_fn(NAME, proto, parser::dissect)?;
    builder.bind(udp::PORT_TABLE, layout::UDP_PORT, &handle)?;
    Ok(())
}
