//! sACN (E1.31) protocol decoding.
//!
//! A data packet nests three ACN layers: root, framing, and DMP. Each layer
//! starts with a flags-and-length word whose low 12 bits give the layer's
//! length; the tree opens a subtree per layer and closes it with that
//! declared length once the layer's fields are in, so a length that does not
//! cover the fields, or runs past the packet, is reported as malformed.
//!
//! The dissector is bound to UDP port 5568 and also offered as a heuristic
//! on UDP, recognised by the preamble, postamble, and ACN packet identifier.
//!
//! Version française (résumé):
//! Le module décode les couches racine, trame et DMP d'E1.31 en sous-arbres
//! dont la longueur déclarée est vérifiée. Aussi disponible en heuristique UDP.

use crate::dissect::{RegistrationError, RegistryBuilder};
use crate::tree::{DisplayBase, FieldDescriptor, FieldType};

use super::udp;

pub mod error;
pub mod layout;
pub mod parser;

pub const NAME: &str = "sacn";
pub const HEURISTIC: &str = "sacn_udp";

pub static HF_SACN: FieldDescriptor =
    FieldDescriptor::new("E1.31 Streaming ACN", "sacn", FieldType::Protocol);
pub static HF_PREAMBLE: FieldDescriptor =
    FieldDescriptor::new("Preamble Size", "sacn.preamble_size", FieldType::UInt16);
pub static HF_POSTAMBLE: FieldDescriptor =
    FieldDescriptor::new("Postamble Size", "sacn.postamble_size", FieldType::UInt16);
pub static HF_PID: FieldDescriptor =
    FieldDescriptor::new("ACN Packet Identifier", "sacn.acn_pid", FieldType::Bytes);

pub static HF_ROOT: FieldDescriptor = FieldDescriptor::new("Root Layer", "sacn.root", FieldType::None);
pub static HF_ROOT_LENGTH: FieldDescriptor =
    FieldDescriptor::new("PDU Length", "sacn.root.length", FieldType::UInt16).with_bitmask(0x0fff);
pub static HF_ROOT_VECTOR: FieldDescriptor =
    FieldDescriptor::new("Vector", "sacn.root.vector", FieldType::UInt32).with_base(DisplayBase::Hex);
pub static HF_CID: FieldDescriptor = FieldDescriptor::new("CID", "sacn.cid", FieldType::Bytes);

pub static HF_FRAMING: FieldDescriptor =
    FieldDescriptor::new("Framing Layer", "sacn.framing", FieldType::None);
pub static HF_FRAMING_LENGTH: FieldDescriptor =
    FieldDescriptor::new("PDU Length", "sacn.framing.length", FieldType::UInt16).with_bitmask(0x0fff);
pub static HF_FRAMING_VECTOR: FieldDescriptor =
    FieldDescriptor::new("Vector", "sacn.framing.vector", FieldType::UInt32)
        .with_base(DisplayBase::Hex);
pub static HF_SOURCE_NAME: FieldDescriptor =
    FieldDescriptor::new("Source Name", "sacn.source_name", FieldType::String);
pub static HF_PRIORITY: FieldDescriptor =
    FieldDescriptor::new("Priority", "sacn.priority", FieldType::UInt8);
pub static HF_SYNC_ADDRESS: FieldDescriptor =
    FieldDescriptor::new("Synchronization Address", "sacn.sync_address", FieldType::UInt16);
pub static HF_SEQUENCE: FieldDescriptor =
    FieldDescriptor::new("Sequence Number", "sacn.sequence", FieldType::UInt8);
pub static HF_OPTIONS: FieldDescriptor =
    FieldDescriptor::new("Options", "sacn.options", FieldType::UInt8).with_base(DisplayBase::Hex);
pub static HF_UNIVERSE: FieldDescriptor =
    FieldDescriptor::new("Universe", "sacn.universe", FieldType::UInt16);

pub static HF_DMP: FieldDescriptor = FieldDescriptor::new("DMP Layer", "sacn.dmp", FieldType::None);
pub static HF_DMP_LENGTH: FieldDescriptor =
    FieldDescriptor::new("PDU Length", "sacn.dmp.length", FieldType::UInt16).with_bitmask(0x0fff);
pub static HF_DMP_VECTOR: FieldDescriptor =
    FieldDescriptor::new("Vector", "sacn.dmp.vector", FieldType::UInt8).with_base(DisplayBase::Hex);
pub static HF_ADDRESS_TYPE: FieldDescriptor =
    FieldDescriptor::new("Address Type & Data Type", "sacn.dmp.address_type", FieldType::UInt8)
        .with_base(DisplayBase::Hex);
pub static HF_FIRST_ADDRESS: FieldDescriptor =
    FieldDescriptor::new("First Property Address", "sacn.dmp.first_address", FieldType::UInt16);
pub static HF_ADDRESS_INCREMENT: FieldDescriptor =
    FieldDescriptor::new("Address Increment", "sacn.dmp.increment", FieldType::UInt16);
pub static HF_VALUE_COUNT: FieldDescriptor =
    FieldDescriptor::new("Property Value Count", "sacn.dmp.count", FieldType::UInt16);
pub static HF_START_CODE: FieldDescriptor =
    FieldDescriptor::new("DMX Start Code", "sacn.start_code", FieldType::UInt8).with_base(DisplayBase::Hex);
pub static HF_DATA: FieldDescriptor = FieldDescriptor::new("DMX Data", "sacn.data", FieldType::Bytes);

static FIELDS: &[&FieldDescriptor] = &[
    &HF_SACN,
    &HF_PREAMBLE,
    &HF_POSTAMBLE,
    &HF_PID,
    &HF_ROOT,
    &HF_ROOT_LENGTH,
    &HF_ROOT_VECTOR,
    &HF_CID,
    &HF_FRAMING,
    &HF_FRAMING_LENGTH,
    &HF_FRAMING_VECTOR,
    &HF_SOURCE_NAME,
    &HF_PRIORITY,
    &HF_SYNC_ADDRESS,
    &HF_SEQUENCE,
    &HF_OPTIONS,
    &HF_UNIVERSE,
    &HF_DMP,
    &HF_DMP_LENGTH,
    &HF_DMP_VECTOR,
    &HF_ADDRESS_TYPE,
    &HF_FIRST_ADDRESS,
    &HF_ADDRESS_INCREMENT,
    &HF_VALUE_COUNT,
    &HF_START_CODE,
    &HF_DATA,
];

pub fn register(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    let proto = builder.register_protocol("E1.31 Streaming ACN", "sACN", NAME)?;
    builder.register_fields(FIELDS)?;
    let handle = builder.register_fn(NAME, proto, parser::dissect)?;
    builder.bind(udp::PORT_TABLE, layout::UDP_PORT, &handle)?;
    builder.register_heuristic(
        udp::HEURISTICS,
        HEURISTIC,
        "sACN over UDP",
        |buffer, _cx| parser::has_acn_header(buffer),
        &handle,
    )?;
    Ok(())
}
