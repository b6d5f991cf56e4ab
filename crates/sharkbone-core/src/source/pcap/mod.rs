//! PCAP/PCAPNG source implementation.
//!
//! Legacy PCAP and PCAPNG files are told apart by their magic number. Each
//! packet record becomes a [`Frame`](crate::source::Frame) carrying the
//! captured bytes and the original (wire) length from the record header.

pub mod error;
pub mod layout;
pub mod parser;
pub mod reader;

pub use parser::PcapFileSource;
