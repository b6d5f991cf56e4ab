//! Dissector registry and dispatch.
//!
//! Protocol modules register during a startup phase into a
//! [`RegistryBuilder`]: protocols, named dissectors, keyed
//! [`DissectorTable`]s and ordered [`HeuristicList`]s. [`RegistryBuilder::build`]
//! freezes everything into a [`Registry`], which has no registration methods and
//! is shared read-only (usually behind an `Arc`) by every worker.
//!
//! During a frame's pass, dissectors select the next layer through the tables
//! and heuristic lists, always via [`PacketContext::call_dissector`]. That call
//! is the catch point for dissector failures: a failing layer leaves its
//! partial tree plus a "Malformed Packet" marker and the pass continues.
//!
//! # Examples
//! ```
//! use sharkbone_core::EngineConfig;
//! use sharkbone_core::buffer::Buffer;
//! use sharkbone_core::dissect::{BindPolicy, FrameInfo, KeyType, PacketContext, RegistryBuilder};
//! use sharkbone_core::reassembly::StreamTable;
//! use sharkbone_core::tree::{FieldTree, ProtoTree};
//!
//! let mut builder = RegistryBuilder::new();
//! let proto = builder.register_protocol("Echo Protocol", "ECHO", "echo")?;
//! let echo = builder.register_fn("echo", proto, |buffer, _cx, _tree| Ok(buffer.reported_length()))?;
//! builder.register_table("udp.port", KeyType::Uint, BindPolicy::Stack)?;
//! builder.bind("udp.port", 7u16, &echo)?;
//! let registry = builder.build(EngineConfig::default())?;
//!
//! let buffer = Buffer::from_bytes(vec![1, 2, 3]);
//! let frame = FrameInfo { number: 1, timestamp: None, linktype: 0, captured_length: 3, reported_length: 3 };
//! let mut streams = StreamTable::default();
//! let mut cx = PacketContext::new(&registry, &mut streams, frame, &buffer);
//! let mut tree = FieldTree::new();
//! let mut root = ProtoTree::new(&mut tree);
//!
//! let table = registry.table("udp.port").unwrap();
//! assert_eq!(table.dispatch(7u16, &buffer, &mut cx, &mut root)?, Some(3));
//! assert_eq!(table.dispatch(8u16, &buffer, &mut cx, &mut root)?, None);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

mod context;
pub mod data;
mod error;
mod handle;
mod heuristic;
mod registry;
mod table;

pub use context::{Columns, FrameInfo, PacketContext, SegmentInfo};
pub use error::RegistrationError;
pub use handle::{Dissector, DissectorHandle, ProtocolId};
pub use heuristic::{HeuristicEntry, HeuristicList, Probe};
pub use registry::{Protocol, Registry, RegistryBuilder};
pub use table::{BindPolicy, DissectorTable, KeyType, TableKey};
