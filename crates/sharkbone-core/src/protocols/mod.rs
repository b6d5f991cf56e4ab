//! Protocol dissectors shipped with the engine.
//!
//! Each protocol registers, at startup, its protocol entry, fields,
//! dissectors, and the tables or heuristic lists it offers to the layer
//! above. Larger protocols follow a layered structure:
//! - `layout`: byte offsets, ranges and constants (source of truth)
//! - `parser`: tree building over a [`Buffer`](crate::buffer::Buffer)
//! - `error`: explicit, actionable errors, turned into malformed markers
//!
//! Dissectors contain no I/O; they read only through the buffer and write
//! only through the tree cursor and the packet context.
//!
//! | protocol | entered from                        | offers            |
//! |----------|-------------------------------------|-------------------|
//! | frame    | every frame                         | `link.type`       |
//! | eth      | `link.type` 1                       | `ethertype`       |
//! | raw      | `link.type` 101                     |                   |
//! | ip       | `ethertype` 0x0800                  | `ip.proto`        |
//! | ipv6     | `ethertype` 0x86dd                  | `ip.proto`        |
//! | udp      | `ip.proto` 17                       | `udp.port`, heuristics `udp` |
//! | tcp      | `ip.proto` 6                        | `tcp.port`, heuristics `tcp` |
//! | artnet   | `udp.port` 6454                     |                   |
//! | sacn     | `udp.port` 5568, heuristic `udp`    |                   |
//! | lmsg     | `tcp.port` 5445                     |                   |
//! | recs     | heuristic `udp`                     |                   |

use crate::dissect::{RegistrationError, RegistryBuilder};

pub mod artnet;
pub mod eth;
pub mod frame;
pub mod ip;
pub mod lmsg;
pub mod recs;
pub mod sacn;
pub mod tcp;
pub mod udp;

/// Register every shipped protocol. Lower layers go first so the tables
/// exist when upper layers bind into them.
pub fn register_all(builder: &mut RegistryBuilder) -> Result<(), RegistrationError> {
    frame::register(builder)?;
    eth::register(builder)?;
    ip::register(builder)?;
    udp::register(builder)?;
    tcp::register(builder)?;
    sacn::register(builder)?;
    artnet::register(builder)?;
    lmsg::register(builder)?;
    recs::register(builder)?;
    tracing::debug!("client protocols registered");
    Ok(())
}

/// Ports to try, low port first, each once.
pub(crate) fn port_keys(source: u16, destination: u16) -> Vec<crate::dissect::TableKey> {
    let (low, high) = if source <= destination {
        (source, destination)
    } else {
        (destination, source)
    };
    if low == high {
        vec![low.into()]
    } else {
        vec![low.into(), high.into()]
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use crate::buffer::Buffer;
    use crate::config::EngineConfig;
    use crate::dissect::{Columns, FrameInfo, PacketContext};
    use crate::engine::Engine;
    use crate::reassembly::StreamTable;
    use crate::tree::{FieldTree, ProtoTree};

    pub(crate) struct Outcome {
        pub tree: FieldTree,
        pub columns: Columns,
        pub consumed: Option<usize>,
        pub protocols: Vec<String>,
    }

    /// Run the dissector registered as `name` over `payload` alone, with
    /// every shipped protocol available to it.
    pub(crate) fn run(name: &str, payload: Vec<u8>) -> Outcome {
        let engine = Engine::with_default_protocols(EngineConfig::default()).expect("registry");
        let registry = engine.registry();
        let handle = registry.dissector(name).expect("dissector");
        let buffer = Buffer::from_bytes(payload);
        let info = FrameInfo {
            number: 1,
            timestamp: None,
            linktype: 1,
            captured_length: buffer.captured_length(),
            reported_length: buffer.reported_length(),
        };
        let mut streams = StreamTable::default();
        let mut cx = PacketContext::new(registry, &mut streams, info, &buffer);
        let mut tree = FieldTree::new();
        let consumed = cx
            .call_dissector(handle, &buffer, &mut ProtoTree::new(&mut tree))
            .expect("no fatal error");
        let (columns, layers, _) = cx.into_parts();
        Outcome {
            tree,
            columns,
            consumed,
            protocols: layers
                .into_iter()
                .map(|id| registry.protocol(id).filter_name.clone())
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::port_keys;
    use crate::dissect::TableKey;

    #[test]
    fn low_port_is_tried_first() {
        assert_eq!(
            port_keys(40000, 6454),
            vec![TableKey::Uint(6454), TableKey::Uint(40000)]
        );
        assert_eq!(port_keys(5568, 5568), vec![TableKey::Uint(5568)]);
    }
}
