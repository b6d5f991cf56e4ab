use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;
use crate::error::DissectError;
use crate::reassembly::{StreamKey, StreamTable};
use crate::tree::{DataSource, ExpertGroup, ExpertInfo, ProtoTree, Severity, expert};

use super::handle::{DissectorHandle, ProtocolId};
use super::registry::{Protocol, Registry};

/// Capture metadata of the frame being dissected.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub number: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: Option<f64>,
    pub linktype: u32,
    pub captured_length: usize,
    pub reported_length: usize,
}

/// Summary columns. Later layers overwrite earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Columns {
    pub protocol: String,
    pub info: String,
    pub source: String,
    pub destination: String,
}

impl Columns {
    pub fn set_protocol(&mut self, value: impl Into<String>) {
        self.protocol = value.into();
    }

    pub fn set_info(&mut self, value: impl Into<String>) {
        self.info = value.into();
    }

    pub fn append_info(&mut self, text: &str) {
        self.info.push_str(text);
    }

    pub fn set_source(&mut self, value: impl Into<String>) {
        self.source = value.into();
    }

    pub fn set_destination(&mut self, value: impl Into<String>) {
        self.destination = value.into();
    }
}

/// Transport segment being dissected, set by a stream-oriented transport
/// before it hands its payload on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentInfo {
    pub stream: StreamKey,
    /// Sequence number of the first payload byte.
    pub seq: u32,
    /// Last segment of this direction.
    pub fin: bool,
}

/// Per-frame dissection state shared by every layer of one pass.
pub struct PacketContext<'a> {
    registry: &'a Registry,
    streams: &'a mut StreamTable,
    frame: FrameInfo,
    columns: Columns,
    layers: Vec<ProtocolId>,
    depth: usize,
    dissected_bytes: usize,
    addresses: Option<(IpAddr, IpAddr)>,
    ports: Option<(u16, u16)>,
    segment: Option<SegmentInfo>,
    data_sources: Vec<DataSource>,
}

impl<'a> PacketContext<'a> {
    pub fn new(
        registry: &'a Registry,
        streams: &'a mut StreamTable,
        frame: FrameInfo,
        buffer: &Buffer,
    ) -> Self {
        Self {
            registry,
            streams,
            frame,
            columns: Columns::default(),
            layers: Vec::new(),
            depth: 0,
            dissected_bytes: 0,
            addresses: None,
            ports: None,
            segment: None,
            data_sources: vec![DataSource::new("Frame", buffer.clone())],
        }
    }

    pub fn registry(&self) -> &'a Registry {
        self.registry
    }

    pub fn frame(&self) -> &FrameInfo {
        &self.frame
    }

    pub fn columns(&self) -> &Columns {
        &self.columns
    }

    pub fn columns_mut(&mut self) -> &mut Columns {
        &mut self.columns
    }

    pub fn addresses(&self) -> Option<(IpAddr, IpAddr)> {
        self.addresses
    }

    pub fn set_addresses(&mut self, source: IpAddr, destination: IpAddr) {
        self.addresses = Some((source, destination));
    }

    pub fn ports(&self) -> Option<(u16, u16)> {
        self.ports
    }

    pub fn set_ports(&mut self, source: u16, destination: u16) {
        self.ports = Some((source, destination));
    }

    pub fn segment(&self) -> Option<SegmentInfo> {
        self.segment
    }

    pub fn set_segment(&mut self, segment: Option<SegmentInfo>) {
        self.segment = segment;
    }

    pub(crate) fn streams(&self) -> &StreamTable {
        &*self.streams
    }

    pub(crate) fn streams_mut(&mut self) -> &mut StreamTable {
        &mut *self.streams
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Register a buffer that is not part of the frame (e.g. a reassembled
    /// message) so rendered offsets can refer to it. Returns its index.
    pub fn add_data_source(&mut self, name: &str, buffer: &Buffer) -> usize {
        self.data_sources.push(DataSource::new(name, buffer.clone()));
        self.data_sources.len() - 1
    }

    pub fn data_sources(&self) -> &[DataSource] {
        &self.data_sources
    }

    /// Protocols entered so far, outermost first. A protocol calling itself
    /// again (e.g. a stream layer and its message layer) appears once.
    pub fn layers(&self) -> &[ProtocolId] {
        &self.layers
    }

    /// `eth:ip:udp:artnet` style path of the layers entered so far.
    pub fn protocol_path(&self) -> String {
        self.layers
            .iter()
            .map(|&id| self.registry.protocol(id).filter_name.as_str())
            .collect::<Vec<_>>()
            .join(":")
    }

    /// Run `handle` over `buffer`. This is the only place dissector failures
    /// are caught.
    ///
    /// - `Ok(None)`: the protocol is disabled or the dissector returned 0; any
    ///   nodes or column writes it made are undone.
    /// - `Ok(Some(n))`: it consumed `n` bytes. A dissector that failed is
    ///   reported as having consumed its whole buffer, after a malformed (or
    ///   truncated) marker has been added to the tree. Claiming more than the
    ///   buffer holds is treated as malformed.
    /// - `Err`: only the fatal nesting-depth and byte-budget errors.
    pub fn call_dissector(
        &mut self,
        handle: &DissectorHandle,
        buffer: &Buffer,
        tree: &mut ProtoTree<'_>,
    ) -> Result<Option<usize>, DissectError> {
        let registry = self.registry;
        let protocol = registry.protocol(handle.protocol());
        if !protocol.enabled {
            return Ok(None);
        }

        let config = registry.config();
        if self.depth >= config.max_depth {
            return Err(DissectError::RecursionLimit {
                depth: self.depth + 1,
                limit: config.max_depth,
            });
        }
        self.dissected_bytes = self.dissected_bytes.saturating_add(buffer.captured_length());
        if self.dissected_bytes > config.max_dissected_bytes {
            return Err(DissectError::ByteBudget {
                bytes: self.dissected_bytes,
                limit: config.max_dissected_bytes,
            });
        }

        let checkpoint = tree.tree().checkpoint();
        let columns = self.columns.clone();
        let layers = self.layers.len();
        let sources = self.data_sources.len();

        self.depth += 1;
        if self.layers.last() != Some(&handle.protocol()) {
            self.layers.push(handle.protocol());
        }
        let result = handle.dissector().dissect(buffer, self, tree);
        self.depth -= 1;

        match result {
            Ok(0) => {
                tree.tree_mut().rollback(checkpoint);
                self.columns = columns;
                self.layers.truncate(layers);
                self.data_sources.truncate(sources);
                Ok(None)
            }
            Ok(consumed) if consumed > buffer.reported_length() => {
                let err = DissectError::malformed(format!(
                    "claimed {consumed} bytes of a {} byte buffer",
                    buffer.reported_length()
                ));
                self.report_failure(protocol, buffer, tree, &err);
                Ok(Some(buffer.reported_length()))
            }
            Ok(consumed) => Ok(Some(consumed)),
            Err(err) if err.is_fatal() => Err(err),
            Err(err) => {
                self.report_failure(protocol, buffer, tree, &err);
                Ok(Some(buffer.reported_length()))
            }
        }
    }

    /// Run the raw data dissector; returns the bytes it consumed.
    pub fn call_data(
        &mut self,
        buffer: &Buffer,
        tree: &mut ProtoTree<'_>,
    ) -> Result<usize, DissectError> {
        let registry = self.registry;
        Ok(self
            .call_dissector(registry.data_handle(), buffer, tree)?
            .unwrap_or(0))
    }

    fn report_failure(
        &mut self,
        protocol: &Protocol,
        buffer: &Buffer,
        tree: &mut ProtoTree<'_>,
        err: &DissectError,
    ) {
        let (descriptor, severity, tag) = if err.is_truncation() {
            (&expert::SHORT, Severity::Warning, "Packet size limited during capture")
        } else {
            (&expert::MALFORMED, Severity::Error, "Malformed Packet")
        };
        tracing::debug!(
            frame = self.frame.number,
            protocol = %protocol.filter_name,
            error = %err,
            "dissector failed"
        );

        let (target, offset) = self.failure_location(buffer, err);
        let offset = offset.min(target.captured_length());
        let info = ExpertInfo::new(
            severity,
            ExpertGroup::Malformed,
            format!("[{tag}: {}] {err}", protocol.short_name),
        );
        let parent = tree.parent();
        tree.tree_mut().add_expert(
            parent,
            descriptor,
            &target,
            offset,
            target.remaining_captured(offset),
            info,
        );
        self.columns.append_info(&format!(" [{tag}]"));
    }

    /// Buffer and offset for a failure marker. A read that failed inside the
    /// dissector's own input is placed relative to it; one that failed in a
    /// buffer reached otherwise is placed on the data source owning those
    /// bytes. Anything else falls back to the start of the input.
    fn failure_location(&self, buffer: &Buffer, err: &DissectError) -> (Buffer, usize) {
        let Some(at) = err.origin() else {
            return (buffer.clone(), 0);
        };
        let start = buffer.origin(0);
        if at.buffer == start.buffer
            && at.offset >= start.offset
            && at.offset - start.offset <= buffer.reported_length()
        {
            return (buffer.clone(), at.offset - start.offset);
        }
        self.data_sources
            .iter()
            .rev()
            .find_map(|source| {
                let base = source.buffer.origin(0);
                (base.buffer == at.buffer && at.offset >= base.offset)
                    .then(|| (source.buffer.clone(), at.offset - base.offset))
            })
            .unwrap_or_else(|| (buffer.clone(), 0))
    }

    pub(crate) fn into_parts(self) -> (Columns, Vec<ProtocolId>, Vec<DataSource>) {
        (self.columns, self.layers, self.data_sources)
    }
}

#[cfg(test)]
mod tests {
    use super::{FrameInfo, PacketContext};
    use crate::buffer::{Buffer, ByteOrder};
    use crate::config::EngineConfig;
    use crate::dissect::{BindPolicy, KeyType, Registry, RegistryBuilder};
    use crate::error::DissectError;
    use crate::reassembly::StreamTable;
    use crate::tree::{Encoding, FieldDescriptor, FieldTree, FieldType, ProtoTree};

    static RECORD: FieldDescriptor = FieldDescriptor::new("Record", "test.record", FieldType::None);
    static KIND: FieldDescriptor = FieldDescriptor::new("Kind", "test.kind", FieldType::UInt16);

    fn registry() -> Registry {
        let mut builder = RegistryBuilder::new();
        let proto = builder.register_protocol("Test", "TEST", "test").unwrap();
        builder.register_field(&RECORD).unwrap();
        builder.register_field(&KIND).unwrap();
        builder
            .register_table("test.kind", KeyType::Uint, BindPolicy::Stack)
            .unwrap();

        let declines = builder
            .register_fn("declines", proto, |buffer, _cx, tree| {
                let parent = tree
                    .parent()
                    .ok_or_else(|| DissectError::malformed("no parent"))?;
                tree.add_item(&KIND, buffer, 6, 2, Encoding::BigEndian)?;
                tree.append_text(parent, " [inner]");
                Ok(0)
            })
            .unwrap();
        builder.bind("test.kind", 1u16, &declines).unwrap();

        builder
            .register_fn("nested_read", proto, |buffer, _cx, _tree| {
                buffer.subset(6, 4)?.read_u32(2, ByteOrder::Big)?;
                Ok(buffer.reported_length())
            })
            .unwrap();
        builder
            .register_fn("side_buffer", proto, |buffer, cx, _tree| {
                let extra = Buffer::from_bytes(vec![0u8; 4]);
                cx.add_data_source("Extra", &extra);
                extra.read_u32(2, ByteOrder::Big)?;
                Ok(buffer.reported_length())
            })
            .unwrap();
        builder
            .register_fn("overclaims", proto, |buffer, _cx, _tree| {
                Ok(buffer.reported_length() + 5)
            })
            .unwrap();
        builder.build(EngineConfig::default()).unwrap()
    }

    fn frame_info(len: usize) -> FrameInfo {
        FrameInfo {
            number: 1,
            timestamp: None,
            linktype: 1,
            captured_length: len,
            reported_length: len,
        }
    }

    #[test]
    fn declined_dispatch_leaves_the_open_parent_untouched() {
        let registry = registry();
        let mut streams = StreamTable::default();
        let frame = Buffer::from_bytes(vec![0u8; 16]);
        let mut cx = PacketContext::new(&registry, &mut streams, frame_info(16), &frame);
        let mut tree = FieldTree::new();
        let mut root = ProtoTree::new(&mut tree);

        let record = root.add_subtree(&RECORD, &frame, 0, 2).unwrap();
        let table = registry.table("test.kind").unwrap();
        let consumed = table
            .dispatch(1u16, &frame, &mut cx, &mut root.child(record.node()))
            .unwrap();
        assert_eq!(consumed, None);

        let node = root.tree().node(record.node());
        assert_eq!(node.length(), 2);
        assert_eq!(node.label(), "Record");
        assert!(node.children().is_empty());
        assert!(root.tree().first("test.kind").is_none());
        root.finalize(record, 4).unwrap();
    }

    #[test]
    fn failure_marker_lands_on_the_byte_that_failed() {
        let registry = registry();
        let mut streams = StreamTable::default();
        let frame = Buffer::from_bytes(vec![0u8; 16]);
        let mut cx = PacketContext::new(&registry, &mut streams, frame_info(16), &frame);
        let mut tree = FieldTree::new();
        let mut root = ProtoTree::new(&mut tree);

        let payload = frame.subset(4, 12).unwrap();
        let handle = registry.dissector("nested_read").unwrap();
        let consumed = cx.call_dissector(handle, &payload, &mut root).unwrap();
        assert_eq!(consumed, Some(12));

        let marker = tree.first("_ws.malformed").expect("marker");
        assert_eq!(marker.offset(), 8);
        let (owner, offset) = marker.buffer().resolve(marker.offset());
        assert!(owner.ptr_eq(&frame));
        assert_eq!(offset, 12);
    }

    #[test]
    fn failure_in_a_side_buffer_is_marked_on_that_buffer() {
        let registry = registry();
        let mut streams = StreamTable::default();
        let frame = Buffer::from_bytes(vec![0u8; 16]);
        let mut cx = PacketContext::new(&registry, &mut streams, frame_info(16), &frame);
        let mut tree = FieldTree::new();
        let mut root = ProtoTree::new(&mut tree);

        let handle = registry.dissector("side_buffer").unwrap();
        cx.call_dissector(handle, &frame, &mut root).unwrap();

        let extra = cx.data_sources()[1].buffer.clone();
        let marker = tree.first("_ws.malformed").expect("marker");
        assert!(marker.buffer().ptr_eq(&extra));
        assert_eq!(marker.offset(), 2);
    }

    #[test]
    fn consuming_more_than_the_buffer_is_malformed() {
        let registry = registry();
        let mut streams = StreamTable::default();
        let frame = Buffer::from_bytes(vec![0u8; 16]);
        let mut cx = PacketContext::new(&registry, &mut streams, frame_info(16), &frame);
        let mut tree = FieldTree::new();
        let mut root = ProtoTree::new(&mut tree);

        let handle = registry.dissector("overclaims").unwrap();
        let consumed = cx.call_dissector(handle, &frame, &mut root).unwrap();
        assert_eq!(consumed, Some(16));
        assert!(tree.first("_ws.malformed").is_some());
        assert!(cx.columns().info.contains("[Malformed Packet]"));
    }
}
