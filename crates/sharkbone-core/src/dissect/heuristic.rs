use std::fmt;

use crate::buffer::Buffer;
use crate::error::DissectError;
use crate::tree::ProtoTree;

use super::context::PacketContext;
use super::handle::{DissectorHandle, ProtocolId};

/// Content probe of a heuristic dissector. It sees the buffer and the packet
/// context read-only, so rejecting leaves no trace.
pub type Probe = dyn Fn(&Buffer, &PacketContext<'_>) -> bool + Send + Sync;

pub struct HeuristicEntry {
    short_name: String,
    display_name: String,
    protocol: ProtocolId,
    enabled: bool,
    probe: Box<Probe>,
    handle: DissectorHandle,
}

impl HeuristicEntry {
    pub fn short_name(&self) -> &str {
        &self.short_name
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn protocol(&self) -> ProtocolId {
        self.protocol
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn handle(&self) -> &DissectorHandle {
        &self.handle
    }
}

impl fmt::Debug for HeuristicEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeuristicEntry")
            .field("short_name", &self.short_name)
            .field("protocol", &self.protocol)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Self-nominating dissectors for one attachment point (e.g. `udp`), tried
/// in registration order.
#[derive(Debug)]
pub struct HeuristicList {
    name: String,
    entries: Vec<HeuristicEntry>,
}

impl HeuristicList {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn entries(&self) -> &[HeuristicEntry] {
        &self.entries
    }

    pub(crate) fn contains(&self, short_name: &str) -> bool {
        self.entries.iter().any(|entry| entry.short_name == short_name)
    }

    pub(crate) fn push(
        &mut self,
        short_name: &str,
        display_name: &str,
        probe: Box<Probe>,
        handle: &DissectorHandle,
    ) {
        self.entries.push(HeuristicEntry {
            short_name: short_name.to_string(),
            display_name: display_name.to_string(),
            protocol: handle.protocol(),
            enabled: true,
            probe,
            handle: handle.clone(),
        });
    }

    /// Returns false when no entry has that short name.
    pub(crate) fn set_enabled(&mut self, short_name: &str, enabled: bool) -> bool {
        match self.entries.iter_mut().find(|entry| entry.short_name == short_name) {
            Some(entry) => {
                entry.enabled = enabled;
                true
            }
            None => false,
        }
    }

    /// Probe the enabled entries in order and run the first that accepts and
    /// consumes bytes. `Ok(None)` when none did.
    pub fn try_heuristics(
        &self,
        buffer: &Buffer,
        cx: &mut PacketContext<'_>,
        tree: &mut ProtoTree<'_>,
    ) -> Result<Option<usize>, DissectError> {
        let registry = cx.registry();
        for entry in &self.entries {
            if !entry.enabled || !registry.is_enabled(entry.protocol) {
                continue;
            }
            if !(entry.probe)(buffer, &*cx) {
                continue;
            }
            tracing::trace!(list = %self.name, heuristic = %entry.short_name, "heuristic accepted");
            if let Some(consumed) = cx.call_dissector(&entry.handle, buffer, tree)? {
                return Ok(Some(consumed));
            }
        }
        Ok(None)
    }

    /// [`try_heuristics`](Self::try_heuristics), falling through to the raw
    /// data dissector when nothing accepts.
    pub fn try_all(
        &self,
        buffer: &Buffer,
        cx: &mut PacketContext<'_>,
        tree: &mut ProtoTree<'_>,
    ) -> Result<usize, DissectError> {
        if let Some(consumed) = self.try_heuristics(buffer, cx, tree)? {
            return Ok(consumed);
        }
        cx.call_data(buffer, tree)
    }
}
