use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;
use crate::error::DissectError;
use crate::tree::ProtoTree;

use super::context::PacketContext;

/// A protocol interpreter.
///
/// `dissect` returns how many bytes of `buffer` it consumed; `Ok(0)` means
/// "not my protocol" and lets the caller fall back. Reads past the captured
/// bytes should be left to fail with `?`.
pub trait Dissector: Send + Sync {
    fn dissect(
        &self,
        buffer: &Buffer,
        cx: &mut PacketContext<'_>,
        tree: &mut ProtoTree<'_>,
    ) -> Result<usize, DissectError>;
}

/// Adapter registering a plain function or closure as a [`Dissector`].
pub(crate) struct FnDissector<F>(pub(crate) F);

impl<F> Dissector for FnDissector<F>
where
    F: Fn(&Buffer, &mut PacketContext<'_>, &mut ProtoTree<'_>) -> Result<usize, DissectError>
        + Send
        + Sync,
{
    fn dissect(
        &self,
        buffer: &Buffer,
        cx: &mut PacketContext<'_>,
        tree: &mut ProtoTree<'_>,
    ) -> Result<usize, DissectError> {
        (self.0)(buffer, cx, tree)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProtocolId(pub(crate) u32);

impl ProtocolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Shared reference to a registered dissector.
#[derive(Clone)]
pub struct DissectorHandle {
    inner: Arc<HandleInner>,
}

struct HandleInner {
    id: u32,
    name: String,
    protocol: ProtocolId,
    dissector: Box<dyn Dissector>,
}

impl DissectorHandle {
    pub(crate) fn new(
        id: u32,
        name: &str,
        protocol: ProtocolId,
        dissector: Box<dyn Dissector>,
    ) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id,
                name: name.to_string(),
                protocol,
                dissector,
            }),
        }
    }

    pub fn id(&self) -> u32 {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn protocol(&self) -> ProtocolId {
        self.inner.protocol
    }

    pub(crate) fn dissector(&self) -> &dyn Dissector {
        self.inner.dissector.as_ref()
    }
}

impl PartialEq for DissectorHandle {
    fn eq(&self, other: &Self) -> bool {
        self.inner.id == other.inner.id
    }
}

impl Eq for DissectorHandle {}

impl fmt::Debug for DissectorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DissectorHandle")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("protocol", &self.inner.protocol)
            .finish()
    }
}
