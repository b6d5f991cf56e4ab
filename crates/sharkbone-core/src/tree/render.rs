use serde::{Deserialize, Serialize};

use crate::buffer::Buffer;

use super::expert::ExpertInfo;
use super::{FieldTree, NodeId};

/// Named buffer that rendered offsets refer to ("Frame", "Reassembled PDU").
#[derive(Debug, Clone)]
pub struct DataSource {
    pub name: String,
    pub buffer: Buffer,
}

impl DataSource {
    pub fn new(name: impl Into<String>, buffer: Buffer) -> Self {
        Self {
            name: name.into(),
            buffer,
        }
    }
}

/// Serializable form of one visible node.
///
/// `offset` is absolute within data source `source`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedNode {
    pub label: String,
    pub abbrev: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub source: usize,
    pub offset: usize,
    pub length: usize,
    #[serde(default, skip_serializing_if = "is_false")]
    pub generated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expert: Option<ExpertInfo>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<RenderedNode>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl FieldTree {
    /// Render the visible part of the tree. Hidden nodes and their children
    /// are left out; they stay reachable through [`FieldTree::find_all`].
    pub fn render(&self, sources: &[DataSource]) -> Vec<RenderedNode> {
        self.roots()
            .iter()
            .filter_map(|&id| self.render_node(id, sources))
            .collect()
    }

    fn render_node(&self, id: NodeId, sources: &[DataSource]) -> Option<RenderedNode> {
        let node = self.node(id);
        if node.is_hidden() {
            return None;
        }
        let (origin, offset) = node.buffer().resolve(node.offset());
        let source = sources
            .iter()
            .position(|s| s.buffer.resolve(0).0.ptr_eq(&origin))
            .unwrap_or(0);

        Some(RenderedNode {
            label: node.label(),
            abbrev: node.descriptor().abbrev.to_string(),
            value: node.descriptor().format_value(node.value()),
            source,
            offset,
            length: node.length(),
            generated: node.is_generated(),
            expert: node.expert().cloned(),
            children: node
                .children()
                .iter()
                .filter_map(|&child| self.render_node(child, sources))
                .collect(),
        })
    }
}
