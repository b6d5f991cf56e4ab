//! Per-packet protocol field tree.
//!
//! Nodes live in an arena owned by [`FieldTree`] and are addressed by
//! [`NodeId`]; the whole tree is dropped at once when the frame's pass ends.
//! Every node records the buffer and byte range it was decoded from.
//!
//! Dissectors write through a [`ProtoTree`] cursor, which pairs the tree with
//! the node new items are attached to.
//!
//! # Examples
//! ```
//! use sharkbone_core::buffer::Buffer;
//! use sharkbone_core::tree::{Encoding, FieldDescriptor, FieldTree, FieldType, ProtoTree};
//!
//! static PROTO: FieldDescriptor = FieldDescriptor::new("Demo", "demo", FieldType::Protocol);
//! static LEN: FieldDescriptor = FieldDescriptor::new("Length", "demo.len", FieldType::UInt16);
//!
//! let buffer = Buffer::from_bytes(vec![0x00, 0x04, 0xaa, 0xbb]);
//! let mut tree = FieldTree::new();
//! let mut root = ProtoTree::new(&mut tree);
//! let demo = root.add_subtree(&PROTO, &buffer, 0, 2)?;
//! root.child(demo.node()).add_item(&LEN, &buffer, 0, 2, Encoding::BigEndian)?;
//! let id = root.finalize(demo, 4)?;
//!
//! assert_eq!(tree.node(id).length(), 4);
//! assert_eq!(tree.find_all("demo.len").len(), 1);
//! # Ok::<(), sharkbone_core::DissectError>(())
//! ```

use std::collections::HashMap;

use crate::buffer::Buffer;
use crate::error::DissectError;

pub mod expert;
pub mod field;
mod render;

pub use expert::{ExpertGroup, ExpertInfo, Severity};
pub use field::{DisplayBase, Encoding, FieldDescriptor, FieldType, FieldValue};
pub use render::{DataSource, RenderedNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// One decoded field.
#[derive(Debug)]
pub struct FieldNode {
    descriptor: &'static FieldDescriptor,
    buffer: Buffer,
    offset: usize,
    length: usize,
    value: FieldValue,
    text: Option<String>,
    appended: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    generated: bool,
    hidden: bool,
    open: bool,
    expert: Option<ExpertInfo>,
}

impl FieldNode {
    pub fn descriptor(&self) -> &'static FieldDescriptor {
        self.descriptor
    }

    pub fn buffer(&self) -> &Buffer {
        &self.buffer
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn value(&self) -> &FieldValue {
        &self.value
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_generated(&self) -> bool {
        self.generated
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn expert(&self) -> Option<&ExpertInfo> {
        self.expert.as_ref()
    }

    /// Display label: `Name: value`, or the node's own text, followed by any
    /// appended text.
    pub fn label(&self) -> String {
        let mut label = match &self.text {
            Some(text) => text.clone(),
            None => match self.descriptor.format_value(&self.value) {
                Some(value) => format!("{}: {}", self.descriptor.name, value),
                None => self.descriptor.name.to_string(),
            },
        };
        label.push_str(&self.appended);
        label
    }
}

/// Position in a tree to roll back to. Only the dispatcher uses it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Checkpoint {
    nodes: usize,
    roots: usize,
    journal: usize,
}

/// Prior state of a node changed in place.
#[derive(Debug, Clone, Copy)]
enum Undo {
    Extent { id: NodeId, length: usize, open: bool },
    Generated { id: NodeId, was: bool },
    Hidden { id: NodeId, was: bool },
    Appended { id: NodeId, len: usize },
}

/// Arena of field nodes for one frame.
#[derive(Debug, Default)]
pub struct FieldTree {
    nodes: Vec<FieldNode>,
    roots: Vec<NodeId>,
    index: HashMap<&'static str, Vec<NodeId>>,
    journal: Vec<Undo>,
}

impl FieldTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// # Panics
    /// Panics when `id` does not belong to this tree.
    pub fn node(&self, id: NodeId) -> &FieldNode {
        &self.nodes[id.index()]
    }

    /// Top-level nodes in insertion order.
    pub fn roots(&self) -> &[NodeId] {
        &self.roots
    }

    /// All nodes in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &FieldNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, node)| (NodeId(idx as u32), node))
    }

    /// Every node registered under `abbrev`, hidden ones included.
    pub fn find_all(&self, abbrev: &str) -> &[NodeId] {
        self.index.get(abbrev).map_or(&[], Vec::as_slice)
    }

    /// First node registered under `abbrev`.
    pub fn first(&self, abbrev: &str) -> Option<&FieldNode> {
        self.find_all(abbrev).first().map(|&id| self.node(id))
    }

    /// Nodes carrying expert info, in insertion order.
    pub fn experts(&self) -> impl Iterator<Item = (NodeId, &ExpertInfo)> {
        self.iter()
            .filter_map(|(id, node)| node.expert.as_ref().map(|info| (id, info)))
    }

    /// Decode `[offset, offset + length)` of `buffer` as `descriptor` and
    /// attach it under `parent`.
    ///
    /// # Errors
    /// A buffer error when the range is not captured; `Malformed` when the
    /// length does not fit the field type or the range escapes a closed
    /// parent.
    pub fn add_item(
        &mut self,
        parent: Option<NodeId>,
        descriptor: &'static FieldDescriptor,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        encoding: Encoding,
    ) -> Result<NodeId, DissectError> {
        buffer.check(offset, length)?;
        let value = descriptor.decode(buffer, offset, length, encoding)?;
        self.insert(parent, descriptor, buffer, offset, length, value, None)
    }

    /// Attach a node with a value computed by the dissector rather than read
    /// from the range.
    pub fn add_value(
        &mut self,
        parent: Option<NodeId>,
        descriptor: &'static FieldDescriptor,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        value: FieldValue,
    ) -> Result<NodeId, DissectError> {
        buffer.check(offset, length)?;
        self.insert(parent, descriptor, buffer, offset, length, value, None)
    }

    /// Attach a free-text line.
    pub fn add_text(
        &mut self,
        parent: Option<NodeId>,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        text: impl Into<String>,
    ) -> Result<NodeId, DissectError> {
        buffer.check(offset, length)?;
        self.insert(
            parent,
            &expert::TEXT,
            buffer,
            offset,
            length,
            FieldValue::None,
            Some(text.into()),
        )
    }

    /// Open a grouping node whose final length is not known yet.
    ///
    /// Until finalized, children added on the same data source grow the node.
    pub fn add_subtree(
        &mut self,
        parent: Option<NodeId>,
        descriptor: &'static FieldDescriptor,
        buffer: &Buffer,
        offset: usize,
        placeholder_length: usize,
    ) -> Result<SubtreeBuilder, DissectError> {
        let id = self.add_item(
            parent,
            descriptor,
            buffer,
            offset,
            placeholder_length,
            Encoding::BigEndian,
        )?;
        self.nodes[id.index()].open = true;
        Ok(SubtreeBuilder { node: id })
    }

    /// Attach an expert annotation.
    ///
    /// The range is clipped to the captured bytes. When it cannot sit under
    /// `parent` the annotation is attached at the top level instead.
    pub fn add_expert(
        &mut self,
        parent: Option<NodeId>,
        descriptor: &'static FieldDescriptor,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        info: ExpertInfo,
    ) -> NodeId {
        let offset = offset.min(buffer.captured_length());
        let length = length.min(buffer.remaining_captured(offset));
        let (parent, extensions) = match self.cover_plan(parent, buffer, offset, length) {
            Ok(extensions) => (parent, extensions),
            Err(_) => (None, Vec::new()),
        };
        self.apply(extensions);
        let text = Some(info.message.clone());
        let id = self.push(parent, descriptor, buffer, offset, length, FieldValue::None, text);
        self.nodes[id.index()].expert = Some(info);
        id
    }

    pub fn mark_generated(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.index()];
        self.journal.push(Undo::Generated {
            id,
            was: node.generated,
        });
        node.generated = true;
    }

    pub fn mark_hidden(&mut self, id: NodeId) {
        let node = &mut self.nodes[id.index()];
        self.journal.push(Undo::Hidden { id, was: node.hidden });
        node.hidden = true;
    }

    pub fn append_text(&mut self, id: NodeId, text: &str) {
        let node = &mut self.nodes[id.index()];
        self.journal.push(Undo::Appended {
            id,
            len: node.appended.len(),
        });
        node.appended.push_str(text);
    }

    fn finalize_subtree(&mut self, id: NodeId, length: usize) -> Result<NodeId, DissectError> {
        let node = &self.nodes[id.index()];
        node.buffer.check(node.offset, length)?;

        let (origin, start) = node.buffer.resolve(node.offset);
        let end = start + length;
        for &child in &node.children {
            let child = &self.nodes[child.index()];
            let (child_origin, child_start) = child.buffer.resolve(child.offset);
            if child_origin.ptr_eq(&origin) && child_start + child.length > end {
                return Err(DissectError::malformed(format!(
                    "{} finalized to {length} bytes but its children need more",
                    node.descriptor.abbrev
                )));
            }
        }

        let extensions = self.cover_plan(node.parent, &node.buffer, node.offset, length)?;
        self.apply(extensions);
        self.set_extent(id, length, false);
        Ok(id)
    }

    #[allow(clippy::too_many_arguments)]
    fn insert(
        &mut self,
        parent: Option<NodeId>,
        descriptor: &'static FieldDescriptor,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        value: FieldValue,
        text: Option<String>,
    ) -> Result<NodeId, DissectError> {
        let extensions = self.cover_plan(parent, buffer, offset, length)?;
        self.apply(extensions);
        Ok(self.push(parent, descriptor, buffer, offset, length, value, text))
    }

    #[allow(clippy::too_many_arguments)]
    fn push(
        &mut self,
        parent: Option<NodeId>,
        descriptor: &'static FieldDescriptor,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        value: FieldValue,
        text: Option<String>,
    ) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(FieldNode {
            descriptor,
            buffer: buffer.clone(),
            offset,
            length,
            value,
            text,
            appended: String::new(),
            parent,
            children: Vec::new(),
            generated: false,
            hidden: false,
            open: false,
            expert: None,
        });
        match parent {
            Some(parent) => self.nodes[parent.index()].children.push(id),
            None => self.roots.push(id),
        }
        self.index.entry(descriptor.abbrev).or_default().push(id);
        id
    }

    /// Length changes needed so every ancestor on the same data source covers
    /// the new range. Only open ancestors may grow.
    fn cover_plan(
        &self,
        parent: Option<NodeId>,
        buffer: &Buffer,
        offset: usize,
        length: usize,
    ) -> Result<Vec<(NodeId, usize)>, DissectError> {
        let (origin, start) = buffer.resolve(offset);
        let end = start + length;
        let mut extensions = Vec::new();
        let mut current = parent;

        while let Some(id) = current {
            let node = &self.nodes[id.index()];
            let (node_origin, node_start) = node.buffer.resolve(node.offset);
            if !node_origin.ptr_eq(&origin) {
                break;
            }
            if start >= node_start && end <= node_start + node.length {
                break;
            }
            if !node.open || start < node_start {
                return Err(DissectError::malformed(format!(
                    "item at {start}..{end} lies outside {} ({node_start}..{})",
                    node.descriptor.abbrev,
                    node_start + node.length
                )));
            }
            let grown = end - node_start;
            node.buffer.check(node.offset, grown)?;
            extensions.push((id, grown));
            current = node.parent;
        }
        Ok(extensions)
    }

    fn apply(&mut self, extensions: Vec<(NodeId, usize)>) {
        for (id, length) in extensions {
            let open = self.nodes[id.index()].open;
            self.set_extent(id, length, open);
        }
    }

    fn set_extent(&mut self, id: NodeId, length: usize, open: bool) {
        let node = &mut self.nodes[id.index()];
        self.journal.push(Undo::Extent {
            id,
            length: node.length,
            open: node.open,
        });
        node.length = length;
        node.open = open;
    }

    pub(crate) fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            nodes: self.nodes.len(),
            roots: self.roots.len(),
            journal: self.journal.len(),
        }
    }

    /// Drop every node added after `checkpoint` and undo in-place changes
    /// made since then to the nodes that stay.
    pub(crate) fn rollback(&mut self, checkpoint: Checkpoint) {
        let keep = checkpoint.nodes as u32;
        let undone = self.journal.split_off(checkpoint.journal.min(self.journal.len()));
        for undo in undone.into_iter().rev() {
            match undo {
                Undo::Extent { id, length, open } if id.0 < keep => {
                    let node = &mut self.nodes[id.index()];
                    node.length = length;
                    node.open = open;
                }
                Undo::Generated { id, was } if id.0 < keep => {
                    self.nodes[id.index()].generated = was;
                }
                Undo::Hidden { id, was } if id.0 < keep => {
                    self.nodes[id.index()].hidden = was;
                }
                Undo::Appended { id, len } if id.0 < keep => {
                    self.nodes[id.index()].appended.truncate(len);
                }
                _ => {}
            }
        }

        if self.nodes.len() == checkpoint.nodes {
            return;
        }
        self.nodes.truncate(checkpoint.nodes);
        self.roots.truncate(checkpoint.roots);
        for node in &mut self.nodes {
            node.children.retain(|child| child.0 < keep);
        }
        self.index.retain(|_, ids| {
            ids.retain(|id| id.0 < keep);
            !ids.is_empty()
        });
    }
}

/// Handle to an open subtree; consuming it with `finalize` closes the node.
#[must_use = "an open subtree must be finalized"]
#[derive(Debug)]
pub struct SubtreeBuilder {
    node: NodeId,
}

impl SubtreeBuilder {
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Fix the node's length.
    ///
    /// # Errors
    /// A buffer error when the length runs past the captured bytes;
    /// `Malformed` when it does not cover every child or escapes a closed
    /// parent.
    pub fn finalize(self, tree: &mut FieldTree, length: usize) -> Result<NodeId, DissectError> {
        tree.finalize_subtree(self.node, length)
    }
}

/// Write cursor handed to dissectors: a tree plus the node new items go under.
pub struct ProtoTree<'t> {
    tree: &'t mut FieldTree,
    parent: Option<NodeId>,
}

impl<'t> ProtoTree<'t> {
    /// Cursor at the top level of `tree`.
    pub fn new(tree: &'t mut FieldTree) -> Self {
        Self { tree, parent: None }
    }

    /// Cursor that adds under `parent`.
    pub fn child(&mut self, parent: NodeId) -> ProtoTree<'_> {
        ProtoTree {
            tree: &mut *self.tree,
            parent: Some(parent),
        }
    }

    /// Cursor at the top level of the same tree.
    pub fn top(&mut self) -> ProtoTree<'_> {
        ProtoTree {
            tree: &mut *self.tree,
            parent: None,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn tree(&self) -> &FieldTree {
        self.tree
    }

    pub fn tree_mut(&mut self) -> &mut FieldTree {
        &mut *self.tree
    }

    pub fn add_item(
        &mut self,
        descriptor: &'static FieldDescriptor,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        encoding: Encoding,
    ) -> Result<NodeId, DissectError> {
        self.tree
            .add_item(self.parent, descriptor, buffer, offset, length, encoding)
    }

    pub fn add_value(
        &mut self,
        descriptor: &'static FieldDescriptor,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        value: FieldValue,
    ) -> Result<NodeId, DissectError> {
        self.tree
            .add_value(self.parent, descriptor, buffer, offset, length, value)
    }

    /// Value node flagged as generated.
    pub fn add_generated(
        &mut self,
        descriptor: &'static FieldDescriptor,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        value: FieldValue,
    ) -> Result<NodeId, DissectError> {
        let id = self.add_value(descriptor, buffer, offset, length, value)?;
        self.tree.mark_generated(id);
        Ok(id)
    }

    pub fn add_text(
        &mut self,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        text: impl Into<String>,
    ) -> Result<NodeId, DissectError> {
        self.tree.add_text(self.parent, buffer, offset, length, text)
    }

    pub fn add_subtree(
        &mut self,
        descriptor: &'static FieldDescriptor,
        buffer: &Buffer,
        offset: usize,
        placeholder_length: usize,
    ) -> Result<SubtreeBuilder, DissectError> {
        self.tree
            .add_subtree(self.parent, descriptor, buffer, offset, placeholder_length)
    }

    pub fn finalize(&mut self, builder: SubtreeBuilder, length: usize) -> Result<NodeId, DissectError> {
        builder.finalize(&mut *self.tree, length)
    }

    pub fn add_expert(
        &mut self,
        buffer: &Buffer,
        offset: usize,
        length: usize,
        info: ExpertInfo,
    ) -> NodeId {
        self.tree
            .add_expert(self.parent, &expert::EXPERT, buffer, offset, length, info)
    }

    pub fn mark_generated(&mut self, id: NodeId) {
        self.tree.mark_generated(id);
    }

    pub fn mark_hidden(&mut self, id: NodeId) {
        self.tree.mark_hidden(id);
    }

    pub fn append_text(&mut self, id: NodeId, text: &str) {
        self.tree.append_text(id, text);
    }
}
