//! Per-frame dissection passes.
//!
//! An [`Engine`] pairs a frozen [`Registry`] with the entry dissector every
//! frame starts in. A [`Session`] holds the state that spans frames of one
//! capture (stream reassembly) and belongs to a single worker; engines are
//! cheap to clone and share one registry.
//!
//! # Examples
//! ```
//! use sharkbone_core::{Engine, EngineConfig, Frame};
//!
//! let engine = Engine::with_default_protocols(EngineConfig::default())?;
//! let mut session = engine.session();
//! let frame = Frame::new(1, 1, vec![0u8; 10]);
//! let dissected = engine.dissect_frame(&mut session, &frame);
//!
//! assert!(dissected.result().is_ok());
//! assert_eq!(dissected.protocols, vec!["frame", "eth"]);
//! # Ok::<(), sharkbone_core::RegistrationError>(())
//! ```

use std::sync::Arc;

use crate::buffer::Buffer;
use crate::config::EngineConfig;
use crate::dissect::{Columns, DissectorHandle, FrameInfo, PacketContext, RegistrationError, Registry};
use crate::error::DissectError;
use crate::protocols;
use crate::reassembly::StreamTable;
use crate::source::Frame;
use crate::tree::{DataSource, ExpertGroup, ExpertInfo, FieldTree, ProtoTree, RenderedNode, Severity, expert};

/// Name of the dissector every frame enters first.
pub const ENTRY_DISSECTOR: &str = "frame";

#[derive(Clone)]
pub struct Engine {
    registry: Arc<Registry>,
    entry: DissectorHandle,
}

impl Engine {
    /// Engine entering frames through [`ENTRY_DISSECTOR`], or the raw data
    /// dissector when the registry has none.
    pub fn new(registry: Arc<Registry>) -> Self {
        let entry = registry
            .dissector(ENTRY_DISSECTOR)
            .unwrap_or_else(|| registry.data_handle())
            .clone();
        Self { registry, entry }
    }

    /// Engine over every protocol shipped with the crate.
    pub fn with_default_protocols(config: EngineConfig) -> Result<Self, RegistrationError> {
        let mut builder = Registry::builder();
        protocols::register_all(&mut builder)?;
        Ok(Self::new(Arc::new(builder.build(config)?)))
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn session(&self) -> Session {
        Session::default()
    }

    /// Run one dissection pass over `frame`.
    ///
    /// Never fails: a layer that breaks leaves a malformed marker, and a
    /// nesting or byte-budget overrun ends the pass early with the tree built
    /// so far and [`DissectedFrame::aborted`] set.
    pub fn dissect_frame(&self, session: &mut Session, frame: &Frame) -> DissectedFrame {
        let buffer = Buffer::real(frame.data.clone(), frame.reported_length.max(frame.data.len()));
        let info = FrameInfo {
            number: frame.number,
            timestamp: frame.timestamp,
            linktype: frame.linktype,
            captured_length: buffer.captured_length(),
            reported_length: buffer.reported_length(),
        };

        let mut tree = FieldTree::new();
        let mut cx = PacketContext::new(&self.registry, &mut session.streams, info, &buffer);
        let aborted = {
            let mut root = ProtoTree::new(&mut tree);
            match cx.call_dissector(&self.entry, &buffer, &mut root) {
                Ok(_) => None,
                Err(err) => {
                    tracing::warn!(frame = frame.number, error = %err, "dissection aborted");
                    root.tree_mut().add_expert(
                        None,
                        &expert::MALFORMED,
                        &buffer,
                        0,
                        0,
                        ExpertInfo::new(
                            Severity::Error,
                            ExpertGroup::Malformed,
                            format!("Dissection aborted: {err}"),
                        ),
                    );
                    cx.columns_mut().append_info(" [Dissection aborted]");
                    Some(err)
                }
            }
        };
        let (columns, layers, data_sources) = cx.into_parts();
        session.frames += 1;

        DissectedFrame {
            number: frame.number,
            timestamp: frame.timestamp,
            captured_length: buffer.captured_length(),
            reported_length: buffer.reported_length(),
            protocols: layers
                .into_iter()
                .map(|id| self.registry.protocol(id).filter_name.clone())
                .collect(),
            tree,
            columns,
            data_sources,
            aborted,
        }
    }
}

/// State carried from frame to frame within one capture.
#[derive(Debug, Default)]
pub struct Session {
    streams: StreamTable,
    frames: u64,
}

impl Session {
    pub fn streams(&self) -> &StreamTable {
        &self.streams
    }

    /// Passes run so far, repeats included.
    pub fn frames_dissected(&self) -> u64 {
        self.frames
    }
}

/// Outcome of one pass.
#[derive(Debug)]
pub struct DissectedFrame {
    pub number: u64,
    pub timestamp: Option<f64>,
    pub captured_length: usize,
    pub reported_length: usize,
    pub tree: FieldTree,
    pub columns: Columns,
    /// Filter names of the protocols entered, outermost first.
    pub protocols: Vec<String>,
    /// Buffers node offsets refer to; the frame itself comes first.
    pub data_sources: Vec<DataSource>,
    /// Set when a fatal error cut the pass short.
    pub aborted: Option<DissectError>,
}

impl DissectedFrame {
    pub fn result(&self) -> Result<&FieldTree, &DissectError> {
        match &self.aborted {
            Some(err) => Err(err),
            None => Ok(&self.tree),
        }
    }

    pub fn experts(&self) -> impl Iterator<Item = &ExpertInfo> {
        self.tree.experts().map(|(_, info)| info)
    }

    /// True when some layer left a malformed or truncation marker.
    pub fn is_malformed(&self) -> bool {
        !self.tree.find_all(expert::MALFORMED.abbrev).is_empty()
            || !self.tree.find_all(expert::SHORT.abbrev).is_empty()
    }

    /// `eth:ip:udp` style protocol path.
    pub fn protocol_path(&self) -> String {
        self.protocols.join(":")
    }

    pub fn render(&self) -> Vec<RenderedNode> {
        self.tree.render(&self.data_sources)
    }
}
