//! Sharkbone core library: a packet-dissection engine.
//!
//! Frames from a capture source enter the [`Engine`], which runs one
//! dissection pass per frame. Each pass starts in the `frame` dissector and
//! walks down the protocol stack through the [`Registry`](dissect::Registry):
//! keyed dissector tables first, then ordered heuristics, then raw data. Every
//! layer reads through bounds-checked [`Buffer`](buffer::Buffer) views and
//! writes into an append-only [`FieldTree`](tree::FieldTree) whose nodes keep
//! the byte range they came from. Messages that span stream segments are put
//! back together by the [`reassembly`] module before their dissector sees them.
//!
//! Invariants:
//! - A frame's pass never panics on packet data: a failing layer leaves a
//!   malformed marker and the rest of the tree stands.
//! - The registry is frozen before the first frame and shared read-only.
//! - Dissecting the same frames again reproduces the same trees.
//! - Report outputs are deterministic and stable across runs.
//!
//! Version française (résumé):
//! Cette crate fournit un moteur de dissection de paquets : source de trames ->
//! moteur (registre de dissecteurs, tampons vérifiés, arbre de champs,
//! réassemblage de flux) -> rapport JSON déterministe. Une couche en erreur
//! laisse un marqueur « malformé » sans interrompre la trame.
//!
//! # Examples
//! ```no_run
//! use std::path::Path;
//!
//! use sharkbone_core::{AnalysisOptions, analyze_pcap_file};
//!
//! let report = analyze_pcap_file(Path::new("capture.pcapng"), &AnalysisOptions::default())?;
//! println!("report version: {}", report.report_version);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use serde::{Deserialize, Serialize};

pub mod analysis;
pub mod buffer;
pub mod config;
pub mod dissect;
pub mod engine;
pub mod error;
#[doc(hidden)]
pub mod fixtures;
pub mod protocols;
pub mod reassembly;
pub mod source;
pub mod tree;

pub use analysis::{AnalysisError, AnalysisOptions, analyze_files, analyze_pcap_file, analyze_source};
pub use config::{DecodeAs, EngineConfig, ReassemblyConfig};
pub use dissect::{Columns, RegistrationError, Registry, RegistryBuilder};
pub use engine::{DissectedFrame, Engine, Session};
pub use error::DissectError;
pub use source::{Frame, PacketSource, PcapFileSource, SourceError};
pub use tree::{ExpertGroup, RenderedNode, Severity};

/// Current report schema version.
pub const REPORT_VERSION: u32 = 1;
/// Default timestamp used when no capture time is available.
pub const DEFAULT_GENERATED_AT: &str = "1970-01-01T00:00:00Z";
/// Example frames kept per expert summary.
pub const EXPERT_EXAMPLE_FRAMES: usize = 3;

/// Dissection report of one capture, with deterministic ordering.
///
/// # Examples
/// ```
/// use sharkbone_core::make_stub_report;
///
/// let report = make_stub_report("capture.pcapng", 123);
/// assert_eq!(report.report_version, sharkbone_core::REPORT_VERSION);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    /// Report schema version (not the binary version).
    pub report_version: u32,
    /// Tool identification metadata.
    pub tool: ToolInfo,
    /// RFC3339 timestamp representing the report generation time.
    pub generated_at: String,

    /// Input capture metadata.
    pub input: InputInfo,

    /// Optional capture summary (may be empty when unavailable).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_summary: Option<CaptureSummary>,
    /// Protocol paths seen, sorted by path.
    pub protocols: Vec<ProtocolSummary>,
    /// Expert annotations grouped by message, most severe first.
    pub experts: Vec<ExpertSummary>,
    /// One entry per frame, in capture order.
    pub frames: Vec<FrameSummary>,
}

/// Name and version of the binary that wrote the report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    pub version: String,
}

/// Input capture metadata embedded in reports.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputInfo {
    /// Path as given on the command line.
    pub path: String,
    /// File size.
    pub bytes: u64,
}

/// Capture-wide counters (timestamps may be absent).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureSummary {
    pub packets_total: u64,
    /// RFC3339 timestamp of the first packet (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_start: Option<String>,
    /// RFC3339 timestamp of the last packet (if known).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_end: Option<String>,
    /// Frames where some layer left a malformed or truncation marker.
    pub malformed_frames: u64,
    /// Frames whose pass was cut short by a depth or byte ceiling.
    pub aborted_frames: u64,
}

/// Frames and bytes per protocol path (`frame:eth:ip:udp:artnet`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolSummary {
    pub path: String,
    pub frames: u64,
    /// Sum of reported frame lengths.
    pub bytes: u64,
}

/// Expert annotations with the same severity, group and message.
///
/// # Examples
/// ```
/// use sharkbone_core::{ExpertGroup, ExpertSummary, Severity};
///
/// let summary = ExpertSummary {
///     severity: Severity::Warning,
///     group: ExpertGroup::Sequence,
///     message: "Previous segment not captured".to_string(),
///     count: 4,
///     frames: vec![3, 9, 12],
/// };
/// assert_eq!(summary.frames.len(), 3);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpertSummary {
    pub severity: Severity,
    pub group: ExpertGroup,
    pub message: String,
    pub count: u64,
    /// First frames it occurred in, at most [`EXPERT_EXAMPLE_FRAMES`].
    pub frames: Vec<u64>,
}

/// Summary line of one dissected frame.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FrameSummary {
    pub number: u64,
    /// RFC3339 arrival time, when the capture has one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<String>,
    /// Length on the wire.
    pub length: usize,
    pub captured_length: usize,
    /// Colon-separated protocol path.
    pub protocols: String,
    pub columns: Columns,
    /// Why the pass was cut short, if it was.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
    /// Full field tree, when requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tree: Option<Vec<RenderedNode>>,
}

/// Build a stub report with base fields filled and empty aggregates.
///
/// # Examples
/// ```
/// use sharkbone_core::make_stub_report;
///
/// let report = make_stub_report("capture.pcapng", 123);
/// assert_eq!(report.report_version, sharkbone_core::REPORT_VERSION);
/// assert!(report.frames.is_empty());
/// ```
pub fn make_stub_report(input_path: &str, input_bytes: u64) -> Report {
    Report {
        report_version: REPORT_VERSION,
        tool: ToolInfo {
            name: "sharkbone".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        },
        generated_at: DEFAULT_GENERATED_AT.to_string(),
        input: InputInfo {
            path: input_path.to_string(),
            bytes: input_bytes,
        },
        capture_summary: None,
        protocols: vec![],
        experts: vec![],
        frames: vec![],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_omits_optional_fields_when_none() {
        let mut report = make_stub_report("capture.pcapng", 1);
        report.capture_summary = Some(CaptureSummary {
            packets_total: 1,
            time_start: None,
            time_end: None,
            malformed_frames: 0,
            aborted_frames: 0,
        });
        report.frames.push(FrameSummary {
            number: 1,
            time: None,
            length: 60,
            captured_length: 60,
            protocols: "frame:eth".to_string(),
            columns: Columns::default(),
            aborted: None,
            tree: None,
        });

        let value = serde_json::to_value(&report).expect("report json");
        let capture = value.get("capture_summary").expect("capture_summary");
        assert!(capture.get("time_start").is_none());
        assert!(capture.get("time_end").is_none());

        let frame = &value["frames"][0];
        assert!(frame.get("time").is_none());
        assert!(frame.get("aborted").is_none());
        assert!(frame.get("tree").is_none());
        assert_eq!(frame["protocols"], "frame:eth");
    }

    #[test]
    fn severity_and_group_serialize_in_snake_case() {
        let summary = ExpertSummary {
            severity: Severity::Warning,
            group: ExpertGroup::Reassemble,
            message: "m".to_string(),
            count: 1,
            frames: vec![1],
        };
        let value = serde_json::to_value(&summary).expect("json");
        assert_eq!(value["severity"], "warning");
        assert_eq!(value["group"], "reassemble");
    }
}
