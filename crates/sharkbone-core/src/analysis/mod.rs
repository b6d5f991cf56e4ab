//! Capture analysis: run the engine over a source and build a [`Report`].
//!
//! One [`Session`](crate::engine::Session) per capture. In two-pass mode
//! every frame is dissected once to settle stream state and again to build
//! the report; the second pass reuses the reassembly bookkeeping of the first
//! and yields the same trees a single pass would for complete streams.
//!
//! Several captures can be analysed at once with [`analyze_files`]: workers
//! share one frozen registry and each owns the session of the capture it is
//! working on.
//!
//! Version française (résumé):
//! Ce module pilote le moteur sur une source de trames et produit un rapport
//! déterministe (résumé de capture, hiérarchie des protocoles, infos expertes,
//! résumé par trame). `analyze_files` traite plusieurs captures en parallèle.

use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use thiserror::Error;
use time::{OffsetDateTime, format_description::well_known::Rfc3339};

use crate::config::EngineConfig;
use crate::dissect::RegistrationError;
use crate::engine::{DissectedFrame, Engine};
use crate::source::{Frame, PacketSource, PcapFileSource, SourceError};
use crate::tree::{ExpertGroup, Severity};
use crate::{
    CaptureSummary, DEFAULT_GENERATED_AT, EXPERT_EXAMPLE_FRAMES, ExpertSummary, FrameSummary,
    InputInfo, ProtocolSummary, Report, make_stub_report,
};

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Source error: {0}")]
    Source(#[from] SourceError),
    #[error("Registration error: {0}")]
    Registration(#[from] RegistrationError),
}

/// What to analyse and how much of it to put in the report.
#[derive(Debug, Clone, Default)]
pub struct AnalysisOptions {
    /// Configuration the registry is frozen with.
    pub config: EngineConfig,
    /// Embed the rendered field tree of every frame.
    pub include_trees: bool,
    /// Dissect every frame twice and report the second pass.
    pub two_pass: bool,
}

/// Analyse one PCAP/PCAPNG file with the shipped protocols.
pub fn analyze_pcap_file(path: &Path, options: &AnalysisOptions) -> Result<Report, AnalysisError> {
    let engine = Engine::with_default_protocols(options.config.clone())?;
    analyze_file_with(&engine, path, options)
}

/// Analyse several files concurrently; results come back in input order.
///
/// # Errors
/// Fails as a whole only when the registry cannot be built. Each file's own
/// failure is reported in its slot.
pub fn analyze_files(
    paths: &[PathBuf],
    options: &AnalysisOptions,
) -> Result<Vec<Result<Report, AnalysisError>>, AnalysisError> {
    let engine = Engine::with_default_protocols(options.config.clone())?;
    let workers = thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .min(paths.len())
        .max(1);
    tracing::debug!(files = paths.len(), workers, "batch analysis started");

    let next = AtomicUsize::new(0);
    let mut slots: Vec<Option<Result<Report, AnalysisError>>> = paths.iter().map(|_| None).collect();
    thread::scope(|scope| {
        let handles: Vec<_> = (0..workers)
            .map(|_| {
                scope.spawn(|| {
                    let mut done = Vec::new();
                    loop {
                        let index = next.fetch_add(1, Ordering::Relaxed);
                        let Some(path) = paths.get(index) else {
                            break;
                        };
                        done.push((index, analyze_file_with(&engine, path, options)));
                    }
                    done
                })
            })
            .collect();
        for handle in handles {
            match handle.join() {
                Ok(done) => {
                    for (index, result) in done {
                        slots[index] = Some(result);
                    }
                }
                Err(panic) => std::panic::resume_unwind(panic),
            }
        }
    });
    Ok(slots.into_iter().flatten().collect())
}

fn analyze_file_with(
    engine: &Engine,
    path: &Path,
    options: &AnalysisOptions,
) -> Result<Report, AnalysisError> {
    let source = PcapFileSource::open(path)?;
    let input = InputInfo {
        path: path.display().to_string(),
        bytes: path.metadata()?.len(),
    };
    analyze_source(input, source, engine, options)
}

/// Analyse every frame of `source` with `engine`.
pub fn analyze_source<S: PacketSource>(
    input: InputInfo,
    mut source: S,
    engine: &Engine,
    options: &AnalysisOptions,
) -> Result<Report, AnalysisError> {
    let mut session = engine.session();
    let mut report = ReportBuilder::new(options.include_trees);

    if options.two_pass {
        let mut frames = Vec::new();
        while let Some(frame) = source.next_frame()? {
            engine.dissect_frame(&mut session, &frame);
            frames.push(frame);
        }
        tracing::debug!(frames = frames.len(), "first pass done");
        for frame in &frames {
            report.add(frame, &engine.dissect_frame(&mut session, frame));
        }
    } else {
        while let Some(frame) = source.next_frame()? {
            report.add(&frame, &engine.dissect_frame(&mut session, &frame));
        }
    }

    Ok(report.finish(input))
}

#[derive(Default)]
struct ExpertStats {
    count: u64,
    frames: Vec<u64>,
}

struct ReportBuilder {
    include_trees: bool,
    packets_total: u64,
    malformed_frames: u64,
    aborted_frames: u64,
    first_ts: Option<f64>,
    last_ts: Option<f64>,
    protocols: BTreeMap<String, (u64, u64)>,
    experts: BTreeMap<(Reverse<Severity>, ExpertGroup, String), ExpertStats>,
    frames: Vec<FrameSummary>,
}

impl ReportBuilder {
    fn new(include_trees: bool) -> Self {
        Self {
            include_trees,
            packets_total: 0,
            malformed_frames: 0,
            aborted_frames: 0,
            first_ts: None,
            last_ts: None,
            protocols: BTreeMap::new(),
            experts: BTreeMap::new(),
            frames: Vec::new(),
        }
    }

    fn add(&mut self, frame: &Frame, dissected: &DissectedFrame) {
        self.packets_total += 1;
        update_ts_bounds(&mut self.first_ts, &mut self.last_ts, frame.timestamp);
        if dissected.is_malformed() {
            self.malformed_frames += 1;
        }
        if dissected.aborted.is_some() {
            self.aborted_frames += 1;
        }

        let path = dissected.protocol_path();
        let entry = self.protocols.entry(path.clone()).or_default();
        entry.0 += 1;
        entry.1 += dissected.reported_length as u64;

        for info in dissected.experts() {
            let stats = self
                .experts
                .entry((Reverse(info.severity), info.group, info.message.clone()))
                .or_default();
            stats.count += 1;
            if stats.frames.len() < EXPERT_EXAMPLE_FRAMES && stats.frames.last() != Some(&frame.number) {
                stats.frames.push(frame.number);
            }
        }

        self.frames.push(FrameSummary {
            number: dissected.number,
            time: ts_to_rfc3339(dissected.timestamp),
            length: dissected.reported_length,
            captured_length: dissected.captured_length,
            protocols: path,
            columns: dissected.columns.clone(),
            aborted: dissected.aborted.as_ref().map(|err| err.to_string()),
            tree: self.include_trees.then(|| dissected.render()),
        });
    }

    fn finish(self, input: InputInfo) -> Report {
        let mut report = make_stub_report(&input.path, input.bytes);
        report.capture_summary = Some(CaptureSummary {
            packets_total: self.packets_total,
            time_start: ts_to_rfc3339(self.first_ts),
            time_end: ts_to_rfc3339(self.last_ts),
            malformed_frames: self.malformed_frames,
            aborted_frames: self.aborted_frames,
        });
        report.generated_at = report
            .capture_summary
            .as_ref()
            .and_then(|summary| summary.time_end.clone().or(summary.time_start.clone()))
            .unwrap_or_else(|| DEFAULT_GENERATED_AT.to_string());

        report.protocols = self
            .protocols
            .into_iter()
            .map(|(path, (frames, bytes))| ProtocolSummary {
                path,
                frames,
                bytes,
            })
            .collect();
        report.experts = self
            .experts
            .into_iter()
            .map(|((Reverse(severity), group, message), stats)| ExpertSummary {
                severity,
                group,
                message,
                count: stats.count,
                frames: stats.frames,
            })
            .collect();
        report.frames = self.frames;
        report
    }
}

fn update_ts_bounds(first: &mut Option<f64>, last: &mut Option<f64>, ts: Option<f64>) {
    let Some(ts) = ts else {
        return;
    };
    if first.is_none_or(|existing| ts < existing) {
        *first = Some(ts);
    }
    if last.is_none_or(|existing| ts > existing) {
        *last = Some(ts);
    }
}

/// RFC 3339 rendering of a capture timestamp in seconds.
pub fn ts_to_rfc3339(ts: Option<f64>) -> Option<String> {
    let ts = ts?;
    let nanos = (ts * 1_000_000_000.0) as i128;
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures;

    struct VecSource(std::vec::IntoIter<Frame>);

    impl PacketSource for VecSource {
        fn next_frame(&mut self) -> Result<Option<Frame>, SourceError> {
            Ok(self.0.next())
        }
    }

    fn input() -> InputInfo {
        InputInfo {
            path: "memory".to_string(),
            bytes: 0,
        }
    }

    fn analyse(frames: Vec<Frame>, options: &AnalysisOptions) -> Report {
        let engine = Engine::with_default_protocols(options.config.clone()).expect("engine");
        analyze_source(input(), VecSource(frames.into_iter()), &engine, options).expect("report")
    }

    #[test]
    fn timestamps_bound_the_capture() {
        let mut first = None;
        let mut last = None;
        update_ts_bounds(&mut first, &mut last, Some(2.0));
        update_ts_bounds(&mut first, &mut last, Some(1.0));
        update_ts_bounds(&mut first, &mut last, None);
        update_ts_bounds(&mut first, &mut last, Some(3.0));
        assert_eq!((first, last), (Some(1.0), Some(3.0)));
        assert_eq!(ts_to_rfc3339(Some(0.0)).as_deref(), Some("1970-01-01T00:00:00Z"));
    }

    #[test]
    fn report_counts_protocol_paths() {
        let frames = fixtures::mixed_capture().expect("capture");
        let total = frames.len() as u64;
        let report = analyse(frames, &AnalysisOptions::default());

        let summary = report.capture_summary.expect("summary");
        assert_eq!(summary.packets_total, total);
        assert_eq!(report.frames.len() as u64, total);
        assert!(
            report
                .protocols
                .iter()
                .any(|p| p.path == "frame:eth:ip:udp:artnet")
        );
        assert!(
            report
                .protocols
                .windows(2)
                .all(|pair| pair[0].path < pair[1].path)
        );
        assert_ne!(report.generated_at, DEFAULT_GENERATED_AT);
    }

    #[test]
    fn experts_sorted_by_severity_then_group() {
        let report = analyse(fixtures::mixed_capture().expect("capture"), &AnalysisOptions::default());
        assert!(!report.experts.is_empty());
        assert!(report.experts.windows(2).all(|pair| {
            (Reverse(pair[0].severity), pair[0].group) <= (Reverse(pair[1].severity), pair[1].group)
        }));
        assert!(
            report
                .experts
                .iter()
                .all(|e| e.frames.len() <= EXPERT_EXAMPLE_FRAMES)
        );
    }

    #[test]
    fn second_pass_reports_what_a_single_pass_does() {
        let single = analyse(fixtures::lmsg_capture().expect("capture"), &AnalysisOptions::default());
        let double = analyse(
            fixtures::lmsg_capture().expect("capture"),
            &AnalysisOptions {
                two_pass: true,
                ..AnalysisOptions::default()
            },
        );
        let info = |report: &Report| -> Vec<String> {
            report.frames.iter().map(|f| f.columns.info.clone()).collect()
        };
        assert_eq!(info(&single), info(&double));
        assert_eq!(single.protocols, double.protocols);
    }

    #[test]
    fn trees_only_when_asked() {
        let without = analyse(fixtures::mixed_capture().expect("capture"), &AnalysisOptions::default());
        assert!(without.frames.iter().all(|f| f.tree.is_none()));

        let with = analyse(
            fixtures::mixed_capture().expect("capture"),
            &AnalysisOptions {
                include_trees: true,
                ..AnalysisOptions::default()
            },
        );
        let tree = with.frames[0].tree.as_ref().expect("tree");
        assert_eq!(tree[0].abbrev, "frame");
    }
}
