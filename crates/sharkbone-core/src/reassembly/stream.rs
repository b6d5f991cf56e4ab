use std::collections::HashMap;
use std::fmt;
use std::net::SocketAddr;

use crate::buffer::Buffer;
use crate::config::ReassemblyConfig;
use crate::dissect::SegmentInfo;
use crate::error::DissectError;
use crate::tree::{ExpertGroup, ExpertInfo};

/// One direction of a transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamKey {
    pub source: SocketAddr,
    pub destination: SocketAddr,
}

impl StreamKey {
    pub fn new(source: SocketAddr, destination: SocketAddr) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// The opposite direction of the same connection.
    pub fn reversed(self) -> Self {
        Self::new(self.destination, self.source)
    }
}

impl fmt::Display for StreamKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

/// True when `a` precedes `b` in 32-bit sequence space.
pub(crate) fn seq_before(a: u32, b: u32) -> bool {
    (a.wrapping_sub(b) as i32) < 0
}

/// Outcome of one segment, computed once and replayed on later passes.
#[derive(Debug, Clone, Default)]
pub(super) struct SegmentRecord {
    /// Retransmitted prefix that was ignored.
    pub(super) skip: usize,
    pub(super) pdus: Vec<Pdu>,
    pub(super) tail: Tail,
    pub(super) notes: Vec<Note>,
}

#[derive(Debug, Clone)]
pub(super) enum Pdu {
    /// Whole message inside this segment.
    InSegment { offset: usize, length: usize },
    /// Message completed by the first `length` bytes after `skip`.
    Reassembled {
        earlier: Vec<Buffer>,
        frames: Vec<u64>,
        length: usize,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) enum Tail {
    #[default]
    Complete,
    /// Bytes from `offset` are buffered as the start of a later message.
    Pending { offset: usize },
    /// Bytes from `offset` cannot be framed.
    Undecoded { offset: usize },
    /// Nothing new in this segment.
    Retransmission,
}

#[derive(Debug, Clone)]
pub(super) struct Note {
    pub(super) offset: usize,
    pub(super) length: usize,
    pub(super) info: ExpertInfo,
}

/// PDU accumulator of one stream direction.
#[derive(Debug)]
struct StreamState {
    next_seq: u32,
    pending: Vec<(u64, Buffer)>,
    pending_len: usize,
    expected: Option<usize>,
    desynchronized: bool,
}

impl StreamState {
    fn new(seq: u32) -> Self {
        Self {
            next_seq: seq,
            pending: Vec::new(),
            pending_len: 0,
            expected: None,
            desynchronized: false,
        }
    }
}

type SegmentKey = (StreamKey, u64, u32);

/// Reassembly bookkeeping of one capture session.
///
/// Streams are keyed by direction. Every processed segment leaves a record
/// keyed by (stream, frame, sequence number), so dissecting the same frame
/// again replays the record and leaves the streams untouched.
#[derive(Debug, Default)]
pub struct StreamTable {
    streams: HashMap<StreamKey, StreamState>,
    records: HashMap<SegmentKey, SegmentRecord>,
    pending_total: usize,
}

impl StreamTable {
    /// Streams with live state.
    pub fn active_streams(&self) -> usize {
        self.streams.len()
    }

    pub fn is_desynchronized(&self, stream: &StreamKey) -> bool {
        self.streams
            .get(stream)
            .is_some_and(|state| state.desynchronized)
    }

    /// Bytes buffered for an incomplete message on `stream`.
    pub fn pending_len(&self, stream: &StreamKey) -> usize {
        self.streams.get(stream).map_or(0, |state| state.pending_len)
    }

    /// Bytes buffered across all streams.
    pub fn pending_total(&self) -> usize {
        self.pending_total
    }

    /// Segments processed so far.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub(super) fn record(&self, segment: &SegmentInfo, frame: u64) -> Option<&SegmentRecord> {
        self.records.get(&(segment.stream, frame, segment.seq))
    }

    pub(super) fn store(&mut self, segment: &SegmentInfo, frame: u64, record: SegmentRecord) {
        self.records
            .insert((segment.stream, frame, segment.seq), record);
    }

    /// Feed one segment into its stream and decide what it contains.
    pub(super) fn plan<P>(
        &mut self,
        segment: &SegmentInfo,
        frame: u64,
        buffer: &Buffer,
        min_header_length: usize,
        peek: &P,
        config: &ReassemblyConfig,
    ) -> SegmentRecord
    where
        P: Fn(&Buffer, usize) -> Result<usize, DissectError>,
    {
        let mut record = SegmentRecord::default();
        let seg_len = buffer.reported_length();
        let state = self
            .streams
            .entry(segment.stream)
            .or_insert_with(|| StreamState::new(segment.seq));

        if state.desynchronized {
            record.tail = Tail::Undecoded { offset: 0 };
        } else if buffer.captured_length() < seg_len {
            self.pending_total -= state.pending_len;
            desynchronize(state, segment, &mut record, 0, "segment cut short by the capture");
        } else {
            sequence(state, segment, seg_len, &mut record, &mut self.pending_total);
            if record.tail == Tail::Complete && record.skip < seg_len {
                frame_messages(
                    state,
                    segment,
                    frame,
                    buffer,
                    min_header_length,
                    peek,
                    config,
                    &mut record,
                    &mut self.pending_total,
                );
            }
        }

        if segment.fin {
            self.close_state(segment, &mut record, seg_len);
        }
        record
    }

    /// Tear down `segment.stream`, noting an unfinished message.
    pub(super) fn close(&mut self, segment: &SegmentInfo, length: usize) -> SegmentRecord {
        let mut record = SegmentRecord::default();
        self.close_state(segment, &mut record, length);
        record
    }

    fn close_state(&mut self, segment: &SegmentInfo, record: &mut SegmentRecord, length: usize) {
        let Some(state) = self.streams.remove(&segment.stream) else {
            return;
        };
        self.pending_total -= state.pending_len;
        if state.pending_len > 0 {
            let expected = state
                .expected
                .map_or_else(|| "an unknown number of".to_string(), |n| n.to_string());
            record.notes.push(Note {
                offset: 0,
                length,
                info: ExpertInfo::warning(
                    ExpertGroup::Reassemble,
                    format!(
                        "stream ended with an incomplete message ({} of {expected} bytes)",
                        state.pending_len
                    ),
                ),
            });
        }
        tracing::debug!(stream = %segment.stream, "stream closed");
    }
}

fn sequence(
    state: &mut StreamState,
    segment: &SegmentInfo,
    seg_len: usize,
    record: &mut SegmentRecord,
    pending_total: &mut usize,
) {
    let expected = state.next_seq;
    if seq_before(segment.seq, expected) {
        let overlap = expected.wrapping_sub(segment.seq) as usize;
        if overlap >= seg_len {
            record.tail = Tail::Retransmission;
            record.notes.push(Note {
                offset: 0,
                length: seg_len,
                info: ExpertInfo::note(ExpertGroup::Sequence, "retransmitted segment"),
            });
            return;
        }
        record.skip = overlap;
        record.notes.push(Note {
            offset: 0,
            length: overlap,
            info: ExpertInfo::note(
                ExpertGroup::Sequence,
                format!("{overlap} retransmitted bytes ignored"),
            ),
        });
    } else if segment.seq != expected {
        let missing = segment.seq.wrapping_sub(expected);
        let info = if state.pending_len > 0 {
            tracing::warn!(
                stream = %segment.stream,
                missing,
                dropped = state.pending_len,
                "sequence gap, partial message dropped"
            );
            let info = ExpertInfo::warning(
                ExpertGroup::Sequence,
                format!(
                    "{missing} bytes not captured before this segment; {} buffered bytes dropped",
                    state.pending_len
                ),
            );
            *pending_total -= state.pending_len;
            state.pending.clear();
            state.pending_len = 0;
            state.expected = None;
            info
        } else {
            ExpertInfo::note(
                ExpertGroup::Sequence,
                format!("{missing} bytes not captured before this segment"),
            )
        };
        record.notes.push(Note {
            offset: 0,
            length: 0,
            info,
        });
    }
    let end = segment.seq.wrapping_add(seg_len as u32);
    if !seq_before(end, state.next_seq) {
        state.next_seq = end;
    }
}

#[allow(clippy::too_many_arguments)]
fn frame_messages<P>(
    state: &mut StreamState,
    segment: &SegmentInfo,
    frame: u64,
    buffer: &Buffer,
    min_header_length: usize,
    peek: &P,
    config: &ReassemblyConfig,
    record: &mut SegmentRecord,
    pending_total: &mut usize,
) where
    P: Fn(&Buffer, usize) -> Result<usize, DissectError>,
{
    let skip = record.skip;
    let current = match buffer.subset_remaining(skip) {
        Ok(current) => current,
        Err(err) => {
            *pending_total -= state.pending_len;
            desynchronize(state, segment, record, skip, &err.to_string());
            return;
        }
    };
    let pending_len = state.pending_len;
    let work = if state.pending.is_empty() {
        current.clone()
    } else {
        let mut parts: Vec<Buffer> = state.pending.iter().map(|(_, b)| b.clone()).collect();
        parts.push(current.clone());
        Buffer::composite(parts)
    };
    let available_total = work.reported_length();
    // Segment offset of work position `pos`.
    let in_segment = |pos: usize| skip + pos.saturating_sub(pending_len);

    let mut pos = 0;
    loop {
        let available = available_total - pos;
        if available == 0 {
            break;
        }
        if available < min_header_length {
            state.expected = None;
            record.tail = Tail::Pending {
                offset: in_segment(pos),
            };
            break;
        }

        let total = match peek(&work, pos) {
            Ok(total) if total == 0 || total < min_header_length => {
                Err(format!("implausible message length {total}"))
            }
            Ok(total) if total > config.max_pdu_length => Err(format!(
                "message length {total} exceeds the {} byte ceiling",
                config.max_pdu_length
            )),
            Ok(total) if pos < pending_len && pos + total <= pending_len => {
                Err(format!("message length {total} ends inside buffered data"))
            }
            Ok(total) => Ok(total),
            Err(err) => Err(err.to_string()),
        };
        let total = match total {
            Ok(total) => total,
            Err(reason) => {
                *pending_total -= state.pending_len;
                desynchronize(state, segment, record, in_segment(pos), &reason);
                return;
            }
        };

        if total > available {
            state.expected = Some(total);
            record.tail = Tail::Pending {
                offset: in_segment(pos),
            };
            break;
        }

        if pos < pending_len {
            record.pdus.push(Pdu::Reassembled {
                earlier: state.pending.iter().map(|(_, b)| b.clone()).collect(),
                frames: state.pending.iter().map(|(f, _)| *f).collect(),
                length: pos + total - pending_len,
            });
        } else {
            record.pdus.push(Pdu::InSegment {
                offset: in_segment(pos),
                length: total,
            });
        }
        pos += total;
    }

    *pending_total -= state.pending_len;
    if record.tail == Tail::Complete {
        state.pending.clear();
        state.pending_len = 0;
        state.expected = None;
        return;
    }

    let new_pending = if pos < pending_len {
        let mut kept = std::mem::take(&mut state.pending);
        kept.push((frame, current));
        kept
    } else {
        let from = pos - pending_len;
        match current.subset_remaining(from) {
            Ok(rest) => vec![(frame, rest)],
            Err(err) => {
                desynchronize(state, segment, record, in_segment(pos), &err.to_string());
                return;
            }
        }
    };
    let new_len = available_total - pos;
    if *pending_total + new_len > config.max_pending_bytes {
        desynchronize(
            state,
            segment,
            record,
            in_segment(pos),
            &format!(
                "buffered data would exceed the {} byte ceiling",
                config.max_pending_bytes
            ),
        );
        return;
    }
    state.pending = new_pending;
    state.pending_len = new_len;
    *pending_total += new_len;
}

fn desynchronize(
    state: &mut StreamState,
    segment: &SegmentInfo,
    record: &mut SegmentRecord,
    offset: usize,
    reason: &str,
) {
    tracing::warn!(stream = %segment.stream, reason, "stream desynchronized");
    state.desynchronized = true;
    state.pending.clear();
    state.pending_len = 0;
    state.expected = None;
    record.tail = Tail::Undecoded { offset };
    record.notes.push(Note {
        offset,
        length: 0,
        info: ExpertInfo::warning(
            ExpertGroup::Reassemble,
            format!("stream desynchronized: {reason}"),
        ),
    });
}

#[cfg(test)]
mod tests {
    use super::seq_before;

    #[test]
    fn sequence_comparison_wraps() {
        assert!(seq_before(1, 2));
        assert!(!seq_before(2, 1));
        assert!(seq_before(u32::MAX - 5, 3));
        assert!(!seq_before(3, u32::MAX - 5));
        assert!(!seq_before(7, 7));
    }
}
