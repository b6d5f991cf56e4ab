use std::sync::OnceLock;

use bytes::Bytes;

use super::Buffer;

/// Logical concatenation of several buffers.
///
/// `starts[i]` is the offset of `parts[i]` inside the composite; the index is
/// strictly ascending because empty parts are dropped on construction.
pub(super) struct Composite {
    parts: Vec<Buffer>,
    starts: Vec<usize>,
    materialized: OnceLock<Bytes>,
}

impl Composite {
    /// Returns the composite plus its reported and captured lengths.
    pub(super) fn new(parts: Vec<Buffer>) -> (Self, usize, usize) {
        let parts: Vec<Buffer> = parts
            .into_iter()
            .filter(|part| part.reported_length() > 0)
            .collect();

        let mut starts = Vec::with_capacity(parts.len());
        let mut reported = 0usize;
        let mut captured = 0usize;
        let mut captured_prefix = true;
        for part in &parts {
            starts.push(reported);
            reported = reported.saturating_add(part.reported_length());
            if captured_prefix {
                captured += part.captured_length();
                captured_prefix = part.captured_length() == part.reported_length();
            }
        }

        let composite = Self {
            parts,
            starts,
            materialized: OnceLock::new(),
        };
        (composite, reported, captured)
    }

    /// Locate the part covering `[offset, offset + length)` when no
    /// constituent boundary is crossed.
    pub(super) fn single_part(&self, offset: usize, length: usize) -> Option<(&Buffer, usize)> {
        let idx = self.starts.partition_point(|&start| start <= offset);
        let idx = idx.checked_sub(1)?;
        let part = &self.parts[idx];
        let local = offset - self.starts[idx];
        if local + length <= part.reported_length() {
            Some((part, local))
        } else {
            None
        }
    }

    /// Contiguous copy of the captured prefix, built on first use.
    pub(super) fn materialized(&self, captured: usize) -> &Bytes {
        self.materialized.get_or_init(|| {
            tracing::trace!(parts = self.parts.len(), bytes = captured, "materializing composite buffer");
            let mut out = Vec::with_capacity(captured);
            for part in &self.parts {
                let take = part.captured_length().min(captured - out.len());
                if take == 0 {
                    break;
                }
                if let Ok(bytes) = part.get_contiguous_slice(0, take) {
                    out.extend_from_slice(bytes);
                }
            }
            Bytes::from(out)
        })
    }

    pub(super) fn is_materialized(&self) -> bool {
        self.materialized.get().is_some()
    }

    pub(super) fn parts(&self) -> &[Buffer] {
        &self.parts
    }
}
