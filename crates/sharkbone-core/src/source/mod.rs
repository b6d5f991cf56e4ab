//! Capture-file input.
//!
//! A [`PacketSource`] yields one [`Frame`] per captured packet, numbered from
//! 1 in file order. All file I/O of the crate lives here.

mod pcap;

pub use pcap::PcapFileSource;

use bytes::Bytes;
use thiserror::Error;

/// One captured frame, the input of a dissection pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub number: u64,
    /// Seconds since the Unix epoch.
    pub timestamp: Option<f64>,
    /// Link-layer type (`LINKTYPE_*` value).
    pub linktype: u32,
    /// Captured bytes.
    pub data: Bytes,
    /// Length of the frame on the wire; at least `data.len()`.
    pub reported_length: usize,
}

impl Frame {
    /// Frame captured in full.
    pub fn new(number: u64, linktype: u32, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        let reported_length = data.len();
        Self {
            number,
            timestamp: None,
            linktype,
            data,
            reported_length,
        }
    }

    pub fn with_timestamp(mut self, timestamp: f64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Mark the frame as cut by a snapshot length: it was `reported_length`
    /// bytes on the wire.
    pub fn with_reported_length(mut self, reported_length: usize) -> Self {
        self.reported_length = reported_length.max(self.data.len());
        self
    }

    pub fn captured_length(&self) -> usize {
        self.data.len()
    }
}

pub trait PacketSource {
    fn next_frame(&mut self) -> Result<Option<Frame>, SourceError>;
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PCAP parse error: {0}")]
    Pcap(String),
    #[error("capture file ends inside the record of frame {frame}")]
    Truncated { frame: u64 },
}

impl From<pcap::error::PcapSourceError> for SourceError {
    fn from(value: pcap::error::PcapSourceError) -> Self {
        match value {
            pcap::error::PcapSourceError::Io(err) => SourceError::Io(err),
            pcap::error::PcapSourceError::Pcap { context, message } => {
                SourceError::Pcap(format!("{context}: {message}"))
            }
            pcap::error::PcapSourceError::Truncated { frame } => SourceError::Truncated { frame },
        }
    }
}
