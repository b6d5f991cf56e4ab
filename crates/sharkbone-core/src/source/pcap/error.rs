use thiserror::Error;

/// Failures while walking a capture file's blocks.
#[derive(Debug, Error)]
pub enum PcapSourceError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("PCAP parse error ({context}): {message}")]
    Pcap {
        context: &'static str,
        message: String,
    },
    /// The file ends in the middle of the record that would hold `frame`.
    #[error("capture file ends inside the record of frame {frame}")]
    Truncated { frame: u64 },
}
