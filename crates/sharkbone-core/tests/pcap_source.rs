use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use sharkbone_core::fixtures::{self, BASE_TIMESTAMP};
use sharkbone_core::{PacketSource, PcapFileSource, SourceError};

fn temp_path(name: &str) -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    std::env::temp_dir().join(format!("sharkbone_{name}_{unique}.pcapng"))
}

#[test]
fn pcap_source_reads_frames_written_by_fixtures() {
    let path = temp_path("mixed");
    let written = fixtures::mixed_capture().unwrap();
    fixtures::write_pcapng(&path, &written).unwrap();

    let mut source = PcapFileSource::open(&path).unwrap();
    let mut frames = Vec::new();
    while let Some(frame) = source.next_frame().unwrap() {
        frames.push(frame);
    }
    let _ = fs::remove_file(&path);

    assert_eq!(frames.len(), written.len());
    for (idx, (read, original)) in frames.iter().zip(&written).enumerate() {
        assert_eq!(read.number, idx as u64 + 1);
        assert_eq!(read.linktype, 1);
        assert_eq!(read.data, original.data);
        assert_eq!(read.reported_length, original.reported_length);
    }
    let first = frames[0].timestamp.unwrap();
    assert!((first - BASE_TIMESTAMP).abs() < 1e-6);
}

#[test]
fn pcap_source_keeps_wire_length_of_cut_frames() {
    let path = temp_path("cut");
    let written = fixtures::mixed_capture().unwrap();
    fixtures::write_pcapng(&path, &written).unwrap();

    let mut source = PcapFileSource::open(&path).unwrap();
    let mut last = None;
    while let Some(frame) = source.next_frame().unwrap() {
        last = Some(frame);
    }
    let _ = fs::remove_file(&path);

    let last = last.unwrap();
    assert!(last.reported_length > last.captured_length());
}

#[test]
fn pcap_source_rejects_truncated_file() {
    let path = temp_path("truncated");
    fs::write(&path, [0x0a, 0x0d, 0x0d]).unwrap();
    let err = match PcapFileSource::open(&path) {
        Ok(_) => panic!("expected truncated file to be rejected"),
        Err(err) => err,
    };
    let _ = fs::remove_file(&path);

    assert!(matches!(err, SourceError::Io(_)));
}

#[test]
fn pcap_source_reports_record_cut_at_end_of_file() {
    let path = temp_path("cut_record");
    let written = fixtures::lmsg_capture().unwrap();
    let mut bytes = fixtures::pcapng_bytes(&written);
    bytes.truncate(bytes.len() - 6);
    fs::write(&path, &bytes).unwrap();

    let mut source = PcapFileSource::open(&path).unwrap();
    let mut read = 0;
    let err = loop {
        match source.next_frame() {
            Ok(Some(_)) => read += 1,
            Ok(None) => panic!("expected the cut record to be reported"),
            Err(err) => break err,
        }
    };
    let _ = fs::remove_file(&path);

    assert_eq!(read, written.len() - 1);
    assert!(matches!(err, SourceError::Truncated { frame: 4 }));
}
