use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use sharkbone_core::fixtures;
use sharkbone_core::{AnalysisError, AnalysisOptions, SourceError, analyze_files, analyze_pcap_file};

fn temp_dir() -> PathBuf {
    let unique = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("sharkbone_batch_{unique}"));
    fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn batch_matches_one_by_one_analysis_in_input_order() {
    let dir = temp_dir();
    let mut paths = Vec::new();
    for idx in 0..6 {
        let (name, frames) = if idx % 2 == 0 {
            ("mixed", fixtures::mixed_capture().unwrap())
        } else {
            ("lmsg", fixtures::lmsg_capture().unwrap())
        };
        let path = dir.join(format!("{idx}_{name}.pcapng"));
        fixtures::write_pcapng(&path, &frames).unwrap();
        paths.push(path);
    }

    let options = AnalysisOptions::default();
    let batch = analyze_files(&paths, &options).unwrap();
    assert_eq!(batch.len(), paths.len());
    for (path, result) in paths.iter().zip(batch) {
        let report = result.unwrap();
        let single = analyze_pcap_file(path, &options).unwrap();
        assert_eq!(report.input.path, path.display().to_string());
        assert_eq!(
            serde_json::to_value(&report).unwrap(),
            serde_json::to_value(&single).unwrap()
        );
    }
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn batch_reports_a_missing_file_in_its_slot() {
    let dir = temp_dir();
    let good = dir.join("good.pcapng");
    fixtures::write_pcapng(&good, &fixtures::lmsg_capture().unwrap()).unwrap();
    let missing = dir.join("missing.pcapng");

    let results = analyze_files(&[missing, good], &AnalysisOptions::default()).unwrap();
    assert!(matches!(
        results[0],
        Err(AnalysisError::Source(SourceError::Io(_)))
    ));
    let report = results[1].as_ref().unwrap();
    assert_eq!(report.capture_summary.as_ref().unwrap().packets_total, 4);
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn unknown_disabled_protocol_fails_the_whole_batch() {
    let mut options = AnalysisOptions::default();
    options.config.disabled_protocols.push("nope".to_string());
    let err = analyze_files(&[], &options).unwrap_err();
    assert!(matches!(err, AnalysisError::Registration(_)));
}
