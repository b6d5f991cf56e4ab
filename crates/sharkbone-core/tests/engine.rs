use std::sync::Arc;

use sharkbone_core::buffer::{Buffer, BufferError};
use sharkbone_core::fixtures;
use sharkbone_core::{DissectError, DissectedFrame, Engine, EngineConfig, Frame, RegistryBuilder};

fn engine(config: EngineConfig) -> Engine {
    Engine::with_default_protocols(config).unwrap()
}

fn dissect_all(engine: &Engine, frames: &[Frame]) -> Vec<DissectedFrame> {
    let mut session = engine.session();
    frames
        .iter()
        .map(|frame| engine.dissect_frame(&mut session, frame))
        .collect()
}

fn mixed() -> Vec<DissectedFrame> {
    dissect_all(
        &engine(EngineConfig::default()),
        &fixtures::mixed_capture().unwrap(),
    )
}

#[test]
fn mixed_capture_protocol_paths() {
    let paths: Vec<String> = mixed().iter().map(|f| f.protocol_path()).collect();
    assert_eq!(
        paths,
        vec![
            "frame:eth:ip:udp:artnet",
            "frame:eth:ip:udp:sacn",
            "frame:eth:ip:udp:sacn",
            "frame:eth:ip:udp:recs",
            "frame:eth:ip:udp:artnet",
            "frame:eth:ip:udp:data",
            "frame:eth:ip:udp:artnet",
        ]
    );
}

#[test]
fn record_stream_is_consumed_record_by_record() {
    let frames = mixed();
    let recs = &frames[3];
    assert_eq!(recs.tree.find_all("recs.record").len(), 2);
    assert!(recs.tree.first("recs.trailer").is_none());
    assert_eq!(recs.columns.info, "Record stream, 2 records");
}

#[test]
fn unbound_port_falls_through_to_data() {
    let frames = mixed();
    let data = &frames[5];
    assert!(data.result().is_ok());
    assert!(!data.is_malformed());
    let bytes = data.tree.first("data.data").unwrap();
    assert_eq!(bytes.length(), b"hello, world".len());
}

#[test]
fn bad_layer_leaves_marker_and_keeps_outer_tree() {
    let frames = mixed();
    let bad = &frames[4];
    assert!(bad.result().is_ok());
    assert!(bad.is_malformed());
    assert!(bad.tree.first("udp").is_some());
    assert!(bad.tree.first("_ws.malformed").is_some());
    assert!(bad.columns.info.ends_with("[Malformed Packet]"));

    let cut = &frames[6];
    assert!(cut.tree.first("_ws.short").is_some());
    assert!(cut.tree.first("_ws.malformed").is_none());
    assert!(cut.captured_length < cut.reported_length);
}

#[test]
fn dissecting_again_renders_the_same_tree() {
    let first = mixed();
    let second = mixed();
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.render(), b.render());
        assert_eq!(a.columns, b.columns);
    }
}

#[test]
fn disabled_heuristic_keeps_the_rest_in_order() {
    let config = EngineConfig {
        disabled_heuristics: vec!["sacn_udp".to_string()],
        ..EngineConfig::default()
    };
    let engine = engine(config);

    let list = engine.registry().heuristics("udp").unwrap();
    let names: Vec<&str> = list.entries().iter().map(|e| e.short_name()).collect();
    assert_eq!(names, vec!["sacn_udp", "recs_udp"]);
    assert!(!list.entries()[0].is_enabled());
    assert!(list.entries()[1].is_enabled());

    let frames = dissect_all(&engine, &fixtures::mixed_capture().unwrap());
    assert_eq!(frames[1].protocol_path(), "frame:eth:ip:udp:sacn");
    assert_eq!(frames[2].protocol_path(), "frame:eth:ip:udp:data");
    assert_eq!(frames[3].protocol_path(), "frame:eth:ip:udp:recs");
}

#[test]
fn disabled_protocol_is_never_selected() {
    let config = EngineConfig {
        disabled_protocols: vec!["artnet".to_string()],
        ..EngineConfig::default()
    };
    let frames = dissect_all(&engine(config), &fixtures::mixed_capture().unwrap());
    assert_eq!(frames[0].protocol_path(), "frame:eth:ip:udp:data");
    assert!(!frames[4].is_malformed());
}

#[test]
fn decode_as_overrides_the_port_binding() {
    let config = EngineConfig {
        decode_as: vec!["udp.port==6454,data".parse().unwrap()],
        ..EngineConfig::default()
    };
    let frames = dissect_all(&engine(config), &fixtures::mixed_capture().unwrap());
    assert_eq!(frames[0].protocol_path(), "frame:eth:ip:udp:data");
    assert_eq!(frames[1].protocol_path(), "frame:eth:ip:udp:sacn");
}

#[test]
fn message_split_across_segments_is_dissected_once() {
    let frames = dissect_all(
        &engine(EngineConfig::default()),
        &fixtures::lmsg_capture().unwrap(),
    );

    let head = &frames[1];
    assert_eq!(head.tree.find_all("lmsg").len(), 1);
    assert_eq!(head.columns.info, "Hello ch=1 len=0 [Segment of a reassembled PDU]");

    let tail = &frames[2];
    let messages = tail.tree.find_all("lmsg");
    assert_eq!(messages.len(), 1);
    let total = fixtures::lmsg_message(2, 1, b"spanning two segments").len();
    assert_eq!(tail.tree.node(messages[0]).length(), total);
    assert_eq!(tail.data_sources.len(), 2);
    assert_eq!(tail.data_sources[1].name, "Reassembled PDU");
    assert_eq!(tail.data_sources[1].buffer.reported_length(), total);
    assert_eq!(tail.columns.info, "Data ch=1 len=21");
    assert_eq!(tail.protocol_path(), "frame:eth:ip:tcp:lmsg");

    assert!(frames[3].experts().next().is_none());
}

#[test]
fn reassembled_frame_replays_identically() {
    let engine = engine(EngineConfig::default());
    let capture = fixtures::lmsg_capture().unwrap();
    let mut session = engine.session();
    let first: Vec<_> = capture
        .iter()
        .map(|frame| engine.dissect_frame(&mut session, frame))
        .collect();
    let records = session.streams().record_count();
    let second: Vec<_> = capture
        .iter()
        .map(|frame| engine.dissect_frame(&mut session, frame))
        .collect();

    assert_eq!(session.streams().record_count(), records);
    for (a, b) in first.iter().zip(&second) {
        assert_eq!(a.render(), b.render());
        assert_eq!(a.columns, b.columns);
    }
}

#[test]
fn desegmenting_off_dissects_segments_alone() {
    let mut config = EngineConfig::default();
    config.reassembly.enabled = false;
    let frames = dissect_all(&engine(config), &fixtures::lmsg_capture().unwrap());
    assert!(frames[1].is_malformed());
    assert!(frames.iter().all(|frame| frame.data_sources.len() == 1));
}

#[test]
fn self_recursion_hits_the_depth_limit() {
    let mut builder = RegistryBuilder::new();
    let proto = builder.register_protocol("Loop", "LOOP", "loop").unwrap();
    builder
        .register_fn("frame", proto, |buffer, cx, tree| {
            let registry = cx.registry();
            let again = registry.dissector("frame").unwrap();
            cx.call_dissector(again, buffer, tree)?;
            Ok(buffer.reported_length())
        })
        .unwrap();
    let config = EngineConfig {
        max_depth: 8,
        ..EngineConfig::default()
    };
    let engine = Engine::new(Arc::new(builder.build(config).unwrap()));

    let mut session = engine.session();
    let dissected = engine.dissect_frame(&mut session, &Frame::new(1, 1, vec![0u8; 4]));
    assert!(matches!(
        dissected.result(),
        Err(DissectError::RecursionLimit { limit: 8, .. })
    ));
    assert!(dissected.columns.info.ends_with("[Dissection aborted]"));
    assert!(dissected.is_malformed());
}

#[test]
fn byte_budget_aborts_only_that_frame() {
    let config = EngineConfig {
        max_dissected_bytes: 100,
        ..EngineConfig::default()
    };
    let engine = engine(config);
    let mut session = engine.session();

    let big = Frame::new(1, 1, fixtures::udp_frame(50000, 9999, &[0u8; 64]).unwrap());
    let small = Frame::new(2, 1, vec![0u8; 20]);
    let aborted = engine.dissect_frame(&mut session, &big);
    let fine = engine.dissect_frame(&mut session, &small);

    assert!(matches!(
        aborted.result(),
        Err(DissectError::ByteBudget { limit: 100, .. })
    ));
    assert!(fine.result().is_ok());
}

#[test]
fn reads_past_captured_and_reported_lengths_fail_differently() {
    let buffer = Buffer::real(vec![0u8; 8], 20);
    assert!(matches!(
        buffer.read_bytes(10, 4),
        Err(BufferError::ContainedBounds { .. })
    ));
    assert!(matches!(
        buffer.read_bytes(18, 6),
        Err(BufferError::Bounds { .. })
    ));
}
