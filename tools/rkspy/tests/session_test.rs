use rk_spy::records::{action, info, queue};
use rk_spy::{MemoryBackend, PayloadBuilder, SpyConfig, Tracer};
use rkspy::{RecordFormatter, Session};

fn capture(records: &[(u8, Vec<u8>)]) -> Vec<u8> {
    let backend = MemoryBackend::new();
    let mut tracer = Tracer::new(SpyConfig::default(), backend.clone());
    for (record_type, payload) in records {
        tracer.record(*record_type, payload, true).unwrap();
    }
    backend.bytes()
}

fn payload(build: impl FnOnce(&mut PayloadBuilder)) -> Vec<u8> {
    let mut builder = PayloadBuilder::new();
    build(&mut builder);
    builder.into_vec()
}

#[test]
fn session_names_components_and_filters_groups() {
    let bytes = capture(&[
        (info::OBJ_DICT, payload(|p| { p.push_u16(1).push_str("sampler"); })),
        (queue::POST, payload(|p| { p.push_u16(0).push_u16(1); })),
        (action::DISPATCH, payload(|p| { p.push_u16(1).push_u16(2); })),
    ]);

    let mut formatter = RecordFormatter::new(false, true);
    assert!(formatter.set_filters(&["act".to_owned()]).is_empty());
    let mut session = Session::new(formatter);

    // Split mid-stream to exercise frame reassembly.
    let (head, tail) = bytes.split_at(bytes.len() / 2);
    let mut lines = session.feed(head);
    lines.extend(session.feed(tail));

    assert_eq!(lines.len(), 1);
    let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(value["type"], "ACT_DISPATCH");
    assert_eq!(value["text"], "sampler trigger=2");
    assert!(value["timestamp_us"].is_u64());
    assert_eq!(session.corrupt_frames(), 0);
}

#[test]
fn corrupt_frames_are_counted_and_skipped() {
    let mut bytes = capture(&[
        (queue::FULL, payload(|p| { p.push_u16(3).push_u16(4); })),
        (queue::GET, payload(|p| { p.push_u16(3).push_u16(3); })),
    ]);
    // Damage the first frame's sequence byte; its checksum no longer matches.
    bytes[0] ^= 0x01;

    let mut session = Session::new(RecordFormatter::new(false, true));
    let lines = session.feed(&bytes);

    assert_eq!(lines.len(), 1);
    let value: serde_json::Value = serde_json::from_str(&lines[0]).unwrap();
    assert_eq!(value["type"], "EQ_GET");
    assert_eq!(session.corrupt_frames(), 1);
}
