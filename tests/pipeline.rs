mod common;

use common::{CountingReader, bx, bx_declared, concat, ftyp, full_box, reader};
use isoinspect::issues::codes;
use isoinspect::reader::Result as ReadResult;
use isoinspect::{
    EventSource, EventStream, ParseError, ParseEvent, ParseEventKind, ParseOptions, RandomAccessReader, ReaderError,
    Severity, parse,
};
use std::io;

fn collect(bytes: Vec<u8>, options: ParseOptions) -> Vec<ParseEvent> {
    parse(reader(bytes), options)
        .collect::<Result<Vec<_>, _>>()
        .expect("parse failed")
}

fn summary(events: &[ParseEvent]) -> Vec<(bool, String, usize)> {
    events.iter().map(|e| (e.is_start(), e.header().identifier(), e.depth())).collect()
}

#[test]
fn ftyp_and_empty_moov_in_strict_mode() {
    let bytes = concat(&[&ftyp(), &bx(b"moov", &[])]);
    let events = collect(bytes, ParseOptions::strict());

    assert_eq!(
        summary(&events),
        vec![
            (true, "ftyp".to_string(), 0),
            (false, "ftyp".to_string(), 0),
            (true, "moov".to_string(), 0),
            (false, "moov".to_string(), 0),
        ]
    );
    for e in &events {
        assert!(e.issues.is_empty(), "{:?}", e.issues);
        assert!(e.validation_issues.is_empty(), "{:?}", e.validation_issues);
    }

    let ftyp_start = &events[0];
    assert_eq!(ftyp_start.offset, 0);
    assert_eq!(ftyp_start.header().total_size, 24);
    assert_eq!(ftyp_start.metadata.as_ref().map(|m| m.name), Some("File Type"));
    let payload = ftyp_start.payload.as_ref().expect("ftyp payload");
    assert_eq!(payload.value("major_brand"), Some("isom"));
    assert_eq!(payload.value("minor_version"), Some("1"));

    // finish events carry the end offset and no payload
    assert_eq!(events[1].offset, 24);
    assert!(events[1].payload.is_none());
    assert_eq!(events[3].offset, 32);
}

#[test]
fn nested_children_are_walked_depth_first() {
    let trak = bx(b"trak", &bx(b"tkhd", &[0; 4]));
    let bytes = concat(&[&ftyp(), &bx(b"moov", &concat(&[&trak, &bx(b"udta", &[])]))]);
    let events = collect(bytes, ParseOptions::tolerant());

    let order: Vec<(bool, String, usize)> = summary(&events);
    let expected = [
        (true, "ftyp", 0),
        (false, "ftyp", 0),
        (true, "moov", 0),
        (true, "trak", 1),
        (true, "tkhd", 2),
        (false, "tkhd", 2),
        (false, "trak", 1),
        (true, "udta", 1),
        (false, "udta", 1),
        (false, "moov", 0),
    ];
    assert_eq!(order.len(), expected.len());
    for (got, want) in order.iter().zip(expected) {
        assert_eq!((got.0, got.1.as_str(), got.2), want);
    }
}

#[test]
fn truncated_box_in_tolerant_mode() {
    // declares 100 bytes, only 20 present
    let bytes = concat(&[&ftyp(), &bx_declared(b"free", 100, &[0; 12])]);
    let events = collect(bytes, ParseOptions::tolerant());
    assert_eq!(events.len(), 4);

    let start = &events[2];
    assert!(start.is_start());
    assert_eq!(start.issues.len(), 1);
    let issue = &start.issues[0];
    assert_eq!(issue.code, codes::PAYLOAD_TRUNCATED);
    assert_eq!(issue.severity, Severity::Error);
    assert_eq!(issue.byte_range, Some(32..124));
    assert_eq!(issue.affected_node_ids, vec![24]);

    // finish offset is clamped to the data
    assert_eq!(events[3].offset, 44);
}

#[test]
fn truncated_box_in_strict_mode_aborts() {
    let bytes = concat(&[&ftyp(), &bx_declared(b"free", 100, &[0; 12]), &bx(b"free", &[])]);
    let mut stream = parse(reader(bytes), ParseOptions::strict());

    assert!(stream.next().expect("event").is_ok());
    assert!(stream.next().expect("event").is_ok());
    match stream.next() {
        Some(Err(ParseError::Structural(issue))) => assert_eq!(issue.code, codes::PAYLOAD_TRUNCATED),
        other => panic!("unexpected {other:?}"),
    }
    assert!(stream.next().is_none());
    assert!(stream.next().is_none());
}

#[test]
fn undersized_box_does_not_loop() {
    // size 4 is smaller than the header; a following box must not be reached
    let bytes = concat(&[&ftyp(), &bx_declared(b"free", 4, &[]), &bx(b"free", &[0; 8])]);
    let events = collect(bytes, ParseOptions::tolerant());

    assert_eq!(events.len(), 4);
    let issue = &events[2].issues[0];
    assert_eq!(issue.code, codes::ZERO_SIZE_LOOP);
    assert_eq!(issue.byte_range, Some(24..32));
    assert!(events[2].payload.is_none());
}

#[test]
fn large_size_with_one_is_too_small() {
    // size 1 with a largesize of 0 cannot make progress either
    let mut bad = Vec::new();
    bad.extend_from_slice(&1u32.to_be_bytes());
    bad.extend_from_slice(b"free");
    bad.extend_from_slice(&0u64.to_be_bytes());
    let events = collect(concat(&[&ftyp(), &bad]), ParseOptions::tolerant());
    assert_eq!(events.len(), 4);
    assert_eq!(events[2].issues[0].code, codes::ZERO_SIZE_LOOP);
}

#[test]
fn size_zero_extends_to_end_of_file() {
    let bytes = concat(&[&ftyp(), &bx_declared(b"mdat", 0, &[7; 10])]);
    let events = collect(bytes, ParseOptions::tolerant());

    let mdat = events[2].header();
    assert_eq!(mdat.total_size, 18);
    assert_eq!(mdat.payload_range, 32..42);
    assert!(events[2].issues.is_empty());
    assert_eq!(events[2].payload.as_ref().and_then(|p| p.value("payload_length")), Some("10"));
}

#[test]
fn large_size_header() {
    let mut large = Vec::new();
    large.extend_from_slice(&1u32.to_be_bytes());
    large.extend_from_slice(b"free");
    large.extend_from_slice(&20u64.to_be_bytes());
    large.extend_from_slice(&[0; 4]);
    let events = collect(concat(&[&ftyp(), &large]), ParseOptions::strict());

    let h = events[2].header();
    assert_eq!(h.header_size, 16);
    assert_eq!(h.total_size, 20);
    assert_eq!(h.payload_range, 40..44);
}

#[test]
fn uuid_header() {
    let uuid: [u8; 16] = [0x11; 16];
    let mut payload = uuid.to_vec();
    payload.extend_from_slice(&[1, 2]);
    let events = collect(concat(&[&ftyp(), &bx(b"uuid", &payload)]), ParseOptions::tolerant());

    let h = events[2].header();
    assert_eq!(h.header_size, 24);
    assert_eq!(h.uuid, Some(uuid));
    assert_eq!(h.identifier(), format!("uuid:{}", "11".repeat(16)));
}

#[test]
fn truncated_child_header_trims_container() {
    // moov ends exactly at end of file; its 4 trailing bytes cannot hold a header
    let moov = bx(b"moov", &[0, 0, 0, 8]);
    let events = collect(concat(&[&ftyp(), &moov]), ParseOptions::tolerant());

    assert_eq!(events.len(), 4);
    assert!(events[2].issues.is_empty());
    let finish = &events[3];
    assert!(!finish.is_start());
    assert_eq!(finish.issues.len(), 1);
    assert_eq!(finish.issues[0].code, codes::HEADER_TRUNCATED_FIELD);
    assert_eq!(finish.issues[0].affected_node_ids, vec![24]);
}

#[test]
fn child_header_cut_by_parent_is_trailing_bytes() {
    let moov = bx(b"moov", &[0, 0, 0, 8]);
    let bytes = concat(&[&ftyp(), &moov, &bx(b"free", &[])]);
    let events = collect(bytes, ParseOptions::tolerant());

    assert_eq!(events.len(), 6);
    let issue = &events[3].issues[0];
    assert_eq!(issue.code, codes::TRAILING_BYTES);
    assert_eq!(issue.severity, Severity::Warning);
    // the following sibling is still visited
    assert_eq!(events[4].header().identifier(), "free");
}

#[test]
fn invalid_child_fourcc_stops_container() {
    let child = bx_declared(&[0, 1, 2, 3], 8, &[]);
    let moov = bx(b"moov", &concat(&[&bx(b"udta", &[]), &child]));
    let events = collect(concat(&[&ftyp(), &moov]), ParseOptions::tolerant());

    let finish = events.iter().rfind(|e| !e.is_start()).expect("moov finish");
    assert_eq!(finish.header().identifier(), "moov");
    assert_eq!(finish.issues[0].code, codes::HEADER_INVALID_FOURCC);
    assert_eq!(finish.issues[0].byte_range, Some(40..48));
}

#[test]
fn child_header_failure_in_strict_mode_aborts() {
    let moov = bx(b"moov", &[0, 0, 0, 8]);
    let mut stream = parse(reader(concat(&[&ftyp(), &moov])), ParseOptions::strict());
    let items: Vec<_> = stream.by_ref().collect();

    assert_eq!(items.len(), 4);
    assert!(items[..3].iter().all(|i| i.is_ok()));
    assert!(matches!(&items[3], Err(ParseError::Structural(i)) if i.code == codes::HEADER_TRUNCATED_FIELD));
}

#[test]
fn trailing_bytes_at_top_level_are_detached() {
    let bytes = concat(&[&ftyp(), &[0, 0, 0]]);
    let mut stream = parse(reader(bytes), ParseOptions::tolerant());
    let events: Vec<_> = stream.by_ref().collect::<Result<_, _>>().expect("parse failed");

    assert_eq!(events.len(), 2);
    let detached = stream.detached_issues();
    assert_eq!(detached.len(), 1);
    assert_eq!(detached[0].code, codes::HEADER_TRUNCATED_FIELD);
    assert!(detached[0].affected_node_ids.is_empty());
    assert_eq!(detached[0].byte_range, Some(24..28));
}

#[test]
fn depth_guard_stops_descent() {
    let minf = bx(b"minf", &[]);
    let mdia = bx(b"mdia", &minf);
    let trak = bx(b"trak", &mdia);
    let moov = bx(b"moov", &trak);
    let events = collect(moov, ParseOptions::tolerant().with_max_depth(2));

    assert_eq!(events.len(), 6);
    assert!(events.iter().all(|e| e.header().identifier() != "minf"));
    let mdia_start = &events[2];
    assert_eq!(mdia_start.depth(), 2);
    assert_eq!(mdia_start.issues[0].code, codes::RECURSION_DEPTH_EXCEEDED);
    assert_eq!(mdia_start.issues[0].severity, Severity::Warning);
}

#[test]
fn depth_guard_in_strict_mode_aborts() {
    let moov = bx(b"moov", &bx(b"trak", &[]));
    let items: Vec<_> = parse(reader(moov), ParseOptions::strict().with_max_depth(1)).collect();
    assert!(matches!(items.last(), Some(Err(ParseError::Structural(i))) if i.code == codes::RECURSION_DEPTH_EXCEEDED));
}

#[test]
fn sample_description_skips_entry_count() {
    let mut payload = vec![0, 0, 0, 0, 0, 0, 0, 1];
    payload.extend(bx(b"avc1", &[]));
    let events = collect(bx(b"stsd", &payload), ParseOptions::tolerant());

    assert_eq!(events.len(), 4);
    assert_eq!(events[1].header().identifier(), "avc1");
    assert_eq!(events[1].offset, 16);
    assert_eq!(events[1].depth(), 1);
}

#[test]
fn iso_meta_skips_version_and_flags() {
    let hdlr = full_box(b"hdlr", 0, 0, &concat(&[&[0; 4], b"mdir", &[0; 12], b"\0"]));
    let meta = full_box(b"meta", 0, 0, &hdlr);
    let events = collect(meta, ParseOptions::tolerant());

    assert_eq!(events[1].header().identifier(), "hdlr");
    assert_eq!(events[1].offset, 12);
    assert_eq!(events[1].payload.as_ref().and_then(|p| p.value("handler_type")), Some("mdir"));
}

#[test]
fn quicktime_meta_has_no_version_and_flags() {
    let hdlr = full_box(b"hdlr", 0, 0, &concat(&[&[0; 4], b"mdta", &[0; 12], b"\0"]));
    let meta = bx(b"meta", &hdlr);
    let events = collect(meta, ParseOptions::tolerant());

    assert_eq!(events[1].header().identifier(), "hdlr");
    assert_eq!(events[1].offset, 8);
}

/// Reads issued after pulling `events` events from a file of `boxes` empty boxes.
fn reads_after(boxes: usize, events: usize) -> usize {
    let bytes: Vec<u8> = (0..boxes).flat_map(|_| bx(b"free", &[])).collect();
    let mut stream = EventStream::new(CountingReader::new(bytes), ParseOptions::tolerant());
    for _ in 0..events {
        stream.next().expect("event").expect("parse failed");
    }
    stream.reader().count()
}

#[test]
fn reads_follow_pulled_events_not_file_size() {
    // three boxes started and finished
    let small = reads_after(10, 6);
    let large = reads_after(1000, 6);
    assert_eq!(small, large);
    assert!(large > 0 && large <= 3 * 4, "{large} reads for three boxes");

    // each further box costs the same bounded number of reads
    let per_box: Vec<usize> = (1..=5).map(|k| reads_after(1000, 2 * k + 2) - reads_after(1000, 2 * k)).collect();
    assert!(per_box.iter().all(|&n| n > 0 && n <= 4), "{per_box:?}");
    assert!(per_box.windows(2).all(|w| w[0] == w[1]), "{per_box:?}");
}

struct FailingReader;

impl RandomAccessReader for FailingReader {
    fn length(&self) -> i64 {
        64
    }

    fn read(&self, _offset: i64, _count: i64) -> ReadResult<Vec<u8>> {
        Err(ReaderError::from(io::Error::other("device gone")))
    }
}

#[test]
fn io_failure_ends_a_tolerant_stream() {
    let mut stream = EventStream::new(FailingReader, ParseOptions::tolerant());
    match stream.next() {
        Some(Err(ParseError::Reader(e))) => assert!(e.is_io()),
        other => panic!("unexpected {other:?}"),
    }
    assert!(stream.next().is_none());
}

#[test]
fn finish_events_match_starts() {
    let bytes = concat(&[&ftyp(), &bx(b"moov", &bx(b"trak", &bx(b"mdia", &[])))]);
    let events = collect(bytes, ParseOptions::tolerant());

    let mut open = Vec::new();
    for e in &events {
        match &e.kind {
            ParseEventKind::WillStartBox { header, .. } => open.push(header.clone()),
            ParseEventKind::DidFinishBox { header, .. } => assert_eq!(open.pop().as_ref(), Some(header)),
        }
    }
    assert!(open.is_empty());
}

#[test]
fn options_deserialize_with_defaults() {
    let options: ParseOptions = serde_json::from_str(r#"{"mode":"strict"}"#).expect("json failed");
    assert_eq!(options, ParseOptions { max_depth: 64, ..ParseOptions::strict() });
    assert!(options.decode_payloads);
}

#[test]
fn udta_zero_terminator_is_not_trailing_data() {
    let udta = bx(b"udta", &concat(&[&bx(b"free", &[1]), &[0, 0, 0, 0]]));
    let events = collect(concat(&[&ftyp(), &bx(b"moov", &udta)]), ParseOptions::strict());

    assert_eq!(
        summary(&events)[2..],
        [
            (true, "moov".to_string(), 0),
            (true, "udta".to_string(), 1),
            (true, "free".to_string(), 2),
            (false, "free".to_string(), 2),
            (false, "udta".to_string(), 1),
            (false, "moov".to_string(), 0),
        ]
    );
    for e in &events {
        assert!(e.issues.is_empty(), "{:?}", e.issues);
        assert!(e.validation_issues.is_empty(), "{:?}", e.validation_issues);
    }
}

#[test]
fn non_zero_udta_tail_is_still_trailing_data() {
    let udta = bx(b"udta", &concat(&[&bx(b"free", &[1]), &[0, 0, 0, 1]]));
    let events = collect(concat(&[&ftyp(), &bx(b"moov", &udta), &bx(b"free", &[])]), ParseOptions::tolerant());

    let udta_finish = events
        .iter()
        .find(|e| !e.is_start() && e.header().identifier() == "udta")
        .expect("udta finish");
    assert!(udta_finish.issues.iter().any(|i| i.code == codes::TRAILING_BYTES));
    assert!(udta_finish.validation_issues.iter().any(|v| v.rule_id == "VR-002"));
}
