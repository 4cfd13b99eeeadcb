mod common;

use common::{bx, bx_declared, concat, ftyp, full_box, reader};
use isoinspect::{
    EventStream, ParseEvent, ParseEventKind, ParseOptions, RandomAccessReader, RuleId, Severity, ValidationConfig,
    ValidationIssue, ValidationPreset, ValidationRule, Validator, parse,
};

fn events(bytes: Vec<u8>, validation: ValidationConfig) -> Vec<ParseEvent> {
    parse(reader(bytes), ParseOptions::tolerant().with_validation(validation))
        .collect::<Result<Vec<_>, _>>()
        .expect("parse failed")
}

/// (box identifier, rule id, severity) for every validation issue.
fn found(bytes: Vec<u8>) -> Vec<(String, String, Severity)> {
    found_with(bytes, ValidationConfig::default())
}

fn found_with(bytes: Vec<u8>, validation: ValidationConfig) -> Vec<(String, String, Severity)> {
    events(bytes, validation)
        .iter()
        .flat_map(|e| {
            e.validation_issues
                .iter()
                .map(|v| (e.header().identifier(), v.rule_id.clone(), v.severity))
                .collect::<Vec<_>>()
        })
        .collect()
}

fn has(found: &[(String, String, Severity)], box_id: &str, rule: &str) -> bool {
    found.iter().any(|(b, r, _)| b == box_id && r == rule)
}

#[test]
fn well_formed_file_has_no_findings() {
    let trak = bx(b"trak", &full_box(b"tkhd", 0, 3, &[0; 80]));
    assert!(found(concat(&[&ftyp(), &bx(b"moov", &trak)])).is_empty());
}

#[test]
fn box_size_beyond_file() {
    let f = found(concat(&[&ftyp(), &bx_declared(b"free", 100, &[0; 12])]));
    assert!(has(&f, "free", "VR-001"));
    assert!(f.iter().all(|(_, _, s)| *s == Severity::Error));
}

#[test]
fn box_size_beyond_parent() {
    // child declares 40 bytes inside a 24-byte moov
    let moov = bx(b"moov", &bx_declared(b"udta", 40, &[0; 8]));
    let f = found(concat(&[&ftyp(), &moov, &[0; 32]]));
    assert!(has(&f, "udta", "VR-001"));
    assert!(has(&f, "udta", "VR-002"));
}

#[test]
fn container_gap_before_payload_end() {
    // free child leaves 4 unused bytes in moov
    let moov = bx(b"moov", &concat(&[&bx(b"free", &[]), &[0, 0, 0, 0]]));
    let f = found(concat(&[&ftyp(), &moov, &bx(b"free", &[])]));
    let closes: Vec<_> = f.iter().filter(|(b, r, _)| b == "moov" && r == "VR-002").collect();
    assert_eq!(closes.len(), 1);
}

#[test]
fn container_children_in_expected_places() {
    let mut stsd = vec![0, 0, 0, 0, 0, 0, 0, 1];
    stsd.extend(bx(b"avc1", &[]));
    let stbl = bx(b"stbl", &bx(b"stsd", &stsd));
    let f = found(concat(&[&ftyp(), &bx(b"moov", &stbl)]));
    assert!(!f.iter().any(|(_, r, _)| r == "VR-002"), "{f:?}");
}

#[test]
fn version_and_flags_mismatch() {
    let hdlr = full_box(b"hdlr", 1, 0, &concat(&[&[0; 4], b"vide", &[0; 12], b"\0"]));
    let vmhd = full_box(b"vmhd", 0, 0, &[0; 8]);
    let f = found(concat(&[&ftyp(), &hdlr, &vmhd]));

    assert!(has(&f, "hdlr", "VR-003"));
    assert!(has(&f, "vmhd", "VR-003"));
    assert!(f.iter().filter(|(_, r, _)| r == "VR-003").all(|(_, _, s)| *s == Severity::Warning));

    let ok = found(concat(&[&ftyp(), &full_box(b"vmhd", 0, 1, &[0; 8])]));
    assert!(!has(&ok, "vmhd", "VR-003"));
}

#[test]
fn version_flags_on_tiny_payload() {
    let f = found(concat(&[&ftyp(), &bx(b"hdlr", &[0, 0])]));
    assert!(has(&f, "hdlr", "VR-003"));
}

#[test]
fn media_before_file_type() {
    let f = found(concat(&[&bx(b"moov", &[]), &ftyp()]));
    assert!(has(&f, "moov", "VR-004"));
    assert!(!has(&f, "ftyp", "VR-004"));

    // boxes that are not media containers may precede ftyp
    let free_first = found(concat(&[&bx(b"free", &[]), &ftyp()]));
    assert!(free_first.is_empty(), "{free_first:?}");
}

#[test]
fn media_data_before_movie() {
    let f = found(concat(&[&ftyp(), &bx(b"mdat", &[1, 2]), &bx(b"moov", &[])]));
    assert!(has(&f, "mdat", "VR-005"));

    let after = found(concat(&[&ftyp(), &bx(b"moov", &[]), &bx(b"mdat", &[1, 2])]));
    assert!(!has(&after, "mdat", "VR-005"));
}

#[test]
fn fragmented_files_may_lead_with_media_data() {
    let moof = bx(b"moof", &full_box(b"mfhd", 0, 0, &1u32.to_be_bytes()));
    let f = found(concat(&[&ftyp(), &moof, &bx(b"mdat", &[0; 4]), &bx(b"moov", &[])]));
    assert!(!has(&f, "mdat", "VR-005"), "{f:?}");
}

#[test]
fn unknown_boxes_are_advisory() {
    let f = found(concat(&[&ftyp(), &bx(b"zzzz", &[])]));
    assert_eq!(f, vec![("zzzz".to_string(), "VR-006".to_string(), Severity::Info)]);
}

fn moof(sequence: u32) -> Vec<u8> {
    bx(b"moof", &full_box(b"mfhd", 0, 0, &sequence.to_be_bytes()))
}

#[test]
fn fragment_sequence_increases_from_one() {
    let moov = bx(b"moov", &[]);
    let ok = found(concat(&[&ftyp(), &moov, &moof(1), &moof(2), &moof(5)]));
    assert!(!ok.iter().any(|(_, r, _)| r == "VR-016"), "{ok:?}");

    // zero start, a repeat, then a step back
    let bad = found(concat(&[&ftyp(), &moov, &moof(0), &moof(3), &moof(3), &moof(2)]));
    let hits: Vec<_> = bad.iter().filter(|(_, r, _)| r == "VR-016").collect();
    assert_eq!(hits.len(), 3, "{bad:?}");
    assert!(hits.iter().all(|(b, _, s)| b == "mfhd" && *s == Severity::Warning));
}

#[test]
fn fragment_sequence_needs_a_decoded_payload() {
    let options = ParseOptions { decode_payloads: false, ..ParseOptions::tolerant() };
    let bytes = concat(&[&ftyp(), &bx(b"moov", &[]), &moof(0), &moof(0)]);
    let events: Vec<ParseEvent> = parse(reader(bytes), options).collect::<Result<_, _>>().expect("parse failed");
    assert!(events.iter().flat_map(|e| &e.validation_issues).all(|v| v.rule_id != "VR-016"));
}

/// (box identifier, message) for every finding of `rule`.
fn messages(bytes: Vec<u8>, rule: &str) -> Vec<(String, String)> {
    events(bytes, ValidationConfig::default())
        .iter()
        .flat_map(|e| {
            e.validation_issues
                .iter()
                .filter(|v| v.rule_id == rule)
                .map(|v| (e.header().identifier(), v.message.clone()))
                .collect::<Vec<_>>()
        })
        .collect()
}

#[test]
fn top_level_boxes_before_file_type() {
    let m = messages(concat(&[&bx(b"free", &[]), &bx(b"udta", &[]), &ftyp(), &bx(b"moov", &[])]), "E3");
    assert_eq!(m.len(), 1, "{m:?}");
    assert_eq!(m[0].0, "ftyp");
    assert!(m[0].1.contains("\"udta\""), "{}", m[0].1);
    assert!(!m[0].1.contains("free"));

    // padding and uuid boxes are fine anywhere
    let uuid = bx(b"uuid", &[0x11; 16]);
    let clean = concat(&[&uuid, &ftyp(), &bx(b"skip", &[]), &uuid, &bx(b"mdat", &[0; 4]), &bx(b"moov", &[])]);
    assert!(messages(clean, "E3").is_empty());
}

#[test]
fn top_level_boxes_between_file_type_and_movie() {
    let m = messages(concat(&[&ftyp(), &bx(b"udta", &[]), &bx(b"zzzz", &[]), &bx(b"moov", &[])]), "E3");
    assert_eq!(m.len(), 1, "{m:?}");
    assert_eq!(m[0].0, "moov");
    assert!(m[0].1.contains("\"udta\" and \"zzzz\""), "{}", m[0].1);

    // after moov nothing is flagged
    assert!(messages(concat(&[&ftyp(), &bx(b"moov", &[]), &bx(b"udta", &[])]), "E3").is_empty());
}

#[test]
fn movie_after_segmented_media() {
    let m = messages(concat(&[&ftyp(), &moof(1), &bx(b"mdat", &[0; 4]), &bx(b"moov", &[])]), "E3");
    assert_eq!(m.len(), 1, "{m:?}");
    assert_eq!(m[0].0, "moov");
    assert!(m[0].1.contains("\"mdat\"") && m[0].1.contains("\"moof\""), "{}", m[0].1);
}

#[test]
fn disabled_rules_do_not_run() {
    let bytes = concat(&[&bx(b"moov", &[]), &ftyp(), &bx(b"zzzz", &[])]);

    let config = ValidationConfig::default().disable(RuleId::UnknownBox);
    let f = found_with(bytes.clone(), config);
    assert!(!f.iter().any(|(_, r, _)| r == "VR-006"));
    assert!(has(&f, "moov", "VR-004"));

    let structural = ValidationConfig::default().with_preset(ValidationPreset::structural());
    assert!(found_with(bytes, structural).is_empty());
}

#[test]
fn preset_json_forms() {
    let single = r#"{
        "id": "quiet",
        "name": "Quiet",
        "summary": "No advisories.",
        "rules": [{"rule_id": "VR-006", "enabled": false}]
    }"#;
    let preset = ValidationPreset::from_json(single).expect("preset json failed");
    assert_eq!(preset.id, "quiet");
    assert!(!preset.is_rule_enabled(RuleId::UnknownBox));
    assert!(preset.is_rule_enabled(RuleId::BoxSize));

    let manifest = format!(r#"{{"presets": [{single}]}}"#);
    assert_eq!(ValidationPreset::from_json(&manifest).expect("manifest failed"), preset);

    assert!(ValidationPreset::from_json(r#"{"rules": 3}"#).is_err());
    assert!(ValidationPreset::from_json(r#"{"presets": []}"#).is_err());
}

#[test]
fn preset_from_file() {
    let dir = tempfile::tempdir().expect("tempdir failed");
    let path = dir.path().join("preset.json");
    std::fs::write(&path, serde_json::to_string(&ValidationPreset::structural()).expect("json failed"))
        .expect("write failed");

    let loaded = ValidationPreset::load(&path).expect("load failed");
    assert_eq!(loaded, ValidationPreset::structural());
    let config = ValidationConfig::default().with_preset(loaded);
    assert_eq!(config.enabled_rules(), vec![RuleId::BoxSize, RuleId::ContainerBoundary]);
}

#[test]
fn builtin_presets() {
    assert_eq!(ValidationPreset::builtin().len(), 2);
    assert_eq!(ValidationPreset::builtin_by_id("all-checks").expect("preset").rules.len(), 0);
    assert!(ValidationPreset::builtin_by_id("nope").is_err());
}

#[test]
fn rule_ids_parse_and_display() {
    assert_eq!("vr-003".parse::<RuleId>().expect("parse failed"), RuleId::VersionFlags);
    assert_eq!(RuleId::MovieDataOrdering.to_string(), "VR-005");
    assert!("VR-999".parse::<RuleId>().is_err());
    assert_eq!(RuleId::UnknownBox.default_severity(), Severity::Info);

    assert_eq!("e3".parse::<RuleId>().expect("parse failed"), RuleId::TopLevelOrdering);
    assert_eq!(RuleId::FragmentSequence.to_string(), "VR-016");

    let v = Validator::from_config(&ValidationConfig::default().disable(RuleId::VersionFlags));
    assert_eq!(v.rule_ids().len(), RuleId::ALL.len() - 1);
    assert!(!v.rule_ids().contains(&RuleId::VersionFlags));
}

/// Flags every box whose payload is empty.
struct EmptyPayloadRule;

impl ValidationRule for EmptyPayloadRule {
    fn id(&self) -> RuleId {
        RuleId::UnknownBox
    }

    fn check(&mut self, event: &ParseEvent, _reader: &dyn RandomAccessReader) -> Vec<ValidationIssue> {
        match &event.kind {
            ParseEventKind::WillStartBox { header, .. } if header.payload_len() == 0 => {
                vec![ValidationIssue::new("X-EMPTY", format!("{} is empty", header.identifier()), Severity::Info)]
            }
            _ => Vec::new(),
        }
    }
}

#[test]
fn custom_rules_replace_builtins() {
    let bytes = concat(&[&ftyp(), &bx(b"zzzz", &[]), &bx(b"free", &[1])]);
    let stream = EventStream::new(reader(bytes), ParseOptions::tolerant())
        .with_validator(Validator::new().with_rule(Box::new(EmptyPayloadRule)));

    let issues: Vec<(String, String)> = stream
        .map(|e| e.expect("parse failed"))
        .flat_map(|e| {
            let id = e.header().identifier();
            e.validation_issues.into_iter().map(move |v| (id.clone(), v.rule_id))
        })
        .collect();
    assert_eq!(issues, vec![("zzzz".to_string(), "X-EMPTY".to_string())]);
}
