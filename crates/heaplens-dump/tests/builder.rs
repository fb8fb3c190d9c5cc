use std::io::Write;

use heaplens_dump::builder::{BuildOptions, CancelToken, Cancelled, IndexBuilder, SnapshotIndex};
use heaplens_dump::index::IndexReader;
use heaplens_dump::roots::GcRootKind;
use heaplens_dump::strings::load_strings;

fn write_dump(lines: &[&str]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().expect("tempfile");
    for line in lines {
        writeln!(file, "{}", line).expect("write dump line");
    }
    file.flush().expect("flush dump");
    file
}

fn build(lines: &[&str]) -> SnapshotIndex {
    let file = write_dump(lines);
    IndexBuilder::new(file.path()).build().expect("build index")
}

#[test]
fn minimal_dump_gets_synthetic_classes() {
    // One real class, one typeless object; fixup adds the unknown
    // class-of-class plus one class for the FOO tag.
    let index = build(&[
        r#"{"type":"CLASS","address":"0x100","name":"C"}"#,
        r#"{"type":"FOO","address":"0x200"}"#,
    ]);

    assert_eq!(index.object_count(), 4);
    assert!(index.gc_roots.is_empty());
    assert_eq!(index.stats.classes, 1);
    assert_eq!(index.stats.synthetic_classes, 2);
    assert_eq!(index.stats.objects, 1);

    let object_id = index.identifiers.id_of(0x200).expect("object registered");
    let class = index.class_of(object_id).expect("object has a class");
    assert!(class.synthetic);
    assert_eq!(class.name, "Type-FOO");
    assert_eq!(class.instance_count, 1);
}

#[test]
fn id_assignment_is_a_bijection() {
    let index = build(&[
        r#"{"type":"CLASS","address":"0x300","name":"C"}"#,
        r#"{"type":"OBJ","address":"0x100","class":"0x300"}"#,
        r#"{"type":"OBJ","address":"0x200","class":"0x300"}"#,
    ]);
    let n = index.object_count();
    for id in 0..n {
        let address = index.identifiers.address_of(id).expect("id in range");
        assert_eq!(index.identifiers.id_of(address), Some(id));
    }
    assert_eq!(index.identifiers.address_of(n), None);
}

#[test]
fn every_outbound_list_leads_with_the_class() {
    let index = build(&[
        r#"{"type":"CLASS","address":"0x100","name":"C"}"#,
        r#"{"type":"OBJ","address":"0x200","class":"0x100","memsize":24,"references":["0x100","0xdead"]}"#,
    ]);
    for id in 0..index.object_count() {
        let refs = index.outbound.refs_for(id);
        assert!(!refs.is_empty(), "object {} has no outbound references", id);
        assert!(
            index.classes_by_id.contains_key(&refs[0]),
            "object {} does not lead with a class reference",
            id
        );
    }
    // The dangling 0xdead data reference is dropped and counted.
    assert_eq!(index.stats.dropped_references, 1);

    let object_id = index.identifiers.id_of(0x200).unwrap();
    let class_id = index.identifiers.id_of(0x100).unwrap();
    assert_eq!(index.outbound.refs_for(object_id), &[class_id, class_id]);
    assert_eq!(index.object_to_size.get(object_id), 24);
    let class = index.class_of(object_id).unwrap();
    assert_eq!(class.instance_count, 1);
    assert_eq!(class.total_size, 24);
}

#[test]
fn missing_class_is_healed_with_a_synthetic() {
    let index = build(&[
        r#"{"type":"OBJ","address":"0x200","class":"0x500"}"#,
    ]);
    let object_id = index.identifiers.id_of(0x200).unwrap();
    let class = index.class_of(object_id).expect("class healed by fixup");
    assert!(class.synthetic);
    assert_eq!(class.name, "Class-0x500");
    // The referenced address itself was never registered; the synthetic
    // class lives at a manufactured address past the real ones.
    assert_eq!(index.identifiers.id_of(0x500), None);
    assert!(class.address > 0x200);
}

#[test]
fn class_of_class_linkage_resolves() {
    let index = build(&[
        r#"{"type":"CLASS","address":"0x110","name":"Meta"}"#,
        r#"{"type":"CLASS","address":"0x120","name":"Child","class":"0x110"}"#,
        r#"{"type":"CLASS","address":"0x130","name":"Orphan","class":"0x999"}"#,
    ]);
    let child_id = index.identifiers.id_of(0x120).unwrap();
    let meta_id = index.identifiers.id_of(0x110).unwrap();
    assert_eq!(index.outbound.refs_for(child_id)[0], meta_id);
    assert_eq!(index.object_to_class.get(child_id), u64::from(meta_id));

    // Orphan's meta-class never appears; its first reference is the
    // synthetic stand-in.
    let orphan_id = index.identifiers.id_of(0x130).unwrap();
    let healed = index.outbound.refs_for(orphan_id)[0];
    assert!(index.classes_by_id[&healed].synthetic);
}

#[test]
fn roots_resolve_or_are_dropped_with_a_count() {
    let index = build(&[
        r#"{"type":"CLASS","address":"0x100","name":"C"}"#,
        r#"{"type":"OBJ","address":"0x200","class":"0x100"}"#,
        r#"{"type":"ROOT","root":"vm","references":["0x200","0xbeef"]}"#,
    ]);
    assert_eq!(index.gc_roots.len(), 1);
    assert_eq!(index.stats.dropped_roots, 1);
    let root = index.gc_roots[0];
    assert_eq!(root.kind, GcRootKind::Vm);
    assert_eq!(Some(root.object_id), index.identifiers.id_of(0x200));
    assert!(root.object_id < index.object_count());
}

#[test]
fn malformed_records_are_skipped_and_counted() {
    let index = build(&[
        r#"{"type":"CLASS","address":"0x100","name":"C"}"#,
        r#"this is not a record"#,
        r#"{"type":"OBJ","address":"0x200","class":"0x100"}"#,
    ]);
    assert_eq!(index.stats.parse_errors, 1);
    assert_eq!(index.stats.objects, 1);
    assert_eq!(index.object_count(), 3);
}

#[test]
fn synthetic_ids_are_stable_across_runs() {
    let lines = [
        r#"{"type":"OBJ","address":"0x200","class":"0x900"}"#,
        r#"{"type":"OBJ","address":"0x300","class":"0x800"}"#,
        r#"{"type":"BAR","address":"0x400"}"#,
        r#"{"type":"BAZ","address":"0x500"}"#,
    ];
    let first = build(&lines);
    let second = build(&lines);
    assert_eq!(
        first.identifiers.iter().collect::<Vec<_>>(),
        second.identifiers.iter().collect::<Vec<_>>()
    );
    for id in 0..first.object_count() {
        let a = first.classes_by_id.get(&id).map(|c| &c.name);
        let b = second.classes_by_id.get(&id).map(|c| &c.name);
        assert_eq!(a, b, "class names diverge at id {}", id);
    }
}

#[test]
fn artifacts_reopen_byte_faithfully() {
    let file = write_dump(&[
        r#"{"type":"CLASS","address":"0x100","name":"C"}"#,
        r#"{"type":"OBJ","address":"0x200","class":"0x100","memsize":48,"references":["0x300"]}"#,
        r#"{"type":"STRING","address":"0x300","class":"0x100","memsize":40,"value":"hi there"}"#,
    ]);
    let index = IndexBuilder::new(file.path()).build().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let prefix = dir.path().join("snapshot");
    let paths = index.write_to(&prefix).unwrap();

    let mut reopened = IndexReader::open(&prefix).unwrap();
    assert_eq!(reopened.identifiers.len(), u64::from(index.object_count()));
    for id in 0..index.object_count() {
        let row = u64::from(id);
        assert_eq!(
            reopened.identifiers.get(row).unwrap(),
            index.identifiers.address_of(id).unwrap()
        );
        assert_eq!(reopened.object_to_class.get(row).unwrap(), index.object_to_class.get(id));
        assert_eq!(
            reopened.object_to_position.get(row).unwrap(),
            index.object_to_position.get(id)
        );
        assert_eq!(reopened.object_to_size.get(row).unwrap(), index.object_to_size.get(id));
        let refs: Vec<u32> = index.outbound.refs_for(id).to_vec();
        assert_eq!(reopened.outbound.refs_for(row).unwrap(), refs);
    }

    let strings = load_strings(&paths.strings).unwrap();
    assert_eq!(strings.get(&0x300).map(String::as_str), Some("hi there"));
}

#[test]
fn positions_point_back_at_records() {
    let lines = [
        r#"{"type":"CLASS","address":"0x100","name":"C"}"#,
        r#"{"type":"OBJ","address":"0x200","class":"0x100"}"#,
    ];
    let file = write_dump(&lines);
    let index = IndexBuilder::new(file.path()).build().unwrap();
    let object_id = index.identifiers.id_of(0x200).unwrap();
    let expected = lines[0].len() as u64 + 1;
    assert_eq!(index.object_to_position.get(object_id), expected);
}

#[test]
fn cancelled_build_aborts() {
    let file = write_dump(&[r#"{"type":"CLASS","address":"0x100","name":"C"}"#]);
    let cancel = CancelToken::new();
    cancel.cancel();
    let options = BuildOptions { cancel, ..BuildOptions::default() };
    let err = IndexBuilder::with_options(file.path(), options).build().unwrap_err();
    assert!(err.downcast_ref::<Cancelled>().is_some());
}
