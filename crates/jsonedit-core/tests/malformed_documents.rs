use std::time::Duration;

use jsonedit_core::{CoreOptions, Document, NodeKind, NodeStatus};

const WAIT: Duration = Duration::from_secs(5);

#[test]
fn test_unterminated_string_keeps_document_navigable() {
    let json = r#"{"a": 1, "b": "never closed"#;
    let doc = Document::from_text(json, CoreOptions::default());
    assert!(doc.wait_for_indexing(WAIT));

    // The root still covers the whole byte range.
    let root = doc.node_at_offset(0).unwrap();
    let root_node = doc.node(root).unwrap();
    assert_eq!(root_node.kind, NodeKind::Object);
    assert_eq!(root_node.start, 0);
    assert_eq!(root_node.end, json.len());
    assert_eq!(root_node.status, NodeStatus::Recovered);

    // Exactly one descendant carries the error.
    let errors = doc
        .children(root)
        .into_iter()
        .filter(|&c| doc.node(c).unwrap().kind == NodeKind::Error)
        .count();
    assert_eq!(errors, 1);

    // node_at never fails, for any offset.
    for offset in 0..json.len() {
        assert!(doc.node_at_offset(offset).is_some());
    }
}

#[test]
fn test_missing_closers_recover_at_end_of_input() {
    let json = r#"{"open": [1, 2"#;
    let doc = Document::from_text(json, CoreOptions::default());
    assert!(doc.wait_for_indexing(WAIT));

    let root = doc.node_at_offset(0).unwrap();
    assert_eq!(doc.node(root).unwrap().status, NodeStatus::Recovered);

    let two = doc.node_at_offset(json.len() - 1).unwrap();
    assert_eq!(doc.node(two).unwrap().kind, NodeKind::Number);
    let array = doc.parent(two).unwrap();
    assert_eq!(doc.node(array).unwrap().kind, NodeKind::Array);
    assert_eq!(doc.node(array).unwrap().status, NodeStatus::Recovered);
}

#[test]
fn test_garbage_between_values_degrades_locally() {
    let json = "[1, @@@@, 2]";
    let doc = Document::from_text(json, CoreOptions::default());
    assert!(doc.wait_for_indexing(WAIT));

    let root = doc.node_at_offset(0).unwrap();
    let kinds: Vec<NodeKind> = doc
        .children(root)
        .into_iter()
        .map(|c| doc.node(c).unwrap().kind)
        .collect();
    assert_eq!(
        kinds,
        vec![NodeKind::Number, NodeKind::Error, NodeKind::Number]
    );

    // Navigation hops over the error span.
    let one = doc.node_at_offset(1).unwrap();
    let err = doc.next_sibling(one).unwrap();
    let two = doc.next_sibling(err).unwrap();
    assert_eq!(doc.node(two).unwrap().kind, NodeKind::Number);
}

#[test]
fn test_invalid_utf8_inside_string_is_an_error_span() {
    use std::io::Write as _;

    // Invalid bytes inside a string literal degrade to an Error node; the
    // document itself still opens and indexes.
    let mut bytes = b"[\"ok\", \"".to_vec();
    bytes.extend_from_slice(&[0xFF, 0xFE]);
    bytes.extend_from_slice(b"\"]");

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("doc.json");
    std::fs::File::create(&path)
        .unwrap()
        .write_all(&bytes)
        .unwrap();

    let options = CoreOptions {
        resident_threshold: 0, // mapped mode tolerates non-UTF-8 base bytes
        ..CoreOptions::default()
    };
    let doc = Document::open_with(&path, options).unwrap();
    assert!(doc.wait_for_indexing(WAIT));

    let root = doc.node_at_offset(0).unwrap();
    assert_eq!(doc.node(root).unwrap().kind, NodeKind::Array);

    let kinds: Vec<NodeKind> = doc
        .children(root)
        .into_iter()
        .map(|c| doc.node(c).unwrap().kind)
        .collect();
    assert_eq!(kinds, vec![NodeKind::String, NodeKind::Error]);
}

#[test]
fn test_multiple_top_level_values_become_sibling_roots() {
    let json = "{\"a\": 1}\n{\"b\": 2}\n";
    let doc = Document::from_text(json, CoreOptions::default());
    assert!(doc.wait_for_indexing(WAIT));

    let first = doc.node_at_offset(0).unwrap();
    assert_eq!(doc.node(first).unwrap().kind, NodeKind::Object);

    let second = doc.next_sibling(first).unwrap();
    assert_eq!(doc.node(second).unwrap().kind, NodeKind::Object);
    assert_eq!(doc.node(second).unwrap().start, json.find("{\"b\"").unwrap());
    assert!(doc.prev_sibling(first).is_none());
}

#[test]
fn test_editing_a_malformed_region_can_heal_it() {
    let mut doc = Document::from_text("[1, 2\n", CoreOptions::default());
    assert!(doc.wait_for_indexing(WAIT));
    let root = doc.node_at_offset(0).unwrap();
    assert_eq!(doc.node(root).unwrap().status, NodeStatus::Recovered);

    doc.write(0, "[1, 2]\n");
    assert!(doc.wait_for_indexing(WAIT));

    let root = doc.node_at_offset(0).unwrap();
    let node = doc.node(root).unwrap();
    assert_eq!(node.kind, NodeKind::Array);
    assert_eq!(node.status, NodeStatus::Complete);
    assert_eq!(doc.children(root).len(), 2);
}
