use symref::types::*;

#[test]
fn test_language_from_path() {
    assert_eq!(Language::from_path("src/app/models.py"), Some(Language::Python));
    assert_eq!(Language::from_path("web/index.tsx"), Some(Language::TypeScript));
    assert_eq!(Language::from_path("lib.rs"), Some(Language::Rust));
    assert_eq!(Language::from_path("Makefile"), None);
    assert_eq!(Language::from_path("notes.unknown"), None);
}

#[test]
fn test_language_names_round_trip() {
    for language in Language::ALL {
        assert_eq!(Language::from_str(language.as_str()), Some(language));
    }
}

#[test]
fn test_mode_aliases() {
    assert_eq!(ResolverMode::from_str("scip"), Some(ResolverMode::IndexOnly));
    assert_eq!(ResolverMode::from_str("lsp"), Some(ResolverMode::LiveOnly));
    assert_eq!(
        ResolverMode::from_str("fallback"),
        Some(ResolverMode::IndexWithLiveFallback)
    );
    assert_eq!(ResolverMode::from_str("bogus"), None);
    assert!(!ResolverMode::LiveOnly.allows_index());
    assert!(!ResolverMode::IndexOnly.allows_live());
    assert!(ResolverMode::Automatic.allows_index() && ResolverMode::Automatic.allows_live());
}

#[test]
fn test_node_json_without_language() {
    let node: DefinitionNode =
        serde_json::from_str(r#"{"id": "n1", "file_path": "pkg/a.go", "line": 3, "column": 5}"#)
            .unwrap();
    assert_eq!(node.language, None);
    assert_eq!(node.detected_language(), Some(Language::Go));

    let explicit = node.clone().with_language(Language::Rust);
    assert_eq!(explicit.detected_language(), Some(Language::Rust));
}

#[test]
fn test_reference_serializes_flat() {
    let reference = Reference::new("a.py", Span::new(1, 2, 1, 6));
    let value = serde_json::to_value(&reference).unwrap();
    assert_eq!(value["file_path"], "a.py");
    assert_eq!(value["start_line"], 1);
    assert_eq!(value["end_column"], 6);
}

#[test]
fn test_empty_map_and_dedup() {
    let nodes = vec![
        DefinitionNode::new("a", "x.py", 0, 0),
        DefinitionNode::new("b", "x.py", 1, 0),
        DefinitionNode::new("a", "x.py", 0, 0),
    ];
    let map = empty_resolution_map(&nodes);
    assert_eq!(map.len(), 2);
    assert!(map.values().all(Vec::is_empty));
    assert_eq!(dedup_nodes(&nodes).len(), 2);
}

#[test]
fn test_node_id_is_stable() {
    let a = generate_node_id("src/a.py", 3, 4, "User");
    let b = generate_node_id("src/a.py", 3, 4, "User");
    assert_eq!(a, b);
    assert!(a.starts_with("def:"));
    assert_eq!(a.len(), 36);
    assert_ne!(a, generate_node_id("src/a.py", 3, 5, "User"));
}

#[test]
fn test_missing_ids_are_derived() {
    let mut nodes: Vec<DefinitionNode> = serde_json::from_str(
        r#"[
            {"file_path": "src/a.py", "line": 3, "column": 4, "name": "User"},
            {"id": "kept", "file_path": "src/a.py", "line": 9, "column": 0},
            {"file_path": "src/a.py", "line": 3, "column": 4, "name": "User"}
        ]"#,
    )
    .unwrap();
    assign_missing_ids(&mut nodes);

    assert_eq!(nodes[0].id, generate_node_id("src/a.py", 3, 4, "User"));
    assert_eq!(nodes[1].id, "kept");
    assert_eq!(nodes[0].id, nodes[2].id);
    assert_eq!(dedup_nodes(&nodes).len(), 2);
}
