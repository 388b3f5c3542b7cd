mod common;

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use common::*;
use symref::config::ResolverConfig;
use symref::errors::SymrefError;
use symref::languages::roles;
use symref::resolution::{HybridResolver, ResolverTier};
use symref::types::{DefinitionNode, Language, Reference, ResolverMode, Span};

const USER: &str = "scip-python python app 0.1 `app.models`/User#";
const HELPER: &str = "scip-python python app 0.1 `app.views`/helper().";

fn python_project() -> tempfile::TempDir {
    project(&[
        ("app/models.py", "class User:\n    pass\n"),
        ("app/views.py", "from app.models import User\nUser()\n\ndef helper():\n    pass\n"),
    ])
}

fn write_fixture_index(root: &Path) {
    write_index(
        &root.join("index.scip"),
        vec![
            document(
                "app/models.py",
                vec![
                    occurrence(0, 6, 10, USER, roles::DEFINITION),
                    occurrence(5, 4, 10, HELPER, roles::READ_ACCESS),
                ],
            ),
            document(
                "app/views.py",
                vec![
                    occurrence(1, 0, 4, USER, 0),
                    occurrence(3, 4, 10, HELPER, roles::DEFINITION),
                ],
            ),
        ],
    );
}

fn resolver(root: &Path, mode: ResolverMode, launcher: &ScriptedLauncher) -> HybridResolver {
    let config = ResolverConfig {
        mode,
        ..test_config()
    };
    HybridResolver::with_launcher(root, config, Arc::new(launcher.clone())).unwrap()
}

fn user_node() -> DefinitionNode {
    DefinitionNode::new("user", "app/models.py", 0, 6)
}

fn helper_node() -> DefinitionNode {
    DefinitionNode::new("helper", "app/views.py", 3, 4)
}

#[test]
fn test_index_hit_never_reaches_live_tier() {
    let dir = python_project();
    write_fixture_index(dir.path());
    let launcher = ScriptedLauncher::new(Script::default());
    let resolver = resolver(dir.path(), ResolverMode::IndexWithLiveFallback, &launcher);

    let results = resolver.resolve_batch(&[user_node()]);

    assert_eq!(
        results["user"],
        vec![Reference::new("app/views.py", Span::new(1, 0, 1, 4))]
    );
    assert_eq!(launcher.launches(), 0);
    assert_eq!(launcher.queries(), 0);
    assert_eq!(resolver.info().effective_tier, ResolverTier::IndexWithFallback);
}

#[test]
fn test_missing_index_falls_back_to_live() {
    let dir = python_project();
    let launcher = ScriptedLauncher::new(Script::default());
    let resolver = resolver(dir.path(), ResolverMode::Automatic, &launcher);

    let results = resolver.resolve_batch(&[user_node()]);

    assert_eq!(results.len(), 1);
    assert!(results["user"].is_empty());
    assert_eq!(launcher.queries(), 1);

    let info = resolver.info();
    assert_eq!(info.effective_tier, ResolverTier::LiveOnly);
    assert_eq!(info.index_fallbacks, 1);
    assert!(!info.index_enabled);
    assert!(info.index_stats.is_none());
    assert_eq!(info.detected_language, Some(Language::Python));
}

#[test]
fn test_two_nodes_in_two_files() {
    let dir = python_project();
    write_fixture_index(dir.path());
    let launcher = ScriptedLauncher::new(Script::default());
    let resolver = resolver(dir.path(), ResolverMode::Automatic, &launcher);

    let results = resolver.resolve_batch(&[user_node(), helper_node()]);

    assert_eq!(results.len(), 2);
    assert_eq!(
        results["user"],
        vec![Reference::new("app/views.py", Span::new(1, 0, 1, 4))]
    );
    assert_eq!(
        results["helper"],
        vec![Reference::new("app/models.py", Span::new(5, 4, 5, 10))]
    );
    let info = resolver.info();
    assert_eq!(info.effective_tier, ResolverTier::IndexOnly);
    assert_eq!(info.index_stats.map(|s| s.documents), Some(2));
}

#[test]
fn test_repeated_batches_agree() {
    let dir = python_project();
    write_fixture_index(dir.path());
    let launcher = ScriptedLauncher::new(Script::default());
    let resolver = resolver(dir.path(), ResolverMode::Automatic, &launcher);
    let nodes = [user_node(), helper_node()];

    let first = resolver.resolve_batch(&nodes);
    let second = resolver.resolve_batch(&nodes);

    for id in ["user", "helper"] {
        let a: HashSet<&Reference> = first[id].iter().collect();
        let b: HashSet<&Reference> = second[id].iter().collect();
        assert_eq!(a, b);
    }
    assert_eq!(resolver.info().batches, 2);
}

#[test]
fn test_unmatched_nodes_go_live_with_fallback() {
    let dir = python_project();
    write_fixture_index(dir.path());
    let launcher = ScriptedLauncher::new(
        Script::default().with_references(pos("app/views.py", 9, 0), vec![site("app/models.py", 1, 4, 8)]),
    );
    let resolver = resolver(dir.path(), ResolverMode::IndexWithLiveFallback, &launcher);

    let results = resolver.resolve_batch(&[
        user_node(),
        DefinitionNode::new("late", "app/views.py", 9, 0),
    ]);

    assert_eq!(results["user"].len(), 1);
    assert_eq!(
        results["late"],
        vec![Reference::new("app/models.py", Span::new(1, 4, 1, 8))]
    );
    assert_eq!(launcher.queries(), 1);
}

#[test]
fn test_automatic_leaves_unmatched_nodes_empty() {
    let dir = python_project();
    write_fixture_index(dir.path());
    let launcher = ScriptedLauncher::new(
        Script::default().with_references(pos("app/views.py", 9, 0), vec![site("app/models.py", 1, 4, 8)]),
    );
    let resolver = resolver(dir.path(), ResolverMode::Automatic, &launcher);

    let results = resolver.resolve_batch(&[DefinitionNode::new("late", "app/views.py", 9, 0)]);

    assert!(results["late"].is_empty());
    assert_eq!(launcher.queries(), 0);
}

#[test]
fn test_corrupt_index_falls_back_to_live() {
    let dir = python_project();
    std::fs::write(dir.path().join("index.scip"), b"\xff\xff\xff\xff not protobuf").unwrap();
    let launcher = ScriptedLauncher::new(
        Script::default().with_references(pos("app/models.py", 0, 6), vec![site("app/views.py", 1, 0, 4)]),
    );
    let resolver = resolver(dir.path(), ResolverMode::Automatic, &launcher);

    let results = resolver.resolve_batch(&[user_node()]);

    assert_eq!(results["user"].len(), 1);
    assert_eq!(resolver.tier(), ResolverTier::LiveOnly);
}

#[test]
fn test_live_only_never_loads_index() {
    let dir = python_project();
    write_fixture_index(dir.path());
    let launcher = ScriptedLauncher::new(Script::default());
    let resolver = resolver(dir.path(), ResolverMode::LiveOnly, &launcher);

    resolver.resolve_batch(&[user_node()]);

    let info = resolver.info();
    assert_eq!(info.effective_tier, ResolverTier::LiveOnly);
    assert!(info.index_stats.is_none());
    assert_eq!(info.index_fallbacks, 0);
    assert_eq!(launcher.queries(), 1);
}

#[test]
fn test_index_only_with_missing_index_is_empty() {
    let dir = python_project();
    let launcher = ScriptedLauncher::new(Script::default());
    let resolver = resolver(dir.path(), ResolverMode::IndexOnly, &launcher);

    let results = resolver.resolve_batch(&[user_node()]);

    assert!(results["user"].is_empty());
    assert!(!resolver.info().live_enabled);
    assert_eq!(launcher.launches(), 0);
}

#[test]
fn test_index_only_needs_an_index_tier() {
    let dir = project(&[("lib/app.rb", "class App; end\n")]);
    let launcher = ScriptedLauncher::new(Script::default());
    let config = ResolverConfig {
        mode: ResolverMode::IndexOnly,
        ..test_config()
    };
    let result = HybridResolver::with_launcher(dir.path(), config, Arc::new(launcher));
    assert!(matches!(result, Err(SymrefError::Config { .. })));
}

#[test]
fn test_empty_batch() {
    let dir = python_project();
    let launcher = ScriptedLauncher::new(Script::default());
    let resolver = resolver(dir.path(), ResolverMode::Automatic, &launcher);
    assert!(resolver.resolve_batch(&[]).is_empty());
    assert_eq!(resolver.info().effective_tier, ResolverTier::Unconfigured);
}
