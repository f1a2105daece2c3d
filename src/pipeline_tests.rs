//! End-to-end scenarios across discovery, identity, compilation, merging
//! and template rewriting.

use std::fs;
use std::path::Path;

use crate::allocator::{Allocator, AllocatorOptions};
use crate::cache::{Artifact, ArtifactRegistry};
use crate::compile::{compile_batch, merge_or_fresh, ArtifactWrite, CompiledScope};
use crate::config::ScopeConfig;
use crate::css::{AtRule, Decl, JsonRootParser, Node, Root, Rule};
use crate::discovery::{discover_scopes, discover_templates, templates_for_scope};
use crate::dom::Document;
use crate::ledger::{FileLedger, LedgerStore, MemoryLedger};
use crate::rewrite::{rewrite, RewriteOptions};
use crate::scope::ScopeSource;

fn card_root(extra: &[&str]) -> Root {
    let mut nodes = vec![
        Node::Rule(Rule::new(".card", vec![Decl::new("display", "block")])),
        Node::Rule(Rule::new(".card .title", vec![Decl::new("font-weight", "bold")])),
    ];
    for selector in extra {
        nodes.push(Node::Rule(Rule::new(selector, vec![Decl::new("color", "red")])));
    }
    Root::new(nodes)
}

fn source(path: &str, root: &Root) -> ScopeSource {
    ScopeSource::new(path, &serde_json::to_string(root).unwrap())
}

fn compile_one(
    source: ScopeSource,
    allocator: &mut Allocator,
    store: &mut dyn LedgerStore,
    config: &ScopeConfig,
) -> CompiledScope {
    let mut output = compile_batch(&[source], &JsonRootParser, allocator, store, config).unwrap();
    assert!(output.skipped.is_empty());
    output.compiled.remove(0)
}

fn selectors_of(root: &Root) -> Vec<String> {
    root.nodes
        .iter()
        .filter_map(|n| n.as_rule().map(|r| r.selector.clone()))
        .collect()
}

fn class_of(doc: &Document, tag: &str) -> String {
    let id = doc
        .elements()
        .into_iter()
        .find(|id| doc.tag_name(*id) == Some(tag))
        .unwrap();
    doc.attr(id, "class").unwrap_or_default().to_string()
}

#[test]
fn test_discover_compile_and_rewrite() {
    let dir = tempfile::tempdir().unwrap();
    let write = |rel: &str, contents: &str| {
        let path = dir.path().join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    };
    write("ui/card.css", &serde_json::to_string(&card_root(&[])).unwrap());
    write("pages/index.html", r#"<div class="card"><h2 class="title">Hi</h2></div>"#);
    write("pages/about.html", r#"<p class="title">About</p>"#);

    let scopes = discover_scopes(dir.path());
    assert_eq!(scopes.len(), 1);

    let config = ScopeConfig::default();
    let mut allocator = Allocator::new(AllocatorOptions::from(&config));
    let mut store = MemoryLedger::new();
    let output = compile_batch(&scopes, &JsonRootParser, &mut allocator, &mut store, &config).unwrap();
    let compiled = &output.compiled[0];
    assert_eq!(compiled.identity.hashed_name, "card-1");
    assert_eq!(selectors_of(&compiled.root), vec![".card-1", ".card-1 .card-1__title"]);

    let templates = discover_templates(dir.path());
    let used = templates_for_scope(&templates, &scopes[0]);
    assert_eq!(used.len(), 1);
    assert_eq!(used[0].path, "pages/index.html");

    let mut doc = Document::parse(&used[0].source, &used[0].path);
    let report = rewrite(&mut doc, &compiled.selectors, &RewriteOptions::default());
    assert_eq!(report.roots, 1);
    assert_eq!(class_of(&doc, "div"), "card-1");
    assert_eq!(class_of(&doc, "h2"), "card-1__title");
}

#[test]
fn test_incremental_edit_merges_into_shared_artifact() {
    let config = ScopeConfig::default();
    let mut allocator = Allocator::new(AllocatorOptions::from(&config));
    let mut store = MemoryLedger::new();

    let v1 = compile_one(source("ui/card.css", &card_root(&[])), &mut allocator, &mut store, &config);
    let hash = v1.identity.hash.clone();

    // A bundle holding another scope on each side of this one.
    let mut nodes = vec![Node::Rule(Rule::new(".footer-2", vec![]))];
    nodes.extend(v1.root.nodes.clone());
    nodes.push(Node::AtRule(AtRule::new(
        "media",
        "print",
        vec![Node::Rule(Rule::new(".footer-2__links", vec![]))],
    )));
    let mut registry = ArtifactRegistry::new();
    registry.insert(&hash, Artifact::new(Root::new(nodes), "dist/bundle.css"));

    let edited = Root::new(vec![
        Node::Rule(Rule::new(".card", vec![Decl::new("display", "grid")])),
        Node::Rule(Rule::new(".card .body", vec![])),
    ]);
    let v2 = compile_one(source("ui/card.css", &edited), &mut allocator, &mut store, &config);
    assert_eq!(v2.identity.hash, hash);
    assert_eq!(v2.identity.hashed_name, "card-1");

    let write = merge_or_fresh(&mut registry, &v2, Some(&hash), "dist/bundle.css").unwrap();
    let outcome = match write {
        ArtifactWrite::Merged(outcome) => outcome,
        ArtifactWrite::Fresh => panic!("expected merge"),
    };
    assert_eq!(outcome.anchor_index, 1);
    assert_eq!(outcome.replaced, 2);
    assert_eq!(outcome.inserted, 2);

    let merged = &registry.get(&hash).unwrap().root;
    assert_eq!(
        selectors_of(merged),
        vec![".footer-2", ".card-1", ".card-1 .card-1__body"]
    );
    assert!(matches!(merged.nodes.last(), Some(Node::AtRule(at)) if at.is_media()));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_deleted_scope_resurrects_after_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let ledger_path = dir.path().join("state/ledger.json");
    let config = ScopeConfig {
        use_numbers: false,
        ..ScopeConfig::default()
    };

    let hash = {
        let mut ledger = FileLedger::open(&ledger_path).unwrap();
        let mut allocator = Allocator::new(AllocatorOptions::from(&config));
        let first = allocator
            .resolve(&mut ledger, &ScopeSource::new("a/card.css", ""), &config)
            .unwrap();
        assert_eq!(first.id, 1);

        allocator.tombstone_file(&mut ledger, "card", "a/card.css").unwrap();
        let other = allocator
            .resolve(&mut ledger, &ScopeSource::new("b/card.css", ""), &config)
            .unwrap();
        assert_eq!(other.id, 2);

        ledger.save().unwrap();
        first.hash
    };
    assert!(Path::new(&ledger_path).exists());

    let mut ledger = FileLedger::open(&ledger_path).unwrap();
    let mut allocator = Allocator::new(AllocatorOptions::from(&config));
    let back = allocator
        .resolve(&mut ledger, &ScopeSource::new("a/card.css", "").with_hash(&hash), &config)
        .unwrap();
    assert!(back.resurrected);
    assert_eq!(back.id, 1);
    assert_eq!(back.hashed_name, format!("card-{}", hash));
    ledger.save().unwrap();
}
