//! Scope Compilation Driver
//!
//! Per scope file: resolve the identity, flatten every rule against it,
//! scope `@keyframes`, tag the output with its `--scope-hash` anchor, and
//! finally merge into an existing artifact or emit a fresh one.
//!
//! A batch parses and compiles in parallel with rayon, but every allocator
//! call runs on the calling thread in source order.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::allocator::{Allocator, NameCollision};
use crate::cache::{Artifact, ArtifactRegistry};
use crate::config::ScopeConfig;
use crate::css::{CssParser, Decl, Node, Root, Rule, SCOPE_HASH_PROP};
use crate::error::ScopeError;
use crate::flatten::{flatten_selector_list, scope_keyframes, FlattenOptions, SelectorRecord, SelectorsObj};
use crate::ledger::LedgerStore;
use crate::merge::{anchor_value_spanning, MergeOutcome};
use crate::scope::{ScopeIdentity, ScopeSource};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledScope {
    pub file_path: String,
    pub identity: ScopeIdentity,
    pub root: Root,
    pub selectors: SelectorsObj,
    /// `(original, scoped)` keyframe names.
    pub keyframes: Vec<(String, String)>,
}

/// A scope left out of the batch; nothing was allocated or written for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedScope {
    pub scope_name: String,
    pub file_path: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOutput {
    pub compiled: Vec<CompiledScope>,
    pub skipped: Vec<SkippedScope>,
    pub collisions: Vec<NameCollision>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactWrite {
    Merged(MergeOutcome),
    Fresh,
}

// ═══════════════════════════════════════════════════════════════════════════════
// SINGLE SCOPE
// ═══════════════════════════════════════════════════════════════════════════════

fn flatten_rules(nodes: &mut [Node], opts: &FlattenOptions, records: &mut Vec<SelectorRecord>) {
    for node in nodes {
        match node {
            Node::Rule(rule) => {
                let flattened = flatten_selector_list(&rule.selector, opts);
                rule.selector = flattened.selector;
                for record in flattened.records {
                    if !records.contains(&record) {
                        records.push(record);
                    }
                }
            }
            Node::AtRule(at) if !at.is_keyframes() => flatten_rules(&mut at.nodes, opts, records),
            _ => {}
        }
    }
}

/// Tag the scope's root rule with the anchor, creating the rule if needed.
/// Runs last so the recorded span covers every top-level node.
fn insert_anchor(root: &mut Root, identity: &ScopeIdentity) {
    let class = format!(".{}", identity.hashed_name);
    let existing = root
        .nodes
        .iter()
        .position(|node| matches!(node, Node::Rule(rule) if rule.selector.trim() == class));
    let pos = existing.unwrap_or_else(|| {
        root.nodes.insert(0, Node::Rule(Rule::new(&class, Vec::new())));
        0
    });

    let after = root.nodes.len() - pos - 1;
    let value = anchor_value_spanning(&identity.hash, &identity.hashed_name, pos, after);
    if let Node::Rule(rule) = &mut root.nodes[pos] {
        if let Some(decl) = rule.decl_mut(SCOPE_HASH_PROP) {
            decl.value = value;
        } else {
            rule.nodes.insert(0, Node::Decl(Decl::new(SCOPE_HASH_PROP, &value)));
        }
    }
}

/// Pure transform of one parsed scope against its resolved identity.
pub fn compile_scope(mut root: Root, file_path: &str, identity: &ScopeIdentity, config: &ScopeConfig) -> CompiledScope {
    let opts = FlattenOptions::from_config(config, &identity.scope_name, &identity.hashed_name);
    let mut records = Vec::new();
    flatten_rules(&mut root.nodes, &opts, &mut records);
    let keyframes = scope_keyframes(&mut root, &identity.hashed_name);
    insert_anchor(&mut root, identity);

    debug!(
        scope = %identity.scope_name,
        hashed = %identity.hashed_name,
        records = records.len(),
        "compiled scope"
    );

    CompiledScope {
        file_path: file_path.to_string(),
        identity: identity.clone(),
        root,
        selectors: SelectorsObj {
            selectors: records,
            scope_name: identity.scope_name.clone(),
            hashed_name: identity.hashed_name.clone(),
            hash: identity.hash.clone(),
        },
        keyframes,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// BATCH
// ═══════════════════════════════════════════════════════════════════════════════

/// Compile every source. Malformed CSS skips that scope only; a fatal
/// allocator error aborts the batch after the mutations made so far.
pub fn compile_batch(
    sources: &[ScopeSource],
    parser: &dyn CssParser,
    allocator: &mut Allocator,
    store: &mut dyn LedgerStore,
    config: &ScopeConfig,
) -> Result<BatchOutput, ScopeError> {
    allocator.begin_batch();

    let parsed: Vec<Result<Root, ScopeError>> = sources
        .par_iter()
        .map(|source| parser.parse(&source.raw_css, &source.file_path))
        .collect();

    let mut output = BatchOutput::default();
    let mut jobs = Vec::with_capacity(sources.len());
    for (source, result) in sources.iter().zip(parsed) {
        let root = match result {
            Ok(root) => root,
            Err(err) => {
                error!(
                    scope = %source.scope_name,
                    file = %source.file_path,
                    code = err.code(),
                    %err,
                    "skipping scope"
                );
                output.skipped.push(SkippedScope {
                    scope_name: source.scope_name.clone(),
                    file_path: source.file_path.clone(),
                    code: err.code().to_string(),
                    message: err.to_string(),
                });
                continue;
            }
        };
        let scope_config = config.for_path(&source.file_path);
        let identity = allocator.resolve(store, source, &scope_config)?;
        jobs.push((root, source.file_path.clone(), identity, scope_config));
    }

    output.compiled = jobs
        .into_par_iter()
        .map(|(root, file_path, identity, scope_config)| {
            compile_scope(root, &file_path, &identity, &scope_config)
        })
        .collect();
    output.collisions = allocator.take_collisions();

    info!(
        compiled = output.compiled.len(),
        skipped = output.skipped.len(),
        collisions = output.collisions.len(),
        "compiled scope batch"
    );
    Ok(output)
}

/// Merge into the artifact registered under `old_hash`, or register a fresh
/// artifact when there is none or its anchor is gone.
pub fn merge_or_fresh(
    registry: &mut ArtifactRegistry,
    compiled: &CompiledScope,
    old_hash: Option<&str>,
    relative_output_path: &str,
) -> Result<ArtifactWrite, ScopeError> {
    let new_hash = compiled.identity.hash.as_str();
    if let Some(old_hash) = old_hash.filter(|h| registry.contains(h)) {
        match registry.apply_merge(
            old_hash,
            new_hash,
            compiled.root.nodes.clone(),
            &compiled.identity.scope_name,
        ) {
            Ok(outcome) => return Ok(ArtifactWrite::Merged(outcome)),
            Err(ScopeError::MergeAnchorNotFound { hash }) => {
                warn!(
                    scope = %compiled.identity.scope_name,
                    hash = %hash,
                    "merge anchor missing, writing fresh artifact"
                );
            }
            Err(err) => return Err(err),
        }
    }

    registry.insert(new_hash, Artifact::new(compiled.root.clone(), relative_output_path));
    Ok(ArtifactWrite::Fresh)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::AllocatorOptions;
    use crate::css::{AtRule, JsonRootParser};
    use crate::flatten::FlatResult;
    use crate::ledger::MemoryLedger;

    fn identity() -> ScopeIdentity {
        ScopeIdentity {
            scope_name: "card".to_string(),
            id: 3,
            hash: "ab12cd".to_string(),
            hashed_name: "card-3".to_string(),
            resurrected: false,
        }
    }

    fn sample_root() -> Root {
        Root::new(vec![
            Node::Rule(Rule::new(".card", vec![Decl::new("display", "block")])),
            Node::Rule(Rule::new(".card .title, .card__x:hover", vec![Decl::new("animation", "spin 1s")])),
            Node::AtRule(AtRule::new("keyframes", "spin", vec![])),
            Node::AtRule(AtRule::new(
                "media",
                "print",
                vec![Node::Rule(Rule::new(".title", vec![]))],
            )),
        ])
    }

    fn json_source(path: &str, root: &Root) -> ScopeSource {
        ScopeSource::new(path, &serde_json::to_string(root).unwrap())
    }

    #[test]
    fn test_compile_scope_rewrites_rules() {
        let compiled = compile_scope(sample_root(), "card.css", &identity(), &ScopeConfig::default());
        let rule = compiled.root.nodes[0].as_rule().unwrap();
        assert_eq!(rule.selector, ".card-3");
        assert_eq!(rule.scope_hash(), Some("ab12cd"));

        let second = compiled.root.nodes[1].as_rule().unwrap();
        assert_eq!(second.selector, ".card-3 .card-3__title, .card-3__x:hover");
        assert_eq!(second.decls().next().unwrap().value, "card-3__spin 1s");

        match &compiled.root.nodes[3] {
            Node::AtRule(at) => assert_eq!(at.nodes[0].as_rule().unwrap().selector, ".card-3 .card-3__title"),
            _ => panic!("expected media"),
        }
        assert_eq!(compiled.keyframes.len(), 1);
        // `.card .title` from the rule and the media block share one record.
        assert_eq!(compiled.selectors.selectors.len(), 3);
        assert!(compiled
            .selectors
            .selectors
            .iter()
            .any(|r| matches!(r.flat, FlatResult::Chain(_))));
    }

    #[test]
    fn test_anchor_rule_created_when_missing() {
        let root = Root::new(vec![Node::Rule(Rule::new(".card__x", vec![]))]);
        let compiled = compile_scope(root, "card.css", &identity(), &ScopeConfig::default());
        let anchor = compiled.root.nodes[0].as_rule().unwrap();
        assert_eq!(anchor.selector, ".card-3");
        assert_eq!(anchor.decls().next().unwrap().value, "ab12cd card-3 0 1");
    }

    #[test]
    fn test_remerge_keeps_pass_through_rules_single() {
        let root = Root::new(vec![
            Node::Rule(Rule::new(":root", vec![Decl::new("--gap", "4px")])),
            Node::Rule(Rule::new(".card", vec![Decl::new("display", "block")])),
        ]);
        let compiled = compile_scope(root, "card.css", &identity(), &ScopeConfig::default());
        assert_eq!(
            compiled.root.nodes[1].as_rule().unwrap().decls().next().unwrap().value,
            "ab12cd card-3 1 0"
        );

        let mut registry = ArtifactRegistry::new();
        registry.insert("ab12cd", Artifact::new(compiled.root.clone(), "card.css"));
        for _ in 0..3 {
            let write = merge_or_fresh(&mut registry, &compiled, Some("ab12cd"), "card.css").unwrap();
            assert!(matches!(write, ArtifactWrite::Merged(_)));
        }
        assert_eq!(registry.get("ab12cd").unwrap().root, compiled.root);
    }

    #[test]
    fn test_batch_assigns_ids_and_skips_bad_css() {
        let sources = vec![
            json_source("a/card.css", &sample_root()),
            ScopeSource::new("broken/list.css", "{ not json"),
            json_source("b/card.css", &sample_root()),
        ];
        let mut allocator = Allocator::new(AllocatorOptions::default());
        let mut store = MemoryLedger::new();
        let output = compile_batch(
            &sources,
            &JsonRootParser,
            &mut allocator,
            &mut store,
            &ScopeConfig::default(),
        )
        .unwrap();

        assert_eq!(output.compiled.len(), 2);
        assert_eq!(output.compiled[0].identity.hashed_name, "card-1");
        assert_eq!(output.compiled[1].identity.hashed_name, "card-2");
        assert_eq!(output.skipped.len(), 1);
        assert_eq!(output.skipped[0].scope_name, "list");
        assert!(store.get("list").is_none());
    }

    #[test]
    fn test_dont_hash_first_batch() {
        let sources = vec![
            json_source("a/card.css", &sample_root()),
            json_source("b/card.css", &sample_root()),
        ];
        let config = ScopeConfig {
            dont_hash_first: true,
            ..ScopeConfig::default()
        };
        let mut allocator = Allocator::new(AllocatorOptions::from(&config));
        let mut store = MemoryLedger::new();
        let output = compile_batch(&sources, &JsonRootParser, &mut allocator, &mut store, &config).unwrap();
        assert_eq!(output.compiled[0].identity.hashed_name, "card");
        assert_eq!(output.compiled[1].identity.hashed_name, "card-2");
    }

    #[test]
    fn test_merge_or_fresh() {
        let mut registry = ArtifactRegistry::new();
        let compiled = compile_scope(sample_root(), "card.css", &identity(), &ScopeConfig::default());

        let first = merge_or_fresh(&mut registry, &compiled, None, "dist/card.css").unwrap();
        assert_eq!(first, ArtifactWrite::Fresh);

        let second = merge_or_fresh(&mut registry, &compiled, Some("ab12cd"), "dist/card.css").unwrap();
        assert!(matches!(second, ArtifactWrite::Merged(_)));
        assert_eq!(registry.len(), 1);

        let unknown = merge_or_fresh(&mut registry, &compiled, Some("ffffff"), "dist/card.css").unwrap();
        assert_eq!(unknown, ArtifactWrite::Fresh);
    }
}
