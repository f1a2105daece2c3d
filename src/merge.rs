//! Incremental Patch Merger
//!
//! Splices a scope's freshly generated rules into a previously compiled rule
//! tree, in place. The compiled tree is found through its anchor: the rule
//! whose `--scope-hash` declaration starts with the scope's hash. The anchor
//! value is `<hash> <hashedName> <before> <after>`: the flat class the
//! existing rules were compiled against, and how many top-level nodes the
//! scope emitted before and after the anchor rule.
//!
//! ## Replace Set
//!
//! The span recorded in the anchor, when it fits the tree. Otherwise the
//! contiguous run of nodes around the anchor that belong to the scope:
//! - rules whose selector is the flat class or starts with it followed by
//!   `_`, `--`, `:`, a space or a comma;
//! - `@media` blocks whose rules all belong to the scope;
//! - `@keyframes` blocks named `<hashedName>__*`.
//!
//! ## Formatting
//!
//! An inserted node whose selector, with hashed names mapped back to the
//! generic target class, matches a removed node (ignoring whitespace) adopts
//! the removed node's raws, recursively. Everything else gets fresh raws.

use std::collections::{HashMap, VecDeque};
use tracing::debug;

use crate::css::{Node, Raws, Root, Rule, SCOPE_HASH_PROP};
use crate::error::ScopeError;
use crate::flatten::rename_scope_classes;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// Index of the first spliced node in the merged root.
    pub anchor_index: usize,
    pub replaced: usize,
    pub inserted: usize,
    /// Inserted top-level nodes that kept their previous formatting.
    pub preserved: usize,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ANCHOR
// ═══════════════════════════════════════════════════════════════════════════════

/// Anchor value without a span; the merger falls back to class matching.
pub fn anchor_value(hash: &str, hashed_name: &str) -> String {
    format!("{} {}", hash, hashed_name)
}

/// The anchor value written into compiled output.
pub fn anchor_value_spanning(hash: &str, hashed_name: &str, before: usize, after: usize) -> String {
    format!("{} {} {} {}", hash, hashed_name, before, after)
}

fn leading_class(selector: &str) -> Option<String> {
    let rest = selector.trim_start().strip_prefix('.')?;
    let end = rest
        .find(|c: char| c.is_whitespace() || matches!(c, ',' | ':' | '>' | '+' | '~' | '[' | '.'))
        .unwrap_or(rest.len());
    Some(rest[..end].to_string())
}

/// Flat class the rule was compiled against.
fn anchor_class(rule: &Rule) -> Option<String> {
    rule.decls()
        .find(|d| d.prop == SCOPE_HASH_PROP)
        .and_then(|d| d.value.split_whitespace().nth(1))
        .map(|s| s.to_string())
        .or_else(|| leading_class(&rule.selector))
}

/// Top-level nodes the scope emitted before and after the anchor rule.
fn anchor_span(rule: &Rule) -> Option<(usize, usize)> {
    let decl = rule.decls().find(|d| d.prop == SCOPE_HASH_PROP)?;
    let mut counts = decl.value.split_whitespace().skip(2);
    let before = counts.next()?.parse().ok()?;
    let after = counts.next()?.parse().ok()?;
    Some((before, after))
}

fn find_anchor(nodes: &[Node], hash: &str) -> Option<usize> {
    nodes
        .iter()
        .position(|n| n.as_rule().and_then(|r| r.scope_hash()) == Some(hash))
}

// ═══════════════════════════════════════════════════════════════════════════════
// REPLACE SET
// ═══════════════════════════════════════════════════════════════════════════════

fn selector_belongs(selector: &str, class: &str) -> bool {
    let dotted = format!(".{}", class);
    let Some(rest) = selector.trim().strip_prefix(&dotted) else {
        return false;
    };
    rest.is_empty()
        || rest.starts_with('_')
        || rest.starts_with("--")
        || rest.starts_with(':')
        || rest.starts_with(',')
        || rest.starts_with(char::is_whitespace)
}

fn belongs(node: &Node, class: &str) -> bool {
    match node {
        Node::Rule(rule) => selector_belongs(&rule.selector, class),
        Node::AtRule(at) if at.is_media() => {
            let mut rules = at.nodes.iter().filter_map(Node::as_rule).peekable();
            rules.peek().is_some() && rules.all(|r| selector_belongs(&r.selector, class))
        }
        Node::AtRule(at) if at.is_keyframes() => {
            at.params.trim().starts_with(&format!("{}__", class))
        }
        _ => false,
    }
}

fn replace_range(nodes: &[Node], anchor: usize, class: &str) -> (usize, usize) {
    if let Some((before, after)) = nodes[anchor].as_rule().and_then(anchor_span) {
        if before <= anchor && anchor + after < nodes.len() {
            return (anchor - before, anchor + after + 1);
        }
    }
    let mut start = anchor;
    while start > 0 && belongs(&nodes[start - 1], class) {
        start -= 1;
    }
    let mut end = anchor + 1;
    while end < nodes.len() && belongs(&nodes[end], class) {
        end += 1;
    }
    (start, end)
}

// ═══════════════════════════════════════════════════════════════════════════════
// FORMATTING TRANSFER
// ═══════════════════════════════════════════════════════════════════════════════

struct Retarget<'a> {
    names: Vec<&'a str>,
    target: &'a str,
}

impl Retarget<'_> {
    fn apply(&self, text: &str) -> String {
        let mut out = text.trim().to_string();
        for name in &self.names {
            out = rename_scope_classes(&out, name, self.target);
            if let Some(rest) = out.strip_prefix(&format!("{}__", name)) {
                out = format!("{}__{}", self.target, rest);
            }
        }
        out.split_whitespace().collect()
    }

    fn key(&self, node: &Node) -> String {
        match node {
            Node::Rule(rule) => format!("rule:{}", self.apply(&rule.selector)),
            Node::AtRule(at) => format!("@{}:{}", at.name, self.apply(&at.params)),
            Node::Decl(decl) => format!("decl:{}", decl.prop),
            Node::Comment(comment) => format!("comment:{}", comment.text.trim()),
        }
    }
}

fn adopt(new: &mut Node, old: &Node, retarget: &Retarget<'_>) {
    match (new, old) {
        (Node::Rule(n), Node::Rule(o)) => {
            n.raws = o.raws.clone();
            adopt_children(&mut n.nodes, &o.nodes, retarget);
        }
        (Node::AtRule(n), Node::AtRule(o)) => {
            n.raws = o.raws.clone();
            adopt_children(&mut n.nodes, &o.nodes, retarget);
        }
        (Node::Decl(n), Node::Decl(o)) => n.raws = o.raws.clone(),
        (Node::Comment(n), Node::Comment(o)) => n.raws = o.raws.clone(),
        (new, _) => freshen(new),
    }
}

fn freshen(node: &mut Node) {
    match node {
        Node::Rule(rule) => {
            rule.raws = Raws::fresh_rule();
            rule.nodes.iter_mut().for_each(freshen);
        }
        Node::AtRule(at) => {
            at.raws = Raws::fresh_rule();
            at.nodes.iter_mut().for_each(freshen);
        }
        Node::Decl(decl) => decl.raws = Raws::fresh_decl(),
        Node::Comment(comment) => {
            comment.raws = Raws {
                before: Some("\n".to_string()),
                ..Raws::default()
            }
        }
    }
}

/// Returns how many of `new_nodes` found a textual match.
fn adopt_children(new_nodes: &mut [Node], old_nodes: &[Node], retarget: &Retarget<'_>) -> usize {
    let mut pool: HashMap<String, VecDeque<&Node>> = HashMap::new();
    for old in old_nodes {
        pool.entry(retarget.key(old)).or_default().push_back(old);
    }

    let mut matched = 0;
    for node in new_nodes.iter_mut() {
        let previous = pool
            .get_mut(&retarget.key(node))
            .and_then(|queue| queue.pop_front());
        match previous {
            Some(old) => {
                adopt(node, old, retarget);
                matched += 1;
            }
            None => freshen(node),
        }
    }
    matched
}

// ═══════════════════════════════════════════════════════════════════════════════
// MERGE
// ═══════════════════════════════════════════════════════════════════════════════

/// Splice `new_rules` into `root` at the anchor tagged with `old_hash`.
///
/// `target_class` is the generic (un-hashed) scope class both sides are
/// compared against. On [`ScopeError::MergeAnchorNotFound`] the root is left
/// untouched and the caller writes a fresh artifact instead.
pub fn merge(
    root: &mut Root,
    mut new_rules: Vec<Node>,
    old_hash: &str,
    new_hash: &str,
    target_class: &str,
) -> Result<MergeOutcome, ScopeError> {
    let anchor = find_anchor(&root.nodes, old_hash).ok_or_else(|| ScopeError::MergeAnchorNotFound {
        hash: old_hash.to_string(),
    })?;

    let mut old_class = target_class.to_string();
    if let Node::Rule(rule) = &mut root.nodes[anchor] {
        old_class = anchor_class(rule).unwrap_or(old_class);
        if let Some(decl) = rule.decl_mut(SCOPE_HASH_PROP) {
            let value = std::iter::once(new_hash)
                .chain(decl.value.split_whitespace().skip(1))
                .collect::<Vec<_>>()
                .join(" ");
            decl.value = value;
        }
    }

    let new_class = find_anchor(&new_rules, new_hash)
        .and_then(|i| new_rules[i].as_rule())
        .and_then(anchor_class)
        .unwrap_or_else(|| old_class.clone());

    let (start, end) = replace_range(&root.nodes, anchor, &old_class);
    let removed: Vec<Node> = root.nodes.drain(start..end).collect();

    let mut names = vec![old_class.as_str(), new_class.as_str()];
    names.dedup();
    let retarget = Retarget {
        names,
        target: target_class,
    };
    let preserved = adopt_children(&mut new_rules, &removed, &retarget);

    let inserted = new_rules.len();
    root.nodes.splice(start..start, new_rules);

    debug!(
        old_hash,
        new_hash,
        replaced = removed.len(),
        inserted,
        preserved,
        "merged compiled scope"
    );

    Ok(MergeOutcome {
        anchor_index: start,
        replaced: removed.len(),
        inserted,
        preserved,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css::{AtRule, Decl};

    fn anchored(class: &str, hash: &str) -> Node {
        Node::Rule(Rule::new(
            &format!(".{}", class),
            vec![
                Decl::new(SCOPE_HASH_PROP, &anchor_value(hash, class)),
                Decl::new("display", "block"),
            ],
        ))
    }

    fn rule(selector: &str) -> Node {
        Node::Rule(Rule::new(selector, vec![Decl::new("color", "red")]))
    }

    fn media(selector: &str) -> Node {
        Node::AtRule(AtRule::new("media", "(max-width: 600px)", vec![rule(selector)]))
    }

    fn custom_raws(node: &mut Node, marker: &str) {
        if let Node::Rule(r) = node {
            r.raws.before = Some(format!("\n\n/*{}*/", marker));
            r.raws.between = Some("   ".to_string());
            for child in &mut r.nodes {
                if let Node::Decl(d) = child {
                    d.raws.before = Some(format!("\n\t\t{}", marker));
                }
            }
        }
    }

    fn compiled() -> Root {
        Root::new(vec![
            rule(".other-1"),
            anchored("card-3", "aaaaaa"),
            rule(".card-3__title"),
            rule(".card-3__body:hover"),
            media(".card-3__title"),
            rule(".footer-2"),
        ])
    }

    fn selectors(root: &Root) -> Vec<String> {
        root.nodes
            .iter()
            .map(|n| match n {
                Node::Rule(r) => r.selector.clone(),
                Node::AtRule(a) => format!("@{} {}", a.name, a.params),
                _ => String::new(),
            })
            .collect()
    }

    #[test]
    fn test_replace_set_takes_rules_and_trailing_media() {
        let mut root = compiled();
        let outcome = merge(
            &mut root,
            vec![
                anchored("card-4", "bbbbbb"),
                rule(".card-4__title"),
                rule(".card-4__body:hover"),
                media(".card-4__title"),
            ],
            "aaaaaa",
            "bbbbbb",
            "card",
        )
        .unwrap();

        assert_eq!(outcome.replaced, 4);
        assert_eq!(outcome.inserted, 4);
        assert_eq!(outcome.anchor_index, 1);
        assert_eq!(
            selectors(&root),
            vec![
                ".other-1",
                ".card-4",
                ".card-4__title",
                ".card-4__body:hover",
                "@media (max-width: 600px)",
                ".footer-2",
            ]
        );
        assert_eq!(root.nodes[1].as_rule().unwrap().scope_hash(), Some("bbbbbb"));
    }

    #[test]
    fn test_round_trip_preserves_formatting() {
        let mut root = compiled();
        for (i, node) in root.nodes.iter_mut().enumerate() {
            custom_raws(node, &i.to_string());
        }
        let original = root.clone();
        let regenerated: Vec<Node> = original.nodes[1..5].to_vec();
        let mut fresh = regenerated.clone();
        fresh.iter_mut().for_each(freshen);

        let outcome = merge(&mut root, fresh, "aaaaaa", "aaaaaa", "card").unwrap();
        assert_eq!(outcome.preserved, 4);
        assert_eq!(root, original);
    }

    #[test]
    fn test_rehashed_rules_keep_formatting() {
        let mut root = compiled();
        custom_raws(&mut root.nodes[2], "title");
        let mut new_title = rule(".card-4__title");
        freshen(&mut new_title);

        merge(
            &mut root,
            vec![anchored("card-4", "bbbbbb"), new_title],
            "aaaaaa",
            "bbbbbb",
            "card",
        )
        .unwrap();
        let title = root.nodes[2].as_rule().unwrap();
        assert_eq!(title.selector, ".card-4__title");
        assert_eq!(title.raws.before.as_deref(), Some("\n\n/*title*/"));
    }

    #[test]
    fn test_unmatched_rule_gets_fresh_raws() {
        let mut root = compiled();
        let mut added = rule(".card-3__badge");
        custom_raws(&mut added, "stale");
        merge(
            &mut root,
            vec![anchored("card-3", "aaaaaa"), added],
            "aaaaaa",
            "aaaaaa",
            "card",
        )
        .unwrap();
        let badge = root.nodes[2].as_rule().unwrap();
        assert_eq!(badge.raws, Raws::fresh_rule());
    }

    #[test]
    fn test_missing_anchor_leaves_root_untouched() {
        let mut root = compiled();
        let before = root.clone();
        let err = merge(&mut root, vec![], "zzzzzz", "bbbbbb", "card").unwrap_err();
        assert!(matches!(err, ScopeError::MergeAnchorNotFound { .. }));
        assert_eq!(root, before);
    }

    #[test]
    fn test_keyframes_and_foreign_media_boundaries() {
        let mut root = Root::new(vec![
            anchored("card-3", "aaaaaa"),
            Node::AtRule(AtRule::new("keyframes", "card-3__spin", vec![])),
            media(".footer-2"),
        ]);
        let outcome = merge(
            &mut root,
            vec![anchored("card-3", "aaaaaa")],
            "aaaaaa",
            "aaaaaa",
            "card",
        )
        .unwrap();
        assert_eq!(outcome.replaced, 2);
        assert_eq!(root.nodes.len(), 2);
    }

    #[test]
    fn test_span_covers_pass_through_rules() {
        let scope = || {
            vec![
                rule(":root"),
                Node::Rule(Rule::new(
                    ".card-3",
                    vec![Decl::new(SCOPE_HASH_PROP, &anchor_value_spanning("aaaaaa", "card-3", 1, 1))],
                )),
                rule("body"),
            ]
        };
        let mut nodes = vec![rule(".other-1")];
        nodes.extend(scope());
        nodes.push(rule(".footer-2"));
        let mut root = Root::new(nodes);
        let original = root.clone();

        for _ in 0..3 {
            let outcome = merge(&mut root, scope(), "aaaaaa", "aaaaaa", "card").unwrap();
            assert_eq!(outcome.anchor_index, 1);
            assert_eq!(outcome.replaced, 3);
        }
        assert_eq!(root, original);
    }

    #[test]
    fn test_span_out_of_bounds_falls_back_to_class() {
        let root = Root::new(vec![
            Node::Rule(Rule::new(
                ".card-3",
                vec![Decl::new(SCOPE_HASH_PROP, &anchor_value_spanning("aaaaaa", "card-3", 4, 0))],
            )),
            rule(".card-3__x"),
            rule(".footer-2"),
        ]);
        assert_eq!(replace_range(&root.nodes, 0, "card-3"), (0, 2));
    }

    #[test]
    fn test_selector_belongs_boundaries() {
        assert!(selector_belongs(".card-3", "card-3"));
        assert!(selector_belongs(".card-3__x", "card-3"));
        assert!(selector_belongs(".card-3--big", "card-3"));
        assert!(selector_belongs(".card-3:hover", "card-3"));
        assert!(selector_belongs(".card-3 .card-3__x", "card-3"));
        assert!(!selector_belongs(".card-30", "card-3"));
        assert!(!selector_belongs(".card-3-x", "card-3"));
    }
}
