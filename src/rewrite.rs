//! Template Class-List Rewriter
//!
//! Applies a scope's flattened names to every element of a template that
//! sits under a root of that scope (`class="card"`).
//!
//! ## Per Root
//!
//! 1. Bookkeeping attributes (`data-scope`, `scope`) are removed and the
//!    scope hash is optionally stamped as `data-scope-hash`.
//! 2. Chain records walk `:scope <segment>` queries depth first, queueing
//!    `flat_chain[i]` on every element matched at depth `i`.
//! 3. Simple records queue their flat class on every element matching the
//!    pseudo-stripped raw selector.
//! 4. Class lists are rebuilt: original tokens first (scope tokens renamed,
//!    classes consumed by a matched record dropped), queued classes after,
//!    duplicates removed.
//!
//! Nested scope roots, other roots of the same scope and `scope-break`
//! subtrees are never matched. `scope-break="a b"` and `scope-exclude="a b"`
//! turn the listed classes into pass-through classes instead.

use lazy_static::lazy_static;
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

use crate::dom::{Document, NodeId, SCOPE_ATTR};
use crate::flatten::{css_unescape, starts_with_scope, FlatResult, SelectorsObj};
use crate::tokenizer::{split_pseudo, strip_pseudo, tokenize, Token};

lazy_static! {
    static ref CLASS_RE: Regex = Regex::new(r"\.((?:\\.|[A-Za-z0-9_-]|[^\x00-\x7F])+)").unwrap();
}

pub const DISCRIMINATOR_ATTR: &str = "data-scope";
pub const HASH_ATTR: &str = "data-scope-hash";
pub const BREAK_ATTR: &str = "scope-break";
pub const EXCLUDE_ATTR: &str = "scope-exclude";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewriteOptions {
    /// Only roots whose `data-scope` equals this value are rewritten.
    pub discriminator: Option<String>,
    pub stamp_hash: bool,
    pub dont_flatten: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RewriteReport {
    pub roots: usize,
    pub elements_rewritten: usize,
    pub classes_added: usize,
}

/// Classes named by the last compound of a (pseudo-stripped) selector.
fn compound_classes(selector: &str) -> Vec<String> {
    let last = match tokenize(selector) {
        Ok(tokens) => tokens.into_iter().rev().find_map(|t| match t {
            Token::Compound(text) => Some(text),
            Token::Combinator(_) => None,
        }),
        Err(_) => None,
    };
    last.map(|text| {
        CLASS_RE
            .captures_iter(&text)
            .map(|caps| css_unescape(&caps[1]))
            .collect()
    })
    .unwrap_or_default()
}

/// The single class a simple flat selector stands for.
fn flat_class(selector: &str) -> Option<String> {
    let (base, _) = split_pseudo(selector.trim());
    let class = base.strip_prefix('.')?;
    if class.is_empty() || class.contains(|c: char| c.is_whitespace() || c == '.') {
        return None;
    }
    Some(css_unescape(class))
}

fn split_attr_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| v.split_whitespace().map(|s| s.to_string()).collect())
        .unwrap_or_default()
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPE CONTEXT
// ═══════════════════════════════════════════════════════════════════════════════

/// Matching state for one scope root.
struct RootContext<'a> {
    root: NodeId,
    selectors: &'a SelectorsObj,
    other_roots: &'a [NodeId],
    passthrough: HashMap<NodeId, HashSet<String>>,
    consumed: HashMap<NodeId, HashSet<String>>,
    /// Elements whose class list is rebuilt, in first-seen order.
    touched: Vec<NodeId>,
    seen: HashSet<NodeId>,
}

impl<'a> RootContext<'a> {
    fn new(doc: &Document, root: NodeId, other_roots: &'a [NodeId], selectors: &'a SelectorsObj) -> Self {
        let mut ctx = Self {
            root,
            selectors,
            other_roots,
            passthrough: HashMap::new(),
            consumed: HashMap::new(),
            touched: Vec::new(),
            seen: HashSet::new(),
        };
        for id in std::iter::once(root).chain(doc.descendants(root)) {
            if !ctx.is_blocked(doc, id) {
                ctx.touch(doc, id);
            }
        }
        ctx
    }

    /// Nested scope roots, other roots of this scope and valueless breaks.
    fn blocks(&self, doc: &Document, id: NodeId) -> bool {
        doc.is_boundary(id)
            || self.other_roots.contains(&id)
            || doc.attr(id, BREAK_ATTR).map_or(false, |v| v.trim().is_empty())
    }

    /// Walks up from `id` until it reaches the root or leaves the root's
    /// subtree (sibling matches), checking every element on the way.
    fn is_blocked(&self, doc: &Document, id: NodeId) -> bool {
        let mut current = Some(id);
        while let Some(node) = current {
            if node == self.root || doc.is_ancestor(node, self.root) {
                return false;
            }
            if self.blocks(doc, node) {
                return true;
            }
            current = doc.parent_element(node);
        }
        false
    }

    fn touch(&mut self, doc: &Document, id: NodeId) {
        if !self.seen.insert(id) {
            return;
        }
        let mut classes: HashSet<String> = split_attr_list(doc.attr(id, EXCLUDE_ATTR)).into_iter().collect();
        let mut current = Some(id);
        while let Some(node) = current {
            if doc.is_ancestor(node, self.root) {
                break;
            }
            classes.extend(split_attr_list(doc.attr(node, BREAK_ATTR)));
            if node == self.root {
                break;
            }
            current = doc.parent_element(node);
        }
        if !classes.is_empty() {
            self.passthrough.insert(id, classes);
        }
        self.touched.push(id);
    }

    /// Queue `flat` on `id` unless one of the matched classes is pass-through there.
    fn claim(&mut self, doc: &mut Document, id: NodeId, flat: &str, matched: &[String]) -> bool {
        self.touch(doc, id);
        if let Some(passthrough) = self.passthrough.get(&id) {
            if matched.iter().any(|c| passthrough.contains(c)) {
                return false;
            }
        }
        let scope_name = &self.selectors.scope_name;
        let consumed = self.consumed.entry(id).or_default();
        for class in matched {
            if !is_scope_token(class, scope_name) {
                consumed.insert(class.clone());
            }
        }
        if let Some(el) = doc.element_mut(id) {
            el.pending_classes.push(flat.to_string());
        }
        true
    }

    fn walk_chain(&mut self, doc: &mut Document, chain: &[String], flat_chain: &[String], depth: usize, context: NodeId) {
        let (Some(segment), Some(flat)) = (chain.get(depth), flat_chain.get(depth)) else {
            return;
        };
        let segment = segment.trim();
        let matched_classes = compound_classes(segment);

        let candidates: Vec<NodeId> = if depth == 0 && starts_with_scope(segment, &self.selectors.scope_name) {
            if doc.matches(segment, context, context) {
                vec![context]
            } else {
                Vec::new()
            }
        } else if segment.starts_with('+') || segment.starts_with('~') {
            doc.parent(context)
                .map(|parent| doc.element_children(parent))
                .unwrap_or_default()
                .into_iter()
                .filter(|sib| doc.matches(segment, *sib, context))
                .collect()
        } else {
            doc.select_all(&format!(":scope {}", segment), context)
        };

        for id in candidates {
            if self.is_blocked(doc, id) {
                continue;
            }
            if self.claim(doc, id, flat, &matched_classes) {
                self.walk_chain(doc, chain, flat_chain, depth + 1, id);
            }
        }
    }

    fn apply_simple(&mut self, doc: &mut Document, raw: &str, flat: &str) {
        let Some(class) = flat_class(flat) else {
            debug!(raw, flat, "flat selector is not a single class");
            return;
        };
        let selector = strip_pseudo(raw);
        let matched_classes = compound_classes(&selector);
        let candidates: Vec<NodeId> = std::iter::once(self.root)
            .chain(doc.descendants(self.root))
            .filter(|id| !self.is_blocked(doc, *id))
            .filter(|id| doc.matches(&selector, *id, self.root))
            .collect();
        for id in candidates {
            self.claim(doc, id, &class, &matched_classes);
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CLASS ASSEMBLY
// ═══════════════════════════════════════════════════════════════════════════════

fn is_scope_token(token: &str, scope_name: &str) -> bool {
    token == scope_name
        || token
            .strip_prefix(scope_name)
            .map_or(false, |rest| rest.starts_with("__") || rest.starts_with("--"))
}

fn rename_scope_token(token: &str, scope_name: &str, hashed_name: &str) -> String {
    if is_scope_token(token, scope_name) {
        format!("{}{}", hashed_name, &token[scope_name.len()..])
    } else {
        token.to_string()
    }
}

fn inside_form(doc: &Document, id: NodeId) -> bool {
    let mut current = Some(id);
    while let Some(node) = current {
        if doc.tag_name(node) == Some("form") {
            return true;
        }
        current = doc.parent_element(node);
    }
    false
}

impl RootContext<'_> {
    fn assemble(&self, doc: &mut Document, id: NodeId) -> (bool, usize) {
        let scope_name = &self.selectors.scope_name;
        let hashed_name = &self.selectors.hashed_name;
        let no_passthrough = HashSet::new();
        let passthrough = self.passthrough.get(&id).unwrap_or(&no_passthrough);
        let no_consumed = HashSet::new();
        let consumed = self.consumed.get(&id).unwrap_or(&no_consumed);

        let original = doc.classes(id);
        let pending = doc
            .element_mut(id)
            .map(|el| std::mem::take(&mut el.pending_classes))
            .unwrap_or_default();

        let mut seen = HashSet::new();
        let mut classes = Vec::with_capacity(original.len() + pending.len());
        for token in &original {
            let next = if passthrough.contains(token) {
                token.clone()
            } else if consumed.contains(token) {
                continue;
            } else {
                rename_scope_token(token, scope_name, hashed_name)
            };
            if seen.insert(next.clone()) {
                classes.push(next);
            }
        }
        let mut added = 0;
        for class in pending {
            if seen.insert(class.clone()) {
                classes.push(class);
                added += 1;
            }
        }

        let mut changed = classes != original;
        if changed {
            doc.set_classes(id, &classes);
        }

        if inside_form(doc, id) {
            for attr in ["for", "id"] {
                if let Some(value) = doc.attr(id, attr).map(|v| v.to_string()) {
                    let renamed = rename_scope_token(&value, scope_name, hashed_name);
                    if renamed != value && value != *scope_name {
                        doc.set_attr(id, attr, &renamed);
                        changed = true;
                    }
                }
            }
        }

        for directive in [BREAK_ATTR, EXCLUDE_ATTR] {
            if doc.remove_attr(id, directive).is_some() {
                changed = true;
            }
        }
        (changed, added)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ENTRY POINT
// ═══════════════════════════════════════════════════════════════════════════════

/// Roots of the scope in document order.
pub fn scope_roots(doc: &Document, scope_name: &str, discriminator: Option<&str>) -> Vec<NodeId> {
    doc.elements()
        .into_iter()
        .filter(|id| doc.has_class(*id, scope_name))
        .filter(|id| match discriminator {
            Some(want) => doc.attr(*id, DISCRIMINATOR_ATTR) == Some(want),
            None => true,
        })
        .collect()
}

pub fn rewrite(doc: &mut Document, selectors: &SelectorsObj, options: &RewriteOptions) -> RewriteReport {
    let mut report = RewriteReport::default();
    let roots = scope_roots(doc, &selectors.scope_name, options.discriminator.as_deref());

    for &root in &roots {
        let others: Vec<NodeId> = roots.iter().copied().filter(|r| *r != root).collect();
        let mut ctx = RootContext::new(doc, root, &others, selectors);

        doc.remove_attr(root, DISCRIMINATOR_ATTR);
        doc.remove_attr(root, SCOPE_ATTR);
        if options.stamp_hash && !selectors.hash.is_empty() {
            doc.set_attr(root, HASH_ATTR, &selectors.hash);
        }

        if !options.dont_flatten {
            for record in &selectors.selectors {
                match &record.flat {
                    FlatResult::Chain(chain) => {
                        ctx.walk_chain(doc, &chain.chain, &chain.flat_chain, 0, root);
                    }
                    FlatResult::Simple(flat) => ctx.apply_simple(doc, &record.raw, flat),
                    FlatResult::Passthrough(_) => {}
                }
            }
        }

        for id in ctx.touched.clone() {
            let (changed, added) = ctx.assemble(doc, id);
            if changed {
                report.elements_rewritten += 1;
            }
            report.classes_added += added;
        }
        report.roots += 1;
    }

    debug!(
        scope = %selectors.scope_name,
        roots = report.roots,
        elements = report.elements_rewritten,
        "rewrote template class lists"
    );
    report
}
