//! Template Element Tree
//!
//! Mutable arena view over a template parsed with scraper, with the small
//! query surface the class-list rewriter needs: `select_all`, `matches`,
//! `is_ancestor` and attribute/class helpers. Only elements and text are
//! kept; comments, doctypes and processing instructions are dropped.
//!
//! Fragments are the common case: when the source has no `<html` tag the
//! `html`/`head`/`body` wrappers the parser inserts are flattened away.
//!
//! Selectors are matched against the tree as parsed, so class lists the
//! rewriter has already rebuilt never change what a later query sees.
//! Elements carrying a `scope` attribute are recorded as scope boundaries at
//! parse time for the same reason.

use ego_tree::{NodeId as TreeId, NodeRef};
use scraper::{ElementRef, Html, Selector};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tracing::debug;

pub type NodeId = usize;

/// Attribute marking a nested scope root.
pub const SCOPE_ATTR: &str = "scope";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<Attribute>,
    /// Flat classes queued by the rewriter, appended when the class list is rebuilt.
    pub pending_classes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Root,
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomNode {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub kind: NodeKind,
}

#[derive(Debug)]
pub struct Document {
    parsed: Html,
    nodes: Vec<DomNode>,
    boundaries: HashSet<NodeId>,
    tree_ids: HashMap<NodeId, TreeId>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTRUCTION
// ═══════════════════════════════════════════════════════════════════════════════

impl Document {
    pub const ROOT: NodeId = 0;

    pub fn parse(source: &str, file_path: &str) -> Self {
        let parsed = Html::parse_document(source);
        if !parsed.errors.is_empty() {
            debug!(file_path, errors = parsed.errors.len(), "template parsed with recovered errors");
        }

        let mut doc = Self {
            parsed: Html::new_document(),
            nodes: vec![DomNode {
                parent: None,
                children: Vec::new(),
                kind: NodeKind::Root,
            }],
            boundaries: HashSet::new(),
            tree_ids: HashMap::new(),
        };
        let keep_wrappers = source.to_lowercase().contains("<html");
        doc.collect(parsed.tree.root(), Self::ROOT, keep_wrappers);
        doc.parsed = parsed;
        doc
    }

    fn collect(&mut self, node: NodeRef<'_, scraper::Node>, parent: NodeId, keep_wrappers: bool) {
        match node.value() {
            scraper::Node::Document => {
                for child in node.children() {
                    self.collect(child, parent, keep_wrappers);
                }
            }
            scraper::Node::Element(el) => {
                let tag = el.name().to_ascii_lowercase();
                let is_wrapper = matches!(tag.as_str(), "html" | "head" | "body");
                if is_wrapper && !keep_wrappers {
                    for child in node.children() {
                        self.collect(child, parent, keep_wrappers);
                    }
                    return;
                }

                let element = Element {
                    name: tag,
                    attrs: el
                        .attrs()
                        .map(|(name, value)| Attribute {
                            name: name.to_string(),
                            value: value.to_string(),
                        })
                        .collect(),
                    pending_classes: Vec::new(),
                };
                let id = self.push(parent, NodeKind::Element(element));
                if el.attr(SCOPE_ATTR).is_some() {
                    self.boundaries.insert(id);
                }
                self.tree_ids.insert(id, node.id());

                for child in node.children() {
                    self.collect(child, id, keep_wrappers);
                }
            }
            scraper::Node::Text(text) => {
                self.push(parent, NodeKind::Text(text.to_string()));
            }
            _ => {}
        }
    }

    fn push(&mut self, parent: NodeId, kind: NodeKind) -> NodeId {
        let id = self.nodes.len();
        self.nodes.push(DomNode {
            parent: Some(parent),
            children: Vec::new(),
            kind,
        });
        self.nodes[parent].children.push(id);
        id
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// NAVIGATION
// ═══════════════════════════════════════════════════════════════════════════════

impl Document {
    pub fn element(&self, id: NodeId) -> Option<&Element> {
        match &self.nodes.get(id)?.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn element_mut(&mut self, id: NodeId) -> Option<&mut Element> {
        match &mut self.nodes.get_mut(id)?.kind {
            NodeKind::Element(el) => Some(el),
            _ => None,
        }
    }

    pub fn tag_name(&self, id: NodeId) -> Option<&str> {
        self.element(id).map(|el| el.name.as_str())
    }

    /// Parent node, which is `ROOT` for top-level elements.
    pub fn parent(&self, id: NodeId) -> Option<NodeId> {
        self.nodes.get(id)?.parent
    }

    pub fn parent_element(&self, id: NodeId) -> Option<NodeId> {
        let parent = self.parent(id)?;
        self.element(parent).map(|_| parent)
    }

    pub fn element_children(&self, id: NodeId) -> Vec<NodeId> {
        self.nodes
            .get(id)
            .map(|n| {
                n.children
                    .iter()
                    .copied()
                    .filter(|c| self.element(*c).is_some())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Element descendants of `id` in document order, `id` excluded.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self
            .nodes
            .get(id)
            .map(|n| n.children.iter().rev().copied().collect())
            .unwrap_or_default();
        while let Some(current) = stack.pop() {
            if self.element(current).is_some() {
                out.push(current);
                stack.extend(self.nodes[current].children.iter().rev().copied());
            }
        }
        out
    }

    /// Every element in document order.
    pub fn elements(&self) -> Vec<NodeId> {
        self.descendants(Self::ROOT)
    }

    /// Strict ancestry: a node is not its own ancestor.
    pub fn is_ancestor(&self, ancestor: NodeId, node: NodeId) -> bool {
        let mut current = self.nodes.get(node).and_then(|n| n.parent);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes[id].parent;
        }
        false
    }

    pub fn is_boundary(&self, id: NodeId) -> bool {
        self.boundaries.contains(&id)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// ATTRIBUTES & CLASSES
// ═══════════════════════════════════════════════════════════════════════════════

impl Document {
    pub fn attr(&self, id: NodeId, name: &str) -> Option<&str> {
        self.element(id)?
            .attrs
            .iter()
            .find(|a| a.name == name)
            .map(|a| a.value.as_str())
    }

    pub fn has_attr(&self, id: NodeId, name: &str) -> bool {
        self.attr(id, name).is_some()
    }

    pub fn set_attr(&mut self, id: NodeId, name: &str, value: &str) {
        if let Some(el) = self.element_mut(id) {
            match el.attrs.iter_mut().find(|a| a.name == name) {
                Some(attr) => attr.value = value.to_string(),
                None => el.attrs.push(Attribute {
                    name: name.to_string(),
                    value: value.to_string(),
                }),
            }
        }
    }

    pub fn remove_attr(&mut self, id: NodeId, name: &str) -> Option<String> {
        let el = self.element_mut(id)?;
        let pos = el.attrs.iter().position(|a| a.name == name)?;
        Some(el.attrs.remove(pos).value)
    }

    pub fn classes(&self, id: NodeId) -> Vec<String> {
        self.attr(id, "class")
            .map(|c| c.split_whitespace().map(|s| s.to_string()).collect())
            .unwrap_or_default()
    }

    pub fn has_class(&self, id: NodeId, class: &str) -> bool {
        self.attr(id, "class")
            .map_or(false, |c| c.split_whitespace().any(|s| s == class))
    }

    /// Replace the class list; an empty list removes the attribute.
    pub fn set_classes(&mut self, id: NodeId, classes: &[String]) {
        if classes.is_empty() {
            self.remove_attr(id, "class");
        } else {
            self.set_attr(id, "class", &classes.join(" "));
        }
    }

    /// Nested JSON view of the tree, for hosts that serialize markup themselves.
    pub fn to_json(&self) -> Value {
        fn node_json(doc: &Document, id: NodeId) -> Value {
            let node = &doc.nodes[id];
            let children: Vec<Value> = node.children.iter().map(|c| node_json(doc, *c)).collect();
            match &node.kind {
                NodeKind::Root => json!({ "type": "root", "children": children }),
                NodeKind::Text(text) => json!({ "type": "text", "text": text }),
                NodeKind::Element(el) => {
                    let attrs: serde_json::Map<String, Value> = el
                        .attrs
                        .iter()
                        .map(|a| (a.name.clone(), Value::String(a.value.clone())))
                        .collect();
                    json!({
                        "type": "element",
                        "tag": el.name,
                        "attrs": attrs,
                        "children": children,
                    })
                }
            }
        }
        node_json(self, Self::ROOT)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SELECTOR MATCHING
// ═══════════════════════════════════════════════════════════════════════════════

fn compile(selector: &str) -> Option<Selector> {
    let selector = selector.trim();
    // A leading combinator is relative to the query root.
    let text = if selector.starts_with(|c: char| matches!(c, '>' | '+' | '~')) {
        format!(":scope {}", selector)
    } else {
        selector.to_string()
    };
    let compiled = match Selector::parse(&text) {
        Ok(compiled) => Some(compiled),
        Err(err) => {
            debug!(selector, ?err, "unsupported selector matches nothing");
            None
        }
    };
    compiled
}

impl Document {
    fn element_ref(&self, id: NodeId) -> Option<ElementRef<'_>> {
        let tree_id = self.tree_ids.get(&id)?;
        ElementRef::wrap(self.parsed.tree.get(*tree_id)?)
    }

    fn matches_compiled(&self, selector: &Selector, id: NodeId, scope: NodeId) -> bool {
        match self.element_ref(id) {
            Some(el) => selector.matches_with_scope(&el, self.element_ref(scope)),
            None => false,
        }
    }

    /// Descendants of `scope` matching `selector`, in document order.
    /// `:scope` refers to `scope`; a leading combinator is relative to it.
    /// Unsupported selectors match nothing.
    pub fn select_all(&self, selector: &str, scope: NodeId) -> Vec<NodeId> {
        let Some(compiled) = compile(selector) else {
            return Vec::new();
        };
        self.descendants(scope)
            .into_iter()
            .filter(|id| self.matches_compiled(&compiled, *id, scope))
            .collect()
    }

    /// Does `id` itself match `selector` (with `:scope` bound to `scope`)?
    pub fn matches(&self, selector: &str, id: NodeId, scope: NodeId) -> bool {
        compile(selector).map_or(false, |compiled| self.matches_compiled(&compiled, id, scope))
    }
}
