//! CSS Rule Tree
//!
//! The mutable rule tree exchanged with the external CSS parser/serializer.
//! The core never reads raw CSS text; it receives a [`Root`] from a
//! [`CssParser`] and hands a transformed [`Root`] back for serialization.
//! `raws` carries the formatting metadata the serializer needs to reproduce
//! the original bytes.

use serde::{Deserialize, Serialize};

use crate::error::ScopeError;

/// Custom property that anchors a compiled scope inside an output file.
pub const SCOPE_HASH_PROP: &str = "--scope-hash";

/// Formatting metadata attached to every node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Raws {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub between: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semicolon: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<String>,
}

impl Raws {
    pub fn fresh_rule() -> Self {
        Self {
            before: Some("\n".to_string()),
            after: Some("\n".to_string()),
            between: Some(" ".to_string()),
            semicolon: Some(true),
            ..Self::default()
        }
    }

    pub fn fresh_decl() -> Self {
        Self {
            before: Some("\n  ".to_string()),
            between: Some(": ".to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Decl {
    pub prop: String,
    pub value: String,
    #[serde(default)]
    pub important: bool,
    #[serde(default)]
    pub raws: Raws,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rule {
    pub selector: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub raws: Raws,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AtRule {
    pub name: String,
    pub params: String,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub raws: Raws,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    pub text: String,
    #[serde(default)]
    pub raws: Raws,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Node {
    Rule(Rule),
    #[serde(rename = "atrule")]
    AtRule(AtRule),
    Decl(Decl),
    Comment(Comment),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Root {
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub raws: Raws,
}

/// The external CSS parsing layer.
pub trait CssParser: Sync {
    fn parse(&self, source: &str, file_path: &str) -> Result<Root, ScopeError>;
}

/// Accepts a rule tree already parsed by the host, serialized as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRootParser;

impl CssParser for JsonRootParser {
    fn parse(&self, source: &str, file_path: &str) -> Result<Root, ScopeError> {
        serde_json::from_str(source).map_err(|e| ScopeError::CssParse {
            file_path: file_path.to_string(),
            message: e.to_string(),
        })
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// CONSTRUCTORS & ACCESSORS
// ═══════════════════════════════════════════════════════════════════════════════

impl Decl {
    pub fn new(prop: &str, value: &str) -> Self {
        Self {
            prop: prop.to_string(),
            value: value.to_string(),
            important: false,
            raws: Raws::fresh_decl(),
        }
    }
}

impl Rule {
    pub fn new(selector: &str, decls: Vec<Decl>) -> Self {
        Self {
            selector: selector.to_string(),
            nodes: decls.into_iter().map(Node::Decl).collect(),
            raws: Raws::fresh_rule(),
        }
    }

    pub fn decls(&self) -> impl Iterator<Item = &Decl> {
        self.nodes.iter().filter_map(|n| match n {
            Node::Decl(d) => Some(d),
            _ => None,
        })
    }

    pub fn decl_mut(&mut self, prop: &str) -> Option<&mut Decl> {
        self.nodes.iter_mut().find_map(|n| match n {
            Node::Decl(d) if d.prop == prop => Some(d),
            _ => None,
        })
    }

    /// First whitespace-separated token of the `--scope-hash` value.
    pub fn scope_hash(&self) -> Option<&str> {
        self.decls()
            .find(|d| d.prop == SCOPE_HASH_PROP)
            .and_then(|d| d.value.split_whitespace().next())
    }
}

impl AtRule {
    pub fn new(name: &str, params: &str, nodes: Vec<Node>) -> Self {
        Self {
            name: name.to_string(),
            params: params.to_string(),
            nodes,
            raws: Raws::fresh_rule(),
        }
    }

    pub fn is_keyframes(&self) -> bool {
        self.name == "keyframes" || self.name.ends_with("-keyframes")
    }

    pub fn is_media(&self) -> bool {
        self.name == "media"
    }
}

impl Node {
    pub fn as_rule(&self) -> Option<&Rule> {
        match self {
            Node::Rule(r) => Some(r),
            _ => None,
        }
    }
}

impl Root {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self {
            nodes,
            raws: Raws::default(),
        }
    }

    /// Visit every declaration in the tree, depth first.
    pub fn walk_decls_mut(&mut self, visit: &mut impl FnMut(&mut Decl)) {
        fn walk(nodes: &mut [Node], visit: &mut impl FnMut(&mut Decl)) {
            for node in nodes {
                match node {
                    Node::Decl(d) => visit(d),
                    Node::Rule(r) => walk(&mut r.nodes, visit),
                    Node::AtRule(a) => walk(&mut a.nodes, visit),
                    Node::Comment(_) => {}
                }
            }
        }
        walk(&mut self.nodes, visit);
    }
}
