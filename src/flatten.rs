//! Selector Segmenter & Flattener
//!
//! Turns one CSS selector into the BEM-like scoped form used by both the
//! compiled CSS and the template rewriter.
//!
//! ## Segmenting
//!
//! Tokens are greedily accumulated into segments:
//! - a combinator outside the flatten set starts a new segment and is fused
//!   with the token after it;
//! - a combinator inside the flatten set is absorbed into the current segment;
//! - a token carrying a pseudo-class closes the current segment.
//!
//! One segment yields [`FlatResult::Simple`]; several yield a
//! [`FlatResult::Chain`], whose `chain[i]` / `flat_chain[i]` pairs drive the
//! descendant walk in the template rewriter.

use lazy_static::lazy_static;
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use tracing::warn;

use crate::config::ScopeConfig;
use crate::css::{Node, Root};
use crate::tokenizer::{split_pseudo, split_selector_list, strip_pseudo, tokenize, Combinator, Token};

lazy_static! {
    /// One entry of an `animation` shorthand or `animation-name` list.
    static ref ANIMATION_TOKEN_RE: Regex = Regex::new(r"[^\s,]+").unwrap();
}

const BYPASS_PREFIXES: [&str; 3] = [":root", "body", "html"];
const GLOBAL_MARKER: &str = ":global";

// ═══════════════════════════════════════════════════════════════════════════════
// RESULT TYPES
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlatChain {
    /// Full rewritten CSS selector.
    pub flat: String,
    /// Un-hashed, pseudo-stripped selector per descendant depth.
    pub chain: Vec<String>,
    /// Class token spliced onto elements matched at each depth.
    pub flat_chain: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FlatResult {
    /// Rewritten CSS selector made of a single flattened compound.
    Simple(String),
    Chain(FlatChain),
    /// Left untouched (`:root`, `body`, `html`, `:global(...)`, malformed).
    Passthrough(String),
}

impl FlatResult {
    /// The selector written into the compiled CSS.
    pub fn selector(&self) -> &str {
        match self {
            FlatResult::Simple(s) | FlatResult::Passthrough(s) => s,
            FlatResult::Chain(c) => &c.flat,
        }
    }

    pub fn is_passthrough(&self) -> bool {
        matches!(self, FlatResult::Passthrough(_))
    }
}

/// `{ raw, flat }` pair consumed by the template rewriter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorRecord {
    pub raw: String,
    pub flat: FlatResult,
}

/// Output of flattening a full (possibly comma separated) rule selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlattenedSelector {
    pub selector: String,
    pub records: Vec<SelectorRecord>,
}

/// Every record produced for one scope, handed to the template rewriter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectorsObj {
    pub selectors: Vec<SelectorRecord>,
    pub scope_name: String,
    pub hashed_name: String,
    pub hash: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// OPTIONS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq)]
pub struct FlattenOptions {
    pub scope_name: String,
    pub hashed_name: String,
    pub flatten_combis: Vec<Combinator>,
    pub strict_bem: bool,
    pub dont_flatten: bool,
    pub separator: String,
    pub literals: BTreeMap<Combinator, String>,
}

impl FlattenOptions {
    pub fn new(scope_name: &str, hashed_name: &str) -> Self {
        Self {
            scope_name: scope_name.to_string(),
            hashed_name: hashed_name.to_string(),
            flatten_combis: Vec::new(),
            strict_bem: false,
            dont_flatten: false,
            separator: "_".to_string(),
            literals: BTreeMap::new(),
        }
    }

    pub fn from_config(config: &ScopeConfig, scope_name: &str, hashed_name: &str) -> Self {
        Self {
            scope_name: scope_name.to_string(),
            hashed_name: hashed_name.to_string(),
            flatten_combis: config.flatten_combis.clone(),
            strict_bem: config.strict_bem,
            dont_flatten: config.dont_flatten,
            separator: config.separator.clone(),
            literals: config.combinator_literals.clone(),
        }
    }

    pub fn scope_class(&self) -> String {
        format!(".{}", self.scope_name)
    }

    fn literal(&self, comb: Combinator) -> &str {
        self.literals
            .get(&comb)
            .map(|s| s.as_str())
            .unwrap_or_else(|| comb.default_literal())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPE PREFIX DETECTION
// ═══════════════════════════════════════════════════════════════════════════════

/// Does the scope class end at byte `end` of `text`? `.card` ends before
/// `__x`, `--x`, `_x`, `.x`, `:x`, whitespace or a combinator, but not before
/// `-list` (a different class).
pub(crate) fn is_scope_boundary(text: &str, end: usize) -> bool {
    let rest = &text[end..];
    match rest.chars().next() {
        None => true,
        Some('_') => true,
        Some('-') => rest.starts_with("--"),
        Some(c) => !(c.is_alphanumeric() || c == '\\'),
    }
}

pub(crate) fn starts_with_scope(selector: &str, scope_name: &str) -> bool {
    let class = format!(".{}", scope_name);
    selector.starts_with(&class) && is_scope_boundary(selector, class.len())
}

/// Replace every `.scope` class reference (with a proper boundary) by `.hashed`.
pub(crate) fn rename_scope_classes(text: &str, scope_name: &str, hashed_name: &str) -> String {
    let class = format!(".{}", scope_name);
    let mut out = String::with_capacity(text.len());
    let mut i = 0;
    while let Some(pos) = text[i..].find(&class) {
        let start = i + pos;
        let end = start + class.len();
        let escaped = start > 0 && text[..start].ends_with('\\');
        out.push_str(&text[i..start]);
        if !escaped && is_scope_boundary(text, end) {
            out.push('.');
            out.push_str(hashed_name);
        } else {
            out.push_str(&class);
        }
        i = end;
    }
    out.push_str(&text[i..]);
    out
}

/// Remove CSS escapes so the class can be compared with markup tokens.
pub(crate) fn css_unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn bypass(selector: &str) -> Option<String> {
    if let Some(rest) = selector.strip_prefix(GLOBAL_MARKER) {
        if let Some(inner) = rest.strip_prefix('(') {
            let mut depth = 1usize;
            for (i, c) in inner.char_indices() {
                match c {
                    '(' => depth += 1,
                    ')' => {
                        depth -= 1;
                        if depth == 0 {
                            let unwrapped = format!("{}{}", &inner[..i], &inner[i + 1..]);
                            return Some(unwrapped.trim().to_string());
                        }
                    }
                    _ => {}
                }
            }
            return None;
        }
        return Some(rest.trim().to_string());
    }

    for prefix in BYPASS_PREFIXES {
        if let Some(rest) = selector.strip_prefix(prefix) {
            let bounded = rest
                .chars()
                .next()
                .map_or(true, |c| !(c.is_alphanumeric() || c == '-' || c == '_'));
            if bounded {
                return Some(selector.to_string());
            }
        }
    }
    None
}

// ═══════════════════════════════════════════════════════════════════════════════
// SEGMENTING
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Segment {
    /// Combinator that opened this segment; `None` for the first one.
    pub lead: Option<Combinator>,
    /// Compound text, possibly with absorbed (flattened) combinators.
    pub body: String,
}

pub(crate) fn segment(tokens: &[Token], flatten_combis: &[Combinator]) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut body = String::new();
    let mut lead: Option<Combinator> = None;
    let mut pending: Vec<Combinator> = Vec::new();

    for token in tokens {
        // `*` is a compound of its own, led by whatever combinator precedes it.
        let token = match token {
            Token::Combinator(Combinator::Universal) => Cow::Owned(Token::Compound("*".to_string())),
            other => Cow::Borrowed(other),
        };
        match &*token {
            Token::Combinator(comb) => {
                if flatten_combis.contains(comb) && !body.is_empty() && pending.is_empty() {
                    match comb {
                        Combinator::Descendant => body.push(' '),
                        other => {
                            body.push(' ');
                            body.push_str(other.as_str());
                            body.push(' ');
                        }
                    }
                } else {
                    if !body.is_empty() {
                        segments.push(Segment {
                            lead: lead.take(),
                            body: std::mem::take(&mut body),
                        });
                    }
                    pending.push(*comb);
                }
            }
            Token::Compound(text) => {
                if body.is_empty() && !pending.is_empty() {
                    // The last pending combinator becomes the lead, anything
                    // before it is fused into the body.
                    let last = pending.pop();
                    let mut fused = text.clone();
                    for comb in pending.drain(..).rev() {
                        fused = comb.fuse(&fused);
                    }
                    lead = if segments.is_empty() && lead.is_none() && last == Some(Combinator::Descendant) {
                        None
                    } else {
                        last
                    };
                    body = fused;
                } else {
                    body.push_str(text);
                }
                if token.has_pseudo() {
                    segments.push(Segment {
                        lead: lead.take(),
                        body: std::mem::take(&mut body),
                    });
                }
            }
        }
    }

    if !pending.is_empty() && body.is_empty() {
        let trailing: String = pending.iter().map(|c| c.as_str()).collect();
        let trailing = trailing.trim().to_string();
        if !trailing.is_empty() {
            body = trailing;
        }
    }
    if !body.is_empty() {
        segments.push(Segment {
            lead: lead.take(),
            body,
        });
    }
    segments
}

// ═══════════════════════════════════════════════════════════════════════════════
// FLATTENING
// ═══════════════════════════════════════════════════════════════════════════════

/// Normalize one compound (`.card.active`, `div#x`) into a class-name fragment.
fn flat_compound(compound: &str, opts: &FlattenOptions) -> String {
    let renamed = rename_scope_classes(compound, &opts.scope_name, &opts.hashed_name);
    let trimmed = renamed.strip_prefix('.').unwrap_or(&renamed);

    let mut out = String::with_capacity(trimmed.len());
    let mut chars = trimmed.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                out.push(c);
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            }
            '.' | '#' => out.push_str(&opts.separator),
            '[' | ']' | '=' | '"' | '\'' | '^' | '$' | '*' | '|' | '~' => {}
            c if c.is_whitespace() => {}
            c => out.push(c),
        }
    }
    out
}

/// Flatten a segment body (compounds joined by absorbed combinators).
fn flat_body(body: &str, opts: &FlattenOptions) -> String {
    let tokens = match tokenize(body) {
        Ok(tokens) => tokens,
        Err(_) => return flat_compound(body, opts),
    };
    let mut out = String::new();
    for token in &tokens {
        match token {
            Token::Compound(text) => out.push_str(&flat_compound(text, opts)),
            Token::Combinator(comb) => out.push_str(opts.literal(*comb)),
        }
    }
    out
}

/// `a__b__c__d` -> `a__b-c-d`
fn apply_strict_bem(flat: &str) -> String {
    let parts: Vec<&str> = flat.split("__").collect();
    if parts.len() <= 2 {
        return flat.to_string();
    }
    format!("{}__{}-{}", parts[0], parts[1], parts[2..].join("-"))
}

fn finish(flat: String, opts: &FlattenOptions) -> String {
    if opts.strict_bem {
        apply_strict_bem(&flat)
    } else {
        flat
    }
}

/// Flatten a single selector (no top-level commas) against one scope identity.
pub fn flatten_with(selector: &str, opts: &FlattenOptions) -> FlatResult {
    let selector = selector.trim();
    if let Some(untouched) = bypass(selector) {
        return FlatResult::Passthrough(untouched);
    }

    let scoped = if starts_with_scope(selector, &opts.scope_name) {
        selector.to_string()
    } else {
        format!("{} {}", opts.scope_class(), selector)
    };

    let tokens = match tokenize(&scoped) {
        Ok(tokens) => tokens,
        Err(err) => {
            warn!(selector, scope = %opts.scope_name, %err, "passing malformed selector through");
            return FlatResult::Passthrough(selector.to_string());
        }
    };

    if opts.dont_flatten {
        return FlatResult::Simple(rename_scope_classes(
            &scoped,
            &opts.scope_name,
            &opts.hashed_name,
        ));
    }

    let segments = segment(&tokens, &opts.flatten_combis);

    if segments.len() == 1 {
        let (base, pseudo) = split_pseudo(&segments[0].body);
        let flat = finish(flat_body(&base, opts), opts);
        return FlatResult::Simple(format!(".{}{}", flat, pseudo));
    }

    let scope_class = opts.scope_class();
    let mut chain = Vec::with_capacity(segments.len());
    let mut flat_chain = Vec::with_capacity(segments.len());
    let mut flat = String::new();

    for (i, seg) in segments.iter().enumerate() {
        let (base, pseudo) = split_pseudo(&seg.body);
        let class = if i == 0 || starts_with_scope(&base, &opts.scope_name) {
            finish(flat_body(&base, opts), opts)
        } else {
            finish(
                format!("{}__{}", opts.hashed_name, flat_body(&base, opts)),
                opts,
            )
        };

        let stripped = strip_pseudo(&base);
        chain.push(match seg.lead {
            Some(comb) if i > 0 => comb.fuse(&stripped),
            _ => stripped,
        });

        match seg.lead {
            Some(Combinator::Descendant) | None if i > 0 => flat.push(' '),
            Some(comb) if i > 0 => {
                flat.push(' ');
                flat.push_str(comb.as_str());
                flat.push(' ');
            }
            _ => {}
        }
        flat.push('.');
        flat.push_str(&class);
        flat.push_str(&pseudo);

        flat_chain.push(class);
    }

    if chain.first().map(|c| c == &scope_class).unwrap_or(false) {
        chain.remove(0);
        flat_chain.remove(0);
    }

    FlatResult::Chain(FlatChain {
        flat,
        chain,
        flat_chain,
    })
}

/// `flatten(selector, scopeFileName, hashedName, combinatorFlattenSet, strictBEM)`
pub fn flatten(
    selector: &str,
    scope_file_name: &str,
    hashed_name: &str,
    flatten_combis: &[Combinator],
    strict_bem: bool,
) -> FlatResult {
    let mut opts = FlattenOptions::new(scope_file_name, hashed_name);
    opts.flatten_combis = flatten_combis.to_vec();
    opts.strict_bem = strict_bem;
    flatten_with(selector, &opts)
}

/// Flatten a full rule selector: branches are split on top-level commas,
/// flattened independently and rejoined with `, `.
pub fn flatten_selector_list(selector: &str, opts: &FlattenOptions) -> FlattenedSelector {
    let mut records = Vec::new();
    let mut branches = Vec::new();

    for branch in split_selector_list(selector) {
        let flat = flatten_with(&branch, opts);
        branches.push(flat.selector().to_string());
        if flat.is_passthrough() {
            continue;
        }
        let raw = if starts_with_scope(&branch, &opts.scope_name) {
            branch
        } else {
            format!("{} {}", opts.scope_class(), branch)
        };
        records.push(SelectorRecord { raw, flat });
    }

    FlattenedSelector {
        selector: branches.join(", "),
        records,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// KEYFRAMES
// ═══════════════════════════════════════════════════════════════════════════════

/// Rename every `@keyframes name` to `hashedName__name` and rewrite the
/// matching `animation` / `animation-name` values. Returns the renames.
pub fn scope_keyframes(root: &mut Root, hashed_name: &str) -> Vec<(String, String)> {
    fn collect(nodes: &mut [Node], hashed_name: &str, renames: &mut Vec<(String, String)>) {
        for node in nodes {
            if let Node::AtRule(at) = node {
                if at.is_keyframes() {
                    let name = at.params.trim().to_string();
                    let prefix = format!("{}__", hashed_name);
                    if !name.is_empty() && !name.starts_with(&prefix) {
                        let renamed = format!("{}{}", prefix, name);
                        at.params = renamed.clone();
                        renames.push((name, renamed));
                    }
                } else {
                    collect(&mut at.nodes, hashed_name, renames);
                }
            }
        }
    }

    let mut renames = Vec::new();
    collect(&mut root.nodes, hashed_name, &mut renames);
    if renames.is_empty() {
        return renames;
    }

    root.walk_decls_mut(&mut |decl| {
        let prop = decl.prop.to_ascii_lowercase();
        let is_animation = prop == "animation"
            || prop == "animation-name"
            || prop.ends_with("-animation")
            || prop.ends_with("-animation-name");
        if is_animation {
            decl.value = rename_animation_value(&decl.value, &renames);
        }
    });
    renames
}

/// Whole-word substitution: `spin` never touches `spin-fast`.
pub(crate) fn rename_animation_value(value: &str, renames: &[(String, String)]) -> String {
    ANIMATION_TOKEN_RE
        .replace_all(value, |caps: &Captures| {
            let word = &caps[0];
            renames
                .iter()
                .find(|(from, _)| from == word)
                .map(|(_, to)| to.clone())
                .unwrap_or_else(|| word.to_string())
        })
        .to_string()
}
