//! Selector Tokenizer
//!
//! Splits one selector (no top-level commas) into compound tokens and
//! combinator tokens. Written as an explicit state machine so that
//! pseudo-class arguments (`:not(.a .b)`), attribute brackets
//! (`[title="a > b"]`) and escaped characters (`.md\:flex`) survive intact.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ScopeError;

// ═══════════════════════════════════════════════════════════════════════════════
// TOKENS
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Combinator {
    #[serde(rename = " ")]
    Descendant,
    #[serde(rename = ">")]
    Child,
    #[serde(rename = "+")]
    Adjacent,
    #[serde(rename = "~")]
    Sibling,
    #[serde(rename = "|")]
    Namespace,
    #[serde(rename = "*")]
    Universal,
}

impl Combinator {
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '>' => Some(Self::Child),
            '+' => Some(Self::Adjacent),
            '~' => Some(Self::Sibling),
            '|' => Some(Self::Namespace),
            '*' => Some(Self::Universal),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Descendant => " ",
            Self::Child => ">",
            Self::Adjacent => "+",
            Self::Sibling => "~",
            Self::Namespace => "|",
            Self::Universal => "*",
        }
    }

    /// Reserved literal that replaces the combinator inside a flattened class.
    pub fn default_literal(&self) -> &'static str {
        match self {
            Self::Descendant => "__",
            Self::Child => "_gt_",
            Self::Adjacent => "_plus_",
            Self::Sibling => "_sib_",
            Self::Namespace => "_ns_",
            Self::Universal => "_all_",
        }
    }

    /// How the combinator is written when fused in front of the next token.
    pub(crate) fn fuse(&self, next: &str) -> String {
        match self {
            Self::Descendant => next.to_string(),
            Self::Namespace | Self::Universal => format!("{}{}", self.as_str(), next),
            _ => format!("{} {}", self.as_str(), next),
        }
    }
}

impl fmt::Display for Combinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Compound(String),
    Combinator(Combinator),
}

impl Token {
    pub fn has_pseudo(&self) -> bool {
        match self {
            Token::Compound(text) => has_pseudo(text),
            Token::Combinator(_) => false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STATE MACHINE
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    InSegment,
    InPseudoArgs { depth: usize },
    InBrackets,
    InString { quote: char, resume: Resume },
    AfterCombinator,
}

/// Where a quoted string returns to once it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resume {
    PseudoArgs(usize),
    Brackets,
}

struct Tokenizer<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    current: String,
    state: State,
    pending_whitespace: bool,
}

impl<'a> Tokenizer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            tokens: Vec::new(),
            current: String::new(),
            state: State::InSegment,
            pending_whitespace: false,
        }
    }

    fn error(&self, reason: &str) -> ScopeError {
        ScopeError::MalformedSelector {
            selector: self.source.to_string(),
            reason: reason.to_string(),
        }
    }

    fn flush_compound(&mut self) {
        if !self.current.is_empty() {
            let text = std::mem::take(&mut self.current);
            self.tokens.push(Token::Compound(text));
        }
    }

    /// Called before a character that belongs to a compound.
    fn begin_compound_char(&mut self) {
        if self.pending_whitespace && self.current.is_empty() {
            if let Some(Token::Compound(_) | Token::Combinator(Combinator::Universal)) = self.tokens.last() {
                self.tokens.push(Token::Combinator(Combinator::Descendant));
            }
        }
        self.pending_whitespace = false;
    }

    fn run(mut self) -> Result<Vec<Token>, ScopeError> {
        let mut chars = self.source.chars().peekable();

        while let Some(c) = chars.next() {
            // Escapes are copied verbatim in every state.
            if c == '\\' {
                if matches!(self.state, State::InSegment | State::AfterCombinator) {
                    self.begin_compound_char();
                    self.state = State::InSegment;
                }
                self.current.push(c);
                match chars.next() {
                    Some(escaped) => self.current.push(escaped),
                    None => return Err(self.error("dangling escape")),
                }
                continue;
            }

            match self.state {
                State::InSegment | State::AfterCombinator => {
                    if c.is_whitespace() {
                        self.flush_compound();
                        if self.state == State::InSegment {
                            self.pending_whitespace = true;
                        }
                        continue;
                    }
                    if c == '*' {
                        // `*` stands where a compound would, so whitespace around it still
                        // means descendant.
                        self.flush_compound();
                        self.begin_compound_char();
                        self.tokens.push(Token::Combinator(Combinator::Universal));
                        self.state = State::InSegment;
                        continue;
                    }
                    if let Some(comb) = Combinator::from_char(c) {
                        self.flush_compound();
                        self.pending_whitespace = false;
                        self.tokens.push(Token::Combinator(comb));
                        self.state = State::AfterCombinator;
                        continue;
                    }
                    if c == ')' || c == ']' {
                        return Err(self.error(&format!("unexpected '{}'", c)));
                    }
                    self.begin_compound_char();
                    self.state = State::InSegment;
                    self.current.push(c);
                    match c {
                        '(' => self.state = State::InPseudoArgs { depth: 1 },
                        '[' => self.state = State::InBrackets,
                        '"' | '\'' => return Err(self.error("string outside of brackets")),
                        _ => {}
                    }
                }
                State::InPseudoArgs { depth } => {
                    self.current.push(c);
                    match c {
                        '(' => self.state = State::InPseudoArgs { depth: depth + 1 },
                        ')' if depth == 1 => self.state = State::InSegment,
                        ')' => self.state = State::InPseudoArgs { depth: depth - 1 },
                        '"' | '\'' => {
                            self.state = State::InString {
                                quote: c,
                                resume: Resume::PseudoArgs(depth),
                            }
                        }
                        _ => {}
                    }
                }
                State::InBrackets => {
                    self.current.push(c);
                    match c {
                        ']' => self.state = State::InSegment,
                        '"' | '\'' => {
                            self.state = State::InString {
                                quote: c,
                                resume: Resume::Brackets,
                            }
                        }
                        _ => {}
                    }
                }
                State::InString { quote, resume } => {
                    self.current.push(c);
                    if c == quote {
                        self.state = match resume {
                            Resume::PseudoArgs(depth) => State::InPseudoArgs { depth },
                            Resume::Brackets => State::InBrackets,
                        };
                    }
                }
            }
        }

        match self.state {
            State::InPseudoArgs { .. } => return Err(self.error("unclosed '('")),
            State::InBrackets => return Err(self.error("unclosed '['")),
            State::InString { .. } => return Err(self.error("unterminated string")),
            State::InSegment | State::AfterCombinator => {}
        }
        self.flush_compound();
        Ok(self.tokens)
    }
}

/// Tokenize a single selector.
pub fn tokenize(selector: &str) -> Result<Vec<Token>, ScopeError> {
    Tokenizer::new(selector).run()
}

// ═══════════════════════════════════════════════════════════════════════════════
// SCANNING HELPERS
// ═══════════════════════════════════════════════════════════════════════════════

/// Walk `text` and call `visit(index, char, top_level)` for every character,
/// where `top_level` means outside brackets, parentheses, strings and escapes.
fn scan_top_level(text: &str, mut visit: impl FnMut(usize, char, bool)) {
    let mut depth = 0usize;
    let mut in_brackets = false;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if escaped {
            escaped = false;
            visit(i, c, false);
            continue;
        }
        if c == '\\' {
            escaped = true;
            visit(i, c, false);
            continue;
        }
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            visit(i, c, false);
            continue;
        }
        let top = depth == 0 && !in_brackets;
        visit(i, c, top);
        match c {
            '"' | '\'' if in_brackets || depth > 0 => quote = Some(c),
            '[' if depth == 0 => in_brackets = true,
            ']' if depth == 0 => in_brackets = false,
            '(' => depth += 1,
            ')' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
}

/// Split a selector list on top-level commas.
pub fn split_selector_list(selector: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut start = 0;
    scan_top_level(selector, |i, c, top| {
        if top && c == ',' {
            parts.push(selector[start..i].trim().to_string());
            start = i + 1;
        }
    });
    parts.push(selector[start..].trim().to_string());
    parts.into_iter().filter(|p| !p.is_empty()).collect()
}

/// True when the text contains an unescaped, top-level `:`.
pub fn has_pseudo(text: &str) -> bool {
    let mut found = false;
    scan_top_level(text, |_, c, top| {
        if top && c == ':' {
            found = true;
        }
    });
    found
}

/// Separate the pseudo-class/element parts of a compound from the rest.
/// `.a:hover.b::before` -> (`.a.b`, `:hover::before`)
pub fn split_pseudo(compound: &str) -> (String, String) {
    let mut base = String::new();
    let mut pseudo = String::new();
    let mut in_pseudo = false;

    scan_top_level(compound, |_, c, top| {
        if top && c == ':' {
            in_pseudo = true;
        } else if in_pseudo && top && (c == '.' || c == '#' || c == '[') {
            in_pseudo = false;
        }
        if in_pseudo {
            pseudo.push(c);
        } else {
            base.push(c);
        }
    });

    (base, pseudo)
}

fn push_separator(out: &mut String, pending: Option<Combinator>) {
    match pending {
        Some(Combinator::Descendant) | None if !out.is_empty() => out.push(' '),
        Some(Combinator::Descendant) | None => {}
        Some(Combinator::Namespace) => out.push('|'),
        Some(comb) => {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(comb.as_str());
            out.push(' ');
        }
    }
}

/// Remove every pseudo-class/element from a (possibly complex) selector.
pub fn strip_pseudo(selector: &str) -> String {
    let Ok(tokens) = tokenize(selector) else {
        return selector.to_string();
    };
    let mut out = String::new();
    let mut pending: Option<Combinator> = None;
    // Previous token was `*` with nothing in between: `*.x`, `*:hover`.
    let mut after_universal = false;
    for token in tokens {
        match token {
            Token::Combinator(Combinator::Universal) => {
                push_separator(&mut out, pending.take());
                out.push('*');
                after_universal = true;
            }
            Token::Combinator(comb) => {
                pending = Some(comb);
                after_universal = false;
            }
            Token::Compound(text) => {
                let (base, _) = split_pseudo(&text);
                if after_universal && pending.is_none() {
                    out.push_str(&base);
                } else {
                    push_separator(&mut out, pending.take());
                    out.push_str(if base.is_empty() { "*" } else { &base });
                }
                after_universal = false;
            }
        }
    }
    if let Some(comb) = pending {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(comb.as_str());
    }
    out.trim().to_string()
}
