//! # Scoped CSS Native
//!
//! Build-time scoping of component stylesheets.
//!
//! ## Pipeline
//!
//! 1. **Discovery**: every `*.css` file is a scope named after its file stem;
//!    templates are matched to scopes by class token or `<link>`.
//! 2. **Identity**: the allocator resolves `(scope name, index, hash)` against
//!    the persisted ledger. Indices are reused lowest-first; tombstones that
//!    still carry a hash can be resurrected by the same file.
//! 3. **Flattening**: each rule selector rooted at `.scope` collapses into a
//!    single flat class (`.card .title` → `.card-3_title`). Anything that
//!    cannot be flattened keeps its structure with the prefix renamed.
//! 4. **Anchoring**: the root rule carries
//!    `--scope-hash: <hash> <hashedName> <before> <after>` so an incremental
//!    build can find and replace the scope's rules inside an existing artifact.
//! 5. **Template rewrite**: the recorded `{ raw, flat }` pairs are matched
//!    against the element tree and the flat classes applied, stopping at
//!    nested scope roots and `scope-break` subtrees.
//!
//! ## Error Codes
//!
//! Every [`ScopeError`] carries a stable `SC-ERR-*` code. Hash collisions
//! inside one batch and ledger I/O failures are fatal; malformed CSS skips
//! the affected scope only.

#[cfg(feature = "napi")]
mod bridge;

pub mod allocator;
pub mod cache;
pub mod compile;
pub mod config;
pub mod css;
pub mod discovery;
pub mod dom;
pub mod error;
pub mod flatten;
pub mod ledger;
pub mod merge;
pub mod rewrite;
pub mod scope;
pub mod telemetry;
pub mod tokenizer;

#[cfg(test)]
mod pipeline_tests;

#[cfg(feature = "napi")]
pub use bridge::{compile_bridge, compile_scopes_native, flatten_selector_native, rewrite_template_native};

pub use allocator::{hashed_name, Allocator, AllocatorOptions, NameCollision};
pub use cache::{Artifact, ArtifactRegistry};
pub use compile::{compile_batch, compile_scope, merge_or_fresh, ArtifactWrite, BatchOutput, CompiledScope};
pub use config::ScopeConfig;
pub use css::{CssParser, JsonRootParser, Root};
pub use discovery::{discover_scopes, discover_templates, templates_for_scope, TemplateFile};
pub use dom::Document;
pub use error::ScopeError;
pub use flatten::{flatten, flatten_selector_list, FlatResult, FlattenOptions, SelectorRecord, SelectorsObj};
pub use ledger::{FileLedger, IdentityRecord, LedgerStore, MemoryLedger};
pub use merge::{merge, MergeOutcome};
pub use rewrite::{rewrite, RewriteOptions, RewriteReport};
pub use scope::{ScopeIdentity, ScopeSource};
pub use tokenizer::Combinator;
