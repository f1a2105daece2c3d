//! Native Bridge
//!
//! JSON-in, JSON-out entry points for the Node host. Every function takes
//! strings and returns a serialized result; errors surface as
//! `[CODE] message` reasons.

use napi_derive::napi;
use serde::Deserialize;
use serde_json::json;
use std::path::Path;

use crate::allocator::{Allocator, AllocatorOptions};
use crate::cache::ArtifactRegistry;
use crate::compile::{compile_batch, merge_or_fresh, ArtifactWrite};
use crate::config::ScopeConfig;
use crate::css::JsonRootParser;
use crate::dom::Document;
use crate::error::ScopeError;
use crate::flatten::{flatten_selector_list, FlattenOptions, SelectorsObj};
use crate::ledger::FileLedger;
use crate::rewrite::{rewrite, RewriteOptions};
use crate::scope::ScopeSource;
use crate::telemetry;

fn to_napi(err: ScopeError) -> napi::Error {
    napi::Error::from_reason(format!("[{}] {}", err.code(), err))
}

fn config_from(config_json: Option<String>) -> napi::Result<ScopeConfig> {
    match config_json {
        Some(text) if !text.trim().is_empty() => ScopeConfig::from_json(&text).map_err(to_napi),
        _ => Ok(ScopeConfig::default()),
    }
}

#[napi]
pub fn compile_bridge() -> String {
    "Scoped CSS Native Bridge Connected".to_string()
}

#[napi]
pub fn flatten_selector_native(
    selector: String,
    scope_name: String,
    hashed_name: String,
    config_json: Option<String>,
) -> napi::Result<String> {
    let config = config_from(config_json)?;
    let opts = FlattenOptions::from_config(&config, &scope_name, &hashed_name);
    let flattened = flatten_selector_list(&selector, &opts);
    let out = json!({
        "selector": flattened.selector,
        "records": flattened.records,
    });
    Ok(out.to_string())
}

#[napi]
pub fn rewrite_template_native(
    html: String,
    file_path: String,
    selectors_json: String,
    discriminator: Option<String>,
    stamp_hash: Option<bool>,
    config_json: Option<String>,
) -> napi::Result<String> {
    let selectors: SelectorsObj = serde_json::from_str(&selectors_json)
        .map_err(|e| napi::Error::from_reason(format!("Selectors parse error: {}", e)))?;
    let config = config_from(config_json)?.for_path(&file_path);

    let mut doc = Document::parse(&html, &file_path);
    let options = RewriteOptions {
        discriminator,
        stamp_hash: stamp_hash.unwrap_or(false),
        dont_flatten: config.dont_flatten,
    };
    let report = rewrite(&mut doc, &selectors, &options);

    let out = json!({
        "report": report,
        "nodes": doc.to_json(),
    });
    Ok(out.to_string())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CompileRequest {
    /// `rawCss` of each source is the host-parsed root as JSON.
    sources: Vec<ScopeSource>,
    ledger_path: String,
    #[serde(default)]
    registry_path: Option<String>,
    /// Old hash per scope file, for merging into existing artifacts.
    #[serde(default)]
    previous_hashes: std::collections::HashMap<String, String>,
    #[serde(default)]
    config: Option<ScopeConfig>,
}

#[napi]
pub fn compile_scopes_native(request_json: String) -> napi::Result<String> {
    telemetry::init(0);
    let request: CompileRequest = serde_json::from_str(&request_json)
        .map_err(|e| napi::Error::from_reason(format!("Request parse error: {}", e)))?;
    let config = request.config.unwrap_or_default();

    let mut ledger = FileLedger::open(&request.ledger_path).map_err(to_napi)?;
    let mut allocator = Allocator::new(AllocatorOptions::from(&config));
    let output = compile_batch(&request.sources, &JsonRootParser, &mut allocator, &mut ledger, &config)
        .map_err(to_napi)?;
    ledger.save().map_err(to_napi)?;

    let mut writes = Vec::new();
    if let Some(registry_path) = &request.registry_path {
        let path = Path::new(registry_path);
        let mut registry = ArtifactRegistry::load(path).map_err(to_napi)?;
        for compiled in &output.compiled {
            let old_hash = request.previous_hashes.get(&compiled.file_path).map(|h| h.as_str());
            let output_path = format!("{}.css", compiled.identity.hashed_name);
            let write = merge_or_fresh(&mut registry, compiled, old_hash, &output_path).map_err(to_napi)?;
            writes.push(json!({
                "filePath": compiled.file_path,
                "merged": matches!(write, ArtifactWrite::Merged(_)),
            }));
        }
        registry.save(path).map_err(to_napi)?;
    }

    let out = json!({
        "compiled": output.compiled,
        "skipped": output.skipped,
        "collisions": output.collisions,
        "writes": writes,
    });
    Ok(out.to_string())
}
