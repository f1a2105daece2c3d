//! Discovery Module
//!
//! Recursively scans a project for scope stylesheets (`*.css`) and for the
//! markup templates (`*.html`, `*.htm`) that reference them.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use crate::scope::ScopeSource;

lazy_static! {
    static ref CLASS_ATTR_RE: Regex = Regex::new(r#"class\s*=\s*["']([^"']*)["']"#).unwrap();
    static ref LINK_HREF_RE: Regex =
        Regex::new(r#"<link\b[^>]*\bhref\s*=\s*["']([^"']+)["']"#).unwrap();
}

const SCOPE_EXTENSIONS: [&str; 1] = ["css"];
const TEMPLATE_EXTENSIONS: [&str; 2] = ["html", "htm"];
const SKIPPED_DIRS: [&str; 3] = ["node_modules", "target", "dist"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateFile {
    /// Path relative to the discovery root, `/` separated.
    pub path: String,
    pub source: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// WALKING
// ═══════════════════════════════════════════════════════════════════════════════

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

/// Files under `dir` with one of `extensions`, sorted by path.
fn find_files(dir: &Path, extensions: &[&str]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .map_or(false, |ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        })
        .collect();
    files.sort();
    files
}

fn relative_path(base: &Path, path: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_all(base_dir: &Path, extensions: &[&str]) -> Vec<(String, String)> {
    if !base_dir.exists() {
        return Vec::new();
    }
    find_files(base_dir, extensions)
        .into_iter()
        .filter_map(|path| match fs::read_to_string(&path) {
            Ok(source) => Some((relative_path(base_dir, &path), source)),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read file");
                None
            }
        })
        .collect()
}

// ═══════════════════════════════════════════════════════════════════════════════
// DISCOVERY
// ═══════════════════════════════════════════════════════════════════════════════

/// Every stylesheet under `base_dir` as a scope source.
pub fn discover_scopes(base_dir: &Path) -> Vec<ScopeSource> {
    read_all(base_dir, &SCOPE_EXTENSIONS)
        .into_iter()
        .map(|(path, source)| ScopeSource::new(&path, &source))
        .collect()
}

pub fn discover_templates(base_dir: &Path) -> Vec<TemplateFile> {
    read_all(base_dir, &TEMPLATE_EXTENSIONS)
        .into_iter()
        .map(|(path, source)| TemplateFile { path, source })
        .collect()
}

/// Templates that use `scope`: a class token equal to the scope name, or a
/// `<link>` to a stylesheet with the scope's file name.
pub fn templates_for_scope<'a>(templates: &'a [TemplateFile], scope: &ScopeSource) -> Vec<&'a TemplateFile> {
    let file_name = Path::new(&scope.file_path).file_name();
    templates
        .iter()
        .filter(|template| {
            let uses_class = CLASS_ATTR_RE.captures_iter(&template.source).any(|caps| {
                caps[1].split_whitespace().any(|token| token == scope.scope_name)
            });
            uses_class
                || LINK_HREF_RE
                    .captures_iter(&template.source)
                    .any(|caps| file_name.is_some() && Path::new(&caps[1]).file_name() == file_name)
        })
        .collect()
}
