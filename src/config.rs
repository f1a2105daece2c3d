//! Scope Configuration
//!
//! The flags consumed by the scoping core. Loading happens from a JSON file
//! (camelCase keys); per-path overrides are regex patterns matched against the
//! scope file path.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::warn;

use crate::error::ScopeError;
use crate::tokenizer::Combinator;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ScopeConfig {
    /// Name scopes `card-3` (numeric index) instead of `card-ab12cd` (hash).
    pub use_numbers: bool,
    /// The first allocated index keeps the bare scope name.
    pub dont_hash_first: bool,
    /// Only rename the scope prefix; never produce flattened classes.
    pub dont_flatten: bool,
    /// Combinators fused into one flat class instead of starting a segment.
    pub flatten_combis: Vec<Combinator>,
    #[serde(rename = "strictBEM")]
    pub strict_bem: bool,
    pub preserve_suffixes: bool,
    pub get_next_highest_num: bool,
    /// Replacement for internal dots of a flattened compound.
    pub separator: String,
    pub hash_length: usize,
    pub combinator_literals: BTreeMap<Combinator, String>,
    pub overrides: Vec<PathOverride>,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            use_numbers: true,
            dont_hash_first: false,
            dont_flatten: false,
            flatten_combis: Vec::new(),
            strict_bem: false,
            preserve_suffixes: false,
            get_next_highest_num: false,
            separator: "_".to_string(),
            hash_length: 6,
            combinator_literals: BTreeMap::new(),
            overrides: Vec::new(),
        }
    }
}

/// Partial config applied to scope files whose path matches `pattern`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathOverride {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub use_numbers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dont_hash_first: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dont_flatten: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flatten_combis: Option<Vec<Combinator>>,
    #[serde(default, rename = "strictBEM", skip_serializing_if = "Option::is_none")]
    pub strict_bem: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub separator: Option<String>,
}

impl ScopeConfig {
    pub fn load(path: &Path) -> Result<Self, ScopeError> {
        let text = fs::read_to_string(path).map_err(|err| ScopeError::Config {
            path: path.display().to_string(),
            message: format!("failed to read: {}", err),
        })?;
        Self::from_json(&text).map_err(|err| match err {
            ScopeError::Config { message, .. } => ScopeError::Config {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_json(text: &str) -> Result<Self, ScopeError> {
        let config: ScopeConfig = serde_json::from_str(text).map_err(|err| ScopeError::Config {
            path: "<inline>".to_string(),
            message: err.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ScopeError> {
        if self.hash_length == 0 || self.hash_length > 64 {
            return Err(ScopeError::Config {
                path: "<inline>".to_string(),
                message: format!("hashLength must be within 1..=64, got {}", self.hash_length),
            });
        }
        for rule in &self.overrides {
            if let Err(err) = Regex::new(&rule.pattern) {
                return Err(ScopeError::Config {
                    path: "<inline>".to_string(),
                    message: format!("override pattern '{}': {}", rule.pattern, err),
                });
            }
        }
        Ok(())
    }

    /// Effective config for one scope file, overrides applied in order.
    pub fn for_path(&self, file_path: &str) -> ScopeConfig {
        let mut resolved = self.clone();
        resolved.overrides = Vec::new();

        for rule in &self.overrides {
            let re = match Regex::new(&rule.pattern) {
                Ok(re) => re,
                Err(err) => {
                    warn!(pattern = %rule.pattern, %err, "skipping invalid override");
                    continue;
                }
            };
            if !re.is_match(file_path) {
                continue;
            }
            if let Some(v) = rule.use_numbers {
                resolved.use_numbers = v;
            }
            if let Some(v) = rule.dont_hash_first {
                resolved.dont_hash_first = v;
            }
            if let Some(v) = rule.dont_flatten {
                resolved.dont_flatten = v;
            }
            if let Some(v) = &rule.flatten_combis {
                resolved.flatten_combis = v.clone();
            }
            if let Some(v) = rule.strict_bem {
                resolved.strict_bem = v;
            }
            if let Some(v) = &rule.separator {
                resolved.separator = v.clone();
            }
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_when_empty() {
        let config = ScopeConfig::from_json("{}").unwrap();
        assert_eq!(config, ScopeConfig::default());
        assert!(config.use_numbers);
        assert_eq!(config.separator, "_");
    }

    #[test]
    fn test_camel_case_keys() {
        let config = ScopeConfig::from_json(
            r#"{
                "useNumbers": false,
                "dontHashFirst": true,
                "flattenCombis": [">", "+"],
                "strictBEM": true,
                "preserveSuffixes": true,
                "getNextHighestNum": true,
                "combinatorLiterals": { ">": "-child-" }
            }"#,
        )
        .unwrap();
        assert!(!config.use_numbers);
        assert!(config.dont_hash_first);
        assert_eq!(
            config.flatten_combis,
            vec![Combinator::Child, Combinator::Adjacent]
        );
        assert!(config.strict_bem);
        assert!(config.preserve_suffixes);
        assert!(config.get_next_highest_num);
        assert_eq!(
            config.combinator_literals.get(&Combinator::Child).map(String::as_str),
            Some("-child-")
        );
        assert!(!config.combinator_literals.contains_key(&Combinator::Adjacent));
    }

    #[test]
    fn test_path_overrides() {
        let config = ScopeConfig::from_json(
            r#"{
                "overrides": [
                    { "pattern": "^vendor/", "dontFlatten": true },
                    { "pattern": "legacy", "strictBEM": true, "separator": "-" }
                ]
            }"#,
        )
        .unwrap();

        let vendor = config.for_path("vendor/legacy/card.css");
        assert!(vendor.dont_flatten);
        assert!(vendor.strict_bem);
        assert_eq!(vendor.separator, "-");
        assert!(vendor.overrides.is_empty());

        let plain = config.for_path("src/card.css");
        assert!(!plain.dont_flatten);
        assert!(!plain.strict_bem);
    }

    #[test]
    fn test_invalid_override_pattern_rejected() {
        let err = ScopeConfig::from_json(r#"{ "overrides": [{ "pattern": "(" }] }"#).unwrap_err();
        assert_eq!(err.code(), crate::error::ERR_CONFIG);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "hashLength": 8 }}"#).unwrap();
        let config = ScopeConfig::load(file.path()).unwrap();
        assert_eq!(config.hash_length, 8);
    }

    #[test]
    fn test_load_reports_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = ScopeConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }
}
