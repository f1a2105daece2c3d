use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use crate::css::{Node, Root};
use crate::error::ScopeError;
use crate::merge::{merge, MergeOutcome};

pub fn content_digest(source: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// A compiled rule subtree and where it is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Artifact {
    pub root: Root,
    pub relative_output_path: String,
    /// Digest of the serialized root at the last write.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digest: Option<String>,
}

impl Artifact {
    pub fn new(root: Root, relative_output_path: &str) -> Self {
        let mut artifact = Self {
            root,
            relative_output_path: relative_output_path.to_string(),
            digest: None,
        };
        artifact.refresh_digest();
        artifact
    }

    pub fn refresh_digest(&mut self) {
        self.digest = serde_json::to_string(&self.root)
            .ok()
            .map(|json| content_digest(&json));
    }
}

/// Content hash -> compiled artifact. The merger looks anchors up here.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRegistry {
    artifacts: BTreeMap<String, Artifact>,
}

impl ArtifactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self, ScopeError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let data = fs::read_to_string(path).map_err(|source| ScopeError::ArtifactIo {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ScopeError::ArtifactJson {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ScopeError> {
        let data = serde_json::to_string_pretty(self).map_err(|source| ScopeError::ArtifactJson {
            path: path.display().to_string(),
            source,
        })?;
        fs::write(path, data).map_err(|source| ScopeError::ArtifactIo {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn insert(&mut self, hash: &str, artifact: Artifact) -> Option<Artifact> {
        self.artifacts.insert(hash.to_string(), artifact)
    }

    pub fn get(&self, hash: &str) -> Option<&Artifact> {
        self.artifacts.get(hash)
    }

    pub fn remove(&mut self, hash: &str) -> Option<Artifact> {
        self.artifacts.remove(hash)
    }

    pub fn contains(&self, hash: &str) -> bool {
        self.artifacts.contains_key(hash)
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn hashes(&self) -> impl Iterator<Item = &str> {
        self.artifacts.keys().map(|k| k.as_str())
    }

    /// Merge `new_rules` into the artifact stored under `old_hash` and re-key
    /// it under `new_hash`. The registry is unchanged on error.
    pub fn apply_merge(
        &mut self,
        old_hash: &str,
        new_hash: &str,
        new_rules: Vec<Node>,
        target_class: &str,
    ) -> Result<MergeOutcome, ScopeError> {
        let mut artifact = self
            .artifacts
            .remove(old_hash)
            .ok_or_else(|| ScopeError::MergeAnchorNotFound {
                hash: old_hash.to_string(),
            })?;

        match merge(&mut artifact.root, new_rules, old_hash, new_hash, target_class) {
            Ok(outcome) => {
                artifact.refresh_digest();
                if old_hash != new_hash {
                    debug!(old_hash, new_hash, "re-keyed compiled artifact");
                }
                if let Some(previous) = self.artifacts.insert(new_hash.to_string(), artifact) {
                    warn!(
                        new_hash,
                        path = %previous.relative_output_path,
                        "replaced artifact already registered under hash"
                    );
                }
                Ok(outcome)
            }
            Err(err) => {
                self.artifacts.insert(old_hash.to_string(), artifact);
                Err(err)
            }
        }
    }
}
