use serde::{Deserialize, Serialize};
use std::path::Path;

/// One CSS source file and the identifier space derived from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeSource {
    /// File base name without extension (`card` for `src/ui/card.css`).
    pub scope_name: String,
    pub file_path: String,
    pub raw_css: String,
    /// Hash known from an earlier compile or a team artifact.
    #[serde(default)]
    pub hash: Option<String>,
    /// Index requested by the caller, honoured when still free.
    #[serde(default)]
    pub id: Option<u32>,
    /// Identity comes from the shared team repository.
    #[serde(default)]
    pub team: bool,
}

impl ScopeSource {
    pub fn new(file_path: &str, raw_css: &str) -> Self {
        Self {
            scope_name: scope_name_for(Path::new(file_path)),
            file_path: file_path.to_string(),
            raw_css: raw_css.to_string(),
            hash: None,
            id: None,
            team: false,
        }
    }

    pub fn with_hash(mut self, hash: &str) -> Self {
        self.hash = Some(hash.to_string());
        self
    }

    pub fn from_team(mut self) -> Self {
        self.team = true;
        self
    }
}

pub fn scope_name_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Identity resolved for a scope in the current build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScopeIdentity {
    pub scope_name: String,
    pub id: u32,
    pub hash: String,
    pub hashed_name: String,
    /// Took back an index whose tombstone carried the same hash.
    pub resurrected: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_name_is_file_stem() {
        let source = ScopeSource::new("src/components/card.css", ".card {}");
        assert_eq!(source.scope_name, "card");
        assert!(source.hash.is_none());
        assert!(!source.team);
    }

    #[test]
    fn test_builders() {
        let source = ScopeSource::new("card.css", "").with_hash("ab12cd").from_team();
        assert_eq!(source.hash.as_deref(), Some("ab12cd"));
        assert!(source.team);
    }
}
