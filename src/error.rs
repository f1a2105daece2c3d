use thiserror::Error;

// ═══════════════════════════════════════════════════════════════════════════════
// ERROR CODES
// ═══════════════════════════════════════════════════════════════════════════════

pub const ERR_HASH_COLLISION: &str = "SC-ERR-COLLISION-001";
pub const ERR_MERGE_ANCHOR: &str = "SC-ERR-MERGE-001";
pub const ERR_SELECTOR: &str = "SC-ERR-SELECTOR-001";
pub const ERR_CSS_PARSE: &str = "SC-ERR-CSS-001";
pub const ERR_CONFIG: &str = "SC-ERR-CONFIG-001";
pub const ERR_LEDGER: &str = "SC-ERR-LEDGER-001";
pub const ERR_ARTIFACT: &str = "SC-ERR-ARTIFACT-001";

// ═══════════════════════════════════════════════════════════════════════════════
// SCOPE ERROR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Error)]
pub enum ScopeError {
    /// Two files with the same scope name claimed the same hash in one batch.
    #[error("hash '{hash}' for scope '{scope_name}' is claimed by both {file_path} and {other_path}")]
    HashCollision {
        scope_name: String,
        hash: String,
        file_path: String,
        other_path: String,
    },

    #[error("no compiled rule carries --scope-hash '{hash}'")]
    MergeAnchorNotFound { hash: String },

    #[error("malformed selector '{selector}': {reason}")]
    MalformedSelector { selector: String, reason: String },

    #[error("failed to parse CSS in {file_path}: {message}")]
    CssParse { file_path: String, message: String },

    #[error("invalid config {path}: {message}")]
    Config { path: String, message: String },

    #[error("ledger I/O failed for {path}: {source}")]
    LedgerIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ledger JSON is invalid: {0}")]
    LedgerJson(#[from] serde_json::Error),

    #[error("artifact registry I/O failed for {path}: {source}")]
    ArtifactIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("artifact registry {path} is invalid: {source}")]
    ArtifactJson {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ScopeError {
    /// Stable diagnostic code, reported next to the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::HashCollision { .. } => ERR_HASH_COLLISION,
            Self::MergeAnchorNotFound { .. } => ERR_MERGE_ANCHOR,
            Self::MalformedSelector { .. } => ERR_SELECTOR,
            Self::CssParse { .. } => ERR_CSS_PARSE,
            Self::Config { .. } => ERR_CONFIG,
            Self::LedgerIo { .. } | Self::LedgerJson(_) => ERR_LEDGER,
            Self::ArtifactIo { .. } | Self::ArtifactJson { .. } => ERR_ARTIFACT,
        }
    }

    /// Whether the surrounding build step has to abort.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::HashCollision { .. } | Self::LedgerIo { .. } | Self::LedgerJson(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collision_message_names_both_files() {
        let err = ScopeError::HashCollision {
            scope_name: "card".to_string(),
            hash: "ab12cd".to_string(),
            file_path: "a/card.css".to_string(),
            other_path: "b/card.css".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("card"));
        assert!(msg.contains("a/card.css"));
        assert!(msg.contains("b/card.css"));
        assert_eq!(err.code(), ERR_HASH_COLLISION);
        assert!(err.is_fatal());
    }

    #[test]
    fn test_recoverable_errors() {
        let err = ScopeError::MergeAnchorNotFound {
            hash: "ff00ff".to_string(),
        };
        assert!(!err.is_fatal());
        assert_eq!(err.code(), ERR_MERGE_ANCHOR);
    }
}
