//! Identity Ledger
//!
//! Durable mapping from scope name to the ordered list of identity records
//! allocated for it. The allocator never touches storage directly; it goes
//! through a [`LedgerStore`] handed in by the caller.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::ScopeError;

/// Suffix marker left on a tombstoned hash-bearing record.
pub const DELETED_SUFFIX: &str = "deleted";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityRecord {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hash: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub team: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub global: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub empty: bool,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl IdentityRecord {
    pub fn numbered(id: u32, file_path: &str) -> Self {
        Self {
            id,
            file_path: Some(file_path.to_string()),
            ..Self::default()
        }
    }

    pub fn hashed(id: u32, hash: &str, file_path: &str) -> Self {
        Self {
            id,
            hash: vec![hash.to_string()],
            file_path: Some(file_path.to_string()),
            ..Self::default()
        }
    }

    pub fn tombstone(id: u32) -> Self {
        Self {
            id,
            empty: true,
            ..Self::default()
        }
    }

    pub fn is_live(&self) -> bool {
        !self.empty
    }

    /// Carries content-hash provenance.
    pub fn is_hash_protected(&self) -> bool {
        !self.hash.is_empty()
    }

    pub fn has_hash(&self, hash: &str) -> bool {
        self.hash.iter().any(|h| h == hash) || self.local_hash.as_deref() == Some(hash)
    }

    /// A tombstone that still remembers its hash, so the same hash can
    /// come back to the same index.
    pub fn is_resurrectable(&self) -> bool {
        self.empty && self.suffix.as_deref() == Some(DELETED_SUFFIX) && !self.hash.is_empty()
    }

    /// The hash written into compiled output for this record.
    pub fn primary_hash(&self) -> Option<&str> {
        self.hash
            .first()
            .map(|h| h.as_str())
            .or(self.local_hash.as_deref())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Key/value store over scope names.
pub trait LedgerStore {
    fn get(&self, scope_name: &str) -> Option<Vec<IdentityRecord>>;
    fn put(&mut self, scope_name: &str, records: Vec<IdentityRecord>);
    fn delete(&mut self, scope_name: &str);
    fn scope_names(&self) -> Vec<String>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryLedger {
    entries: BTreeMap<String, Vec<IdentityRecord>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LedgerStore for MemoryLedger {
    fn get(&self, scope_name: &str) -> Option<Vec<IdentityRecord>> {
        self.entries.get(scope_name).cloned()
    }

    fn put(&mut self, scope_name: &str, records: Vec<IdentityRecord>) {
        self.entries.insert(scope_name.to_string(), records);
    }

    fn delete(&mut self, scope_name: &str) {
        self.entries.remove(scope_name);
    }

    fn scope_names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }
}

/// JSON file on disk, loaded eagerly and written back by [`FileLedger::save`].
pub struct FileLedger {
    path: PathBuf,
    memory: MemoryLedger,
    dirty: bool,
}

impl FileLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, ScopeError> {
        let path = path.as_ref().to_path_buf();
        if !path.exists() {
            debug!(path = %path.display(), "starting empty ledger");
            return Ok(Self {
                path,
                memory: MemoryLedger::new(),
                dirty: false,
            });
        }

        let data = fs::read_to_string(&path).map_err(|source| ScopeError::LedgerIo {
            path: path.display().to_string(),
            source,
        })?;
        let memory: MemoryLedger = if data.trim().is_empty() {
            MemoryLedger::new()
        } else {
            serde_json::from_str(&data)?
        };

        Ok(Self {
            path,
            memory,
            dirty: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn save(&mut self) -> Result<(), ScopeError> {
        if !self.dirty {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|source| ScopeError::LedgerIo {
                    path: parent.display().to_string(),
                    source,
                })?;
            }
        }
        let data = serde_json::to_string_pretty(&self.memory)?;
        // The previous ledger stays on disk until the rename.
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, data).map_err(|source| ScopeError::LedgerIo {
            path: tmp.display().to_string(),
            source,
        })?;
        fs::rename(&tmp, &self.path).map_err(|source| ScopeError::LedgerIo {
            path: self.path.display().to_string(),
            source,
        })?;
        self.dirty = false;
        Ok(())
    }
}

impl LedgerStore for FileLedger {
    fn get(&self, scope_name: &str) -> Option<Vec<IdentityRecord>> {
        self.memory.get(scope_name)
    }

    fn put(&mut self, scope_name: &str, records: Vec<IdentityRecord>) {
        self.memory.put(scope_name, records);
        self.dirty = true;
    }

    fn delete(&mut self, scope_name: &str) {
        self.memory.delete(scope_name);
        self.dirty = true;
    }

    fn scope_names(&self) -> Vec<String> {
        self.memory.scope_names()
    }
}

impl Drop for FileLedger {
    fn drop(&mut self) {
        if self.dirty {
            warn!(path = %self.path.display(), "ledger dropped with unsaved changes");
        }
    }
}
