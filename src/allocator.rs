//! Scope Identity Allocator
//!
//! Hands out the numeric index and hash that make a scope name unique, and
//! keeps them stable across rebuilds, deletions and team merges.
//!
//! ## Invariants
//!
//! 1. **One live record per index**: a scope's record list never holds two
//!    live records with the same `id`.
//! 2. **Tombstones are not silently reused**: an index tombstoned during the
//!    current batch, or a tombstone that still remembers its hash, is never
//!    returned by [`Allocator::free_index`].
//! 3. **Single writer**: every mutating call takes `&mut` on both the
//!    allocator and the store; callers serialize allocation.

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::config::ScopeConfig;
use crate::error::ScopeError;
use crate::ledger::{IdentityRecord, LedgerStore, DELETED_SUFFIX};
use crate::scope::{ScopeIdentity, ScopeSource};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorOptions {
    /// `getNextHighestNum`: never fill gaps, always go one past the highest.
    pub always_increasing: bool,
    pub preserve_suffixes: bool,
    pub hash_length: usize,
}

impl Default for AllocatorOptions {
    fn default() -> Self {
        Self {
            always_increasing: false,
            preserve_suffixes: false,
            hash_length: 6,
        }
    }
}

impl From<&ScopeConfig> for AllocatorOptions {
    fn from(config: &ScopeConfig) -> Self {
        Self {
            always_increasing: config.get_next_highest_num,
            preserve_suffixes: config.preserve_suffixes,
            hash_length: config.hash_length,
        }
    }
}

/// Recoverable collision flagged for the external resolution step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NameCollision {
    pub scope_name: String,
    pub id: u32,
    pub existing_hashes: Vec<String>,
    pub incoming_hashes: Vec<String>,
    pub file_path: Option<String>,
    pub team: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub accepted: bool,
    pub record: IdentityRecord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LookupKey<'a> {
    FilePath(&'a str),
    Hash(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decision {
    Overwrite,
    Update,
    Accumulate,
    Reject,
}

// ═══════════════════════════════════════════════════════════════════════════════
// ALLOCATOR
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Default)]
pub struct Allocator {
    options: AllocatorOptions,
    collisions: Vec<NameCollision>,
    /// (scope name, hash) -> file that claimed it in this batch.
    batch_claims: HashMap<(String, String), String>,
    /// Indices tombstoned in this batch.
    in_flight: HashSet<(String, u32)>,
}

impl Allocator {
    pub fn new(options: AllocatorOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    /// Start a new build batch: same-batch claims and in-flight tombstones reset.
    pub fn begin_batch(&mut self) {
        self.batch_claims.clear();
        self.in_flight.clear();
    }

    pub fn collisions(&self) -> &[NameCollision] {
        &self.collisions
    }

    pub fn take_collisions(&mut self) -> Vec<NameCollision> {
        std::mem::take(&mut self.collisions)
    }

    pub fn lookup(
        &self,
        store: &dyn LedgerStore,
        scope_name: &str,
        key: LookupKey<'_>,
    ) -> Option<IdentityRecord> {
        store
            .get(scope_name)?
            .into_iter()
            .filter(|r| r.is_live())
            .find(|r| match key {
                LookupKey::FilePath(path) => r.file_path.as_deref() == Some(path),
                LookupKey::Hash(hash) => r.has_hash(hash),
            })
    }

    fn lookup_tombstone(
        &self,
        store: &dyn LedgerStore,
        scope_name: &str,
        hash: &str,
    ) -> Option<IdentityRecord> {
        store
            .get(scope_name)?
            .into_iter()
            .find(|r| r.is_resurrectable() && r.has_hash(hash))
    }

    fn is_reserved(&self, scope_name: &str, record: &IdentityRecord) -> bool {
        record.is_live()
            || record.is_resurrectable()
            || self
                .in_flight
                .contains(&(scope_name.to_string(), record.id))
    }

    pub fn free_index(&self, store: &dyn LedgerStore, scope_name: &str) -> u32 {
        let records = store.get(scope_name).unwrap_or_default();
        let taken: HashSet<u32> = records
            .iter()
            .filter(|r| self.is_reserved(scope_name, r))
            .map(|r| r.id)
            .collect();

        if self.options.always_increasing {
            return taken.iter().max().map_or(1, |max| max + 1);
        }

        let mut candidate = 1;
        while taken.contains(&candidate) {
            candidate += 1;
        }
        candidate
    }

    fn decide(&self, existing: &IdentityRecord, candidate: &IdentityRecord) -> Decision {
        if existing.empty {
            return Decision::Overwrite;
        }

        let shares_hash = candidate.hash.iter().any(|h| existing.has_hash(h))
            || candidate
                .local_hash
                .as_deref()
                .map_or(false, |h| existing.has_hash(h));
        let same_file = candidate.file_path.is_some() && existing.file_path == candidate.file_path;
        let hashes_compatible =
            candidate.hash.is_empty() || existing.hash.is_empty() || shares_hash;
        if shares_hash || (same_file && hashes_compatible) {
            return Decision::Update;
        }

        if candidate.team {
            if !existing.is_hash_protected() {
                return Decision::Overwrite;
            }
            // Team identities win unless suffix preservation protects the local one.
            return if self.options.preserve_suffixes {
                Decision::Accumulate
            } else {
                Decision::Overwrite
            };
        }

        if candidate.is_hash_protected() {
            if !existing.is_hash_protected() && !existing.team {
                return Decision::Overwrite;
            }
            return if self.options.preserve_suffixes {
                Decision::Accumulate
            } else {
                Decision::Reject
            };
        }

        Decision::Reject
    }

    fn check_batch_claims(
        &self,
        scope_name: &str,
        candidate: &IdentityRecord,
    ) -> Result<(), ScopeError> {
        let Some(file_path) = candidate.file_path.as_deref() else {
            return Ok(());
        };
        for hash in candidate.hash.iter().chain(candidate.local_hash.iter()) {
            let key = (scope_name.to_string(), hash.clone());
            if let Some(other) = self.batch_claims.get(&key) {
                if other != file_path {
                    return Err(ScopeError::HashCollision {
                        scope_name: scope_name.to_string(),
                        hash: hash.clone(),
                        file_path: file_path.to_string(),
                        other_path: other.clone(),
                    });
                }
            }
        }
        Ok(())
    }

    fn record_batch_claims(&mut self, scope_name: &str, record: &IdentityRecord) {
        let Some(file_path) = record.file_path.as_deref() else {
            return;
        };
        for hash in record.hash.iter().chain(record.local_hash.iter()) {
            self.batch_claims
                .insert((scope_name.to_string(), hash.clone()), file_path.to_string());
        }
    }

    /// Offer `candidate` for its index. Rejection leaves the ledger untouched
    /// and returns the record that keeps the slot.
    pub fn allocate(
        &mut self,
        store: &mut dyn LedgerStore,
        scope_name: &str,
        candidate: IdentityRecord,
    ) -> Result<Allocation, ScopeError> {
        self.check_batch_claims(scope_name, &candidate)?;

        let mut records = store.get(scope_name).unwrap_or_default();
        let Some(pos) = records.iter().position(|r| r.id == candidate.id) else {
            debug!(scope = scope_name, id = candidate.id, "allocating fresh index");
            self.record_batch_claims(scope_name, &candidate);
            records.push(candidate.clone());
            store.put(scope_name, records);
            return Ok(Allocation {
                accepted: true,
                record: candidate,
            });
        };

        let decision = self.decide(&records[pos], &candidate);
        let record = match decision {
            Decision::Reject => {
                debug!(scope = scope_name, id = candidate.id, "keeping existing identity");
                return Ok(Allocation {
                    accepted: false,
                    record: records[pos].clone(),
                });
            }
            Decision::Overwrite => candidate,
            Decision::Update => merge_records(&records[pos], &candidate),
            Decision::Accumulate => {
                let existing = &records[pos];
                let collision = NameCollision {
                    scope_name: scope_name.to_string(),
                    id: existing.id,
                    existing_hashes: existing.hash.clone(),
                    incoming_hashes: candidate.hash.clone(),
                    file_path: candidate.file_path.clone(),
                    team: candidate.team,
                };
                warn!(
                    scope = scope_name,
                    id = existing.id,
                    existing = ?collision.existing_hashes,
                    incoming = ?collision.incoming_hashes,
                    "name collision flagged for resolution"
                );
                self.collisions.push(collision);
                let mut merged = merge_records(existing, &candidate);
                if existing.file_path.is_some() {
                    merged.file_path = existing.file_path.clone();
                }
                merged
            }
        };

        self.record_batch_claims(scope_name, &record);
        records[pos] = record.clone();
        store.put(scope_name, records);
        Ok(Allocation {
            accepted: true,
            record,
        })
    }

    /// Tombstone the record at `id`. Hash-bearing local records keep their
    /// hash behind the `deleted` suffix marker so the hash can come back.
    pub fn tombstone(
        &mut self,
        store: &mut dyn LedgerStore,
        scope_name: &str,
        id: u32,
    ) -> Option<IdentityRecord> {
        let mut records = store.get(scope_name)?;
        let pos = records.iter().position(|r| r.id == id)?;
        let previous = records[pos].clone();

        records[pos] = if previous.is_hash_protected() && !previous.team {
            IdentityRecord {
                id,
                hash: previous.hash.clone(),
                suffix: Some(DELETED_SUFFIX.to_string()),
                empty: true,
                ..IdentityRecord::default()
            }
        } else {
            IdentityRecord::tombstone(id)
        };

        debug!(scope = scope_name, id, "tombstoned identity");
        self.in_flight.insert((scope_name.to_string(), id));
        store.put(scope_name, records);
        Some(previous)
    }

    /// The scope file was removed.
    pub fn tombstone_file(
        &mut self,
        store: &mut dyn LedgerStore,
        scope_name: &str,
        file_path: &str,
    ) -> Option<IdentityRecord> {
        let record = self.lookup(store, scope_name, LookupKey::FilePath(file_path))?;
        self.tombstone(store, scope_name, record.id)
    }

    /// A local hash is no longer valid (e.g. superseded by a team identity).
    pub fn invalidate_hash(
        &mut self,
        store: &mut dyn LedgerStore,
        scope_name: &str,
        hash: &str,
    ) -> Option<IdentityRecord> {
        let record = self.lookup(store, scope_name, LookupKey::Hash(hash))?;
        self.tombstone(store, scope_name, record.id)
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // HASH GENERATION
    // ═══════════════════════════════════════════════════════════════════════════

    fn known_hashes(store: &dyn LedgerStore) -> HashSet<String> {
        let mut known = HashSet::new();
        for scope in store.scope_names() {
            for record in store.get(&scope).unwrap_or_default() {
                known.extend(record.hash.iter().cloned());
                known.extend(record.local_hash.iter().cloned());
            }
        }
        known
    }

    /// Fresh hash for `file_path`, retried until it collides with no known hash.
    pub fn generate_hash(&self, store: &dyn LedgerStore, file_path: &str) -> String {
        let known = Self::known_hashes(store);
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos())
            .unwrap_or_default();

        let mut attempt = 0u64;
        loop {
            let hash = hash_candidate(file_path, nanos, attempt, self.options.hash_length);
            if !known.contains(&hash) {
                return hash;
            }
            attempt += 1;
        }
    }

    // ═══════════════════════════════════════════════════════════════════════════
    // RESOLUTION
    // ═══════════════════════════════════════════════════════════════════════════

    /// Resolve (or create) the identity for one scope file.
    pub fn resolve(
        &mut self,
        store: &mut dyn LedgerStore,
        source: &ScopeSource,
        config: &ScopeConfig,
    ) -> Result<ScopeIdentity, ScopeError> {
        let scope = source.scope_name.as_str();
        let mut resurrected = false;

        let record = if let Some(hash) = source.hash.as_deref() {
            if let Some(existing) = self.lookup(store, scope, LookupKey::Hash(hash)) {
                let mut candidate = existing.clone();
                candidate.file_path = Some(source.file_path.clone());
                candidate.team |= source.team;
                self.allocate(store, scope, candidate)?.record
            } else if let Some(tomb) = self.lookup_tombstone(store, scope, hash) {
                debug!(scope, id = tomb.id, hash, "resurrecting tombstoned identity");
                resurrected = true;
                let candidate = self.candidate_for(source, tomb.id, hash, false);
                self.allocate(store, scope, candidate)?.record
            } else {
                self.allocate_new(store, source, hash, false)?
            }
        } else if let Some(existing) = self.lookup(store, scope, LookupKey::FilePath(&source.file_path)) {
            if existing.primary_hash().is_some() {
                self.check_batch_claims(scope, &existing)?;
                self.record_batch_claims(scope, &existing);
                existing
            } else {
                let hash = self.generate_hash(store, &source.file_path);
                let mut candidate = existing.clone();
                if config.use_numbers {
                    candidate.local_hash = Some(hash);
                } else {
                    candidate.hash = vec![hash];
                }
                self.allocate(store, scope, candidate)?.record
            }
        } else {
            let hash = self.generate_hash(store, &source.file_path);
            self.allocate_new(store, source, &hash, config.use_numbers)?
        };

        let hash = record.primary_hash().unwrap_or_default().to_string();
        Ok(ScopeIdentity {
            scope_name: scope.to_string(),
            id: record.id,
            hashed_name: hashed_name(scope, record.id, &hash, config),
            hash,
            resurrected,
        })
    }

    fn candidate_for(&self, source: &ScopeSource, id: u32, hash: &str, local: bool) -> IdentityRecord {
        let mut candidate = if local {
            IdentityRecord {
                local_hash: Some(hash.to_string()),
                ..IdentityRecord::numbered(id, &source.file_path)
            }
        } else {
            IdentityRecord::hashed(id, hash, &source.file_path)
        };
        candidate.team = source.team;
        candidate
    }

    fn allocate_new(
        &mut self,
        store: &mut dyn LedgerStore,
        source: &ScopeSource,
        hash: &str,
        local: bool,
    ) -> Result<IdentityRecord, ScopeError> {
        let scope = source.scope_name.as_str();
        if let Some(requested) = source.id {
            let candidate = self.candidate_for(source, requested, hash, local);
            let allocation = self.allocate(store, scope, candidate)?;
            if allocation.accepted {
                return Ok(allocation.record);
            }
            debug!(scope, requested, "requested index occupied, using a free one");
        }
        let id = self.free_index(store, scope);
        let candidate = self.candidate_for(source, id, hash, local);
        Ok(self.allocate(store, scope, candidate)?.record)
    }
}

/// Union of both records, `candidate` taking precedence for scalar fields.
fn merge_records(existing: &IdentityRecord, candidate: &IdentityRecord) -> IdentityRecord {
    let mut hash = existing.hash.clone();
    for h in &candidate.hash {
        if !hash.contains(h) {
            hash.push(h.clone());
        }
    }
    IdentityRecord {
        id: existing.id,
        hash,
        file_path: candidate.file_path.clone().or_else(|| existing.file_path.clone()),
        local_hash: candidate.local_hash.clone().or_else(|| existing.local_hash.clone()),
        suffix: candidate.suffix.clone().or_else(|| existing.suffix.clone()),
        team: existing.team || candidate.team,
        global: existing.global || candidate.global,
        empty: false,
    }
}

/// Truncated sha256 of `(file_path, nanos, attempt)`.
pub(crate) fn hash_candidate(file_path: &str, nanos: u128, attempt: u64, len: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(file_path.as_bytes());
    hasher.update(nanos.to_le_bytes());
    hasher.update(attempt.to_le_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..len.min(digest.len())].to_string()
}

/// `card-3`, `card-ab12cd`, or bare `card` for the first index under `dontHashFirst`.
pub fn hashed_name(scope_name: &str, id: u32, hash: &str, config: &ScopeConfig) -> String {
    if config.dont_hash_first && id == 1 {
        scope_name.to_string()
    } else if config.use_numbers || hash.is_empty() {
        format!("{}-{}", scope_name, id)
    } else {
        format!("{}-{}", scope_name, hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;

    fn allocator() -> Allocator {
        Allocator::new(AllocatorOptions::default())
    }

    fn preserving() -> Allocator {
        Allocator::new(AllocatorOptions {
            preserve_suffixes: true,
            ..AllocatorOptions::default()
        })
    }

    fn team(id: u32, hash: &str) -> IdentityRecord {
        IdentityRecord {
            team: true,
            ..IdentityRecord::hashed(id, hash, "team/card.css")
        }
    }

    #[test]
    fn test_free_index_fills_gaps() {
        let mut store = MemoryLedger::new();
        store.put(
            "card",
            vec![
                IdentityRecord::numbered(1, "a.css"),
                IdentityRecord::numbered(3, "c.css"),
            ],
        );
        assert_eq!(allocator().free_index(&store, "card"), 2);
        assert_eq!(allocator().free_index(&store, "other"), 1);
    }

    #[test]
    fn test_free_index_always_increasing() {
        let mut store = MemoryLedger::new();
        store.put(
            "card",
            vec![
                IdentityRecord::numbered(1, "a.css"),
                IdentityRecord::numbered(3, "c.css"),
            ],
        );
        let alloc = Allocator::new(AllocatorOptions {
            always_increasing: true,
            ..AllocatorOptions::default()
        });
        assert_eq!(alloc.free_index(&store, "card"), 4);
    }

    #[test]
    fn test_tombstone_not_reused_in_same_batch() {
        let mut store = MemoryLedger::new();
        let mut alloc = allocator();
        alloc
            .allocate(&mut store, "card", IdentityRecord::numbered(1, "a.css"))
            .unwrap();
        alloc.tombstone(&mut store, "card", 1).unwrap();
        assert_eq!(alloc.free_index(&store, "card"), 2);

        alloc.begin_batch();
        assert_eq!(alloc.free_index(&store, "card"), 1);
    }

    #[test]
    fn test_hash_tombstone_keeps_marker() {
        let mut store = MemoryLedger::new();
        let mut alloc = allocator();
        alloc
            .allocate(&mut store, "card", IdentityRecord::hashed(1, "ab12cd", "a.css"))
            .unwrap();
        alloc.tombstone(&mut store, "card", 1).unwrap();
        alloc.begin_batch();

        let record = &store.get("card").unwrap()[0];
        assert!(record.empty);
        assert!(record.is_resurrectable());
        assert_eq!(alloc.free_index(&store, "card"), 2);
        assert!(alloc
            .lookup(&store, "card", LookupKey::Hash("ab12cd"))
            .is_none());
    }

    #[test]
    fn test_hash_overwrites_plain_record() {
        let mut store = MemoryLedger::new();
        let mut alloc = allocator();
        alloc
            .allocate(&mut store, "card", IdentityRecord::numbered(1, "a.css"))
            .unwrap();
        let result = alloc
            .allocate(&mut store, "card", IdentityRecord::hashed(1, "ab12cd", "b.css"))
            .unwrap();
        assert!(result.accepted);
        assert_eq!(store.get("card").unwrap()[0].hash, vec!["ab12cd"]);
    }

    #[test]
    fn test_hash_rejected_over_hash_without_preserve() {
        let mut store = MemoryLedger::new();
        let mut alloc = allocator();
        alloc
            .allocate(&mut store, "card", IdentityRecord::hashed(1, "aaaaaa", "a.css"))
            .unwrap();
        let result = alloc
            .allocate(&mut store, "card", IdentityRecord::hashed(1, "bbbbbb", "b.css"))
            .unwrap();
        assert!(!result.accepted);
        assert_eq!(result.record.hash, vec!["aaaaaa"]);
        assert!(alloc.collisions().is_empty());
    }

    #[test]
    fn test_hash_collision_flagged_with_preserve() {
        let mut store = MemoryLedger::new();
        let mut alloc = preserving();
        alloc
            .allocate(&mut store, "card", IdentityRecord::hashed(1, "aaaaaa", "a.css"))
            .unwrap();
        let result = alloc
            .allocate(&mut store, "card", IdentityRecord::hashed(1, "bbbbbb", "b.css"))
            .unwrap();
        assert!(result.accepted);
        assert_eq!(result.record.hash, vec!["aaaaaa", "bbbbbb"]);
        assert_eq!(result.record.file_path.as_deref(), Some("a.css"));
        assert_eq!(alloc.collisions().len(), 1);
        assert_eq!(alloc.collisions()[0].incoming_hashes, vec!["bbbbbb"]);
    }

    #[test]
    fn test_team_wins_over_hash_when_not_protected() {
        // Open question: a team record meeting a hash-protected local record
        // with preserveSuffixes off overwrites it.
        let mut store = MemoryLedger::new();
        let mut alloc = allocator();
        alloc
            .allocate(&mut store, "card", IdentityRecord::hashed(1, "aaaaaa", "a.css"))
            .unwrap();
        let result = alloc.allocate(&mut store, "card", team(1, "tttttt")).unwrap();
        assert!(result.accepted);
        assert_eq!(result.record.hash, vec!["tttttt"]);
        assert!(result.record.team);
        assert!(alloc.collisions().is_empty());
    }

    #[test]
    fn test_team_accumulates_when_protected() {
        let mut store = MemoryLedger::new();
        let mut alloc = preserving();
        alloc
            .allocate(&mut store, "card", IdentityRecord::hashed(1, "aaaaaa", "a.css"))
            .unwrap();
        let result = alloc.allocate(&mut store, "card", team(1, "tttttt")).unwrap();
        assert!(result.accepted);
        assert_eq!(result.record.hash, vec!["aaaaaa", "tttttt"]);
        assert_eq!(alloc.collisions().len(), 1);
        assert!(alloc.collisions()[0].team);
    }

    #[test]
    fn test_tombstone_always_overwritten() {
        let mut store = MemoryLedger::new();
        store.put("card", vec![IdentityRecord::tombstone(1)]);
        let result = allocator()
            .allocate(&mut store, "card", IdentityRecord::numbered(1, "a.css"))
            .unwrap();
        assert!(result.accepted);
        assert!(!store.get("card").unwrap()[0].empty);
    }

    #[test]
    fn test_same_batch_collision_is_fatal() {
        let mut store = MemoryLedger::new();
        let mut alloc = allocator();
        alloc
            .allocate(&mut store, "card", IdentityRecord::hashed(1, "ab12cd", "a/card.css"))
            .unwrap();
        let err = alloc
            .allocate(&mut store, "card", IdentityRecord::hashed(2, "ab12cd", "b/card.css"))
            .unwrap_err();
        assert!(matches!(err, ScopeError::HashCollision { .. }));
        assert!(err.to_string().contains("a/card.css"));

        alloc.begin_batch();
        assert!(alloc
            .allocate(&mut store, "card", IdentityRecord::hashed(2, "ab12cd", "b/card.css"))
            .is_ok());
    }

    #[test]
    fn test_path_resolved_identity_claims_its_hash() {
        let mut store = MemoryLedger::new();
        store.put("card", vec![IdentityRecord::hashed(1, "ab12cd", "a/card.css")]);
        let mut alloc = allocator();
        let config = ScopeConfig::default();
        alloc.begin_batch();

        let first = alloc
            .resolve(&mut store, &ScopeSource::new("a/card.css", ""), &config)
            .unwrap();
        assert_eq!(first.hash, "ab12cd");

        let err = alloc
            .resolve(
                &mut store,
                &ScopeSource::new("b/card.css", "").with_hash("ab12cd"),
                &config,
            )
            .unwrap_err();
        assert!(matches!(err, ScopeError::HashCollision { .. }));
        assert_eq!(
            store.get("card").unwrap()[0].file_path.as_deref(),
            Some("a/card.css")
        );
    }

    #[test]
    fn test_live_ids_stay_unique() {
        let mut store = MemoryLedger::new();
        let mut alloc = preserving();
        let config = ScopeConfig::default();
        for i in 0..5 {
            let source = ScopeSource::new(&format!("dir{}/card.css", i), "");
            alloc.resolve(&mut store, &source, &config).unwrap();
        }
        alloc.tombstone(&mut store, "card", 2);
        alloc.allocate(&mut store, "card", team(3, "tttttt")).unwrap();

        let records = store.get("card").unwrap();
        let mut ids: Vec<u32> = records.iter().filter(|r| r.is_live()).map(|r| r.id).collect();
        let before = ids.len();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), before);
    }

    #[test]
    fn test_hash_candidate_retries_differ() {
        let a = hash_candidate("card.css", 42, 0, 6);
        let b = hash_candidate("card.css", 42, 1, 6);
        assert_eq!(a.len(), 6);
        assert_ne!(a, b);
        assert_eq!(a, hash_candidate("card.css", 42, 0, 6));
    }

    #[test]
    fn test_generate_hash_avoids_known() {
        let store = MemoryLedger::new();
        let hash = allocator().generate_hash(&store, "card.css");
        assert_eq!(hash.len(), 6);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_hashed_name_modes() {
        let mut config = ScopeConfig::default();
        assert_eq!(hashed_name("card", 3, "ab12cd", &config), "card-3");
        config.use_numbers = false;
        assert_eq!(hashed_name("card", 3, "ab12cd", &config), "card-ab12cd");
        config.dont_hash_first = true;
        assert_eq!(hashed_name("card", 1, "ab12cd", &config), "card");
    }
}
