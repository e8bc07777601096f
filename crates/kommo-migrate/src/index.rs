//! Persisted migration index.
//!
//! The index records `(entity kind, source id) → destination id` for every
//! entity that has been transferred, and is the system's replay-safety
//! boundary: an indexed entity is never migrated again. Entries are created
//! only after the remote create has been acknowledged and are never
//! overwritten.

use crate::catalog::EntityKind;
use crate::error::{MigrateError, Result};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One in-memory index record, as produced by [`MigrationIndex::record`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MigrationIndexEntry {
    pub kind: EntityKind,
    pub source_id: i64,
    pub destination_id: i64,
    pub migrated_at: DateTime<Utc>,
}

/// Persisted set of already-migrated entities.
///
/// On disk: `{ "<entityKind>": { "<sourceId>": <destinationId> } }`.
#[derive(Debug, Clone, Default)]
pub struct MigrationIndex {
    path: Option<PathBuf>,
    kinds: HashMap<EntityKind, BTreeMap<i64, i64>>,
}

impl MigrationIndex {
    /// Empty in-memory index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the index from a JSON file. A missing file is an empty index
    /// (first run); a malformed file aborts the run before any mutation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No migration index at {}, starting fresh", path.display());
            return Ok(Self {
                path: Some(path.to_path_buf()),
                kinds: HashMap::new(),
            });
        }
        let content = std::fs::read_to_string(path)?;
        let kinds: HashMap<EntityKind, BTreeMap<i64, i64>> = serde_json::from_str(&content)
            .map_err(|e| {
                MigrateError::Index(format!("malformed index {}: {}", path.display(), e))
            })?;
        let total: usize = kinds.values().map(|m| m.len()).sum();
        info!(
            "Loaded migration index with {} entries from {}",
            total,
            path.display()
        );
        Ok(Self {
            path: Some(path.to_path_buf()),
            kinds,
        })
    }

    /// Bind the index to a file for subsequent saves.
    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    /// Destination id for an already-migrated entity.
    pub fn lookup(&self, kind: EntityKind, source_id: i64) -> Option<i64> {
        self.kinds.get(&kind).and_then(|m| m.get(&source_id)).copied()
    }

    pub fn contains(&self, kind: EntityKind, source_id: i64) -> bool {
        self.lookup(kind, source_id).is_some()
    }

    /// Record a successful transfer. Re-recording the same pair is a no-op
    /// (idempotence boundary); recording a different destination for an
    /// indexed source is an [`MigrateError::IndexConflict`].
    pub fn record(
        &mut self,
        kind: EntityKind,
        source_id: i64,
        destination_id: i64,
    ) -> Result<MigrationIndexEntry> {
        if let Some(existing) = self.lookup(kind, source_id) {
            if existing == destination_id {
                debug!("{}/{} already indexed, no-op", kind, source_id);
            } else {
                return Err(MigrateError::IndexConflict {
                    kind,
                    source_id,
                    existing,
                });
            }
        } else {
            self.kinds
                .entry(kind)
                .or_default()
                .insert(source_id, destination_id);
        }
        Ok(MigrationIndexEntry {
            kind,
            source_id,
            destination_id,
            migrated_at: Utc::now(),
        })
    }

    /// Save the index (atomic write: temp file, then rename). Called after
    /// every acknowledged create so a crash never loses an indexed entity.
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(&self.kinds)?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Number of indexed entities for one kind.
    pub fn count(&self, kind: EntityKind) -> usize {
        self.kinds.get(&kind).map(|m| m.len()).unwrap_or(0)
    }

    /// Total number of indexed entities.
    pub fn len(&self) -> usize {
        self.kinds.values().map(|m| m.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn record_and_lookup() {
        let mut index = MigrationIndex::new();
        let entry = index.record(EntityKind::Leads, 31635363, 9000001).unwrap();
        assert_eq!(entry.destination_id, 9000001);
        assert_eq!(index.lookup(EntityKind::Leads, 31635363), Some(9000001));
        assert_eq!(index.lookup(EntityKind::Contacts, 31635363), None);
    }

    #[test]
    fn re_record_same_pair_is_noop() {
        let mut index = MigrationIndex::new();
        index.record(EntityKind::Leads, 1, 10).unwrap();
        index.record(EntityKind::Leads, 1, 10).unwrap();
        assert_eq!(index.count(EntityKind::Leads), 1);
    }

    #[test]
    fn conflicting_destination_rejected() {
        let mut index = MigrationIndex::new();
        index.record(EntityKind::Leads, 1, 10).unwrap();
        let err = index.record(EntityKind::Leads, 1, 11).unwrap_err();
        assert!(matches!(
            err,
            MigrateError::IndexConflict {
                source_id: 1,
                existing: 10,
                ..
            }
        ));
        // Original entry untouched.
        assert_eq!(index.lookup(EntityKind::Leads, 1), Some(10));
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");

        let mut index = MigrationIndex::load(&path).unwrap();
        assert!(index.is_empty());
        index.record(EntityKind::Leads, 31635363, 9000001).unwrap();
        index.record(EntityKind::Contacts, 5, 9000002).unwrap();
        index.save().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"leads\""));
        assert!(raw.contains("\"31635363\""));

        let loaded = MigrationIndex::load(&path).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.lookup(EntityKind::Leads, 31635363), Some(9000001));
    }

    #[test]
    fn malformed_index_aborts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            MigrationIndex::load(&path).unwrap_err(),
            MigrateError::Index(_)
        ));
    }
}
