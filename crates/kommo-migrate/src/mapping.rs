//! Persisted field-mapping store.
//!
//! The store is the only mapping source trusted across runs. Entries are
//! created by the reconciler's automatic pass or by explicit operator
//! confirmation, mutated only by re-confirmation, and never deleted
//! implicitly.
//!
//! On disk the store is a JSON table keyed by entity kind then by source
//! field id:
//!
//! ```json
//! { "leads": { "703925": {
//!     "kommoFieldId": 918715, "amoFieldName": "Source", "kommoFieldName": "Source",
//!     "amoFieldType": "multiselect", "kommoFieldType": "select",
//!     "transferMode": "enumTranslate",
//!     "enumMap": { "A": "918715:1", "B": null }
//! } } }
//! ```

use crate::catalog::{EntityKind, FieldType};
use crate::error::{MigrateError, Result};
use crate::transform;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// How a field's values cross the schema boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferMode {
    /// Type-preserving copy.
    Direct,
    /// Enum ids translated through the entry's `enumMap`.
    EnumTranslate,
    /// Enum labels / checkbox state flattened into free text.
    TextFlatten,
    /// Never transferred (operator exclusion or API-only source field).
    Skip,
}

/// One confirmed (or auto-proposed) source → destination association.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMappingEntry {
    /// Destination field id. `None` until the operator confirms the pair;
    /// a non-null id is the explicit confirmation gate for `synced`.
    #[serde(rename = "kommoFieldId")]
    pub kommo_field_id: Option<i64>,

    #[serde(rename = "amoFieldName")]
    pub amo_field_name: String,

    #[serde(rename = "kommoFieldName", default)]
    pub kommo_field_name: String,

    #[serde(rename = "amoFieldType")]
    pub amo_field_type: FieldType,

    #[serde(rename = "kommoFieldType")]
    pub kommo_field_type: FieldType,

    #[serde(rename = "transferMode")]
    pub transfer_mode: TransferMode,

    /// Source enum id → destination enum id. A destination reference may be
    /// qualified as `"fieldId:enumId"`; `null` marks a source enum the
    /// operator left untranslated (its values are dropped with a warning).
    #[serde(rename = "enumMap", default)]
    pub enum_map: HashMap<String, Option<String>>,
}

impl FieldMappingEntry {
    /// Operator has confirmed the destination side.
    pub fn is_confirmed(&self) -> bool {
        self.kommo_field_id.is_some()
    }

    /// Destination enum ids this entry translates into.
    pub fn enum_targets(&self) -> Vec<&str> {
        self.enum_map
            .values()
            .filter_map(|v| v.as_deref())
            .map(transform::enum_ref_id)
            .collect()
    }

    /// Check the transfer mode against the admissible modes for the type
    /// pair. Validation runs for every entry at load time.
    fn validate(&self, field_id: i64) -> Result<()> {
        if self.transfer_mode == TransferMode::Skip {
            return Ok(());
        }
        let admissible =
            transform::admissible_modes(self.amo_field_type, self.kommo_field_type);
        if admissible.is_empty() {
            return Err(MigrateError::TransformUnsupported {
                from: self.amo_field_type,
                to: self.kommo_field_type,
            });
        }
        if !admissible.contains(&self.transfer_mode) {
            return Err(MigrateError::Mapping {
                field_id,
                message: format!(
                    "transfer mode {:?} not admissible for {} -> {}",
                    self.transfer_mode, self.amo_field_type, self.kommo_field_type
                ),
            });
        }
        Ok(())
    }
}

/// Persisted table of confirmed field mappings.
#[derive(Debug, Clone, Default)]
pub struct MappingStore {
    path: Option<PathBuf>,
    entries: HashMap<EntityKind, BTreeMap<i64, FieldMappingEntry>>,
}

impl MappingStore {
    /// Empty in-memory store (tests, first analysis run).
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the store from a JSON file. A missing or malformed file is a
    /// configuration error: the run must abort before any remote call.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            MigrateError::Config(format!("cannot read mapping store {}: {}", path.display(), e))
        })?;
        let entries: HashMap<EntityKind, BTreeMap<i64, FieldMappingEntry>> =
            serde_json::from_str(&content).map_err(|e| {
                MigrateError::Config(format!(
                    "malformed mapping store {}: {}",
                    path.display(),
                    e
                ))
            })?;

        for kind_entries in entries.values() {
            for (field_id, entry) in kind_entries {
                entry.validate(*field_id)?;
            }
        }

        let total: usize = entries.values().map(|m| m.len()).sum();
        info!("Loaded {} field mappings from {}", total, path.display());

        Ok(Self {
            path: Some(path.to_path_buf()),
            entries,
        })
    }

    /// Save the store (atomic write: temp file, then rename).
    pub fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let content = serde_json::to_string_pretty(&self.entries)?;
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, &content)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }

    /// Bind the store to a file for subsequent saves.
    pub fn with_path(mut self, path: PathBuf) -> Self {
        self.path = Some(path);
        self
    }

    pub fn get(&self, kind: EntityKind, source_field_id: i64) -> Option<&FieldMappingEntry> {
        self.entries.get(&kind).and_then(|m| m.get(&source_field_id))
    }

    /// All entries for one entity kind.
    pub fn for_kind(&self, kind: EntityKind) -> BTreeMap<i64, FieldMappingEntry> {
        self.entries.get(&kind).cloned().unwrap_or_default()
    }

    /// Insert or replace an entry (operator confirmation / re-confirmation).
    pub fn confirm(
        &mut self,
        kind: EntityKind,
        source_field_id: i64,
        entry: FieldMappingEntry,
    ) -> Result<()> {
        entry.validate(source_field_id)?;
        debug!(
            "Confirmed mapping {}/{} -> {:?}",
            kind, source_field_id, entry.kommo_field_id
        );
        self.entries
            .entry(kind)
            .or_default()
            .insert(source_field_id, entry);
        Ok(())
    }

    /// Persist an explicit operator exclusion for a field.
    pub fn skip(
        &mut self,
        kind: EntityKind,
        source_field_id: i64,
        name: &str,
        field_type: FieldType,
    ) {
        self.entries.entry(kind).or_default().insert(
            source_field_id,
            FieldMappingEntry {
                kommo_field_id: None,
                amo_field_name: name.to_string(),
                kommo_field_name: String::new(),
                amo_field_type: field_type,
                kommo_field_type: field_type,
                transfer_mode: TransferMode::Skip,
                enum_map: HashMap::new(),
            },
        );
    }

    /// Source field ids the operator explicitly excluded for a kind.
    pub fn skipped_ids(&self, kind: EntityKind) -> std::collections::HashSet<i64> {
        self.entries
            .get(&kind)
            .map(|m| {
                m.iter()
                    .filter(|(_, e)| e.transfer_mode == TransferMode::Skip)
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|m| m.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn entry(mode: TransferMode, src: FieldType, dst: FieldType) -> FieldMappingEntry {
        FieldMappingEntry {
            kommo_field_id: Some(918715),
            amo_field_name: "Source".into(),
            kommo_field_name: "Source".into(),
            amo_field_type: src,
            kommo_field_type: dst,
            transfer_mode: mode,
            enum_map: HashMap::new(),
        }
    }

    #[test]
    fn wire_format_round_trip() {
        let mut store = MappingStore::new();
        let mut e = entry(
            TransferMode::EnumTranslate,
            FieldType::Multiselect,
            FieldType::Select,
        );
        e.enum_map.insert("A".into(), Some("918715:1".into()));
        e.enum_map.insert("B".into(), None);
        store.confirm(EntityKind::Leads, 703925, e).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("mappings.json");
        let store = store.with_path(path.clone());
        store.save().unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"leads\""));
        assert!(raw.contains("\"703925\""));
        assert!(raw.contains("\"kommoFieldId\": 918715"));
        assert!(raw.contains("\"transferMode\": \"enumTranslate\""));
        assert!(raw.contains("\"918715:1\""));

        let loaded = MappingStore::load(&path).unwrap();
        let e = loaded.get(EntityKind::Leads, 703925).unwrap();
        assert!(e.is_confirmed());
        assert_eq!(e.enum_map.get("B"), Some(&None));
        assert_eq!(e.enum_targets(), vec!["1"]);
    }

    #[test]
    fn missing_store_is_config_error() {
        let err = MappingStore::load("/nonexistent/mappings.json").unwrap_err();
        assert!(matches!(err, MigrateError::Config(_)));
    }

    #[test]
    fn inadmissible_mode_rejected_at_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("mappings.json");
        std::fs::write(
            &path,
            r#"{ "leads": { "1": {
                "kommoFieldId": 2, "amoFieldName": "n", "kommoFieldName": "n",
                "amoFieldType": "text", "kommoFieldType": "text",
                "transferMode": "enumTranslate", "enumMap": {}
            } } }"#,
        )
        .unwrap();
        let err = MappingStore::load(&path).unwrap_err();
        assert!(matches!(err, MigrateError::Mapping { field_id: 1, .. }));
    }

    #[test]
    fn confirm_validates_mode() {
        let mut store = MappingStore::new();
        let err = store
            .confirm(
                EntityKind::Contacts,
                5,
                entry(TransferMode::Direct, FieldType::Multiselect, FieldType::Text),
            )
            .unwrap_err();
        assert!(matches!(err, MigrateError::Mapping { field_id: 5, .. }));

        // The flattening downgrade is admissible.
        store
            .confirm(
                EntityKind::Contacts,
                5,
                entry(
                    TransferMode::TextFlatten,
                    FieldType::Multiselect,
                    FieldType::Text,
                ),
            )
            .unwrap();
    }

    #[test]
    fn unsupported_type_pair_rejected() {
        let mut store = MappingStore::new();
        let err = store
            .confirm(
                EntityKind::Leads,
                9,
                entry(TransferMode::Direct, FieldType::Numeric, FieldType::Date),
            )
            .unwrap_err();
        assert!(err.to_string().contains("No transform rule"));
        assert!(matches!(
            err,
            MigrateError::TransformUnsupported {
                from: FieldType::Numeric,
                to: FieldType::Date,
            }
        ));

        // An explicit skip carries no transform and is always accepted.
        store
            .confirm(
                EntityKind::Leads,
                9,
                entry(TransferMode::Skip, FieldType::Numeric, FieldType::Date),
            )
            .unwrap();
    }

    #[test]
    fn skip_entries_tracked() {
        let mut store = MappingStore::new();
        store.skip(EntityKind::Leads, 42, "Internal", FieldType::Text);
        assert!(store.skipped_ids(EntityKind::Leads).contains(&42));
        assert!(!store.get(EntityKind::Leads, 42).unwrap().is_confirmed());
    }
}
