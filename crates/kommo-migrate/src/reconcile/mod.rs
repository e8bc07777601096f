//! Field reconciliation.
//!
//! Classifies every source custom field against the destination catalog and
//! the persisted mapping store. Reconciliation is a pure function of its
//! inputs: the same catalogs, mappings and skip-list always produce the
//! same classification list, and nothing here is persisted.
//!
//! Matching runs in ordered passes, first match wins, and each destination
//! field can be claimed by at most one source field per run:
//!
//! 1. **Pass 1** — code match, then exact name match (case-insensitive,
//!    trimmed), for unmapped fields with a non-empty code. Fields whose
//!    containing group has no destination equivalent are held back for
//!    manual confirmation (orphan-group guard) to avoid false-positive
//!    cross-group collisions.
//! 2. **Pass 1c** — a previously confirmed mapping always applies,
//!    including to fields the orphan guard held back.
//! 3. **Pass 2** — cross-language match over normalized names and
//!    enumerated-value sets, using the synonym cluster table.

pub mod lang;

use crate::catalog::{FieldCatalog, FieldDescriptor};
use crate::error::{MigrateError, Result};
use crate::mapping::{FieldMappingEntry, TransferMode};
use crate::transform;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

/// Classification of one source field against the destination schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldClassification {
    /// Mapped, operator-confirmed, and value-compatible.
    Synced,
    /// A destination equivalent exists but the pair is not yet confirmed.
    Matched,
    /// Mapped, but the destination enum vocabulary is missing members.
    Partial,
    /// No destination field found.
    Missing,
    /// Types conflict: no transform rule for the pair.
    Different,
    /// Operator explicitly excluded the field.
    Skipped,
}

/// How the destination field was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MatchedVia {
    Code,
    Name,
    CrossLang,
    Mapping,
}

/// One source field paired (or not) with its destination candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPairing {
    pub amo: FieldDescriptor,
    /// Hidden (`None`) for `missing`, `skipped`, and type-conflict pairs.
    pub kommo: Option<FieldDescriptor>,
    pub status: FieldClassification,
    #[serde(rename = "missingEnums", default, skip_serializing_if = "Vec::is_empty")]
    pub missing_enums: Vec<String>,
    #[serde(rename = "matchedVia", default, skip_serializing_if = "Option::is_none")]
    pub matched_via: Option<MatchedVia>,
    /// Transfer mode the pairing would use, for the operator to confirm.
    #[serde(rename = "suggestedMode", default, skip_serializing_if = "Option::is_none")]
    pub suggested_mode: Option<TransferMode>,
}

/// A source field that matched more than one destination candidate.
/// Surfaced to the operator; never auto-resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiguity {
    pub source_field_id: i64,
    pub candidate_ids: Vec<i64>,
}

/// Result of one reconciliation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub pairs: Vec<FieldPairing>,
    pub ambiguities: Vec<Ambiguity>,
}

impl Reconciliation {
    /// Gate for unattended flows that cannot show the ambiguity list to an
    /// operator: fail on the first multi-candidate field instead.
    pub fn require_unambiguous(&self) -> Result<()> {
        match self.ambiguities.first() {
            Some(a) => Err(MigrateError::Ambiguity {
                field_id: a.source_field_id,
                candidates: a.candidate_ids.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Classify every source field against the destination catalog.
pub fn reconcile(
    source: &FieldCatalog,
    destination: &FieldCatalog,
    mappings: &BTreeMap<i64, FieldMappingEntry>,
    skipped: &HashSet<i64>,
) -> Reconciliation {
    let mut slots: Vec<Option<FieldPairing>> = vec![None; source.fields.len()];
    let mut consumed: HashSet<i64> = HashSet::new();
    let mut ambiguities: Vec<Ambiguity> = Vec::new();

    let group_ok: Vec<bool> = source
        .fields
        .iter()
        .map(|f| has_destination_group(source, destination, f))
        .collect();

    // Pass 1: high-confidence code/name matches for unmapped fields.
    for (idx, field) in source.fields.iter().enumerate() {
        if mappings.contains_key(&field.id) {
            continue;
        }
        if skipped.contains(&field.id) {
            slots[idx] = Some(skipped_pairing(field));
            continue;
        }
        let Some(code) = field.code.as_deref().filter(|c| !c.is_empty()) else {
            continue;
        };
        if !group_ok[idx] {
            // Orphan group: wait for manual confirmation.
            continue;
        }

        let by_code: Vec<&FieldDescriptor> = destination
            .fields
            .iter()
            .filter(|d| !consumed.contains(&d.id))
            .filter(|d| {
                d.code
                    .as_deref()
                    .map(|c| c.to_lowercase() == code.to_lowercase())
                    .unwrap_or(false)
            })
            .collect();

        let candidate = match by_code.len() {
            1 => Some((by_code[0], MatchedVia::Code)),
            0 => {
                let by_name: Vec<&FieldDescriptor> = destination
                    .fields
                    .iter()
                    .filter(|d| !consumed.contains(&d.id))
                    .filter(|d| same_name(&field.name, &d.name))
                    .collect();
                match by_name.len() {
                    1 => Some((by_name[0], MatchedVia::Name)),
                    0 => None,
                    _ => {
                        ambiguities.push(Ambiguity {
                            source_field_id: field.id,
                            candidate_ids: by_name.iter().map(|d| d.id).collect(),
                        });
                        None
                    }
                }
            }
            _ => {
                ambiguities.push(Ambiguity {
                    source_field_id: field.id,
                    candidate_ids: by_code.iter().map(|d| d.id).collect(),
                });
                None
            }
        };

        if let Some((dest, via)) = candidate {
            consumed.insert(dest.id);
            slots[idx] = Some(classify_pair(field, dest, None, via));
        }
    }

    // Pass 1c: confirmed mappings always apply, orphan guard included.
    for (idx, field) in source.fields.iter().enumerate() {
        if slots[idx].is_some() {
            continue;
        }
        let Some(entry) = mappings.get(&field.id) else {
            continue;
        };
        if entry.transfer_mode == TransferMode::Skip {
            slots[idx] = Some(skipped_pairing(field));
            continue;
        }
        let Some(dest_id) = entry.kommo_field_id else {
            // Auto-proposed entry the operator never confirmed: the field
            // falls through to Pass 2 like any unmapped field.
            continue;
        };
        match destination.field_by_id(dest_id) {
            Some(dest) => {
                consumed.insert(dest.id);
                slots[idx] = Some(classify_pair(field, dest, Some(entry), MatchedVia::Mapping));
            }
            None => {
                // Stale mapping: the destination field no longer exists.
                slots[idx] = Some(FieldPairing {
                    amo: field.clone(),
                    kommo: None,
                    status: FieldClassification::Missing,
                    missing_enums: Vec::new(),
                    matched_via: Some(MatchedVia::Mapping),
                    suggested_mode: None,
                });
            }
        }
    }

    // Pass 2: cross-language heuristic over names and enum vocabularies.
    for (idx, field) in source.fields.iter().enumerate() {
        if slots[idx].is_some() || mappings.contains_key(&field.id) {
            continue;
        }
        if !group_ok[idx] {
            continue;
        }

        let candidates: Vec<&FieldDescriptor> = destination
            .fields
            .iter()
            .filter(|d| !consumed.contains(&d.id))
            .filter(|d| {
                lang::names_equivalent(&field.name, &d.name) || enums_share_cluster(field, d)
            })
            .collect();

        match candidates.len() {
            1 => {
                let dest = candidates[0];
                consumed.insert(dest.id);
                slots[idx] = Some(classify_pair(field, dest, None, MatchedVia::CrossLang));
            }
            0 => {}
            _ => {
                ambiguities.push(Ambiguity {
                    source_field_id: field.id,
                    candidate_ids: candidates.iter().map(|d| d.id).collect(),
                });
            }
        }
    }

    // Everything still unmatched has no destination equivalent.
    let pairs = source
        .fields
        .iter()
        .zip(slots)
        .map(|(field, slot)| {
            slot.unwrap_or_else(|| FieldPairing {
                amo: field.clone(),
                kommo: None,
                status: FieldClassification::Missing,
                missing_enums: Vec::new(),
                matched_via: None,
                suggested_mode: None,
            })
        })
        .collect();

    Reconciliation { pairs, ambiguities }
}

fn skipped_pairing(field: &FieldDescriptor) -> FieldPairing {
    FieldPairing {
        amo: field.clone(),
        kommo: None,
        status: FieldClassification::Skipped,
        missing_enums: Vec::new(),
        matched_via: None,
        suggested_mode: Some(TransferMode::Skip),
    }
}

/// Exact name match: case-insensitive, trimmed.
fn same_name(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// Orphan-group guard predicate. A field with no containing group is never
/// blocked; a field whose group cannot be matched to any destination group
/// (directly or through the rename table) must wait for confirmation.
fn has_destination_group(
    source: &FieldCatalog,
    destination: &FieldCatalog,
    field: &FieldDescriptor,
) -> bool {
    let Some(group_id) = field.group_id.as_deref() else {
        return true;
    };
    let Some(group_name) = source.group_name(group_id) else {
        // Group id the source catalog cannot resolve: treat as orphan.
        return false;
    };
    destination
        .groups
        .iter()
        .any(|g| lang::group_names_equivalent(group_name, &g.name))
}

/// Whether two enumerated fields share any value vocabulary cluster.
fn enums_share_cluster(a: &FieldDescriptor, b: &FieldDescriptor) -> bool {
    if a.enumerated_values.is_empty() || b.enumerated_values.is_empty() {
        return false;
    }
    a.enumerated_values.iter().any(|av| {
        b.enumerated_values
            .iter()
            .any(|bv| lang::names_equivalent(&av.value, &bv.value))
    })
}

/// Classify a matched source/destination pair.
fn classify_pair(
    field: &FieldDescriptor,
    dest: &FieldDescriptor,
    entry: Option<&FieldMappingEntry>,
    via: MatchedVia,
) -> FieldPairing {
    let Some(mode) = transform::transfer_mode_for(field.field_type, dest.field_type) else {
        // Unsupported type pair: the candidate is hidden so the UI offers
        // field creation instead of a broken mapping.
        return FieldPairing {
            amo: field.clone(),
            kommo: None,
            status: FieldClassification::Different,
            missing_enums: Vec::new(),
            matched_via: Some(via),
            suggested_mode: None,
        };
    };

    let missing_enums = if field.field_type.is_enumerated() && dest.field_type.is_enumerated() {
        missing_enum_values(field, dest, entry)
    } else {
        Vec::new()
    };

    let status = if !missing_enums.is_empty() {
        FieldClassification::Partial
    } else if entry.map(|e| e.is_confirmed()).unwrap_or(false) {
        FieldClassification::Synced
    } else {
        FieldClassification::Matched
    };

    FieldPairing {
        amo: field.clone(),
        kommo: Some(dest.clone()),
        status,
        missing_enums,
        matched_via: Some(via),
        suggested_mode: Some(entry.map(|e| e.transfer_mode).unwrap_or(mode)),
    }
}

/// Source enum labels with no destination equivalent and no `enumMap`
/// translation: `sourceEnums − (destinationEnums ∪ enumMap.targets)`.
fn missing_enum_values(
    field: &FieldDescriptor,
    dest: &FieldDescriptor,
    entry: Option<&FieldMappingEntry>,
) -> Vec<String> {
    field
        .enumerated_values
        .iter()
        .filter(|src_enum| {
            let translated = entry
                .map(|e| matches!(e.enum_map.get(&src_enum.id), Some(Some(_))))
                .unwrap_or(false);
            let named = dest
                .enumerated_values
                .iter()
                .any(|d| lang::names_equivalent(&src_enum.value, &d.value));
            !translated && !named
        })
        .map(|e| e.value.clone())
        .collect()
}

/// Per-status counters for the operator report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub synced: usize,
    pub matched: usize,
    pub partial: usize,
    pub missing: usize,
    pub different: usize,
    pub skipped: usize,
}

impl AnalysisSummary {
    fn add(&mut self, status: FieldClassification) {
        match status {
            FieldClassification::Synced => self.synced += 1,
            FieldClassification::Matched => self.matched += 1,
            FieldClassification::Partial => self.partial += 1,
            FieldClassification::Missing => self.missing += 1,
            FieldClassification::Different => self.different += 1,
            FieldClassification::Skipped => self.skipped += 1,
        }
    }
}

/// Field pairs of one source group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupReport {
    pub group: String,
    pub pairs: Vec<FieldPairing>,
}

/// Analysis report served to the operator UI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub kind: crate::catalog::EntityKind,
    pub groups: Vec<GroupReport>,
    pub summary: AnalysisSummary,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ambiguities: Vec<Ambiguity>,
}

/// Run reconciliation and shape the result for the operator UI: pairs
/// bucketed by source field group, with a per-status summary.
pub fn analyze(
    source: &FieldCatalog,
    destination: &FieldCatalog,
    mappings: &BTreeMap<i64, FieldMappingEntry>,
    skipped: &HashSet<i64>,
) -> AnalysisReport {
    let reconciliation = reconcile(source, destination, mappings, skipped);

    let mut summary = AnalysisSummary::default();
    for pair in &reconciliation.pairs {
        summary.add(pair.status);
    }

    let mut groups: Vec<GroupReport> = source
        .groups
        .iter()
        .map(|g| GroupReport {
            group: g.name.clone(),
            pairs: Vec::new(),
        })
        .collect();
    let mut ungrouped = GroupReport {
        group: "ungrouped".into(),
        pairs: Vec::new(),
    };

    for pair in reconciliation.pairs {
        let slot = pair
            .amo
            .group_id
            .as_deref()
            .and_then(|gid| source.groups.iter().position(|g| g.id == gid));
        match slot {
            Some(i) => groups[i].pairs.push(pair),
            None => ungrouped.pairs.push(pair),
        }
    }

    groups.retain(|g| !g.pairs.is_empty());
    if !ungrouped.pairs.is_empty() {
        groups.push(ungrouped);
    }

    AnalysisReport {
        kind: source.kind,
        groups,
        summary,
        ambiguities: reconciliation.ambiguities,
    }
}
