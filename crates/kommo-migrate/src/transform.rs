//! Value transformation across field-type boundaries.
//!
//! The rule table here is the closed set of supported type-pair
//! conversions. The reconciler uses it to detect type conflicts; the
//! mapping store uses it to validate entries at load time; the orchestrator
//! uses [`transform`] to shape every custom-field value for the destination
//! payload.

use crate::catalog::{FieldDescriptor, FieldType};
use crate::client::{DestinationFieldValue, DestinationValue, SourceFieldValue};
use crate::mapping::{FieldMappingEntry, TransferMode};
use serde_json::Value;
use tracing::debug;

/// Destination enum references may be qualified as `"fieldId:enumId"`;
/// the enum id is the segment after the last colon.
pub fn enum_ref_id(reference: &str) -> &str {
    reference.rsplit(':').next().unwrap_or(reference)
}

fn same_family(a: FieldType, b: FieldType) -> bool {
    let textual = |t: FieldType| t.is_textual();
    let dateish = |t: FieldType| {
        matches!(t, FieldType::Date | FieldType::DateTime | FieldType::Birthday)
    };
    a == b || (textual(a) && textual(b)) || (dateish(a) && dateish(b))
}

/// All transfer modes admissible for a type pair. `skip` is always allowed
/// and therefore not listed.
pub fn admissible_modes(source: FieldType, destination: FieldType) -> Vec<TransferMode> {
    let mut modes = Vec::new();
    if source.is_enumerated() && destination.is_enumerated() {
        modes.push(TransferMode::EnumTranslate);
    } else if same_family(source, destination) {
        modes.push(TransferMode::Direct);
    }
    if (source.is_enumerated() || source == FieldType::Checkbox) && destination.is_textual() {
        modes.push(TransferMode::TextFlatten);
    }
    modes
}

/// Preferred transfer mode for a type pair, or `None` when the combination
/// is unsupported (the reconciler classifies such pairs as `different`).
pub fn transfer_mode_for(source: FieldType, destination: FieldType) -> Option<TransferMode> {
    admissible_modes(source, destination).into_iter().next()
}

/// Result of transforming one custom-field value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransformOutput {
    /// Destination-shaped value, or `None` when nothing survives (skipped
    /// field, empty value set, all enum values dropped).
    pub value: Option<DestinationFieldValue>,
    pub warnings: Vec<String>,
}

impl TransformOutput {
    fn absent() -> Self {
        Self::default()
    }
}

/// Transform a raw source value according to its mapping entry.
///
/// `source_field` provides the enum label table for `textFlatten`; the raw
/// value's own text is preferred when the source API already includes it.
pub fn transform(
    entry: &FieldMappingEntry,
    raw: &SourceFieldValue,
    source_field: Option<&FieldDescriptor>,
) -> TransformOutput {
    match entry.transfer_mode {
        TransferMode::Skip => TransformOutput::absent(),
        TransferMode::Direct => direct(entry, raw),
        TransferMode::EnumTranslate => enum_translate(entry, raw),
        TransferMode::TextFlatten => text_flatten(entry, raw, source_field),
    }
}

fn destination_field_id(entry: &FieldMappingEntry, raw: &SourceFieldValue) -> Option<i64> {
    if entry.kommo_field_id.is_none() {
        debug!(
            "Field {} has no confirmed destination, value not transferred",
            raw.field_id
        );
    }
    entry.kommo_field_id
}

/// Type-preserving copy. Epoch and ISO date forms pass through unchanged;
/// the destination API accepts both.
fn direct(entry: &FieldMappingEntry, raw: &SourceFieldValue) -> TransformOutput {
    let Some(field_id) = destination_field_id(entry, raw) else {
        return TransformOutput::absent();
    };
    let values: Vec<DestinationValue> = raw
        .values
        .iter()
        .filter_map(|v| v.value.clone())
        .map(|value| DestinationValue { value })
        .collect();
    if values.is_empty() {
        return TransformOutput::absent();
    }
    TransformOutput {
        value: Some(DestinationFieldValue { field_id, values }),
        warnings: Vec::new(),
    }
}

/// Translate enum ids through the entry's `enumMap`. Unmapped ids are
/// dropped with a warning, never propagated as garbage ids. When the
/// destination accepts a single value, only the first mapped selection is
/// kept; the narrowing is a documented policy, not an accident.
fn enum_translate(entry: &FieldMappingEntry, raw: &SourceFieldValue) -> TransformOutput {
    let Some(field_id) = destination_field_id(entry, raw) else {
        return TransformOutput::absent();
    };

    let selected: Vec<String> = raw
        .values
        .iter()
        .filter_map(|v| {
            v.id.clone().or_else(|| match &v.value {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Number(n)) => Some(n.to_string()),
                _ => None,
            })
        })
        .collect();

    let mut mapped: Vec<String> = Vec::new();
    let mut dropped: Vec<String> = Vec::new();
    for id in selected {
        match entry.enum_map.get(&id) {
            Some(Some(dest)) => mapped.push(enum_ref_id(dest).to_string()),
            _ => dropped.push(id),
        }
    }

    let mut warnings = Vec::new();
    if !dropped.is_empty() {
        warnings.push(format!(
            "{} value(s) dropped: no destination enum for '{}'",
            dropped.len(),
            dropped.join("', '")
        ));
    }

    if entry.kommo_field_type.is_single_enum() && mapped.len() > 1 {
        let discarded = mapped.len() - 1;
        mapped.truncate(1);
        warnings.push(format!(
            "{} value(s) discarded: destination field accepts a single value",
            discarded
        ));
    }

    if mapped.is_empty() {
        return TransformOutput {
            value: None,
            warnings,
        };
    }

    let values = mapped
        .into_iter()
        .map(|id| DestinationValue {
            value: Value::String(id),
        })
        .collect();
    TransformOutput {
        value: Some(DestinationFieldValue { field_id, values }),
        warnings,
    }
}

/// Flatten enum labels or checkbox state into free text. Multi-value
/// selections are joined with a fixed delimiter.
fn text_flatten(
    entry: &FieldMappingEntry,
    raw: &SourceFieldValue,
    source_field: Option<&FieldDescriptor>,
) -> TransformOutput {
    let Some(field_id) = destination_field_id(entry, raw) else {
        return TransformOutput::absent();
    };

    let labels: Vec<String> = if entry.amo_field_type == FieldType::Checkbox {
        raw.values
            .first()
            .map(|v| vec![checkbox_label(v.value.as_ref()).to_string()])
            .unwrap_or_default()
    } else {
        raw.values
            .iter()
            .filter_map(|v| {
                match (&v.value, &v.id) {
                    // The source API often ships the label next to the id.
                    (Some(Value::String(s)), _) if !s.is_empty() => Some(s.clone()),
                    (_, Some(id)) => Some(
                        source_field
                            .and_then(|f| f.enum_label(id))
                            .unwrap_or(id)
                            .to_string(),
                    ),
                    (Some(other), None) => Some(json_to_text(other)),
                    _ => None,
                }
            })
            .collect()
    };

    if labels.is_empty() {
        return TransformOutput::absent();
    }

    TransformOutput {
        value: Some(DestinationFieldValue {
            field_id,
            values: vec![DestinationValue {
                value: Value::String(labels.join(", ")),
            }],
        }),
        warnings: Vec::new(),
    }
}

/// Checkbox values degrade to a human-readable flag, never to 0/1.
fn checkbox_label(value: Option<&Value>) -> &'static str {
    let truthy = match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_i64().map(|v| v != 0).unwrap_or(false),
        Some(Value::String(s)) => {
            matches!(s.to_lowercase().as_str(), "1" | "true" | "yes" | "y" | "да")
        }
        _ => false,
    };
    if truthy {
        "Yes"
    } else {
        "No"
    }
}

fn json_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
