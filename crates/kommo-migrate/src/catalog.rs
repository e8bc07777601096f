//! Custom-field catalog snapshots.
//!
//! A [`FieldCatalog`] is an immutable snapshot of every custom-field
//! definition for one entity kind on one CRM side, taken at one point in
//! time. Catalogs are the sole input to the reconciler; they are never
//! mutated after fetch.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Entity kinds that carry custom fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Leads,
    Contacts,
    Companies,
}

impl EntityKind {
    /// All kinds, in relation-safe migration order (relation targets first).
    pub const ALL: [EntityKind; 3] = [EntityKind::Contacts, EntityKind::Companies, EntityKind::Leads];

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Leads => "leads",
            EntityKind::Contacts => "contacts",
            EntityKind::Companies => "companies",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Closed set of custom-field types.
///
/// Unknown type strings fail deserialization, so malformed catalogs and
/// mapping entries are rejected at load time rather than probed at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Text,
    Numeric,
    Checkbox,
    Select,
    Multiselect,
    Radiobutton,
    Date,
    DateTime,
    Url,
    Textarea,
    Birthday,
}

impl FieldType {
    /// Field carries an enumerated-value vocabulary.
    pub fn is_enumerated(&self) -> bool {
        matches!(
            self,
            FieldType::Select | FieldType::Multiselect | FieldType::Radiobutton
        )
    }

    /// Enumerated field that accepts exactly one value.
    pub fn is_single_enum(&self) -> bool {
        matches!(self, FieldType::Select | FieldType::Radiobutton)
    }

    /// Free-text destination that can absorb flattened values.
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::Text | FieldType::Textarea | FieldType::Url)
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FieldType::Text => "text",
            FieldType::Numeric => "numeric",
            FieldType::Checkbox => "checkbox",
            FieldType::Select => "select",
            FieldType::Multiselect => "multiselect",
            FieldType::Radiobutton => "radiobutton",
            FieldType::Date => "date",
            FieldType::DateTime => "date_time",
            FieldType::Url => "url",
            FieldType::Textarea => "textarea",
            FieldType::Birthday => "birthday",
        };
        f.write_str(s)
    }
}

/// One enumerated value of a select-like field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnumValue {
    pub id: String,
    pub value: String,
}

/// Immutable snapshot of one custom-field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    pub id: i64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub enumerated_values: Vec<EnumValue>,
    #[serde(default)]
    pub is_system_only: bool,
}

impl FieldDescriptor {
    /// Look up the human-readable label for an enum id.
    pub fn enum_label(&self, enum_id: &str) -> Option<&str> {
        self.enumerated_values
            .iter()
            .find(|e| e.id == enum_id)
            .map(|e| e.value.as_str())
    }
}

/// A field group as reported by the CRM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldGroup {
    pub id: String,
    pub name: String,
}

/// Snapshot of all custom fields for one entity kind on one CRM side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCatalog {
    pub kind: EntityKind,
    pub fields: Vec<FieldDescriptor>,
    #[serde(default)]
    pub groups: Vec<FieldGroup>,
}

impl FieldCatalog {
    pub fn new(kind: EntityKind, fields: Vec<FieldDescriptor>, groups: Vec<FieldGroup>) -> Self {
        Self {
            kind,
            fields,
            groups,
        }
    }

    pub fn field_by_id(&self, id: i64) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|f| f.id == id)
    }

    /// Resolve a group id to its display name.
    pub fn group_name(&self, group_id: &str) -> Option<&str> {
        self.groups
            .iter()
            .find(|g| g.id == group_id)
            .map(|g| g.name.as_str())
    }

    /// Group name for a field, if the field belongs to a known group.
    pub fn group_name_of(&self, field: &FieldDescriptor) -> Option<&str> {
        field.group_id.as_deref().and_then(|id| self.group_name(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_type_wire_names() {
        assert_eq!(
            serde_json::to_string(&FieldType::DateTime).unwrap(),
            "\"date_time\""
        );
        assert_eq!(
            serde_json::from_str::<FieldType>("\"multiselect\"").unwrap(),
            FieldType::Multiselect
        );
        assert!(serde_json::from_str::<FieldType>("\"smart_address\"").is_err());
    }

    #[test]
    fn field_type_predicates() {
        assert!(FieldType::Multiselect.is_enumerated());
        assert!(FieldType::Radiobutton.is_single_enum());
        assert!(!FieldType::Multiselect.is_single_enum());
        assert!(FieldType::Textarea.is_textual());
        assert!(!FieldType::Checkbox.is_textual());
    }

    #[test]
    fn catalog_lookups() {
        let catalog = FieldCatalog::new(
            EntityKind::Leads,
            vec![FieldDescriptor {
                id: 7,
                name: "Source".into(),
                code: Some("SOURCE".into()),
                field_type: FieldType::Select,
                group_id: Some("g1".into()),
                enumerated_values: vec![EnumValue {
                    id: "1".into(),
                    value: "Web".into(),
                }],
                is_system_only: false,
            }],
            vec![FieldGroup {
                id: "g1".into(),
                name: "Statistics".into(),
            }],
        );

        let field = catalog.field_by_id(7).unwrap();
        assert_eq!(field.enum_label("1"), Some("Web"));
        assert_eq!(catalog.group_name_of(field), Some("Statistics"));
        assert!(catalog.field_by_id(8).is_none());
    }
}
