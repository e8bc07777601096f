//! Capability surface consumed from each CRM vendor client.
//!
//! The raw HTTP clients (authentication, pagination, rate limiting) are
//! external collaborators; the engine only depends on this trait. Both the
//! source and the destination account expose the same surface.

use crate::catalog::{EntityKind, FieldDescriptor, FieldGroup};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Reference to one entity in the source account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: i64,
}

/// Selection filter for entity fetches. Pagination is the client's concern;
/// the returned list is always complete for the filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<i64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
}

impl EntityFilter {
    pub fn by_ids(ids: Vec<i64>) -> Self {
        Self {
            ids: Some(ids),
            query: None,
        }
    }
}

/// One raw value of a custom field on a source entity. Enumerated fields
/// carry the enum id; free-form fields carry the value itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceValue {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl SourceValue {
    pub fn enum_id(id: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            value: None,
        }
    }

    pub fn plain(value: serde_json::Value) -> Self {
        Self {
            id: None,
            value: Some(value),
        }
    }
}

/// A custom-field value list as it appears on a source entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceFieldValue {
    pub field_id: i64,
    pub values: Vec<SourceValue>,
}

/// A custom-field value list in destination shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationFieldValue {
    pub field_id: i64,
    pub values: Vec<DestinationValue>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationValue {
    pub value: serde_json::Value,
}

/// One source entity with its custom fields and relations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub custom_fields: Vec<SourceFieldValue>,
    #[serde(default)]
    pub linked_contact_ids: Vec<i64>,
    #[serde(default)]
    pub linked_company_ids: Vec<i64>,
}

/// Payload for a batch create on the destination side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntity {
    pub name: String,
    #[serde(default)]
    pub custom_fields: Vec<DestinationFieldValue>,
}

/// Payload for a batch update on the destination side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateEntity {
    pub id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub custom_fields: Vec<DestinationFieldValue>,
}

/// Acknowledgement of one created entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedEntity {
    pub id: i64,
}

/// A note attached to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: i64,
    pub entity_id: i64,
    pub note_type: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewNote {
    pub entity_id: i64,
    pub note_type: String,
    pub text: String,
}

/// A task attached to an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    pub entity_id: i64,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_till: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewTask {
    pub entity_id: i64,
    pub entity_kind: EntityKind,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub complete_till: Option<DateTime<Utc>>,
}

/// Capability surface of one CRM account.
///
/// Implementations own pagination and rate-limit handling; every method
/// is an asynchronous I/O boundary and must honor the caller's timeout.
#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Custom-field definitions for one entity kind (all pages aggregated).
    async fn list_custom_fields(&self, kind: EntityKind) -> Result<Vec<FieldDescriptor>>;

    /// Field groups for one entity kind.
    async fn list_field_groups(&self, kind: EntityKind) -> Result<Vec<FieldGroup>>;

    /// Entities matching a filter (all pages aggregated).
    async fn get_entities(&self, kind: EntityKind, filter: &EntityFilter) -> Result<Vec<Entity>>;

    /// Batch-create entities; returns one acknowledgement per payload item,
    /// in payload order.
    async fn create_batch(
        &self,
        kind: EntityKind,
        payload: &[NewEntity],
    ) -> Result<Vec<CreatedEntity>>;

    /// Batch-update existing entities; returns the updated ids.
    async fn update_batch(&self, kind: EntityKind, payload: &[UpdateEntity]) -> Result<Vec<i64>>;

    /// Notes attached to one entity.
    async fn list_notes(&self, kind: EntityKind, entity_id: i64) -> Result<Vec<Note>>;

    /// Batch-create notes; returns the number created.
    async fn create_notes(&self, kind: EntityKind, payload: &[NewNote]) -> Result<usize>;

    /// Tasks attached to one entity.
    async fn list_tasks(&self, kind: EntityKind, entity_id: i64) -> Result<Vec<Task>>;

    /// Batch-create tasks; returns the number created.
    async fn create_tasks(&self, payload: &[NewTask]) -> Result<usize>;

    /// Attach previously migrated contacts/companies to a lead.
    async fn link_entities(
        &self,
        lead_id: i64,
        contact_ids: &[i64],
        company_ids: &[i64],
    ) -> Result<()>;
}
