//! Transfer orchestration.
//!
//! Drives the idempotent, partially-recoverable migration of a selection of
//! source entities: transform custom fields through the mapping store,
//! create destination entities, link relations, transfer notes and tasks,
//! and keep the migration index durable at every step. Entity failures are
//! isolated; a completed run always returns a [`TransferResult`], even when
//! every entity failed.

use crate::catalog::{EntityKind, FieldCatalog};
use crate::client::{CrmClient, Entity, EntityFilter, EntityRef, NewEntity, NewNote, NewTask};
use crate::config::RunConfig;
use crate::error::{MigrateError, Result};
use crate::index::MigrationIndex;
use crate::mapping::MappingStore;
use crate::transform;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{debug, info, warn};

/// Per-entity pipeline state. `FailedPartial` is terminal for the entity
/// and never aborts the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityPhase {
    PendingLookup,
    AlreadyMigrated,
    NeedsCreate,
    Created,
    Linking,
    NotesTransfer,
    TasksTransfer,
    Done,
    FailedPartial,
}

/// Entities transferred per kind, plus sub-object totals.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCounts {
    pub leads: usize,
    pub contacts: usize,
    pub companies: usize,
    pub notes: usize,
    pub tasks: usize,
}

impl TransferCounts {
    fn bump(&mut self, kind: EntityKind) {
        match kind {
            EntityKind::Leads => self.leads += 1,
            EntityKind::Contacts => self.contacts += 1,
            EntityKind::Companies => self.companies += 1,
        }
    }

    pub fn for_kind(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Leads => self.leads,
            EntityKind::Contacts => self.contacts,
            EntityKind::Companies => self.companies,
        }
    }
}

/// Fetched/transferred counters for notes or tasks of one parent kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubObjectDetail {
    pub fetched: usize,
    pub transferred: usize,
}

/// Result of one transfer run. Request-scoped; callers must inspect
/// `warnings` to learn about partial failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferResult {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub transferred: TransferCounts,
    pub created_ids: BTreeMap<EntityKind, Vec<i64>>,
    pub notes_detail: BTreeMap<EntityKind, SubObjectDetail>,
    pub tasks_detail: BTreeMap<EntityKind, SubObjectDetail>,
    pub warnings: Vec<String>,
}

impl TransferResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Outcome of one entity's pipeline, aggregated into the run result.
#[derive(Debug, Clone)]
struct EntityReport {
    entity: EntityRef,
    phase: EntityPhase,
    destination_id: Option<i64>,
    notes: SubObjectDetail,
    tasks: SubObjectDetail,
    warnings: Vec<String>,
}

impl EntityReport {
    fn new(entity: EntityRef) -> Self {
        Self {
            entity,
            phase: EntityPhase::PendingLookup,
            destination_id: None,
            notes: SubObjectDetail::default(),
            tasks: SubObjectDetail::default(),
            warnings: Vec::new(),
        }
    }
}

/// Migration orchestrator.
pub struct Orchestrator {
    source: Arc<dyn CrmClient>,
    destination: Arc<dyn CrmClient>,
    mappings: Arc<MappingStore>,
    index: Arc<Mutex<MigrationIndex>>,
    config: RunConfig,
}

impl Orchestrator {
    pub fn new(
        source: Arc<dyn CrmClient>,
        destination: Arc<dyn CrmClient>,
        mappings: MappingStore,
        index: MigrationIndex,
        config: RunConfig,
    ) -> Self {
        Self {
            source,
            destination,
            mappings: Arc::new(mappings),
            index: Arc::new(Mutex::new(index)),
            config,
        }
    }

    /// Transfer a selection of source entities.
    ///
    /// The selection is deduplicated and ordered so relation targets
    /// (contacts, companies) migrate before the leads that reference them.
    pub async fn run(
        &self,
        selection: Vec<EntityRef>,
        cancel: Option<watch::Receiver<bool>>,
    ) -> Result<TransferResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel = cancel.unwrap_or_else(|| {
            let (_, rx) = watch::channel(false);
            rx
        });

        info!("Starting transfer run {} ({} entities)", run_id, selection.len());

        let mut result = TransferResult {
            run_id,
            started_at,
            completed_at: started_at,
            duration_seconds: 0.0,
            transferred: TransferCounts::default(),
            created_ids: BTreeMap::new(),
            notes_detail: BTreeMap::new(),
            tasks_detail: BTreeMap::new(),
            warnings: Vec::new(),
        };

        // Relation targets first; duplicates dropped.
        let mut seen: HashSet<EntityRef> = HashSet::new();
        let mut by_kind: BTreeMap<EntityKind, Vec<i64>> = BTreeMap::new();
        for kind in EntityKind::ALL {
            for r in selection.iter().filter(|r| r.kind == kind) {
                if seen.insert(*r) {
                    by_kind.entry(kind).or_default().push(r.id);
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut cancelled = false;

        for kind in EntityKind::ALL {
            let Some(ids) = by_kind.get(&kind) else {
                continue;
            };
            if cancelled {
                break;
            }

            // Source field catalog for this kind, used for flatten labels.
            let catalog = match with_retry(&self.config, &format!("list fields for {}", kind), || {
                self.source.list_custom_fields(kind)
            })
            .await
            {
                Ok(fields) => Arc::new(FieldCatalog::new(kind, fields, Vec::new())),
                Err(e) => {
                    result
                        .warnings
                        .push(format!("{}: field catalog fetch failed: {}", kind, e));
                    Arc::new(FieldCatalog::new(kind, Vec::new(), Vec::new()))
                }
            };

            let filter = EntityFilter::by_ids(ids.clone());
            let entities = match with_retry(&self.config, &format!("fetch {}", kind), || {
                self.source.get_entities(kind, &filter)
            })
            .await
            {
                Ok(entities) => entities,
                Err(e) => {
                    result
                        .warnings
                        .push(format!("{}: source fetch failed, kind skipped: {}", kind, e));
                    continue;
                }
            };

            let mut fetched: HashMap<i64, Entity> =
                entities.into_iter().map(|e| (e.id, e)).collect();

            let mut handles = Vec::new();
            for id in ids {
                if *cancel.borrow() {
                    cancelled = true;
                    info!("Cancellation requested, no further entities scheduled");
                    break;
                }
                let Some(entity) = fetched.remove(id) else {
                    result
                        .warnings
                        .push(format!("{} {} not found in source, skipped", kind, id));
                    continue;
                };

                let permit = semaphore
                    .clone()
                    .acquire_owned()
                    .await
                    .map_err(|_| MigrateError::Cancelled)?;
                let source = self.source.clone();
                let destination = self.destination.clone();
                let mappings = self.mappings.clone();
                let index = self.index.clone();
                let catalog = catalog.clone();
                let config = self.config.clone();

                handles.push(tokio::spawn(async move {
                    let report = migrate_entity(
                        source,
                        destination,
                        mappings,
                        index,
                        catalog,
                        kind,
                        entity,
                        config,
                    )
                    .await;
                    drop(permit);
                    report
                }));
            }

            // One kind completes before the next begins, so leads always see
            // their contacts/companies in the index.
            for handle in handles {
                match handle.await {
                    Ok(report) => aggregate(&mut result, report),
                    Err(e) => result.warnings.push(format!("entity task panicked: {}", e)),
                }
            }
        }

        if cancelled {
            result.warnings.push("run cancelled by operator".to_string());
        }

        result.completed_at = Utc::now();
        result.duration_seconds =
            (result.completed_at - result.started_at).num_milliseconds() as f64 / 1000.0;

        info!(
            "Transfer run {} finished: {} leads, {} contacts, {} companies, {} notes, {} tasks, {} warning(s) in {:.1}s",
            result.run_id,
            result.transferred.leads,
            result.transferred.contacts,
            result.transferred.companies,
            result.transferred.notes,
            result.transferred.tasks,
            result.warnings.len(),
            result.duration_seconds
        );

        Ok(result)
    }
}

fn aggregate(result: &mut TransferResult, report: EntityReport) {
    let kind = report.entity.kind;
    if let Some(dest_id) = report.destination_id {
        result.transferred.bump(kind);
        result.created_ids.entry(kind).or_default().push(dest_id);
    }

    if report.notes.fetched > 0 {
        let detail = result.notes_detail.entry(kind).or_default();
        detail.fetched += report.notes.fetched;
        detail.transferred += report.notes.transferred;
        result.transferred.notes += report.notes.transferred;
    }
    if report.tasks.fetched > 0 {
        let detail = result.tasks_detail.entry(kind).or_default();
        detail.fetched += report.tasks.fetched;
        detail.transferred += report.tasks.transferred;
        result.transferred.tasks += report.tasks.transferred;
    }
    result.warnings.extend(report.warnings);
    debug!(
        "{} {}: phase {:?}",
        kind, report.entity.id, report.phase
    );
}

/// One entity's pipeline: `PendingLookup → AlreadyMigrated | NeedsCreate →
/// Created → Linking → NotesTransfer → TasksTransfer → Done`, with
/// `FailedPartial` reachable from any step. A create failure aborts the
/// remaining steps for this entity only.
#[allow(clippy::too_many_arguments)]
async fn migrate_entity(
    source: Arc<dyn CrmClient>,
    destination: Arc<dyn CrmClient>,
    mappings: Arc<MappingStore>,
    index: Arc<Mutex<MigrationIndex>>,
    catalog: Arc<FieldCatalog>,
    kind: EntityKind,
    entity: Entity,
    config: RunConfig,
) -> EntityReport {
    let entity_ref = EntityRef {
        kind,
        id: entity.id,
    };
    let mut report = EntityReport::new(entity_ref);

    // Idempotence check: the primary replay-safety guarantee.
    {
        let index = index.lock().await;
        if let Some(existing) = index.lookup(kind, entity.id) {
            debug!(
                "{} {} already migrated as {}, skipping",
                kind, entity.id, existing
            );
            report.phase = EntityPhase::AlreadyMigrated;
            return report;
        }
    }

    // Transform custom-field values into the destination payload.
    let mut custom_fields = Vec::new();
    for raw in &entity.custom_fields {
        let Some(entry) = mappings.get(kind, raw.field_id) else {
            debug!("{} {}: no mapping for field {}", kind, entity.id, raw.field_id);
            continue;
        };
        let out = transform::transform(entry, raw, catalog.field_by_id(raw.field_id));
        for w in out.warnings {
            report.warnings.push(format!("{} {}: {}", kind, entity.id, w));
        }
        if let Some(value) = out.value {
            custom_fields.push(value);
        }
    }

    report.phase = EntityPhase::NeedsCreate;
    let payload = NewEntity {
        name: entity.name.clone(),
        custom_fields,
    };

    let context = format!("create {} {}", kind, entity.id);
    let created = with_retry(&config, &context, || {
        destination.create_batch(kind, std::slice::from_ref(&payload))
    })
    .await;

    let mut destination_id = match created.map(|acks| acks.first().copied()) {
        Ok(Some(ack)) => ack.id,
        Ok(None) => {
            report
                .warnings
                .push(format!("{}: empty acknowledgement from destination", context));
            report.phase = EntityPhase::FailedPartial;
            return report;
        }
        Err(e) => {
            report.warnings.push(format!("{}: {}", context, e));
            report.phase = EntityPhase::FailedPartial;
            return report;
        }
    };

    // Index write only after the create is acknowledged; it must be durable
    // before the pipeline advances past Created. An entity whose index entry
    // never reached disk is not replay-safe, so it is reported as failed and
    // its sub-steps do not run.
    {
        let mut index = index.lock().await;
        match index.record(kind, entity.id, destination_id) {
            Ok(_) => {
                if let Err(e) = index.save() {
                    report.warnings.push(format!(
                        "{} {}: index save failed, transfer not replay-safe: {}",
                        kind, entity.id, e
                    ));
                    report.phase = EntityPhase::FailedPartial;
                    return report;
                }
            }
            Err(MigrateError::IndexConflict { existing, .. }) => {
                // Indexed concurrently with the same source id: keep the
                // first destination, treat as success.
                destination_id = existing;
            }
            Err(e) => {
                report
                    .warnings
                    .push(format!("{} {}: index write failed: {}", kind, entity.id, e));
                report.phase = EntityPhase::FailedPartial;
                return report;
            }
        }
    }
    report.phase = EntityPhase::Created;
    report.destination_id = Some(destination_id);

    let mut failed = false;

    // Link relations (leads only), resolved through the index.
    if kind == EntityKind::Leads
        && (!entity.linked_contact_ids.is_empty() || !entity.linked_company_ids.is_empty())
    {
        report.phase = EntityPhase::Linking;
        let (contact_ids, company_ids) = {
            let index = index.lock().await;
            let mut contacts = Vec::new();
            for id in &entity.linked_contact_ids {
                match index.lookup(EntityKind::Contacts, *id) {
                    Some(dest) => contacts.push(dest),
                    None => report.warnings.push(format!(
                        "lead {}: related contact {} not migrated, relation left unresolved",
                        entity.id, id
                    )),
                }
            }
            let mut companies = Vec::new();
            for id in &entity.linked_company_ids {
                match index.lookup(EntityKind::Companies, *id) {
                    Some(dest) => companies.push(dest),
                    None => report.warnings.push(format!(
                        "lead {}: related company {} not migrated, relation left unresolved",
                        entity.id, id
                    )),
                }
            }
            (contacts, companies)
        };

        if !contact_ids.is_empty() || !company_ids.is_empty() {
            let context = format!("link lead {}", entity.id);
            if let Err(e) = with_retry(&config, &context, || {
                destination.link_entities(destination_id, &contact_ids, &company_ids)
            })
            .await
            {
                report.warnings.push(format!("{}: {}", context, e));
                failed = true;
            }
        }
    }

    // Notes.
    report.phase = EntityPhase::NotesTransfer;
    let context = format!("notes for {} {}", kind, entity.id);
    match with_retry(&config, &context, || source.list_notes(kind, entity.id)).await {
        Ok(notes) => {
            report.notes.fetched = notes.len();
            if !notes.is_empty() {
                let payload: Vec<NewNote> = notes
                    .into_iter()
                    .map(|n| NewNote {
                        entity_id: destination_id,
                        note_type: n.note_type,
                        text: n.text,
                    })
                    .collect();
                match with_retry(&config, &context, || {
                    destination.create_notes(kind, &payload)
                })
                .await
                {
                    Ok(n) => report.notes.transferred = n,
                    Err(e) => {
                        report.warnings.push(format!("{}: {}", context, e));
                        failed = true;
                    }
                }
            }
        }
        Err(e) => {
            report.warnings.push(format!("{}: {}", context, e));
            failed = true;
        }
    }

    // Tasks, tracked separately per owning kind.
    report.phase = EntityPhase::TasksTransfer;
    let context = format!("tasks for {} {}", kind, entity.id);
    match with_retry(&config, &context, || source.list_tasks(kind, entity.id)).await {
        Ok(tasks) => {
            report.tasks.fetched = tasks.len();
            if !tasks.is_empty() {
                let payload: Vec<NewTask> = tasks
                    .into_iter()
                    .map(|t| NewTask {
                        entity_id: destination_id,
                        entity_kind: kind,
                        text: t.text,
                        complete_till: t.complete_till,
                    })
                    .collect();
                match with_retry(&config, &context, || destination.create_tasks(&payload)).await {
                    Ok(n) => report.tasks.transferred = n,
                    Err(e) => {
                        report.warnings.push(format!("{}: {}", context, e));
                        failed = true;
                    }
                }
            }
        }
        Err(e) => {
            report.warnings.push(format!("{}: {}", context, e));
            failed = true;
        }
    }

    report.phase = if failed {
        EntityPhase::FailedPartial
    } else {
        EntityPhase::Done
    };
    report
}

/// Run a remote call with an explicit timeout and bounded retries.
/// Transient failures (timeouts, 5xx-equivalents) retry with linear
/// backoff; rejections surface immediately with the remote detail intact.
async fn with_retry<T, F, Fut>(config: &RunConfig, context: &str, op: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let timeout = Duration::from_secs(config.request_timeout_secs);
    let attempts = config.retry_attempts.max(1);
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        let outcome = match tokio::time::timeout(timeout, op()).await {
            Ok(result) => result,
            Err(_) => Err(MigrateError::transient(
                context,
                format!("timed out after {}s", config.request_timeout_secs),
            )),
        };
        match outcome {
            Err(e) if e.is_transient() && attempt < attempts => {
                warn!("{}: attempt {} failed, retrying: {}", context, attempt, e);
                tokio::time::sleep(Duration::from_millis(200 * attempt as u64)).await;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EnumValue, FieldDescriptor, FieldType};
    use crate::client::mock::MockCrm;
    use crate::client::{SourceFieldValue, SourceValue};
    use crate::mapping::{FieldMappingEntry, TransferMode};
    use serde_json::json;
    use tempfile::tempdir;

    fn lead_source_field() -> FieldDescriptor {
        FieldDescriptor {
            id: 703925,
            name: "Source".into(),
            code: Some("SOURCE".into()),
            field_type: FieldType::Multiselect,
            group_id: None,
            enumerated_values: vec![
                EnumValue {
                    id: "A".into(),
                    value: "Web".into(),
                },
                EnumValue {
                    id: "B".into(),
                    value: "Fax".into(),
                },
            ],
            is_system_only: false,
        }
    }

    fn lead_mapping() -> MappingStore {
        let mut store = MappingStore::new();
        store
            .confirm(
                EntityKind::Leads,
                703925,
                FieldMappingEntry {
                    kommo_field_id: Some(918715),
                    amo_field_name: "Source".into(),
                    kommo_field_name: "Source".into(),
                    amo_field_type: FieldType::Multiselect,
                    kommo_field_type: FieldType::Select,
                    transfer_mode: TransferMode::EnumTranslate,
                    enum_map: [
                        ("A".to_string(), Some("918715:1".to_string())),
                        ("B".to_string(), None),
                    ]
                    .into_iter()
                    .collect(),
                },
            )
            .unwrap();
        store
    }

    fn lead_31635363() -> Entity {
        Entity {
            id: 31635363,
            name: "Big deal".into(),
            custom_fields: vec![SourceFieldValue {
                field_id: 703925,
                values: vec![SourceValue::enum_id("A"), SourceValue::enum_id("B")],
            }],
            linked_contact_ids: vec![555],
            linked_company_ids: vec![],
        }
    }

    fn contact_555() -> Entity {
        Entity {
            id: 555,
            name: "Jane".into(),
            custom_fields: vec![],
            linked_contact_ids: vec![],
            linked_company_ids: vec![],
        }
    }

    fn orchestrator(
        source: MockCrm,
        destination: MockCrm,
        mappings: MappingStore,
        index: MigrationIndex,
    ) -> (Orchestrator, Arc<MockCrm>) {
        let destination = Arc::new(destination);
        let orch = Orchestrator::new(
            Arc::new(source),
            destination.clone(),
            mappings,
            index,
            RunConfig {
                workers: 2,
                retry_attempts: 3,
                request_timeout_secs: 5,
            },
        );
        (orch, destination)
    }

    fn selection() -> Vec<EntityRef> {
        // Deliberately lead-first: the orchestrator must reorder.
        vec![
            EntityRef {
                kind: EntityKind::Leads,
                id: 31635363,
            },
            EntityRef {
                kind: EntityKind::Contacts,
                id: 555,
            },
        ]
    }

    #[tokio::test]
    async fn transfers_links_notes_and_tasks() {
        let source = MockCrm::new()
            .with_fields(EntityKind::Leads, vec![lead_source_field()])
            .with_entity(EntityKind::Leads, lead_31635363())
            .with_entity(EntityKind::Contacts, contact_555())
            .with_notes(
                EntityKind::Leads,
                31635363,
                vec![crate::client::Note {
                    id: 1,
                    entity_id: 31635363,
                    note_type: "common".into(),
                    text: "called twice".into(),
                }],
            )
            .with_tasks(
                EntityKind::Contacts,
                555,
                vec![crate::client::Task {
                    id: 2,
                    entity_id: 555,
                    text: "follow up".into(),
                    complete_till: None,
                }],
            );
        let (orch, destination) =
            orchestrator(source, MockCrm::new(), lead_mapping(), MigrationIndex::new());

        let result = orch.run(selection(), None).await.unwrap();

        assert_eq!(result.transferred.leads, 1);
        assert_eq!(result.transferred.contacts, 1);
        assert_eq!(result.transferred.notes, 1);
        assert_eq!(result.transferred.tasks, 1);

        // Lead payload per the enum translation: field 918715, value "1",
        // with the unmapped 'B' selection dropped.
        let created = destination.created(EntityKind::Leads);
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].custom_fields.len(), 1);
        assert_eq!(created[0].custom_fields[0].field_id, 918715);
        assert_eq!(created[0].custom_fields[0].values[0].value, json!("1"));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("1 value(s) dropped: no destination enum for 'B'")));

        // Contact migrated before the lead, so the relation resolved.
        let links = destination.links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].1.len(), 1);

        assert_eq!(result.notes_detail[&EntityKind::Leads].fetched, 1);
        assert_eq!(result.notes_detail[&EntityKind::Leads].transferred, 1);
        assert_eq!(result.tasks_detail[&EntityKind::Contacts].transferred, 1);
        assert_eq!(destination.created_notes().len(), 1);
        assert_eq!(destination.created_tasks()[0].entity_kind, EntityKind::Contacts);
    }

    #[tokio::test]
    async fn second_run_is_a_noop() {
        let dir = tempdir().unwrap();
        let index_path = dir.path().join("index.json");

        let source = MockCrm::new()
            .with_entity(EntityKind::Leads, lead_31635363())
            .with_entity(EntityKind::Contacts, contact_555());
        let (orch, destination) = orchestrator(
            source,
            MockCrm::new(),
            lead_mapping(),
            MigrationIndex::load(&index_path).unwrap(),
        );

        let first = orch.run(selection(), None).await.unwrap();
        assert_eq!(first.transferred.leads, 1);
        let index_after_first = std::fs::read_to_string(&index_path).unwrap();

        let second = orch.run(selection(), None).await.unwrap();
        assert_eq!(second.transferred.leads, 0);
        assert_eq!(second.transferred.contacts, 0);
        assert_eq!(second.transferred.notes, 0);
        assert!(second.created_ids.is_empty());

        // No duplicate destination entities, identical index contents.
        assert_eq!(destination.created(EntityKind::Leads).len(), 1);
        assert_eq!(destination.created(EntityKind::Contacts).len(), 1);
        assert_eq!(
            std::fs::read_to_string(&index_path).unwrap(),
            index_after_first
        );
    }

    #[tokio::test]
    async fn preindexed_lead_is_never_recreated() {
        let mut index = MigrationIndex::new();
        index.record(EntityKind::Leads, 31635363, 9000001).unwrap();

        let source = MockCrm::new().with_entity(EntityKind::Leads, lead_31635363());
        let (orch, destination) = orchestrator(source, MockCrm::new(), lead_mapping(), index);

        let result = orch
            .run(
                vec![EntityRef {
                    kind: EntityKind::Leads,
                    id: 31635363,
                }],
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.transferred.leads, 0);
        assert!(destination.created(EntityKind::Leads).is_empty());
    }

    #[tokio::test]
    async fn create_failure_is_isolated_to_the_entity() {
        let source = MockCrm::new()
            .with_entity(EntityKind::Leads, lead_31635363())
            .with_entity(EntityKind::Contacts, contact_555());
        let destination = MockCrm::new()
            .reject_creates(EntityKind::Contacts, "422 custom_fields_invalid");
        let (orch, destination) =
            orchestrator(source, destination, lead_mapping(), MigrationIndex::new());

        let result = orch.run(selection(), None).await.unwrap();

        // Contact failed, lead still migrated; the remote detail survives
        // verbatim and the relation is reported unresolved.
        assert_eq!(result.transferred.contacts, 0);
        assert_eq!(result.transferred.leads, 1);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("422 custom_fields_invalid")));
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("related contact 555 not migrated")));
        assert!(destination.links().is_empty());
    }

    #[tokio::test]
    async fn transient_create_failure_is_retried() {
        let source = MockCrm::new().with_entity(EntityKind::Contacts, contact_555());
        let destination = MockCrm::new().fail_creates_transiently(EntityKind::Contacts, 1);
        let (orch, destination) =
            orchestrator(source, destination, MappingStore::new(), MigrationIndex::new());

        let result = orch
            .run(
                vec![EntityRef {
                    kind: EntityKind::Contacts,
                    id: 555,
                }],
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.transferred.contacts, 1);
        assert_eq!(destination.created(EntityKind::Contacts).len(), 1);
    }

    #[tokio::test]
    async fn index_save_failure_fails_the_entity() {
        // Index bound to a directory that does not exist: every save fails.
        let index = MigrationIndex::new()
            .with_path("/nonexistent-kommo-migrate-dir/index.json".into());
        let source = MockCrm::new().with_entity(EntityKind::Contacts, contact_555());
        let (orch, destination) =
            orchestrator(source, MockCrm::new(), MappingStore::new(), index);

        let result = orch
            .run(
                vec![EntityRef {
                    kind: EntityKind::Contacts,
                    id: 555,
                }],
                None,
            )
            .await
            .unwrap();

        // The create happened, but without a durable index entry the
        // transfer is not replay-safe: the entity is reported as failed,
        // not counted, and its notes/tasks steps never run.
        assert_eq!(destination.created(EntityKind::Contacts).len(), 1);
        assert_eq!(result.transferred.contacts, 0);
        assert!(result.created_ids.is_empty());
        assert!(result.notes_detail.is_empty());
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("index save failed, transfer not replay-safe")));
    }

    #[tokio::test(start_paused = true)]
    async fn create_timeout_degrades_to_warning() {
        let source = MockCrm::new().with_entity(EntityKind::Contacts, contact_555());
        let destination = MockCrm::new()
            .delay_creates(EntityKind::Contacts, Duration::from_secs(60));
        let (orch, destination) =
            orchestrator(source, destination, MappingStore::new(), MigrationIndex::new());

        let result = orch
            .run(
                vec![EntityRef {
                    kind: EntityKind::Contacts,
                    id: 555,
                }],
                None,
            )
            .await
            .unwrap();

        // Every attempt times out; the entity degrades to a warning instead
        // of failing the run, and nothing lands on the destination.
        assert_eq!(result.transferred.contacts, 0);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("timed out after 5s")));
        assert!(destination.created(EntityKind::Contacts).is_empty());
    }

    #[tokio::test]
    async fn cancelled_run_stops_scheduling() {
        let source = MockCrm::new()
            .with_entity(EntityKind::Leads, lead_31635363())
            .with_entity(EntityKind::Contacts, contact_555());
        let (orch, _destination) =
            orchestrator(source, MockCrm::new(), lead_mapping(), MigrationIndex::new());

        let (tx, rx) = watch::channel(true);
        let result = orch.run(selection(), Some(rx)).await.unwrap();
        drop(tx);

        assert_eq!(result.transferred.leads + result.transferred.contacts, 0);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("cancelled")));
    }

    #[tokio::test]
    async fn missing_source_entity_warns_and_continues() {
        let source = MockCrm::new().with_entity(EntityKind::Contacts, contact_555());
        let (orch, _) = orchestrator(
            source,
            MockCrm::new(),
            MappingStore::new(),
            MigrationIndex::new(),
        );

        let result = orch
            .run(
                vec![
                    EntityRef {
                        kind: EntityKind::Contacts,
                        id: 555,
                    },
                    EntityRef {
                        kind: EntityKind::Contacts,
                        id: 556,
                    },
                ],
                None,
            )
            .await
            .unwrap();

        assert_eq!(result.transferred.contacts, 1);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.contains("556 not found in source")));
    }
}
