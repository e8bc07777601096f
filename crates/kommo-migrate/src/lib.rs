//! # kommo-migrate
//!
//! Field reconciliation and transfer engine for migrating CRM records
//! (leads, contacts, companies, their notes and tasks) from an amoCRM
//! account to a Kommo account with a structurally different custom-field
//! schema.
//!
//! The engine covers three concerns:
//!
//! - **Reconciliation**: classify every source custom field against the
//!   destination catalog by code, exact name, cross-language synonym
//!   cluster, or a previously confirmed mapping
//! - **Value transformation**: convert field values across type boundaries
//!   (multi-select → single-select, select → free text, checkbox → text)
//!   and enumerated-value vocabularies
//! - **Orchestration**: idempotent, partially-recoverable batch transfer
//!   with bounded fan-out, relation linking, and notes/tasks migration
//!
//! The raw HTTP clients for each CRM vendor are external collaborators
//! behind the [`CrmClient`] trait.
//!
//! ## Example
//!
//! ```rust,no_run
//! use kommo_migrate::{Config, MappingStore, MigrationIndex, Orchestrator};
//! use std::sync::Arc;
//!
//! # async fn run(source: Arc<dyn kommo_migrate::CrmClient>,
//! #              destination: Arc<dyn kommo_migrate::CrmClient>,
//! #              selection: Vec<kommo_migrate::EntityRef>) -> kommo_migrate::Result<()> {
//! let config = Config::load("config.yaml")?;
//! let mappings = MappingStore::load(&config.mapping_file)?;
//! let index = MigrationIndex::load(&config.index_file)?;
//!
//! let orchestrator = Orchestrator::new(source, destination, mappings, index, config.migration);
//! let result = orchestrator.run(selection, None).await?;
//! println!("Transferred {} leads, {} warnings", result.transferred.leads, result.warnings.len());
//! # Ok(())
//! # }
//! ```

pub mod catalog;
pub mod client;
pub mod config;
pub mod error;
pub mod index;
pub mod mapping;
pub mod orchestrator;
pub mod reconcile;
pub mod transform;

// Re-exports for convenient access
pub use catalog::{EntityKind, EnumValue, FieldCatalog, FieldDescriptor, FieldGroup, FieldType};
pub use client::{CrmClient, Entity, EntityFilter, EntityRef};
pub use config::{ClientConfig, Config, RunConfig};
pub use error::{MigrateError, Result};
pub use index::MigrationIndex;
pub use mapping::{FieldMappingEntry, MappingStore, TransferMode};
pub use orchestrator::{Orchestrator, TransferCounts, TransferResult};
pub use reconcile::{analyze, reconcile, AnalysisReport, FieldClassification, MatchedVia};
pub use transform::{transfer_mode_for, transform, TransformOutput};
