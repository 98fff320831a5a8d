//! Record lifecycle services: save, fetch, hide and guarded delete.
//!
//! State per record: unsaved → active (save) → hidden (hide). Hiding never
//! cascades to a patient's clinical records. Hard-deleting a patient that
//! still owns clinical records requires an explicit cascade.

mod clinical;
mod patients;

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::config::StoreConfig;
use crate::db::{DbError, Document, DocumentStore};
use crate::models::{ModelError, PatientRecord, Record, RecordKind};

/// Service errors.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Malformed record: {0}")]
    Model(#[from] ModelError),

    #[error(
        "Unable to delete patient record with ID {patient_id}, {ehr_records} EHR records still connected"
    )]
    CascadeDelete {
        patient_id: String,
        ehr_records: usize,
    },

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("{0:?} record has no id")]
    Unsaved(RecordKind),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// Result of a save request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Record written; its id is now set
    Created,
    /// The store already holds this id; nothing was written
    AlreadyStored,
}

/// Refuse to hard-delete a patient that still owns clinical records unless
/// `cascade` is requested. Never deletes anything itself.
pub fn check_cascade_guard(patient: &PatientRecord, cascade: bool) -> ServiceResult<()> {
    if cascade || !patient.has_ehr_records() {
        return Ok(());
    }
    Err(cascade_refused(
        patient.record_id().unwrap_or_default(),
        patient.ehr_records.len(),
    ))
}

fn cascade_refused(patient_id: &str, ehr_records: usize) -> ServiceError {
    warn!(
        patient_id = %patient_id,
        ehr_records,
        "refusing to delete patient with connected EHR records"
    );
    ServiceError::CascadeDelete {
        patient_id: patient_id.to_string(),
        ehr_records,
    }
}

/// Lifecycle operations over a document store.
pub struct RecordService<'a, S: DocumentStore + ?Sized> {
    store: &'a S,
    patients_collection: String,
    ehr_collection: String,
}

impl<'a, S: DocumentStore + ?Sized> RecordService<'a, S> {
    /// Create a service using the default collections.
    pub fn new(store: &'a S) -> Self {
        Self::with_config(store, &StoreConfig::default())
    }

    /// Create a service using the collections named in `config`.
    pub fn with_config(store: &'a S, config: &StoreConfig) -> Self {
        Self {
            store,
            patients_collection: config.patients_collection().to_string(),
            ehr_collection: config.ehr_collection().to_string(),
        }
    }

    pub fn patients_collection(&self) -> &str {
        &self.patients_collection
    }

    pub fn ehr_collection(&self) -> &str {
        &self.ehr_collection
    }

    /// Add `document` unless the store already holds `id`.
    fn add_if_absent(
        &self,
        collection: &str,
        id: Option<&str>,
        document: &Document,
    ) -> ServiceResult<(SaveOutcome, String)> {
        if let Some(id) = id {
            if self.store.get_by_id(collection, id)?.is_some() {
                warn!(
                    record_id = %id,
                    collection = %collection,
                    "record already stored, save skipped"
                );
                return Ok((SaveOutcome::AlreadyStored, id.to_string()));
            }
        }
        let id = self.store.add(collection, document)?;
        Ok((SaveOutcome::Created, id))
    }
}

fn require_id<R: Record + ?Sized>(record: &R) -> ServiceResult<String> {
    record
        .record_id()
        .map(str::to_string)
        .ok_or(ServiceError::Unsaved(record.kind()))
}

fn into_document(value: Value) -> Document {
    match value {
        Value::Object(members) => members,
        _ => Document::new(),
    }
}

fn is_active(document: &Document) -> bool {
    document.get("active") == Some(&Value::Bool(true))
}

/// Patch refreshing lifecycle fields after a hide.
fn lifecycle_patch(active: bool, last_update: f64) -> Document {
    let mut patch = Document::new();
    patch.insert("active".into(), Value::Bool(active));
    patch.insert("last_update".into(), last_update.into());
    patch
}
