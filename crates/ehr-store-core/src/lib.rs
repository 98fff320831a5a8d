//! EHR Store Core Library
//!
//! Storage of clinical records as archetype instance trees, addressed through
//! patient-level aggregates and round-tripped to a JSON wire format.
//!
//! # Architecture
//!
//! ```text
//!   PatientRecord ──owns──▶ [ClinicalRecord, ...]
//!         │                        │
//!         │                        └─ ehr_data: ArchetypeNode
//!         │                                 └─ data: { field → value }
//!         │                                     value = scalar | list | map
//!         │                                           | ArchetypeNode (recursive)
//!         ▼
//!   RecordService ── save / get / hide / delete ──▶ DocumentStore
//!                                                     (SQLite documents table)
//! ```
//!
//! # Wire format
//!
//! - Archetype instance: `{"archetype": <string>, "data": <object>}`
//! - Clinical record: `{"creation_time", "last_update", "active", "id"?, "ehr_data"}`
//! - Patient record: `{"id", "creation_time", "last_update", "active", "ehr_records": [...]}`
//!
//! # Modules
//!
//! - [`models`]: Records, archetype trees and their codec
//! - [`db`]: Document store trait and SQLite implementation
//! - [`services`]: Record lifecycle (save, fetch, hide, guarded delete)
//! - [`config`]: Store configuration resolved at startup

pub mod config;
pub mod db;
pub mod models;
pub mod services;

// Re-export commonly used types
pub use config::StoreConfig;
pub use db::{Database, DocumentStore};
pub use models::{
    ArchetypeNode, ClinicalRecord, FieldValue, Fields, ModelError, PatientRecord, Record,
    RecordKind, RecordMeta, RecordState,
};
pub use services::{check_cascade_guard, RecordService, SaveOutcome, ServiceError};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::sync::{Arc, Mutex};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum EhrStoreError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Cascade delete refused: {0}")]
    CascadeDelete(String),
}

impl From<db::DbError> for EhrStoreError {
    fn from(e: db::DbError) -> Self {
        EhrStoreError::DatabaseError(e.to_string())
    }
}

impl From<serde_json::Error> for EhrStoreError {
    fn from(e: serde_json::Error) -> Self {
        EhrStoreError::SerializationError(e.to_string())
    }
}

impl From<ModelError> for EhrStoreError {
    fn from(e: ModelError) -> Self {
        EhrStoreError::InvalidInput(e.to_string())
    }
}

impl From<ServiceError> for EhrStoreError {
    fn from(e: ServiceError) -> Self {
        match e {
            ServiceError::Database(e) => e.into(),
            ServiceError::Model(e) => e.into(),
            ServiceError::NotFound(id) => EhrStoreError::NotFound(id),
            e @ ServiceError::CascadeDelete { .. } => EhrStoreError::CascadeDelete(e.to_string()),
            e @ ServiceError::Unsaved(_) => EhrStoreError::InvalidInput(e.to_string()),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for EhrStoreError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        EhrStoreError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path.
#[uniffi::export]
pub fn open_database(path: String) -> Result<Arc<EhrStoreCore>, EhrStoreError> {
    EhrStoreCore::from_config(StoreConfig::with_database_path(path))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<EhrStoreCore>, EhrStoreError> {
    EhrStoreCore::from_config(StoreConfig::default())
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe store wrapper for FFI.
#[derive(uniffi::Object)]
pub struct EhrStoreCore {
    db: Arc<Mutex<Database>>,
    config: StoreConfig,
}

impl EhrStoreCore {
    /// Open the database described by `config`.
    pub fn from_config(config: StoreConfig) -> Result<Arc<Self>, EhrStoreError> {
        let db = config.open_database()?;
        Ok(Arc::new(Self {
            db: Arc::new(Mutex::new(db)),
            config,
        }))
    }

    fn service<'a>(&self, db: &'a Database) -> RecordService<'a, Database> {
        RecordService::with_config(db, &self.config)
    }

    fn require_patient(
        service: &RecordService<'_, Database>,
        patient_id: &str,
    ) -> Result<PatientRecord, EhrStoreError> {
        service
            .get_patient(patient_id)?
            .ok_or_else(|| EhrStoreError::NotFound(patient_id.to_string()))
    }
}

#[uniffi::export]
impl EhrStoreCore {
    // =========================================================================
    // Patient Operations
    // =========================================================================

    /// Create and save an empty patient record.
    pub fn create_patient(&self, patient_id: String) -> Result<FfiPatientSummary, EhrStoreError> {
        let db = self.db.lock()?;
        let mut patient = PatientRecord::new(patient_id);
        self.service(&db).save_patient(&mut patient)?;
        Ok((&patient).into())
    }

    /// Save a patient record given in wire form, with its clinical records.
    pub fn save_patient_json(&self, json: String) -> Result<FfiPatientSummary, EhrStoreError> {
        let value: serde_json::Value = serde_json::from_str(&json)?;
        let mut patient = PatientRecord::from_json(&value)?;

        let db = self.db.lock()?;
        self.service(&db).save_patient(&mut patient)?;
        Ok((&patient).into())
    }

    /// Get a patient record in wire form.
    pub fn get_patient_json(&self, patient_id: String) -> Result<Option<String>, EhrStoreError> {
        let db = self.db.lock()?;
        let patient = self.service(&db).get_patient(&patient_id)?;
        patient
            .map(|p| serde_json::to_string(&p.to_json()))
            .transpose()
            .map_err(Into::into)
    }

    /// List patients, optionally only active ones.
    pub fn list_patients(
        &self,
        active_only: bool,
    ) -> Result<Vec<FfiPatientSummary>, EhrStoreError> {
        let db = self.db.lock()?;
        let patients = self.service(&db).get_patients(active_only)?;
        Ok(patients.iter().map(Into::into).collect())
    }

    /// Soft delete a patient.
    pub fn hide_patient(&self, patient_id: String) -> Result<(), EhrStoreError> {
        let db = self.db.lock()?;
        let service = self.service(&db);
        let mut patient = Self::require_patient(&service, &patient_id)?;
        service.hide_patient(&mut patient)?;
        Ok(())
    }

    /// Hard delete a patient; `cascade` also deletes its clinical records.
    pub fn delete_patient(&self, patient_id: String, cascade: bool) -> Result<(), EhrStoreError> {
        let db = self.db.lock()?;
        let service = self.service(&db);
        let patient = Self::require_patient(&service, &patient_id)?;
        service.delete_patient(&patient, cascade)?;
        Ok(())
    }

    // =========================================================================
    // Clinical Record Operations
    // =========================================================================

    /// Save a clinical record (wire form) under a patient. Returns its id.
    pub fn add_ehr_record_json(
        &self,
        patient_id: String,
        record_json: String,
    ) -> Result<String, EhrStoreError> {
        let value: serde_json::Value = serde_json::from_str(&record_json)?;
        let record = ClinicalRecord::from_json(&value)?;

        let db = self.db.lock()?;
        let service = self.service(&db);
        let mut patient = Self::require_patient(&service, &patient_id)?;
        let before = patient.ehr_records.len();
        service.save_ehr_record(record, &mut patient)?;

        patient
            .ehr_records
            .get(before)
            .or_else(|| patient.ehr_records.last())
            .and_then(|r| r.record_id())
            .map(str::to_string)
            .ok_or_else(|| EhrStoreError::DatabaseError("EHR record was not linked".into()))
    }
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe patient summary.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPatientSummary {
    pub patient_id: String,
    pub active: bool,
    pub creation_time: f64,
    pub last_update: f64,
    pub ehr_record_count: u32,
}

impl From<&PatientRecord> for FfiPatientSummary {
    fn from(patient: &PatientRecord) -> Self {
        Self {
            patient_id: patient.record_id().unwrap_or_default().to_string(),
            active: patient.is_active(),
            creation_time: patient.meta().creation_time(),
            last_update: patient.meta().last_update(),
            ehr_record_count: patient.ehr_records.len() as u32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ffi_patient_lifecycle() {
        let core = open_database_in_memory().unwrap();

        let summary = core.create_patient("p1".into()).unwrap();
        assert_eq!(summary.patient_id, "p1");
        assert_eq!(summary.ehr_record_count, 0);

        let record_id = core
            .add_ehr_record_json(
                "p1".into(),
                r#"{"ehr_data": {"archetype": "blood_pressure", "data": {"systolic": 120}}}"#.into(),
            )
            .unwrap();
        assert_eq!(record_id.len(), 32);

        let json = core.get_patient_json("p1".into()).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["ehr_records"][0]["id"], serde_json::json!(record_id));

        let refused = core.delete_patient("p1".into(), false);
        assert!(matches!(refused, Err(EhrStoreError::CascadeDelete(_))));

        core.hide_patient("p1".into()).unwrap();
        assert!(core.list_patients(true).unwrap().is_empty());
        assert_eq!(core.list_patients(false).unwrap().len(), 1);

        core.delete_patient("p1".into(), true).unwrap();
        assert!(core.get_patient_json("p1".into()).unwrap().is_none());
    }

    #[test]
    fn test_ffi_rejects_malformed_json() {
        let core = open_database_in_memory().unwrap();

        let result = core.save_patient_json(r#"{"id": "p1"}"#.into());
        assert!(matches!(result, Err(EhrStoreError::InvalidInput(_))));

        let result = core.save_patient_json("not json".into());
        assert!(matches!(result, Err(EhrStoreError::SerializationError(_))));

        let missing = core.hide_patient("nobody".into());
        assert!(matches!(missing, Err(EhrStoreError::NotFound(_))));
    }

    #[test]
    fn test_ffi_save_patient_json() {
        let core = open_database_in_memory().unwrap();
        let summary = core
            .save_patient_json(
                r#"{"id": "p2", "ehr_records": [
                    {"ehr_data": {"archetype": "heart_rate", "data": {"rate": 60}}}
                ]}"#
                .into(),
            )
            .unwrap();
        assert_eq!(summary.patient_id, "p2");
        assert_eq!(summary.ehr_record_count, 1);
        assert!(summary.active);
    }
}
