//! Patient lifecycle operations.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    cascade_refused, check_cascade_guard, into_document, is_active, lifecycle_patch, require_id,
    RecordService, SaveOutcome, ServiceError, ServiceResult,
};
use crate::db::{Document, DocumentStore};
use crate::models::{now_timestamp, PatientRecord, Record, EHR_RECORDS_KEY};

impl<'a, S: DocumentStore + ?Sized> RecordService<'a, S> {
    /// Save a patient and any of its clinical records not yet stored.
    ///
    /// A patient whose id the store already holds is left untouched and
    /// reported as [`SaveOutcome::AlreadyStored`]; use [`Self::update_patient`]
    /// to write changes.
    pub fn save_patient(&self, patient: &mut PatientRecord) -> ServiceResult<SaveOutcome> {
        if let Some(id) = patient.record_id() {
            if self.store.get_by_id(&self.patients_collection, id)?.is_some() {
                warn!(patient_id = %id, "patient already stored, save skipped");
                return Ok(SaveOutcome::AlreadyStored);
            }
        }

        self.persist_ehr_records(&mut patient.ehr_records)?;
        let document = self.patient_document(patient);
        let id = self.store.add(&self.patients_collection, &document)?;
        patient.meta.id = Some(id);

        info!(
            patient_id = patient.record_id().unwrap_or_default(),
            ehr_records = patient.ehr_records.len(),
            "patient saved"
        );
        Ok(SaveOutcome::Created)
    }

    /// Write the current state of an already stored patient.
    ///
    /// Unsaved clinical records in the aggregate are stored first;
    /// `last_update` is refreshed.
    pub fn update_patient(&self, patient: &mut PatientRecord) -> ServiceResult<()> {
        let id = require_id(&*patient)?;
        if self.store.get_by_id(&self.patients_collection, &id)?.is_none() {
            return Err(ServiceError::NotFound(id));
        }

        self.persist_ehr_records(&mut patient.ehr_records)?;
        let mut updated = patient.meta.clone();
        updated.touch_at(now_timestamp());

        let mut document = self.patient_document(patient);
        document.insert("last_update".into(), updated.last_update.into());
        if !self.store.update(&self.patients_collection, &id, &document)? {
            return Err(ServiceError::NotFound(id));
        }
        patient.meta = updated;

        info!(patient_id = %id, "patient updated");
        Ok(())
    }

    /// Fetch a patient with its clinical records, in stored order.
    pub fn get_patient(&self, patient_id: &str) -> ServiceResult<Option<PatientRecord>> {
        debug!(patient_id = %patient_id, "fetching patient");
        self.store
            .get_by_id(&self.patients_collection, patient_id)?
            .map(|document| self.load_patient(document))
            .transpose()
    }

    /// Fetch all patients, or only active ones.
    pub fn get_patients(&self, active_records_only: bool) -> ServiceResult<Vec<PatientRecord>> {
        let documents = if active_records_only {
            self.store
                .get_by_filter(&self.patients_collection, &is_active)?
        } else {
            self.store.get_all(&self.patients_collection)?
        };
        debug!(
            count = documents.len(),
            active_records_only, "fetched patients"
        );

        documents
            .into_iter()
            .map(|document| self.load_patient(document))
            .collect()
    }

    /// Soft delete: mark the patient inactive. Clinical records are untouched.
    pub fn hide_patient(&self, patient: &mut PatientRecord) -> ServiceResult<()> {
        let id = require_id(&*patient)?;
        let mut hidden = patient.meta.clone();
        hidden.hide_at(now_timestamp());

        let patch = lifecycle_patch(hidden.active, hidden.last_update);
        if !self.store.update(&self.patients_collection, &id, &patch)? {
            return Err(ServiceError::NotFound(id));
        }
        patient.meta = hidden;

        info!(patient_id = %id, "patient hidden");
        Ok(())
    }

    /// Hard-delete a patient.
    ///
    /// Fails with [`ServiceError::CascadeDelete`] while the patient still owns
    /// clinical records, unless `cascade` is set; then the clinical records
    /// are deleted through the store before the patient. Records linked by
    /// the stored patient document count as owned even when `patient` does
    /// not hold them.
    pub fn delete_patient(&self, patient: &PatientRecord, cascade: bool) -> ServiceResult<()> {
        check_cascade_guard(patient, cascade)?;
        let id = require_id(patient)?;
        let stored = self
            .store
            .get_by_id(&self.patients_collection, &id)?
            .ok_or_else(|| ServiceError::NotFound(id.clone()))?;

        let linked = linked_record_ids(patient, &stored);
        if !cascade && !linked.is_empty() {
            return Err(cascade_refused(&id, linked.len()));
        }

        for record_id in &linked {
            if !self.store.delete(&self.ehr_collection, record_id)? {
                warn!(record_id = %record_id, "EHR record already missing during cascade delete");
            }
        }

        if !self.store.delete(&self.patients_collection, &id)? {
            return Err(ServiceError::NotFound(id));
        }
        info!(patient_id = %id, ehr_records = linked.len(), "patient deleted");
        Ok(())
    }

    /// Stored patient form: the wire form with clinical record ids in
    /// `ehr_records`.
    pub(super) fn patient_document(&self, patient: &PatientRecord) -> Document {
        let mut document = into_document(patient.to_json());
        let ids = patient
            .ehr_records
            .iter()
            .filter_map(|r| r.record_id())
            .map(|id| Value::String(id.to_string()))
            .collect();
        document.insert(EHR_RECORDS_KEY.into(), Value::Array(ids));
        document
    }

    /// Rebuild the aggregate from a stored patient document.
    fn load_patient(&self, mut document: Document) -> ServiceResult<PatientRecord> {
        let ids = match document.remove(EHR_RECORDS_KEY) {
            Some(Value::Array(ids)) => ids,
            _ => Vec::new(),
        };

        let mut ehr_records = Vec::with_capacity(ids.len());
        for id in ids.iter().filter_map(Value::as_str) {
            match self.store.get_by_id(&self.ehr_collection, id)? {
                Some(record) => ehr_records.push(Value::Object(record)),
                None => warn!(record_id = %id, "patient references missing EHR record"),
            }
        }
        document.insert(EHR_RECORDS_KEY.into(), Value::Array(ehr_records));

        Ok(PatientRecord::from_json(&Value::Object(document))?)
    }
}

/// Clinical record ids owned by `patient` in memory or in its stored document,
/// deduplicated, in-memory order first.
fn linked_record_ids(patient: &PatientRecord, stored: &Document) -> Vec<String> {
    let mut ids: Vec<String> = patient
        .ehr_records
        .iter()
        .filter_map(|r| r.record_id())
        .map(str::to_string)
        .collect();

    let stored_ids = stored
        .get(EHR_RECORDS_KEY)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str);
    for id in stored_ids {
        if !ids.iter().any(|known| known == id) {
            ids.push(id.to_string());
        }
    }
    ids
}
