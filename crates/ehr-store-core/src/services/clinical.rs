//! Clinical record lifecycle operations.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    into_document, lifecycle_patch, require_id, RecordService, SaveOutcome, ServiceError,
    ServiceResult,
};
use crate::db::{Document, DocumentStore};
use crate::models::{now_timestamp, ClinicalRecord, PatientRecord, Record, EHR_RECORDS_KEY};

impl<'a, S: DocumentStore + ?Sized> RecordService<'a, S> {
    /// Save a clinical record under `patient` and link it into the patient.
    ///
    /// The patient must already be stored; its `last_update` is refreshed.
    pub fn save_ehr_record(
        &self,
        mut record: ClinicalRecord,
        patient: &mut PatientRecord,
    ) -> ServiceResult<SaveOutcome> {
        let patient_id = self.require_stored_patient(patient)?;
        let outcome = self.store_ehr_record(&mut record)?;
        link_record(patient, record);
        self.write_ehr_links(&patient_id, patient)?;
        Ok(outcome)
    }

    /// Save several clinical records under `patient` with a single patient
    /// write. Returns how many records were newly stored.
    ///
    /// Not atomic: when a record fails to store, the records stored before it
    /// stay stored and linked, and the error is returned.
    pub fn save_ehr_records(
        &self,
        records: Vec<ClinicalRecord>,
        patient: &mut PatientRecord,
    ) -> ServiceResult<usize> {
        let patient_id = self.require_stored_patient(patient)?;

        let mut created = 0;
        let mut failure = None;
        for mut record in records {
            match self.store_ehr_record(&mut record) {
                Ok(outcome) => {
                    if outcome == SaveOutcome::Created {
                        created += 1;
                    }
                    link_record(patient, record);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.write_ehr_links(&patient_id, patient)?;

        if let Some(e) = failure {
            warn!(patient_id = %patient_id, created, "EHR record batch stopped early");
            return Err(e);
        }

        info!(patient_id = %patient_id, created, "EHR records saved");
        Ok(created)
    }

    /// Fetch a single clinical record.
    pub fn get_ehr_record(&self, record_id: &str) -> ServiceResult<Option<ClinicalRecord>> {
        debug!(record_id = %record_id, "fetching EHR record");
        self.store
            .get_by_id(&self.ehr_collection, record_id)?
            .map(|document| {
                ClinicalRecord::from_json(&Value::Object(document)).map_err(ServiceError::from)
            })
            .transpose()
    }

    /// Soft delete a clinical record.
    pub fn hide_ehr_record(&self, record: &mut ClinicalRecord) -> ServiceResult<()> {
        let id = require_id(&*record)?;
        let mut hidden = record.meta.clone();
        hidden.hide_at(now_timestamp());

        let patch = lifecycle_patch(hidden.active, hidden.last_update);
        if !self.store.update(&self.ehr_collection, &id, &patch)? {
            return Err(ServiceError::NotFound(id));
        }
        record.meta = hidden;

        info!(record_id = %id, "EHR record hidden");
        Ok(())
    }

    /// Delete a clinical record through the store and unlink it from `patient`.
    pub fn remove_ehr_record(
        &self,
        record_id: &str,
        patient: &mut PatientRecord,
    ) -> ServiceResult<ClinicalRecord> {
        let patient_id = self.require_stored_patient(patient)?;
        if patient.get_clinical_record_by_id(record_id).is_none() {
            return Err(ServiceError::NotFound(record_id.to_string()));
        }
        if !self.store.delete(&self.ehr_collection, record_id)? {
            return Err(ServiceError::NotFound(record_id.to_string()));
        }

        let removed = patient
            .remove_ehr_record(record_id)
            .ok_or_else(|| ServiceError::NotFound(record_id.to_string()))?;
        self.write_ehr_links(&patient_id, patient)?;

        info!(patient_id = %patient_id, record_id = %record_id, "EHR record removed");
        Ok(removed)
    }

    /// Store every clinical record in `records` that the store lacks.
    pub(super) fn persist_ehr_records(&self, records: &mut [ClinicalRecord]) -> ServiceResult<()> {
        for record in records.iter_mut() {
            self.store_ehr_record(record)?;
        }
        Ok(())
    }

    fn store_ehr_record(&self, record: &mut ClinicalRecord) -> ServiceResult<SaveOutcome> {
        let document = into_document(record.to_json());
        let (outcome, id) =
            self.add_if_absent(&self.ehr_collection, record.record_id(), &document)?;
        if outcome == SaveOutcome::Created {
            debug!(record_id = %id, archetype = record.archetype(), "EHR record stored");
        }
        record.meta.id = Some(id);
        Ok(outcome)
    }

    fn require_stored_patient(&self, patient: &PatientRecord) -> ServiceResult<String> {
        let id = require_id(patient)?;
        if self.store.get_by_id(&self.patients_collection, &id)?.is_none() {
            return Err(ServiceError::NotFound(id));
        }
        Ok(id)
    }

    /// Rewrite the patient's clinical record links and refresh `last_update`.
    ///
    /// The stored `active` flag is left alone, and the stored `last_update`
    /// only moves forward even when another handle touched it last.
    fn write_ehr_links(&self, patient_id: &str, patient: &mut PatientRecord) -> ServiceResult<()> {
        let stored_update = self
            .store
            .get_by_id(&self.patients_collection, patient_id)?
            .ok_or_else(|| ServiceError::NotFound(patient_id.to_string()))?
            .get("last_update")
            .and_then(Value::as_f64);

        let mut updated = patient.meta.clone();
        if let Some(stored_update) = stored_update {
            updated.last_update = updated.last_update.max(stored_update);
        }
        updated.touch_at(now_timestamp());

        let mut patch = Document::new();
        patch.insert("last_update".into(), updated.last_update.into());
        let document = self.patient_document(patient);
        if let Some(links) = document.get(EHR_RECORDS_KEY) {
            patch.insert(EHR_RECORDS_KEY.into(), links.clone());
        }

        if !self.store.update(&self.patients_collection, patient_id, &patch)? {
            return Err(ServiceError::NotFound(patient_id.to_string()));
        }
        patient.meta = updated;
        Ok(())
    }
}

/// Add `record` to the aggregate unless a record with its id is already there.
fn link_record(patient: &mut PatientRecord, record: ClinicalRecord) {
    let linked = record
        .record_id()
        .is_some_and(|id| patient.get_clinical_record_by_id(id).is_some());
    if !linked {
        patient.add_ehr_record(record);
    }
}
