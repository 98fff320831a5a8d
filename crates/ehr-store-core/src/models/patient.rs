//! Patient models.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::{
    now_timestamp, ClinicalRecord, EntityKind, ModelError, ModelResult, Record, RecordKind,
    RecordMeta,
};

/// Wire member holding the patient's clinical records.
pub const EHR_RECORDS_KEY: &str = "ehr_records";

/// A patient's aggregate: identity, lifecycle and ordered clinical records.
#[derive(Debug, Clone)]
pub struct PatientRecord {
    /// Identity and lifecycle fields
    pub(crate) meta: RecordMeta,
    /// Clinical records in insertion order
    pub ehr_records: Vec<ClinicalRecord>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct PatientRecordWire {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    creation_time: Option<f64>,
    #[serde(default)]
    last_update: Option<f64>,
    #[serde(default)]
    active: Option<bool>,
    ehr_records: Vec<Value>,
}

impl PatientRecord {
    /// Create a patient record. Unlike clinical records the id is mandatory.
    pub fn new(id: impl Into<String>) -> Self {
        let creation_time = now_timestamp();
        Self {
            meta: RecordMeta {
                id: Some(id.into()),
                creation_time,
                last_update: creation_time,
                active: true,
            },
            ehr_records: Vec::new(),
        }
    }

    /// Create a patient record with explicit lifecycle fields and records.
    ///
    /// Creation time defaults to now.
    pub fn with_records(
        id: impl Into<String>,
        ehr_records: Vec<ClinicalRecord>,
        creation_time: Option<f64>,
        last_update: Option<f64>,
        active: bool,
    ) -> ModelResult<Self> {
        let creation_time = creation_time.or_else(|| Some(now_timestamp()));
        Ok(Self {
            meta: RecordMeta::new(creation_time, last_update, active, Some(id.into()))?,
            ehr_records,
        })
    }

    /// Append a clinical record, keeping insertion order.
    pub fn add_ehr_record(&mut self, record: ClinicalRecord) {
        self.ehr_records.push(record);
    }

    /// Unlink the first clinical record with the given id.
    pub fn remove_ehr_record(&mut self, clinical_record_id: &str) -> Option<ClinicalRecord> {
        let index = self
            .ehr_records
            .iter()
            .position(|r| r.record_id() == Some(clinical_record_id))?;
        Some(self.ehr_records.remove(index))
    }

    /// Find an owned clinical record by id. Returns the first match.
    pub fn get_clinical_record_by_id(&self, clinical_record_id: &str) -> Option<&ClinicalRecord> {
        self.ehr_records
            .iter()
            .find(|r| r.record_id() == Some(clinical_record_id))
    }

    pub fn has_ehr_records(&self) -> bool {
        !self.ehr_records.is_empty()
    }

    /// Encode to the wire form. `id` and `ehr_records` are always present.
    pub fn to_json(&self) -> Value {
        let mut members = Map::new();
        let id = self
            .meta
            .id
            .as_ref()
            .map_or(Value::Null, |id| Value::String(id.clone()));
        members.insert("id".into(), id);
        members.insert("creation_time".into(), self.meta.creation_time.into());
        members.insert("last_update".into(), self.meta.last_update.into());
        members.insert("active".into(), Value::Bool(self.meta.active));
        members.insert(
            EHR_RECORDS_KEY.into(),
            Value::Array(self.ehr_records.iter().map(ClinicalRecord::to_json).collect()),
        );
        Value::Object(members)
    }

    /// Decode from the wire form. `ehr_records` must be present (may be empty).
    pub fn from_json(value: &Value) -> ModelResult<Self> {
        let wire: PatientRecordWire = serde_json::from_value(value.clone())
            .map_err(|e| ModelError::invalid(EntityKind::PatientRecord, e.to_string()))?;

        let ehr_records = wire
            .ehr_records
            .iter()
            .map(ClinicalRecord::from_json)
            .collect::<ModelResult<Vec<_>>>()?;

        Ok(Self {
            meta: RecordMeta::restore(wire.id, wire.creation_time, wire.last_update, wire.active),
            ehr_records,
        })
    }
}

impl Record for PatientRecord {
    fn kind(&self) -> RecordKind {
        RecordKind::Patient
    }

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn hide(&mut self) -> f64 {
        self.meta.hide_at(now_timestamp())
    }

    /// Patient ids are owned by the caller and never regenerated.
    fn renew_id(&mut self) {}
}

/// Identity equality: both ids present, non-empty and equal.
impl PartialEq for PatientRecord {
    fn eq(&self, other: &Self) -> bool {
        self.is_same_record(other)
    }
}

impl Serialize for PatientRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PatientRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ArchetypeNode, Fields};
    use serde_json::json;

    fn clinical(id: &str) -> ClinicalRecord {
        let node = ArchetypeNode::new("blood_pressure", Fields::new())
            .unwrap()
            .with_field("systolic", 120);
        ClinicalRecord::with_meta(node, Some(1.0), None, true, Some(id.into())).unwrap()
    }

    #[test]
    fn test_new_patient() {
        let patient = PatientRecord::new("PATIENT_00001");
        assert_eq!(patient.record_id(), Some("PATIENT_00001"));
        assert!(patient.is_active());
        assert!(!patient.has_ehr_records());
    }

    #[test]
    fn test_lookup_by_id() {
        let mut patient = PatientRecord::new("p1");
        patient.add_ehr_record(clinical("c1"));
        patient.add_ehr_record(clinical("c2"));

        assert_eq!(
            patient.get_clinical_record_by_id("c2").and_then(|r| r.record_id()),
            Some("c2")
        );
        assert!(patient.get_clinical_record_by_id("missing").is_none());
    }

    #[test]
    fn test_remove_ehr_record() {
        let mut patient = PatientRecord::new("p1");
        patient.add_ehr_record(clinical("c1"));
        patient.add_ehr_record(clinical("c2"));

        let removed = patient.remove_ehr_record("c1").unwrap();
        assert_eq!(removed.record_id(), Some("c1"));
        assert_eq!(patient.ehr_records.len(), 1);
        assert!(patient.remove_ehr_record("c1").is_none());
    }

    #[test]
    fn test_encode_always_has_id_and_records() {
        let mut patient = PatientRecord::new("p1");
        patient.meta.id = None;
        let encoded = patient.to_json();
        assert_eq!(encoded["id"], Value::Null);
        assert_eq!(encoded[EHR_RECORDS_KEY], json!([]));
    }

    #[test]
    fn test_encode_with_records() {
        let mut patient = PatientRecord::with_records("p1", vec![], Some(5.0), None, true).unwrap();
        patient.add_ehr_record(clinical("c1"));

        let encoded = patient.to_json();
        assert_eq!(encoded["id"], json!("p1"));
        assert_eq!(encoded["creation_time"], json!(5.0));
        assert_eq!(encoded["last_update"], json!(5.0));
        assert_eq!(
            encoded[EHR_RECORDS_KEY][0]["ehr_data"],
            json!({"archetype": "blood_pressure", "data": {"systolic": 120}})
        );
    }

    #[test]
    fn test_decode() {
        let wire = json!({
            "id": "p1",
            "creation_time": 1.0,
            "last_update": 2.0,
            "active": false,
            "ehr_records": [
                {"id": "c1", "ehr_data": {"archetype": "blood_pressure", "data": {}}},
                {"ehr_data": {"archetype": "heart_rate", "data": {"rate": 70}}}
            ]
        });
        let patient = PatientRecord::from_json(&wire).unwrap();
        assert_eq!(patient.record_id(), Some("p1"));
        assert!(!patient.is_active());
        assert_eq!(patient.ehr_records.len(), 2);
        assert_eq!(patient.ehr_records[1].archetype(), "heart_rate");
    }

    #[test]
    fn test_decode_requires_ehr_records() {
        let err = PatientRecord::from_json(&json!({"id": "p1"})).unwrap_err();
        assert_eq!(err.entity(), Some(EntityKind::PatientRecord));

        let empty = PatientRecord::from_json(&json!({"id": "p1", "ehr_records": []})).unwrap();
        assert!(!empty.has_ehr_records());
    }

    #[test]
    fn test_decode_propagates_clinical_errors() {
        let wire = json!({"id": "p1", "ehr_records": [{"active": true}]});
        let err = PatientRecord::from_json(&wire).unwrap_err();
        assert_eq!(err.entity(), Some(EntityKind::ClinicalRecord));
    }

    #[test]
    fn test_identity_equality() {
        let a = PatientRecord::new("p1");
        let mut b = PatientRecord::new("p1");
        b.meta.active = false;
        assert_eq!(a, b);
        assert_ne!(a, PatientRecord::new("p2"));

        let mut unsaved = PatientRecord::new("p3");
        unsaved.meta.id = None;
        assert_ne!(unsaved, unsaved.clone());
    }

    #[test]
    fn test_renew_id_keeps_patient_id() {
        let mut patient = PatientRecord::new("p1");
        patient.renew_id();
        assert_eq!(patient.record_id(), Some("p1"));
    }
}
