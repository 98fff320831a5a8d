//! Clinical record models.

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use super::{
    now_timestamp, ArchetypeNode, EntityKind, ModelError, ModelResult, Record, RecordKind,
    RecordMeta,
};

/// Wire member holding the archetype payload.
pub const EHR_DATA_KEY: &str = "ehr_data";

/// A single clinical entry: one archetype instance with identity and lifecycle.
#[derive(Debug, Clone)]
pub struct ClinicalRecord {
    /// Identity and lifecycle fields
    pub(crate) meta: RecordMeta,
    /// Clinical payload
    pub ehr_data: ArchetypeNode,
}

/// Wire envelope, checked before the payload is decoded.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ClinicalRecordWire {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    creation_time: Option<f64>,
    #[serde(default)]
    last_update: Option<f64>,
    #[serde(default)]
    active: Option<bool>,
    ehr_data: Map<String, Value>,
}

impl ClinicalRecord {
    /// Create a new, not yet stored record. Its id is assigned on save.
    pub fn new(ehr_data: ArchetypeNode) -> Self {
        Self {
            meta: RecordMeta::unsaved(now_timestamp()),
            ehr_data,
        }
    }

    /// Create a record with explicit lifecycle fields.
    ///
    /// Creation time defaults to now; an id is generated when none is given.
    pub fn with_meta(
        ehr_data: ArchetypeNode,
        creation_time: Option<f64>,
        last_update: Option<f64>,
        active: bool,
        id: Option<String>,
    ) -> ModelResult<Self> {
        let creation_time = creation_time.or_else(|| Some(now_timestamp()));
        Ok(Self {
            meta: RecordMeta::new(creation_time, last_update, active, id)?,
            ehr_data,
        })
    }

    /// The archetype the payload instantiates.
    pub fn archetype(&self) -> &str {
        self.ehr_data.archetype()
    }

    /// Encode to the wire form. The `id` member is omitted when absent.
    pub fn to_json(&self) -> Value {
        let mut members = Map::new();
        members.insert("creation_time".into(), self.meta.creation_time.into());
        members.insert("last_update".into(), self.meta.last_update.into());
        members.insert("active".into(), Value::Bool(self.meta.active));
        if let Some(id) = self.meta.id() {
            members.insert("id".into(), Value::String(id.to_string()));
        }
        members.insert(EHR_DATA_KEY.into(), self.ehr_data.to_json());
        Value::Object(members)
    }

    /// Decode from the wire form. `ehr_data` is required and must be an object.
    pub fn from_json(value: &Value) -> ModelResult<Self> {
        let wire: ClinicalRecordWire = serde_json::from_value(value.clone())
            .map_err(|e| ModelError::invalid(EntityKind::ClinicalRecord, e.to_string()))?;

        let ehr_data = ArchetypeNode::from_json(&Value::Object(wire.ehr_data))?;
        Ok(Self {
            meta: RecordMeta::restore(wire.id, wire.creation_time, wire.last_update, wire.active),
            ehr_data,
        })
    }
}

impl Record for ClinicalRecord {
    fn kind(&self) -> RecordKind {
        RecordKind::Clinical
    }

    fn meta(&self) -> &RecordMeta {
        &self.meta
    }

    fn renew_id(&mut self) {
        self.meta.renew_id();
    }

    fn hide(&mut self) -> f64 {
        self.meta.hide_at(now_timestamp())
    }
}

/// Identity equality: both ids present, non-empty and equal.
impl PartialEq for ClinicalRecord {
    fn eq(&self, other: &Self) -> bool {
        self.is_same_record(other)
    }
}

impl Serialize for ClinicalRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ClinicalRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_json(&value).map_err(D::Error::custom)
    }
}
