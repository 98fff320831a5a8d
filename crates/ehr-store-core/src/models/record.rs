//! Identity and lifecycle shared by every persisted record.

use super::{ModelError, ModelResult};

/// Smallest step used to keep `last_update` strictly increasing.
const TIMESTAMP_EPSILON: f64 = 1e-6;

/// The concrete kind of a persisted record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Patient,
    Clinical,
}

/// Lifecycle state of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordState {
    /// No id yet (never handed to the store)
    Unsaved,
    /// Has an id and `active == true`
    Active,
    /// Soft-deleted (`active == false`)
    Hidden,
}

/// Current time as seconds since the Unix epoch.
pub fn now_timestamp() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

/// Generate a fresh record id (UUID v4, 32 hex chars).
pub fn generate_record_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// Identity and lifecycle fields common to patient and clinical records.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMeta {
    /// Record id, absent until assigned
    pub(crate) id: Option<String>,
    /// Creation timestamp (epoch seconds)
    pub(crate) creation_time: f64,
    /// Last update timestamp (epoch seconds), never before `creation_time`
    pub(crate) last_update: f64,
    /// False once the record has been hidden
    pub(crate) active: bool,
}

impl RecordMeta {
    /// Build lifecycle state, generating an id when none is supplied.
    ///
    /// `last_update` defaults to `creation_time`. Fails when no creation time
    /// is given; concrete record types default it to "now" before calling.
    pub fn new(
        creation_time: Option<f64>,
        last_update: Option<f64>,
        active: bool,
        id: Option<String>,
    ) -> ModelResult<Self> {
        let creation_time = creation_time.ok_or(ModelError::MissingCreationTime)?;
        let id = match id {
            Some(id) if !id.is_empty() => id,
            _ => generate_record_id(),
        };
        Ok(Self {
            id: Some(id),
            creation_time,
            last_update: clamp_last_update(creation_time, last_update),
            active,
        })
    }

    /// Lifecycle state for a record that has not been assigned an id yet.
    pub fn unsaved(creation_time: f64) -> Self {
        Self {
            id: None,
            creation_time,
            last_update: creation_time,
            active: true,
        }
    }

    /// Rebuild lifecycle state from stored fields without generating an id.
    pub(crate) fn restore(
        id: Option<String>,
        creation_time: Option<f64>,
        last_update: Option<f64>,
        active: Option<bool>,
    ) -> Self {
        let creation_time = creation_time.unwrap_or_else(now_timestamp);
        Self {
            id: id.filter(|id| !id.is_empty()),
            creation_time,
            last_update: clamp_last_update(creation_time, last_update),
            active: active.unwrap_or(true),
        }
    }

    /// The id, if one has been assigned.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn creation_time(&self) -> f64 {
        self.creation_time
    }

    pub fn last_update(&self) -> f64 {
        self.last_update
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RecordState {
        if self.id().is_none() {
            RecordState::Unsaved
        } else if self.active {
            RecordState::Active
        } else {
            RecordState::Hidden
        }
    }

    /// Replace the id with a freshly generated one.
    pub(crate) fn renew_id(&mut self) {
        self.id = Some(generate_record_id());
    }

    /// Refresh `last_update`, guaranteeing it strictly increases.
    pub(crate) fn touch_at(&mut self, now: f64) -> f64 {
        self.last_update = next_update_time(self.last_update, now);
        self.last_update
    }

    /// Mark inactive and refresh `last_update`.
    pub(crate) fn hide_at(&mut self, now: f64) -> f64 {
        self.active = false;
        self.touch_at(now)
    }
}

fn clamp_last_update(creation_time: f64, last_update: Option<f64>) -> f64 {
    match last_update {
        Some(t) if t >= creation_time => t,
        _ => creation_time,
    }
}

/// Pick an update time that is strictly after `previous`.
pub fn next_update_time(previous: f64, now: f64) -> f64 {
    if now > previous {
        now
    } else {
        previous + TIMESTAMP_EPSILON
    }
}

/// Identity equality over `(kind, id)` pairs.
///
/// Records are equal only when they are the same kind and both carry the same
/// non-empty id. A record without an id is never equal to anything.
pub fn same_identity(a: (RecordKind, Option<&str>), b: (RecordKind, Option<&str>)) -> bool {
    match (a, b) {
        ((kind_a, Some(id_a)), (kind_b, Some(id_b))) => {
            kind_a == kind_b && !id_a.is_empty() && id_a == id_b
        }
        _ => false,
    }
}

/// Identity and lifecycle capability shared by patient and clinical records.
///
/// Lifecycle fields are read through [`Record::meta`]; the id only changes
/// through [`Record::renew_id`].
pub trait Record {
    /// The concrete kind of this record.
    fn kind(&self) -> RecordKind;

    fn meta(&self) -> &RecordMeta;

    /// Discard the current id and generate a fresh one.
    fn renew_id(&mut self);

    /// Soft delete: set inactive and refresh `last_update` to now.
    fn hide(&mut self) -> f64;

    fn record_id(&self) -> Option<&str> {
        self.meta().id()
    }

    fn is_active(&self) -> bool {
        self.meta().is_active()
    }

    fn state(&self) -> RecordState {
        self.meta().state()
    }

    /// Identity comparison across record kinds.
    fn is_same_record(&self, other: &dyn Record) -> bool {
        same_identity(
            (self.kind(), self.record_id()),
            (other.kind(), other.record_id()),
        )
    }
}
