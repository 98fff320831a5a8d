//! Domain models for clinical record storage.

mod archetype;
mod clinical;
mod patient;
mod record;

pub use archetype::*;
pub use clinical::*;
pub use patient::*;
pub use record::*;

use std::fmt;

use thiserror::Error;

/// Which kind of wire object failed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    ArchetypeInstance,
    ClinicalRecord,
    PatientRecord,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::ArchetypeInstance => "ArchetypeInstance",
            EntityKind::ClinicalRecord => "ClinicalRecord",
            EntityKind::PatientRecord => "PatientRecord",
        };
        f.write_str(name)
    }
}

/// Model construction and decoding errors.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("JSON record's structure is not compatible with {entity} object: {reason}")]
    InvalidStructure { entity: EntityKind, reason: String },

    #[error("Archetype type tag cannot be empty")]
    EmptyTypeTag,

    #[error("Record creation time is required")]
    MissingCreationTime,
}

impl ModelError {
    pub(crate) fn invalid(entity: EntityKind, reason: impl Into<String>) -> Self {
        ModelError::InvalidStructure {
            entity,
            reason: reason.into(),
        }
    }

    /// The entity kind for structural validation errors.
    pub fn entity(&self) -> Option<EntityKind> {
        match self {
            ModelError::InvalidStructure { entity, .. } => Some(*entity),
            _ => None,
        }
    }
}

pub type ModelResult<T> = Result<T, ModelError>;
